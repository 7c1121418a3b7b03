//! Cheap spot-check: compare one live probe per rating region against the
//! most recent stored rates.

use chrono::NaiveDate;
use rand::seq::IteratorRandom;
use ratewatch_core::{CarrierId, Jurisdiction, NormalizedRate, RateKey, cents, document_rate, normalize};
use ratewatch_store::{RateStore, StoreError};
use thiserror::Error;
use tracing::{info, warn};

use crate::client::{LocationIndex, QuoteSource};
use crate::config::RatingAxes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Unchanged,
    Changed,
    /// Every sampled probe failed or priced nothing, so no comparison was
    /// possible.
    Unavailable,
}

#[derive(Debug)]
pub struct ChangeReport {
    pub carrier: CarrierId,
    pub jurisdiction: Jurisdiction,
    pub verdict: Verdict,
    /// Keys whose live rate differs from the stored rate, or that exist on
    /// only one side of the comparison.
    pub changed_keys: Vec<RateKey>,
}

#[derive(Error, Debug)]
pub enum DetectError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Spot-checks stored rates against live probe quotes.
///
/// One probe parameter combination is quoted at one location per region (or
/// one overall when no region set is stored). Comparison is restricted to
/// stored identities matching the probe's gender, plan, and tobacco axes,
/// since only those have a fetched counterpart.
pub struct ChangeDetector<'a> {
    source: &'a dyn QuoteSource,
    store: &'a RateStore,
    index: &'a dyn LocationIndex,
    axes: RatingAxes,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(
        source: &'a dyn QuoteSource,
        store: &'a RateStore,
        index: &'a dyn LocationIndex,
        axes: RatingAxes,
    ) -> Self {
        Self {
            source,
            store,
            index,
            axes,
        }
    }

    pub async fn detect(
        &self,
        carrier: CarrierId,
        jurisdiction: &Jurisdiction,
        effective_date: NaiveDate,
    ) -> Result<ChangeReport, DetectError> {
        let regions = self.store.regions(carrier, jurisdiction)?;
        // One random sample per region so repeated checks don't hammer the
        // same location.
        let mut rng = rand::rng();
        let samples: Vec<(u32, String)> = if regions.is_empty() {
            self.index
                .list_locations(jurisdiction)
                .into_iter()
                .choose(&mut rng)
                .map(|location| (0, location))
                .into_iter()
                .collect()
        } else {
            regions
                .iter()
                .filter_map(|r| {
                    r.locations
                        .iter()
                        .choose(&mut rng)
                        .cloned()
                        .map(|location| (r.region_number, location))
                })
                .collect()
        };

        let probe = self.axes.probe(jurisdiction);
        let scope_suffix = format!(":{}:{}:{}", probe.gender, probe.plan, probe.tobacco as u8);
        let mut any_live = false;
        let mut changed_keys = Vec::new();

        for (region_number, location) in samples {
            let quotes = match self
                .source
                .fetch_quote(jurisdiction, &location, carrier, &probe, effective_date)
                .await
            {
                Ok(quotes) => quotes,
                Err(err) => {
                    warn!(region = region_number, %location, error = %err, "probe failed");
                    continue;
                }
            };
            let fetched: Vec<NormalizedRate> = quotes
                .iter()
                .filter(|q| q.carrier == carrier)
                .flat_map(normalize)
                .collect();
            if fetched.is_empty() {
                warn!(region = region_number, %location, "probe priced nothing");
                continue;
            }
            any_live = true;

            let region_key = RateKey::region(carrier, jurisdiction.clone(), region_number);
            let stored = self
                .store
                .get_most_recent_before(&region_key, effective_date)?
                .map(|(_, doc)| doc);

            // Live side: identity -> rate, higher rate winning duplicates.
            let mut live: std::collections::BTreeMap<String, f64> = std::collections::BTreeMap::new();
            for rate in &fetched {
                let entry = live.entry(rate.identity()).or_insert(rate.rate);
                if rate.rate > *entry {
                    *entry = rate.rate;
                }
            }

            // Stored side, restricted to the probe's scope.
            let mut identities: std::collections::BTreeSet<String> = live.keys().cloned().collect();
            if let Some(doc) = stored.as_ref().and_then(|d| d.as_object()) {
                identities.extend(
                    doc.keys()
                        .filter(|k| k.ends_with(&scope_suffix))
                        .cloned(),
                );
            }

            for identity in identities {
                let stored_rate = stored.as_ref().and_then(|doc| document_rate(doc, &identity));
                let live_rate = live.get(&identity).copied();
                let same = match (stored_rate, live_rate) {
                    (Some(s), Some(l)) => cents(s) == cents(l),
                    _ => false,
                };
                if same {
                    continue;
                }
                match format!("{region_key}:{identity}").parse::<RateKey>() {
                    Ok(key) => changed_keys.push(key),
                    Err(err) => {
                        warn!(%identity, error = %err, "unparseable stored identity")
                    }
                }
            }
        }

        let verdict = if !any_live {
            Verdict::Unavailable
        } else if changed_keys.is_empty() {
            Verdict::Unchanged
        } else {
            Verdict::Changed
        };
        info!(
            %carrier,
            %jurisdiction,
            ?verdict,
            changed = changed_keys.len(),
            "change detection complete"
        );
        Ok(ChangeReport {
            carrier,
            jurisdiction: jurisdiction.clone(),
            verdict,
            changed_keys,
        })
    }
}
