//! Partitions a jurisdiction's locations into rating regions by probing the
//! quoting API and clustering identical priced output.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rand::seq::SliceRandom;
use ratewatch_core::{
    CarrierId, GroupingMode, Jurisdiction, PricingFingerprint, RatingRegion,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::client::{LocationIndex, QuoteSource};
use crate::config::{MapperConfig, RatingAxes};

#[derive(Error, Debug)]
pub enum MapError {
    #[error("no region mapping possible for carrier {carrier} in {jurisdiction}: every probe failed or priced nothing")]
    NoMappingPossible {
        carrier: CarrierId,
        jurisdiction: Jurisdiction,
    },
}

/// Builds the rating-region partition for one carrier and jurisdiction.
///
/// Two locations land in the same region exactly when a probe quote returns
/// structurally identical pricing for both. Locations whose probes fail or
/// price nothing are left out of the partition.
pub struct RegionMapper<'a> {
    source: &'a dyn QuoteSource,
    index: &'a dyn LocationIndex,
    config: MapperConfig,
    axes: RatingAxes,
}

impl<'a> RegionMapper<'a> {
    pub fn new(
        source: &'a dyn QuoteSource,
        index: &'a dyn LocationIndex,
        config: MapperConfig,
        axes: RatingAxes,
    ) -> Self {
        Self {
            source,
            index,
            config,
            axes,
        }
    }

    /// Probe every location (or one per administrative grouping in coarse
    /// jurisdictions) and cluster by pricing fingerprint. Region numbers are
    /// assigned in discovery order starting at zero.
    pub async fn map_regions(
        &self,
        carrier: CarrierId,
        jurisdiction: &Jurisdiction,
        effective_date: NaiveDate,
    ) -> Result<Vec<RatingRegion>, MapError> {
        let grouping = if self.config.coarse_jurisdictions.contains(jurisdiction) {
            GroupingMode::Coarse
        } else {
            GroupingMode::Fine
        };
        let probes = self.probe_plan(jurisdiction, grouping);
        info!(
            %carrier,
            %jurisdiction,
            mode = grouping.as_str(),
            probes = probes.len(),
            "mapping rating regions"
        );

        let probe_params = self.axes.probe(jurisdiction);
        let mut clusters: Vec<(PricingFingerprint, RatingRegion)> = Vec::new();
        for (probe_location, members) in probes {
            let quotes = match self
                .source
                .fetch_quote(jurisdiction, &probe_location, carrier, &probe_params, effective_date)
                .await
            {
                Ok(quotes) => quotes,
                Err(err) => {
                    warn!(location = %probe_location, error = %err, "probe failed, skipping");
                    continue;
                }
            };
            // Aggregator responses can carry other carriers' quotes; only a
            // quote for the requested carrier may seed or join a region.
            let Some(quote) = quotes.iter().find(|q| q.carrier == carrier) else {
                warn!(location = %probe_location, "probe priced nothing for carrier, skipping");
                continue;
            };

            let fingerprint = PricingFingerprint::of(quote);
            match clusters.iter_mut().find(|(f, _)| *f == fingerprint) {
                Some((_, region)) => region.locations.extend(members),
                None => {
                    let region_number = clusters.len() as u32;
                    clusters.push((
                        fingerprint,
                        RatingRegion {
                            carrier,
                            jurisdiction: jurisdiction.clone(),
                            region_number,
                            grouping,
                            locations: members.into_iter().collect(),
                        },
                    ));
                }
            }
        }

        if clusters.is_empty() {
            return Err(MapError::NoMappingPossible {
                carrier,
                jurisdiction: jurisdiction.clone(),
            });
        }
        let regions: Vec<RatingRegion> = clusters.into_iter().map(|(_, r)| r).collect();
        info!(regions = regions.len(), "region mapping complete");
        Ok(regions)
    }

    /// The probe workload: pairs of (location to quote, locations assigned to
    /// whatever region the probe lands in). Fine mode probes every location
    /// for itself; coarse mode probes one location per administrative
    /// grouping and assigns the whole grouping with it.
    fn probe_plan(
        &self,
        jurisdiction: &Jurisdiction,
        grouping: GroupingMode,
    ) -> Vec<(String, Vec<String>)> {
        let mut locations = self.index.list_locations(jurisdiction);
        locations.shuffle(&mut rand::rng());
        match grouping {
            GroupingMode::Fine => locations
                .into_iter()
                .map(|l| (l.clone(), vec![l]))
                .collect(),
            GroupingMode::Coarse => {
                let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
                for location in locations {
                    let group = self
                        .index
                        .grouping_of(&location)
                        .unwrap_or_else(|| location.clone());
                    groups.entry(group).or_default().push(location);
                }
                groups
                    .into_values()
                    .filter_map(|members| {
                        members.first().cloned().map(|probe| (probe, members))
                    })
                    .collect()
            }
        }
    }
}
