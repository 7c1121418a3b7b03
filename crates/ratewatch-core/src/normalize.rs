//! Quote normalization: expanding a raw quote's age curve and discount table
//! into discrete per-age effective rates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::types::{AgeCurvePoint, Gender, RawQuote};

/// One discrete effective rate derived from a raw quote.
///
/// `rate` is pre-discount, `discount_rate` post-discount; both rounded to
/// currency precision (2 dp). `label` names the discount entry that produced
/// the discount rate, when the quote carried one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRate {
    pub age: u8,
    pub gender: Gender,
    pub plan: String,
    pub tobacco: bool,
    pub rate: f64,
    pub discount_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl NormalizedRate {
    /// Identity tuple rendered as a document key: `age:gender:plan:tobacco`.
    pub fn identity(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.age,
            self.gender,
            self.plan,
            self.tobacco as u8
        )
    }
}

/// Round to currency precision (2 decimal places).
fn round_currency(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Convert a raw quote into the set of discrete effective rates it prices.
///
/// The age curve is sorted ascending by threshold and applied as a running
/// product; the priced ages span the curve's lowest to highest threshold.
/// An empty or malformed curve prices only the quote's own age at multiplier
/// 1.0. Within one pass, at most one rate survives per identity tuple; on
/// duplicates the higher pre-discount rate wins.
///
/// Deterministic: identical input always yields the identical output set.
pub fn normalize(quote: &RawQuote) -> Vec<NormalizedRate> {
    let curve = usable_curve(quote);

    let mut priced: Vec<(u8, f64)> = Vec::new();
    if curve.is_empty() {
        priced.push((quote.params.age, 1.0));
    } else {
        let lowest = curve[0].age_threshold;
        let highest = curve[curve.len() - 1].age_threshold;
        for age in lowest..=highest {
            let cumulative: f64 = curve
                .iter()
                .take_while(|p| p.age_threshold <= age)
                .map(|p| p.multiplier)
                .product();
            priced.push((age, cumulative));
        }
    }

    let discounts: Vec<(Option<String>, f64)> = if quote.discounts.is_empty() {
        vec![(None, 0.0)]
    } else {
        quote
            .discounts
            .iter()
            .map(|d| (Some(d.label.clone()), d.fraction))
            .collect()
    };

    let mut best: BTreeMap<String, NormalizedRate> = BTreeMap::new();
    for (age, cumulative) in priced {
        let rate = round_currency(quote.base_rate * cumulative);
        for (label, fraction) in &discounts {
            let candidate = NormalizedRate {
                age,
                gender: quote.params.gender,
                plan: quote.params.plan.clone(),
                tobacco: quote.params.tobacco,
                rate,
                discount_rate: round_currency(rate * (1.0 - fraction)),
                label: label.clone(),
            };
            match best.get(&candidate.identity()) {
                Some(existing) if existing.rate >= candidate.rate => {}
                _ => {
                    best.insert(candidate.identity(), candidate);
                }
            }
        }
    }

    best.into_values().collect()
}

/// Sorted, validated age curve. Non-finite or non-positive multipliers are
/// dropped rather than unwinding the run.
fn usable_curve(quote: &RawQuote) -> Vec<AgeCurvePoint> {
    let mut curve: Vec<AgeCurvePoint> = quote
        .age_curve
        .iter()
        .copied()
        .filter(|p| p.multiplier.is_finite() && p.multiplier > 0.0)
        .collect();
    if curve.len() != quote.age_curve.len() {
        warn!(
            carrier = %quote.carrier,
            dropped = quote.age_curve.len() - curve.len(),
            "dropped malformed age curve entries"
        );
    }
    curve.sort_by_key(|p| p.age_threshold);
    curve
}

/// Build the region-level store document for a batch of normalized rates:
/// a JSON object keyed by identity tuple.
pub fn rates_to_document(rates: &[NormalizedRate]) -> Result<Value, serde_json::Error> {
    let mut doc = Map::new();
    for rate in rates {
        doc.insert(rate.identity(), serde_json::to_value(rate)?);
    }
    Ok(Value::Object(doc))
}

/// Look up the stored pre-discount rate for one identity key inside a region
/// document. Tolerates partial documents from incomplete merge passes.
pub fn document_rate(doc: &Value, identity: &str) -> Option<f64> {
    doc.get(identity)?.get("rate")?.as_f64()
}
