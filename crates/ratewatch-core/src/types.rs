//! Shared domain types for carrier rate tracking.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Stable numeric carrier identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CarrierId(pub u32);

impl fmt::Display for CarrierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Top-level regulatory region within which a carrier's rates are priced.
///
/// Normalised to an uppercase short code (e.g., `TX`, `MA`) on construction.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Jurisdiction(String);

impl Jurisdiction {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Jurisdiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Gender axis of a rating-parameter combination. Wire form is `M`/`F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "M" => Ok(Gender::Male),
            "F" => Ok(Gender::Female),
            other => Err(other.to_string()),
        }
    }
}

/// One point of the rating-parameter space a quote is requested for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RatingParams {
    pub age: u8,
    pub gender: Gender,
    pub plan: String,
    pub tobacco: bool,
}

impl fmt::Display for RatingParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.age,
            self.gender,
            self.plan,
            self.tobacco as u8
        )
    }
}

/// One `(ageThreshold, multiplier)` step of a quote's age curve.
///
/// Curve entries apply multiplicatively: the effective multiplier at an age is
/// the running product of every entry at or below that age.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgeCurvePoint {
    pub age_threshold: u8,
    pub multiplier: f64,
}

/// One labelled discount entry of a quote's discount table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountEntry {
    pub label: String,
    pub fraction: f64,
}

/// One priced response from the quote source for a carrier/location/request.
///
/// Transient: consumed immediately by [`crate::normalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQuote {
    pub carrier: CarrierId,
    pub params: RatingParams,
    pub base_rate: f64,
    pub age_curve: Vec<AgeCurvePoint>,
    pub discounts: Vec<DiscountEntry>,
    /// The date the quoted rates take effect, as reported by the source.
    pub effective_date: NaiveDate,
}

/// Whether a carrier groups locations by fine-grained code or by the coarser
/// administrative grouping. Fixed when a region set is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingMode {
    Fine,
    Coarse,
}

impl GroupingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupingMode::Fine => "fine",
            GroupingMode::Coarse => "coarse",
        }
    }
}

impl FromStr for GroupingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fine" => Ok(GroupingMode::Fine),
            "coarse" => Ok(GroupingMode::Coarse),
            other => Err(other.to_string()),
        }
    }
}

/// A carrier/jurisdiction-specific cluster of locations sharing identical
/// priced output. Every location assigned to a carrier/jurisdiction belongs
/// to exactly one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingRegion {
    pub carrier: CarrierId,
    pub jurisdiction: Jurisdiction,
    pub region_number: u32,
    pub grouping: GroupingMode,
    pub locations: BTreeSet<String>,
}

/// A currency amount in whole cents, for exact comparison of rounded rates.
pub fn cents(rate: f64) -> i64 {
    (rate * 100.0).round() as i64
}

/// Integer rendering of a quote's priced output (base rate, age curve, and
/// discount table) so structurally identical quotes compare `Eq` and hash
/// identically regardless of float noise.
///
/// Multipliers and discount fractions are kept in micro-units (1e-6).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PricingFingerprint {
    base_cents: i64,
    curve: Vec<(u8, i64)>,
    discounts: Vec<(String, i64)>,
}

impl PricingFingerprint {
    pub fn of(quote: &RawQuote) -> Self {
        let mut curve: Vec<(u8, i64)> = quote
            .age_curve
            .iter()
            .map(|p| (p.age_threshold, micro(p.multiplier)))
            .collect();
        curve.sort_unstable();

        let mut discounts: Vec<(String, i64)> = quote
            .discounts
            .iter()
            .map(|d| (d.label.clone(), micro(d.fraction)))
            .collect();
        discounts.sort_unstable();

        Self {
            base_cents: cents(quote.base_rate),
            curve,
            discounts,
        }
    }
}

fn micro(x: f64) -> i64 {
    (x * 1_000_000.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn quote(base_rate: f64) -> RawQuote {
        RawQuote {
            carrier: CarrierId(82538),
            params: RatingParams {
                age: 65,
                gender: Gender::Male,
                plan: "G".into(),
                tobacco: false,
            },
            base_rate,
            age_curve: vec![
                AgeCurvePoint { age_threshold: 65, multiplier: 1.0 },
                AgeCurvePoint { age_threshold: 70, multiplier: 1.1 },
            ],
            discounts: vec![DiscountEntry { label: "AA".into(), fraction: 0.05 }],
            effective_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
        }
    }

    #[test]
    fn jurisdiction_normalised_uppercase() {
        assert_eq!(Jurisdiction::new(" tx ").as_str(), "TX");
        assert_eq!(Jurisdiction::new("MA"), Jurisdiction::new("ma"));
    }

    #[test]
    fn gender_round_trip() {
        assert_eq!("M".parse::<Gender>().unwrap(), Gender::Male);
        assert_eq!("F".parse::<Gender>().unwrap(), Gender::Female);
        assert!("X".parse::<Gender>().is_err());
    }

    #[test]
    fn grouping_mode_round_trip() {
        assert_eq!("fine".parse::<GroupingMode>().unwrap(), GroupingMode::Fine);
        assert_eq!("coarse".parse::<GroupingMode>().unwrap(), GroupingMode::Coarse);
        assert!("zip".parse::<GroupingMode>().is_err());
    }

    #[test]
    fn cents_rounds_to_currency_precision() {
        assert_eq!(cents(110.004), 11000);
        assert_eq!(cents(110.005), 11001);
        assert_eq!(cents(104.50), 10450);
    }

    #[test]
    fn fingerprint_ignores_entry_order() {
        let a = quote(100.0);
        let mut b = quote(100.0);
        b.age_curve.reverse();
        assert_eq!(PricingFingerprint::of(&a), PricingFingerprint::of(&b));
    }

    #[test]
    fn fingerprint_detects_rate_difference() {
        let a = quote(100.0);
        let b = quote(100.01);
        assert_ne!(PricingFingerprint::of(&a), PricingFingerprint::of(&b));
    }

    #[test]
    fn fingerprint_tolerates_float_noise() {
        let a = quote(100.0);
        let mut b = quote(100.0);
        b.age_curve[1].multiplier = 1.1 + 1e-12;
        assert_eq!(PricingFingerprint::of(&a), PricingFingerprint::of(&b));
    }
}
