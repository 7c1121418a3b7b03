//! Domain types, storage keys, and quote normalization shared across the
//! ratewatch crates.

pub mod key;
pub mod normalize;
pub mod types;

pub use key::{KeyError, RateKey, RatePoint};
pub use normalize::{NormalizedRate, document_rate, normalize, rates_to_document};
pub use types::{
    AgeCurvePoint, CarrierId, DiscountEntry, Gender, GroupingMode, Jurisdiction,
    PricingFingerprint, RatingParams, RatingRegion, RawQuote, cents,
};
