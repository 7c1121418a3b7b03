//! Traits over the two external collaborators: the quoting API and the
//! location reference data.

use async_trait::async_trait;
use chrono::NaiveDate;
use ratewatch_core::{CarrierId, Jurisdiction, RatingParams, RawQuote};
use thiserror::Error;

/// Failure classification for a single quote request.
///
/// `Transient` failures (timeouts, connection resets, throttling) are worth
/// retrying against the same location. `Hard` failures (rejected requests,
/// unparseable responses) are not, though the caller may retry once in case
/// the server misclassified a flaky condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("hard failure: {0}")]
    Hard(String),
}

/// A source of premium quotes, usually the carrier aggregator's HTTP API.
///
/// An `Ok(vec![])` result means the source priced nothing for the request.
/// That is a valid answer, distinct from a failed request, and the caller
/// decides whether to try another location.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_quote(
        &self,
        jurisdiction: &Jurisdiction,
        location: &str,
        carrier: CarrierId,
        params: &RatingParams,
        effective_date: NaiveDate,
    ) -> Result<Vec<RawQuote>, FetchError>;
}

/// Read-only view of the location universe within each jurisdiction.
///
/// Every location belongs to exactly one administrative grouping (a county,
/// district, or similar). Groupings drive coarse region mapping and the
/// choice of fallback locations when a quote comes back empty.
pub trait LocationIndex: Send + Sync {
    /// All locations in the jurisdiction, in no particular order.
    fn list_locations(&self, jurisdiction: &Jurisdiction) -> Vec<String>;

    /// The administrative grouping a location belongs to, if known.
    fn grouping_of(&self, location: &str) -> Option<String>;
}
