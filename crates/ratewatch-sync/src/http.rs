//! HTTP client for the carrier aggregator's quoting API.

use async_trait::async_trait;
use chrono::NaiveDate;
use ratewatch_core::{AgeCurvePoint, CarrierId, DiscountEntry, Jurisdiction, RatingParams, RawQuote};
use serde::Deserialize;
use tracing::info;

use crate::client::{FetchError, QuoteSource};

/// Quote client backed by the aggregator's JSON endpoint.
pub struct QuoteClient {
    client: reqwest::Client,
    base_url: String,
}

/// One quote as the aggregator returns it. Premiums come back in cents and
/// age pricing as year-over-year fractional increases from the quoted age.
#[derive(Debug, Deserialize)]
struct WireQuote {
    naic: u32,
    rate: WireRate,
    #[serde(default)]
    age_increases: Vec<f64>,
    #[serde(default)]
    discounts: Vec<WireDiscount>,
    effective_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct WireRate {
    month: f64,
}

#[derive(Debug, Deserialize)]
struct WireDiscount {
    name: String,
    value: f64,
}

impl WireQuote {
    fn into_raw(self, params: &RatingParams) -> RawQuote {
        let mut age_curve = vec![AgeCurvePoint {
            age_threshold: params.age,
            multiplier: 1.0,
        }];
        for (i, increase) in self.age_increases.iter().enumerate() {
            age_curve.push(AgeCurvePoint {
                age_threshold: params.age.saturating_add(i as u8 + 1),
                multiplier: 1.0 + increase,
            });
        }
        RawQuote {
            carrier: CarrierId(self.naic),
            params: params.clone(),
            base_rate: self.rate.month / 100.0,
            age_curve,
            discounts: self
                .discounts
                .into_iter()
                .map(|d| DiscountEntry {
                    label: d.name,
                    fraction: d.value,
                })
                .collect(),
            effective_date: self.effective_date,
        }
    }
}

impl QuoteClient {
    /// `base_url` should be like `https://quotes.example.com` (no trailing
    /// slash).
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn classify(err: reqwest::Error) -> FetchError {
        if err.is_timeout() || err.is_connect() {
            FetchError::Transient(err.to_string())
        } else if err.is_decode() {
            FetchError::Hard(format!("unparseable response: {err}"))
        } else {
            FetchError::Hard(err.to_string())
        }
    }
}

#[async_trait]
impl QuoteSource for QuoteClient {
    async fn fetch_quote(
        &self,
        jurisdiction: &Jurisdiction,
        location: &str,
        carrier: CarrierId,
        params: &RatingParams,
        effective_date: NaiveDate,
    ) -> Result<Vec<RawQuote>, FetchError> {
        let url = format!("{}/v1/quotes.json", self.base_url);
        info!(
            url = %url,
            %carrier,
            jurisdiction = %jurisdiction,
            location,
            age = params.age,
            plan = %params.plan,
            "requesting quotes"
        );
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("state", jurisdiction.as_str()),
                ("zip5", location),
                ("naic", &carrier.to_string()),
                ("age", &params.age.to_string()),
                ("gender", params.gender.as_str()),
                ("plan", &params.plan),
                ("tobacco", if params.tobacco { "1" } else { "0" }),
                ("effective_date", &effective_date.to_string()),
            ])
            .send()
            .await
            .map_err(Self::classify)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let msg = format!("server returned {status}: {body}");
            return if status.as_u16() == 408
                || status.as_u16() == 429
                || status.is_server_error()
            {
                Err(FetchError::Transient(msg))
            } else {
                Err(FetchError::Hard(msg))
            };
        }

        let wire: Vec<WireQuote> = resp.json().await.map_err(Self::classify)?;
        info!(count = wire.len(), "received quotes");
        Ok(wire.into_iter().map(|w| w.into_raw(params)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratewatch_core::Gender;

    fn params() -> RatingParams {
        RatingParams {
            age: 65,
            gender: Gender::Female,
            plan: "G".to_string(),
            tobacco: false,
        }
    }

    #[test]
    fn wire_quote_converts_cents_and_increases() {
        let wire: WireQuote = serde_json::from_str(
            r#"{
                "naic": 60984,
                "rate": {"month": 12345.0},
                "age_increases": [0.05, 0.04],
                "discounts": [{"name": "household", "value": 0.07}],
                "effective_date": "2026-09-01"
            }"#,
        )
        .unwrap();
        let raw = wire.into_raw(&params());
        assert_eq!(raw.carrier, CarrierId(60984));
        assert_eq!(raw.base_rate, 123.45);
        assert_eq!(raw.age_curve.len(), 3);
        assert_eq!(raw.age_curve[0].age_threshold, 65);
        assert_eq!(raw.age_curve[0].multiplier, 1.0);
        assert_eq!(raw.age_curve[1].age_threshold, 66);
        assert_eq!(raw.age_curve[1].multiplier, 1.05);
        assert_eq!(raw.discounts[0].label, "household");
    }

    #[test]
    fn wire_quote_defaults_optional_tables() {
        let wire: WireQuote = serde_json::from_str(
            r#"{"naic": 1, "rate": {"month": 100.0}, "effective_date": "2026-09-01"}"#,
        )
        .unwrap();
        let raw = wire.into_raw(&params());
        assert_eq!(raw.age_curve.len(), 1);
        assert!(raw.discounts.is_empty());
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let client = QuoteClient::new("http://localhost:8080/".to_string());
        assert_eq!(client.base_url, "http://localhost:8080");
    }
}
