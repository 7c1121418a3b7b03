//! Colon-delimited storage keys exposed to external tooling.
//!
//! A key names either a whole rating region or one rate point inside it:
//!
//! - `carrier:jurisdiction:region` for a region-level document
//! - `carrier:jurisdiction:region:age:gender:plan:tobacco` for a single rate
//!
//! The format is stable and parseable so external reports can pattern-match
//! by prefix (e.g., all records for a carrier/jurisdiction regardless of
//! region). Tobacco is encoded as `0`/`1`; plans never contain `:`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::types::{CarrierId, Gender, Jurisdiction};

#[derive(Debug, Error, PartialEq)]
pub enum KeyError {
    #[error("expected 3 or 7 colon-delimited segments, got {0}")]
    SegmentCount(usize),
    #[error("invalid {field} segment: {value}")]
    Segment { field: &'static str, value: String },
}

/// The rating-parameter identity of a single stored rate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RatePoint {
    pub age: u8,
    pub gender: Gender,
    pub plan: String,
    pub tobacco: bool,
}

impl fmt::Display for RatePoint {
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

/// Composite identity of a stored rate document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    pub carrier: CarrierId,
    pub jurisdiction: Jurisdiction,
    pub region_number: u32,
    pub point: Option<RatePoint>,
}

impl RateKey {
    /// Key for a whole region's rate document.
    pub fn region(carrier: CarrierId, jurisdiction: Jurisdiction, region_number: u32) -> Self {
        Self {
            carrier,
            jurisdiction,
            region_number,
            point: None,
        }
    }

    /// Narrow a region key down to one rate point.
    pub fn with_point(mut self, point: RatePoint) -> Self {
        self.point = Some(point);
        self
    }

    /// Prefix matching every key for a carrier/jurisdiction pair, any region.
    pub fn prefix(carrier: CarrierId, jurisdiction: &Jurisdiction) -> String {
        format!("{carrier}:{jurisdiction}:")
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.carrier, self.jurisdiction, self.region_number)?;
        if let Some(point) = &self.point {
            write!(f, ":{point}")?;
        }
        Ok(())
    }
}

impl FromStr for RateKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = s.split(':').collect();
        if segments.len() != 3 && segments.len() != 7 {
            return Err(KeyError::SegmentCount(segments.len()));
        }

        let carrier = CarrierId(parse_segment(segments[0], "carrier")?);
        let jurisdiction = Jurisdiction::new(segments[1]);
        let region_number = parse_segment(segments[2], "region")?;

        let point = if segments.len() == 7 {
            let age = parse_segment(segments[3], "age")?;
            let gender = segments[4].parse::<Gender>().map_err(|value| {
                KeyError::Segment { field: "gender", value }
            })?;
            let tobacco = match segments[6] {
                "0" => false,
                "1" => true,
                other => {
                    return Err(KeyError::Segment {
                        field: "tobacco",
                        value: other.to_string(),
                    });
                }
            };
            Some(RatePoint {
                age,
                gender,
                plan: segments[5].to_string(),
                tobacco,
            })
        } else {
            None
        };

        Ok(Self {
            carrier,
            jurisdiction,
            region_number,
            point,
        })
    }
}

fn parse_segment<T: FromStr>(value: &str, field: &'static str) -> Result<T, KeyError> {
    value.parse().map_err(|_| KeyError::Segment {
        field,
        value: value.to_string(),
    })
}
