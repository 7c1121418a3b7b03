//! Live quote collection: region mapping, rate fetching, change detection.

pub mod client;
pub mod config;
pub mod detect;
pub mod http;
pub mod index;
pub mod limiter;
pub mod mapper;
pub mod orchestrator;

pub use client::{FetchError, LocationIndex, QuoteSource};
pub use config::{FetchPolicy, LimiterConfig, MapperConfig, RatingAxes};
pub use detect::{ChangeDetector, ChangeReport, DetectError, Verdict};
pub use http::QuoteClient;
pub use index::StaticLocationIndex;
pub use limiter::FetchLimiter;
pub use mapper::{MapError, RegionMapper};
pub use orchestrator::{FailureReason, FetchOrchestrator, FetchOutcome, FetchTask, TaskFailure};
