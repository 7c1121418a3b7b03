//! Storage layer: date-versioned rate documents with merge-patch writes, and
//! replace-on-write region persistence.

mod db;
mod error;
mod merge;

pub use db::RateStore;
pub use error::StoreError;
pub use merge::merge_patch;
