//! Product-catalog deduplication: groups SKUs that describe the same item.
//!
//! Grouping runs in two passes. Products whose fingerprints (brand, model
//! and category-significant characteristics) agree are grouped exactly;
//! the rest are clustered by signature similarity at a caller-chosen
//! strictness. A [`catalog::Catalog`] keeps the result and supports
//! moderator edits and incremental regrouping.

pub mod algo;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod ops;

pub use catalog::Catalog;
pub use config::{EngineConfig, EngineContext};
pub use error::{Diagnostic, GroupingError, Result};
pub use model::{Group, Origin, ProductId, ProductRecord};
