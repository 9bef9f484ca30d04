//! Click analytics: classification, geo enrichment and incremental
//! aggregation.
//!
//! The redirect path classifies each hit into a [`models::ClickEvent`] and
//! hands it to the [`engine::AggregationEngine`], which appends the event
//! and folds it into the per-short-code aggregate document. Reads come
//! straight off that document; [`fallback::rebuild`] covers short codes that
//! predate it.

pub mod classifier;
pub mod engine;
pub mod fallback;
pub mod geo;
pub mod ip;
pub mod models;

pub use classifier::EventClassifier;
pub use engine::AggregationEngine;
pub use geo::{GeoData, GeoIpService};
pub use ip::extract_client_ip;
