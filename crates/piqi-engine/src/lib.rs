//! Data-quality evaluation engine for electronic patient records.
//!
//! A patient message is parsed against a declarative entity model, zipped
//! into an evaluation tree, and scored by Scoring-and-Assessment Methods
//! (SAMs) bound to entities through an evaluation rubric. The outcome is a
//! per-message scorecard with message-level and per-data-class totals plus
//! non-scoring informational results.

pub mod config;
pub mod error;
pub mod evaluation;
pub mod message;
pub mod refdata;
pub mod sams;
pub mod scorecard;
pub mod stats;
pub mod telemetry;
