//! Pattern engine: baselines, correlation, pattern merging, the insight tiers,
//! cohort anonymization and the validation workflow.

pub mod baseline;
pub mod cohort;
pub mod correlation;
pub mod error;
pub mod insights;
pub mod interrogative;
pub mod patterns;
pub mod queries;
pub mod source;
pub mod stats;
pub mod validation;

pub use error::AnalysisError;
