//! Database row structs and their conversion to domain types.

pub mod analysis;

pub use analysis::AnalysisRow;
