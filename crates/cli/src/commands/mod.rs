//! CLI command implementations.

pub mod jobs;
pub mod migrate;
