//! Core data models for Keepsake
//!
//! Identifiers and catalog records shared by the pipeline, the catalog and
//! the CLI.

pub mod ids;
pub mod record;

pub use ids::BackupId;
pub use record::BackupRecord;
