//! Keepsake - encrypted snapshot backup and restore
//!
//! This library snapshots an application's live data directory (and
//! optionally its media directory) into a compressed, encrypted archive,
//! optionally uploads it to a remote blob store, keeps a catalog of
//! completed backups, and restores a chosen backup atomically.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `archive`: Collecting files, zip packaging with a manifest, validated extraction
//! - `crypto`: Key derivation and the chunked authenticated archive format
//! - `remote`: Remote blob store trait with directory and in-memory stores
//! - `backup`: Catalog, operation guard and the create/restore orchestrators
//! - `progress`: Stage/percent reporting and cancellation
//! - `audit`: Audit logging system
//! - `config`: Configuration and path management
//! - `storage`: Atomic JSON file helpers
//! - `error`: Plumbing error types
//!
//! # Example
//!
//! ```rust,ignore
//! use keepsake::backup::BackupService;
//! use keepsake::config::KeepsakePaths;
//!
//! let service = BackupService::open(KeepsakePaths::new()?)?;
//! let record = service.create_backup(false, false, &mut |_: &ProgressState| {})?;
//! ```

pub mod archive;
pub mod audit;
pub mod backup;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod models;
pub mod progress;
pub mod remote;
pub mod storage;

pub use backup::{BackupError, BackupService, RestoreError};
pub use error::KeepsakeError;
pub use models::{BackupId, BackupRecord};
