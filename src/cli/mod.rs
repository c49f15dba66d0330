//! CLI command handlers
//!
//! Bridges the clap argument parsing with [`crate::backup::BackupService`].

pub mod backup;

pub use backup::{handle_backup_command, BackupCommands, TerminalProgress};
