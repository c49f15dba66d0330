//! Configuration module for Keepsake
//!
//! This module provides configuration management including:
//! - XDG-compliant path resolution
//! - Settings persistence (key derivation parameters, backup behavior)

pub mod paths;
pub mod settings;

pub use paths::KeepsakePaths;
pub use settings::{BackupSettings, RemoteSettings, Settings};
