//! Storage helpers for Keepsake
//!
//! Atomic JSON persistence and idempotent removal used by the catalog,
//! settings and the remote directory store.

pub mod file_io;

pub use file_io::{read_json, remove_dir_if_exists, remove_file_if_exists, write_json_atomic};
