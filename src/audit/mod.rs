//! Backup lifecycle history
//!
//! Every completed create, restore and delete, and every failed operation,
//! is appended to `audit.log` as one JSON line. Entries carry record
//! metadata only, never key material or file contents.
//!
//! - `AuditEntry`: one event with its timestamp, backup id and details
//! - `AuditLogger`: appends entries to the JSONL file and reads them back

mod entry;
mod logger;

pub use entry::{AuditEntry, AuditEvent};
pub use logger::AuditLogger;
