//! Archive packager
//!
//! Turns the live `data/` (and optionally `media/`) trees into one
//! deterministic zip blob with an embedded manifest, and back.

use std::ops::ControlFlow;

pub mod extract;
pub mod manifest;
pub mod packager;

pub use extract::extract;
pub use manifest::{Manifest, ManifestEntry, MANIFEST_FORMAT_VERSION, MANIFEST_NAME};
pub use packager::{collect, compress, Collection};

/// Progress callback for archive work: `(done, total, current_item)`.
/// Returning `Break` stops at the next file or chunk boundary.
pub type ArchiveProgress<'a> = &'a mut dyn FnMut(u64, u64, Option<&str>) -> ControlFlow<()>;
