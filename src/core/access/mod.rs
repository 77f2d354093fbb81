// ─── Access Patches ───
// Access widener files and their application to a remapped class set.

pub mod apply;
pub mod format;

pub use apply::{apply_patches, PatchSummary};
pub use format::{parse_access_widener, AccessChange, PatchRecord, PatchSet, PatchTarget};
