// ─── Jars ───
// In-memory jar archives with deterministic output, and the client/server
// merge that produces one class set plus a provenance side table.

pub mod archive;
pub mod merge;

pub use archive::Jar;
pub use merge::{merge_jars, ClassProvenance, MergedJar, ProvenanceTable, Side};
