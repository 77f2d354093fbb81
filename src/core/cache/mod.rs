// ─── Artifact Cache ───
// Content-addressed store for stage outputs, keyed by derivation hash.

pub mod key;
pub mod store;

pub use key::{sha256_hex, ArtifactKey, StageConfig};
pub use store::{Artifact, ArtifactMeta, CacheStore, PutOutcome};
