use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::key::{sha256_hex, ArtifactKey, StageConfig};
use crate::core::downloader::write_file;
use crate::core::error::{PipelineError, PipelineResult};

const OBJECTS_DIR: &str = "objects";
const TMP_DIR: &str = "tmp";

/// Metadata persisted next to every payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub size: u64,
    /// Name of the stage that produced the payload.
    pub stage: String,
    /// Configuration the producing stage ran with.
    pub config: StageConfig,
    /// SHA-256 over the payload and the side table.
    pub content_sha256: String,
    /// Optional side table (merge provenance, decompile failures, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_table: Option<serde_json::Value>,
}

/// An immutable stored artifact. Payloads are shared, never copied between
/// stages.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub key: ArtifactKey,
    pub payload: Arc<[u8]>,
    pub meta: ArtifactMeta,
}

impl Artifact {
    /// Deserialize the side table into a typed record.
    pub fn side_table<T: serde::de::DeserializeOwned>(&self) -> PipelineResult<Option<T>> {
        match &self.meta.side_table {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// An identical artifact was already present; nothing was written.
    AlreadyExists,
}

/// Filesystem content-addressed store.
///
/// Layout:
///   <root>/objects/<shard>/<key>.bin   payload
///   <root>/objects/<shard>/<key>.json  metadata, written last
///   <root>/tmp/                        staging area for atomic renames
///
/// An entry exists once its metadata file exists. Both files are moved into
/// place with `rename`, so readers never observe partial writes and the
/// store can be shared between concurrent pipeline invocations.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub async fn open(root: impl Into<PathBuf>) -> PipelineResult<Self> {
        let root = root.into();
        for dir in [root.join(OBJECTS_DIR), root.join(TMP_DIR)] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| PipelineError::io(&dir, e))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn payload_path(&self, key: &ArtifactKey) -> PathBuf {
        self.root
            .join(OBJECTS_DIR)
            .join(key.shard())
            .join(format!("{}.bin", key.as_str()))
    }

    fn meta_path(&self, key: &ArtifactKey) -> PathBuf {
        self.root
            .join(OBJECTS_DIR)
            .join(key.shard())
            .join(format!("{}.json", key.as_str()))
    }

    pub async fn contains(&self, key: &ArtifactKey) -> bool {
        tokio::fs::try_exists(self.meta_path(key))
            .await
            .unwrap_or(false)
    }

    /// Read only the metadata of an entry. The payload is verified when it
    /// is actually loaded with `get`.
    pub async fn meta(&self, key: &ArtifactKey) -> PipelineResult<Option<ArtifactMeta>> {
        let meta_path = self.meta_path(key);
        match tokio::fs::read(&meta_path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PipelineError::io(&meta_path, e)),
        }
    }

    /// Fetch an artifact. A stored payload whose digest no longer matches its
    /// metadata is an integrity error, never a miss.
    pub async fn get(&self, key: &ArtifactKey) -> PipelineResult<Option<Artifact>> {
        let Some(meta) = self.meta(key).await? else {
            return Ok(None);
        };

        let payload_path = self.payload_path(key);
        let payload = tokio::fs::read(&payload_path)
            .await
            .map_err(|e| PipelineError::io(&payload_path, e))?;

        let actual = content_digest(&payload, meta.side_table.as_ref())?;
        if actual != meta.content_sha256 {
            return Err(PipelineError::Integrity {
                subject: format!("cached artifact {}", key),
                expected: meta.content_sha256,
                actual,
            });
        }

        debug!("cache hit {} ({})", key.short(), meta.stage);
        Ok(Some(Artifact {
            key: key.clone(),
            payload: payload.into(),
            meta,
        }))
    }

    /// Store an artifact under `key`.
    ///
    /// Putting identical content twice is a no-op. Putting different content
    /// under an existing key means some stage is not deterministic and fails
    /// with an integrity error.
    pub async fn put(
        &self,
        key: &ArtifactKey,
        stage: &str,
        config: &StageConfig,
        payload: Vec<u8>,
        side_table: Option<serde_json::Value>,
    ) -> PipelineResult<(Artifact, PutOutcome)> {
        let meta = ArtifactMeta {
            size: payload.len() as u64,
            stage: stage.to_string(),
            config: config.clone(),
            content_sha256: content_digest(&payload, side_table.as_ref())?,
            side_table,
        };

        if let Some(existing) = self.get(key).await? {
            self.ensure_same(key, &existing.meta, &meta)?;
            return Ok((existing, PutOutcome::AlreadyExists));
        }

        let shard_dir = self.root.join(OBJECTS_DIR).join(key.shard());
        tokio::fs::create_dir_all(&shard_dir)
            .await
            .map_err(|e| PipelineError::io(&shard_dir, e))?;

        self.write_atomic(&self.payload_path(key), &payload).await?;
        let meta_bytes = serde_json::to_vec_pretty(&meta)?;
        self.write_atomic(&self.meta_path(key), &meta_bytes).await?;

        // A concurrent writer may have renamed over us; whatever won must
        // carry the same content.
        match self.get(key).await? {
            Some(stored) => self.ensure_same(key, &stored.meta, &meta)?,
            None => {
                return Err(PipelineError::Integrity {
                    subject: format!("cached artifact {}", key),
                    expected: meta.content_sha256,
                    actual: "<missing after write>".into(),
                })
            }
        }

        debug!("cache store {} ({}, {} bytes)", key.short(), stage, meta.size);
        Ok((
            Artifact {
                key: key.clone(),
                payload: payload.into(),
                meta,
            },
            PutOutcome::Stored,
        ))
    }

    fn ensure_same(
        &self,
        key: &ArtifactKey,
        stored: &ArtifactMeta,
        incoming: &ArtifactMeta,
    ) -> PipelineResult<()> {
        if stored.content_sha256 != incoming.content_sha256 {
            warn!(
                "non-deterministic output for {} from stage {}",
                key.short(),
                incoming.stage
            );
            return Err(PipelineError::Integrity {
                subject: format!("artifact {} from stage {}", key, incoming.stage),
                expected: stored.content_sha256.clone(),
                actual: incoming.content_sha256.clone(),
            });
        }
        Ok(())
    }

    async fn write_atomic(&self, dest: &Path, bytes: &[u8]) -> PipelineResult<()> {
        let tmp = self
            .root
            .join(TMP_DIR)
            .join(format!("{}.tmp", uuid::Uuid::new_v4()));

        {
            let mut file = tokio::fs::File::create(&tmp)
                .await
                .map_err(|e| PipelineError::io(&tmp, e))?;
            file.write_all(bytes)
                .await
                .map_err(|e| PipelineError::io(&tmp, e))?;
            file.sync_all()
                .await
                .map_err(|e| PipelineError::io(&tmp, e))?;
        }

        tokio::fs::rename(&tmp, dest).await.map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            PipelineError::io(dest, e)
        })
    }

    /// Copy a stored payload to a host-visible location. The payload is
    /// verified on the way out; a corrupted entry is never exported.
    pub async fn export(&self, key: &ArtifactKey, dest: &Path) -> PipelineResult<()> {
        let artifact = self.get(key).await?.ok_or_else(|| PipelineError::Integrity {
            subject: format!("cached artifact {}", key),
            expected: "a stored entry".to_string(),
            actual: "nothing".to_string(),
        })?;
        write_file(dest, &artifact.payload).await?;
        Ok(())
    }
}

fn content_digest(payload: &[u8], side_table: Option<&serde_json::Value>) -> PipelineResult<String> {
    let mut buf = Vec::with_capacity(payload.len() + 64);
    buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    buf.extend_from_slice(payload);
    if let Some(table) = side_table {
        buf.extend_from_slice(&serde_json::to_vec(table)?);
    }
    Ok(sha256_hex(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ArtifactKey {
        ArtifactKey::derive(name, &[], &StageConfig::new())
    }

    #[tokio::test]
    async fn put_then_get_returns_identical_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        let k = key("merge");

        assert!(store.get(&k).await.unwrap().is_none());
        let (stored, outcome) = store
            .put(&k, "merge", &StageConfig::new(), b"jar-bytes".to_vec(), None)
            .await
            .unwrap();
        assert_eq!(outcome, PutOutcome::Stored);

        let loaded = store.get(&k).await.unwrap().unwrap();
        assert_eq!(&*loaded.payload, b"jar-bytes");
        assert_eq!(loaded.meta, stored.meta);
        assert!(store.contains(&k).await);
    }

    #[tokio::test]
    async fn identical_put_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        let k = key("remap");
        let side = Some(serde_json::json!({"a": 1}));

        store
            .put(&k, "remap", &StageConfig::new(), vec![1, 2, 3], side.clone())
            .await
            .unwrap();
        let (_, outcome) = store
            .put(&k, "remap", &StageConfig::new(), vec![1, 2, 3], side)
            .await
            .unwrap();
        assert_eq!(outcome, PutOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn conflicting_put_is_an_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        let k = key("remap");

        store
            .put(&k, "remap", &StageConfig::new(), vec![1, 2, 3], None)
            .await
            .unwrap();
        let err = store
            .put(&k, "remap", &StageConfig::new(), vec![9, 9], None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Integrity { .. }));
    }

    #[tokio::test]
    async fn concurrent_identical_puts_agree() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        let k = key("decompile");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                store
                    .put(&k, "decompile", &StageConfig::new(), vec![7; 4096], None)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let loaded = store.get(&k).await.unwrap().unwrap();
        assert_eq!(loaded.payload.len(), 4096);
    }

    #[tokio::test]
    async fn corrupted_payload_is_detected_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        let k = key("merge");
        store
            .put(&k, "merge", &StageConfig::new(), b"good".to_vec(), None)
            .await
            .unwrap();

        tokio::fs::write(store.payload_path(&k), b"evil").await.unwrap();
        let err = store.get(&k).await.unwrap_err();
        assert!(matches!(err, PipelineError::Integrity { .. }));
    }

    #[tokio::test]
    async fn corrupted_payload_is_never_exported() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path().join("cache")).await.unwrap();
        let k = key("remap");
        store
            .put(&k, "remap", &StageConfig::new(), b"good".to_vec(), None)
            .await
            .unwrap();

        let dest = dir.path().join("out/remapped.jar");
        store.export(&k, &dest).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"good");

        tokio::fs::write(store.payload_path(&k), b"evil").await.unwrap();
        let other = dir.path().join("out/again.jar");
        let err = store.export(&k, &other).await.unwrap_err();
        assert!(matches!(err, PipelineError::Integrity { .. }));
        assert!(!other.exists());

        let missing = store.export(&key("nothing"), &other).await.unwrap_err();
        assert!(matches!(missing, PipelineError::Integrity { .. }));
    }
}
