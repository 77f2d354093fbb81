// ─── Provisioning ───
// Locates raw distribution jars (local path, URL or Maven coordinate),
// fetches them through the configured mirrors and verifies their checksum
// before anything downstream sees a byte.

pub mod checksum;
pub mod location;
pub mod mirrors;

pub use checksum::{Checksum, HashAlgorithm};
pub use location::{InputLocation, RawInput};
pub use mirrors::MirrorConfig;

use tracing::info;

use crate::core::downloader::{read_verified, Downloader};
use crate::core::error::PipelineResult;

#[derive(Debug, Clone)]
pub struct Provisioner {
    downloader: Downloader,
    mirrors: MirrorConfig,
}

impl Provisioner {
    pub fn new(downloader: Downloader, mirrors: MirrorConfig) -> Self {
        Self {
            downloader,
            mirrors,
        }
    }

    /// URL a remote location is fetched from after mirror rewriting.
    pub fn resolve_url(&self, location: &InputLocation) -> Option<String> {
        match location {
            InputLocation::Path(_) => None,
            InputLocation::Url(url) => Some(self.mirrors.rewrite(url)),
            InputLocation::Maven(artifact) => Some(artifact.url(&self.mirrors.fabric_repository)),
        }
    }

    /// Bytes of a raw input, verified against its checksum.
    pub async fn provision(&self, input: &RawInput) -> PipelineResult<Vec<u8>> {
        let bytes = match &input.location {
            InputLocation::Path(path) => read_verified(path, Some(&input.checksum)).await?,
            remote => {
                let url = self.resolve_url(remote).unwrap_or_default();
                self.downloader.fetch(&url, Some(&input.checksum)).await?
            }
        };
        info!(
            "Provisioned {} input from {} ({} bytes, {})",
            input.side,
            input.location,
            bytes.len(),
            input.checksum
        );
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::downloader::write_file;
    use crate::core::error::PipelineError;

    #[tokio::test]
    async fn provisions_local_inputs_and_rejects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir.path().join("client.jar"), b"client").await.unwrap();
        let provisioner = Provisioner::new(Downloader::new().unwrap(), MirrorConfig::default());

        let input = RawInput {
            side: "client".into(),
            location: InputLocation::Path(path.clone()),
            checksum: Checksum::of(HashAlgorithm::Sha256, b"client"),
        };
        assert_eq!(provisioner.provision(&input).await.unwrap(), b"client");

        write_file(&path, b"tampered").await.unwrap();
        assert!(matches!(
            provisioner.provision(&input).await,
            Err(PipelineError::Integrity { .. })
        ));
    }

    #[test]
    fn maven_inputs_resolve_against_the_fabric_mirror() {
        let mirrors = MirrorConfig {
            fabric_repository: "https://mirror.example/fabric/".into(),
            ..MirrorConfig::default()
        };
        let provisioner = Provisioner::new(Downloader::new().unwrap(), mirrors);
        let location: InputLocation = "maven:net.fabricmc:intermediary:1.20.1:v2".parse().unwrap();
        assert_eq!(
            provisioner.resolve_url(&location).unwrap(),
            "https://mirror.example/fabric/net/fabricmc/intermediary/1.20.1/intermediary-1.20.1-v2.jar"
        );
    }
}
