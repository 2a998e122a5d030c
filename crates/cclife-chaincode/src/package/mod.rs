//! Sources of installed chaincode packages.
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cclife_model::DeploymentSpec;
use tokio::fs;
use tracing::debug;

use crate::error::PackageError;

#[async_trait]
pub trait PackageProvider: Send + Sync {
    /// Deployment spec, code package included, of an installed chaincode.
    async fn get_chaincode(&self, name: &str, version: &str) -> Result<DeploymentSpec, PackageError>;
}

/// Reads installed packages from `<root>/<name>.<version>`, each a JSON [`DeploymentSpec`].
#[derive(Debug, Clone)]
pub struct FsPackageProvider {
    root: PathBuf,
}

impl FsPackageProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(format!("{name}.{version}"))
    }

    /// Write `cds` where [`FsPackageProvider::get_chaincode`] will find it.
    pub async fn install(&self, cds: &DeploymentSpec) -> Result<PathBuf, PackageError> {
        let id = &cds.chaincode_spec.chaincode_id;
        let path = self.path(&id.name, &id.version);
        let bytes = serde_json::to_vec(cds).map_err(|e| PackageError::Decode {
            name: id.name.clone(),
            reason: e.to_string(),
        })?;
        fs::create_dir_all(&self.root).await?;
        fs::write(&path, bytes).await?;
        debug!(path = %path.display(), "chaincode package installed");
        Ok(path)
    }
}

#[async_trait]
impl PackageProvider for FsPackageProvider {
    async fn get_chaincode(&self, name: &str, version: &str) -> Result<DeploymentSpec, PackageError> {
        let path = self.path(name, version);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PackageError::NotFound(format!("{name}:{version}")));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| PackageError::Decode {
            name: format!("{name}:{version}"),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cclife_model::{ChaincodeId, ChaincodeSpec};

    fn provider() -> FsPackageProvider {
        FsPackageProvider::new(
            std::env::temp_dir().join(format!("cclife-packages-{}", uuid::Uuid::new_v4())),
        )
    }

    #[tokio::test]
    async fn installed_package_is_found() {
        let p = provider();
        let cds = DeploymentSpec {
            chaincode_spec: ChaincodeSpec {
                chaincode_id: ChaincodeId::new("mycc", "1.0"),
                ..Default::default()
            },
            code_package: b"code".to_vec(),
            ..Default::default()
        };
        let path = p.install(&cds).await.unwrap();
        assert!(path.ends_with("mycc.1.0"));

        assert_eq!(p.get_chaincode("mycc", "1.0").await.unwrap(), cds);
        let _ = fs::remove_dir_all(p.root()).await;
    }

    #[tokio::test]
    async fn missing_package_is_not_found() {
        let err = provider().get_chaincode("ghost", "1.0").await.unwrap_err();
        assert_eq!(err, PackageError::NotFound("ghost:1.0".into()));
    }

    #[tokio::test]
    async fn corrupt_package_is_a_decode_error() {
        let p = provider();
        fs::create_dir_all(p.root()).await.unwrap();
        fs::write(p.path("bad", "1.0"), b"{").await.unwrap();

        let err = p.get_chaincode("bad", "1.0").await.unwrap_err();
        assert!(matches!(err, PackageError::Decode { .. }));
        let _ = fs::remove_dir_all(p.root()).await;
    }
}
