use std::sync::Arc;

use async_trait::async_trait;
use common::{InstalledPackage, StorageRoot, UnpackStream, package_object_name};
use log::info;

use crate::error::Result;

/// Upload sink handed to a package installer.
#[async_trait]
pub trait PackageUploadStream: Send + Sync {
    async fn write(&self, data: Vec<u8>) -> Result<()>;

    async fn expect_size(&self, size: u64) -> Result<()>;

    async fn done(&self) -> Result<()>;

    /// Store the unpacked package as `package-<package_id>`.
    async fn save_as(&self, package_id: &str) -> Result<InstalledPackage>;
}

/// Forwards the upload to a worker's unpack stream and, once the worker has
/// unpacked it, records the resulting volume in a storage root.
pub struct PackageUpload {
    storage: Arc<dyn StorageRoot>,
    inner: Box<dyn UnpackStream>,
}

impl PackageUpload {
    pub fn new(storage: Arc<dyn StorageRoot>, inner: Box<dyn UnpackStream>) -> Self {
        Self { storage, inner }
    }
}

#[async_trait]
impl PackageUploadStream for PackageUpload {
    async fn write(&self, data: Vec<u8>) -> Result<()> {
        Ok(self.inner.write(data).await?)
    }

    async fn expect_size(&self, size: u64) -> Result<()> {
        Ok(self.inner.expect_size(size).await?)
    }

    async fn done(&self) -> Result<()> {
        Ok(self.inner.done().await?)
    }

    async fn save_as(&self, package_id: &str) -> Result<InstalledPackage> {
        let unpacked = self.inner.get_result().await?;
        self.storage
            .set_volume(&package_object_name(package_id), unpacked.volume)
            .await?;
        info!("installed package {package_id} (app {})", unpacked.app_id);
        Ok(InstalledPackage {
            app_id: unpacked.app_id,
            manifest: unpacked.manifest,
        })
    }
}
