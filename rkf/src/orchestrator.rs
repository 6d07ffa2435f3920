use std::sync::Arc;

use async_trait::async_trait;
use common::{
    GrainCommand, GrainId, GrainRef, GrainSupervisor, InstalledPackage, NewGrain, PackageInfo,
    StorageRoot, Worker, package_object_name,
};
use log::{info, warn};

use crate::account::AccountSnapshot;
use crate::backend_set::BackendSet;
use crate::error::{FrontendError, Result};
use crate::package::{PackageUpload, PackageUploadStream};

#[derive(Debug, Clone)]
pub struct StartGrain {
    pub owner_id: String,
    pub grain_id: GrainId,
    pub package_id: String,
    pub command: GrainCommand,
    pub is_new: bool,
}

/// Requests the application front-end makes of the cluster.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn start_grain(&self, request: StartGrain) -> Result<Arc<dyn GrainSupervisor>>;

    async fn get_grain(
        &self,
        owner_id: &str,
        grain_id: &GrainId,
    ) -> Result<Arc<dyn GrainSupervisor>>;

    async fn delete_grain(&self, owner_id: &str, grain_id: &GrainId) -> Result<()>;

    async fn install_package(&self) -> Result<Box<dyn PackageUploadStream>>;

    async fn get_package(&self, package_id: &str) -> Result<InstalledPackage>;

    async fn delete_package(&self, package_id: &str) -> Result<()>;
}

/// Serves [`Backend`] requests by picking storage and worker replicas and
/// keeping account records up to date.
///
/// Every request picks its backends afresh and nothing is retried here; a
/// failed backend call fails the request.
#[derive(Clone)]
pub struct GrainOrchestrator {
    storage_roots: Arc<BackendSet<dyn StorageRoot>>,
    workers: Arc<BackendSet<dyn Worker>>,
}

impl GrainOrchestrator {
    pub fn new(
        storage_roots: Arc<BackendSet<dyn StorageRoot>>,
        workers: Arc<BackendSet<dyn Worker>>,
    ) -> Self {
        Self {
            storage_roots,
            workers,
        }
    }
}

#[async_trait]
impl Backend for GrainOrchestrator {
    async fn start_grain(&self, request: StartGrain) -> Result<Arc<dyn GrainSupervisor>> {
        let StartGrain {
            owner_id,
            grain_id,
            package_id,
            command,
            is_new,
        } = request;

        let storage = self.storage_roots.choose_one()?;
        let factory = storage.get_factory().await?;

        // TODO: hand the worker a read-only view of the package volume
        let package = PackageInfo {
            id: package_id.as_bytes().to_vec(),
            volume: storage
                .get_volume(&package_object_name(&package_id))
                .await?,
        };

        let account = AccountSnapshot::open(storage.as_ref(), &owner_id).await?;

        if is_new {
            if account.find(&grain_id).is_some() {
                return Err(FrontendError::AlreadyExists(grain_id));
            }

            let worker = self.workers.choose_one()?;
            let NewGrain { grain, grain_state } =
                worker.new_grain(package, command, factory).await?;

            let grain_ref = GrainRef {
                id: grain_id.clone(),
                state: grain_state,
            };
            if let Err(e) = account.append(grain_ref).await {
                warn!("grain {grain_id} started but not recorded for owner {owner_id}: {e}");
                return Err(e.into());
            }
            info!("started new grain {grain_id} for owner {owner_id}");
            Ok(grain)
        } else {
            let grain_state = account
                .find(&grain_id)
                .map(|g| g.state.clone())
                .ok_or_else(|| FrontendError::NotFound(grain_id.clone()))?;
            let volume = storage.grain_state(&grain_state).await?.volume;

            let worker = self.workers.choose_one()?;
            let grain = worker
                .restore_grain(package, command, factory, grain_state, volume)
                .await?;
            info!("restored grain {grain_id} for owner {owner_id}");
            Ok(grain)
        }
    }

    async fn get_grain(
        &self,
        _owner_id: &str,
        _grain_id: &GrainId,
    ) -> Result<Arc<dyn GrainSupervisor>> {
        // callers fall back to start_grain on disconnect
        Err(FrontendError::Disconnected("get_grain() not implemented"))
    }

    async fn delete_grain(&self, owner_id: &str, grain_id: &GrainId) -> Result<()> {
        let storage = self.storage_roots.choose_one()?;
        let account = AccountSnapshot::open(storage.as_ref(), owner_id).await?;
        if account.remove(grain_id).await? {
            info!("deleted grain {grain_id} of owner {owner_id}");
        }
        Ok(())
    }

    async fn install_package(&self) -> Result<Box<dyn PackageUploadStream>> {
        let worker = self.workers.choose_one()?;
        let storage = self.storage_roots.choose_one()?;
        let factory = storage.get_factory().await?;
        let stream = worker.unpack_package(factory).await?;
        Ok(Box::new(PackageUpload::new(storage, stream)))
    }

    async fn get_package(&self, _package_id: &str) -> Result<InstalledPackage> {
        Err(FrontendError::Unimplemented("get_package()"))
    }

    async fn delete_package(&self, package_id: &str) -> Result<()> {
        let storage = self.storage_roots.choose_one()?;
        storage.remove(&package_object_name(package_id)).await?;
        info!("deleted package {package_id}");
        Ok(())
    }
}
