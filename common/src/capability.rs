//! Capabilities the frontend consumes from other cluster services.
//!
//! Every trait here is addressed through an RPC transport that is not part of
//! this workspace; implementations may fail at any call with [`RpcError`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RpcError;
use crate::model::{
    AccountRecord, Credential, GrainCommand, GrainState, PackageInfo, StateRef, UnpackedPackage,
    VolumeRef,
};

/// Current value of an assignable object plus a setter that replaces it
/// without any precondition.
pub struct Assigned<T> {
    pub value: T,
    pub setter: Arc<dyn Setter<T>>,
}

#[async_trait]
pub trait Assignable<T>: Send + Sync {
    async fn get(&self) -> Result<Assigned<T>, RpcError>;
}

#[async_trait]
pub trait Setter<T>: Send + Sync {
    async fn set(&self, value: T) -> Result<(), RpcError>;
}

/// Creates new storage objects. Handed through to workers untouched.
#[async_trait]
pub trait StorageFactory: Send + Sync {
    async fn new_volume(&self) -> Result<VolumeRef, RpcError>;

    async fn new_grain_state(&self, state: GrainState) -> Result<StateRef, RpcError>;
}

/// Named-object root of the storage service.
#[async_trait]
pub trait StorageRoot: Send + Sync {
    async fn get_factory(&self) -> Result<Arc<dyn StorageFactory>, RpcError>;

    async fn get_volume(&self, name: &str) -> Result<VolumeRef, RpcError>;

    async fn set_volume(&self, name: &str, volume: VolumeRef) -> Result<(), RpcError>;

    async fn remove(&self, name: &str) -> Result<(), RpcError>;

    async fn get_or_create_account(
        &self,
        name: &str,
        default: AccountRecord,
    ) -> Result<Arc<dyn Assignable<AccountRecord>>, RpcError>;

    /// Dereference a grain state handle.
    async fn grain_state(&self, handle: &StateRef) -> Result<GrainState, RpcError>;
}

/// Handle to a grain process running on some worker.
#[async_trait]
pub trait GrainSupervisor: Send + Sync {
    async fn keep_alive(&self) -> Result<(), RpcError>;

    async fn shutdown(&self) -> Result<(), RpcError>;
}

pub struct NewGrain {
    pub grain: Arc<dyn GrainSupervisor>,
    pub grain_state: StateRef,
}

/// Worker-side sink for an uploaded package archive.
#[async_trait]
pub trait UnpackStream: Send + Sync {
    async fn write(&self, data: Vec<u8>) -> Result<(), RpcError>;

    async fn expect_size(&self, size: u64) -> Result<(), RpcError>;

    async fn done(&self) -> Result<(), RpcError>;

    async fn get_result(&self) -> Result<UnpackedPackage, RpcError>;
}

#[async_trait]
pub trait Worker: Send + Sync {
    async fn new_grain(
        &self,
        package: PackageInfo,
        command: GrainCommand,
        storage: Arc<dyn StorageFactory>,
    ) -> Result<NewGrain, RpcError>;

    async fn restore_grain(
        &self,
        package: PackageInfo,
        command: GrainCommand,
        storage: Arc<dyn StorageFactory>,
        grain_state: StateRef,
        volume: VolumeRef,
    ) -> Result<Arc<dyn GrainSupervisor>, RpcError>;

    async fn unpack_package(
        &self,
        storage: Arc<dyn StorageFactory>,
    ) -> Result<Box<dyn UnpackStream>, RpcError>;
}

#[async_trait]
pub trait Database: Send + Sync {
    /// Resolves once the database node has been bootstrapped.
    async fn get_connection_info(&self) -> Result<Credential, RpcError>;
}
