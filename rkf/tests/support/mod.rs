//! In-memory stand-ins for the storage and worker services.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use common::{
    AccountRecord, Assignable, Assigned, GrainCommand, GrainId, GrainRef, GrainState,
    GrainSupervisor, NewGrain, PackageInfo, RpcError, Setter, StateRef, StorageFactory,
    StorageRoot, UnpackStream, UnpackedPackage, VolumeRef, Worker,
};
use parking_lot::Mutex;
use rkf::{BackendSet, GrainOrchestrator, Registration};

#[derive(Default)]
pub struct MemoryFactory {
    next: AtomicU64,
    states: Mutex<HashMap<StateRef, GrainState>>,
}

impl MemoryFactory {
    fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageFactory for MemoryFactory {
    async fn new_volume(&self) -> Result<VolumeRef, RpcError> {
        Ok(VolumeRef(format!("volume-{}", self.next_id())))
    }

    async fn new_grain_state(&self, state: GrainState) -> Result<StateRef, RpcError> {
        let handle = StateRef(format!("state-{}", self.next_id()));
        self.states.lock().insert(handle.clone(), state);
        Ok(handle)
    }
}

/// Record cell behind one `user-<id>` object. Counts writes.
#[derive(Default)]
pub struct AccountSlot {
    record: Mutex<AccountRecord>,
    writes: AtomicUsize,
}

impl AccountSlot {
    pub fn record(&self) -> AccountRecord {
        self.record.lock().clone()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Setter<AccountRecord> for AccountSlot {
    async fn set(&self, value: AccountRecord) -> Result<(), RpcError> {
        *self.record.lock() = value;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct AccountHandle(Arc<AccountSlot>);

#[async_trait]
impl Assignable<AccountRecord> for AccountHandle {
    async fn get(&self) -> Result<Assigned<AccountRecord>, RpcError> {
        Ok(Assigned {
            value: self.0.record(),
            setter: self.0.clone(),
        })
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    factory: Arc<MemoryFactory>,
    volumes: Mutex<HashMap<String, VolumeRef>>,
    accounts: Mutex<HashMap<String, Arc<AccountSlot>>>,
}

impl MemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_volume(&self, name: &str, volume: &str) {
        self.volumes
            .lock()
            .insert(name.to_string(), VolumeRef(volume.to_string()));
    }

    pub fn volume(&self, name: &str) -> Option<VolumeRef> {
        self.volumes.lock().get(name).cloned()
    }

    /// Seed `user-<owner_id>` with grains whose state handles exist in the
    /// factory.
    pub fn seed_account(&self, owner_id: &str, grain_ids: &[&str]) -> Arc<AccountSlot> {
        let grains = grain_ids
            .iter()
            .map(|id| {
                let state = StateRef(format!("seeded-{id}"));
                self.factory.states.lock().insert(
                    state.clone(),
                    GrainState {
                        volume: VolumeRef(format!("seeded-volume-{id}")),
                    },
                );
                GrainRef {
                    id: GrainId::from(*id),
                    state,
                }
            })
            .collect();
        let slot = self.account(owner_id);
        *slot.record.lock() = AccountRecord { grains };
        slot
    }

    pub fn account(&self, owner_id: &str) -> Arc<AccountSlot> {
        self.accounts
            .lock()
            .entry(format!("user-{owner_id}"))
            .or_default()
            .clone()
    }

    pub fn account_exists(&self, owner_id: &str) -> bool {
        self.accounts
            .lock()
            .contains_key(&format!("user-{owner_id}"))
    }
}

#[async_trait]
impl StorageRoot for MemoryStorage {
    async fn get_factory(&self) -> Result<Arc<dyn StorageFactory>, RpcError> {
        Ok(self.factory.clone())
    }

    async fn get_volume(&self, name: &str) -> Result<VolumeRef, RpcError> {
        self.volume(name)
            .ok_or_else(|| RpcError::NoSuchObject(name.to_string()))
    }

    async fn set_volume(&self, name: &str, volume: VolumeRef) -> Result<(), RpcError> {
        self.volumes.lock().insert(name.to_string(), volume);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), RpcError> {
        let removed = self.volumes.lock().remove(name).is_some()
            || self.accounts.lock().remove(name).is_some();
        if removed {
            Ok(())
        } else {
            Err(RpcError::NoSuchObject(name.to_string()))
        }
    }

    async fn get_or_create_account(
        &self,
        name: &str,
        default: AccountRecord,
    ) -> Result<Arc<dyn Assignable<AccountRecord>>, RpcError> {
        let slot = self
            .accounts
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(AccountSlot {
                    record: Mutex::new(default),
                    writes: AtomicUsize::new(0),
                })
            })
            .clone();
        Ok(Arc::new(AccountHandle(slot)))
    }

    async fn grain_state(&self, handle: &StateRef) -> Result<GrainState, RpcError> {
        self.factory
            .states
            .lock()
            .get(handle)
            .cloned()
            .ok_or_else(|| RpcError::NoSuchObject(handle.0.clone()))
    }
}

/// Grain handle returned by [`FakeWorker`].
pub struct FakeGrain {
    pub worker: String,
    pub volume: VolumeRef,
}

#[async_trait]
impl GrainSupervisor for FakeGrain {
    async fn keep_alive(&self) -> Result<(), RpcError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), RpcError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCall {
    New {
        package: PackageInfo,
        command: GrainCommand,
    },
    Restore {
        package: PackageInfo,
        grain_state: StateRef,
        volume: VolumeRef,
    },
    Unpack,
}

pub struct FakeWorker {
    pub name: String,
    calls: Mutex<Vec<WorkerCall>>,
    failure: Mutex<Option<RpcError>>,
    pub upload: Arc<UploadLog>,
}

impl FakeWorker {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            upload: Arc::new(UploadLog::default()),
        })
    }

    pub fn calls(&self) -> Vec<WorkerCall> {
        self.calls.lock().clone()
    }

    /// Make every later call fail with `error`.
    pub fn fail_with(&self, error: RpcError) {
        *self.failure.lock() = Some(error);
    }

    fn record(&self, call: WorkerCall) -> Result<(), RpcError> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl Worker for FakeWorker {
    async fn new_grain(
        &self,
        package: PackageInfo,
        command: GrainCommand,
        storage: Arc<dyn StorageFactory>,
    ) -> Result<NewGrain, RpcError> {
        self.record(WorkerCall::New { package, command })?;
        let volume = storage.new_volume().await?;
        let grain_state = storage
            .new_grain_state(GrainState {
                volume: volume.clone(),
            })
            .await?;
        Ok(NewGrain {
            grain: Arc::new(FakeGrain {
                worker: self.name.clone(),
                volume,
            }),
            grain_state,
        })
    }

    async fn restore_grain(
        &self,
        package: PackageInfo,
        _command: GrainCommand,
        _storage: Arc<dyn StorageFactory>,
        grain_state: StateRef,
        volume: VolumeRef,
    ) -> Result<Arc<dyn GrainSupervisor>, RpcError> {
        self.record(WorkerCall::Restore {
            package,
            grain_state,
            volume: volume.clone(),
        })?;
        Ok(Arc::new(FakeGrain {
            worker: self.name.clone(),
            volume,
        }))
    }

    async fn unpack_package(
        &self,
        storage: Arc<dyn StorageFactory>,
    ) -> Result<Box<dyn UnpackStream>, RpcError> {
        self.record(WorkerCall::Unpack)?;
        let volume = storage.new_volume().await?;
        Ok(Box::new(FakeUnpack {
            log: self.upload.clone(),
            volume,
        }))
    }
}

/// What a worker's unpack stream received.
#[derive(Default)]
pub struct UploadLog {
    pub bytes: Mutex<Vec<u8>>,
    pub expected: Mutex<Option<u64>>,
    pub done: Mutex<bool>,
}

struct FakeUnpack {
    log: Arc<UploadLog>,
    volume: VolumeRef,
}

#[async_trait]
impl UnpackStream for FakeUnpack {
    async fn write(&self, data: Vec<u8>) -> Result<(), RpcError> {
        self.log.bytes.lock().extend(data);
        Ok(())
    }

    async fn expect_size(&self, size: u64) -> Result<(), RpcError> {
        *self.log.expected.lock() = Some(size);
        Ok(())
    }

    async fn done(&self) -> Result<(), RpcError> {
        *self.log.done.lock() = true;
        Ok(())
    }

    async fn get_result(&self) -> Result<UnpackedPackage, RpcError> {
        if !*self.log.done.lock() {
            return Err(RpcError::Failed("upload not finished".to_string()));
        }
        Ok(UnpackedPackage {
            volume: self.volume.clone(),
            app_id: "app-1".to_string(),
            manifest: self.log.bytes.lock().clone(),
        })
    }
}

/// An orchestrator over one storage root and one worker.
pub struct Cluster {
    pub storage: Arc<MemoryStorage>,
    pub worker: Arc<FakeWorker>,
    pub storage_roots: Arc<BackendSet<dyn StorageRoot>>,
    pub workers: Arc<BackendSet<dyn Worker>>,
    pub orchestrator: GrainOrchestrator,
    registrations: (Registration<dyn StorageRoot>, Registration<dyn Worker>),
}

impl Cluster {
    pub fn new() -> Self {
        let storage = MemoryStorage::new();
        let worker = FakeWorker::new("worker-0");
        let storage_roots = BackendSet::<dyn StorageRoot>::new("storage root");
        let workers = BackendSet::<dyn Worker>::new("worker");

        let root: Arc<dyn StorageRoot> = storage.clone();
        let w: Arc<dyn Worker> = worker.clone();
        let registrations = (storage_roots.register(root), workers.register(w));

        let orchestrator = GrainOrchestrator::new(storage_roots.clone(), workers.clone());
        Self {
            storage,
            worker,
            storage_roots,
            workers,
            orchestrator,
            registrations,
        }
    }
}

/// Grain ids of a record, sorted.
pub fn grain_ids(record: &AccountRecord) -> Vec<String> {
    let mut ids: Vec<String> = record.grains.iter().map(|g| g.id.to_string()).collect();
    ids.sort();
    ids
}
