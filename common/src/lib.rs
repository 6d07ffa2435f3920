pub mod capability;
pub mod error;
pub mod model;

pub use capability::{
    Assignable, Assigned, Database, GrainSupervisor, NewGrain, Setter, StorageFactory,
    StorageRoot, UnpackStream, Worker,
};
pub use error::RpcError;
pub use model::{
    AccountRecord, Credential, EnvVar, GrainCommand, GrainId, GrainRef, GrainState,
    InstalledPackage, PackageInfo, StateRef, UnpackedPackage, VolumeRef, account_object_name,
    package_object_name,
};
