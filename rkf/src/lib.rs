//! RKF: the cluster frontend. Routes the application front-end's grain and
//! package requests to storage and worker replicas, and keeps the front-end
//! process and its database node running.

pub mod account;
pub mod backend_set;
pub mod config;
pub mod error;
pub mod frontend;
pub mod mongo;
pub mod orchestrator;
pub mod package;

pub use backend_set::{BackendSet, NoBackendsAvailable, Registration};
pub use error::FrontendError;
pub use frontend::Frontend;
pub use mongo::MongoNode;
pub use orchestrator::{Backend, GrainOrchestrator, StartGrain};
