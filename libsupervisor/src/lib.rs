//! Process supervision for the rkf control plane: restart loops with a
//! minimum relaunch interval, the table of supervised pids, background task
//! groups, the service sandbox and a write-once broadcast cell.

pub mod broadcast;
pub mod process;
pub mod sandbox;
pub mod supervisor;
pub mod task_set;

pub use broadcast::Broadcast;
pub use process::{ProcessSlot, ProcessTable, become_subreaper};
pub use sandbox::{BundleLayout, Identity, Sandbox};
pub use supervisor::{Supervised, Supervisor};
pub use task_set::{ErrorHandler, LogErrors, TaskSet};
