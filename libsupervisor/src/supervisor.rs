use std::time::Duration;

use async_trait::async_trait;
use log::{error, info};
use tokio::time::{Instant, sleep_until};

use crate::process::{ProcessSlot, ProcessTable};

/// A service that should run forever.
#[async_trait]
pub trait Supervised: Send + Sync {
    /// Launch the service and return once it has terminated.
    ///
    /// `Ok` means the service exited cleanly, which the supervisor still
    /// treats as a failure: the service is not supposed to stop.
    async fn run_once(&self, slot: &ProcessSlot) -> anyhow::Result<()>;
}

/// Restart loop for one supervised role.
///
/// Consecutive attempts start at least `min_interval` apart. The interval is
/// measured from the start of one attempt to the start of the next, so a
/// process that ran longer than the interval is relaunched right away.
pub struct Supervisor {
    slot: ProcessSlot,
    min_interval: Duration,
}

impl Supervisor {
    pub fn new(table: &ProcessTable, key: &str, min_interval: Duration) -> Self {
        Self {
            slot: table.slot(key),
            min_interval,
        }
    }

    pub fn key(&self) -> &str {
        self.slot.key()
    }

    /// Run `job` forever. Never returns; drop the future to stop supervising.
    pub async fn run(&self, job: &dyn Supervised) {
        info!("supervising {}", self.key());
        loop {
            let rate_limit = Instant::now() + self.min_interval;

            match job.run_once(&self.slot).await {
                Ok(()) => error!(
                    "{} exited 'successfully' (shouldn't happen); restarting",
                    self.key()
                ),
                Err(e) => error!("{} died; restarting: {e:?}", self.key()),
            }

            self.slot.clear();
            sleep_until(rate_limit).await;
        }
    }
}
