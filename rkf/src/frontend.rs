use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use common::{Credential, Database, StorageFactory, StorageRoot, Worker};
use libsupervisor::{ProcessSlot, ProcessTable, Sandbox, Supervised, Supervisor, TaskSet};
use log::{debug, info};
use nix::sys::signal::Signal;
use parking_lot::RwLock;
use serde_json::{Value, json};

use crate::backend_set::BackendSet;
use crate::config::FrontendConfig;
use crate::orchestrator::GrainOrchestrator;

pub const FRONTEND_KEY: &str = "frontend";
pub const FRONTEND_PORT: u16 = 6080;

/// Control plane entry point for the application front-end.
///
/// Owns the replica sets of every backend role, runs the front-end process
/// once a database is available and restarts it when its config changes.
pub struct Frontend {
    storage_roots: Arc<BackendSet<dyn StorageRoot>>,
    storage_factories: Arc<BackendSet<dyn StorageFactory>>,
    workers: Arc<BackendSet<dyn Worker>>,
    mongos: Arc<BackendSet<dyn Database>>,
    config: Arc<RwLock<Arc<FrontendConfig>>>,
    sandbox: Sandbox,
    processes: ProcessTable,
    restart_interval: Duration,
    tasks: TaskSet,
}

impl Frontend {
    pub fn new(
        config: FrontendConfig,
        sandbox: Sandbox,
        processes: ProcessTable,
        restart_interval: Duration,
    ) -> Self {
        Self {
            storage_roots: BackendSet::new("storage root"),
            storage_factories: BackendSet::new("storage factory"),
            workers: BackendSet::new("worker"),
            mongos: BackendSet::new("mongo"),
            config: Arc::new(RwLock::new(Arc::new(config))),
            sandbox,
            processes,
            restart_interval,
            tasks: TaskSet::default(),
        }
    }

    pub fn storage_roots(&self) -> &Arc<BackendSet<dyn StorageRoot>> {
        &self.storage_roots
    }

    pub fn storage_factories(&self) -> &Arc<BackendSet<dyn StorageFactory>> {
        &self.storage_factories
    }

    pub fn workers(&self) -> &Arc<BackendSet<dyn Worker>> {
        &self.workers
    }

    pub fn mongos(&self) -> &Arc<BackendSet<dyn Database>> {
        &self.mongos
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn config(&self) -> Arc<FrontendConfig> {
        self.config.read().clone()
    }

    /// Request handler the front-end talks to.
    pub fn backend(&self) -> GrainOrchestrator {
        GrainOrchestrator::new(self.storage_roots.clone(), self.workers.clone())
    }

    /// Replace the front-end config. A running front-end is sent SIGTERM so
    /// its supervisor relaunches it with the new settings.
    pub fn set_config(&self, config: FrontendConfig) -> Result<()> {
        *self.config.write() = Arc::new(config);
        if self.processes.signal(FRONTEND_KEY, Signal::SIGTERM)? {
            info!("restarting front-end due to config change");
        }
        Ok(())
    }

    /// Wait for the database credential in the background, then keep the
    /// front-end process running.
    ///
    /// Fails straight away if no database node is registered.
    pub fn start(&self) -> Result<()> {
        let mongo = self.mongos.choose_one()?;
        let sandbox = self.sandbox.clone();
        let config = self.config.clone();
        let supervisor = Supervisor::new(&self.processes, FRONTEND_KEY, self.restart_interval);

        self.tasks.spawn(async move {
            let credential = mongo
                .get_connection_info()
                .await
                .context("failed to get database connection info")?;
            debug!("front-end got database at {}", credential.address);
            let process = FrontendProcess {
                sandbox,
                config,
                credential,
            };
            supervisor.run(&process).await;
            Ok(())
        });
        Ok(())
    }
}

struct FrontendProcess {
    sandbox: Sandbox,
    config: Arc<RwLock<Arc<FrontendConfig>>>,
    credential: Credential,
}

#[async_trait]
impl Supervised for FrontendProcess {
    async fn run_once(&self, slot: &ProcessSlot) -> Result<()> {
        self.sandbox.prepare_directories()?;

        // read at every launch so a restart picks up a replaced config
        let config = self.config.read().clone();
        let build = build_setting(&config, &self.sandbox.layout().bundle_dir)?;

        let mut node = self.sandbox.command("bin/node")?;
        node.arg("main.js")
            .envs(frontend_environment(&config, &self.credential, build));
        slot.run(&mut node).await
    }
}

/// The `build` value of the public settings: the configured build number,
/// or `"[<buildstamp>]"` for development bundles (build 0).
pub fn build_setting(config: &FrontendConfig, bundle_dir: &Path) -> Result<Value> {
    if config.build != 0 {
        return Ok(Value::from(config.build));
    }
    let path = bundle_dir.join("buildstamp");
    let stamp = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Value::String(format!("[{}]", stamp.trim())))
}

/// Environment of the front-end process.
pub fn frontend_environment(
    config: &FrontendConfig,
    credential: &Credential,
    build: Value,
) -> Vec<(String, String)> {
    let mut env = vec![
        ("ROOT_URL".to_string(), config.base_url.clone()),
        ("PORT".to_string(), FRONTEND_PORT.to_string()),
        ("MONGO_URL".to_string(), credential.url("meteor", "admin")),
        ("MONGO_OPLOG_URL".to_string(), credential.url("local", "admin")),
        ("BIND_IP".to_string(), "0.0.0.0".to_string()),
    ];
    if let Some(mail_url) = &config.mail_url {
        env.push(("MAIL_URL".to_string(), mail_url.clone()));
    }
    if let Some(ddp_url) = &config.ddp_url {
        env.push(("DDP_DEFAULT_CONNECTION_URL".to_string(), ddp_url.clone()));
    }

    let settings = json!({
        "public": {
            "build": build,
            "kernelTooOld": false,
            "allowDemoAccounts": config.allow_demo_accounts,
            "allowDevAccounts": false,
            "isTesting": config.is_testing,
            "wildcardHost": config.wildcard_host,
        }
    });
    env.push(("METEOR_SETTINGS".to_string(), settings.to_string()));
    env
}
