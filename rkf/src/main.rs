mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use common::Database;
use libsupervisor::{ProcessTable, Sandbox, Supervisor, TaskSet, become_subreaper};
use log::{error, info};
use nix::sys::signal::Signal;
use rkf::config::load_config;
use rkf::mongo::MONGO_KEY;
use rkf::{Frontend, MongoNode};
use tokio::signal::unix::{SignalKind, signal};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Start { config } => run(config).await,
    }
}

async fn run(config_path: &Path) -> anyhow::Result<()> {
    let cfg = load_config(config_path)?;
    become_subreaper()?;

    let processes = ProcessTable::new();
    let sandbox = Sandbox::new(cfg.layout.clone(), cfg.identity);
    let restart_interval = cfg.supervisor.restart_interval();
    let tasks = TaskSet::default();

    let mongo = Arc::new(MongoNode::new(
        sandbox.clone(),
        &cfg.database,
        processes.clone(),
    ));
    {
        let mongo = mongo.clone();
        let supervisor = Supervisor::new(&processes, MONGO_KEY, restart_interval);
        tasks.spawn(async move {
            supervisor.run(mongo.as_ref()).await;
            Ok(())
        });
    }

    let frontend = Frontend::new(cfg.frontend, sandbox, processes.clone(), restart_interval);
    let database: Arc<dyn Database> = mongo;
    let _mongo_registration = frontend.mongos().register(database);
    frontend.start().context("failed to start front-end")?;
    info!("rkf started, database at {}", cfg.database.bind_address);

    let mut hangup = signal(SignalKind::hangup()).context("failed to listen for SIGHUP")?;
    loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("reloading config from {}", config_path.display());
                match load_config(config_path) {
                    Ok(new_cfg) => {
                        if let Err(e) = frontend.set_config(new_cfg.frontend) {
                            error!("failed to apply new config: {e:?}");
                        }
                    }
                    Err(e) => error!("keeping old config: {e:?}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    // mongod is a daemon, so it outlives its launcher unless told to stop
    if let Err(e) = processes.signal(MONGO_KEY, Signal::SIGTERM) {
        error!("failed to stop database: {e:?}");
    }
    Ok(())
}
