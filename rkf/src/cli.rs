use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "rkf",
    version,
    about = "Grain-hosting frontend: serves the web UI and routes grain requests to workers"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bootstrap the bundled mongod, then keep the node front-end running
    /// against it; SIGHUP rereads the YAML config
    Start {
        /// YAML file with the frontend, database and sandbox settings
        #[arg(short, long)]
        config: PathBuf,
    },
}
