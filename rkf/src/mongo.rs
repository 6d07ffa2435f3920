//! The local database node: launched under supervision, bootstrapped on
//! every start and published to the frontend once its credential is known.
//!
//! The first start on a fresh data directory initiates the replica set and
//! creates the admin user with a random password, which is then persisted
//! next to the data. Later starts reconfigure the replica set (the bind
//! address may have changed) and reuse the stored password.

use std::net::SocketAddr;
use std::os::unix::fs::fchown;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use common::{Credential, Database, RpcError};
use libsupervisor::{Broadcast, ProcessSlot, ProcessTable, Sandbox, Supervised};
use log::{error, info, warn};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use rand::RngCore;
use tokio::io::AsyncWriteExt;

use crate::config::DatabaseConfig;

pub const MONGO_KEY: &str = "mongo";
pub const USERNAME: &str = "rkf";
pub const REPLICA_SET: &str = "rkrs";
pub const DEFAULT_DB: &str = "meteor";

pub const PASSWORD_LEN: usize = 30;
pub const PASSWORD_ALPHABET: &[u8; 64] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ-_";

const ADMIN_ROLES: [&str; 4] = [
    "readWriteAnyDatabase",
    "userAdminAnyDatabase",
    "dbAdminAnyDatabase",
    "clusterAdmin",
];

/// Runs administrative commands against the local database.
#[async_trait]
pub trait AdminShell: Send + Sync {
    /// Evaluate `command` against database `db`; fails unless the shell
    /// exits cleanly.
    async fn eval(&self, command: &str, db: &str) -> Result<()>;
}

/// The database shell from the bundle, run in the service sandbox.
///
/// Authenticates as [`USERNAME`] once the credential file exists.
pub struct SandboxedShell {
    sandbox: Sandbox,
    port: u16,
    processes: ProcessTable,
}

impl SandboxedShell {
    pub fn new(sandbox: Sandbox, port: u16, processes: ProcessTable) -> Self {
        Self {
            sandbox,
            port,
            processes,
        }
    }

    fn args(&self, command: &str, db: &str, password: Option<&str>) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(password) = password {
            args.extend([
                "-u".to_string(),
                USERNAME.to_string(),
                "-p".to_string(),
                password.to_string(),
                "--authenticationDatabase".to_string(),
                "admin".to_string(),
            ]);
        }
        args.extend([
            "--quiet".to_string(),
            "--eval".to_string(),
            command.to_string(),
            format!("localhost:{}/{db}", self.port),
        ]);
        args
    }
}

#[async_trait]
impl AdminShell for SandboxedShell {
    async fn eval(&self, command: &str, db: &str) -> Result<()> {
        let passwd = credential_path(&self.sandbox);
        let password = match tokio::fs::read_to_string(&passwd).await {
            Ok(content) => Some(content.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", passwd.display()));
            }
        };

        let mut shell = self.sandbox.command("/bin/mongo")?;
        shell.args(self.args(command, db, password.as_deref()));
        self.processes.slot("mongo-shell").run(&mut shell).await
    }
}

/// One database node.
pub struct MongoNode {
    sandbox: Sandbox,
    bind_address: SocketAddr,
    settle_delay: Duration,
    shell: Arc<dyn AdminShell>,
    credential: Broadcast<Credential>,
}

impl MongoNode {
    pub fn new(sandbox: Sandbox, config: &DatabaseConfig, processes: ProcessTable) -> Self {
        let shell = SandboxedShell::new(sandbox.clone(), config.bind_address.port(), processes);
        Self::with_shell(
            sandbox,
            config.bind_address,
            config.settle_delay(),
            Arc::new(shell),
        )
    }

    pub fn with_shell(
        sandbox: Sandbox,
        bind_address: SocketAddr,
        settle_delay: Duration,
        shell: Arc<dyn AdminShell>,
    ) -> Self {
        Self {
            sandbox,
            bind_address,
            settle_delay,
            shell,
            credential: Broadcast::new(),
        }
    }

    pub fn credential_path(&self) -> PathBuf {
        credential_path(&self.sandbox)
    }

    /// The published credential, if bootstrap has completed.
    pub fn credential(&self) -> Option<Credential> {
        self.credential.get()
    }

    /// Bootstrap the running database and publish its credential.
    ///
    /// Only the first publication counts; every caller gets the credential
    /// of the first successful bootstrap.
    pub async fn initialize(&self) -> Result<Credential> {
        let password = self.bootstrap().await?;
        let credential = Credential {
            address: self.bind_address,
            username: USERNAME.to_string(),
            password,
        };
        if self.credential.set(credential) {
            info!("database ready at {}", self.bind_address);
        }
        self.credential
            .get()
            .ok_or_else(|| anyhow!("database credential was not published"))
    }

    async fn bootstrap(&self) -> Result<String> {
        let path = self.credential_path();
        let is_new = !tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("failed to stat {}", path.display()))?;

        let members = format!(
            "{{_id: '{REPLICA_SET}', members: [{{_id: 0, host: '{}'}}]}}",
            self.bind_address
        );
        if is_new {
            self.admin_command(&format!("rs.initiate({members})"), DEFAULT_DB)
                .await;
        } else {
            self.admin_command(&format!("rs.reconfig({members})"), DEFAULT_DB)
                .await;
        }

        // the node needs a few heartbeats to elect itself primary
        tokio::time::sleep(self.settle_delay).await;

        if !is_new {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            return Ok(content.trim().to_string());
        }

        let password = generate_password();
        let roles = ADMIN_ROLES.map(|r| format!("\"{r}\"")).join(",");
        self.admin_command(
            &format!("db.addUser({{user: \"{USERNAME}\", pwd: \"{password}\", roles: [{roles}]}})"),
            "admin",
        )
        .await;
        self.store_password(&path, &password).await?;
        info!("created database admin user {USERNAME}");
        Ok(password)
    }

    async fn store_password(&self, path: &Path, password: &str) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)
            .await
            .with_context(|| format!("failed to create {}", path.display()))?;
        let identity = self.sandbox.identity();
        fchown(&file, Some(identity.uid), Some(identity.gid))
            .with_context(|| format!("failed to chown {}", path.display()))?;
        file.write_all(password.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Run an administrative command. A failure leaves the database in an
    /// unknown state, so it is logged and this never returns.
    async fn admin_command(&self, command: &str, db: &str) {
        if let Err(e) = self.shell.eval(command, db).await {
            let shown = if command.contains("pwd:") {
                "db.addUser(...)"
            } else {
                command
            };
            error!(
                "database command failed! State is inconsistent! Hanging forever! {shown} on {db}: {e:?}"
            );
            std::future::pending::<()>().await;
        }
    }

    fn mongod_args(&self) -> Vec<String> {
        vec![
            "--fork".to_string(),
            "--bind_ip".to_string(),
            format!("127.0.0.1,{}", self.bind_address.ip()),
            "--port".to_string(),
            self.bind_address.port().to_string(),
            "--dbpath".to_string(),
            "/var/mongo".to_string(),
            "--logpath".to_string(),
            "/var/log/mongo.log".to_string(),
            "--pidfilepath".to_string(),
            "/var/pid/mongo.pid".to_string(),
            "--auth".to_string(),
            "--nohttpinterface".to_string(),
            "--replSet".to_string(),
            REPLICA_SET.to_string(),
            "--oplogSize".to_string(),
            "128".to_string(),
        ]
    }
}

impl MongoNode {
    /// Take over the daemon named by the pid file and bootstrap it.
    ///
    /// Returns when the daemon exits, after bootstrap has finished. A failed
    /// admin command keeps this pending for good, whether or not the daemon
    /// is still alive, so the node is never relaunched on top of a half
    /// configured database.
    pub async fn adopt(&self, slot: &ProcessSlot) -> Result<()> {
        let pid_file = self.sandbox.layout().var_path("pid/mongo.pid");
        let pid = read_pid(&pid_file).await?;
        kill(pid, None).context("mongod dead on arrival")?;

        let exited = slot.wait_adopted(pid);
        tokio::pin!(exited);
        let init = self.initialize();
        tokio::pin!(init);

        // keep reaping while bootstrapping, but only bootstrap decides
        // when this attempt is over
        let mut exit = None;
        let initialized = loop {
            tokio::select! {
                result = &mut exited, if exit.is_none() => exit = Some(result),
                initialized = &mut init => break initialized,
            }
        };

        if let Err(e) = initialized {
            if exit.is_none() {
                warn!("killing mongod ({pid}) after failed bootstrap");
                let _ = kill(pid, Signal::SIGKILL);
            }
            return Err(e);
        }
        match exit {
            Some(result) => result,
            None => exited.await,
        }
    }
}

#[async_trait]
impl Supervised for MongoNode {
    async fn run_once(&self, slot: &ProcessSlot) -> Result<()> {
        self.sandbox.prepare_directories()?;

        // returns once the daemon is up and has forked off
        let mut mongod = self.sandbox.command("bin/mongod")?;
        mongod.args(self.mongod_args());
        slot.run(&mut mongod).await.context("mongod failed to start")?;

        self.adopt(slot).await
    }
}

#[async_trait]
impl Database for MongoNode {
    async fn get_connection_info(&self) -> std::result::Result<Credential, RpcError> {
        Ok(self.credential.wait().await)
    }
}

pub fn credential_path(sandbox: &Sandbox) -> PathBuf {
    sandbox.layout().var_path("mongo/passwd")
}

/// 30 characters from [`PASSWORD_ALPHABET`], each picked by a random byte
/// mod 64.
pub fn generate_password() -> String {
    let mut bytes = [0u8; PASSWORD_LEN];
    rand::rng().fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| PASSWORD_ALPHABET[usize::from(b % 64)] as char)
        .collect()
}

async fn read_pid(path: &Path) -> Result<Pid> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let pid = content
        .trim()
        .parse::<i32>()
        .with_context(|| format!("bad pid in {}", path.display()))?;
    Ok(Pid::from_raw(pid))
}
