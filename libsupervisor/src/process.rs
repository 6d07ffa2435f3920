use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use log::debug;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::process::Command;

/// Pids of the supervised processes, keyed by role.
///
/// An entry exists from the moment a process is launched (or adopted) until
/// its attempt ends; the supervisor clears it before relaunching.
#[derive(Clone, Default)]
pub struct ProcessTable {
    pids: Arc<Mutex<HashMap<String, Pid>>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, key: &str, pid: Pid) {
        debug!("tracking {key} as pid {pid}");
        self.pids.lock().insert(key.to_string(), pid);
    }

    pub fn clear(&self, key: &str) -> Option<Pid> {
        self.pids.lock().remove(key)
    }

    pub fn pid(&self, key: &str) -> Option<Pid> {
        self.pids.lock().get(key).copied()
    }

    /// Send `signal` to the process currently running for `key`.
    ///
    /// Returns `false` when nothing is running for that role, or the process
    /// already went away.
    pub fn signal(&self, key: &str, signal: Signal) -> Result<bool> {
        let Some(pid) = self.pid(key) else {
            return Ok(false);
        };
        match kill(pid, signal) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(e).with_context(|| format!("failed to send {signal:?} to {key} ({pid})")),
        }
    }

    pub fn slot(&self, key: &str) -> ProcessSlot {
        ProcessSlot {
            table: self.clone(),
            key: key.to_string(),
        }
    }
}

/// One role's entry in a [`ProcessTable`].
#[derive(Clone)]
pub struct ProcessSlot {
    table: ProcessTable,
    key: String,
}

impl ProcessSlot {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn pid(&self) -> Option<Pid> {
        self.table.pid(&self.key)
    }

    pub fn clear(&self) {
        self.table.clear(&self.key);
    }

    /// Spawn `command`, track it under this slot and wait for it to exit.
    ///
    /// A non-zero exit or a death by signal is an error.
    pub async fn run(&self, command: &mut Command) -> Result<()> {
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.key))?;
        if let Some(pid) = child.id() {
            self.table.track(&self.key, Pid::from_raw(pid as i32));
        }
        let status = child.wait().await;
        self.clear();
        let status = status.with_context(|| format!("failed to wait for {}", self.key))?;
        exit_result(&self.key, status)
    }

    /// Track a process this one did not spawn and wait for it to exit.
    ///
    /// Works for daemons that double-fork as long as this process is their
    /// subreaper (see [`become_subreaper`]).
    pub async fn wait_adopted(&self, pid: Pid) -> Result<()> {
        self.table.track(&self.key, pid);
        let waited = tokio::task::spawn_blocking(move || waitpid(pid, None)).await;
        self.clear();
        let status = waited
            .context("waiter task failed")?
            .with_context(|| format!("waitpid({pid}) for {} failed", self.key))?;
        match status {
            WaitStatus::Exited(_, 0) => Ok(()),
            status => bail!("{} exited abnormally: {status:?}", self.key),
        }
    }
}

fn exit_result(key: &str, status: ExitStatus) -> Result<()> {
    if status.success() {
        Ok(())
    } else {
        bail!("{key} exited with {status}")
    }
}

/// Make orphaned descendants reparent to this process, so daemons started
/// with `--fork` can still be waited on.
pub fn become_subreaper() -> Result<()> {
    nix::sys::prctl::set_child_subreaper(true).context("failed to become child subreaper")
}
