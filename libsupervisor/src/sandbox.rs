//! Small sandbox for auxiliary services (the application front-end and the
//! database node), built from the bundle directory.
//!
//! Layout on the host:
//!
//! ```sh
//! /rkf/bundle            bundle image; becomes `/` inside the sandbox
//! /var/rkf/bundle        bound at /var inside
//! ├── frontend/socket
//! ├── mongo              database files and credential
//! ├── log
//! └── pid
//! /tmp/rkf-bundle        bound at /tmp inside, recreated on every launch
//! ```

use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::sched::{CloneFlags, unshare};
use nix::sys::signal::{SigSet, SigmaskHow, sigprocmask};
use nix::unistd::{
    AccessFlags, Gid, Uid, access, chdir, chown, getcwd, getgid, getuid, pivot_root, setgroups,
    setresgid, setresuid,
};
use serde::Deserialize;
use tokio::process::Command;

const DEVICES: [&str; 4] = ["/dev/null", "/dev/zero", "/dev/random", "/dev/urandom"];
const ETC_TMPFS_OPTIONS: &str = "size=2m,nr_inodes=128,mode=755,uid=0,gid=0";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BundleLayout {
    pub root_dir: PathBuf,
    pub var_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub bundle_dir: PathBuf,
}

impl Default for BundleLayout {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/var/rkf"),
            var_dir: PathBuf::from("/var/rkf/bundle"),
            tmp_dir: PathBuf::from("/tmp/rkf-bundle"),
            bundle_dir: PathBuf::from("/rkf/bundle"),
        }
    }
}

impl BundleLayout {
    /// Every layout rooted under `base`. Used by tests and local runs.
    pub fn under(base: &Path) -> Self {
        Self {
            root_dir: base.join("var"),
            var_dir: base.join("var/bundle"),
            tmp_dir: base.join("tmp-bundle"),
            bundle_dir: base.join("bundle"),
        }
    }

    /// Host path of something the sandbox sees under `/var`.
    pub fn var_path(&self, relative: &str) -> PathBuf {
        self.var_dir.join(relative)
    }

    /// Directories created before each launch, parents first.
    pub fn directories(&self) -> Vec<PathBuf> {
        vec![
            self.root_dir.clone(),
            self.var_dir.clone(),
            self.var_path("frontend"),
            self.var_path("frontend/socket"),
            self.var_path("mongo"),
            self.var_path("log"),
            self.var_path("pid"),
            self.tmp_dir.clone(),
        ]
    }
}

/// Non-root identity sandboxed services run as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            uid: 1000,
            gid: 1000,
        }
    }
}

impl Identity {
    pub fn current() -> Self {
        Self {
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
        }
    }

    pub fn uid(&self) -> Uid {
        Uid::from_raw(self.uid)
    }

    pub fn gid(&self) -> Gid {
        Gid::from_raw(self.gid)
    }
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    layout: BundleLayout,
    identity: Identity,
}

impl Sandbox {
    pub fn new(layout: BundleLayout, identity: Identity) -> Self {
        Self { layout, identity }
    }

    pub fn layout(&self) -> &BundleLayout {
        &self.layout
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Create the host directories the sandbox binds in, owned by the
    /// service identity. The scratch directory starts empty every time.
    pub fn prepare_directories(&self) -> Result<()> {
        let tmp_dir = &self.layout.tmp_dir;
        if tmp_dir.exists() {
            fs::remove_dir_all(tmp_dir)
                .with_context(|| format!("failed to clear {}", tmp_dir.display()))?;
        }

        for dir in self.layout.directories() {
            let mode = if dir.starts_with(tmp_dir) { 0o1770 } else { 0o750 };
            match DirBuilder::new().mode(mode).create(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to create {}", dir.display()));
                }
            }
            chown(dir.as_path(), Some(self.identity.uid()), Some(self.identity.gid()))
                .with_context(|| format!("failed to chown {}", dir.display()))?;
        }
        Ok(())
    }

    /// A command that runs `program` (a path inside the bundle) in the
    /// sandbox. The caller adds arguments and environment.
    pub fn command(&self, program: &str) -> Result<Command> {
        let entry = SandboxEntry {
            bundle_dir: self.layout.bundle_dir.clone(),
            var_dir: self.layout.var_dir.clone(),
            tmp_dir: self.layout.tmp_dir.clone(),
            etc_files: self.etc_files()?,
            identity: self.identity,
        };

        let mut command = Command::new(program);
        command.env_clear().kill_on_drop(true);
        // SAFETY: the hook runs in the forked child before exec and only makes
        // syscalls and plain file copies on data prepared in the parent.
        unsafe {
            command.pre_exec(move || entry.enter());
        }
        Ok(command)
    }

    /// Host files listed in the bundle's `etc.list`, copied into the
    /// sandbox's private `/etc`.
    fn etc_files(&self) -> Result<Vec<PathBuf>> {
        let list = self.layout.bundle_dir.join("etc.list");
        let content = fs::read_to_string(&list)
            .with_context(|| format!("failed to read {}", list.display()))?;
        let files = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect::<Vec<_>>();
        debug!("sandbox /etc gets {} files", files.len());
        Ok(files)
    }
}

struct SandboxEntry {
    bundle_dir: PathBuf,
    var_dir: PathBuf,
    tmp_dir: PathBuf,
    etc_files: Vec<PathBuf>,
    identity: Identity,
}

impl SandboxEntry {
    fn enter(&self) -> io::Result<()> {
        unshare(CloneFlags::CLONE_NEWNS)?;
        chdir(self.bundle_dir.as_path())?;

        // make every mount private so nothing propagates back to the host
        mount(
            Some("none"),
            "/",
            None::<&str>,
            MsFlags::MS_REC | MsFlags::MS_PRIVATE,
            None::<&str>,
        )?;

        // pivot_root needs the new root to be a mount point
        bind(Path::new("."), ".", MsFlags::MS_REC)?;
        let cwd = getcwd()?;
        chdir(cwd.as_path())?;

        bind(Path::new("/proc"), "proc", MsFlags::MS_REC)?;
        bind(&self.tmp_dir, "tmp", MsFlags::empty())?;
        bind(&self.var_dir, "var", MsFlags::empty())?;
        for device in DEVICES {
            bind(Path::new(device), &device[1..], MsFlags::empty())?;
        }

        mount(
            Some("tmpfs"),
            "etc",
            Some("tmpfs"),
            MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
            Some(ETC_TMPFS_OPTIONS),
        )?;
        for file in &self.etc_files {
            if access(file.as_path(), AccessFlags::R_OK).is_ok() {
                let relative = file.strip_prefix("/").unwrap_or(file);
                fs::copy(file, Path::new(".").join(relative))?;
            }
        }

        pivot_root(".", "tmp")?;
        chdir("/")?;
        umount2("tmp", MntFlags::MNT_DETACH)?;

        let (uid, gid) = (self.identity.uid(), self.identity.gid());
        setresgid(gid, gid, gid)?;
        setgroups(&[])?;
        setresuid(uid, uid, uid)?;

        sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None)?;
        Ok(())
    }
}

fn bind(source: &Path, target: &str, extra: MsFlags) -> nix::Result<()> {
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | extra,
        None::<&str>,
    )
}
