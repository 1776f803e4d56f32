//! PID-file single-instance enforcement
//!
//! The file holds one line with the daemon's PID. Claims are serialized by an
//! exclusive `flock` on a sibling `<pid file>.lock`, held for the daemon's
//! lifetime: a stale PID file is only cleared, and a new PID only written,
//! by the lock holder, so two claimants cannot both win. The PID itself is
//! written to a temp file and renamed into place, so readers never see a
//! partial PID.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Result, SupervisorError};

/// What a PID file says about the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PidStatus {
    /// No PID file
    Missing,
    /// PID file names a live process
    Running(u32),
    /// PID file names a process that no longer exists
    Stale(u32),
    /// PID file contents are not a PID
    Invalid(String),
}

fn pid_err(path: &Path, source: std::io::Error) -> SupervisorError {
    SupervisorError::PidFile {
        path: path.to_path_buf(),
        source,
    }
}

/// Read and classify a PID file without modifying it
pub fn probe(path: &Path) -> Result<PidStatus> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(PidStatus::Missing),
        Err(e) => return Err(pid_err(path, e)),
    };
    match content.trim().parse::<u32>() {
        Ok(pid) if pid > 0 => {
            if is_process_alive(pid) {
                Ok(PidStatus::Running(pid))
            } else {
                Ok(PidStatus::Stale(pid))
            }
        }
        _ => Ok(PidStatus::Invalid(content.trim().to_string())),
    }
}

/// Remove a PID file, treating "already gone" as success
pub fn remove(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(pid_err(path, e)),
    }
}

/// Whether `pid` names a live (non-zombie) process
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => !is_zombie(pid),
        // Exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    // On non-Unix, just assume it's running if PID file exists
    true
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // Format: "pid (comm) state ..."; comm may contain spaces and parens
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .is_some_and(|state| state == "Z")
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
pub use nix::sys::signal::Signal;

#[cfg(not(unix))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    SIGTERM,
    SIGKILL,
    SIGHUP,
}

/// Send a signal to `pid`
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| SupervisorError::Signal {
        pid,
        reason: "PID out of range".to_string(),
    })?;
    kill(Pid::from_raw(raw), signal).map_err(|e| SupervisorError::Signal {
        pid,
        reason: e.to_string(),
    })
}

#[cfg(not(unix))]
pub fn send_signal(pid: u32, _signal: Signal) -> Result<()> {
    Err(SupervisorError::Signal {
        pid,
        reason: "signals are not supported on this platform".to_string(),
    })
}

/// Claimed PID file; removed again on release or drop
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
    released: bool,
    // Dropped after the PID file is removed
    _lock: ClaimLock,
}

impl PidFile {
    /// Claim `path` for the current process
    pub fn acquire(path: &Path) -> Result<Self> {
        Self::acquire_for(path, std::process::id())
    }

    /// Claim `path` for `pid`, clearing a stale file first
    pub fn acquire_for(path: &Path, pid: u32) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| pid_err(path, e))?;
        }

        let Some(lock) = ClaimLock::try_acquire(path)? else {
            // Another instance holds the claim; it may not have written its PID yet
            return match probe(path)? {
                PidStatus::Running(winner) => Err(SupervisorError::AlreadyRunning { pid: winner }),
                _ => Err(pid_err(
                    path,
                    std::io::Error::new(ErrorKind::WouldBlock, "claimed by another instance"),
                )),
            };
        };

        match probe(path)? {
            PidStatus::Running(existing) if existing != pid => {
                return Err(SupervisorError::AlreadyRunning { pid: existing });
            }
            PidStatus::Running(_) => {
                debug!("PID file {} already names this process", path.display());
            }
            PidStatus::Stale(stale) => {
                warn!(
                    "Replacing stale PID file {} (PID {} is not running)",
                    path.display(),
                    stale
                );
            }
            PidStatus::Invalid(content) => {
                warn!(
                    "Replacing unreadable PID file {} (contents: {:?})",
                    path.display(),
                    content
                );
            }
            PidStatus::Missing => {}
        }

        let tmp = temp_path(path, pid);
        fs::write(&tmp, format!("{pid}\n")).map_err(|e| pid_err(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(pid_err(path, e));
        }

        Ok(Self {
            path: path.to_path_buf(),
            pid,
            released: false,
            _lock: lock,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the PID file if it still names us
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.remove_if_owned()
    }

    fn remove_if_owned(&self) -> Result<()> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim() == self.pid.to_string() => remove(&self.path),
            Ok(_) => {
                warn!(
                    "PID file {} no longer names PID {}, leaving it",
                    self.path.display(),
                    self.pid
                );
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(pid_err(&self.path, e)),
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.remove_if_owned() {
                warn!("Failed to remove PID file: {}", e);
            }
        }
    }
}

fn temp_path(path: &Path, pid: u32) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "supervisor.pid".into());
    name.push(format!(".{pid}.tmp"));
    path.with_file_name(name)
}

/// Remove the PID file if it still reads `expected` and no instance holds the
/// claim. Returns whether the file was removed.
pub fn remove_if_unclaimed(path: &Path, expected: &str) -> Result<bool> {
    let Some(_lock) = ClaimLock::try_acquire(path)? else {
        debug!("PID file {} is claimed by a starting instance, leaving it", path.display());
        return Ok(false);
    };
    match fs::read_to_string(path) {
        Ok(content) if content.trim() == expected => {
            remove(path)?;
            Ok(true)
        }
        Ok(_) => Ok(false),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(pid_err(path, e)),
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "supervisor.pid".into());
    name.push(".lock");
    path.with_file_name(name)
}

/// Exclusive claim on a PID file path, released when dropped
#[derive(Debug)]
struct ClaimLock {
    _file: fs::File,
}

impl ClaimLock {
    /// `None` when another open lock file description holds the claim
    #[cfg(unix)]
    fn try_acquire(path: &Path) -> Result<Option<Self>> {
        use nix::errno::Errno;
        use nix::fcntl::{flock, FlockArg};
        use std::os::unix::io::AsRawFd;

        let lock_path = lock_path(path);
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| pid_err(&lock_path, e))?;
        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => Ok(Some(Self { _file: file })),
            Err(e) if e == Errno::EWOULDBLOCK => Ok(None),
            Err(e) => Err(pid_err(&lock_path, std::io::Error::from(e))),
        }
    }

    #[cfg(not(unix))]
    fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let lock_path = lock_path(path);
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| pid_err(&lock_path, e))?;
        Ok(Some(Self { _file: file }))
    }
}
