//! Locked PID files.
//!
//! The advisory lock on a PID file, not its text, decides whether the daemon
//! it names is running: the writer holds an exclusive `flock` for as long as
//! it claims to be alive, and readers test that lock without blocking. A
//! file whose lock can be taken is stale whatever PID it still contains.

use std::ffi::CStr;
use std::fmt::{self, Write as _};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, info, warn};

use crate::error::ControlError;
use crate::fd::{self, FrameBuf};

pub(crate) const PIDFILE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::pidfile");

/// Permissions of newly created PID files.
const PID_FILE_MODE: libc::mode_t = 0o600;

/// Bytes read when parsing a PID file.
const PID_READ_LIMIT: u64 = 100;

/// Exclusive claim on a PID file. Dropping it releases the lock.
pub struct PidFileLock {
    lock: Flock<File>,
    path: PathBuf,
    pid: i32,
}

impl PidFileLock {
    /// Path of the claimed PID file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID recorded in the file.
    #[must_use]
    pub const fn pid(&self) -> i32 {
        self.pid
    }
}

impl fmt::Debug for PidFileLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PidFileLock")
            .field("path", &self.path)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl AsFd for PidFileLock {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.lock.as_fd()
    }
}

/// Claims `path` for the current process and records its PID.
///
/// The returned lock must be kept for as long as the process considers
/// itself the owner.
///
/// # Errors
///
/// Returns [`ControlError::Lock`] when another open descriptor holds the
/// lock, and [`ControlError::Io`] when the file cannot be opened or written.
pub fn write_pid_file(path: &Path) -> Result<PidFileLock, ControlError> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .mode(PID_FILE_MODE.into())
        .open(path)
        .map_err(|error| ControlError::io(format!("opening PID file {}", path.display()), error))?;
    let mut lock = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| {
        ControlError::Lock {
            path: path.to_path_buf(),
            source: errno,
        }
    })?;

    let pid = std::process::id();
    let write = |file: &mut File| -> io::Result<()> {
        file.set_len(0)?;
        writeln!(file, "{pid}")?;
        file.flush()
    };
    write(&mut *lock)
        .map_err(|error| ControlError::io(format!("writing PID file {}", path.display()), error))?;

    let pid = i32::try_from(pid).map_err(|_| {
        ControlError::programmer(format!("process id {pid} does not fit a pid_t"))
    })?;
    info!(target: PIDFILE_TARGET, path = %path.display(), pid, "claimed PID file");
    Ok(PidFileLock {
        lock,
        path: path.to_path_buf(),
        pid,
    })
}

/// Returns the PID recorded in `path` if its writer still holds the lock.
///
/// # Errors
///
/// Returns [`ControlError::InvalidPidFile`] when the file is locked but does
/// not hold a PID, and [`ControlError::Io`] or [`ControlError::Os`] when it
/// cannot be opened or tested.
pub fn read_locked_pid_file(path: &Path) -> Result<Option<i32>, ControlError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(ControlError::io(
                format!("opening PID file {}", path.display()),
                error,
            ));
        }
    };
    let file = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(unlocked) => {
            debug!(target: PIDFILE_TARGET, path = %path.display(), "PID file is not locked");
            drop(unlocked);
            return Ok(None);
        }
        Err((file, Errno::EWOULDBLOCK)) => file,
        Err((_, errno)) => return Err(ControlError::os("flock", errno)),
    };

    let mut content = String::new();
    file.take(PID_READ_LIMIT)
        .read_to_string(&mut content)
        .map_err(|error| ControlError::io(format!("reading PID file {}", path.display()), error))?;
    parse_pid(&content)
        .map(Some)
        .ok_or_else(|| ControlError::InvalidPidFile {
            path: path.to_path_buf(),
            content,
        })
}

/// Reads the PID recorded in `path` without consulting the lock.
///
/// Missing or malformed files yield `None`; this is a best-effort helper for
/// diagnostics and must not be used to decide liveness.
#[must_use]
pub fn read_pid_file(path: &Path) -> Option<i32> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) => {
            if error.kind() != io::ErrorKind::NotFound {
                warn!(
                    target: PIDFILE_TARGET,
                    path = %path.display(),
                    error = %error,
                    "failed to read PID file"
                );
            }
            return None;
        }
    };
    let pid = parse_pid(&content);
    if pid.is_none() {
        warn!(target: PIDFILE_TARGET, path = %path.display(), "PID file holds no valid PID");
    }
    pid
}

/// Removes `path`, ignoring a missing file and logging other failures.
pub fn remove_pid_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => info!(target: PIDFILE_TARGET, path = %path.display(), "removed PID file"),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => warn!(
            target: PIDFILE_TARGET,
            path = %path.display(),
            error = %error,
            "failed to remove PID file"
        ),
    }
}

fn parse_pid(content: &str) -> Option<i32> {
    content.trim().parse::<i32>().ok().filter(|pid| *pid > 0)
}

/// Claims `path` using plain system calls only.
///
/// Used between `fork` and `exec`. The descriptor is returned still marked
/// close-on-exec; the caller decides whether it survives `exec`.
pub(crate) fn claim_raw(path: &CStr) -> Result<RawFd, Errno> {
    let fd = fd::open_raw(
        path,
        libc::O_WRONLY | libc::O_CREAT | libc::O_CLOEXEC,
        PID_FILE_MODE,
    )?;
    let outcome = lock_and_record(fd);
    if outcome.is_err() {
        fd::close_raw(fd);
    }
    outcome.map(|()| fd)
}

fn lock_and_record(fd: RawFd) -> Result<(), Errno> {
    // SAFETY: flock and ftruncate only act on the descriptor.
    Errno::result(unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) })?;
    Errno::result(unsafe { libc::ftruncate(fd, 0) })?;
    let mut line = FrameBuf::<16>::new();
    // SAFETY: getpid has no preconditions.
    let pid = unsafe { libc::getpid() };
    // FrameBuf never reports formatting errors.
    let _formatted = writeln!(line, "{pid}");
    fd::write_all_retrying(fd, line.as_bytes())
}
