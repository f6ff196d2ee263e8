//! Launch data prepared before forking, and the code run by the daemon and
//! its intermediate parent.

use std::convert::Infallible;
use std::ffi::{CStr, CString, OsStr, OsString, c_char};
use std::fmt::Write as _;
use std::iter;
use std::os::fd::RawFd;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::Path;
use std::ptr;

use nix::errno::Errno;
use nix::unistd::{ForkResult, chdir, fork, getpid};

use super::setup::{DAEMON_UMASK, Redirect, SetupError, setup_daemon_env, setup_daemon_fds};
use super::{DaemonOutput, DaemonSpec};
use crate::error::ControlError;
use crate::fd::{self, FrameBuf};
use crate::pidfile::claim_raw;

/// Search path used when the daemon's environment has no `PATH`.
const DEFAULT_SEARCH_PATH: &str = "/usr/bin:/bin";

/// Capacity of a failure report frame.
const REPORT_CAPACITY: usize = 512;

/// Directory the intermediate child moves to while detaching.
pub(super) const DETACH_DIR: &CStr = c"/";

enum PreparedOutput {
    Null,
    File(CString),
    Fd(RawFd),
}

impl PreparedOutput {
    fn redirect(&self) -> Redirect<'_> {
        match self {
            Self::Null => Redirect::Null,
            Self::File(path) => Redirect::File(path),
            Self::Fd(fd) => Redirect::Fd(*fd),
        }
    }
}

/// Everything the daemon needs after `fork`, converted up front so that the
/// child never allocates.
pub(super) struct LaunchPlan {
    candidates: Vec<CString>,
    // Owns the strings `argv_ptrs` and `envp_ptrs` point into.
    _argv: Vec<CString>,
    _envp: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
    envp_ptrs: Vec<*const c_char>,
    cwd: CString,
    output: PreparedOutput,
    pidfile: Option<CString>,
}

impl LaunchPlan {
    pub(super) fn prepare(spec: &DaemonSpec) -> Result<Self, ControlError> {
        let words = spec.command().argv()?;
        let Some(program) = words.first() else {
            return Err(ControlError::programmer("empty argument vector"));
        };
        let environment = spec.environment();
        let search_path = environment
            .get(OsStr::new("PATH"))
            .map_or(OsStr::new(DEFAULT_SEARCH_PATH), OsString::as_os_str);
        let candidates = search_candidates(program, search_path)
            .into_iter()
            .map(|candidate| c_string(candidate, "program path"))
            .collect::<Result<Vec<_>, _>>()?;

        let argv = words
            .iter()
            .map(|word| c_string(word.clone(), "argument"))
            .collect::<Result<Vec<_>, _>>()?;
        let envp = environment
            .into_iter()
            .map(|(key, value)| {
                let mut entry = key.into_vec();
                entry.push(b'=');
                entry.extend_from_slice(value.as_bytes());
                c_string(OsString::from_vec(entry), "environment entry")
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = match spec.output_target() {
            DaemonOutput::Null => PreparedOutput::Null,
            DaemonOutput::File(path) => {
                PreparedOutput::File(c_string(path.clone().into_os_string(), "output path")?)
            }
            DaemonOutput::Fd(fd) => PreparedOutput::Fd(*fd),
        };
        let pidfile = spec
            .pidfile_path()
            .map(|path| c_string(path.as_os_str().to_owned(), "PID file path"))
            .transpose()?;
        let cwd = c_string(
            spec.command().working_dir().as_os_str().to_owned(),
            "working directory",
        )?;

        Ok(Self {
            candidates,
            argv_ptrs: null_terminated(&argv),
            envp_ptrs: null_terminated(&envp),
            _argv: argv,
            _envp: envp,
            cwd,
            output,
            pidfile,
        })
    }

    /// Body of the first child. Detaches, forks the daemon and exits.
    pub(super) fn run_first_child(
        &self,
        read_ends: [RawFd; 2],
        error_write: RawFd,
        pid_write: RawFd,
    ) -> ! {
        for fd in read_ends {
            fd::close_raw(fd);
        }
        if let Err(error) = setup_daemon_env(DETACH_DIR, DAEMON_UMASK) {
            report(error_write, &error);
            fd::exit_child(1);
        }
        // SAFETY: the daemon continues with `exec_daemon` only, which is
        // restricted to system calls on prepared data.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { .. }) => fd::exit_child(0),
            Ok(ForkResult::Child) => {}
            Err(errno) => {
                report(error_write, &SetupError::new("forking daemon", errno));
                fd::exit_child(1);
            }
        }
        let Err(error) = self.exec_daemon(error_write, pid_write);
        report(error_write, &error);
        fd::exit_child(1)
    }

    /// Claims the PID file, redirects output, reports the PID and execs.
    /// Returns only when a step failed.
    fn exec_daemon(&self, error_write: RawFd, pid_write: RawFd) -> Result<Infallible, SetupError> {
        fd::set_cloexec(error_write, true)
            .map_err(|errno| SetupError::new("marking error pipe close-on-exec", errno))?;
        let lock = match &self.pidfile {
            Some(path) => {
                let lock =
                    claim_raw(path).map_err(|errno| SetupError::new("claiming PID file", errno))?;
                fd::set_cloexec(lock, false)
                    .map_err(|errno| SetupError::new("keeping PID file open", errno))?;
                Some(lock)
            }
            None => None,
        };

        setup_daemon_fds(self.output.redirect())?;

        let mut pid = FrameBuf::<16>::new();
        // FrameBuf never reports formatting errors.
        let _formatted = write!(pid, "{}", getpid());
        fd::write_all_retrying(pid_write, pid.as_bytes())
            .map_err(|errno| SetupError::new("sending PID", errno))?;

        fd::close_fds(&[error_write, lock.unwrap_or(error_write)]);
        chdir(self.cwd.as_c_str()).map_err(|errno| SetupError::new("changing directory", errno))?;
        Err(SetupError::new("executing command", self.exec()))
    }

    /// Tries each candidate path like `execvp`; returns the error to report.
    fn exec(&self) -> Errno {
        let mut denied = false;
        let mut last = Errno::ENOENT;
        for candidate in &self.candidates {
            // SAFETY: both pointer arrays are NULL-terminated and point into
            // strings owned by `self`.
            unsafe {
                libc::execve(
                    candidate.as_ptr(),
                    self.argv_ptrs.as_ptr(),
                    self.envp_ptrs.as_ptr(),
                );
            }
            last = Errno::last();
            match last {
                Errno::EACCES => denied = true,
                Errno::ENOENT | Errno::ENOTDIR => {}
                _ => return last,
            }
        }
        if denied { Errno::EACCES } else { last }
    }
}

/// Writes `error` to the handoff pipe without allocating.
pub(super) fn report(fd: RawFd, error: &SetupError) {
    let mut frame = FrameBuf::<REPORT_CAPACITY>::new();
    let _formatted = write!(frame, "{error}");
    let _sent = fd::write_all_retrying(fd, frame.as_bytes());
}

/// Paths `execvp` would try for `program`, in order.
pub(super) fn search_candidates(program: &OsStr, search_path: &OsStr) -> Vec<OsString> {
    if program.as_bytes().contains(&b'/') {
        return vec![program.to_owned()];
    }
    search_path
        .as_bytes()
        .split(|byte| *byte == b':')
        .map(|entry| {
            let dir = if entry.is_empty() { b".".as_slice() } else { entry };
            Path::new(OsStr::from_bytes(dir)).join(program).into_os_string()
        })
        .collect()
}

fn c_string(value: OsString, what: &str) -> Result<CString, ControlError> {
    CString::new(value.into_vec())
        .map_err(|_| ControlError::programmer(format!("{what} contains a NUL byte")))
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|string| string.as_ptr())
        .chain(iter::once(ptr::null()))
        .collect()
}
