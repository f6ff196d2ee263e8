use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nix::sys::signal::Signal;

use crate::error::ControlError;

/// Path of the kernel status file for `pid`.
pub(crate) fn status_path(pid: i32) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/status"))
}

/// Returns `true` if process `pid` has installed a handler for `signal`.
///
/// Reads the caught-signal mask from the process status file. A process that
/// no longer exists, or a platform without that file, is reported as not
/// handling the signal.
///
/// # Errors
///
/// Returns [`ControlError::Io`] when the status file cannot be read for
/// another reason or lacks a well-formed `SigCgt` field.
pub fn is_process_handling_signal(pid: i32, signal: Signal) -> Result<bool, ControlError> {
    handles_signal_in(&status_path(pid), signal)
}

pub(crate) fn handles_signal_in(path: &Path, signal: Signal) -> Result<bool, ControlError> {
    let status = match fs::read_to_string(path) {
        Ok(status) => status,
        Err(error)
            if matches!(
                error.raw_os_error(),
                Some(libc::ENOENT | libc::ENOTDIR | libc::EINVAL | libc::ESRCH)
            ) =>
        {
            return Ok(false);
        }
        Err(error) => {
            return Err(ControlError::io(format!("reading {}", path.display()), error));
        }
    };
    let malformed = |reason: &str| {
        ControlError::io(
            format!("reading {}", path.display()),
            io::Error::new(io::ErrorKind::InvalidData, reason.to_owned()),
        )
    };
    let field =
        status_field(&status, "SigCgt").ok_or_else(|| malformed("missing 'SigCgt' field"))?;
    let mask = parse_sigset(field).ok_or_else(|| malformed("malformed 'SigCgt' field"))?;
    Ok(contains(mask, signal))
}

/// Value of `field` in a `Name:\tvalue` formatted status document.
fn status_field<'a>(status: &'a str, field: &str) -> Option<&'a str> {
    status.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        (name == field).then(|| value.trim())
    })
}

/// Parses a hexadecimal signal mask where bit `n - 1` stands for signal `n`.
fn parse_sigset(rendered: &str) -> Option<u64> {
    if rendered.is_empty() || rendered.len() > 16 {
        return None;
    }
    u64::from_str_radix(rendered, 16).ok()
}

fn contains(mask: u64, signal: Signal) -> bool {
    let bit = (signal as i32) - 1;
    u32::try_from(bit)
        .ok()
        .and_then(|shift| 1_u64.checked_shl(shift))
        .is_some_and(|flag| mask & flag != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    const STATUS: &str = "Name:\tnoded\nState:\tS (sleeping)\nSigBlk:\t0000000000000000\n\
        SigIgn:\t0000000000001000\nSigCgt:\t0000000180004a02\n";

    #[rstest]
    #[case::sigint(Signal::SIGINT, true)]
    #[case::sigquit(Signal::SIGQUIT, false)]
    #[case::sighup(Signal::SIGHUP, false)]
    #[case::sigterm(Signal::SIGTERM, true)]
    #[case::sigkill(Signal::SIGKILL, false)]
    #[case::sigalrm(Signal::SIGALRM, false)]
    fn reads_caught_mask(#[case] signal: Signal, #[case] expected: bool) {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("status");
        fs::write(&path, STATUS).expect("write status");
        assert_eq!(handles_signal_in(&path, signal).expect("parse"), expected);
    }

    #[test]
    fn missing_status_means_not_handling() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("gone");
        assert!(!handles_signal_in(&path, Signal::SIGTERM).expect("absent is fine"));
    }

    #[test]
    fn missing_field_is_an_error() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("status");
        fs::write(&path, "Name:\tnoded\n").expect("write status");
        let error = handles_signal_in(&path, Signal::SIGTERM).expect_err("field required");
        assert!(error.to_string().contains("SigCgt"));
    }

    #[rstest]
    #[case::empty("")]
    #[case::not_hex("00zz")]
    #[case::too_wide("00000000000000000")]
    fn rejects_malformed_masks(#[case] rendered: &str) {
        assert_eq!(parse_sigset(rendered), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn own_process_never_catches_sigkill() {
        let own = i32::try_from(std::process::id()).expect("pid fits");
        assert!(!is_process_handling_signal(own, Signal::SIGKILL).expect("liveness check"));
    }
}
