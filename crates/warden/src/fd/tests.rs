//! Unit tests for descriptor helpers.

use std::fmt::Write as _;
use std::os::fd::{AsFd, AsRawFd};
use std::time::{Duration, Instant};

use rstest::rstest;

use super::*;

fn fd_flags(fd: RawFd) -> libc::c_int {
    // SAFETY: F_GETFD only reads descriptor flags.
    unsafe { libc::fcntl(fd, libc::F_GETFD) }
}

#[test]
fn pipe_ends_are_close_on_exec() {
    let (read_end, write_end) = pipe().expect("pipe");
    assert_ne!(fd_flags(read_end.as_raw_fd()) & libc::FD_CLOEXEC, 0);
    assert_ne!(fd_flags(write_end.as_raw_fd()) & libc::FD_CLOEXEC, 0);
}

#[test]
fn cloexec_can_be_cleared_and_restored() {
    let (read_end, _write_end) = pipe().expect("pipe");
    set_cloexec(read_end.as_raw_fd(), false).expect("clear");
    assert_eq!(fd_flags(read_end.as_raw_fd()) & libc::FD_CLOEXEC, 0);
    set_cloexec(read_end.as_raw_fd(), true).expect("set");
    assert_ne!(fd_flags(read_end.as_raw_fd()) & libc::FD_CLOEXEC, 0);
}

#[test]
fn nonblocking_read_reports_would_block() {
    let (read_end, _write_end) = pipe().expect("pipe");
    set_nonblocking(read_end.as_raw_fd()).expect("nonblocking");
    let mut buf = [0_u8; 8];
    let error = read_retrying(read_end.as_raw_fd(), &mut buf).expect_err("no data yet");
    assert_eq!(error, Errno::EAGAIN);
}

#[test]
fn read_to_limit_stops_at_limit_and_eof() {
    let (read_end, write_end) = pipe().expect("pipe");
    write_all_retrying(write_end.as_raw_fd(), b"1234567890").expect("write");
    drop(write_end);
    let head = read_to_limit(read_end.as_raw_fd(), 4).expect("read");
    assert_eq!(head, b"1234");
    let rest = read_to_limit(read_end.as_raw_fd(), 100).expect("read");
    assert_eq!(rest, b"567890");
}

#[test]
fn wait_for_readable_pipe() {
    let (read_end, write_end) = pipe().expect("pipe");
    write_all_retrying(write_end.as_raw_fd(), b"x").expect("write");
    let events = wait_for_fd_condition(read_end.as_fd(), libc::POLLIN, Some(Duration::from_secs(1)))
        .expect("poll succeeds")
        .expect("pipe is readable");
    assert_ne!(events & libc::POLLIN, 0);
}

#[test]
fn wait_times_out_without_data() {
    let (read_end, _write_end) = pipe().expect("pipe");
    let started = Instant::now();
    let events = wait_for_fd_condition(
        read_end.as_fd(),
        libc::POLLIN,
        Some(Duration::from_millis(50)),
    )
    .expect("poll succeeds");
    assert_eq!(events, None);
    assert!(started.elapsed() >= Duration::from_millis(40));
}

#[rstest]
#[case::zero(Duration::ZERO, 0)]
#[case::whole(Duration::from_millis(250), 250)]
#[case::rounds_up(Duration::from_micros(1_500), 2)]
#[case::sub_millisecond(Duration::from_micros(10), 1)]
#[case::saturates(Duration::from_secs(u64::MAX), libc::c_int::MAX)]
fn poll_timeout_rounds_up(#[case] wait: Duration, #[case] expected: libc::c_int) {
    assert_eq!(poll_timeout_ms(wait), expected);
}

#[test]
fn frame_buffer_truncates() {
    let mut frame = FrameBuf::<8>::new();
    write!(frame, "errno {}", 1234).expect("writes never fail");
    assert_eq!(frame.as_bytes(), b"errno 12");
}
