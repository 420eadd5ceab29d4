//! Deadline-bounded execution: run a program, capture stdout into a caller
//! buffer, and tear the child down on completion, timeout, or overflow.

use std::io::Read;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use log::debug;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use super::spawn::{ProcessHandle, spawn};
use super::ExecError;

const READ_CHUNK: usize = 8192;

/// How each readiness wait is re-armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RearmPolicy {
    /// Every wait gets the full configured timeout. A program that trickles
    /// output just before each deadline can therefore run longer than the
    /// timeout in aggregate. Historical behavior, kept as the default.
    #[default]
    FullTimeout,
    /// The whole run is bounded by wall clock: each wait gets only the time
    /// remaining.
    Deadline,
}

/// Bounded runner: spawn, read under a deadline, terminate.
#[derive(Debug, Clone, Copy)]
pub struct BoundedExec {
    timeout: Duration,
    rearm: RearmPolicy,
    grace: Duration,
}

impl BoundedExec {
    /// Runner with the given readiness timeout, the historical re-arm policy,
    /// and a one-second teardown grace period.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            rearm: RearmPolicy::FullTimeout,
            grace: Duration::from_secs(1),
        }
    }

    /// Select the re-arm policy.
    #[must_use]
    pub const fn rearm(mut self, policy: RearmPolicy) -> Self {
        self.rearm = policy;
        self
    }

    /// Override the teardown grace period.
    #[must_use]
    pub const fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Run `program` with `args`, filling `out` from the child's stdout.
    ///
    /// Returns the byte count and exit status on end-of-stream. The child is
    /// terminated and reaped on every path, including timeout and overflow.
    pub fn run(
        &self,
        program: &Path,
        args: &[String],
        out: &mut [u8],
    ) -> Result<(usize, ExitStatus), ExecError> {
        let mut handle = spawn(program, args)?;
        let read = self.read_loop(&mut handle, out);
        let status = handle.terminate(self.grace);
        match (read, status) {
            (Ok(filled), Ok(status)) => Ok((filled, status)),
            (Err(err), _) => Err(err),
            (Ok(_), Err(err)) => Err(err),
        }
    }

    fn read_loop(&self, handle: &mut ProcessHandle, out: &mut [u8]) -> Result<usize, ExecError> {
        let started = Instant::now();
        let mut filled = 0usize;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let budget = match self.rearm {
                RearmPolicy::FullTimeout => self.timeout,
                RearmPolicy::Deadline => {
                    self.timeout
                        .checked_sub(started.elapsed())
                        .ok_or(ExecError::TimedOut { limit: self.timeout })?
                }
            };
            if !poll_readable(handle.stdout_mut().as_fd(), budget)? {
                debug!("child pid {} produced no output in time", handle.pid());
                return Err(ExecError::TimedOut { limit: self.timeout });
            }
            let n = handle
                .stdout_mut()
                .read(&mut chunk)
                .map_err(|source| ExecError::Io { source })?;
            if n == 0 {
                return Ok(filled);
            }
            if filled + n > out.len() {
                return Err(ExecError::BufferTooSmall { capacity: out.len() });
            }
            out[filled..filled + n].copy_from_slice(&chunk[..n]);
            filled += n;
        }
    }
}

/// Wait until `fd` is readable or `budget` elapses. `Ok(false)` means the
/// deadline was exhausted with no data ready.
fn poll_readable(fd: BorrowedFd<'_>, budget: Duration) -> Result<bool, ExecError> {
    let millis = i32::try_from(budget.as_millis()).unwrap_or(i32::MAX);
    let timeout = PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX);
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    let ready = poll(&mut fds, timeout).map_err(|errno| ExecError::Io {
        source: std::io::Error::from(errno),
    })?;
    Ok(ready > 0)
}

#[cfg(test)]
mod tests {
    use super::{BoundedExec, RearmPolicy};
    use crate::exec::ExecError;
    use std::path::Path;
    use std::time::{Duration, Instant};

    const SH: &str = "/bin/sh";

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn hello_returns_five_bytes_and_success() {
        let mut out = [0u8; 64];
        let (n, status) = BoundedExec::new(Duration::from_secs(5))
            .run(Path::new(SH), &sh("printf hello"), &mut out)
            .expect("run");
        assert_eq!(n, 5);
        assert_eq!(&out[..n], b"hello");
        assert!(status.success());
    }

    #[test]
    fn nonzero_exit_is_reported_with_output() {
        let mut out = [0u8; 64];
        let (n, status) = BoundedExec::new(Duration::from_secs(5))
            .run(Path::new(SH), &sh("printf nope; exit 3"), &mut out)
            .expect("run");
        assert_eq!(&out[..n], b"nope");
        assert_eq!(status.code(), Some(3));
    }

    #[test]
    fn silent_hang_times_out_and_reaps_the_child() {
        let mut out = [0u8; 64];
        let err = BoundedExec::new(Duration::from_millis(200))
            .grace(Duration::from_millis(100))
            .run(Path::new(SH), &sh("sleep 30"), &mut out)
            .expect_err("must time out");
        assert!(matches!(err, ExecError::TimedOut { .. }), "got {err}");
    }

    #[test]
    fn oversized_output_reports_buffer_too_small() {
        let mut out = [0u8; 16];
        let err = BoundedExec::new(Duration::from_secs(5))
            .run(
                Path::new(SH),
                &sh("dd if=/dev/zero bs=1024 count=64 2>/dev/null"),
                &mut out,
            )
            .expect_err("must overflow");
        assert!(matches!(err, ExecError::BufferTooSmall { capacity: 16 }), "got {err}");
    }

    #[test]
    fn oversized_output_still_reaps_the_child() {
        // The shell prints its own pid, pauses so the pid alone lands in the
        // buffer, then floods it.
        let mut out = [0u8; 64];
        let err = BoundedExec::new(Duration::from_secs(5))
            .grace(Duration::from_millis(100))
            .run(
                Path::new(SH),
                &sh("echo $$; sleep 0.2; dd if=/dev/zero bs=1024 count=64 2>/dev/null"),
                &mut out,
            )
            .expect_err("must overflow");
        assert!(matches!(err, ExecError::BufferTooSmall { .. }), "got {err}");

        let text = String::from_utf8_lossy(&out);
        let pid: i32 = text
            .lines()
            .next()
            .expect("pid line")
            .trim()
            .parse()
            .expect("pid");
        assert!(
            nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_err(),
            "child must be reaped after overflow"
        );
    }

    #[test]
    fn full_timeout_rearm_lets_trickling_output_finish() {
        // Two 150ms pauses with a 250ms per-wait budget: the aggregate run
        // exceeds the budget, which the historical policy allows.
        let mut out = [0u8; 64];
        let (n, status) = BoundedExec::new(Duration::from_millis(250))
            .run(
                Path::new(SH),
                &sh("printf a; sleep 0.15; printf b; sleep 0.15; printf c"),
                &mut out,
            )
            .expect("run");
        assert_eq!(&out[..n], b"abc");
        assert!(status.success());
    }

    #[test]
    fn deadline_rearm_bounds_the_whole_run() {
        let mut out = [0u8; 64];
        let started = Instant::now();
        let err = BoundedExec::new(Duration::from_millis(300))
            .rearm(RearmPolicy::Deadline)
            .grace(Duration::from_millis(100))
            .run(
                Path::new(SH),
                &sh("while true; do printf x; sleep 0.1; done"),
                &mut out,
            )
            .expect_err("must hit the deadline");
        assert!(matches!(err, ExecError::TimedOut { .. }), "got {err}");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn missing_program_reports_spawn_error() {
        let mut out = [0u8; 8];
        let err = BoundedExec::new(Duration::from_secs(1))
            .run(Path::new("/nonexistent/zkbeacon-prog"), &[], &mut out)
            .expect_err("must fail to spawn");
        assert!(matches!(err, ExecError::Spawn { .. }), "got {err}");
    }
}
