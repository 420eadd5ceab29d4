//! Subprocess runner: spawn one child with stdout piped and stdin/stderr
//! discarded, and terminate it with a watchdog-backed grace period.

use std::path::Path;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, bounded};
use log::{debug, warn};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use super::ExecError;

/// A live child process and the read end of its stdout pipe.
///
/// Owned exclusively by the caller between [`spawn`] and
/// [`ProcessHandle::terminate`]; terminate must be called exactly once, and
/// it both closes the descriptor and reaps the child.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    stdout: ChildStdout,
}

/// Spawn `program` with `args`, the environment inherited, stdout redirected
/// to a pipe, and stdin/stderr redirected to the null device. Exec failures
/// in the child surface as a nonzero exit status; the parent never observes
/// partially set up redirection.
pub fn spawn(program: &Path, args: &[String]) -> Result<ProcessHandle, ExecError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| ExecError::Spawn {
            program: program.to_path_buf(),
            source,
        })?;
    let Some(stdout) = child.stdout.take() else {
        // Unreachable with Stdio::piped, but a dead child beats a panic.
        let _ = child.kill();
        let _ = child.wait();
        return Err(ExecError::Spawn {
            program: program.to_path_buf(),
            source: std::io::Error::other("stdout pipe missing after spawn"),
        });
    };
    debug!("spawned {} as pid {}", program.display(), child.id());
    Ok(ProcessHandle { child, stdout })
}

impl ProcessHandle {
    /// Child process id.
    #[must_use]
    pub fn pid(&self) -> Pid {
        Pid::from_raw(i32::try_from(self.child.id()).unwrap_or_default())
    }

    /// Read end of the child's stdout pipe.
    pub fn stdout_mut(&mut self) -> &mut ChildStdout {
        &mut self.stdout
    }

    /// Close the read descriptor, then guarantee the child stops: a watchdog
    /// thread holding only the pid sends an unconditional SIGKILL once
    /// `grace` elapses, while this thread blocks on reaping. Whichever
    /// finishes first unblocks the wait; the watchdog is joined afterward.
    ///
    /// The watchdog is deliberately independent of this thread's progress —
    /// a caller stuck in `wait` cannot starve the deadline.
    pub fn terminate(self, grace: Duration) -> Result<ExitStatus, ExecError> {
        let Self { mut child, stdout } = self;
        drop(stdout);

        // Fast path: already exited, nothing to supervise.
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(source) => return Err(ExecError::Io { source }),
        }

        let pid = Pid::from_raw(i32::try_from(child.id()).unwrap_or_default());
        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        let watchdog = thread::Builder::new()
            .name("exec-watchdog".to_string())
            .spawn(move || {
                if cancel_rx.recv_timeout(grace) == Err(RecvTimeoutError::Timeout) {
                    debug!("grace period over, killing pid {pid}");
                    if let Err(errno) = kill(pid, Signal::SIGKILL) {
                        debug!("kill pid {pid}: {errno}");
                    }
                }
            })
            .map_err(|source| ExecError::Io { source })?;

        let status = child.wait();
        drop(cancel_tx);
        if watchdog.join().is_err() {
            warn!("exec watchdog panicked");
        }
        status.map_err(|source| ExecError::Io { source })
    }
}
