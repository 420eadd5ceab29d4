//! Bounded subprocess execution: spawn with captured stdout, read under a
//! deadline, and guarantee teardown even when the child hangs.

pub mod bounded;
pub mod spawn;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use bounded::{BoundedExec, RearmPolicy};
pub use spawn::ProcessHandle;

/// Failures of a bounded run. `TimedOut` and `BufferTooSmall` mean the
/// program broke its execution contract; the heartbeat path treats both as
/// "the liveness node must be removed".
#[derive(Debug, Error)]
pub enum ExecError {
    /// No output became ready before the deadline.
    #[error("[ZKB-3101] no output within {limit:?}")]
    TimedOut {
        /// Configured readiness deadline.
        limit: Duration,
    },

    /// The program produced more output than the caller's buffer holds.
    /// Reported without a partial truncated success.
    #[error("[ZKB-3102] output exceeded the {capacity}-byte buffer")]
    BufferTooSmall {
        /// Capacity of the caller's buffer.
        capacity: usize,
    },

    /// The process could not be created.
    #[error("[ZKB-3103] failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Readiness wait or pipe read failure while supervising the child.
    #[error("[ZKB-3104] IO failure while supervising child: {source}")]
    Io {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}
