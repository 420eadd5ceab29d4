//! Heartbeat loop: run the program, publish its output, sleep, repeat.
//!
//! Every failure of one iteration — timeout, oversized output, spawn error,
//! nonzero exit, or a fatal coordination error — collapses into the same
//! action: remove the liveness node, log, and try again next cycle. The loop
//! never exits on its own; it runs until the shutdown flag flips (it is meant
//! to live under an external supervisor).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::core::config::SendSettings;
use crate::core::errors::Result;
use crate::exec::{BoundedExec, ExecError, RearmPolicy};
use crate::monitor::{DeleteOutcome, Monitor, UpdateOutcome};
use crate::session::Connector;

/// Why the liveness node is being removed this cycle.
#[derive(Debug, Clone, Copy)]
enum RemoveCause {
    Timeout,
    Overflow,
    ExitCode,
    RunFailure,
    UpdateFailure,
}

/// Run the heartbeat loop until `shutdown` is set.
///
/// Subprocess execution happens entirely outside the monitor's lock; the
/// delay is a fixed sleep on top of however long the exec took.
pub fn run<C: Connector>(
    connector: C,
    settings: &SendSettings,
    shutdown: &Arc<AtomicBool>,
) -> Result<()> {
    settings.validate()?;
    let monitor = Monitor::init(
        connector,
        &settings.endpoint,
        &settings.path,
        settings.session_timeout,
    )?;
    let rearm = if settings.strict_deadline {
        RearmPolicy::Deadline
    } else {
        RearmPolicy::FullTimeout
    };
    // The per-iteration execution budget is the iteration delay itself.
    let exec = BoundedExec::new(settings.delay).rearm(rearm);
    let mut out = vec![0u8; settings.buffer_bytes];

    info!(
        "publishing {} every {}s into {}",
        settings.exec.display(),
        settings.delay.as_secs(),
        settings.path
    );

    while !shutdown.load(Ordering::Relaxed) {
        beat(&monitor, &exec, settings, &mut out);
        sleep_interruptible(settings.delay, shutdown);
    }

    info!("shutdown requested, releasing {}", settings.path);
    monitor.term();
    Ok(())
}

fn beat<C: Connector>(
    monitor: &Monitor<C>,
    exec: &BoundedExec,
    settings: &SendSettings,
    out: &mut [u8],
) {
    let program = settings.exec.display();
    match exec.run(&settings.exec, &settings.args, out) {
        Ok((n, status)) if status.success() => match monitor.update(Some(&out[..n])) {
            Ok(UpdateOutcome::Created) => debug!("{program}: created with {n} bytes"),
            Ok(UpdateOutcome::Updated) => debug!("{program}: updated with {n} bytes"),
            Ok(UpdateOutcome::Retry(reason)) => {
                debug!("{program}: update deferred ({reason:?}), next cycle retries");
            }
            Err(err) => {
                error!("{program}: {err}");
                remove_node(monitor, RemoveCause::UpdateFailure);
            }
        },
        Ok((_, status)) => {
            warn!("{program}: exit code {:?}; removing node", status.code());
            remove_node(monitor, RemoveCause::ExitCode);
        }
        Err(ExecError::TimedOut { limit }) => {
            warn!("{program}: no output within {limit:?}; removing node");
            remove_node(monitor, RemoveCause::Timeout);
        }
        Err(ExecError::BufferTooSmall { capacity }) => {
            warn!("{program}: output exceeded {capacity} bytes; removing node");
            remove_node(monitor, RemoveCause::Overflow);
        }
        Err(err) => {
            warn!("{program}: error running ({err}); removing node");
            remove_node(monitor, RemoveCause::RunFailure);
        }
    }
}

/// Best-effort removal: a failure here is logged and left for the next cycle.
fn remove_node<C: Connector>(monitor: &Monitor<C>, cause: RemoveCause) {
    match monitor.delete() {
        Ok(DeleteOutcome::Deleted) => debug!("liveness node removed ({cause:?})"),
        Ok(DeleteOutcome::Retry(reason)) => {
            debug!("liveness node removal deferred ({cause:?}, {reason:?})");
        }
        Err(err) => error!("liveness node removal failed ({cause:?}): {err}"),
    }
}

fn sleep_interruptible(total: Duration, shutdown: &Arc<AtomicBool>) {
    const SLICE: Duration = Duration::from_millis(100);
    let mut remaining = total;
    while !remaining.is_zero() && !shutdown.load(Ordering::Relaxed) {
        let nap = remaining.min(SLICE);
        std::thread::sleep(nap);
        remaining = remaining.saturating_sub(nap);
    }
}
