//! Coordination session manager: owns one session and one target node,
//! exposes create/update/delete with ownership and version semantics, a
//! recursive subtree snapshot, and transparent recovery from session expiry.
//!
//! One mutex serializes every foreground operation against the watcher's
//! reconnect action; the client's delivery thread is just another caller of
//! [`Monitor::on_session_event`]. Subprocess execution never happens under
//! this lock.

use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::core::errors::{BeaconError, Result};
use crate::session::{Connector, SessionError, SessionEvent, SessionId, SessionOps};

/// Nodes larger than this fail the snapshot walk outright; content is read
/// into a bounded buffer, never chunked.
pub const SNAPSHOT_NODE_LIMIT: usize = 1 << 20;

/// Result of an [`Monitor::update`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The node was absent and has been created as an ephemeral.
    Created,
    /// The node was ours and its content was replaced.
    Updated,
    /// The operation is not currently possible; re-attempt on the caller's
    /// own cadence. Never success, never fatal.
    Retry(RetryReason),
}

/// Result of a [`Monitor::delete`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The node is gone (deleting an absent node counts).
    Deleted,
    /// No usable session; re-attempt later.
    Retry(RetryReason),
}

/// Why an operation must be re-attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// No live session right now.
    NotConnected,
    /// Another actor created the node between our exists check and create.
    CreateRace,
    /// A stale node from a dead session was found and deleted; the next
    /// cycle recreates it. This is the self-healing path.
    StaleOwnerEvicted,
    /// The version-checked write lost a race or the node vanished mid-write.
    VersionConflict,
}

/// One event of a snapshot walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotEvent {
    /// A visited node. `{parent}/{name}` is its absolute path.
    Item {
        /// Absolute path of the parent (empty for the walk's root item).
        parent: String,
        /// Node name.
        name: String,
        /// Node content.
        data: Vec<u8>,
    },
    /// The walk visited every node.
    Done,
    /// The walk failed; no further events follow.
    Fail {
        /// Path at which the walk failed.
        path: String,
        /// Failure description.
        details: String,
    },
}

struct State<S: SessionOps> {
    session: Option<S>,
    /// Our session's identity, learned from the stat of a node we created.
    /// Cleared whenever the session is replaced; `None` means any existing
    /// node must be treated as foreign.
    identity: Option<SessionId>,
}

struct MonitorInner<C: Connector> {
    connector: C,
    endpoint: String,
    path: String,
    timeout: Duration,
    state: Mutex<State<C::Session>>,
}

/// Handle to the session manager. Cloning shares the same session and lock.
pub struct Monitor<C: Connector> {
    inner: Arc<MonitorInner<C>>,
}

impl<C: Connector> Clone for Monitor<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> Monitor<C> {
    /// Store the configuration and establish the initial session. Failure
    /// here is fatal to startup.
    pub fn init(
        connector: C,
        endpoint: impl Into<String>,
        path: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let monitor = Self {
            inner: Arc::new(MonitorInner {
                connector,
                endpoint: endpoint.into(),
                path: path.into(),
                timeout,
                state: Mutex::new(State {
                    session: None,
                    identity: None,
                }),
            }),
        };
        {
            let mut state = monitor.inner.state.lock();
            monitor
                .connect_locked(&mut state)
                .map_err(|err| BeaconError::Connect {
                    endpoint: monitor.inner.endpoint.clone(),
                    details: err.to_string(),
                })?;
        }
        Ok(monitor)
    }

    /// Target node path this monitor writes to.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Watcher entry point, invoked by the client's delivery thread. Only a
    /// session expiry triggers a reconnect; transient disconnects are retried
    /// inside the client itself.
    pub fn on_session_event(&self, event: SessionEvent) {
        if event != SessionEvent::Expired {
            debug!("ignoring session event {event:?}");
            return;
        }
        info!("session expired, reconnecting to {}", self.inner.endpoint);
        let mut state = self.inner.state.lock();
        if let Some(old) = state.session.take() {
            old.close();
        }
        state.identity = None;
        if let Err(err) = self.connect_locked(&mut state) {
            // Leave the state disconnected; update/delete retry the connect.
            warn!("reconnect after expiry failed: {err}");
        }
    }

    /// Publish `data` into the target node, creating it as an ephemeral when
    /// absent. A node owned by a dead session is deleted instead of
    /// overwritten, and the caller retries on its next cycle.
    pub fn update(&self, data: Option<&[u8]>) -> Result<UpdateOutcome> {
        let payload = data.unwrap_or_default();
        let path = &self.inner.path;
        let mut state = self.inner.state.lock();
        self.ensure_connected(&mut state);
        // Copied out so the session borrow below stays undisturbed.
        let identity = state.identity;
        let Some(session) = state.session.as_ref() else {
            return Ok(UpdateOutcome::Retry(RetryReason::NotConnected));
        };

        match try_update(session, identity, path, payload) {
            Ok((outcome, learned)) => {
                if outcome == UpdateOutcome::Created {
                    state.identity = learned;
                }
                Ok(outcome)
            }
            // The session died between the watcher noticing and this call; the
            // next cycle reconnects.
            Err((op, err)) if session_lost(&err) => {
                warn!("session lost during {op} on {path}: {err}");
                drop_session(&mut state);
                Ok(UpdateOutcome::Retry(RetryReason::NotConnected))
            }
            Err((op, err)) => Err(BeaconError::session(op, path, err)),
        }
    }

    /// Remove the target node regardless of version. Absence is success.
    pub fn delete(&self) -> Result<DeleteOutcome> {
        let path = &self.inner.path;
        let mut state = self.inner.state.lock();
        self.ensure_connected(&mut state);
        let Some(session) = state.session.as_ref() else {
            return Ok(DeleteOutcome::Retry(RetryReason::NotConnected));
        };
        match session.delete(path, None) {
            Ok(()) | Err(SessionError::NoNode) => Ok(DeleteOutcome::Deleted),
            Err(err) if session_lost(&err) => {
                warn!("session lost during delete on {path}: {err}");
                drop_session(&mut state);
                Ok(DeleteOutcome::Retry(RetryReason::NotConnected))
            }
            Err(err) => Err(BeaconError::session("delete", path, err)),
        }
    }

    /// Depth-first walk of the subtree rooted at `path`, as a lazy stream of
    /// [`SnapshotEvent`]s ending in `Done` or `Fail`. The monitor's lock is
    /// held for the iterator's whole lifetime, so the walk is exclusive with
    /// concurrent `update`/`delete` calls on this handle; dropping the
    /// iterator aborts the walk without visiting the remaining nodes.
    pub fn snapshot(&self, path: &str) -> SnapshotEvents<'_, C::Session> {
        let state = self.inner.state.lock();
        SnapshotEvents {
            state,
            stack: vec![split_path(path)],
            finished: false,
        }
    }

    /// Idempotent teardown: detach the session under the lock (the watcher
    /// can no longer act on it), then close it.
    pub fn term(&self) {
        let session = {
            let mut state = self.inner.state.lock();
            state.identity = None;
            state.session.take()
        };
        if let Some(session) = session {
            session.close();
        }
    }

    /// Connect lazily after a failed expiry reconnect, so one bad reconnect
    /// cannot wedge the agent forever.
    fn ensure_connected(&self, state: &mut State<C::Session>) {
        if state.session.is_none()
            && let Err(err) = self.connect_locked(state)
        {
            warn!("connect to {} failed: {err}", self.inner.endpoint);
        }
    }

    fn connect_locked(&self, state: &mut State<C::Session>) -> std::result::Result<(), SessionError> {
        let weak = Arc::downgrade(&self.inner);
        let hook = Box::new(move |event| dispatch_event(&weak, event));
        let session = self
            .inner
            .connector
            .connect(&self.inner.endpoint, self.inner.timeout, hook)?;
        state.session = Some(session);
        state.identity = None;
        Ok(())
    }
}

fn dispatch_event<C: Connector>(inner: &Weak<MonitorInner<C>>, event: SessionEvent) {
    if let Some(inner) = inner.upgrade() {
        Monitor { inner }.on_session_event(event);
    }
}

/// Errors meaning the whole session is unusable, not just this operation.
const fn session_lost(err: &SessionError) -> bool {
    matches!(err, SessionError::Expired | SessionError::ConnectionLoss(_))
}

fn drop_session<S: SessionOps>(state: &mut State<S>) {
    if let Some(dead) = state.session.take() {
        dead.close();
    }
    state.identity = None;
}

/// One update attempt against a live session. Returns the outcome plus the
/// identity learned from a node we just created; errors carry the failing
/// operation's name.
fn try_update<S: SessionOps>(
    session: &S,
    identity: Option<SessionId>,
    path: &str,
    payload: &[u8],
) -> std::result::Result<(UpdateOutcome, Option<SessionId>), (&'static str, SessionError)> {
    let stat = session.exists(path).map_err(|err| ("exists", err))?;
    match stat {
        None => match session.create_ephemeral(path, payload) {
            Ok(()) => {
                // Learn our identity from the node we just created.
                let learned = match session.exists(path) {
                    Ok(Some(created)) => Some(created.owner),
                    _ => None,
                };
                debug!("created {path}");
                Ok((UpdateOutcome::Created, learned))
            }
            Err(SessionError::NodeExists) => {
                Ok((UpdateOutcome::Retry(RetryReason::CreateRace), None))
            }
            Err(err) => Err(("create", err)),
        },
        Some(stat) if identity != Some(stat.owner) => {
            match session.delete(path, Some(stat.version)) {
                // NoNode: someone else removed the stale node first.
                Ok(()) | Err(SessionError::BadVersion | SessionError::NoNode) => {
                    info!("evicted stale node {path} owned by session {}", stat.owner);
                    Ok((UpdateOutcome::Retry(RetryReason::StaleOwnerEvicted), None))
                }
                Err(err) => Err(("delete", err)),
            }
        }
        Some(stat) => match session.set_data(path, payload, stat.version) {
            Ok(_) => Ok((UpdateOutcome::Updated, None)),
            Err(SessionError::BadVersion | SessionError::NoNode) => {
                Ok((UpdateOutcome::Retry(RetryReason::VersionConflict), None))
            }
            Err(err) => Err(("set", err)),
        },
    }
}

/// Lazy snapshot stream. Yields `Item` events in depth-first preorder, then
/// exactly one `Done` (or a single `Fail` and nothing afterwards).
pub struct SnapshotEvents<'m, S: SessionOps> {
    state: MutexGuard<'m, State<S>>,
    /// Pending `(parent, name)` pairs; children are pushed in reverse so the
    /// walk visits them in the order the service returned them.
    stack: Vec<(String, String)>,
    finished: bool,
}

impl<S: SessionOps> SnapshotEvents<'_, S> {
    fn fail(&mut self, path: &str, details: impl Into<String>) -> SnapshotEvent {
        self.finished = true;
        SnapshotEvent::Fail {
            path: path.to_string(),
            details: details.into(),
        }
    }

    fn visit(&mut self, parent: String, name: String) -> SnapshotEvent {
        let path = join_path(&parent, &name);
        match fetch_node(self.state.session.as_ref(), &path) {
            Ok((children, data)) => {
                let child_parent = if path == "/" { String::new() } else { path };
                for child in children.into_iter().rev() {
                    self.stack.push((child_parent.clone(), child));
                }
                SnapshotEvent::Item { parent, name, data }
            }
            Err(details) => self.fail(&path, details),
        }
    }
}

impl<S: SessionOps> Iterator for SnapshotEvents<'_, S> {
    type Item = SnapshotEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.stack.pop() {
            Some((parent, name)) => Some(self.visit(parent, name)),
            None => {
                self.finished = true;
                Some(SnapshotEvent::Done)
            }
        }
    }
}

/// One node's listing and content. Children are listed before the content is
/// read, matching the service call order the walk has always used; a listing
/// failure therefore fails the walk before any content is fetched.
fn fetch_node<S: SessionOps>(
    session: Option<&S>,
    path: &str,
) -> std::result::Result<(Vec<String>, Vec<u8>), String> {
    let session = session.ok_or_else(|| "no live session".to_string())?;
    let children = session
        .get_children(path)
        .map_err(|err| err.to_string())?;
    let (data, stat) = session.get_data(path).map_err(|err| err.to_string())?;
    if stat.data_len > SNAPSHOT_NODE_LIMIT || data.len() > SNAPSHOT_NODE_LIMIT {
        return Err(format!("content exceeds {SNAPSHOT_NODE_LIMIT} bytes"));
    }
    Ok((children, data))
}

/// Split an absolute path into `(parent, name)`, with the root's parent
/// mapped to the empty string.
fn split_path(path: &str) -> (String, String) {
    if path == "/" {
        return (String::new(), String::new());
    }
    match path.rfind('/') {
        Some(idx) => (path[..idx].to_string(), path[idx + 1..].to_string()),
        None => (String::new(), path.to_string()),
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() && name.is_empty() {
        "/".to_string()
    } else {
        format!("{parent}/{name}")
    }
}
