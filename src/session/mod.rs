//! Coordination-service abstraction: session traits, lifecycle events, and the
//! available backends.
//!
//! The monitor talks to the coordination service exclusively through
//! [`Connector`] and [`SessionOps`], mirroring how the service itself is an
//! external collaborator: one synchronous operation set (`exists`, `create`,
//! `set`, `delete`, `get`, `get_children`), versioned writes, ephemeral
//! ownership, and a watcher invoked from the client's own delivery thread.

pub mod memory;
#[cfg(feature = "zk")]
pub mod zk;

use std::time::Duration;

use thiserror::Error;

/// Identity of the session that owns an ephemeral node. `0` marks a
/// persistent node, matching the coordination service's own convention.
pub type SessionId = i64;

/// Remote state of a node, read fresh on every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStat {
    /// Monotonically increasing write counter, used for optimistic writes.
    pub version: i32,
    /// Owning-session identity (`0` for persistent nodes).
    pub owner: SessionId,
    /// Size of the node's content in bytes.
    pub data_len: usize,
    /// Number of direct children.
    pub num_children: u32,
}

/// Session lifecycle events delivered by the client's own thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session (re-)entered the connected state.
    Connected,
    /// Transient network loss; the client retries internally.
    Disconnected,
    /// The session is gone for good; every ephemeral node it owned is gone
    /// with it. The only event the monitor acts on.
    Expired,
}

/// Watcher callback registered at connect time. Invoked concurrently with
/// foreground calls, so implementations must be safe to call from any thread.
pub type EventHook = Box<dyn Fn(SessionEvent) + Send + Sync>;

/// Failures surfaced by a session operation.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("node does not exist")]
    NoNode,
    #[error("node already exists")]
    NodeExists,
    #[error("version mismatch")]
    BadVersion,
    #[error("parent node does not exist")]
    NoParent,
    #[error("node still has children")]
    NotEmpty,
    #[error("connection lost: {0}")]
    ConnectionLoss(String),
    #[error("session expired")]
    Expired,
    #[error("backend failure: {0}")]
    Backend(String),
}

impl SessionError {
    /// Benign races and version conflicts the caller resolves by retrying on
    /// its own cadence; everything else is fatal for the current operation.
    #[must_use]
    pub const fn is_benign(&self) -> bool {
        matches!(self, Self::NoNode | Self::NodeExists | Self::BadVersion)
    }
}

/// Synchronous operations against one live session.
///
/// All calls may block on network IO; the only timeout layered over them is
/// the session timeout itself.
pub trait SessionOps: Send {
    /// Node stat, or `None` when the node is absent.
    fn exists(&self, path: &str) -> Result<Option<NodeStat>, SessionError>;

    /// Create an ephemeral node. The parent must already exist.
    fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<(), SessionError>;

    /// Version-checked write. Fails with [`SessionError::BadVersion`] when the
    /// node changed underneath the caller.
    fn set_data(&self, path: &str, data: &[u8], expected_version: i32)
    -> Result<NodeStat, SessionError>;

    /// Delete a node; `expected_version: None` deletes regardless of version.
    fn delete(&self, path: &str, expected_version: Option<i32>) -> Result<(), SessionError>;

    /// Fetch a node's content and stat.
    fn get_data(&self, path: &str) -> Result<(Vec<u8>, NodeStat), SessionError>;

    /// Direct child names, in whatever order the service returns them.
    fn get_children(&self, path: &str) -> Result<Vec<String>, SessionError>;

    /// Graceful teardown. Ephemeral nodes owned by the session are released
    /// immediately instead of lingering until the timeout.
    fn close(self);
}

/// Factory for sessions. One connector per backend; the monitor owns one and
/// reconnects through it whenever the session expires.
pub trait Connector: Send + Sync + 'static {
    /// The session type this backend produces.
    type Session: SessionOps;

    /// Establish a session and register `hook` for lifecycle events.
    fn connect(
        &self,
        endpoint: &str,
        timeout: Duration,
        hook: EventHook,
    ) -> Result<Self::Session, SessionError>;
}
