//! In-process coordination backend with real session semantics.
//!
//! Backs the test suites and any single-process embedding: per-session
//! identities, ephemeral ownership, versioned writes, and session expiry that
//! reaps ephemerals and delivers [`SessionEvent::Expired`] on a dedicated
//! delivery thread — the same concurrency shape a networked client exhibits.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;

use super::{Connector, EventHook, NodeStat, SessionError, SessionEvent, SessionId, SessionOps};

#[derive(Debug, Clone)]
struct MemNode {
    data: Vec<u8>,
    version: i32,
    /// `0` for persistent nodes, otherwise the creating session.
    owner: SessionId,
    /// Child names in creation order; the service guarantees no ordering, and
    /// neither do we.
    children: Vec<String>,
}

impl MemNode {
    fn stat(&self) -> NodeStat {
        NodeStat {
            version: self.version,
            owner: self.owner,
            data_len: self.data.len(),
            num_children: u32::try_from(self.children.len()).unwrap_or(u32::MAX),
        }
    }
}

struct SessionSlot {
    delivery: Sender<SessionEvent>,
}

struct ClusterState {
    nodes: HashMap<String, MemNode>,
    sessions: HashMap<SessionId, SessionSlot>,
    next_session: SessionId,
    offline: bool,
}

impl ClusterState {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            "/".to_string(),
            MemNode {
                data: Vec::new(),
                version: 0,
                owner: 0,
                children: Vec::new(),
            },
        );
        Self {
            nodes,
            sessions: HashMap::new(),
            next_session: 1,
            offline: false,
        }
    }

    fn split(path: &str) -> Result<(&str, &str), SessionError> {
        if path == "/" || !path.starts_with('/') || path.ends_with('/') {
            return Err(SessionError::Backend(format!("invalid path {path:?}")));
        }
        let idx = path.rfind('/').unwrap_or_default();
        let parent = if idx == 0 { "/" } else { &path[..idx] };
        Ok((parent, &path[idx + 1..]))
    }

    fn remove_node(&mut self, path: &str) {
        if let Ok((parent, name)) = Self::split(path)
            && let Some(parent_node) = self.nodes.get_mut(parent)
        {
            parent_node.children.retain(|child| child != name);
        }
        self.nodes.remove(path);
    }

    fn reap_ephemerals(&mut self, id: SessionId) {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == id)
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            self.remove_node(&path);
        }
    }
}

/// Shared in-process cluster. Cloning yields another handle to the same tree.
#[derive(Clone)]
pub struct MemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClusterState::new())),
        }
    }

    /// Connector handle for this cluster.
    #[must_use]
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            cluster: self.clone(),
        }
    }

    /// Create a persistent node (and its missing ancestors) with `data`.
    /// Administrative surface: the session API only creates ephemerals.
    pub fn seed(&self, path: &str, data: &[u8]) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        let mut at = String::new();
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        for (depth, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(SessionError::Backend(format!("invalid path {path:?}")));
            }
            let parent = if at.is_empty() { "/".to_string() } else { at.clone() };
            at.push('/');
            at.push_str(segment);
            if !state.nodes.contains_key(&at) {
                let node_data = if depth + 1 == segments.len() {
                    data.to_vec()
                } else {
                    Vec::new()
                };
                state.nodes.insert(
                    at.clone(),
                    MemNode {
                        data: node_data,
                        version: 0,
                        owner: 0,
                        children: Vec::new(),
                    },
                );
                let name = segment.to_string();
                if let Some(parent_node) = state.nodes.get_mut(&parent) {
                    parent_node.children.push(name);
                }
            } else if depth + 1 == segments.len()
                && let Some(node) = state.nodes.get_mut(&at)
            {
                node.data = data.to_vec();
                node.version += 1;
            }
        }
        Ok(())
    }

    /// Kill a session as the service would on timeout: reap its ephemerals
    /// and deliver `Expired` on the session's delivery thread.
    pub fn expire_session(&self, id: SessionId) {
        let slot = {
            let mut state = self.state.lock();
            state.reap_ephemerals(id);
            state.sessions.remove(&id)
        };
        if let Some(slot) = slot {
            let _ = slot.delivery.send(SessionEvent::Expired);
        }
    }

    /// While offline, new connections are refused with `ConnectionLoss`.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Test probe: content of a node, if present.
    #[must_use]
    pub fn data_of(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().nodes.get(path).map(|node| node.data.clone())
    }

    /// Test probe: owning-session identity of a node, if present.
    #[must_use]
    pub fn owner_of(&self, path: &str) -> Option<SessionId> {
        self.state.lock().nodes.get(path).map(|node| node.owner)
    }

    /// Test probe: node existence.
    #[must_use]
    pub fn node_exists(&self, path: &str) -> bool {
        self.state.lock().nodes.contains_key(path)
    }

    fn open_session(&self, hook: EventHook) -> Result<MemorySession, SessionError> {
        let mut state = self.state.lock();
        if state.offline {
            return Err(SessionError::ConnectionLoss("cluster offline".to_string()));
        }
        let id = state.next_session;
        state.next_session += 1;

        let (delivery, inbox) = unbounded::<SessionEvent>();
        // The delivery thread mimics the client library's own IO thread: it
        // invokes the watcher concurrently with foreground operations.
        thread::Builder::new()
            .name(format!("mem-delivery-{id}"))
            .spawn(move || {
                for event in inbox {
                    hook(event);
                }
            })
            .map_err(|err| SessionError::Backend(err.to_string()))?;

        state.sessions.insert(id, SessionSlot { delivery });
        Ok(MemorySession {
            cluster: self.clone(),
            id,
        })
    }

    fn with_live_session<T>(
        &self,
        id: SessionId,
        op: impl FnOnce(&mut ClusterState) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let mut state = self.state.lock();
        if !state.sessions.contains_key(&id) {
            return Err(SessionError::Expired);
        }
        op(&mut state)
    }
}

/// [`Connector`] over a [`MemoryCluster`].
#[derive(Clone)]
pub struct MemoryConnector {
    cluster: MemoryCluster,
}

impl Connector for MemoryConnector {
    type Session = MemorySession;

    fn connect(
        &self,
        _endpoint: &str,
        _timeout: Duration,
        hook: EventHook,
    ) -> Result<Self::Session, SessionError> {
        self.cluster.open_session(hook)
    }
}

/// One live session against a [`MemoryCluster`].
pub struct MemorySession {
    cluster: MemoryCluster,
    id: SessionId,
}

impl MemorySession {
    /// This session's identity, as recorded into ephemeral owners.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    fn release(&self) {
        let slot = {
            let mut state = self.cluster.state.lock();
            state.reap_ephemerals(self.id);
            state.sessions.remove(&self.id)
        };
        // Dropping the sender ends the delivery thread.
        drop(slot);
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.release();
    }
}

impl SessionOps for MemorySession {
    fn exists(&self, path: &str) -> Result<Option<NodeStat>, SessionError> {
        self.cluster
            .with_live_session(self.id, |state| Ok(state.nodes.get(path).map(MemNode::stat)))
    }

    fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<(), SessionError> {
        let id = self.id;
        self.cluster.with_live_session(id, |state| {
            if state.nodes.contains_key(path) {
                return Err(SessionError::NodeExists);
            }
            let (parent, name) = ClusterState::split(path)?;
            let Some(parent_node) = state.nodes.get(parent) else {
                return Err(SessionError::NoParent);
            };
            if parent_node.owner != 0 {
                return Err(SessionError::Backend(
                    "ephemeral nodes cannot have children".to_string(),
                ));
            }
            let name = name.to_string();
            state.nodes.insert(
                path.to_string(),
                MemNode {
                    data: data.to_vec(),
                    version: 0,
                    owner: id,
                    children: Vec::new(),
                },
            );
            if let Some(parent_node) = state.nodes.get_mut(parent) {
                parent_node.children.push(name);
            }
            Ok(())
        })
    }

    fn set_data(
        &self,
        path: &str,
        data: &[u8],
        expected_version: i32,
    ) -> Result<NodeStat, SessionError> {
        self.cluster.with_live_session(self.id, |state| {
            let Some(node) = state.nodes.get_mut(path) else {
                return Err(SessionError::NoNode);
            };
            if node.version != expected_version {
                return Err(SessionError::BadVersion);
            }
            node.data = data.to_vec();
            node.version += 1;
            Ok(node.stat())
        })
    }

    fn delete(&self, path: &str, expected_version: Option<i32>) -> Result<(), SessionError> {
        self.cluster.with_live_session(self.id, |state| {
            let Some(node) = state.nodes.get(path) else {
                return Err(SessionError::NoNode);
            };
            if let Some(version) = expected_version
                && node.version != version
            {
                return Err(SessionError::BadVersion);
            }
            if !node.children.is_empty() {
                return Err(SessionError::NotEmpty);
            }
            state.remove_node(path);
            Ok(())
        })
    }

    fn get_data(&self, path: &str) -> Result<(Vec<u8>, NodeStat), SessionError> {
        self.cluster.with_live_session(self.id, |state| {
            state
                .nodes
                .get(path)
                .map(|node| (node.data.clone(), node.stat()))
                .ok_or(SessionError::NoNode)
        })
    }

    fn get_children(&self, path: &str) -> Result<Vec<String>, SessionError> {
        self.cluster.with_live_session(self.id, |state| {
            state
                .nodes
                .get(path)
                .map(|node| node.children.clone())
                .ok_or(SessionError::NoNode)
        })
    }

    fn close(self) {
        // Graceful close and drop are the same thing for this backend.
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryCluster, SessionError, SessionOps};
    use crate::session::{Connector, SessionEvent};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn connect(cluster: &MemoryCluster) -> super::MemorySession {
        cluster
            .connector()
            .connect("mem", Duration::from_secs(1), Box::new(|_| {}))
            .expect("connect should succeed")
    }

    #[test]
    fn ephemeral_create_records_owner_and_version_zero() {
        let cluster = MemoryCluster::new();
        cluster.seed("/services", b"").expect("seed");
        let session = connect(&cluster);
        session
            .create_ephemeral("/services/web", b"up")
            .expect("create");
        let stat = session
            .exists("/services/web")
            .expect("exists")
            .expect("present");
        assert_eq!(stat.owner, session.id());
        assert_eq!(stat.version, 0);
        assert_eq!(cluster.data_of("/services/web").as_deref(), Some(&b"up"[..]));
    }

    #[test]
    fn create_without_parent_reports_no_parent() {
        let cluster = MemoryCluster::new();
        let session = connect(&cluster);
        let err = session
            .create_ephemeral("/missing/web", b"")
            .expect_err("must fail");
        assert!(matches!(err, SessionError::NoParent));
    }

    #[test]
    fn versioned_set_rejects_stale_writers() {
        let cluster = MemoryCluster::new();
        cluster.seed("/n", b"v0").expect("seed");
        let session = connect(&cluster);
        session.set_data("/n", b"v1", 0).expect("first write");
        let err = session.set_data("/n", b"v2", 0).expect_err("stale write");
        assert!(matches!(err, SessionError::BadVersion));
    }

    #[test]
    fn expiry_reaps_ephemerals_and_notifies_watcher() {
        let cluster = MemoryCluster::new();
        cluster.seed("/services", b"").expect("seed");
        let expirations = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&expirations);
        let session = cluster
            .connector()
            .connect(
                "mem",
                Duration::from_secs(1),
                Box::new(move |event| {
                    if event == SessionEvent::Expired {
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .expect("connect");
        session.create_ephemeral("/services/web", b"up").expect("create");
        let id = session.id();
        cluster.expire_session(id);

        assert!(!cluster.node_exists("/services/web"), "ephemeral must be reaped");
        // Delivery happens on the session's own thread.
        for _ in 0..100 {
            if expirations.load(Ordering::SeqCst) == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(expirations.load(Ordering::SeqCst), 1);
        let err = session.exists("/services").expect_err("session is dead");
        assert!(matches!(err, SessionError::Expired));
    }

    #[test]
    fn close_releases_ephemerals_immediately() {
        let cluster = MemoryCluster::new();
        cluster.seed("/services", b"").expect("seed");
        let session = connect(&cluster);
        session.create_ephemeral("/services/web", b"up").expect("create");
        session.close();
        assert!(!cluster.node_exists("/services/web"));
    }

    #[test]
    fn offline_cluster_refuses_connections() {
        let cluster = MemoryCluster::new();
        cluster.set_offline(true);
        let err = cluster
            .connector()
            .connect("mem", Duration::from_secs(1), Box::new(|_| {}))
            .map(|_| ())
            .expect_err("must refuse");
        assert!(matches!(err, SessionError::ConnectionLoss(_)));
    }

    #[test]
    fn children_keep_creation_order() {
        let cluster = MemoryCluster::new();
        cluster.seed("/t", b"").expect("seed");
        let session = connect(&cluster);
        for name in ["zeta", "alpha", "mid"] {
            session
                .create_ephemeral(&format!("/t/{name}"), b"")
                .expect("create");
        }
        let children = session.get_children("/t").expect("children");
        assert_eq!(children, vec!["zeta", "alpha", "mid"]);
    }
}
