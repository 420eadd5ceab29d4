//! ZooKeeper backend: a thin adapter over the `zookeeper` crate.
//!
//! The wire protocol, internal retries on transient disconnects, and watch
//! delivery all live in the client library; this module only translates
//! between its types and the [`Connector`]/[`SessionOps`] seam.

use std::time::Duration;

use log::debug;
use zookeeper::{Acl, CreateMode, KeeperState, WatchedEvent, Watcher, ZkError, ZooKeeper};

use super::{Connector, EventHook, NodeStat, SessionError, SessionEvent, SessionOps};

struct HookWatcher {
    hook: EventHook,
}

impl Watcher for HookWatcher {
    fn handle(&self, event: WatchedEvent) {
        debug!("session event: {event:?}");
        let mapped = match event.keeper_state {
            KeeperState::SyncConnected => SessionEvent::Connected,
            KeeperState::Disconnected => SessionEvent::Disconnected,
            KeeperState::Expired => SessionEvent::Expired,
            _ => return,
        };
        (self.hook)(mapped);
    }
}

/// [`Connector`] producing real ZooKeeper sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZkConnector;

impl Connector for ZkConnector {
    type Session = ZkSession;

    fn connect(
        &self,
        endpoint: &str,
        timeout: Duration,
        hook: EventHook,
    ) -> Result<Self::Session, SessionError> {
        let zk = ZooKeeper::connect(endpoint, timeout, HookWatcher { hook })
            .map_err(map_error)?;
        Ok(ZkSession { zk })
    }
}

/// One live ZooKeeper session.
pub struct ZkSession {
    zk: ZooKeeper,
}

impl SessionOps for ZkSession {
    fn exists(&self, path: &str) -> Result<Option<NodeStat>, SessionError> {
        match self.zk.exists(path, false) {
            Ok(stat) => Ok(stat.map(|stat| to_stat(&stat))),
            Err(err) => Err(map_error(err)),
        }
    }

    fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<(), SessionError> {
        match self
            .zk
            .create(path, data.to_vec(), Acl::open_unsafe().clone(), CreateMode::Ephemeral)
        {
            Ok(_) => Ok(()),
            // NoNode from create means the parent is missing.
            Err(ZkError::NoNode) => Err(SessionError::NoParent),
            Err(err) => Err(map_error(err)),
        }
    }

    fn set_data(
        &self,
        path: &str,
        data: &[u8],
        expected_version: i32,
    ) -> Result<NodeStat, SessionError> {
        self.zk
            .set_data(path, data.to_vec(), Some(expected_version))
            .map(|stat| to_stat(&stat))
            .map_err(map_error)
    }

    fn delete(&self, path: &str, expected_version: Option<i32>) -> Result<(), SessionError> {
        self.zk.delete(path, expected_version).map_err(map_error)
    }

    fn get_data(&self, path: &str) -> Result<(Vec<u8>, NodeStat), SessionError> {
        self.zk
            .get_data(path, false)
            .map(|(data, stat)| (data, to_stat(&stat)))
            .map_err(map_error)
    }

    fn get_children(&self, path: &str) -> Result<Vec<String>, SessionError> {
        self.zk.get_children(path, false).map_err(map_error)
    }

    fn close(self) {
        if let Err(err) = self.zk.close() {
            debug!("session close failed: {err:?}");
        }
    }
}

fn to_stat(stat: &zookeeper::Stat) -> NodeStat {
    NodeStat {
        version: stat.version,
        owner: stat.ephemeral_owner,
        data_len: usize::try_from(stat.data_length).unwrap_or_default(),
        num_children: u32::try_from(stat.num_children).unwrap_or_default(),
    }
}

fn map_error(err: ZkError) -> SessionError {
    match err {
        ZkError::NoNode => SessionError::NoNode,
        ZkError::NodeExists => SessionError::NodeExists,
        ZkError::BadVersion => SessionError::BadVersion,
        ZkError::NotEmpty => SessionError::NotEmpty,
        ZkError::SessionExpired => SessionError::Expired,
        ZkError::ConnectionLoss | ZkError::OperationTimeout => {
            SessionError::ConnectionLoss(format!("{err:?}"))
        }
        other => SessionError::Backend(format!("{other:?}")),
    }
}
