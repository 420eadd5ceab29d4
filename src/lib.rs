//! zkbeacon: a liveness heartbeat agent for ZooKeeper-style coordination trees.
//!
//! The agent runs a program on a fixed interval and publishes its stdout into
//! an ephemeral node, so the node's existence tracks the host's liveness and
//! its content carries the latest report. A companion snapshot mode dumps a
//! subtree to a file or a directory mirror.
//!
//! Layout:
//! - [`core`]: configuration and error types.
//! - [`session`]: the coordination-backend seam, with an in-memory backend
//!   for tests and a real ZooKeeper backend behind the `zk` feature.
//! - [`exec`]: bounded subprocess execution with a kill-after-grace watchdog.
//! - [`monitor`]: the ephemeral-node state machine and subtree walker.
//! - [`driver`]: the heartbeat loop and the snapshot dumper.

pub mod core;
pub mod driver;
pub mod exec;
pub mod monitor;
pub mod session;

#[cfg(feature = "cli")]
pub mod cli_app;
