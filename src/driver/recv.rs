//! Snapshot dump: stream one subtree walk into a file or a directory mirror.
//!
//! The whole dump is a single walk; the first unrecoverable error fails the
//! operation outright — a partial snapshot is never reported as success.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use log::{debug, info};

use crate::core::config::RecvSettings;
use crate::core::errors::{BeaconError, Result};
use crate::monitor::{Monitor, SnapshotEvent};
use crate::session::Connector;

/// Where the dump goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// One interleaved file: a `parentpath/name|bytelength` text line, the
    /// raw content bytes, a trailing newline, per node. Empty nodes are
    /// skipped.
    File,
    /// A mirrored directory tree: one directory per node, content in a
    /// sibling file suffixed `.data`. Empty nodes get a directory only.
    Tree,
}

/// Dump the subtree at `settings.path` to `output`. An output of `-` with
/// [`Layout::File`] streams to stdout.
pub fn run<C: Connector>(
    connector: C,
    settings: &RecvSettings,
    layout: Layout,
    output: &Path,
) -> Result<()> {
    settings.validate()?;
    let monitor = Monitor::init(
        connector,
        &settings.endpoint,
        &settings.path,
        settings.session_timeout,
    )?;
    let result = dump(&monitor, &settings.path, layout, output);
    monitor.term();
    result
}

fn dump<C: Connector>(
    monitor: &Monitor<C>,
    path: &str,
    layout: Layout,
    output: &Path,
) -> Result<()> {
    match layout {
        Layout::File => {
            if output.as_os_str() == "-" {
                let stdout = io::stdout();
                stream_file(monitor, path, &mut stdout.lock())
            } else {
                let mut file =
                    fs::File::create(output).map_err(|source| BeaconError::io(output, source))?;
                stream_file(monitor, path, &mut file)
            }
        }
        Layout::Tree => {
            fs::create_dir_all(output).map_err(|source| BeaconError::io(output, source))?;
            mirror_tree(monitor, path, output)
        }
    }
}

fn stream_file<C: Connector>(
    monitor: &Monitor<C>,
    path: &str,
    out: &mut impl Write,
) -> Result<()> {
    let mut items = 0usize;
    for event in monitor.snapshot(path) {
        match event {
            SnapshotEvent::Item { parent, name, data } => {
                items += 1;
                if data.is_empty() {
                    continue;
                }
                write_record(out, &parent, &name, &data)
                    .map_err(|source| BeaconError::io("<output>", source))?;
            }
            SnapshotEvent::Done => {
                info!("dumped {items} nodes from {path}");
                return Ok(());
            }
            SnapshotEvent::Fail { path, details } => {
                return Err(BeaconError::Snapshot { path, details });
            }
        }
    }
    Ok(())
}

fn write_record(out: &mut impl Write, parent: &str, name: &str, data: &[u8]) -> io::Result<()> {
    writeln!(out, "{parent}/{name}|{}", data.len())?;
    out.write_all(data)?;
    writeln!(out)
}

fn mirror_tree<C: Connector>(monitor: &Monitor<C>, path: &str, root: &Path) -> Result<()> {
    let mut items = 0usize;
    for event in monitor.snapshot(path) {
        match event {
            SnapshotEvent::Item { parent, name, data } => {
                items += 1;
                let rel = node_rel_path(&parent, &name);
                let dir = root.join(&rel);
                fs::create_dir_all(&dir).map_err(|source| BeaconError::io(&dir, source))?;
                if !data.is_empty() {
                    let file = root.join(format!("{rel}.data"));
                    fs::write(&file, &data).map_err(|source| BeaconError::io(&file, source))?;
                    debug!("wrote {} bytes to {}", data.len(), file.display());
                }
            }
            SnapshotEvent::Done => {
                info!("mirrored {items} nodes from {path} under {}", root.display());
                return Ok(());
            }
            SnapshotEvent::Fail { path, details } => {
                return Err(BeaconError::Snapshot { path, details });
            }
        }
    }
    Ok(())
}

/// Relative filesystem location for a node, without the leading slash.
fn node_rel_path(parent: &str, name: &str) -> String {
    let joined = if parent.is_empty() && name.is_empty() {
        String::new()
    } else {
        format!("{parent}/{name}")
    };
    joined.trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::{Layout, run};
    use crate::core::config::RecvSettings;
    use crate::session::memory::MemoryCluster;
    use std::path::Path;
    use std::time::Duration;

    fn settings(path: &str) -> RecvSettings {
        RecvSettings {
            endpoint: "mem".to_string(),
            path: path.to_string(),
            session_timeout: Duration::from_millis(5000),
        }
    }

    fn seeded_cluster() -> MemoryCluster {
        let cluster = MemoryCluster::new();
        cluster.seed("/app", b"root").expect("seed");
        cluster.seed("/app/empty", b"").expect("seed");
        cluster.seed("/app/leaf", b"payload").expect("seed");
        cluster
    }

    #[test]
    fn file_layout_writes_header_bytes_and_newline_per_node() {
        let cluster = seeded_cluster();
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("dump.txt");
        run(cluster.connector(), &settings("/app"), Layout::File, &out).expect("dump");

        let raw = std::fs::read(&out).expect("read dump");
        let text = String::from_utf8(raw).expect("utf8 fixture");
        assert!(text.contains("/app|4\nroot\n"), "missing root record: {text:?}");
        assert!(
            text.contains("/app/leaf|7\npayload\n"),
            "missing leaf record: {text:?}"
        );
        // Empty nodes produce no record at all.
        assert!(!text.contains("empty"), "empty node must be skipped: {text:?}");
    }

    #[test]
    fn tree_layout_mirrors_directories_and_data_files() {
        let cluster = seeded_cluster();
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("mirror");
        run(cluster.connector(), &settings("/app"), Layout::Tree, &out).expect("dump");

        assert!(out.join("app").is_dir());
        assert!(out.join("app/empty").is_dir());
        assert!(out.join("app/leaf").is_dir());
        assert_eq!(
            std::fs::read(out.join("app.data")).expect("root data"),
            b"root"
        );
        assert_eq!(
            std::fs::read(out.join("app/leaf.data")).expect("leaf data"),
            b"payload"
        );
        assert!(
            !out.join("app/empty.data").exists(),
            "empty node must not get a data file"
        );
    }

    #[test]
    fn missing_subtree_fails_with_nonzero_wrapped_error() {
        let cluster = MemoryCluster::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("dump.txt");
        let err = run(cluster.connector(), &settings("/absent"), Layout::File, &out)
            .expect_err("must fail");
        assert_eq!(err.code(), "ZKB-2003");
    }

    #[test]
    fn relative_source_path_is_rejected_before_connecting() {
        let cluster = MemoryCluster::new();
        let err = run(
            cluster.connector(),
            &settings("app"),
            Layout::File,
            Path::new("-"),
        )
        .expect_err("must refuse");
        assert_eq!(err.code(), "ZKB-1001");
    }
}
