#![allow(missing_docs)]

//! Property tests for the subtree walk: every node is visited exactly once,
//! content is reported verbatim, and the walk always terminates with `Done`.

use std::collections::BTreeMap;
use std::time::Duration;

use proptest::prelude::*;

use zkbeacon::monitor::{Monitor, SnapshotEvent};
use zkbeacon::session::memory::{MemoryCluster, MemoryConnector};

fn monitor(cluster: &MemoryCluster) -> Monitor<MemoryConnector> {
    Monitor::init(
        cluster.connector(),
        "mem",
        "/root",
        Duration::from_millis(5000),
    )
    .expect("connect")
}

/// Seed `/root/{rel}` for every relative path and return the full expected
/// node map, including implicitly created ancestors with empty content.
fn seed_tree(
    cluster: &MemoryCluster,
    rel_paths: &std::collections::BTreeSet<String>,
) -> BTreeMap<String, Vec<u8>> {
    let mut expected: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    expected.insert("/root".to_string(), Vec::new());
    cluster.seed("/root", b"").expect("seed root");
    // BTreeSet order guarantees ancestors listed in the set are seeded with
    // their own content before a descendant creates them empty.
    for rel in rel_paths {
        let abs = format!("/root/{rel}");
        let mut at = String::from("/root");
        for segment in rel.split('/') {
            at.push('/');
            at.push_str(segment);
            expected.entry(at.clone()).or_default();
        }
        cluster.seed(&abs, abs.as_bytes()).expect("seed node");
        expected.insert(abs.clone(), abs.into_bytes());
    }
    expected
}

proptest! {
    #[test]
    fn walk_visits_every_node_exactly_once_then_reports_done(
        rel_paths in prop::collection::btree_set("[a-z]{1,4}(/[a-z]{1,4}){0,2}", 1..16),
    ) {
        let cluster = MemoryCluster::new();
        let mut expected = seed_tree(&cluster, &rel_paths);
        let monitor = monitor(&cluster);

        let events: Vec<SnapshotEvent> = monitor.snapshot("/root").collect();
        prop_assert_eq!(events.len(), expected.len() + 1, "items plus one Done");

        let (last, items) = events.split_last().expect("non-empty");
        prop_assert_eq!(last, &SnapshotEvent::Done);
        for event in items {
            let SnapshotEvent::Item { parent, name, data } = event else {
                return Err(TestCaseError::fail(format!("unexpected event {event:?}")));
            };
            let abs = format!("{parent}/{name}");
            match expected.remove(&abs) {
                Some(want) => prop_assert_eq!(data, &want, "content of {}", abs),
                None => {
                    return Err(TestCaseError::fail(format!("{abs} visited twice or unknown")));
                }
            }
        }
        prop_assert!(expected.is_empty(), "unvisited nodes: {:?}", expected.keys());
        monitor.term();
    }

    #[test]
    fn abandoned_walk_leaves_the_monitor_usable(
        rel_paths in prop::collection::btree_set("[a-z]{1,4}(/[a-z]{1,4}){0,2}", 2..12),
        keep in 1usize..4,
    ) {
        let cluster = MemoryCluster::new();
        seed_tree(&cluster, &rel_paths);
        let monitor = monitor(&cluster);

        let seen: Vec<SnapshotEvent> = monitor.snapshot("/root").take(keep).collect();
        prop_assert!(
            seen.iter().all(|event| matches!(event, SnapshotEvent::Item { .. })),
            "non-item event in a partial walk: {:?}",
            seen
        );

        // The abandoned iterator released the session; a fresh walk still
        // covers the full tree.
        let full: Vec<SnapshotEvent> = monitor.snapshot("/root").collect();
        prop_assert_eq!(full.last(), Some(&SnapshotEvent::Done));
        monitor.term();
    }
}
