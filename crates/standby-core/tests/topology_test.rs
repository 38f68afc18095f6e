//! Topology registry driven from TOML configuration

use parking_lot::Mutex;
use standby_core::config::StandbyConfig;
use standby_core::testing::RecordingListener;
use standby_core::topology::{Node, TopologyRegistry};
use standby_core::{Error, ReplicationCore};
use std::sync::Arc;

const CLUSTER: &str = r#"
    [cluster]
    this_server = "a"

    [[cluster.servers]]
    name = "a"
    host = "alpha.local"
    port = 9410

    [[cluster.servers]]
    name = "b"
    host = "beta.local"
    bind = "192.168.1.2"
    port = 9410

    [[cluster.servers]]
    name = "c"
    host = "gamma.local"
    port = 9411

    [[cluster.groups]]
    name = "stripe-1"
    members = ["a", "b"]

    [[cluster.groups]]
    name = "stripe-2"
    members = ["c"]
"#;

fn registry() -> TopologyRegistry {
    let config = StandbyConfig::from_toml_str(CLUSTER).unwrap();
    TopologyRegistry::from_cluster(config.cluster).unwrap()
}

#[test]
fn test_members_from_config() {
    let registry = registry();
    let members = registry.all_members().unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(members[0].node_name(), "alpha.local:9410");
    assert!(registry.is_member("b"));
    assert!(!registry.is_member("c"));
}

#[test]
fn test_lookups() {
    let registry = registry();
    assert_eq!(registry.server_name_for("alpha.local:9410").as_deref(), Some("a"));
    assert_eq!(registry.server_name_for("192.168.1.2:9410").as_deref(), Some("b"));
    assert_eq!(registry.group_name_for("gamma.local:9411").as_deref(), Some("stripe-2"));
    assert_eq!(registry.group_name_for("unknown:1"), None);
}

#[test]
fn test_round_trip_delta_restores_members() {
    let registry = registry();
    let before = registry.all_members().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let listener = Arc::new(RecordingListener::labelled("watcher", log.clone()));
    registry.register_listener(listener.clone());

    let x = Node::new("x", "delta.local", 9500, 9520);
    registry.apply_delta(vec![x.clone()], Vec::new()).unwrap();
    registry.apply_delta(Vec::new(), vec![x]).unwrap();

    assert_eq!(registry.all_members().unwrap(), before);
    assert_eq!(listener.changes().len(), 2);
    assert_eq!(log.lock().len(), 2);
}

#[test]
fn test_removing_everyone_leaves_an_invariant_violation() {
    let registry = registry();
    let everyone = registry.all_members().unwrap();
    registry.apply_delta(Vec::new(), everyone).unwrap();
    assert!(matches!(registry.all_members(), Err(Error::InvariantViolation(_))));
}

#[test]
fn test_core_tracks_new_passives() {
    let ctx = standby_core::testing::TestContext::new();
    let config = StandbyConfig::from_toml_str(CLUSTER)
        .unwrap()
        .with_data_dir(ctx.ledger_dir());
    let core = ReplicationCore::open(config).unwrap();

    assert_eq!(core.sync_targets().pending(), vec!["b"]);
    core.topology()
        .apply_delta(vec![Node::new("c", "gamma.local", 9411, 9431)], Vec::new())
        .unwrap();
    assert!(core.sync_targets().needs_sync("c"));
    assert!(core.topology().is_member_of_this_group("c"));
}
