//! Integration tests for state file persistence across invocations.

use tempfile::TempDir;

use kafka_fleet_scan::config::StateConfig;
use kafka_fleet_scan::domain::cluster::{DiscoveredCluster, Region, State};
use kafka_fleet_scan::domain::topic::{TopicDetails, Topics};
use kafka_fleet_scan::infrastructure::persistence::state_store::StateStore;

fn topics(names: &[&str]) -> Topics {
    Topics::from_details(
        names
            .iter()
            .map(|name| TopicDetails {
                name: name.to_string(),
                partitions: 3,
                replication_factor: 3,
                configurations: Default::default(),
            })
            .collect(),
    )
}

fn region(name: &str, topic_names: &[&str]) -> Region {
    let mut cluster = DiscoveredCluster {
        name: format!("{name}-cluster"),
        arn: format!("arn:aws:kafka:{name}:123456789012:cluster/{name}-cluster/uuid"),
        region: name.to_string(),
        ..Default::default()
    };
    cluster.kafka_admin_client_information.topics = topics(topic_names);
    Region {
        name: name.to_string(),
        clusters: vec![cluster],
    }
}

#[tokio::test]
async fn test_upsert_leaves_other_regions_byte_identical() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path().join("state.json"), &StateConfig::default());

    let mut state = State::default();
    state.upsert_region(region("us-east-1", &["orders", "payments"]));
    state.upsert_region(region("eu-west-1", &["clicks"]));
    store.save_with_retry(&state).await.unwrap();
    let before = std::fs::read_to_string(store.path()).unwrap();

    let mut state = store.load().unwrap();
    state.upsert_region(region("eu-west-1", &["views"]));
    store.save_with_retry(&state).await.unwrap();
    let after = std::fs::read_to_string(store.path()).unwrap();

    let second_region = before.find("\"Name\": \"eu-west-1\"").unwrap();
    assert_eq!(&before[..second_region], &after[..second_region]);
    assert_ne!(before, after);
}

#[tokio::test]
async fn test_new_region_is_appended_after_existing_bytes() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path().join("state.json"), &StateConfig::default());

    let mut state = State::default();
    state.upsert_region(region("eu-west-1", &["clicks"]));
    store.save_with_retry(&state).await.unwrap();
    let before = std::fs::read_to_string(store.path()).unwrap();

    let mut state = store.load().unwrap();
    state.upsert_region(region("us-east-1", &["orders"]));
    store.save_with_retry(&state).await.unwrap();
    let after = std::fs::read_to_string(store.path()).unwrap();

    let existing = before.strip_suffix("\n  ]\n}\n").unwrap();
    assert!(after.starts_with(existing));
    assert!(after[existing.len()..].contains("\"Name\": \"us-east-1\""));
}

#[tokio::test]
async fn test_rescan_replaces_topic_list() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::new(dir.path().join("state.json"), &StateConfig::default());

    let mut state = State::default();
    state.upsert_region(region("us-east-1", &["orders", "payments"]));
    store.save_with_retry(&state).await.unwrap();

    let mut state = store.load().unwrap();
    state.upsert_region(region("us-east-1", &["refunds"]));
    store.save_with_retry(&state).await.unwrap();

    let loaded = store.load().unwrap();
    let topic_names: Vec<&str> = loaded.regions[0].clusters[0]
        .kafka_admin_client_information
        .topics
        .details
        .iter()
        .map(|t| t.name.as_str())
        .collect();
    assert_eq!(topic_names, vec!["refunds"]);
    assert_eq!(
        loaded.regions[0].clusters[0]
            .kafka_admin_client_information
            .topics
            .summary
            .topics,
        1
    );
}

#[test]
fn test_second_invocation_is_refused_while_locked() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    let first = StateStore::new(&path, &StateConfig::default());
    let second = StateStore::new(&path, &StateConfig::default());

    let lock = first.lock().unwrap();
    assert!(second.lock().is_err());
    drop(lock);
    assert!(second.lock().is_ok());
}
