use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

use zalo_advisor::config::{
    validate_settings, Settings, SettingsSection, SettingsStore, DEFAULT_MODEL,
};

fn read_file(store: &SettingsStore) -> serde_json::Value {
    let raw = std::fs::read_to_string(store.path()).unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[test]
fn builtin_defaults_are_valid() {
    assert!(validate_settings(&Settings::default()).is_empty());
}

#[tokio::test]
async fn concurrent_disjoint_updates_both_land() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SettingsStore::load(dir.path().join("app_config.json")));

    let a = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .update(json!({"agent_config": {"system_prompt": "Be brief."}}))
                .await
        })
    };
    let b = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .update(json!({"zalo_config": {"oa": {"welcome_message": "Chào bạn!"}}}))
                .await
        })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let snapshot = store.snapshot();
    assert_eq!(snapshot.agent_config.system_prompt, "Be brief.");
    assert_eq!(snapshot.zalo_config.oa.welcome_message, "Chào bạn!");

    let on_disk = read_file(&store);
    assert_eq!(on_disk["agent_config"]["system_prompt"], "Be brief.");
    assert_eq!(on_disk["zalo_config"]["oa"]["welcome_message"], "Chào bạn!");
}

#[tokio::test]
async fn patch_leaves_other_subtrees_identical() {
    let dir = TempDir::new().unwrap();
    let store = SettingsStore::load(dir.path().join("app_config.json"));
    store
        .update(json!({"zalo_config": {"personal": {"phone": "0900000000"}}}))
        .await
        .unwrap();
    let before = read_file(&store);

    store
        .update(json!({"agent_config": {"model": {"temperature": 0.2}}}))
        .await
        .unwrap();
    let after = read_file(&store);

    assert_eq!(
        serde_json::to_string(&before["zalo_config"]).unwrap(),
        serde_json::to_string(&after["zalo_config"]).unwrap()
    );
    assert_eq!(before["agent_config"]["tools"], after["agent_config"]["tools"]);
    assert_eq!(after["agent_config"]["model"]["name"], DEFAULT_MODEL);
    assert_eq!(after["agent_config"]["model"]["temperature"], 0.2);
}

#[tokio::test]
async fn change_events_name_touched_sections() {
    let dir = TempDir::new().unwrap();
    let store = SettingsStore::load(dir.path().join("app_config.json"));
    let mut changes = store.subscribe();

    store
        .update(json!({"zalo_config": {"personal": {"enabled": true, "phone": "0900000000"}}}))
        .await
        .unwrap();

    let change = changes.recv().await.unwrap();
    assert_eq!(change.sections, vec![SettingsSection::ZaloPersonal]);
    assert!(!change.previous.zalo_config.personal.enabled);
    assert!(change.current.zalo_config.personal.enabled);
}

#[tokio::test]
async fn invalid_patch_reports_every_path() {
    let dir = TempDir::new().unwrap();
    let store = SettingsStore::load(dir.path().join("app_config.json"));

    let err = store
        .update(json!({
            "agent_config": {
                "model": {"temperature": 5.0, "max_tokens": 0},
                "max_tool_iterations": 0
            }
        }))
        .await
        .unwrap_err();

    let mut paths: Vec<_> = err.validation_errors().iter().map(|e| e.path.clone()).collect();
    paths.sort();
    assert_eq!(
        paths,
        vec![
            "agent_config.max_tool_iterations",
            "agent_config.model.max_tokens",
            "agent_config.model.temperature",
        ]
    );
    assert_eq!(store.snapshot().agent_config.model.temperature, Settings::default().agent_config.model.temperature);
}
