#![allow(clippy::unwrap_used, clippy::expect_used)]

use conductor_core::*;
use std::sync::Arc;
use std::thread;

// ---------------------------------------------------------------------------
// 1. Error Display and From impls
// ---------------------------------------------------------------------------

#[test]
fn error_display_and_from_impls() {
    let config_err = ConductorError::Config("bad weights".to_string());
    assert_eq!(config_err.to_string(), "Config error: bad weights");

    let transition = ConductorError::InvalidTransition {
        from: "received".into(),
        to: "completed".into(),
    };
    assert_eq!(transition.to_string(), "Invalid transition: received -> completed");

    let json_err: ConductorError = serde_json::from_str::<serde_json::Value>("{oops")
        .unwrap_err()
        .into();
    assert!(json_err.to_string().starts_with("JSON error:"));
    assert_eq!(json_err.kind(), FailureKind::InvalidValue);
}

// ---------------------------------------------------------------------------
// 2. Shared config swaps are visible to readers on other threads
// ---------------------------------------------------------------------------

#[test]
fn shared_config_visible_across_threads() {
    let shared = Arc::new(SharedConfig::new(ConfigSnapshot::default()).unwrap());
    let before = shared.snapshot();

    let writer = {
        let shared = Arc::clone(&shared);
        thread::spawn(move || {
            shared
                .replace(ConfigSnapshot {
                    agents: vec![AgentDescriptor::new("late", "joined later")],
                    ..Default::default()
                })
                .unwrap();
        })
    };
    writer.join().unwrap();

    // A snapshot taken earlier is unaffected by the swap.
    assert!(before.agents.is_empty());
    assert_eq!(shared.snapshot().agents[0].id, "late");
}

// ---------------------------------------------------------------------------
// 3. Target serialization is tagged
// ---------------------------------------------------------------------------

#[test]
fn target_serializes_tagged() {
    let json = serde_json::to_value(Target::Tool("web_search".into())).unwrap();
    assert_eq!(json, serde_json::json!({"kind": "tool", "id": "web_search"}));
}
