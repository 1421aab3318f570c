//! Tests for layered configuration loading.

use super::*;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Write JSON5 contents to a path, creating parent directories if needed.
fn write_json5(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("dir");
    }
    fs::write(path, contents).expect("write");
}

/// Verify that a minimal config parses with defaults.
#[test]
fn parse_minimal_config() {
    let config = MembotConfig::load_from_str("{}").expect("config");
    assert_eq!(config.memory.capacity, 3);
    assert_eq!(config.memory.batch_threshold, 3);
    assert_eq!(config.memory.flush_interval_seconds, 1.0);
    assert_eq!(config.memory.namespace, "user_1");
    assert_eq!(config.session.thread_id, "user_1_thread");
}

/// JSON5 syntax such as comments and trailing commas is accepted.
#[test]
fn parse_json5_memory_block() {
    let json5 = r#"{
        // keep a short window
        memory: { capacity: 5, batch_threshold: 2, flush_interval_seconds: 0.25, },
        session: { thread_id: "alice_thread" },
    }"#;
    let config = MembotConfig::load_from_str(json5).expect("config");
    assert_eq!(config.memory.capacity, 5);
    assert_eq!(config.memory.batch_threshold, 2);
    assert_eq!(
        config.memory.flush_interval(),
        std::time::Duration::from_millis(250)
    );
    assert_eq!(config.session.thread_id, "alice_thread");
}

/// Reject unexpected top-level config keys.
#[test]
fn rejects_unknown_top_level_key() {
    let err = MembotConfig::load_from_str(r#"{ unexpected: true }"#).unwrap_err();
    assert!(format!("{err}").contains("unknown key"));
}

/// Reject values of the wrong type with the offending path.
#[test]
fn rejects_wrong_value_type() {
    let err = MembotConfig::load_from_str(r#"{ memory: { capacity: "three" } }"#).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("memory.capacity"));
}

/// Zero capacity and threshold are rejected by semantic validation.
#[test]
fn rejects_zero_capacity_and_threshold() {
    let err = MembotConfig::load_from_str(r#"{ memory: { capacity: 0 } }"#).unwrap_err();
    assert!(format!("{err}").contains("memory.capacity"));

    let err = MembotConfig::load_from_str(r#"{ memory: { batch_threshold: 0 } }"#).unwrap_err();
    assert!(format!("{err}").contains("memory.batch_threshold"));
}

/// The flush interval must be strictly positive.
#[test]
fn rejects_non_positive_interval() {
    let err =
        MembotConfig::load_from_str(r#"{ memory: { flush_interval_seconds: 0 } }"#).unwrap_err();
    assert!(format!("{err}").contains("flush_interval_seconds"));

    let err =
        MembotConfig::load_from_str(r#"{ memory: { flush_interval_seconds: -1.5 } }"#).unwrap_err();
    assert!(format!("{err}").contains("flush_interval_seconds"));
}

/// Blank namespaces are rejected.
#[test]
fn rejects_blank_namespace() {
    let err = MembotConfig::load_from_str(r#"{ memory: { namespace: "  " } }"#).unwrap_err();
    assert!(format!("{err}").contains("memory.namespace"));
}

/// Builder overrides land in the built config.
#[test]
fn builder_applies_overrides() {
    let config = MembotConfig::builder()
        .capacity(10)
        .batch_threshold(4)
        .namespace("bob")
        .thread_id("bob_thread")
        .build();
    assert_eq!(config.memory.capacity, 10);
    assert_eq!(config.memory.batch_threshold, 4);
    assert_eq!(config.memory.namespace, "bob");
    assert_eq!(config.session.thread_id, "bob_thread");
    config.validate().expect("valid");
}

/// Later layers override earlier ones key by key.
#[test]
fn layered_config_merges_in_precedence_order() {
    let temp = TempDir::new().expect("tmp");
    let root = temp.path();
    let project_root = root.join("project");
    fs::create_dir_all(project_root.join(".git")).expect("git");
    let cwd = project_root.join("subdir");
    fs::create_dir_all(&cwd).expect("cwd");

    let user_config = root.join("user.json5");
    write_json5(
        &user_config,
        "{ memory: { capacity: 7, namespace: \"user\" }, session: { thread_id: \"user_thread\" } }",
    );
    write_json5(
        &project_root.join(DEFAULT_CONFIG_FILE),
        "{ memory: { namespace: \"project\" } }",
    );
    write_json5(
        &cwd.join(DEFAULT_CONFIG_FILE),
        "{ memory: { namespace: \"cwd\", batch_threshold: 5 } }",
    );
    write_json5(
        &project_root
            .join(DEFAULT_CONFIG_DIR)
            .join(DEFAULT_CONFIG_FILE),
        "{ memory: { namespace: \"repo\" } }",
    );

    let options = LayeredConfigOptions::new(&cwd).with_user_path(Some(user_config));
    let layered = MembotConfig::load_layered_with_options(options).expect("layered");

    assert_eq!(layered.config.memory.capacity, 7);
    assert_eq!(layered.config.memory.batch_threshold, 5);
    assert_eq!(layered.config.memory.namespace, "repo");
    assert_eq!(layered.config.session.thread_id, "user_thread");
    let sources: Vec<ConfigLayerSource> = layered.layers.iter().map(|l| l.source).collect();
    assert_eq!(
        sources,
        vec![
            ConfigLayerSource::User,
            ConfigLayerSource::Project,
            ConfigLayerSource::Cwd,
            ConfigLayerSource::Repo,
        ]
    );
}

/// Runtime overrides win over every discovered layer.
#[test]
fn runtime_layer_has_highest_precedence() {
    let temp = TempDir::new().expect("tmp");
    let cwd = temp.path().join("work");
    fs::create_dir_all(&cwd).expect("cwd");
    write_json5(
        &cwd.join(DEFAULT_CONFIG_FILE),
        "{ memory: { capacity: 4 } }",
    );
    let runtime = temp.path().join("override.json5");
    write_json5(&runtime, "{ memory: { capacity: 9 } }");

    let options = LayeredConfigOptions::new(&cwd)
        .with_user_path(None)
        .with_runtime_path(&runtime);
    let layered = MembotConfig::load_layered_with_options(options).expect("layered");
    assert_eq!(layered.config.memory.capacity, 9);
    assert_eq!(layered.layers.last().map(|l| l.source), Some(ConfigLayerSource::Runtime));
}

/// A missing runtime layer is an error, unlike discovered layers.
#[test]
fn missing_runtime_layer_fails() {
    let temp = TempDir::new().expect("tmp");
    let options = LayeredConfigOptions::new(temp.path())
        .with_user_path(None)
        .with_runtime_path(temp.path().join("missing.json5"));
    let err = MembotConfig::load_layered_with_options(options).unwrap_err();
    assert!(matches!(err, ConfigError::ReadFailed(_)));
}

/// A layer with an invalid key fails the whole load.
#[test]
fn invalid_layer_is_reported() {
    let temp = TempDir::new().expect("tmp");
    write_json5(
        &temp.path().join(DEFAULT_CONFIG_FILE),
        "{ memory: { size: 3 } }",
    );
    let options = LayeredConfigOptions::new(temp.path()).with_user_path(None);
    let err = MembotConfig::load_layered_with_options(options).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("memory.size"));
    assert!(msg.contains("unknown key"));
}
