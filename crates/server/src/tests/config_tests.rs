use super::{load_settings_from, normalize_database_url, prepare_database_url, Settings};

use std::{collections::HashMap, fs, path::Path, time::Duration};

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
}

#[test]
fn empty_database_url_falls_back_to_default() {
    assert_eq!(normalize_database_url("  "), Settings::default().database_url);
}

#[test]
fn keeps_in_memory_urls() {
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
}

#[test]
fn keeps_windows_absolute_path_with_single_sqlite_colon() {
    assert_eq!(
        normalize_database_url("sqlite:C:\\Users\\alice\\test.db"),
        "sqlite:C:/Users/alice/test.db"
    );
}

#[test]
fn converts_sqlite_double_slash_windows_path() {
    assert_eq!(
        normalize_database_url("sqlite://C:/Users/alice/test.db"),
        "sqlite:C:/Users/alice/test.db"
    );
}

#[test]
fn creates_parent_dir_for_sqlite_file() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("data").join("test.db");

    prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare db url");
    assert!(temp_root.path().join("data").exists());
}

#[tokio::test]
async fn prepared_database_url_creates_openable_sqlite_file() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("soul_link.db");

    let prepared = prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare");
    let storage = storage::Storage::new(&prepared).await.expect("open sqlite");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should be created: {}",
        db_path.display()
    );
}

#[test]
fn missing_file_and_empty_env_yield_defaults() {
    let settings = load_settings_from(Path::new("/definitely/not/here.toml"), env_from(&[]));
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.gateway_timeout(), Duration::from_secs(5));
}

#[test]
fn file_values_are_overridden_by_environment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("server.toml");
    fs::write(
        &path,
        r#"
bind_addr = "0.0.0.0:9000"
database_url = "sqlite://./file.db"
gateway_url = "http://bridge.local/api"
gateway_timeout_ms = 1500
initial_general_channel_id = 77
"#,
    )
    .expect("write");

    let settings = load_settings_from(
        &path,
        env_from(&[
            ("DATABASE_URL", "sqlite://./short.db"),
            ("APP__DATABASE_URL", "sqlite://./app.db"),
            ("APP__GATEWAY_TIMEOUT_MS", "250"),
        ]),
    );
    assert_eq!(settings.server_bind, "0.0.0.0:9000");
    assert_eq!(settings.database_url, "sqlite://./app.db");
    assert_eq!(settings.gateway_url.as_deref(), Some("http://bridge.local/api"));
    assert_eq!(settings.gateway_timeout_ms, 250);
    assert_eq!(settings.initial_general_channel_id, Some(77));
}

#[test]
fn invalid_numbers_in_environment_are_ignored() {
    let settings = load_settings_from(
        Path::new("/definitely/not/here.toml"),
        env_from(&[
            ("APP__GATEWAY_TIMEOUT_MS", "soon"),
            ("APP__INITIAL_GENERAL_CHANNEL_ID", "general"),
            ("GATEWAY_URL", ""),
        ]),
    );
    assert_eq!(settings.gateway_timeout_ms, 5_000);
    assert_eq!(settings.initial_general_channel_id, None);
    assert_eq!(settings.gateway_url, None);
}
