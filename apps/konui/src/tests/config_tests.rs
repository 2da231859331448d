use std::fs;

use config::Environment;
use shared::domain::ExportScope;

use super::{load_settings, load_with_env, Settings};

fn env_from(pairs: &[(&str, &str)]) -> Environment {
    let source = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    Environment::with_prefix("KONUI")
        .separator("__")
        .source(Some(source))
}

#[test]
fn defaults_apply_without_file_or_env() {
    let settings = load_with_env(None, env_from(&[])).expect("settings");
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.progress_base_delay_ms, 800);
    assert_eq!(settings.export_options().scope, ExportScope::Isolated);
}

#[test]
fn file_values_override_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("custom.toml");
    fs::write(
        &path,
        "konsave_bin = \"/opt/konsave/bin/konsave\"\nisolate_exports = false\nexport_dir = \"/srv/themes\"\n",
    )
    .expect("write config");

    let settings = load_with_env(Some(&path), env_from(&[])).expect("settings");
    assert_eq!(settings.konsave_bin, "/opt/konsave/bin/konsave");
    assert_eq!(settings.export_dir, std::path::PathBuf::from("/srv/themes"));
    assert_eq!(settings.export_options().scope, ExportScope::Shared);
    assert_eq!(settings.log_filter, "info");
}

#[test]
fn environment_overrides_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("konui.toml");
    fs::write(&path, "progress_base_delay_ms = 100\nshutdown_timeout_secs = 3\n")
        .expect("write config");

    let settings = load_with_env(
        Some(&path),
        env_from(&[
            ("KONUI__PROGRESS_BASE_DELAY_MS", "5"),
            ("KONUI__LOG_FILTER", "debug"),
        ]),
    )
    .expect("settings");
    assert_eq!(settings.progress_base_delay_ms, 5);
    assert_eq!(settings.shutdown_timeout_secs, 3);
    assert_eq!(settings.log_filter, "debug");
    assert_eq!(
        settings.export_options().schedule.base(),
        std::time::Duration::from_millis(5)
    );
}

#[test]
fn explicit_config_path_must_exist() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("nope.toml");
    assert!(load_settings(Some(&missing)).is_err());
}
