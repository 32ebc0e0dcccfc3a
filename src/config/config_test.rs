use serial_test::serial;
use temp_env::with_vars;

use super::*;

fn cleanup_all_realtime_env_vars() {
    for (key, _) in std::env::vars() {
        if key.starts_with("REALTIME__") || key == "CONFIG_PATH" {
            std::env::remove_var(&key);
        }
    }
}

#[test]
#[serial]
fn default_config_should_initialize_with_hardcoded_values() {
    let config = ClientConfig::default();

    assert_eq!(config.channel.attach_timeout_ms, 10_000);
    assert_eq!(config.channel.detach_timeout_ms, 10_000);
    assert!(config.channel.attach_on_subscribe);
    assert!(config.channel.queue_messages);
    assert!(!config.channel.idempotent_publishing);
    assert_eq!(config.retry.base_delay_ms, 15_000);
    assert!(config.presence.wait_for_sync);
}

#[test]
#[serial]
fn new_should_merge_environment_overrides() {
    cleanup_all_realtime_env_vars();
    with_vars(
        vec![
            ("REALTIME__CHANNEL__ATTACH_TIMEOUT_MS", Some("2500")),
            ("REALTIME__RETRY__JITTER", Some("0")),
        ],
        || {
            let config = ClientConfig::new().unwrap();

            assert_eq!(config.channel.attach_timeout_ms, 2500);
            assert_eq!(config.retry.jitter, 0.0);
        },
    );
}

#[test]
#[serial]
fn with_override_config_should_merge_file_settings() {
    cleanup_all_realtime_env_vars();
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("dynamic_config.toml");

    std::fs::write(
        &config_path,
        r#"
        [channel]
        detach_timeout_ms = 1234
        idempotent_publishing = true

        [retry]
        base_delay_ms = 100
        max_delay_ms = 800
        "#,
    )
    .unwrap();

    let empty_vars: Vec<(&str, Option<&str>)> = vec![];
    with_vars(empty_vars, || {
        let base_config = ClientConfig::new().expect("success");
        let config = base_config
            .with_override_config(config_path.to_str().unwrap())
            .expect("override should load");

        assert_eq!(config.channel.detach_timeout_ms, 1234);
        assert!(config.channel.idempotent_publishing);
        assert_eq!(config.retry.base_delay_ms, 100);
        assert_eq!(config.retry.max_delay_ms, 800);
        // untouched values keep their defaults
        assert_eq!(config.channel.attach_timeout_ms, 10_000);
    });
}

#[test]
#[serial]
fn environment_variables_should_have_highest_priority() {
    cleanup_all_realtime_env_vars();
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("test_config.toml");
    std::fs::write(
        &config_path,
        r#"
        [channel]
        attach_timeout_ms = 3000
        "#,
    )
    .unwrap();

    with_vars(
        vec![
            ("CONFIG_PATH", Some(config_path.to_str().unwrap())),
            ("REALTIME__CHANNEL__ATTACH_TIMEOUT_MS", Some("4000")),
        ],
        || {
            let config = ClientConfig::new().unwrap();
            assert_eq!(config.channel.attach_timeout_ms, 4000);
        },
    );
}

#[test]
fn validation_should_fail_with_zero_timeouts() {
    let mut config = ClientConfig::default();
    config.channel.attach_timeout_ms = 0;
    assert!(config.validate().is_err());

    let mut config = ClientConfig::default();
    config.channel.detach_timeout_ms = 0;
    assert!(config.validate().is_err());
}

#[test]
fn validation_should_accept_defaults() {
    assert!(ClientConfig::default().validate().is_ok());
}
