// tests/integration/config_test.rs

//! Integration tests for configuration loading and validation

use moonship::config::{Backend, Config, resolve_env_reference};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_full_config_from_file() {
    let file = write_config(
        r#"
log_level = "debug"
backend = "redis"

[redis]
url = "rediss://cache.example.com:6380/1"
ssl_verify_cert = false
connect_timeout = "2s"
command_timeout = "750ms"

[message_bus]
request_channel = "req"
response_channel = "resp"
reply_timeout = "30s"

[session]
idle_expiry = "30m"
"#,
    );

    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();

    assert_eq!(config.log_level, "debug");
    assert_eq!(config.backend, Backend::Redis);
    assert_eq!(
        config.redis.url.as_deref(),
        Some("rediss://cache.example.com:6380/1")
    );
    assert!(!config.redis.ssl_verify_cert);
    assert_eq!(config.redis.connect_timeout, Duration::from_secs(2));
    assert_eq!(config.redis.command_timeout, Duration::from_millis(750));
    assert_eq!(config.message_bus.request_channel, "req");
    assert_eq!(config.message_bus.response_channel, "resp");
    assert_eq!(config.message_bus.reply_timeout, Duration::from_secs(30));
    assert_eq!(config.session.idle_expiry, Some(Duration::from_secs(1800)));
}

#[test]
fn test_defaults_for_memory_backend() {
    let config = Config::from_toml(r#"backend = "memory""#).unwrap();

    assert_eq!(config.log_level, "info");
    assert_eq!(config.backend, Backend::Memory);
    assert_eq!(config.redis.url, None);
    assert!(config.redis.ssl_verify_cert);
    assert_eq!(config.message_bus.request_channel, "moonship.message.request");
    assert_eq!(config.message_bus.response_channel, "moonship.message.response");
    assert_eq!(config.message_bus.reply_timeout, Duration::from_secs(10));
    assert_eq!(config.session.idle_expiry, None);
}

#[test]
fn test_redis_backend_requires_url() {
    let err = Config::from_toml("").unwrap_err();
    assert!(format!("{err:#}").contains("redis.url"));
}

#[test]
fn test_invalid_settings_are_rejected() {
    for contents in [
        "backend = \"memory\"\n[message_bus]\nrequest_channel = \"\"",
        "backend = \"memory\"\n[message_bus]\nrequest_channel = \"x\"\nresponse_channel = \"x\"",
        "backend = \"memory\"\n[message_bus]\nreply_timeout = \"0s\"",
        "backend = \"memory\"\n[session]\nidle_expiry = \"0s\"",
        "backend = \"sqlite\"",
        "backend = \"memory\"\n[redis]\nconnect_timeout = \"soon\"",
    ] {
        assert!(
            Config::from_toml(contents).is_err(),
            "expected rejection of:\n{contents}"
        );
    }
}

#[test]
fn test_url_is_resolved_from_environment() {
    // SAFETY: the variable name is unique to this test.
    unsafe { std::env::set_var("MOONSHIP_TEST_CONFIG_URL", "redis://from-env:6379") };

    let config = Config::from_toml("[redis]\nurl = \"$MOONSHIP_TEST_CONFIG_URL\"").unwrap();

    assert_eq!(config.redis.url.as_deref(), Some("$MOONSHIP_TEST_CONFIG_URL"));
    assert_eq!(
        config.redis.resolved_url().unwrap().as_deref(),
        Some("redis://from-env:6379")
    );
}

#[test]
fn test_environment_reference_is_followed_once() {
    // SAFETY: the variable names are unique to this test.
    unsafe {
        std::env::set_var("MOONSHIP_TEST_CONFIG_OUTER", "$MOONSHIP_TEST_CONFIG_INNER");
        std::env::set_var("MOONSHIP_TEST_CONFIG_INNER", "redis://inner:6379");
    }

    let config = Config::from_toml("[redis]\nurl = \"$MOONSHIP_TEST_CONFIG_OUTER\"").unwrap();

    assert_eq!(
        config.redis.resolved_url().unwrap().as_deref(),
        Some("$MOONSHIP_TEST_CONFIG_INNER")
    );
}

#[test]
fn test_missing_environment_variable_is_an_error() {
    let err = Config::from_toml("[redis]\nurl = \"$MOONSHIP_TEST_CONFIG_UNSET\"").unwrap_err();
    assert!(format!("{err:#}").contains("MOONSHIP_TEST_CONFIG_UNSET"));

    assert!(resolve_env_reference("$MOONSHIP_TEST_CONFIG_UNSET").is_err());
    assert_eq!(resolve_env_reference("plain").unwrap(), "plain");
    assert_eq!(resolve_env_reference("$").unwrap(), "$");
}

#[test]
fn test_missing_file_is_an_error() {
    let err = Config::from_file("/definitely/not/here/moonship.toml").unwrap_err();
    assert!(format!("{err:#}").contains("Failed to read config file"));
}
