//! Tests for configuration path resolution and environment overrides
//!
//! Uses serial_test to prevent ENV variable race conditions. Tests that
//! manipulate SKED_* variables are marked with #[serial].

use serial_test::serial;
use sked_common::config::{env_override, resolve_config_path};
use sked_common::Error;
use std::env;
use std::path::PathBuf;

#[test]
#[serial]
fn test_env_var_used_when_no_cli_arg() {
    env::set_var("SKED_TEST_CONFIG", "/etc/sked/from-env.toml");

    let path = resolve_config_path(None, "SKED_TEST_CONFIG", "sked-import.toml");
    assert_eq!(path, Some(PathBuf::from("/etc/sked/from-env.toml")));

    env::remove_var("SKED_TEST_CONFIG");
}

#[test]
#[serial]
fn test_cli_arg_beats_env_var() {
    env::set_var("SKED_TEST_CONFIG", "/etc/sked/from-env.toml");

    let path = resolve_config_path(Some("./local.toml"), "SKED_TEST_CONFIG", "sked-import.toml");
    assert_eq!(path, Some(PathBuf::from("./local.toml")));

    env::remove_var("SKED_TEST_CONFIG");
}

#[test]
#[serial]
fn test_blank_env_var_ignored() {
    env::set_var("SKED_TEST_CONFIG", "   ");

    let path = resolve_config_path(None, "SKED_TEST_CONFIG", "definitely-not-present-1234.toml");
    assert_eq!(path, None);

    env::remove_var("SKED_TEST_CONFIG");
}

#[test]
#[serial]
fn test_env_override_parses_value() {
    env::set_var("SKED_TEST_WORKERS", " 8 ");
    let workers: Option<usize> = env_override("SKED_TEST_WORKERS").unwrap();
    assert_eq!(workers, Some(8));
    env::remove_var("SKED_TEST_WORKERS");

    let missing: Option<usize> = env_override("SKED_TEST_WORKERS").unwrap();
    assert_eq!(missing, None);
}

#[test]
#[serial]
fn test_env_override_rejects_garbage() {
    env::set_var("SKED_TEST_WORKERS", "many");
    let result: sked_common::Result<Option<usize>> = env_override("SKED_TEST_WORKERS");
    assert!(matches!(result, Err(Error::Config(_))));
    env::remove_var("SKED_TEST_WORKERS");
}
