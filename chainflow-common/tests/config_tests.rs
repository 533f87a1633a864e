//! Root folder and config path resolution tests
//!
//! Tests that manipulate CHAINFLOW_* environment variables are marked
//! #[serial] so they never run in parallel.

use chainflow_common::config::{
    resolve_config_path, CompiledDefaults, RootFolderResolver, CONFIG_PATH_ENV, ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

#[test]
#[serial]
fn test_resolver_with_no_overrides_uses_default() {
    env::remove_var(ROOT_FOLDER_ENV);

    let root_folder = RootFolderResolver::new("test-module").resolve();
    let defaults = CompiledDefaults::for_current_platform();
    assert_eq!(root_folder, defaults.root_folder);
}

#[test]
#[serial]
fn test_resolver_env_var_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/chainflow-env-root");

    let root_folder = RootFolderResolver::new("test-module")
        .with_toml_root(Some(PathBuf::from("/tmp/chainflow-toml-root")))
        .resolve();
    assert_eq!(root_folder, PathBuf::from("/tmp/chainflow-env-root"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_resolver_cli_arg_has_highest_priority() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/chainflow-env-root");

    let root_folder = RootFolderResolver::new("test-module")
        .with_cli_arg(Some(PathBuf::from("/tmp/chainflow-cli-root")))
        .with_toml_root(Some(PathBuf::from("/tmp/chainflow-toml-root")))
        .resolve();
    assert_eq!(root_folder, PathBuf::from("/tmp/chainflow-cli-root"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_resolver_toml_used_when_env_absent() {
    env::remove_var(ROOT_FOLDER_ENV);

    let root_folder = RootFolderResolver::new("test-module")
        .with_toml_root(Some(PathBuf::from("/tmp/chainflow-toml-root")))
        .resolve();
    assert_eq!(root_folder, PathBuf::from("/tmp/chainflow-toml-root"));
}

#[test]
#[serial]
fn test_config_path_cli_then_env() {
    env::set_var(CONFIG_PATH_ENV, "/tmp/from-env.toml");

    let from_cli = resolve_config_path(Some(Path::new("/tmp/from-cli.toml")), "chainflow-ai");
    assert_eq!(from_cli, Some(PathBuf::from("/tmp/from-cli.toml")));

    let from_env = resolve_config_path(None, "chainflow-ai");
    assert_eq!(from_env, Some(PathBuf::from("/tmp/from-env.toml")));

    env::remove_var(CONFIG_PATH_ENV);
}
