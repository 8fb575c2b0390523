// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::env;
use std::fs;
use std::path::Path;

use std::sync::Arc;

use clap::Parser;
use fabric_track::entity::{Entity, toplevel};
use fabric_track::tracker::text_tracker;
use fabric_track::{Tag, enter};
use serial_test::serial;
use sim_fabric::config::SimConfig;

fn command_line(args: &[&str]) -> SimConfig {
    SimConfig::parse_from(["sim-fabric"].iter().chain(args))
}

fn write_conf_file(dir: &Path, contents: &str) -> String {
    let path = dir.join("extra.toml");
    fs::write(&path, contents).unwrap();
    path.to_str().unwrap().to_string()
}

/// Run `f` with the environment variable `key` set to `value`.
fn with_env(key: &str, value: &str, f: impl FnOnce()) {
    // SAFETY: every test that touches the environment is serial.
    unsafe { env::set_var(key, value) };
    f();
    unsafe { env::remove_var(key) };
}

#[test]
#[serial]
fn default_values() {
    let config = SimConfig::with_command_line(command_line(&[])).unwrap();
    assert_eq!(config, SimConfig::default());
}

#[test]
#[serial]
fn conf_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let conf_file = write_conf_file(dir.path(), "columns = 5\nseed = 9\n");

    let config = SimConfig::with_command_line(command_line(&["--conf-file", &conf_file])).unwrap();
    assert_eq!(config.columns, Some(5));
    assert_eq!(config.seed, Some(9));
    assert_eq!(config.rows, SimConfig::default().rows);
}

#[test]
#[serial]
fn environment_overrides_conf_file() {
    let dir = tempfile::tempdir().unwrap();
    let conf_file = write_conf_file(dir.path(), "columns = 5\nrows = 4\n");

    with_env("FABRIC_COLUMNS", "6", || {
        let config =
            SimConfig::with_command_line(command_line(&["--conf-file", &conf_file])).unwrap();
        assert_eq!(config.columns, Some(6));
        assert_eq!(config.rows, Some(4));
    });
}

#[test]
#[serial]
fn command_line_overrides_environment() {
    with_env("FABRIC_COLUMNS", "6", || {
        let config = SimConfig::with_command_line(command_line(&["--columns", "7"])).unwrap();
        assert_eq!(config.columns, Some(7));
    });
}

#[test]
#[serial]
fn conf_file_from_environment() {
    let dir = tempfile::tempdir().unwrap();
    let conf_file = write_conf_file(dir.path(), "packet_bytes = 64\n");

    with_env("FABRIC_CONF_FILE", &conf_file, || {
        let config = SimConfig::with_command_line(command_line(&[])).unwrap();
        assert_eq!(config.packet_bytes, Some(64));
    });
}

#[test]
#[serial]
fn missing_conf_file() {
    let result = SimConfig::with_command_line(command_line(&["--conf-file", "missing.toml"]));
    assert_eq!(result.err().map(|e| e.to_string()), Some("Error: missing.toml not found".to_string()));
}

#[test]
#[serial]
fn conf_file_is_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_str().unwrap();
    let result = SimConfig::with_command_line(command_line(&["--conf-file", path]));
    assert!(result.is_err());
}

#[test]
#[serial]
fn badly_typed_value() {
    with_env("FABRIC_ROWS", "many", || {
        assert!(SimConfig::with_command_line(command_line(&[])).is_err());
    });
}

#[test]
#[serial]
fn trace_filter_selects_entities() {
    let config = SimConfig::with_command_line(command_line(&["--trace-filter-regex", "node_1_.*"])).unwrap();
    assert_eq!(config.trace_filter_regex(), "node_1_.*");

    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("trace.log");
    let file = fs::File::create(&log_path).unwrap();
    let tracker = text_tracker(config.entity_manager().unwrap(), Box::new(file));

    let top = toplevel(&tracker, "top");
    let traced = Arc::new(Entity::new(&top, "node_1_0"));
    let quiet = Arc::new(Entity::new(&top, "node_0_0"));
    enter!(traced ; Tag(99));
    enter!(quiet ; Tag(98));
    tracker.shutdown();

    let log = fs::read_to_string(&log_path).unwrap();
    let entered: Vec<&str> = log.lines().filter(|line| line.contains(": enter ")).collect();
    assert_eq!(entered, vec![format!("{}: enter 99", traced.tag)]);
}
