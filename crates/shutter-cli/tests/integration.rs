#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn store_dir(dir: &TempDir) -> PathBuf {
    dir.path().join("store")
}

fn shutterd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("shutterd").unwrap();
    cmd.current_dir(dir.path())
        .env("SHUTTER_STORE", store_dir(dir))
        .env_remove("SHUTTER_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_json(output: &[u8]) -> serde_yaml::Value {
    // JSON is valid YAML
    serde_yaml::from_slice(output).unwrap()
}

fn read_yaml(path: PathBuf) -> serde_yaml::Value {
    serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn add_device(dir: &TempDir, key: &str, device_type: &str) {
    shutterd(dir)
        .args(["device", "add", key, "--url", "http://127.0.0.1:9", "--type", device_type])
        .assert()
        .success();
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

#[test]
fn config_show_reports_defaults() {
    let dir = TempDir::new().unwrap();
    let out = shutterd(&dir)
        .args(["--json", "config", "show"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let config = stdout_json(&out);
    assert_eq!(config["default_requeue_secs"].as_u64(), Some(30));
    assert_eq!(config["moving_requeue_secs"].as_u64(), Some(2));
    assert_eq!(config["request_history_limit"].as_u64(), Some(5));
    assert_eq!(config["mode"].as_str(), Some("requests"));
}

#[test]
fn config_validate_accepts_defaults() {
    let dir = TempDir::new().unwrap();
    shutterd(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn config_validate_flags_zero_workers() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(store_dir(&dir)).unwrap();
    std::fs::write(store_dir(&dir).join("config.yaml"), "workers: 0\n").unwrap();

    shutterd(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error] workers must be at least 1"))
        .stderr(predicate::str::contains("config validation found errors"));
}

#[test]
fn config_validate_flags_zero_intervals() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(store_dir(&dir)).unwrap();
    std::fs::write(store_dir(&dir).join("config.yaml"), "resync_secs: 0\n").unwrap();

    shutterd(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains(
            "[error] resync_secs and gc_interval_secs must be greater than 0",
        ))
        .stderr(predicate::str::contains("config validation found errors"));
}

#[test]
fn explicit_config_path_wins() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("custom.yaml");
    std::fs::write(&config, "default_requeue_secs: 45\nmode: direct\n").unwrap();

    let out = shutterd(&dir)
        .env("SHUTTER_CONFIG", &config)
        .args(["--json", "config", "show"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let config = stdout_json(&out);
    assert_eq!(config["default_requeue_secs"].as_u64(), Some(45));
    assert_eq!(config["mode"].as_str(), Some("direct"));
}

// ---------------------------------------------------------------------------
// device
// ---------------------------------------------------------------------------

#[test]
fn device_add_then_list() {
    let dir = TempDir::new().unwrap();
    add_device(&dir, "home/living-room", "Shelly25Roller");

    assert!(store_dir(&dir)
        .join("home/devices/living-room.yaml")
        .exists());

    shutterd(&dir)
        .args(["device", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("living-room"))
        .stdout(predicate::str::contains("Shelly25Roller"));
}

#[test]
fn bare_device_name_uses_default_namespace() {
    let dir = TempDir::new().unwrap();
    add_device(&dir, "kitchen", "Shelly25Roller");
    assert!(store_dir(&dir).join("default/devices/kitchen.yaml").exists());
}

#[test]
fn duplicate_device_is_rejected() {
    let dir = TempDir::new().unwrap();
    add_device(&dir, "home/office", "Shelly25Roller");
    shutterd(&dir)
        .args(["device", "add", "home/office", "--url", "http://127.0.0.1:9"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn invalid_device_name_is_rejected() {
    let dir = TempDir::new().unwrap();
    shutterd(&dir)
        .args(["device", "add", "home/Bad_Name", "--url", "http://127.0.0.1:9"])
        .assert()
        .failure();
}

#[test]
fn set_position_bumps_generation() {
    let dir = TempDir::new().unwrap();
    add_device(&dir, "home/office", "Shelly25Roller");
    shutterd(&dir)
        .args(["device", "set-position", "home/office", "40"])
        .assert()
        .success();

    let record = read_yaml(store_dir(&dir).join("home/devices/office.yaml"));
    assert_eq!(record["spec"]["position"].as_u64(), Some(40));
    assert_eq!(record["metadata"]["generation"].as_i64(), Some(2));
}

#[test]
fn position_out_of_range_is_rejected() {
    let dir = TempDir::new().unwrap();
    shutterd(&dir)
        .args([
            "device",
            "add",
            "home/office",
            "--url",
            "http://127.0.0.1:9",
            "--position",
            "101",
        ])
        .assert()
        .failure();
}

// ---------------------------------------------------------------------------
// request
// ---------------------------------------------------------------------------

#[test]
fn request_create_and_list() {
    let dir = TempDir::new().unwrap();
    add_device(&dir, "home/living-room", "Shelly25Roller");
    shutterd(&dir)
        .args(["request", "create", "home/open", "--device", "living-room", "--position", "100"])
        .assert()
        .success()
        .stdout(predicate::str::contains("home/living-room"));
    shutterd(&dir)
        .args(["request", "create", "home/close", "--device", "living-room", "--position", "0"])
        .assert()
        .success();

    let out = shutterd(&dir)
        .args(["--json", "request", "list", "--namespace", "home"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let requests = stdout_json(&out);
    let requests = requests.as_sequence().unwrap();
    assert_eq!(requests.len(), 2);
    // oldest first
    assert_eq!(requests[0]["metadata"]["name"].as_str(), Some("open"));
    assert_eq!(requests[0]["spec"]["rollerShutter"]["name"].as_str(), Some("living-room"));
    assert_eq!(requests[0]["status"]["phase"].as_str(), Some("Pending"));
}

#[test]
fn request_for_unknown_device_warns() {
    let dir = TempDir::new().unwrap();
    shutterd(&dir)
        .args(["request", "create", "home/r1", "--device", "ghost", "--position", "10"])
        .assert()
        .success()
        .stderr(predicate::str::contains("does not exist"));
}

// ---------------------------------------------------------------------------
// reconcile
// ---------------------------------------------------------------------------

#[test]
fn reconcile_unknown_type_reports_condition() {
    let dir = TempDir::new().unwrap();
    add_device(&dir, "home/patio", "Somfy");

    shutterd(&dir)
        .args(["reconcile", "home/patio"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Reachable=False (UnknownDeviceType)"))
        .stdout(predicate::str::contains("requeue in 30s"));

    let record = read_yaml(store_dir(&dir).join("home/devices/patio.yaml"));
    let conditions = record["status"]["conditions"].as_sequence().unwrap();
    assert_eq!(conditions.len(), 1);
    assert_eq!(conditions[0]["reason"].as_str(), Some("UnknownDeviceType"));
    assert_eq!(record["status"]["observedGeneration"].as_i64(), Some(1));
}

#[test]
fn reconcile_json_output() {
    let dir = TempDir::new().unwrap();
    add_device(&dir, "home/patio", "Somfy");

    let out = shutterd(&dir)
        .args(["--json", "reconcile", "home/patio"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let outcome = stdout_json(&out);
    assert_eq!(outcome["device"].as_str(), Some("home/patio"));
    assert_eq!(outcome["requeueAfterSecs"].as_u64(), Some(30));
    assert!(outcome["position"].is_null());
}

#[test]
fn reconcile_missing_device_fails() {
    let dir = TempDir::new().unwrap();
    shutterd(&dir)
        .args(["reconcile", "home/nowhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

// ---------------------------------------------------------------------------
// gc
// ---------------------------------------------------------------------------

fn write_completed_request(dir: &TempDir, name: &str, second: u32) {
    let yaml = format!(
        "metadata:
  name: {name}
  namespace: home
  generation: 1
  resourceVersion: 2
  creationTimestamp: 2024-01-01T00:00:{second:02}Z
spec:
  position: 10
  rollerShutter:
    name: living-room
status:
  observedGeneration: 1
  phase: Completed
  conditions:
  - type: Completed
    status: 'True'
    reason: AtPosition
    message: position reached
    lastTransitionTime: 2024-01-01T00:01:{second:02}Z
    observedGeneration: 1
"
    );
    let requests = store_dir(dir).join("home/requests");
    std::fs::create_dir_all(&requests).unwrap();
    std::fs::write(requests.join(format!("{name}.yaml")), yaml).unwrap();
}

#[test]
fn gc_trims_completed_history() {
    let dir = TempDir::new().unwrap();
    for i in 0..7 {
        write_completed_request(&dir, &format!("done-{i}"), i);
    }

    let out = shutterd(&dir)
        .args(["--json", "gc"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let deleted = stdout_json(&out);
    let mut deleted: Vec<&str> = deleted["deleted"]
        .as_sequence()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    deleted.sort();
    assert_eq!(deleted, vec!["home/done-0", "home/done-1"]);

    let remaining = std::fs::read_dir(store_dir(&dir).join("home/requests"))
        .unwrap()
        .count();
    assert_eq!(remaining, 5);

    shutterd(&dir)
        .arg("gc")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to collect."));
}
