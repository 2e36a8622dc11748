//! End-to-end: drive the `chaos-agent` binary as a real child process
#![cfg(unix)]

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Output};
use std::time::Duration;

use tempfile::TempDir;

mod common;
use common::eventually;

fn chaos_agent<S: AsRef<OsStr>>(state_dir: &Path, args: &[S]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_chaos-agent"))
        .arg("--state-dir")
        .arg(state_dir)
        .args(args)
        .env_remove("CHAOS_AGENT_STATE_DIR")
        .output()
        .expect("chaos-agent should start")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Detached memory hold: listed with its resolved size, then destroyed
#[tokio::test]
async fn test_detached_memory_hold_roundtrip() {
    // Arrange
    let dir = TempDir::new().unwrap();

    // Act: start in the background
    let created = chaos_agent(dir.path(), &["create", "mem", "load", "--size", "64", "--detach"]);
    assert!(created.status.success(), "create failed: {:?}", created);
    assert!(stdout(&created).contains("pid="));

    // Assert: the worker registers itself
    let listed = eventually(Duration::from_secs(10), || {
        let out = stdout(&chaos_agent(dir.path(), &["list", "mem"]));
        out.contains("bytes=67108864") && out.contains("status=alive")
    })
    .await;
    assert!(listed, "worker never showed up in the list");

    // Act: stop it
    let destroyed = chaos_agent(dir.path(), &["destroy", "mem"]);
    assert!(destroyed.status.success(), "destroy failed: {:?}", destroyed);
    assert!(stdout(&destroyed).contains("Stopped mem experiment"));

    // Assert: nothing left behind
    let after = chaos_agent(dir.path(), &["list", "mem"]);
    assert!(after.status.success());
    assert_eq!(stdout(&after).trim(), "mem: none");
}

/// Invalid input exits with status 1 before anything is registered
#[test]
fn test_invalid_request_exits_with_error() {
    let dir = TempDir::new().unwrap();

    let output = chaos_agent(dir.path(), &["create", "cpu", "load", "--percent", "0"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("percent"));
    assert!(!dir.path().join("cpu").exists());
}

/// Destroying with nothing tracked is an error
#[test]
fn test_destroy_without_experiments_fails() {
    let dir = TempDir::new().unwrap();

    let output = chaos_agent(dir.path(), &["destroy", "disk"]);

    assert_eq!(output.status.code(), Some(1));
}

/// Listing an empty store reports every target as empty
#[test]
fn test_list_empty_store() {
    let dir = TempDir::new().unwrap();

    let output = chaos_agent(dir.path(), &["list"]);

    assert!(output.status.success());
    let text = stdout(&output);
    for target in ["cpu", "mem", "disk", "net"] {
        assert!(text.contains(&format!("{}: none", target)));
    }
}

/// A detached network experiment without the capture driver fails up front
#[test]
fn test_detached_net_delay_without_driver_fails() {
    let dir = TempDir::new().unwrap();

    let output = chaos_agent(dir.path(), &["create", "net", "delay", "--detach"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(!stdout(&output).contains("pid="));
    assert!(!dir.path().join("net").exists());
}

/// An existing fill path is refused before a worker is started
#[test]
fn test_detached_disk_fill_refuses_existing_file() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let existing = dir.path().join("precious.txt");
    std::fs::write(&existing, "keep me").unwrap();
    let path = existing.to_str().unwrap();

    // Act
    let output = chaos_agent(dir.path(), &["create", "disk", "fill", "--size", "1", "--path", path, "--detach"]);

    // Assert
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("file already exists"));
    assert!(!dir.path().join("disk").exists());
    assert_eq!(std::fs::read_to_string(&existing).unwrap(), "keep me");
}

/// Arguments that are not valid UTF-8 reach the background worker intact
#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_detached_disk_fill_with_non_utf8_path() {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStrExt;

    // Arrange
    let dir = TempDir::new().unwrap();
    let fill_path = dir.path().join(OsStr::from_bytes(b"fill-\xff.bin"));
    let args: Vec<OsString> = ["create", "disk", "fill", "--size", "1", "--detach", "--path"]
        .into_iter()
        .map(OsString::from)
        .chain(std::iter::once(fill_path.clone().into_os_string()))
        .collect();

    // Act
    let created = chaos_agent(dir.path(), &args);
    assert!(created.status.success(), "create failed: {:?}", created);

    // Assert: the worker writes to exactly that file
    let filled = eventually(Duration::from_secs(10), || {
        std::fs::metadata(&fill_path).map(|m| m.len()).unwrap_or(0) == 1024 * 1024
    })
    .await;
    assert!(filled, "worker never filled {}", fill_path.display());

    let destroyed = chaos_agent(dir.path(), &["destroy", "disk"]);
    assert!(destroyed.status.success(), "destroy failed: {:?}", destroyed);
    let removed = eventually(Duration::from_secs(5), || !fill_path.exists()).await;
    assert!(removed, "fill file was left behind");
}
