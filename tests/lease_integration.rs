use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tempfile::tempdir;

fn hive(root: &Path) -> Command {
    let binary = assert_cmd::cargo::cargo_bin!("hive");
    let mut cmd = Command::new(binary);
    cmd.env_remove("HIVE_AGENT").env_remove("HIVE_ROOT").env("HIVE_LOG", "off");
    cmd.arg("--format").arg("json").arg("--root").arg(root);
    cmd
}

fn run_hive(root: &Path, args: &[&str]) -> Output {
    hive(root).args(args).output().expect("hive command executes")
}

fn lease_status(root: &Path) -> Value {
    let output = run_hive(root, &["orchestrator", "status"]);
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
}

fn spawn_orchestrator(root: &Path, name: &str) -> Child {
    let child = hive(root)
        .args(["orchestrator", "start", "--name", name, "--poll-ms", "20"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("orchestrator spawns");
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        let status = lease_status(root);
        if status["held"] == true && status["holder_name"] == name {
            return child;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("orchestrator '{name}' never acquired the lease");
}

#[test]
fn killed_holder_releases_the_lease() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let mut child = spawn_orchestrator(root, "boss");

    let rival = run_hive(root, &["orchestrator", "start", "--name", "rival", "--once"]);
    assert_eq!(rival.status.code(), Some(2));
    let err: Value = serde_json::from_slice(&rival.stderr).unwrap();
    assert_eq!(err["error"], "already_held");

    let status = lease_status(root);
    assert_eq!(status["holder_pid"], child.id());

    child.kill().unwrap();
    child.wait().unwrap();

    let status = lease_status(root);
    assert_eq!(status["held"], false);
    assert_eq!(status["stale"], true);

    let heir = run_hive(root, &["orchestrator", "start", "--name", "heir", "--once"]);
    assert!(
        heir.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&heir.stderr)
    );
}

#[test]
fn running_orchestrator_answers_and_stops_on_request() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let mut child = spawn_orchestrator(root, "boss");

    let ping = run_hive(
        root,
        &["--actor", "w1", "orchestrator", "request", "--action", "ping", "--wait-sec", "10"],
    );
    assert!(ping.status.success());
    let ping: Value = serde_json::from_slice(&ping.stdout).unwrap();
    assert_eq!(ping["status"], "response");
    assert_eq!(ping["response"]["leader"], "boss");

    let stop = run_hive(root, &["--actor", "w1", "orchestrator", "stop", "--wait-sec", "10"]);
    let stop: Value = serde_json::from_slice(&stop.stdout).unwrap();
    assert_eq!(stop["response"]["shutdown"], true);

    let exited = child.wait().unwrap();
    assert!(exited.success());

    // Clean shutdown leaves no stale state behind.
    let status = lease_status(root);
    assert_eq!(status["held"], false);
    assert_eq!(status["stale"], false);
}
