#![cfg(feature = "cli")]

use std::net::UdpSocket;
use std::process::{Child, Command, Output, Stdio};

const BIN: &str = env!("CARGO_BIN_EXE_rexec");

/// Loopback address no one listens on once the probe socket is dropped.
fn free_group() -> String {
    let probe = UdpSocket::bind("127.0.0.1:0").expect("probe socket should bind");
    let addr = probe.local_addr().expect("probe socket should have an address");
    addr.to_string()
}

struct MockNode {
    child: Child,
    group: String,
}

impl MockNode {
    fn spawn(label: &str) -> Self {
        let group = free_group();
        let child = Command::new(BIN)
            .args(["--log-level", "error", "mock-node", "--label", label])
            .args(["--group", &group, "--duration", "30s"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("mock-node should start");
        Self { child, group }
    }

    fn rexec(&self, args: &[&str]) -> Output {
        Command::new(BIN)
            .args(["--log-level", "error"])
            .args(args)
            .args(["--group", &self.group])
            .output()
            .expect("rexec should run")
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(BIN)
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("rexec {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn blank_code_is_usage_error() {
    let output = Command::new(BIN)
        .args(["--log-level", "error", "exec", "   "])
        .output()
        .expect("exec should run");

    assert_eq!(output.status.code(), Some(64));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("code must not be empty"), "stderr: {stderr}");
}

#[test]
fn missing_node_times_out_with_124() {
    let group = free_group();
    let output = Command::new(BIN)
        .args(["--log-level", "error", "nodes", "--label", "Nowhere"])
        .args(["--wait", "300ms", "--group", &group])
        .output()
        .expect("nodes should run");

    assert_eq!(output.status.code(), Some(124));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no node matching Nowhere"), "stderr: {stderr}");
}

#[test]
fn nodes_lists_mock_node() {
    let node = MockNode::spawn("CliNodes");
    let output = node.rexec(&["--format", "json", "nodes", "--label", "CliNodes", "--wait", "5s"]);

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let listing: serde_json::Value = serde_json::from_str(stdout.trim()).expect("json listing");
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["nodes"][0]["label"], "CliNodes");
}

#[test]
fn exec_evaluates_on_mock_node() {
    let node = MockNode::spawn("CliEval");
    let output = node.rexec(&[
        "--format", "raw", "exec", "--label", "CliEval", "--wait", "5s", "21*2",
    ]);

    assert!(output.status.success(), "{output:?}");
    assert_eq!(String::from_utf8_lossy(&output.stdout), "42\n");
}

#[test]
fn remote_failure_exits_with_failure() {
    let node = MockNode::spawn("CliFail");
    let output = node.rexec(&[
        "--format", "json", "exec", "--label", "CliFail", "--wait", "5s", "boom",
    ]);

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let result: serde_json::Value = serde_json::from_str(stdout.trim()).expect("json result");
    assert_eq!(result["success"], false);
    assert!(result["error"]
        .as_str()
        .is_some_and(|error| error.starts_with("SyntaxError")));
}

#[test]
fn exec_collects_pipe_entries() {
    let node = MockNode::spawn("CliPipe");
    let channel = format!("cli-test-{}", std::process::id());
    let output = node.rexec(&[
        "--format",
        "json",
        "exec",
        "--label",
        "CliPipe",
        "--wait",
        "5s",
        "--mode",
        "statement",
        "--pipe",
        &channel,
        "import rexec_pipe; rexec_pipe.add(\"answer\", 6 * 7)",
    ]);

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let result: serde_json::Value = serde_json::from_str(stdout.trim()).expect("json result");
    assert_eq!(result["pipe"]["answer"], 42);

    let sink = std::env::temp_dir()
        .join("rexec")
        .join(format!("pipe-{channel}.json"));
    let _ = std::fs::remove_file(sink);
}
