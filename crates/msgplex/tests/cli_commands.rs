#![cfg(all(unix, feature = "cli"))]

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "msgplex-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    loop {
        if UnixStream::connect(path).is_ok() {
            return;
        }
        if start.elapsed() >= timeout {
            panic!("server socket never came up at {}", path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn spawn_server(socket: &Path) -> std::process::Child {
    let child = Command::new(env!("CARGO_BIN_EXE_msgplex"))
        .arg("--log-level")
        .arg("info")
        .arg("serve")
        .arg(socket)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("serve should start");
    wait_for_socket(socket, Duration::from_secs(3));
    child
}

#[test]
fn version_prints_the_crate_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_msgplex"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn doctor_passes_on_clean_env() {
    let output = Command::new(env!("CARGO_BIN_EXE_msgplex"))
        .arg("--format")
        .arg("json")
        .arg("doctor")
        .output()
        .expect("doctor should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("doctor-report.schema.json"));
    assert!(stdout.contains("\"overall\":\"pass\""));
}

#[test]
fn envinfo_reports_version_and_process() {
    let output = Command::new(env!("CARGO_BIN_EXE_msgplex"))
        .arg("--format")
        .arg("json")
        .arg("envinfo")
        .output()
        .expect("envinfo should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("envinfo.schema.json"));
    assert!(stdout.contains("\"pid\":"));
}

#[test]
fn call_round_trips_against_serve() {
    let dir = unique_temp_dir("call");
    let socket = dir.join("server.sock");
    let mut server = spawn_server(&socket);

    let output = Command::new(env!("CARGO_BIN_EXE_msgplex"))
        .arg("--format")
        .arg("json")
        .arg("call")
        .arg(&socket)
        .arg("--service")
        .arg("echo")
        .arg("--method")
        .arg("echo")
        .arg("--args")
        .arg(r#"["hello", 7]"#)
        .output()
        .expect("call should run");

    assert!(
        output.status.success(),
        "call failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("call-result.schema.json"));
    assert!(stdout.contains("hello"));

    let _ = server.kill();
    let _ = server.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn cancel_after_interrupts_a_sleeping_call() {
    let dir = unique_temp_dir("cancel");
    let socket = dir.join("server.sock");
    let mut server = spawn_server(&socket);

    let output = Command::new(env!("CARGO_BIN_EXE_msgplex"))
        .arg("--format")
        .arg("json")
        .arg("call")
        .arg(&socket)
        .arg("--method")
        .arg("sleep")
        .arg("--args")
        .arg("[60000]")
        .arg("--cancel-after")
        .arg("100ms")
        .arg("--timeout")
        .arg("5s")
        .output()
        .expect("call should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("cancelled"), "got: {stdout}");

    let _ = server.kill();
    let _ = server.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn notify_reaches_the_server() {
    let dir = unique_temp_dir("notify");
    let socket = dir.join("server.sock");
    let mut server = spawn_server(&socket);

    let output = Command::new(env!("CARGO_BIN_EXE_msgplex"))
        .arg("notify")
        .arg(&socket)
        .arg("--method")
        .arg("onPing")
        .arg("--arg")
        .arg("hi")
        .output()
        .expect("notify should run");
    assert!(output.status.success());

    // Give the server a beat to log the delivery, then collect stderr.
    thread::sleep(Duration::from_millis(300));
    let _ = server.kill();
    let output = server.wait_with_output().expect("server should exit");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("notification received"),
        "server log: {stderr}"
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn call_without_a_server_fails() {
    let missing = std::env::temp_dir().join(format!(
        "msgplex-cli-missing-{}.sock",
        std::process::id()
    ));

    let output = Command::new(env!("CARGO_BIN_EXE_msgplex"))
        .arg("call")
        .arg(&missing)
        .arg("--method")
        .arg("echo")
        .output()
        .expect("call should run");

    assert_eq!(output.status.code(), Some(1));
}
