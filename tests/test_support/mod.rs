#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

/// A running daemon plus every event line it has printed so far.
pub struct Sidecar {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: BufReader<ChildStdout>,
    pub events: Vec<Value>,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_gradeledgerd");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn gradeledgerd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin: Some(stdin),
            reader: BufReader::new(stdout),
            events: Vec::new(),
        }
    }

    /// Spawns and selects `workspace`.
    pub fn open(workspace: &PathBuf) -> Self {
        let mut sc = Self::spawn();
        sc.ok(
            "open",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        sc
    }

    pub fn send_raw(&mut self, line: &str) {
        let stdin = self.stdin.as_mut().expect("stdin open");
        writeln!(stdin, "{}", line).expect("write request");
        stdin.flush().expect("flush request");
    }

    /// Next non-event line; event lines are collected on the way.
    pub fn read_reply(&mut self) -> Value {
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).expect("read response line");
            assert!(n > 0, "daemon closed stdout");
            let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
            if value.get("event").is_some() {
                self.events.push(value);
                continue;
            }
            return value;
        }
    }

    pub fn request(&mut self, id: &str, method: &str, params: Value) -> Value {
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        self.send_raw(&payload.to_string());
        let value = self.read_reply();
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
        value
    }

    pub fn ok(&mut self, id: &str, method: &str, params: Value) -> Value {
        let value = self.request(id, method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(Value::Null)
    }

    /// Returns the error code of a request expected to fail.
    pub fn err_code(&mut self, id: &str, method: &str, params: Value) -> String {
        let value = self.request(id, method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value
            .pointer("/error/code")
            .and_then(|v| v.as_str())
            .expect("error code")
            .to_string()
    }

    pub fn events_named(&self, name: &str) -> Vec<&Value> {
        self.events
            .iter()
            .filter(|e| e.get("event").and_then(|v| v.as_str()) == Some(name))
            .collect()
    }

    /// Polls `queue.status` until the queue is idle or `timeout` passes.
    pub fn wait_idle(&mut self, timeout: Duration) -> Value {
        let started = std::time::Instant::now();
        let mut n = 0;
        loop {
            n += 1;
            let status = self.ok(&format!("idle-{}", n), "queue.status", json!({}));
            let pending = status.get("pending").and_then(|v| v.as_u64()).unwrap_or(0);
            let in_flight = status.get("inFlight").and_then(|v| v.as_bool()).unwrap_or(false);
            if pending == 0 && !in_flight {
                return status;
            }
            assert!(started.elapsed() < timeout, "queue never drained: {}", status);
            std::thread::sleep(Duration::from_millis(25));
        }
    }

    /// Closes stdin and collects the remaining event lines until exit.
    pub fn shutdown(mut self) -> Vec<Value> {
        drop(self.stdin.take());
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if let Ok(v) = serde_json::from_str::<Value>(line.trim()) {
                        if v.get("event").is_some() {
                            self.events.push(v);
                        }
                    }
                }
            }
        }
        let _ = self.child.wait();
        std::mem::take(&mut self.events)
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn assessment(id: &str, category: &str, max: f64) -> Value {
    json!({
        "id": id,
        "name": id.to_uppercase(),
        "category": category,
        "maxScore": max,
    })
}

pub fn assert_close(actual: Option<f64>, expected: f64) {
    let a = actual.unwrap_or_else(|| panic!("expected {}, got null", expected));
    assert!((a - expected).abs() < 1e-9, "expected {}, got {}", expected, a);
}
