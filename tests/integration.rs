//! Integration tests for the lantern binary.
//!
//! These drive the server end-to-end over stdio with `Content-Length` framed
//! JSON-RPC, including real worker processes.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::{TempDir, tempdir};

const RECV_TIMEOUT: Duration = Duration::from_secs(20);

/// Get a command for the lantern binary.
fn lantern() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("lantern").unwrap()
}

fn frame(message: &Value) -> Vec<u8> {
    let body = serde_json::to_string(message).unwrap();
    format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
}

fn frames(messages: &[Value]) -> Vec<u8> {
    messages.iter().flat_map(frame).collect()
}

/// Parse every framed message out of captured stdout.
fn parse_frames(mut bytes: &[u8]) -> Vec<Value> {
    let mut messages = Vec::new();
    while let Some(message) = read_frame(&mut bytes) {
        messages.push(message);
    }
    messages
}

fn read_frame(reader: &mut impl BufRead) -> Option<Value> {
    let mut length = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).ok()? == 0 {
            return None;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("Content-Length:") {
            length = value.trim().parse::<usize>().ok();
        }
    }
    let mut body = vec![0; length?];
    reader.read_exact(&mut body).ok()?;
    serde_json::from_slice(&body).ok()
}

fn initialize(id: i64, options: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": "initialize",
            "params": { "initializationOptions": options } })
}

fn notification(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "method": method, "params": params })
}

fn request(id: i64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

fn did_open(uri: &str, text: &str) -> Value {
    notification(
        "textDocument/didOpen",
        json!({ "textDocument": { "uri": uri, "languageId": "rust", "version": 1, "text": text } }),
    )
}

fn hover(id: i64, uri: &str, line: u32, character: u32) -> Value {
    request(
        id,
        "textDocument/hover",
        json!({ "textDocument": { "uri": uri }, "position": { "line": line, "character": character } }),
    )
}

/// Fresh working directory and config home, so no real user middleware leaks in.
fn sandbox() -> TempDir {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("config")).unwrap();
    dir
}

fn file_uri(dir: &Path, name: &str) -> String {
    format!("file://{}/{}", dir.display(), name)
}

/// A running server with a background reader collecting its output.
struct Session {
    child: Child,
    stdin: Option<ChildStdin>,
    output: Receiver<Value>,
}

impl Session {
    fn start(dir: &Path, args: &[&str]) -> Self {
        #[allow(deprecated)]
        let program = assert_cmd::cargo::cargo_bin("lantern");
        let mut child = std::process::Command::new(program)
            .args(args)
            .current_dir(dir)
            .env("XDG_CONFIG_HOME", dir.join("config"))
            .env_remove("LANTERN_LOG")
            .env_remove("LANTERN_WORKERS")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();

        let stdout = child.stdout.take().unwrap();
        let (tx, output) = mpsc::channel();
        thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            while let Some(message) = read_frame(&mut reader) {
                if tx.send(message).is_err() {
                    break;
                }
            }
        });

        Self {
            stdin: child.stdin.take(),
            child,
            output,
        }
    }

    fn send(&mut self, message: Value) {
        let stdin = self.stdin.as_mut().unwrap();
        stdin.write_all(&frame(&message)).unwrap();
        stdin.flush().unwrap();
    }

    /// Read messages until the reply to `id` arrives; returns everything read.
    fn until_reply(&self, id: i64) -> Vec<Value> {
        let mut seen = Vec::new();
        loop {
            let message = self
                .output
                .recv_timeout(RECV_TIMEOUT)
                .unwrap_or_else(|_| panic!("no reply to request {} (got {:?})", id, seen));
            let done = message["id"] == json!(id) && message.get("method").is_none();
            seen.push(message);
            if done {
                return seen;
            }
        }
    }

    fn reply(&self, id: i64) -> Value {
        self.until_reply(id).pop().unwrap()
    }

    fn exit(mut self) -> i32 {
        self.send(notification("exit", Value::Null));
        self.stdin.take();
        self.child.wait().unwrap().code().unwrap()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn test_help_displays() {
    lantern()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--workers"))
        .stdout(predicate::str::contains("--queue-order"))
        .stdout(predicate::str::contains("--internal-worker").not());
}

#[test]
fn test_version_displays() {
    lantern()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_completions_bash() {
    lantern()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("lantern"));
}

#[test]
fn test_internal_worker_requires_bridge() {
    lantern()
        .arg("--internal-worker")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("--bridge"));
}

#[test]
fn test_invalid_queue_order_rejected() {
    lantern()
        .args(["--queue-order", "random"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("random"));
}

#[test]
fn test_session_with_worker_processes() {
    let dir = sandbox();
    let uri = file_uri(dir.path(), "main.rs");
    let mut session = Session::start(dir.path(), &["--stdio", "--workers", "2"]);

    session.send(initialize(1, json!({})));
    let init = session.reply(1);
    assert_eq!(init["result"]["serverInfo"]["name"], json!("lantern"));
    assert!(init["result"]["capabilities"]["hoverProvider"].as_bool().unwrap());

    session.send(notification("initialized", json!({})));
    session.send(did_open(&uri, "let total = total + 1;\n"));

    session.send(hover(2, &uri, 0, 5));
    let hover = session.reply(2);
    assert_eq!(
        hover["result"]["contents"]["value"],
        json!("`total`\n\n2 occurrences in this file")
    );

    session.send(request(3, "textDocument/codeLens", json!({ "textDocument": { "uri": uri } })));
    assert!(session.reply(3)["result"].is_array());

    session.send(request(4, "workspace/unknownThing", json!({})));
    assert_eq!(session.reply(4)["error"]["code"], json!(-32601));

    session.send(request(5, "shutdown", Value::Null));
    assert_eq!(session.reply(5)["result"], Value::Null);
    assert_eq!(session.exit(), 0);
}

#[test]
fn test_did_change_is_visible_to_later_worker_requests() {
    let dir = sandbox();
    let uri = file_uri(dir.path(), "edit.rs");
    let mut session = Session::start(dir.path(), &["--workers", "2"]);

    session.send(initialize(1, json!({})));
    session.reply(1);
    session.send(notification("initialized", json!({})));
    session.send(did_open(&uri, "alpha\n"));

    for id in 2..=4 {
        session.send(hover(id, &uri, 0, 1));
    }
    session.send(notification(
        "textDocument/didChange",
        json!({
            "textDocument": { "uri": uri, "version": 2 },
            "contentChanges": [{ "text": "alpha alpha alpha\n" }]
        }),
    ));
    session.send(hover(5, &uri, 0, 1));

    let seen = session.until_reply(5);
    for id in 2..=4 {
        assert!(
            seen.iter().any(|m| m["id"] == json!(id)),
            "request {} was never answered",
            id
        );
    }
    assert_eq!(
        seen.last().unwrap()["result"]["contents"]["value"],
        json!("`alpha`\n\n3 occurrences in this file")
    );

    session.send(request(6, "shutdown", Value::Null));
    session.reply(6);
    assert_eq!(session.exit(), 0);
}

#[test]
fn test_cancel_with_worker_processes() {
    let dir = sandbox();
    let uri = file_uri(dir.path(), "cancel.rs");
    let mut session = Session::start(dir.path(), &["--workers", "2"]);

    session.send(initialize(1, json!({})));
    session.reply(1);
    session.send(did_open(&uri, "word word\n"));

    // Workers start on `initialized`, so this request is still queued.
    session.send(hover(2, &uri, 0, 1));
    session.send(notification("$/cancelRequest", json!({ "id": 2 })));
    session.send(notification("initialized", json!({})));

    assert_eq!(session.reply(2)["result"], Value::Null);

    session.send(hover(3, &uri, 0, 1));
    assert_eq!(
        session.reply(3)["result"]["contents"]["value"],
        json!("`word`\n\n2 occurrences in this file")
    );

    session.send(request(4, "shutdown", Value::Null));
    session.reply(4);
    assert_eq!(session.exit(), 0);
}

#[test]
fn test_did_open_emits_telemetry() {
    let dir = sandbox();
    let uri = file_uri(dir.path(), "lib.rs");
    let mut session = Session::start(dir.path(), &["--workers", "0"]);

    session.send(initialize(1, json!({})));
    session.reply(1);
    session.send(notification("initialized", json!({})));
    session.send(did_open(&uri, "fn main() {}\n"));
    session.send(request(2, "shutdown", Value::Null));

    let seen = session.until_reply(2);
    let telemetry = seen
        .iter()
        .find(|m| {
            m["method"] == json!("telemetry/event")
                && m["params"]["request"] == json!("textDocument/didOpen")
        })
        .expect("didOpen telemetry");
    assert_eq!(telemetry["params"]["lspVersion"], json!(env!("CARGO_PKG_VERSION")));
    assert!(telemetry["params"]["requestTime"].as_f64().unwrap() >= 0.0);
    assert_eq!(session.exit(), 0);
}

#[test]
fn test_inline_mode_piped_session() {
    let dir = sandbox();
    let uri = file_uri(dir.path(), "a.rs");
    let input = frames(&[
        initialize(1, json!({ "workerCount": 0 })),
        notification("initialized", json!({})),
        did_open(&uri, "x \n"),
        notification("textDocument/didClose", json!({ "textDocument": { "uri": uri } })),
        request(2, "shutdown", Value::Null),
        notification("exit", Value::Null),
    ]);

    let output = lantern()
        .current_dir(dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join("config"))
        .write_stdin(input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let messages = parse_frames(&output);
    let published = messages
        .iter()
        .find(|m| m["method"] == json!("textDocument/publishDiagnostics"))
        .expect("didClose clears diagnostics");
    assert_eq!(published["params"]["diagnostics"], json!([]));

    let shutdown = messages.iter().find(|m| m["id"] == json!(2)).unwrap();
    assert_eq!(shutdown["result"], Value::Null);
}

#[test]
fn test_exit_without_shutdown_with_open_document() {
    let dir = sandbox();
    let uri = file_uri(dir.path(), "open.rs");
    let input = frames(&[
        initialize(1, json!({})),
        notification("initialized", json!({})),
        did_open(&uri, "still here"),
        notification("exit", Value::Null),
    ]);

    lantern()
        .args(["--workers", "0"])
        .current_dir(dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join("config"))
        .write_stdin(input)
        .assert()
        .code(1);
}

#[test]
fn test_end_of_input_exits_cleanly() {
    let dir = sandbox();
    lantern()
        .args(["--workers", "0"])
        .current_dir(dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join("config"))
        .write_stdin(frames(&[initialize(1, json!({}))]))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"serverInfo\""));
}

#[test]
fn test_request_before_initialize_is_rejected() {
    let dir = sandbox();
    let output = lantern()
        .args(["--workers", "0"])
        .current_dir(dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join("config"))
        .write_stdin(frames(&[hover(9, "file:///nowhere.rs", 0, 0)]))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let messages = parse_frames(&output);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["id"], json!(9));
    assert_eq!(messages[0]["error"]["code"], json!(-32002));
}

#[test]
fn test_project_middleware_reaches_workers() {
    let dir = sandbox();
    let middleware = dir.path().join(".lantern").join("middleware");
    std::fs::create_dir_all(&middleware).unwrap();
    std::fs::write(
        middleware.join("notes.toml"),
        "[[hover]]\nappend = \"\\n\\nChecked by project rules\"\n",
    )
    .unwrap();

    let uri = file_uri(dir.path(), "m.rs");
    let mut session = Session::start(dir.path(), &["--workers", "1"]);
    session.send(initialize(1, json!({})));
    session.reply(1);
    session.send(notification("initialized", json!({})));
    session.send(did_open(&uri, "value"));
    session.send(hover(2, &uri, 0, 1));

    let value = session.reply(2)["result"]["contents"]["value"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(value.starts_with("`value`"));
    assert!(value.ends_with("Checked by project rules"));

    session.send(request(3, "shutdown", Value::Null));
    session.reply(3);
    assert_eq!(session.exit(), 0);
}

#[test]
fn test_broken_extension_is_reported_to_client() {
    let dir = sandbox();
    let search_path = dir.path().join("ext");
    std::fs::create_dir_all(search_path.join("lantern")).unwrap();
    std::fs::write(search_path.join("lantern").join("extension.toml"), "name = ").unwrap();

    let extension_path = search_path.display().to_string();
    let mut session = Session::start(
        dir.path(),
        &["--workers", "0", "--extension-path", &extension_path],
    );
    session.send(initialize(1, json!({})));

    let seen = session.until_reply(1);
    let log = seen
        .iter()
        .find(|m| m["method"] == json!("window/logMessage"))
        .expect("extension error surfaced");
    assert_eq!(log["params"]["type"], json!(2));
    assert!(log["params"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Error loading extensions"));
    assert!(seen.last().unwrap()["result"]["capabilities"].is_object());

    assert_eq!(session.exit(), 0);
}
