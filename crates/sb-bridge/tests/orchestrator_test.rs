use std::sync::Arc;
use std::time::Duration;

use sb_bridge::connection::ClientHandle;
use sb_bridge::protocol::ServerMessage;
use sb_bridge::server::{AppState, DEFAULT_HEARTBEAT};
use sb_session::in_process::{FakeHandle, InProcessSpawner};
use sb_session::SessionSettings;
use serde_json::{json, Value};
use tempfile::TempDir;

struct Harness {
    state: Arc<AppState>,
    spawner: InProcessSpawner,
    _scratch: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with(|_| {})
    }

    fn with(configure: impl FnOnce(&mut SessionSettings)) -> Self {
        let scratch = tempfile::tempdir().unwrap();
        let mut settings = SessionSettings {
            scratch_dir: scratch.path().join("scratch"),
            ..SessionSettings::default()
        };
        configure(&mut settings);
        let spawner = InProcessSpawner::new();
        let state = AppState::build(settings, Arc::new(spawner.clone()), DEFAULT_HEARTBEAT);
        Self {
            state,
            spawner,
            _scratch: scratch,
        }
    }

    fn connect(&self) -> Client {
        let (handle, rx) = self.state.gateway.connect();
        let client = Client { handle, rx };
        client.drain();
        client
    }

    async fn send(&self, client: &Client, msg: Value) {
        self.state
            .gateway
            .dispatch(&client.handle, &msg.to_string())
            .await;
    }

    fn handle_named(&self, name: &str) -> FakeHandle {
        self.spawner
            .spawned()
            .into_iter()
            .find(|h| {
                h.profile()
                    .env
                    .contains(&("SWITCHBOARD_AGENT_NAME".to_string(), name.to_string()))
            })
            .unwrap_or_else(|| panic!("no process spawned for {name}"))
    }
}

struct Client {
    handle: ClientHandle,
    rx: flume::Receiver<ServerMessage>,
}

impl Client {
    fn drain(&self) -> Vec<Value> {
        self.rx
            .try_iter()
            .map(|m| serde_json::to_value(&m).unwrap())
            .collect()
    }

    /// Everything streamed so far as `agent-output`, concatenated.
    fn agent_text(&self) -> String {
        self.drain()
            .into_iter()
            .filter(|m| m["type"] == "agent-output")
            .map(|m| m["data"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    async fn next_of(&self, kind: &str) -> Value {
        let wait = async {
            loop {
                let msg = self.rx.recv_async().await.unwrap();
                let value = serde_json::to_value(&msg).unwrap();
                if value["type"] == kind {
                    return value;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(2), wait)
            .await
            .unwrap_or_else(|_| panic!("no {kind} message arrived"))
    }
}

async fn create(h: &Harness, client: &Client, name: &str) -> String {
    h.send(client, json!({"type": "terminal-create", "id": name, "agentName": name}))
        .await;
    let reply = client.next_of("terminal-created").await;
    assert_eq!(reply["success"], true, "create {name}: {reply}");
    assert_eq!(reply["id"], name);
    reply["terminalId"].as_str().unwrap().to_string()
}

async fn init(h: &Harness, client: &Client) -> FakeHandle {
    h.send(client, json!({"type": "orchestrator-init"})).await;
    h.handle_named("orchestrator")
}

// ---------------------------------------------------------------------------
// Terminal messages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_input_and_streamed_output() {
    let h = Harness::new();
    let client = h.connect();
    let id = create(&h, &client, "worker").await;

    h.send(&client, json!({"type": "terminal-input", "terminalId": id, "data": "ls\r"}))
        .await;
    let worker = h.handle_named("worker");
    assert_eq!(worker.input_string(), "ls\r");

    worker.emit("file.txt\r\n");
    let out = client.next_of("terminal-output").await;
    assert_eq!(out["terminalId"], id.as_str());
    assert_eq!(out["data"], "file.txt\r\n");
}

#[tokio::test]
async fn input_accepts_session_name() {
    let h = Harness::new();
    let client = h.connect();
    create(&h, &client, "worker").await;
    h.send(&client, json!({"type": "terminal-input", "terminalId": "worker", "data": "pwd\r"}))
        .await;
    assert_eq!(h.handle_named("worker").input_string(), "pwd\r");
}

#[tokio::test]
async fn create_beyond_capacity_fails_with_reason() {
    let h = Harness::with(|s| s.max_sessions = 1);
    let client = h.connect();
    create(&h, &client, "one").await;

    h.send(&client, json!({"type": "terminal-create", "agentName": "two"}))
        .await;
    let reply = client.next_of("terminal-created").await;
    assert_eq!(reply["success"], false);
    assert!(reply["error"].as_str().unwrap().contains('1'));
    assert_eq!(h.spawner.count(), 1);
}

#[tokio::test]
async fn create_with_unknown_agent_type_is_invalid() {
    let h = Harness::new();
    let client = h.connect();
    h.send(&client, json!({"type": "terminal-create", "agentType": "vim"}))
        .await;
    let reply = client.next_of("error").await;
    assert_eq!(reply["code"], "invalid_payload");
    assert_eq!(h.spawner.count(), 0);
}

#[tokio::test]
async fn destroy_twice_reports_failure_the_second_time() {
    let h = Harness::new();
    let client = h.connect();
    let id = create(&h, &client, "worker").await;

    h.send(&client, json!({"type": "terminal-destroy", "terminalId": id}))
        .await;
    let first = client.next_of("terminal-destroyed").await;
    assert_eq!(first["success"], true);
    assert!(!h.handle_named("worker").is_alive());

    h.send(&client, json!({"type": "terminal-destroy", "terminalId": id}))
        .await;
    let second = client.next_of("terminal-destroyed").await;
    assert_eq!(second["success"], false);
    assert!(second["error"].is_string());
}

#[tokio::test]
async fn input_to_unknown_terminal_is_not_found() {
    let h = Harness::new();
    let client = h.connect();
    h.send(&client, json!({"type": "terminal-input", "terminalId": "ghost", "data": "x"}))
        .await;
    let reply = client.next_of("error").await;
    assert_eq!(reply["code"], "not_found");
    assert_eq!(reply["requestType"], "terminal-input");
}

#[tokio::test]
async fn resize_rejects_zero_dimensions() {
    let h = Harness::new();
    let client = h.connect();
    let id = create(&h, &client, "worker").await;

    h.send(&client, json!({"type": "terminal-resize", "terminalId": id, "cols": 0, "rows": 40}))
        .await;
    assert_eq!(client.next_of("error").await["code"], "invalid_payload");

    h.send(&client, json!({"type": "terminal-resize", "terminalId": id, "cols": 132, "rows": 40}))
        .await;
    assert_eq!(h.handle_named("worker").size(), (132, 40));
}

#[tokio::test]
async fn list_and_logs() {
    let h = Harness::new();
    let client = h.connect();
    let id = create(&h, &client, "worker").await;
    h.handle_named("worker").emit("hello\r\n");
    client.next_of("terminal-output").await;

    h.send(&client, json!({"type": "terminal-list"})).await;
    let list = client.next_of("terminal-list").await;
    let terminals = list["terminals"].as_array().unwrap();
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0]["name"], "worker");
    assert_eq!(terminals[0]["id"], id.as_str());

    h.send(&client, json!({"type": "terminal-logs", "id": 3, "terminalId": "worker"}))
        .await;
    let logs = client.next_of("terminal-logs").await;
    assert_eq!(logs["success"], true);
    assert_eq!(logs["id"], 3);
    assert_eq!(logs["entries"][0]["data"], "hello\r\n");
}

#[tokio::test]
async fn terminal_command_writes_line_or_runs_directive() {
    let h = Harness::new();
    let client = h.connect();
    let id = create(&h, &client, "worker").await;

    h.send(&client, json!({"type": "terminal-command", "id": 1, "terminalId": id, "command": "make test"}))
        .await;
    let reply = client.next_of("command-executed").await;
    assert_eq!(reply["success"], true);
    let worker = h.handle_named("worker");
    assert_eq!(worker.input_string(), "make test\r");

    worker.clear_input();
    h.send(&client, json!({"type": "terminal-command", "id": 2, "terminalId": id, "command": "status"}))
        .await;
    let mut streamed = String::new();
    loop {
        let msg = client.rx.recv_async().await.unwrap();
        let value = serde_json::to_value(&msg).unwrap();
        match value["type"].as_str() {
            Some("terminal-output") => streamed.push_str(value["data"].as_str().unwrap()),
            Some("command-executed") => {
                assert_eq!(value["success"], true);
                break;
            }
            _ => {}
        }
    }
    assert!(streamed.contains("worker"), "status table in stream: {streamed:?}");
    assert!(worker.input().is_empty(), "directive never reaches the process");
}

#[tokio::test]
async fn process_exit_is_reported_to_owner() {
    let h = Harness::new();
    let client = h.connect();
    let id = create(&h, &client, "worker").await;
    h.handle_named("worker").exit(3);

    let exit = client.next_of("terminal-exit").await;
    assert_eq!(exit["terminalId"], id.as_str());
    assert_eq!(exit["exitCode"], 3);
}

#[tokio::test]
async fn disconnect_releases_sessions_without_killing_them() {
    let h = Harness::new();
    let client = h.connect();
    let id = create(&h, &client, "worker").await;

    h.state.gateway.disconnect(&client.handle);
    let snapshot = h.state.manager.lookup(&id).unwrap();
    assert!(snapshot.owner.is_none());
    assert!(h.handle_named("worker").is_alive());
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn init_creates_control_session_and_greets() {
    let h = Harness::new();
    let client = h.connect();
    init(&h, &client).await;
    let text = client.agent_text();
    assert!(text.contains("orchestrator ready"), "{text:?}");
    assert!(text.contains("ohelp"));

    let control = h.state.manager.lookup("orchestrator").unwrap();
    assert!(control.control);
}

#[tokio::test]
async fn second_init_reattaches_instead_of_spawning() {
    let h = Harness::new();
    let first = h.connect();
    init(&h, &first).await;
    h.state.gateway.disconnect(&first.handle);

    let second = h.connect();
    init(&h, &second).await;
    assert_eq!(h.spawner.count(), 1);
    assert!(second.agent_text().contains("re-attached"));
    let control = h.state.manager.lookup("orchestrator").unwrap();
    assert_eq!(control.owner, Some(second.handle.id()));
}

#[tokio::test]
async fn orchestrator_command_requires_init() {
    let h = Harness::new();
    let client = h.connect();
    h.send(&client, json!({"type": "orchestrator-command", "command": "status"}))
        .await;
    assert_eq!(client.next_of("error").await["code"], "invalid_payload");
}

#[tokio::test]
async fn typed_directive_is_never_forwarded() {
    let h = Harness::new();
    let client = h.connect();
    let control = init(&h, &client).await;
    client.drain();

    h.send(
        &client,
        json!({"type": "orchestrator-command", "subtype": "terminal-input", "data": "status\r"}),
    )
    .await;
    assert!(!control.input_string().contains("status"));
    assert!(client.agent_text().contains("orchestrator*"));
}

#[tokio::test]
async fn directive_typed_one_key_at_a_time_is_intercepted() {
    let h = Harness::new();
    let client = h.connect();
    let control = init(&h, &client).await;
    client.drain();

    for key in ["q", "u", "e", "u", "e", "\r"] {
        h.send(
            &client,
            json!({"type": "terminal-input", "terminalId": "orchestrator", "data": key}),
        )
        .await;
    }
    let typed = control.input_string();
    assert!(!typed.contains('\r'), "terminator withheld: {typed:?}");
    assert!(typed.ends_with('\x15'), "echoed prefix discarded: {typed:?}");
    assert!(client.agent_text().contains("handoff queue is empty"));
}

#[tokio::test]
async fn ordinary_lines_pass_through_untouched() {
    let h = Harness::new();
    let client = h.connect();
    let control = init(&h, &client).await;

    h.send(
        &client,
        json!({"type": "orchestrator-command", "subtype": "terminal-input", "data": "ls -la\r"}),
    )
    .await;
    assert_eq!(control.input_string(), "ls -la\r");
}

#[tokio::test]
async fn spawn_send_and_logs_directives() {
    let h = Harness::new();
    let client = h.connect();
    init(&h, &client).await;

    h.send(&client, json!({"type": "orchestrator-command", "command": "spawn worker"}))
        .await;
    let worker = h.state.manager.lookup("worker").unwrap();
    assert_eq!(worker.owner, Some(client.handle.id()));
    assert!(client.agent_text().contains("spawned shell session 'worker'"));

    h.send(&client, json!({"type": "orchestrator-command", "command": "send worker cargo test"}))
        .await;
    let process = h.handle_named("worker");
    assert_eq!(process.input_string(), "cargo test\r");
    assert!(client.agent_text().contains("sent to worker"));

    process.emit("ok\r\n");
    client.next_of("terminal-output").await;
    h.send(&client, json!({"type": "orchestrator-command", "command": "logs worker 5"}))
        .await;
    let text = client.agent_text();
    assert!(text.contains("last 1 entries of worker"), "{text:?}");
    assert!(text.contains("ok"));
}

#[tokio::test]
async fn directive_errors_are_printed_not_raised() {
    let h = Harness::new();
    let client = h.connect();
    init(&h, &client).await;
    client.drain();

    h.send(&client, json!({"type": "orchestrator-command", "command": "send ghost hi"}))
        .await;
    let msgs = client.drain();
    assert!(msgs.iter().all(|m| m["type"] != "error"));
    let text: String = msgs
        .iter()
        .filter_map(|m| m["data"].as_str())
        .collect();
    assert!(text.contains("error:"), "{text:?}");

    h.send(&client, json!({"type": "orchestrator-command", "command": "spawn"}))
        .await;
    assert!(client.agent_text().contains("usage: spawn <name>"));
}

#[tokio::test]
async fn broadcast_skips_control_and_dead_sessions() {
    let h = Harness::new();
    let client = h.connect();
    let control = init(&h, &client).await;
    create(&h, &client, "alive").await;
    create(&h, &client, "dead").await;
    h.handle_named("dead").mark_dead();
    control.clear_input();

    h.send(&client, json!({"type": "orchestrator-command", "command": "broadcast git pull"}))
        .await;
    assert_eq!(h.handle_named("alive").input_string(), "git pull\r");
    assert!(control.input().is_empty());
    assert!(client.agent_text().contains("broadcast to 1 session(s)"));
}

#[tokio::test]
async fn hidden_sessions_do_not_stream() {
    let h = Harness::new();
    let client = h.connect();
    init(&h, &client).await;
    h.send(&client, json!({"type": "orchestrator-command", "command": "spawn-hidden scout claude"}))
        .await;
    assert!(client.agent_text().contains("output hidden"));

    let scout = h.handle_named("scout");
    scout.emit("secret\r\n");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client.drain().iter().all(|m| m["type"] != "terminal-output"));

    let logs = h.state.manager.logs(h.state.manager.resolve("scout").unwrap(), 10).unwrap();
    assert_eq!(logs.len(), 1);
}

#[tokio::test]
async fn handoff_directive_and_queue() {
    let h = Harness::new();
    let client = h.connect();
    init(&h, &client).await;
    create(&h, &client, "worker").await;

    h.send(
        &client,
        json!({"type": "orchestrator-command", "command": "handoff worker reviewer please review"}),
    )
    .await;
    let text = client.agent_text();
    assert!(text.contains("handoff worker: worker -> reviewer (1 transition(s))"), "{text:?}");

    let id = h.state.manager.resolve("worker").unwrap();
    assert_eq!(h.state.manager.current_agent(id).unwrap(), "reviewer");
    let history = h.state.manager.history(id).unwrap();
    assert_eq!(history[0].context.message, "please review");

    h.send(&client, json!({"type": "orchestrator-command", "command": "queue"}))
        .await;
    let text = client.agent_text();
    assert!(text.contains("worker -> reviewer [directive] please review"), "{text:?}");
}

#[tokio::test]
async fn handoff_requested_in_output_is_recorded() {
    let h = Harness::new();
    let client = h.connect();
    create(&h, &client, "worker").await;

    h.handle_named("worker")
        .emit("done with parsing\r\nhandoff-to:tester run the suite\r\n");
    let banner = loop {
        let out = client.next_of("terminal-output").await;
        let data = out["data"].as_str().unwrap().to_string();
        if data.contains("[handoff]") {
            break data;
        }
    };
    assert!(banner.contains("worker -> tester: run the suite"), "{banner:?}");
    let id = h.state.manager.resolve("worker").unwrap();
    assert_eq!(h.state.manager.current_agent(id).unwrap(), "tester");
}

#[tokio::test]
async fn claude_directive_starts_then_reuses_a_session() {
    let h = Harness::new();
    let client = h.connect();
    init(&h, &client).await;

    h.send(&client, json!({"type": "orchestrator-command", "command": "claude explain this"}))
        .await;
    let text = client.agent_text();
    assert!(text.contains("started claude-1"), "{text:?}");
    let agent = h.handle_named("claude-1");
    assert_eq!(agent.input_string(), "explain this\r");

    h.send(&client, json!({"type": "orchestrator-command", "command": "claude and test it"}))
        .await;
    assert_eq!(agent.input_string(), "explain this\rand test it\r");
    assert!(h.state.manager.lookup("claude-2").is_err());
    assert_eq!(h.spawner.count(), 2);
}

#[tokio::test]
async fn plain_orchestrator_command_is_typed_into_control() {
    let h = Harness::new();
    let client = h.connect();
    let control = init(&h, &client).await;
    h.send(&client, json!({"type": "orchestrator-command", "command": "echo hi"}))
        .await;
    assert_eq!(control.input_string(), "echo hi\r");
}
