use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sb_bridge::connection::Connections;
use sb_bridge::error::{GatewayError, Result};
use sb_bridge::gateway::{handler_fn, Gateway, MessageHandler, Middleware, Next, RequestContext};
use sb_bridge::protocol::ServerMessage;
use serde_json::Value;

fn echo(tag: &'static str) -> Arc<dyn MessageHandler> {
    handler_fn(move |ctx: RequestContext| async move {
        let text = ctx.payload["text"].as_str().unwrap_or_default().to_string();
        ctx.reply(ServerMessage::AgentOutput {
            agent_id: tag.to_string(),
            data: text,
        });
        Ok(())
    })
}

fn gateway() -> Gateway {
    let mut gw = Gateway::new(Connections::new(), 4);
    gw.register_handler("echo", echo("echo"));
    gw
}

fn drain(rx: &flume::Receiver<ServerMessage>) -> Vec<Value> {
    rx.try_iter()
        .map(|m| serde_json::to_value(&m).unwrap())
        .collect()
}

#[tokio::test]
async fn connect_announces_capabilities() {
    let gw = gateway();
    let (client, rx) = gw.connect();
    let msgs = drain(&rx);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0]["type"], "connection-established");
    assert_eq!(msgs[0]["maxTerminals"], 4);
    assert_eq!(msgs[0]["capabilities"], serde_json::json!(["echo"]));
    assert_eq!(msgs[0]["clientId"], client.id().to_string());
}

#[tokio::test]
async fn malformed_json_reports_error_and_connection_stays_usable() {
    let gw = gateway();
    let (client, rx) = gw.connect();
    drain(&rx);

    gw.dispatch(&client, "{not json").await;
    let msgs = drain(&rx);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0]["type"], "error");
    assert_eq!(msgs[0]["success"], false);
    assert_eq!(msgs[0]["code"], "malformed_message");

    gw.dispatch(&client, r#"{"type":"echo","text":"still here"}"#).await;
    let msgs = drain(&rx);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0]["data"], "still here");
}

#[tokio::test]
async fn missing_type_is_malformed() {
    let gw = gateway();
    let (client, rx) = gw.connect();
    drain(&rx);
    gw.dispatch(&client, r#"{"text":"x"}"#).await;
    gw.dispatch(&client, r#"[1,2,3]"#).await;
    let msgs = drain(&rx);
    assert_eq!(msgs.len(), 2);
    assert!(msgs.iter().all(|m| m["code"] == "malformed_message"));
}

#[tokio::test]
async fn unknown_type_is_reported_with_request_type() {
    let gw = gateway();
    let (client, rx) = gw.connect();
    drain(&rx);
    gw.dispatch(&client, r#"{"type":"teleport"}"#).await;
    let msgs = drain(&rx);
    assert_eq!(msgs[0]["code"], "unknown_message_type");
    assert_eq!(msgs[0]["success"], false);
    assert_eq!(msgs[0]["requestType"], "teleport");
}

#[tokio::test]
async fn last_registration_wins() {
    let mut gw = gateway();
    gw.register_handler("echo", echo("second"));
    let (client, rx) = gw.connect();
    drain(&rx);
    gw.dispatch(&client, r#"{"type":"echo","text":"x"}"#).await;
    let msgs = drain(&rx);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0]["agentId"], "second");
}

#[tokio::test]
async fn handler_errors_become_error_messages() {
    let mut gw = gateway();
    gw.register_handler(
        "strict",
        handler_fn(|ctx: RequestContext| async move {
            #[derive(serde::Deserialize)]
            #[allow(dead_code)]
            struct Strict {
                count: u32,
            }
            let _: Strict = ctx.parse()?;
            Ok(())
        }),
    );
    let (client, rx) = gw.connect();
    drain(&rx);
    gw.dispatch(&client, r#"{"type":"strict","count":"many"}"#).await;
    let msgs = drain(&rx);
    assert_eq!(msgs[0]["code"], "invalid_payload");
    assert_eq!(msgs[0]["requestType"], "strict");
}

struct Record {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl Middleware for Record {
    async fn handle(&self, ctx: &RequestContext, next: Next<'_>) -> Result<()> {
        self.log.lock().unwrap().push(self.name);
        next.run(ctx).await
    }
}

struct Halt;

#[async_trait]
impl Middleware for Halt {
    async fn handle(&self, ctx: &RequestContext, next: Next<'_>) -> Result<()> {
        if ctx.payload["blocked"] == true {
            return Ok(());
        }
        next.run(ctx).await
    }
}

#[tokio::test]
async fn middleware_runs_in_order_and_can_short_circuit() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut gw = gateway();
    gw.use_middleware(Arc::new(Record {
        name: "first",
        log: log.clone(),
    }));
    gw.use_middleware(Arc::new(Halt));
    gw.use_middleware(Arc::new(Record {
        name: "third",
        log: log.clone(),
    }));
    let (client, rx) = gw.connect();
    drain(&rx);

    gw.dispatch(&client, r#"{"type":"echo","text":"a"}"#).await;
    assert_eq!(*log.lock().unwrap(), vec!["first", "third"]);
    assert_eq!(drain(&rx).len(), 1);

    log.lock().unwrap().clear();
    gw.dispatch(&client, r#"{"type":"echo","text":"b","blocked":true}"#).await;
    assert_eq!(*log.lock().unwrap(), vec!["first"]);
    assert!(drain(&rx).is_empty(), "halted message gets no reply");
}

#[tokio::test]
async fn middleware_sees_unknown_types_too() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut gw = gateway();
    gw.use_middleware(Arc::new(Record {
        name: "seen",
        log: log.clone(),
    }));
    let (client, rx) = gw.connect();
    drain(&rx);
    gw.dispatch(&client, r#"{"type":"nope"}"#).await;
    assert_eq!(*log.lock().unwrap(), vec!["seen"]);
    assert_eq!(drain(&rx)[0]["code"], "unknown_message_type");
}

#[tokio::test]
async fn panicking_disconnect_callback_does_not_block_others() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut gw = gateway();
    let c = calls.clone();
    gw.on_disconnect(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    gw.on_disconnect(|_| panic!("callback failure"));
    let c = calls.clone();
    gw.on_disconnect(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    let (client, _rx) = gw.connect();
    gw.disconnect(&client);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(gw.connections().is_empty());

    gw.disconnect(&client);
    assert_eq!(calls.load(Ordering::SeqCst), 2, "callbacks run once per connection");
}

#[tokio::test]
async fn broadcast_skips_closed_connections() {
    let gw = gateway();
    let (a, rx_a) = gw.connect();
    let (b, _rx_b) = gw.connect();
    let (c, rx_c) = gw.connect();
    gw.disconnect(&b);

    let msg = ServerMessage::AgentOutput {
        agent_id: "all".into(),
        data: "hi".into(),
    };
    assert_eq!(gw.broadcast([a.id(), b.id(), c.id()], &msg), 2);
    assert_eq!(gw.broadcast_all(&msg), 2);
    assert_eq!(drain(&rx_a).len(), 3);
    assert_eq!(drain(&rx_c).len(), 3);
}

#[tokio::test]
async fn unknown_type_error_is_not_fatal() {
    let gw = gateway();
    let (client, rx) = gw.connect();
    drain(&rx);
    gw.dispatch(&client, r#"{"type":"bogus"}"#).await;
    gw.dispatch(&client, r#"{"type":"echo","text":"ok"}"#).await;
    let msgs = drain(&rx);
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[1]["data"], "ok");
    let _ = GatewayError::UnknownMessageType("x".into());
}
