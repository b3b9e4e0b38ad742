//! Edge case integration tests for the JSON-RPC host.
//!
//! Covers malformed input, framing variations, dispatch failures and
//! concurrency between sequential and parallel handlers.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Notify;

use sqltools_service::types::{EventType, RequestType, SERVICE_VERSION};
use sqltools_service::{HandlerOptions, ServiceHost};

use common::{connect, Client};

const RECORD: RequestType<String, usize> = RequestType::new("test/record");
const NOTE: EventType<String> = EventType::new("test/note");
const SLOW: RequestType<(), &'static str> = RequestType::new("test/slow");
const FAST: RequestType<(), &'static str> = RequestType::new("test/fast");
const EXPLODE: RequestType<bool, ()> = RequestType::new("test/explode");
const FORGETFUL: RequestType<(), ()> = RequestType::new("test/forgetful");
const DEFERRED: RequestType<String, String> = RequestType::new("test/deferred");

// ─────────────────────── helpers ───────────────────────

/// A started host that records every `test/record` request and `test/note` event.
fn recording_host() -> (ServiceHost, Client, Arc<Mutex<Vec<String>>>) {
    let (host, client) = connect(false);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let requests = seen.clone();
    host.set_request_handler(&RECORD, HandlerOptions::default(), move |value, ctx| {
        let count = {
            let mut seen = requests.lock().unwrap();
            seen.push(value);
            seen.len()
        };
        async move { ctx.send_result(count) }
    })
    .unwrap();

    let events = seen.clone();
    host.set_event_handler(&NOTE, HandlerOptions::default(), move |value, _ctx| {
        events.lock().unwrap().push(format!("note:{value}"));
        async { Ok(()) }
    })
    .unwrap();

    host.start().unwrap();
    (host, client, seen)
}

/// A started host with a slow handler released by the returned `Notify`.
fn slow_fast_host(parallel: bool) -> (ServiceHost, Client, Arc<Notify>) {
    let (host, client) = connect(parallel);
    let release = Arc::new(Notify::new());

    let gate = release.clone();
    host.set_request_handler(&SLOW, HandlerOptions::parallel(), move |(), ctx| {
        let gate = gate.clone();
        async move {
            gate.notified().await;
            ctx.send_result("slow")
        }
    })
    .unwrap();
    host.set_request_handler(&FAST, HandlerOptions::parallel(), |(), ctx| async move {
        ctx.send_result("fast")
    })
    .unwrap();

    host.start().unwrap();
    (host, client, release)
}

fn frame(body: &str) -> String {
    format!("Content-Length: {}\r\n\r\n{}", body.len(), body)
}

// ─────────────────────── malformed input ───────────────────────

#[tokio::test]
async fn test_malformed_json_is_skipped() {
    let (_host, mut client, seen) = recording_host();

    client.send_raw(frame("{\"jsonrpc\": \"2.0\", \"id\": ").as_bytes()).await;
    client.send_raw(frame("[1, 2, 3]").as_bytes()).await;

    let reply = client.call(json!(1), "test/record", json!("after")).await;
    assert_eq!(reply["result"], 1);
    assert_eq!(*seen.lock().unwrap(), vec!["after".to_string()]);
}

#[tokio::test]
async fn test_invalid_envelopes_never_reach_handlers() {
    let (_host, mut client, seen) = recording_host();

    // Wrong protocol version.
    client
        .send(json!({"jsonrpc": "1.0", "id": 1, "method": "test/record", "params": "v1"}))
        .await;
    // Missing version.
    client
        .send(json!({"id": 2, "method": "test/record", "params": "none"}))
        .await;
    // Non-string method.
    client
        .send(json!({"jsonrpc": "2.0", "id": 3, "method": 42, "params": "num"}))
        .await;
    // Id without method, result or error.
    client.send(json!({"jsonrpc": "2.0", "id": 4})).await;

    let reply = client.call(json!(5), "test/record", json!("valid")).await;
    assert_eq!(reply["id"], 5, "earlier envelopes must not be answered");
    assert_eq!(*seen.lock().unwrap(), vec!["valid".to_string()]);
}

#[tokio::test]
async fn test_null_id_is_treated_as_event() {
    let (_host, mut client, seen) = recording_host();

    client
        .send(json!({"jsonrpc": "2.0", "id": null, "method": "test/note", "params": "x"}))
        .await;
    let reply = client.call(json!(1), "test/record", json!("y")).await;

    assert_eq!(reply["id"], 1);
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["note:x".to_string(), "y".to_string()]
    );
}

#[tokio::test]
async fn test_unknown_response_id_is_ignored() {
    let (_host, mut client, _seen) = recording_host();

    client
        .send(json!({"jsonrpc": "2.0", "id": "no-such-request", "result": true}))
        .await;
    let reply = client.call(json!(1), "version", Value::Null).await;
    assert_eq!(reply["result"], SERVICE_VERSION);
}

// ─────────────────────── framing ───────────────────────

#[tokio::test]
async fn test_header_case_and_extra_headers() {
    let (_host, mut client, _seen) = recording_host();

    let body = json!({"jsonrpc": "2.0", "id": 1, "method": "test/record", "params": "a"}).to_string();
    let raw = format!(
        "content-length: {}\r\nContent-Type: application/vscode-jsonrpc; charset=utf-8\r\n\r\n{}",
        body.len(),
        body
    );
    client.send_raw(raw.as_bytes()).await;

    let reply = client.recv().await;
    assert_eq!(reply["result"], 1);
}

#[tokio::test]
async fn test_frames_split_and_coalesced() {
    let (_host, mut client, _seen) = recording_host();

    let first = frame(&json!({"jsonrpc": "2.0", "id": 1, "method": "test/record", "params": "a"}).to_string());
    for chunk in first.as_bytes().chunks(7) {
        client.send_raw(chunk).await;
    }
    assert_eq!(client.recv().await["result"], 1);

    let two = format!(
        "{}{}",
        frame(&json!({"jsonrpc": "2.0", "id": 2, "method": "test/record", "params": "b"}).to_string()),
        frame(&json!({"jsonrpc": "2.0", "id": 3, "method": "test/record", "params": "c"}).to_string()),
    );
    client.send_raw(two.as_bytes()).await;
    assert_eq!(client.recv().await["id"], 2);
    assert_eq!(client.recv().await["id"], 3);
}

#[tokio::test]
async fn test_multibyte_body_length_counts_bytes() {
    let (_host, mut client, seen) = recording_host();

    let reply = client.call(json!(1), "test/record", json!("SELECT N'日本語'")).await;
    assert_eq!(reply["result"], 1);
    assert_eq!(*seen.lock().unwrap(), vec!["SELECT N'日本語'".to_string()]);
}

// ─────────────────────── dispatch failures ───────────────────────

#[tokio::test]
async fn test_unknown_and_reserved_methods() {
    let (_host, mut client, _seen) = recording_host();

    let reply = client.call(json!("abc"), "no/such/method", json!({})).await;
    assert_eq!(reply["id"], "abc");
    assert_eq!(reply["error"]["code"], -32601);

    let reply = client.call(json!(2), "rpc.discover", json!({})).await;
    assert_eq!(reply["error"]["code"], -32600);
}

#[tokio::test]
async fn test_panicking_handler_does_not_take_down_host() {
    let (host, mut client) = connect(false);
    host.set_request_handler(&EXPLODE, HandlerOptions::default(), |explode, ctx| async move {
        if explode {
            panic!("handler blew up");
        }
        ctx.send_result(())
    })
    .unwrap();
    host.start().unwrap();

    let reply = client.call(json!(1), "test/explode", json!(true)).await;
    assert_eq!(reply["error"]["code"], -32603);

    let reply = client.call(json!(2), "version", Value::Null).await;
    assert_eq!(reply["result"], SERVICE_VERSION);
}

#[tokio::test]
async fn test_handler_without_reply_gets_internal_error() {
    let (host, mut client) = connect(false);
    host.set_request_handler(&FORGETFUL, HandlerOptions::default(), |(), _ctx| async move {
        Ok(())
    })
    .unwrap();
    host.start().unwrap();

    let reply = client.call(json!(1), "test/forgetful", Value::Null).await;
    assert_eq!(reply["error"]["code"], -32603);
    assert!(reply["error"]["message"]
        .as_str()
        .unwrap()
        .contains("completed without a reply"));
}

#[tokio::test]
async fn test_context_handed_to_background_task() {
    let (host, mut client) = connect(false);
    host.set_request_handler(&DEFERRED, HandlerOptions::default(), |mode, ctx| async move {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            match mode.as_str() {
                "reply" => {
                    let _ = ctx.send_result("later".to_string());
                }
                "panic" => panic!("background task blew up while holding {ctx:?}"),
                _ => drop(ctx),
            }
        });
        Ok(())
    })
    .unwrap();
    host.start().unwrap();

    let reply = client.call(json!(1), "test/deferred", json!("reply")).await;
    assert_eq!(reply["result"], "later");

    let reply = client.call(json!(2), "test/deferred", json!("drop")).await;
    assert_eq!(reply["error"]["code"], -32603);

    let reply = client.call(json!(3), "test/deferred", json!("panic")).await;
    assert_eq!(reply["error"]["code"], -32603);

    // No stray second reply is queued ahead of the next answer.
    client.request(json!(4), "version", Value::Null).await;
    let reply = client.recv().await;
    assert_eq!(reply["id"], 4);
    assert_eq!(reply["result"], SERVICE_VERSION);
}

// ─────────────────────── concurrency ───────────────────────

#[tokio::test]
async fn test_parallel_handler_lets_later_requests_through() {
    let (_host, mut client, release) = slow_fast_host(true);

    client.request(json!(1), "test/slow", Value::Null).await;
    client.request(json!(2), "test/fast", Value::Null).await;

    let first = client.recv().await;
    assert_eq!(first["id"], 2);
    assert_eq!(first["result"], "fast");

    release.notify_one();
    let second = client.recv().await;
    assert_eq!(second["id"], 1);
    assert_eq!(second["result"], "slow");
}

#[tokio::test]
async fn test_sequential_processing_preserves_order() {
    let (_host, mut client, release) = slow_fast_host(false);

    client.request(json!(1), "test/slow", Value::Null).await;
    client.request(json!(2), "test/fast", Value::Null).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    release.notify_one();

    assert_eq!(client.recv().await["id"], 1);
    assert_eq!(client.recv().await["id"], 2);
}

// ─────────────────────── shutdown ───────────────────────

#[tokio::test]
async fn test_peer_disconnect_ends_host() {
    let (host, client, _seen) = recording_host();
    drop(client);

    tokio::time::timeout(Duration::from_secs(5), host.wait_for_exit())
        .await
        .expect("host did not exit after peer disconnect");
    assert!(!host.host().is_running());
}
