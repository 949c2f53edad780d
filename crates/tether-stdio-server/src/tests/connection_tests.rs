//! End-to-end framing and message handling over a single connection

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};

use super::{content_length_messages, exchange, newline_messages};
use crate::{
    Framing, FramingMode, HandlerError, StdioServer, encode_frame, notification_fn, request_fn,
};
use tether_json_rpc_server::error_codes;

fn ping_server(framing: FramingMode) -> StdioServer {
    StdioServer::builder()
        .framing(framing)
        .method(
            "ping",
            request_fn(|_req, _ctx| async { Ok::<_, HandlerError>(json!({"ok": true})) }),
        )
        .method(
            "echo",
            request_fn(|req, _ctx| async move {
                Ok::<_, HandlerError>(req.params.map(|p| p.to_value()).unwrap_or(Value::Null))
            }),
        )
        .build()
}

#[tokio::test]
async fn test_ping_over_newline() {
    let server = ping_server(FramingMode::Newline);
    let (output, stats) = exchange(&server, b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n").await;

    assert_eq!(
        String::from_utf8(output).unwrap(),
        "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n"
    );
    assert_eq!(stats.frames, 1);
    assert_eq!(stats.requests, 1);
}

#[tokio::test]
async fn test_unknown_method_exact_error() {
    let server = ping_server(FramingMode::Newline);
    let (output, _) = exchange(&server, b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"missing\"}\n").await;

    assert_eq!(
        String::from_utf8(output).unwrap(),
        "{\"jsonrpc\":\"2.0\",\"id\":2,\"error\":{\"code\":-32601,\"message\":\"Method not found\"}}\n"
    );
}

#[tokio::test]
async fn test_not_json_yields_single_parse_error() {
    let server = ping_server(FramingMode::Auto);
    let (output, stats) = exchange(&server, b"not-json\n").await;

    let messages = newline_messages(&output);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["jsonrpc"], "2.0");
    assert_eq!(messages[0]["id"], Value::Null);
    assert_eq!(messages[0]["error"]["code"], error_codes::PARSE_ERROR);
    assert_eq!(stats.invalid, 1);
}

#[tokio::test]
async fn test_notification_produces_no_output() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let server = StdioServer::builder()
        .notification(
            "notifications/initialized",
            notification_fn(move |_n| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, HandlerError>(())
                }
            }),
        )
        .build();

    let input = concat!(
        "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
        "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\",\"params\":{\"x\":[1,2]}}\n",
        "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/unregistered\"}\n",
    );
    let (output, stats) = exchange(&server, input.as_bytes()).await;

    assert!(output.is_empty());
    assert_eq!(stats.notifications, 3);
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_content_length_round_trip() {
    let server = ping_server(FramingMode::ContentLength);
    let request = json!({
        "jsonrpc": "2.0",
        "id": "req-ü",
        "method": "echo",
        "params": {"text": "héllo", "n": [1, 2, 3]}
    });
    let body = serde_json::to_vec(&request).unwrap();
    let (output, _) = exchange(&server, &encode_frame(Framing::ContentLength, &body)).await;

    let messages = content_length_messages(&output);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["id"], "req-ü");
    assert_eq!(messages[0]["result"], request["params"]);
}

#[tokio::test]
async fn test_auto_detection_answers_in_detected_framing() {
    let server = ping_server(FramingMode::Auto);
    let request = br#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#;

    let (output, _) = exchange(&server, &encode_frame(Framing::ContentLength, request)).await;
    assert!(output.starts_with(b"Content-Length: "));
    assert_eq!(content_length_messages(&output)[0]["id"], 7);

    let (output, _) = exchange(&server, &encode_frame(Framing::Newline, request)).await;
    assert!(output.starts_with(b"{"));
    assert_eq!(newline_messages(&output)[0]["id"], 7);
}

#[tokio::test]
async fn test_oversized_content_length_then_valid_frame() {
    let server = StdioServer::builder()
        .framing(FramingMode::ContentLength)
        .max_message_size(64)
        .method(
            "ping",
            request_fn(|_req, _ctx| async { Ok::<_, HandlerError>(json!("pong")) }),
        )
        .build();

    let mut input = b"Content-Length: 100000\r\n\r\n".to_vec();
    input.extend(encode_frame(
        Framing::ContentLength,
        br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
    ));
    let (output, stats) = exchange(&server, &input).await;

    let messages = content_length_messages(&output);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["result"], "pong");
    assert_eq!(stats.violations, 1);
}

#[tokio::test]
async fn test_oversized_line_answered_with_its_id() {
    let server = StdioServer::builder()
        .framing(FramingMode::Newline)
        .max_message_size(64)
        .method(
            "ping",
            request_fn(|_req, _ctx| async { Ok::<_, HandlerError>(json!("pong")) }),
        )
        .build();

    let padding = "x".repeat(200);
    let input = format!(
        "{{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"ping\",\"params\":{{\"p\":\"{padding}\"}}}}\n\
         {{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"params\":{{\"p\":\"{padding}\"}}}}\n\
         {{\"jsonrpc\":\"2.0\",\"id\":8,\"method\":\"ping\"}}\n"
    );
    let (output, stats) = exchange(&server, input.as_bytes()).await;

    let mut messages = newline_messages(&output);
    messages.sort_by_key(|m| m["id"].as_i64());
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["id"], 7);
    assert_eq!(messages[0]["error"]["code"], error_codes::MESSAGE_TOO_LARGE);
    assert_eq!(messages[1]["id"], 8);
    assert_eq!(messages[1]["result"], "pong");
    assert_eq!(stats.violations, 2);
    assert_eq!(stats.requests, 1);
}

#[tokio::test]
async fn test_small_read_chunks() {
    let server = StdioServer::builder()
        .read_chunk_size(3)
        .method(
            "ping",
            request_fn(|req, _ctx| async move { Ok::<_, HandlerError>(json!(req.id)) }),
        )
        .build();

    let mut input = Vec::new();
    for id in 0..5 {
        let body = format!(r#"{{"jsonrpc":"2.0","id":{id},"method":"ping"}}"#);
        input.extend(encode_frame(Framing::ContentLength, body.as_bytes()));
    }
    let (output, stats) = exchange(&server, &input).await;

    let mut ids: Vec<i64> = content_length_messages(&output)
        .iter()
        .map(|m| m["result"].as_i64().unwrap())
        .collect();
    ids.sort();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    assert_eq!(stats.frames, 5);
}

#[tokio::test]
async fn test_batch_elements_answered_individually() {
    let server = ping_server(FramingMode::Newline);
    let input = concat!(
        "[",
        "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"},",
        "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"},",
        "{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"missing\"},",
        "{\"jsonrpc\":\"2.0\",\"id\":4}",
        "]\n"
    );
    let (output, stats) = exchange(&server, input.as_bytes()).await;

    let mut messages = newline_messages(&output);
    messages.sort_by_key(|m| m["id"].as_i64());
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0]["result"], json!({"ok": true}));
    assert_eq!(messages[1]["error"]["code"], error_codes::METHOD_NOT_FOUND);
    assert_eq!(messages[2]["error"]["code"], error_codes::INVALID_REQUEST);
    assert_eq!(stats.frames, 1);
    assert_eq!(stats.requests, 2);
    assert_eq!(stats.notifications, 1);
    assert_eq!(stats.invalid, 1);
}

#[tokio::test]
async fn test_invalid_request_keeps_id() {
    let server = ping_server(FramingMode::Newline);
    let (output, _) = exchange(&server, b"{\"jsonrpc\":\"2.0\",\"id\":\"abc\",\"method\":5}\n").await;

    let messages = newline_messages(&output);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["id"], "abc");
    assert_eq!(messages[0]["error"]["code"], error_codes::INVALID_REQUEST);
}

#[tokio::test]
async fn test_empty_input_closes_cleanly() {
    let server = ping_server(FramingMode::Auto);
    let (output, stats) = exchange(&server, b"").await;

    assert!(output.is_empty());
    assert_eq!(stats, Default::default());
}
