//! Connection-level tests for the stdio server
//!
//! Each test drives a full connection over an in-memory duplex pipe.

pub mod connection_tests;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{ConnectionStats, FrameEvent, FrameReader, FramingMode, StdioServer};

/// Feed `input` to a fresh connection, close it, and collect everything written back.
pub(crate) async fn exchange(server: &StdioServer, input: &[u8]) -> (Vec<u8>, ConnectionStats) {
    let (mut client, transport) = tokio::io::duplex(256 * 1024);
    let (reader, writer) = tokio::io::split(transport);
    let server = server.clone();
    let task = tokio::spawn(async move { server.serve(reader, writer).await });

    client.write_all(input).await.unwrap();
    client.shutdown().await.unwrap();

    let mut output = Vec::new();
    client.read_to_end(&mut output).await.unwrap();
    let stats = task.await.unwrap().unwrap();
    (output, stats)
}

/// Decode newline-framed output into JSON values.
pub(crate) fn newline_messages(output: &[u8]) -> Vec<Value> {
    std::str::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// Decode content-length framed output into JSON values.
pub(crate) fn content_length_messages(output: &[u8]) -> Vec<Value> {
    let mut reader = FrameReader::new(FramingMode::ContentLength);
    reader
        .push(output)
        .into_iter()
        .map(|event| match event {
            FrameEvent::Frame(bytes) => serde_json::from_slice(&bytes).unwrap(),
            FrameEvent::Violation(err) | FrameEvent::Rejected { error: err, .. } => {
                panic!("unexpected violation in output: {}", err)
            }
        })
        .collect()
}
