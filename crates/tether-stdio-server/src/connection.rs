//! One stdio connection: read loop, per-message tasks and the shared writer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use tether_json_rpc_server::{
    IncomingMessage, JsonRpcDispatcher, JsonRpcError, JsonRpcMessage, parse_frame,
};

use crate::Result;
use crate::config::TransportConfig;
use crate::detect::Framing;
use crate::framing::{FrameEvent, FrameReader};
use crate::writer::ResponseWriter;

/// Counters reported when a connection ends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Frames cut from the input stream
    pub frames: u64,
    pub requests: u64,
    pub notifications: u64,
    /// Messages answered with PARSE_ERROR or INVALID_REQUEST
    pub invalid: u64,
    /// Rejected headers or oversized frames, answered or not
    pub violations: u64,
    /// Responses that could not be written
    pub write_failures: u64,
}

/// Drives a single connection against a shared dispatcher.
#[derive(Clone)]
pub struct Connection {
    dispatcher: Arc<JsonRpcDispatcher>,
    config: TransportConfig,
}

impl Connection {
    pub fn new(dispatcher: Arc<JsonRpcDispatcher>, config: TransportConfig) -> Self {
        Self { dispatcher, config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Serve until `reader` reaches EOF.
    ///
    /// Every extracted message runs on its own task, so a slow handler never
    /// stalls extraction. On EOF all in-flight tasks are awaited before the
    /// stats are returned. A read error also waits for in-flight tasks and is
    /// then returned.
    pub async fn run<R, W>(&self, mut reader: R, writer: W) -> Result<ConnectionStats>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer = Arc::new(ResponseWriter::new(writer));
        let write_failures = Arc::new(AtomicU64::new(0));
        let mut frames = FrameReader::from_config(&self.config);
        let mut tasks = JoinSet::new();
        let mut stats = ConnectionStats::default();
        let chunk_size = self.config.read_chunk_size.max(1);
        let mut buf = BytesMut::with_capacity(chunk_size);

        info!(framing = %self.config.framing, "connection started");

        let outcome = loop {
            buf.clear();
            buf.reserve(chunk_size);
            match reader.read_buf(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(_) => {}
                Err(err) => break Err(err),
            }

            let events = frames.push(&buf);
            // Frames are only produced once a discipline is resolved.
            let framing = frames.framing().unwrap_or(Framing::Newline);

            for event in events {
                match event {
                    FrameEvent::Violation(violation) => {
                        stats.violations += 1;
                        warn!(code = violation.code(), "dropped frame: {}", violation);
                    }
                    FrameEvent::Rejected { id, error } => {
                        stats.violations += 1;
                        warn!(code = error.code(), id = %id, "rejected frame: {}", error);
                        let rejection = JsonRpcError::new(Some(id), error.error_object());
                        tasks.spawn(process_message(
                            Arc::clone(&self.dispatcher),
                            Arc::clone(&writer),
                            Arc::clone(&write_failures),
                            framing,
                            IncomingMessage::Invalid(rejection),
                        ));
                    }
                    FrameEvent::Frame(bytes) => {
                        stats.frames += 1;
                        for message in parse_frame(&bytes) {
                            match &message {
                                IncomingMessage::Request(_) => stats.requests += 1,
                                IncomingMessage::Notification(_) => stats.notifications += 1,
                                IncomingMessage::Invalid(_) => stats.invalid += 1,
                            }
                            tasks.spawn(process_message(
                                Arc::clone(&self.dispatcher),
                                Arc::clone(&writer),
                                Arc::clone(&write_failures),
                                framing,
                                message,
                            ));
                        }
                    }
                }
            }

            while let Some(joined) = tasks.try_join_next() {
                log_join_error(joined);
            }
        };

        while let Some(joined) = tasks.join_next().await {
            log_join_error(joined);
        }
        frames.reset();
        stats.write_failures = write_failures.load(Ordering::Relaxed);

        match outcome {
            Ok(()) => {
                info!(
                    frames = stats.frames,
                    requests = stats.requests,
                    notifications = stats.notifications,
                    invalid = stats.invalid,
                    violations = stats.violations,
                    "connection closed"
                );
                Ok(stats)
            }
            Err(err) => {
                error!("read failed, closing connection: {}", err);
                Err(err.into())
            }
        }
    }
}

async fn process_message<W>(
    dispatcher: Arc<JsonRpcDispatcher>,
    writer: Arc<ResponseWriter<W>>,
    write_failures: Arc<AtomicU64>,
    framing: Framing,
    message: IncomingMessage,
) where
    W: AsyncWrite + Unpin + Send,
{
    let response = match message {
        IncomingMessage::Request(request) => dispatcher.handle_request(request).await,
        IncomingMessage::Notification(notification) => {
            dispatcher.handle_notification(notification).await;
            return;
        }
        IncomingMessage::Invalid(err) => {
            debug!(code = err.error.code, "rejecting invalid message");
            JsonRpcMessage::error(err)
        }
    };

    if let Err(err) = writer.write_message(framing, &response).await {
        write_failures.fetch_add(1, Ordering::Relaxed);
        error!(id = ?response.id(), "failed to write response: {}", err);
    }
}

fn log_join_error(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        error!("message task failed: {}", err);
    }
}
