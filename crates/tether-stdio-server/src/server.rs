//! Stdio server and its builder.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

use tether_json_rpc_server::{
    ConcurrencyGate, DispatchHooks, JsonRpcDispatcher, NotificationHandler, RequestHandler,
};

use crate::config::TransportConfig;
use crate::connection::{Connection, ConnectionStats};
use crate::detect::{FramingMode, ResolvedTransport, TransportKind};
use crate::{Result, StdioServerError};

/// Builder for [`StdioServer`]
pub struct StdioServerBuilder {
    config: TransportConfig,
    dispatcher: JsonRpcDispatcher,
}

impl StdioServerBuilder {
    pub fn new() -> Self {
        Self {
            config: TransportConfig::default(),
            dispatcher: JsonRpcDispatcher::new(),
        }
    }

    /// Replace the whole transport configuration
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    pub fn framing(mut self, framing: FramingMode) -> Self {
        self.config.framing = framing;
        self
    }

    pub fn max_concurrent_requests(mut self, limit: usize) -> Self {
        self.config.max_concurrent_requests = limit;
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    pub fn max_header_size(mut self, size: usize) -> Self {
        self.config.max_header_size = size;
        self
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Register a request handler for one method
    pub fn method<H>(mut self, method: impl Into<String>, handler: H) -> Self
    where
        H: RequestHandler + 'static,
    {
        self.dispatcher.register_method(method, handler);
        self
    }

    /// Register one request handler for several methods
    pub fn methods<H>(mut self, methods: Vec<String>, handler: H) -> Self
    where
        H: RequestHandler + 'static,
    {
        self.dispatcher.register_methods(methods, handler);
        self
    }

    pub fn notification<H>(mut self, method: impl Into<String>, handler: H) -> Self
    where
        H: NotificationHandler + 'static,
    {
        self.dispatcher.register_notification(method, handler);
        self
    }

    pub fn hooks<H>(mut self, hooks: H) -> Self
    where
        H: DispatchHooks + 'static,
    {
        self.dispatcher.set_hooks(hooks);
        self
    }

    /// Build the server; the registry is frozen from here on.
    pub fn build(self) -> StdioServer {
        let StdioServerBuilder {
            config,
            mut dispatcher,
        } = self;
        dispatcher.set_gate(ConcurrencyGate::new(config.max_concurrent_requests));
        dispatcher.set_request_timeout(config.request_timeout);

        StdioServer {
            connection: Connection::new(Arc::new(dispatcher), config),
        }
    }
}

impl Default for StdioServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON-RPC server speaking over a byte stream pair, stdin/stdout by default
#[derive(Clone)]
pub struct StdioServer {
    connection: Connection,
}

impl StdioServer {
    pub fn builder() -> StdioServerBuilder {
        StdioServerBuilder::new()
    }

    /// Start a builder from a detected transport.
    ///
    /// Only stdio can be served here; other kinds are reported back so the
    /// caller can pick a different server.
    pub fn from_detected(resolved: &ResolvedTransport) -> Result<StdioServerBuilder> {
        match resolved.transport {
            TransportKind::Stdio => Ok(StdioServerBuilder::new().framing(resolved.framing)),
            other => Err(StdioServerError::UnsupportedTransport(other)),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        self.connection.config()
    }

    /// Serve the process's stdin and stdout until stdin closes.
    pub async fn run(&self) -> Result<ConnectionStats> {
        info!(
            framing = %self.config().framing,
            max_concurrent_requests = self.config().max_concurrent_requests,
            "serving JSON-RPC over stdio"
        );
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve an arbitrary reader/writer pair until the reader reaches EOF.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<ConnectionStats>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.connection.run(reader, writer).await
    }
}
