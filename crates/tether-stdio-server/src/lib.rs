//! # Stdio JSON-RPC Server
//!
//! Byte-stream transport for [`tether_json_rpc_server`]: frames JSON-RPC
//! messages out of stdin (or any [`tokio::io::AsyncRead`]), dispatches them
//! with bounded concurrency and writes responses back in the same framing.
//!
//! ## Framing
//! - **content-length**: `Content-Length: N\r\n\r\n` header block, then N bytes
//! - **newline**: one JSON value per line
//! - **auto**: picked from the first bytes of the connection, then fixed
//!
//! ## Example
//!
//! ```no_run
//! use serde_json::json;
//! use tether_stdio_server::{HandlerError, StdioServer, request_fn};
//!
//! # async fn run() -> tether_stdio_server::Result<()> {
//! let server = StdioServer::builder()
//!     .max_concurrent_requests(8)
//!     .method("ping", request_fn(|_req, _ctx| async {
//!         Ok::<_, HandlerError>(json!("pong"))
//!     }))
//!     .build();
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod detect;
pub mod framing;
pub mod server;
pub mod writer;

#[cfg(test)]
mod tests;

pub use config::TransportConfig;
pub use connection::{Connection, ConnectionStats};
pub use detect::{
    DetectError, DetectOptions, Framing, FramingMode, ResolvedTransport, TransportKind, detect,
    detect_with_env,
};
pub use framing::{FrameError, FrameEvent, FrameReader};
pub use server::{StdioServer, StdioServerBuilder};
pub use writer::{ResponseWriter, encode_frame};

// Re-export the dispatch layer so servers only need this crate
pub use tether_json_rpc_server::{
    DispatchHooks, DispatchTarget, HandlerError, JsonRpcDispatcher, JsonRpcResult,
    NotificationHandler, RequestContext, RequestHandler, notification_fn, request_fn,
};

/// Result type for stdio server operations
pub type Result<T> = std::result::Result<T, StdioServerError>;

/// Stdio server errors
#[derive(Debug, thiserror::Error)]
pub enum StdioServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport detection failed: {0}")]
    Detect(#[from] DetectError),

    #[error("Unsupported transport for stdio server: {0}")]
    UnsupportedTransport(TransportKind),
}
