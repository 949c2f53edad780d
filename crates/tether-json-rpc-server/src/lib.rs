//! # JSON-RPC 2.0 Server Core
//!
//! Transport-agnostic JSON-RPC 2.0 building blocks: wire types, message
//! classification, error mapping, a concurrency gate and an async dispatcher.
//! Nothing in this crate performs I/O; framing and byte streams live in
//! `tether-stdio-server`.
//!
//! ## Features
//! - Requests, notifications and batches classified once into [`IncomingMessage`]
//! - Every request answered exactly once, with its original id
//! - Bounded concurrent request handling via [`ConcurrencyGate`]
//! - Lifecycle hooks around dispatch via [`DispatchHooks`]

pub mod dispatch;
pub mod error;
pub mod gate;
pub mod mapping;
pub mod notification;
pub mod prelude;
pub mod request;
pub mod response;
pub mod types;

#[cfg(feature = "async")]
pub mod r#async;

// Re-export main types
pub use dispatch::{IncomingMessage, parse_frame, recover_request_id};
pub use error::{HandlerError, JsonRpcError, JsonRpcErrorCode, JsonRpcErrorObject};
pub use gate::{ConcurrencyGate, GatePermit};
pub use mapping::map_error;
pub use notification::JsonRpcNotification;
pub use request::{JsonRpcRequest, RequestParams};
pub use response::{JsonRpcMessage, JsonRpcResponse, ResponseResult};
pub use types::{JsonRpcVersion, RequestId};

#[cfg(feature = "async")]
pub use r#async::{
    DispatchHooks, DispatchTarget, JsonRpcDispatcher, JsonRpcResult, NotificationHandler,
    RequestContext, RequestHandler, notification_fn, request_fn,
};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;

    /// Generic server error
    pub const SERVER_ERROR: i64 = -32000;
    pub const UNAUTHORIZED: i64 = -32002;
    pub const CAPACITY_EXCEEDED: i64 = -32003;
    /// Size-limit violation (oversized header or message)
    pub const MESSAGE_TOO_LARGE: i64 = -32004;
    pub const UPSTREAM_UNAVAILABLE: i64 = -32005;
    pub const CONFIGURATION_ERROR: i64 = -32006;
    pub const RESOURCE_NOT_FOUND: i64 = -32007;
    pub const REQUEST_TIMEOUT: i64 = -32008;

    // Whole range reserved by JSON-RPC 2.0
    pub const RESERVED_MIN: i64 = -32768;
    pub const RESERVED_MAX: i64 = -32000;
}
