//! # JSON-RPC Server Prelude
//!
//! Convenient re-exports of the most commonly used types.
//!
//! ```rust
//! use tether_json_rpc_server::prelude::*;
//! ```

// Core JSON-RPC types
pub use crate::dispatch::IncomingMessage;
pub use crate::error::{HandlerError, JsonRpcError, JsonRpcErrorCode, JsonRpcErrorObject};
pub use crate::gate::ConcurrencyGate;
pub use crate::notification::JsonRpcNotification;
pub use crate::request::{JsonRpcRequest, RequestParams};
pub use crate::response::{JsonRpcMessage, JsonRpcResponse, ResponseResult};
pub use crate::types::{JsonRpcVersion, RequestId};

#[cfg(feature = "async")]
pub use crate::r#async::{
    DispatchHooks, JsonRpcDispatcher, JsonRpcResult, NotificationHandler, RequestContext,
    RequestHandler, notification_fn, request_fn,
};

// Standard error codes
pub use crate::error_codes::*;
