//! Maps handler failures onto standardized JSON-RPC error objects.
//!
//! Precedence is fixed: structured errors first, then operational categories
//! recognised from the error text, then `INTERNAL_ERROR`. Every object this
//! module returns carries a code in the reserved `-32768..=-32000` range.

use crate::error::{HandlerError, JsonRpcErrorObject};
use crate::error_codes;

/// Operational failure categories recognised from error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Capacity,
    PayloadTooLarge,
    UpstreamUnavailable,
    Configuration,
    Unauthorized,
    NotFound,
}

impl ErrorCategory {
    /// Categories in match order.
    const ORDERED: [ErrorCategory; 6] = [
        ErrorCategory::Capacity,
        ErrorCategory::PayloadTooLarge,
        ErrorCategory::UpstreamUnavailable,
        ErrorCategory::Configuration,
        ErrorCategory::Unauthorized,
        ErrorCategory::NotFound,
    ];

    pub fn code(&self) -> i64 {
        match self {
            ErrorCategory::Capacity => error_codes::CAPACITY_EXCEEDED,
            ErrorCategory::PayloadTooLarge => error_codes::MESSAGE_TOO_LARGE,
            ErrorCategory::UpstreamUnavailable => error_codes::UPSTREAM_UNAVAILABLE,
            ErrorCategory::Configuration => error_codes::CONFIGURATION_ERROR,
            ErrorCategory::Unauthorized => error_codes::UNAUTHORIZED,
            ErrorCategory::NotFound => error_codes::RESOURCE_NOT_FOUND,
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            ErrorCategory::Capacity => &[
                "too many concurrent",
                "too many requests",
                "concurrency limit",
                "capacity",
                "rate limit",
                "queue full",
            ],
            ErrorCategory::PayloadTooLarge => &[
                "too large",
                "exceeds maximum",
                "payload size",
                "size limit",
            ],
            ErrorCategory::UpstreamUnavailable => &[
                "unavailable",
                "connection refused",
                "connection reset",
                "timed out",
                "upstream",
            ],
            ErrorCategory::Configuration => &[
                "configuration",
                "misconfigured",
                "not configured",
            ],
            ErrorCategory::Unauthorized => &[
                "unauthorized",
                "unauthenticated",
                "forbidden",
                "permission denied",
                "access denied",
            ],
            ErrorCategory::NotFound => &["not found", "no such", "does not exist"],
        }
    }

    /// First category whose keywords appear in `message`, case-insensitively.
    pub fn classify(message: &str) -> Option<Self> {
        let lowered = message.to_lowercase();
        Self::ORDERED
            .into_iter()
            .find(|category| category.keywords().iter().any(|kw| lowered.contains(kw)))
    }
}

/// Turn a handler failure into the error object sent to the peer.
pub fn map_error(error: &HandlerError) -> JsonRpcErrorObject {
    match error {
        HandlerError::Validation { message, details } => {
            JsonRpcErrorObject::invalid_params(message, details.clone())
        }
        HandlerError::Rpc(object) if object.has_reserved_code() => object.clone(),
        HandlerError::Rpc(object) => JsonRpcErrorObject::internal_error(Some(object.message.clone())),
        HandlerError::Other(err) => map_message(&format!("{:#}", err)),
    }
}

/// Classify a bare error message.
pub fn map_message(message: &str) -> JsonRpcErrorObject {
    match ErrorCategory::classify(message) {
        Some(category) => JsonRpcErrorObject {
            code: category.code(),
            message: message.to_string(),
            data: None,
        },
        None => JsonRpcErrorObject::internal_error(Some(message.to_string())),
    }
}
