//! Transport and framing resolution.
//!
//! Runs once before any bytes are read. Explicit options win over the
//! environment; with no signal at all the result is stdio with framing left
//! at [`FramingMode::Auto`], which the frame reader settles from the first
//! bytes it sees.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Environment variable naming the transport kind.
pub const ENV_TRANSPORT: &str = "TETHER_TRANSPORT";
/// Environment variable naming the framing mode.
pub const ENV_FRAMING: &str = "TETHER_FRAMING";
/// Environment variable holding the endpoint URL for http/ws transports.
pub const ENV_ENDPOINT: &str = "TETHER_ENDPOINT";

/// A concrete framing discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Framing {
    /// `Content-Length: N\r\n\r\n` header block followed by N bytes.
    ContentLength,
    /// One JSON value per `\n`-terminated line.
    Newline,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::ContentLength => write!(f, "content-length"),
            Framing::Newline => write!(f, "newline"),
        }
    }
}

/// Configured framing: a fixed discipline or autodetection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FramingMode {
    ContentLength,
    Newline,
    #[default]
    Auto,
}

impl FramingMode {
    /// The fixed discipline, or `None` for autodetection.
    pub fn fixed(&self) -> Option<Framing> {
        match self {
            FramingMode::ContentLength => Some(Framing::ContentLength),
            FramingMode::Newline => Some(Framing::Newline),
            FramingMode::Auto => None,
        }
    }
}

impl From<Framing> for FramingMode {
    fn from(framing: Framing) -> Self {
        match framing {
            Framing::ContentLength => FramingMode::ContentLength,
            Framing::Newline => FramingMode::Newline,
        }
    }
}

impl fmt::Display for FramingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingMode::ContentLength => write!(f, "content-length"),
            FramingMode::Newline => write!(f, "newline"),
            FramingMode::Auto => write!(f, "auto"),
        }
    }
}

impl FromStr for FramingMode {
    type Err = DetectError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match normalize(input).as_str() {
            "content-length" | "contentlength" | "header" | "headers" | "lsp" => {
                Ok(FramingMode::ContentLength)
            }
            "newline" | "ndjson" | "jsonl" | "line" | "lines" => Ok(FramingMode::Newline),
            "auto" | "detect" => Ok(FramingMode::Auto),
            _ => Err(DetectError::UnknownFraming(input.to_string())),
        }
    }
}

/// Kind of byte transport the server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Stdio,
    Http,
    WebSocket,
}

impl TransportKind {
    /// URL schemes an endpoint for this transport may use.
    pub fn schemes(&self) -> &'static [&'static str] {
        match self {
            TransportKind::Stdio => &[],
            TransportKind::Http => &["http", "https"],
            TransportKind::WebSocket => &["ws", "wss"],
        }
    }

    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "http" | "https" => Some(TransportKind::Http),
            "ws" | "wss" => Some(TransportKind::WebSocket),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Http => write!(f, "http"),
            TransportKind::WebSocket => write!(f, "websocket"),
        }
    }
}

/// Parsed transport name; `legacy` forces auto framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TransportName {
    kind: TransportKind,
    legacy: bool,
}

impl FromStr for TransportName {
    type Err = DetectError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (kind, legacy) = match normalize(input).as_str() {
            "stdio" | "process" | "pipe" => (TransportKind::Stdio, false),
            "legacy" | "stdio-legacy" => (TransportKind::Stdio, true),
            "http" | "https" | "streamable-http" => (TransportKind::Http, false),
            "ws" | "wss" | "websocket" => (TransportKind::WebSocket, false),
            _ => return Err(DetectError::UnknownTransport(input.to_string())),
        };
        Ok(Self { kind, legacy })
    }
}

/// Explicit transport settings supplied by the embedding application.
#[derive(Debug, Clone, Default)]
pub struct DetectOptions {
    pub transport: Option<String>,
    pub framing: Option<String>,
    pub endpoint: Option<String>,
    pub headers: HashMap<String, String>,
}

impl DetectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = Some(transport.into());
        self
    }

    pub fn framing(mut self, framing: impl Into<String>) -> Self {
        self.framing = Some(framing.into());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Outcome of detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTransport {
    pub transport: TransportKind,
    pub framing: FramingMode,
    pub endpoint: Option<Url>,
    pub headers: HashMap<String, String>,
}

/// Errors raised while resolving the transport.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DetectError {
    #[error("unknown transport '{0}' (expected stdio, http or websocket)")]
    UnknownTransport(String),

    #[error("unknown framing mode '{0}' (expected content-length, newline or auto)")]
    UnknownFraming(String),

    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("endpoint '{endpoint}' does not match transport {transport}: expected scheme {expected}")]
    SchemeMismatch {
        endpoint: String,
        transport: TransportKind,
        expected: String,
    },

    #[error("transport {0} requires an endpoint URL")]
    MissingEndpoint(TransportKind),

    #[error("stdio transport does not take an endpoint (got '{0}')")]
    UnexpectedEndpoint(String),
}

/// Resolve against the process environment.
pub fn detect(options: &DetectOptions) -> Result<ResolvedTransport, DetectError> {
    detect_with_env(options, |key| std::env::var(key).ok())
}

/// Resolve with an injected environment lookup.
pub fn detect_with_env<F>(options: &DetectOptions, env: F) -> Result<ResolvedTransport, DetectError>
where
    F: Fn(&str) -> Option<String>,
{
    let pick = |explicit: &Option<String>, key: &str| {
        explicit
            .clone()
            .or_else(|| env(key))
            .filter(|value| !value.trim().is_empty())
    };

    let transport_name = pick(&options.transport, ENV_TRANSPORT)
        .map(|raw| raw.parse::<TransportName>())
        .transpose()?;
    let framing = pick(&options.framing, ENV_FRAMING)
        .map(|raw| raw.parse::<FramingMode>())
        .transpose()?;
    let endpoint = pick(&options.endpoint, ENV_ENDPOINT)
        .map(|raw| parse_endpoint(&raw))
        .transpose()?;

    let transport = match (transport_name, &endpoint) {
        (Some(name), _) => name.kind,
        (None, Some(url)) => TransportKind::from_scheme(url.scheme()).ok_or_else(|| {
            DetectError::InvalidEndpoint {
                endpoint: url.to_string(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            }
        })?,
        (None, None) => TransportKind::Stdio,
    };

    match (&endpoint, transport) {
        (Some(url), TransportKind::Stdio) => {
            return Err(DetectError::UnexpectedEndpoint(url.to_string()));
        }
        (Some(url), kind) if !kind.schemes().contains(&url.scheme()) => {
            return Err(DetectError::SchemeMismatch {
                endpoint: url.to_string(),
                transport: kind,
                expected: kind.schemes().join(" or "),
            });
        }
        (None, TransportKind::Http | TransportKind::WebSocket) => {
            return Err(DetectError::MissingEndpoint(transport));
        }
        _ => {}
    }

    let legacy = transport_name.is_some_and(|name| name.legacy);
    let framing = if legacy {
        FramingMode::Auto
    } else {
        framing.unwrap_or_default()
    };

    let resolved = ResolvedTransport {
        transport,
        framing,
        endpoint,
        headers: options.headers.clone(),
    };
    debug!(transport = %resolved.transport, framing = %resolved.framing, "transport resolved");
    Ok(resolved)
}

fn parse_endpoint(raw: &str) -> Result<Url, DetectError> {
    Url::parse(raw.trim()).map_err(|err| DetectError::InvalidEndpoint {
        endpoint: raw.to_string(),
        reason: err.to_string(),
    })
}

fn normalize(input: &str) -> String {
    input.trim().to_ascii_lowercase().replace('_', "-")
}
