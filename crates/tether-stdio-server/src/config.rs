//! Transport configuration.
//!
//! Loading configuration files is left to the embedding application; this
//! struct is what it hands over, either built in code or deserialized.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_json_rpc_server::gate::DEFAULT_MAX_CONCURRENT_REQUESTS;

use crate::detect::FramingMode;

/// Default cap on a single message body (10 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;
/// Default cap on a content-length header block (4 KiB).
pub const DEFAULT_MAX_HEADER_SIZE: usize = 4 * 1024;
/// Default size of each read from the input stream.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 8 * 1024;

/// Configuration for a stdio JSON-RPC connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Framing discipline, or `auto` to detect from the first bytes
    pub framing: FramingMode,
    /// Request handlers allowed to run at once (minimum 1)
    pub max_concurrent_requests: usize,
    /// Largest accepted message body, in bytes
    pub max_message_size: usize,
    /// Largest accepted content-length header block, in bytes
    pub max_header_size: usize,
    /// Bytes requested per read from the input stream
    pub read_chunk_size: usize,
    /// Per-request handler timeout; `None` waits forever
    #[serde(with = "optional_millis")]
    pub request_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            framing: FramingMode::Auto,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            request_timeout: None,
        }
    }
}

/// `request_timeout` travels as integer milliseconds.
mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
