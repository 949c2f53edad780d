//! Outbound message encoding.
//!
//! Responses are written in the discipline the connection resolved for its
//! input. Each message goes out as one contiguous buffer under a lock, so
//! concurrent handlers never interleave bytes.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::trace;

use tether_json_rpc_server::JsonRpcMessage;

use crate::Result;
use crate::detect::Framing;

/// Wrap an encoded body in the given framing.
pub fn encode_frame(framing: Framing, body: &[u8]) -> Vec<u8> {
    match framing {
        Framing::ContentLength => {
            let header = format!("Content-Length: {}\r\n\r\n", body.len());
            let mut out = Vec::with_capacity(header.len() + body.len());
            out.extend_from_slice(header.as_bytes());
            out.extend_from_slice(body);
            out
        }
        Framing::Newline => {
            let mut out = Vec::with_capacity(body.len() + 1);
            out.extend_from_slice(body);
            out.push(b'\n');
            out
        }
    }
}

/// Serialized writer shared by all in-flight handlers of a connection.
#[derive(Debug)]
pub struct ResponseWriter<W> {
    inner: Mutex<W>,
}

impl<W> ResponseWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(writer),
        }
    }

    /// Serialize, frame and flush one message.
    pub async fn write_message(&self, framing: Framing, message: &JsonRpcMessage) -> Result<()> {
        let body = serde_json::to_vec(message)?;
        let frame = encode_frame(framing, &body);

        let mut writer = self.inner.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        trace!(bytes = frame.len(), %framing, "wrote response");
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}
