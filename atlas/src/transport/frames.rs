//! Length-prefixed JSON frames over a byte stream pair.
//!
//! Each frame is a 4-byte big-endian length followed by one serialized
//! [`JsonRpcMessage`]. Generic over reader/writer so the protocol logic runs
//! unchanged over child stdio in production and `tokio::io::duplex` in tests.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::bytes::Bytes;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::transport::{JsonRpcMessage, TransportError};

/// Bidirectional frame pipe carrying JSON-RPC messages.
pub struct FramePipe<R, W> {
    reader: FramedRead<R, LengthDelimitedCodec>,
    writer: FramedWrite<W, LengthDelimitedCodec>,
}

impl<R, W> FramePipe<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(read: R, write: W) -> Self {
        Self {
            reader: FramedRead::new(read, LengthDelimitedCodec::new()),
            writer: FramedWrite::new(write, LengthDelimitedCodec::new()),
        }
    }

    /// Sends one message as one frame.
    pub async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        let bytes =
            serde_json::to_vec(message).map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.writer.send(Bytes::from(bytes)).await?;
        Ok(())
    }

    /// Receives the next message; `None` means the peer closed the stream.
    pub async fn recv(&mut self) -> Result<Option<JsonRpcMessage>, TransportError> {
        match self.reader.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(TransportError::Io(e)),
            Some(Ok(frame)) => {
                let message = serde_json::from_slice(&frame)
                    .map_err(|e| TransportError::Protocol(e.to_string()))?;
                Ok(Some(message))
            }
        }
    }

    /// Flushes and shuts the write half down (half-close towards the peer).
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.writer.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{RequestMessage, ResultMessage};
    use serde_json::json;

    /// **Scenario**: a request frame round-trips through a duplex pipe.
    #[tokio::test]
    async fn request_roundtrips_over_duplex() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);
        let mut client = FramePipe::new(client_read, client_write);
        let mut server = FramePipe::new(server_read, server_write);

        client
            .send(&JsonRpcMessage::Request(RequestMessage::new(
                "atlas-1",
                "tools/list",
                json!({}),
            )))
            .await
            .unwrap();

        let received = server.recv().await.unwrap().expect("one frame");
        match received {
            JsonRpcMessage::Request(req) => {
                assert_eq!(req.method, "tools/list");
                assert_eq!(req.id.as_str(), Some("atlas-1"));
            }
            other => panic!("expected request, got {:?}", other),
        }

        server
            .send(&JsonRpcMessage::Result(ResultMessage::success(
                "atlas-1",
                json!({"tools": []}),
            )))
            .await
            .unwrap();
        let reply = client.recv().await.unwrap().expect("one frame");
        assert!(matches!(reply, JsonRpcMessage::Result(_)));
    }

    /// **Scenario**: multiple frames arrive in order and intact.
    #[tokio::test]
    async fn frames_preserve_order() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);
        let mut client = FramePipe::new(client_read, client_write);
        let mut server = FramePipe::new(server_read, server_write);

        for i in 0..3 {
            client
                .send(&JsonRpcMessage::Request(RequestMessage::new(
                    format!("atlas-{i}").as_str(),
                    "tools/call",
                    json!({"n": i}),
                )))
                .await
                .unwrap();
        }
        for i in 0..3 {
            let msg = server.recv().await.unwrap().expect("frame");
            match msg {
                JsonRpcMessage::Request(req) => assert_eq!(req.params["n"], i),
                other => panic!("expected request, got {:?}", other),
            }
        }
    }

    /// **Scenario**: peer closing its write half yields None, not an error.
    #[tokio::test]
    async fn closed_peer_yields_none() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);
        let mut client = FramePipe::new(client_read, client_write);
        let server = FramePipe::new(server_read, server_write);

        drop(server);
        client.shutdown().await.unwrap();
        assert!(client.recv().await.unwrap().is_none());
    }

    /// **Scenario**: a frame that is not valid JSON surfaces a protocol error.
    #[tokio::test]
    async fn garbage_frame_is_protocol_error() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, _server_write) = tokio::io::split(server_io);
        let mut raw = FramedWrite::new(client_write, LengthDelimitedCodec::new());
        raw.send(Bytes::from_static(b"not json")).await.unwrap();
        drop(client_read);

        let mut server = FramePipe::new(server_read, tokio::io::sink());
        let err = server.recv().await;
        assert!(matches!(err, Err(TransportError::Protocol(_))));
    }
}
