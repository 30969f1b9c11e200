//! Router control channel contract.
//!
//! The controller talks to each connected router over a bidirectional
//! message channel. The transport itself lives outside this crate; the
//! controller only depends on send, request/reply correlation and close.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ChannelError;

/// A typed message on a control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub content_type: u32,
    pub body: Bytes,
}

impl ControlMessage {
    pub fn new(content_type: u32, body: impl Into<Bytes>) -> Self {
        Self {
            content_type,
            body: body.into(),
        }
    }

    /// Encode a protobuf message as the body.
    pub fn encode<M: prost::Message>(content_type: u32, msg: &M) -> Self {
        Self::new(content_type, msg.encode_to_vec())
    }

    /// Decode the body, checking the content type first.
    pub fn decode<M: prost::Message + Default>(&self, expected: u32) -> Result<M, ChannelError> {
        if self.content_type != expected {
            return Err(ChannelError::UnexpectedContentType {
                expected,
                actual: self.content_type,
            });
        }
        Ok(M::decode(self.body.clone())?)
    }
}

/// Per-router control channel.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Id of the router on the other end.
    fn peer_id(&self) -> &str;

    /// Fire-and-forget send.
    async fn send(&self, msg: ControlMessage) -> Result<(), ChannelError>;

    /// Send and wait for the correlated reply. Callers bound the wait with
    /// their own deadline.
    async fn request(&self, msg: ControlMessage) -> Result<ControlMessage, ChannelError>;

    fn is_closed(&self) -> bool;

    async fn close(&self) -> Result<(), ChannelError>;
}
