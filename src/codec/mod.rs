//! Codec module - envelope serialization for the wire.
//!
//! The multiplexer never looks inside a payload. It only needs to reach the
//! correlation ID of a request, and the correlation ID and optional error
//! string of a response. Those are described by [`RequestEnvelope`] and
//! [`ResponseEnvelope`]; turning envelopes into bytes and back is the job of a
//! [`Codec`].
//!
//! Shipped codecs:
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`)
//! - [`JsonCodec`] - JSON using `serde_json`
//!
//! Both work with any serde envelope; [`Request`] and [`Response`] are ready
//! made generic ones.
//!
//! # Example
//!
//! ```
//! use iterm2_client::codec::{Codec, MsgPackCodec, Request, Response};
//!
//! let codec = MsgPackCodec::<Request<String>, Response<String>>::new();
//! let mut req = Request::new("hello".to_string());
//! req.id = 7;
//! let bytes = codec.encode(&req).unwrap();
//! assert!(!bytes.is_empty());
//! ```

mod envelope;
mod json;
mod msgpack;

use bytes::Bytes;

use crate::error::Result;

pub use envelope::{Request, Response};
pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

/// An outbound message carrying a caller-assigned correlation ID.
pub trait RequestEnvelope: Send + 'static {
    /// Current correlation ID (0 until assigned).
    fn id(&self) -> u64;

    /// Assign the correlation ID. Called once, right before dispatch.
    fn set_id(&mut self, id: u64);
}

/// An inbound message answering a request.
pub trait ResponseEnvelope: Send + 'static {
    /// What a successful call hands back to its caller.
    type Payload: Send + 'static;

    /// Correlation ID of the request this answers.
    fn id(&self) -> u64;

    /// Server-reported error, if any. Empty strings count as no error.
    fn error(&self) -> Option<&str>;

    /// Consume the envelope and return its payload.
    fn into_payload(self) -> Self::Payload;
}

/// Turns request envelopes into wire messages and wire messages into
/// response envelopes.
pub trait Codec: Send + Sync + 'static {
    /// Envelope type sent to the server.
    type Request: RequestEnvelope;
    /// Envelope type received from the server.
    type Response: ResponseEnvelope;

    /// Serialize a request into one wire message.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Encode`](crate::RpcError::Encode) if the request
    /// cannot be serialized.
    fn encode(&self, request: &Self::Request) -> Result<Bytes>;

    /// Deserialize one wire message into a response.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Decode`](crate::RpcError::Decode) on malformed input.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Response>;
}

/// Server error string of a response, treating `Some("")` as no error.
pub(crate) fn remote_error<R: ResponseEnvelope>(response: &R) -> Option<&str> {
    response.error().filter(|e| !e.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_ignores_empty_string() {
        let ok: Response<i32> = Response::ok(1, 5);
        assert_eq!(remote_error(&ok), None);

        let empty = Response::<i32> {
            id: 1,
            error: Some(String::new()),
            payload: None,
        };
        assert_eq!(remote_error(&empty), None);

        let failed: Response<i32> = Response::err(1, "busted");
        assert_eq!(remote_error(&failed), Some("busted"));
    }
}
