//! MsgPack codec using `rmp-serde`.
//!
//! Always uses `to_vec_named`, so structs go on the wire as maps with field
//! names rather than positional arrays. Peers that are not Rust decode the
//! map form without knowing our field order.
//!
//! # Example
//!
//! ```
//! use iterm2_client::codec::{Codec, MsgPackCodec, Request, Response};
//!
//! let codec = MsgPackCodec::<Request<u32>, Response<u32>>::new();
//! let encoded = codec.encode(&Request { id: 1, payload: 42 }).unwrap();
//! assert_eq!(encoded[0] & 0xF0, 0x80); // fixmap
//! ```

use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Codec, RequestEnvelope, ResponseEnvelope};
use crate::error::{Result, RpcError};

/// MessagePack codec for serde envelopes.
pub struct MsgPackCodec<Req, Resp> {
    _marker: PhantomData<fn() -> (Req, Resp)>,
}

impl<Req, Resp> MsgPackCodec<Req, Resp> {
    /// Create a new codec.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp> Default for MsgPackCodec<Req, Resp> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Resp> Clone for MsgPackCodec<Req, Resp> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<Req, Resp> fmt::Debug for MsgPackCodec<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MsgPackCodec")
    }
}

impl<Req, Resp> Codec for MsgPackCodec<Req, Resp>
where
    Req: RequestEnvelope + Serialize,
    Resp: ResponseEnvelope + DeserializeOwned,
{
    type Request = Req;
    type Response = Resp;

    #[inline]
    fn encode(&self, request: &Req) -> Result<Bytes> {
        // to_vec_named, NOT to_vec
        rmp_serde::to_vec_named(request)
            .map(Bytes::from)
            .map_err(|e| RpcError::Encode(e.to_string()))
    }

    #[inline]
    fn decode(&self, bytes: &[u8]) -> Result<Resp> {
        rmp_serde::from_slice(bytes).map_err(|e| RpcError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Request, Response};
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
    struct CreateTab {
        window: String,
        profile: Option<String>,
    }

    type Codec2 = MsgPackCodec<Request<CreateTab>, Response<CreateTab>>;

    #[test]
    fn test_response_decodes_from_server_bytes() {
        let server = Response::ok(
            99,
            CreateTab {
                window: "w1".into(),
                profile: None,
            },
        );
        let bytes = rmp_serde::to_vec_named(&server).unwrap();

        let decoded = Codec2::new().decode(&bytes).unwrap();
        assert_eq!(decoded, server);
    }

    #[test]
    fn test_request_uses_map_format() {
        let req = Request {
            id: 5,
            payload: CreateTab {
                window: "w".into(),
                profile: Some("Default".into()),
            },
        };

        let encoded = Codec2::new().encode(&req).unwrap();

        // 0x82 = fixmap with 2 entries (id, payload); array form would be 0x92
        assert_eq!(encoded[0], 0x82, "Expected map format, got {:02X}", encoded[0]);
    }

    #[test]
    fn test_error_response_decodes() {
        let bytes = rmp_serde::to_vec_named(&Response::<CreateTab>::err(3, "busted")).unwrap();
        let decoded = Codec2::new().decode(&bytes).unwrap();
        assert_eq!(decoded.id, 3);
        assert_eq!(decoded.error.as_deref(), Some("busted"));
        assert!(decoded.payload.is_none());
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result = Codec2::new().decode(b"not valid msgpack");
        assert!(matches!(result, Err(RpcError::Decode(_))));
    }
}
