//! JSON codec using `serde_json`.

use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Codec, RequestEnvelope, ResponseEnvelope};
use crate::error::{Result, RpcError};

/// JSON codec for serde envelopes. Handy for debugging against a peer
/// whose traffic should be human-readable.
pub struct JsonCodec<Req, Resp> {
    _marker: PhantomData<fn() -> (Req, Resp)>,
}

impl<Req, Resp> JsonCodec<Req, Resp> {
    /// Create a new codec.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp> Default for JsonCodec<Req, Resp> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Resp> Clone for JsonCodec<Req, Resp> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<Req, Resp> fmt::Debug for JsonCodec<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<Req, Resp> Codec for JsonCodec<Req, Resp>
where
    Req: RequestEnvelope + Serialize,
    Resp: ResponseEnvelope + DeserializeOwned,
{
    type Request = Req;
    type Response = Resp;

    fn encode(&self, request: &Req) -> Result<Bytes> {
        serde_json::to_vec(request)
            .map(Bytes::from)
            .map_err(|e| RpcError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Resp> {
        serde_json::from_slice(bytes).map_err(|e| RpcError::Decode(e.to_string()))
    }
}
