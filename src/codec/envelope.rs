//! Generic serde envelopes.

use serde::{Deserialize, Serialize};

use super::{RequestEnvelope, ResponseEnvelope};

/// Request envelope wrapping an arbitrary payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request<P> {
    /// Correlation ID, assigned by the connection at call time.
    pub id: u64,
    /// Opaque request body.
    pub payload: P,
}

impl<P> Request<P> {
    /// Create a request with an unassigned ID.
    pub fn new(payload: P) -> Self {
        Self { id: 0, payload }
    }
}

impl<P: Send + 'static> RequestEnvelope for Request<P> {
    #[inline]
    fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

/// Response envelope with an optional server error and optional payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response<P> {
    /// Correlation ID of the answered request.
    pub id: u64,
    /// Error reported by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Response body, absent for pure acknowledgments and errors.
    ///
    /// A missing field reads as `None`. No `default` attribute here: it would
    /// make the derived impl require `P: Default`.
    pub payload: Option<P>,
}

impl<P> Response<P> {
    /// Successful response carrying `payload`.
    pub fn ok(id: u64, payload: P) -> Self {
        Self {
            id,
            error: None,
            payload: Some(payload),
        }
    }

    /// Error response carrying `message`.
    pub fn err(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            error: Some(message.into()),
            payload: None,
        }
    }
}

impl<P: Send + 'static> ResponseEnvelope for Response<P> {
    type Payload = Option<P>;

    #[inline]
    fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn into_payload(self) -> Option<P> {
        self.payload
    }
}
