//! Responses as seen by completion handlers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse classification of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// 2xx.
    Success,
    /// 4xx other than rate limiting; retrying the same request will not help.
    PermanentError,
    /// 5xx or a transport failure.
    TemporaryError,
    /// The backend or transport asked us to back off. Completion handlers skip
    /// normal response interpretation for this status.
    TryAgainLater,
}

/// Response handed to completion handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    http_status: u16,
    payload: Option<Value>,
    status: ResponseStatus,
}

impl Response {
    /// Classify a response from its HTTP status code.
    pub fn new(http_status: u16, payload: Option<Value>) -> Self {
        let status = match http_status {
            200..=299 => ResponseStatus::Success,
            420 | 429 => ResponseStatus::TryAgainLater,
            400..=499 => ResponseStatus::PermanentError,
            _ => ResponseStatus::TemporaryError,
        };
        Self {
            http_status,
            payload,
            status,
        }
    }

    /// A transport-level "try again later" (no HTTP exchange happened).
    pub fn try_again_later() -> Self {
        Self {
            http_status: 0,
            payload: None,
            status: ResponseStatus::TryAgainLater,
        }
    }

    pub fn http_status(&self) -> u16 {
        self.http_status
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn status(&self) -> ResponseStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    pub fn is_try_again_later(&self) -> bool {
        self.status == ResponseStatus::TryAgainLater
    }
}
