//! Outgoing requests and their completion handlers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::response::Response;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl core::fmt::Display for Method {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Continuation run once when the transport has a response for the request.
pub type CompletionHandler = Box<dyn FnOnce(&Response) + Send + 'static>;

/// A unit of work produced by a request generator.
///
/// Requests are built without touching the network. The transport sends them and
/// calls [`Request::complete`] exactly once, which runs every registered
/// completion handler in registration order. Completion is the only way a
/// generator learns the outcome, so transports must complete a request even when
/// it fails or times out.
pub struct Request {
    method: Method,
    path: String,
    payload: Option<Value>,
    needs_authentication: bool,
    completion_handlers: Vec<CompletionHandler>,
}

impl Request {
    /// Create an authenticated request without payload.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            payload: None,
            needs_authentication: true,
            completion_handlers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, payload: Value) -> Self {
        Self::new(Method::Post, path).with_payload(payload)
    }

    pub fn put(path: impl Into<String>, payload: Value) -> Self {
        Self::new(Method::Put, path).with_payload(payload)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_authentication(mut self, needs_authentication: bool) -> Self {
        self.needs_authentication = needs_authentication;
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn needs_authentication(&self) -> bool {
        self.needs_authentication
    }

    /// Register a continuation for the response.
    pub fn add_completion_handler<F>(&mut self, handler: F)
    where
        F: FnOnce(&Response) + Send + 'static,
    {
        self.completion_handlers.push(Box::new(handler));
    }

    pub fn completion_handler_count(&self) -> usize {
        self.completion_handlers.len()
    }

    /// Deliver the response, consuming the request.
    pub fn complete(self, response: &Response) {
        tracing::debug!(
            method = %self.method,
            path = %self.path,
            status = ?response.status(),
            "request completed"
        );
        for handler in self.completion_handlers {
            handler(response);
        }
    }
}

impl core::fmt::Debug for Request {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("payload", &self.payload)
            .field("needs_authentication", &self.needs_authentication)
            .field("completion_handlers", &self.completion_handlers.len())
            .finish()
    }
}
