//! Call options for per-call configuration.
//!
//! This module provides [`CallOptions`] for configuring individual calls
//! with timeouts, custom headers, and other per-call settings.

use http::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

/// Options for configuring individual calls.
///
/// Use this to set per-call timeouts or custom headers that differ from
/// the client defaults.
///
/// # Example
///
/// ```
/// use apiwire_client::CallOptions;
/// use http::header::HeaderValue;
/// use std::time::Duration;
///
/// let options = CallOptions::new()
///     .timeout(Duration::from_secs(5))
///     .header(http::header::ACCEPT_LANGUAGE, HeaderValue::from_static("en"))
///     .try_header("x-request-id", "abc-123")
///     .unwrap();
/// assert_eq!(options.get_headers().len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Timeout for this specific call.
    /// If set, overrides the client's default timeout.
    pub(crate) timeout: Option<Duration>,
    /// Custom headers for this specific call.
    pub(crate) headers: HeaderMap,
    /// Indented JSON for this call, overriding the client default.
    pub(crate) human: Option<bool>,
}

impl CallOptions {
    /// Create new default call options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout for this call.
    ///
    /// A call still running when the timeout elapses fails with
    /// [`ClientError::DeadlineExceeded`](crate::ClientError::DeadlineExceeded).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the configured timeout, if any.
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Ask for indented JSON on this call.
    pub fn human(mut self, human: bool) -> Self {
        self.human = Some(human);
        self
    }

    /// Add a custom header for this call.
    ///
    /// Headers set by the request's own fields take precedence.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Try to add a custom header for this call.
    ///
    /// Returns `None` if the header name or value is invalid.
    pub fn try_header<K, V>(mut self, name: K, value: V) -> Option<Self>
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        let name = name.try_into().ok()?;
        let value = value.try_into().ok()?;
        self.headers.insert(name, value);
        Some(self)
    }

    /// Set all custom headers for this call, replacing any existing headers.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Get a reference to the custom headers.
    pub fn get_headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a mutable reference to the custom headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }
}
