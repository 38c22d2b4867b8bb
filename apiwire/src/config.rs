//! Server configuration - server-wide static settings.
//!
//! Set once at startup, used to build the [`CallContext`] of each request.
//!
//! [`CallContext`]: apiwire_core::CallContext

use std::time::Duration;

use apiwire_core::{ErrorRegistry, JsonTransport, MessageLimits};

/// Server-wide configuration for the dispatcher.
///
/// ```rust
/// use apiwire::ServerConfig;
/// use apiwire_core::MessageLimits;
/// use std::time::Duration;
///
/// let config = ServerConfig::new()
///     .human(true)
///     .limits(MessageLimits::new(1024 * 1024))
///     .timeout(Duration::from_secs(30));
/// ```
#[derive(Clone, Debug, Default)]
pub struct ServerConfig {
    /// Indented JSON for every response, not only for `?human=...` requests.
    pub(crate) human: bool,
    /// Request body size limits
    pub(crate) limits: MessageLimits,
    /// Handler timeout (optional)
    pub(crate) timeout: Option<Duration>,
    /// Renders errors for requests that match no route.
    pub(crate) transport: JsonTransport,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn human(mut self, human: bool) -> Self {
        self.human = human;
        self
    }

    pub fn limits(mut self, limits: MessageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Fail calls whose handler runs longer than `timeout` with a 504.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Error types to recognize when rendering routing failures.
    pub fn errors(mut self, errors: ErrorRegistry) -> Self {
        self.transport = JsonTransport::new(errors);
        self
    }
}
