//! Client builder.
//!
//! Provides a fluent API for configuring and building a [`Client`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use apiwire_core::{MessageLimits, Route, Signature};
use http::HeaderValue;

use crate::client::Client;
use crate::exec::{HttpExec, HyperExec};
use crate::{ClosingClient, SetupError};

/// Builder for creating a [`Client`].
///
/// # Example
///
/// ```no_run
/// use apiwire_client::Client;
/// use std::time::Duration;
///
/// # fn routes() -> Vec<apiwire_core::Route> { Vec::new() }
/// let client = Client::builder(routes(), "http://localhost:3000")
///     .timeout(Duration::from_secs(10))
///     .human(true)
///     .build()?;
/// # Ok::<(), apiwire_client::SetupError>(())
/// ```
pub struct ClientBuilder {
    routes: Vec<Route>,
    /// Base URL for the service (e.g., "http://localhost:3000").
    base_url: String,
    /// Sent as the `Authorization` header of every call.
    authorization: Option<HeaderValue>,
    /// Ask the server for indented JSON.
    human: bool,
    /// Ceiling on response bodies.
    limits: MessageLimits,
    /// Default timeout for calls.
    timeout: Option<Duration>,
    /// Executor to send requests with; a [`HyperExec`] if unset.
    exec: Option<Arc<dyn HttpExec>>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("routes", &self.routes.len())
            .field("base_url", &self.base_url)
            .field("authorization", &self.authorization.is_some())
            .field("human", &self.human)
            .field("limits", &self.limits)
            .field("timeout", &self.timeout)
            .field("exec", &self.exec.is_some())
            .finish()
    }
}

impl ClientBuilder {
    /// Create a builder for a client of `routes` served under `base_url`.
    ///
    /// Route paths are appended to the base URL, so it should include the
    /// scheme and host and any path prefix, e.g. `http://localhost:3000/api`.
    pub fn new(routes: Vec<Route>, base_url: impl Into<String>) -> Self {
        Self {
            routes,
            base_url: base_url.into(),
            authorization: None,
            human: false,
            limits: MessageLimits::default(),
            timeout: None,
            exec: None,
        }
    }

    /// Send `value` as the `Authorization` header of every call.
    pub fn authorization(mut self, value: HeaderValue) -> Self {
        self.authorization = Some(value);
        self
    }

    /// Ask the server for indented JSON on every call.
    pub fn human(mut self, human: bool) -> Self {
        self.human = human;
        self
    }

    /// Set the size limits applied to response bodies.
    pub fn limits(mut self, limits: MessageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the default timeout for calls.
    ///
    /// [`CallOptions::timeout`](crate::CallOptions::timeout) overrides it
    /// per call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send requests with `exec` instead of a default [`HyperExec`].
    pub fn executor<E: HttpExec>(mut self, exec: E) -> Self {
        self.exec = Some(Arc::new(exec));
        self
    }

    /// Build the client.
    ///
    /// Fails if a route cannot carry its types, if two routes share a
    /// request/response signature or if the base URL is not absolute.
    pub fn build(self) -> Result<Client, SetupError> {
        let mut routes: HashMap<Signature, Route> = HashMap::with_capacity(self.routes.len());
        for route in self.routes {
            route.validate()?;
            let signature = route.signature();
            if let Some(first) = routes.get(&signature) {
                return Err(SetupError::DuplicateSignature {
                    signature,
                    first_method: first.method().clone(),
                    first_path: first.path().to_owned(),
                    second_method: route.method().clone(),
                    second_path: route.path().to_owned(),
                });
            }
            routes.insert(signature, route);
        }

        let base_url = check_base_url(self.base_url)?;

        let exec = match self.exec {
            Some(exec) => exec,
            None => Arc::new(HyperExec::new()?),
        };

        Ok(Client::new(
            routes,
            base_url,
            self.authorization,
            self.human,
            self.limits,
            self.timeout,
            ClosingClient::new(exec),
        ))
    }
}

/// Require scheme and host, and remove the trailing slash.
fn check_base_url(url: String) -> Result<String, SetupError> {
    let invalid = |reason: &str| SetupError::BaseUrl {
        url: url.clone(),
        reason: reason.to_owned(),
    };
    let uri: http::Uri = url.parse().map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(invalid("scheme and host are required"));
    }
    if uri.query().is_some() {
        return Err(invalid("query strings are not supported"));
    }
    Ok(url.trim_end_matches('/').to_owned())
}
