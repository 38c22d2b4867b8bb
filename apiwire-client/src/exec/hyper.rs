//! Hyper-based executor.
//!
//! This module provides [`HyperExec`], the default [`HttpExec`]
//! implementation using hyper_util's legacy client.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use apiwire_core::Body;
use arc_swap::ArcSwap;
use futures::future::BoxFuture;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{Builder, Client, connect::HttpConnector};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::ClientConfig;
use tower_service::Service;

use super::HttpExec;
use super::connector::build_https_connector;
use crate::{ClientError, SetupError};

type HyperClient = Client<HttpsConnector<HttpConnector>, Body>;

/// HTTP executor using hyper_util's legacy client.
///
/// Provides HTTP/1.1 and HTTP/2 support with TLS, connection pooling, and
/// automatic protocol negotiation via ALPN.
///
/// The pooled client sits behind an [`ArcSwap`]: releasing idle
/// connections swaps in a fresh pool, while requests already running keep
/// the connections they hold until they finish.
///
/// # Example
///
/// ```no_run
/// use apiwire_client::exec::HyperExec;
/// use std::time::Duration;
///
/// let exec = HyperExec::builder()
///     .pool_idle_timeout(Duration::from_secs(30))
///     .build()?;
/// # Ok::<(), apiwire_client::SetupError>(())
/// ```
pub struct HyperExec {
    client: ArcSwap<HyperClient>,
    builder: Builder,
    connector: HttpsConnector<HttpConnector>,
    http2_only: bool,
}

impl std::fmt::Debug for HyperExec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperExec")
            .field("http2_only", &self.http2_only)
            .finish_non_exhaustive()
    }
}

impl HyperExec {
    /// Create a new executor builder.
    pub fn builder() -> HyperExecBuilder {
        HyperExecBuilder::new()
    }

    /// Create a new executor with default settings.
    pub fn new() -> Result<Self, SetupError> {
        Self::builder().build()
    }

    /// Check if this executor is configured for HTTP/2 only.
    pub fn is_http2_only(&self) -> bool {
        self.http2_only
    }

    fn send(
        &self,
        request: http::Request<Body>,
    ) -> impl Future<Output = Result<http::Response<Body>, ClientError>> + Send + 'static {
        let client = self.client.load_full();
        async move {
            let response = client
                .request(request)
                .await
                .map_err(|e| ClientError::Transport(format!("request failed: {}", e)))?;
            Ok(response.map(Body::new))
        }
    }
}

impl HttpExec for HyperExec {
    fn execute(
        &self,
        request: http::Request<Body>,
    ) -> BoxFuture<'static, Result<http::Response<Body>, ClientError>> {
        Box::pin(self.send(request))
    }

    fn release_idle(&self) {
        let fresh = self.builder.build(self.connector.clone());
        // the old pool goes away once the last in-flight request releases it
        self.client.store(Arc::new(fresh));
    }
}

impl Service<http::Request<Body>> for HyperExec {
    type Response = http::Response<Body>;
    type Error = ClientError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // hyper_util legacy::Client is always ready
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        Box::pin(self.send(req))
    }
}

/// Builder for [`HyperExec`].
///
/// Provides configuration options for TLS settings, HTTP/2 options, and
/// connection pooling.
pub struct HyperExecBuilder {
    /// Custom TLS configuration.
    tls_config: Option<ClientConfig>,
    /// Force HTTP/2 only (for h2c or when HTTP/2 is required).
    http2_only: bool,
    /// Connection pool idle timeout.
    pool_idle_timeout: Option<Duration>,
    /// Maximum idle connections per host.
    pool_max_idle_per_host: usize,
    /// HTTP/2 keep-alive interval.
    h2_keep_alive_interval: Option<Duration>,
    /// HTTP/2 keep-alive timeout.
    h2_keep_alive_timeout: Option<Duration>,
}

impl Default for HyperExecBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperExecBuilder {
    /// Create a new executor builder with default settings.
    pub fn new() -> Self {
        Self {
            tls_config: None,
            http2_only: false,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
            h2_keep_alive_interval: None,
            h2_keep_alive_timeout: None,
        }
    }

    /// Set a custom TLS configuration.
    ///
    /// Use this to configure custom root certificates, client certificates for mTLS,
    /// or other TLS settings.
    pub fn tls_config(mut self, config: ClientConfig) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Enable HTTP/2 only mode.
    ///
    /// For HTTPS connections, HTTP/2 is typically negotiated via ALPN,
    /// so this setting is often not needed.
    pub fn http2_only(mut self, enabled: bool) -> Self {
        self.http2_only = enabled;
        self
    }

    /// Set the connection pool idle timeout.
    ///
    /// Default: 90 seconds.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = Some(timeout);
        self
    }

    /// Disable connection pool idle timeout.
    pub fn pool_idle_timeout_none(mut self) -> Self {
        self.pool_idle_timeout = None;
        self
    }

    /// Set the maximum number of idle connections per host.
    ///
    /// Default: 32.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    /// Set the HTTP/2 keep-alive interval.
    pub fn h2_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.h2_keep_alive_interval = Some(interval);
        self
    }

    /// Set the HTTP/2 keep-alive timeout.
    ///
    /// Only effective if `h2_keep_alive_interval` is also set.
    pub fn h2_keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.h2_keep_alive_timeout = Some(timeout);
        self
    }

    /// Build the executor.
    pub fn build(self) -> Result<HyperExec, SetupError> {
        let connector = build_https_connector(self.tls_config)?;

        let mut builder = Client::builder(TokioExecutor::new());

        // Configure connection pool timer (required for pool_idle_timeout to work)
        builder.pool_timer(TokioTimer::new());
        builder.pool_idle_timeout(self.pool_idle_timeout);
        builder.pool_max_idle_per_host(self.pool_max_idle_per_host);

        if self.http2_only {
            builder.http2_only(true);
        }
        if let Some(interval) = self.h2_keep_alive_interval {
            builder.timer(TokioTimer::new());
            builder.http2_keep_alive_interval(interval);
        }
        if let Some(timeout) = self.h2_keep_alive_timeout {
            builder.http2_keep_alive_timeout(timeout);
        }

        let client = builder.build(connector.clone());

        Ok(HyperExec {
            client: ArcSwap::from_pointee(client),
            builder,
            connector,
            http2_only: self.http2_only,
        })
    }
}

impl std::fmt::Debug for HyperExecBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperExecBuilder")
            .field("tls_config", &self.tls_config.is_some())
            .field("http2_only", &self.http2_only)
            .field("pool_idle_timeout", &self.pool_idle_timeout)
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .field("h2_keep_alive_interval", &self.h2_keep_alive_interval)
            .field("h2_keep_alive_timeout", &self.h2_keep_alive_timeout)
            .finish()
    }
}
