//! HTTP execution for the client.
//!
//! [`HttpExec`] is what the client needs from an HTTP stack: send one
//! request, and drop idle pooled connections. [`HyperExec`] implements it
//! with hyper_util's legacy client:
//!
//! - HTTP/1.1 and HTTP/2 with automatic protocol negotiation
//! - TLS with rustls (feature-gated)
//! - Connection pooling
//!
//! [`ClosingClient`](crate::ClosingClient) wraps any executor with call
//! tracking and graceful shutdown.
//!
//! # Feature Flags
//!
//! TLS support requires enabling the appropriate features:
//!
//! - `tls` (default) - Enables `tls-ring` + `tls-native-roots` for convenience
//! - `tls-ring` / `tls-aws-lc` - Crypto providers
//! - `tls-native-roots` / `tls-webpki-roots` - Root certificates

mod connector;
mod hyper;

use apiwire_core::Body;
use futures::future::BoxFuture;
use http::{Request, Response};

use crate::ClientError;

pub use connector::{build_https_connector, has_tls_support};
#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
pub use connector::default_tls_config;
pub use self::hyper::{HyperExec, HyperExecBuilder};

// Re-export rustls types that users might need for TLS configuration
pub use rustls::ClientConfig as TlsClientConfig;

/// Performs HTTP requests for the client.
pub trait HttpExec: Send + Sync + 'static {
    /// Send `request` and return the response once its head has arrived.
    fn execute(&self, request: Request<Body>) -> BoxFuture<'static, Result<Response<Body>, ClientError>>;

    /// Close pooled connections that carry no request.
    fn release_idle(&self);

    /// Stop the executor. By default only idle connections are released.
    fn close(&self) -> BoxFuture<'_, ()> {
        self.release_idle();
        Box::pin(async {})
    }
}

impl<E: HttpExec + ?Sized> HttpExec for std::sync::Arc<E> {
    fn execute(&self, request: Request<Body>) -> BoxFuture<'static, Result<Response<Body>, ClientError>> {
        (**self).execute(request)
    }

    fn release_idle(&self) {
        (**self).release_idle()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        (**self).close()
    }
}
