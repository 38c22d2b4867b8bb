use apiwire_core::RouteError;
use http::Method;

/// A route table that cannot be served.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("duplicate route {method} {path}")]
    DuplicateRoute { method: Method, path: String },

    #[error("route {method} {path} has no handler")]
    MissingHandler { method: Method, path: String },
}
