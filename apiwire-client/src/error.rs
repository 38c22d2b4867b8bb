//! Client error types.
//!
//! [`ClientError`] is returned by every call. Errors the server reported are
//! in [`ClientError::Remote`], rebuilt as the registered error type when the
//! route's transport knows it; everything else describes what went wrong on
//! this side of the wire.

use apiwire_core::{BoxError, Code, RemoteError, RouteError, Signature, WireError};
use http::Method;

/// Errors from client calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The client is shutting down and accepts no new calls.
    #[error("client is closing")]
    Closing,

    /// The call was aborted by [`Client::close`](crate::Client::close).
    #[error("call canceled")]
    Canceled,

    /// The call did not finish within its timeout.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Transport-level error (connection failed, reset, etc.).
    #[error("transport error: {0}")]
    Transport(String),

    /// The request could not be built.
    #[error("encode error: {0}")]
    Encode(#[source] WireError),

    /// The response could not be read.
    #[error("decode error: {0}")]
    Decode(#[source] WireError),

    /// The server answered with an error.
    #[error(transparent)]
    Remote(BoxError),

    /// No route has this request/response signature.
    #[error("no route for {0}")]
    UnknownRoute(Signature),

    #[error(transparent)]
    Setup(#[from] SetupError),
}

impl ClientError {
    /// The code that best describes this error.
    ///
    /// Remote errors report the code matching their HTTP status.
    pub fn code(&self) -> Code {
        match self {
            ClientError::Closing => Code::Unavailable,
            ClientError::Canceled => Code::Canceled,
            ClientError::DeadlineExceeded => Code::DeadlineExceeded,
            ClientError::Transport(_) => Code::Unavailable,
            ClientError::Encode(_) | ClientError::Decode(_) => Code::Internal,
            ClientError::Remote(err) => err
                .downcast_ref::<RemoteError>()
                .map_or(Code::Unknown, |e| code_for_status(e.status)),
            ClientError::UnknownRoute(_) => Code::Unimplemented,
            ClientError::Setup(_) => Code::FailedPrecondition,
        }
    }

    /// The server's error, if this is one, as the type it was registered as.
    pub fn remote<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            ClientError::Remote(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

fn code_for_status(status: http::StatusCode) -> Code {
    match status.as_u16() {
        400 => Code::InvalidArgument,
        401 => Code::Unauthenticated,
        403 => Code::PermissionDenied,
        404 => Code::NotFound,
        409 => Code::AlreadyExists,
        429 => Code::ResourceExhausted,
        499 => Code::Canceled,
        501 => Code::Unimplemented,
        503 => Code::Unavailable,
        504 => Code::DeadlineExceeded,
        _ => Code::Unknown,
    }
}

/// A route table the client cannot call.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("routes {first_method} {first_path} and {second_method} {second_path} share signature {signature}")]
    DuplicateSignature {
        signature: Signature,
        first_method: Method,
        first_path: String,
        second_method: Method,
        second_path: String,
    },

    #[error("invalid base URL {url:?}: {reason}")]
    BaseUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Executor(String),
}
