//! Error codes and error types.
//!
//! - [`Code`]: gRPC-style status codes with their HTTP mapping
//! - [`CodeError`]: wraps any error with a [`Code`]
//! - [`HttpError`]: an error carrying an explicit HTTP status
//! - [`RemoteError`]: an error response the client could not map to a registered type
//! - [`WireError`]: failures converting values to and from the wire

use std::error::Error;
use std::fmt;
use std::str::FromStr;

use http::StatusCode;
use serde::Serialize;

use crate::{CookieError, PlanError, TextError, UrlError};

/// Boxed error used for handler results and body errors.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Maximum number of links followed when walking an error's cause chain.
pub const MAX_CAUSE_DEPTH: usize = 32;

/// Implemented by errors that choose the HTTP status they are reported with.
pub trait HttpStatus {
    fn http_status(&self) -> StatusCode;
}

/// Status codes, matching the gRPC code set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    Ok = 0,
    Canceled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// Get the string representation of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "ok",
            Code::Canceled => "canceled",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid_argument",
            Code::DeadlineExceeded => "deadline_exceeded",
            Code::NotFound => "not_found",
            Code::AlreadyExists => "already_exists",
            Code::PermissionDenied => "permission_denied",
            Code::ResourceExhausted => "resource_exhausted",
            Code::FailedPrecondition => "failed_precondition",
            Code::Aborted => "aborted",
            Code::OutOfRange => "out_of_range",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
            Code::Unavailable => "unavailable",
            Code::DataLoss => "data_loss",
            Code::Unauthenticated => "unauthenticated",
        }
    }

    /// The HTTP status a gateway reports for this code.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Code::Ok => StatusCode::OK,
            // Client closed request; not in the IANA registry.
            Code::Canceled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            Code::Unknown | Code::Internal | Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
            Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
                StatusCode::BAD_REQUEST
            }
            Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
            Code::PermissionDenied => StatusCode::FORBIDDEN,
            Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`Code`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown error code")]
pub struct ParseCodeError(());

impl FromStr for Code {
    type Err = ParseCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Code::Ok),
            "canceled" | "cancelled" => Ok(Code::Canceled),
            "unknown" => Ok(Code::Unknown),
            "invalid_argument" => Ok(Code::InvalidArgument),
            "deadline_exceeded" => Ok(Code::DeadlineExceeded),
            "not_found" => Ok(Code::NotFound),
            "already_exists" => Ok(Code::AlreadyExists),
            "permission_denied" => Ok(Code::PermissionDenied),
            "resource_exhausted" => Ok(Code::ResourceExhausted),
            "failed_precondition" => Ok(Code::FailedPrecondition),
            "aborted" => Ok(Code::Aborted),
            "out_of_range" => Ok(Code::OutOfRange),
            "unimplemented" => Ok(Code::Unimplemented),
            "internal" => Ok(Code::Internal),
            "unavailable" => Ok(Code::Unavailable),
            "data_loss" => Ok(Code::DataLoss),
            "unauthenticated" => Ok(Code::Unauthenticated),
            _ => Err(ParseCodeError(())),
        }
    }
}

/// An error tagged with a [`Code`].
///
/// The message is that of the wrapped error, which stays reachable through
/// [`Error::source`] so typed errors beneath it are still found by the
/// error envelope.
///
/// ```
/// use apiwire_core::{Code, CodeError};
///
/// let err = CodeError::new(Code::NotFound, "user 7 not found");
/// assert_eq!(err.code(), Code::NotFound);
/// assert_eq!(err.to_string(), "user 7 not found");
/// ```
#[derive(Debug)]
pub struct CodeError {
    code: Code,
    inner: BoxError,
}

impl CodeError {
    pub fn new(code: Code, err: impl Into<BoxError>) -> Self {
        Self {
            code,
            inner: err.into(),
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn into_inner(self) -> BoxError {
        self.inner
    }
}

impl fmt::Display for CodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl Error for CodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

impl HttpStatus for CodeError {
    fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }
}

/// An error carrying the HTTP status it is reported with.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HttpError {
    pub status: StatusCode,
    pub message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl HttpStatus for HttpError {
    fn http_status(&self) -> StatusCode {
        self.status
    }
}

/// An error response whose kind the receiving side does not know.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("API returned error with HTTP status {status}: {message}")]
pub struct RemoteError {
    pub status: StatusCode,
    pub message: String,
}

impl HttpStatus for RemoteError {
    fn http_status(&self) -> StatusCode {
        self.status
    }
}

/// Failures converting values to and from their wire form.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed protobuf body: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("invalid value for field {field}: {source}")]
    Text {
        field: &'static str,
        #[source]
        source: TextError,
    },

    #[error("invalid header {name}: {reason}")]
    Header { name: String, reason: String },

    #[error("invalid query string: {0}")]
    Query(String),

    #[error(transparent)]
    Cookie(#[from] CookieError),

    #[error("message exceeds size limit of {limit} bytes")]
    TooLarge { limit: usize },

    #[error("failed to read body: {0}")]
    Body(String),

    #[error("wrong cookie name: expected {expected:?}, got {found:?}")]
    CookieName { expected: String, found: String },

    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Url(#[from] UrlError),
}

impl WireError {
    /// The HTTP status this failure is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            WireError::Json(_)
            | WireError::Protobuf(_)
            | WireError::Text { .. }
            | WireError::Header { .. }
            | WireError::Query(_)
            | WireError::Cookie(_)
            | WireError::Body(_) => StatusCode::BAD_REQUEST,
            WireError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            WireError::CookieName { .. }
            | WireError::Encode(_)
            | WireError::Plan(_)
            | WireError::Url(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl HttpStatus for WireError {
    fn http_status(&self) -> StatusCode {
        self.status()
    }
}

/// Walk `err` and its causes, outermost first.
///
/// The walk stops after [`MAX_CAUSE_DEPTH`] links or on reaching an error
/// already visited, so a self-referential chain terminates. A link counts as
/// visited only if both its address and its vtable match: a newtype holding
/// its source by value shares the source's address.
pub fn causes<'a>(err: &'a (dyn Error + 'static)) -> impl Iterator<Item = &'a (dyn Error + 'static)> {
    let mut seen: Vec<&'a (dyn Error + 'static)> = Vec::with_capacity(4);
    let mut next = Some(err);
    std::iter::from_fn(move || {
        let current = next?;
        if seen.len() >= MAX_CAUSE_DEPTH || seen.iter().any(|s| std::ptr::eq(*s, current)) {
            next = None;
            return None;
        }
        seen.push(current);
        next = current.source();
        Some(current)
    })
}

/// HTTP status of the built-in error kinds found in `err`'s cause chain.
///
/// Malformed JSON anywhere in the chain maps to 400; otherwise the first
/// error with a known status decides. `None` if no link has one.
pub fn builtin_status(err: &(dyn Error + 'static)) -> Option<StatusCode> {
    if causes(err).any(|e| e.is::<serde_json::Error>()) {
        return Some(StatusCode::BAD_REQUEST);
    }
    causes(err).find_map(link_status)
}

/// Status of a single error, without looking at its causes.
pub(crate) fn link_status(err: &(dyn Error + 'static)) -> Option<StatusCode> {
    if let Some(e) = err.downcast_ref::<WireError>() {
        Some(e.http_status())
    } else if let Some(e) = err.downcast_ref::<CodeError>() {
        Some(e.http_status())
    } else if let Some(e) = err.downcast_ref::<HttpError>() {
        Some(e.http_status())
    } else {
        err.downcast_ref::<RemoteError>().map(HttpStatus::http_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Looping(u8);

    impl fmt::Display for Looping {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("looping")
        }
    }

    impl Error for Looping {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            static SELF: Looping = Looping(0);
            Some(&SELF)
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("layer: {0}")]
    struct Layer(#[source] BoxError);

    #[test]
    fn test_code_as_str() {
        assert_eq!(Code::Ok.as_str(), "ok");
        assert_eq!(Code::InvalidArgument.as_str(), "invalid_argument");
        assert_eq!(Code::Unauthenticated.to_string(), "unauthenticated");
    }

    #[test]
    fn test_code_from_str() {
        assert_eq!("ok".parse(), Ok(Code::Ok));
        assert_eq!("invalid_argument".parse(), Ok(Code::InvalidArgument));
        assert_eq!("cancelled".parse(), Ok(Code::Canceled));
        assert_eq!("unknown_code".parse::<Code>(), Err(ParseCodeError(())));
    }

    #[test]
    fn test_code_http_status() {
        assert_eq!(Code::Ok.http_status(), StatusCode::OK);
        assert_eq!(Code::Canceled.http_status().as_u16(), 499);
        assert_eq!(Code::InvalidArgument.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(Code::DeadlineExceeded.http_status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(Code::NotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(Code::AlreadyExists.http_status(), StatusCode::CONFLICT);
        assert_eq!(Code::PermissionDenied.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(Code::ResourceExhausted.http_status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(Code::Unimplemented.http_status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(Code::Unavailable.http_status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(Code::Unauthenticated.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Code::DataLoss.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_code_error_keeps_source() {
        let err = CodeError::new(Code::PermissionDenied, HttpError::bad_request("nope"));
        assert_eq!(err.to_string(), "nope");
        assert!(err.source().unwrap().is::<HttpError>());
        assert_eq!(builtin_status(&err), Some(StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_builtin_status() {
        let json_err = serde_json::from_str::<u32>("{").unwrap_err();
        let wrapped = Layer(Box::new(json_err));
        assert_eq!(builtin_status(&wrapped), Some(StatusCode::BAD_REQUEST));

        let too_large = Layer(Box::new(WireError::TooLarge { limit: 10 }));
        assert_eq!(builtin_status(&too_large), Some(StatusCode::PAYLOAD_TOO_LARGE));

        let plain = Layer("boom".into());
        assert_eq!(builtin_status(&plain), None);
    }

    #[test]
    fn test_causes_order() {
        let err = Layer(Box::new(Layer(Box::new(HttpError::not_found("gone")))));
        let messages: Vec<String> = causes(&err).map(|e| e.to_string()).collect();
        assert_eq!(messages, vec!["layer: layer: gone", "layer: gone", "gone"]);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("outer")]
    struct Outer(#[source] Inner);

    #[derive(Debug, thiserror::Error)]
    #[error("inner")]
    struct Inner(#[source] HttpError);

    #[test]
    fn test_causes_through_by_value_newtypes() {
        let err = Outer(Inner(HttpError::not_found("gone")));
        let messages: Vec<String> = causes(&err).map(|e| e.to_string()).collect();
        assert_eq!(messages, vec!["outer", "inner", "gone"]);
        assert_eq!(builtin_status(&err), Some(StatusCode::NOT_FOUND));

        let boxed: BoxError = Box::new(Outer(Inner(HttpError::not_found("gone"))));
        assert_eq!(causes(boxed.as_ref()).count(), 3);
    }

    #[test]
    fn test_causes_terminates_on_cycle() {
        let err = Layer(Box::new(Looping(1)));
        // layer, the boxed error, then the static one whose self-reference is cut off
        let count = causes(&err).count();
        assert!(count <= MAX_CAUSE_DEPTH);
        assert_eq!(count, 3);
    }

    #[test]
    fn test_wire_error_status() {
        assert_eq!(
            WireError::Query("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WireError::Encode("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
