//! Error envelopes.
//!
//! Errors cross the wire as `{"error": <message>, "code": <kind>, "detail": <value>}`.
//! An [`ErrorRegistry`] names the error types that keep their identity over
//! the wire: the sender finds the first registered type in the error's cause
//! chain and serializes it as `detail`; the receiver rebuilds a value of the
//! same type from `detail`. Anything else arrives as a [`RemoteError`]
//! carrying the message.

use std::any::TypeId;
use std::error::Error;

use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::link_status;
use crate::{BoxError, HttpStatus, RemoteError, causes};

/// The JSON body of an error response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorEnvelope {
    pub fn message(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Default::default()
        }
    }
}

type DetailFn = fn(&(dyn Error + 'static)) -> Option<Result<Value, serde_json::Error>>;
type RebuildFn = fn(Value) -> Result<BoxError, serde_json::Error>;
type StatusFn = fn(&(dyn Error + 'static)) -> Option<StatusCode>;

struct ErrorKind {
    name: String,
    type_id: TypeId,
    detail: DetailFn,
    rebuild: RebuildFn,
    status: Option<StatusFn>,
}

fn detail_of<E>(err: &(dyn Error + 'static)) -> Option<Result<Value, serde_json::Error>>
where
    E: Error + Serialize + 'static,
{
    err.downcast_ref::<E>().map(serde_json::to_value)
}

fn rebuild<E>(detail: Value) -> Result<BoxError, serde_json::Error>
where
    E: Error + DeserializeOwned + Send + Sync + 'static,
{
    serde_json::from_value::<E>(detail).map(|e| Box::new(e) as BoxError)
}

fn status_of<E>(err: &(dyn Error + 'static)) -> Option<StatusCode>
where
    E: Error + HttpStatus + 'static,
{
    err.downcast_ref::<E>().map(HttpStatus::http_status)
}

/// Named error types that survive the trip over the wire.
///
/// ```
/// use apiwire_core::{ErrorRegistry, RemoteError};
/// use http::StatusCode;
///
/// #[derive(Debug, serde::Serialize, serde::Deserialize, thiserror::Error)]
/// #[error("quota exceeded: {used}")]
/// struct QuotaError { used: u32 }
///
/// let registry = ErrorRegistry::new().register::<QuotaError>("QuotaError");
/// let envelope = registry.encode(&QuotaError { used: 3 });
/// assert_eq!(envelope.code.as_deref(), Some("QuotaError"));
///
/// let err = registry.decode(envelope, StatusCode::INTERNAL_SERVER_ERROR);
/// assert_eq!(err.downcast_ref::<QuotaError>().unwrap().used, 3);
/// ```
#[derive(Default)]
pub struct ErrorRegistry {
    kinds: Vec<ErrorKind>,
}

impl ErrorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `E` under `name`. Registering a name again replaces it.
    pub fn register<E>(self, name: impl Into<String>) -> Self
    where
        E: Error + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.insert(ErrorKind {
            name: name.into(),
            type_id: TypeId::of::<E>(),
            detail: detail_of::<E>,
            rebuild: rebuild::<E>,
            status: None,
        })
    }

    /// Register `E` under `name`, reporting it with its own HTTP status.
    pub fn register_with_status<E>(self, name: impl Into<String>) -> Self
    where
        E: Error + HttpStatus + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.insert(ErrorKind {
            name: name.into(),
            type_id: TypeId::of::<E>(),
            detail: detail_of::<E>,
            rebuild: rebuild::<E>,
            status: Some(status_of::<E>),
        })
    }

    fn insert(mut self, kind: ErrorKind) -> Self {
        match self.kinds.iter_mut().find(|k| k.name == kind.name) {
            Some(existing) => *existing = kind,
            None => self.kinds.push(kind),
        }
        self
    }

    pub fn is_registered<E: 'static>(&self) -> bool {
        self.kinds.iter().any(|k| k.type_id == TypeId::of::<E>())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kinds.iter().map(|k| k.name.as_str())
    }

    /// Build the envelope for `err`.
    ///
    /// The message is always the outermost error's. The first link of the
    /// cause chain matching a registered type supplies `code` and `detail`.
    pub fn encode(&self, err: &(dyn Error + 'static)) -> ErrorEnvelope {
        let mut envelope = ErrorEnvelope::message(err.to_string());
        for cause in causes(err) {
            for kind in &self.kinds {
                let Some(detail) = (kind.detail)(cause) else {
                    continue;
                };
                match detail {
                    Ok(detail) => {
                        envelope.code = Some(kind.name.clone());
                        envelope.detail = Some(detail);
                    }
                    Err(e) => {
                        tracing::warn!(kind = %kind.name, error = %e, "failed to serialize error detail")
                    }
                }
                return envelope;
            }
        }
        envelope
    }

    /// Rebuild the error an envelope describes.
    ///
    /// Registered kinds come back as their own type; anything else as a
    /// [`RemoteError`] with the envelope's message.
    pub fn decode(&self, envelope: ErrorEnvelope, status: StatusCode) -> BoxError {
        if let Some(code) = &envelope.code {
            match self.kinds.iter().find(|k| &k.name == code) {
                Some(kind) => {
                    let detail = envelope.detail.clone().unwrap_or(Value::Null);
                    return match (kind.rebuild)(detail) {
                        Ok(err) => err,
                        Err(e) => Box::new(RemoteError {
                            status,
                            message: format!("failed to decode error detail of type {code}: {e}"),
                        }),
                    };
                }
                None => tracing::warn!(code = %code, "unknown error type"),
            }
        }
        Box::new(RemoteError {
            status,
            message: envelope.error,
        })
    }

    /// Rebuild the error from a raw response body.
    pub fn decode_body(&self, body: &[u8], status: StatusCode) -> BoxError {
        match serde_json::from_slice::<ErrorEnvelope>(body) {
            Ok(envelope) => self.decode(envelope, status),
            Err(e) => Box::new(RemoteError {
                status,
                message: format!(
                    "failed to decode error message {}: {e}",
                    String::from_utf8_lossy(body)
                ),
            }),
        }
    }

    /// The HTTP status `err` is reported with.
    ///
    /// Malformed JSON anywhere in the chain is 400. Otherwise the first link
    /// with a status decides, whether a built-in kind or a type registered
    /// with [`register_with_status`](Self::register_with_status). Errors
    /// with no status are 500.
    pub fn status_of(&self, err: &(dyn Error + 'static)) -> StatusCode {
        if causes(err).any(|e| e.is::<serde_json::Error>()) {
            return StatusCode::BAD_REQUEST;
        }
        causes(err)
            .find_map(|e| {
                link_status(e).or_else(|| {
                    self.kinds
                        .iter()
                        .find_map(|k| k.status.and_then(|status| status(e)))
                })
            })
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl std::fmt::Debug for ErrorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorRegistry")
            .field("kinds", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Code, CodeError, HttpError};

    #[derive(Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
    #[error("my error {my_code}")]
    struct MyError {
        my_code: i32,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
    #[error("teapot")]
    struct Teapot;

    impl HttpStatus for Teapot {
        fn http_status(&self) -> StatusCode {
            StatusCode::IM_A_TEAPOT
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("wrapped: {0}")]
    struct Wrapped(#[source] BoxError);

    #[derive(Debug)]
    struct Cyclic(u8);

    impl std::fmt::Display for Cyclic {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("cyclic")
        }
    }

    impl Error for Cyclic {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(self)
        }
    }

    fn registry() -> ErrorRegistry {
        ErrorRegistry::new()
            .register::<MyError>("MyError")
            .register_with_status::<Teapot>("Teapot")
    }

    #[test]
    fn test_direct_error_round_trip() {
        let registry = registry();
        let envelope = registry.encode(&MyError { my_code: 123 });
        assert_eq!(envelope.error, "my error 123");
        assert_eq!(envelope.code.as_deref(), Some("MyError"));
        assert_eq!(envelope.detail, Some(serde_json::json!({"my_code": 123})));

        let err = registry.decode(envelope, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.downcast_ref::<MyError>(), Some(&MyError { my_code: 123 }));
    }

    #[test]
    fn test_doubly_wrapped_error_round_trip() {
        let registry = registry();
        let err = Wrapped(Box::new(Wrapped(Box::new(MyError { my_code: 123 }))));
        let envelope = registry.encode(&err);
        assert_eq!(envelope.error, "wrapped: wrapped: my error 123");

        let json = serde_json::to_vec(&envelope).unwrap();
        let decoded = registry.decode_body(&json, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(decoded.downcast_ref::<MyError>(), Some(&MyError { my_code: 123 }));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("request refused")]
    struct Refused(#[source] Checked);

    #[derive(Debug, thiserror::Error)]
    #[error("check failed")]
    struct Checked(#[source] Teapot);

    #[test]
    fn test_error_inside_newtypes_round_trip() {
        let registry = registry();
        let err: BoxError = Box::new(Refused(Checked(Teapot)));
        let envelope = registry.encode(err.as_ref());
        assert_eq!(envelope.error, "request refused");
        assert_eq!(envelope.code.as_deref(), Some("Teapot"));
        assert_eq!(registry.status_of(err.as_ref()), StatusCode::IM_A_TEAPOT);

        let decoded = registry.decode(envelope, StatusCode::IM_A_TEAPOT);
        assert_eq!(decoded.downcast_ref::<Teapot>(), Some(&Teapot));
    }

    #[test]
    fn test_unregistered_error() {
        let registry = registry();
        let envelope = registry.encode(&HttpError::bad_request("field x is required"));
        assert_eq!(envelope.code, None);
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            serde_json::json!({"error": "field x is required"})
        );

        let err = registry.decode(envelope, StatusCode::BAD_REQUEST);
        let remote = err.downcast_ref::<RemoteError>().unwrap();
        assert_eq!(remote.status, StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("field x is required"));
    }

    #[test]
    fn test_unknown_code_degrades() {
        let envelope = ErrorEnvelope {
            error: "boom".into(),
            detail: Some(serde_json::json!({})),
            code: Some("Nope".into()),
        };
        let err = registry().decode(envelope, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            err.to_string(),
            "API returned error with HTTP status 500 Internal Server Error: boom"
        );
    }

    #[test]
    fn test_bad_detail_degrades() {
        let envelope = ErrorEnvelope {
            error: "boom".into(),
            detail: Some(serde_json::json!({"my_code": "x"})),
            code: Some("MyError".into()),
        };
        let err = registry().decode(envelope, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.is::<RemoteError>());
        assert!(err.to_string().contains("failed to decode error detail of type MyError"));
    }

    #[test]
    fn test_undecodable_body() {
        let err = registry().decode_body(b"<html>bad gateway</html>", StatusCode::BAD_GATEWAY);
        assert!(err.to_string().contains("<html>bad gateway</html>"));
    }

    #[test]
    fn test_cyclic_chain_terminates() {
        let envelope = registry().encode(&Cyclic(0));
        assert_eq!(envelope, ErrorEnvelope::message("cyclic"));
        assert_eq!(registry().status_of(&Cyclic(0)), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_status_of() {
        let registry = registry();
        assert_eq!(
            registry.status_of(&Wrapped(Box::new(Teapot))),
            StatusCode::IM_A_TEAPOT
        );
        assert_eq!(
            registry.status_of(&MyError { my_code: 1 }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            registry.status_of(&CodeError::new(Code::NotFound, MyError { my_code: 1 })),
            StatusCode::NOT_FOUND
        );
        let json = serde_json::from_str::<u8>("x").unwrap_err();
        assert_eq!(
            registry.status_of(&Wrapped(Box::new(json))),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_code_error_finds_registered_inner() {
        let registry = registry();
        let err = CodeError::new(Code::AlreadyExists, MyError { my_code: 9 });
        let envelope = registry.encode(&err);
        assert_eq!(envelope.code.as_deref(), Some("MyError"));
    }

    #[test]
    fn test_register_replaces_name() {
        let registry = ErrorRegistry::new()
            .register::<MyError>("E")
            .register::<Teapot>("E");
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["E"]);
        assert!(registry.is_registered::<Teapot>());
        assert!(!registry.is_registered::<MyError>());
    }
}
