//! # apiwire
//!
//! Serve typed request/response routes over HTTP with [Axum](https://github.com/tokio-rs/axum).
//!
//! Routes are declared once, in [`apiwire_core::Route`], and shared by the
//! server and the client. The [`Dispatcher`] matches incoming paths against
//! the route templates, decodes each request into its message type, calls
//! the handler and encodes the result or the error.
//!
//! ## Features
//!
//! - **Typed messages:** fields travel in the JSON body, query, headers,
//!   cookies, path segments or the status code, as each type declares.
//! - **Typed errors:** registered error types keep their identity on the wire.
//! - **Axum-native:** the dispatcher is a `tower::Service` and mounts as an
//!   `axum::Router`.

mod config;
mod dispatcher;
mod error;

pub use config::ServerConfig;
pub use dispatcher::Dispatcher;
pub use error::SetupError;

// Re-export the shared types
pub use apiwire_core;

pub mod prelude {
    //! A prelude for `apiwire` providing the most common types.
    pub use crate::{Dispatcher, ServerConfig, SetupError};
    pub use apiwire_core::{
        BoxError, CallContext, Code, CodeError, ErrorRegistry, Field, HttpError, JsonTransport,
        MessageLimits, Route, Wire,
    };
}
