//! Core types for apiwire.
//!
//! This crate provides the pieces shared by the server (`apiwire`) and
//! client (`apiwire-client`) crates.
//!
//! The main pieces:
//!
//! - [`Wire`] and [`FieldPlan`]: where each field of a message travels
//! - [`Codec`]: encoding and decoding values to HTTP messages
//! - [`ErrorRegistry`]: error envelopes and the error type registry
//! - [`Router`]: path template matching, with [`build_url`] for the reverse
//! - [`Transport`] and [`JsonTransport`]: the transport contract
//! - [`Route`]: route descriptors shared by both sides
//! - [`Code`], [`CodeError`] and [`HttpError`]: errors with an HTTP status

mod body;
mod codec;
mod context;
mod cookie;
mod envelope;
mod error;
mod limits;
mod plan;
mod route;
mod router;
mod text;
mod transport;

pub use body::*;
pub use codec::*;
pub use context::*;
pub use cookie::*;
pub use envelope::*;
pub use error::*;
pub use limits::*;
pub use plan::*;
pub use route::*;
pub use router::*;
pub use text::*;
pub use transport::*;
