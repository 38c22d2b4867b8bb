//! Typed HTTP client for apiwire routes.
//!
//! This crate calls the routes served by an `apiwire` dispatcher, from the
//! same route table: each call is routed by its request and response types.
//!
//! ## Features
//!
//! - Request fields placed in the path, query, headers, cookies or body as
//!   their type declares
//! - Typed errors rebuilt from the wire through the route's error registry
//! - Per-call timeouts and headers
//! - Graceful shutdown: [`Client::close`] aborts running calls and waits
//!   until they have unwound
//!
//! ## Example
//!
//! ```ignore
//! use apiwire_client::{CallOptions, Client};
//! use std::time::Duration;
//!
//! let client = Client::builder(routes, "http://localhost:3000")
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! let user: User = client.call(GetUser { id: 7 }).await?;
//!
//! let options = CallOptions::new().timeout(Duration::from_secs(1));
//! let user: User = client.call_with_options(GetUser { id: 8 }, options).await?;
//!
//! client.close().await;
//! ```

mod builder;
mod client;
mod closing;
mod error;
pub mod exec;
mod options;

pub use builder::ClientBuilder;
pub use client::Client;
pub use closing::ClosingClient;
pub use error::{ClientError, SetupError};
pub use exec::{HttpExec, HyperExec, HyperExecBuilder};
pub use options::CallOptions;

// Re-export the shared types
pub use apiwire_core;
