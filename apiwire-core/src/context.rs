//! Per-call context.

use crate::{MessageLimits, PathParams};

/// Name of the query parameter that turns on indented JSON.
pub const HUMAN_QUERY_PARAM: &str = "human";

/// State negotiated for one call, on either side of the wire.
///
/// On the server it is built by the dispatcher from the request and the
/// server configuration and handed to the handler; on the client it carries
/// the caller's options into the transport.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    /// Indented JSON bodies.
    pub human: bool,
    /// Parameters bound by the route's path template.
    pub params: PathParams,
    pub limits: MessageLimits,
}

impl CallContext {
    pub fn new(limits: MessageLimits) -> Self {
        Self {
            limits,
            ..Default::default()
        }
    }

    pub fn with_human(mut self, human: bool) -> Self {
        self.human = human;
        self
    }

    pub fn with_params(mut self, params: PathParams) -> Self {
        self.params = params;
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Whether a raw query string asks for indented output.
///
/// Any non-empty value of `human` counts.
pub fn human_requested(query: Option<&str>) -> bool {
    let Some(query) = query else {
        return false;
    };
    serde_urlencoded::from_str::<Vec<(String, String)>>(query)
        .map(|pairs| {
            pairs
                .iter()
                .any(|(k, v)| k == HUMAN_QUERY_PARAM && !v.is_empty())
        })
        .unwrap_or(false)
}
