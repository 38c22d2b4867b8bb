//! Typed client.
//!
//! This module provides the main [`Client`] type for calling routes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use apiwire_core::{
    CallContext, CallTransport, HUMAN_QUERY_PARAM, MessageLimits, Route, Signature, Wire,
    field_plan,
};
use http::{HeaderMap, HeaderValue, header};
use tokio::time::timeout;
#[cfg(feature = "tracing")]
use tracing::Instrument;

use crate::builder::ClientBuilder;
use crate::exec::HttpExec;
use crate::{CallOptions, ClientError, ClosingClient};

/// Client for a table of routes.
///
/// Each call is routed by its request and response types: the table must
/// hold exactly one route with that signature. The client is cheap to
/// clone; clones share the connection pool and shut down together.
///
/// # Example
///
/// ```no_run
/// use apiwire_client::Client;
/// use apiwire_core::{Field, Route, Wire};
/// use http::Method;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Default, Serialize, Deserialize)]
/// struct GetUser {
///     #[serde(skip)]
///     id: u64,
/// }
///
/// impl Wire for GetUser {
///     fn fields() -> Vec<Field<Self>> {
///         vec![Field::new("id").path("id").text(|r: &mut Self| &mut r.id)]
///     }
/// }
///
/// #[derive(Default, Serialize, Deserialize)]
/// struct User {
///     name: String,
/// }
///
/// impl Wire for User {
///     fn fields() -> Vec<Field<Self>> {
///         vec![Field::new("name")]
///     }
/// }
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let routes = vec![Route::declare::<GetUser, User>(Method::GET, "/users/:id")];
/// let client = Client::builder(routes, "http://localhost:3000").build()?;
///
/// let user: User = client.call(GetUser { id: 7 }).await?;
/// println!("{}", user.name);
///
/// client.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    routes: HashMap<Signature, Route>,
    base_url: String,
    authorization: Option<HeaderValue>,
    human: bool,
    limits: MessageLimits,
    timeout: Option<Duration>,
    exec: ClosingClient<Arc<dyn HttpExec>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("routes", &self.inner.routes.len())
            .field("base_url", &self.inner.base_url)
            .field("human", &self.inner.human)
            .field("timeout", &self.inner.timeout)
            .field("exec", &self.inner.exec)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a new client builder.
    pub fn builder(routes: Vec<Route>, base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(routes, base_url)
    }

    pub(crate) fn new(
        routes: HashMap<Signature, Route>,
        base_url: String,
        authorization: Option<HeaderValue>,
        human: bool,
        limits: MessageLimits,
        timeout: Option<Duration>,
        exec: ClosingClient<Arc<dyn HttpExec>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                routes,
                base_url,
                authorization,
                human,
                limits,
                timeout,
                exec,
            }),
        }
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// The route a call of `(Req, Res)` goes to.
    pub fn route<Req: 'static, Res: 'static>(&self) -> Option<&Route> {
        self.inner.routes.get(&Signature::of::<Req, Res>())
    }

    /// Call the route whose signature is `(Req, Res)`.
    pub async fn call<Req: Wire, Res: Wire>(&self, request: Req) -> Result<Res, ClientError> {
        self.call_with_options(request, CallOptions::default()).await
    }

    /// Call the route whose signature is `(Req, Res)` with per-call options.
    ///
    /// Successful responses, and any response at all if `Res` carries the
    /// status code in a field, are decoded as `Res`. Other statuses are
    /// decoded as the error the server reported, in [`ClientError::Remote`].
    pub async fn call_with_options<Req: Wire, Res: Wire>(
        &self,
        request: Req,
        options: CallOptions,
    ) -> Result<Res, ClientError> {
        let signature = Signature::of::<Req, Res>();
        let route = self
            .inner
            .routes
            .get(&signature)
            .ok_or(ClientError::UnknownRoute(signature))?;
        let caller = route
            .caller::<Req, Res>()
            .ok_or(ClientError::UnknownRoute(signature))?;

        let human = options.human.unwrap_or(self.inner.human);
        let ctx = CallContext::new(self.inner.limits).with_human(human);

        let mut url = format!("{}{}", self.inner.base_url, route.path());
        if human {
            url.push('?');
            url.push_str(HUMAN_QUERY_PARAM);
            url.push_str("=on");
        }

        let mut http_request = caller
            .encode_request(&ctx, route.method().clone(), &url, request)
            .map_err(ClientError::Encode)?;
        let headers = http_request.headers_mut();
        if let Some(value) = &self.inner.authorization {
            headers.insert(header::AUTHORIZATION, value.clone());
        }
        merge_headers(headers, &options.headers);

        let exchange = self.exchange(caller, ctx, http_request);

        #[cfg(feature = "tracing")]
        let exchange = exchange.instrument(tracing::debug_span!(
            "apiwire.call",
            method = %route.method(),
            path = %route.path(),
        ));

        match options.timeout.or(self.inner.timeout) {
            Some(limit) => timeout(limit, exchange)
                .await
                .map_err(|_| ClientError::DeadlineExceeded)?,
            None => exchange.await,
        }
    }

    async fn exchange<Req: Wire, Res: Wire>(
        &self,
        caller: Arc<dyn CallTransport<Req, Res>>,
        ctx: CallContext,
        request: http::Request<apiwire_core::Body>,
    ) -> Result<Res, ClientError> {
        let response = self.inner.exec.execute(request).await?;
        let status = response.status();

        #[cfg(feature = "tracing")]
        tracing::debug!(%status, "response received");

        let as_response = status.is_success()
            || field_plan::<Res>()
                .map(|plan| plan.has_status())
                .unwrap_or(false);
        if as_response {
            caller
                .decode_response(ctx, response)
                .await
                .map_err(ClientError::Decode)
        } else {
            Err(ClientError::Remote(caller.decode_error(ctx, response).await))
        }
    }

    /// Abort every running call, release idle connections and wait until
    /// all calls have finished.
    ///
    /// Calls made after `close` fail with [`ClientError::Closing`].
    pub async fn close(&self) {
        self.inner.exec.close().await
    }
}

/// Add per-call headers the request does not set itself.
fn merge_headers(headers: &mut HeaderMap, extra: &HeaderMap) {
    for name in extra.keys() {
        if headers.contains_key(name) {
            continue;
        }
        for value in extra.get_all(name) {
            headers.append(name.clone(), value.clone());
        }
    }
}
