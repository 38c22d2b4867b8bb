//! Serving a route table.
//!
//! [`Dispatcher`] matches each request against the templates registered for
//! its method, then hands it to the route's endpoint, which decodes the
//! request, runs the handler and encodes the result. It is a
//! [`tower::Service`], and [`Dispatcher::into_router`] mounts it in axum.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use apiwire_core::{
    Body, BoxError, CallContext, Code, CodeError, HttpError, PathParams, Route, Router, Transport,
    WireError, human_requested,
};
use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::CONTENT_LENGTH;
use http::{Method, Request, Response, StatusCode};
use tower::Service;

use crate::{ServerConfig, SetupError};

#[derive(Default)]
struct Table {
    router: Router,
    /// Index into `Inner::routes` for each template of `router`.
    routes: Vec<usize>,
}

struct Inner {
    routes: Vec<Route>,
    tables: HashMap<Method, Table>,
    config: ServerConfig,
}

enum Miss {
    NotFound,
    MethodNotAllowed,
}

/// Dispatches requests to the handlers of a route table.
///
/// # Example
///
/// ```rust,no_run
/// use apiwire::{Dispatcher, ServerConfig};
/// use apiwire_core::{BoxError, CallContext, Field, Route, Wire};
/// use http::Method;
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Default, Serialize, Deserialize)]
/// # struct Ping { msg: String }
/// # impl Wire for Ping {
/// #     fn fields() -> Vec<Field<Self>> { vec![Field::new("msg")] }
/// # }
///
/// async fn ping(_ctx: CallContext, req: Ping) -> Result<Ping, BoxError> {
///     Ok(req)
/// }
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let dispatcher = Dispatcher::new(
///     [Route::new(Method::POST, "/ping", ping)],
///     ServerConfig::new(),
/// )?;
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
/// axum::serve(listener, dispatcher.into_router()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Check every route and compile one matcher per method.
    ///
    /// Fails if a route has no handler, if its message types are
    /// misdeclared, or if two routes share a method and template.
    pub fn new(
        routes: impl IntoIterator<Item = Route>,
        config: ServerConfig,
    ) -> Result<Self, SetupError> {
        let routes: Vec<Route> = routes.into_iter().collect();
        let mut seen = HashSet::new();
        let mut tables: HashMap<Method, Table> = HashMap::new();

        for (index, route) in routes.iter().enumerate() {
            if !route.has_handler() {
                return Err(SetupError::MissingHandler {
                    method: route.method().clone(),
                    path: route.path().to_owned(),
                });
            }
            route.validate()?;
            if !seen.insert((route.method().clone(), route.path().to_owned())) {
                return Err(SetupError::DuplicateRoute {
                    method: route.method().clone(),
                    path: route.path().to_owned(),
                });
            }
            let table = tables.entry(route.method().clone()).or_default();
            table.router.push(route.path());
            table.routes.push(index);
            tracing::debug!(method = %route.method(), path = route.path(), "registered route");
        }

        Ok(Self {
            inner: Arc::new(Inner {
                routes,
                tables,
                config,
            }),
        })
    }

    pub fn routes(&self) -> &[Route] {
        &self.inner.routes
    }

    /// The route serving `method` and `path`, with the parameters its
    /// template binds.
    pub fn route_for(&self, method: &Method, path: &str) -> Option<(&Route, PathParams)> {
        self.locate(method, path).ok()
    }

    fn locate(&self, method: &Method, path: &str) -> Result<(&Route, PathParams), Miss> {
        let inner = &*self.inner;
        let found = inner.tables.get(method).and_then(|table| {
            table
                .router
                .classify(path)
                .map(|(index, params)| (&inner.routes[table.routes[index]], params))
        });
        if let Some(found) = found {
            return Ok(found);
        }
        let elsewhere = inner
            .tables
            .iter()
            .any(|(other, table)| other != method && table.router.classify(path).is_some());
        if elsewhere {
            Err(Miss::MethodNotAllowed)
        } else {
            Err(Miss::NotFound)
        }
    }

    /// Serve one request.
    pub async fn dispatch(&self, request: Request<Body>) -> Response<Body> {
        let inner = &*self.inner;
        let human = inner.config.human || human_requested(request.uri().query());
        let ctx = CallContext::new(inner.config.limits).with_human(human);
        let method = request.method().clone();

        let (route, params) = match self.locate(&method, request.uri().path()) {
            Ok(found) => found,
            Err(Miss::NotFound) => {
                tracing::debug!(%method, path = request.uri().path(), "no route");
                let err = HttpError::not_found("failed to find route by path");
                return inner.config.transport.encode_error(&ctx, &err);
            }
            Err(Miss::MethodNotAllowed) => {
                let err = HttpError::new(
                    StatusCode::METHOD_NOT_ALLOWED,
                    format!("unsupported method: {method}"),
                );
                return inner.config.transport.encode_error(&ctx, &err);
            }
        };

        if let Some(length) = content_length(&request) {
            if let Some(limit) = inner.config.limits.exceeded_by(length) {
                let cause = WireError::TooLarge { limit };
                tracing::error!(%method, path = route.path(), length, "request body too large");
                let err = HttpError::new(cause.status(), format!("failed to parse request: {cause}"));
                return inner.config.transport.encode_error(&ctx, &err);
            }
        }

        let Some(endpoint) = route.endpoint() else {
            let err = HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, "route has no handler");
            return inner.config.transport.encode_error(&ctx, &err);
        };

        let ctx = ctx.with_params(params);
        let call = endpoint.call(ctx.clone(), request);
        match inner.config.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, call).await {
                Ok(response) => response,
                Err(_) => {
                    tracing::error!(%method, path = route.path(), ?timeout, "handler timed out");
                    let err = CodeError::new(Code::DeadlineExceeded, "handler timed out");
                    inner.config.transport.encode_error(&ctx, &err)
                }
            },
            None => call.await,
        }
    }

    /// An axum router serving every route of this dispatcher.
    pub fn into_router(self) -> axum::Router {
        axum::Router::new().fallback_service(self)
    }
}

fn content_length<B>(request: &Request<B>) -> Option<u64> {
    request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

impl<B> Service<Request<B>> for Dispatcher
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let dispatcher = self.clone();
        Box::pin(async move { Ok(dispatcher.dispatch(request.map(Body::new)).await) })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.inner.routes)
            .field("config", &self.inner.config)
            .finish()
    }
}
