//! Route descriptors.
//!
//! A [`Route`] ties a method and path template to a request/response type
//! pair, the [`Transport`] that carries them and, on the server, the handler
//! that serves them. The same route table drives both the dispatcher and
//! the client.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use http::{Method, Request, Response};
use serde_json::Value;

use crate::{
    Body, BoxError, CallContext, CallTransport, HttpError, JsonTransport, PlanError, Role,
    Transport, Wire, field_plan, url_keys,
};

/// The request and response types of a route.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    pub request: TypeId,
    pub response: TypeId,
    pub request_name: &'static str,
    pub response_name: &'static str,
}

impl Signature {
    pub fn of<Req: 'static, Res: 'static>() -> Self {
        Self {
            request: TypeId::of::<Req>(),
            response: TypeId::of::<Res>(),
            request_name: type_name::<Req>(),
            response_name: type_name::<Res>(),
        }
    }

    /// Whether the signature is `(Req, Res)`.
    pub fn is<Req: 'static, Res: 'static>(&self) -> bool {
        self.request == TypeId::of::<Req>() && self.response == TypeId::of::<Res>()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) -> {}", self.request_name, self.response_name)
    }
}

/// Route declarations that can never serve a call.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("{method} {path}: {source}")]
    Plan {
        method: Method,
        path: String,
        #[source]
        source: PlanError,
    },

    #[error("{method} {path}: path field {key} of {type_name} is not a template parameter")]
    UnboundPathField {
        method: Method,
        path: String,
        type_name: &'static str,
        key: String,
    },

    #[error("{method} {path}: template parameter {key} has no path field in {type_name}")]
    UnfilledParameter {
        method: Method,
        path: String,
        type_name: &'static str,
        key: String,
    },
}

/// Server side of a route: serves one decoded request.
pub trait Endpoint: Send + Sync {
    /// Decode, handle and encode one call. Failures are rendered as error
    /// responses by the route's transport.
    fn call<'a>(&'a self, ctx: CallContext, request: Request<Body>) -> BoxFuture<'a, Response<Body>>;
}

struct Handler<Tr, F, Req, Res> {
    transport: Tr,
    handler: F,
    _types: PhantomData<fn(Req) -> Res>,
}

impl<Tr, F, Fut, Req, Res> Endpoint for Handler<Tr, F, Req, Res>
where
    Tr: Transport,
    F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Res, BoxError>> + Send + 'static,
    Req: Wire,
    Res: Wire,
{
    fn call<'a>(&'a self, ctx: CallContext, request: Request<Body>) -> BoxFuture<'a, Response<Body>> {
        Box::pin(async move {
            let fallback = ctx.clone();
            let (ctx, value) = match self.transport.decode_request::<Req>(ctx, request).await {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::error!(error = %e, request = type_name::<Req>(), "failed to parse request");
                    let err = HttpError::new(e.status(), format!("failed to parse request: {e}"));
                    return self.transport.encode_error(&fallback, &err);
                }
            };

            let result = match (self.handler)(ctx.clone(), value).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "handler failed");
                    return self.transport.encode_error(&ctx, e.as_ref());
                }
            };

            match self.transport.encode_response(&ctx, result) {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(error = %e, response = type_name::<Res>(), "failed to encode response");
                    self.transport.encode_error(&ctx, &e)
                }
            }
        })
    }
}

/// Typed client half of a route, stored type-erased in [`Route`].
struct Caller<Req, Res> {
    transport: Arc<dyn CallTransport<Req, Res>>,
}

/// A method, path template and message types, with an optional handler.
///
/// ```
/// use apiwire_core::{BoxError, CallContext, Field, Route, Wire};
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
/// async fn get_user(_ctx: CallContext, req: GetUser) -> Result<User, BoxError> {
///     Ok(User { name: format!("user {}", req.id) })
/// }
///
/// let route = Route::new(Method::GET, "/users/:id", get_user).meta("auth", "admin");
/// route.validate().unwrap();
///
/// // The client only needs the declaration.
/// let declared = Route::declare::<GetUser, User>(Method::GET, "/users/:id");
/// assert!(!declared.has_handler());
/// ```
#[derive(Clone)]
pub struct Route {
    method: Method,
    path: String,
    signature: Signature,
    endpoint: Option<Arc<dyn Endpoint>>,
    caller: Arc<dyn Any + Send + Sync>,
    meta: HashMap<String, Value>,
    validate: fn(&Route) -> Result<(), RouteError>,
}

impl Route {
    /// A served route using [`JsonTransport`].
    pub fn new<F, Fut, Req, Res>(method: Method, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, BoxError>> + Send + 'static,
        Req: Wire,
        Res: Wire,
    {
        Self::with_transport(method, path, JsonTransport::default(), handler)
    }

    /// A served route using `transport`.
    pub fn with_transport<Tr, F, Fut, Req, Res>(
        method: Method,
        path: impl Into<String>,
        transport: Tr,
        handler: F,
    ) -> Self
    where
        Tr: Transport,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, BoxError>> + Send + 'static,
        Req: Wire,
        Res: Wire,
    {
        let mut route = Self::declare_with_transport::<Tr, Req, Res>(method, path, transport.clone());
        route.endpoint = Some(Arc::new(Handler {
            transport,
            handler,
            _types: PhantomData,
        }));
        route
    }

    /// A route without a handler, usable by the client only.
    pub fn declare<Req: Wire, Res: Wire>(method: Method, path: impl Into<String>) -> Self {
        Self::declare_with_transport::<JsonTransport, Req, Res>(method, path, JsonTransport::default())
    }

    pub fn declare_with_transport<Tr, Req, Res>(
        method: Method,
        path: impl Into<String>,
        transport: Tr,
    ) -> Self
    where
        Tr: Transport,
        Req: Wire,
        Res: Wire,
    {
        let caller: Caller<Req, Res> = Caller {
            transport: Arc::new(transport),
        };
        Self {
            method,
            path: path.into(),
            signature: Signature::of::<Req, Res>(),
            endpoint: None,
            caller: Arc::new(caller),
            meta: HashMap::new(),
            validate: validate_types::<Req, Res>,
        }
    }

    /// Attach a metadata entry. Existing keys are overwritten.
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.meta
    }

    pub fn has_handler(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn endpoint(&self) -> Option<&Arc<dyn Endpoint>> {
        self.endpoint.as_ref()
    }

    /// The client half of the route, if its signature is `(Req, Res)`.
    pub fn caller<Req: Wire, Res: Wire>(&self) -> Option<Arc<dyn CallTransport<Req, Res>>> {
        self.caller
            .downcast_ref::<Caller<Req, Res>>()
            .map(|c| Arc::clone(&c.transport))
    }

    /// Build and check the plans of both message types.
    ///
    /// Path fields of the request must be exactly the template's parameters.
    pub fn validate(&self) -> Result<(), RouteError> {
        (self.validate)(self)
    }
}

fn validate_types<Req: Wire, Res: Wire>(route: &Route) -> Result<(), RouteError> {
    let plan_error = |source| RouteError::Plan {
        method: route.method.clone(),
        path: route.path.clone(),
        source,
    };
    let request = field_plan::<Req>().map_err(plan_error)?;
    request.check_role(Role::Request).map_err(plan_error)?;
    let response = field_plan::<Res>().map_err(plan_error)?;
    response.check_role(Role::Response).map_err(plan_error)?;

    let params = url_keys(&route.path);
    if let Some(key) = request.path_keys().find(|key| !params.contains(key)) {
        return Err(RouteError::UnboundPathField {
            method: route.method.clone(),
            path: route.path.clone(),
            type_name: request.type_name(),
            key: key.to_owned(),
        });
    }
    if let Some(key) = params.iter().find(|param| !request.path_keys().any(|key| key == **param)) {
        return Err(RouteError::UnfilledParameter {
            method: route.method.clone(),
            path: route.path.clone(),
            type_name: request.type_name(),
            key: (*key).to_owned(),
        });
    }
    Ok(())
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("signature", &self.signature)
            .field("has_handler", &self.has_handler())
            .field("meta", &self.meta)
            .finish()
    }
}
