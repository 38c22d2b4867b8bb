//! The six wire operations shared by server and client.
//!
//! A [`Transport`] turns typed values into HTTP messages and back. The
//! dispatcher uses the server half (`decode_request`, `encode_response`,
//! `encode_error`); the client uses the other (`encode_request`,
//! `decode_response`, `decode_error`). [`JsonTransport`] is the default,
//! built on [`Codec`] and an [`ErrorRegistry`].

use std::error::Error;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderValue, Method, Request, Response};

use crate::codec::to_json;
use crate::{
    Body, BoxError, CallContext, Codec, ErrorRegistry, JSON_CONTENT_TYPE, RemoteError, Role,
    Source, Wire, WireError, build_url,
};

/// Converts typed values to and from HTTP messages.
pub trait Transport: Clone + Send + Sync + 'static {
    /// Read a request value. `ctx` comes back with any state the transport
    /// negotiated.
    fn decode_request<Req: Wire>(
        &self,
        ctx: CallContext,
        request: Request<Body>,
    ) -> impl Future<Output = Result<(CallContext, Req), WireError>> + Send;

    fn encode_response<Res: Wire>(
        &self,
        ctx: &CallContext,
        value: Res,
    ) -> Result<Response<Body>, WireError>;

    /// Render `err` as an error response. Never fails.
    fn encode_error(&self, ctx: &CallContext, err: &(dyn Error + 'static)) -> Response<Body>;

    /// Build the request for `value`. `url` is the base URL joined with the
    /// route's path template; path fields are substituted into it.
    fn encode_request<Req: Wire>(
        &self,
        ctx: &CallContext,
        method: Method,
        url: &str,
        value: Req,
    ) -> Result<Request<Body>, WireError>;

    fn decode_response<Res: Wire>(
        &self,
        ctx: &CallContext,
        response: Response<Body>,
    ) -> impl Future<Output = Result<Res, WireError>> + Send;

    /// Rebuild the error an unsuccessful response describes.
    fn decode_error(
        &self,
        ctx: &CallContext,
        response: Response<Body>,
    ) -> impl Future<Output = BoxError> + Send;
}

/// JSON bodies, with typed errors described by an [`ErrorRegistry`].
#[derive(Clone, Debug, Default)]
pub struct JsonTransport {
    errors: Arc<ErrorRegistry>,
}

impl JsonTransport {
    pub fn new(errors: ErrorRegistry) -> Self {
        Self {
            errors: Arc::new(errors),
        }
    }

    pub fn errors(&self) -> &ErrorRegistry {
        &self.errors
    }
}

impl Transport for JsonTransport {
    async fn decode_request<Req: Wire>(
        &self,
        ctx: CallContext,
        request: Request<Body>,
    ) -> Result<(CallContext, Req), WireError> {
        let codec = Codec::<Req>::new()?;
        let (parts, body) = request.into_parts();
        let source = Source {
            headers: &parts.headers,
            query: parts.uri.query(),
            path_params: Some(&ctx.params),
            status: None,
        };
        let value = codec
            .decode(source, body, Role::Request, ctx.limits.max_message_size())
            .await?;
        Ok((ctx, value))
    }

    fn encode_response<Res: Wire>(
        &self,
        ctx: &CallContext,
        value: Res,
    ) -> Result<Response<Body>, WireError> {
        let encoded = Codec::<Res>::new()?.encode(value, Role::Response, ctx.human)?;
        let mut response = Response::new(encoded.body);
        *response.status_mut() = encoded.status;
        *response.headers_mut() = encoded.headers;
        Ok(response)
    }

    fn encode_error(&self, ctx: &CallContext, err: &(dyn Error + 'static)) -> Response<Body> {
        let status = self.errors.status_of(err);
        let envelope = self.errors.encode(err);
        let body = match to_json(&envelope, ctx.human) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode error envelope");
                to_json(&crate::ErrorEnvelope::message(err.to_string()), ctx.human)
                    .unwrap_or_default()
            }
        };
        let mut response = Response::new(Body::full(body));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        response
    }

    fn encode_request<Req: Wire>(
        &self,
        ctx: &CallContext,
        method: Method,
        url: &str,
        value: Req,
    ) -> Result<Request<Body>, WireError> {
        let encoded = Codec::<Req>::new()?.encode(value, Role::Request, ctx.human)?;

        let (template, base_query) = match url.split_once('?') {
            Some((template, query)) => (template, Some(query)),
            None => (url, None),
        };
        let mut uri = build_url(template, &encoded.path_params)?;
        let query = serde_urlencoded::to_string(&encoded.query)
            .map_err(|e| WireError::Encode(format!("query: {e}")))?;
        let query: Vec<&str> = base_query
            .into_iter()
            .chain(Some(query.as_str()))
            .filter(|q| !q.is_empty())
            .collect();
        if !query.is_empty() {
            uri.push('?');
            uri.push_str(&query.join("&"));
        }

        let mut request = Request::new(encoded.body);
        *request.method_mut() = method;
        *request.uri_mut() = uri
            .parse()
            .map_err(|e| WireError::Encode(format!("url {uri}: {e}")))?;
        *request.headers_mut() = encoded.headers;
        request
            .headers_mut()
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        Ok(request)
    }

    async fn decode_response<Res: Wire>(
        &self,
        ctx: &CallContext,
        response: Response<Body>,
    ) -> Result<Res, WireError> {
        let codec = Codec::<Res>::new()?;
        let (parts, body) = response.into_parts();
        let source = Source {
            status: Some(parts.status),
            ..Source::new(&parts.headers)
        };
        codec
            .decode(source, body, Role::Response, ctx.limits.max_message_size())
            .await
    }

    async fn decode_error(&self, ctx: &CallContext, response: Response<Body>) -> BoxError {
        let (parts, body) = response.into_parts();
        match body.collect_limited(ctx.limits.max_message_size()).await {
            Ok(bytes) => self.errors.decode_body(&bytes, parts.status),
            Err(e) => Box::new(RemoteError {
                status: parts.status,
                message: format!("failed to read error body: {e}"),
            }),
        }
    }
}

/// The client half of a [`Transport`] for one request/response pair, in a
/// form that can be stored behind a trait object.
pub trait CallTransport<Req, Res>: Send + Sync {
    fn encode_request(
        &self,
        ctx: &CallContext,
        method: Method,
        url: &str,
        value: Req,
    ) -> Result<Request<Body>, WireError>;

    fn decode_response(
        &self,
        ctx: CallContext,
        response: Response<Body>,
    ) -> BoxFuture<'static, Result<Res, WireError>>;

    fn decode_error(&self, ctx: CallContext, response: Response<Body>) -> BoxFuture<'static, BoxError>;
}

impl<Tr, Req, Res> CallTransport<Req, Res> for Tr
where
    Tr: Transport,
    Req: Wire,
    Res: Wire,
{
    fn encode_request(
        &self,
        ctx: &CallContext,
        method: Method,
        url: &str,
        value: Req,
    ) -> Result<Request<Body>, WireError> {
        Transport::encode_request(self, ctx, method, url, value)
    }

    fn decode_response(
        &self,
        ctx: CallContext,
        response: Response<Body>,
    ) -> BoxFuture<'static, Result<Res, WireError>> {
        let transport = self.clone();
        Box::pin(async move { Transport::decode_response(&transport, &ctx, response).await })
    }

    fn decode_error(&self, ctx: CallContext, response: Response<Body>) -> BoxFuture<'static, BoxError> {
        let transport = self.clone();
        Box::pin(async move { Transport::decode_error(&transport, &ctx, response).await })
    }
}
