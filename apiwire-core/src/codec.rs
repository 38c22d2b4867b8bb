//! Converting message values to and from their HTTP form.
//!
//! [`Codec::encode`] splits a value into query pairs, headers, cookies, path
//! parameters, a status and a body according to its [`FieldPlan`].
//! [`Codec::decode`] is the mirror image.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body_util::Limited;
use serde::Serialize;

use crate::cookie::{parse_cookie_header, render_cookie_header};
use crate::plan::{Binding, Payload, Slot};
use crate::{
    Body, BodyKind, BodyStream, FieldPlan, PathParams, PlanError, Role, SetCookie, Wire,
    WireError, field_plan,
};

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";
pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";
pub const OCTET_STREAM_CONTENT_TYPE: &str = "application/octet-stream";

/// The wire pieces of an encoded value.
#[derive(Debug)]
pub struct Encoded {
    /// 200 unless the value carries a status field.
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub path_params: PathParams,
    pub body: Body,
}

/// The non-body parts of an incoming message.
#[derive(Clone, Copy, Debug)]
pub struct Source<'a> {
    pub headers: &'a HeaderMap,
    /// Raw query string, without the `?`.
    pub query: Option<&'a str>,
    pub path_params: Option<&'a PathParams>,
    pub status: Option<StatusCode>,
}

impl<'a> Source<'a> {
    pub fn new(headers: &'a HeaderMap) -> Self {
        Self {
            headers,
            query: None,
            path_params: None,
            status: None,
        }
    }
}

/// Encoder and decoder for one message type.
pub struct Codec<T> {
    plan: Arc<FieldPlan<T>>,
}

impl<T> Clone for Codec<T> {
    fn clone(&self) -> Self {
        Self {
            plan: Arc::clone(&self.plan),
        }
    }
}

impl<T: Wire> Codec<T> {
    pub fn new() -> Result<Self, PlanError> {
        Ok(Self {
            plan: field_plan::<T>()?,
        })
    }

    pub fn plan(&self) -> &FieldPlan<T> {
        &self.plan
    }

    pub fn encode(&self, mut value: T, role: Role, human: bool) -> Result<Encoded, WireError> {
        let plan = &*self.plan;
        let mut out = Encoded {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            query: Vec::new(),
            path_params: PathParams::new(),
            body: Body::Empty,
        };

        for binding in &plan.query {
            let text = read_text(binding, &mut value)?;
            if !text.is_empty() {
                out.query.push((binding.key.clone(), text));
            }
        }

        for binding in &plan.header {
            let text = read_text(binding, &mut value)?;
            if !text.is_empty() {
                let name = HeaderName::from_bytes(binding.key.as_bytes())
                    .map_err(|e| WireError::Encode(format!("header name {}: {e}", binding.key)))?;
                out.headers.insert(name, header_value(&binding.key, &text)?);
            }
        }

        for binding in &plan.path {
            let text = read_text(binding, &mut value)?;
            out.path_params.insert(binding.key.clone(), text);
        }

        match role {
            Role::Request => {
                let mut pairs = Vec::new();
                for binding in &plan.cookie {
                    let text = match &binding.slot {
                        Slot::Text(_) => read_text(binding, &mut value)?,
                        Slot::Cookie(get) => std::mem::take(&mut get(&mut value).value),
                    };
                    if !text.is_empty() {
                        pairs.push((binding.key.as_str(), text));
                    }
                }
                if !pairs.is_empty() {
                    let header = render_cookie_header(pairs.iter().map(|(k, v)| (*k, v.as_str())));
                    out.headers.insert(COOKIE, header_value("Cookie", &header)?);
                }
            }
            Role::Response => {
                for binding in &plan.cookie {
                    let mut cookie = match &binding.slot {
                        Slot::Text(_) => SetCookie::new("", read_text(binding, &mut value)?),
                        Slot::Cookie(get) => std::mem::take(get(&mut value)),
                    };
                    if cookie.is_unset() {
                        continue;
                    }
                    if cookie.name.is_empty() {
                        cookie.name = binding.key.clone();
                    } else if cookie.name != binding.key {
                        return Err(WireError::CookieName {
                            expected: binding.key.clone(),
                            found: cookie.name,
                        });
                    }
                    out.headers
                        .append(SET_COOKIE, header_value("Set-Cookie", &cookie.to_string())?);
                }
            }
        }

        if let (Role::Response, Some(status)) = (role, &plan.status) {
            let code = *(status.get)(&mut value);
            if code != 0 {
                out.status = StatusCode::from_u16(code)
                    .map_err(|e| WireError::Encode(format!("status {code}: {e}")))?;
            }
        }

        if let Some(binding) = &plan.body {
            let content_type = match binding.slot.kind() {
                BodyKind::Structured => JSON_CONTENT_TYPE,
                BodyKind::Protobuf => PROTOBUF_CONTENT_TYPE,
                BodyKind::RawBytes | BodyKind::Stream => OCTET_STREAM_CONTENT_TYPE,
            };
            out.body = match binding.slot.take(&mut value, human)? {
                Payload::Bytes(bytes) => Body::full(bytes),
                Payload::Stream(stream) => stream.into_body(),
            };
            out.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        } else if !plan.all_fields_are_wire_special() {
            let bytes = if plan.no_wire_special_fields() {
                to_json(&value, human)?
            } else {
                let mut view =
                    serde_json::to_value(&value).map_err(|e| WireError::Encode(e.to_string()))?;
                if let serde_json::Value::Object(map) = &mut view {
                    for name in &plan.special {
                        map.remove(*name);
                    }
                }
                to_json(&view, human)?
            };
            out.body = Body::full(bytes);
            out.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        }

        Ok(out)
    }

    /// Decode a value from `source` and `body`.
    ///
    /// The body is read to the end, up to `limit` bytes, unless the type's
    /// body field is a stream; then the field takes ownership of the body
    /// and the limit applies as it is read.
    pub async fn decode(
        &self,
        source: Source<'_>,
        body: Body,
        role: Role,
        limit: Option<usize>,
    ) -> Result<T, WireError> {
        let plan = &*self.plan;
        let mut value = T::default();

        if let Some(binding) = &plan.body {
            let payload = if binding.slot.kind() == BodyKind::Stream {
                let body = match limit {
                    Some(limit) => Body::new(Limited::new(body, limit)),
                    None => body,
                };
                Payload::Stream(BodyStream::new(body))
            } else {
                Payload::Bytes(body.collect_limited(limit).await?)
            };
            binding.slot.fill(&mut value, payload)?;
        } else {
            // Drained even when unused, so the connection can be reused.
            let bytes = body.collect_limited(limit).await?;
            if !plan.all_fields_are_wire_special() && !is_blank(&bytes) {
                value = serde_json::from_slice(&bytes)?;
            }
        }

        self.fill_fields(&mut value, source, role)?;
        Ok(value)
    }

    fn fill_fields(&self, value: &mut T, source: Source<'_>, role: Role) -> Result<(), WireError> {
        let plan = &*self.plan;

        if !plan.query.is_empty() {
            let pairs: Vec<(String, String)> = match source.query {
                Some(query) => serde_urlencoded::from_str(query)
                    .map_err(|e| WireError::Query(e.to_string()))?,
                None => Vec::new(),
            };
            for binding in &plan.query {
                let text = pairs
                    .iter()
                    .find(|(key, _)| *key == binding.key)
                    .map_or("", |(_, v)| v.as_str());
                write_text(binding, value, text)?;
            }
        }

        for binding in &plan.header {
            let text = match source.headers.get(binding.key.as_str()) {
                Some(v) => v.to_str().map_err(|e| WireError::Header {
                    name: binding.key.clone(),
                    reason: e.to_string(),
                })?,
                None => "",
            };
            write_text(binding, value, text)?;
        }

        for binding in &plan.path {
            let text = source
                .path_params
                .and_then(|params| params.get(&binding.key))
                .map_or("", String::as_str);
            write_text(binding, value, text)?;
        }

        if !plan.cookie.is_empty() {
            let cookies = match role {
                Role::Request => request_cookies(source.headers),
                Role::Response => response_cookies(source.headers)?,
            };
            for binding in &plan.cookie {
                let found = cookies.iter().find(|c| c.name == binding.key);
                match &binding.slot {
                    Slot::Text(_) => {
                        write_text(binding, value, found.map_or("", |c| c.value.as_str()))?
                    }
                    Slot::Cookie(get) => *get(value) = found.cloned().unwrap_or_default(),
                }
            }
        }

        if let (Some(binding), Some(status)) = (&plan.status, source.status) {
            *(binding.get)(value) = status.as_u16();
        }

        Ok(())
    }
}

fn read_text<T>(binding: &Binding<T>, value: &mut T) -> Result<String, WireError> {
    match &binding.slot {
        Slot::Text(slot) => slot.read(value).map_err(|e| WireError::Encode(e.to_string())),
        Slot::Cookie(get) => Ok(get(value).value.clone()),
    }
}

fn write_text<T>(binding: &Binding<T>, value: &mut T, text: &str) -> Result<(), WireError> {
    match &binding.slot {
        Slot::Text(slot) => slot.write(value, text).map_err(|source| WireError::Text {
            field: binding.field,
            source,
        }),
        Slot::Cookie(get) => {
            get(value).value = text.to_owned();
            Ok(())
        }
    }
}

fn header_value(name: &str, text: &str) -> Result<HeaderValue, WireError> {
    HeaderValue::from_str(text).map_err(|e| WireError::Encode(format!("header {name}: {e}")))
}

fn request_cookies(headers: &HeaderMap) -> Vec<SetCookie> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(parse_cookie_header)
        .map(|(name, value)| SetCookie::new(name, value))
        .collect()
}

fn response_cookies(headers: &HeaderMap) -> Result<Vec<SetCookie>, WireError> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|v| SetCookie::parse(v).map_err(WireError::from))
        .collect()
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

/// Serialize `value` as JSON; `human` selects indented output with a
/// trailing newline.
pub(crate) fn to_json<V: Serialize + ?Sized>(value: &V, human: bool) -> Result<Bytes, WireError> {
    let encoded = if human {
        serde_json::to_vec_pretty(value).map(|mut v| {
            v.push(b'\n');
            v
        })
    } else {
        serde_json::to_vec(value)
    };
    encoded
        .map(Bytes::from)
        .map_err(|e| WireError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Field;
    use futures::StreamExt;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct CreatePost {
        #[serde(skip)]
        user: String,
        #[serde(skip)]
        token: String,
        #[serde(skip)]
        session: String,
        #[serde(skip)]
        draft: Option<bool>,
        text: String,
        tags: Vec<String>,
    }

    impl Wire for CreatePost {
        fn fields() -> Vec<Field<Self>> {
            vec![
                Field::new("user").path("user").text(|p: &mut Self| &mut p.user),
                Field::new("token").header("X-Token").text(|p: &mut Self| &mut p.token),
                Field::new("session").cookie("sid").text(|p: &mut Self| &mut p.session),
                Field::new("draft").query("draft").text(|p: &mut Self| &mut p.draft),
                Field::new("text"),
                Field::new("tags"),
            ]
        }
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Created {
        #[serde(skip)]
        status: u16,
        #[serde(skip)]
        session: SetCookie,
        #[serde(skip)]
        etag: String,
        id: u64,
    }

    impl Wire for Created {
        fn fields() -> Vec<Field<Self>> {
            vec![
                Field::new("status").status(|c: &mut Self| &mut c.status),
                Field::new("session").cookie("sid").set_cookie(|c: &mut Self| &mut c.session),
                Field::new("etag").header("ETag").text(|c: &mut Self| &mut c.etag),
                Field::new("id"),
            ]
        }
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Ping {
        #[serde(skip)]
        id: String,
    }

    impl Wire for Ping {
        fn fields() -> Vec<Field<Self>> {
            vec![Field::new("id").header("X-Id").text(|p: &mut Self| &mut p.id)]
        }
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Upload {
        #[serde(skip)]
        name: String,
        #[serde(skip)]
        data: Bytes,
    }

    impl Wire for Upload {
        fn fields() -> Vec<Field<Self>> {
            vec![
                Field::new("name").path("name").text(|u: &mut Self| &mut u.name),
                Field::new("data").use_as_body().raw_bytes(|u: &mut Self| &mut u.data),
            ]
        }
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Note {
        #[serde(skip)]
        text: String,
    }

    impl Wire for Note {
        fn fields() -> Vec<Field<Self>> {
            vec![Field::new("text").use_as_body().protobuf(|n: &mut Self| &mut n.text)]
        }
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Batch {
        #[serde(skip)]
        items: Vec<u32>,
    }

    impl Wire for Batch {
        fn fields() -> Vec<Field<Self>> {
            vec![Field::new("items").use_as_body().json_body(|b: &mut Self| &mut b.items)]
        }
    }

    #[derive(Default, Serialize, Deserialize)]
    struct Download {
        #[serde(skip)]
        content: BodyStream,
    }

    impl Wire for Download {
        fn fields() -> Vec<Field<Self>> {
            vec![Field::new("content").use_as_body().stream(|d: &mut Self| &mut d.content)]
        }
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Flat {
        a: u32,
        b: String,
    }

    impl Wire for Flat {
        fn fields() -> Vec<Field<Self>> {
            vec![Field::new("a"), Field::new("b")]
        }
    }

    async fn round_trip<T: Wire>(value: T, role: Role) -> T {
        let codec = Codec::<T>::new().unwrap();
        let encoded = codec.encode(value, role, false).unwrap();
        let query = serde_urlencoded::to_string(&encoded.query).unwrap();
        let source = Source {
            headers: &encoded.headers,
            query: Some(&query),
            path_params: Some(&encoded.path_params),
            status: Some(encoded.status),
        };
        codec.decode(source, encoded.body, role, Some(1 << 20)).await.unwrap()
    }

    fn sample_post() -> CreatePost {
        CreatePost {
            user: "ann".into(),
            token: "t-1".into(),
            session: "s-9".into(),
            draft: Some(true),
            text: "hello".into(),
            tags: vec!["a".into(), "b".into()],
        }
    }

    #[tokio::test]
    async fn test_request_placements() {
        let codec = Codec::<CreatePost>::new().unwrap();
        let encoded = codec.encode(sample_post(), Role::Request, false).unwrap();

        assert_eq!(encoded.query, vec![("draft".to_string(), "true".to_string())]);
        assert_eq!(encoded.headers["x-token"], "t-1");
        assert_eq!(encoded.headers[COOKIE], "sid=s-9");
        assert_eq!(encoded.headers[CONTENT_TYPE], JSON_CONTENT_TYPE);
        assert_eq!(encoded.path_params["user"], "ann");

        let body = encoded.body.collect_limited(None).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({"text": "hello", "tags": ["a", "b"]}));
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        assert_eq!(round_trip(sample_post(), Role::Request).await, sample_post());
    }

    #[tokio::test]
    async fn test_missing_values_decode_to_defaults() {
        let codec = Codec::<CreatePost>::new().unwrap();
        let headers = HeaderMap::new();
        let value = codec
            .decode(Source::new(&headers), Body::empty(), Role::Request, None)
            .await
            .unwrap();
        assert_eq!(value, CreatePost::default());
    }

    #[tokio::test]
    async fn test_invalid_query_value() {
        let codec = Codec::<CreatePost>::new().unwrap();
        let headers = HeaderMap::new();
        let source = Source {
            query: Some("draft=maybe"),
            ..Source::new(&headers)
        };
        let err = codec
            .decode(source, Body::empty(), Role::Request, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::Text { field: "draft", .. }));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_response_status_and_cookie() {
        let value = Created {
            status: 201,
            session: SetCookie::new("", "abc").path("/").http_only(true),
            etag: "v7".into(),
            id: 99,
        };
        let codec = Codec::<Created>::new().unwrap();
        let encoded = codec.encode(value, Role::Response, false).unwrap();
        assert_eq!(encoded.status, StatusCode::CREATED);
        assert_eq!(encoded.headers[SET_COOKIE], "sid=abc; Path=/; HttpOnly");
        assert_eq!(encoded.headers["etag"], "v7");

        let decoded = round_trip(
            Created {
                status: 201,
                session: SetCookie::new("sid", "abc").path("/"),
                etag: "v7".into(),
                id: 99,
            },
            Role::Response,
        )
        .await;
        assert_eq!(decoded.status, 201);
        assert_eq!(decoded.session.value, "abc");
        assert_eq!(decoded.session.path.as_deref(), Some("/"));
        assert_eq!(decoded.id, 99);
    }

    #[tokio::test]
    async fn test_zero_status_is_ok() {
        let codec = Codec::<Created>::new().unwrap();
        let encoded = codec.encode(Created::default(), Role::Response, false).unwrap();
        assert_eq!(encoded.status, StatusCode::OK);
        assert!(encoded.headers.get(SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_wrong_cookie_name() {
        let codec = Codec::<Created>::new().unwrap();
        let value = Created {
            session: SetCookie::new("other", "x"),
            ..Default::default()
        };
        let err = codec.encode(value, Role::Response, false).unwrap_err();
        assert!(matches!(err, WireError::CookieName { .. }));
    }

    #[tokio::test]
    async fn test_all_special_writes_no_body() {
        let codec = Codec::<Ping>::new().unwrap();
        let encoded = codec
            .encode(Ping { id: "7".into() }, Role::Request, false)
            .unwrap();
        assert!(matches!(encoded.body, Body::Empty));
        assert!(encoded.headers.get(CONTENT_TYPE).is_none());

        // a stray body is drained and ignored
        let value = codec
            .decode(Source::new(&encoded.headers), Body::full("garbage"), Role::Request, None)
            .await
            .unwrap();
        assert_eq!(value.id, "7");
    }

    #[tokio::test]
    async fn test_no_special_fields() {
        let codec = Codec::<Flat>::new().unwrap();
        let encoded = codec
            .encode(Flat { a: 1, b: "x".into() }, Role::Request, true)
            .unwrap();
        let body = encoded.body.collect_limited(None).await.unwrap();
        assert_eq!(&body[..], b"{\n  \"a\": 1,\n  \"b\": \"x\"\n}\n");
        assert_eq!(
            round_trip(Flat { a: 1, b: "x".into() }, Role::Response).await,
            Flat { a: 1, b: "x".into() }
        );
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let codec = Codec::<Flat>::new().unwrap();
        let headers = HeaderMap::new();
        let err = codec
            .decode(Source::new(&headers), Body::full("{\"a\":"), Role::Request, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::Json(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_body_limit() {
        let codec = Codec::<Flat>::new().unwrap();
        let headers = HeaderMap::new();
        let err = codec
            .decode(
                Source::new(&headers),
                Body::full("{\"a\": 1, \"b\": \"long enough\"}"),
                Role::Request,
                Some(8),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::TooLarge { limit: 8 }));
    }

    #[tokio::test]
    async fn test_raw_body() {
        let upload = || Upload {
            name: "f.txt".into(),
            data: Bytes::from_static(b"\x00\x01raw"),
        };
        let codec = Codec::<Upload>::new().unwrap();
        let encoded = codec.encode(upload(), Role::Request, false).unwrap();
        assert_eq!(encoded.headers[CONTENT_TYPE], OCTET_STREAM_CONTENT_TYPE);
        assert_eq!(encoded.path_params["name"], "f.txt");
        assert_eq!(round_trip(upload(), Role::Request).await, upload());
    }

    #[tokio::test]
    async fn test_protobuf_body() {
        let codec = Codec::<Note>::new().unwrap();
        let encoded = codec
            .encode(Note { text: "hi".into() }, Role::Response, false)
            .unwrap();
        assert_eq!(encoded.headers[CONTENT_TYPE], PROTOBUF_CONTENT_TYPE);
        let bytes = encoded.body.collect_limited(None).await.unwrap();
        // field 1, wire type 2, length 2
        assert_eq!(&bytes[..], b"\x0a\x02hi");
        assert_eq!(
            round_trip(Note { text: "hi".into() }, Role::Response).await,
            Note { text: "hi".into() }
        );
    }

    #[tokio::test]
    async fn test_structured_body_field() {
        let codec = Codec::<Batch>::new().unwrap();
        let encoded = codec
            .encode(Batch { items: vec![1, 2, 3] }, Role::Request, false)
            .unwrap();
        let bytes = encoded.body.collect_limited(None).await.unwrap();
        assert_eq!(&bytes[..], b"[1,2,3]");
        assert_eq!(
            round_trip(Batch { items: vec![4] }, Role::Request).await,
            Batch { items: vec![4] }
        );
    }

    #[tokio::test]
    async fn test_stream_body_is_not_drained() {
        let codec = Codec::<Download>::new().unwrap();
        let (tx, rx) = futures::channel::mpsc::unbounded::<Result<Bytes, std::io::Error>>();
        tx.unbounded_send(Ok(Bytes::from("first"))).unwrap();

        let headers = HeaderMap::new();
        // decode returns while the sender is still open
        let mut value = codec
            .decode(
                Source::new(&headers),
                Body::from_stream(rx),
                Role::Response,
                Some(1024),
            )
            .await
            .unwrap();
        assert_eq!(value.content.next().await.unwrap().unwrap(), "first");

        tx.unbounded_send(Ok(Bytes::from("second"))).unwrap();
        drop(tx);
        assert_eq!(value.content.bytes().await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_stream_body_passes_through_encode() {
        let codec = Codec::<Download>::new().unwrap();
        let value = Download {
            content: BodyStream::from_bytes("streamed"),
        };
        let encoded = codec.encode(value, Role::Response, false).unwrap();
        assert_eq!(encoded.headers[CONTENT_TYPE], OCTET_STREAM_CONTENT_TYPE);
        assert_eq!(encoded.body.collect_limited(None).await.unwrap(), "streamed");
    }
}
