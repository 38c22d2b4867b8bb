//! Field placement plans.
//!
//! A message type describes where each of its fields travels: the JSON body,
//! a query parameter, a header, a cookie, a URL path segment, the response
//! status, or the whole body in one of several encodings. [`FieldPlan`]
//! validates that description once and is cached per type for the life of
//! the process.
//!
//! # Example
//!
//! ```
//! use apiwire_core::{Field, Wire};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Default, Serialize, Deserialize)]
//! struct GetUser {
//!     #[serde(skip)]
//!     id: u64,
//!     #[serde(skip)]
//!     token: String,
//!     verbose: bool,
//! }
//!
//! impl Wire for GetUser {
//!     fn fields() -> Vec<Field<Self>> {
//!         vec![
//!             Field::new("id").path("id").text(|r: &mut Self| &mut r.id),
//!             Field::new("token").header("X-Token").text(|r: &mut Self| &mut r.token),
//!             Field::new("verbose"),
//!         ]
//!     }
//! }
//!
//! let plan = apiwire_core::field_plan::<GetUser>().unwrap();
//! assert!(!plan.no_wire_special_fields());
//! ```
//!
//! Fields placed anywhere but the JSON body must be `#[serde(skip)]`, so that
//! the serde view of the type is exactly its JSON body.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, LazyLock};

use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{BodyStream, SetCookie, TextError, TextValue, WireError};

/// A message type that can be carried over HTTP.
pub trait Wire: Serialize + DeserializeOwned + Default + Send + 'static {
    /// Every field of the type, in declaration order.
    fn fields() -> Vec<Field<Self>>;
}

/// Where a field travels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Placement {
    Json,
    Query,
    Header,
    Cookie,
    Path,
    Body,
    Status,
}

impl Placement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Placement::Json => "json",
            Placement::Query => "query",
            Placement::Header => "header",
            Placement::Cookie => "cookie",
            Placement::Path => "path",
            Placement::Body => "use_as_body",
            Placement::Status => "status",
        }
    }

    fn expected_accessor(&self) -> &'static str {
        match self {
            Placement::Json => "no",
            Placement::Query | Placement::Header | Placement::Path => "text",
            Placement::Cookie => "text or set_cookie",
            Placement::Body => "body",
            Placement::Status => "status",
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoding of a field used as the whole body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyKind {
    /// Any serde value, as JSON.
    Structured,
    /// A protobuf message in its binary encoding.
    Protobuf,
    /// Bytes sent verbatim.
    RawBytes,
    /// A [`BodyStream`] handed through without buffering.
    Stream,
}

impl BodyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyKind::Structured => "structured",
            BodyKind::Protobuf => "protobuf",
            BodyKind::RawBytes => "raw_bytes",
            BodyKind::Stream => "stream",
        }
    }
}

impl fmt::Display for BodyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a call a type is used on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Request,
    Response,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Request => "request",
            Role::Response => "response",
        })
    }
}

/// Invalid field declarations, reported when a plan is built.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("{type_name}.{field}: conflicting placements {first} and {second}")]
    ConflictingPlacements {
        type_name: &'static str,
        field: &'static str,
        first: Placement,
        second: Placement,
    },

    #[error("{type_name}: more than one body field ({first}, {second})")]
    MultipleBodyFields {
        type_name: &'static str,
        first: &'static str,
        second: &'static str,
    },

    #[error("{type_name}: more than one status field ({first}, {second})")]
    MultipleStatusFields {
        type_name: &'static str,
        first: &'static str,
        second: &'static str,
    },

    #[error("{type_name}: body field {body} cannot be combined with JSON fields {residual:?}")]
    BodyWithResidual {
        type_name: &'static str,
        body: &'static str,
        residual: Vec<&'static str>,
    },

    #[error("{type_name}.{field}: {kind} body accessor requires use_as_body")]
    BodyKindWithoutBody {
        type_name: &'static str,
        field: &'static str,
        kind: BodyKind,
    },

    #[error("{type_name}.{field}: conflicting body kinds {first} and {second}")]
    ConflictingBodyKinds {
        type_name: &'static str,
        field: &'static str,
        first: BodyKind,
        second: BodyKind,
    },

    #[error("{type_name}.{field}: {placement} placement needs a {expected} accessor")]
    MissingAccessor {
        type_name: &'static str,
        field: &'static str,
        placement: Placement,
        expected: &'static str,
    },

    #[error("{type_name}.{field}: {found} accessor does not fit {placement} placement")]
    AccessorMismatch {
        type_name: &'static str,
        field: &'static str,
        placement: Placement,
        found: &'static str,
    },

    #[error("{type_name}: field {field} declared twice")]
    DuplicateField {
        type_name: &'static str,
        field: &'static str,
    },

    #[error("{type_name}: fields {first} and {second} share {placement} key {key:?}")]
    DuplicateKey {
        type_name: &'static str,
        placement: Placement,
        key: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("{type_name}.{field}: {reason} in a {role}")]
    RoleViolation {
        type_name: &'static str,
        field: &'static str,
        role: Role,
        reason: &'static str,
    },
}

/// Reads and writes one field as text.
pub(crate) trait TextSlot<T>: Send + Sync {
    fn read(&self, value: &mut T) -> Result<String, TextError>;
    /// Empty text resets the field to its default.
    fn write(&self, value: &mut T, text: &str) -> Result<(), TextError>;
}

struct TextAccess<T, V> {
    get: fn(&mut T) -> &mut V,
}

impl<T, V> TextSlot<T> for TextAccess<T, V>
where
    V: TextValue + Default,
{
    fn read(&self, value: &mut T) -> Result<String, TextError> {
        (self.get)(value).to_text()
    }

    fn write(&self, value: &mut T, text: &str) -> Result<(), TextError> {
        *(self.get)(value) = if text.is_empty() {
            V::default()
        } else {
            V::from_text(text)?
        };
        Ok(())
    }
}

/// The body content moved out of or into a body field.
pub(crate) enum Payload {
    Bytes(Bytes),
    Stream(BodyStream),
}

/// Moves a whole-body field to and from its encoded form.
pub(crate) trait BodySlot<T>: Send + Sync {
    fn kind(&self) -> BodyKind;
    fn take(&self, value: &mut T, human: bool) -> Result<Payload, WireError>;
    fn fill(&self, value: &mut T, payload: Payload) -> Result<(), WireError>;
}

struct StructuredSlot<T, V> {
    get: fn(&mut T) -> &mut V,
}

impl<T, V> BodySlot<T> for StructuredSlot<T, V>
where
    V: Serialize + DeserializeOwned + Default,
{
    fn kind(&self) -> BodyKind {
        BodyKind::Structured
    }

    fn take(&self, value: &mut T, human: bool) -> Result<Payload, WireError> {
        crate::codec::to_json(&*(self.get)(value), human).map(Payload::Bytes)
    }

    fn fill(&self, value: &mut T, payload: Payload) -> Result<(), WireError> {
        let bytes = expect_bytes(payload)?;
        if !bytes.is_empty() {
            *(self.get)(value) = serde_json::from_slice(&bytes)?;
        }
        Ok(())
    }
}

struct ProtobufSlot<T, V> {
    get: fn(&mut T) -> &mut V,
}

impl<T, V> BodySlot<T> for ProtobufSlot<T, V>
where
    V: prost::Message + Default,
{
    fn kind(&self) -> BodyKind {
        BodyKind::Protobuf
    }

    fn take(&self, value: &mut T, _human: bool) -> Result<Payload, WireError> {
        Ok(Payload::Bytes((self.get)(value).encode_to_vec().into()))
    }

    fn fill(&self, value: &mut T, payload: Payload) -> Result<(), WireError> {
        *(self.get)(value) = V::decode(expect_bytes(payload)?)?;
        Ok(())
    }
}

struct RawSlot<T> {
    get: fn(&mut T) -> &mut Bytes,
}

impl<T> BodySlot<T> for RawSlot<T> {
    fn kind(&self) -> BodyKind {
        BodyKind::RawBytes
    }

    fn take(&self, value: &mut T, _human: bool) -> Result<Payload, WireError> {
        Ok(Payload::Bytes(std::mem::take((self.get)(value))))
    }

    fn fill(&self, value: &mut T, payload: Payload) -> Result<(), WireError> {
        *(self.get)(value) = expect_bytes(payload)?;
        Ok(())
    }
}

struct StreamSlot<T> {
    get: fn(&mut T) -> &mut BodyStream,
}

impl<T> BodySlot<T> for StreamSlot<T> {
    fn kind(&self) -> BodyKind {
        BodyKind::Stream
    }

    fn take(&self, value: &mut T, _human: bool) -> Result<Payload, WireError> {
        Ok(Payload::Stream(std::mem::take((self.get)(value))))
    }

    fn fill(&self, value: &mut T, payload: Payload) -> Result<(), WireError> {
        *(self.get)(value) = match payload {
            Payload::Stream(stream) => stream,
            Payload::Bytes(bytes) => BodyStream::from_bytes(bytes),
        };
        Ok(())
    }
}

fn expect_bytes(payload: Payload) -> Result<Bytes, WireError> {
    match payload {
        Payload::Bytes(bytes) => Ok(bytes),
        Payload::Stream(_) => Err(WireError::Body("stream given to a buffered body field".into())),
    }
}

enum Access<T> {
    Text(Box<dyn TextSlot<T>>),
    Cookie(fn(&mut T) -> &mut SetCookie),
    Status(fn(&mut T) -> &mut u16),
    Body(Box<dyn BodySlot<T>>),
}

impl<T> Access<T> {
    fn describe(&self) -> &'static str {
        match self {
            Access::Text(_) => "text",
            Access::Cookie(_) => "set_cookie",
            Access::Status(_) => "status",
            Access::Body(slot) => slot.kind().as_str(),
        }
    }
}

/// Declaration of one field of a [`Wire`] type.
///
/// `name` is the field's serde name. Placements say where the field goes;
/// accessors give the codec typed access to it.
pub struct Field<T> {
    name: &'static str,
    placements: Vec<Placement>,
    key: Option<String>,
    accessors: Vec<Access<T>>,
    ignored: bool,
}

impl<T: 'static> Field<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            placements: Vec::new(),
            key: None,
            accessors: Vec::new(),
            ignored: false,
        }
    }

    fn place(mut self, placement: Placement, key: Option<String>) -> Self {
        self.placements.push(placement);
        if key.is_some() {
            self.key = key;
        }
        self
    }

    /// Keep the field in the JSON body. This is the default for fields
    /// without a placement.
    pub fn json(self) -> Self {
        self.place(Placement::Json, None)
    }

    /// Flatten a nested struct into the JSON body (`#[serde(flatten)]`).
    pub fn embedded(self) -> Self {
        self.place(Placement::Json, None)
    }

    /// Leave the field off the wire entirely (`#[serde(skip)]`).
    pub fn ignore(mut self) -> Self {
        self.ignored = true;
        self
    }

    pub fn query(self, key: impl Into<String>) -> Self {
        self.place(Placement::Query, Some(key.into()))
    }

    pub fn header(self, key: impl Into<String>) -> Self {
        self.place(Placement::Header, Some(key.into()))
    }

    pub fn cookie(self, key: impl Into<String>) -> Self {
        self.place(Placement::Cookie, Some(key.into()))
    }

    /// Bind the field to the `:key` parameter of the route's path template.
    pub fn path(self, key: impl Into<String>) -> Self {
        self.place(Placement::Path, Some(key.into()))
    }

    /// Use the field as the entire body. Pick the encoding with one of
    /// [`json_body`](Self::json_body), [`protobuf`](Self::protobuf),
    /// [`raw_bytes`](Self::raw_bytes) or [`stream`](Self::stream).
    pub fn use_as_body(self) -> Self {
        self.place(Placement::Body, None)
    }

    /// The HTTP status of a response. Zero is written as 200.
    pub fn status(mut self, get: fn(&mut T) -> &mut u16) -> Self {
        self.accessors.push(Access::Status(get));
        self.place(Placement::Status, None)
    }

    /// Convert the field through [`TextValue`].
    pub fn text<V>(mut self, get: fn(&mut T) -> &mut V) -> Self
    where
        V: TextValue + Default + 'static,
    {
        self.accessors.push(Access::Text(Box::new(TextAccess { get })));
        self
    }

    /// A response cookie with attributes.
    pub fn set_cookie(mut self, get: fn(&mut T) -> &mut SetCookie) -> Self {
        self.accessors.push(Access::Cookie(get));
        self
    }

    pub fn json_body<V>(mut self, get: fn(&mut T) -> &mut V) -> Self
    where
        V: Serialize + DeserializeOwned + Default + 'static,
    {
        self.accessors
            .push(Access::Body(Box::new(StructuredSlot { get })));
        self
    }

    pub fn protobuf<V>(mut self, get: fn(&mut T) -> &mut V) -> Self
    where
        V: prost::Message + Default + 'static,
    {
        self.accessors.push(Access::Body(Box::new(ProtobufSlot { get })));
        self
    }

    pub fn raw_bytes(mut self, get: fn(&mut T) -> &mut Bytes) -> Self {
        self.accessors.push(Access::Body(Box::new(RawSlot { get })));
        self
    }

    pub fn stream(mut self, get: fn(&mut T) -> &mut BodyStream) -> Self {
        self.accessors.push(Access::Body(Box::new(StreamSlot { get })));
        self
    }
}

pub(crate) enum Slot<T> {
    Text(Box<dyn TextSlot<T>>),
    Cookie(fn(&mut T) -> &mut SetCookie),
}

pub(crate) struct Binding<T> {
    pub(crate) field: &'static str,
    pub(crate) key: String,
    pub(crate) slot: Slot<T>,
}

pub(crate) struct BodyBinding<T> {
    pub(crate) field: &'static str,
    pub(crate) slot: Box<dyn BodySlot<T>>,
}

pub(crate) struct StatusBinding<T> {
    pub(crate) field: &'static str,
    pub(crate) get: fn(&mut T) -> &mut u16,
}

/// The validated wire layout of a message type.
pub struct FieldPlan<T> {
    type_name: &'static str,
    pub(crate) query: Vec<Binding<T>>,
    pub(crate) header: Vec<Binding<T>>,
    pub(crate) cookie: Vec<Binding<T>>,
    pub(crate) path: Vec<Binding<T>>,
    pub(crate) body: Option<BodyBinding<T>>,
    pub(crate) status: Option<StatusBinding<T>>,
    pub(crate) special: Vec<&'static str>,
    residual: Vec<&'static str>,
}

impl<T: Wire> FieldPlan<T> {
    /// Build the plan from `T::fields()`.
    pub fn build() -> Result<Self, PlanError> {
        Self::from_fields(T::fields())
    }

    fn from_fields(fields: Vec<Field<T>>) -> Result<Self, PlanError> {
        let type_name = std::any::type_name::<T>();
        let mut plan = FieldPlan {
            type_name,
            query: Vec::new(),
            header: Vec::new(),
            cookie: Vec::new(),
            path: Vec::new(),
            body: None,
            status: None,
            special: Vec::new(),
            residual: Vec::new(),
        };
        let mut seen = HashSet::new();
        let mut keys: HashMap<(Placement, String), &'static str> = HashMap::new();

        for mut field in fields {
            let name = field.name;
            if !seen.insert(name) {
                return Err(PlanError::DuplicateField {
                    type_name,
                    field: name,
                });
            }
            if field.ignored {
                continue;
            }
            if let [first, second, ..] = field.placements[..] {
                return Err(PlanError::ConflictingPlacements {
                    type_name,
                    field: name,
                    first,
                    second,
                });
            }
            let placement = field.placements.pop().unwrap_or(Placement::Json);
            let key = field.key.take().unwrap_or_else(|| name.to_owned());

            let mut accessors = field.accessors.into_iter();
            let access = accessors.next();
            if let Some(extra) = accessors.next() {
                return Err(match (&access, &extra) {
                    (Some(Access::Body(a)), Access::Body(b)) => PlanError::ConflictingBodyKinds {
                        type_name,
                        field: name,
                        first: a.kind(),
                        second: b.kind(),
                    },
                    _ => PlanError::AccessorMismatch {
                        type_name,
                        field: name,
                        placement,
                        found: extra.describe(),
                    },
                });
            }

            if placement != Placement::Json {
                plan.special.push(name);
            }

            if matches!(
                placement,
                Placement::Query | Placement::Header | Placement::Cookie | Placement::Path
            ) {
                // header names compare case-insensitively
                let wire_key = match placement {
                    Placement::Header => key.to_ascii_lowercase(),
                    _ => key.clone(),
                };
                if let Some(first) = keys.insert((placement, wire_key), name) {
                    return Err(PlanError::DuplicateKey {
                        type_name,
                        placement,
                        key,
                        first,
                        second: name,
                    });
                }
            }

            match (placement, access) {
                (Placement::Json, None) => plan.residual.push(name),
                (Placement::Json, Some(Access::Body(slot))) => {
                    return Err(PlanError::BodyKindWithoutBody {
                        type_name,
                        field: name,
                        kind: slot.kind(),
                    });
                }
                (Placement::Query, Some(Access::Text(slot))) => plan.query.push(Binding {
                    field: name,
                    key,
                    slot: Slot::Text(slot),
                }),
                (Placement::Header, Some(Access::Text(slot))) => plan.header.push(Binding {
                    field: name,
                    key,
                    slot: Slot::Text(slot),
                }),
                (Placement::Path, Some(Access::Text(slot))) => plan.path.push(Binding {
                    field: name,
                    key,
                    slot: Slot::Text(slot),
                }),
                (Placement::Cookie, Some(Access::Text(slot))) => plan.cookie.push(Binding {
                    field: name,
                    key,
                    slot: Slot::Text(slot),
                }),
                (Placement::Cookie, Some(Access::Cookie(get))) => plan.cookie.push(Binding {
                    field: name,
                    key,
                    slot: Slot::Cookie(get),
                }),
                (Placement::Status, Some(Access::Status(get))) => {
                    if let Some(existing) = &plan.status {
                        return Err(PlanError::MultipleStatusFields {
                            type_name,
                            first: existing.field,
                            second: name,
                        });
                    }
                    plan.status = Some(StatusBinding { field: name, get });
                }
                (Placement::Body, Some(Access::Body(slot))) => {
                    if let Some(existing) = &plan.body {
                        return Err(PlanError::MultipleBodyFields {
                            type_name,
                            first: existing.field,
                            second: name,
                        });
                    }
                    plan.body = Some(BodyBinding { field: name, slot });
                }
                (placement, None) => {
                    return Err(PlanError::MissingAccessor {
                        type_name,
                        field: name,
                        placement,
                        expected: placement.expected_accessor(),
                    });
                }
                (placement, Some(access)) => {
                    return Err(PlanError::AccessorMismatch {
                        type_name,
                        field: name,
                        placement,
                        found: access.describe(),
                    });
                }
            }
        }

        if let Some(body) = &plan.body {
            if !plan.residual.is_empty() {
                return Err(PlanError::BodyWithResidual {
                    type_name,
                    body: body.field,
                    residual: plan.residual.clone(),
                });
            }
        }

        Ok(plan)
    }
}

impl<T> FieldPlan<T> {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Encoding of the whole-body field, if the type has one.
    pub fn body_kind(&self) -> Option<BodyKind> {
        self.body.as_ref().map(|b| b.slot.kind())
    }

    pub fn has_status(&self) -> bool {
        self.status.is_some()
    }

    /// Fields written to the JSON body.
    pub fn residual_fields(&self) -> &[&'static str] {
        &self.residual
    }

    pub fn query_keys(&self) -> impl Iterator<Item = &str> {
        self.query.iter().map(|b| b.key.as_str())
    }

    pub fn header_keys(&self) -> impl Iterator<Item = &str> {
        self.header.iter().map(|b| b.key.as_str())
    }

    pub fn cookie_keys(&self) -> impl Iterator<Item = &str> {
        self.cookie.iter().map(|b| b.key.as_str())
    }

    pub fn path_keys(&self) -> impl Iterator<Item = &str> {
        self.path.iter().map(|b| b.key.as_str())
    }

    /// No field needs the JSON body: body parsing is skipped entirely.
    pub fn all_fields_are_wire_special(&self) -> bool {
        self.residual.is_empty()
    }

    /// Every field is in the JSON body: the value is its own body.
    pub fn no_wire_special_fields(&self) -> bool {
        self.special.is_empty()
    }

    /// Check the placements allowed for `role`.
    ///
    /// Requests may not carry a status; responses may not carry query or
    /// path fields. Request cookies are plain text, response cookies are
    /// [`SetCookie`] values.
    pub fn check_role(&self, role: Role) -> Result<(), PlanError> {
        let violation = |field, reason| PlanError::RoleViolation {
            type_name: self.type_name,
            field,
            role,
            reason,
        };
        match role {
            Role::Request => {
                if let Some(status) = &self.status {
                    return Err(violation(status.field, "status field not allowed"));
                }
                if let Some(b) = self.cookie.iter().find(|b| matches!(b.slot, Slot::Cookie(_))) {
                    return Err(violation(b.field, "cookie needs a text accessor"));
                }
            }
            Role::Response => {
                if let Some(b) = self.query.first() {
                    return Err(violation(b.field, "query field not allowed"));
                }
                if let Some(b) = self.path.first() {
                    return Err(violation(b.field, "path field not allowed"));
                }
                if let Some(b) = self.cookie.iter().find(|b| matches!(b.slot, Slot::Text(_))) {
                    return Err(violation(b.field, "cookie needs a set_cookie accessor"));
                }
            }
        }
        Ok(())
    }
}

impl<T> fmt::Debug for FieldPlan<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldPlan")
            .field("type_name", &self.type_name)
            .field("query", &self.query.iter().map(|b| &b.key).collect::<Vec<_>>())
            .field("header", &self.header.iter().map(|b| &b.key).collect::<Vec<_>>())
            .field("cookie", &self.cookie.iter().map(|b| &b.key).collect::<Vec<_>>())
            .field("path", &self.path.iter().map(|b| &b.key).collect::<Vec<_>>())
            .field("body", &self.body_kind())
            .field("status", &self.status.as_ref().map(|s| s.field))
            .field("residual", &self.residual)
            .finish()
    }
}

static PLANS: LazyLock<DashMap<TypeId, Arc<dyn Any + Send + Sync>>> = LazyLock::new(DashMap::new);

/// The cached plan for `T`, built on first use.
///
/// Concurrent first uses may each build the plan; the results are identical
/// and the last insert wins. Failed builds are not cached.
pub fn field_plan<T: Wire>() -> Result<Arc<FieldPlan<T>>, PlanError> {
    let id = TypeId::of::<T>();
    let cached = PLANS.get(&id).map(|entry| Arc::clone(entry.value()));
    if let Some(plan) = cached.and_then(|any| any.downcast::<FieldPlan<T>>().ok()) {
        return Ok(plan);
    }
    let plan = Arc::new(FieldPlan::<T>::build()?);
    PLANS.insert(id, plan.clone());
    Ok(plan)
}
