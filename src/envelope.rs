//! Versioned message envelopes
//!
//! An [`Envelope`] wraps a typed payload with the metadata every consumer
//! needs: a unique id, a UTC creation timestamp, the schema version and the
//! message type. Concrete messages are declared by implementing
//! [`MessageType`] on a marker type, which fixes the type name, the kind
//! (command or event), the schema version and the payload schema at compile
//! time.
//!
//! Serialized form (JSON, UTF-8):
//!
//! ```json
//! {
//!   "id": "5b0e...",
//!   "created_at": "2025-01-01T12:01:02.123456Z",
//!   "schema_version": "v1",
//!   "type": "RunWorkflow",
//!   "payload": { ... }
//! }
//! ```
//!
//! Attributes are never part of the serialized form; they travel as broker
//! metadata.

use crate::error::{PubSubError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use uuid::Uuid;

/// Reserved attribute extracted as the broker ordering key at publish time.
pub const ORDERING_KEY_ATTRIBUTE: &str = "ordering_key";

/// Schema version used when a message type does not declare its own.
pub const DEFAULT_SCHEMA_VERSION: &str = "v1";

/// Whether a message asks for something to happen or reports that it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Command,
    Event,
}

/// Payload schema of a message type
///
/// Shape is enforced by deserialization; `validate` adds the checks serde
/// cannot express (non-empty strings, ranges, ...).
pub trait Payload: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Untyped payload of the generic [`Command`] and [`Event`] types.
impl Payload for Map<String, Value> {}

/// Compile-time description of a concrete message
pub trait MessageType: Send + Sync + 'static {
    /// Value of the serialized `type` field
    const NAME: &'static str;

    const KIND: MessageKind;

    /// Fixed per type; consumers pick a decoder by it
    const SCHEMA_VERSION: &'static str = DEFAULT_SCHEMA_VERSION;

    type Payload: Payload;
}

/// Generic command with an untyped JSON object payload
#[derive(Debug, Clone, Copy)]
pub struct Command;

impl MessageType for Command {
    const NAME: &'static str = "Command";
    const KIND: MessageKind = MessageKind::Command;
    type Payload = Map<String, Value>;
}

/// Generic event with an untyped JSON object payload
#[derive(Debug, Clone, Copy)]
pub struct Event;

impl MessageType for Event {
    const NAME: &'static str = "Event";
    const KIND: MessageKind = MessageKind::Event;
    type Payload = Map<String, Value>;
}

/// A message ready to be published
///
/// Object safe, so batches may mix message types (`Vec<Box<dyn Publishable>>`).
pub trait Publishable: Send + Sync {
    fn message_id(&self) -> Uuid;

    fn message_type(&self) -> &'static str;

    fn schema_version(&self) -> &'static str;

    /// Broker attributes, including the reserved ordering key if set
    fn attributes(&self) -> &HashMap<String, String>;

    /// Serialized form, excluding attributes
    fn to_bytes(&self) -> Result<Vec<u8>>;

    fn as_any(&self) -> &dyn Any;
}

impl<T: Publishable + ?Sized> Publishable for Box<T> {
    fn message_id(&self) -> Uuid {
        (**self).message_id()
    }

    fn message_type(&self) -> &'static str {
        (**self).message_type()
    }

    fn schema_version(&self) -> &'static str {
        (**self).schema_version()
    }

    fn attributes(&self) -> &HashMap<String, String> {
        (**self).attributes()
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        (**self).to_bytes()
    }

    fn as_any(&self) -> &dyn Any {
        (**self).as_any()
    }
}

impl<T: Publishable + ?Sized> Publishable for &T {
    fn message_id(&self) -> Uuid {
        (**self).message_id()
    }

    fn message_type(&self) -> &'static str {
        (**self).message_type()
    }

    fn schema_version(&self) -> &'static str {
        (**self).schema_version()
    }

    fn attributes(&self) -> &HashMap<String, String> {
        (**self).attributes()
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        (**self).to_bytes()
    }

    fn as_any(&self) -> &dyn Any {
        (**self).as_any()
    }
}

/// Versioned message envelope
///
/// Immutable after construction: the builder-style `with_*` methods consume
/// and return the envelope, and there are no setters.
pub struct Envelope<M: MessageType> {
    id: Uuid,
    created_at: DateTime<Utc>,
    payload: M::Payload,
    attributes: HashMap<String, String>,
    _type: PhantomData<fn() -> M>,
}

impl<M: MessageType> Envelope<M> {
    /// Create an envelope with a fresh id and the current UTC time.
    pub fn new(payload: M::Payload) -> Result<Self> {
        Self::with_created_at(payload, Utc::now())
    }

    /// Create an envelope with an explicit creation timestamp.
    pub fn with_created_at(payload: M::Payload, created_at: DateTime<Utc>) -> Result<Self> {
        payload.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            created_at,
            payload,
            attributes: HashMap::new(),
            _type: PhantomData,
        })
    }

    /// Create an envelope from untyped JSON, checking it against the payload
    /// schema. `null` is treated as an absent payload.
    pub fn from_value(payload: Value) -> Result<Self> {
        Self::new(decode_payload::<M::Payload>(payload)?)
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_attributes<I, K, V>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes
            .extend(attributes.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Shorthand for the reserved `ordering_key` attribute.
    pub fn with_ordering_key(self, key: impl Into<String>) -> Self {
        self.with_attribute(ORDERING_KEY_ATTRIBUTE, key)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn schema_version(&self) -> &'static str {
        M::SCHEMA_VERSION
    }

    pub fn message_type(&self) -> &'static str {
        M::NAME
    }

    pub fn kind(&self) -> MessageKind {
        M::KIND
    }

    pub fn payload(&self) -> &M::Payload {
        &self.payload
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// The ordering key attribute, if set.
    pub fn ordering_key(&self) -> Option<&str> {
        self.attributes.get(ORDERING_KEY_ATTRIBUTE).map(String::as_str)
    }

    pub fn into_payload(self) -> M::Payload {
        self.payload
    }

    /// Serialize to UTF-8 JSON, excluding attributes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode the serialized form of this message type.
    ///
    /// Fails with `Validation` if the bytes carry another type or schema
    /// version, or if the payload does not match the schema. The decoded
    /// envelope has no attributes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let wire: WireEnvelope = serde_json::from_slice(bytes)?;

        if wire.message_type != M::NAME {
            return Err(PubSubError::Validation(format!(
                "expected message type {}, got {}",
                M::NAME,
                wire.message_type
            )));
        }
        if wire.schema_version != M::SCHEMA_VERSION {
            return Err(PubSubError::Validation(format!(
                "{} expects schema version {}, got {}",
                M::NAME,
                M::SCHEMA_VERSION,
                wire.schema_version
            )));
        }

        let payload = decode_payload::<M::Payload>(wire.payload.unwrap_or(Value::Null))?;
        payload.validate()?;

        Ok(Self {
            id: wire.id,
            created_at: wire.created_at,
            payload,
            attributes: HashMap::new(),
            _type: PhantomData,
        })
    }
}

fn decode_payload<P: Payload>(value: Value) -> Result<P> {
    let value = match value {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    serde_json::from_value(value).map_err(|e| PubSubError::Validation(format!("invalid payload: {e}")))
}

/// Header fields shared by every serialized envelope
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnvelopeHeader {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub schema_version: String,
    #[serde(rename = "type")]
    pub message_type: String,
}

impl EnvelopeHeader {
    /// Read the header of a serialized envelope without decoding its payload.
    pub fn peek(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Serialize)]
struct WireEnvelopeRef<'a, P> {
    id: &'a Uuid,
    created_at: &'a DateTime<Utc>,
    schema_version: &'static str,
    #[serde(rename = "type")]
    message_type: &'static str,
    payload: &'a P,
}

#[derive(Deserialize)]
struct WireEnvelope {
    id: Uuid,
    created_at: DateTime<Utc>,
    schema_version: String,
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    payload: Option<Value>,
}

impl<M: MessageType> Serialize for Envelope<M> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        WireEnvelopeRef {
            id: &self.id,
            created_at: &self.created_at,
            schema_version: M::SCHEMA_VERSION,
            message_type: M::NAME,
            payload: &self.payload,
        }
        .serialize(serializer)
    }
}

impl<M: MessageType> Clone for Envelope<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            created_at: self.created_at,
            payload: self.payload.clone(),
            attributes: self.attributes.clone(),
            _type: PhantomData,
        }
    }
}

impl<M: MessageType> fmt::Debug for Envelope<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("type", &M::NAME)
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("schema_version", &M::SCHEMA_VERSION)
            .field("payload", &self.payload)
            .field("attributes", &self.attributes)
            .finish()
    }
}

impl<M: MessageType> Publishable for Envelope<M> {
    fn message_id(&self) -> Uuid {
        self.id
    }

    fn message_type(&self) -> &'static str {
        M::NAME
    }

    fn schema_version(&self) -> &'static str {
        M::SCHEMA_VERSION
    }

    fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Envelope::to_bytes(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
