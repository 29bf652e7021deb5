//! Decoder registry keyed by message type and schema version
//!
//! Consumers receive bytes without knowing the concrete message in advance.
//! The registry reads the `type` and `schema_version` discriminators and
//! hands the bytes to the decoder registered for that pair, which validates
//! the payload against its schema.

use crate::commands::RunWorkflow;
use crate::envelope::{Command, Envelope, EnvelopeHeader, Event, MessageType, Publishable};
use crate::error::{PubSubError, Result};
use std::collections::HashMap;

type DecodeFn = fn(&[u8]) -> Result<Box<dyn Publishable>>;

/// Registry of envelope decoders
#[derive(Clone)]
pub struct MessageRegistry {
    decoders: HashMap<(&'static str, &'static str), DecodeFn>,
}

impl Default for MessageRegistry {
    /// Registry with the generic `Command`/`Event` types and `RunWorkflow`.
    fn default() -> Self {
        Self::empty()
            .with::<Command>()
            .with::<Event>()
            .with::<RunWorkflow>()
    }
}

impl MessageRegistry {
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register the decoder for `M` at its current schema version.
    pub fn register<M: MessageType>(&mut self) {
        self.decoders
            .insert((M::NAME, M::SCHEMA_VERSION), decode_boxed::<M>);
    }

    pub fn with<M: MessageType>(mut self) -> Self {
        self.register::<M>();
        self
    }

    pub fn contains(&self, message_type: &str, schema_version: &str) -> bool {
        self.decoders.contains_key(&(message_type, schema_version))
    }

    /// Decode an envelope of any registered type.
    ///
    /// Use [`Publishable::as_any`] to downcast to the concrete envelope.
    pub fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Publishable>> {
        let header = EnvelopeHeader::peek(bytes)?;
        let decoder = self
            .decoders
            .get(&(header.message_type.as_str(), header.schema_version.as_str()))
            .ok_or_else(|| {
                PubSubError::Validation(format!(
                    "no decoder registered for {} {}",
                    header.message_type, header.schema_version
                ))
            })?;
        decoder(bytes)
    }
}

fn decode_boxed<M: MessageType>(bytes: &[u8]) -> Result<Box<dyn Publishable>> {
    Ok(Box::new(Envelope::<M>::from_bytes(bytes)?))
}
