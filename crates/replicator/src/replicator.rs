//! The `Replicator` facade: a transform registry plus a byte codec.
//!
//! Upstream reference: `Transform/replicator/index.js` (`Replicator`)

use std::fmt;
use std::rc::Rc;

use serde_json::Value as Json;

use crate::builtin::{builtin_transforms, ErrorKinds};
use crate::codec::{JsonTreeCodec, TreeCodec};
use crate::decode::decode_table;
use crate::encode::encode_table;
use crate::error::ReplicatorError;
use crate::transform::{Transform, TransformRegistry};
use crate::value::Value;

/// Construction options for [`Replicator`].
#[derive(Debug, Clone)]
pub struct ReplicatorOptions {
    /// Register the built-in catalogue (NaN, undefined, Date, RegExp, Error,
    /// ArrayBuffer, typed arrays, Map, Set). Default: `true`.
    pub builtins: bool,
    /// Error constructors used when rebuilding `[[Error]]` envelopes.
    pub error_kinds: ErrorKinds,
}

impl Default for ReplicatorOptions {
    fn default() -> Self {
        Self {
            builtins: true,
            error_kinds: ErrorKinds::standard(),
        }
    }
}

/// Serializes value graphs with cycles, shared references and non-JSON types
/// into bytes, and back.
pub struct Replicator {
    registry: TransformRegistry,
    codec: Box<dyn TreeCodec>,
}

impl Replicator {
    /// JSON codec, built-in transforms, standard error kinds.
    pub fn new() -> Self {
        Self::with_codec(Box::new(JsonTreeCodec::new()))
    }

    pub fn with_codec(codec: Box<dyn TreeCodec>) -> Self {
        Self::with_options(codec, ReplicatorOptions::default())
    }

    pub fn with_options(codec: Box<dyn TreeCodec>, options: ReplicatorOptions) -> Self {
        let mut registry = TransformRegistry::new();
        if options.builtins {
            if let Err(err) = registry.add_all(builtin_transforms(options.error_kinds)) {
                tracing::warn!(%err, "built-in transforms not registered");
            }
        }
        tracing::debug!(
            codec = codec.id(),
            transforms = registry.len(),
            "created replicator"
        );
        Self { registry, codec }
    }

    pub fn add_transform(
        &mut self,
        transform: Rc<dyn Transform>,
    ) -> Result<&mut Self, ReplicatorError> {
        self.registry.add(transform)?;
        Ok(self)
    }

    /// Registers a batch. Nothing is registered if any tag in the batch is
    /// empty, already present, or repeated.
    pub fn add_transforms(
        &mut self,
        transforms: impl IntoIterator<Item = Rc<dyn Transform>>,
    ) -> Result<&mut Self, ReplicatorError> {
        self.registry.add_all(transforms)?;
        Ok(self)
    }

    /// Unregisters the given tags. Tags that are not registered are ignored.
    pub fn remove_transforms<'t>(&mut self, tags: impl IntoIterator<Item = &'t str>) -> &mut Self {
        for tag in tags {
            self.registry.remove(tag);
        }
        self
    }

    pub fn encode(&mut self, value: &Value) -> Result<Vec<u8>, ReplicatorError> {
        let table = self.encode_table(value);
        Ok(self.codec.encode(&table)?)
    }

    pub fn decode(&mut self, bytes: &[u8]) -> Result<Value, ReplicatorError> {
        let table = self.codec.decode(bytes)?;
        self.decode_table(table)
    }

    /// The reference table for `value`, before the codec sees it.
    pub fn encode_table(&self, value: &Value) -> Json {
        encode_table(value, &self.registry)
    }

    pub fn decode_table(&self, table: Json) -> Result<Value, ReplicatorError> {
        decode_table(table, &self.registry)
    }

    pub fn registry(&self) -> &TransformRegistry {
        &self.registry
    }

    pub fn codec_id(&self) -> &'static str {
        self.codec.id()
    }
}

impl Default for Replicator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Replicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replicator")
            .field("codec", &self.codec.id())
            .field("registry", &self.registry)
            .finish()
    }
}
