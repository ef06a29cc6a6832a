//! Discriminated Codec
//!
//! Decode: read the registry's discriminator field, resolve the tag through
//! the effective tag table, then hand the remaining fields to serde.
//! Encode: let serde produce the declared fields, then stamp the
//! discriminator with the bound tag.

use std::fmt;

use serde::de::{self, DeserializeSeed, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::trace;

use crate::config::OutputFormat;
use crate::error::{RegistryError, Result};
use crate::hierarchy::RegistryId;
use crate::registry::TypeRegistry;
use crate::variant::{Instance, Variant, VariantDescriptor, VariantKey};

impl TypeRegistry {
    /// Resolve the concrete variant a tagged value belongs to
    pub fn resolve(&self, raw: &Value, registry: RegistryId) -> Result<VariantDescriptor> {
        let state = self.read();
        let idx = state.graph.index(registry)?;
        let node = state.graph.node(idx);

        let fields = raw.as_object().ok_or_else(|| RegistryError::NotAnObject {
            context: format!("registry {}", node.name),
        })?;

        let tag = match fields.get(&node.tag_field) {
            None => {
                return Err(RegistryError::MissingDiscriminator {
                    field: node.tag_field.clone(),
                    registry: node.name.clone(),
                })
            }
            Some(Value::String(tag)) => tag.clone(),
            // Tags are strings; `3` never matches a tag "3"
            Some(other) => {
                return Err(RegistryError::UnknownTag {
                    tag: other.to_string(),
                    registry: node.name.clone(),
                })
            }
        };

        let descriptor = state
            .graph
            .effective(idx)?
            .get(&tag)
            .and_then(|entry| state.variants.get(&entry.key.type_id))
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTag {
                tag: tag.clone(),
                registry: node.name.clone(),
            })?;

        trace!(registry = %registry, tag = %tag, variant = descriptor.type_name(), "resolved tag");
        Ok(descriptor)
    }

    /// Resolve and decode a tagged value into its concrete type
    pub fn decode(&self, raw: Value, registry: RegistryId) -> Result<Instance> {
        let descriptor = self.resolve(&raw, registry)?;
        let fields = strip_discriminator(raw, &descriptor);
        Ok(descriptor.decode_fields(fields)?)
    }

    /// Decode a tagged value that is expected to resolve to `T`
    pub fn decode_as<T: Variant>(&self, raw: Value, registry: RegistryId) -> Result<T> {
        let expected = self.tag_for::<T>()?;
        let descriptor = self.resolve(&raw, registry)?;
        if !descriptor.is::<T>() {
            return Err(RegistryError::DiscriminatorMismatch {
                type_name: VariantKey::of::<T>().type_name,
                expected,
                declared: descriptor.tag().to_string(),
            });
        }
        let fields = strip_discriminator(raw, &descriptor);
        Ok(serde_json::from_value(fields)?)
    }

    /// Decode from JSON text
    pub fn decode_str(&self, json: &str, registry: RegistryId) -> Result<Instance> {
        let raw: Value = serde_json::from_str(json)?;
        self.decode(raw, registry)
    }

    /// Wrap a typed value as an [`Instance`] of its bound variant
    pub fn instance<T: Variant>(&self, value: T) -> Result<Instance> {
        let descriptor = self.descriptor::<T>()?;
        Ok(Instance::from_value(descriptor, value))
    }

    /// Encode a value with its discriminator stamped in
    pub fn encode<T: Variant>(&self, value: &T) -> Result<Value> {
        let descriptor = self.descriptor::<T>()?;
        let fields = serde_json::to_value(value)?;
        stamp_discriminator(fields, &descriptor)
    }

    /// Encode a value as a member of `registry`.
    ///
    /// Fails with `NotAVariant` if `T` is not visible through the registry.
    pub fn encode_in<T: Variant>(&self, registry: RegistryId, value: &T) -> Result<Value> {
        if !self.is_variant::<T>(registry)? {
            return Err(RegistryError::NotAVariant {
                type_name: VariantKey::of::<T>().type_name,
                registry: Some(self.name(registry)?),
            });
        }
        self.encode(value)
    }

    /// Encode a dynamically typed instance
    pub fn encode_instance(&self, instance: &Instance) -> Result<Value> {
        let fields = instance.encode_fields().ok_or(RegistryError::NotAVariant {
            type_name: instance.type_name(),
            registry: None,
        })??;
        stamp_discriminator(fields, instance.descriptor())
    }

    /// Encode to JSON text using the configured output format
    pub fn encode_to_string<T: Variant>(&self, value: &T) -> Result<String> {
        let encoded = self.encode(value)?;
        let text = match self.output_format() {
            OutputFormat::Pretty => serde_json::to_string_pretty(&encoded)?,
            OutputFormat::Compact => serde_json::to_string(&encoded)?,
        };
        Ok(text)
    }

    /// A serde seed that decodes one tagged value through `registry`
    pub fn seed(&self, registry: RegistryId) -> VariantSeed<'_> {
        VariantSeed {
            types: self,
            registry,
        }
    }
}

/// Remove a synthetic discriminator before serde sees the fields.
/// A declared discriminator stays so the type can check it itself.
fn strip_discriminator(raw: Value, descriptor: &VariantDescriptor) -> Value {
    match raw {
        Value::Object(mut fields) if descriptor.is_injected() => {
            fields.remove(descriptor.tag_field());
            Value::Object(fields)
        }
        other => other,
    }
}

/// Put the bound tag into the encoded fields, replacing any stale value
fn stamp_discriminator(fields: Value, descriptor: &VariantDescriptor) -> Result<Value> {
    let mut fields: Map<String, Value> = match fields {
        Value::Object(fields) => fields,
        _ => {
            return Err(RegistryError::NotAnObject {
                context: descriptor.type_name().to_string(),
            })
        }
    };
    fields.insert(
        descriptor.tag_field().to_string(),
        Value::String(descriptor.tag().to_string()),
    );
    trace!(tag = descriptor.tag(), variant = descriptor.type_name(), "stamped discriminator");
    Ok(Value::Object(fields))
}

/// Decodes a tagged value through one registry of a [`TypeRegistry`].
///
/// Registry errors surface as the deserializer's own error type, so a failed
/// variant inside a larger structure fails that structure.
#[derive(Clone, Copy)]
pub struct VariantSeed<'a> {
    types: &'a TypeRegistry,
    registry: RegistryId,
}

impl fmt::Debug for VariantSeed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariantSeed")
            .field("registry", &self.registry)
            .finish()
    }
}

impl<'de> DeserializeSeed<'de> for VariantSeed<'_> {
    type Value = Instance;

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<Instance, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        self.types
            .decode(raw, self.registry)
            .map_err(de::Error::custom)
    }
}
