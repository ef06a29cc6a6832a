//! Variant types, their descriptors and decoded instances

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_aux::serde_introspection::serde_introspect;
use serde_json::Value;

use crate::hierarchy::RegistryId;

/// A concrete record type that can be bound into one or more registries.
///
/// Field-level (de)serialization is delegated to serde. The discriminator
/// field is normally *not* part of the type: the codec strips it before
/// decoding and stamps it after encoding. A type that carries the field in
/// its own schema must report the fixed value through
/// [`Variant::declared_tag`]; binding checks that value against the
/// registered tag and the field against the registry's discriminator field.
pub trait Variant: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// Discriminator value declared by the type's own field set, if any.
    fn declared_tag() -> Option<&'static str> {
        None
    }
}

/// Whether `field` is one of the serialized field names of `T`.
///
/// Types that do not deserialize as a struct report no fields.
pub(crate) fn declares_field<T: Variant>(field: &str) -> bool {
    serde_introspect::<T>().iter().any(|name| *name == field)
}

/// Identity of a variant type inside tag tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariantKey {
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl VariantKey {
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }
}

pub(crate) type DynValue = Arc<dyn Any + Send + Sync>;

/// Monomorphised entry points into serde for one variant type
#[derive(Clone, Copy)]
pub(crate) struct VariantVTable {
    decode: fn(Value) -> serde_json::Result<DynValue>,
    encode: fn(&(dyn Any + Send + Sync)) -> Option<serde_json::Result<Value>>,
    debug: fn(&(dyn Any + Send + Sync), &mut fmt::Formatter<'_>) -> fmt::Result,
}

impl VariantVTable {
    pub(crate) fn of<T: Variant>() -> Self {
        Self {
            decode: decode_fields::<T>,
            encode: encode_fields::<T>,
            debug: debug_fields::<T>,
        }
    }
}

fn decode_fields<T: Variant>(raw: Value) -> serde_json::Result<DynValue> {
    let value: T = serde_json::from_value(raw)?;
    Ok(Arc::new(value))
}

fn encode_fields<T: Variant>(value: &(dyn Any + Send + Sync)) -> Option<serde_json::Result<Value>> {
    value.downcast_ref::<T>().map(serde_json::to_value)
}

fn debug_fields<T: Variant>(
    value: &(dyn Any + Send + Sync),
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    match value.downcast_ref::<T>() {
        Some(value) => fmt::Debug::fmt(value, f),
        None => f.write_str(type_name::<T>()),
    }
}

/// Describes one concrete type bound into the registry
#[derive(Clone)]
pub struct VariantDescriptor {
    tag: String,
    key: VariantKey,
    tag_field: String,
    /// Discriminator is synthetic (not a declared field of the type)
    injected: bool,
    registries: Vec<RegistryId>,
    vtable: VariantVTable,
}

impl VariantDescriptor {
    pub(crate) fn new<T: Variant>(tag: &str, tag_field: &str) -> Self {
        Self {
            tag: tag.to_string(),
            key: VariantKey::of::<T>(),
            tag_field: tag_field.to_string(),
            injected: T::declared_tag().is_none(),
            registries: Vec::new(),
            vtable: VariantVTable::of::<T>(),
        }
    }

    pub(crate) fn add_registry(&mut self, registry: RegistryId) {
        if !self.registries.contains(&registry) {
            self.registries.push(registry);
        }
    }

    /// The tag this type was bound under
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn key(&self) -> VariantKey {
        self.key
    }

    pub fn type_name(&self) -> &'static str {
        self.key.type_name
    }

    pub fn type_id(&self) -> TypeId {
        self.key.type_id
    }

    /// Name of the discriminator field stamped on encoded values
    pub fn tag_field(&self) -> &str {
        &self.tag_field
    }

    /// Whether the discriminator is injected by the codec rather than declared by the type
    pub fn is_injected(&self) -> bool {
        self.injected
    }

    /// Registries this type was bound to directly
    pub fn registries(&self) -> &[RegistryId] {
        &self.registries
    }

    /// Check whether this descriptor describes `T`
    pub fn is<T: 'static>(&self) -> bool {
        self.key.type_id == TypeId::of::<T>()
    }

    /// Hand the remaining fields to serde and wrap the result
    pub(crate) fn decode_fields(&self, fields: Value) -> serde_json::Result<Instance> {
        let value = (self.vtable.decode)(fields)?;
        Ok(Instance {
            descriptor: self.clone(),
            value,
        })
    }
}

impl fmt::Debug for VariantDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariantDescriptor")
            .field("tag", &self.tag)
            .field("type_name", &self.key.type_name)
            .field("tag_field", &self.tag_field)
            .field("injected", &self.injected)
            .field("registries", &self.registries)
            .finish()
    }
}

impl PartialEq for VariantDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.tag == other.tag
    }
}

/// A value whose concrete type was resolved from its tag
#[derive(Clone)]
pub struct Instance {
    descriptor: VariantDescriptor,
    value: DynValue,
}

impl Instance {
    pub(crate) fn from_value<T: Variant>(descriptor: VariantDescriptor, value: T) -> Self {
        Self {
            descriptor,
            value: Arc::new(value),
        }
    }

    pub fn tag(&self) -> &str {
        self.descriptor.tag()
    }

    pub fn type_name(&self) -> &'static str {
        self.descriptor.type_name()
    }

    pub fn descriptor(&self) -> &VariantDescriptor {
        &self.descriptor
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.descriptor.is::<T>()
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Recover the shared concrete value, or give the instance back
    pub fn downcast<T: Send + Sync + 'static>(self) -> std::result::Result<Arc<T>, Self> {
        let Self { descriptor, value } = self;
        value
            .downcast::<T>()
            .map_err(|value| Self { descriptor, value })
    }

    /// Serialize the declared fields only, without the discriminator
    pub(crate) fn encode_fields(&self) -> Option<serde_json::Result<Value>> {
        (self.descriptor.vtable.encode)(&*self.value)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (self.descriptor.vtable.debug)(&*self.value, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    impl Variant for Ping {}

    #[derive(Debug, Serialize, Deserialize)]
    struct Pong {
        kind: String,
    }

    impl Variant for Pong {
        fn declared_tag() -> Option<&'static str> {
            Some("pong")
        }
    }

    #[test]
    fn test_descriptor_injection_flag() {
        let ping = VariantDescriptor::new::<Ping>("ping", "_type_tag");
        assert!(ping.is_injected());
        assert!(ping.is::<Ping>());
        assert!(!ping.is::<Pong>());

        let pong = VariantDescriptor::new::<Pong>("pong", "kind");
        assert!(!pong.is_injected());
        assert_eq!(pong.tag_field(), "kind");
    }

    #[test]
    fn test_declares_field() {
        assert!(declares_field::<Pong>("kind"));
        assert!(!declares_field::<Ping>("kind"));
        assert!(declares_field::<Ping>("seq"));
    }

    #[test]
    fn test_decode_fields_and_downcast() {
        let descriptor = VariantDescriptor::new::<Ping>("ping", "_type_tag");
        let instance = descriptor
            .decode_fields(serde_json::json!({ "seq": 7 }))
            .unwrap();

        assert_eq!(instance.tag(), "ping");
        assert_eq!(instance.downcast_ref::<Ping>(), Some(&Ping { seq: 7 }));
        assert!(instance.downcast_ref::<Pong>().is_none());
        assert_eq!(format!("{:?}", instance), "Ping { seq: 7 }");

        let ping = instance.downcast::<Ping>().unwrap();
        assert_eq!(ping.seq, 7);
    }

    #[test]
    fn test_decode_fields_reports_field_errors() {
        let descriptor = VariantDescriptor::new::<Ping>("ping", "_type_tag");
        let err = descriptor
            .decode_fields(serde_json::json!({ "seq": "seven" }))
            .unwrap_err();
        assert!(err.to_string().contains("invalid type"));
    }

    #[test]
    fn test_add_registry_is_idempotent() {
        let mut descriptor = VariantDescriptor::new::<Ping>("ping", "_type_tag");
        let id = RegistryId::new(1, 0);
        descriptor.add_registry(id);
        descriptor.add_registry(id);
        assert_eq!(descriptor.registries(), &[id]);
    }
}
