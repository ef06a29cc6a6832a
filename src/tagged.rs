//! Polymorphic fields for serde models
//!
//! A [`Family`] names one registry of the global [`TypeRegistry`]. Fields
//! typed `Tagged<F>` decode to whichever variant of that family the payload's
//! tag selects, and encode with the discriminator stamped in:
//!
//! ```ignore
//! #[derive(Serialize, Deserialize)]
//! struct ChatRoom {
//!     name: String,
//!     messages: Vec<Tagged<Message>>,
//! }
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;

use serde::de::{DeserializeSeed, Deserializer};
use serde::ser::{self, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};
use crate::hierarchy::RegistryId;
use crate::registry::TypeRegistry;
use crate::variant::{Instance, Variant};

/// Static handle to a registry in the global universe
pub trait Family: 'static {
    fn registry() -> RegistryId;
}

/// A value of some variant of family `F`
pub struct Tagged<F: Family> {
    instance: Instance,
    _family: PhantomData<fn() -> F>,
}

impl<F: Family> Tagged<F> {
    /// Wrap a value whose type is visible through `F`'s registry
    pub fn new<T: Variant>(value: T) -> Result<Self> {
        let types = TypeRegistry::global();
        let registry = F::registry();
        if !types.is_variant::<T>(registry)? {
            return Err(RegistryError::NotAVariant {
                type_name: std::any::type_name::<T>(),
                registry: Some(types.name(registry)?),
            });
        }
        Ok(Self::wrap(types.instance(value)?))
    }

    fn wrap(instance: Instance) -> Self {
        Self {
            instance,
            _family: PhantomData,
        }
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn into_instance(self) -> Instance {
        self.instance
    }
}

impl<F: Family> Deref for Tagged<F> {
    type Target = Instance;

    fn deref(&self) -> &Instance {
        &self.instance
    }
}

impl<F: Family> Clone for Tagged<F> {
    fn clone(&self) -> Self {
        Self::wrap(self.instance.clone())
    }
}

impl<F: Family> fmt::Debug for Tagged<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.instance, f)
    }
}

impl<F: Family> Serialize for Tagged<F> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        TypeRegistry::global()
            .encode_instance(&self.instance)
            .map_err(<S::Error as ser::Error>::custom)?
            .serialize(serializer)
    }
}

impl<'de, F: Family> Deserialize<'de> for Tagged<F> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        TypeRegistry::global()
            .seed(F::registry())
            .deserialize(deserializer)
            .map(Self::wrap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::OnceLock;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Deposit {
        amount: u64,
    }
    impl Variant for Deposit {}

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Withdrawal {
        amount: u64,
        reason: String,
    }
    impl Variant for Withdrawal {}

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Stray {
        note: String,
    }
    impl Variant for Stray {}

    struct LedgerEntry;

    impl Family for LedgerEntry {
        fn registry() -> RegistryId {
            static REGISTRY: OnceLock<RegistryId> = OnceLock::new();
            *REGISTRY.get_or_init(|| {
                let types = TypeRegistry::global();
                let registry = types
                    .create_registry("tagged::tests::LedgerEntry", Some("op"))
                    .unwrap();
                types.bind::<Deposit>("deposit", &[registry]).unwrap();
                types.bind::<Withdrawal>("withdrawal", &[registry]).unwrap();
                registry
            })
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Ledger {
        owner: String,
        entries: Vec<Tagged<LedgerEntry>>,
    }

    #[test]
    fn test_nested_decode() {
        let raw = json!({
            "owner": "ada",
            "entries": [
                { "op": "deposit", "amount": 10 },
                { "op": "withdrawal", "amount": 4, "reason": "coffee" }
            ]
        });
        let ledger: Ledger = serde_json::from_value(raw.clone()).unwrap();

        assert_eq!(ledger.entries.len(), 2);
        assert_eq!(ledger.entries[0].downcast_ref::<Deposit>(), Some(&Deposit { amount: 10 }));
        assert!(ledger.entries[1].is::<Withdrawal>());
        assert_eq!(ledger.entries[1].tag(), "withdrawal");

        assert_eq!(serde_json::to_value(&ledger).unwrap(), raw);
    }

    #[test]
    fn test_nested_decode_failure_fails_enclosing_value() {
        let raw = json!({
            "owner": "ada",
            "entries": [{ "op": "refund", "amount": 1 }]
        });
        let err = serde_json::from_value::<Ledger>(raw).unwrap_err();
        assert!(err.to_string().contains("Unknown tag 'refund'"));
    }

    #[test]
    fn test_new_checks_membership() {
        let entry = Tagged::<LedgerEntry>::new(Deposit { amount: 3 }).unwrap();
        assert_eq!(entry.tag(), "deposit");
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({ "op": "deposit", "amount": 3 })
        );

        let err = Tagged::<LedgerEntry>::new(Stray { note: String::new() }).unwrap_err();
        assert!(matches!(err, RegistryError::NotAVariant { .. }));
    }
}
