//! Per-registry tag tables

use std::any::TypeId;
use std::collections::HashMap;

use crate::variant::VariantKey;

/// Tags owned directly by one registry, with the reverse type -> tag index.
///
/// Entries are never overwritten or removed.
#[derive(Debug, Clone, Default)]
pub struct TagTable {
    by_tag: HashMap<String, VariantKey>,
    by_type: HashMap<TypeId, String>,
}

impl TagTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new entry. Returns the existing owner if the tag is taken.
    pub fn insert(&mut self, tag: &str, key: VariantKey) -> Result<(), VariantKey> {
        if let Some(existing) = self.by_tag.get(tag) {
            return Err(*existing);
        }
        self.by_tag.insert(tag.to_string(), key);
        self.by_type.insert(key.type_id, tag.to_string());
        Ok(())
    }

    pub fn get(&self, tag: &str) -> Option<VariantKey> {
        self.by_tag.get(tag).copied()
    }

    pub fn contains_tag(&self, tag: &str) -> bool {
        self.by_tag.contains_key(tag)
    }

    /// Reverse lookup: the tag a type owns in this table
    pub fn tag_of(&self, type_id: TypeId) -> Option<&str> {
        self.by_type.get(&type_id).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, VariantKey)> {
        self.by_tag.iter().map(|(tag, key)| (tag.as_str(), *key))
    }

    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }
}
