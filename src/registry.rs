//! Type Registry
//!
//! A universe of registries and the variants bound into them. All mutation
//! happens behind one write lock; queries copy what they need out of a read
//! lock so field-level serde work never runs while the lock is held.

use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::{OutputFormat, TypeRegConfig, DEFAULT_TAG_FIELD};
use crate::error::{RegistryError, Result};
use crate::hierarchy::{RegistryGraph, RegistryId};
use crate::variant::{declares_field, Variant, VariantDescriptor, VariantKey};

static NEXT_UNIVERSE: AtomicU32 = AtomicU32::new(1);
static GLOBAL: OnceLock<TypeRegistry> = OnceLock::new();

/// Shared mutable state of one universe
#[derive(Debug)]
pub(crate) struct RegistryState {
    pub graph: RegistryGraph,
    pub variants: HashMap<TypeId, VariantDescriptor>,
}

/// The registry universe: a DAG of registries plus every bound variant
#[derive(Debug)]
pub struct TypeRegistry {
    state: RwLock<RegistryState>,
    default_tag_field: String,
    output_format: OutputFormat,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Create an empty, independent universe with default settings
    pub fn new() -> Self {
        Self::build(DEFAULT_TAG_FIELD.to_string(), OutputFormat::default())
    }

    /// Create an empty universe using the given settings.
    ///
    /// Fails with `Configuration` if the settings do not validate.
    pub fn with_config(config: &TypeRegConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(
            config.registry.default_tag_field.clone(),
            config.codec.output_format,
        ))
    }

    fn build(default_tag_field: String, output_format: OutputFormat) -> Self {
        let universe = NEXT_UNIVERSE.fetch_add(1, Ordering::Relaxed);
        Self {
            state: RwLock::new(RegistryState {
                graph: RegistryGraph::new(universe),
                variants: HashMap::new(),
            }),
            default_tag_field,
            output_format,
        }
    }

    /// The process-wide universe, configured from the default config locations
    pub fn global() -> &'static TypeRegistry {
        GLOBAL.get_or_init(|| {
            TypeRegConfig::load()
                .map_err(|err| RegistryError::Configuration(err.to_string()))
                .and_then(|config| TypeRegistry::with_config(&config))
                .unwrap_or_else(|err| {
                    warn!(error = %err, "unusable typereg configuration, using defaults");
                    TypeRegistry::new()
                })
        })
    }

    pub fn default_tag_field(&self) -> &str {
        &self.default_tag_field
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    pub(crate) fn read(&self) -> parking_lot::RwLockReadGuard<'_, RegistryState> {
        self.state.read()
    }

    // =========================================================================
    // Registry nodes
    // =========================================================================

    /// Create a new root registry.
    ///
    /// Uses the configured default discriminator field when `tag_field` is `None`.
    pub fn create_registry(&self, name: &str, tag_field: Option<&str>) -> Result<RegistryId> {
        let tag_field = tag_field.unwrap_or(&self.default_tag_field);
        if tag_field.is_empty() {
            return Err(RegistryError::Configuration(format!(
                "registry {name} needs a non-empty discriminator field"
            )));
        }

        let mut state = self.state.write();
        let idx = state.graph.add_root(name, tag_field);
        let id = state.graph.id(idx);
        debug!(registry = %id, name, tag_field, "created registry");
        Ok(id)
    }

    /// Create a registry beneath `parents`; their effective tables will include its variants
    pub fn derive(&self, name: &str, parents: &[RegistryId]) -> Result<RegistryId> {
        let mut state = self.state.write();
        let parent_idx = state.graph.indices(parents)?;
        let idx = state.graph.add_derived(name, &parent_idx)?;
        let id = state.graph.id(idx);
        debug!(registry = %id, name, parents = parents.len(), "derived registry");
        Ok(id)
    }

    /// Place an existing registry beneath additional parents.
    ///
    /// Rejects cycles, discriminator field mismatches and any tag collision the
    /// new aggregation would introduce. Nothing changes on failure.
    pub fn link(&self, child: RegistryId, parents: &[RegistryId]) -> Result<()> {
        let mut state = self.state.write();
        let child_idx = state.graph.index(child)?;
        let parent_idx = state.graph.indices(parents)?;
        state.graph.link(child_idx, &parent_idx)?;
        debug!(registry = %child, parents = parents.len(), "linked registry");
        Ok(())
    }

    pub fn name(&self, registry: RegistryId) -> Result<String> {
        let state = self.state.read();
        let idx = state.graph.index(registry)?;
        Ok(state.graph.name(idx))
    }

    /// The discriminator field name of a registry
    pub fn tag_field(&self, registry: RegistryId) -> Result<String> {
        let state = self.state.read();
        let idx = state.graph.index(registry)?;
        Ok(state.graph.node(idx).tag_field.clone())
    }

    pub fn parents(&self, registry: RegistryId) -> Result<Vec<RegistryId>> {
        let state = self.state.read();
        let idx = state.graph.index(registry)?;
        Ok(state
            .graph
            .parents(idx)
            .into_iter()
            .map(|p| state.graph.id(p))
            .collect())
    }

    pub fn children(&self, registry: RegistryId) -> Result<Vec<RegistryId>> {
        let state = self.state.read();
        let idx = state.graph.index(registry)?;
        Ok(state
            .graph
            .children(idx)
            .into_iter()
            .map(|c| state.graph.id(c))
            .collect())
    }

    pub fn registry_count(&self) -> usize {
        self.state.read().graph.len()
    }

    // =========================================================================
    // Variant binding
    // =========================================================================

    /// Bind `T` under `tag` to every registry in `registries`.
    ///
    /// Either every target accepts the binding or none does. The entry is
    /// owned by the targets; their ancestors see it through aggregation.
    pub fn bind<T: Variant>(
        &self,
        tag: &str,
        registries: &[RegistryId],
    ) -> Result<VariantDescriptor> {
        let key = VariantKey::of::<T>();
        if tag.is_empty() {
            return Err(RegistryError::InvalidTag(format!(
                "{} must be bound under a non-empty tag",
                key.type_name
            )));
        }
        if registries.is_empty() {
            return Err(RegistryError::Configuration(format!(
                "{} must be bound to at least one registry",
                key.type_name
            )));
        }

        let mut state = self.state.write();
        let targets = state.graph.indices(registries)?;
        let tag_field = state.graph.common_tag_field(key.type_name, &targets)?;

        // The type's own schema and its declared tag must agree on who owns the field
        match (T::declared_tag(), declares_field::<T>(&tag_field)) {
            (Some(declared), true) if declared != tag => {
                return Err(RegistryError::DiscriminatorMismatch {
                    type_name: key.type_name,
                    expected: tag.to_string(),
                    declared: declared.to_string(),
                });
            }
            (Some(declared), false) => {
                return Err(RegistryError::Configuration(format!(
                    "{} declares tag '{declared}' but has no '{tag_field}' field",
                    key.type_name
                )));
            }
            (None, true) => {
                return Err(RegistryError::Configuration(format!(
                    "{} has a '{tag_field}' field but does not declare its tag",
                    key.type_name
                )));
            }
            _ => {}
        }

        if let Some(existing) = state.variants.get(&key.type_id) {
            if existing.tag() != tag {
                return Err(RegistryError::DiscriminatorMismatch {
                    type_name: key.type_name,
                    expected: tag.to_string(),
                    declared: existing.tag().to_string(),
                });
            }
            if existing.tag_field() != tag_field {
                return Err(RegistryError::Configuration(format!(
                    "{} already uses discriminator '{}', cannot bind with '{}'",
                    key.type_name,
                    existing.tag_field(),
                    tag_field
                )));
            }
        }

        state.graph.check_tag_free(tag, key, &targets)?;

        // Targets are deduplicated and checked above, so every insert succeeds
        for &idx in &targets {
            state
                .graph
                .node_mut(idx)
                .table
                .insert(tag, key)
                .map_err(|existing| RegistryError::DuplicateTag {
                    tag: tag.to_string(),
                    registry: state.graph.name(idx),
                    existing: existing.type_name,
                })?;
        }

        let target_ids: Vec<RegistryId> = targets.iter().map(|&idx| state.graph.id(idx)).collect();
        let descriptor = state
            .variants
            .entry(key.type_id)
            .or_insert_with(|| VariantDescriptor::new::<T>(tag, &tag_field));
        for id in target_ids {
            descriptor.add_registry(id);
        }

        debug!(
            tag,
            variant = key.type_name,
            registries = registries.len(),
            injected = descriptor.is_injected(),
            "bound variant"
        );
        Ok(descriptor.clone())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Full tag -> variant mapping visible through a registry, ordered by tag
    pub fn effective_table(
        &self,
        registry: RegistryId,
    ) -> Result<BTreeMap<String, VariantDescriptor>> {
        let state = self.state.read();
        let idx = state.graph.index(registry)?;
        let entries = state.graph.effective(idx)?;
        Ok(entries
            .into_iter()
            .filter_map(|(tag, entry)| {
                state
                    .variants
                    .get(&entry.key.type_id)
                    .map(|descriptor| (tag, descriptor.clone()))
            })
            .collect())
    }

    /// All tags visible through a registry, including descendant registries
    pub fn effective_tags(&self, registry: RegistryId) -> Result<BTreeSet<String>> {
        let state = self.state.read();
        let idx = state.graph.index(registry)?;
        Ok(state.graph.effective(idx)?.into_keys().collect())
    }

    /// Shorthand for [`TypeRegistry::effective_tags`]
    pub fn tags(&self, registry: RegistryId) -> Result<BTreeSet<String>> {
        self.effective_tags(registry)
    }

    /// Tags bound directly on a registry, without descendants
    pub fn own_tags(&self, registry: RegistryId) -> Result<BTreeSet<String>> {
        let state = self.state.read();
        let idx = state.graph.index(registry)?;
        Ok(state
            .graph
            .node(idx)
            .table
            .iter()
            .map(|(tag, _)| tag.to_string())
            .collect())
    }

    /// Look up the variant bound under `tag` anywhere beneath `registry`
    pub fn by_tag(&self, registry: RegistryId, tag: &str) -> Result<VariantDescriptor> {
        let state = self.state.read();
        let idx = state.graph.index(registry)?;
        state
            .graph
            .effective(idx)?
            .get(tag)
            .and_then(|entry| state.variants.get(&entry.key.type_id))
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTag {
                tag: tag.to_string(),
                registry: state.graph.name(idx),
            })
    }

    /// The tag of `T` as seen through `registry`
    pub fn tag_of<T: 'static>(&self, registry: RegistryId) -> Result<String> {
        let key = VariantKey::of::<T>();
        let state = self.state.read();
        let idx = state.graph.index(registry)?;
        let visible = state
            .graph
            .effective(idx)?
            .values()
            .any(|entry| entry.key == key);

        match state.variants.get(&key.type_id) {
            Some(descriptor) if visible => Ok(descriptor.tag().to_string()),
            _ => Err(RegistryError::NotAVariant {
                type_name: key.type_name,
                registry: Some(state.graph.name(idx)),
            }),
        }
    }

    /// Like [`TypeRegistry::tag_of`], for a value
    pub fn tag_of_val<T: 'static>(&self, registry: RegistryId, _value: &T) -> Result<String> {
        self.tag_of::<T>(registry)
    }

    /// The tag `T` was bound under, whichever registries it belongs to
    pub fn tag_for<T: 'static>(&self) -> Result<String> {
        self.descriptor::<T>().map(|d| d.tag().to_string())
    }

    pub fn descriptor<T: 'static>(&self) -> Result<VariantDescriptor> {
        let key = VariantKey::of::<T>();
        self.state
            .read()
            .variants
            .get(&key.type_id)
            .cloned()
            .ok_or(RegistryError::NotAVariant {
                type_name: key.type_name,
                registry: None,
            })
    }

    /// True iff `T` is visible through the effective table of `registry`
    pub fn is_variant<T: 'static>(&self, registry: RegistryId) -> Result<bool> {
        let key = VariantKey::of::<T>();
        let state = self.state.read();
        let idx = state.graph.index(registry)?;
        Ok(state
            .graph
            .effective(idx)?
            .values()
            .any(|entry| entry.key == key))
    }

    /// Like [`TypeRegistry::is_variant`], for a value
    pub fn is_variant_val<T: 'static>(&self, registry: RegistryId, _value: &T) -> Result<bool> {
        self.is_variant::<T>(registry)
    }
}
