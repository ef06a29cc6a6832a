//! Error types for the type registry

use thiserror::Error;

use crate::hierarchy::RegistryId;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Type registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Tag '{tag}' in registry {registry} is already bound to {existing}")]
    DuplicateTag {
        tag: String,
        registry: String,
        existing: &'static str,
    },

    #[error("Unknown tag '{tag}' for registry {registry}")]
    UnknownTag { tag: String, registry: String },

    #[error("Missing discriminator field '{field}' for registry {registry}")]
    MissingDiscriminator { field: String, registry: String },

    #[error("Discriminator mismatch on {type_name}: expected '{expected}', found '{declared}'")]
    DiscriminatorMismatch {
        type_name: &'static str,
        expected: String,
        declared: String,
    },

    #[error("{type_name} is not a variant{}", .registry.as_ref().map(|r| format!(" of registry {r}")).unwrap_or_default())]
    NotAVariant {
        type_name: &'static str,
        registry: Option<String>,
    },

    #[error("Cyclic hierarchy: {registry} cannot derive from {parent}")]
    CyclicHierarchy { registry: String, parent: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown registry: {0}")]
    UnknownRegistry(RegistryId),

    #[error("Invalid tag: {0}")]
    InvalidTag(String),

    #[error("Tagged value for {context} is not an object")]
    NotAnObject { context: String },

    #[error("Field error: {0}")]
    Fields(#[from] serde_json::Error),
}

impl RegistryError {
    /// True for errors raised while declaring registries or binding variants
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self,
            RegistryError::DuplicateTag { .. }
                | RegistryError::DiscriminatorMismatch { .. }
                | RegistryError::CyclicHierarchy { .. }
                | RegistryError::Configuration(_)
                | RegistryError::InvalidTag(_)
        )
    }
}
