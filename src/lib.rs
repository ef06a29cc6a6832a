//! TypeReg
//!
//! Tagged-union registries for serde: declare a family of record types that
//! share a discriminator field, bind each type under a unique tag, and decode
//! tagged payloads into the right concrete type without naming it up front.
//!
//! ## Features
//!
//! - **Registry Hierarchies**: Registries form a DAG; a parent sees every variant
//!   bound to any of its descendants
//! - **Eager Collision Checks**: Duplicate tags and cycles are rejected when they
//!   are introduced, never discovered later at decode time
//! - **Custom Discriminators**: Each registry family picks its own field name
//! - **Serde Integration**: `Tagged<F>` fields and `VariantSeed` plug the
//!   resolver into any derived model
//!
//! ## Architecture
//!
//! ```text
//! Message            (_type_tag)
//! ├── text   -> TextMessage
//! ├── image  -> ImageMessage
//! └── Attachment     (derived, inherits _type_tag)
//!     └── file -> FileMessage     visible through Message too
//!
//! {"_type_tag": "file", ...} --resolve(Message)--> FileMessage --serde--> value
//! ```
//!
//! ## Example
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use typereg::{TypeRegistry, Variant};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Text {
//!     content: String,
//! }
//! impl Variant for Text {}
//!
//! let types = TypeRegistry::new();
//! let message = types.create_registry("Message", None)?;
//! types.bind::<Text>("text", &[message])?;
//!
//! let raw = serde_json::json!({ "_type_tag": "text", "content": "hi" });
//! let decoded = types.decode(raw, message)?;
//! assert_eq!(decoded.downcast_ref::<Text>().map(|t| t.content.as_str()), Some("hi"));
//! # Ok::<(), typereg::RegistryError>(())
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod registry;
pub mod table;
pub mod tagged;
pub mod variant;

pub use codec::VariantSeed;
pub use config::{OutputFormat, TypeRegConfig, DEFAULT_TAG_FIELD};
pub use error::{RegistryError, Result};
pub use hierarchy::RegistryId;
pub use registry::TypeRegistry;
pub use table::TagTable;
pub use tagged::{Family, Tagged};
pub use variant::{Instance, Variant, VariantDescriptor, VariantKey};
