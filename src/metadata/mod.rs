//! Validated component descriptors.
//!
//! Descriptors are immutable once [`ComponentDescriptorBuilder::build`]
//! returns; every consistency rule is checked there so the runtime never
//! sees a half-valid descriptor.

mod document;
mod errors;
mod types;

pub use document::parse_descriptors;
pub use errors::{MetadataError, MetadataResult};
pub use types::{
    Cardinality, ComponentDescriptor, ComponentDescriptorBuilder, ComponentKind, DependencyDescriptor,
    ReferencePolicy, ServiceDescriptor,
};
