//! Boundary to the configuration collaborator.

mod memory;
mod types;

pub use memory::InMemoryConfiguration;
pub use types::{ConfigurationListener, ConfigurationPolicy, ConfigurationSource, NoConfiguration};
