//! Boundary to the host service registry.
//!
//! The runtime only consumes [`ServiceRegistry`]; [`InMemoryRegistry`] is a
//! complete in-process implementation used by embedders without a registry
//! of their own and by the test-suite.

pub mod constants;
mod errors;
mod filter;
mod memory;
mod types;

pub use errors::{RegistryError, RegistryResult};
pub use filter::Filter;
pub use memory::InMemoryRegistry;
pub use types::{
    DynService, ListenerId, ModuleId, Properties, RegistrationControl, ServiceEvent, ServiceEventKind,
    ServiceFactory, ServiceListener, ServiceObject, ServiceReference, ServiceRegistration, ServiceRegistry,
};
