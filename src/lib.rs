//! A declarative component runtime.
//!
//! Modules declare components through [`metadata::ComponentDescriptor`]s:
//! an implementation type, the services it provides and the services it
//! references. The runtime activates each component once its mandatory
//! references are satisfied, binds the referenced services into the
//! instance, publishes its own services, and tears everything down in
//! reverse as dependencies come and go.
//!
//! ```
//! use std::sync::Arc;
//!
//! use component_runtime::component::ImplementationType;
//! use component_runtime::config::NoConfiguration;
//! use component_runtime::metadata::ComponentDescriptor;
//! use component_runtime::registry::{InMemoryRegistry, ModuleId};
//! use component_runtime::runtime::{ComponentRuntime, Module, RuntimeConfig};
//! use component_runtime::component::State;
//!
//! #[derive(Default)]
//! struct Greeter;
//!
//! let registry = Arc::new(InMemoryRegistry::new());
//! let runtime = ComponentRuntime::new(registry.clone(), Arc::new(NoConfiguration), RuntimeConfig::default())?;
//!
//! let module = Module::new(ModuleId(1), "demo")
//!     .with_type(ImplementationType::builder::<Greeter>("demo.Greeter").default_constructor().build())
//!     .with_component(
//!         ComponentDescriptor::builder("greeter", "demo.Greeter")
//!             .provides(["demo.Greeting"])
//!             .immediate(true)
//!             .build()?,
//!     );
//! let managers = runtime.load_module(module)?;
//! assert_eq!(managers[0].state(), State::Active);
//! assert_eq!(registry.service_count(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod catalog;
pub mod component;
pub mod config;
pub mod metadata;
pub mod registry;
pub mod runtime;
pub mod util;
