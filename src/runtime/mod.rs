mod activator;
mod config;
mod errors;
mod host;
mod info;
mod module;
mod worker;

pub use activator::ComponentActivator;
pub use config::RuntimeConfig;
pub use errors::{RuntimeError, RuntimeResult};
pub use host::ComponentRuntime;
pub use info::{ComponentInfo, ReferenceInfo};
pub use module::Module;
pub use worker::ManagementTask;
