pub mod constants;
mod context;
mod dependency;
mod errors;
mod implementation;
mod manager;
mod method;
mod types;
mod variant;

pub use context::ComponentContext;
pub use errors::{ComponentError, ComponentResult, InvocationError};
pub use implementation::{BindArgument, ImplementationType, ImplementationTypeBuilder, ParameterType, TypeSpace};
pub use manager::ComponentManager;
pub use types::{ContextId, State, StateChange};
pub use variant::{ComponentFactory, ComponentInstance};

pub(crate) use manager::ComponentEnv;
