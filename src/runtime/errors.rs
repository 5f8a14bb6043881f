use std::fmt;

use crate::component::ComponentError;
use crate::metadata::MetadataError;
use crate::registry::{ModuleId, RegistryError};

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    Metadata(MetadataError),
    Registry(RegistryError),
    Component(ComponentError),
    DuplicateComponentName { name: String },
    NameNotReserved { name: String },
    ModuleAlreadyLoaded { module: ModuleId },
    Stopped,
    WorkerPool { reason: String },
    TaskFailed { reason: String },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Metadata(err) => write!(f, "Invalid component metadata: {err}"),
            RuntimeError::Registry(err) => write!(f, "Service registry error: {err}"),
            RuntimeError::Component(err) => write!(f, "{err}"),
            RuntimeError::DuplicateComponentName { name } => {
                write!(f, "A component named {name} already exists")
            }
            RuntimeError::NameNotReserved { name } => {
                write!(f, "Component name {name} was not reserved before registration")
            }
            RuntimeError::ModuleAlreadyLoaded { module } => write!(f, "Module {module} is already loaded"),
            RuntimeError::Stopped => write!(f, "The component runtime has been stopped"),
            RuntimeError::WorkerPool { reason } => {
                write!(f, "Failed to start management workers: {reason}")
            }
            RuntimeError::TaskFailed { reason } => write!(f, "Management task failed: {reason}"),
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RuntimeError::Metadata(err) => Some(err),
            RuntimeError::Registry(err) => Some(err),
            RuntimeError::Component(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MetadataError> for RuntimeError {
    fn from(err: MetadataError) -> Self {
        RuntimeError::Metadata(err)
    }
}

impl From<RegistryError> for RuntimeError {
    fn from(err: RegistryError) -> Self {
        RuntimeError::Registry(err)
    }
}

impl From<ComponentError> for RuntimeError {
    fn from(err: ComponentError) -> Self {
        RuntimeError::Component(err)
    }
}
