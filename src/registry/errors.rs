use std::fmt;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    InvalidFilter { filter: String, reason: String },
    NoInterfaces,
    RegistryClosed,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::InvalidFilter { filter, reason } => {
                write!(f, "Invalid filter '{filter}': {reason}")
            }
            RegistryError::NoInterfaces => {
                write!(f, "A service must be registered under at least one interface")
            }
            RegistryError::RegistryClosed => write!(f, "The service registry has been closed"),
        }
    }
}

impl std::error::Error for RegistryError {}

pub(crate) fn invalid_filter(filter: &str, reason: impl Into<String>) -> RegistryError {
    RegistryError::InvalidFilter {
        filter: filter.to_string(),
        reason: reason.into(),
    }
}
