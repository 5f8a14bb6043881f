use std::any::Any;
use std::fmt;

pub type ComponentResult<T> = Result<T, ComponentError>;

/// Failure raised by (or while locating) a user-supplied method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    TypeNotFound { type_name: String },
    MethodNotFound { type_name: String, method: String },
    WrongInstanceType { type_name: String },
    WrongServiceType { expected: String },
    ServiceUnavailable { reference: String },
    Failed { message: String },
    Panicked { message: String },
}

impl InvocationError {
    /// The error user code returns to signal a failed callback.
    pub fn new(message: impl Into<String>) -> Self {
        InvocationError::Failed { message: message.into() }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_string()
        };
        InvocationError::Panicked { message }
    }
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationError::TypeNotFound { type_name } => {
                write!(f, "Implementation type {type_name} is not known to the module")
            }
            InvocationError::MethodNotFound { type_name, method } => {
                write!(f, "Method {method} not found on {type_name}")
            }
            InvocationError::WrongInstanceType { type_name } => {
                write!(f, "Instance is not of implementation type {type_name}")
            }
            InvocationError::WrongServiceType { expected } => {
                write!(f, "Service object is not of the expected type {expected}")
            }
            InvocationError::ServiceUnavailable { reference } => {
                write!(f, "Service {reference} is no longer available")
            }
            InvocationError::Failed { message } => write!(f, "{message}"),
            InvocationError::Panicked { message } => write!(f, "panicked: {message}"),
        }
    }
}

impl std::error::Error for InvocationError {}

/// Failure of a lifecycle request made on a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentError {
    Destroyed { component: String },
    NotSatisfied { component: String },
    CreationFailed { component: String },
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentError::Destroyed { component } => {
                write!(f, "Component {component} has been destroyed")
            }
            ComponentError::NotSatisfied { component } => {
                write!(f, "Component {component} is not satisfied")
            }
            ComponentError::CreationFailed { component } => {
                write!(f, "Component {component} could not create an instance")
            }
        }
    }
}

impl std::error::Error for ComponentError {}
