use std::fmt;

pub type MetadataResult<T> = Result<T, MetadataError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    MissingName,
    MissingImplementation { component: String },
    MissingReferenceName { component: String },
    DuplicateReference { component: String, reference: String },
    MissingInterface { component: String, reference: String },
    InvalidTarget { component: String, reference: String, reason: String },
    InvalidCardinality { value: String },
    InvalidPolicy { value: String },
    InvalidConfigurationPolicy { value: String },
    EmptyService { component: String },
    DelayedWithoutService { component: String },
    ImmediateFactory { component: String },
    ServiceFactoryConflict { component: String },
    Malformed { reason: String },
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataError::MissingName => write!(f, "Component name must not be empty"),
            MetadataError::MissingImplementation { component } => {
                write!(f, "Component {component} does not name an implementation type")
            }
            MetadataError::MissingReferenceName { component } => {
                write!(f, "Component {component} declares a reference without a name")
            }
            MetadataError::DuplicateReference { component, reference } => {
                write!(f, "Component {component} declares reference {reference} more than once")
            }
            MetadataError::MissingInterface { component, reference } => {
                write!(f, "Reference {reference} of component {component} does not name an interface")
            }
            MetadataError::InvalidTarget {
                component,
                reference,
                reason,
            } => write!(f, "Reference {reference} of component {component} has an invalid target: {reason}"),
            MetadataError::InvalidCardinality { value } => {
                write!(f, "Cardinality '{value}' is not one of 0..1, 1..1, 0..n, 1..n")
            }
            MetadataError::InvalidPolicy { value } => {
                write!(f, "Reference policy '{value}' is not one of static, dynamic")
            }
            MetadataError::InvalidConfigurationPolicy { value } => {
                write!(f, "Configuration policy '{value}' is not one of optional, require, ignore")
            }
            MetadataError::EmptyService { component } => {
                write!(f, "Component {component} declares a service without interfaces")
            }
            MetadataError::DelayedWithoutService { component } => {
                write!(f, "Delayed component {component} must provide a service")
            }
            MetadataError::ImmediateFactory { component } => {
                write!(f, "Factory component {component} cannot be immediate")
            }
            MetadataError::ServiceFactoryConflict { component } => write!(
                f,
                "Component {component} cannot be a service factory and immediate or a component factory"
            ),
            MetadataError::Malformed { reason } => write!(f, "Malformed component descriptor: {reason}"),
        }
    }
}

impl std::error::Error for MetadataError {}
