use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::component::constants::{DEFAULT_ACTIVATE_METHOD, DEFAULT_DEACTIVATE_METHOD};
use crate::config::ConfigurationPolicy;
use crate::metadata::errors::{MetadataError, MetadataResult};
use crate::registry::{Filter, Properties};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Cardinality {
    #[serde(rename = "0..1")]
    OptionalUnary,
    #[serde(rename = "1..1")]
    MandatoryUnary,
    #[serde(rename = "0..n")]
    OptionalMultiple,
    #[serde(rename = "1..n")]
    MandatoryMultiple,
}

impl Cardinality {
    pub fn is_optional(&self) -> bool {
        matches!(self, Cardinality::OptionalUnary | Cardinality::OptionalMultiple)
    }

    pub fn is_multiple(&self) -> bool {
        matches!(self, Cardinality::OptionalMultiple | Cardinality::MandatoryMultiple)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Cardinality::OptionalUnary => "0..1",
            Cardinality::MandatoryUnary => "1..1",
            Cardinality::OptionalMultiple => "0..n",
            Cardinality::MandatoryMultiple => "1..n",
        }
    }
}

impl Default for Cardinality {
    fn default() -> Self {
        Cardinality::MandatoryUnary
    }
}

impl FromStr for Cardinality {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0..1" => Ok(Cardinality::OptionalUnary),
            "1..1" => Ok(Cardinality::MandatoryUnary),
            "0..n" => Ok(Cardinality::OptionalMultiple),
            "1..n" => Ok(Cardinality::MandatoryMultiple),
            other => Err(MetadataError::InvalidCardinality { value: other.to_string() }),
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferencePolicy {
    #[default]
    Static,
    Dynamic,
}

impl FromStr for ReferencePolicy {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(ReferencePolicy::Static),
            "dynamic" => Ok(ReferencePolicy::Dynamic),
            other => Err(MetadataError::InvalidPolicy { value: other.to_string() }),
        }
    }
}

/// The behavioural variant a descriptor selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// Instance created as soon as the component is satisfied.
    Immediate,
    /// Instance created on the first service request.
    Delayed,
    /// A private instance per consumer or per `new_instance` call.
    Factory,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DependencyDescriptor {
    name: String,
    interface: String,
    target: Option<String>,
    cardinality: Cardinality,
    policy: ReferencePolicy,
    bind: Option<String>,
    unbind: Option<String>,
}

impl DependencyDescriptor {
    pub fn new(name: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interface: interface.into(),
            target: None,
            cardinality: Cardinality::default(),
            policy: ReferencePolicy::default(),
            bind: None,
            unbind: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn with_policy(mut self, policy: ReferencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_bind(mut self, method: impl Into<String>) -> Self {
        self.bind = Some(method.into());
        self
    }

    pub fn with_unbind(mut self, method: impl Into<String>) -> Self {
        self.unbind = Some(method.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn policy(&self) -> ReferencePolicy {
        self.policy
    }

    pub fn bind_method(&self) -> Option<&str> {
        self.bind.as_deref()
    }

    pub fn unbind_method(&self) -> Option<&str> {
        self.unbind.as_deref()
    }

    pub fn is_optional(&self) -> bool {
        self.cardinality.is_optional()
    }

    pub fn is_multiple(&self) -> bool {
        self.cardinality.is_multiple()
    }

    pub fn is_static(&self) -> bool {
        self.policy == ReferencePolicy::Static
    }

    /// Key of the component property that overrides [`Self::target`].
    pub fn target_property(&self) -> String {
        format!("{}.target", self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    interfaces: Vec<String>,
    service_factory: bool,
}

impl ServiceDescriptor {
    pub fn new<I, S>(interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            interfaces: interfaces.into_iter().map(Into::into).collect(),
            service_factory: false,
        }
    }

    pub fn with_service_factory(mut self, service_factory: bool) -> Self {
        self.service_factory = service_factory;
        self
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    pub fn is_service_factory(&self) -> bool {
        self.service_factory
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ComponentDescriptor {
    name: String,
    implementation: String,
    dependencies: Vec<DependencyDescriptor>,
    service: Option<ServiceDescriptor>,
    enabled: bool,
    immediate: bool,
    factory: Option<String>,
    properties: Properties,
    configuration_policy: ConfigurationPolicy,
    activate: String,
    deactivate: String,
}

impl ComponentDescriptor {
    pub fn builder(name: impl Into<String>, implementation: impl Into<String>) -> ComponentDescriptorBuilder {
        ComponentDescriptorBuilder::new(name, implementation)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn implementation(&self) -> &str {
        &self.implementation
    }

    pub fn dependencies(&self) -> &[DependencyDescriptor] {
        &self.dependencies
    }

    pub fn dependency(&self, name: &str) -> Option<&DependencyDescriptor> {
        self.dependencies.iter().find(|d| d.name == name)
    }

    pub fn service(&self) -> Option<&ServiceDescriptor> {
        self.service.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_immediate(&self) -> bool {
        self.immediate
    }

    pub fn factory(&self) -> Option<&str> {
        self.factory.as_deref()
    }

    pub fn is_service_factory(&self) -> bool {
        self.service.as_ref().is_some_and(ServiceDescriptor::is_service_factory)
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn configuration_policy(&self) -> ConfigurationPolicy {
        self.configuration_policy
    }

    pub fn activate_method(&self) -> &str {
        &self.activate
    }

    pub fn deactivate_method(&self) -> &str {
        &self.deactivate
    }

    pub fn kind(&self) -> ComponentKind {
        if self.factory.is_some() || self.is_service_factory() {
            ComponentKind::Factory
        } else if self.immediate {
            ComponentKind::Immediate
        } else {
            ComponentKind::Delayed
        }
    }
}

pub struct ComponentDescriptorBuilder {
    name: String,
    implementation: String,
    dependencies: Vec<DependencyDescriptor>,
    service: Option<ServiceDescriptor>,
    enabled: bool,
    immediate: Option<bool>,
    factory: Option<String>,
    properties: Properties,
    configuration_policy: ConfigurationPolicy,
    activate: Option<String>,
    deactivate: Option<String>,
}

impl ComponentDescriptorBuilder {
    pub fn new(name: impl Into<String>, implementation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            implementation: implementation.into(),
            dependencies: Vec::new(),
            service: None,
            enabled: true,
            immediate: None,
            factory: None,
            properties: Properties::new(),
            configuration_policy: ConfigurationPolicy::default(),
            activate: None,
            deactivate: None,
        }
    }

    pub fn dependency(mut self, dependency: DependencyDescriptor) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn service(mut self, service: ServiceDescriptor) -> Self {
        self.service = Some(service);
        self
    }

    /// Shorthand for a plain (non-factory) service.
    pub fn provides<I, S>(self, interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.service(ServiceDescriptor::new(interfaces))
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = Some(immediate);
        self
    }

    pub fn factory(mut self, factory: impl Into<String>) -> Self {
        self.factory = Some(factory.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties.extend(properties);
        self
    }

    pub fn configuration_policy(mut self, policy: ConfigurationPolicy) -> Self {
        self.configuration_policy = policy;
        self
    }

    pub fn activate_method(mut self, method: impl Into<String>) -> Self {
        self.activate = Some(method.into());
        self
    }

    pub fn deactivate_method(mut self, method: impl Into<String>) -> Self {
        self.deactivate = Some(method.into());
        self
    }

    /// Validates and freezes the descriptor.
    ///
    /// When `immediate` is not set it defaults to `true` for components
    /// that neither provide a service nor are factories.
    pub fn build(self) -> MetadataResult<ComponentDescriptor> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(MetadataError::MissingName);
        }
        if self.implementation.trim().is_empty() {
            return Err(MetadataError::MissingImplementation { component: name });
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for dependency in self.dependencies.iter() {
            if dependency.name.trim().is_empty() {
                return Err(MetadataError::MissingReferenceName { component: name });
            }
            if !seen.insert(dependency.name.as_str()) {
                return Err(MetadataError::DuplicateReference {
                    component: name,
                    reference: dependency.name.clone(),
                });
            }
            if dependency.interface.trim().is_empty() {
                return Err(MetadataError::MissingInterface {
                    component: name,
                    reference: dependency.name.clone(),
                });
            }
            if let Some(target) = &dependency.target {
                if let Err(err) = Filter::parse(target) {
                    return Err(MetadataError::InvalidTarget {
                        component: name,
                        reference: dependency.name.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        drop(seen);

        if let Some(service) = &self.service {
            if service.interfaces.is_empty() || service.interfaces.iter().any(|i| i.trim().is_empty()) {
                return Err(MetadataError::EmptyService { component: name });
            }
        }

        let service_factory = self.service.as_ref().is_some_and(|s| s.service_factory);
        if self.factory.is_some() && self.immediate == Some(true) {
            return Err(MetadataError::ImmediateFactory { component: name });
        }
        if service_factory && (self.factory.is_some() || self.immediate == Some(true)) {
            return Err(MetadataError::ServiceFactoryConflict { component: name });
        }

        let immediate = match self.immediate {
            Some(immediate) => immediate,
            None => self.service.is_none() && self.factory.is_none(),
        };
        if !immediate && self.factory.is_none() && self.service.is_none() {
            return Err(MetadataError::DelayedWithoutService { component: name });
        }

        Ok(ComponentDescriptor {
            name,
            implementation: self.implementation,
            dependencies: self.dependencies,
            service: self.service,
            enabled: self.enabled,
            immediate,
            factory: self.factory,
            properties: self.properties,
            configuration_policy: self.configuration_policy,
            activate: self.activate.unwrap_or_else(|| DEFAULT_ACTIVATE_METHOD.to_string()),
            deactivate: self.deactivate.unwrap_or_else(|| DEFAULT_DEACTIVATE_METHOD.to_string()),
        })
    }
}
