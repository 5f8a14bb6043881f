use serde::Deserialize;
use serde_json::Value;

use crate::config::ConfigurationPolicy;
use crate::metadata::errors::{MetadataError, MetadataResult};
use crate::metadata::types::{
    Cardinality, ComponentDescriptor, DependencyDescriptor, ReferencePolicy, ServiceDescriptor,
};
use crate::registry::Properties;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ComponentDocument {
    name: String,
    implementation: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    immediate: Option<bool>,
    factory: Option<String>,
    #[serde(default)]
    properties: Properties,
    configuration_policy: Option<String>,
    activate: Option<String>,
    deactivate: Option<String>,
    service: Option<ServiceDocument>,
    #[serde(default)]
    references: Vec<ReferenceDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ServiceDocument {
    provide: Vec<String>,
    #[serde(default)]
    service_factory: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ReferenceDocument {
    name: String,
    interface: String,
    target: Option<String>,
    cardinality: Option<String>,
    policy: Option<String>,
    bind: Option<String>,
    unbind: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Parses a JSON array of component documents.
///
/// A malformed array fails as a whole; each element is validated on its
/// own so one bad descriptor does not hide its siblings.
pub fn parse_descriptors(json: &str) -> MetadataResult<Vec<MetadataResult<ComponentDescriptor>>> {
    let documents: Vec<Value> = serde_json::from_str(json).map_err(|err| MetadataError::Malformed {
        reason: err.to_string(),
    })?;
    Ok(documents.into_iter().map(descriptor_from_value).collect())
}

fn descriptor_from_value(value: Value) -> MetadataResult<ComponentDescriptor> {
    let document: ComponentDocument = serde_json::from_value(value).map_err(|err| MetadataError::Malformed {
        reason: err.to_string(),
    })?;

    let mut builder = ComponentDescriptor::builder(document.name, document.implementation)
        .enabled(document.enabled)
        .properties(document.properties);
    if let Some(immediate) = document.immediate {
        builder = builder.immediate(immediate);
    }
    if let Some(factory) = document.factory {
        builder = builder.factory(factory);
    }
    if let Some(policy) = document.configuration_policy {
        let parsed = ConfigurationPolicy::parse(&policy)
            .ok_or(MetadataError::InvalidConfigurationPolicy { value: policy })?;
        builder = builder.configuration_policy(parsed);
    }
    if let Some(method) = document.activate {
        builder = builder.activate_method(method);
    }
    if let Some(method) = document.deactivate {
        builder = builder.deactivate_method(method);
    }
    if let Some(service) = document.service {
        builder = builder.service(ServiceDescriptor::new(service.provide).with_service_factory(service.service_factory));
    }
    for reference in document.references {
        let mut dependency = DependencyDescriptor::new(reference.name, reference.interface);
        if let Some(target) = reference.target {
            dependency = dependency.with_target(target);
        }
        if let Some(cardinality) = reference.cardinality {
            dependency = dependency.with_cardinality(cardinality.parse::<Cardinality>()?);
        }
        if let Some(policy) = reference.policy {
            dependency = dependency.with_policy(policy.parse::<ReferencePolicy>()?);
        }
        if let Some(bind) = reference.bind {
            dependency = dependency.with_bind(bind);
        }
        if let Some(unbind) = reference.unbind {
            dependency = dependency.with_unbind(unbind);
        }
        builder = builder.dependency(dependency);
    }
    builder.build()
}
