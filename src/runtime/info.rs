use serde::Serialize;

use crate::component::{ComponentManager, State};
use crate::config::ConfigurationPolicy;
use crate::metadata::{Cardinality, ComponentKind, ReferencePolicy};
use crate::registry::{ModuleId, Properties};

/// Read-only snapshot of one component, for management tooling.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentInfo {
    pub id: u64,
    pub name: String,
    pub module: ModuleId,
    pub state: State,
    pub kind: ComponentKind,
    pub implementation: String,
    pub services: Vec<String>,
    pub factory: Option<String>,
    pub service_factory: bool,
    pub default_enabled: bool,
    pub immediate: bool,
    pub configuration_policy: ConfigurationPolicy,
    pub properties: Properties,
    pub references: Vec<ReferenceInfo>,
    pub instances: usize,
    pub service_id: Option<u64>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceInfo {
    pub name: String,
    pub interface: String,
    pub cardinality: Cardinality,
    pub policy: ReferencePolicy,
    pub target: Option<String>,
    pub satisfied: bool,
    pub tracked: Vec<u64>,
    pub bound: Vec<u64>,
}

impl ComponentInfo {
    pub fn from_manager(manager: &ComponentManager) -> Self {
        let descriptor = manager.descriptor();
        let trackers = manager.trackers();
        let references = descriptor
            .dependencies()
            .iter()
            .map(|dependency| {
                let tracker = trackers.iter().find(|tracker| tracker.name() == dependency.name());
                ReferenceInfo {
                    name: dependency.name().to_string(),
                    interface: dependency.interface().to_string(),
                    cardinality: dependency.cardinality(),
                    policy: dependency.policy(),
                    target: tracker
                        .and_then(|tracker| tracker.target())
                        .or_else(|| dependency.target().map(str::to_string)),
                    satisfied: tracker.is_some_and(|tracker| tracker.is_valid()),
                    tracked: tracker
                        .map(|tracker| tracker.references().iter().map(|r| r.id()).collect())
                        .unwrap_or_default(),
                    bound: tracker
                        .map(|tracker| tracker.bound_references().iter().map(|r| r.id()).collect())
                        .unwrap_or_default(),
                }
            })
            .collect();

        Self {
            id: manager.id(),
            name: manager.name().to_string(),
            module: manager.module(),
            state: manager.state(),
            kind: descriptor.kind(),
            implementation: descriptor.implementation().to_string(),
            services: descriptor
                .service()
                .map(|service| service.interfaces().to_vec())
                .unwrap_or_default(),
            factory: descriptor.factory().map(str::to_string),
            service_factory: descriptor.is_service_factory(),
            default_enabled: descriptor.is_enabled(),
            immediate: descriptor.is_immediate(),
            configuration_policy: descriptor.configuration_policy(),
            properties: manager.properties(),
            references,
            instances: manager.instance_count(),
            service_id: manager.service_reference().map(|reference| reference.id()),
        }
    }
}
