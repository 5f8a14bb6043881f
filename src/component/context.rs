use std::fmt;
use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::component::manager::ManagerInner;
use crate::component::types::ContextId;
use crate::registry::{DynService, ModuleId, Properties};
use crate::runtime::ManagementTask;

/// The view a single component instance has of its runtime.
#[derive(Clone)]
pub struct ComponentContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: ContextId,
    component_id: u64,
    component_name: String,
    properties: Properties,
    using_module: Option<ModuleId>,
    manager: Weak<ManagerInner>,
}

impl ComponentContext {
    pub(crate) fn new(
        id: ContextId,
        manager: &Arc<ManagerInner>,
        properties: Properties,
        using_module: Option<ModuleId>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                component_id: manager.id(),
                component_name: manager.name().to_string(),
                properties,
                using_module,
                manager: Arc::downgrade(manager),
            }),
        }
    }

    /// A context not attached to any live component.
    #[cfg(test)]
    pub(crate) fn detached(component_name: &str, component_id: u64) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: ContextId(0),
                component_id,
                component_name: component_name.to_string(),
                properties: Properties::new(),
                using_module: None,
                manager: Weak::new(),
            }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// The merged component properties this instance was created with.
    pub fn properties(&self) -> &Properties {
        &self.inner.properties
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.inner.properties.get(key)
    }

    pub fn component_name(&self) -> &str {
        &self.inner.component_name
    }

    pub fn component_id(&self) -> u64 {
        self.inner.component_id
    }

    /// The consumer module this instance was created for, when it was
    /// created on behalf of one.
    pub fn using_module(&self) -> Option<ModuleId> {
        self.inner.using_module
    }

    /// The best service currently tracked by the named reference.
    pub fn locate_service(&self, reference: &str) -> Option<DynService> {
        let manager = self.inner.manager.upgrade()?;
        manager.tracker(reference)?.locate_service()
    }

    /// Every service currently tracked by the named reference, best first.
    pub fn locate_services(&self, reference: &str) -> Vec<DynService> {
        self.inner
            .manager
            .upgrade()
            .and_then(|manager| manager.tracker(reference))
            .map(|tracker| tracker.locate_services())
            .unwrap_or_default()
    }

    /// Enables components of the same module; `None` enables all of them.
    pub fn enable_component(&self, name: Option<&str>) -> ManagementTask {
        match self.inner.manager.upgrade().and_then(|manager| manager.activator()) {
            Some(activator) => activator.enable_component(name),
            None => ManagementTask::ready(0),
        }
    }

    pub fn disable_component(&self, name: &str) -> ManagementTask {
        match self.inner.manager.upgrade().and_then(|manager| manager.activator()) {
            Some(activator) => activator.disable_component(name),
            None => ManagementTask::ready(0),
        }
    }
}

impl fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentContext")
            .field("id", &self.inner.id)
            .field("component", &self.inner.component_name)
            .field("using_module", &self.inner.using_module)
            .finish()
    }
}
