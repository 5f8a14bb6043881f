use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::catalog::Catalog;
use crate::component::{ComponentEnv, ComponentManager, TypeSpace};
use crate::config::ConfigurationSource;
use crate::metadata::ComponentDescriptor;
use crate::registry::{ModuleId, ServiceRegistry};
use crate::runtime::host::RuntimeInner;
use crate::runtime::worker::ManagementTask;

/// Owns the components declared by one loaded module.
pub struct ComponentActivator {
    module: ModuleId,
    name: String,
    types: Arc<TypeSpace>,
    registry: Arc<dyn ServiceRegistry>,
    configuration: Arc<dyn ConfigurationSource>,
    catalog: Catalog,
    runtime: Weak<RuntimeInner>,
    active: AtomicBool,
    managers: Mutex<Vec<ComponentManager>>,
}

impl ComponentActivator {
    pub(crate) fn new(
        module: ModuleId,
        name: String,
        types: TypeSpace,
        runtime: &Arc<RuntimeInner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            module,
            name,
            types: Arc::new(types),
            registry: runtime.registry.clone(),
            configuration: runtime.configuration.clone(),
            catalog: runtime.catalog.clone(),
            runtime: Arc::downgrade(runtime),
            active: AtomicBool::new(true),
            managers: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn component_env(&self) -> ComponentEnv {
        ComponentEnv {
            module: self.module,
            registry: self.registry.clone(),
            configuration: self.configuration.clone(),
            types: self.types.clone(),
        }
    }

    pub fn module(&self) -> ModuleId {
        self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `false` once disposal has begun; components refuse to activate.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn managers(&self) -> Vec<ComponentManager> {
        self.managers.lock().clone()
    }

    /// Creates a manager per descriptor, then enables the default-enabled
    /// ones. A descriptor whose name is taken is logged and skipped.
    pub(crate) fn load(self: &Arc<Self>, descriptors: Vec<ComponentDescriptor>, enable_defaults: bool) {
        let mut created = Vec::new();
        for descriptor in descriptors {
            let name = descriptor.name().to_string();
            if let Err(err) = self.catalog.check_component_name(&name) {
                log::error!("{}: {}", self.name, err);
                continue;
            }
            if !self.types.contains(descriptor.implementation()) {
                log::warn!(
                    "{}: implementation type {} of {} is not known; activation will fail",
                    self.name,
                    descriptor.implementation(),
                    name
                );
            }
            let id = self.catalog.create_component_id();
            let manager = ComponentManager::new(id, Arc::new(descriptor), self);
            if let Err(err) = self.catalog.register_component(&name, manager.clone()) {
                log::error!("{}: {}", self.name, err);
                self.catalog.unregister_component(&name);
                continue;
            }
            log::debug!("{}: loaded component {} ({})", self.name, name, id);
            self.managers.lock().push(manager.clone());
            created.push(manager);
        }

        if !enable_defaults {
            return;
        }
        for manager in created {
            if !manager.descriptor().is_enabled() {
                continue;
            }
            if let Err(err) = manager.enable() {
                log::error!("{}: {}", self.name, err);
            }
        }
    }

    /// Disposes every component, last loaded first, and frees their names.
    pub(crate) fn dispose(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let managers = std::mem::take(&mut *self.managers.lock());
        for manager in managers.iter().rev() {
            manager.dispose();
            self.catalog.unregister_component(manager.name());
        }
        log::info!("{}: disposed {} component(s)", self.name, managers.len());
    }

    /// Asynchronously enables this module's components named `name`, or all
    /// of them for `None`.
    pub fn enable_component(&self, name: Option<&str>) -> ManagementTask {
        let targets = self.select(name);
        self.submit(move || {
            targets
                .iter()
                .filter(|manager| match manager.enable() {
                    Ok(()) => true,
                    Err(err) => {
                        log::error!("{}", err);
                        false
                    }
                })
                .count()
        })
    }

    pub fn disable_component(&self, name: &str) -> ManagementTask {
        let targets = self.select(Some(name));
        self.submit(move || {
            for manager in &targets {
                manager.disable();
            }
            targets.len()
        })
    }

    fn select(&self, name: Option<&str>) -> Vec<ComponentManager> {
        self.managers
            .lock()
            .iter()
            .filter(|manager| name.map_or(true, |name| manager.name() == name))
            .cloned()
            .collect()
    }

    fn submit<F>(&self, job: F) -> ManagementTask
    where
        F: FnOnce() -> usize + Send + 'static,
    {
        match self.runtime.upgrade() {
            Some(runtime) => runtime.workers.submit(job),
            None => ManagementTask::ready(0),
        }
    }
}
