use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::catalog::Catalog;
use crate::component::ComponentManager;
use crate::config::{ConfigurationListener, ConfigurationSource};
use crate::registry::{ModuleId, ServiceRegistry};
use crate::runtime::activator::ComponentActivator;
use crate::runtime::config::RuntimeConfig;
use crate::runtime::errors::{RuntimeError, RuntimeResult};
use crate::runtime::info::ComponentInfo;
use crate::runtime::module::Module;
use crate::runtime::worker::{ManagementTask, WorkerPool};

/// Entry point of the component runtime.
///
/// Loading a module creates one manager per declared component; unloading
/// disposes them. Dropping the runtime stops it.
pub struct ComponentRuntime {
    inner: Arc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
    pub(crate) registry: Arc<dyn ServiceRegistry>,
    pub(crate) configuration: Arc<dyn ConfigurationSource>,
    pub(crate) catalog: Catalog,
    pub(crate) workers: WorkerPool,
    config: RuntimeConfig,
    // Configuration sources may hold listeners weakly; this keeps ours alive.
    _configuration_listener: Arc<dyn ConfigurationListener>,
    modules: Mutex<BTreeMap<ModuleId, Arc<ComponentActivator>>>,
    stopped: AtomicBool,
}

impl ComponentRuntime {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        configuration: Arc<dyn ConfigurationSource>,
        config: RuntimeConfig,
    ) -> RuntimeResult<Self> {
        let workers = WorkerPool::new(config.management_workers)?;
        let catalog = Catalog::new();
        let listener: Arc<dyn ConfigurationListener> = Arc::new(catalog.clone());
        configuration.add_listener(listener.clone());
        log::debug!(
            "component runtime starting with {} management worker(s)",
            config.management_workers
        );
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                registry,
                configuration,
                catalog,
                workers,
                config,
                _configuration_listener: listener,
                modules: Mutex::new(BTreeMap::new()),
                stopped: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        &self.inner.registry
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn is_running(&self) -> bool {
        !self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Creates and, where the descriptors ask for it, enables the module's
    /// components. Returns their managers in declaration order.
    pub fn load_module(&self, module: Module) -> RuntimeResult<Vec<ComponentManager>> {
        if !self.is_running() {
            return Err(RuntimeError::Stopped);
        }
        let (id, name, types, descriptors) = module.into_parts();
        let activator = {
            let mut modules = self.inner.modules.lock();
            if modules.contains_key(&id) {
                return Err(RuntimeError::ModuleAlreadyLoaded { module: id });
            }
            let activator = ComponentActivator::new(id, name, types, &self.inner);
            modules.insert(id, activator.clone());
            activator
        };
        log::info!("loading module {} ({})", activator.name(), id);
        activator.load(descriptors, self.inner.config.enable_default_components);
        Ok(activator.managers())
    }

    /// Disposes the module's components, last declared first. Returns
    /// `false` for a module that is not loaded.
    pub fn unload_module(&self, id: ModuleId) -> bool {
        let activator = self.inner.modules.lock().remove(&id);
        match activator {
            Some(activator) => {
                log::info!("unloading module {} ({})", activator.name(), id);
                activator.dispose();
                true
            }
            None => false,
        }
    }

    /// Unloads every module, newest first, and stops the workers.
    /// Idempotent.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn activator(&self, id: ModuleId) -> Option<Arc<ComponentActivator>> {
        self.inner.modules.lock().get(&id).cloned()
    }

    pub fn component_manager(&self, name: &str) -> Option<ComponentManager> {
        self.inner.catalog.get_component(name)
    }

    /// Introspection snapshot of all components, or those of one module.
    pub fn components(&self, module: Option<ModuleId>) -> Vec<ComponentInfo> {
        self.inner
            .catalog
            .components()
            .iter()
            .filter(|manager| module.map_or(true, |module| manager.module() == module))
            .map(ComponentInfo::from_manager)
            .collect()
    }

    pub fn component(&self, id: u64) -> Option<ComponentInfo> {
        self.inner
            .catalog
            .get_component_by_id(id)
            .map(|manager| ComponentInfo::from_manager(&manager))
    }

    /// Enables the named component on a management worker. The task yields
    /// the number of components enabled, 0 for an unknown name.
    pub fn enable_by_name(&self, name: &str) -> ManagementTask {
        let catalog = self.inner.catalog.clone();
        let name = name.to_string();
        self.inner.workers.submit(move || match catalog.get_component(&name) {
            Some(manager) => match manager.enable() {
                Ok(()) => 1,
                Err(err) => {
                    log::error!("{}", err);
                    0
                }
            },
            None => {
                log::warn!("no component named {}", name);
                0
            }
        })
    }

    /// Disables the named component on a management worker.
    pub fn disable_by_name(&self, name: &str) -> ManagementTask {
        let catalog = self.inner.catalog.clone();
        let name = name.to_string();
        self.inner.workers.submit(move || match catalog.get_component(&name) {
            Some(manager) => {
                manager.disable();
                1
            }
            None => {
                log::warn!("no component named {}", name);
                0
            }
        })
    }
}

impl Drop for ComponentRuntime {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl RuntimeInner {
    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let modules = std::mem::take(&mut *self.modules.lock());
        for activator in modules.into_values().rev() {
            activator.dispose();
        }
        self.workers.shutdown();
        log::info!("component runtime stopped");
    }
}
