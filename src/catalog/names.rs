use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::component::ComponentManager;
use crate::config::{ConfigurationListener, ConfigurationPolicy};
use crate::runtime::{RuntimeError, RuntimeResult};

enum Entry {
    Reserved,
    Registered(ComponentManager),
}

/// Process-wide index of component names and ids.
///
/// A name is first reserved, then bound to its manager. Reserved names are
/// taken but not visible to lookups.
#[derive(Clone, Default)]
pub struct Catalog {
    inner: Arc<CatalogInner>,
}

#[derive(Default)]
struct CatalogInner {
    next_id: AtomicU64,
    names: Mutex<HashMap<String, Entry>>,
    ids: Mutex<BTreeMap<u64, ComponentManager>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next component id; ids start at 1 and are never reused.
    pub fn create_component_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reserves `name`, failing when it is already reserved or registered.
    pub fn check_component_name(&self, name: &str) -> RuntimeResult<()> {
        let mut names = self.inner.names.lock();
        if names.contains_key(name) {
            return Err(RuntimeError::DuplicateComponentName {
                name: name.to_string(),
            });
        }
        names.insert(name.to_string(), Entry::Reserved);
        Ok(())
    }

    /// Binds a reserved name to its manager.
    pub fn register_component(&self, name: &str, manager: ComponentManager) -> RuntimeResult<()> {
        let mut names = self.inner.names.lock();
        match names.get(name) {
            Some(Entry::Reserved) => {}
            _ => {
                return Err(RuntimeError::NameNotReserved {
                    name: name.to_string(),
                })
            }
        }
        self.inner.ids.lock().insert(manager.id(), manager.clone());
        names.insert(name.to_string(), Entry::Registered(manager));
        Ok(())
    }

    pub fn get_component(&self, name: &str) -> Option<ComponentManager> {
        match self.inner.names.lock().get(name) {
            Some(Entry::Registered(manager)) => Some(manager.clone()),
            _ => None,
        }
    }

    pub fn get_component_by_id(&self, id: u64) -> Option<ComponentManager> {
        self.inner.ids.lock().get(&id).cloned()
    }

    /// Frees `name` whether it was only reserved or fully registered.
    pub fn unregister_component(&self, name: &str) {
        let removed = self.inner.names.lock().remove(name);
        if let Some(Entry::Registered(manager)) = removed {
            self.inner.ids.lock().remove(&manager.id());
        }
    }

    /// Registered components in id order.
    pub fn components(&self) -> Vec<ComponentManager> {
        self.inner.ids.lock().values().cloned().collect()
    }
}

impl ConfigurationListener for Catalog {
    fn configuration_changed(&self, pid: &str) {
        let Some(manager) = self.get_component(pid) else {
            return;
        };
        if manager.descriptor().configuration_policy() == ConfigurationPolicy::Ignore {
            log::debug!("{}: ignoring configuration change", pid);
            return;
        }
        manager.reconfigure();
    }
}
