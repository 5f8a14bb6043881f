use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::config::types::{ConfigurationListener, ConfigurationSource};
use crate::registry::Properties;

/// Configuration store keyed by pid (the component name).
#[derive(Clone, Default)]
pub struct InMemoryConfiguration {
    inner: Arc<ConfigurationInner>,
}

#[derive(Default)]
struct ConfigurationInner {
    entries: RwLock<HashMap<String, Properties>>,
    listeners: Mutex<Vec<Weak<dyn ConfigurationListener>>>,
}

impl InMemoryConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `properties` for `pid` and notifies listeners.
    pub fn update(&self, pid: impl Into<String>, properties: Properties) {
        let pid = pid.into();
        self.inner.entries.write().insert(pid.clone(), properties);
        for listener in self.live_listeners() {
            listener.configuration_changed(&pid);
        }
    }

    /// Removes the configuration for `pid`; returns whether one existed.
    pub fn delete(&self, pid: &str) -> bool {
        let existed = self.inner.entries.write().remove(pid).is_some();
        if existed {
            for listener in self.live_listeners() {
                listener.configuration_deleted(pid);
            }
        }
        existed
    }

    fn live_listeners(&self) -> Vec<Arc<dyn ConfigurationListener>> {
        let mut guard = self.inner.listeners.lock();
        guard.retain(|weak| weak.strong_count() > 0);
        guard.iter().filter_map(Weak::upgrade).collect()
    }
}

impl ConfigurationSource for InMemoryConfiguration {
    fn configuration(&self, pid: &str) -> Option<Properties> {
        self.inner.entries.read().get(pid).cloned()
    }

    /// Listeners are held weakly; dropping the listener unsubscribes it.
    fn add_listener(&self, listener: Arc<dyn ConfigurationListener>) {
        self.inner.listeners.lock().push(Arc::downgrade(&listener));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl ConfigurationListener for Recorder {
        fn configuration_changed(&self, pid: &str) {
            self.seen.lock().push(format!("changed:{pid}"));
        }

        fn configuration_deleted(&self, pid: &str) {
            self.seen.lock().push(format!("deleted:{pid}"));
        }
    }

    #[test]
    fn update_and_delete_notify_live_listeners() {
        let config = InMemoryConfiguration::new();
        let recorder = Arc::new(Recorder::default());
        config.add_listener(recorder.clone());

        let mut props = Properties::new();
        props.insert("port".into(), json!(8080));
        config.update("web", props.clone());
        assert_eq!(config.configuration("web"), Some(props));
        assert!(config.delete("web"));
        assert!(!config.delete("web"));
        assert_eq!(config.configuration("web"), None);

        assert_eq!(recorder.seen.lock().as_slice(), &["changed:web", "deleted:web"]);
    }

    #[test]
    fn dropped_listeners_are_pruned() {
        let config = InMemoryConfiguration::new();
        {
            let recorder: Arc<dyn ConfigurationListener> = Arc::new(Recorder::default());
            config.add_listener(recorder);
        }
        config.update("web", Properties::new());
        assert!(config.inner.listeners.lock().is_empty());
    }
}
