use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};

use crate::registry::errors::{RegistryError, RegistryResult};
use crate::registry::filter::Filter;
use crate::registry::types::{
    DynService, ListenerId, ModuleId, Properties, RegistrationControl, ServiceEvent, ServiceEventKind,
    ServiceListener, ServiceObject, ServiceReference, ServiceRegistration, ServiceRegistry,
};

/// In-process service registry.
///
/// Events are delivered synchronously on the thread that caused them and
/// without holding any registry lock, so listeners may call back in.
#[derive(Clone)]
pub struct InMemoryRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    self_ref: Weak<RegistryInner>,
    next_service_id: AtomicU64,
    next_listener_id: AtomicU64,
    closed: AtomicBool,
    services: Mutex<BTreeMap<u64, Entry>>,
    listeners: Mutex<Vec<ListenerEntry>>,
}

struct Entry {
    reference: ServiceReference,
    registration: ServiceRegistration,
    object: ServiceObject,
    // serializes factory calls for this registration; re-entrant because a
    // factory may fetch other services (or this one) while producing
    factory_lock: Arc<ReentrantMutex<()>>,
    usage: HashMap<ModuleId, Usage>,
}

struct Usage {
    count: usize,
    service: DynService,
}

#[derive(Clone)]
struct ListenerEntry {
    id: ListenerId,
    filter: Filter,
    listener: Arc<dyn ServiceListener>,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new_cyclic(|self_ref| RegistryInner {
                self_ref: self_ref.clone(),
                next_service_id: AtomicU64::new(1),
                next_listener_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                services: Mutex::new(BTreeMap::new()),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn service_count(&self) -> usize {
        self.inner.services.lock().len()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Number of outstanding `get_service` uses `consumer` holds on `reference`.
    pub fn use_count(&self, consumer: ModuleId, reference: &ServiceReference) -> usize {
        self.inner
            .services
            .lock()
            .get(&reference.id())
            .and_then(|entry| entry.usage.get(&consumer))
            .map(|usage| usage.count)
            .unwrap_or(0)
    }

    /// Total outstanding uses across every consumer of every service.
    pub fn total_use_count(&self) -> usize {
        self.inner
            .services
            .lock()
            .values()
            .flat_map(|entry| entry.usage.values())
            .map(|usage| usage.count)
            .sum()
    }

    /// Unregisters every remaining service and refuses new registrations.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let ids: Vec<ServiceReference> = self
            .inner
            .services
            .lock()
            .values()
            .map(|entry| entry.reference.clone())
            .collect();
        for reference in ids {
            self.inner.unregister(&reference);
        }
    }
}

impl RegistryInner {
    fn fire(&self, kind: ServiceEventKind, reference: &ServiceReference) {
        let targets: Vec<ListenerEntry> = self
            .listeners
            .lock()
            .iter()
            .filter(|entry| reference.matches(&entry.filter))
            .cloned()
            .collect();
        let event = ServiceEvent::new(kind, reference.clone());
        for target in targets {
            // a listener removed by an earlier callback must not see the event
            let still_registered = self.listeners.lock().iter().any(|entry| entry.id == target.id);
            if still_registered {
                target.listener.service_changed(&event);
            }
        }
    }
}

impl RegistrationControl for RegistryInner {
    fn update_properties(&self, reference: &ServiceReference, properties: Properties) {
        if !self.services.lock().contains_key(&reference.id()) {
            return;
        }
        reference.replace_properties(properties);
        self.fire(ServiceEventKind::Modified, reference);
    }

    fn unregister(&self, reference: &ServiceReference) -> bool {
        if !self.services.lock().contains_key(&reference.id()) {
            return false;
        }
        self.fire(ServiceEventKind::Unregistering, reference);

        let Some(entry) = self.services.lock().remove(&reference.id()) else {
            // a listener unregistered it while handling the event
            return false;
        };
        if let ServiceObject::Factory(factory) = &entry.object {
            for (consumer, usage) in entry.usage {
                factory.unget_service(consumer, &entry.registration, usage.service);
            }
        }
        true
    }
}

impl ServiceRegistry for InMemoryRegistry {
    fn add_listener(&self, filter: Filter, listener: Arc<dyn ServiceListener>) -> ListenerId {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst));
        self.inner.listeners.lock().push(ListenerEntry { id, filter, listener });
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.inner.listeners.lock().retain(|entry| entry.id != id);
    }

    fn lookup(&self, interface: &str, filter: Option<&Filter>) -> Vec<ServiceReference> {
        let mut found: Vec<ServiceReference> = self
            .inner
            .services
            .lock()
            .values()
            .map(|entry| &entry.reference)
            .filter(|reference| reference.provides(interface))
            .filter(|reference| filter.map_or(true, |f| reference.matches(f)))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.rank_cmp(b));
        found
    }

    fn get_service(&self, consumer: ModuleId, reference: &ServiceReference) -> Option<DynService> {
        let (object, registration, factory_lock) = {
            let mut services = self.inner.services.lock();
            let entry = services.get_mut(&reference.id())?;
            if let Some(usage) = entry.usage.get_mut(&consumer) {
                usage.count += 1;
                return Some(usage.service.clone());
            }
            (
                entry.object.clone(),
                entry.registration.clone(),
                entry.factory_lock.clone(),
            )
        };

        match object {
            ServiceObject::Shared(service) => {
                let mut services = self.inner.services.lock();
                let entry = services.get_mut(&reference.id())?;
                let usage = entry.usage.entry(consumer).or_insert_with(|| Usage {
                    count: 0,
                    service: service.clone(),
                });
                usage.count += 1;
                Some(usage.service.clone())
            }
            ServiceObject::Factory(factory) => {
                let _serial = factory_lock.lock();
                {
                    let mut services = self.inner.services.lock();
                    let entry = services.get_mut(&reference.id())?;
                    if let Some(usage) = entry.usage.get_mut(&consumer) {
                        usage.count += 1;
                        return Some(usage.service.clone());
                    }
                }

                let produced = factory.get_service(consumer, &registration)?;

                let mut services = self.inner.services.lock();
                match services.get_mut(&reference.id()) {
                    Some(entry) => {
                        let usage = entry.usage.entry(consumer).or_insert_with(|| Usage {
                            count: 0,
                            service: produced.clone(),
                        });
                        usage.count += 1;
                        Some(usage.service.clone())
                    }
                    None => {
                        drop(services);
                        factory.unget_service(consumer, &registration, produced);
                        None
                    }
                }
            }
        }
    }

    fn release_service(&self, consumer: ModuleId, reference: &ServiceReference) -> bool {
        let released = {
            let mut services = self.inner.services.lock();
            let Some(entry) = services.get_mut(&reference.id()) else {
                return false;
            };
            let Some(usage) = entry.usage.get_mut(&consumer) else {
                return false;
            };
            usage.count -= 1;
            if usage.count > 0 {
                return true;
            }
            let usage = entry.usage.remove(&consumer);
            match (&entry.object, usage) {
                (ServiceObject::Factory(factory), Some(usage)) => {
                    Some((factory.clone(), entry.registration.clone(), usage.service))
                }
                _ => None,
            }
        };
        if let Some((factory, registration, service)) = released {
            factory.unget_service(consumer, &registration, service);
        }
        true
    }

    fn register_service(
        &self,
        owner: ModuleId,
        interfaces: &[String],
        object: ServiceObject,
        properties: Properties,
    ) -> RegistryResult<ServiceRegistration> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::RegistryClosed);
        }
        if interfaces.is_empty() {
            return Err(RegistryError::NoInterfaces);
        }
        let id = self.inner.next_service_id.fetch_add(1, Ordering::SeqCst);
        let reference = ServiceReference::new(id, owner, interfaces.to_vec(), properties);
        let control: Weak<dyn RegistrationControl> = self.inner.self_ref.clone();
        let registration = ServiceRegistration::new(reference.clone(), control);
        self.inner.services.lock().insert(
            id,
            Entry {
                reference: reference.clone(),
                registration: registration.clone(),
                object,
                factory_lock: Arc::new(ReentrantMutex::new(())),
                usage: HashMap::new(),
            },
        );
        self.inner.fire(ServiceEventKind::Registered, &reference);
        Ok(registration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(ServiceEventKind, u64)>>,
    }

    impl ServiceListener for Recorder {
        fn service_changed(&self, event: &ServiceEvent) {
            self.events.lock().push((event.kind, event.reference.id()));
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        produced: AtomicUsize,
        released: AtomicUsize,
    }

    impl crate::registry::ServiceFactory for CountingFactory {
        fn get_service(&self, consumer: ModuleId, _registration: &ServiceRegistration) -> Option<DynService> {
            self.produced.fetch_add(1, Ordering::SeqCst);
            Some(Arc::new(consumer.0))
        }

        fn unget_service(&self, _consumer: ModuleId, _registration: &ServiceRegistration, _service: DynService) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn listeners_see_register_modify_unregister() {
        let registry = InMemoryRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.add_listener(Filter::object_class("Foo"), recorder.clone());

        let registration = registry
            .register_service(ModuleId(1), &names(&["Foo"]), ServiceObject::Shared(Arc::new(1u8)), Properties::new())
            .unwrap();
        registry
            .register_service(ModuleId(1), &names(&["Bar"]), ServiceObject::Shared(Arc::new(2u8)), Properties::new())
            .unwrap();
        registration.set_properties(Properties::new());
        assert!(registration.unregister());
        assert!(!registration.unregister());

        let id = registration.reference().id();
        assert_eq!(
            recorder.events.lock().as_slice(),
            &[
                (ServiceEventKind::Registered, id),
                (ServiceEventKind::Modified, id),
                (ServiceEventKind::Unregistering, id)
            ]
        );
    }

    #[test]
    fn factory_is_called_once_per_consumer_and_ungot_on_last_release() {
        let registry = InMemoryRegistry::new();
        let factory = Arc::new(CountingFactory::default());
        let registration = registry
            .register_service(ModuleId(1), &names(&["Foo"]), ServiceObject::Factory(factory.clone()), Properties::new())
            .unwrap();
        let reference = registration.reference().clone();

        let a1 = registry.get_service(ModuleId(10), &reference).unwrap();
        let a2 = registry.get_service(ModuleId(10), &reference).unwrap();
        let b = registry.get_service(ModuleId(11), &reference).unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(factory.produced.load(Ordering::SeqCst), 2);

        assert!(registry.release_service(ModuleId(10), &reference));
        assert_eq!(factory.released.load(Ordering::SeqCst), 0);
        assert!(registry.release_service(ModuleId(10), &reference));
        assert_eq!(factory.released.load(Ordering::SeqCst), 1);
        assert!(!registry.release_service(ModuleId(10), &reference));

        registration.unregister();
        assert_eq!(factory.released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn lookup_orders_by_ranking_and_applies_filter() {
        let registry = InMemoryRegistry::new();
        let mut ranked = Properties::new();
        ranked.insert("service.ranking".into(), 5.into());
        ranked.insert("flavor".into(), "mint".into());
        let first = registry
            .register_service(ModuleId(1), &names(&["Foo"]), ServiceObject::Shared(Arc::new(())), Properties::new())
            .unwrap();
        let second = registry
            .register_service(ModuleId(1), &names(&["Foo"]), ServiceObject::Shared(Arc::new(())), ranked)
            .unwrap();

        let all = registry.lookup("Foo", None);
        assert_eq!(all, vec![second.reference().clone(), first.reference().clone()]);

        let filter = Filter::parse("(flavor=mint)").unwrap();
        assert_eq!(registry.lookup("Foo", Some(&filter)), vec![second.reference().clone()]);
        assert!(registry.lookup("Bar", None).is_empty());
    }

    #[test]
    fn closed_registry_rejects_registrations() {
        let registry = InMemoryRegistry::new();
        registry
            .register_service(ModuleId(1), &names(&["Foo"]), ServiceObject::Shared(Arc::new(())), Properties::new())
            .unwrap();
        registry.close();
        assert_eq!(registry.service_count(), 0);
        assert_eq!(
            registry
                .register_service(ModuleId(1), &names(&["Foo"]), ServiceObject::Shared(Arc::new(())), Properties::new())
                .unwrap_err(),
            RegistryError::RegistryClosed
        );
    }
}
