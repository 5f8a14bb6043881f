use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::registry::constants::{OBJECT_CLASS, SERVICE_ID, SERVICE_RANKING};
use crate::registry::filter::Filter;

/// Type-erased service or component instance.
pub type DynService = Arc<dyn Any + Send + Sync>;

/// Property dictionary attached to services and components.
pub type Properties = Map<String, Value>;

/// Identity of a deployable module (the owner of components, and the
/// consumer identity used when services are fetched).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModuleId(pub u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceEventKind {
    Registered,
    Modified,
    Unregistering,
}

#[derive(Clone, Debug)]
pub struct ServiceEvent {
    pub kind: ServiceEventKind,
    pub reference: ServiceReference,
}

impl ServiceEvent {
    pub fn new(kind: ServiceEventKind, reference: ServiceReference) -> Self {
        Self { kind, reference }
    }
}

/// Handle to a registered service. Cheap to clone; equality is by service id.
#[derive(Clone)]
pub struct ServiceReference {
    inner: Arc<ReferenceInner>,
}

struct ReferenceInner {
    id: u64,
    owner: ModuleId,
    interfaces: Vec<String>,
    properties: RwLock<Properties>,
}

impl ServiceReference {
    /// Builds a reference; `objectClass` and `service.id` are stamped into
    /// the properties so filters can match on them.
    pub fn new(id: u64, owner: ModuleId, interfaces: Vec<String>, mut properties: Properties) -> Self {
        properties.insert(
            OBJECT_CLASS.to_string(),
            Value::Array(interfaces.iter().cloned().map(Value::String).collect()),
        );
        properties.insert(SERVICE_ID.to_string(), Value::from(id));
        Self {
            inner: Arc::new(ReferenceInner {
                id,
                owner,
                interfaces,
                properties: RwLock::new(properties),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn owner(&self) -> ModuleId {
        self.inner.owner
    }

    pub fn interfaces(&self) -> &[String] {
        &self.inner.interfaces
    }

    pub fn provides(&self, interface: &str) -> bool {
        self.inner.interfaces.iter().any(|name| name == interface)
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        self.inner.properties.read().get(key).cloned()
    }

    pub fn properties(&self) -> Properties {
        self.inner.properties.read().clone()
    }

    /// `service.ranking`, defaulting to 0 when absent or not an integer.
    pub fn ranking(&self) -> i64 {
        self.inner
            .properties
            .read()
            .get(SERVICE_RANKING)
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    pub fn matches(&self, filter: &Filter) -> bool {
        filter.matches(&self.inner.properties.read())
    }

    /// Ordering used to pick among several candidates: the highest ranking
    /// comes first, ties go to the lowest service id.
    pub fn rank_cmp(&self, other: &ServiceReference) -> Ordering {
        other
            .ranking()
            .cmp(&self.ranking())
            .then_with(|| self.id().cmp(&other.id()))
    }

    pub fn outranks(&self, other: &ServiceReference) -> bool {
        self.rank_cmp(other) == Ordering::Less
    }

    pub(crate) fn replace_properties(&self, mut properties: Properties) {
        let mut guard = self.inner.properties.write();
        properties.insert(
            OBJECT_CLASS.to_string(),
            guard.get(OBJECT_CLASS).cloned().unwrap_or(Value::Null),
        );
        properties.insert(SERVICE_ID.to_string(), Value::from(self.inner.id));
        *guard = properties;
    }
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ServiceReference {}

impl Hash for ServiceReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("id", &self.inner.id)
            .field("interfaces", &self.inner.interfaces)
            .field("ranking", &self.ranking())
            .finish()
    }
}

impl fmt::Display for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.inner.interfaces.join(","), self.inner.id)
    }
}

/// Receives registry events for services matching the listener's filter.
pub trait ServiceListener: Send + Sync {
    fn service_changed(&self, event: &ServiceEvent);
}

/// A service object produced per consumer module.
pub trait ServiceFactory: Send + Sync {
    fn get_service(&self, consumer: ModuleId, registration: &ServiceRegistration) -> Option<DynService>;

    fn unget_service(&self, consumer: ModuleId, registration: &ServiceRegistration, service: DynService);
}

/// What gets published: a shared object or a per-consumer factory.
#[derive(Clone)]
pub enum ServiceObject {
    Shared(DynService),
    Factory(Arc<dyn ServiceFactory>),
}

impl fmt::Debug for ServiceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceObject::Shared(_) => f.write_str("ServiceObject::Shared"),
            ServiceObject::Factory(_) => f.write_str("ServiceObject::Factory"),
        }
    }
}

/// Backend operations a registration handle forwards to.
pub trait RegistrationControl: Send + Sync {
    fn update_properties(&self, reference: &ServiceReference, properties: Properties);

    fn unregister(&self, reference: &ServiceReference) -> bool;
}

/// Handle returned by [`ServiceRegistry::register_service`].
#[derive(Clone)]
pub struct ServiceRegistration {
    reference: ServiceReference,
    control: Weak<dyn RegistrationControl>,
}

impl ServiceRegistration {
    pub fn new(reference: ServiceReference, control: Weak<dyn RegistrationControl>) -> Self {
        Self { reference, control }
    }

    pub fn reference(&self) -> &ServiceReference {
        &self.reference
    }

    /// Replaces the service properties and emits a MODIFIED event.
    pub fn set_properties(&self, properties: Properties) {
        if let Some(control) = self.control.upgrade() {
            control.update_properties(&self.reference, properties);
        }
    }

    /// Returns `false` if the service was already gone.
    pub fn unregister(&self) -> bool {
        match self.control.upgrade() {
            Some(control) => control.unregister(&self.reference),
            None => false,
        }
    }
}

impl fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("reference", &self.reference)
            .finish()
    }
}

/// The host's service registry, consumed through this narrow interface.
pub trait ServiceRegistry: Send + Sync {
    fn add_listener(&self, filter: Filter, listener: Arc<dyn ServiceListener>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);

    /// Snapshot of registered references providing `interface` and matching
    /// `filter`, best-ranked first.
    fn lookup(&self, interface: &str, filter: Option<&Filter>) -> Vec<ServiceReference>;

    fn get_service(&self, consumer: ModuleId, reference: &ServiceReference) -> Option<DynService>;

    /// Returns `false` if `consumer` held no use of the service.
    fn release_service(&self, consumer: ModuleId, reference: &ServiceReference) -> bool;

    fn register_service(
        &self,
        owner: ModuleId,
        interfaces: &[String],
        object: ServiceObject,
        properties: Properties,
    ) -> crate::registry::RegistryResult<ServiceRegistration>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reference(id: u64, ranking: Option<i64>) -> ServiceReference {
        let mut props = Properties::new();
        if let Some(ranking) = ranking {
            props.insert(SERVICE_RANKING.to_string(), json!(ranking));
        }
        ServiceReference::new(id, ModuleId(1), vec!["Foo".to_string()], props)
    }

    #[test]
    fn higher_ranking_wins_then_lower_id() {
        let low = reference(1, None);
        let high = reference(2, Some(10));
        let older_peer = reference(3, Some(10));
        assert!(high.outranks(&low));
        assert!(high.outranks(&older_peer));
        assert!(!older_peer.outranks(&high));

        let mut refs = vec![low.clone(), older_peer.clone(), high.clone()];
        refs.sort_by(|a, b| a.rank_cmp(b));
        assert_eq!(refs, vec![high, older_peer, low]);
    }

    #[test]
    fn replace_properties_keeps_identity_keys() {
        let reference = reference(7, Some(3));
        reference.replace_properties(Properties::new());
        assert_eq!(reference.property(SERVICE_ID), Some(json!(7)));
        assert_eq!(reference.property(OBJECT_CLASS), Some(json!(["Foo"])));
        assert_eq!(reference.ranking(), 0);
    }
}
