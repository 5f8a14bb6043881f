use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde_json::Value;

use crate::component::errors::InvocationError;
use crate::component::implementation::{BindArgument, ImplementationType, TypeSpace};
use crate::component::manager::{InstanceRecord, ManagerInner};
use crate::component::method::{resolve_binding, ResolvedMethod};
use crate::component::types::{ContextId, State};
use crate::metadata::DependencyDescriptor;
use crate::registry::{
    DynService, Filter, ListenerId, ModuleId, Properties, ServiceEvent, ServiceEventKind, ServiceListener,
    ServiceReference, ServiceRegistry,
};

struct Tracked {
    reference: ServiceReference,
    service: Option<DynService>,
}

struct Bound {
    reference: ServiceReference,
    service: Option<DynService>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BindOutcome {
    Bound,
    /// The registry could not produce the service; it is no longer tracked.
    Unavailable,
    Failed,
}

/// Tracks the services satisfying one declared reference of a component
/// and binds them into its instances.
pub(crate) struct DependencyTracker {
    descriptor: DependencyDescriptor,
    label: String,
    manager: Weak<ManagerInner>,
    registry: Arc<dyn ServiceRegistry>,
    module: ModuleId,
    implementation: Option<Arc<ImplementationType>>,
    types: Arc<TypeSpace>,
    listener: Mutex<Option<ListenerId>>,
    target: Mutex<Option<Filter>>,
    tracked: Mutex<BTreeMap<u64, Tracked>>,
    bound: Mutex<HashMap<ContextId, Vec<Bound>>>,
    bind_method: OnceCell<Option<ResolvedMethod>>,
    unbind_method: OnceCell<Option<ResolvedMethod>>,
    closed: AtomicBool,
}

/// Registry listener forwarding to a tracker without keeping it alive.
struct TrackerListener {
    tracker: Weak<DependencyTracker>,
}

impl ServiceListener for TrackerListener {
    fn service_changed(&self, event: &ServiceEvent) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.service_changed(event);
        }
    }
}

impl DependencyTracker {
    pub(crate) fn new(manager: &Arc<ManagerInner>, descriptor: DependencyDescriptor) -> Self {
        let env = manager.env();
        Self {
            label: format!("{} [{}]", manager.label(), descriptor.name()),
            descriptor,
            manager: Arc::downgrade(manager),
            registry: env.registry.clone(),
            module: env.module,
            implementation: manager.implementation(),
            types: env.types.clone(),
            listener: Mutex::new(None),
            target: Mutex::new(None),
            tracked: Mutex::new(BTreeMap::new()),
            bound: Mutex::new(HashMap::new()),
            bind_method: OnceCell::new(),
            unbind_method: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Starts listening and takes the initial snapshot of matching services.
    pub(crate) fn open(self: &Arc<Self>, properties: &Properties) {
        let target = self.effective_target(properties);
        *self.target.lock() = target.clone();

        let listener: Arc<dyn ServiceListener> = Arc::new(TrackerListener {
            tracker: Arc::downgrade(self),
        });
        let id = self
            .registry
            .add_listener(Filter::object_class(self.descriptor.interface()), listener);
        *self.listener.lock() = Some(id);

        let initial = self.registry.lookup(self.descriptor.interface(), target.as_ref());
        let mut tracked = self.tracked.lock();
        for reference in initial {
            tracked.entry(reference.id()).or_insert_with(|| Tracked {
                reference,
                service: None,
            });
        }
        log::debug!("{}: tracking {} service(s)", self.label, tracked.len());
    }

    /// Stops listening and releases every service handle. Idempotent.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(id) = self.listener.lock().take() {
            self.registry.remove_listener(id);
        }
        let drained = std::mem::take(&mut *self.tracked.lock());
        self.bound.lock().clear();
        for tracked in drained.into_values() {
            self.release(tracked);
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.descriptor.is_optional() || !self.tracked.lock().is_empty()
    }

    /// Applies a `<name>.target` override from freshly merged component
    /// properties, re-reading the registry if the filter changed.
    pub(crate) fn update_target(&self, properties: &Properties) {
        let target = self.effective_target(properties);
        {
            let mut current = self.target.lock();
            if *current == target {
                return;
            }
            *current = target.clone();
        }
        log::debug!(
            "{}: target filter is now {}",
            self.label,
            target.as_ref().map(ToString::to_string).unwrap_or_else(|| "<none>".to_string())
        );

        let fresh = self.registry.lookup(self.descriptor.interface(), target.as_ref());
        let fresh_ids: HashSet<u64> = fresh.iter().map(ServiceReference::id).collect();
        let mut released = Vec::new();
        {
            let mut tracked = self.tracked.lock();
            let stale: Vec<u64> = tracked
                .keys()
                .filter(|id| !fresh_ids.contains(id))
                .copied()
                .collect();
            for id in stale {
                if let Some(entry) = tracked.remove(&id) {
                    released.push(entry);
                }
            }
            for reference in fresh {
                tracked.entry(reference.id()).or_insert_with(|| Tracked {
                    reference,
                    service: None,
                });
            }
        }
        for entry in released {
            self.release(entry);
        }
    }

    /// Binds services into `record`. With no instance, reports whether the
    /// reference is satisfied.
    pub(crate) fn bind(&self, record: Option<&InstanceRecord>) -> bool {
        if !self.is_valid() {
            return false;
        }
        let Some(record) = record else {
            return true;
        };
        let context = record.context.id();
        let candidates = self.references();
        let mut bound_any = self.bound_count(context) > 0;
        if self.descriptor.is_multiple() {
            for reference in &candidates {
                if self.bind_reference(record, reference) == BindOutcome::Bound {
                    bound_any = true;
                }
            }
        } else if !bound_any {
            for candidate in &candidates {
                match self.bind_reference(record, candidate) {
                    BindOutcome::Bound => {
                        bound_any = true;
                        break;
                    }
                    BindOutcome::Unavailable => continue,
                    BindOutcome::Failed => break,
                }
            }
        }
        bound_any || self.descriptor.is_optional()
    }

    /// Unbinds everything bound into `record`.
    pub(crate) fn unbind(&self, record: &InstanceRecord) {
        let bound = self.bound.lock().remove(&record.context.id()).unwrap_or_default();
        for entry in bound {
            let reference_id = entry.reference.id();
            self.invoke_unbind(record, entry);
            self.release_if_unbound(reference_id);
        }
    }

    pub(crate) fn locate_service(&self) -> Option<DynService> {
        let best = self.references().into_iter().next()?;
        self.resolve_service(&best)
    }

    pub(crate) fn locate_services(&self) -> Vec<DynService> {
        self.references()
            .iter()
            .filter_map(|reference| self.resolve_service(reference))
            .collect()
    }

    /// Tracked references, best-ranked first.
    pub(crate) fn references(&self) -> Vec<ServiceReference> {
        let mut references: Vec<ServiceReference> = self
            .tracked
            .lock()
            .values()
            .map(|tracked| tracked.reference.clone())
            .collect();
        references.sort_by(|a, b| a.rank_cmp(b));
        references
    }

    pub(crate) fn bound_references(&self) -> Vec<ServiceReference> {
        let bound = self.bound.lock();
        let mut seen = HashSet::new();
        let mut references: Vec<ServiceReference> = bound
            .values()
            .flatten()
            .filter(|entry| seen.insert(entry.reference.id()))
            .map(|entry| entry.reference.clone())
            .collect();
        references.sort_by(|a, b| a.rank_cmp(b));
        references
    }

    pub(crate) fn target(&self) -> Option<String> {
        self.target.lock().as_ref().map(ToString::to_string)
    }

    fn service_changed(&self, event: &ServiceEvent) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        let _transition = manager.lock_transition();
        if self.closed.load(Ordering::SeqCst) || !manager.state().handles_events() {
            return;
        }
        match event.kind {
            ServiceEventKind::Registered => self.service_added(&manager, &event.reference),
            ServiceEventKind::Modified => {
                self.service_removed(&manager, &event.reference);
                if !self.closed.load(Ordering::SeqCst) && manager.state().handles_events() {
                    self.service_added(&manager, &event.reference);
                }
            }
            ServiceEventKind::Unregistering => self.service_removed(&manager, &event.reference),
        }
    }

    fn service_added(&self, manager: &ManagerInner, reference: &ServiceReference) {
        if !self.matches_target(reference) {
            return;
        }
        {
            let mut tracked = self.tracked.lock();
            if tracked.contains_key(&reference.id()) {
                return;
            }
            tracked.insert(
                reference.id(),
                Tracked {
                    reference: reference.clone(),
                    service: None,
                },
            );
        }
        log::debug!("{}: added {}", self.label, reference);

        let state = manager.state();
        if state == State::Unsatisfied {
            manager.activate_locked();
        } else if (state == State::Activating || state.is_satisfied()) && !self.descriptor.is_static() {
            for record in manager.live_instances() {
                let context = record.context.id();
                if self.descriptor.is_multiple() || self.bound_count(context) == 0 {
                    if self.bind_reference(&record, reference) == BindOutcome::Unavailable {
                        break;
                    }
                }
            }
        }
    }

    fn service_removed(&self, manager: &ManagerInner, reference: &ServiceReference) {
        let Some(removed) = self.tracked.lock().remove(&reference.id()) else {
            return;
        };
        log::debug!("{}: removed {}", self.label, reference);

        let state = manager.state();
        if state == State::Activating || state.is_satisfied() {
            let contexts = self.contexts_bound_to(reference.id());
            if !self.is_valid() {
                log::info!("{}: no service left for a mandatory reference", self.label);
                manager.reactivate_locked();
            } else if !contexts.is_empty() {
                if self.descriptor.is_static() {
                    manager.reactivate_locked();
                } else {
                    for context in contexts {
                        let Some(record) = manager.instance(context) else {
                            self.forget(context, reference.id());
                            continue;
                        };
                        let remaining = self.unbind_reference(&record, reference.id());
                        if remaining == 0 && !self.bind(Some(&*record)) {
                            manager.reactivate_locked();
                            break;
                        }
                    }
                }
            }
        }
        self.release(removed);
    }

    fn bind_reference(&self, record: &InstanceRecord, reference: &ServiceReference) -> BindOutcome {
        let context = record.context.id();
        if self.is_bound(context, reference.id()) {
            return BindOutcome::Bound;
        }
        let service = match self.descriptor.bind_method() {
            None => None,
            Some(name) => {
                let resolved = self.bind_method.get_or_init(|| self.resolve(name));
                let Some(method) = resolved else {
                    log::warn!("{}: bind method {} not found", self.label, name);
                    return BindOutcome::Failed;
                };
                let Some((argument, service)) = self.argument_for(method, reference) else {
                    let err = InvocationError::ServiceUnavailable {
                        reference: reference.to_string(),
                    };
                    log::warn!("{}: {}; no longer tracking it", self.label, err);
                    self.untrack(reference.id());
                    return BindOutcome::Unavailable;
                };
                if let Err(err) = method.invoke(&record.instance, &argument) {
                    log::warn!("{}: {} failed for {}: {}", self.label, method.name(), reference, err);
                    if service.is_some() {
                        self.release_if_unbound(reference.id());
                    }
                    return BindOutcome::Failed;
                }
                service
            }
        };
        self.bound.lock().entry(context).or_default().push(Bound {
            reference: reference.clone(),
            service,
        });
        BindOutcome::Bound
    }

    /// Unbinds one reference from `record`; returns how many stay bound.
    fn unbind_reference(&self, record: &InstanceRecord, reference_id: u64) -> usize {
        let (entry, remaining) = {
            let mut bound = self.bound.lock();
            let Some(list) = bound.get_mut(&record.context.id()) else {
                return 0;
            };
            let entry = list
                .iter()
                .position(|entry| entry.reference.id() == reference_id)
                .map(|index| list.remove(index));
            (entry, list.len())
        };
        if let Some(entry) = entry {
            self.invoke_unbind(record, entry);
            self.release_if_unbound(reference_id);
        }
        remaining
    }

    fn invoke_unbind(&self, record: &InstanceRecord, entry: Bound) {
        let Some(name) = self.descriptor.unbind_method() else {
            return;
        };
        let resolved = self.unbind_method.get_or_init(|| self.resolve(name));
        let Some(method) = resolved else {
            log::warn!("{}: unbind method {} not found", self.label, name);
            return;
        };
        let argument = if method.wants_service() {
            match entry.service.clone().or_else(|| self.resolve_service(&entry.reference)) {
                Some(service) => BindArgument::Service(service),
                None => {
                    log::warn!("{}: cannot unbind {}, service object gone", self.label, entry.reference);
                    return;
                }
            }
        } else {
            BindArgument::Reference(entry.reference.clone())
        };
        if let Err(err) = method.invoke(&record.instance, &argument) {
            log::warn!("{}: {} failed for {}: {}", self.label, method.name(), entry.reference, err);
        }
    }

    fn argument_for(
        &self,
        method: &ResolvedMethod,
        reference: &ServiceReference,
    ) -> Option<(BindArgument, Option<DynService>)> {
        if method.wants_service() {
            let service = self.resolve_service(reference)?;
            Some((BindArgument::Service(service.clone()), Some(service)))
        } else {
            Some((BindArgument::Reference(reference.clone()), None))
        }
    }

    fn resolve(&self, name: &str) -> Option<ResolvedMethod> {
        let implementation = self.implementation.as_ref()?;
        resolve_binding(implementation, name, self.descriptor.interface(), &self.types)
    }

    /// The service object for a tracked reference, fetched from the
    /// registry at most once while the reference stays tracked.
    fn resolve_service(&self, reference: &ServiceReference) -> Option<DynService> {
        {
            let tracked = self.tracked.lock();
            let entry = tracked.get(&reference.id())?;
            if let Some(service) = &entry.service {
                return Some(service.clone());
            }
        }

        let service = self.registry.get_service(self.module, reference)?;
        let mut tracked = self.tracked.lock();
        match tracked.get_mut(&reference.id()) {
            Some(entry) if entry.service.is_none() => {
                entry.service = Some(service.clone());
                Some(service)
            }
            Some(entry) => {
                let existing = entry.service.clone();
                drop(tracked);
                // Another thread resolved it first; give back our extra use.
                self.registry.release_service(self.module, reference);
                existing
            }
            None => {
                drop(tracked);
                self.registry.release_service(self.module, reference);
                None
            }
        }
    }

    /// Gives the registry use of a tracked service back once no instance
    /// has it bound; the next bind fetches it again.
    fn release_if_unbound(&self, reference_id: u64) {
        let still_bound = self
            .bound
            .lock()
            .values()
            .flatten()
            .any(|entry| entry.reference.id() == reference_id);
        if still_bound {
            return;
        }
        let released = self.tracked.lock().get_mut(&reference_id).and_then(|entry| {
            entry.service.take().map(|_| entry.reference.clone())
        });
        if let Some(reference) = released {
            self.registry.release_service(self.module, &reference);
        }
    }

    /// Forgets a reference whose service the registry could not produce.
    fn untrack(&self, reference_id: u64) {
        let removed = self.tracked.lock().remove(&reference_id);
        if let Some(removed) = removed {
            self.release(removed);
        }
    }

    fn release(&self, tracked: Tracked) {
        if tracked.service.is_some() {
            self.registry.release_service(self.module, &tracked.reference);
        }
    }

    fn matches_target(&self, reference: &ServiceReference) -> bool {
        match &*self.target.lock() {
            Some(filter) => reference.matches(filter),
            None => true,
        }
    }

    fn effective_target(&self, properties: &Properties) -> Option<Filter> {
        let declared = self.descriptor.target().map(str::to_string);
        let raw = match properties.get(&self.descriptor.target_property()) {
            Some(Value::String(text)) => Some(text.clone()),
            Some(other) => {
                log::warn!("{}: ignoring non-string target override {}", self.label, other);
                declared.clone()
            }
            None => declared.clone(),
        };
        let text = raw?;
        match Filter::parse(&text) {
            Ok(filter) => Some(filter),
            Err(err) => {
                log::error!("{}: invalid target filter {}: {}", self.label, text, err);
                declared.and_then(|text| Filter::parse(&text).ok())
            }
        }
    }

    fn is_bound(&self, context: ContextId, reference_id: u64) -> bool {
        self.bound
            .lock()
            .get(&context)
            .is_some_and(|list| list.iter().any(|entry| entry.reference.id() == reference_id))
    }

    fn bound_count(&self, context: ContextId) -> usize {
        self.bound.lock().get(&context).map_or(0, Vec::len)
    }

    fn contexts_bound_to(&self, reference_id: u64) -> Vec<ContextId> {
        self.bound
            .lock()
            .iter()
            .filter(|(_, list)| list.iter().any(|entry| entry.reference.id() == reference_id))
            .map(|(context, _)| *context)
            .collect()
    }

    fn forget(&self, context: ContextId, reference_id: u64) {
        if let Some(list) = self.bound.lock().get_mut(&context) {
            list.retain(|entry| entry.reference.id() != reference_id);
        }
    }
}
