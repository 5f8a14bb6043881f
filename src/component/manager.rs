use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use serde_json::Value;

use crate::component::constants::{COMPONENT_ID, COMPONENT_NAME};
use crate::component::context::ComponentContext;
use crate::component::dependency::DependencyTracker;
use crate::component::errors::{ComponentError, ComponentResult, InvocationError};
use crate::component::implementation::{ImplementationType, TypeSpace};
use crate::component::method::guarded;
use crate::component::types::{ContextId, State, StateChange};
use crate::component::variant::{ComponentFactory, Variant};
use crate::config::{ConfigurationPolicy, ConfigurationSource};
use crate::metadata::ComponentDescriptor;
use crate::registry::{DynService, ModuleId, Properties, ServiceReference, ServiceRegistration, ServiceRegistry};
use crate::runtime::ComponentActivator;
use crate::util::subscribe::{ObserverSet, Unsubscribe};

/// Collaborators shared by every component of one module.
#[derive(Clone)]
pub(crate) struct ComponentEnv {
    pub(crate) module: ModuleId,
    pub(crate) registry: Arc<dyn ServiceRegistry>,
    pub(crate) configuration: Arc<dyn ConfigurationSource>,
    pub(crate) types: Arc<TypeSpace>,
}

/// One live implementation object and its private context.
pub(crate) struct InstanceRecord {
    pub(crate) context: ComponentContext,
    pub(crate) instance: DynService,
}

/// Drives the lifecycle of a single declared component.
///
/// Every state transition runs under a per-component reentrant lock, so a
/// user callback that re-enters the manager on the same thread proceeds
/// while other threads wait. After any call that can run user code the
/// state is re-checked before continuing.
#[derive(Clone)]
pub struct ComponentManager {
    inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    self_ref: Weak<ManagerInner>,
    id: u64,
    descriptor: Arc<ComponentDescriptor>,
    env: ComponentEnv,
    activator: RwLock<Weak<ComponentActivator>>,
    variant: Variant,
    transition: ReentrantMutex<()>,
    state: Mutex<State>,
    trackers: Mutex<Vec<Arc<DependencyTracker>>>,
    instances: Mutex<BTreeMap<ContextId, Arc<InstanceRecord>>>,
    registration: Mutex<Option<ServiceRegistration>>,
    properties: RwLock<Properties>,
    next_context: AtomicU64,
    observers: ObserverSet<StateChange>,
}

impl ComponentManager {
    pub(crate) fn new(id: u64, descriptor: Arc<ComponentDescriptor>, activator: &Arc<ComponentActivator>) -> Self {
        let env = activator.component_env();
        let variant = Variant::for_kind(descriptor.kind());
        let inner = Arc::new_cyclic(|self_ref| ManagerInner {
            self_ref: self_ref.clone(),
            id,
            descriptor,
            env,
            activator: RwLock::new(Arc::downgrade(activator)),
            variant,
            transition: ReentrantMutex::new(()),
            state: Mutex::new(State::Disabled),
            trackers: Mutex::new(Vec::new()),
            instances: Mutex::new(BTreeMap::new()),
            registration: Mutex::new(None),
            properties: RwLock::new(Properties::new()),
            next_context: AtomicU64::new(1),
            observers: ObserverSet::new(),
        });
        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn descriptor(&self) -> &ComponentDescriptor {
        &self.inner.descriptor
    }

    pub fn module(&self) -> ModuleId {
        self.inner.env.module
    }

    pub fn state(&self) -> State {
        self.inner.state()
    }

    /// Moves a disabled component to enabled and attempts activation.
    ///
    /// Returns an error only for a destroyed component; calling it on an
    /// enabled component does nothing.
    pub fn enable(&self) -> ComponentResult<()> {
        let _transition = self.inner.lock_transition();
        self.inner.enable_locked()
    }

    pub fn activate(&self) {
        let _transition = self.inner.lock_transition();
        self.inner.activate_locked();
    }

    pub fn deactivate(&self) {
        let _transition = self.inner.lock_transition();
        self.inner.deactivate_locked();
    }

    pub fn reactivate(&self) {
        let _transition = self.inner.lock_transition();
        self.inner.reactivate_locked();
    }

    /// Deactivates and stops tracking dependencies. Idempotent.
    pub fn disable(&self) {
        let _transition = self.inner.lock_transition();
        self.inner.disable_locked();
    }

    /// Disables and destroys the component for good. Idempotent.
    pub fn dispose(&self) {
        let _transition = self.inner.lock_transition();
        self.inner.dispose_locked();
    }

    /// Re-reads configuration by cycling activation, unless the component
    /// ignores configuration.
    pub fn reconfigure(&self) {
        let _transition = self.inner.lock_transition();
        self.inner.reconfigure_locked();
    }

    /// Subscribes to state transitions. Callbacks run on the thread making
    /// the transition, with the component's lock held.
    pub fn on_state_change<F>(&self, callback: F) -> Unsubscribe
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(callback)
    }

    /// The single implementation object of an immediate or delayed
    /// component, if one currently exists.
    pub fn instance(&self) -> Option<DynService> {
        self.inner.primary_instance().map(|record| record.instance.clone())
    }

    pub fn instance_count(&self) -> usize {
        self.inner.instances.lock().len()
    }

    pub fn service_reference(&self) -> Option<ServiceReference> {
        self.inner
            .registration
            .lock()
            .as_ref()
            .map(|registration| registration.reference().clone())
    }

    /// Properties merged at the last activation.
    pub fn properties(&self) -> Properties {
        self.inner.properties.read().clone()
    }

    /// Direct handle to the factory of a factory component.
    pub fn component_factory(&self) -> Option<ComponentFactory> {
        self.inner
            .descriptor
            .factory()
            .map(|_| ComponentFactory::new(self.inner.self_ref.clone()))
    }

    pub(crate) fn trackers(&self) -> Vec<Arc<DependencyTracker>> {
        self.inner.trackers()
    }
}

impl fmt::Debug for ComponentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentManager")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name())
            .field("state", &self.inner.state())
            .finish()
    }
}

impl ManagerInner {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub(crate) fn label(&self) -> String {
        format!("{} ({})", self.descriptor.name(), self.id)
    }

    pub(crate) fn env(&self) -> &ComponentEnv {
        &self.env
    }

    pub(crate) fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    pub(crate) fn variant(&self) -> &Variant {
        &self.variant
    }

    pub(crate) fn weak(&self) -> Weak<ManagerInner> {
        self.self_ref.clone()
    }

    pub(crate) fn implementation(&self) -> Option<Arc<ImplementationType>> {
        self.env.types.get(self.descriptor.implementation())
    }

    pub(crate) fn activator(&self) -> Option<Arc<ComponentActivator>> {
        self.activator.read().upgrade()
    }

    pub(crate) fn lock_transition(&self) -> ReentrantMutexGuard<'_, ()> {
        self.transition.lock()
    }

    pub(crate) fn state(&self) -> State {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, to: State) {
        let from = std::mem::replace(&mut *self.state.lock(), to);
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            log::warn!("{}: unexpected transition {} -> {}", self.label(), from, to);
        }
        log::debug!("{}: {} -> {}", self.label(), from, to);
        self.observers.notify(&StateChange {
            from,
            to,
            at: Utc::now(),
        });
    }

    /// Moves to `to` only from one of `allowed`. Callers hold the
    /// transition lock, so the check and the move are not interleaved with
    /// other transitions.
    fn set_state_if(&self, allowed: &[State], to: State) -> bool {
        let current = self.state();
        if !allowed.contains(&current) {
            return false;
        }
        self.set_state(to);
        true
    }

    pub(crate) fn trackers(&self) -> Vec<Arc<DependencyTracker>> {
        self.trackers.lock().clone()
    }

    pub(crate) fn tracker(&self, name: &str) -> Option<Arc<DependencyTracker>> {
        self.trackers
            .lock()
            .iter()
            .find(|tracker| tracker.name() == name)
            .cloned()
    }

    pub(crate) fn instance(&self, context: ContextId) -> Option<Arc<InstanceRecord>> {
        self.instances.lock().get(&context).cloned()
    }

    pub(crate) fn live_instances(&self) -> Vec<Arc<InstanceRecord>> {
        self.instances.lock().values().cloned().collect()
    }

    pub(crate) fn primary_instance(&self) -> Option<Arc<InstanceRecord>> {
        self.instances.lock().values().next().cloned()
    }

    fn enable_locked(&self) -> ComponentResult<()> {
        match self.state() {
            State::Destroyed => {
                return Err(ComponentError::Destroyed {
                    component: self.label(),
                })
            }
            State::Disabled => {}
            state => {
                log::debug!("{}: already enabled ({})", self.label(), state);
                return Ok(());
            }
        }
        let Some(this) = self.self_ref.upgrade() else {
            return Err(ComponentError::Destroyed {
                component: self.label(),
            });
        };

        let properties = self
            .compute_properties()
            .unwrap_or_else(|| self.identity_properties(self.descriptor.properties().clone()));
        let trackers: Vec<Arc<DependencyTracker>> = self
            .descriptor
            .dependencies()
            .iter()
            .map(|dependency| Arc::new(DependencyTracker::new(&this, dependency.clone())))
            .collect();
        for tracker in &trackers {
            tracker.open(&properties);
        }
        *self.trackers.lock() = trackers;

        self.set_state(State::Enabled);
        log::info!("{}: enabled", self.label());
        self.activate_locked();
        Ok(())
    }

    pub(crate) fn activate_locked(&self) {
        if !self.set_state_if(&[State::Enabled, State::Unsatisfied], State::Activating) {
            return;
        }
        if !self.activator().is_some_and(|activator| activator.is_active()) {
            log::debug!("{}: module is not active; not activating", self.label());
            self.set_state(State::Unsatisfied);
            return;
        }
        let Some(properties) = self.compute_properties() else {
            log::info!("{}: configuration required but not available", self.label());
            self.set_state(State::Unsatisfied);
            return;
        };
        *self.properties.write() = properties.clone();

        let trackers = self.trackers();
        for tracker in &trackers {
            tracker.update_target(&properties);
        }
        if let Some(unsatisfied) = trackers.iter().find(|tracker| !tracker.is_valid()) {
            log::info!("{}: reference {} is not satisfied", self.label(), unsatisfied.name());
            self.set_state(State::Unsatisfied);
            return;
        }

        if !self.variant.create_component(self) {
            if self.state() == State::Activating {
                log::error!("{}: failed to create the component", self.label());
                self.set_state(State::Unsatisfied);
            }
            return;
        }
        if self.state() != State::Activating {
            log::debug!("{}: state changed during activation", self.label());
            return;
        }

        self.set_state(self.variant.satisfied_state());
        self.register_service();
        log::info!("{}: activated", self.label());
    }

    pub(crate) fn deactivate_locked(&self) {
        if !self.set_state_if(
            &[State::Activating, State::Active, State::Registered, State::Factory],
            State::Deactivating,
        ) {
            return;
        }
        self.unregister_service();
        self.variant.delete_component(self);
        self.set_state(State::Unsatisfied);
        log::info!("{}: deactivated", self.label());
    }

    pub(crate) fn reactivate_locked(&self) {
        self.deactivate_locked();
        self.activate_locked();
    }

    fn disable_locked(&self) {
        if matches!(self.state(), State::Disabled | State::Destroyed) {
            return;
        }
        self.deactivate_locked();
        let trackers = std::mem::take(&mut *self.trackers.lock());
        for tracker in trackers {
            tracker.close();
        }
        self.set_state(State::Disabled);
        log::info!("{}: disabled", self.label());
    }

    fn dispose_locked(&self) {
        if self.state() == State::Destroyed {
            return;
        }
        self.disable_locked();
        self.set_state(State::Destroyed);
        *self.activator.write() = Weak::new();
        log::info!("{}: disposed", self.label());
    }

    fn reconfigure_locked(&self) {
        if self.descriptor.configuration_policy() == ConfigurationPolicy::Ignore {
            return;
        }
        if matches!(self.state(), State::Disabled | State::Enabled | State::Destroyed) {
            return;
        }
        log::debug!("{}: configuration changed", self.label());
        self.reactivate_locked();
    }

    /// Static properties overlaid with configuration and then the
    /// component's identity. `None` when configuration is required but
    /// missing.
    fn compute_properties(&self) -> Option<Properties> {
        let mut properties = self.descriptor.properties().clone();
        let policy = self.descriptor.configuration_policy();
        if policy != ConfigurationPolicy::Ignore {
            match self.env.configuration.configuration(self.name()) {
                Some(configuration) => properties.extend(configuration),
                None if policy == ConfigurationPolicy::Require => return None,
                None => {}
            }
        }
        Some(self.identity_properties(properties))
    }

    fn identity_properties(&self, mut properties: Properties) -> Properties {
        properties.insert(COMPONENT_NAME.to_string(), Value::from(self.name()));
        properties.insert(COMPONENT_ID.to_string(), Value::from(self.id));
        properties
    }

    /// Component properties without the private `.`-prefixed keys.
    pub(crate) fn service_properties(&self) -> Properties {
        self.properties
            .read()
            .iter()
            .filter(|(key, _)| !key.starts_with('.'))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Constructs, binds and activates one implementation object.
    ///
    /// The record is visible to the manager while binding so a reentrant
    /// deactivation can unwind it. Gives up if the state leaves `expected`.
    pub(crate) fn create_instance(
        &self,
        using_module: Option<ModuleId>,
        extra: Option<&Properties>,
        expected: State,
    ) -> Option<Arc<InstanceRecord>> {
        let this = self.self_ref.upgrade()?;
        let Some(implementation) = self.implementation() else {
            let err = InvocationError::TypeNotFound {
                type_name: self.descriptor.implementation().to_string(),
            };
            log::error!("{}: {}", self.label(), err);
            return None;
        };
        let instance = match guarded(|| implementation.construct()) {
            Ok(instance) => instance,
            Err(err) => {
                log::error!("{}: cannot construct {}: {}", self.label(), implementation.name(), err);
                return None;
            }
        };

        let mut properties = self.properties.read().clone();
        if let Some(extra) = extra {
            properties.extend(extra.iter().map(|(key, value)| (key.clone(), value.clone())));
        }
        let context_id = ContextId(self.next_context.fetch_add(1, Ordering::SeqCst));
        let record = Arc::new(InstanceRecord {
            context: ComponentContext::new(context_id, &this, properties, using_module),
            instance,
        });
        self.instances.lock().insert(context_id, record.clone());

        for tracker in self.trackers() {
            let bound = tracker.bind(Some(&*record));
            if self.state() != expected {
                log::debug!("{}: state changed while binding; dropping instance", self.label());
                self.discard_instance(&record);
                return None;
            }
            if !bound {
                log::warn!("{}: cannot bind reference {}", self.label(), tracker.name());
                self.discard_instance(&record);
                return None;
            }
        }

        let activate = self.descriptor.activate_method();
        match implementation.lifecycle_method(activate) {
            Some(method) => {
                if let Err(err) = guarded(|| method(&record.instance, &record.context)) {
                    log::warn!("{}: {} failed: {}", self.label(), activate, err);
                }
            }
            None => log::debug!("{}: no {} method", self.label(), activate),
        }

        if !self.instances.lock().contains_key(&context_id) {
            return None;
        }
        if self.state() != expected {
            self.destroy_instance(&record);
            return None;
        }
        Some(record)
    }

    /// Deactivates and unbinds a live instance. Does nothing when the
    /// instance was already destroyed.
    pub(crate) fn destroy_instance(&self, record: &Arc<InstanceRecord>) {
        if self.instances.lock().remove(&record.context.id()).is_none() {
            return;
        }
        let deactivate = self.descriptor.deactivate_method();
        if let Some(method) = self
            .implementation()
            .and_then(|implementation| implementation.lifecycle_method(deactivate))
        {
            if let Err(err) = guarded(|| method(&record.instance, &record.context)) {
                log::warn!("{}: {} failed: {}", self.label(), deactivate, err);
            }
        }
        for tracker in self.trackers() {
            tracker.unbind(record);
        }
    }

    /// Unwinds an instance whose activation never completed.
    fn discard_instance(&self, record: &Arc<InstanceRecord>) {
        self.instances.lock().remove(&record.context.id());
        for tracker in self.trackers() {
            tracker.unbind(record);
        }
    }

    fn register_service(&self) {
        if let Some(service) = self.descriptor.service() {
            if let Some(object) = self.variant.service_object(self) {
                match self.env.registry.register_service(
                    self.env.module,
                    service.interfaces(),
                    object,
                    self.service_properties(),
                ) {
                    Ok(registration) => {
                        let stale = {
                            let mut slot = self.registration.lock();
                            if self.state().is_satisfied() && slot.is_none() {
                                *slot = Some(registration);
                                None
                            } else {
                                Some(registration)
                            }
                        };
                        if let Some(stale) = stale {
                            stale.unregister();
                        }
                    }
                    Err(err) => log::error!("{}: cannot register service: {}", self.label(), err),
                }
            }
        }
        self.variant.register_factory(self);
    }

    fn unregister_service(&self) {
        self.variant.unregister_factory();
        let registration = self.registration.lock().take();
        if let Some(registration) = registration {
            registration.unregister();
        }
    }
}
