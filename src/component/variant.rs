use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use crate::component::constants::{COMPONENT_FACTORY, COMPONENT_FACTORY_SERVICE, COMPONENT_NAME};
use crate::component::context::ComponentContext;
use crate::component::errors::{ComponentError, ComponentResult};
use crate::component::manager::{InstanceRecord, ManagerInner};
use crate::component::types::State;
use crate::metadata::ComponentKind;
use crate::registry::{DynService, ModuleId, Properties, ServiceFactory, ServiceObject, ServiceRegistration};

/// Behaviour that differs between immediate, delayed and factory
/// components.
pub(crate) enum Variant {
    Immediate,
    Delayed {
        consumers: Mutex<HashSet<ModuleId>>,
    },
    Factory {
        factory_registration: Mutex<Option<ServiceRegistration>>,
    },
}

impl Variant {
    pub(crate) fn for_kind(kind: ComponentKind) -> Self {
        match kind {
            ComponentKind::Immediate => Variant::Immediate,
            ComponentKind::Delayed => Variant::Delayed {
                consumers: Mutex::new(HashSet::new()),
            },
            ComponentKind::Factory => Variant::Factory {
                factory_registration: Mutex::new(None),
            },
        }
    }

    pub(crate) fn satisfied_state(&self) -> State {
        match self {
            Variant::Immediate => State::Active,
            Variant::Delayed { .. } => State::Registered,
            Variant::Factory { .. } => State::Factory,
        }
    }

    /// Immediate components get their one instance now; the others only
    /// confirm their references are satisfied.
    pub(crate) fn create_component(&self, manager: &ManagerInner) -> bool {
        match self {
            Variant::Immediate => manager.create_instance(None, None, State::Activating).is_some(),
            Variant::Delayed { .. } | Variant::Factory { .. } => {
                manager.trackers().iter().all(|tracker| tracker.bind(None))
            }
        }
    }

    pub(crate) fn delete_component(&self, manager: &ManagerInner) {
        if let Variant::Delayed { consumers } = self {
            consumers.lock().clear();
        }
        for record in manager.live_instances() {
            manager.destroy_instance(&record);
        }
    }

    pub(crate) fn service_object(&self, manager: &ManagerInner) -> Option<ServiceObject> {
        match self {
            Variant::Immediate => manager
                .primary_instance()
                .map(|record| ServiceObject::Shared(record.instance.clone())),
            Variant::Delayed { .. } => Some(ServiceObject::Factory(Arc::new(DelayedServiceFactory {
                manager: manager.weak(),
            }))),
            Variant::Factory { .. } => Some(ServiceObject::Factory(Arc::new(PerConsumerServiceFactory {
                manager: manager.weak(),
            }))),
        }
    }

    /// Publishes the component factory service of a factory component
    /// that declares a factory id.
    pub(crate) fn register_factory(&self, manager: &ManagerInner) {
        let Variant::Factory { factory_registration } = self else {
            return;
        };
        let Some(factory_id) = manager.descriptor().factory() else {
            return;
        };
        let mut properties = Properties::new();
        properties.insert(COMPONENT_NAME.to_string(), Value::from(manager.name()));
        properties.insert(COMPONENT_FACTORY.to_string(), Value::from(factory_id));
        let object = ServiceObject::Shared(Arc::new(ComponentFactory::new(manager.weak())));
        let interfaces = [COMPONENT_FACTORY_SERVICE.to_string()];
        match manager
            .env()
            .registry
            .register_service(manager.env().module, &interfaces, object, properties)
        {
            Ok(registration) => {
                let stale = {
                    let mut slot = factory_registration.lock();
                    if manager.state() == State::Factory && slot.is_none() {
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
            Err(err) => log::error!("{}: cannot register component factory: {}", manager.label(), err),
        }
    }

    pub(crate) fn unregister_factory(&self) {
        if let Variant::Factory { factory_registration } = self {
            let registration = factory_registration.lock().take();
            if let Some(registration) = registration {
                registration.unregister();
            }
        }
    }
}

/// Creates the single instance of a delayed component on first use and
/// drops it when the last consumer lets go.
struct DelayedServiceFactory {
    manager: Weak<ManagerInner>,
}

impl ServiceFactory for DelayedServiceFactory {
    fn get_service(&self, consumer: ModuleId, _registration: &ServiceRegistration) -> Option<DynService> {
        let manager = self.manager.upgrade()?;
        let _transition = manager.lock_transition();
        let Variant::Delayed { consumers } = manager.variant() else {
            return None;
        };
        if !matches!(manager.state(), State::Active | State::Registered) {
            log::debug!("{}: service requested while {}", manager.label(), manager.state());
            return None;
        }
        let record = match manager.primary_instance() {
            Some(record) => record,
            None => {
                let record = manager.create_instance(None, None, State::Registered)?;
                if manager.state() == State::Registered {
                    manager.set_state(State::Active);
                }
                record
            }
        };
        consumers.lock().insert(consumer);
        Some(record.instance.clone())
    }

    fn unget_service(&self, consumer: ModuleId, _registration: &ServiceRegistration, _service: DynService) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        let _transition = manager.lock_transition();
        let Variant::Delayed { consumers } = manager.variant() else {
            return;
        };
        let unused = {
            let mut consumers = consumers.lock();
            consumers.remove(&consumer);
            consumers.is_empty()
        };
        if unused && manager.state() == State::Active {
            log::debug!("{}: last consumer released the service", manager.label());
            for record in manager.live_instances() {
                manager.destroy_instance(&record);
            }
            manager.set_state(State::Registered);
        }
    }
}

/// Gives every consumer module its own instance.
struct PerConsumerServiceFactory {
    manager: Weak<ManagerInner>,
}

impl ServiceFactory for PerConsumerServiceFactory {
    fn get_service(&self, consumer: ModuleId, _registration: &ServiceRegistration) -> Option<DynService> {
        let manager = self.manager.upgrade()?;
        let _transition = manager.lock_transition();
        if manager.state() != State::Factory {
            return None;
        }
        manager
            .create_instance(Some(consumer), None, State::Factory)
            .map(|record| record.instance.clone())
    }

    fn unget_service(&self, _consumer: ModuleId, _registration: &ServiceRegistration, service: DynService) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        let _transition = manager.lock_transition();
        let record = manager
            .live_instances()
            .into_iter()
            .find(|record| Arc::ptr_eq(&record.instance, &service));
        if let Some(record) = record {
            manager.destroy_instance(&record);
        }
    }
}

/// Creates new instances of a factory component on demand.
///
/// Published under [`COMPONENT_FACTORY_SERVICE`] while the component is
/// satisfied.
#[derive(Clone)]
pub struct ComponentFactory {
    manager: Weak<ManagerInner>,
}

impl ComponentFactory {
    pub(crate) fn new(manager: Weak<ManagerInner>) -> Self {
        Self { manager }
    }

    /// Creates, binds and activates a new instance; `properties` are
    /// layered over the component's own for this instance only.
    pub fn new_instance(&self, properties: Properties) -> ComponentResult<ComponentInstance> {
        let manager = self.manager.upgrade().ok_or_else(|| ComponentError::Destroyed {
            component: "<released>".to_string(),
        })?;
        let _transition = manager.lock_transition();
        if manager.state() != State::Factory {
            return Err(ComponentError::NotSatisfied {
                component: manager.label(),
            });
        }
        let record = manager
            .create_instance(None, Some(&properties), State::Factory)
            .ok_or_else(|| ComponentError::CreationFailed {
                component: manager.label(),
            })?;
        Ok(ComponentInstance {
            manager: self.manager.clone(),
            record,
        })
    }

    pub fn component_name(&self) -> Option<String> {
        self.manager.upgrade().map(|manager| manager.name().to_string())
    }
}

impl fmt::Debug for ComponentFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentFactory")
            .field("component", &self.component_name())
            .finish()
    }
}

/// An instance produced by [`ComponentFactory::new_instance`].
pub struct ComponentInstance {
    manager: Weak<ManagerInner>,
    record: Arc<InstanceRecord>,
}

impl ComponentInstance {
    pub fn instance(&self) -> DynService {
        self.record.instance.clone()
    }

    pub fn context(&self) -> &ComponentContext {
        &self.record.context
    }

    /// Deactivates and unbinds this instance. Does nothing if the
    /// component already did so.
    pub fn dispose(&self) {
        if let Some(manager) = self.manager.upgrade() {
            let _transition = manager.lock_transition();
            manager.destroy_instance(&self.record);
        }
    }
}

impl fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("context", &self.record.context)
            .finish()
    }
}
