#![allow(dead_code)]

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use component_runtime::component::{ComponentManager, ImplementationType, State, StateChange};
use component_runtime::config::InMemoryConfiguration;
use component_runtime::metadata::{
    Cardinality, ComponentDescriptor, ComponentDescriptorBuilder, DependencyDescriptor, ReferencePolicy,
};
use component_runtime::registry::{
    DynService, InMemoryRegistry, ModuleId, Properties, ServiceObject, ServiceRegistration, ServiceRegistry,
};
use component_runtime::runtime::{ComponentRuntime, Module, RuntimeConfig};

pub const PROVIDER: ModuleId = ModuleId(900);
pub const MODULE: ModuleId = ModuleId(1);
pub const BAR: &str = "test.Bar";
pub const FOO: &str = "test.Foo";
pub const RECORDER: &str = "test.Recorder";

/// Ordered log of callbacks shared by every instance of a test type.
#[derive(Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries.lock().iter().filter(|entry| entry.starts_with(prefix)).count()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

pub struct Recorder {
    pub journal: Arc<Journal>,
    pub bound: Mutex<Vec<u64>>,
}

pub struct Provided {
    pub interface: String,
}

/// A type recording `activate:<name>`, `deactivate:<name>`, `bind:<id>`
/// and `unbind:<id>` into `journal`.
pub fn recorder_type(name: &str, journal: &Arc<Journal>) -> ImplementationType {
    let journal = journal.clone();
    ImplementationType::builder::<Recorder>(name)
        .constructor(move || {
            journal.record("construct");
            Ok(Recorder {
                journal: journal.clone(),
                bound: Mutex::new(Vec::new()),
            })
        })
        .lifecycle("activate", |this, context| {
            this.journal.record(format!("activate:{}", context.component_name()));
            Ok(())
        })
        .lifecycle("deactivate", |this, context| {
            this.journal.record(format!("deactivate:{}", context.component_name()));
            Ok(())
        })
        .reference_method("bind", |this, reference| {
            this.journal.record(format!("bind:{}", reference.id()));
            this.bound.lock().push(reference.id());
            Ok(())
        })
        .reference_method("unbind", |this, reference| {
            this.journal.record(format!("unbind:{}", reference.id()));
            this.bound.lock().retain(|id| *id != reference.id());
            Ok(())
        })
        .build()
}

/// Keeps the service objects bound through `set` until `unset`.
#[derive(Default)]
pub struct Holder {
    pub held: Mutex<Vec<DynService>>,
}

/// A type whose `set`/`unset` methods take the service object of
/// `interface`, expected to be an `S`.
pub fn holder_type<S: Any + Send + Sync>(name: &str, interface: &str) -> ImplementationType {
    ImplementationType::builder::<Holder>(name)
        .default_constructor()
        .service_method::<S, _>("set", interface, |this, service| {
            this.held.lock().push(service);
            Ok(())
        })
        .service_method::<S, _>("unset", interface, |this, service| {
            let service: DynService = service;
            this.held.lock().retain(|held| !Arc::ptr_eq(held, &service));
            Ok(())
        })
        .build()
}

pub fn holder_of(manager: &ComponentManager) -> Option<Arc<Holder>> {
    manager.instance().and_then(|instance| instance.downcast::<Holder>().ok())
}

pub struct Harness {
    pub registry: Arc<InMemoryRegistry>,
    pub configuration: InMemoryConfiguration,
    pub runtime: ComponentRuntime,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// A runtime that leaves components disabled on load.
    pub fn manual() -> Self {
        Self::with_config(RuntimeConfig::default().with_enable_default_components(false))
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let registry = Arc::new(InMemoryRegistry::new());
        let configuration = InMemoryConfiguration::new();
        let runtime = ComponentRuntime::new(registry.clone(), Arc::new(configuration.clone()), config)
            .expect("start runtime");
        Self {
            registry,
            configuration,
            runtime,
        }
    }

    pub fn publish(&self, interface: &str, properties: Properties) -> ServiceRegistration {
        self.registry
            .register_service(
                PROVIDER,
                &[interface.to_string()],
                ServiceObject::Shared(Arc::new(Provided {
                    interface: interface.to_string(),
                })),
                properties,
            )
            .expect("register service")
    }

    pub fn load(&self, journal: &Arc<Journal>, descriptors: Vec<ComponentDescriptor>) -> Vec<ComponentManager> {
        let mut module = Module::new(MODULE, "test").with_type(recorder_type(RECORDER, journal));
        for descriptor in descriptors {
            module = module.with_component(descriptor);
        }
        self.runtime.load_module(module).expect("load module")
    }
}

pub fn props(value: Value) -> Properties {
    value.as_object().cloned().unwrap_or_default()
}

pub fn recorder(name: &str) -> ComponentDescriptorBuilder {
    ComponentDescriptor::builder(name, RECORDER)
}

pub fn bar_reference(cardinality: Cardinality, policy: ReferencePolicy) -> DependencyDescriptor {
    DependencyDescriptor::new("bar", BAR)
        .with_cardinality(cardinality)
        .with_policy(policy)
        .with_bind("bind")
        .with_unbind("unbind")
}

/// Starts recording the transitions of `manager`.
pub fn record_states(manager: &ComponentManager) -> Arc<Mutex<Vec<StateChange>>> {
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    // Never unsubscribed: the recording lives as long as the manager.
    let _unsubscribe = manager.on_state_change(move |change| sink.lock().push(change.clone()));
    changes
}

pub fn transitions(changes: &Mutex<Vec<StateChange>>) -> Vec<(State, State)> {
    changes.lock().iter().map(|change| (change.from, change.to)).collect()
}

pub fn recorder_of(manager: &ComponentManager) -> Option<Arc<Recorder>> {
    manager.instance().and_then(|instance| instance.downcast::<Recorder>().ok())
}
