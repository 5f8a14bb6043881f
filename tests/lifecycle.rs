mod support;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use component_runtime::component::{ComponentContext, ImplementationType, InvocationError, State};
use component_runtime::config::ConfigurationPolicy;
use component_runtime::metadata::{Cardinality, ComponentDescriptor, DependencyDescriptor, ReferencePolicy};
use component_runtime::registry::{
    Filter, ModuleId, Properties, ServiceEvent, ServiceEventKind, ServiceListener, ServiceRegistration, ServiceRegistry,
};
use component_runtime::runtime::Module;

use support::*;

#[test]
fn static_mandatory_reference_gates_activation() {
    let harness = Harness::new();
    let journal = Journal::new();
    let managers = harness.load(
        &journal,
        vec![recorder("x")
            .dependency(bar_reference(Cardinality::MandatoryUnary, ReferencePolicy::Static))
            .build()
            .unwrap()],
    );
    let x = &managers[0];
    assert_eq!(x.state(), State::Unsatisfied);
    assert!(journal.entries().is_empty());

    let bar = harness.publish(BAR, Properties::new());
    let id = bar.reference().id();
    assert_eq!(x.state(), State::Active);
    assert_eq!(
        journal.entries(),
        vec!["construct".to_string(), format!("bind:{id}"), "activate:x".to_string()]
    );

    journal.clear();
    bar.unregister();
    assert_eq!(x.state(), State::Unsatisfied);
    assert_eq!(journal.entries(), vec!["deactivate:x".to_string(), format!("unbind:{id}")]);
    assert!(x.instance().is_none());
}

#[test]
fn satisfying_registration_activates_exactly_once() {
    let harness = Harness::new();
    let journal = Journal::new();
    let managers = harness.load(
        &journal,
        vec![recorder("x")
            .dependency(bar_reference(Cardinality::MandatoryUnary, ReferencePolicy::Static))
            .build()
            .unwrap()],
    );
    let changes = record_states(&managers[0]);

    let _bar = harness.publish(BAR, Properties::new());
    assert_eq!(
        transitions(&changes),
        vec![
            (State::Unsatisfied, State::Activating),
            (State::Activating, State::Active)
        ]
    );
    assert_eq!(journal.count("activate:"), 1);
    assert_eq!(journal.count("construct"), 1);
}

#[test]
fn dynamic_multiple_reference_binds_without_reactivation() {
    let harness = Harness::new();
    let journal = Journal::new();
    let managers = harness.load(
        &journal,
        vec![recorder("x")
            .dependency(bar_reference(Cardinality::OptionalMultiple, ReferencePolicy::Dynamic))
            .build()
            .unwrap()],
    );
    let x = &managers[0];
    assert_eq!(x.state(), State::Active);
    let changes = record_states(x);

    let first = harness.publish(BAR, Properties::new());
    let second = harness.publish(BAR, Properties::new());
    let recorder = recorder_of(x).unwrap();
    assert_eq!(
        *recorder.bound.lock(),
        vec![first.reference().id(), second.reference().id()]
    );

    first.unregister();
    assert_eq!(*recorder.bound.lock(), vec![second.reference().id()]);
    assert_eq!(journal.count("unbind:"), 1);
    assert!(transitions(&changes).is_empty());
    assert_eq!(x.state(), State::Active);
}

#[test]
fn dynamic_unary_reference_rebinds_to_the_next_best() {
    let harness = Harness::new();
    let journal = Journal::new();
    let low = harness.publish(BAR, Properties::new());
    let high = harness.publish(BAR, props(json!({"service.ranking": 5})));
    let managers = harness.load(
        &journal,
        vec![recorder("x")
            .dependency(bar_reference(Cardinality::MandatoryUnary, ReferencePolicy::Dynamic))
            .build()
            .unwrap()],
    );
    let x = &managers[0];
    let recorder = recorder_of(x).unwrap();
    assert_eq!(*recorder.bound.lock(), vec![high.reference().id()]);

    let changes = record_states(x);
    high.unregister();
    assert_eq!(*recorder.bound.lock(), vec![low.reference().id()]);
    assert!(transitions(&changes).is_empty());

    low.unregister();
    assert_eq!(x.state(), State::Unsatisfied);
    assert_eq!(journal.count("bind:"), journal.count("unbind:"));
}

#[test]
fn static_reference_ignores_better_service_until_bound_one_leaves() {
    let harness = Harness::new();
    let journal = Journal::new();
    let original = harness.publish(BAR, Properties::new());
    let managers = harness.load(
        &journal,
        vec![recorder("x")
            .dependency(bar_reference(Cardinality::MandatoryUnary, ReferencePolicy::Static))
            .build()
            .unwrap()],
    );
    let x = &managers[0];
    let changes = record_states(x);

    let better = harness.publish(BAR, props(json!({"service.ranking": 10})));
    assert!(transitions(&changes).is_empty());
    assert_eq!(*recorder_of(x).unwrap().bound.lock(), vec![original.reference().id()]);

    original.unregister();
    assert_eq!(
        transitions(&changes),
        vec![
            (State::Active, State::Deactivating),
            (State::Deactivating, State::Unsatisfied),
            (State::Unsatisfied, State::Activating),
            (State::Activating, State::Active),
        ]
    );
    assert_eq!(*recorder_of(x).unwrap().bound.lock(), vec![better.reference().id()]);
}

#[test]
fn disable_and_dispose_are_idempotent() {
    let harness = Harness::new();
    let journal = Journal::new();
    let _bar = harness.publish(BAR, Properties::new());
    let managers = harness.load(
        &journal,
        vec![recorder("x")
            .dependency(bar_reference(Cardinality::MandatoryMultiple, ReferencePolicy::Dynamic))
            .build()
            .unwrap()],
    );
    let x = &managers[0];
    assert_eq!(x.state(), State::Active);

    x.disable();
    x.disable();
    assert_eq!(x.state(), State::Disabled);
    assert_eq!(journal.count("unbind:"), 1);
    assert_eq!(journal.count("deactivate:"), 1);
    assert_eq!(harness.registry.total_use_count(), 0);

    x.dispose();
    x.dispose();
    assert_eq!(x.state(), State::Destroyed);
    assert!(x.enable().is_err());
    assert_eq!(journal.count("unbind:"), 1);
}

#[test]
fn service_is_published_only_once_satisfied() {
    struct Witness {
        catalog: component_runtime::catalog::Catalog,
        seen: Mutex<Vec<(State, bool)>>,
    }

    impl ServiceListener for Witness {
        fn service_changed(&self, event: &ServiceEvent) {
            if event.kind == ServiceEventKind::Registered {
                if let Some(manager) = self.catalog.get_component("x") {
                    self.seen.lock().push((manager.state(), manager.instance().is_some()));
                }
            }
        }
    }

    let harness = Harness::new();
    let witness = Arc::new(Witness {
        catalog: harness.runtime.catalog().clone(),
        seen: Mutex::new(Vec::new()),
    });
    harness.registry.add_listener(Filter::object_class(FOO), witness.clone());

    let journal = Journal::new();
    let _managers = harness.load(
        &journal,
        vec![recorder("x")
            .provides([FOO])
            .immediate(true)
            .dependency(bar_reference(Cardinality::MandatoryUnary, ReferencePolicy::Static))
            .build()
            .unwrap()],
    );
    assert!(witness.seen.lock().is_empty());

    let _bar = harness.publish(BAR, Properties::new());
    assert_eq!(*witness.seen.lock(), vec![(State::Active, true)]);
}

#[test]
fn required_configuration_gates_activation_and_reconfigures() {
    let harness = Harness::new();
    let journal = Journal::new();
    let managers = harness.load(
        &journal,
        vec![recorder("x")
            .configuration_policy(ConfigurationPolicy::Require)
            .property("colour", "blue")
            .build()
            .unwrap()],
    );
    let x = &managers[0];
    assert_eq!(x.state(), State::Unsatisfied);

    harness.configuration.update("x", props(json!({"colour": "red", "size": 3})));
    assert_eq!(x.state(), State::Active);
    let properties = x.properties();
    assert_eq!(properties.get("colour"), Some(&json!("red")));
    assert_eq!(properties.get("size"), Some(&json!(3)));
    assert_eq!(properties.get("component.name"), Some(&json!("x")));
    assert_eq!(properties.get("component.id"), Some(&json!(x.id())));

    harness.configuration.delete("x");
    assert_eq!(x.state(), State::Unsatisfied);
    assert_eq!(journal.count("activate:"), 1);
    assert_eq!(journal.count("deactivate:"), 1);
}

#[test]
fn ignored_configuration_does_not_touch_component() {
    let harness = Harness::new();
    let journal = Journal::new();
    let managers = harness.load(
        &journal,
        vec![recorder("x")
            .configuration_policy(ConfigurationPolicy::Ignore)
            .property("colour", "blue")
            .build()
            .unwrap()],
    );
    harness.configuration.update("x", props(json!({"colour": "red"})));
    assert_eq!(managers[0].properties().get("colour"), Some(&json!("blue")));
    assert_eq!(journal.count("activate:"), 1);
}

#[test]
fn configured_target_narrows_the_reference() {
    let harness = Harness::new();
    let journal = Journal::new();
    let blue = harness.publish(BAR, props(json!({"colour": "blue", "service.ranking": 9})));
    let red = harness.publish(BAR, props(json!({"colour": "red"})));
    let managers = harness.load(
        &journal,
        vec![recorder("x")
            .dependency(bar_reference(Cardinality::MandatoryUnary, ReferencePolicy::Static))
            .build()
            .unwrap()],
    );
    let x = &managers[0];
    assert_eq!(*recorder_of(x).unwrap().bound.lock(), vec![blue.reference().id()]);

    harness
        .configuration
        .update("x", props(json!({"bar.target": "(colour=red)"})));
    assert_eq!(x.state(), State::Active);
    assert_eq!(*recorder_of(x).unwrap().bound.lock(), vec![red.reference().id()]);

    // Changes to the excluded service no longer matter.
    blue.unregister();
    assert_eq!(*recorder_of(x).unwrap().bound.lock(), vec![red.reference().id()]);
}

#[test]
fn private_properties_stay_off_the_service() {
    let harness = Harness::new();
    let journal = Journal::new();
    let managers = harness.load(
        &journal,
        vec![recorder("x")
            .provides([FOO])
            .immediate(true)
            .property("visible", true)
            .property(".secret", "hunter2")
            .build()
            .unwrap()],
    );
    let reference = managers[0].service_reference().unwrap();
    assert_eq!(reference.property("visible"), Some(json!(true)));
    assert_eq!(reference.property(".secret"), None);
    assert_eq!(reference.property("component.name"), Some(json!("x")));
    assert_eq!(managers[0].properties().get(".secret"), Some(&json!("hunter2")));
}

#[test]
fn missing_bind_method_fails_only_mandatory_references() {
    let harness = Harness::new();
    let journal = Journal::new();
    let _bar = harness.publish(BAR, Properties::new());
    let managers = harness.load(
        &journal,
        vec![
            recorder("strict")
                .dependency(
                    bar_reference(Cardinality::MandatoryUnary, ReferencePolicy::Static).with_bind("no_such_method"),
                )
                .build()
                .unwrap(),
            recorder("lenient")
                .dependency(
                    bar_reference(Cardinality::OptionalUnary, ReferencePolicy::Static).with_bind("no_such_method"),
                )
                .build()
                .unwrap(),
        ],
    );
    assert_eq!(managers[0].state(), State::Unsatisfied);
    assert_eq!(managers[0].instance_count(), 0);
    assert_eq!(managers[1].state(), State::Active);
}

#[test]
fn failing_activate_method_does_not_abort_activation() {
    #[derive(Default)]
    struct Grumpy;

    let harness = Harness::new();
    let module = Module::new(MODULE, "grumpy")
        .with_type(
            ImplementationType::builder::<Grumpy>("test.Grumpy")
                .default_constructor()
                .lifecycle("activate", |_, _| Err(InvocationError::new("not today")))
                .lifecycle("deactivate", |_, _| panic!("deactivate exploded"))
                .build(),
        )
        .with_component(ComponentDescriptor::builder("grumpy", "test.Grumpy").build().unwrap());
    let managers = harness.runtime.load_module(module).unwrap();
    assert_eq!(managers[0].state(), State::Active);

    managers[0].disable();
    assert_eq!(managers[0].state(), State::Disabled);
}

#[test]
fn unknown_implementation_type_leaves_component_unsatisfied() {
    let harness = Harness::new();
    let module = Module::new(MODULE, "broken")
        .with_component(ComponentDescriptor::builder("ghost", "test.Missing").build().unwrap());
    let managers = harness.runtime.load_module(module).unwrap();
    assert_eq!(managers[0].state(), State::Unsatisfied);
}

#[test]
fn reentrant_loss_of_dependency_during_activate_unwinds_cleanly() {
    struct SelfSabotage {
        journal: Arc<Journal>,
        victim: Arc<Mutex<Option<ServiceRegistration>>>,
    }

    let harness = Harness::new();
    let journal = Journal::new();
    let victim: Arc<Mutex<Option<ServiceRegistration>>> = Arc::new(Mutex::new(None));
    let bar = harness.publish(BAR, Properties::new());
    *victim.lock() = Some(bar.clone());

    let (log, slot) = (journal.clone(), victim.clone());
    let module = Module::new(MODULE, "sabotage")
        .with_type(
            ImplementationType::builder::<SelfSabotage>("test.SelfSabotage")
                .constructor(move || {
                    Ok(SelfSabotage {
                        journal: log.clone(),
                        victim: slot.clone(),
                    })
                })
                .lifecycle("activate", |this, _: &ComponentContext| {
                    this.journal.record("activate");
                    if let Some(registration) = this.victim.lock().take() {
                        registration.unregister();
                    }
                    Ok(())
                })
                .lifecycle("deactivate", |this, _| {
                    this.journal.record("deactivate");
                    Ok(())
                })
                .reference_method("bind", |this, _| {
                    this.journal.record("bind");
                    Ok(())
                })
                .reference_method("unbind", |this, _| {
                    this.journal.record("unbind");
                    Ok(())
                })
                .build(),
        )
        .with_component(
            ComponentDescriptor::builder("sabotage", "test.SelfSabotage")
                .dependency(bar_reference(Cardinality::MandatoryUnary, ReferencePolicy::Static))
                .build()
                .unwrap(),
        );
    let managers = harness.runtime.load_module(module).unwrap();

    assert_eq!(managers[0].state(), State::Unsatisfied);
    assert_eq!(managers[0].instance_count(), 0);
    assert_eq!(journal.entries(), vec!["bind", "activate", "deactivate", "unbind"]);
    assert!(harness.registry.lookup(BAR, None).is_empty());
}

#[test]
fn unloading_disposes_in_reverse_declaration_order() {
    let harness = Harness::new();
    let journal = Journal::new();
    let managers = harness.load(
        &journal,
        vec![
            recorder("first").build().unwrap(),
            recorder("second").build().unwrap(),
        ],
    );
    journal.clear();

    assert!(harness.runtime.unload_module(MODULE));
    assert!(!harness.runtime.unload_module(MODULE));
    assert_eq!(journal.entries(), vec!["deactivate:second", "deactivate:first"]);
    assert!(managers.iter().all(|manager| manager.state() == State::Destroyed));
    assert!(harness.runtime.component_manager("first").is_none());

    // The names are free again.
    harness.load(&journal, vec![recorder("first").build().unwrap()]);
    assert!(harness.runtime.component_manager("first").is_some());
}

#[test]
fn duplicate_component_names_are_skipped() {
    let harness = Harness::new();
    let journal = Journal::new();
    let managers = harness.load(
        &journal,
        vec![recorder("twin").build().unwrap(), recorder("twin").build().unwrap()],
    );
    assert_eq!(managers.len(), 1);
    assert_eq!(harness.runtime.components(None).len(), 1);
}

#[test]
fn stopping_the_runtime_unregisters_everything() {
    let harness = Harness::new();
    let journal = Journal::new();
    harness.load(
        &journal,
        vec![recorder("x").provides([FOO]).immediate(true).build().unwrap()],
    );
    assert_eq!(harness.registry.lookup(FOO, None).len(), 1);

    harness.runtime.stop();
    harness.runtime.stop();
    assert!(harness.registry.lookup(FOO, None).is_empty());
    assert!(!harness.runtime.is_running());
    assert!(harness.runtime.load_module(Module::new(MODULE, "late")).is_err());
}

#[test]
fn unavailable_best_ranked_service_falls_back_to_the_next() {
    let harness = Harness::new();
    let broken = ImplementationType::builder::<Provided>("test.Broken")
        .constructor(|| Err(InvocationError::new("cannot start")))
        .build();
    let failing = harness
        .runtime
        .load_module(
            Module::new(ModuleId(3), "failing")
                .with_type(broken)
                .with_component(
                    ComponentDescriptor::builder("broken", "test.Broken")
                        .provides([FOO])
                        .property("service.ranking", 10)
                        .build()
                        .unwrap(),
                ),
        )
        .unwrap();
    assert_eq!(failing[0].state(), State::Registered);
    let healthy = harness.publish(FOO, Properties::new());

    let users = harness
        .runtime
        .load_module(
            Module::new(ModuleId(2), "consumer")
                .with_type(holder_type::<Provided>("test.Holder", FOO))
                .with_component(
                    ComponentDescriptor::builder("user", "test.Holder")
                        .immediate(true)
                        .dependency(DependencyDescriptor::new("foo", FOO).with_bind("set").with_unbind("unset"))
                        .build()
                        .unwrap(),
                ),
        )
        .unwrap();
    let user = &users[0];
    assert_eq!(user.state(), State::Active);

    let info = harness.runtime.component(user.id()).unwrap();
    assert_eq!(info.references[0].bound, vec![healthy.reference().id()]);
    assert_eq!(info.references[0].tracked, vec![healthy.reference().id()]);
    let held = holder_of(user).unwrap();
    let held = held.held.lock();
    let provided = held[0].clone().downcast::<Provided>().unwrap();
    assert_eq!(provided.interface, FOO);
    assert_eq!(failing[0].state(), State::Registered);
}
