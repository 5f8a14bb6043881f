use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::component::context::ComponentContext;
use crate::component::errors::InvocationError;
use crate::registry::{DynService, ServiceReference};

pub(crate) type Constructor = Arc<dyn Fn() -> Result<DynService, InvocationError> + Send + Sync>;
pub(crate) type LifecycleCall =
    Arc<dyn Fn(&DynService, &ComponentContext) -> Result<(), InvocationError> + Send + Sync>;
pub(crate) type BindingCall =
    Arc<dyn Fn(&DynService, &BindArgument) -> Result<(), InvocationError> + Send + Sync>;

/// Value handed to a bind or unbind method.
#[derive(Clone)]
pub enum BindArgument {
    Reference(ServiceReference),
    Service(DynService),
}

impl fmt::Debug for BindArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindArgument::Reference(reference) => f.debug_tuple("Reference").field(reference).finish(),
            BindArgument::Service(_) => f.write_str("Service(..)"),
        }
    }
}

/// Declared parameter of a bind or unbind method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParameterType {
    /// Receives the service reference handle.
    Reference,
    /// Receives the service object, declared as the named interface.
    Service(String),
}

#[derive(Clone)]
pub(crate) enum MethodBody {
    Lifecycle(LifecycleCall),
    Binding { parameter: ParameterType, call: BindingCall },
}

#[derive(Clone)]
pub(crate) struct MethodEntry {
    pub(crate) name: String,
    pub(crate) body: MethodBody,
}

/// A named implementation type: how to construct it and which methods it
/// exposes to the runtime.
pub struct ImplementationType {
    name: String,
    constructor: Option<Constructor>,
    methods: Vec<MethodEntry>,
}

impl ImplementationType {
    pub fn builder<T>(name: impl Into<String>) -> ImplementationTypeBuilder<T>
    where
        T: Any + Send + Sync,
    {
        ImplementationTypeBuilder {
            name: name.into(),
            constructor: None,
            methods: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of all declared methods, in declaration order.
    pub fn method_names(&self) -> Vec<&str> {
        self.methods.iter().map(|entry| entry.name.as_str()).collect()
    }

    pub(crate) fn construct(&self) -> Result<DynService, InvocationError> {
        let constructor = self.constructor.as_ref().ok_or_else(|| InvocationError::MethodNotFound {
            type_name: self.name.clone(),
            method: "<constructor>".to_string(),
        })?;
        constructor()
    }

    pub(crate) fn lifecycle_method(&self, name: &str) -> Option<LifecycleCall> {
        self.methods.iter().find_map(|entry| match &entry.body {
            MethodBody::Lifecycle(call) if entry.name == name => Some(call.clone()),
            _ => None,
        })
    }

    pub(crate) fn methods(&self) -> &[MethodEntry] {
        &self.methods
    }
}

impl fmt::Debug for ImplementationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplementationType")
            .field("name", &self.name)
            .field("methods", &self.method_names())
            .finish()
    }
}

pub struct ImplementationTypeBuilder<T> {
    name: String,
    constructor: Option<Constructor>,
    methods: Vec<MethodEntry>,
    _marker: PhantomData<fn() -> T>,
}

fn instance_as<'a, T: Any>(instance: &'a DynService, type_name: &str) -> Result<&'a T, InvocationError> {
    (**instance)
        .downcast_ref::<T>()
        .ok_or_else(|| InvocationError::WrongInstanceType {
            type_name: type_name.to_string(),
        })
}

impl<T> ImplementationTypeBuilder<T>
where
    T: Any + Send + Sync,
{
    pub fn constructor<F>(mut self, constructor: F) -> Self
    where
        F: Fn() -> Result<T, InvocationError> + Send + Sync + 'static,
    {
        self.constructor = Some(Arc::new(move || constructor().map(|value| Arc::new(value) as DynService)));
        self
    }

    /// Registers an activate/deactivate style method.
    pub fn lifecycle<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&T, &ComponentContext) -> Result<(), InvocationError> + Send + Sync + 'static,
    {
        let type_name = self.name.clone();
        let call: LifecycleCall = Arc::new(move |instance, context| {
            let this = instance_as::<T>(instance, &type_name)?;
            method(this, context)
        });
        self.methods.push(MethodEntry {
            name: name.into(),
            body: MethodBody::Lifecycle(call),
        });
        self
    }

    /// Registers a bind/unbind method taking the reference handle.
    pub fn reference_method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&T, &ServiceReference) -> Result<(), InvocationError> + Send + Sync + 'static,
    {
        let type_name = self.name.clone();
        let call: BindingCall = Arc::new(move |instance, argument| {
            let this = instance_as::<T>(instance, &type_name)?;
            match argument {
                BindArgument::Reference(reference) => method(this, reference),
                BindArgument::Service(_) => Err(InvocationError::new("expected a service reference")),
            }
        });
        self.methods.push(MethodEntry {
            name: name.into(),
            body: MethodBody::Binding {
                parameter: ParameterType::Reference,
                call,
            },
        });
        self
    }

    /// Registers a bind/unbind method taking the service object, declared
    /// as `interface` and delivered as `Arc<S>`.
    pub fn service_method<S, F>(mut self, name: impl Into<String>, interface: impl Into<String>, method: F) -> Self
    where
        S: Any + Send + Sync,
        F: Fn(&T, Arc<S>) -> Result<(), InvocationError> + Send + Sync + 'static,
    {
        let type_name = self.name.clone();
        let interface = interface.into();
        let expected = interface.clone();
        let call: BindingCall = Arc::new(move |instance, argument| {
            let this = instance_as::<T>(instance, &type_name)?;
            match argument {
                BindArgument::Service(service) => {
                    let typed = service
                        .clone()
                        .downcast::<S>()
                        .map_err(|_| InvocationError::WrongServiceType {
                            expected: expected.clone(),
                        })?;
                    method(this, typed)
                }
                BindArgument::Reference(_) => Err(InvocationError::new("expected a service object")),
            }
        });
        self.methods.push(MethodEntry {
            name: name.into(),
            body: MethodBody::Binding {
                parameter: ParameterType::Service(interface),
                call,
            },
        });
        self
    }

    pub fn build(self) -> ImplementationType {
        ImplementationType {
            name: self.name,
            constructor: self.constructor,
            methods: self.methods,
        }
    }
}

impl<T> ImplementationTypeBuilder<T>
where
    T: Any + Send + Sync + Default,
{
    pub fn default_constructor(self) -> Self {
        self.constructor(|| Ok(T::default()))
    }
}

/// The implementation types and interface hierarchy visible to one module.
#[derive(Clone, Default)]
pub struct TypeSpace {
    types: HashMap<String, Arc<ImplementationType>>,
    supertypes: HashMap<String, Vec<String>>,
}

impl TypeSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, implementation: ImplementationType) {
        self.types
            .insert(implementation.name.clone(), Arc::new(implementation));
    }

    /// Declares that `interface` extends each of `parents`.
    pub fn declare_supertypes<I, S>(&mut self, interface: impl Into<String>, parents: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.supertypes.entry(interface.into()).or_default();
        for parent in parents {
            let parent = parent.into();
            if !entry.contains(&parent) {
                entry.push(parent);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ImplementationType>> {
        self.types.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Number of inheritance steps from `interface` up to `ancestor`, or
    /// `None` when a value of `interface` cannot be passed as `ancestor`.
    pub fn distance(&self, interface: &str, ancestor: &str) -> Option<usize> {
        if interface == ancestor {
            return Some(0);
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([(interface, 0usize)]);
        while let Some((current, depth)) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            for parent in self.supertypes.get(current).into_iter().flatten() {
                if parent == ancestor {
                    return Some(depth + 1);
                }
                queue.push_back((parent.as_str(), depth + 1));
            }
        }
        None
    }

    pub fn is_assignable(&self, interface: &str, ancestor: &str) -> bool {
        self.distance(interface, ancestor).is_some()
    }
}

impl fmt::Debug for TypeSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.types.keys().collect();
        names.sort();
        f.debug_struct("TypeSpace")
            .field("types", &names)
            .field("supertypes", &self.supertypes)
            .finish()
    }
}
