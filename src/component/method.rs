use std::panic::{self, AssertUnwindSafe};

use crate::component::errors::InvocationError;
use crate::component::implementation::{
    BindArgument, BindingCall, ImplementationType, MethodBody, ParameterType, TypeSpace,
};
use crate::registry::DynService;

/// A bind or unbind method picked for one dependency.
#[derive(Clone)]
pub(crate) struct ResolvedMethod {
    name: String,
    parameter: ParameterType,
    call: BindingCall,
}

impl ResolvedMethod {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn wants_service(&self) -> bool {
        matches!(self.parameter, ParameterType::Service(_))
    }

    pub(crate) fn invoke(&self, instance: &DynService, argument: &BindArgument) -> Result<(), InvocationError> {
        guarded(|| (self.call)(instance, argument))
    }
}

/// Picks the method called `name` that can receive a service of
/// `interface`.
///
/// Candidates rank as: the reference-handle form, then a parameter
/// declared exactly as `interface`, then the widest declared supertype of
/// `interface`. Declaration order breaks ties.
pub(crate) fn resolve_binding(
    implementation: &ImplementationType,
    name: &str,
    interface: &str,
    types: &TypeSpace,
) -> Option<ResolvedMethod> {
    let mut best: Option<(usize, &ParameterType, &BindingCall)> = None;
    for entry in implementation.methods() {
        if entry.name != name {
            continue;
        }
        let MethodBody::Binding { parameter, call } = &entry.body else {
            continue;
        };
        let rank = match parameter {
            ParameterType::Reference => usize::MAX,
            ParameterType::Service(declared) if declared == interface => usize::MAX - 1,
            ParameterType::Service(declared) => match types.distance(interface, declared) {
                Some(distance) => distance,
                None => continue,
            },
        };
        if best.map_or(true, |(current, _, _)| rank > current) {
            best = Some((rank, parameter, call));
        }
    }
    best.map(|(_, parameter, call)| ResolvedMethod {
        name: name.to_string(),
        parameter: parameter.clone(),
        call: call.clone(),
    })
}

/// Runs user code, turning a panic into [`InvocationError::Panicked`].
pub(crate) fn guarded<R>(call: impl FnOnce() -> Result<R, InvocationError>) -> Result<R, InvocationError> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => Err(InvocationError::from_panic(payload)),
    }
}
