use std::fmt;

use crate::component::{ImplementationType, TypeSpace};
use crate::metadata::{parse_descriptors, ComponentDescriptor};
use crate::registry::ModuleId;
use crate::runtime::errors::RuntimeResult;

/// A deployable unit: its implementation types and the components it
/// declares.
pub struct Module {
    id: ModuleId,
    name: String,
    types: TypeSpace,
    descriptors: Vec<ComponentDescriptor>,
}

impl Module {
    pub fn new(id: ModuleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            types: TypeSpace::new(),
            descriptors: Vec::new(),
        }
    }

    pub fn with_type(mut self, implementation: ImplementationType) -> Self {
        self.types.insert(implementation);
        self
    }

    /// Declares that `interface` extends each of `parents`.
    pub fn with_supertypes<I, S>(mut self, interface: impl Into<String>, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types.declare_supertypes(interface, parents);
        self
    }

    pub fn with_component(mut self, descriptor: ComponentDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Adds the components of a JSON descriptor document. Invalid entries
    /// are logged and skipped; only a malformed document is an error.
    pub fn with_descriptor_document(mut self, json: &str) -> RuntimeResult<Self> {
        for parsed in parse_descriptors(json)? {
            match parsed {
                Ok(descriptor) => self.descriptors.push(descriptor),
                Err(err) => log::error!("{}: skipping component descriptor: {}", self.name, err),
            }
        }
        Ok(self)
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn types(&self) -> &TypeSpace {
        &self.types
    }

    pub fn descriptors(&self) -> &[ComponentDescriptor] {
        &self.descriptors
    }

    pub(crate) fn into_parts(self) -> (ModuleId, String, TypeSpace, Vec<ComponentDescriptor>) {
        (self.id, self.name, self.types, self.descriptors)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("types", &self.types)
            .field("components", &self.descriptors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_skips_invalid_entries() {
        let module = Module::new(ModuleId(3), "demo")
            .with_descriptor_document(
                r#"[
                    {"name": "ok", "implementation": "demo.Ok"},
                    {"name": "bad", "implementation": "demo.Bad", "service": {"provide": []}}
                ]"#,
            )
            .unwrap();
        let names: Vec<&str> = module.descriptors().iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["ok"]);
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(Module::new(ModuleId(3), "demo").with_descriptor_document("not json").is_err());
    }
}
