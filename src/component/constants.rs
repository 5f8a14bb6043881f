pub const DEFAULT_ACTIVATE_METHOD: &str = "activate";
pub const DEFAULT_DEACTIVATE_METHOD: &str = "deactivate";

pub const COMPONENT_NAME: &str = "component.name";
pub const COMPONENT_ID: &str = "component.id";
pub const COMPONENT_FACTORY: &str = "component.factory";

/// Interface under which component factories are published.
pub const COMPONENT_FACTORY_SERVICE: &str = "component.ComponentFactory";
