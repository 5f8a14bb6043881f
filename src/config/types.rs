use std::sync::Arc;

use serde::Serialize;

use crate::registry::Properties;

/// How a component treats configuration keyed by its name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationPolicy {
    /// Merge configuration when present.
    #[default]
    Optional,
    /// Stay unsatisfied until a configuration exists.
    Require,
    /// Never consult configuration.
    Ignore,
}

impl ConfigurationPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "optional" => Some(ConfigurationPolicy::Optional),
            "require" => Some(ConfigurationPolicy::Require),
            "ignore" => Some(ConfigurationPolicy::Ignore),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigurationPolicy::Optional => "optional",
            ConfigurationPolicy::Require => "require",
            ConfigurationPolicy::Ignore => "ignore",
        }
    }
}

/// Notified when the configuration for a pid changes or disappears.
pub trait ConfigurationListener: Send + Sync {
    fn configuration_changed(&self, pid: &str);

    fn configuration_deleted(&self, pid: &str) {
        self.configuration_changed(pid);
    }
}

pub trait ConfigurationSource: Send + Sync {
    fn configuration(&self, pid: &str) -> Option<Properties>;

    fn add_listener(&self, listener: Arc<dyn ConfigurationListener>);
}

/// Source used when the host provides no configuration service.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoConfiguration;

impl ConfigurationSource for NoConfiguration {
    fn configuration(&self, _pid: &str) -> Option<Properties> {
        None
    }

    fn add_listener(&self, _listener: Arc<dyn ConfigurationListener>) {}
}
