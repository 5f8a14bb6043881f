use serde::{Deserialize, Serialize};

/// Runtime-wide settings supplied by the host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RuntimeConfig {
    /// Threads available to asynchronous management tasks.
    pub management_workers: usize,
    /// Enable components whose descriptor says so when their module loads.
    pub enable_default_components: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            management_workers: 2,
            enable_default_components: true,
        }
    }
}

impl RuntimeConfig {
    pub fn with_management_workers(mut self, workers: usize) -> Self {
        self.management_workers = workers.max(1);
        self
    }

    pub fn with_enable_default_components(mut self, enable: bool) -> Self {
        self.enable_default_components = enable;
        self
    }
}
