//! Per-scenario state.

use std::sync::Arc;

use libcsi::{CsiController, CsiIdentity, CsiNode};

use crate::capability::CapabilityFlags;
use crate::config::SanityConfig;
use crate::naming::IdentifierGenerator;
use crate::tracker::ResourceTracker;

/// Handles to the three services of the plugin under test.
#[derive(Clone)]
pub struct PluginClients {
    pub identity: Arc<dyn CsiIdentity>,
    pub controller: Arc<dyn CsiController>,
    pub node: Arc<dyn CsiNode>,
}

impl PluginClients {
    /// Use one object for all three services, e.g. a
    /// [`libcsi::transport::client::CsiClient`] or a local plugin.
    pub fn from_plugin<P>(plugin: Arc<P>) -> Self
    where
        P: CsiIdentity + CsiController + CsiNode + 'static,
    {
        Self {
            identity: plugin.clone(),
            controller: plugin.clone(),
            node: plugin,
        }
    }
}

/// Everything one scenario works with.  Built by the runner after the
/// capability probe and dropped when the scenario ends; never shared.
pub struct ScenarioContext {
    pub plugin: PluginClients,
    pub config: Arc<SanityConfig>,
    /// Frozen at scenario start.
    pub flags: CapabilityFlags,
    pub tracker: ResourceTracker,
    names: Arc<IdentifierGenerator>,
}

impl ScenarioContext {
    pub fn new(
        plugin: PluginClients,
        config: Arc<SanityConfig>,
        flags: CapabilityFlags,
        names: Arc<IdentifierGenerator>,
    ) -> Self {
        let tracker = ResourceTracker::new(plugin.clone(), Arc::clone(&config));
        Self {
            plugin,
            config,
            flags,
            tracker,
            names,
        }
    }

    /// A fresh, run-unique name starting with `prefix`.
    pub fn unique_name(&self, prefix: &str) -> String {
        self.names.next(prefix)
    }
}
