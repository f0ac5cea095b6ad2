//! Capability negotiation.
//!
//! [`CapabilityRegistry::probe`] asks the plugin which optional features it
//! implements and condenses the answers into [`CapabilityFlags`].  The flags
//! are computed once per scenario and passed down by value; nothing
//! re-queries the plugin mid-scenario.

use std::fmt;

use libcsi::{CapabilityType, ControllerRpcType, NodeRpcType, PluginServiceType};
use tracing::{debug, info};

use crate::assertion::{ensure, expect_success};
use crate::context::PluginClients;
use crate::error::ScenarioError;

/// Optional features of the plugin under test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityFlags {
    pub controller_publish: bool,
    pub node_stage: bool,
    pub node_volume_stats: bool,
    pub accessibility_constraints: bool,
}

/// A single optional feature, used to gate scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ControllerPublish,
    NodeStage,
    NodeVolumeStats,
    AccessibilityConstraints,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ControllerPublish => "ControllerPublishVolume",
            Self::NodeStage => "NodeStageVolume",
            Self::NodeVolumeStats => "NodeGetVolumeStats",
            Self::AccessibilityConstraints => "VolumeAccessibilityConstraints",
        })
    }
}

impl CapabilityFlags {
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::ControllerPublish => self.controller_publish,
            Capability::NodeStage => self.node_stage,
            Capability::NodeVolumeStats => self.node_volume_stats,
            Capability::AccessibilityConstraints => self.accessibility_constraints,
        }
    }
}

/// Issues the capability-list calls of all three services.
pub struct CapabilityRegistry<'a> {
    plugin: &'a PluginClients,
}

impl<'a> CapabilityRegistry<'a> {
    pub fn new(plugin: &'a PluginClients) -> Self {
        Self { plugin }
    }

    /// Query the plugin and build the flags.
    ///
    /// Entries without a descriptor fail the probe.  Unrecognized types are
    /// ignored here; [`Self::check_node_capabilities`] is the strict check.
    pub async fn probe(&self) -> Result<CapabilityFlags, ScenarioError> {
        let mut flags = CapabilityFlags::default();

        const PLUGIN_CALL: &str = "GetPluginCapabilities";
        let plugin_caps = expect_success(
            PLUGIN_CALL,
            self.plugin.identity.get_plugin_capabilities().await,
        )?;
        for cap in plugin_caps {
            let kind = descriptor(PLUGIN_CALL, "service", cap.service)?;
            if PluginServiceType::from_i32(kind)
                == Some(PluginServiceType::VolumeAccessibilityConstraints)
            {
                flags.accessibility_constraints = true;
            }
        }

        const CONTROLLER_CALL: &str = "ControllerGetCapabilities";
        let controller_caps = expect_success(
            CONTROLLER_CALL,
            self.plugin.controller.controller_get_capabilities().await,
        )?;
        for cap in controller_caps {
            let kind = descriptor(CONTROLLER_CALL, "rpc", cap.rpc)?;
            if ControllerRpcType::from_i32(kind) == Some(ControllerRpcType::PublishUnpublishVolume)
            {
                flags.controller_publish = true;
            }
        }

        const NODE_CALL: &str = "NodeGetCapabilities";
        let node_caps = expect_success(
            NODE_CALL,
            self.plugin.node.node_get_capabilities().await,
        )?;
        for cap in node_caps {
            let kind = descriptor(NODE_CALL, "rpc", cap.rpc)?;
            match NodeRpcType::from_i32(kind) {
                Some(NodeRpcType::StageUnstageVolume) => flags.node_stage = true,
                Some(NodeRpcType::GetVolumeStats) => flags.node_volume_stats = true,
                Some(NodeRpcType::Unknown) => {}
                None => debug!(kind, "ignoring unrecognized node capability"),
            }
        }

        info!(?flags, "plugin capabilities probed");
        Ok(flags)
    }

    /// Every node capability must carry a descriptor of a recognized type.
    pub async fn check_node_capabilities(&self) -> Result<(), ScenarioError> {
        const CALL: &str = "NodeGetCapabilities";
        let caps = expect_success(CALL, self.plugin.node.node_get_capabilities().await)?;
        for cap in caps {
            let kind = descriptor(CALL, "rpc", cap.rpc)?;
            ensure(CALL, NodeRpcType::from_i32(kind).is_some(), || {
                format!("unknown capability type {kind}")
            })?;
        }
        Ok(())
    }
}

fn descriptor(
    call: &'static str,
    field: &str,
    entry: Option<CapabilityType>,
) -> Result<i32, ScenarioError> {
    entry.map(|c| c.kind).ok_or_else(|| ScenarioError::ProtocolViolation {
        call,
        detail: format!("capability entry without {field} descriptor"),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use libcsi::backend::mock::{Faults, MockConfig, MockPlugin};

    use super::*;
    use crate::error::FailureKind;

    fn clients(config: MockConfig) -> PluginClients {
        PluginClients::from_plugin(Arc::new(MockPlugin::new(config)))
    }

    #[tokio::test]
    async fn flags_follow_advertisement() {
        let plugin = clients(MockConfig {
            controller_publish: false,
            node_stage: true,
            volume_stats: false,
            accessibility_constraints: true,
            ..Default::default()
        });
        let flags = CapabilityRegistry::new(&plugin).probe().await.unwrap();
        assert_eq!(
            flags,
            CapabilityFlags {
                controller_publish: false,
                node_stage: true,
                node_volume_stats: false,
                accessibility_constraints: true,
            }
        );
        assert!(flags.supports(Capability::NodeStage));
        assert!(!flags.supports(Capability::NodeVolumeStats));
    }

    #[tokio::test]
    async fn unknown_types_are_tolerated_by_probe() {
        let plugin = clients(MockConfig {
            faults: Faults {
                extra_node_capability: Some(77),
                ..Default::default()
            },
            ..Default::default()
        });
        let registry = CapabilityRegistry::new(&plugin);
        assert!(registry.probe().await.is_ok());

        let err = registry.check_node_capabilities().await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::ProtocolViolation);
    }

    #[tokio::test]
    async fn empty_descriptor_is_a_hard_failure() {
        let plugin = clients(MockConfig {
            faults: Faults {
                empty_node_capability: true,
                ..Default::default()
            },
            ..Default::default()
        });
        let err = CapabilityRegistry::new(&plugin).probe().await.unwrap_err();
        assert_eq!(err.call(), "NodeGetCapabilities");
        assert_eq!(err.kind(), FailureKind::ProtocolViolation);
    }
}
