//! The node-service scenario catalog.

use async_trait::async_trait;
use libcsi::{
    Code, NodeGetVolumeStatsRequest, NodePublishVolumeRequest, NodeStageVolumeRequest,
    NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest, VolumeCapability, VolumeId,
};

use crate::assertion::{
    ensure, expect_error, expect_success, require_non_empty, require_non_negative,
};
use crate::capability::{Capability, CapabilityRegistry};
use crate::context::ScenarioContext;
use crate::error::ScenarioError;
use crate::lifecycle::{StatsCheck, VolumeLifecycle, attach_volume, provision_volume};
use crate::tracker::TrackedResource;

/// Path used where a scenario needs a location no volume is mounted at.
const FOREIGN_PATH: &str = "some/path";

/// One self-contained conformance check.
#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    /// Capability the plugin must advertise for the scenario to run.
    fn requirement(&self) -> Option<Capability> {
        None
    }

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<(), ScenarioError>;
}

/// Every scenario, in the order they are run.
pub fn node_suite() -> Vec<Box<dyn Scenario>> {
    use Malformed::*;

    let mut suite: Vec<Box<dyn Scenario>> =
        vec![Box::new(NodeGetCapabilities), Box::new(NodeGetInfo)];
    suite.extend(
        [
            PublishNoVolumeId,
            PublishNoTargetPath,
            PublishNoVolumeCapability,
            UnpublishNoVolumeId,
            UnpublishNoTargetPath,
            StageNoVolumeId,
            StageNoStagingPath,
            UnstageNoVolumeId,
            UnstageNoStagingPath,
            StatsNoVolumeId,
            StatsNoVolumePath,
        ]
        .into_iter()
        .map(|m| Box::new(MalformedRequest(m)) as Box<dyn Scenario>),
    );
    suite.push(Box::new(StageWithoutCapability));
    suite.push(Box::new(StatsVolumeNotFound));
    suite.push(Box::new(StatsWrongPath));
    suite.push(Box::new(FullLifecycle));
    suite
}

pub struct NodeGetCapabilities;

#[async_trait]
impl Scenario for NodeGetCapabilities {
    fn name(&self) -> &str {
        "node-get-capabilities"
    }

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
        CapabilityRegistry::new(&ctx.plugin)
            .check_node_capabilities()
            .await
    }
}

pub struct NodeGetInfo;

#[async_trait]
impl Scenario for NodeGetInfo {
    fn name(&self) -> &str {
        "node-get-info"
    }

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
        const CALL: &str = "NodeGetInfo";
        let info = expect_success(CALL, ctx.plugin.node.node_get_info().await)?;
        require_non_empty(CALL, "node_id", &info.node_id)?;
        require_non_negative(CALL, "max_volumes_per_node", info.max_volumes_per_node)?;
        if ctx.flags.accessibility_constraints {
            ensure(CALL, info.accessible_topology.is_some(), || {
                "accessible_topology is required with volume accessibility constraints".to_owned()
            })?;
        }
        Ok(())
    }
}

/// A single node call with one required field left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    PublishNoVolumeId,
    PublishNoTargetPath,
    PublishNoVolumeCapability,
    UnpublishNoVolumeId,
    UnpublishNoTargetPath,
    StageNoVolumeId,
    StageNoStagingPath,
    UnstageNoVolumeId,
    UnstageNoStagingPath,
    StatsNoVolumeId,
    StatsNoVolumePath,
}

/// Sends a [`Malformed`] request; the plugin must answer `INVALID_ARGUMENT`.
pub struct MalformedRequest(pub Malformed);

#[async_trait]
impl Scenario for MalformedRequest {
    fn name(&self) -> &str {
        match self.0 {
            Malformed::PublishNoVolumeId => "node-publish-no-volume-id",
            Malformed::PublishNoTargetPath => "node-publish-no-target-path",
            Malformed::PublishNoVolumeCapability => "node-publish-no-volume-capability",
            Malformed::UnpublishNoVolumeId => "node-unpublish-no-volume-id",
            Malformed::UnpublishNoTargetPath => "node-unpublish-no-target-path",
            Malformed::StageNoVolumeId => "node-stage-no-volume-id",
            Malformed::StageNoStagingPath => "node-stage-no-staging-path",
            Malformed::UnstageNoVolumeId => "node-unstage-no-volume-id",
            Malformed::UnstageNoStagingPath => "node-unstage-no-staging-path",
            Malformed::StatsNoVolumeId => "node-stats-no-volume-id",
            Malformed::StatsNoVolumePath => "node-stats-no-volume-path",
        }
    }

    fn requirement(&self) -> Option<Capability> {
        match self.0 {
            Malformed::StageNoVolumeId
            | Malformed::StageNoStagingPath
            | Malformed::UnstageNoVolumeId
            | Malformed::UnstageNoStagingPath => Some(Capability::NodeStage),
            Malformed::StatsNoVolumeId | Malformed::StatsNoVolumePath => {
                Some(Capability::NodeVolumeStats)
            }
            _ => None,
        }
    }

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
        let node = &ctx.plugin.node;
        let config = &ctx.config;
        // A placeholder id; the required-field check must fire before any lookup.
        let some_id = VolumeId::from("id");
        let capability = Some(VolumeCapability::single_node_writer());

        match self.0 {
            Malformed::PublishNoVolumeId
            | Malformed::PublishNoTargetPath
            | Malformed::PublishNoVolumeCapability => {
                let mut req = NodePublishVolumeRequest {
                    volume_id: some_id,
                    target_path: config.target_path.clone(),
                    volume_capability: capability,
                    secrets: config.secrets.node_publish_volume.clone(),
                    ..Default::default()
                };
                match self.0 {
                    Malformed::PublishNoVolumeId => req.volume_id = VolumeId::default(),
                    Malformed::PublishNoTargetPath => req.target_path.clear(),
                    _ => req.volume_capability = None,
                }
                expect_error(
                    "NodePublishVolume",
                    node.node_publish_volume(req).await,
                    Code::InvalidArgument,
                )
            }

            Malformed::UnpublishNoVolumeId | Malformed::UnpublishNoTargetPath => {
                let mut req = NodeUnpublishVolumeRequest {
                    volume_id: some_id,
                    target_path: config.target_path.clone(),
                };
                if self.0 == Malformed::UnpublishNoVolumeId {
                    req.volume_id = VolumeId::default();
                } else {
                    req.target_path.clear();
                }
                expect_error(
                    "NodeUnpublishVolume",
                    node.node_unpublish_volume(req).await,
                    Code::InvalidArgument,
                )
            }

            Malformed::StageNoVolumeId | Malformed::StageNoStagingPath => {
                let mut req = NodeStageVolumeRequest {
                    volume_id: some_id,
                    staging_target_path: config.staging_path.clone(),
                    volume_capability: capability,
                    secrets: config.secrets.node_stage_volume.clone(),
                    ..Default::default()
                };
                if self.0 == Malformed::StageNoVolumeId {
                    req.volume_id = VolumeId::default();
                } else {
                    req.staging_target_path.clear();
                }
                expect_error(
                    "NodeStageVolume",
                    node.node_stage_volume(req).await,
                    Code::InvalidArgument,
                )
            }

            Malformed::UnstageNoVolumeId | Malformed::UnstageNoStagingPath => {
                let mut req = NodeUnstageVolumeRequest {
                    volume_id: some_id,
                    staging_target_path: config.staging_path.clone(),
                };
                if self.0 == Malformed::UnstageNoVolumeId {
                    req.volume_id = VolumeId::default();
                } else {
                    req.staging_target_path.clear();
                }
                expect_error(
                    "NodeUnstageVolume",
                    node.node_unstage_volume(req).await,
                    Code::InvalidArgument,
                )
            }

            Malformed::StatsNoVolumeId | Malformed::StatsNoVolumePath => {
                let mut req = NodeGetVolumeStatsRequest {
                    volume_id: some_id,
                    volume_path: FOREIGN_PATH.to_owned(),
                };
                if self.0 == Malformed::StatsNoVolumeId {
                    req.volume_id = VolumeId::default();
                } else {
                    req.volume_path.clear();
                }
                expect_error(
                    "NodeGetVolumeStats",
                    node.node_get_volume_stats(req).await,
                    Code::InvalidArgument,
                )
            }
        }
    }
}

/// Staging a real, attached volume without a capability.
pub struct StageWithoutCapability;

#[async_trait]
impl Scenario for StageWithoutCapability {
    fn name(&self) -> &str {
        "node-stage-no-volume-capability"
    }

    fn requirement(&self) -> Option<Capability> {
        Some(Capability::NodeStage)
    }

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
        let volume = provision_volume(ctx, self.name()).await?;
        let publish_context = if ctx.flags.controller_publish {
            attach_volume(ctx, &volume).await?.publish_context
        } else {
            Default::default()
        };

        let result = ctx
            .plugin
            .node
            .node_stage_volume(NodeStageVolumeRequest {
                volume_id: volume.id().clone(),
                publish_context,
                staging_target_path: ctx.config.staging_path.clone(),
                volume_capability: None,
                secrets: ctx.config.secrets.node_stage_volume.clone(),
                volume_context: volume.context().clone(),
            })
            .await;
        if result.is_ok() {
            // Staged anyway; teardown has to unstage it.
            ctx.tracker.register(TrackedResource::staging(
                volume.id().clone(),
                ctx.config.staging_path.clone(),
            ));
        }
        expect_error("NodeStageVolume", result, Code::InvalidArgument)
    }
}

/// Stats for a volume id that was never created.
pub struct StatsVolumeNotFound;

#[async_trait]
impl Scenario for StatsVolumeNotFound {
    fn name(&self) -> &str {
        "node-stats-volume-not-found"
    }

    fn requirement(&self) -> Option<Capability> {
        Some(Capability::NodeVolumeStats)
    }

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
        let result = ctx
            .plugin
            .node
            .node_get_volume_stats(NodeGetVolumeStatsRequest {
                volume_id: VolumeId(ctx.unique_name("never-created")),
                volume_path: ctx.config.target_path.clone(),
            })
            .await;
        expect_error("NodeGetVolumeStats", result, Code::NotFound)
    }
}

/// Stats for a published volume, asked at a path it is not mounted at.
pub struct StatsWrongPath;

#[async_trait]
impl Scenario for StatsWrongPath {
    fn name(&self) -> &str {
        "node-stats-wrong-path"
    }

    fn requirement(&self) -> Option<Capability> {
        Some(Capability::NodeVolumeStats)
    }

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
        VolumeLifecycle::new(self.name())
            .with_stats_check(StatsCheck::NotMountedAt(FOREIGN_PATH.to_owned()))
            .run(ctx)
            .await
            .map(drop)
    }
}

/// The whole lifecycle, every supported optional step included.
pub struct FullLifecycle;

#[async_trait]
impl Scenario for FullLifecycle {
    fn name(&self) -> &str {
        "sanity-node-full"
    }

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
        VolumeLifecycle::new(self.name()).run(ctx).await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use libcsi::backend::mock::{Faults, MockConfig, MockPlugin};

    use super::*;
    use crate::capability::CapabilityFlags;
    use crate::config::SanityConfig;
    use crate::context::PluginClients;
    use crate::error::FailureKind;
    use crate::naming::IdentifierGenerator;

    fn context(plugin: &Arc<MockPlugin>, flags: CapabilityFlags) -> ScenarioContext {
        ScenarioContext::new(
            PluginClients::from_plugin(Arc::clone(plugin)),
            Arc::new(SanityConfig::new("/tmp/csi/staging", "/tmp/csi/target")),
            flags,
            Arc::new(IdentifierGenerator::new()),
        )
    }

    fn all_flags() -> CapabilityFlags {
        CapabilityFlags {
            controller_publish: true,
            node_stage: true,
            node_volume_stats: true,
            accessibility_constraints: false,
        }
    }

    #[test]
    fn scenario_names_are_unique() {
        let suite = node_suite();
        let names: HashSet<_> = suite.iter().map(|s| s.name().to_owned()).collect();
        assert_eq!(names.len(), suite.len());
        assert!(names.contains("sanity-node-full"));
    }

    #[tokio::test]
    async fn conforming_plugin_passes_every_scenario() {
        let plugin = Arc::new(MockPlugin::new(MockConfig::default()));
        for scenario in node_suite() {
            let mut ctx = context(&plugin, all_flags());
            scenario
                .run(&mut ctx)
                .await
                .unwrap_or_else(|e| panic!("{}: {e}", scenario.name()));
            assert!(ctx.tracker.teardown_all().await.is_empty());
        }
        assert_eq!(plugin.volume_count(), 0);
    }

    fn lax_plugin() -> Arc<MockPlugin> {
        Arc::new(MockPlugin::new(MockConfig {
            faults: Faults {
                skip_validation: true,
                ..Default::default()
            },
            ..Default::default()
        }))
    }

    fn rpcs(plugin: &MockPlugin) -> Vec<String> {
        plugin
            .calls()
            .iter()
            .filter_map(|c| c.split(' ').next().map(str::to_owned))
            .collect()
    }

    #[tokio::test]
    async fn accepted_stage_is_an_unexpected_success_and_gets_unstaged() {
        let plugin = lax_plugin();
        let mut ctx = context(&plugin, all_flags());

        let err = StageWithoutCapability.run(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::UnexpectedSuccess);
        assert_eq!(err.call(), "NodeStageVolume");
        assert_eq!(ctx.tracker.pending().len(), 3);

        assert!(ctx.tracker.teardown_all().await.is_empty());
        assert_eq!(
            rpcs(&plugin),
            [
                "CreateVolume",
                "ControllerPublishVolume",
                "NodeStageVolume",
                "NodeUnstageVolume",
                "ControllerUnpublishVolume",
                "DeleteVolume",
            ]
        );
        assert_eq!(plugin.volume_count(), 0);
    }

    #[tokio::test]
    async fn placeholder_id_reaches_the_lookup_when_validation_is_lax() {
        let plugin = lax_plugin();
        let mut ctx = context(&plugin, all_flags());

        // NOT_FOUND instead of INVALID_ARGUMENT: the wrong code, not a success.
        let err = MalformedRequest(Malformed::UnpublishNoTargetPath)
            .run(&mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::ProtocolViolation);
        assert_eq!(err.call(), "NodeUnpublishVolume");
    }

    #[tokio::test]
    async fn node_info_requires_a_node_id() {
        let plugin = Arc::new(MockPlugin::new(MockConfig {
            faults: Faults {
                empty_node_id: true,
                ..Default::default()
            },
            ..Default::default()
        }));
        let mut ctx = context(&plugin, all_flags());

        let err = NodeGetInfo.run(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::ProtocolViolation);
        assert_eq!(err.call(), "NodeGetInfo");
        assert!(ctx.tracker.pending().is_empty());
        assert!(plugin.calls().is_empty());
    }

    #[tokio::test]
    async fn node_info_requires_topology_when_advertised() {
        let plugin = Arc::new(MockPlugin::new(MockConfig::default()));
        let flags = CapabilityFlags {
            accessibility_constraints: true,
            ..all_flags()
        };
        let err = NodeGetInfo
            .run(&mut context(&plugin, flags))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::ProtocolViolation);
    }

    #[tokio::test]
    async fn stage_without_capability_cleans_up_its_volume() {
        let plugin = Arc::new(MockPlugin::new(MockConfig::default()));
        let mut ctx = context(&plugin, all_flags());

        StageWithoutCapability.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.tracker.pending().len(), 2);
        assert!(ctx.tracker.teardown_all().await.is_empty());
        assert_eq!(plugin.volume_count(), 0);
    }
}
