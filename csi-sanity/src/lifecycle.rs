//! The volume lifecycle state machine.
//!
//! A volume moves through
//!
//! ```text
//! Unprovisioned -> Created -> [ControllerPublished] -> [Staged] -> Published
//!   -> [StatsQueried] -> Unpublished -> [Unstaged] -> [ControllerUnpublished]
//!   -> Deleted
//! ```
//!
//! Bracketed states run only when the matching [`CapabilityFlags`] entry is
//! set; otherwise the walk moves straight on to the next enabled state.  The
//! walk is strictly sequential and stops at the first failing step.  Every
//! resource is registered with the scenario's tracker as soon as the plugin
//! reports it provisioned, and the unwinding states release resources
//! through the tracker so teardown never repeats a call the walk already
//! made.

use std::collections::HashMap;

use libcsi::{
    Code, ControllerPublishVolumeRequest, CreateVolumeRequest, NodeGetVolumeStatsRequest,
    NodePublishVolumeRequest, NodeStageVolumeRequest, VolumeCapability, VolumeId,
};
use tracing::{debug, info};

use crate::assertion::{expect_error, expect_success, require_non_empty, require_usage};
use crate::capability::{Capability, CapabilityFlags};
use crate::context::ScenarioContext;
use crate::error::ScenarioError;
use crate::tracker::TrackedResource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Unprovisioned,
    Created,
    ControllerPublished,
    Staged,
    Published,
    StatsQueried,
    Unpublished,
    Unstaged,
    ControllerUnpublished,
    Deleted,
}

impl LifecycleState {
    pub const ORDER: [LifecycleState; 10] = [
        Self::Unprovisioned,
        Self::Created,
        Self::ControllerPublished,
        Self::Staged,
        Self::Published,
        Self::StatsQueried,
        Self::Unpublished,
        Self::Unstaged,
        Self::ControllerUnpublished,
        Self::Deleted,
    ];

    /// The capability gating this state, `None` for mandatory states.
    pub fn requirement(self) -> Option<Capability> {
        match self {
            Self::ControllerPublished | Self::ControllerUnpublished => {
                Some(Capability::ControllerPublish)
            }
            Self::Staged | Self::Unstaged => Some(Capability::NodeStage),
            Self::StatsQueried => Some(Capability::NodeVolumeStats),
            _ => None,
        }
    }

    pub fn is_enabled(self, flags: &CapabilityFlags) -> bool {
        self.requirement().is_none_or(|cap| flags.supports(cap))
    }

    /// The state that follows `self` under `flags`, `None` after `Deleted`.
    pub fn next(self, flags: &CapabilityFlags) -> Option<Self> {
        Self::ORDER
            .iter()
            .copied()
            .skip_while(|s| *s != self)
            .skip(1)
            .find(|s| s.is_enabled(flags))
    }

    /// Every state a full walk visits under `flags`, in order.
    pub fn plan(flags: &CapabilityFlags) -> Vec<Self> {
        std::iter::successors(Self::Unprovisioned.next(flags), |s| s.next(flags)).collect()
    }
}

/// A volume created earlier in the same scenario.
///
/// Only [`provision_volume`] hands these out, so a lifecycle call can never
/// reference a volume the scenario did not create.
#[derive(Debug, Clone)]
pub struct VolumeHandle {
    id: VolumeId,
    context: HashMap<String, String>,
}

impl VolumeHandle {
    pub fn id(&self) -> &VolumeId {
        &self.id
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }
}

/// Create a single-node-writer volume named after `prefix` and register it.
pub async fn provision_volume(
    ctx: &mut ScenarioContext,
    prefix: &str,
) -> Result<VolumeHandle, ScenarioError> {
    const CALL: &str = "CreateVolume";
    let name = ctx.unique_name(prefix);
    let volume = expect_success(
        CALL,
        ctx.plugin
            .controller
            .create_volume(CreateVolumeRequest {
                name: name.clone(),
                volume_capabilities: vec![VolumeCapability::single_node_writer()],
                parameters: ctx.config.test_volume_parameters.clone(),
                secrets: ctx.config.secrets.create_volume.clone(),
                ..Default::default()
            })
            .await,
    )?;
    require_non_empty(CALL, "volume_id", &volume.volume_id.0)?;

    ctx.tracker
        .register(TrackedResource::volume(volume.volume_id.clone()));
    info!(%name, volume_id = %volume.volume_id, "volume created");
    Ok(VolumeHandle {
        id: volume.volume_id,
        context: volume.volume_context,
    })
}

/// Result of attaching a volume to the node under test.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub node_id: String,
    pub publish_context: HashMap<String, String>,
}

/// Look up the node id and controller-publish `volume` to it.  The
/// attachment is registered before returning.
pub async fn attach_volume(
    ctx: &mut ScenarioContext,
    volume: &VolumeHandle,
) -> Result<Attachment, ScenarioError> {
    let info = expect_success("NodeGetInfo", ctx.plugin.node.node_get_info().await)?;
    require_non_empty("NodeGetInfo", "node_id", &info.node_id)?;

    let resp = expect_success(
        "ControllerPublishVolume",
        ctx.plugin
            .controller
            .controller_publish_volume(ControllerPublishVolumeRequest {
                volume_id: volume.id().clone(),
                node_id: info.node_id.clone(),
                volume_capability: Some(VolumeCapability::single_node_writer()),
                readonly: false,
                secrets: ctx.config.secrets.controller_publish_volume.clone(),
                volume_context: volume.context().clone(),
            })
            .await,
    )?;
    ctx.tracker.register(TrackedResource::attachment(
        volume.id().clone(),
        info.node_id.clone(),
    ));
    debug!(volume_id = %volume.id(), node_id = %info.node_id, "volume attached");
    Ok(Attachment {
        node_id: info.node_id,
        publish_context: resp.publish_context,
    })
}

/// Where the `StatsQueried` step looks and what it expects.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StatsCheck {
    /// Query at the target path; usage must be reported.
    #[default]
    AtTarget,
    /// Query at a path the volume is not mounted at; `NOT_FOUND` is required.
    NotMountedAt(String),
}

/// One walk through the lifecycle.
#[derive(Debug, Clone)]
pub struct VolumeLifecycle {
    prefix: String,
    stats: StatsCheck,
}

/// State accumulated along the walk.
struct Walk {
    volume: VolumeHandle,
    node_id: String,
    publish_context: HashMap<String, String>,
}

impl VolumeLifecycle {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            stats: StatsCheck::default(),
        }
    }

    pub fn with_stats_check(mut self, stats: StatsCheck) -> Self {
        self.stats = stats;
        self
    }

    /// Drive the volume through every state enabled by `ctx.flags`.
    ///
    /// Returns the states reached.  The first failing step aborts the walk;
    /// whatever was registered up to that point is left to the tracker.
    pub async fn run(
        &self,
        ctx: &mut ScenarioContext,
    ) -> Result<Vec<LifecycleState>, ScenarioError> {
        let flags = ctx.flags;
        debug!(state = ?LifecycleState::Created, "entering lifecycle state");
        let mut walk = Walk {
            volume: provision_volume(ctx, &self.prefix).await?,
            node_id: String::new(),
            publish_context: HashMap::new(),
        };
        let mut visited = vec![LifecycleState::Created];

        // Every plan opens with `Created`.
        for state in LifecycleState::plan(&flags).into_iter().skip(1) {
            debug!(?state, "entering lifecycle state");
            self.step(ctx, &mut walk, state).await?;
            visited.push(state);
        }
        Ok(visited)
    }

    async fn step(
        &self,
        ctx: &mut ScenarioContext,
        walk: &mut Walk,
        state: LifecycleState,
    ) -> Result<(), ScenarioError> {
        let volume = &walk.volume;
        let id = volume.id().clone();
        let config = &ctx.config;

        match state {
            // Provisioning happens in `run` before the first step.
            LifecycleState::Unprovisioned | LifecycleState::Created => {}

            LifecycleState::ControllerPublished => {
                let attachment = attach_volume(ctx, volume).await?;
                walk.node_id = attachment.node_id;
                walk.publish_context = attachment.publish_context;
            }

            LifecycleState::Staged => {
                expect_success(
                    "NodeStageVolume",
                    ctx.plugin
                        .node
                        .node_stage_volume(NodeStageVolumeRequest {
                            volume_id: id.clone(),
                            publish_context: walk.publish_context.clone(),
                            staging_target_path: config.staging_path.clone(),
                            volume_capability: Some(VolumeCapability::single_node_writer()),
                            secrets: config.secrets.node_stage_volume.clone(),
                            volume_context: volume.context().clone(),
                        })
                        .await,
                )?;
                let staging_path = config.staging_path.clone();
                ctx.tracker
                    .register(TrackedResource::staging(id, staging_path));
            }

            LifecycleState::Published => {
                let staging_target_path = if ctx.flags.node_stage {
                    config.staging_path.clone()
                } else {
                    String::new()
                };
                expect_success(
                    "NodePublishVolume",
                    ctx.plugin
                        .node
                        .node_publish_volume(NodePublishVolumeRequest {
                            volume_id: id.clone(),
                            publish_context: walk.publish_context.clone(),
                            staging_target_path,
                            target_path: config.target_path.clone(),
                            volume_capability: Some(VolumeCapability::single_node_writer()),
                            readonly: false,
                            secrets: config.secrets.node_publish_volume.clone(),
                            volume_context: volume.context().clone(),
                        })
                        .await,
                )?;
                let target_path = config.target_path.clone();
                ctx.tracker
                    .register(TrackedResource::publication(id, target_path));
            }

            LifecycleState::StatsQueried => {
                const CALL: &str = "NodeGetVolumeStats";
                let volume_path = match &self.stats {
                    StatsCheck::AtTarget => config.target_path.clone(),
                    StatsCheck::NotMountedAt(path) => path.clone(),
                };
                let result = ctx
                    .plugin
                    .node
                    .node_get_volume_stats(NodeGetVolumeStatsRequest {
                        volume_id: id,
                        volume_path,
                    })
                    .await;
                match &self.stats {
                    StatsCheck::AtTarget => require_usage(CALL, &expect_success(CALL, result)?)?,
                    StatsCheck::NotMountedAt(_) => expect_error(CALL, result, Code::NotFound)?,
                }
            }

            LifecycleState::Unpublished => {
                let publication = TrackedResource::publication(id, config.target_path.clone());
                expect_success(
                    "NodeUnpublishVolume",
                    ctx.tracker.release(&publication).await,
                )?;
            }

            LifecycleState::Unstaged => {
                let staging = TrackedResource::staging(id, config.staging_path.clone());
                expect_success("NodeUnstageVolume", ctx.tracker.release(&staging).await)?;
            }

            LifecycleState::ControllerUnpublished => {
                let attachment = TrackedResource::attachment(id, walk.node_id.clone());
                expect_success(
                    "ControllerUnpublishVolume",
                    ctx.tracker.release(&attachment).await,
                )?;
            }

            LifecycleState::Deleted => {
                expect_success(
                    "DeleteVolume",
                    ctx.tracker.release(&TrackedResource::volume(id)).await,
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use libcsi::backend::mock::{Faults, MockConfig, MockPlugin};

    use super::*;
    use crate::capability::CapabilityRegistry;
    use crate::config::SanityConfig;
    use crate::context::PluginClients;
    use crate::error::FailureKind;
    use crate::naming::IdentifierGenerator;
    use LifecycleState::*;

    const ALL: CapabilityFlags = CapabilityFlags {
        controller_publish: true,
        node_stage: true,
        node_volume_stats: true,
        accessibility_constraints: false,
    };

    async fn context_for(plugin: &Arc<MockPlugin>) -> ScenarioContext {
        let clients = PluginClients::from_plugin(Arc::clone(plugin));
        let flags = CapabilityRegistry::new(&clients).probe().await.unwrap();
        ScenarioContext::new(
            clients,
            Arc::new(SanityConfig::new("/tmp/csi/staging", "/tmp/csi/target")),
            flags,
            Arc::new(IdentifierGenerator::with_run_token("test")),
        )
    }

    #[test]
    fn plan_skips_disabled_states() {
        assert_eq!(LifecycleState::plan(&ALL), LifecycleState::ORDER[1..].to_vec());
        assert_eq!(
            LifecycleState::plan(&CapabilityFlags::default()),
            vec![Created, Published, Unpublished, Deleted]
        );

        let stage_only = CapabilityFlags {
            node_stage: true,
            ..Default::default()
        };
        assert_eq!(
            LifecycleState::plan(&stage_only),
            vec![Created, Staged, Published, Unpublished, Unstaged, Deleted]
        );
        assert_eq!(Published.next(&stage_only), Some(Unpublished));
        assert_eq!(Deleted.next(&ALL), None);
    }

    #[tokio::test]
    async fn full_walk_with_every_capability() {
        let plugin = Arc::new(MockPlugin::new(MockConfig::default()));
        let mut ctx = context_for(&plugin).await;

        let visited = VolumeLifecycle::new("sanity-node-full")
            .run(&mut ctx)
            .await
            .unwrap();
        assert_eq!(visited, LifecycleState::plan(&ALL));
        assert!(ctx.tracker.pending().is_empty());
        assert_eq!(plugin.volume_count(), 0);

        let rpcs: Vec<String> = plugin
            .calls()
            .iter()
            .filter_map(|c| c.split(' ').next().map(str::to_owned))
            .collect();
        assert_eq!(
            rpcs,
            [
                "CreateVolume",
                "ControllerPublishVolume",
                "NodeStageVolume",
                "NodePublishVolume",
                "NodeUnpublishVolume",
                "NodeUnstageVolume",
                "ControllerUnpublishVolume",
                "DeleteVolume",
            ]
        );
    }

    #[tokio::test]
    async fn minimal_plugin_walks_mandatory_states_only() {
        let plugin = Arc::new(MockPlugin::new(MockConfig {
            controller_publish: false,
            node_stage: false,
            volume_stats: false,
            ..Default::default()
        }));
        let mut ctx = context_for(&plugin).await;

        let visited = VolumeLifecycle::new("minimal").run(&mut ctx).await.unwrap();
        assert_eq!(visited, vec![Created, Published, Unpublished, Deleted]);
        assert_eq!(plugin.volume_count(), 0);
    }

    #[tokio::test]
    async fn flags_stay_frozen_for_the_walk() {
        let plugin = Arc::new(MockPlugin::new(MockConfig {
            volume_stats: false,
            ..Default::default()
        }));
        let mut ctx = context_for(&plugin).await;
        // The plugin starts advertising stats after the probe.
        plugin.reconfigure(|c| c.volume_stats = true);

        let visited = VolumeLifecycle::new("frozen").run(&mut ctx).await.unwrap();
        assert!(!visited.contains(&StatsQueried));
    }

    #[tokio::test]
    async fn stats_at_foreign_path_must_be_not_found() {
        let plugin = Arc::new(MockPlugin::new(MockConfig::default()));
        let mut ctx = context_for(&plugin).await;

        VolumeLifecycle::new("wrong-path")
            .with_stats_check(StatsCheck::NotMountedAt("some/path".into()))
            .run(&mut ctx)
            .await
            .unwrap();

        // A plugin that reports usage for any path is caught.
        plugin.reconfigure(|c| c.faults.ignore_volume_path = true);
        let err = VolumeLifecycle::new("wrong-path")
            .with_stats_check(StatsCheck::NotMountedAt("some/path".into()))
            .run(&mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::UnexpectedSuccess);
    }

    #[tokio::test]
    async fn failed_step_leaves_resources_tracked() {
        let plugin = Arc::new(MockPlugin::new(MockConfig {
            faults: Faults {
                empty_usage: true,
                ..Default::default()
            },
            ..Default::default()
        }));
        let mut ctx = context_for(&plugin).await;

        let err = VolumeLifecycle::new("leaky").run(&mut ctx).await.unwrap_err();
        assert_eq!(err.call(), "NodeGetVolumeStats");
        assert_eq!(ctx.tracker.pending().len(), 4);

        assert!(ctx.tracker.teardown_all().await.is_empty());
        assert_eq!(plugin.volume_count(), 0);
    }

    #[tokio::test]
    async fn empty_node_id_stops_before_attaching() {
        let plugin = Arc::new(MockPlugin::new(MockConfig {
            faults: Faults {
                empty_node_id: true,
                ..Default::default()
            },
            ..Default::default()
        }));
        let mut ctx = context_for(&plugin).await;

        let err = VolumeLifecycle::new("nonode").run(&mut ctx).await.unwrap_err();
        assert_eq!(err.call(), "NodeGetInfo");
        assert_eq!(err.kind(), FailureKind::ProtocolViolation);
        // Only the volume itself was provisioned.
        assert_eq!(ctx.tracker.pending().len(), 1);

        assert!(ctx.tracker.teardown_all().await.is_empty());
        assert_eq!(plugin.volume_count(), 0);
        assert!(
            !plugin
                .calls()
                .iter()
                .any(|c| c.starts_with("ControllerPublishVolume"))
        );
    }

    #[tokio::test]
    async fn empty_volume_id_fails_creation() {
        let plugin = Arc::new(MockPlugin::new(MockConfig {
            faults: Faults {
                empty_volume_id: true,
                ..Default::default()
            },
            ..Default::default()
        }));
        let mut ctx = context_for(&plugin).await;

        let err = provision_volume(&mut ctx, "noid").await.unwrap_err();
        assert_eq!(err.call(), "CreateVolume");
        assert_eq!(err.kind(), FailureKind::ProtocolViolation);
        assert!(ctx.tracker.pending().is_empty());
    }
}
