//! In-memory mock plugin.
//!
//! [`MockPlugin`] implements [`CsiIdentity`], [`CsiController`], and
//! [`CsiNode`] entirely in memory.  It follows the CSI error contract
//! (`INVALID_ARGUMENT` for missing required fields, `NOT_FOUND` for unknown
//! volumes or paths a volume is not mounted at) and is the reference target
//! for the conformance harness.  Optional services are switched on and off
//! through [`MockConfig`], and [`Faults`] make it misbehave in controlled
//! ways so the harness's failure paths can be exercised.
//!
//! Nothing is mounted: staging and publishing only record the paths.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, instrument};

use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::node::CsiNode;
use crate::status::Status;
use crate::types::*;

/// Plugin name reported by `GetPluginInfo`.
pub const MOCK_PLUGIN_NAME: &str = "mock.csi.rk8s.io";

/// Publish context key handed out by `ControllerPublishVolume`.
const PUBLISH_CONTEXT_DEVICE: &str = "device";

const MOCK_CAPACITY_BYTES: i64 = 1024 * 1024 * 1024;

/// Deliberate protocol violations the mock can commit.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Accept requests with missing required fields.
    pub skip_validation: bool,
    /// Report usage for any path, mounted or not.
    pub ignore_volume_path: bool,
    /// Return an empty volume id from `CreateVolume`.
    pub empty_volume_id: bool,
    /// Return an empty `VolumeStats` from `NodeGetVolumeStats`.
    pub empty_usage: bool,
    /// Fail every `NodeUnpublishVolume` with `INTERNAL`.
    pub fail_node_unpublish: bool,
    /// Fail every `DeleteVolume` with `INTERNAL`.
    pub fail_delete: bool,
    /// Advertise an additional node capability with this raw type.
    pub extra_node_capability: Option<i32>,
    /// Advertise a node capability entry without a descriptor.
    pub empty_node_capability: bool,
    /// Return an empty node id from `NodeGetInfo`.
    pub empty_node_id: bool,
}

/// Optional services the mock advertises, plus injected faults.
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub node_id: String,
    pub controller_publish: bool,
    pub node_stage: bool,
    pub volume_stats: bool,
    pub accessibility_constraints: bool,
    pub faults: Faults,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            node_id: "mock-node".to_owned(),
            controller_publish: true,
            node_stage: true,
            volume_stats: true,
            accessibility_constraints: false,
            faults: Faults::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct MockVolume {
    name: String,
    volume: Volume,
    attached_to: HashSet<String>,
    staged_at: Option<String>,
    published_at: HashSet<String>,
}

/// In-memory CSI plugin.
///
/// # Thread safety
///
/// Volume state lives in concurrent maps ([`DashMap`]); the configuration
/// and the call journal sit behind mutexes so tests can flip capabilities
/// while a client holds a reference to the plugin.
pub struct MockPlugin {
    config: Mutex<MockConfig>,
    volumes: DashMap<VolumeId, MockVolume>,
    /// Maps the caller-supplied volume name to the assigned [`VolumeId`],
    /// making `create_volume` idempotent.
    volume_names: DashMap<String, VolumeId>,
    journal: Mutex<Vec<String>>,
}

impl MockPlugin {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config: Mutex::new(config),
            volumes: DashMap::new(),
            volume_names: DashMap::new(),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> MockConfig {
        lock(&self.config).clone()
    }

    /// Change the configuration; subsequent calls observe the new settings.
    pub fn reconfigure(&self, update: impl FnOnce(&mut MockConfig)) {
        update(&mut lock(&self.config));
    }

    /// Every mutating call received so far, formatted as `"<Rpc> <volume-id>"`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.journal).clone()
    }

    /// Number of volumes currently provisioned.
    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    /// Whether `volume_id` is attached to any node.
    pub fn is_attached(&self, volume_id: &VolumeId) -> bool {
        self.volumes
            .get(volume_id)
            .is_some_and(|v| !v.attached_to.is_empty())
    }

    fn record(&self, rpc: &str, volume_id: &VolumeId) {
        lock(&self.journal).push(format!("{rpc} {volume_id}"));
    }

    fn not_found(volume_id: &VolumeId) -> CsiError {
        Status::not_found(format!("volume {volume_id} does not exist")).into()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Required-field check shared by every RPC.  With `skip` set the check is
/// bypassed, which is how the mock simulates a non-conforming plugin.
fn require(skip: bool, present: bool, field: &str) -> Result<(), CsiError> {
    if skip || present {
        Ok(())
    } else {
        Err(Status::invalid_argument(format!("{field} is required")).into())
    }
}

// ---------------------------------------------------------------------------
// CsiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiIdentity for MockPlugin {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: MOCK_PLUGIN_NAME.to_owned(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
            manifest: HashMap::new(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        let config = self.config();
        let mut caps = vec![PluginCapability::service(
            PluginServiceType::ControllerService,
        )];
        if config.accessibility_constraints {
            caps.push(PluginCapability::service(
                PluginServiceType::VolumeAccessibilityConstraints,
            ));
        }
        Ok(caps)
    }
}

// ---------------------------------------------------------------------------
// CsiController
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiController for MockPlugin {
    #[instrument(skip(self, req), fields(name = %req.name))]
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        let config = self.config();
        let skip = config.faults.skip_validation;
        require(skip, !req.name.is_empty(), "name")?;
        require(
            skip,
            !req.volume_capabilities.is_empty(),
            "volume_capabilities",
        )?;

        let existing = self.volume_names.get(&req.name).map(|r| r.clone());
        if let Some(id) = existing
            && let Some(vol) = self.volumes.get(&id)
        {
            debug!(name = %req.name, %id, "returning existing volume for idempotent create");
            return Ok(vol.volume.clone());
        }

        let volume_id = VolumeId(format!("mock-{}", uuid::Uuid::new_v4()));
        let capacity_bytes = req
            .capacity_range
            .map(|r| r.required_bytes)
            .filter(|bytes| *bytes > 0)
            .unwrap_or(MOCK_CAPACITY_BYTES);
        let accessible_topology = if config.accessibility_constraints {
            vec![Topology {
                segments: HashMap::from([("node".to_owned(), config.node_id.clone())]),
            }]
        } else {
            Vec::new()
        };
        let mut volume_context = req.parameters;
        volume_context.insert("name".to_owned(), req.name.clone());
        let volume = Volume {
            volume_id: volume_id.clone(),
            capacity_bytes,
            volume_context,
            accessible_topology,
        };

        self.volumes.insert(
            volume_id.clone(),
            MockVolume {
                name: req.name.clone(),
                volume: volume.clone(),
                attached_to: HashSet::new(),
                staged_at: None,
                published_at: HashSet::new(),
            },
        );
        self.volume_names.insert(req.name, volume_id.clone());
        self.record("CreateVolume", &volume_id);
        info!(%volume_id, "volume created");

        if config.faults.empty_volume_id {
            return Ok(Volume {
                volume_id: VolumeId::default(),
                ..volume
            });
        }
        Ok(volume)
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<(), CsiError> {
        let config = self.config();
        require(
            config.faults.skip_validation,
            !req.volume_id.is_empty(),
            "volume_id",
        )?;
        self.record("DeleteVolume", &req.volume_id);
        if config.faults.fail_delete {
            return Err(Status::internal("injected delete failure").into());
        }

        // Deleting an unknown volume succeeds.
        if let Some((_, vol)) = self.volumes.remove(&req.volume_id) {
            self.volume_names.remove(&vol.name);
            info!(volume_id = %req.volume_id, "volume deleted");
        }
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, node_id = %req.node_id))]
    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
    ) -> Result<ControllerPublishVolumeResponse, CsiError> {
        let config = self.config();
        if !config.controller_publish {
            return Err(Status::unimplemented("ControllerPublishVolume").into());
        }
        let skip = config.faults.skip_validation;
        require(skip, !req.volume_id.is_empty(), "volume_id")?;
        require(skip, !req.node_id.is_empty(), "node_id")?;
        require(skip, req.volume_capability.is_some(), "volume_capability")?;

        if req.node_id != config.node_id {
            return Err(Status::not_found(format!("node {} does not exist", req.node_id)).into());
        }
        let mut vol = self
            .volumes
            .get_mut(&req.volume_id)
            .ok_or_else(|| Self::not_found(&req.volume_id))?;
        vol.attached_to.insert(req.node_id.clone());
        drop(vol);
        self.record("ControllerPublishVolume", &req.volume_id);

        Ok(ControllerPublishVolumeResponse {
            publish_context: HashMap::from([(
                PUBLISH_CONTEXT_DEVICE.to_owned(),
                format!("/dev/mock/{}", req.volume_id),
            )]),
        })
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, node_id = %req.node_id))]
    async fn controller_unpublish_volume(
        &self,
        req: ControllerUnpublishVolumeRequest,
    ) -> Result<(), CsiError> {
        let config = self.config();
        if !config.controller_publish {
            return Err(Status::unimplemented("ControllerUnpublishVolume").into());
        }
        require(
            config.faults.skip_validation,
            !req.volume_id.is_empty(),
            "volume_id",
        )?;

        let mut vol = self
            .volumes
            .get_mut(&req.volume_id)
            .ok_or_else(|| Self::not_found(&req.volume_id))?;
        if req.node_id.is_empty() {
            vol.attached_to.clear();
        } else {
            vol.attached_to.remove(&req.node_id);
        }
        drop(vol);
        self.record("ControllerUnpublishVolume", &req.volume_id);
        Ok(())
    }

    async fn controller_get_capabilities(
        &self,
    ) -> Result<Vec<ControllerServiceCapability>, CsiError> {
        let mut caps = vec![ControllerServiceCapability::rpc(
            ControllerRpcType::CreateDeleteVolume,
        )];
        if self.config().controller_publish {
            caps.push(ControllerServiceCapability::rpc(
                ControllerRpcType::PublishUnpublishVolume,
            ));
        }
        Ok(caps)
    }
}

// ---------------------------------------------------------------------------
// CsiNode
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiNode for MockPlugin {
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn node_stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        let config = self.config();
        if !config.node_stage {
            return Err(Status::unimplemented("NodeStageVolume").into());
        }
        let skip = config.faults.skip_validation;
        require(skip, !req.volume_id.is_empty(), "volume_id")?;
        require(
            skip,
            !req.staging_target_path.is_empty(),
            "staging_target_path",
        )?;
        require(skip, req.volume_capability.is_some(), "volume_capability")?;

        let mut vol = self
            .volumes
            .get_mut(&req.volume_id)
            .ok_or_else(|| Self::not_found(&req.volume_id))?;
        if config.controller_publish && !vol.attached_to.contains(&config.node_id) {
            return Err(Status::failed_precondition(format!(
                "volume {} is not attached to {}",
                req.volume_id, config.node_id
            ))
            .into());
        }
        vol.staged_at = Some(req.staging_target_path.clone());
        drop(vol);
        self.record("NodeStageVolume", &req.volume_id);
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn node_unstage_volume(&self, req: NodeUnstageVolumeRequest) -> Result<(), CsiError> {
        let config = self.config();
        if !config.node_stage {
            return Err(Status::unimplemented("NodeUnstageVolume").into());
        }
        let skip = config.faults.skip_validation;
        require(skip, !req.volume_id.is_empty(), "volume_id")?;
        require(
            skip,
            !req.staging_target_path.is_empty(),
            "staging_target_path",
        )?;

        let mut vol = self
            .volumes
            .get_mut(&req.volume_id)
            .ok_or_else(|| Self::not_found(&req.volume_id))?;
        if vol.staged_at.as_deref() == Some(req.staging_target_path.as_str()) {
            vol.staged_at = None;
        }
        drop(vol);
        self.record("NodeUnstageVolume", &req.volume_id);
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn node_publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        let config = self.config();
        let skip = config.faults.skip_validation;
        require(skip, !req.volume_id.is_empty(), "volume_id")?;
        require(skip, !req.target_path.is_empty(), "target_path")?;
        require(skip, req.volume_capability.is_some(), "volume_capability")?;

        let mut vol = self
            .volumes
            .get_mut(&req.volume_id)
            .ok_or_else(|| Self::not_found(&req.volume_id))?;
        if config.node_stage
            && vol.staged_at.as_deref() != Some(req.staging_target_path.as_str())
        {
            return Err(Status::failed_precondition(format!(
                "volume {} is not staged at '{}'",
                req.volume_id, req.staging_target_path
            ))
            .into());
        }
        vol.published_at.insert(req.target_path.clone());
        drop(vol);
        self.record("NodePublishVolume", &req.volume_id);
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn node_unpublish_volume(
        &self,
        req: NodeUnpublishVolumeRequest,
    ) -> Result<(), CsiError> {
        let config = self.config();
        let skip = config.faults.skip_validation;
        require(skip, !req.volume_id.is_empty(), "volume_id")?;
        require(skip, !req.target_path.is_empty(), "target_path")?;

        self.record("NodeUnpublishVolume", &req.volume_id);
        if config.faults.fail_node_unpublish {
            return Err(Status::internal("injected unpublish failure").into());
        }
        let mut vol = self
            .volumes
            .get_mut(&req.volume_id)
            .ok_or_else(|| Self::not_found(&req.volume_id))?;
        vol.published_at.remove(&req.target_path);
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, path = %req.volume_path))]
    async fn node_get_volume_stats(
        &self,
        req: NodeGetVolumeStatsRequest,
    ) -> Result<VolumeStats, CsiError> {
        let config = self.config();
        if !config.volume_stats {
            return Err(Status::unimplemented("NodeGetVolumeStats").into());
        }
        let skip = config.faults.skip_validation;
        require(skip, !req.volume_id.is_empty(), "volume_id")?;
        require(skip, !req.volume_path.is_empty(), "volume_path")?;

        let vol = self
            .volumes
            .get(&req.volume_id)
            .ok_or_else(|| Self::not_found(&req.volume_id))?;
        let mounted_here = vol.published_at.contains(&req.volume_path)
            || vol.staged_at.as_deref() == Some(req.volume_path.as_str());
        if !mounted_here && !config.faults.ignore_volume_path {
            return Err(Status::not_found(format!(
                "volume {} is not mounted at '{}'",
                req.volume_id, req.volume_path
            ))
            .into());
        }
        if config.faults.empty_usage {
            return Ok(VolumeStats::default());
        }

        let total = vol.volume.capacity_bytes;
        Ok(VolumeStats {
            usage: vec![
                VolumeUsage {
                    available: total,
                    total,
                    used: 0,
                    unit: UsageUnit::Bytes,
                },
                VolumeUsage {
                    available: 1024,
                    total: 1024,
                    used: 0,
                    unit: UsageUnit::Inodes,
                },
            ],
        })
    }

    async fn node_get_capabilities(&self) -> Result<Vec<NodeServiceCapability>, CsiError> {
        let config = self.config();
        let mut caps = Vec::new();
        if config.node_stage {
            caps.push(NodeServiceCapability::rpc(NodeRpcType::StageUnstageVolume));
        }
        if config.volume_stats {
            caps.push(NodeServiceCapability::rpc(NodeRpcType::GetVolumeStats));
        }
        if let Some(kind) = config.faults.extra_node_capability {
            caps.push(NodeServiceCapability {
                rpc: Some(CapabilityType { kind }),
            });
        }
        if config.faults.empty_node_capability {
            caps.push(NodeServiceCapability::default());
        }
        Ok(caps)
    }

    async fn node_get_info(&self) -> Result<NodeInfo, CsiError> {
        let config = self.config();
        let node_id = if config.faults.empty_node_id {
            String::new()
        } else {
            config.node_id.clone()
        };
        Ok(NodeInfo {
            node_id,
            max_volumes_per_node: 16,
            accessible_topology: config.accessibility_constraints.then(|| Topology {
                segments: HashMap::from([("node".to_owned(), config.node_id.clone())]),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Code;

    fn create_request(name: &str) -> CreateVolumeRequest {
        CreateVolumeRequest {
            name: name.into(),
            volume_capabilities: vec![VolumeCapability::single_node_writer()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_volume_idempotent_by_name() {
        let plugin = MockPlugin::new(MockConfig::default());
        let vol1 = plugin.create_volume(create_request("my-vol")).await.unwrap();
        let vol2 = plugin.create_volume(create_request("my-vol")).await.unwrap();
        assert_eq!(vol1.volume_id, vol2.volume_id);
        assert_eq!(plugin.volume_count(), 1);
    }

    #[tokio::test]
    async fn create_without_name_is_invalid() {
        let plugin = MockPlugin::new(MockConfig::default());
        let err = plugin
            .create_volume(create_request(""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(Code::InvalidArgument));
    }

    #[tokio::test]
    async fn delete_unknown_volume_succeeds() {
        let plugin = MockPlugin::new(MockConfig::default());
        plugin
            .delete_volume(DeleteVolumeRequest {
                volume_id: "nope".into(),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn field_validation_precedes_lookup() {
        let plugin = MockPlugin::new(MockConfig::default());
        // Unknown volume, but the missing capability must be reported first.
        let err = plugin
            .node_publish_volume(NodePublishVolumeRequest {
                volume_id: "id".into(),
                target_path: "/mnt/target".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(Code::InvalidArgument));
    }

    #[tokio::test]
    async fn stats_require_a_mounted_path() {
        let plugin = MockPlugin::new(MockConfig {
            controller_publish: false,
            node_stage: false,
            ..Default::default()
        });
        let vol = plugin.create_volume(create_request("stats")).await.unwrap();
        plugin
            .node_publish_volume(NodePublishVolumeRequest {
                volume_id: vol.volume_id.clone(),
                target_path: "/mnt/target".into(),
                volume_capability: Some(VolumeCapability::single_node_writer()),
                ..Default::default()
            })
            .await
            .unwrap();

        let stats = plugin
            .node_get_volume_stats(NodeGetVolumeStatsRequest {
                volume_id: vol.volume_id.clone(),
                volume_path: "/mnt/target".into(),
            })
            .await
            .unwrap();
        assert!(!stats.usage.is_empty());

        let err = plugin
            .node_get_volume_stats(NodeGetVolumeStatsRequest {
                volume_id: vol.volume_id,
                volume_path: "/elsewhere".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(Code::NotFound));
    }

    #[tokio::test]
    async fn reconfigure_changes_advertised_capabilities() {
        let plugin = MockPlugin::new(MockConfig::default());
        assert_eq!(plugin.node_get_capabilities().await.unwrap().len(), 2);
        plugin.reconfigure(|c| c.node_stage = false);
        assert_eq!(plugin.node_get_capabilities().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_node_info() {
        let plugin = MockPlugin::new(MockConfig {
            accessibility_constraints: true,
            ..Default::default()
        });
        let info = plugin.node_get_info().await.unwrap();
        assert_eq!(info.node_id, "mock-node");
        assert!(info.accessible_topology.is_some());
    }
}
