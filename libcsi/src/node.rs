//! CSI Node service trait.
//!
//! The Node service runs on each worker node and handles the local filesystem
//! operations required to make a volume usable:
//!
//! 1. **Stage**: prepare the volume at a node-global staging path (optional).
//! 2. **Publish**: make the volume usable at its final target path.
//! 3. **Unpublish**: undo the publish.
//! 4. **Unstage**: undo the stage.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    NodeGetVolumeStatsRequest, NodeInfo, NodePublishVolumeRequest, NodeServiceCapability,
    NodeStageVolumeRequest, NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest, VolumeStats,
};

/// Node service: local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Stage a volume at the global staging path.
    async fn node_stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError>;

    /// Unstage a volume from the staging path.
    async fn node_unstage_volume(&self, req: NodeUnstageVolumeRequest) -> Result<(), CsiError>;

    /// Publish a volume at its target path.
    async fn node_publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError>;

    /// Unpublish a volume from its target path.
    async fn node_unpublish_volume(&self, req: NodeUnpublishVolumeRequest)
    -> Result<(), CsiError>;

    /// Report usage of a volume at a path it is staged or published at.
    async fn node_get_volume_stats(
        &self,
        req: NodeGetVolumeStatsRequest,
    ) -> Result<VolumeStats, CsiError>;

    /// Advertise the optional node RPCs this plugin implements.
    async fn node_get_capabilities(&self) -> Result<Vec<NodeServiceCapability>, CsiError>;

    /// Return information about the node on which this service is running.
    async fn node_get_info(&self) -> Result<NodeInfo, CsiError>;
}
