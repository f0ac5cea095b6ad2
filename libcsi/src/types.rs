//! Core CSI types: volumes, capabilities, requests, and topology.
//!
//! These types form the data model shared by the CSI traits, transport layer,
//! and backend implementations.  They are all [`Serialize`]/[`Deserialize`] so
//! they can be transmitted over QUIC as JSON.
//!
//! Request fields follow protobuf conventions: an empty string or an absent
//! optional message means "not provided".  Conformance checks rely on being
//! able to send requests with required fields left out, so no constructor
//! here enforces presence.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Secret key/value pairs forwarded verbatim with a call.
pub type Secrets = HashMap<String, String>;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl VolumeId {
    /// `true` when no identifier was provided.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    #[default]
    Unknown,
    /// Can be published as read/write at one node at a time.
    SingleNodeWriter,
    /// Can be published as read-only at one node at a time.
    SingleNodeReaderOnly,
    /// Can be published as read-only at multiple nodes simultaneously.
    MultiNodeReaderOnly,
    /// Read-only at multiple nodes, read/write at one of them.
    MultiNodeSingleWriter,
    /// Read/write at multiple nodes simultaneously.
    MultiNodeMultiWriter,
}

/// Whether the volume is consumed as a filesystem or a raw block device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessType {
    /// Filesystem access through a mount.
    Mount {
        /// Filesystem type, empty for the plugin default.
        #[serde(default)]
        fs_type: String,
        /// Additional mount flags (e.g. `"noatime"`).
        #[serde(default)]
        mount_flags: Vec<String>,
    },
    /// Raw block device access.
    Block,
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    /// Requested access type.
    pub access_type: AccessType,
    /// Requested access mode.
    pub access_mode: AccessMode,
}

impl VolumeCapability {
    /// A mount-type capability writable from a single node, the capability
    /// every plugin has to support.
    pub fn single_node_writer() -> Self {
        Self {
            access_type: AccessType::Mount {
                fs_type: String::new(),
                mount_flags: Vec::new(),
            },
            access_mode: AccessMode::SingleNodeWriter,
        }
    }
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self::single_node_writer()
    }
}

/// Bounds on the capacity of a volume to create.  Zero means unspecified.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacityRange {
    pub required_bytes: i64,
    pub limit_bytes: i64,
}

// ---------------------------------------------------------------------------
// Volume metadata
// ---------------------------------------------------------------------------

/// Full metadata for a provisioned volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Volume {
    /// Unique volume identifier.
    #[serde(default)]
    pub volume_id: VolumeId,
    /// Provisioned capacity in bytes, zero when unknown.
    #[serde(default)]
    pub capacity_bytes: i64,
    /// Opaque context passed from Controller to Node operations.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    /// Topology constraints (e.g. node affinity).
    #[serde(default)]
    pub accessible_topology: Vec<Topology>,
}

/// Topology constraint expressed as key-value segments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topology {
    /// Topology segments, e.g. `{"node": "node-01"}`.
    #[serde(default)]
    pub segments: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Controller requests
// ---------------------------------------------------------------------------

/// Request to create a new volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateVolumeRequest {
    /// Suggested name, used by the plugin for idempotency.
    pub name: String,
    pub capacity_range: Option<CapacityRange>,
    /// Required capabilities.
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Opaque parameters forwarded to the plugin.
    pub parameters: HashMap<String, String>,
    pub secrets: Secrets,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteVolumeRequest {
    pub volume_id: VolumeId,
    pub secrets: Secrets,
}

/// Request to make a volume available on a node (attach).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerPublishVolumeRequest {
    pub volume_id: VolumeId,
    pub node_id: String,
    pub volume_capability: Option<VolumeCapability>,
    pub readonly: bool,
    pub secrets: Secrets,
    pub volume_context: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerPublishVolumeResponse {
    /// Opaque context the node service needs to stage or publish the volume.
    pub publish_context: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerUnpublishVolumeRequest {
    pub volume_id: VolumeId,
    pub node_id: String,
    pub secrets: Secrets,
}

// ---------------------------------------------------------------------------
// Node requests
// ---------------------------------------------------------------------------

/// Request to stage (globally mount) a volume on a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStageVolumeRequest {
    /// Volume to stage.
    pub volume_id: VolumeId,
    /// Context returned by `ControllerPublishVolume`.
    pub publish_context: HashMap<String, String>,
    /// Global staging mount point.
    pub staging_target_path: String,
    /// Requested capability.
    pub volume_capability: Option<VolumeCapability>,
    pub secrets: Secrets,
    /// Opaque context carried from `CreateVolume`.
    pub volume_context: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeUnstageVolumeRequest {
    pub volume_id: VolumeId,
    pub staging_target_path: String,
}

/// Request to publish (mount) a volume at its final target path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: VolumeId,
    pub publish_context: HashMap<String, String>,
    /// The staging mount point, empty when the plugin does not stage.
    pub staging_target_path: String,
    /// Path the volume has to become usable at.
    pub target_path: String,
    /// Requested capability.
    pub volume_capability: Option<VolumeCapability>,
    /// Whether the mount should be read-only.
    pub readonly: bool,
    pub secrets: Secrets,
    pub volume_context: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeUnpublishVolumeRequest {
    pub volume_id: VolumeId,
    pub target_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeGetVolumeStatsRequest {
    pub volume_id: VolumeId,
    /// Any path the volume is staged or published at.
    pub volume_path: String,
}

/// Unit a [`VolumeUsage`] entry is measured in.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum UsageUnit {
    #[default]
    Unknown,
    Bytes,
    Inodes,
}

/// One usage figure of a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VolumeUsage {
    pub available: i64,
    pub total: i64,
    pub used: i64,
    pub unit: UsageUnit,
}

/// Usage statistics returned by `NodeGetVolumeStats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeStats {
    pub usage: Vec<VolumeUsage>,
}

// ---------------------------------------------------------------------------
// Capability advertisement
// ---------------------------------------------------------------------------

/// Service-level capability types a plugin can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginServiceType {
    Unknown = 0,
    /// Plugin provides a Controller service.
    ControllerService = 1,
    /// Volumes may not be equally accessible from every node.
    VolumeAccessibilityConstraints = 2,
}

impl PluginServiceType {
    /// Map a wire value to a known type, `None` for unrecognized values.
    pub const fn from_i32(i: i32) -> Option<Self> {
        match i {
            0 => Some(Self::Unknown),
            1 => Some(Self::ControllerService),
            2 => Some(Self::VolumeAccessibilityConstraints),
            _ => None,
        }
    }
}

/// Controller RPC capability types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerRpcType {
    Unknown = 0,
    CreateDeleteVolume = 1,
    PublishUnpublishVolume = 2,
    ListVolumes = 3,
    GetCapacity = 4,
    CreateDeleteSnapshot = 5,
    ListSnapshots = 6,
    CloneVolume = 7,
    PublishReadonly = 8,
    ExpandVolume = 9,
}

impl ControllerRpcType {
    /// Map a wire value to a known type, `None` for unrecognized values.
    pub const fn from_i32(i: i32) -> Option<Self> {
        match i {
            0 => Some(Self::Unknown),
            1 => Some(Self::CreateDeleteVolume),
            2 => Some(Self::PublishUnpublishVolume),
            3 => Some(Self::ListVolumes),
            4 => Some(Self::GetCapacity),
            5 => Some(Self::CreateDeleteSnapshot),
            6 => Some(Self::ListSnapshots),
            7 => Some(Self::CloneVolume),
            8 => Some(Self::PublishReadonly),
            9 => Some(Self::ExpandVolume),
            _ => None,
        }
    }
}

/// Node RPC capability types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRpcType {
    Unknown = 0,
    StageUnstageVolume = 1,
    GetVolumeStats = 2,
}

impl NodeRpcType {
    /// Map a wire value to a known type, `None` for unrecognized values.
    pub const fn from_i32(i: i32) -> Option<Self> {
        match i {
            0 => Some(Self::Unknown),
            1 => Some(Self::StageUnstageVolume),
            2 => Some(Self::GetVolumeStats),
            _ => None,
        }
    }
}

/// Raw capability type as sent on the wire.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityType {
    #[serde(rename = "type")]
    pub kind: i32,
}

/// One entry of `GetPluginCapabilities`.  `service` is the descriptor; an
/// entry without one is malformed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PluginCapability {
    pub service: Option<CapabilityType>,
}

impl PluginCapability {
    pub fn service(kind: PluginServiceType) -> Self {
        Self {
            service: Some(CapabilityType { kind: kind as i32 }),
        }
    }
}

/// One entry of `ControllerGetCapabilities`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerServiceCapability {
    pub rpc: Option<CapabilityType>,
}

impl ControllerServiceCapability {
    pub fn rpc(kind: ControllerRpcType) -> Self {
        Self {
            rpc: Some(CapabilityType { kind: kind as i32 }),
        }
    }
}

/// One entry of `NodeGetCapabilities`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NodeServiceCapability {
    pub rpc: Option<CapabilityType>,
}

impl NodeServiceCapability {
    pub fn rpc(kind: NodeRpcType) -> Self {
        Self {
            rpc: Some(CapabilityType { kind: kind as i32 }),
        }
    }
}

// ---------------------------------------------------------------------------
// Plugin & node info
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginInfo {
    /// Plugin name in domain notation, e.g. `"mock.csi.example.com"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
    pub manifest: HashMap<String, String>,
}

/// Information about the node on which the CSI Node service runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
    /// Maximum number of volumes the node can host, zero for no limit.
    pub max_volumes_per_node: i64,
    /// Optional topology of this node.
    pub accessible_topology: Option<Topology>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_id_display() {
        let id = VolumeId("vol-abc".into());
        assert_eq!(id.to_string(), "vol-abc");
        assert!(VolumeId::default().is_empty());
    }

    #[test]
    fn missing_fields_decode_as_empty() {
        let req: NodePublishVolumeRequest =
            serde_json::from_str(r#"{"target_path":"/mnt/target"}"#).expect("deserialize");
        assert!(req.volume_id.is_empty());
        assert!(req.staging_target_path.is_empty());
        assert!(req.volume_capability.is_none());
        assert_eq!(req.target_path, "/mnt/target");
    }

    #[test]
    fn capability_type_uses_wire_name() {
        let cap = NodeServiceCapability::rpc(NodeRpcType::GetVolumeStats);
        let json = serde_json::to_string(&cap).expect("serialize");
        assert_eq!(json, r#"{"rpc":{"type":2}}"#);
    }

    #[test]
    fn unknown_capability_values_are_not_mapped() {
        assert_eq!(
            NodeRpcType::from_i32(1),
            Some(NodeRpcType::StageUnstageVolume)
        );
        assert_eq!(NodeRpcType::from_i32(42), None);
        assert_eq!(
            PluginServiceType::from_i32(2),
            Some(PluginServiceType::VolumeAccessibilityConstraints)
        );
        assert_eq!(ControllerRpcType::from_i32(-1), None);
    }

    #[test]
    fn volume_capability_default() {
        let cap = VolumeCapability::default();
        assert_eq!(cap.access_mode, AccessMode::SingleNodeWriter);
        assert!(matches!(cap.access_type, AccessType::Mount { .. }));
    }
}
