//! CSI protocol messages transmitted over QUIC.
//!
//! [`CsiMessage`] is the top-level envelope for all request and response
//! variants exchanged between a CSI client (the harness) and a CSI server
//! (the plugin) via QUIC bi-directional streams.

use serde::{Deserialize, Serialize};

use crate::status::Status;
use crate::types::*;

/// Top-level message envelope for CSI over QUIC.
///
/// Each QUIC bi-stream carries exactly one request followed by one response.
/// The client sends a *request* variant and the server replies with the
/// corresponding *response* variant (or [`CsiMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Requests --------------------------------------------------------
    /// Health probe (Identity).
    Probe,
    /// Query plugin info (Identity).
    GetPluginInfo,
    /// Query plugin capabilities (Identity).
    GetPluginCapabilities,

    /// Create a new volume (Controller).
    CreateVolume(CreateVolumeRequest),
    /// Delete a volume (Controller).
    DeleteVolume(DeleteVolumeRequest),
    /// Attach a volume to a node (Controller).
    ControllerPublishVolume(ControllerPublishVolumeRequest),
    /// Detach a volume from a node (Controller).
    ControllerUnpublishVolume(ControllerUnpublishVolumeRequest),
    /// Query controller capabilities (Controller).
    ControllerGetCapabilities,

    /// Stage a volume at a global path (Node).
    NodeStageVolume(NodeStageVolumeRequest),
    /// Unstage a previously staged volume (Node).
    NodeUnstageVolume(NodeUnstageVolumeRequest),
    /// Publish a volume at its target path (Node).
    NodePublishVolume(NodePublishVolumeRequest),
    /// Unpublish a previously published volume (Node).
    NodeUnpublishVolume(NodeUnpublishVolumeRequest),
    /// Query volume usage (Node).
    NodeGetVolumeStats(NodeGetVolumeStatsRequest),
    /// Query node capabilities (Node).
    NodeGetCapabilities,
    /// Query node info (Node).
    NodeGetInfo,

    // ----- Responses -------------------------------------------------------
    /// Probe result.
    ProbeResult(bool),
    /// Plugin information.
    PluginInfoResponse(PluginInfo),
    /// Plugin capabilities.
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    /// A volume was successfully created.
    VolumeCreated(Volume),
    /// A volume was attached to a node.
    ControllerPublished(ControllerPublishVolumeResponse),
    /// Controller capabilities.
    ControllerCapabilitiesResponse(Vec<ControllerServiceCapability>),
    /// Volume usage statistics.
    VolumeStatsResponse(VolumeStats),
    /// Node capabilities.
    NodeCapabilitiesResponse(Vec<NodeServiceCapability>),
    /// Node information.
    NodeInfoResponse(NodeInfo),

    /// Generic success acknowledgement (no payload).
    Ok,
    /// The call failed with a status.
    Error(Status),
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Probe => f.write_str("Probe"),
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume(req) => write!(f, "DeleteVolume({})", req.volume_id),
            Self::ControllerPublishVolume(req) => write!(
                f,
                "ControllerPublishVolume({}, node={})",
                req.volume_id, req.node_id
            ),
            Self::ControllerUnpublishVolume(req) => write!(
                f,
                "ControllerUnpublishVolume({}, node={})",
                req.volume_id, req.node_id
            ),
            Self::ControllerGetCapabilities => f.write_str("ControllerGetCapabilities"),
            Self::NodeStageVolume(req) => write!(f, "NodeStageVolume({})", req.volume_id),
            Self::NodeUnstageVolume(req) => write!(f, "NodeUnstageVolume({})", req.volume_id),
            Self::NodePublishVolume(req) => write!(f, "NodePublishVolume({})", req.volume_id),
            Self::NodeUnpublishVolume(req) => {
                write!(f, "NodeUnpublishVolume({})", req.volume_id)
            }
            Self::NodeGetVolumeStats(req) => write!(
                f,
                "NodeGetVolumeStats({}, path={})",
                req.volume_id, req.volume_path
            ),
            Self::NodeGetCapabilities => f.write_str("NodeGetCapabilities"),
            Self::NodeGetInfo => f.write_str("NodeGetInfo"),
            Self::ProbeResult(ok) => write!(f, "ProbeResult({})", ok),
            Self::PluginInfoResponse(info) => write!(f, "PluginInfo(name={})", info.name),
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::VolumeCreated(v) => write!(f, "VolumeCreated({})", v.volume_id),
            Self::ControllerPublished(resp) => write!(
                f,
                "ControllerPublished(context_keys={})",
                resp.publish_context.len()
            ),
            Self::ControllerCapabilitiesResponse(caps) => {
                write!(f, "ControllerCapabilities(count={})", caps.len())
            }
            Self::VolumeStatsResponse(stats) => {
                write!(f, "VolumeStats(entries={})", stats.usage.len())
            }
            Self::NodeCapabilitiesResponse(caps) => {
                write!(f, "NodeCapabilities(count={})", caps.len())
            }
            Self::NodeInfoResponse(info) => write!(f, "NodeInfo({})", info.node_id),
            Self::Ok => f.write_str("Ok"),
            Self::Error(status) => write!(f, "Error({})", status.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Code;

    #[test]
    fn request_without_optional_fields_survives_the_wire() {
        let msg = CsiMessage::NodeStageVolume(NodeStageVolumeRequest {
            staging_target_path: "/tmp/staging".into(),
            ..Default::default()
        });
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        match de {
            CsiMessage::NodeStageVolume(req) => {
                assert!(req.volume_id.is_empty());
                assert!(req.volume_capability.is_none());
            }
            other => panic!("unexpected message {other}"),
        }
    }

    #[test]
    fn error_message_keeps_its_code() {
        let msg = CsiMessage::Error(Status::not_found("vol-1"));
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(de, CsiMessage::Error(s) if s.code() == Code::NotFound));
    }

    #[test]
    fn display_formatting() {
        assert_eq!(CsiMessage::Ok.to_string(), "Ok");
        assert_eq!(CsiMessage::NodeGetInfo.to_string(), "NodeGetInfo");
        assert_eq!(
            CsiMessage::Error(Status::invalid_argument("x")).to_string(),
            "Error(INVALID_ARGUMENT)"
        );
    }
}
