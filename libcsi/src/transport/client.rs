//! QUIC client used by the harness to issue CSI requests to a plugin.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quinn::crypto::rustls::QuicClientConfig;
use tracing::{debug, instrument};

use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::node::CsiNode;
use crate::types::*;

/// Upper bound on the size of a single response.
const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// A lightweight CSI client that sends [`CsiMessage`] requests over a single
/// QUIC connection and returns the server's response.
///
/// The client implements [`CsiIdentity`], [`CsiController`] and [`CsiNode`],
/// so callers can drive a remote plugin through the same traits a local
/// implementation would expose.  Every call is bounded by `timeout`.
pub struct CsiClient {
    connection: quinn::Connection,
    timeout: Duration,
}

impl CsiClient {
    /// Establish a new QUIC connection to the CSI server at `addr`.
    ///
    /// * `addr`: socket address of the remote CSI server
    /// * `server_name`: TLS SNI name that must match a SAN in the server's
    ///   certificate
    /// * `tls_config`: client TLS configuration trusting the server's CA
    /// * `timeout`: deadline applied to the handshake and to every call
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        tls_config: rustls::ClientConfig,
        timeout: Duration,
    ) -> Result<Self, CsiError> {
        let quic_client_config = QuicClientConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;
        let client_config = quinn::ClientConfig::new(Arc::new(quic_client_config));

        let bind: SocketAddr = if addr.is_ipv6() {
            SocketAddr::from(([0u16; 8], 0))
        } else {
            SocketAddr::from(([0u8; 4], 0))
        };
        let mut endpoint = quinn::Endpoint::client(bind).map_err(CsiError::transport)?;
        endpoint.set_default_client_config(client_config);

        let connecting = endpoint
            .connect(addr, server_name)
            .map_err(CsiError::transport)?;
        let connection = tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| CsiError::Timeout(timeout))?
            .map_err(CsiError::transport)?;

        debug!(%addr, %server_name, "CSI QUIC connection established");
        Ok(Self {
            connection,
            timeout,
        })
    }

    /// Send a request and wait for the corresponding response.
    ///
    /// Each call opens a new bi-directional QUIC stream, writes the
    /// JSON-serialized request, finishes the send side, then reads the
    /// full response and deserializes it.  The whole exchange is bounded by
    /// the client's timeout.
    #[instrument(skip(self), fields(msg = %msg))]
    pub async fn request(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        tokio::time::timeout(self.timeout, self.exchange(msg))
            .await
            .map_err(|_| CsiError::Timeout(self.timeout))?
    }

    async fn exchange(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        let (mut send, mut recv) = self
            .connection
            .open_bi()
            .await
            .map_err(CsiError::transport)?;

        let payload = serde_json::to_vec(msg).map_err(CsiError::transport)?;
        send.write_all(&payload)
            .await
            .map_err(CsiError::transport)?;
        send.finish().map_err(CsiError::transport)?;

        let buf = recv
            .read_to_end(MAX_RESPONSE_BYTES)
            .await
            .map_err(CsiError::transport)?;

        let response: CsiMessage = serde_json::from_slice(&buf).map_err(CsiError::transport)?;
        debug!(%response, "CSI response received");
        Ok(response)
    }

    /// Like [`Self::request`], but turns [`CsiMessage::Error`] into
    /// [`CsiError::Status`].
    async fn call(&self, msg: CsiMessage) -> Result<CsiMessage, CsiError> {
        match self.request(&msg).await? {
            CsiMessage::Error(status) => Err(CsiError::Status(status)),
            other => Ok(other),
        }
    }

    /// Close the underlying QUIC connection gracefully.
    pub fn close(&self) {
        self.connection
            .close(quinn::VarInt::from_u32(0), b"client shutdown");
    }
}

fn unexpected(response: CsiMessage) -> CsiError {
    CsiError::UnexpectedResponse(response.to_string())
}

#[async_trait]
impl CsiIdentity for CsiClient {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        match self.call(CsiMessage::GetPluginInfo).await? {
            CsiMessage::PluginInfoResponse(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        match self.call(CsiMessage::Probe).await? {
            CsiMessage::ProbeResult(ready) => Ok(ready),
            other => Err(unexpected(other)),
        }
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        match self.call(CsiMessage::GetPluginCapabilities).await? {
            CsiMessage::PluginCapabilitiesResponse(caps) => Ok(caps),
            other => Err(unexpected(other)),
        }
    }
}

#[async_trait]
impl CsiController for CsiClient {
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        match self.call(CsiMessage::CreateVolume(req)).await? {
            CsiMessage::VolumeCreated(volume) => Ok(volume),
            other => Err(unexpected(other)),
        }
    }

    async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<(), CsiError> {
        match self.call(CsiMessage::DeleteVolume(req)).await? {
            CsiMessage::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
    ) -> Result<ControllerPublishVolumeResponse, CsiError> {
        match self.call(CsiMessage::ControllerPublishVolume(req)).await? {
            CsiMessage::ControllerPublished(resp) => Ok(resp),
            other => Err(unexpected(other)),
        }
    }

    async fn controller_unpublish_volume(
        &self,
        req: ControllerUnpublishVolumeRequest,
    ) -> Result<(), CsiError> {
        match self.call(CsiMessage::ControllerUnpublishVolume(req)).await? {
            CsiMessage::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn controller_get_capabilities(
        &self,
    ) -> Result<Vec<ControllerServiceCapability>, CsiError> {
        match self.call(CsiMessage::ControllerGetCapabilities).await? {
            CsiMessage::ControllerCapabilitiesResponse(caps) => Ok(caps),
            other => Err(unexpected(other)),
        }
    }
}

#[async_trait]
impl CsiNode for CsiClient {
    async fn node_stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        match self.call(CsiMessage::NodeStageVolume(req)).await? {
            CsiMessage::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn node_unstage_volume(&self, req: NodeUnstageVolumeRequest) -> Result<(), CsiError> {
        match self.call(CsiMessage::NodeUnstageVolume(req)).await? {
            CsiMessage::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn node_publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        match self.call(CsiMessage::NodePublishVolume(req)).await? {
            CsiMessage::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn node_unpublish_volume(
        &self,
        req: NodeUnpublishVolumeRequest,
    ) -> Result<(), CsiError> {
        match self.call(CsiMessage::NodeUnpublishVolume(req)).await? {
            CsiMessage::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn node_get_volume_stats(
        &self,
        req: NodeGetVolumeStatsRequest,
    ) -> Result<VolumeStats, CsiError> {
        match self.call(CsiMessage::NodeGetVolumeStats(req)).await? {
            CsiMessage::VolumeStatsResponse(stats) => Ok(stats),
            other => Err(unexpected(other)),
        }
    }

    async fn node_get_capabilities(&self) -> Result<Vec<NodeServiceCapability>, CsiError> {
        match self.call(CsiMessage::NodeGetCapabilities).await? {
            CsiMessage::NodeCapabilitiesResponse(caps) => Ok(caps),
            other => Err(unexpected(other)),
        }
    }

    async fn node_get_info(&self) -> Result<NodeInfo, CsiError> {
        match self.call(CsiMessage::NodeGetInfo).await? {
            CsiMessage::NodeInfoResponse(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }
}
