//! QUIC server that exposes a plugin implementation and dispatches incoming
//! CSI requests to the appropriate trait methods.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::node::CsiNode;
use crate::status::Status;

const MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

/// A CSI server that accepts QUIC connections and dispatches
/// [`CsiMessage`] requests to an [`CsiIdentity`] + [`CsiController`] +
/// [`CsiNode`] implementation.
pub struct CsiServer<T> {
    endpoint: quinn::Endpoint,
    handler: Arc<T>,
}

impl<T> CsiServer<T>
where
    T: CsiIdentity + CsiController + CsiNode + 'static,
{
    /// Create a new server bound to `addr`.
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        handler: Arc<T>,
    ) -> Result<Self, CsiError> {
        let quic_server_config = QuicServerConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_server_config));
        let endpoint = quinn::Endpoint::server(server_config, addr).map_err(CsiError::transport)?;
        info!(%addr, "CSI QUIC server listening");
        Ok(Self { endpoint, handler })
    }

    /// Accept connections in a loop until the endpoint is closed.
    ///
    /// Each accepted connection spawns a Tokio task, and each bi-stream
    /// within a connection is handled concurrently.
    pub async fn serve(&self) -> Result<(), CsiError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        let remote = conn.remote_address();
                        debug!(%remote, "CSI connection accepted");
                        if let Err(e) = Self::handle_connection(conn, handler).await {
                            warn!(%remote, error = %e, "CSI connection error");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "CSI incoming connection failed");
                    }
                }
            });
        }
        Ok(())
    }

    async fn handle_connection(conn: quinn::Connection, handler: Arc<T>) -> Result<(), CsiError> {
        loop {
            let (send, recv) = match conn.accept_bi().await {
                Ok(stream) => stream,
                Err(quinn::ConnectionError::ApplicationClosed(_)) => return Ok(()),
                Err(e) => return Err(CsiError::transport(e)),
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_stream(send, recv, &handler).await {
                    error!(error = %e, "CSI stream handler error");
                }
            });
        }
    }

    /// Process a single bi-stream: read request → dispatch → write response.
    #[instrument(skip_all)]
    async fn handle_stream(
        mut send: quinn::SendStream,
        mut recv: quinn::RecvStream,
        handler: &T,
    ) -> Result<(), CsiError> {
        let buf = recv
            .read_to_end(MAX_REQUEST_BYTES)
            .await
            .map_err(CsiError::transport)?;

        let response = match serde_json::from_slice::<CsiMessage>(&buf) {
            Ok(request) => {
                debug!(%request, "CSI request received");
                Self::dispatch(handler, request).await
            }
            Err(e) => CsiMessage::Error(Status::invalid_argument(format!(
                "malformed request: {e}"
            ))),
        };

        let payload = serde_json::to_vec(&response).map_err(CsiError::transport)?;
        send.write_all(&payload)
            .await
            .map_err(CsiError::transport)?;
        send.finish().map_err(CsiError::transport)?;
        Ok(())
    }

    /// Map a [`CsiMessage`] request to the correct trait method call and
    /// wrap the result in a response [`CsiMessage`].
    async fn dispatch(handler: &T, request: CsiMessage) -> CsiMessage {
        match request {
            // --- Identity ---------------------------------------------------
            CsiMessage::Probe => reply(handler.probe().await, CsiMessage::ProbeResult),
            CsiMessage::GetPluginInfo => reply(
                handler.get_plugin_info().await,
                CsiMessage::PluginInfoResponse,
            ),
            CsiMessage::GetPluginCapabilities => reply(
                handler.get_plugin_capabilities().await,
                CsiMessage::PluginCapabilitiesResponse,
            ),

            // --- Controller -------------------------------------------------
            CsiMessage::CreateVolume(req) => {
                reply(handler.create_volume(req).await, CsiMessage::VolumeCreated)
            }
            CsiMessage::DeleteVolume(req) => reply(handler.delete_volume(req).await, ack),
            CsiMessage::ControllerPublishVolume(req) => reply(
                handler.controller_publish_volume(req).await,
                CsiMessage::ControllerPublished,
            ),
            CsiMessage::ControllerUnpublishVolume(req) => {
                reply(handler.controller_unpublish_volume(req).await, ack)
            }
            CsiMessage::ControllerGetCapabilities => reply(
                handler.controller_get_capabilities().await,
                CsiMessage::ControllerCapabilitiesResponse,
            ),

            // --- Node -------------------------------------------------------
            CsiMessage::NodeStageVolume(req) => reply(handler.node_stage_volume(req).await, ack),
            CsiMessage::NodeUnstageVolume(req) => {
                reply(handler.node_unstage_volume(req).await, ack)
            }
            CsiMessage::NodePublishVolume(req) => {
                reply(handler.node_publish_volume(req).await, ack)
            }
            CsiMessage::NodeUnpublishVolume(req) => {
                reply(handler.node_unpublish_volume(req).await, ack)
            }
            CsiMessage::NodeGetVolumeStats(req) => reply(
                handler.node_get_volume_stats(req).await,
                CsiMessage::VolumeStatsResponse,
            ),
            CsiMessage::NodeGetCapabilities => reply(
                handler.node_get_capabilities().await,
                CsiMessage::NodeCapabilitiesResponse,
            ),
            CsiMessage::NodeGetInfo => {
                reply(handler.node_get_info().await, CsiMessage::NodeInfoResponse)
            }

            // --- Response variants should never arrive as requests ----------
            other => {
                warn!(msg = %other, "unexpected message variant received as request");
                CsiMessage::Error(Status::invalid_argument(format!(
                    "unexpected message: {other}"
                )))
            }
        }
    }

    /// Return a reference to the underlying QUIC endpoint, useful for
    /// obtaining the local address or shutting down.
    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}

fn ack(_: ()) -> CsiMessage {
    CsiMessage::Ok
}

fn reply<V>(result: Result<V, CsiError>, wrap: impl FnOnce(V) -> CsiMessage) -> CsiMessage {
    match result {
        Ok(value) => wrap(value),
        Err(CsiError::Status(status)) => CsiMessage::Error(status),
        Err(e) => CsiMessage::Error(Status::internal(e.to_string())),
    }
}
