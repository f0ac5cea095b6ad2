//! Resource tracking and teardown.
//!
//! Every resource a scenario provisions on the plugin is registered here the
//! moment the provisioning call succeeds.  Scenario steps that unwind a
//! resource go through [`ResourceTracker::release`]; whatever is still
//! registered when the scenario ends is released by
//! [`ResourceTracker::teardown_all`] in reverse registration order, whether
//! the scenario passed or not.

use std::fmt;
use std::sync::Arc;

use libcsi::{
    Code, ControllerUnpublishVolumeRequest, CsiError, DeleteVolumeRequest,
    NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest, VolumeId,
};
use tracing::{debug, info, warn};

use crate::config::SanityConfig;
use crate::context::PluginClients;
use crate::error::TeardownError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    /// A provisioned volume, released with `DeleteVolume`.
    Volume,
    /// A volume attached to a node, released with `ControllerUnpublishVolume`.
    Attachment,
    /// A volume staged at `path`, released with `NodeUnstageVolume`.
    Staging { path: String },
    /// A volume published at `path`, released with `NodeUnpublishVolume`.
    Publication { path: String },
}

/// Something the plugin holds on behalf of the scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedResource {
    pub kind: ResourceKind,
    pub external_id: VolumeId,
    pub node_id: Option<String>,
}

impl TrackedResource {
    pub fn volume(external_id: VolumeId) -> Self {
        Self {
            kind: ResourceKind::Volume,
            external_id,
            node_id: None,
        }
    }

    pub fn attachment(external_id: VolumeId, node_id: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Attachment,
            external_id,
            node_id: Some(node_id.into()),
        }
    }

    pub fn staging(external_id: VolumeId, path: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Staging { path: path.into() },
            external_id,
            node_id: None,
        }
    }

    pub fn publication(external_id: VolumeId, path: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Publication { path: path.into() },
            external_id,
            node_id: None,
        }
    }
}

impl fmt::Display for TrackedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ResourceKind::Volume => write!(f, "volume {}", self.external_id),
            ResourceKind::Attachment => write!(
                f,
                "attachment of {} to node {}",
                self.external_id,
                self.node_id.as_deref().unwrap_or_default()
            ),
            ResourceKind::Staging { path } => {
                write!(f, "staging of {} at {path}", self.external_id)
            }
            ResourceKind::Publication { path } => {
                write!(f, "publication of {} at {path}", self.external_id)
            }
        }
    }
}

#[derive(Debug)]
struct Entry {
    resource: TrackedResource,
    released: bool,
}

/// Ordered record of the resources a scenario created.
pub struct ResourceTracker {
    plugin: PluginClients,
    config: Arc<SanityConfig>,
    entries: Vec<Entry>,
}

impl ResourceTracker {
    pub fn new(plugin: PluginClients, config: Arc<SanityConfig>) -> Self {
        Self {
            plugin,
            config,
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, resource: TrackedResource) {
        debug!(%resource, "resource registered");
        self.entries.push(Entry {
            resource,
            released: false,
        });
    }

    /// Resources not yet released, in registration order.
    pub fn pending(&self) -> Vec<TrackedResource> {
        self.entries
            .iter()
            .filter(|e| !e.released)
            .map(|e| e.resource.clone())
            .collect()
    }

    /// Release one resource now.
    ///
    /// A resource that is not registered, or was already released, is left
    /// alone and `Ok(())` is returned without contacting the plugin.  If the
    /// plugin refuses, the resource stays registered so teardown tries again.
    pub async fn release(&mut self, resource: &TrackedResource) -> Result<(), CsiError> {
        let Some(idx) = self
            .entries
            .iter()
            .rposition(|e| !e.released && e.resource == *resource)
        else {
            debug!(%resource, "already released");
            return Ok(());
        };

        self.remove_remote(resource).await?;
        self.entries[idx].released = true;
        info!(%resource, "resource released");
        Ok(())
    }

    /// Release everything still registered, newest first.
    ///
    /// Never fails: every resource gets an attempt, failures are logged and
    /// returned.  `NOT_FOUND` counts as already released.
    pub async fn teardown_all(&mut self) -> Vec<TeardownError> {
        let mut failures = Vec::new();
        for idx in (0..self.entries.len()).rev() {
            if self.entries[idx].released {
                continue;
            }
            let resource = self.entries[idx].resource.clone();
            match self.remove_remote(&resource).await {
                Ok(()) => {
                    info!(%resource, "resource torn down");
                    self.entries[idx].released = true;
                }
                Err(e) if e.code() == Some(Code::NotFound) => {
                    debug!(%resource, "resource already gone");
                    self.entries[idx].released = true;
                }
                Err(source) => {
                    warn!(%resource, error = %source, "teardown failed, resource may leak");
                    failures.push(TeardownError { resource, source });
                }
            }
        }
        failures
    }

    async fn remove_remote(&self, resource: &TrackedResource) -> Result<(), CsiError> {
        let volume_id = resource.external_id.clone();
        let secrets = &self.config.secrets;
        match &resource.kind {
            ResourceKind::Volume => {
                self.plugin
                    .controller
                    .delete_volume(DeleteVolumeRequest {
                        volume_id,
                        secrets: secrets.delete_volume.clone(),
                    })
                    .await
            }
            ResourceKind::Attachment => {
                self.plugin
                    .controller
                    .controller_unpublish_volume(ControllerUnpublishVolumeRequest {
                        volume_id,
                        node_id: resource.node_id.clone().unwrap_or_default(),
                        secrets: secrets.controller_unpublish_volume.clone(),
                    })
                    .await
            }
            ResourceKind::Staging { path } => {
                self.plugin
                    .node
                    .node_unstage_volume(NodeUnstageVolumeRequest {
                        volume_id,
                        staging_target_path: path.clone(),
                    })
                    .await
            }
            ResourceKind::Publication { path } => {
                self.plugin
                    .node
                    .node_unpublish_volume(NodeUnpublishVolumeRequest {
                        volume_id,
                        target_path: path.clone(),
                    })
                    .await
            }
        }
    }
}
