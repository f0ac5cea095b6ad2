//! Harness configuration.
//!
//! The values a run needs from its environment: where the plugin should
//! stage and publish volumes, which secrets to forward with each call, and
//! which parameters to pass to `CreateVolume`.  Secrets and parameters are
//! read from YAML files; the secrets file uses the key names of the
//! upstream sanity suite:
//!
//! ```yaml
//! CreateVolumeSecret:
//!   secretKey: secretval1
//! NodePublishVolumeSecret:
//!   secretKey: secretval5
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use libcsi::Secrets;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to create mount location {path}: {source}")]
    MountLocation {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Per-call secrets forwarded verbatim to the plugin.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CsiSecrets {
    #[serde(rename = "CreateVolumeSecret")]
    pub create_volume: Secrets,
    #[serde(rename = "DeleteVolumeSecret")]
    pub delete_volume: Secrets,
    #[serde(rename = "ControllerPublishVolumeSecret")]
    pub controller_publish_volume: Secrets,
    #[serde(rename = "ControllerUnpublishVolumeSecret")]
    pub controller_unpublish_volume: Secrets,
    #[serde(rename = "NodeStageVolumeSecret")]
    pub node_stage_volume: Secrets,
    #[serde(rename = "NodePublishVolumeSecret")]
    pub node_publish_volume: Secrets,
}

/// Everything a scenario needs besides the plugin connection.
#[derive(Debug, Clone, Default)]
pub struct SanityConfig {
    /// Where the plugin is asked to stage volumes.
    pub staging_path: String,
    /// Where the plugin is asked to publish volumes.
    pub target_path: String,
    pub secrets: CsiSecrets,
    /// Forwarded verbatim to every `CreateVolume`.
    pub test_volume_parameters: HashMap<String, String>,
}

impl SanityConfig {
    pub fn new(staging_path: impl Into<String>, target_path: impl Into<String>) -> Self {
        Self {
            staging_path: staging_path.into(),
            target_path: target_path.into(),
            ..Default::default()
        }
    }

    /// Create the staging and target directories on this host.
    pub async fn create_mount_locations(&self) -> Result<(), ConfigError> {
        for path in [&self.staging_path, &self.target_path] {
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|source| ConfigError::MountLocation {
                    path: path.clone(),
                    source,
                })?;
            debug!(%path, "mount location ready");
        }
        Ok(())
    }

    /// Remove the staging and target directories.  Best effort: a plugin
    /// that left something mounted makes removal fail, which is logged.
    pub async fn remove_mount_locations(&self) {
        for path in [&self.target_path, &self.staging_path] {
            match tokio::fs::remove_dir(path).await {
                Ok(()) => debug!(%path, "mount location removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(%path, error = %e, "failed to remove mount location"),
            }
        }
    }
}

async fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_owned(),
        source,
    })
}

pub async fn load_secrets(path: &Path) -> Result<CsiSecrets, ConfigError> {
    read_yaml(path).await
}

pub async fn load_parameters(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    read_yaml(path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn secrets_use_upstream_key_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.yaml");
        tokio::fs::write(
            &path,
            "CreateVolumeSecret:\n  secretKey: secretval1\nNodePublishVolumeSecret:\n  secretKey: secretval5\n",
        )
        .await
        .unwrap();

        let secrets = load_secrets(&path).await.unwrap();
        assert_eq!(secrets.create_volume["secretKey"], "secretval1");
        assert_eq!(secrets.node_publish_volume["secretKey"], "secretval5");
        assert!(secrets.delete_volume.is_empty());
    }

    #[tokio::test]
    async fn unreadable_file_names_the_path() {
        let err = load_parameters(Path::new("/nonexistent/params.yaml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/params.yaml"));
    }

    #[tokio::test]
    async fn malformed_yaml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.yaml");
        tokio::fs::write(&path, "- not\n- a map\n").await.unwrap();
        assert!(matches!(
            load_parameters(&path).await,
            Err(ConfigError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn mount_locations_are_created_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        let target = dir.path().join("target");
        let config = SanityConfig::new(
            staging.to_string_lossy().into_owned(),
            target.to_string_lossy().into_owned(),
        );

        config.create_mount_locations().await.unwrap();
        assert!(staging.is_dir());
        assert!(target.is_dir());

        config.remove_mount_locations().await;
        assert!(!staging.exists());
        assert!(!target.exists());
    }
}
