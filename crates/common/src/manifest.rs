//! Packer `manifest.json` post-processor output

use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level Packer manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackerManifest {
    #[serde(default)]
    pub builds: Vec<PackerBuild>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_uuid: Option<String>,
}

/// One build entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackerBuild {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub builder_type: String,

    /// Unix seconds
    #[serde(default)]
    pub build_time: i64,

    /// `region:image-id`, comma separated when copied to several regions
    pub artifact_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packer_run_uuid: Option<String>,

    #[serde(default)]
    pub custom_data: BTreeMap<String, String>,
}

impl PackerManifest {
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: PackerManifest = serde_json::from_str(json)?;
        if manifest.builds.is_empty() {
            return Err(Error::Manifest("manifest contains no builds".to_string()));
        }
        Ok(manifest)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Build belonging to the last Packer run, or the final entry
    pub fn last_build(&self) -> Result<&PackerBuild> {
        let from_last_run = self.last_run_uuid.as_deref().and_then(|uuid| {
            self.builds
                .iter()
                .rev()
                .find(|b| b.packer_run_uuid.as_deref() == Some(uuid))
        });

        from_last_run
            .or_else(|| self.builds.last())
            .ok_or_else(|| Error::Manifest("manifest contains no builds".to_string()))
    }
}

impl PackerBuild {
    /// `(region, image_id)` pairs parsed from `artifact_id`
    pub fn artifacts(&self) -> Result<Vec<(String, String)>> {
        let mut artifacts = Vec::new();
        for part in self.artifact_id.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (region, image_id) = part.split_once(':').ok_or_else(|| {
                Error::Manifest(format!("artifact_id '{}' is not region:image-id", part))
            })?;
            if region.is_empty() || image_id.is_empty() {
                return Err(Error::Manifest(format!(
                    "artifact_id '{}' has an empty region or image id",
                    part
                )));
            }
            artifacts.push((region.to_string(), image_id.to_string()));
        }

        if artifacts.is_empty() {
            return Err(Error::Manifest("build has no artifacts".to_string()));
        }
        Ok(artifacts)
    }

    /// Build time as UTC, `None` when unset or out of range
    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        if self.build_time <= 0 {
            return None;
        }
        Utc.timestamp_opt(self.build_time, 0).single()
    }
}
