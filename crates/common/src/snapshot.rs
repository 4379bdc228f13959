//! `last-build-<env>.json` snapshot written after each registered build

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Record of the most recent build for one environment.
///
/// Field names are kept exactly as deployment tooling reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastBuildSnapshot {
    pub build_id: String,
    pub ami_id: String,
    pub region: String,
    pub environment: String,
    pub build_time: DateTime<Utc>,
    pub build_user: String,
    pub log_file: String,
}

impl LastBuildSnapshot {
    pub fn file_name(environment: &str) -> String {
        format!("last-build-{}.json", environment)
    }

    pub fn path_in(dir: &Path, environment: &str) -> PathBuf {
        dir.join(Self::file_name(environment))
    }

    /// Write the snapshot into `dir`, replacing any previous one
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = Self::path_in(dir, &self.environment);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    /// Read the snapshot for `environment`, `None` when no build was recorded
    pub fn read_from_dir(dir: &Path, environment: &str) -> Result<Option<Self>> {
        let path = Self::path_in(dir, environment);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }
}
