//! Turning a finished Packer build into image records

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use golden_common::record::{TAG_ENVIRONMENT, TAG_OS, TAG_OS_VERSION, TAG_PURPOSE};
use golden_common::{ImageName, ImageRecord, ImageState, LastBuildSnapshot, PackerBuild};
use std::collections::BTreeMap;

/// Tag carrying the build id on every reported image
pub const TAG_BUILD_ID: &str = "BuildId";

/// How a build should be described to the registry
#[derive(Debug, Clone)]
pub struct RegisterOptions {
    pub environment: String,
    pub name: Option<String>,
    pub purpose: String,
    pub os: String,
    pub os_version: Option<String>,
    pub state: ImageState,
    pub extra_tags: BTreeMap<String, String>,
}

impl RegisterOptions {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            name: None,
            purpose: "golden-ami".to_string(),
            os: "ubuntu".to_string(),
            os_version: None,
            state: ImageState::Available,
            extra_tags: BTreeMap::new(),
        }
    }
}

/// One image per artifact of a build
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub build_id: String,
    pub built_at: DateTime<Utc>,
    pub records: Vec<ImageRecord>,
}

impl BuildReport {
    /// Snapshot for `last-build-<env>.json`, describing the first artifact
    pub fn snapshot(&self, build_user: &str, log_file: &str) -> Option<LastBuildSnapshot> {
        let first = self.records.first()?;
        Some(LastBuildSnapshot {
            build_id: self.build_id.clone(),
            ami_id: first.id.clone(),
            region: first.region.clone(),
            environment: first.environment().unwrap_or_default().to_string(),
            build_time: self.built_at,
            build_user: build_user.to_string(),
            log_file: log_file.to_string(),
        })
    }
}

/// Parse `KEY=VALUE` tag arguments
pub fn parse_tag(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("Tag '{}' is not KEY=VALUE", raw))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Tag '{}' has an empty key", raw);
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Describe a Packer build as image records ready to ingest
pub fn build_report(build: &PackerBuild, options: &RegisterOptions) -> Result<BuildReport> {
    let built_at = build.built_at().unwrap_or_else(Utc::now);
    let build_id = built_at.format("%Y%m%d%H%M%S").to_string();

    let os_version = options
        .os_version
        .clone()
        .or_else(|| build.custom_data.get("os_version").cloned())
        .unwrap_or_else(|| "22.04".to_string());

    let name = match &options.name {
        Some(name) => name.clone(),
        None => match build.custom_data.get("ami_name") {
            Some(name) => name.clone(),
            None => ImageName::new(&options.os, &os_version, &build_id).to_string(),
        },
    };

    let mut tags = options.extra_tags.clone();
    tags.insert(TAG_ENVIRONMENT.to_string(), options.environment.clone());
    tags.insert(TAG_PURPOSE.to_string(), options.purpose.clone());
    tags.insert(TAG_OS.to_string(), options.os.clone());
    tags.insert(TAG_OS_VERSION.to_string(), os_version);
    tags.insert(TAG_BUILD_ID.to_string(), build_id.clone());

    let records = build
        .artifacts()
        .context("Failed to read build artifacts")?
        .into_iter()
        .map(|(region, image_id)| ImageRecord {
            id: image_id,
            name: name.clone(),
            region,
            state: options.state,
            created_at: built_at,
            tags: tags.clone(),
        })
        .collect();

    Ok(BuildReport {
        build_id,
        built_at,
        records,
    })
}
