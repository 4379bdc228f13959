use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tag holding the deployment tier an image belongs to
pub const TAG_ENVIRONMENT: &str = "Environment";

/// Tag describing what the image is for (e.g. "golden-ami")
pub const TAG_PURPOSE: &str = "Purpose";

/// Tag holding the base operating system (e.g. "ubuntu")
pub const TAG_OS: &str = "OS";

/// Tag holding the base operating system version (e.g. "22.04")
pub const TAG_OS_VERSION: &str = "OSVersion";

/// Tags every deployable image must carry with a non-empty value
pub const REQUIRED_TAGS: [&str; 4] = [TAG_ENVIRONMENT, TAG_PURPOSE, TAG_OS, TAG_OS_VERSION];

/// Lifecycle state of a built machine image
///
/// ```text
/// Pending -> Available -> Deregistered
///         \-> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageState {
    /// Build reported, image not yet usable
    Pending,
    /// Image built and ready to launch
    Available,
    /// Build failed
    Failed,
    /// Image retired from use
    Deregistered,
}

impl ImageState {
    /// Whether no further transition is possible from this state
    pub fn is_terminal(self) -> bool {
        matches!(self, ImageState::Failed | ImageState::Deregistered)
    }

    /// Whether `self -> to` is an edge of the lifecycle
    pub fn can_transition_to(self, to: ImageState) -> bool {
        matches!(
            (self, to),
            (ImageState::Pending, ImageState::Available)
                | (ImageState::Pending, ImageState::Failed)
                | (ImageState::Available, ImageState::Deregistered)
        )
    }

    /// Move to `to`, or fail with `InvalidTransition` leaving `self` untouched
    pub fn transition(self, image_id: &str, to: ImageState) -> Result<ImageState> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(Error::InvalidTransition {
                image_id: image_id.to_string(),
                from: self,
                to,
            })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageState::Pending => "pending",
            ImageState::Available => "available",
            ImageState::Failed => "failed",
            ImageState::Deregistered => "deregistered",
        }
    }
}

impl fmt::Display for ImageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ImageState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ImageState::Pending),
            "available" => Ok(ImageState::Available),
            "failed" => Ok(ImageState::Failed),
            "deregistered" => Ok(ImageState::Deregistered),
            other => Err(Error::MalformedRecord(format!("unknown image state: {}", other))),
        }
    }
}

/// One built machine image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Cloud image identifier (e.g. "ami-0abc..."), unique per region
    pub id: String,

    /// Human readable name, normally `golden-ami-<os>-<version>-<buildid>`
    pub name: String,

    /// Region the image lives in
    pub region: String,

    /// Lifecycle state
    pub state: ImageState,

    /// When the image was created (UTC)
    pub created_at: DateTime<Utc>,

    /// Image tags
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ImageRecord {
    /// Create a record with no tags
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        region: impl Into<String>,
        state: ImageState,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            region: region.into(),
            state,
            created_at,
            tags: BTreeMap::new(),
        }
    }

    /// Builder-style tag setter
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Tag value, treating blank values as absent
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .get(key)
            .map(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    /// Environment derived from the `Environment` tag
    pub fn environment(&self) -> Option<&str> {
        self.tag(TAG_ENVIRONMENT)
    }

    /// Required keys that are absent or blank, in the order given
    pub fn missing_tags<'a, I, S>(&self, keys: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a S>,
        S: AsRef<str> + ?Sized + 'a,
    {
        keys.into_iter()
            .map(|k| k.as_ref())
            .filter(|k| self.tag(k).is_none())
            .map(str::to_string)
            .collect()
    }

    /// Available and carrying every required tag
    pub fn is_valid(&self) -> bool {
        self.state == ImageState::Available && self.missing_tags(REQUIRED_TAGS.iter()).is_empty()
    }

    /// Reject records that cannot be keyed into history
    pub fn check_well_formed(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::MalformedRecord("image id is empty".to_string()));
        }
        if self.environment().is_none() {
            return Err(Error::MalformedRecord(format!(
                "image {} has no {} tag",
                self.id, TAG_ENVIRONMENT
            )));
        }
        Ok(())
    }
}
