//! Build validation against a deployability policy
//!
//! Validation never short-circuits: every violated rule yields its own
//! [`FailureReason`] so callers see all problems with a build at once.

use chrono::{DateTime, Duration, Utc};
use golden_common::{ImageName, ImageRecord, ImageState, REQUIRED_TAGS};
use serde::{Deserialize, Serialize};

/// Rules an image must satisfy to be deployable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    /// Tags that must be present with a non-empty value
    #[serde(default = "default_required_tags")]
    pub required_tags: Vec<String>,

    /// State the image must be in
    #[serde(default = "default_required_state")]
    pub required_state: ImageState,

    /// Maximum age of the image, unlimited when `None`
    #[serde(
        default,
        rename = "max_age_secs",
        with = "duration_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_age: Option<Duration>,

    /// Require names of the form `golden-ami-<os>-<version>-<buildid>`
    #[serde(default)]
    pub enforce_naming: bool,
}

fn default_required_tags() -> Vec<String> {
    REQUIRED_TAGS.iter().map(|t| t.to_string()).collect()
}

fn default_required_state() -> ImageState {
    ImageState::Available
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            required_tags: default_required_tags(),
            required_state: default_required_state(),
            max_age: None,
            enforce_naming: false,
        }
    }
}

impl ValidationPolicy {
    /// Replace the required tag set; duplicates and blanks are dropped,
    /// first-seen order is kept
    pub fn with_required_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut required: Vec<String> = Vec::new();
        for tag in tags {
            let tag = tag.into().trim().to_string();
            if !tag.is_empty() && !required.contains(&tag) {
                required.push(tag);
            }
        }
        self.required_tags = required;
        self
    }

    pub fn with_required_state(mut self, state: ImageState) -> Self {
        self.required_state = state;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_naming(mut self, enforce: bool) -> Self {
        self.enforce_naming = enforce;
        self
    }
}

/// A single violated rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    MissingTag {
        name: String,
    },
    WrongState {
        expected: ImageState,
        actual: ImageState,
    },
    TooOld {
        age_secs: i64,
        max_secs: i64,
    },
    BadName {
        name: String,
    },
}

impl FailureReason {
    /// Missing tags are advisory; everything else blocks deployment
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FailureReason::MissingTag { .. })
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::MissingTag { name } => write!(f, "missing required tag: {}", name),
            FailureReason::WrongState { expected, actual } => {
                write!(f, "image state is {}, expected {}", actual, expected)
            }
            FailureReason::TooOld { age_secs, max_secs } => write!(
                f,
                "image is {} days old, maximum is {} days",
                age_secs / 86_400,
                max_secs / 86_400
            ),
            FailureReason::BadName { name } => {
                write!(f, "name '{}' does not match golden-ami-<os>-<version>-<buildid>", name)
            }
        }
    }
}

/// Outcome of validating one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub image_id: String,
    pub passed: bool,
    pub failures: Vec<FailureReason>,
}

impl ValidationResult {
    pub fn has_fatal(&self) -> bool {
        self.failures.iter().any(FailureReason::is_fatal)
    }
}

/// Validate `record` against `policy` as of now
pub fn validate(record: &ImageRecord, policy: &ValidationPolicy) -> ValidationResult {
    validate_at(record, policy, Utc::now())
}

/// Validate `record` against `policy` as of `now`
pub fn validate_at(
    record: &ImageRecord,
    policy: &ValidationPolicy,
    now: DateTime<Utc>,
) -> ValidationResult {
    let mut failures: Vec<FailureReason> = record
        .missing_tags(policy.required_tags.iter())
        .into_iter()
        .map(|name| FailureReason::MissingTag { name })
        .collect();

    if record.state != policy.required_state {
        failures.push(FailureReason::WrongState {
            expected: policy.required_state,
            actual: record.state,
        });
    }

    if let Some(max_age) = policy.max_age {
        let age = now.signed_duration_since(record.created_at);
        if age > max_age {
            failures.push(FailureReason::TooOld {
                age_secs: age.num_seconds(),
                max_secs: max_age.num_seconds(),
            });
        }
    }

    if policy.enforce_naming && !ImageName::is_valid(&record.name) {
        failures.push(FailureReason::BadName {
            name: record.name.clone(),
        });
    }

    ValidationResult {
        image_id: record.id.clone(),
        passed: failures.is_empty(),
        failures,
    }
}

mod duration_secs {
    use chrono::Duration;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_some(&d.num_seconds()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs: Option<i64> = Option::deserialize(deserializer)?;
        secs.map(|secs| {
            Duration::try_seconds(secs)
                .ok_or_else(|| D::Error::custom("max_age_secs out of range"))
        })
        .transpose()
    }
}
