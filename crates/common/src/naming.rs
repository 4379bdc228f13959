//! Golden image naming convention: `golden-ami-<os>-<version>-<buildid>`

use crate::error::{Error, Result};
use std::fmt;

/// Prefix shared by every golden image name
pub const NAME_PREFIX: &str = "golden-ami-";

/// Parsed golden image name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageName {
    pub os: String,
    pub version: String,
    pub build_id: String,
}

impl ImageName {
    pub fn new(
        os: impl Into<String>,
        version: impl Into<String>,
        build_id: impl Into<String>,
    ) -> Self {
        Self {
            os: os.into(),
            version: version.into(),
            build_id: build_id.into(),
        }
    }

    /// Parse a name. The OS is the first segment after the prefix and the
    /// build id the last; everything between is the version, so versions
    /// may contain dashes.
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let rest = name
            .strip_prefix(NAME_PREFIX)
            .ok_or_else(|| invalid("missing golden-ami- prefix"))?;

        let (os, rest) = rest
            .split_once('-')
            .ok_or_else(|| invalid("expected <os>-<version>-<buildid>"))?;
        let (version, build_id) = rest
            .rsplit_once('-')
            .ok_or_else(|| invalid("expected <os>-<version>-<buildid>"))?;

        if os.is_empty() || version.is_empty() || build_id.is_empty() {
            return Err(invalid("empty name segment"));
        }

        Ok(Self::new(os, version, build_id))
    }

    pub fn is_valid(name: &str) -> bool {
        Self::parse(name).is_ok()
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}-{}-{}", NAME_PREFIX, self.os, self.version, self.build_id)
    }
}
