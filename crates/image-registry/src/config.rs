//! Configuration management for the Image Registry
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use chrono::Duration;
use golden_common::{ImageState, REQUIRED_TAGS};
use image_selector::ValidationPolicy;
use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API server host
    pub host: String,

    /// API server port
    pub port: u16,

    /// Redis URL for durable history; in-memory only when unset
    pub redis_url: Option<String>,

    /// Tags a deployable image must carry
    pub required_tags: Vec<String>,

    /// State a deployable image must be in
    pub required_state: ImageState,

    /// Maximum image age in days
    pub max_image_age_days: Option<i64>,

    /// Enforce `golden-ami-<os>-<version>-<buildid>` names
    pub enforce_naming: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        let config = Config {
            host: env::var("REGISTRY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            port: env::var("REGISTRY_PORT")
                .unwrap_or_else(|_| "8083".to_string())
                .parse()
                .context("Invalid REGISTRY_PORT")?,

            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),

            required_tags: match env::var("REQUIRED_TAGS") {
                Ok(tags) => parse_tag_list(&tags),
                Err(_) => REQUIRED_TAGS.iter().map(|t| t.to_string()).collect(),
            },

            required_state: env::var("REQUIRED_STATE")
                .unwrap_or_else(|_| "available".to_string())
                .parse()
                .context("Invalid REQUIRED_STATE")?,

            max_image_age_days: match env::var("MAX_IMAGE_AGE_DAYS") {
                Ok(days) => Some(days.parse().context("Invalid MAX_IMAGE_AGE_DAYS")?),
                Err(_) => None,
            },

            enforce_naming: env::var("ENFORCE_IMAGE_NAMING")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("REGISTRY_PORT must be greater than 0");
        }

        if self.required_tags.is_empty() {
            anyhow::bail!("REQUIRED_TAGS must name at least one tag");
        }

        if let Some(days) = self.max_image_age_days {
            if days <= 0 {
                anyhow::bail!("MAX_IMAGE_AGE_DAYS must be greater than 0");
            }
            if Duration::try_days(days).is_none() {
                anyhow::bail!("MAX_IMAGE_AGE_DAYS is out of range");
            }
        }

        Ok(())
    }

    /// Get the API server address
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validation policy applied to stored images
    pub fn policy(&self) -> ValidationPolicy {
        let mut policy = ValidationPolicy::default()
            .with_required_tags(self.required_tags.iter().cloned())
            .with_required_state(self.required_state)
            .with_naming(self.enforce_naming);
        if let Some(max_age) = self.max_image_age_days.and_then(Duration::try_days) {
            policy = policy.with_max_age(max_age);
        }
        policy
    }
}

fn parse_tag_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 9000,
            redis_url: None,
            required_tags: vec!["Environment".to_string(), "Purpose".to_string()],
            required_state: ImageState::Available,
            max_image_age_days: Some(30),
            enforce_naming: true,
        }
    }

    #[test]
    fn test_address() {
        assert_eq!(sample_config().address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_policy_from_config() {
        let policy = sample_config().policy();
        assert_eq!(policy.required_tags, vec!["Environment", "Purpose"]);
        assert_eq!(policy.required_state, ImageState::Available);
        assert_eq!(policy.max_age, Some(Duration::days(30)));
        assert!(policy.enforce_naming);
    }

    #[test]
    fn test_validate_invalid_port() {
        let mut config = sample_config();
        config.port = 0;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("REGISTRY_PORT must be greater than 0"));
    }

    #[test]
    fn test_validate_rejects_empty_tags_and_age() {
        let mut config = sample_config();
        config.required_tags.clear();
        assert!(config.validate().is_err());

        let mut config = sample_config();
        config.max_image_age_days = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_age() {
        let mut config = sample_config();
        config.max_image_age_days = Some(i64::MAX);

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("out of range"));
        assert_eq!(config.policy().max_age, None);
    }

    #[test]
    fn test_parse_tag_list() {
        assert_eq!(
            parse_tag_list(" Environment, Purpose ,,OS"),
            vec!["Environment", "Purpose", "OS"]
        );
    }
}
