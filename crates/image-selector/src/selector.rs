//! Per-environment build history and latest-valid selection

use golden_common::{Error, ImageRecord, ImageState, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

type History = Arc<RwLock<Vec<ImageRecord>>>;

/// Outcome of a successful ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ingested {
    /// The record is older than the previously ingested one for its
    /// environment. It is kept; selection orders by `created_at`.
    pub out_of_order: bool,
}

/// Owner of all golden image build history.
///
/// Each environment's history sits behind its own lock, so reads of one
/// environment never wait on writes to another. An ingest claims its id in
/// the index before appending, so of two concurrent reports of one id only
/// the first is recorded.
#[derive(Default)]
pub struct Selector {
    /// image id -> environment
    index: RwLock<HashMap<String, String>>,

    /// environment -> records in ingestion order
    environments: RwLock<HashMap<String, History>>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly reported build.
    ///
    /// Known ids are never overwritten: a re-report is `Duplicate`, or
    /// `InvalidTransition` when it claims a state the stored record cannot
    /// move to.
    pub async fn ingest(&self, record: ImageRecord) -> Result<Ingested> {
        if record.state == ImageState::Deregistered {
            return Err(Error::MalformedRecord(format!(
                "image {} cannot be reported as deregistered",
                record.id
            )));
        }
        self.insert(record).await
    }

    async fn insert(&self, record: ImageRecord) -> Result<Ingested> {
        record.check_well_formed()?;
        let environment = record.environment().unwrap_or_default().to_string();

        // Claim the id; the index lock is released before any history lock
        let known_env = {
            let mut index = self.index.write().await;
            let known_env = index.get(&record.id).cloned();
            if known_env.is_none() {
                index.insert(record.id.clone(), environment.clone());
            }
            known_env
        };

        if let Some(known_env) = known_env {
            let stored_state = self
                .find(&known_env, &record.id)
                .await
                .map(|r| r.state)
                .unwrap_or(record.state);

            if record.state != stored_state && !stored_state.can_transition_to(record.state) {
                return Err(Error::InvalidTransition {
                    image_id: record.id,
                    from: stored_state,
                    to: record.state,
                });
            }
            warn!("Duplicate image report ignored: {}", record.id);
            return Err(Error::Duplicate {
                image_id: record.id,
            });
        }

        let history = self.history_for(&environment).await;
        let mut entries = history.write().await;

        let out_of_order = entries
            .last()
            .map(|last| record.created_at < last.created_at)
            .unwrap_or(false);
        if out_of_order {
            warn!(
                "Image {} for {} reported out of order (created {})",
                record.id, environment, record.created_at
            );
        }

        info!(
            "Ingested image {} ({}) for {} in state {}",
            record.id, record.region, environment, record.state
        );

        entries.push(record);

        Ok(Ingested { out_of_order })
    }

    /// Most recent valid image for `environment`; ties on `created_at`
    /// go to the highest id
    pub async fn get_latest_valid(&self, environment: &str) -> Result<ImageRecord> {
        let history = self.environments.read().await.get(environment).cloned();

        let latest = match history {
            Some(history) => history
                .read()
                .await
                .iter()
                .filter(|r| r.is_valid())
                .max_by(|a, b| {
                    a.created_at
                        .cmp(&b.created_at)
                        .then_with(|| a.id.cmp(&b.id))
                })
                .cloned(),
            None => None,
        };

        debug!(
            "Latest valid image for {}: {:?}",
            environment,
            latest.as_ref().map(|r| &r.id)
        );

        latest.ok_or_else(|| Error::NoValidImage {
            environment: environment.to_string(),
        })
    }

    /// Move an image to `to`. Only the state field changes.
    pub async fn transition(&self, image_id: &str, to: ImageState) -> Result<ImageRecord> {
        let environment = self.environment_of(image_id).await?;
        let history = self.history_for(&environment).await;
        let mut entries = history.write().await;

        let record = entries
            .iter_mut()
            .find(|r| r.id == image_id)
            .ok_or_else(|| Error::ImageNotFound {
                image_id: image_id.to_string(),
            })?;

        let from = record.state;
        record.state = from.transition(image_id, to)?;
        info!("Image {} moved {} -> {}", image_id, from, to);

        Ok(record.clone())
    }

    /// Retire an available image. It stays in history.
    pub async fn deregister(&self, image_id: &str) -> Result<ImageRecord> {
        self.transition(image_id, ImageState::Deregistered).await
    }

    /// Undo an ingest whose write could not be made durable
    pub async fn retract(&self, image_id: &str) -> Result<ImageRecord> {
        let environment = self.environment_of(image_id).await?;
        let history = self.history_for(&environment).await;

        let removed = {
            let mut entries = history.write().await;
            let position = entries.iter().position(|r| r.id == image_id);
            position.map(|i| entries.remove(i))
        };
        self.index.write().await.remove(image_id);

        warn!("Retracted image {} from {}", image_id, environment);
        removed.ok_or_else(|| Error::ImageNotFound {
            image_id: image_id.to_string(),
        })
    }

    /// Put back the state a `transition` replaced, without checking the
    /// state machine. Only for undoing a change that could not be made
    /// durable.
    pub async fn revert_state(&self, image_id: &str, state: ImageState) -> Result<ImageRecord> {
        let environment = self.environment_of(image_id).await?;
        let history = self.history_for(&environment).await;
        let mut entries = history.write().await;

        let record = entries
            .iter_mut()
            .find(|r| r.id == image_id)
            .ok_or_else(|| Error::ImageNotFound {
                image_id: image_id.to_string(),
            })?;

        warn!("Reverting image {} from {} to {}", image_id, record.state, state);
        record.state = state;
        Ok(record.clone())
    }

    /// Look up an image by id regardless of state
    pub async fn get(&self, image_id: &str) -> Result<ImageRecord> {
        let environment = self.environment_of(image_id).await?;
        self.find(&environment, image_id)
            .await
            .ok_or_else(|| Error::ImageNotFound {
                image_id: image_id.to_string(),
            })
    }

    /// All records for `environment`, oldest first
    pub async fn history(&self, environment: &str) -> Vec<ImageRecord> {
        let history = self.environments.read().await.get(environment).cloned();
        let mut records = match history {
            Some(history) => history.read().await.clone(),
            None => Vec::new(),
        };
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Known environments, sorted
    pub async fn environments(&self) -> Vec<String> {
        let mut names: Vec<String> = self.environments.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of images recorded across all environments
    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Load previously persisted records, keeping their stored state.
    /// Returns how many were restored.
    pub async fn restore(&self, mut records: Vec<ImageRecord>) -> usize {
        records.sort_by_key(|r| r.created_at);

        let mut restored = 0;
        for record in records {
            let id = record.id.clone();
            match self.insert(record).await {
                Ok(_) => restored += 1,
                Err(e) => warn!("Skipping persisted image {}: {}", id, e),
            }
        }
        info!("Restored {} images", restored);
        restored
    }

    async fn environment_of(&self, image_id: &str) -> Result<String> {
        self.index
            .read()
            .await
            .get(image_id)
            .cloned()
            .ok_or_else(|| Error::ImageNotFound {
                image_id: image_id.to_string(),
            })
    }

    async fn find(&self, environment: &str, image_id: &str) -> Option<ImageRecord> {
        let history = self.environments.read().await.get(environment).cloned()?;
        let entries = history.read().await;
        let found = entries.iter().find(|r| r.id == image_id).cloned();
        found
    }

    async fn history_for(&self, environment: &str) -> History {
        if let Some(history) = self.environments.read().await.get(environment) {
            return history.clone();
        }
        self.environments
            .write()
            .await
            .entry(environment.to_string())
            .or_default()
            .clone()
    }
}
