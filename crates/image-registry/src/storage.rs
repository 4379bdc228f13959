//! Redis storage for golden image history

use anyhow::{Context, Result};
use golden_common::ImageRecord;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

const ENVIRONMENTS_KEY: &str = "images:environments";

/// Durable backing store for the selector's history.
///
/// One JSON document per image under `image:{id}`, plus a sorted set per
/// environment scored by creation time in milliseconds.
pub struct Storage {
    conn: ConnectionManager,
}

fn image_key(image_id: &str) -> String {
    format!("image:{}", image_id)
}

fn environment_key(environment: &str) -> String {
    format!("images:env:{}", environment)
}

/// Queue the environment index entries for `record`
fn index_image(pipe: &mut redis::Pipeline, record: &ImageRecord) {
    if let Some(environment) = record.environment() {
        pipe.zadd(
            environment_key(environment),
            &record.id,
            record.created_at.timestamp_millis(),
        )
        .ignore()
        .sadd(ENVIRONMENTS_KEY, environment)
        .ignore();
    }
}

impl Storage {
    /// Create a new storage instance
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    /// Store a newly ingested image.
    /// Returns Ok(false) if the id is already stored.
    ///
    /// The record and its index entries are written in one MULTI/EXEC, so
    /// a failure leaves no half-stored image behind.
    pub async fn insert_image(&mut self, record: &ImageRecord) -> Result<bool> {
        let json = serde_json::to_string(record).context("Failed to serialize image")?;

        let mut pipe = redis::pipe();
        pipe.atomic().set_nx(image_key(&record.id), json);
        index_image(&mut pipe, record);

        let (created,): (bool,) = pipe
            .query_async(&mut self.conn)
            .await
            .context("Failed to store image")?;

        if created {
            info!("Stored image: {}", record.id);
        } else {
            debug!("Image already stored: {}", record.id);
        }
        Ok(created)
    }

    /// Write an image after a state change, storing it if it is missing
    pub async fn save_image(&mut self, record: &ImageRecord) -> Result<()> {
        let json = serde_json::to_string(record).context("Failed to serialize image")?;

        let mut pipe = redis::pipe();
        pipe.atomic().set(image_key(&record.id), json).ignore();
        index_image(&mut pipe, record);

        let _: () = pipe
            .query_async(&mut self.conn)
            .await
            .context("Failed to save image")?;

        info!("Saved image {} in state {}", record.id, record.state);
        Ok(())
    }

    /// Get an image by id
    pub async fn get_image(&mut self, image_id: &str) -> Result<Option<ImageRecord>> {
        let json: Option<String> = self.conn.get(image_key(image_id)).await?;

        match json {
            Some(data) => {
                let record: ImageRecord =
                    serde_json::from_str(&data).context("Failed to deserialize image")?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Image ids for an environment, oldest first
    pub async fn list_environment(&mut self, environment: &str) -> Result<Vec<String>> {
        let ids: Vec<String> = self
            .conn
            .zrange(environment_key(environment), 0, -1)
            .await?;
        Ok(ids)
    }

    /// All environments with stored images
    pub async fn list_environments(&mut self) -> Result<Vec<String>> {
        let mut environments: Vec<String> = self.conn.smembers(ENVIRONMENTS_KEY).await?;
        environments.sort();
        Ok(environments)
    }

    /// Every stored image, for restoring the selector at startup
    pub async fn load_all(&mut self) -> Result<Vec<ImageRecord>> {
        let mut records = Vec::new();
        for environment in self.list_environments().await? {
            for image_id in self.list_environment(&environment).await? {
                if let Some(record) = self.get_image(&image_id).await? {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    /// Remove an image entirely; the registry itself never deletes history
    #[cfg(test)]
    async fn purge_image(&mut self, image_id: &str) -> Result<()> {
        if let Some(record) = self.get_image(image_id).await? {
            if let Some(environment) = record.environment() {
                let _: () = self.conn.zrem(environment_key(environment), image_id).await?;
            }
        }
        let _: () = self.conn.del(image_key(image_id)).await?;
        Ok(())
    }
}
