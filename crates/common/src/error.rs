use crate::record::ImageState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Image already recorded: {image_id}")]
    Duplicate { image_id: String },

    #[error("Image not found: {image_id}")]
    ImageNotFound { image_id: String },

    #[error("No valid image for environment: {environment}")]
    NoValidImage { environment: String },

    #[error("Invalid state transition for {image_id}: {from} -> {to}")]
    InvalidTransition {
        image_id: String,
        from: ImageState,
        to: ImageState,
    },

    #[error("Malformed image record: {0}")]
    MalformedRecord(String),

    #[error("Invalid image name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Invalid Packer manifest: {0}")]
    Manifest(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for lookups that found nothing (unknown image or empty environment)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ImageNotFound { .. } | Error::NoValidImage { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
