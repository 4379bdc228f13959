//! Request and response bodies for the Image Registry API

use golden_common::{ImageRecord, ImageState};
use image_selector::{ValidationPolicy, ValidationResult};
use serde::{Deserialize, Serialize};

/// Response from ingesting an image
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    pub message: String,

    /// Set when the image is older than the last one ingested for its
    /// environment
    pub out_of_order: bool,

    /// The image checked against the registry policy
    pub validation: ValidationResult,
}

/// Request to move an image to a new state
#[derive(Debug, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub state: ImageState,
}

/// Single image response
#[derive(Debug, Serialize, Deserialize)]
pub struct ImageResponse {
    pub image: ImageRecord,
}

/// History of one environment
#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub environment: String,
    pub images: Vec<ImageRecord>,
    pub total: usize,
}

/// Known environments
#[derive(Debug, Serialize, Deserialize)]
pub struct EnvironmentsResponse {
    pub environments: Vec<String>,
}

/// Ad-hoc validation request; the registry policy applies when `policy`
/// is omitted
#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateRequest {
    pub image: ImageRecord,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ValidationPolicy>,
}
