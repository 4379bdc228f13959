//! API request handlers for the Image Registry

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use golden_common::{Error, ImageRecord, ImageState};
use image_selector::{validate, Ingested, Selector, ValidationPolicy, ValidationResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    models::{
        EnvironmentsResponse, HistoryResponse, ImageResponse, IngestResponse, TransitionRequest,
        ValidateRequest,
    },
    storage::Storage,
};

/// Shared application state
pub struct AppState {
    pub selector: Selector,
    pub policy: ValidationPolicy,
    pub storage: Option<Mutex<Storage>>,
}

impl AppState {
    /// In-memory registry
    pub fn new(policy: ValidationPolicy) -> Self {
        Self {
            selector: Selector::new(),
            policy,
            storage: None,
        }
    }

    /// Registry persisting every write to Redis
    pub fn with_storage(policy: ValidationPolicy, storage: Storage) -> Self {
        Self {
            selector: Selector::new(),
            policy,
            storage: Some(Mutex::new(storage)),
        }
    }

    /// Ingest a record, persisting it when storage is configured. A write
    /// that fails to persist is retracted so memory and Redis agree.
    async fn ingest(&self, record: ImageRecord) -> Result<Ingested, ApiError> {
        let Some(storage) = &self.storage else {
            return Ok(self.selector.ingest(record).await?);
        };

        let mut guard = storage.lock().await;
        let storage = &mut *guard;
        ingest_durably(&self.selector, record, |record| async move {
            if !storage.insert_image(&record).await? {
                warn!("Image {} was already persisted", record.id);
            }
            anyhow::Ok(())
        })
        .await
    }

    /// Move an image to a new state, persisting it when storage is
    /// configured. A change that fails to persist is reverted.
    async fn transition(&self, image_id: &str, to: ImageState) -> Result<ImageRecord, ApiError> {
        let Some(storage) = &self.storage else {
            return Ok(self.selector.transition(image_id, to).await?);
        };

        let mut guard = storage.lock().await;
        let storage = &mut *guard;
        transition_durably(&self.selector, image_id, to, |record| async move {
            storage.save_image(&record).await
        })
        .await
    }
}

/// Apply an ingest, then `persist` it; undo the ingest if `persist` fails.
///
/// Callers hold the storage lock, so no other durable write interleaves.
async fn ingest_durably<F, Fut>(
    selector: &Selector,
    record: ImageRecord,
    persist: F,
) -> Result<Ingested, ApiError>
where
    F: FnOnce(ImageRecord) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let image_id = record.id.clone();
    let ingested = selector.ingest(record.clone()).await?;

    if let Err(e) = persist(record).await {
        error!("Failed to persist image {}: {:#}", image_id, e);
        selector.retract(&image_id).await?;
        return Err(e.into());
    }
    Ok(ingested)
}

/// Apply a state change, then `persist` it; restore the previous state if
/// `persist` fails.
async fn transition_durably<F, Fut>(
    selector: &Selector,
    image_id: &str,
    to: ImageState,
    persist: F,
) -> Result<ImageRecord, ApiError>
where
    F: FnOnce(ImageRecord) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let previous = selector.get(image_id).await?.state;
    let image = selector.transition(image_id, to).await?;

    if let Err(e) = persist(image.clone()).await {
        error!("Failed to persist state of {}: {:#}", image_id, e);
        selector.revert_state(image_id, previous).await?;
        return Err(e.into());
    }
    Ok(image)
}

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message
        });

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Duplicate { .. } => StatusCode::CONFLICT,
            Error::ImageNotFound { .. } | Error::NoValidImage { .. } => StatusCode::NOT_FOUND,
            Error::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::MalformedRecord(_) | Error::InvalidName { .. } | Error::Manifest(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

/// Health check endpoint
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "image-registry",
        "images": state.selector.len().await,
        "environments": state.selector.environments().await.len(),
        "durable": state.storage.is_some(),
    }))
}

/// Ingest a newly built image
pub async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    Json(record): Json<ImageRecord>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    info!("Ingesting image: {}", record.id);

    let validation = validate(&record, &state.policy);
    let ingested = state.ingest(record.clone()).await?;

    for failure in &validation.failures {
        warn!("Image {}: {}", record.id, failure);
    }

    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            success: true,
            message: format!("Image recorded: {}", record.id),
            out_of_order: ingested.out_of_order,
            validation,
        }),
    ))
}

/// Get an image by id
pub async fn get_image_handler(
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<String>,
) -> Result<Json<ImageResponse>, ApiError> {
    let image = state.selector.get(&image_id).await?;
    Ok(Json(ImageResponse { image }))
}

/// Move an image to a new state
pub async fn transition_handler(
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<String>,
    Json(payload): Json<TransitionRequest>,
) -> Result<Json<ImageResponse>, ApiError> {
    info!("Moving image {} to {}", image_id, payload.state);

    let image = state.transition(&image_id, payload.state).await?;

    Ok(Json(ImageResponse { image }))
}

/// Deregister an available image
pub async fn deregister_handler(
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<String>,
) -> Result<Json<ImageResponse>, ApiError> {
    info!("Deregistering image: {}", image_id);

    let image = state.transition(&image_id, ImageState::Deregistered).await?;

    Ok(Json(ImageResponse { image }))
}

/// Validate a stored image against the registry policy
pub async fn image_validation_handler(
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<String>,
) -> Result<Json<ValidationResult>, ApiError> {
    let image = state.selector.get(&image_id).await?;
    Ok(Json(validate(&image, &state.policy)))
}

/// Validate a posted image without recording it
pub async fn validate_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ValidateRequest>,
) -> Json<ValidationResult> {
    let policy = payload.policy.as_ref().unwrap_or(&state.policy);
    Json(validate(&payload.image, policy))
}

/// List environments with recorded images
pub async fn list_environments_handler(
    State(state): State<Arc<AppState>>,
) -> Json<EnvironmentsResponse> {
    Json(EnvironmentsResponse {
        environments: state.selector.environments().await,
    })
}

/// Latest valid image for an environment
pub async fn latest_handler(
    State(state): State<Arc<AppState>>,
    Path(environment): Path<String>,
) -> Result<Json<ImageResponse>, ApiError> {
    let image = state.selector.get_latest_valid(&environment).await?;
    info!("Latest image for {}: {}", environment, image.id);
    Ok(Json(ImageResponse { image }))
}

/// Build history of an environment, oldest first
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path(environment): Path<String>,
) -> Json<HistoryResponse> {
    let images = state.selector.history(&environment).await;
    let total = images.len();
    Json(HistoryResponse {
        environment,
        images,
        total,
    })
}
