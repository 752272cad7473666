use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose, Engine};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

use crate::calculations::MetabolicSummary;
use crate::config::ServerConfig;
use crate::models::{FoodDetectionResult, ImageEstimateRequest, NutritionEstimate, Profile};
use crate::services::{EstimatorError, NutritionAi};

pub mod upload;

use upload::read_image_form;

/// Room for the non-image form fields on top of the image itself.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

pub struct AppState {
    pub ai: Arc<dyn NutritionAi>,
    pub config: ServerConfig,
}

/// JSON error body: `{error, retrySeconds?}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    retry_seconds: Option<u64>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            retry_seconds: None,
        }
    }
}

impl From<EstimatorError> for ApiError {
    fn from(err: EstimatorError) -> Self {
        let status = match &err {
            EstimatorError::CredentialMissing
            | EstimatorError::CredentialInvalid { .. }
            | EstimatorError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EstimatorError::CredentialCompromised => StatusCode::FORBIDDEN,
            EstimatorError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            EstimatorError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
            EstimatorError::AllCandidatesExhausted { .. }
            | EstimatorError::UnparseableResponse { .. }
            | EstimatorError::Transport { .. } => StatusCode::BAD_GATEWAY,
        };

        let message = match &err {
            EstimatorError::AllCandidatesExhausted { .. } | EstimatorError::UnparseableResponse { .. } => {
                "AI could not estimate this food; try describing it in more detail or retry".to_string()
            }
            other => other.to_string(),
        };
        log::warn!("⚠️ Estimation request failed ({}): {}", status, err);

        Self {
            status,
            message,
            retry_seconds: err.retry_after_secs(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.message });
        if let Some(secs) = self.retry_seconds {
            body["retrySeconds"] = json!(secs);
        }
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct TextEstimateRequest {
    pub date: NaiveDate,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct EstimateResponse {
    pub date: NaiveDate,
    pub estimated: NutritionEstimate,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub date: NaiveDate,
    pub detected: FoodDetectionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExerciseEstimateRequest {
    pub date: NaiveDate,
    pub name: String,
    pub minutes: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseEstimateResponse {
    pub date: NaiveDate,
    pub name: String,
    pub calories_burned: f64,
}

pub fn create_router(ai: Arc<dyn NutritionAi>, config: ServerConfig) -> Router {
    let body_limit = config.max_image_bytes + FORM_OVERHEAD_BYTES;
    let state = Arc::new(AppState { ai, config });

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .route("/api/ai/status", get(ai_status))
        .route("/api/food/ai-estimate", post(estimate_food_text))
        .route("/api/food/ai-estimate-image", post(estimate_food_image))
        .route("/api/food/ai-detect-image", post(detect_food_image))
        .route("/api/exercise/ai-estimate", post(estimate_exercise))
        .route("/api/profile/summary", post(profile_summary))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}

async fn root_handler() -> &'static str {
    "Calorie Estimator - POST /api/food/ai-estimate, /api/food/ai-estimate-image, /api/food/ai-detect-image"
}

async fn health_check() -> &'static str {
    "OK"
}

async fn ai_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "enabled": state.ai.is_enabled() }))
}

async fn estimate_food_text(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TextEstimateRequest>,
) -> Result<Json<EstimateResponse>, ApiError> {
    log::info!("📨 Text estimate request for {}", request.date);
    let estimated = state.ai.estimate_from_text(&request.text).await?;
    Ok(Json(EstimateResponse {
        date: request.date,
        estimated,
    }))
}

async fn estimate_food_image(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<EstimateResponse>, ApiError> {
    let upload = read_image_form(multipart, state.config.max_image_bytes).await?;
    log::info!("📸 Image estimate request for {} ({} bytes)", upload.date, upload.image.len());

    let request = ImageEstimateRequest {
        image_base64: general_purpose::STANDARD.encode(&upload.image),
        mime_type: upload.mime_type,
        text: upload.text,
        amount: upload.amount,
        unit: upload.unit,
    };
    let estimated = state.ai.estimate_from_image(&request).await?;
    Ok(Json(EstimateResponse {
        date: upload.date,
        estimated,
    }))
}

/// Never fails on AI errors: the form falls back to a generic placeholder.
async fn detect_food_image(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<DetectResponse>, ApiError> {
    let upload = read_image_form(multipart, state.config.max_image_bytes).await?;
    log::info!("🔍 Detect request for {} ({} bytes)", upload.date, upload.image.len());

    let image_base64 = general_purpose::STANDARD.encode(&upload.image);
    let response = match state.ai.detect_from_image(&image_base64, upload.mime_type).await {
        Ok(detected) => DetectResponse {
            date: upload.date,
            detected,
            warning: None,
        },
        Err(e) => {
            log::warn!("⚠️ Detection failed, using placeholder: {}", e);
            DetectResponse {
                date: upload.date,
                detected: FoodDetectionResult::placeholder(),
                warning: Some(e.to_string()),
            }
        }
    };
    Ok(Json(response))
}

async fn estimate_exercise(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExerciseEstimateRequest>,
) -> Result<Json<ExerciseEstimateResponse>, ApiError> {
    log::info!("🏃 Exercise estimate request for {}", request.date);
    let estimate = state.ai.estimate_exercise(&request.name, request.minutes).await?;
    Ok(Json(ExerciseEstimateResponse {
        date: request.date,
        name: estimate.food_name,
        calories_burned: estimate.calories.max(0.0),
    }))
}

async fn profile_summary(Json(profile): Json<Profile>) -> Result<Json<MetabolicSummary>, ApiError> {
    let is_positive = |v: f64| v.is_finite() && v > 0.0;
    if !is_positive(profile.height_cm) || !is_positive(profile.weight_kg) {
        return Err(ApiError::bad_request("height and weight must be positive"));
    }
    Ok(Json(MetabolicSummary::from_profile(&profile)))
}
