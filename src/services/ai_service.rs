use super::error::Result;
use crate::models::{FoodDetectionResult, ImageEstimateRequest, ImageMime, NutritionEstimate};

/// Trait for AI nutrition estimators (Gemini, test doubles, ...)
#[async_trait::async_trait]
pub trait NutritionAi: Send + Sync {
    /// False when no credential is configured; callers hide AI features then.
    fn is_enabled(&self) -> bool;
    async fn estimate_from_text(&self, text: &str) -> Result<NutritionEstimate>;
    async fn estimate_from_image(&self, request: &ImageEstimateRequest) -> Result<NutritionEstimate>;
    async fn detect_from_image(&self, image_base64: &str, mime_type: ImageMime) -> Result<FoodDetectionResult>;
    async fn estimate_exercise(&self, activity: &str, minutes: u32) -> Result<NutritionEstimate>;
}
