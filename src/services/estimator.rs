use base64::{engine::general_purpose, Engine};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::error::{preview, CallFailure, EstimatorError, Result};
use super::gemini::{GeminiClient, Part};
use super::model_resolver::{ModelResolver, ModelSelectionCache};
use super::repair::{default_ladder, RepairContext, RepairStrategy, NUTRITION_SCHEMA};
use super::response_parser::{parse_food_detection, parse_nutrition_estimate, ParseError};
use crate::config::EstimatorConfig;
use crate::models::{
    FoodDetectionResult, ImageEstimateRequest, ImageMime, ModelSelection, NutritionEstimate,
    IMAGE_FALLBACK_NAME, UNIT_VOCABULARY,
};

/// Appended to the resolver's pick for text estimates.
pub const TEXT_FALLBACK_MODELS: &[&str] = &[
    "gemini-pro",
    "gemini-1.0-pro",
    "gemini-1.5-flash-latest",
    "gemini-1.5-pro-latest",
];

/// Appended to the resolver's pick for image estimates and detection.
pub const IMAGE_FALLBACK_MODELS: &[&str] = &[
    "gemini-2.5-flash",
    "gemini-2.0-flash",
    "gemini-1.5-flash-latest",
    "gemini-pro",
];

/// Output budgets for the image passes; the second one recovers truncated answers.
const IMAGE_TOKEN_BUDGETS: [u32; 2] = [1024, 2048];
const DETECTION_TOKEN_BUDGET: u32 = 256;

enum LadderOutcome {
    Estimated(NutritionEstimate),
    ModelNotFound,
    Exhausted(ParseError),
}

/// Running totals across the candidate loop, used for the final error.
#[derive(Default)]
struct AttemptLog {
    attempts: usize,
    last_error: Option<String>,
    last_parse_failure: Option<ParseError>,
    got_response: bool,
}

impl AttemptLog {
    fn not_found(&mut self, candidate: &ModelSelection) {
        log::warn!("⚠️ Gemini model {} not found, trying next candidate", candidate);
        self.last_error = Some(format!("model {} not found", candidate));
    }

    fn parse_failed(&mut self, failure: ParseError) {
        self.last_error = Some(failure.to_string());
        self.last_parse_failure = Some(failure);
    }

    fn exhausted(self) -> EstimatorError {
        EstimatorError::AllCandidatesExhausted {
            attempts: self.attempts,
            last_error: self
                .last_error
                .unwrap_or_else(|| "no candidate models".to_string()),
        }
    }
}

/// Estimates nutrition values through Gemini, trying candidate models in order.
pub struct NutritionEstimator {
    client: Option<GeminiClient>,
    resolver: ModelResolver,
    ladder: Vec<RepairStrategy>,
    total_timeout: Duration,
}

impl NutritionEstimator {
    pub fn new(config: &EstimatorConfig, cache: Arc<ModelSelectionCache>) -> Result<Self> {
        let client = match &config.api_key {
            Some(key) => Some(GeminiClient::new(
                key.clone(),
                config.base_url.clone(),
                config.request_timeout,
            )?),
            None => {
                log::warn!("⚠️ GEMINI_API_KEY not set, AI estimation is disabled");
                None
            }
        };

        let mut resolver = ModelResolver::new(cache);
        if let Some(preferences) = &config.preferred_models {
            resolver = resolver.with_preferences(preferences.clone());
        }

        Ok(Self {
            client,
            resolver,
            ladder: default_ladder(),
            total_timeout: config.total_timeout,
        })
    }

    /// Replaces the text repair ladder. An empty ladder is ignored.
    pub fn with_ladder(mut self, ladder: Vec<RepairStrategy>) -> Self {
        if !ladder.is_empty() {
            self.ladder = ladder;
        }
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    pub fn selection_cache(&self) -> &Arc<ModelSelectionCache> {
        self.resolver.cache()
    }

    fn client(&self) -> Result<&GeminiClient> {
        self.client.as_ref().ok_or(EstimatorError::CredentialMissing)
    }

    async fn with_deadline<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.total_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                log::error!("⏱️ Gemini estimation exceeded {:?}", self.total_timeout);
                Err(EstimatorError::DeadlineExceeded {
                    seconds: self.total_timeout.as_secs(),
                })
            }
        }
    }

    async fn candidates(&self, client: &GeminiClient, fallbacks: &[&str]) -> Result<Vec<ModelSelection>> {
        let pick = self.resolver.pick(client).await?;
        Ok(self.resolver.candidates(&pick, fallbacks))
    }

    /// Estimates a food from a free-text description.
    pub async fn estimate_from_text(&self, text: &str) -> Result<NutritionEstimate> {
        let client = self.client()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(EstimatorError::InvalidInput("food description is empty".to_string()));
        }

        log::info!("🍽️ Estimating nutrition from text ({} chars)", text.chars().count());
        self.with_deadline(self.run_text(client, text)).await
    }

    async fn run_text(&self, client: &GeminiClient, text: &str) -> Result<NutritionEstimate> {
        let candidates = self.candidates(client, TEXT_FALLBACK_MODELS).await?;
        let mut tally = AttemptLog::default();

        for candidate in &candidates {
            match self.climb_ladder(client, candidate, text, &mut tally).await? {
                LadderOutcome::Estimated(estimate) => {
                    self.resolver.record_success(candidate);
                    log::info!("✅ Estimated '{}' at {} kcal", estimate.food_name, estimate.calories);
                    return Ok(estimate);
                }
                LadderOutcome::ModelNotFound => tally.not_found(candidate),
                LadderOutcome::Exhausted(failure) => {
                    log::warn!("⚠️ {} gave no usable JSON after {} prompts", candidate, self.ladder.len());
                    tally.parse_failed(failure);
                }
            }
        }

        log::error!("❌ Every Gemini candidate failed after {} attempts", tally.attempts);
        Err(tally.exhausted())
    }

    /// Runs every rung of the repair ladder against one model.
    async fn climb_ladder(
        &self,
        client: &GeminiClient,
        candidate: &ModelSelection,
        text: &str,
        tally: &mut AttemptLog,
    ) -> Result<LadderOutcome> {
        let mut previous_raw: Option<String> = None;
        let mut last_failure = ParseError::Empty;

        for strategy in &self.ladder {
            let prompt = strategy.prompt(&RepairContext {
                user_text: text,
                previous_raw: previous_raw.as_deref(),
            });

            tally.attempts += 1;
            let raw = match client
                .generate_content(
                    candidate.api_version,
                    &candidate.model_id,
                    &[Part::text(prompt)],
                    strategy.max_output_tokens,
                )
                .await
            {
                Ok(raw) => raw,
                Err(CallFailure::ModelNotFound) => return Ok(LadderOutcome::ModelNotFound),
                Err(CallFailure::Fatal(e)) => return Err(e),
            };
            tally.got_response = true;

            match parse_nutrition_estimate(&raw, text) {
                Ok(estimate) => return Ok(LadderOutcome::Estimated(estimate)),
                Err(failure) => {
                    log::warn!("🔧 '{}' prompt on {} unusable: {}", strategy.name, candidate, failure);
                    last_failure = failure;
                    previous_raw = Some(raw);
                }
            }
        }

        Ok(LadderOutcome::Exhausted(last_failure))
    }

    /// Estimates a food from a photo, scaled to the stated portion when one is given.
    pub async fn estimate_from_image(&self, request: &ImageEstimateRequest) -> Result<NutritionEstimate> {
        let client = self.client()?;
        let image_base64 = validate_image(&request.image_base64)?;

        log::info!(
            "📸 Estimating nutrition from {} image ({} base64 bytes)",
            request.mime_type,
            image_base64.len()
        );
        self.with_deadline(self.run_image(client, image_base64, request)).await
    }

    async fn run_image(
        &self,
        client: &GeminiClient,
        image_base64: &str,
        request: &ImageEstimateRequest,
    ) -> Result<NutritionEstimate> {
        let candidates = self.candidates(client, IMAGE_FALLBACK_MODELS).await?;
        let parts = vec![
            Part::image(image_base64, request.mime_type),
            Part::text(image_prompt(request)),
        ];
        let mut tally = AttemptLog::default();

        for (pass, budget) in IMAGE_TOKEN_BUDGETS.iter().enumerate() {
            if pass > 0 && !tally.got_response {
                // Nothing answered at all; a bigger budget will not change that.
                break;
            }
            if pass > 0 {
                log::warn!("🔁 Retrying image estimate with maxOutputTokens={}", budget);
            }

            for candidate in &candidates {
                tally.attempts += 1;
                let raw = match client
                    .generate_content(candidate.api_version, &candidate.model_id, &parts, *budget)
                    .await
                {
                    Ok(raw) => raw,
                    Err(CallFailure::ModelNotFound) => {
                        tally.not_found(candidate);
                        continue;
                    }
                    Err(CallFailure::Fatal(e)) => return Err(e),
                };
                tally.got_response = true;

                match parse_nutrition_estimate(&raw, IMAGE_FALLBACK_NAME) {
                    Ok(estimate) => {
                        self.resolver.record_success(candidate);
                        log::info!("✅ Image estimated as '{}' at {} kcal", estimate.food_name, estimate.calories);
                        return Ok(estimate);
                    }
                    Err(failure) => {
                        log::warn!("⚠️ {} image answer unusable: {}", candidate, failure);
                        tally.parse_failed(failure);
                    }
                }
            }
        }

        match tally.last_parse_failure.take() {
            Some(failure) => Err(failure.into()),
            None => Err(tally.exhausted()),
        }
    }

    /// Labels the food in a photo and proposes an input unit. Single pass, no repair.
    pub async fn detect_from_image(&self, image_base64: &str, mime_type: ImageMime) -> Result<FoodDetectionResult> {
        let client = self.client()?;
        let image_base64 = validate_image(image_base64)?;

        log::info!("🔍 Detecting food in {} image", mime_type);
        self.with_deadline(self.run_detection(client, image_base64, mime_type))
            .await
    }

    async fn run_detection(
        &self,
        client: &GeminiClient,
        image_base64: &str,
        mime_type: ImageMime,
    ) -> Result<FoodDetectionResult> {
        let candidates = self.candidates(client, IMAGE_FALLBACK_MODELS).await?;
        let parts = vec![
            Part::image(image_base64, mime_type),
            Part::text(detection_prompt()),
        ];
        let mut tally = AttemptLog::default();

        for candidate in &candidates {
            tally.attempts += 1;
            let raw = match client
                .generate_content(
                    candidate.api_version,
                    &candidate.model_id,
                    &parts,
                    DETECTION_TOKEN_BUDGET,
                )
                .await
            {
                Ok(raw) => raw,
                Err(CallFailure::ModelNotFound) => {
                    tally.not_found(candidate);
                    continue;
                }
                Err(CallFailure::Fatal(e)) => return Err(e),
            };

            let detected = parse_food_detection(&raw).map_err(|failure| {
                log::warn!("⚠️ Detection answer unusable: {}", preview(&raw));
                EstimatorError::from(failure)
            })?;
            self.resolver.record_success(candidate);
            log::info!("✅ Detected '{}' (default unit {})", detected.food_name, detected.default_unit);
            return Ok(detected);
        }

        Err(tally.exhausted())
    }

    /// Estimates kcal burned by an activity; the result's `calories` is the burn.
    pub async fn estimate_exercise(&self, activity: &str, minutes: u32) -> Result<NutritionEstimate> {
        let activity = activity.trim();
        if activity.is_empty() {
            return Err(EstimatorError::InvalidInput("activity name is empty".to_string()));
        }
        if minutes == 0 {
            return Err(EstimatorError::InvalidInput("duration must be at least one minute".to_string()));
        }

        let text = format!(
            "Estimate the calories burned by this exercise: {} for {} minutes. \
             Reply with JSON only, where calories is the kcal burned. Set protein, fat and carbs to 0.",
            activity, minutes
        );
        let mut estimate = self.estimate_from_text(&text).await?;
        estimate.food_name = format!("{} {} min", activity, minutes);
        Ok(estimate)
    }
}

/// Returns the trimmed payload once it decodes as base64.
fn validate_image(image_base64: &str) -> Result<&str> {
    let trimmed = image_base64.trim();
    if trimmed.is_empty() {
        return Err(EstimatorError::InvalidInput("image is empty".to_string()));
    }
    general_purpose::STANDARD
        .decode(trimmed)
        .map_err(|e| EstimatorError::InvalidInput(format!("image is not valid base64: {}", e)))?;
    Ok(trimmed)
}

fn image_prompt(request: &ImageEstimateRequest) -> String {
    let mut prompt = format!(
        "You are a nutritionist. Estimate the food in this photo and reply with a single-line JSON object only. \
         Do not use markdown, code fences or ``` and do not add any other text. \
         schema: {}. Units: calories in kcal, macros in grams. ",
        NUTRITION_SCHEMA
    );

    match request.portion() {
        Some((amount, unit)) => prompt.push_str(&format!(
            "Portion eaten: {} {}. Scale the values to this portion.",
            amount, unit
        )),
        None => prompt.push_str("If the portion is unknown, estimate one typical serving as shown."),
    }

    if let Some(text) = request.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        prompt.push_str(&format!(" Extra details: {}", text));
    }
    prompt
}

fn detection_prompt() -> String {
    let units = serde_json::to_string(UNIT_VOCABULARY).unwrap_or_default();
    format!(
        "Look at this food photo and reply with a single-line JSON object only, with no markdown, ``` or other text. \
         schema: {{\"foodName\":string,\"defaultUnit\":string,\"unitOptions\":string[]}}. \
         Choose unitOptions only from: {}. defaultUnit must be one of unitOptions. \
         If unsure, use defaultUnit = \"gram\".",
        units
    )
}

#[async_trait::async_trait]
impl super::NutritionAi for NutritionEstimator {
    fn is_enabled(&self) -> bool {
        NutritionEstimator::is_enabled(self)
    }

    async fn estimate_from_text(&self, text: &str) -> Result<NutritionEstimate> {
        NutritionEstimator::estimate_from_text(self, text).await
    }

    async fn estimate_from_image(&self, request: &ImageEstimateRequest) -> Result<NutritionEstimate> {
        NutritionEstimator::estimate_from_image(self, request).await
    }

    async fn detect_from_image(&self, image_base64: &str, mime_type: ImageMime) -> Result<FoodDetectionResult> {
        NutritionEstimator::detect_from_image(self, image_base64, mime_type).await
    }

    async fn estimate_exercise(&self, activity: &str, minutes: u32) -> Result<NutritionEstimate> {
        NutritionEstimator::estimate_exercise(self, activity, minutes).await
    }
}
