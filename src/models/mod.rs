use serde::{Deserialize, Serialize};

pub mod profile;

pub use profile::{ActivityLevel, Gender, GoalType, Profile};

/// Name used when an image estimate comes back without a food name.
pub const IMAGE_FALLBACK_NAME: &str = "Food from photo";

/// Longest food name we hand back to callers.
pub const MAX_FOOD_NAME_CHARS: usize = 80;

/// Units the detection prompt is allowed to pick from.
pub const UNIT_VOCABULARY: &[&str] = &[
    "gram",
    "ml",
    "piece",
    "plate",
    "cup",
    "tablespoon",
    "teaspoon",
];

/// Options used when the model proposes no units at all.
pub const DEFAULT_UNIT_OPTIONS: &[&str] = &["gram", "ml", "piece", "plate"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionEstimate {
    pub food_name: String,
    pub calories: f64,  // kcal
    pub protein: f64,   // grams
    pub fat: f64,       // grams
    pub carbs: f64,     // grams
}

impl NutritionEstimate {
    /// True when every nutrient is zero or not a finite number.
    pub fn is_degenerate(&self) -> bool {
        [self.calories, self.protein, self.fat, self.carbs]
            .iter()
            .all(|v| !v.is_finite() || *v <= 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodDetectionResult {
    pub food_name: String,
    pub default_unit: String,
    pub unit_options: Vec<String>,
}

impl FoodDetectionResult {
    /// Builds a result, forcing `default_unit` to be one of `unit_options`.
    pub fn new(food_name: String, default_unit: String, unit_options: Vec<String>) -> Self {
        let unit_options = if unit_options.is_empty() {
            DEFAULT_UNIT_OPTIONS.iter().map(|u| u.to_string()).collect()
        } else {
            unit_options
        };

        let default_unit = if unit_options.contains(&default_unit) {
            default_unit
        } else {
            unit_options[0].clone()
        };

        Self {
            food_name,
            default_unit,
            unit_options,
        }
    }

    /// Placeholder handed out when detection fails and the form still needs a unit.
    pub fn placeholder() -> Self {
        Self {
            food_name: IMAGE_FALLBACK_NAME.to_string(),
            default_unit: "gram".to_string(),
            unit_options: ["gram", "ml", "piece", "plate", "cup"]
                .iter()
                .map(|u| u.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiVersion {
    #[serde(rename = "v1beta")]
    V1Beta,
    #[serde(rename = "v1")]
    V1,
}

impl ApiVersion {
    /// Supported versions, in the order discovery tries them.
    pub const ALL: [ApiVersion; 2] = [ApiVersion::V1Beta, ApiVersion::V1];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::V1Beta => "v1beta",
            ApiVersion::V1 => "v1",
        }
    }

    /// `self` first, then every other supported version.
    pub fn with_alternates(self) -> Vec<ApiVersion> {
        let mut versions = vec![self];
        versions.extend(Self::ALL.iter().copied().filter(|v| *v != self));
        versions
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A (version, model) pair that produced a usable answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSelection {
    pub api_version: ApiVersion,
    pub model_id: String,
}

impl ModelSelection {
    pub fn new(api_version: ApiVersion, model_id: impl Into<String>) -> Self {
        Self {
            api_version,
            model_id: model_id.into(),
        }
    }
}

impl std::fmt::Display for ModelSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.api_version, self.model_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageMime {
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/webp")]
    Webp,
}

impl ImageMime {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageMime::Jpeg => "image/jpeg",
            ImageMime::Png => "image/png",
            ImageMime::Webp => "image/webp",
        }
    }

    /// Accepts only the allow-listed image types.
    pub fn from_mime(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(ImageMime::Jpeg),
            "image/png" => Some(ImageMime::Png),
            "image/webp" => Some(ImageMime::Webp),
            _ => None,
        }
    }
}

impl std::fmt::Display for ImageMime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Input for a photo-based estimate.
#[derive(Debug, Clone)]
pub struct ImageEstimateRequest {
    pub image_base64: String,
    pub mime_type: ImageMime,
    pub text: Option<String>,
    pub amount: Option<f64>,
    pub unit: Option<String>,
}

impl ImageEstimateRequest {
    pub fn new(image_base64: String, mime_type: ImageMime) -> Self {
        Self {
            image_base64,
            mime_type,
            text: None,
            amount: None,
            unit: None,
        }
    }

    /// The stated portion, only when both a positive amount and a unit are present.
    pub fn portion(&self) -> Option<(f64, &str)> {
        let amount = self.amount.filter(|a| a.is_finite() && *a > 0.0)?;
        let unit = self.unit.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
        Some((amount, unit))
    }
}
