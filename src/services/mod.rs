pub mod ai_service;
pub mod error;
pub mod estimator; // Gemini nutrition estimator
pub mod gemini; // Generative Language REST client
pub mod model_resolver;
pub mod repair;
pub mod response_parser;

pub use ai_service::NutritionAi;
pub use error::{EstimatorError, Result};
pub use estimator::NutritionEstimator;
pub use model_resolver::{ModelResolver, ModelSelectionCache};
pub use repair::{default_ladder, RepairContext, RepairStrategy};
pub use response_parser::{extract_json_object, parse_food_detection, parse_nutrition_estimate, ParseError};
