use serde_json::{Map, Value};
use thiserror::Error;

use super::error::{preview, EstimatorError};
use crate::models::{
    FoodDetectionResult, NutritionEstimate, IMAGE_FALLBACK_NAME, MAX_FOOD_NAME_CHARS,
};

/// Why a model response could not be turned into a result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("model returned an empty response")]
    Empty,
    #[error("model response is not JSON: {preview}")]
    NotJson { preview: String },
    #[error("model response has no usable nutrition values: {preview}")]
    Degenerate { preview: String },
}

impl From<ParseError> for EstimatorError {
    fn from(err: ParseError) -> Self {
        let preview = match err {
            ParseError::Empty => String::new(),
            ParseError::NotJson { preview } | ParseError::Degenerate { preview } => preview,
        };
        EstimatorError::UnparseableResponse { preview }
    }
}

fn not_json(raw: &str) -> ParseError {
    if raw.trim().is_empty() {
        ParseError::Empty
    } else {
        ParseError::NotJson {
            preview: preview(raw),
        }
    }
}

/// Strips the wrapping models like to put around a JSON payload:
/// surrounding quotes, code fences, a bare `json` tag and typographic quotes/braces.
fn normalize(raw: &str) -> String {
    let mut s = raw.trim();

    let quoted = s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')));
    if quoted {
        s = s[1..s.len() - 1].trim();
    }

    if let Some(rest) = s.strip_prefix("```") {
        // Opening fence, optionally tagged with a language name.
        let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
        s = rest.trim_start();
        if let Some(body) = s.trim_end().strip_suffix("```") {
            s = body;
        }
        s = s.trim();
    }

    if s.get(..4).is_some_and(|tag| tag.eq_ignore_ascii_case("json")) {
        s = s[4..].trim_start();
    }

    s.replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('\u{FF5B}', "{")
        .replace('\u{FF5D}', "}")
}

/// Scans from the first `{`, returning the balanced object, or a best-effort
/// closed copy when the text ends while the object is still open.
fn scan_object(s: &str, start: usize) -> Option<String> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in s[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(s[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }

    if depth > 0 {
        // Truncated output: drop a dangling comma and close the object.
        let candidate = s[start..].trim_end();
        let candidate = candidate.strip_suffix(',').unwrap_or(candidate).trim_end();
        return Some(format!("{}}}", candidate));
    }
    None
}

/// Returns the text of the JSON object embedded in a model response, if any.
///
/// Pure: the same input always gives the same output.
pub fn extract_json_object(raw: &str) -> Option<String> {
    let s = normalize(raw);
    let start = s.find('{')?;

    scan_object(&s, start).or_else(|| widest_object(&s, start))
}

fn widest_object(s: &str, start: usize) -> Option<String> {
    let end = s.rfind('}')?;
    (end > start).then(|| s[start..=end].to_string())
}

/// Candidate JSON texts in the order they should be tried.
fn json_candidates(raw: &str) -> Vec<String> {
    let s = normalize(raw);
    let Some(start) = s.find('{') else {
        return Vec::new();
    };

    let mut candidates = Vec::new();
    if let Some(primary) = scan_object(&s, start) {
        candidates.push(primary);
    }
    if let Some(widest) = widest_object(&s, start) {
        if !candidates.contains(&widest) {
            candidates.push(widest);
        }
    }
    candidates
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, ParseError> {
    let candidates = json_candidates(raw);
    if candidates.is_empty() {
        return Err(not_json(raw));
    }

    for candidate in &candidates {
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => return Ok(map),
            Ok(_) => {}
            Err(e) => log::debug!("🧩 JSON candidate rejected: {}", e),
        }
    }
    Err(not_json(raw))
}

/// Lenient number coercion: numbers as-is, numeric strings with thousands
/// separators, everything else 0.
fn lenient_number(value: Option<&Value>) -> f64 {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.replace(',', "").trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

fn lenient_string(value: Option<&Value>) -> Option<String> {
    let s = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn truncate_name(name: &str) -> String {
    name.chars().take(MAX_FOOD_NAME_CHARS).collect()
}

/// Turns a raw model response into a nutrition estimate.
///
/// Missing calories are derived from macros (4/4/9 kcal per gram of
/// protein/carbs/fat). A result with every nutrient at zero is rejected.
pub fn parse_nutrition_estimate(raw: &str, fallback_name: &str) -> Result<NutritionEstimate, ParseError> {
    let record = parse_object(raw)?;

    let protein = lenient_number(record.get("protein")).max(0.0);
    let fat = lenient_number(record.get("fat")).max(0.0);
    let carbs = lenient_number(record.get("carbs")).max(0.0);
    let mut calories = lenient_number(record.get("calories")).max(0.0);

    if calories <= 0.0 && (protein > 0.0 || fat > 0.0 || carbs > 0.0) {
        calories = (protein * 4.0 + carbs * 4.0 + fat * 9.0).round();
    }

    let food_name = lenient_string(record.get("foodName")).unwrap_or_else(|| fallback_name.to_string());

    let estimate = NutritionEstimate {
        food_name: truncate_name(&food_name),
        calories,
        protein,
        fat,
        carbs,
    };

    if estimate.is_degenerate() {
        return Err(ParseError::Degenerate {
            preview: preview(raw),
        });
    }
    Ok(estimate)
}

/// Turns a raw detection response into a food label and unit suggestion.
pub fn parse_food_detection(raw: &str) -> Result<FoodDetectionResult, ParseError> {
    let record = parse_object(raw)?;

    let unit_options: Vec<String> = match record.get("unitOptions") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|u| lenient_string(Some(u)))
            .collect(),
        _ => Vec::new(),
    };
    let default_unit = lenient_string(record.get("defaultUnit")).unwrap_or_else(|| "gram".to_string());
    let food_name = lenient_string(record.get("foodName")).unwrap_or_else(|| IMAGE_FALLBACK_NAME.to_string());

    Ok(FoodDetectionResult::new(
        truncate_name(&food_name),
        default_unit,
        unit_options,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHICKEN: &str = r#"{"foodName":"Grilled chicken","calories":165,"protein":31,"fat":4,"carbs":0}"#;

    fn chicken() -> NutritionEstimate {
        NutritionEstimate {
            food_name: "Grilled chicken".to_string(),
            calories: 165.0,
            protein: 31.0,
            fat: 4.0,
            carbs: 0.0,
        }
    }

    #[test]
    fn test_extract_from_fenced_block() {
        let raw = format!("```json\n{}\n```", CHICKEN);
        assert_eq!(extract_json_object(&raw).as_deref(), Some(CHICKEN));
        assert_eq!(parse_nutrition_estimate(&raw, "fallback").unwrap(), chicken());
    }

    #[test]
    fn test_extract_from_common_noise() {
        let noisy = [
            CHICKEN.to_string(),
            format!("```\n{}\n```", CHICKEN),
            format!("json {}", CHICKEN),
            format!("JSON\n{}", CHICKEN),
            format!("\"json {}\"", CHICKEN),
            format!("Here is the estimate: {} Enjoy!", CHICKEN),
            format!("'{}'", CHICKEN),
        ];
        for raw in &noisy {
            assert_eq!(extract_json_object(raw).as_deref(), Some(CHICKEN), "input: {}", raw);
        }
    }

    #[test]
    fn test_extract_normalizes_smart_quotes_and_full_width_braces() {
        let raw = "\u{FF5B}\u{201C}foodName\u{201D}:\u{201C}Grilled chicken\u{201D},\u{201C}calories\u{201D}:165,\u{201C}protein\u{201D}:31,\u{201C}fat\u{201D}:4,\u{201C}carbs\u{201D}:0\u{FF5D}";
        assert_eq!(extract_json_object(raw).as_deref(), Some(CHICKEN));
    }

    #[test]
    fn test_nested_objects_are_kept_whole() {
        let raw = r#"noise {"foodName":"Soup","calories":90,"extra":{"note":"bowl"}} trailing }"#;
        assert_eq!(
            extract_json_object(raw).as_deref(),
            Some(r#"{"foodName":"Soup","calories":90,"extra":{"note":"bowl"}}"#)
        );
    }

    #[test]
    fn test_braces_inside_strings_do_not_end_the_object() {
        let raw = r#"{"foodName":"Cake } slice","calories":300}"#;
        assert_eq!(extract_json_object(raw).as_deref(), Some(raw));
    }

    #[test]
    fn test_truncated_after_complete_pair_is_repaired() {
        let raw = r#"{"foodName":"Rice","calories":200,"protein":4,"#;
        assert_eq!(
            extract_json_object(raw).as_deref(),
            Some(r#"{"foodName":"Rice","calories":200,"protein":4}"#)
        );
        let estimate = parse_nutrition_estimate(raw, "fallback").unwrap();
        assert_eq!(estimate.calories, 200.0);
        assert_eq!(estimate.protein, 4.0);
    }

    #[test]
    fn test_truncated_mid_value_fails_cleanly() {
        let raw = r#"{"foodName":"Rice","calories":200,"protein":"#;
        assert!(matches!(
            parse_nutrition_estimate(raw, "fallback"),
            Err(ParseError::NotJson { .. })
        ));
    }

    #[test]
    fn test_no_object_fails() {
        assert_eq!(extract_json_object("I cannot estimate that."), None);
        assert_eq!(parse_nutrition_estimate("   ", "x"), Err(ParseError::Empty));
        assert!(matches!(
            parse_nutrition_estimate("no json here", "x"),
            Err(ParseError::NotJson { .. })
        ));
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let raw = format!("```json\n{}\n```", r#"{"foodName":"Egg","calories":78,"#);
        let first = extract_json_object(&raw);
        let second = extract_json_object(&raw);
        assert_eq!(first, second);
        assert_eq!(parse_nutrition_estimate(&raw, "x"), parse_nutrition_estimate(&raw, "x"));
    }

    #[test]
    fn test_calories_derived_from_macros() {
        let estimate = parse_nutrition_estimate(r#"{"protein":20,"fat":10,"carbs":30}"#, "Bowl").unwrap();
        assert_eq!(estimate.calories, 290.0);
        assert_eq!(estimate.food_name, "Bowl");
    }

    #[test]
    fn test_all_zero_is_degenerate() {
        let result = parse_nutrition_estimate(r#"{"calories":0,"protein":0,"fat":0,"carbs":0}"#, "x");
        assert!(matches!(result, Err(ParseError::Degenerate { .. })));
    }

    #[test]
    fn test_numeric_strings_and_negatives() {
        let raw = r#"{"foodName":"Pizza","calories":"1,250","protein":"40","fat":-3,"carbs":"lots"}"#;
        let estimate = parse_nutrition_estimate(raw, "x").unwrap();
        assert_eq!(estimate.calories, 1250.0);
        assert_eq!(estimate.protein, 40.0);
        assert_eq!(estimate.fat, 0.0);
        assert_eq!(estimate.carbs, 0.0);
    }

    #[test]
    fn test_food_name_truncated() {
        let long_name = "a".repeat(200);
        let raw = format!(r#"{{"foodName":"{}","calories":10}}"#, long_name);
        let estimate = parse_nutrition_estimate(&raw, "x").unwrap();
        assert_eq!(estimate.food_name.chars().count(), MAX_FOOD_NAME_CHARS);
    }

    #[test]
    fn test_parse_error_preview_is_bounded() {
        let raw = format!("not json {}", "z".repeat(1000));
        match parse_nutrition_estimate(&raw, "x") {
            Err(ParseError::NotJson { preview }) => assert_eq!(preview.chars().count(), 300),
            other => panic!("expected NotJson, got {:?}", other),
        }
    }

    #[test]
    fn test_detection_default_unit_is_an_option() {
        let raw = r#"{"foodName":"Fried rice","defaultUnit":"bowl","unitOptions":["plate","gram"]}"#;
        let detected = parse_food_detection(raw).unwrap();
        assert_eq!(detected.food_name, "Fried rice");
        assert_eq!(detected.default_unit, "plate");
    }

    #[test]
    fn test_detection_defaults() {
        let detected = parse_food_detection("```json\n{}\n```").unwrap();
        assert_eq!(detected.food_name, IMAGE_FALLBACK_NAME);
        assert_eq!(detected.default_unit, "gram");
        assert!(detected.unit_options.contains(&detected.default_unit));
    }
}
