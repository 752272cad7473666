use serde::Serialize;

use crate::models::{ActivityLevel, Gender, GoalType, Profile};

/// Lowest daily target we suggest while losing weight.
const MIN_LOSE_TARGET_KCAL: i64 = 1200;
const LOSE_DEFICIT_KCAL: i64 = 500;
const GAIN_SURPLUS_KCAL: i64 = 250;

pub fn activity_multiplier(level: ActivityLevel) -> f64 {
    match level {
        ActivityLevel::Sedentary => 1.2,
        ActivityLevel::Light => 1.375,
        ActivityLevel::Moderate => 1.55,
        ActivityLevel::Active => 1.725,
        ActivityLevel::VeryActive => 1.9,
    }
}

/// Mifflin-St Jeor basal metabolic rate, in kcal/day.
pub fn calculate_bmr(gender: Gender, age: u32, height_cm: f64, weight_kg: f64) -> i64 {
    let base = 10.0 * weight_kg + 6.25 * height_cm - 5.0 * f64::from(age);
    let adjustment = match gender {
        Gender::Male => 5.0,
        Gender::Female => -161.0,
    };
    (base + adjustment).round() as i64
}

pub fn calculate_tdee(bmr: i64, level: ActivityLevel) -> i64 {
    (bmr as f64 * activity_multiplier(level)).round() as i64
}

pub fn calculate_daily_calorie_target(tdee: i64, goal: GoalType) -> i64 {
    match goal {
        GoalType::Lose => (tdee - LOSE_DEFICIT_KCAL).max(MIN_LOSE_TARGET_KCAL),
        GoalType::Maintain => tdee,
        GoalType::Gain => tdee + GAIN_SURPLUS_KCAL,
    }
}

/// Body mass index rounded to one decimal. `None` when height is not positive.
pub fn calculate_bmi(weight_kg: f64, height_cm: f64) -> Option<f64> {
    if !(height_cm > 0.0) || !weight_kg.is_finite() {
        return None;
    }
    let meters = height_cm / 100.0;
    Some((weight_kg / (meters * meters) * 10.0).round() / 10.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BmiCategory {
    Underweight,
    Normal,
    Overweight,
    Obese,
}

pub fn bmi_category(bmi: f64) -> BmiCategory {
    if bmi < 18.5 {
        BmiCategory::Underweight
    } else if bmi < 25.0 {
        BmiCategory::Normal
    } else if bmi < 30.0 {
        BmiCategory::Overweight
    } else {
        BmiCategory::Obese
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetabolicSummary {
    pub bmr: i64,
    pub tdee: i64,
    pub target_calories: i64,
    pub bmi: Option<f64>,
    pub bmi_category: Option<BmiCategory>,
}

impl MetabolicSummary {
    pub fn from_profile(profile: &Profile) -> Self {
        let bmr = calculate_bmr(profile.gender, profile.age, profile.height_cm, profile.weight_kg);
        let tdee = calculate_tdee(bmr, profile.activity_level);
        let bmi = calculate_bmi(profile.weight_kg, profile.height_cm);

        Self {
            bmr,
            tdee,
            target_calories: calculate_daily_calorie_target(tdee, profile.goal_type),
            bmi,
            bmi_category: bmi.map(bmi_category),
        }
    }
}
