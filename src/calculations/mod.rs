pub mod metabolism;

pub use metabolism::{
    activity_multiplier, bmi_category, calculate_bmi, calculate_bmr, calculate_daily_calorie_target,
    calculate_tdee, BmiCategory, MetabolicSummary,
};
