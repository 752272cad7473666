//! Prompt ladder used to coax valid JSON out of a text model.
//!
//! Each rung is a pure function of the user's text and the previous raw
//! response, so the ladder's depth and wording live in data.

pub(crate) const NUTRITION_SCHEMA: &str =
    r#"{"foodName":string,"calories":number,"protein":number,"fat":number,"carbs":number}"#;

/// How much of a previous response is quoted back to the model.
const SNIPPET_CHARS: usize = 1200;

/// What a rung gets to look at when building its prompt.
#[derive(Debug, Clone, Copy)]
pub struct RepairContext<'a> {
    pub user_text: &'a str,
    pub previous_raw: Option<&'a str>,
}

#[derive(Clone, Copy)]
pub struct RepairStrategy {
    pub name: &'static str,
    pub max_output_tokens: u32,
    build: fn(&RepairContext<'_>) -> String,
}

impl RepairStrategy {
    pub fn new(
        name: &'static str,
        max_output_tokens: u32,
        build: fn(&RepairContext<'_>) -> String,
    ) -> Self {
        Self {
            name,
            max_output_tokens,
            build,
        }
    }

    pub fn prompt(&self, ctx: &RepairContext<'_>) -> String {
        (self.build)(ctx)
    }
}

impl std::fmt::Debug for RepairStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepairStrategy")
            .field("name", &self.name)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

fn snippet(ctx: &RepairContext<'_>) -> String {
    ctx.previous_raw
        .unwrap_or_default()
        .trim()
        .chars()
        .take(SNIPPET_CHARS)
        .collect()
}

fn initial_prompt(ctx: &RepairContext<'_>) -> String {
    format!(
        "You are a nutritionist. Estimate the food described by the user and reply with a single-line JSON object only. \
         Do not use markdown, code fences or ``` and do not add any other text (no leading \"json\"). \
         schema: {}. Units: calories in kcal, macros in grams. User text: {}",
        NUTRITION_SCHEMA, ctx.user_text
    )
}

fn stricter_prompt(ctx: &RepairContext<'_>) -> String {
    format!(
        "Reply again as a single-line JSON object only (no markdown, no ```, no other words). \
         Do not return all zeros; if unsure, give a reasonable estimate. \
         schema: {}. User text: {}",
        NUTRITION_SCHEMA, ctx.user_text
    )
}

fn repair_prompt(ctx: &RepairContext<'_>) -> String {
    format!(
        "Convert the following text into one valid single-line JSON object only, with no markdown, ``` or other text. \
         It must have the keys foodName, calories, protein, fat, carbs (numbers as JSON numbers). \
         Do not return all zeros; if unsure, give a reasonable estimate. Text: {}",
        snippet(ctx)
    )
}

fn final_prompt(ctx: &RepairContext<'_>) -> String {
    format!(
        "Reply with a single-line JSON object only (no markdown, no ```, no other words). \
         If information is missing, estimate reasonably. Never leave out schema fields. \
         schema: {}. Text: {}",
        NUTRITION_SCHEMA,
        snippet(ctx)
    )
}

/// The four attempts made against one model before moving on.
pub fn default_ladder() -> Vec<RepairStrategy> {
    vec![
        RepairStrategy::new("initial", 2048, initial_prompt),
        RepairStrategy::new("stricter", 1024, stricter_prompt),
        RepairStrategy::new("repair", 1024, repair_prompt),
        RepairStrategy::new("final", 1024, final_prompt),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ladder_shape() {
        let ladder = default_ladder();
        let names: Vec<_> = ladder.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["initial", "stricter", "repair", "final"]);
        assert_eq!(ladder[0].max_output_tokens, 2048);
        assert!(ladder[1..].iter().all(|s| s.max_output_tokens == 1024));
    }

    #[test]
    fn test_prompts_are_pure() {
        let ctx = RepairContext {
            user_text: "two boiled eggs",
            previous_raw: Some("```json {\"foodName\": \"Eggs\""),
        };
        for strategy in default_ladder() {
            assert_eq!(strategy.prompt(&ctx), strategy.prompt(&ctx));
        }
    }

    #[test]
    fn test_repair_rungs_quote_previous_output() {
        let ctx = RepairContext {
            user_text: "two boiled eggs",
            previous_raw: Some("  the eggs have about 150 kcal  "),
        };
        let ladder = default_ladder();
        assert!(ladder[0].prompt(&ctx).contains("two boiled eggs"));
        assert!(ladder[1].prompt(&ctx).contains("Do not return all zeros"));
        assert!(ladder[2].prompt(&ctx).ends_with("Text: the eggs have about 150 kcal"));
        assert!(ladder[3].prompt(&ctx).contains("the eggs have about 150 kcal"));
    }

    #[test]
    fn test_snippet_is_bounded() {
        let long = "y".repeat(5000);
        let ctx = RepairContext {
            user_text: "",
            previous_raw: Some(&long),
        };
        assert_eq!(snippet(&ctx).len(), SNIPPET_CHARS);
    }
}
