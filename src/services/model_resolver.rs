use std::sync::{Arc, RwLock};

use super::error::Result;
use super::gemini::GeminiClient;
use crate::models::{ApiVersion, ModelSelection};

/// Newest and cheapest variants first.
pub const DEFAULT_PREFERRED_MODELS: &[&str] = &[
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
    "gemini-2.5-pro",
    "gemini-1.5-flash-latest",
    "gemini-1.5-flash",
    "gemini-1.5-pro-latest",
    "gemini-1.5-pro",
    "gemini-1.0-pro",
    "gemini-pro",
];

/// Historically stable ids used when discovery finds nothing.
pub const DISCOVERY_FALLBACK_MODELS: &[&str] = &[
    "gemini-pro",
    "gemini-1.0-pro",
    "gemini-1.5-flash-latest",
    "gemini-1.5-pro-latest",
];

const MODEL_FAMILY_KEYWORD: &str = "gemini";

/// Remembers the last (version, model) pair that produced a usable answer.
///
/// Shared behind an `Arc`; racing writers store equivalent values, so the
/// worst case is one extra discovery round-trip.
#[derive(Debug, Default)]
pub struct ModelSelectionCache {
    inner: RwLock<Option<ModelSelection>>,
}

impl ModelSelectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<ModelSelection> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set(&self, selection: ModelSelection) {
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(selection);
    }

    pub fn clear(&self) {
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

/// Models to try and the API version they were found under.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePick {
    pub api_version: ApiVersion,
    pub model_ids: Vec<String>,
}

pub struct ModelResolver {
    preferences: Vec<String>,
    cache: Arc<ModelSelectionCache>,
}

impl ModelResolver {
    pub fn new(cache: Arc<ModelSelectionCache>) -> Self {
        Self {
            preferences: DEFAULT_PREFERRED_MODELS.iter().map(|m| m.to_string()).collect(),
            cache,
        }
    }

    /// Replaces the preference list. An empty list keeps discovery order.
    pub fn with_preferences(mut self, preferences: Vec<String>) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn cache(&self) -> &Arc<ModelSelectionCache> {
        &self.cache
    }

    pub fn record_success(&self, selection: &ModelSelection) {
        if self.cache.get().as_ref() != Some(selection) {
            log::info!("✅ Using Gemini model {} from now on", selection);
            self.cache.set(selection.clone());
        }
    }

    fn preference_rank(&self, model: &str) -> Option<usize> {
        self.preferences
            .iter()
            .position(|p| p == model)
            .or_else(|| self.preferences.iter().position(|p| model.starts_with(p.as_str())))
    }

    /// Keeps family models when there are any, then moves preferred models to the front.
    ///
    /// Preferred models are ordered by the preference list; everything else keeps its order.
    pub fn prioritize(&self, models: &[String]) -> Vec<String> {
        let family: Vec<&String> = models
            .iter()
            .filter(|m| m.to_lowercase().contains(MODEL_FAMILY_KEYWORD))
            .collect();
        let pool: Vec<&String> = if family.is_empty() {
            models.iter().collect()
        } else {
            family
        };

        let mut preferred: Vec<(usize, &String)> = Vec::new();
        let mut rest: Vec<&String> = Vec::new();
        for model in pool {
            match self.preference_rank(model) {
                Some(rank) => preferred.push((rank, model)),
                None => rest.push(model),
            }
        }
        preferred.sort_by_key(|(rank, _)| *rank);

        preferred
            .into_iter()
            .map(|(_, m)| m.clone())
            .chain(rest.into_iter().cloned())
            .collect()
    }

    /// First API version with a non-empty model list, if any.
    pub async fn discover(&self, client: &GeminiClient) -> Result<Option<(ApiVersion, Vec<String>)>> {
        for version in ApiVersion::ALL {
            let models = client.list_models(version).await?;
            if !models.is_empty() {
                log::info!("🔎 Discovered {} Gemini models under {}", models.len(), version);
                return Ok(Some((version, models)));
            }
        }
        Ok(None)
    }

    /// Cached pair when present, otherwise discovered models, otherwise static fallbacks.
    pub async fn pick(&self, client: &GeminiClient) -> Result<CandidatePick> {
        if let Some(selection) = self.cache.get() {
            log::debug!("♻️ Reusing cached Gemini model {}", selection);
            return Ok(CandidatePick {
                api_version: selection.api_version,
                model_ids: vec![selection.model_id],
            });
        }

        match self.discover(client).await? {
            Some((api_version, models)) => Ok(CandidatePick {
                api_version,
                model_ids: self.prioritize(&models),
            }),
            None => {
                log::warn!("⚠️ Gemini model discovery found nothing, using fallback models");
                Ok(CandidatePick {
                    api_version: ApiVersion::ALL[0],
                    model_ids: DISCOVERY_FALLBACK_MODELS.iter().map(|m| m.to_string()).collect(),
                })
            }
        }
    }

    /// Expands a pick into ordered (version, model) pairs.
    ///
    /// Model ids are the pick followed by `fallbacks`, de-duplicated; every id
    /// is tried under the picked version before the alternate one.
    pub fn candidates(&self, pick: &CandidatePick, fallbacks: &[&str]) -> Vec<ModelSelection> {
        let mut model_ids: Vec<String> = Vec::new();
        for id in pick
            .model_ids
            .iter()
            .map(String::as_str)
            .chain(fallbacks.iter().copied())
        {
            if !model_ids.iter().any(|m| m == id) {
                model_ids.push(id.to_string());
            }
        }

        pick.api_version
            .with_alternates()
            .into_iter()
            .flat_map(|version| {
                model_ids
                    .iter()
                    .map(move |id| ModelSelection::new(version, id.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ModelResolver {
        ModelResolver::new(Arc::new(ModelSelectionCache::new()))
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_prioritize_prefers_listed_models() {
        let models = strings(&[
            "gemini-1.5-pro",
            "text-bison",
            "gemini-exp-1206",
            "gemini-2.5-flash-preview-05-20",
            "gemini-2.0-flash",
        ]);
        assert_eq!(
            resolver().prioritize(&models),
            strings(&[
                "gemini-2.5-flash-preview-05-20",
                "gemini-2.0-flash",
                "gemini-1.5-pro",
                "gemini-exp-1206",
            ])
        );
    }

    #[test]
    fn test_prioritize_without_family_models_keeps_everything() {
        let models = strings(&["text-bison", "chat-bison"]);
        assert_eq!(resolver().prioritize(&models), models);
    }

    #[test]
    fn test_prioritize_with_custom_preferences() {
        let resolver = resolver().with_preferences(strings(&["gemini-1.5-pro"]));
        let models = strings(&["gemini-2.5-flash", "gemini-1.5-pro-002", "gemini-1.5-pro"]);
        assert_eq!(
            resolver.prioritize(&models),
            strings(&["gemini-1.5-pro-002", "gemini-1.5-pro", "gemini-2.5-flash"])
        );
    }

    #[test]
    fn test_prioritize_with_no_matches_keeps_order() {
        let resolver = resolver().with_preferences(strings(&["gemini-9"]));
        let models = strings(&["gemini-b", "gemini-a"]);
        assert_eq!(resolver.prioritize(&models), models);
    }

    #[test]
    fn test_candidates_dedupe_and_cover_both_versions() {
        let pick = CandidatePick {
            api_version: ApiVersion::V1Beta,
            model_ids: strings(&["gemini-2.5-flash", "gemini-pro"]),
        };
        let candidates = resolver().candidates(&pick, &["gemini-pro", "gemini-1.0-pro"]);
        let rendered: Vec<String> = candidates.iter().map(|c| c.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "v1beta/gemini-2.5-flash",
                "v1beta/gemini-pro",
                "v1beta/gemini-1.0-pro",
                "v1/gemini-2.5-flash",
                "v1/gemini-pro",
                "v1/gemini-1.0-pro",
            ]
        );
    }

    #[test]
    fn test_cache_roundtrip_and_clear() {
        let cache = ModelSelectionCache::new();
        assert_eq!(cache.get(), None);

        let selection = ModelSelection::new(ApiVersion::V1, "gemini-2.0-flash");
        cache.set(selection.clone());
        assert_eq!(cache.get(), Some(selection));

        cache.clear();
        assert_eq!(cache.get(), None);
    }
}
