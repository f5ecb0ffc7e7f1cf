//! GeoNames gazetteer client. Auth is a username passed as a query param.

use async_trait::async_trait;

use crate::config::ProviderSettings;
use crate::models::CandidateItem;

use super::{
    AuthMode, HttpSourceCore, SearchOptions, SharedSourceInfra, SourceClient, SourceDescriptor,
    SourceError, SourceResponse, SourceStats,
};

pub struct GeoNamesClient {
    core: HttpSourceCore,
}

impl GeoNamesClient {
    pub fn new(
        settings: &ProviderSettings,
        key: Option<String>,
        infra: &SharedSourceInfra,
    ) -> Self {
        let descriptor = SourceDescriptor::from_settings(
            settings,
            AuthMode::QueryKey { param: "username".to_string() },
        );
        Self { core: HttpSourceCore::new(descriptor, key, infra) }
    }
}

#[async_trait]
impl SourceClient for GeoNamesClient {
    fn descriptor(&self) -> &SourceDescriptor {
        self.core.descriptor()
    }

    async fn search(
        &self,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<SourceResponse, SourceError> {
        let params = vec![
            ("q".to_string(), query.to_string()),
            ("maxRows".to_string(), opts.limit.min(20).to_string()),
            ("style".to_string(), "FULL".to_string()),
            ("orderby".to_string(), "relevance".to_string()),
        ];

        let fetched = self.core.fetch_json("searchJSON", &params, opts).await?;
        let items = self.transform(&fetched.value, opts);

        Ok(SourceResponse {
            source: self.descriptor().name.clone(),
            items,
            cached: fetched.cached,
            cost: fetched.cost,
            latency_ms: fetched.latency_ms,
        })
    }

    fn transform(&self, raw: &serde_json::Value, opts: &SearchOptions) -> Vec<CandidateItem> {
        let name = &self.descriptor().name;
        let authority = self.descriptor().category.authority_class();

        let Some(places) = raw["geonames"].as_array() else {
            return Vec::new();
        };

        places
            .iter()
            .filter_map(|place| {
                let title = place["name"].as_str()?.to_string();
                let country = place["countryName"].as_str().unwrap_or("");
                let feature = place["fclName"].as_str().unwrap_or("");
                let population = place["population"].as_i64().unwrap_or(0);

                let mut description = feature.to_string();
                if population > 0 {
                    description = format!("{} (population {})", description, population);
                }
                let location = if country.is_empty() {
                    opts.location_hint.clone()
                } else {
                    Some(format!("{}, {}", title, country))
                };

                Some(CandidateItem {
                    fingerprint: CandidateItem::compute_fingerprint(
                        &title,
                        name,
                        location.as_deref(),
                    ),
                    title,
                    description: (!description.is_empty()).then_some(description),
                    source_name: name.clone(),
                    source_authority: authority.to_string(),
                    media: Vec::new(),
                    url: None,
                    date: None,
                    location,
                    topics: vec!["geography".to_string()],
                    raw: place.clone(),
                })
            })
            .take(opts.limit)
            .collect()
    }

    fn stats(&self) -> SourceStats {
        self.core.stats()
    }
}
