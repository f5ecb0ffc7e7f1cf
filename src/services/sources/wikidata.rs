//! Wikidata entity search client.

use async_trait::async_trait;

use crate::config::ProviderSettings;
use crate::models::CandidateItem;

use super::{
    AuthMode, HttpSourceCore, SearchOptions, SharedSourceInfra, SourceClient, SourceDescriptor,
    SourceError, SourceResponse, SourceStats,
};

pub struct WikidataClient {
    core: HttpSourceCore,
}

impl WikidataClient {
    pub fn new(settings: &ProviderSettings, infra: &SharedSourceInfra) -> Self {
        let descriptor = SourceDescriptor::from_settings(settings, AuthMode::None);
        Self { core: HttpSourceCore::new(descriptor, None, infra) }
    }
}

#[async_trait]
impl SourceClient for WikidataClient {
    fn descriptor(&self) -> &SourceDescriptor {
        self.core.descriptor()
    }

    async fn search(
        &self,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<SourceResponse, SourceError> {
        let params = vec![
            ("action".to_string(), "wbsearchentities".to_string()),
            ("search".to_string(), query.to_string()),
            ("language".to_string(), "en".to_string()),
            ("uselang".to_string(), "en".to_string()),
            ("limit".to_string(), opts.limit.min(50).to_string()),
            ("format".to_string(), "json".to_string()),
        ];

        let fetched = self.core.fetch_json("", &params, opts).await?;
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

        let Some(results) = raw["search"].as_array() else {
            return Vec::new();
        };

        results
            .iter()
            .filter_map(|entry| {
                let label = entry["label"].as_str()?.to_string();
                let description = entry["description"].as_str().map(|s| s.to_string());
                let url = entry["concepturi"]
                    .as_str()
                    .or(entry["url"].as_str())
                    .map(|s| {
                        if s.starts_with("//") { format!("https:{}", s) } else { s.to_string() }
                    });

                Some(CandidateItem {
                    fingerprint: CandidateItem::compute_fingerprint(
                        &label,
                        name,
                        opts.location_hint.as_deref(),
                    ),
                    title: label,
                    description,
                    source_name: name.clone(),
                    source_authority: authority.to_string(),
                    media: Vec::new(),
                    url,
                    date: None,
                    location: opts.location_hint.clone(),
                    topics: Vec::new(),
                    raw: entry.clone(),
                })
            })
            .take(opts.limit)
            .collect()
    }

    fn stats(&self) -> SourceStats {
        self.core.stats()
    }
}
