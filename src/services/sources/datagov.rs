//! Data.gov open-data client (CKAN package search).

use async_trait::async_trait;

use crate::config::ProviderSettings;
use crate::models::CandidateItem;

use super::{
    AuthMode, HttpSourceCore, SearchOptions, SharedSourceInfra, SourceClient, SourceDescriptor,
    SourceError, SourceResponse, SourceStats,
};

pub struct DataGovClient {
    core: HttpSourceCore,
}

impl DataGovClient {
    pub fn new(settings: &ProviderSettings, infra: &SharedSourceInfra) -> Self {
        let descriptor = SourceDescriptor::from_settings(settings, AuthMode::None);
        Self { core: HttpSourceCore::new(descriptor, None, infra) }
    }
}

#[async_trait]
impl SourceClient for DataGovClient {
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
            ("rows".to_string(), opts.limit.min(20).to_string()),
        ];

        let fetched = self.core.fetch_json("package_search", &params, opts).await?;
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

        let Some(datasets) = raw["result"]["results"].as_array() else {
            return Vec::new();
        };

        datasets
            .iter()
            .filter_map(|dataset| {
                let title = dataset["title"].as_str()?.to_string();
                let notes = dataset["notes"]
                    .as_str()
                    .map(|s| s.chars().take(500).collect::<String>())
                    .filter(|s| !s.is_empty());
                let publisher = dataset["organization"]["title"].as_str();
                let date = dataset["metadata_modified"]
                    .as_str()
                    .map(|d| d.chars().take(10).collect::<String>());
                let dataset_name = dataset["name"].as_str().unwrap_or("");
                let url = (!dataset_name.is_empty())
                    .then(|| format!("https://catalog.data.gov/dataset/{}", dataset_name));

                let description = match (notes, publisher) {
                    (Some(n), Some(p)) => Some(format!("{} — published by {}", n, p)),
                    (Some(n), None) => Some(n),
                    (None, Some(p)) => Some(format!("Dataset published by {}", p)),
                    (None, None) => None,
                };

                Some(CandidateItem {
                    fingerprint: CandidateItem::compute_fingerprint(&title, name, date.as_deref()),
                    title,
                    description,
                    source_name: name.clone(),
                    source_authority: authority.to_string(),
                    media: Vec::new(),
                    url,
                    date,
                    location: opts.location_hint.clone(),
                    topics: vec!["open data".to_string()],
                    raw: dataset.clone(),
                })
            })
            .take(opts.limit)
            .collect()
    }

    fn stats(&self) -> SourceStats {
        self.core.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::CacheService;
    use crate::services::circuit_breaker::BreakerRegistry;
    use crate::services::cost_ledger::CostLedger;
    use std::sync::Arc;

    #[test]
    fn transforms_ckan_packages() {
        let infra = SharedSourceInfra {
            cache: Arc::new(CacheService::in_memory()),
            ledger: Arc::new(CostLedger::new()),
            breakers: Arc::new(BreakerRegistry::new()),
        };
        let settings = ProviderSettings {
            name: "datagov".to_string(),
            base_url: "https://catalog.data.gov/api/3/action".to_string(),
            category: "government".to_string(),
            ..Default::default()
        };
        let client = DataGovClient::new(&settings, &infra);

        let raw = serde_json::json!({
            "result": {
                "results": [
                    {
                        "title": "National Register of Historic Places",
                        "name": "national-register-of-historic-places",
                        "notes": "Listing of districts, sites, buildings...",
                        "metadata_modified": "2024-06-30T12:00:00",
                        "organization": {"title": "National Park Service"}
                    }
                ]
            }
        });

        let items = client.transform(&raw, &SearchOptions::basic(10));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_authority, "government");
        assert!(items[0].description.as_deref().unwrap().contains("National Park Service"));
        assert!(items[0].url.as_deref().unwrap().ends_with("historic-places"));
    }
}
