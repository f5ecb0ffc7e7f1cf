//! The Guardian Open Platform client (news coverage from 1999 onwards).

use async_trait::async_trait;

use crate::config::ProviderSettings;
use crate::models::CandidateItem;

use super::{
    AuthMode, HttpSourceCore, SearchOptions, SharedSourceInfra, SourceClient, SourceDescriptor,
    SourceError, SourceResponse, SourceStats,
};

pub struct GuardianClient {
    core: HttpSourceCore,
}

impl GuardianClient {
    pub fn new(
        settings: &ProviderSettings,
        key: Option<String>,
        infra: &SharedSourceInfra,
    ) -> Self {
        let descriptor = SourceDescriptor::from_settings(
            settings,
            AuthMode::QueryKey { param: "api-key".to_string() },
        );
        Self { core: HttpSourceCore::new(descriptor, key, infra) }
    }
}

#[async_trait]
impl SourceClient for GuardianClient {
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
            ("page-size".to_string(), opts.limit.min(50).to_string()),
            ("order-by".to_string(), "relevance".to_string()),
            ("show-fields".to_string(), "headline,trailText,thumbnail".to_string()),
            ("show-tags".to_string(), "keyword".to_string()),
        ];

        let fetched = self.core.fetch_json("search", &params, opts).await?;
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

        let Some(results) = raw["response"]["results"].as_array() else {
            return Vec::new();
        };

        results
            .iter()
            .filter_map(|article| {
                let title = article["webTitle"].as_str()?.to_string();
                let fields = &article["fields"];
                let description = fields["trailText"].as_str().map(|s| s.to_string());
                let thumbnail = fields["thumbnail"].as_str().map(|s| s.to_string());
                let date = article["webPublicationDate"]
                    .as_str()
                    .map(|d| d.chars().take(10).collect::<String>());
                let url = article["webUrl"].as_str().map(|s| s.to_string());

                let topics = article["tags"]
                    .as_array()
                    .map(|tags| {
                        tags.iter()
                            .filter_map(|t| t["webTitle"].as_str())
                            .map(|t| t.to_lowercase())
                            .take(5)
                            .collect()
                    })
                    .unwrap_or_default();

                Some(CandidateItem {
                    fingerprint: CandidateItem::compute_fingerprint(&title, name, date.as_deref()),
                    title,
                    description,
                    source_name: name.clone(),
                    source_authority: authority.to_string(),
                    media: thumbnail.into_iter().collect(),
                    url,
                    date,
                    location: opts.location_hint.clone(),
                    topics,
                    raw: article.clone(),
                })
            })
            .take(opts.limit)
            .collect()
    }

    fn stats(&self) -> SourceStats {
        self.core.stats()
    }
}
