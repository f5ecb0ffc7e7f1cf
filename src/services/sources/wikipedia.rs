//! Wikipedia search client (MediaWiki Action API).

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ProviderSettings;
use crate::models::CandidateItem;

use super::{
    AuthMode, HttpSourceCore, SearchOptions, SharedSourceInfra, SourceClient, SourceDescriptor,
    SourceError, SourceResponse, SourceStats,
};

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));

pub struct WikipediaClient {
    core: HttpSourceCore,
}

impl WikipediaClient {
    pub fn new(settings: &ProviderSettings, infra: &SharedSourceInfra) -> Self {
        let descriptor = SourceDescriptor::from_settings(settings, AuthMode::None);
        Self { core: HttpSourceCore::new(descriptor, None, infra) }
    }
}

#[async_trait]
impl SourceClient for WikipediaClient {
    fn descriptor(&self) -> &SourceDescriptor {
        self.core.descriptor()
    }

    async fn search(
        &self,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<SourceResponse, SourceError> {
        let params = vec![
            ("action".to_string(), "query".to_string()),
            ("list".to_string(), "search".to_string()),
            ("srsearch".to_string(), query.to_string()),
            ("srlimit".to_string(), opts.limit.min(50).to_string()),
            ("srprop".to_string(), "snippet|timestamp".to_string()),
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

        let Some(results) = raw["query"]["search"].as_array() else {
            return Vec::new();
        };

        results
            .iter()
            .filter_map(|entry| {
                let title = entry["title"].as_str()?.to_string();
                let snippet = entry["snippet"]
                    .as_str()
                    .map(|s| TAG_RE.replace_all(s, "").to_string())
                    .filter(|s| !s.is_empty());
                let date = entry["timestamp"]
                    .as_str()
                    .map(|t| t.chars().take(10).collect::<String>());
                let url = format!(
                    "https://en.wikipedia.org/wiki/{}",
                    urlencoding::encode(&title.replace(' ', "_"))
                );

                Some(CandidateItem {
                    fingerprint: CandidateItem::compute_fingerprint(
                        &title,
                        name,
                        opts.location_hint.as_deref(),
                    ),
                    title,
                    description: snippet,
                    source_name: name.clone(),
                    source_authority: authority.to_string(),
                    media: Vec::new(),
                    url: Some(url),
                    date,
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
