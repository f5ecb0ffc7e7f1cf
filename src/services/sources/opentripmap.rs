//! OpenTripMap place client (tourism anchors).

use async_trait::async_trait;

use crate::config::ProviderSettings;
use crate::models::CandidateItem;

use super::{
    AuthMode, HttpSourceCore, SearchOptions, SharedSourceInfra, SourceClient, SourceDescriptor,
    SourceError, SourceResponse, SourceStats,
};

pub struct OpenTripMapClient {
    core: HttpSourceCore,
}

impl OpenTripMapClient {
    pub fn new(
        settings: &ProviderSettings,
        key: Option<String>,
        infra: &SharedSourceInfra,
    ) -> Self {
        let descriptor = SourceDescriptor::from_settings(
            settings,
            AuthMode::QueryKey { param: "apikey".to_string() },
        );
        Self { core: HttpSourceCore::new(descriptor, key, infra) }
    }
}

#[async_trait]
impl SourceClient for OpenTripMapClient {
    fn descriptor(&self) -> &SourceDescriptor {
        self.core.descriptor()
    }

    async fn search(
        &self,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<SourceResponse, SourceError> {
        // The geoname endpoint resolves a free-form name to one tourism anchor
        let params = vec![("name".to_string(), query.to_string())];

        let fetched = self.core.fetch_json("places/geoname", &params, opts).await?;
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

        let Some(title) = raw["name"].as_str() else {
            return Vec::new();
        };
        let country = raw["country"].as_str().unwrap_or("");
        let population = raw["population"].as_i64().unwrap_or(0);
        let timezone = raw["timezone"].as_str().unwrap_or("");

        let mut description_parts = Vec::new();
        if !country.is_empty() {
            description_parts.push(format!("Destination in {}", country));
        }
        if population > 0 {
            description_parts.push(format!("population {}", population));
        }
        if !timezone.is_empty() {
            description_parts.push(format!("timezone {}", timezone));
        }

        let location = if country.is_empty() {
            opts.location_hint.clone()
        } else {
            Some(format!("{}, {}", title, country))
        };

        vec![CandidateItem {
            fingerprint: CandidateItem::compute_fingerprint(title, name, location.as_deref()),
            title: title.to_string(),
            description: (!description_parts.is_empty()).then(|| description_parts.join(", ")),
            source_name: name.clone(),
            source_authority: authority.to_string(),
            media: Vec::new(),
            url: None,
            date: None,
            location,
            topics: vec!["travel".to_string()],
            raw: raw.clone(),
        }]
    }

    fn stats(&self) -> SourceStats {
        self.core.stats()
    }
}
