//! Preference model access and score personalization.
//!
//! The learned preference store is read-only from here. Lookup failures
//! of any sort fall through to the unpersonalized scores; personalization
//! must never fail a request.

use sqlx::SqlitePool;

use crate::models::{GenerationPreferences, RankedItem};

/// Surprise tolerance 0-5 mapped to a multiplicative factor on the
/// standout base score.
const SURPRISE_FACTORS: [f64; 6] = [0.7, 0.85, 1.0, 1.12, 1.20, 1.25];

const MAX_SCORE: f64 = 10.0;
/// Per matching preferred topic, capped at twice this
const TOPIC_BOOST: f64 = 0.25;

/// Read access to stored per-user preferences.
pub struct PreferenceRepository {
    pool: SqlitePool,
}

impl PreferenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_surprise(&self, owner_id: i64) -> Result<Option<u8>, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT surprise_tolerance FROM user_preferences WHERE user_id = ?",
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(v,)| v.clamp(0, 5) as u8))
    }

    pub async fn get_depth(&self, owner_id: i64) -> Result<Option<u8>, sqlx::Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT depth_level FROM user_preferences WHERE user_id = ?")
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v.clamp(1, 6) as u8))
    }

    pub async fn get_topics(&self, owner_id: i64) -> Result<Vec<String>, sqlx::Error> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT topics_json FROM user_preferences WHERE user_id = ?")
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row
            .and_then(|(json,)| json)
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default())
    }

    /// Seed or replace a user's stored preferences.
    pub async fn upsert(
        &self,
        owner_id: i64,
        surprise_tolerance: u8,
        depth_level: u8,
        topics: &[String],
    ) -> Result<(), sqlx::Error> {
        let topics_json = serde_json::to_string(topics).unwrap_or_else(|_| "[]".to_string());
        sqlx::query(
            r#"INSERT INTO user_preferences (user_id, surprise_tolerance, depth_level, topics_json, updated_at)
               VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
               ON CONFLICT(user_id) DO UPDATE SET
                   surprise_tolerance = excluded.surprise_tolerance,
                   depth_level = excluded.depth_level,
                   topics_json = excluded.topics_json,
                   updated_at = CURRENT_TIMESTAMP"#,
        )
        .bind(owner_id)
        .bind(surprise_tolerance.min(5) as i64)
        .bind(depth_level.clamp(1, 6) as i64)
        .bind(topics_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Applies the learned (or request-time) preferences to ranked items.
pub struct PreferenceAdapter {
    repo: PreferenceRepository,
}

impl PreferenceAdapter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { repo: PreferenceRepository::new(pool) }
    }

    pub fn surprise_factor(level: u8) -> f64 {
        SURPRISE_FACTORS[level.min(5) as usize]
    }

    /// Personalize standout scores in place.
    ///
    /// Personalization requires a known owner; an ownerless request keeps
    /// personalized == base on every item, snapshot or not. For a known
    /// owner the request-time snapshot wins over the stored model.
    pub async fn personalize(
        &self,
        items: &mut [RankedItem],
        owner_id: Option<i64>,
        snapshot: Option<&GenerationPreferences>,
    ) {
        let tolerance = match self.resolve_surprise(owner_id, snapshot).await {
            Some(level) => level,
            None => {
                for item in items.iter_mut() {
                    item.standout.personalized = item.standout.base;
                    item.personal_score = item.standout.base;
                }
                return;
            },
        };

        let topics = self.resolve_topics(owner_id, snapshot).await;
        let factor = Self::surprise_factor(tolerance);

        for item in items.iter_mut() {
            item.standout.personalized = (item.standout.base * factor).min(MAX_SCORE);

            let text = item.item.combined_text().to_lowercase();
            let matched = topics
                .iter()
                .filter(|t| text.contains(t.to_lowercase().as_str()))
                .count();
            let boost = (matched as f64 * TOPIC_BOOST).min(2.0 * TOPIC_BOOST);

            item.personal_score = (item.standout.personalized + boost).min(MAX_SCORE);
        }
    }

    /// Research depth 1-6 for this owner, request snapshot first.
    pub async fn depth_for(
        &self,
        owner_id: Option<i64>,
        snapshot: Option<&GenerationPreferences>,
    ) -> u8 {
        if let Some(depth) = snapshot.and_then(|s| s.depth_level) {
            return depth.clamp(1, 6);
        }
        if let Some(owner) = owner_id {
            match self.repo.get_depth(owner).await {
                Ok(Some(depth)) => return depth,
                Ok(None) => {},
                Err(e) => tracing::warn!("Depth preference lookup failed: {}", e),
            }
        }
        3
    }

    async fn resolve_surprise(
        &self,
        owner_id: Option<i64>,
        snapshot: Option<&GenerationPreferences>,
    ) -> Option<u8> {
        // No owner, no personalization: the snapshot override only applies
        // to a known owner
        let owner = owner_id?;

        if let Some(level) = snapshot.and_then(|s| s.surprise_tolerance) {
            return Some(level.min(5));
        }
        match self.repo.get_surprise(owner).await {
            Ok(found) => found,
            Err(e) => {
                // Store unavailable: fall through, never fail the request
                tracing::warn!("Surprise preference lookup failed for {}: {}", owner, e);
                None
            },
        }
    }

    async fn resolve_topics(
        &self,
        owner_id: Option<i64>,
        snapshot: Option<&GenerationPreferences>,
    ) -> Vec<String> {
        let Some(owner) = owner_id else {
            return Vec::new();
        };
        if let Some(snapshot) = snapshot
            && !snapshot.topics.is_empty()
        {
            return snapshot.topics.clone();
        }
        match self.repo.get_topics(owner).await {
            Ok(topics) => topics,
            Err(e) => {
                tracing::warn!("Topic preference lookup failed for {}: {}", owner, e);
                Vec::new()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factor_table_matches_contract() {
        assert_eq!(PreferenceAdapter::surprise_factor(0), 0.7);
        assert_eq!(PreferenceAdapter::surprise_factor(1), 0.85);
        assert_eq!(PreferenceAdapter::surprise_factor(2), 1.0);
        assert_eq!(PreferenceAdapter::surprise_factor(3), 1.12);
        assert_eq!(PreferenceAdapter::surprise_factor(4), 1.20);
        assert_eq!(PreferenceAdapter::surprise_factor(5), 1.25);
        // Out-of-range levels clamp to the top
        assert_eq!(PreferenceAdapter::surprise_factor(9), 1.25);
    }
}
