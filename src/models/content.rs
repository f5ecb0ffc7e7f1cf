//! Content records flowing through the gathering pipeline.
//!
//! A CandidateItem is produced by a source client and is read-only from
//! then on; ranking wraps it with scores instead of mutating it.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One normalized item returned by a content source, pre-ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Stable content hash over title + source + canonical anchor
    pub fingerprint: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source_name: String,
    /// Authority class of the source ("government", "community", "research", ...)
    pub source_authority: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    /// Raw provider payload, kept opaque for forward compatibility
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub raw: serde_json::Value,
}

impl CandidateItem {
    /// Fingerprint over title + source + whichever of location/date anchors
    /// the item. Case-insensitive on the title so near-duplicate titles from
    /// one source collapse.
    pub fn compute_fingerprint(title: &str, source: &str, anchor: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(title.trim().to_lowercase().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(source.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(anchor.unwrap_or("").as_bytes());
        let digest = hasher.finalize();
        // 16 bytes of hex is plenty for per-request dedup
        digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// All text of the item joined, for keyword scoring.
    pub fn combined_text(&self) -> String {
        let mut parts = vec![self.title.clone()];
        if let Some(d) = &self.description {
            parts.push(d.clone());
        }
        if let Some(l) = &self.location {
            parts.push(l.clone());
        }
        parts.extend(self.topics.iter().cloned());
        parts.join(" ")
    }
}

/// Five weighted quality dimensions plus overall and confidence, all in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub source_authority: f64,
    pub completeness: f64,
    pub cross_source_agreement: f64,
    pub freshness: f64,
    pub engagement_potential: f64,
    pub overall: f64,
    pub confidence: f64,
}

/// Coarse standout tier derived from the base score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandoutTier {
    Mundane,
    Good,
    VeryGood,
    Exceptional,
}

impl StandoutTier {
    pub fn from_base(base: f64) -> Self {
        if base >= 4.5 {
            Self::Exceptional
        } else if base >= 3.5 {
            Self::VeryGood
        } else if base >= 2.0 {
            Self::Good
        } else {
            Self::Mundane
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mundane => "mundane",
            Self::Good => "good",
            Self::VeryGood => "very_good",
            Self::Exceptional => "exceptional",
        }
    }
}

/// Nine method sub-scores in [0, 10] with their saturating aggregate.
/// `personalized == base` until the preference adapter is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandoutScore {
    pub methods: BTreeMap<String, f64>,
    pub base: f64,
    pub tier: StandoutTier,
    pub personalized: f64,
}

/// A candidate with its full scoring attached. Produced by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    #[serde(flatten)]
    pub item: CandidateItem,
    pub quality: QualityScore,
    pub standout: StandoutScore,
    pub personal_score: f64,
    pub explanation: String,
}

/// Per-source report attached to a gathering result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub name: String,
    pub items: usize,
    pub cached: bool,
    pub cost: f64,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The ranked candidate set handed to the script stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatherOutcome {
    pub query: String,
    pub request_kind: String,
    pub items: Vec<RankedItem>,
    pub sources: Vec<SourceSummary>,
    pub total_cost: f64,
    pub api_calls: usize,
    pub successful_calls: usize,
    pub cached_calls: usize,
}

/// Long-form structured artifact returned by the deep research path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchArtifact {
    pub overview: String,
    pub key_findings: Vec<String>,
    pub detailed_body: String,
    pub conclusion: String,
    pub sources: Vec<String>,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item() -> CandidateItem {
        CandidateItem {
            fingerprint: CandidateItem::compute_fingerprint(
                "Hallgrimskirkja",
                "wikipedia",
                Some("Reykjavik"),
            ),
            title: "Hallgrimskirkja".to_string(),
            description: Some("The largest church in Iceland".to_string()),
            source_name: "wikipedia".to_string(),
            source_authority: "community".to_string(),
            media: vec![],
            url: Some("https://en.wikipedia.org/wiki/Hallgrimskirkja".to_string()),
            date: Some("1986".to_string()),
            location: Some("Reykjavik".to_string()),
            topics: vec!["architecture".to_string()],
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn fingerprint_is_case_insensitive_on_title() {
        let a = CandidateItem::compute_fingerprint("Blue Lagoon", "wikipedia", None);
        let b = CandidateItem::compute_fingerprint("blue lagoon", "wikipedia", None);
        let c = CandidateItem::compute_fingerprint("Blue Lagoon", "geonames", None);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn ranked_item_serde_round_trip() {
        let ranked = RankedItem {
            item: sample_item(),
            quality: QualityScore {
                source_authority: 0.5,
                completeness: 0.85,
                cross_source_agreement: 0.7,
                freshness: 0.2,
                engagement_potential: 0.4,
                overall: 0.55,
                confidence: 0.78,
            },
            standout: StandoutScore {
                methods: BTreeMap::from([("geographic".to_string(), 4.0)]),
                base: 4.0,
                tier: StandoutTier::VeryGood,
                personalized: 4.0,
            },
            personal_score: 4.0,
            explanation: "geographic extremum".to_string(),
        };

        let json = serde_json::to_string(&ranked).unwrap();
        let back: RankedItem = serde_json::from_str(&json).unwrap();
        assert_eq!(ranked, back);
    }

    #[test]
    fn tier_thresholds() {
        assert_eq!(StandoutTier::from_base(4.5), StandoutTier::Exceptional);
        assert_eq!(StandoutTier::from_base(4.49), StandoutTier::VeryGood);
        assert_eq!(StandoutTier::from_base(3.5), StandoutTier::VeryGood);
        assert_eq!(StandoutTier::from_base(2.0), StandoutTier::Good);
        assert_eq!(StandoutTier::from_base(1.99), StandoutTier::Mundane);
    }
}
