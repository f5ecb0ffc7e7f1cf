//! Multi-dimensional content quality scoring.
//!
//! Five sub-scores combined with fixed weights:
//! authority 0.25, completeness 0.20, cross-source agreement 0.25,
//! freshness 0.15, engagement 0.15.

use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::models::{CandidateItem, QualityScore};

const W_AUTHORITY: f64 = 0.25;
const W_COMPLETENESS: f64 = 0.20;
const W_AGREEMENT: f64 = 0.25;
const W_FRESHNESS: f64 = 0.15;
const W_ENGAGEMENT: f64 = 0.15;

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("year regex"));
static PROPER_NOUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][a-z]+ [A-Z][a-z]+\b").expect("proper noun regex"));

const INTERESTING_KEYWORDS: [&str; 10] = [
    "unique",
    "rare",
    "exceptional",
    "mysterious",
    "ancient",
    "hidden",
    "secret",
    "unusual",
    "remarkable",
    "extraordinary",
];

pub struct QualityAssessor;

impl QualityAssessor {
    pub fn new() -> Self {
        Self
    }

    /// Score one item against its cross-reference peers (the other items
    /// in the same result set).
    pub fn assess(&self, item: &CandidateItem, peers: &[&CandidateItem]) -> QualityScore {
        let source_authority = authority_value(&item.source_authority);
        let completeness = self.completeness(item);
        let cross_source_agreement = self.agreement(item, peers);
        let freshness = self.freshness(item);
        let engagement_potential = self.engagement(item);

        let overall = source_authority * W_AUTHORITY
            + completeness * W_COMPLETENESS
            + cross_source_agreement * W_AGREEMENT
            + freshness * W_FRESHNESS
            + engagement_potential * W_ENGAGEMENT;

        let num_sources = 1 + peers
            .iter()
            .filter(|p| {
                p.source_name != item.source_name
                    && jaccard_similarity(&item.title, &p.title) > 0.7
            })
            .map(|p| p.source_name.as_str())
            .collect::<HashSet<_>>()
            .len();

        let confidence = ((source_authority + completeness + cross_source_agreement) / 3.0
            + (0.1 * num_sources as f64).min(0.3))
        .min(1.0);

        QualityScore {
            source_authority,
            completeness,
            cross_source_agreement,
            freshness,
            engagement_potential,
            overall,
            confidence,
        }
    }

    /// Field-weight sum: title 0.3, description 0.3, location 0.15,
    /// date 0.10, source 0.05, url 0.05, type 0.05.
    fn completeness(&self, item: &CandidateItem) -> f64 {
        let mut score: f64 = 0.0;
        if !item.title.trim().is_empty() {
            score += 0.3;
        }
        if item.description.as_deref().is_some_and(|d| !d.trim().is_empty()) {
            score += 0.3;
        }
        if item.location.as_deref().is_some_and(|l| !l.trim().is_empty()) {
            score += 0.15;
        }
        if item.date.as_deref().is_some_and(|d| !d.trim().is_empty()) {
            score += 0.10;
        }
        if !item.source_name.is_empty() {
            score += 0.05;
        }
        if item.url.is_some() {
            score += 0.05;
        }
        if !item.topics.is_empty() {
            score += 0.05;
        }
        score.min(1.0)
    }

    /// Agreement with peers: fraction of peers matching on title (Jaccard
    /// over 0.7), exact date, and location substring, averaged over the
    /// checks that apply. No peers means nothing to contradict: 0.7.
    fn agreement(&self, item: &CandidateItem, peers: &[&CandidateItem]) -> f64 {
        if peers.is_empty() {
            return 0.7;
        }

        let mut checks = Vec::new();

        let title_matches = peers
            .iter()
            .filter(|p| jaccard_similarity(&item.title, &p.title) > 0.7)
            .count();
        checks.push(title_matches as f64 / peers.len() as f64);

        if let Some(date) = &item.date {
            let date_matches =
                peers.iter().filter(|p| p.date.as_deref() == Some(date.as_str())).count();
            checks.push(date_matches as f64 / peers.len() as f64);
        }

        if let Some(location) = &item.location {
            let needle = location.to_lowercase();
            let location_matches = peers
                .iter()
                .filter(|p| {
                    p.location
                        .as_deref()
                        .is_some_and(|l| l.to_lowercase().contains(&needle) || needle.contains(&l.to_lowercase()))
                })
                .count();
            checks.push(location_matches as f64 / peers.len() as f64);
        }

        let avg = checks.iter().sum::<f64>() / checks.len() as f64;
        (0.7 + avg * 0.3).min(1.0)
    }

    /// exp(-age/20) over a 4-digit year parsed from the date; 0.5 without one.
    fn freshness(&self, item: &CandidateItem) -> f64 {
        let Some(date) = &item.date else {
            return 0.5;
        };
        let Some(year_match) = YEAR_RE.find(date) else {
            return 0.5;
        };
        let Ok(year) = year_match.as_str().parse::<i32>() else {
            return 0.5;
        };

        let age = (chrono::Utc::now().year() - year).max(0) as f64;
        (-age / 20.0).exp().min(1.0)
    }

    /// Additive engagement signals, clipped to 1.
    fn engagement(&self, item: &CandidateItem) -> f64 {
        let mut score = 0.0;

        if !item.media.is_empty() {
            score += 0.3;
        }

        let description = item.description.as_deref().unwrap_or("");
        if description.len() > 200 {
            score += 0.2;
        } else if description.len() > 50 {
            score += 0.1;
        }

        let text = format!("{} {}", item.title, description).to_lowercase();
        let keyword_hits = INTERESTING_KEYWORDS.iter().filter(|k| text.contains(*k)).count();
        score += (keyword_hits as f64 * 0.1).min(0.3);

        if YEAR_RE.is_match(&text) {
            score += 0.1;
        }
        if PROPER_NOUN_RE.is_match(&item.title) {
            score += 0.1;
        }

        score.min(1.0)
    }
}

impl Default for QualityAssessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Authority table. The maximum applies when merged items carry several
/// classes; single-source items just look up their own class.
pub fn authority_value(class: &str) -> f64 {
    match class {
        "government" => 1.0,
        "academic" | "research" => 0.9,
        "museum" => 0.85,
        "major_news" => 0.8,
        "commercial" => 0.7,
        "community" => 0.5,
        _ => 0.3,
    }
}

/// Word-set Jaccard similarity, case-insensitive.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = a.to_lowercase().split_whitespace().map(String::from).collect();
    let set_b: HashSet<String> = b.to_lowercase().split_whitespace().map(String::from).collect();

    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}
