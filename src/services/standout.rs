//! Standout detection: how novel is an item, independent of its quality.
//!
//! Nine keyword/pattern classifiers each yield a sub-score in [0, 10].
//! The aggregate takes the strongest method and adds a diversity bonus of
//! 0.5 per additional non-zero method, saturating at 10 — monotone in
//! every sub-score by construction.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use crate::models::{CandidateItem, StandoutScore, StandoutTier};

static ANY_YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{3,4})\s*(?:AD|BC|CE|BCE)?\b").expect("year regex"));

struct MethodLexicon {
    name: &'static str,
    points_per_hit: f64,
    phrases: &'static [&'static str],
}

const METHODS: [MethodLexicon; 9] = [
    MethodLexicon {
        name: "impossibility",
        points_per_hit: 3.0,
        phrases: &[
            "defies gravity",
            "defies physics",
            "defies explanation",
            "impossible",
            "inexplicable",
            "unexplained",
            "levitat",
            "perpetual motion",
            "paradox",
            "scientists cannot",
        ],
    },
    MethodLexicon {
        name: "uniqueness",
        points_per_hit: 3.0,
        phrases: &[
            "the only",
            "only one in",
            "nowhere else",
            "one of a kind",
            "unique in the world",
            "sole surviving",
            "last remaining",
            "found nowhere",
        ],
    },
    MethodLexicon {
        name: "temporal",
        points_per_hit: 2.5,
        phrases: &[
            "since time immemorial",
            "for thousands of years",
            "for centuries",
            "millennia",
            "oldest",
            "continuously inhabited",
            "unbroken tradition",
        ],
    },
    MethodLexicon {
        name: "cultural",
        points_per_hit: 2.0,
        phrases: &[
            "ritual",
            "tradition",
            "taboo",
            "ceremony",
            "sacred",
            "festival",
            "custom",
            "folklore",
            "pilgrimage",
        ],
    },
    MethodLexicon {
        name: "curiosity",
        points_per_hit: 2.0,
        phrases: &[
            "hidden",
            "secret",
            "bizarre",
            "curious",
            "strange",
            "unusual",
            "obscure",
            "forgotten",
            "mysterious",
            "abandoned",
        ],
    },
    MethodLexicon {
        name: "historical",
        points_per_hit: 2.0,
        phrases: &[
            "battle of",
            "revolution",
            "empire",
            "dynasty",
            "ancient",
            "medieval",
            "founded in",
            "historic",
            "turning point",
        ],
    },
    MethodLexicon {
        name: "geographic",
        points_per_hit: 3.0,
        phrases: &[
            "highest",
            "deepest",
            "largest",
            "smallest",
            "northernmost",
            "southernmost",
            "westernmost",
            "easternmost",
            "tallest",
            "longest",
            "most remote",
        ],
    },
    MethodLexicon {
        name: "linguistic",
        points_per_hit: 2.5,
        phrases: &[
            "endangered language",
            "last speaker",
            "etymology",
            "untranslatable",
            "derives its name",
            "named after",
            "no written form",
            "whistled language",
        ],
    },
    MethodLexicon {
        name: "cross_cultural",
        points_per_hit: 2.5,
        phrases: &[
            "across cultures",
            "many cultures",
            "both cultures",
            "cultural exchange",
            "crossroads of",
            "melting pot",
            "influences from",
            "east and west",
        ],
    },
];

pub struct StandoutScorer;

impl StandoutScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, item: &CandidateItem) -> StandoutScore {
        let text = item.combined_text().to_lowercase();

        let mut methods = BTreeMap::new();
        for method in &METHODS {
            let hits = method.phrases.iter().filter(|p| text.contains(*p)).count();
            let mut score = hits as f64 * method.points_per_hit;

            // A verifiably very old date strengthens the temporal signal
            if method.name == "temporal" {
                score += very_old_date_bonus(&text, item.date.as_deref());
            }

            methods.insert(method.name.to_string(), score.min(10.0));
        }

        let base = aggregate(&methods);
        StandoutScore { methods, base, tier: StandoutTier::from_base(base), personalized: base }
    }
}

impl Default for StandoutScorer {
    fn default() -> Self {
        Self::new()
    }
}

/// Strongest method plus 0.5 per additional non-zero method, clamped to 10.
fn aggregate(methods: &BTreeMap<String, f64>) -> f64 {
    let max = methods.values().cloned().fold(0.0, f64::max);
    if max == 0.0 {
        return 0.0;
    }
    let nonzero = methods.values().filter(|v| **v > 0.0).count();
    (max + 0.5 * (nonzero as f64 - 1.0)).min(10.0)
}

fn very_old_date_bonus(text: &str, date: Option<&str>) -> f64 {
    let candidates = date
        .into_iter()
        .chain(std::iter::once(text))
        .flat_map(|s| ANY_YEAR_RE.captures_iter(s))
        .filter_map(|c| c[1].parse::<i32>().ok());

    let mut bonus = 0.0_f64;
    for year in candidates {
        if year < 1000 {
            bonus = bonus.max(4.0);
        } else if year < 1500 {
            bonus = bonus.max(2.0);
        }
    }
    bonus
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_with_text(title: &str, description: &str) -> CandidateItem {
        CandidateItem {
            fingerprint: CandidateItem::compute_fingerprint(title, "test", None),
            title: title.to_string(),
            description: Some(description.to_string()),
            source_name: "test".to_string(),
            source_authority: "community".to_string(),
            media: Vec::new(),
            url: None,
            date: None,
            location: None,
            topics: Vec::new(),
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn plain_description_is_mundane() {
        let item = item_with_text("City Hall", "The administrative seat of the municipality.");
        let score = StandoutScorer::new().score(&item);
        assert_eq!(score.base, 0.0);
        assert_eq!(score.tier, StandoutTier::Mundane);
        assert_eq!(score.personalized, score.base);
    }

    #[test]
    fn singleton_markers_drive_uniqueness() {
        let item = item_with_text(
            "Eternal Flame Falls",
            "A waterfall hiding the only natural eternal flame of its kind, found nowhere else.",
        );
        let score = StandoutScorer::new().score(&item);
        assert!(score.methods["uniqueness"] > 0.0);
        assert!(score.base >= 3.5);
    }

    #[test]
    fn aggregate_is_monotone_in_sub_scores() {
        let weak = item_with_text("Old Bridge", "A historic crossing.");
        let strong = item_with_text(
            "Old Bridge",
            "A historic crossing, the oldest in the region and a sacred pilgrimage site.",
        );

        let scorer = StandoutScorer::new();
        let weak_score = scorer.score(&weak);
        let strong_score = scorer.score(&strong);
        assert!(strong_score.base > weak_score.base);
    }

    #[test]
    fn aggregate_saturates_at_ten() {
        let item = item_with_text(
            "The Impossible Shrine",
            "An impossible, inexplicable, unexplained site that defies gravity and defies physics; \
             the only one of a kind, found nowhere else, sacred ritual tradition festival ceremony, \
             hidden secret bizarre strange mysterious, highest deepest northernmost, \
             oldest unbroken tradition since time immemorial, derives its name from a last speaker, \
             a crossroads of east and west across cultures.",
        );
        let score = StandoutScorer::new().score(&item);
        assert_eq!(score.base, 10.0);
        assert_eq!(score.tier, StandoutTier::Exceptional);
    }

    #[test]
    fn very_old_dates_feed_temporal() {
        let mut item = item_with_text("Pantheon", "A temple rebuilt around 126 AD.");
        item.date = Some("126".to_string());
        let score = StandoutScorer::new().score(&item);
        assert!(score.methods["temporal"] >= 4.0);
    }

    #[test]
    fn diversity_bonus_rewards_breadth() {
        let narrow = item_with_text("Spot", "the only one in the country");
        let broad = item_with_text("Spot", "the only one in the country, a sacred hidden place");

        let scorer = StandoutScorer::new();
        let narrow_score = scorer.score(&narrow);
        let broad_score = scorer.score(&broad);

        // Same strongest method, more non-zero methods
        assert!(broad_score.base > narrow_score.base);
        assert!((broad_score.base - narrow_score.base - 1.0).abs() < 1e-9);
    }
}
