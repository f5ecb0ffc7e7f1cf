use std::sync::Arc;

use crate::models::{GenerationPreferences, RequestKind, UserTier};
use crate::services::cancel::CancelToken;
use crate::services::cost_ledger::CostLedger;
use crate::services::orchestrator::{GatherRequest, NoopProgress, StrategyKind};
use crate::services::preference::PreferenceRepository;
use crate::services::sources::{SourceClient, SourceError};

use super::common::{MockBehavior, MockSource, build_orchestrator, create_test_db, create_test_user, mock_item};

fn base_request(query: &str) -> GatherRequest {
    GatherRequest {
        query: query.to_string(),
        kind: RequestKind::Base,
        owner: None,
        tier: UserTier::Free,
        preferences: None,
    }
}

fn paris_fleet() -> Vec<Arc<dyn SourceClient>> {
    let wiki = MockSource::new(
        "wikipedia",
        "free",
        0.0,
        MockBehavior::Items(vec![
            mock_item("Eiffel Tower", "wikipedia", "The tallest structure in Paris, built 1889"),
            mock_item("Louvre", "wikipedia", "The largest art museum in the world"),
            mock_item("Catacombs of Paris", "wikipedia", "Hidden ossuaries holding six million"),
        ]),
    );
    let wikidata = MockSource::new(
        "wikidata",
        "free",
        0.0,
        MockBehavior::Items(vec![
            mock_item("Sainte-Chapelle", "wikidata", "A royal chapel with medieval stained glass"),
            // Duplicate title across sources, must collapse
            mock_item("Eiffel Tower", "wikidata", "Iron lattice tower on the Champ de Mars"),
        ]),
    );
    let datagov = MockSource::new(
        "datagov",
        "free",
        0.0,
        MockBehavior::Items(vec![{
            let mut item =
                mock_item("Paris Heritage Register", "datagov", "Official heritage dataset");
            item.source_authority = "government".to_string();
            item
        }]),
    );
    vec![Arc::new(wiki), Arc::new(wikidata), Arc::new(datagov)]
}

#[tokio::test]
async fn base_gather_aggregates_dedups_and_scores() {
    let pool = create_test_db().await;
    let ledger = Arc::new(CostLedger::new());
    let orchestrator = build_orchestrator(&pool, paris_fleet(), Arc::clone(&ledger));

    let outcome = orchestrator
        .gather(&base_request("Paris, France"), &CancelToken::never(), &NoopProgress)
        .await
        .unwrap();

    // Three sources contributed, six raw items, one duplicate title dropped
    assert_eq!(outcome.successful_calls, 3);
    assert!(outcome.items.len() >= 5);
    assert_eq!(
        outcome.items.iter().filter(|i| i.item.title == "Eiffel Tower").count(),
        1
    );

    // Fingerprints are unique within one result set
    let mut fingerprints: Vec<_> =
        outcome.items.iter().map(|i| i.item.fingerprint.clone()).collect();
    fingerprints.sort();
    fingerprints.dedup();
    assert_eq!(fingerprints.len(), outcome.items.len());

    // Every item carries a full quality score
    for ranked in &outcome.items {
        assert!(ranked.quality.overall > 0.0 && ranked.quality.overall <= 1.0);
        assert!(ranked.quality.confidence > 0.0);
        // No owner on the request: personalization is the identity
        assert_eq!(ranked.standout.personalized, ranked.standout.base);
    }

    // Ranking is by personal score, descending
    for pair in outcome.items.windows(2) {
        assert!(pair[0].personal_score >= pair[1].personal_score);
    }

    // The government dataset carries the highest authority present
    let best_authority = outcome
        .items
        .iter()
        .map(|i| i.quality.source_authority)
        .fold(0.0, f64::max);
    assert!(best_authority >= 0.8);

    assert_eq!(outcome.sources.len(), 3);
    assert_eq!(outcome.total_cost, 0.0);
}

#[tokio::test]
async fn failing_source_is_absorbed_not_fatal() {
    let pool = create_test_db().await;
    let ledger = Arc::new(CostLedger::new());

    let healthy = Arc::new(MockSource::new(
        "wikipedia",
        "free",
        0.0,
        MockBehavior::Items(vec![
            mock_item("Alfama", "wikipedia", "The oldest district of Lisbon"),
        ]),
    ));
    let broken: Arc<dyn SourceClient> = Arc::new(MockSource::new(
        "datagov",
        "free",
        0.0,
        MockBehavior::Fail(SourceError::Upstream(500)),
    ));

    let orchestrator = build_orchestrator(
        &pool,
        vec![Arc::clone(&healthy) as Arc<dyn SourceClient>, broken],
        ledger,
    );

    let outcome = orchestrator
        .gather(&base_request("Lisbon"), &CancelToken::never(), &NoopProgress)
        .await
        .unwrap();

    assert_eq!(outcome.successful_calls, 1);
    assert_eq!(outcome.items.len(), 1);
    let failed_summary = outcome.sources.iter().find(|s| s.name == "datagov").unwrap();
    assert!(failed_summary.error.as_deref().unwrap().contains("500"));
}

#[tokio::test]
async fn zero_sources_is_the_only_fatal_outcome() {
    let pool = create_test_db().await;
    let ledger = Arc::new(CostLedger::new());

    let broken: Arc<dyn SourceClient> = Arc::new(MockSource::new(
        "wikipedia",
        "free",
        0.0,
        MockBehavior::Fail(SourceError::Transport("connection refused".to_string())),
    ));
    let orchestrator = build_orchestrator(&pool, vec![broken], ledger);

    let err = orchestrator
        .gather(&base_request("Nowhere"), &CancelToken::never(), &NoopProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::NoSourcesAvailable));
}

#[tokio::test]
async fn budget_denial_skips_paid_sources_but_keeps_results() {
    let pool = create_test_db().await;
    let owner = create_test_user(&pool, "thrifty", "free").await;
    let ledger = Arc::new(CostLedger::new());

    let free = Arc::new(MockSource::new(
        "wikipedia",
        "free",
        0.0,
        MockBehavior::Items(vec![mock_item("Old Town", "wikipedia", "Historic center")]),
    ));
    // Costs more than the whole free-tier per-request budget
    let paid = Arc::new(MockSource::new("premiumsource", "premium", 1.0, MockBehavior::Items(
        vec![mock_item("Premium Fact", "premiumsource", "Expensive insight")],
    )));

    let orchestrator = build_orchestrator(
        &pool,
        vec![
            Arc::clone(&free) as Arc<dyn SourceClient>,
            Arc::clone(&paid) as Arc<dyn SourceClient>,
        ],
        Arc::clone(&ledger),
    );

    let request = GatherRequest {
        query: "Riga".to_string(),
        kind: RequestKind::Standout,
        owner: Some(owner),
        tier: UserTier::Free,
        preferences: None,
    };

    let outcome = orchestrator
        .gather(&request, &CancelToken::never(), &NoopProgress)
        .await
        .unwrap();

    // The paid client was never invoked and nothing was charged
    assert_eq!(paid.call_count(), 0);
    assert!(free.call_count() >= 1);
    assert_eq!(ledger.owner_cost(owner), 0.0);
    assert!(!outcome.items.is_empty());
    assert!(
        outcome
            .sources
            .iter()
            .any(|s| s.name == "premiumsource"
                && s.error.as_deref().is_some_and(|e| e.contains("budget")))
    );
}

#[tokio::test]
async fn free_only_fleet_never_touches_the_ledger() {
    let pool = create_test_db().await;
    let owner = create_test_user(&pool, "tokyo_fan", "free").await;
    let ledger = Arc::new(CostLedger::new());
    let orchestrator = build_orchestrator(&pool, paris_fleet(), Arc::clone(&ledger));

    let request = GatherRequest {
        query: "Tokyo, Japan".to_string(),
        kind: RequestKind::Base,
        owner: Some(owner),
        tier: UserTier::Free,
        preferences: None,
    };

    let outcome = orchestrator
        .gather(&request, &CancelToken::never(), &NoopProgress)
        .await
        .unwrap();

    assert!(!outcome.items.is_empty());
    assert_eq!(ledger.owner_cost(owner), 0.0);
    assert_eq!(outcome.total_cost, 0.0);
}

fn standout_fleet() -> Vec<Arc<dyn SourceClient>> {
    vec![Arc::new(MockSource::new(
        "wikipedia",
        "free",
        0.0,
        MockBehavior::Items(vec![
            mock_item(
                "Hallgrimskirkja",
                "wikipedia",
                "The only church of its kind, a sacred site found nowhere else",
            ),
            mock_item("Harpa", "wikipedia", "A concert hall with an unusual hidden geometry"),
            mock_item("City Bus Terminal", "wikipedia", "The main bus terminal"),
        ]),
    ))]
}

#[tokio::test]
async fn low_surprise_tolerance_dampens_standout() {
    let pool = create_test_db().await;
    let owner = create_test_user(&pool, "predictable", "free").await;
    PreferenceRepository::new(pool.clone())
        .upsert(owner, 0, 3, &[])
        .await
        .unwrap();

    let ledger = Arc::new(CostLedger::new());
    let orchestrator = build_orchestrator(&pool, standout_fleet(), ledger);

    let request = GatherRequest {
        query: "Reykjavik".to_string(),
        kind: RequestKind::Standout,
        owner: Some(owner),
        tier: UserTier::Free,
        preferences: None,
    };

    let outcome = orchestrator
        .gather(&request, &CancelToken::never(), &NoopProgress)
        .await
        .unwrap();

    for ranked in &outcome.items {
        if ranked.standout.base > 0.0 && ranked.standout.base < 10.0 {
            assert!(
                ranked.standout.personalized < ranked.standout.base,
                "tolerance 0 must dampen {}",
                ranked.item.title
            );
        }
    }
}

#[tokio::test]
async fn high_surprise_tolerance_boosts_and_saturates() {
    let pool = create_test_db().await;
    let owner = create_test_user(&pool, "adventurous", "free").await;
    PreferenceRepository::new(pool.clone())
        .upsert(owner, 5, 3, &[])
        .await
        .unwrap();

    let ledger = Arc::new(CostLedger::new());
    let orchestrator = build_orchestrator(&pool, standout_fleet(), ledger);

    let request = GatherRequest {
        query: "Reykjavik".to_string(),
        kind: RequestKind::Standout,
        owner: Some(owner),
        tier: UserTier::Free,
        preferences: None,
    };

    let outcome = orchestrator
        .gather(&request, &CancelToken::never(), &NoopProgress)
        .await
        .unwrap();

    for ranked in &outcome.items {
        if ranked.standout.base > 0.0 && ranked.standout.base < 10.0 {
            assert!(ranked.standout.personalized > ranked.standout.base);
        }
        assert!(ranked.standout.personalized <= 10.0);
    }
}

#[tokio::test]
async fn request_snapshot_overrides_stored_model() {
    let pool = create_test_db().await;
    let owner = create_test_user(&pool, "override_user", "free").await;
    // Stored model says dampen; the request snapshot says boost
    PreferenceRepository::new(pool.clone())
        .upsert(owner, 0, 3, &[])
        .await
        .unwrap();

    let ledger = Arc::new(CostLedger::new());
    let orchestrator = build_orchestrator(&pool, standout_fleet(), ledger);

    let request = GatherRequest {
        query: "Reykjavik".to_string(),
        kind: RequestKind::Standout,
        owner: Some(owner),
        tier: UserTier::Free,
        preferences: Some(GenerationPreferences {
            surprise_tolerance: Some(5),
            depth_level: None,
            topics: vec![],
        }),
    };

    let outcome = orchestrator
        .gather(&request, &CancelToken::never(), &NoopProgress)
        .await
        .unwrap();

    let boosted = outcome
        .items
        .iter()
        .any(|r| r.standout.base > 0.0 && r.standout.personalized > r.standout.base);
    assert!(boosted);

    // And nothing was written back to the stored model
    let stored = PreferenceRepository::new(pool.clone())
        .get_surprise(owner)
        .await
        .unwrap();
    assert_eq!(stored, Some(0));
}

#[tokio::test]
async fn snapshot_without_owner_never_personalizes() {
    let pool = create_test_db().await;
    let ledger = Arc::new(CostLedger::new());
    let orchestrator = build_orchestrator(&pool, standout_fleet(), ledger);

    // A preference snapshot on an ownerless request must not personalize
    let request = GatherRequest {
        query: "Reykjavik".to_string(),
        kind: RequestKind::Standout,
        owner: None,
        tier: UserTier::Free,
        preferences: Some(GenerationPreferences {
            surprise_tolerance: Some(5),
            depth_level: None,
            topics: vec!["church".to_string()],
        }),
    };

    let outcome = orchestrator
        .gather(&request, &CancelToken::never(), &NoopProgress)
        .await
        .unwrap();

    assert!(!outcome.items.is_empty());
    for ranked in &outcome.items {
        assert_eq!(ranked.standout.personalized, ranked.standout.base);
        assert_eq!(ranked.personal_score, ranked.standout.base);
    }
}

#[tokio::test]
async fn cancelled_gather_returns_cancelled() {
    let pool = create_test_db().await;
    let ledger = Arc::new(CostLedger::new());

    let slow: Arc<dyn SourceClient> = Arc::new(MockSource::new(
        "wikipedia",
        "free",
        0.0,
        MockBehavior::Slow(
            std::time::Duration::from_secs(3),
            vec![mock_item("Never Seen", "wikipedia", "too slow")],
        ),
    ));
    let orchestrator = build_orchestrator(&pool, vec![slow], ledger);

    let (handle, token) = CancelToken::new_pair();
    let request = base_request("Anywhere");
    let gather = orchestrator.gather(&request, &token, &NoopProgress);
    tokio::pin!(gather);

    tokio::select! {
        _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => handle.cancel(),
        _ = &mut gather => panic!("gather finished before cancellation"),
    }

    let err = gather.await.unwrap_err();
    assert!(matches!(err, SourceError::Cancelled));
}

#[test]
fn strategy_table_matches_contract() {
    // Strategy shapes are pure functions of kind and budget
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async {
        let pool = create_test_db().await;
        let ledger = Arc::new(CostLedger::new());
        let orchestrator = build_orchestrator(&pool, paris_fleet(), ledger);
        let budget = orchestrator.budget_for(UserTier::Free).clone();

        let base = orchestrator.select_strategy(StrategyKind::Base, &budget);
        assert_eq!((base.min_sources, base.max_sources), (2, 5));
        assert_eq!(base.timeout.as_secs(), 5);

        let standout = orchestrator.select_strategy(StrategyKind::Standout, &budget);
        assert_eq!((standout.min_sources, standout.max_sources), (3, 7));
        assert_eq!(standout.timeout.as_secs(), 8);

        let topic = orchestrator.select_strategy(StrategyKind::TopicSpecific, &budget);
        assert_eq!((topic.min_sources, topic.max_sources), (2, 4));
        assert_eq!(topic.timeout.as_secs(), 6);

        let enrichment = orchestrator.select_strategy(StrategyKind::Enrichment, &budget);
        assert_eq!((enrichment.min_sources, enrichment.max_sources), (1, 3));
        assert_eq!(enrichment.timeout.as_secs(), 4);
        assert!(enrichment.fallback.is_empty());
    });
}
