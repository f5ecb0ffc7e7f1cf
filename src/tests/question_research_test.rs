//! Interrogative queries route to the single-shot research path instead
//! of the multi-source fan-out.

use std::sync::Arc;

use crate::config::{BudgetsConfig, ResearchConfig};
use crate::models::{RequestKind, UserTier};
use crate::services::cancel::CancelToken;
use crate::services::cost_ledger::CostLedger;
use crate::services::orchestrator::{GatherRequest, NoopProgress, Orchestrator};
use crate::services::preference::PreferenceAdapter;
use crate::services::research::DeepResearchService;
use crate::services::sources::{SourceClient, SourceRegistry};

use super::common::{MockBehavior, MockSource, create_test_db, mock_item};

const RESEARCH_ANSWER: &str = "## Overview\n\
    The Roman Empire unravelled over roughly three centuries of fiscal, military and \
    political strain rather than collapsing in a single event.\n\n\
    ## Key Findings\n\
    - Debased currency and heavy taxation eroded loyalty\n\
    - Recurring plagues shrank the recruitable population\n\
    - Frontier pressure intensified after 376 AD\n\n\
    ## Conclusion\n\
    The fall was systemic, with no single decisive cause.\n\n\
    Sources: https://example.org/decline, https://example.org/late-antiquity.";

async fn research_orchestrator(
    server_url: &str,
    key_env: &str,
    fleet: Vec<Arc<dyn SourceClient>>,
) -> (Arc<Orchestrator>, Arc<CostLedger>) {
    // SAFETY in tests: unique variable name per test, set before first read
    unsafe { std::env::set_var(key_env, "test-key") };

    let pool = create_test_db().await;
    let ledger = Arc::new(CostLedger::new());

    let mut registry = SourceRegistry::new();
    for client in fleet {
        registry.register(client);
    }

    let research_config = ResearchConfig {
        api_base: server_url.to_string(),
        model: "sonar-pro".to_string(),
        key_env: key_env.to_string(),
        timeout_secs: 10,
    };
    let research = Arc::new(DeepResearchService::new(&research_config, Arc::clone(&ledger)));
    let adapter = Arc::new(PreferenceAdapter::new(pool.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(registry),
        Arc::clone(&ledger),
        adapter,
        research,
        BudgetsConfig::default(),
    ));
    (orchestrator, ledger)
}

#[tokio::test]
async fn question_goes_to_research_exactly_once() {
    let mut server = mockito::Server::new_async().await;
    let body = serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": RESEARCH_ANSWER}}]
    });
    let mock = server
        .mock("POST", "/chat/completions")
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .expect(1)
        .create_async()
        .await;

    let fan_out_source = Arc::new(MockSource::new(
        "wikipedia",
        "free",
        0.0,
        MockBehavior::Items(vec![mock_item("Rome", "wikipedia", "Capital of Italy")]),
    ));

    let (orchestrator, _ledger) = research_orchestrator(
        &server.url(),
        "ATLAS_TEST_RESEARCH_KEY_Q1",
        vec![Arc::clone(&fan_out_source) as Arc<dyn SourceClient>],
    )
    .await;

    let request = GatherRequest {
        query: "Why did the Roman Empire fall?".to_string(),
        kind: RequestKind::Base,
        owner: None,
        tier: UserTier::Premium,
        preferences: None,
    };

    let outcome = orchestrator
        .gather(&request, &CancelToken::never(), &NoopProgress)
        .await
        .unwrap();

    // Exactly one research call, no source fan-out at all
    mock.assert_async().await;
    assert_eq!(fan_out_source.call_count(), 0);

    assert_eq!(outcome.items.len(), 1);
    let ranked = &outcome.items[0];
    assert_eq!(ranked.item.source_name, "deep_research");
    assert_eq!(ranked.item.source_authority, "research");
    // Research authority maps high in the quality table
    assert!(ranked.quality.source_authority >= 0.8);

    let artifact: crate::models::ResearchArtifact =
        serde_json::from_value(ranked.item.raw.clone()).unwrap();
    assert!(artifact.confidence >= 0.5);
    assert_eq!(artifact.key_findings.len(), 3);
    assert_eq!(outcome.sources.len(), 1);
    assert_eq!(outcome.sources[0].name, "deep_research");
}

#[tokio::test]
async fn place_query_ignores_research_entirely() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .expect(0)
        .create_async()
        .await;

    let fan_out_source = Arc::new(MockSource::new(
        "wikipedia",
        "free",
        0.0,
        MockBehavior::Items(vec![mock_item("Shibuya", "wikipedia", "A special ward of Tokyo")]),
    ));

    let (orchestrator, _ledger) = research_orchestrator(
        &server.url(),
        "ATLAS_TEST_RESEARCH_KEY_Q2",
        vec![Arc::clone(&fan_out_source) as Arc<dyn SourceClient>],
    )
    .await;

    let outcome = orchestrator
        .gather(
            &GatherRequest {
                query: "Tokyo, Japan".to_string(),
                kind: RequestKind::Base,
                owner: None,
                tier: UserTier::Free,
                preferences: None,
            },
            &CancelToken::never(),
            &NoopProgress,
        )
        .await
        .unwrap();

    mock.assert_async().await;
    assert!(fan_out_source.call_count() >= 1);
    assert_eq!(outcome.items.len(), 1);
    assert_ne!(outcome.items[0].item.source_name, "deep_research");
}
