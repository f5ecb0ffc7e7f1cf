//! Content gathering orchestration.
//!
//! Chooses a source strategy from the request kind and tier budget, fans
//! out to the selected clients behind their breakers and rate limiters,
//! aggregates and deduplicates the returns, scores and personalizes them,
//! and hands back one ranked candidate set.
//!
//! Individual client failures are never fatal here; they become missing
//! contributions. Only NoSourcesAvailable, Cancelled and Internal escape
//! to the job controller.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::config::{BudgetsConfig, TierBudget};
use crate::models::{
    CandidateItem, GatherOutcome, GenerationPreferences, RankedItem, RequestKind, SourceSummary,
    UserTier,
};
use crate::services::cancel::CancelToken;
use crate::services::cost_ledger::{BudgetDecision, CostLedger};
use crate::services::preference::PreferenceAdapter;
use crate::services::quality::QualityAssessor;
use crate::services::question::QuestionDetector;
use crate::services::research::DeepResearchService;
use crate::services::sources::{
    SearchOptions, SourceClient, SourceError, SourceRegistry, SourceResponse, SourceTier,
};
use crate::services::standout::StandoutScorer;

/// Progress checkpoints reported while a gather runs
pub const PROGRESS_STRATEGY_CHOSEN: u8 = 10;
pub const PROGRESS_FANOUT_COMPLETE: u8 = 40;
pub const PROGRESS_SCORING_COMPLETE: u8 = 70;
pub const PROGRESS_PERSONALIZATION_COMPLETE: u8 = 90;

/// Receives progress percentages at the defined checkpoints.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, pct: u8);
}

/// Sink for callers that do not track progress.
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn report(&self, _pct: u8) {}
}

/// Internal strategy shape selected per request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Base,
    Standout,
    TopicSpecific,
    Enrichment,
}

impl StrategyKind {
    fn from_request(kind: RequestKind) -> Self {
        match kind {
            RequestKind::Base => Self::Base,
            RequestKind::Standout => Self::Standout,
            RequestKind::Topic | RequestKind::Personalized => Self::TopicSpecific,
        }
    }
}

pub struct Strategy {
    pub primary: Vec<Arc<dyn SourceClient>>,
    pub fallback: Vec<Arc<dyn SourceClient>>,
    pub min_sources: usize,
    pub max_sources: usize,
    pub timeout: Duration,
}

pub struct GatherRequest {
    pub query: String,
    pub kind: RequestKind,
    pub owner: Option<i64>,
    pub tier: UserTier,
    pub preferences: Option<GenerationPreferences>,
}

pub struct Orchestrator {
    registry: Arc<SourceRegistry>,
    ledger: Arc<CostLedger>,
    quality: QualityAssessor,
    standout: StandoutScorer,
    adapter: Arc<PreferenceAdapter>,
    question: QuestionDetector,
    research: Arc<DeepResearchService>,
    budgets: BudgetsConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        ledger: Arc<CostLedger>,
        adapter: Arc<PreferenceAdapter>,
        research: Arc<DeepResearchService>,
        budgets: BudgetsConfig,
    ) -> Self {
        Self {
            registry,
            ledger,
            quality: QualityAssessor::new(),
            standout: StandoutScorer::new(),
            adapter,
            question: QuestionDetector::new(),
            research,
            budgets,
        }
    }

    /// Entry point: one fan-out (or one research call) for one job.
    pub async fn gather(
        &self,
        request: &GatherRequest,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
    ) -> Result<GatherOutcome, SourceError> {
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }

        let detection = self.question.detect(&request.query);
        if detection.is_question && self.research.is_enabled() {
            return self.gather_research(request, detection.subject, cancel, progress).await;
        }
        if detection.is_question {
            tracing::warn!("Question detected but research path disabled; using source fan-out");
        }

        let budget = self.budget_for(request.tier);
        let strategy = self.select_strategy(StrategyKind::from_request(request.kind), budget);

        if let Some(owner) = request.owner {
            // Budget window for this fan-out: what was spent before, plus
            // the per-request allowance for the tier
            self.ledger
                .set_owner_budget(owner, self.ledger.owner_cost(owner) + budget.max_cost_per_request);
        }

        tracing::info!(
            "Gathering content: kind={} primary={} fallback={} tier={}",
            request.kind.as_str(),
            strategy.primary.len(),
            strategy.fallback.len(),
            request.tier.as_str()
        );
        progress.report(PROGRESS_STRATEGY_CHOSEN).await;

        let (responses, mut summaries) = self.execute_strategy(request, &strategy, cancel).await?;
        progress.report(PROGRESS_FANOUT_COMPLETE).await;

        let successful_calls = responses.len();
        let cached_calls = responses.iter().filter(|r| r.cached).count();
        let total_cost: f64 = responses.iter().map(|r| r.cost).sum();
        let api_calls = summaries.len();

        // Fatal only when not a single source answered; a successful
        // source with nothing to say still completes the job
        if successful_calls == 0 {
            return Err(SourceError::NoSourcesAvailable);
        }
        let candidates = dedup_candidates(&responses);

        let mut ranked = self.score_all(candidates);
        progress.report(PROGRESS_SCORING_COMPLETE).await;

        self.adapter
            .personalize(&mut ranked, request.owner, request.preferences.as_ref())
            .await;
        progress.report(PROGRESS_PERSONALIZATION_COMPLETE).await;

        sort_ranked(&mut ranked);
        summaries.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(GatherOutcome {
            query: request.query.clone(),
            request_kind: request.kind.as_str().to_string(),
            items: ranked,
            sources: summaries,
            total_cost,
            api_calls,
            successful_calls,
            cached_calls,
        })
    }

    /// Single-shot research path for interrogative queries.
    async fn gather_research(
        &self,
        request: &GatherRequest,
        subject: Option<String>,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
    ) -> Result<GatherOutcome, SourceError> {
        progress.report(PROGRESS_STRATEGY_CHOSEN).await;

        let depth = self
            .adapter
            .depth_for(request.owner, request.preferences.as_ref())
            .await;
        let focus: Vec<String> = subject.into_iter().collect();

        let started = std::time::Instant::now();
        let artifact = tokio::select! {
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            result = self.research.research_question(
                &request.query,
                depth,
                &focus,
                request.owner,
            ) => result?,
        };
        let latency_ms = started.elapsed().as_millis() as u64;
        progress.report(PROGRESS_FANOUT_COMPLETE).await;

        let candidate = self.research.to_candidate(&request.query, &artifact);
        let mut ranked = self.score_all(vec![candidate]);
        progress.report(PROGRESS_SCORING_COMPLETE).await;

        self.adapter
            .personalize(&mut ranked, request.owner, request.preferences.as_ref())
            .await;
        progress.report(PROGRESS_PERSONALIZATION_COMPLETE).await;

        Ok(GatherOutcome {
            query: request.query.clone(),
            request_kind: request.kind.as_str().to_string(),
            items: ranked,
            sources: vec![SourceSummary {
                name: "deep_research".to_string(),
                items: 1,
                cached: false,
                cost: self.research.cost_per_call(),
                latency_ms,
                error: None,
            }],
            total_cost: self.research.cost_per_call(),
            api_calls: 1,
            successful_calls: 1,
            cached_calls: 0,
        })
    }

    pub fn budget_for(&self, tier: UserTier) -> &TierBudget {
        match tier {
            UserTier::Free => &self.budgets.free,
            UserTier::Premium => &self.budgets.premium,
            UserTier::Enterprise => &self.budgets.enterprise,
        }
    }

    /// Pick primary and fallback clients for a strategy kind.
    pub fn select_strategy(&self, kind: StrategyKind, budget: &TierBudget) -> Strategy {
        let free = self.registry.by_tier(SourceTier::Free);
        let freemium = self.registry.by_tier(SourceTier::Freemium);
        let premium = self.registry.by_tier(SourceTier::Premium);

        let take = |clients: &[Arc<dyn SourceClient>], n: usize| -> Vec<Arc<dyn SourceClient>> {
            clients.iter().take(n).cloned().collect()
        };

        match kind {
            StrategyKind::Base => Strategy {
                primary: take(&free, 3),
                fallback: take(&freemium, 2),
                min_sources: 2,
                max_sources: 5,
                timeout: Duration::from_secs(5),
            },
            StrategyKind::Standout => {
                let num_free = ((5.0 * budget.preferred_free_ratio) as usize).min(5);
                let mut primary = take(&free, num_free);
                primary.extend(take(&premium, 5 - num_free));
                Strategy {
                    primary,
                    fallback: take(&freemium, 2),
                    min_sources: 3,
                    max_sources: 7,
                    timeout: Duration::from_secs(8),
                }
            },
            StrategyKind::TopicSpecific => {
                let mut primary = take(&free, 2);
                primary.extend(take(&freemium, 2));
                Strategy {
                    primary,
                    fallback: take(&premium, 1),
                    min_sources: 2,
                    max_sources: 4,
                    timeout: Duration::from_secs(6),
                }
            },
            StrategyKind::Enrichment => Strategy {
                primary: take(&free, 2),
                fallback: Vec::new(),
                min_sources: 1,
                max_sources: 3,
                timeout: Duration::from_secs(4),
            },
        }
    }

    /// Fan out to primary clients in parallel, then walk fallbacks
    /// sequentially until `min_sources` contributions are in.
    async fn execute_strategy(
        &self,
        request: &GatherRequest,
        strategy: &Strategy,
        cancel: &CancelToken,
    ) -> Result<(Vec<SourceResponse>, Vec<SourceSummary>), SourceError> {
        let mut responses = Vec::new();
        let mut summaries = Vec::new();

        let mut join_set: JoinSet<(String, Result<SourceResponse, SourceError>)> = JoinSet::new();

        for client in strategy.primary.iter().take(strategy.max_sources) {
            let name = client.descriptor().name.clone();

            if let Some(summary) = self.budget_veto(request, client) {
                summaries.push(summary);
                continue;
            }

            let client = Arc::clone(client);
            let opts = self.search_options(request, cancel);
            let query = request.query.clone();
            let timeout = strategy.timeout;

            join_set.spawn(async move {
                let result = match tokio::time::timeout(timeout, client.search(&query, &opts)).await
                {
                    Ok(inner) => inner,
                    Err(_) => Err(SourceError::Transport("call deadline exceeded".to_string())),
                };
                (name, result)
            });
        }

        loop {
            let joined = tokio::select! {
                _ = cancel.cancelled() => {
                    join_set.abort_all();
                    return Err(SourceError::Cancelled);
                },
                joined = join_set.join_next() => joined,
            };

            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok((name, result)) => match result {
                    Ok(response) => {
                        summaries.push(summary_ok(&response));
                        responses.push(response);
                    },
                    Err(err) => {
                        if err.is_cancellation() {
                            return Err(SourceError::Cancelled);
                        }
                        tracing::warn!("Source {} contributed nothing: {}", name, err);
                        summaries.push(summary_err(&name, &err));
                    },
                },
                Err(join_err) => {
                    tracing::error!("Source task panicked: {}", join_err);
                },
            }
        }

        // Fallbacks run one at a time until the minimum is reached
        if responses.len() < strategy.min_sources {
            for client in &strategy.fallback {
                if responses.len() >= strategy.min_sources {
                    break;
                }
                if cancel.is_cancelled() {
                    return Err(SourceError::Cancelled);
                }

                let name = client.descriptor().name.clone();
                if let Some(summary) = self.budget_veto(request, client) {
                    summaries.push(summary);
                    continue;
                }

                tracing::info!(
                    "Using fallback source {} ({}/{} successful)",
                    name,
                    responses.len(),
                    strategy.min_sources
                );

                let opts = self.search_options(request, cancel);
                let result =
                    tokio::time::timeout(strategy.timeout, client.search(&request.query, &opts))
                        .await
                        .unwrap_or_else(|_| {
                            Err(SourceError::Transport("call deadline exceeded".to_string()))
                        });

                match result {
                    Ok(response) => {
                        summaries.push(summary_ok(&response));
                        responses.push(response);
                    },
                    Err(err) if err.is_cancellation() => return Err(SourceError::Cancelled),
                    Err(err) => {
                        tracing::warn!("Fallback source {} failed: {}", name, err);
                        summaries.push(summary_err(&name, &err));
                    },
                }
            }
        }

        Ok((responses, summaries))
    }

    /// A paid call the ledger refuses becomes a skipped source, not a
    /// failed job: already-collected items remain usable.
    fn budget_veto(
        &self,
        request: &GatherRequest,
        client: &Arc<dyn SourceClient>,
    ) -> Option<SourceSummary> {
        let cost = client.descriptor().cost_per_request;
        if cost <= 0.0 {
            return None;
        }
        let owner = request.owner?;

        if self.ledger.check(owner, cost) == BudgetDecision::Deny {
            let name = client.descriptor().name.clone();
            tracing::warn!("Budget denied paid call to {} for owner {}", name, owner);
            Some(summary_err(&name, &SourceError::BudgetExceeded))
        } else {
            None
        }
    }

    fn search_options(&self, request: &GatherRequest, cancel: &CancelToken) -> SearchOptions {
        SearchOptions {
            limit: 10,
            location_hint: Some(request.query.clone()),
            owner: request.owner,
            kind: request.kind.as_str().to_string(),
            cancel: cancel.clone(),
        }
    }

    /// Quality then standout for every survivor. Peers for the agreement
    /// check are all the other candidates in this set.
    fn score_all(&self, candidates: Vec<CandidateItem>) -> Vec<RankedItem> {
        let mut ranked = Vec::with_capacity(candidates.len());

        for (idx, item) in candidates.iter().enumerate() {
            let peers: Vec<&CandidateItem> = candidates
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != idx)
                .map(|(_, peer)| peer)
                .collect();

            let quality = self.quality.assess(item, &peers);
            let standout = self.standout.score(item);

            let top_method = standout
                .methods
                .iter()
                .filter(|(_, v)| **v > 0.0)
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(name, value)| format!("{} {:.1}", name, value))
                .unwrap_or_else(|| "no standout signal".to_string());
            let explanation = format!(
                "{} via {}; quality {:.2} from {}",
                top_method,
                standout.tier.as_str(),
                quality.overall,
                item.source_name
            );

            ranked.push(RankedItem {
                item: item.clone(),
                quality,
                personal_score: standout.base,
                standout,
                explanation,
            });
        }

        ranked
    }
}

/// Composite order: personalized standout, then overall quality, then
/// stable source-name order.
fn sort_ranked(items: &mut [RankedItem]) {
    items.sort_by(|a, b| {
        b.personal_score
            .partial_cmp(&a.personal_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                b.quality
                    .overall
                    .partial_cmp(&a.quality.overall)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then_with(|| a.item.source_name.cmp(&b.item.source_name))
    });
}

/// Fingerprint dedup with a case-insensitive title first pass.
fn dedup_candidates(responses: &[SourceResponse]) -> Vec<CandidateItem> {
    let mut seen_titles = std::collections::HashSet::new();
    let mut seen_fingerprints = std::collections::HashSet::new();
    let mut unique = Vec::new();

    for response in responses {
        for item in &response.items {
            let title_key = item.title.trim().to_lowercase();
            if title_key.is_empty() || !seen_titles.insert(title_key) {
                continue;
            }
            if !seen_fingerprints.insert(item.fingerprint.clone()) {
                continue;
            }
            unique.push(item.clone());
        }
    }

    unique
}

fn summary_ok(response: &SourceResponse) -> SourceSummary {
    SourceSummary {
        name: response.source.clone(),
        items: response.items.len(),
        cached: response.cached,
        cost: response.cost,
        latency_ms: response.latency_ms,
        error: None,
    }
}

fn summary_err(name: &str, err: &SourceError) -> SourceSummary {
    SourceSummary {
        name: name.to_string(),
        items: 0,
        cached: false,
        cost: 0.0,
        latency_ms: 0,
        error: Some(err.to_string()),
    }
}
