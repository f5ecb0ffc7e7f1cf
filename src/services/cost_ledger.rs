//! Per-owner spend accounting and budget enforcement.
//!
//! Costs are recorded when an HTTP reply was received (any status);
//! transport-level failures and aborted calls record nothing.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Mutex;

/// Fraction of budget that raises a warning alert
const WARNING_THRESHOLD: f64 = 0.8;
/// Fraction of budget past which `check` denies further paid calls
const CRITICAL_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone, Serialize)]
pub struct CostEntry {
    pub provider: String,
    pub amount: f64,
    pub owner_id: Option<i64>,
    pub kind: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetAlert {
    pub level: AlertLevel,
    pub owner_id: i64,
    pub current_cost: f64,
    pub budget_limit: f64,
    pub percentage_used: f64,
    pub timestamp: DateTime<Utc>,
}

/// Verdict for a prospective paid call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerSummary {
    pub total_cost: f64,
    pub entry_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub alert_count: usize,
}

/// Append-only spend ledger shared across concurrent fan-outs.
pub struct CostLedger {
    entries: Mutex<Vec<CostEntry>>,
    owner_costs: DashMap<i64, f64>,
    owner_budgets: DashMap<i64, f64>,
    alerts: Mutex<Vec<BudgetAlert>>,
    total: Mutex<f64>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            owner_costs: DashMap::new(),
            owner_budgets: DashMap::new(),
            alerts: Mutex::new(Vec::new()),
            total: Mutex::new(0.0),
        }
    }

    /// Set the budget window for an owner (derived from tier at job start).
    pub fn set_owner_budget(&self, owner_id: i64, budget: f64) {
        self.owner_budgets.insert(owner_id, budget);
    }

    /// Record one provider call. Failed calls still cost money when the
    /// upstream answered; the failure rate feeds the breaker, not this ledger.
    pub fn track(
        &self,
        provider: &str,
        amount: f64,
        owner_id: Option<i64>,
        kind: &str,
        success: bool,
    ) {
        let entry = CostEntry {
            provider: provider.to_string(),
            amount,
            owner_id,
            kind: kind.to_string(),
            success,
            timestamp: Utc::now(),
        };

        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
        if let Ok(mut total) = self.total.lock() {
            *total += amount;
        }

        let Some(owner) = owner_id else {
            return;
        };

        let current = {
            let mut cost = self.owner_costs.entry(owner).or_insert(0.0);
            *cost += amount;
            *cost
        };

        if let Some(budget) = self.owner_budgets.get(&owner).map(|b| *b)
            && budget > 0.0
        {
            let used = current / budget;
            if used >= CRITICAL_THRESHOLD {
                self.push_alert(AlertLevel::Critical, owner, current, budget, used);
            } else if used >= WARNING_THRESHOLD {
                self.push_alert(AlertLevel::Warning, owner, current, budget, used);
            }
        }

        tracing::debug!(
            "Cost tracked: provider={} amount={:.4} owner={:?} success={}",
            provider,
            amount,
            owner_id,
            success
        );
    }

    /// May the caller spend `estimated_cost` on behalf of `owner_id`?
    /// Denies once the critical threshold is breached or the estimate
    /// would overrun the budget. Owners without a budget are unconstrained.
    pub fn check(&self, owner_id: i64, estimated_cost: f64) -> BudgetDecision {
        let Some(budget) = self.owner_budgets.get(&owner_id).map(|b| *b) else {
            return BudgetDecision::Allow;
        };
        if budget <= 0.0 {
            return if estimated_cost > 0.0 { BudgetDecision::Deny } else { BudgetDecision::Allow };
        }

        let current = self.owner_cost(owner_id);
        if current / budget >= CRITICAL_THRESHOLD {
            return BudgetDecision::Deny;
        }
        if current + estimated_cost > budget {
            return BudgetDecision::Deny;
        }
        BudgetDecision::Allow
    }

    pub fn owner_cost(&self, owner_id: i64) -> f64 {
        self.owner_costs.get(&owner_id).map(|c| *c).unwrap_or(0.0)
    }

    pub fn total_cost(&self) -> f64 {
        self.total.lock().map(|t| *t).unwrap_or(0.0)
    }

    pub fn alerts(&self) -> Vec<BudgetAlert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn summary(&self) -> LedgerSummary {
        let (entry_count, success_count, failure_count) = self
            .entries
            .lock()
            .map(|entries| {
                let successes = entries.iter().filter(|e| e.success).count();
                (entries.len(), successes, entries.len() - successes)
            })
            .unwrap_or((0, 0, 0));

        LedgerSummary {
            total_cost: self.total_cost(),
            entry_count,
            success_count,
            failure_count,
            alert_count: self.alerts.lock().map(|a| a.len()).unwrap_or(0),
        }
    }

    fn push_alert(
        &self,
        level: AlertLevel,
        owner_id: i64,
        current: f64,
        budget: f64,
        used: f64,
    ) {
        if level == AlertLevel::Critical {
            tracing::warn!(
                "Owner {} at {:.1}% of budget ({:.4}/{:.4})",
                owner_id,
                used * 100.0,
                current,
                budget
            );
        }
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(BudgetAlert {
                level,
                owner_id,
                current_cost: current,
                budget_limit: budget,
                percentage_used: used,
                timestamp: Utc::now(),
            });
        }
    }
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_per_owner_and_total() {
        let ledger = CostLedger::new();
        ledger.track("guardian", 0.02, Some(1), "base", true);
        ledger.track("guardian", 0.02, Some(1), "base", false);
        ledger.track("opentripmap", 0.01, Some(2), "base", true);
        ledger.track("wikipedia", 0.0, None, "base", true);

        assert!((ledger.owner_cost(1) - 0.04).abs() < 1e-9);
        assert!((ledger.owner_cost(2) - 0.01).abs() < 1e-9);
        assert!((ledger.total_cost() - 0.05).abs() < 1e-9);
        assert_eq!(ledger.summary().failure_count, 1);
    }

    #[test]
    fn denies_past_critical_threshold() {
        let ledger = CostLedger::new();
        ledger.set_owner_budget(7, 0.10);

        ledger.track("premium", 0.096, Some(7), "standout", true);
        assert_eq!(ledger.check(7, 0.001), BudgetDecision::Deny);

        let alerts = ledger.alerts();
        assert!(alerts.iter().any(|a| a.level == AlertLevel::Critical));
    }

    #[test]
    fn warns_at_eighty_percent() {
        let ledger = CostLedger::new();
        ledger.set_owner_budget(7, 0.10);

        ledger.track("premium", 0.085, Some(7), "standout", true);
        assert_eq!(ledger.check(7, 0.005), BudgetDecision::Allow);

        let alerts = ledger.alerts();
        assert!(alerts.iter().any(|a| a.level == AlertLevel::Warning));
        assert!(!alerts.iter().any(|a| a.level == AlertLevel::Critical));
    }

    #[test]
    fn estimate_overrunning_budget_is_denied() {
        let ledger = CostLedger::new();
        ledger.set_owner_budget(3, 0.10);
        ledger.track("premium", 0.05, Some(3), "base", true);

        assert_eq!(ledger.check(3, 0.04), BudgetDecision::Allow);
        assert_eq!(ledger.check(3, 0.06), BudgetDecision::Deny);
    }

    #[test]
    fn owner_without_budget_is_unconstrained() {
        let ledger = CostLedger::new();
        assert_eq!(ledger.check(99, 10.0), BudgetDecision::Allow);
    }
}
