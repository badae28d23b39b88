//! Idle-income settlement and weekly faction aggregation.
//!
//! A pass walks every player, credits `owned_nodes * whole_minutes * rate`
//! and advances `last_income_at` in the same conditional write, then adds the
//! pass's per-faction income onto the stored weekly totals.
//!
//! Safe to repeat: a player whose window is under a minute is skipped, and
//! the credit is conditioned on the `last_income_at` the pass observed, so an
//! overlapping pass can never settle the same window twice. Per-player
//! failures are logged and left for the next pass, which picks up the
//! still-open window naturally.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GameConfig;
use crate::error::GameError;
use crate::graph::GraphState;
use crate::model::{elapsed_minutes, week_start, Faction, FactionScore};
use crate::notify::ChangeNotifier;
use crate::store::StateStore;

/// Red/blue income sums.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactionTotals {
    pub red: u64,
    pub blue: u64,
}

impl FactionTotals {
    pub fn add(&mut self, faction: Faction, amount: u64) {
        match faction {
            Faction::Red => self.red = self.red.saturating_add(amount),
            Faction::Blue => self.blue = self.blue.saturating_add(amount),
        }
    }

    pub fn merge(&mut self, other: FactionTotals) {
        self.red = self.red.saturating_add(other.red);
        self.blue = self.blue.saturating_add(other.blue);
    }

    pub fn is_zero(&self) -> bool {
        self.red == 0 && self.blue == 0
    }
}

/// Outcome of one pass; serializes as the trigger endpoint's response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub success: bool,
    /// Players credited by this pass.
    pub processed: usize,
    /// Players whose window was under a minute.
    pub skipped: usize,
    /// Players whose credit failed and stays open for the next pass.
    pub failed: usize,
    /// Income credited by this pass, per faction.
    pub faction_scores: FactionTotals,
    pub week_start: NaiveDate,
    /// Stored weekly totals after this pass, if the upsert landed.
    pub week_totals: Option<FactionScore>,
}

/// Error body for a failed trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileFailure {
    pub success: bool,
    pub error: String,
}

impl From<&GameError> for ReconcileFailure {
    fn from(e: &GameError) -> Self {
        Self {
            success: false,
            error: e.to_string(),
        }
    }
}

/// Runs settlement passes. Holds the overlap guard and any faction income
/// whose weekly upsert has not landed yet.
#[derive(Debug)]
pub struct IncomeReconciler {
    config: GameConfig,
    running: AtomicBool,
    unflushed: Mutex<BTreeMap<NaiveDate, FactionTotals>>,
}

/// Clears the running flag however the pass exits.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl IncomeReconciler {
    pub fn new(config: GameConfig) -> Self {
        Self {
            config,
            running: AtomicBool::new(false),
            unflushed: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Faction income credited to players but not yet in the weekly table.
    pub fn unflushed(&self) -> BTreeMap<NaiveDate, FactionTotals> {
        match self.unflushed.lock() {
            Ok(m) => m.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Settle every player as of `now`. Returns `ReconcileInProgress` if
    /// another pass on this reconciler has not finished.
    pub fn run<S: StateStore, N: ChangeNotifier>(
        &self,
        state: &GraphState<S, N>,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport, GameError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("Reconciliation tick skipped: previous pass still running");
            return Err(GameError::ReconcileInProgress);
        }
        let _guard = PassGuard(&self.running);

        let players = state.players()?;
        let counts = state.owned_node_counts()?;
        let week = week_start(now);

        let mut totals = FactionTotals::default();
        let mut processed = 0;
        let mut skipped = 0;
        let mut failed = 0;

        for player in &players {
            let minutes = elapsed_minutes(player.last_income_at, now);
            if minutes < 1 {
                skipped += 1;
                continue;
            }
            let minutes = minutes as u64;
            let owned = counts.get(&player.id).copied().unwrap_or(0);
            let income = owned
                .saturating_mul(minutes)
                .saturating_mul(self.config.income_per_node_minute);

            match state.credit_income(player.id, player.last_income_at, income, now) {
                Ok(_) => {
                    processed += 1;
                    totals.add(player.faction, income);
                    log::debug!(
                        "Credited {} to {} ({} nodes x {} min)",
                        income,
                        player.id,
                        owned,
                        minutes
                    );
                }
                Err(e) => {
                    failed += 1;
                    log::warn!("Income for {} deferred to next pass: {}", player.id, e);
                }
            }
        }

        let week_totals = self.flush(state, week, totals);

        log::info!(
            "Reconciled {} players ({} skipped, {} failed): red +{}, blue +{}",
            processed,
            skipped,
            failed,
            totals.red,
            totals.blue
        );

        Ok(ReconcileReport {
            success: true,
            processed,
            skipped,
            failed,
            faction_scores: totals,
            week_start: week,
            week_totals,
        })
    }

    /// Add `totals` for `week` to anything left over from earlier passes and
    /// try to land all of it. Whatever fails stays queued.
    fn flush<S: StateStore, N: ChangeNotifier>(
        &self,
        state: &GraphState<S, N>,
        week: NaiveDate,
        totals: FactionTotals,
    ) -> Option<FactionScore> {
        let mut pending = match self.unflushed.lock() {
            Ok(m) => m,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.entry(week).or_default().merge(totals);

        let mut current = None;
        let weeks: Vec<NaiveDate> = pending.keys().copied().collect();
        for w in weeks {
            let Some(delta) = pending.get(&w).copied() else {
                continue;
            };
            if delta.is_zero() && w != week {
                pending.remove(&w);
                continue;
            }
            match state.accumulate_faction_score(w, delta.red, delta.blue) {
                Ok(score) => {
                    pending.remove(&w);
                    if w == week {
                        current = Some(score);
                    }
                }
                Err(e) => {
                    log::error!("Faction score for week {} not saved, will retry: {}", w, e);
                }
            }
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, NodeId, Player, PlayerId};
    use crate::notify::NullNotifier;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap()
    }

    fn player(id: u64, faction: Faction, minutes_ago: i64) -> Player {
        Player {
            id: PlayerId(id),
            handle: format!("p{}", id),
            faction,
            charge: 0,
            last_income_at: now() - Duration::minutes(minutes_ago),
            ally_of: None,
        }
    }

    fn owned(id: u64, owner: u64) -> Node {
        Node {
            id: NodeId(id),
            owner_id: Some(PlayerId(owner)),
            charge: 0,
            fortify_lvl: 0,
            x: 0.0,
            y: 0.0,
            created_at: now(),
        }
    }

    #[test]
    fn test_credits_nodes_times_minutes() {
        let g = GraphState::new(
            MemoryStore::seeded(
                vec![player(1, Faction::Red, 7)],
                vec![owned(1, 1), owned(2, 1), owned(3, 1)],
                vec![],
            ),
            NullNotifier,
            8,
        );
        let r = IncomeReconciler::new(GameConfig::default());
        let report = r.run(&g, now()).unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.faction_scores, FactionTotals { red: 21, blue: 0 });
        let p = g.player(PlayerId(1)).unwrap();
        assert_eq!(p.charge, 21);
        assert_eq!(p.last_income_at, now());
    }

    #[test]
    fn test_second_pass_without_clock_advance_is_noop() {
        let g = GraphState::new(
            MemoryStore::seeded(vec![player(1, Faction::Blue, 10)], vec![owned(1, 1)], vec![]),
            NullNotifier,
            8,
        );
        let r = IncomeReconciler::new(GameConfig::default());
        r.run(&g, now()).unwrap();
        let again = r.run(&g, now()).unwrap();
        assert_eq!(again.processed, 0);
        assert_eq!(again.skipped, 1);
        assert_eq!(g.player(PlayerId(1)).unwrap().charge, 10);
    }

    #[test]
    fn test_sub_minute_window_keeps_timestamp() {
        let mut p = player(1, Faction::Red, 0);
        p.last_income_at = now() - Duration::seconds(59);
        let before = p.last_income_at;
        let g = GraphState::new(
            MemoryStore::seeded(vec![p], vec![owned(1, 1)], vec![]),
            NullNotifier,
            8,
        );
        let report = IncomeReconciler::new(GameConfig::default())
            .run(&g, now())
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(g.player(PlayerId(1)).unwrap().last_income_at, before);
    }

    #[test]
    fn test_player_without_nodes_still_advances() {
        let g = GraphState::new(
            MemoryStore::seeded(vec![player(1, Faction::Red, 30)], vec![], vec![]),
            NullNotifier,
            8,
        );
        let report = IncomeReconciler::new(GameConfig::default())
            .run(&g, now())
            .unwrap();
        assert_eq!(report.processed, 1);
        let p = g.player(PlayerId(1)).unwrap();
        assert_eq!(p.charge, 0);
        assert_eq!(p.last_income_at, now());
    }

    #[test]
    fn test_weekly_totals_accumulate_across_passes() {
        let g = GraphState::new(
            MemoryStore::seeded(
                vec![player(1, Faction::Red, 5), player(2, Faction::Blue, 5)],
                vec![owned(1, 1), owned(2, 2), owned(3, 2)],
                vec![],
            ),
            NullNotifier,
            8,
        );
        let r = IncomeReconciler::new(GameConfig::default());
        let first = r.run(&g, now()).unwrap();
        assert_eq!(first.faction_scores, FactionTotals { red: 5, blue: 10 });
        let second = r.run(&g, now() + Duration::minutes(3)).unwrap();
        assert_eq!(second.faction_scores, FactionTotals { red: 3, blue: 6 });
        let stored = second.week_totals.unwrap();
        assert_eq!(stored.red_score, 8);
        assert_eq!(stored.blue_score, 16);
    }

    #[test]
    fn test_income_rate_is_configurable() {
        let g = GraphState::new(
            MemoryStore::seeded(vec![player(1, Faction::Red, 4)], vec![owned(1, 1)], vec![]),
            NullNotifier,
            8,
        );
        let config = GameConfig {
            income_per_node_minute: 3,
            ..GameConfig::default()
        };
        IncomeReconciler::new(config).run(&g, now()).unwrap();
        assert_eq!(g.player(PlayerId(1)).unwrap().charge, 12);
    }

    #[test]
    fn test_report_wire_shape() {
        let g = GraphState::new(MemoryStore::new(), NullNotifier, 8);
        let report = IncomeReconciler::new(GameConfig::default())
            .run(&g, now())
            .unwrap();
        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["processed"], 0);
        assert_eq!(json["faction_scores"]["red"], 0);
        assert_eq!(json["faction_scores"]["blue"], 0);
    }

    #[test]
    fn test_failure_body() {
        let body = ReconcileFailure::from(&GameError::ReconcileInProgress);
        assert!(!body.success);
        assert!(body.error.contains("already running"));
    }
}
