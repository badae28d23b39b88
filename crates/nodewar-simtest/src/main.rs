//! NodeWar Headless Simulation Harness
//!
//! Plays the territory and income rules end to end over the in-memory store.
//! Runs entirely in-process: no DB, no networking, no rendering.
//!
//! Usage:
//!   cargo run -p nodewar-simtest
//!   cargo run -p nodewar-simtest -- --verbose

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, TimeZone, Utc};
use nodewar_logic::actions::ActionProcessor;
use nodewar_logic::config::{validate_config, GameConfig};
use nodewar_logic::error::{ErrorKind, GameError};
use nodewar_logic::graph::GraphState;
use nodewar_logic::model::{
    week_start, Edge, EdgeKey, Faction, Node, NodeId, Player, PlayerId,
};
use nodewar_logic::notify::{Broadcaster, ChangeOp, EntityKind, NullNotifier};
use nodewar_logic::raid::{FixedRaid, UniformRaid};
use nodewar_logic::reconcile::IncomeReconciler;
use nodewar_logic::schedule::{spawn_reconcile_loop, ManualClock};
use nodewar_logic::store::MemoryStore;

// ── Rules file (same JSON the server is configured with) ────────────────
const CONFIG_JSON: &str = include_str!("../../../data/game_config.json");

const RAID_TRIALS: u64 = 10_000;
const RAID_TOLERANCE: f64 = 0.03;

// ── Test harness ────────────────────────────────────────────────────────

struct TestResult {
    name: String,
    passed: bool,
    detail: String,
}

impl TestResult {
    fn new(name: &str, passed: bool, detail: String) -> Self {
        Self {
            name: name.into(),
            passed,
            detail,
        }
    }

    /// A check whose setup itself failed.
    fn errored(name: &str, e: &GameError) -> Self {
        Self::new(name, false, format!("unexpected error: {}", e))
    }
}

fn main() {
    let verbose = std::env::args().any(|a| a == "--verbose");
    println!("=== NodeWar Simulation Harness ===\n");

    let config = match GameConfig::from_json(CONFIG_JSON) {
        Ok(c) => c,
        Err(e) => {
            println!("  ✗ config_parse: {}", e);
            std::process::exit(1);
        }
    };

    let mut results = Vec::new();

    // 1. Rules file validation
    results.extend(validate_rules(&config, verbose));

    // 2. Capture, fortify, raid scenario
    results.extend(validate_scenario(&config, verbose));

    // 3. Capture races
    results.extend(validate_capture_race(&config, verbose));

    // 4. Idle income settlement
    results.extend(validate_income(&config, verbose));

    // 5. Weekly faction standings
    results.extend(validate_weekly_scores(&config, verbose));

    // 6. Change notification
    results.extend(validate_notifications(&config, verbose));

    // 7. Scheduled reconciliation loop
    results.extend(validate_schedule(&config, verbose));

    // ── Summary ──
    println!();
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = results.iter().filter(|r| !r.passed).count();
    let total = results.len();

    for r in &results {
        let icon = if r.passed { "✓" } else { "✗" };
        if !r.passed || verbose {
            println!("  {} {}: {}", icon, r.name, r.detail);
        }
    }

    println!(
        "\n=== RESULT: {}/{} passed, {} failed ===",
        passed, total, failed
    );

    if failed > 0 {
        std::process::exit(1);
    }
}

// ── World builders ──────────────────────────────────────────────────────

/// A Wednesday, so a few days either side stay in one week.
fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

fn player(id: u64, faction: Faction, charge: u64, last_income_at: DateTime<Utc>) -> Player {
    Player {
        id: PlayerId(id),
        handle: format!("player{}", id),
        faction,
        charge,
        last_income_at,
        ally_of: None,
    }
}

fn node(id: u64, owner: Option<u64>) -> Node {
    Node {
        id: NodeId(id),
        owner_id: owner.map(PlayerId),
        charge: 0,
        fortify_lvl: 0,
        x: id as f32 * 10.0,
        y: 0.0,
        created_at: epoch(),
    }
}

fn edge(src: u64, dst: u64, owner: Option<u64>) -> Edge {
    Edge {
        src_id: NodeId(src),
        dst_id: NodeId(dst),
        owner_id: owner.map(PlayerId),
        created_at: epoch(),
    }
}

// ── 1. Rules ────────────────────────────────────────────────────────────

fn validate_rules(config: &GameConfig, verbose: bool) -> Vec<TestResult> {
    println!("--- Rules ---");
    let mut results = Vec::new();

    let errors = validate_config(config);
    results.push(TestResult::new(
        "rules_valid",
        errors.is_empty(),
        if errors.is_empty() {
            "rules file passes validation".into()
        } else {
            format!("{:?}", errors)
        },
    ));

    results.push(TestResult::new(
        "rules_match_defaults",
        *config == GameConfig::default(),
        "shipped rules equal the built-in defaults".into(),
    ));

    let broken = GameConfig {
        capture_cost: 0,
        raid_success_chance: 1.5,
        reconcile_period_secs: 0,
        ..config.clone()
    };
    let found = validate_config(&broken).len();
    results.push(TestResult::new(
        "rules_reject_broken",
        found == 3,
        format!("{} problems reported for a config with 3", found),
    ));

    let costs: Option<Vec<u64>> = (0..4).map(|lvl| config.fortify_cost(lvl)).collect();
    results.push(TestResult::new(
        "rules_fortify_ladder",
        costs.as_deref() == Some(&[20, 40, 60, 80][..]),
        format!("fortify costs L0..L3: {:?}", costs),
    ));

    if verbose {
        println!("  period: {:?}", config.reconcile_period());
    }
    results
}

// ── 2. Scenario ─────────────────────────────────────────────────────────

fn validate_scenario(config: &GameConfig, verbose: bool) -> Vec<TestResult> {
    println!("--- Capture / Fortify / Raid ---");
    match run_scenario(config, verbose) {
        Ok(results) => results,
        Err(e) => vec![TestResult::errored("scenario", &e)],
    }
}

fn run_scenario(config: &GameConfig, verbose: bool) -> Result<Vec<TestResult>, GameError> {
    let mut results = Vec::new();
    let (p, rival) = (PlayerId(1), PlayerId(2));
    let edges = (0..RAID_TRIALS).map(|i| edge(1, 1_000 + i, Some(1))).collect();
    let state = GraphState::new(
        MemoryStore::seeded(
            vec![
                player(1, Faction::Red, config.starting_charge, epoch()),
                player(2, Faction::Blue, config.starting_charge, epoch()),
            ],
            vec![node(1, None)],
            edges,
        ),
        NullNotifier,
        config.max_cas_attempts,
    );
    let raid = UniformRaid::from_entropy(config.raid_success_chance);
    let actions = ActionProcessor::new(config.clone(), raid);

    let captured = actions.capture(&state, NodeId(1), p)?;
    results.push(TestResult::new(
        "scenario_capture",
        captured.remaining_charge == 90 && state.node(NodeId(1))?.owner_id == Some(p),
        format!("capture cost {}, {} left", captured.cost, captured.remaining_charge),
    ));

    let fortified = actions.fortify(&state, NodeId(1), p)?;
    results.push(TestResult::new(
        "scenario_fortify",
        fortified.remaining_charge == 70 && state.node(NodeId(1))?.fortify_lvl == 1,
        format!("fortify cost {}, {} left", fortified.cost, fortified.remaining_charge),
    ));

    let own_raid = actions.raid(&state, EdgeKey::new(NodeId(1), NodeId(1_000)), p);
    results.push(TestResult::new(
        "scenario_own_edge_not_raidable",
        matches!(own_raid, Err(GameError::NotRaidable(_))),
        format!("{:?}", own_raid.map(|r| r.success)),
    ));

    let rival_before = state.player(rival)?.charge;
    let mut successes = 0u64;
    for i in 0..RAID_TRIALS {
        let key = EdgeKey::new(NodeId(1), NodeId(1_000 + i));
        if actions.raid(&state, key, rival)?.success {
            successes += 1;
        }
    }
    let rate = successes as f64 / RAID_TRIALS as f64;
    results.push(TestResult::new(
        "scenario_raid_rate",
        (rate - config.raid_success_chance).abs() <= RAID_TOLERANCE,
        format!(
            "{}/{} raids landed ({:.3}, expected {:.2})",
            successes, RAID_TRIALS, rate, config.raid_success_chance
        ),
    ));

    let remaining = state.snapshot(epoch())?.edges.len();
    results.push(TestResult::new(
        "scenario_raid_removes_only_hits",
        remaining as u64 == RAID_TRIALS - successes,
        format!("{} edges remain", remaining),
    ));

    let rival_after = state.player(rival)?.charge;
    results.push(TestResult::new(
        "scenario_raid_is_free",
        rival_before == rival_after,
        format!("rival charge {} -> {}", rival_before, rival_after),
    ));

    if verbose {
        println!("  raid success rate: {:.4}", rate);
    }
    Ok(results)
}

// ── 3. Capture races ────────────────────────────────────────────────────

fn validate_capture_race(config: &GameConfig, verbose: bool) -> Vec<TestResult> {
    println!("--- Capture Race ---");
    const RACERS: u64 = 16;
    let mut results = Vec::new();

    let state = GraphState::new(
        MemoryStore::seeded(
            (1..=RACERS)
                .map(|id| player(id, Faction::Red, config.starting_charge, epoch()))
                .collect(),
            vec![node(1, None)],
            vec![],
        ),
        NullNotifier,
        config.max_cas_attempts,
    );
    let actions = ActionProcessor::new(config.clone(), FixedRaid(false));
    let barrier = Barrier::new(RACERS as usize);

    let outcomes: Vec<Result<(), GameError>> = thread::scope(|s| {
        let handles: Vec<_> = (1..=RACERS)
            .map(|id| {
                let (state, actions, barrier) = (&state, &actions, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    actions.capture(state, NodeId(1), PlayerId(id)).map(|_| ())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(GameError::Conflict("racer panicked".into())))
            })
            .collect()
    });

    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    results.push(TestResult::new(
        "race_single_winner",
        winners == 1,
        format!("{} of {} racers won", winners, RACERS),
    ));

    let losers_conflicted = outcomes
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.kind() == ErrorKind::Conflict);
    results.push(TestResult::new(
        "race_losers_conflict",
        losers_conflicted,
        "every loser was told Conflict".into(),
    ));

    let total_charge: Result<u64, GameError> = (1..=RACERS)
        .map(|id| state.player(PlayerId(id)).map(|p| p.charge))
        .sum();
    match total_charge {
        Ok(total) => {
            let expected = RACERS * config.starting_charge - config.capture_cost;
            results.push(TestResult::new(
                "race_only_winner_charged",
                total == expected,
                format!("total charge {} (expected {})", total, expected),
            ));
        }
        Err(e) => results.push(TestResult::errored("race_only_winner_charged", &e)),
    }

    if verbose {
        if let Ok(n) = state.node(NodeId(1)) {
            println!("  winner: {:?}", n.owner_id);
        }
    }
    results
}

// ── 4. Income ───────────────────────────────────────────────────────────

fn validate_income(config: &GameConfig, verbose: bool) -> Vec<TestResult> {
    println!("--- Idle Income ---");
    match run_income(config, verbose) {
        Ok(results) => results,
        Err(e) => vec![TestResult::errored("income", &e)],
    }
}

fn run_income(config: &GameConfig, verbose: bool) -> Result<Vec<TestResult>, GameError> {
    let mut results = Vec::new();
    let now = epoch();
    let state = GraphState::new(
        MemoryStore::seeded(
            vec![
                player(1, Faction::Red, 0, now - Duration::minutes(7)),
                player(2, Faction::Blue, 0, now - Duration::seconds(30)),
                player(3, Faction::Blue, 0, now - Duration::minutes(7)),
            ],
            vec![node(1, Some(1)), node(2, Some(1)), node(3, Some(1))],
            vec![],
        ),
        NullNotifier,
        config.max_cas_attempts,
    );
    let reconciler = IncomeReconciler::new(config.clone());

    let first = reconciler.run(&state, now)?;
    let p1 = state.player(PlayerId(1))?;
    results.push(TestResult::new(
        "income_three_nodes_seven_minutes",
        p1.charge == 21 && p1.last_income_at == now,
        format!("credited {}, window closed at {}", p1.charge, p1.last_income_at),
    ));

    let p2 = state.player(PlayerId(2))?;
    results.push(TestResult::new(
        "income_short_window_skipped",
        p2.charge == 0 && p2.last_income_at == now - Duration::seconds(30),
        format!("{} skipped, {} processed", first.skipped, first.processed),
    ));

    let p3 = state.player(PlayerId(3))?;
    results.push(TestResult::new(
        "income_no_nodes_advances_window",
        p3.charge == 0 && p3.last_income_at == now,
        "landless player earns nothing but is settled".into(),
    ));

    let second = reconciler.run(&state, now)?;
    let p1_again = state.player(PlayerId(1))?;
    results.push(TestResult::new(
        "income_idempotent",
        p1_again.charge == 21 && second.faction_scores.is_zero(),
        format!(
            "second pass credited red={} blue={}",
            second.faction_scores.red, second.faction_scores.blue
        ),
    ));

    if verbose {
        if let Ok(body) = serde_json::to_string(&first) {
            println!("  first pass: {}", body);
        }
    }
    Ok(results)
}

// ── 5. Weekly standings ─────────────────────────────────────────────────

fn validate_weekly_scores(config: &GameConfig, verbose: bool) -> Vec<TestResult> {
    println!("--- Weekly Standings ---");
    match run_weekly_scores(config, verbose) {
        Ok(results) => results,
        Err(e) => vec![TestResult::errored("weekly", &e)],
    }
}

fn run_weekly_scores(config: &GameConfig, verbose: bool) -> Result<Vec<TestResult>, GameError> {
    let mut results = Vec::new();
    let start = epoch();
    let state = GraphState::new(
        MemoryStore::seeded(
            vec![
                player(1, Faction::Red, 0, start),
                player(2, Faction::Blue, 0, start),
            ],
            vec![node(1, Some(1)), node(2, Some(2)), node(3, Some(2))],
            vec![],
        ),
        NullNotifier,
        config.max_cas_attempts,
    );
    let reconciler = IncomeReconciler::new(config.clone());

    let t1 = start + Duration::minutes(10);
    let t2 = t1 + Duration::minutes(5);
    reconciler.run(&state, t1)?;
    reconciler.run(&state, t2)?;
    let week = state.faction_score(week_start(t2))?;
    results.push(TestResult::new(
        "weekly_same_week_accumulates",
        week.red_score == 15 && week.blue_score == 30,
        format!(
            "{}: red={} blue={}",
            week.week_start, week.red_score, week.blue_score
        ),
    ));

    // Sunday after the epoch starts a fresh row
    let t3 = start + Duration::days(4);
    let report = reconciler.run(&state, t3)?;
    let next = state.faction_score(week_start(t3))?;
    let old = state.faction_score(week_start(t2))?;
    results.push(TestResult::new(
        "weekly_rolls_over_on_sunday",
        next.week_start != old.week_start
            && old.red_score == 15
            && next.red_score == report.faction_scores.red,
        format!(
            "{} -> {}, new week red={}",
            old.week_start, next.week_start, next.red_score
        ),
    ));

    results.push(TestResult::new(
        "weekly_nothing_unflushed",
        reconciler.unflushed().is_empty(),
        "every pass landed its weekly upsert".into(),
    ));

    if verbose {
        println!("  week starts: {} / {}", old.week_start, next.week_start);
    }
    Ok(results)
}

// ── 6. Notifications ────────────────────────────────────────────────────

fn validate_notifications(config: &GameConfig, verbose: bool) -> Vec<TestResult> {
    println!("--- Change Notification ---");
    match run_notifications(config, verbose) {
        Ok(results) => results,
        Err(e) => vec![TestResult::errored("notify", &e)],
    }
}

fn run_notifications(config: &GameConfig, verbose: bool) -> Result<Vec<TestResult>, GameError> {
    let mut results = Vec::new();
    let state = GraphState::new(
        MemoryStore::seeded(
            vec![
                player(1, Faction::Red, 1_000, epoch()),
                player(2, Faction::Blue, 1_000, epoch()),
            ],
            vec![node(1, None)],
            vec![edge(1, 2, Some(1))],
        ),
        Broadcaster::new(),
        config.max_cas_attempts,
    );
    let actions = ActionProcessor::new(config.clone(), FixedRaid(true));
    let mut sub = state.notifier().subscribe();

    actions.capture(&state, NodeId(1), PlayerId(1))?;
    actions.fortify(&state, NodeId(1), PlayerId(1))?;
    // Rejected, publishes nothing
    let _ = actions.fortify(&state, NodeId(1), PlayerId(2));
    actions.raid(&state, EdgeKey::new(NodeId(1), NodeId(2)), PlayerId(2))?;

    let events = sub.drain();
    let shape: Vec<(EntityKind, ChangeOp)> = events.iter().map(|e| (e.entity, e.op)).collect();
    results.push(TestResult::new(
        "notify_committed_only",
        shape
            == [
                (EntityKind::Node, ChangeOp::Upsert),
                (EntityKind::Node, ChangeOp::Upsert),
                (EntityKind::Edge, ChangeOp::Delete),
            ],
        format!("{} events: {:?}", events.len(), shape),
    ));

    let body = events
        .last()
        .and_then(|e| serde_json::to_value(e).ok())
        .map(|v| v["entity"] == "edge" && v["op"] == "delete")
        .unwrap_or(false);
    results.push(TestResult::new(
        "notify_wire_shape",
        body,
        "events serialize as {entity, op, payload}".into(),
    ));

    if verbose {
        for e in &events {
            println!("  {:?} {:?} v{}", e.entity, e.op, e.version);
        }
    }
    Ok(results)
}

// ── 7. Schedule ─────────────────────────────────────────────────────────

fn validate_schedule(config: &GameConfig, verbose: bool) -> Vec<TestResult> {
    println!("--- Scheduled Reconciliation ---");
    let start = epoch();
    let state = Arc::new(GraphState::new(
        MemoryStore::seeded(
            vec![player(1, Faction::Red, 0, start)],
            vec![node(1, Some(1)), node(2, Some(1))],
            vec![],
        ),
        NullNotifier,
        config.max_cas_attempts,
    ));
    let reconciler = Arc::new(IncomeReconciler::new(config.clone()));
    let clock = Arc::new(ManualClock::new(start + Duration::minutes(5)));

    let handle = match spawn_reconcile_loop(
        state.clone(),
        reconciler,
        clock.clone(),
        StdDuration::from_millis(10),
    ) {
        Ok(h) => h,
        Err(e) => {
            return vec![TestResult::new(
                "schedule_spawn",
                false,
                format!("could not start loop: {}", e),
            )]
        }
    };

    // Wait for at least one tick to land
    let deadline = Instant::now() + StdDuration::from_secs(5);
    let mut charge = 0;
    while Instant::now() < deadline {
        charge = state.player(PlayerId(1)).map(|p| p.charge).unwrap_or(0);
        if charge > 0 {
            break;
        }
        thread::sleep(StdDuration::from_millis(5));
    }
    // Later ticks at the same clock reading must not add anything
    thread::sleep(StdDuration::from_millis(50));
    let settled = state.player(PlayerId(1)).map(|p| p.charge).unwrap_or(0);
    let stopped = handle.stop().is_ok();

    let mut results = vec![TestResult::new(
        "schedule_ticks_settle_once",
        charge == 10 && settled == 10,
        format!("credited {} then {} after more ticks", charge, settled),
    )];
    results.push(TestResult::new(
        "schedule_stops",
        stopped,
        "loop thread joined".into(),
    ));

    if verbose {
        println!("  clock at {}", start + Duration::minutes(5));
    }
    results
}
