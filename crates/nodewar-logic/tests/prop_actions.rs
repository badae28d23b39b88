//! Property tests: arbitrary action sequences against a small world.

use chrono::{DateTime, TimeZone, Utc};
use nodewar_logic::actions::ActionProcessor;
use nodewar_logic::config::GameConfig;
use nodewar_logic::graph::GraphState;
use nodewar_logic::model::{Faction, Node, NodeId, Player, PlayerId};
use nodewar_logic::notify::NullNotifier;
use nodewar_logic::raid::FixedRaid;
use nodewar_logic::store::MemoryStore;
use proptest::prelude::*;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap()
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Capture { node: u64, player: u64 },
    Fortify { node: u64, player: u64 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..4, 1u64..=3).prop_map(|(node, player)| Op::Capture { node, player }),
        (0u64..4, 1u64..=3).prop_map(|(node, player)| Op::Fortify { node, player }),
    ]
}

fn world(charges: [u64; 3]) -> GraphState<MemoryStore, NullNotifier> {
    let players = (1..=3u64)
        .map(|id| Player {
            id: PlayerId(id),
            handle: format!("p{}", id),
            faction: Faction::Red,
            charge: charges[(id - 1) as usize],
            last_income_at: t0(),
            ally_of: None,
        })
        .collect();
    // Node 3 is referenced by ops but never generated, to exercise NotFound
    let nodes = (0..3u64)
        .map(|id| Node {
            id: NodeId(id),
            owner_id: None,
            charge: 0,
            fortify_lvl: 0,
            x: 0.0,
            y: 0.0,
            created_at: t0(),
        })
        .collect();
    GraphState::new(MemoryStore::seeded(players, nodes, vec![]), NullNotifier, 8)
}

fn fingerprint(state: &GraphState<MemoryStore, NullNotifier>) -> String {
    serde_json::to_string(&state.snapshot(t0()).unwrap()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Every accepted action debits exactly its cost; every rejected one
    /// leaves the world byte-for-byte unchanged.
    #[test]
    fn rejected_actions_have_no_side_effects(
        charges in proptest::array::uniform3(0u64..200),
        ops in proptest::collection::vec(op(), 1..40),
    ) {
        let state = world(charges);
        let actions = ActionProcessor::new(GameConfig::default(), FixedRaid(false));

        for op in ops {
            let before = fingerprint(&state);
            let (node, player) = match op {
                Op::Capture { node, player } | Op::Fortify { node, player } => {
                    (NodeId(node), PlayerId(player))
                }
            };
            let charge_before = state.player(player).unwrap().charge;
            let result = match op {
                Op::Capture { .. } => actions.capture(&state, node, player),
                Op::Fortify { .. } => actions.fortify(&state, node, player),
            };
            match result {
                Ok(receipt) => {
                    let charge_after = state.player(player).unwrap().charge;
                    prop_assert_eq!(charge_before - receipt.cost, charge_after);
                    prop_assert_eq!(receipt.remaining_charge, charge_after);
                }
                Err(_) => prop_assert_eq!(before, fingerprint(&state)),
            }
        }
    }

    /// M fortifies from level 0 cost the sum of `i * 20` for `i` in `1..=M`.
    #[test]
    fn fortify_total_cost_is_triangular(m in 0u32..15) {
        let total: u64 = (1..=u64::from(m)).map(|i| i * 20).sum();
        let state = world([total + 10, 0, 0]);
        let actions = ActionProcessor::new(GameConfig::default(), FixedRaid(false));

        actions.capture(&state, NodeId(0), PlayerId(1)).unwrap();
        for _ in 0..m {
            actions.fortify(&state, NodeId(0), PlayerId(1)).unwrap();
        }
        prop_assert_eq!(state.node(NodeId(0)).unwrap().fortify_lvl, m);
        prop_assert_eq!(state.player(PlayerId(1)).unwrap().charge, 0);
        // Broke: the next level is refused
        prop_assert!(actions.fortify(&state, NodeId(0), PlayerId(1)).is_err());
    }
}
