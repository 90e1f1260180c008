use std::collections::BTreeMap;
use std::sync::Arc;

use kestrel_script::game::{EntityDef, Game, Side, Stats};
use kestrel_script::house::{Floor, HouseDef, SpawnPoint};
use kestrel_script::ops::choose_spawn_cell;
use rand::rngs::StdRng;
use rand::SeedableRng;

// Chi-square critical value for 3 degrees of freedom at p = 0.001.
const CHI_SQUARE_3_DOF: f64 = 16.27;

fn game() -> Game {
    let floor = Floor {
        spawns: vec![
            SpawnPoint { name: "crypt".into(), x: 0, y: 0, dx: 2, dy: 2 },
            SpawnPoint { name: "cellar".into(), x: 10, y: 10, dx: 2, dy: 1 },
        ],
        ..Floor::default()
    };
    Game::new(Arc::new(HouseDef { name: "manor".into(), floors: vec![floor] }), Side::Haunts).expect("floors")
}

fn chi_square(counts: &BTreeMap<(i32, i32), u32>, trials: u32) -> f64 {
    let expected = f64::from(trials) / counts.len() as f64;
    counts.values().map(|&seen| (f64::from(seen) - expected).powi(2) / expected).sum()
}

#[test]
fn free_cells_are_chosen_uniformly() {
    let mut game = game();
    let ghost = EntityDef {
        name: "Ghost".into(),
        stats: Stats { corpus: 1, ego: 1, hp_max: 1, ap_max: 1 },
        ..EntityDef::default()
    };
    // Six cells in total; occupying two leaves K = 4 candidates across both points.
    game.spawn_entity(ghost.clone(), 0, 0);
    game.spawn_entity(ghost, 1, 1);

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let trials = 40_000;
    let mut counts = BTreeMap::new();
    for _ in 0..trials {
        let cell = choose_spawn_cell(&game, &[0, 1], &mut rng).expect("known ids").expect("a free cell");
        *counts.entry(cell).or_insert(0u32) += 1;
    }

    let cells: Vec<_> = counts.keys().copied().collect();
    assert_eq!(cells, vec![(0, 1), (1, 0), (10, 10), (11, 10)]);
    let statistic = chi_square(&counts, trials);
    assert!(statistic < CHI_SQUARE_3_DOF, "chi-square {statistic} over {counts:?}");
}

#[test]
fn fully_occupied_points_yield_nothing() {
    let mut game = game();
    let ghost = EntityDef {
        name: "Ghost".into(),
        stats: Stats { corpus: 1, ego: 1, hp_max: 1, ap_max: 1 },
        ..EntityDef::default()
    };
    game.spawn_entity(ghost.clone(), 10, 10);
    game.spawn_entity(ghost, 11, 10);
    let mut rng = StdRng::seed_from_u64(1);
    assert_eq!(choose_spawn_cell(&game, &[1], &mut rng), Ok(None));
}
