//! Operations scripts may call into the game. Every operation opens the sync
//! gate before touching the session and closes it before returning. Operations
//! that wait on the player open the gate twice: once to attach their panel and
//! once to detach it, and hold nothing while the player decides.
//!
//! User errors (unknown names, bad patterns, out-of-range ids) are logged and
//! answered with `()`, leaving the decision to the script.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::Rng;
use regex::Regex;
use rhai::{Array, Dynamic, Engine, EvalAltResult, FLOAT, INT};

use crate::game::{Game, LosMode, LosModeKind, Side};
use crate::gate::{GateGuard, SyncGate};
use crate::marshal::{from_script, stringify_param, to_script, EntitySnapshot, Point, SpawnPointInfo, SpawnPointRef};
use crate::session::{Collaborators, Session};
use crate::ui::{Anchor, EntityPlacer, MainBar, MainBarLayout, MapSelector, Panel};

type OpResult = Result<Dynamic, Box<EvalAltResult>>;

#[derive(Clone)]
pub struct Operations {
    gate: SyncGate<Session>,
    collab: Collaborators,
    main_bar: MainBarLayout,
    rng: Rc<RefCell<StdRng>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Tried to access an unknown spawn point: {0}")]
pub struct UnknownSpawnPoint(pub i64);

/// Picks a free cell uniformly among every unoccupied cell of the listed
/// spawn points, in a single reservoir pass.
pub fn choose_spawn_cell(
    game: &Game,
    spawn_ids: &[i64],
    rng: &mut impl Rng,
) -> Result<Option<(i32, i32)>, UnknownSpawnPoint> {
    let spawns = &game.floor().spawns;
    let mut chosen = None;
    let mut count = 0u32;
    for &id in spawn_ids {
        let sp = usize::try_from(id).ok().and_then(|index| spawns.get(index)).ok_or(UnknownSpawnPoint(id))?;
        for (x, y) in sp.cells() {
            if game.is_cell_occupied(x, y) {
                continue;
            }
            count += 1;
            if rng.gen_range(0..count) == 0 {
                chosen = Some((x, y));
            }
        }
    }
    Ok(chosen)
}

fn to_i32(value: INT, what: &str) -> Result<i32, String> {
    i32::try_from(value).map_err(|_| format!("{what} {value} is out of range"))
}

impl Operations {
    pub fn new(gate: SyncGate<Session>, collab: Collaborators, main_bar: MainBarLayout, rng: StdRng) -> Self {
        Self { gate, collab, main_bar, rng: Rc::new(RefCell::new(rng)) }
    }

    fn enter(&self) -> Result<GateGuard<'_, Session>, Box<EvalAltResult>> {
        self.gate.enter().map_err(|err| err.to_string().into())
    }

    /// Logs and answers `()` for operation-level errors.
    fn fail(&self, message: impl AsRef<str>) -> OpResult {
        self.collab.log.error(message.as_ref());
        Ok(Dynamic::UNIT)
    }

    fn load_house(&self, name: &str) -> OpResult {
        let mut session = self.enter()?;
        let house = match self.collab.houses.house(name) {
            Some(house) if !house.floors.is_empty() => house,
            _ => return self.fail(format!("No house exists with the name '{name}'.")),
        };
        let Some(game) = Game::new(house, Side::Explorers) else {
            return self.fail(format!("No house exists with the name '{name}'."));
        };
        session.install_game(game);
        tracing::info!(target: "script.ops", house = name, "loaded house");
        Ok(Dynamic::UNIT)
    }

    fn show_main_bar(&self, show: bool) -> OpResult {
        let mut session = self.enter()?;
        // Remove it regardless of whether or not it should be shown.
        if let Some(id) = session.main_bar.take() {
            session.ui.remove_child(id);
        }
        if show {
            if session.game.is_none() {
                return self.fail("Cannot show the main bar before a house is loaded.");
            }
            let bar = MainBar::new(self.main_bar.clone());
            session.main_bar = Some(session.ui.add_child(Panel::MainBar(bar), Anchor::BOTTOM));
        }
        Ok(Dynamic::UNIT)
    }

    fn spawn_at(&self, name: &str, x: INT, y: INT) -> OpResult {
        let mut session = self.enter()?;
        let (x, y) = match (to_i32(x, "x"), to_i32(y, "y")) {
            (Ok(x), Ok(y)) => (x, y),
            (Err(err), _) | (_, Err(err)) => return self.fail(err),
        };
        let Some(game) = session.game.as_mut() else {
            return self.fail("Cannot spawn entities before a house is loaded.");
        };
        let Some(def) = self.collab.entities.make(name) else {
            return self.fail(format!("Cannot make an entity named '{name}', no such thing."));
        };
        if game.is_cell_occupied(x, y) {
            return self.fail(format!("Cannot spawn '{name}' at ({x},{y}), the cell is occupied."));
        }
        let id = game.spawn_entity(def, x, y);
        match game.entity(id) {
            Some(ent) => to_script(&EntitySnapshot::from(ent)),
            None => Ok(Dynamic::UNIT),
        }
    }

    fn spawn_points_matching(&self, pattern: &str) -> OpResult {
        let session = self.enter()?;
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(err) => return self.fail(format!("Failed to compile regexp '{pattern}': {err}")),
        };
        let Some(game) = session.game.as_ref() else {
            return self.fail("Cannot list spawn points before a house is loaded.");
        };
        let matching: Vec<SpawnPointInfo> = game
            .floor()
            .spawns
            .iter()
            .enumerate()
            .filter(|(_, sp)| re.is_match(&sp.name))
            .map(|(index, sp)| SpawnPointInfo::new(index, sp))
            .collect();
        to_script(&matching)
    }

    fn spawn_somewhere(&self, name: &str, spawns: Array) -> OpResult {
        let mut session = self.enter()?;
        let mut ids = Vec::with_capacity(spawns.len());
        for sp in &spawns {
            match from_script::<SpawnPointRef>(sp) {
                Ok(sp) => ids.push(sp.id),
                Err(err) => return self.fail(format!("Expected a spawn point, got {sp}: {err}")),
            }
        }
        let Some(game) = session.game.as_mut() else {
            return self.fail("Cannot spawn entities before a house is loaded.");
        };
        let chosen = choose_spawn_cell(game, &ids, &mut *self.rng.borrow_mut());
        let (x, y) = match chosen {
            Ok(Some(cell)) => cell,
            Ok(None) => return self.fail("Unable to find an available position to spawn"),
            Err(err) => return self.fail(err.to_string()),
        };
        let Some(def) = self.collab.entities.make(name) else {
            return self.fail(format!("Cannot make an entity named '{name}', no such thing."));
        };
        game.spawn_entity(def, x, y);
        to_script(&Point { x, y })
    }

    fn place_entities(&self, pattern: &str, points: INT, roster: Array) -> OpResult {
        let mut entries = Vec::with_capacity(roster.len());
        for entry in &roster {
            match from_script::<(String, INT)>(entry) {
                Ok((name, cost)) => entries.push((name, to_i32(cost, "cost").unwrap_or(i32::MAX))),
                Err(err) => self.collab.log.error(&format!("Skipping malformed roster entry {entry}: {err}")),
            }
        }
        let points = to_i32(points, "points").unwrap_or(0);

        let mut session = self.enter()?;
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(err) => return self.fail(format!("Failed to compile regexp '{pattern}': {err}")),
        };
        let Some(game) = session.game.as_ref() else {
            return self.fail("Cannot place entities before a house is loaded.");
        };
        let (placer, placed_rx) =
            EntityPlacer::new(game, &re, points, &entries, self.collab.entities.as_ref(), self.collab.log());
        let panel = session.ui.add_child(Panel::Placer(placer), Anchor::CENTER);
        drop(session);

        let placed = self.gate.await_result(&placed_rx);

        let mut session = self.enter()?;
        session.ui.remove_child(panel);
        let Some(placed) = placed else {
            self.collab.log.warn("Entity placement ended without a result.");
            return to_script(&Vec::<EntitySnapshot>::new());
        };
        let snapshots: Vec<EntitySnapshot> = match session.game.as_ref() {
            Some(game) => placed.iter().filter_map(|id| game.entity(*id)).map(EntitySnapshot::from).collect(),
            None => Vec::new(),
        };
        to_script(&snapshots)
    }

    fn room_at(&self, point: Dynamic) -> OpResult {
        let session = self.enter()?;
        let point = match from_script::<Point>(&point) {
            Ok(point) => point,
            Err(err) => return self.fail(format!("Expected a point with x and y, got {point}: {err}")),
        };
        let Some(game) = session.game.as_ref() else {
            return self.fail("Cannot look up rooms before a house is loaded.");
        };
        match game.floor().room_at(point.x, point.y) {
            Some(index) => Ok(Dynamic::from(index as INT)),
            None => self.fail(format!(
                "Tried to get the room at position ({},{}), but there is no room there.",
                point.x, point.y
            )),
        }
    }

    fn set_los_mode(&self, mode: &str, rooms: Option<Array>) -> OpResult {
        let mut session = self.enter()?;
        let kind = match mode.parse::<LosModeKind>() {
            Ok(kind) => kind,
            Err(err) => return self.fail(err.to_string()),
        };
        let Some(game) = session.game.as_mut() else {
            return self.fail("Cannot set the los mode before a house is loaded.");
        };
        let mode = match kind {
            LosModeKind::None => LosMode::None,
            LosModeKind::All => LosMode::All,
            LosModeKind::Entities => LosMode::Entities,
            LosModeKind::Rooms => {
                let Some(rooms) = rooms else {
                    return self.fail(
                        "The second parameter to setLosMode should be an array of rooms if mode == 'rooms'",
                    );
                };
                let room_count = game.floor().rooms.len();
                let mut indices = Vec::with_capacity(rooms.len());
                for room in rooms {
                    match room.as_int().ok().and_then(|index| usize::try_from(index).ok()) {
                        Some(index) if index < room_count => indices.push(index),
                        _ => self.collab.log.error(&format!("Tried to reference room #{room} which doesn't exist.")),
                    }
                }
                LosMode::Rooms(indices)
            }
        };
        game.set_los_mode(mode);
        Ok(Dynamic::UNIT)
    }

    fn all_ents(&self) -> OpResult {
        let session = self.enter()?;
        let snapshots: Vec<EntitySnapshot> = match session.game.as_ref() {
            Some(game) => game.ents().iter().map(EntitySnapshot::from).collect(),
            None => Vec::new(),
        };
        to_script(&snapshots)
    }

    fn select_map(&self) -> OpResult {
        let mut session = self.enter()?;
        let maps = self.collab.houses.names();
        if maps.is_empty() {
            return self.fail("Error selecting map: no maps are available.");
        }
        let (selector, choice_rx) = MapSelector::new(maps);
        let panel = session.ui.add_child(Panel::MapSelector(selector), Anchor::CENTER);
        drop(session);

        let choice = self.gate.await_result(&choice_rx);

        let mut session = self.enter()?;
        session.ui.remove_child(panel);
        match choice {
            Some(name) => Ok(Dynamic::from(name)),
            None => self.fail("Map selection ended without a choice."),
        }
    }

    fn print(&self, args: &[Dynamic]) {
        let line = args.iter().map(stringify_param).collect::<Vec<_>>().join(" ");
        self.collab.log.info(&format!("GameScript: {line}"));
    }
}

/// Registers every script-callable operation under its script name.
pub fn register(engine: &mut Engine, ops: &Operations) {
    let sink = ops.collab.log.clone();
    engine.on_print(move |text| sink.info(&format!("GameScript: {text}")));
    let sink = ops.collab.log.clone();
    engine.on_debug(move |text, _source, pos| sink.info(&format!("GameScript debug {pos}: {text}")));

    let op = ops.clone();
    engine.register_fn("loadHouse", move |name: &str| op.load_house(name));
    let op = ops.clone();
    engine.register_fn("showMainBar", move |show: bool| op.show_main_bar(show));
    let op = ops.clone();
    engine.register_fn("spawnEntityAtPosition", move |name: &str, x: INT, y: INT| op.spawn_at(name, x, y));
    let op = ops.clone();
    engine.register_fn("getSpawnPointsMatching", move |pattern: &str| op.spawn_points_matching(pattern));
    let op = ops.clone();
    engine.register_fn("spawnEntitySomewhereInSpawnPoints", move |name: &str, spawns: Array| {
        op.spawn_somewhere(name, spawns)
    });
    let op = ops.clone();
    engine.register_fn("placeEntities", move |pattern: &str, points: INT, roster: Array| {
        op.place_entities(pattern, points, roster)
    });
    let op = ops.clone();
    engine.register_fn("roomAtPos", move |point: Dynamic| op.room_at(point));
    let op = ops.clone();
    engine.register_fn("setLosMode", move |mode: &str| op.set_los_mode(mode, None));
    let op = ops.clone();
    engine.register_fn("setLosMode", move |mode: &str, rooms: Array| op.set_los_mode(mode, Some(rooms)));
    let op = ops.clone();
    engine.register_fn("getAllEnts", move || op.all_ents());
    let op = ops.clone();
    engine.register_fn("selectMap", move || op.select_map());

    let op = ops.clone();
    engine.register_fn("log", move |a: Dynamic| op.print(&[a]));
    let op = ops.clone();
    engine.register_fn("log", move |a: Dynamic, b: Dynamic| op.print(&[a, b]));
    let op = ops.clone();
    engine.register_fn("log", move |a: Dynamic, b: Dynamic, c: Dynamic| op.print(&[a, b, c]));
    let op = ops.clone();
    engine.register_fn("log", move |a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic| op.print(&[a, b, c, d]));
    // Exact float signatures, otherwise the math package's `log` wins.
    let op = ops.clone();
    engine.register_fn("log", move |a: FLOAT| op.print(&[Dynamic::from_float(a)]));
    let op = ops.clone();
    engine.register_fn("log", move |a: FLOAT, b: FLOAT| {
        op.print(&[Dynamic::from_float(a), Dynamic::from_float(b)])
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::house::{Floor, HouseDef, SpawnPoint};
    use rand::SeedableRng;
    use std::sync::Arc;

    fn game() -> Game {
        let floor = Floor {
            spawns: vec![
                SpawnPoint { name: "a".into(), x: 0, y: 0, dx: 2, dy: 1 },
                SpawnPoint { name: "b".into(), x: 4, y: 4, dx: 1, dy: 1 },
            ],
            ..Floor::default()
        };
        Game::new(Arc::new(HouseDef { name: "manor".into(), floors: vec![floor] }), Side::Explorers)
            .expect("house has floors")
    }

    #[test]
    fn choose_spawn_cell_skips_occupied_cells() {
        let mut game = game();
        let def = crate::game::EntityDef {
            name: "x".into(),
            stats: crate::game::Stats { corpus: 1, ego: 1, hp_max: 1, ap_max: 1 },
            ..Default::default()
        };
        game.spawn_entity(def.clone(), 0, 0);
        game.spawn_entity(def, 4, 4);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            assert_eq!(choose_spawn_cell(&game, &[0, 1], &mut rng), Ok(Some((1, 0))));
        }
    }

    #[test]
    fn choose_spawn_cell_rejects_unknown_ids() {
        let game = game();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(choose_spawn_cell(&game, &[0, 9], &mut rng), Err(UnknownSpawnPoint(9)));
        assert_eq!(choose_spawn_cell(&game, &[-1], &mut rng), Err(UnknownSpawnPoint(-1)));
        assert_eq!(choose_spawn_cell(&game, &[], &mut rng), Ok(None));
    }
}
