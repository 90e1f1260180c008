use anyhow::{Context, Result};
use glam::IVec2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::house::{Floor, HouseDef};

pub type EntityId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    #[default]
    Explorers,
    Haunts,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Side::Explorers => Side::Haunts,
            Side::Haunts => Side::Explorers,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stats {
    pub corpus: i32,
    pub ego: i32,
    pub hp_max: i32,
    pub ap_max: i32,
}

/// An action an entity can prepare, costing `ap` action points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDef {
    pub name: String,
    #[serde(default)]
    pub ap: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: String,
    pub stats: Stats,
    #[serde(default)]
    pub side: Side,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
}

/// Live entity owned by the [`Game`]. Scripts only ever see snapshots of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub pos: IVec2,
    pub side: Side,
    pub stats: Stats,
    pub actions: Vec<ActionDef>,
    pub hp_cur: i32,
    pub ap_cur: i32,
}

impl Entity {
    fn can_prep(&self, action: &ActionDef) -> bool {
        action.ap <= self.ap_cur
    }
}

/// Builds entity definitions by name, `None` when no such thing exists.
pub trait EntityFactory: Send + Sync {
    fn make(&self, name: &str) -> Option<EntityDef>;
}

#[derive(Debug, Default, Clone)]
pub struct EntityCatalog {
    defs: BTreeMap<String, EntityDef>,
}

impl EntityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, def: EntityDef) -> Self {
        self.defs.insert(def.name.clone(), def);
        self
    }

    /// Each `*.json` file holds a list of entity definitions.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut catalog = Self::new();
        for entry in fs::read_dir(dir).with_context(|| format!("Scanning entities under {}", dir.display()))? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).with_context(|| format!("Reading entities {}", path.display()))?;
            let defs: Vec<EntityDef> = serde_json::from_slice(&bytes)
                .with_context(|| format!("Parsing entities {}", path.display()))?;
            for def in defs {
                catalog.defs.insert(def.name.clone(), def);
            }
        }
        Ok(catalog)
    }
}

impl EntityFactory for EntityCatalog {
    fn make(&self, name: &str) -> Option<EntityDef> {
        self.defs.get(name).cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LosModeKind {
    None,
    All,
    Entities,
    Rooms,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown los mode '{0}'")]
pub struct UnknownLosMode(pub String);

impl FromStr for LosModeKind {
    type Err = UnknownLosMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(LosModeKind::None),
            "all" => Ok(LosModeKind::All),
            "entities" => Ok(LosModeKind::Entities),
            "rooms" => Ok(LosModeKind::Rooms),
            other => Err(UnknownLosMode(other.to_string())),
        }
    }
}

/// Which cells are revealed to the viewer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LosMode {
    None,
    #[default]
    All,
    Entities,
    Rooms(Vec<usize>),
}

impl fmt::Display for LosMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LosMode::None => write!(f, "none"),
            LosMode::All => write!(f, "all"),
            LosMode::Entities => write!(f, "entities"),
            LosMode::Rooms(rooms) => write!(f, "rooms{rooms:?}"),
        }
    }
}

/// Live state of one loaded level.
#[derive(Debug, Clone)]
pub struct Game {
    house: Arc<HouseDef>,
    pub side: Side,
    pub turn: u32,
    ents: Vec<Entity>,
    next_id: EntityId,
    los: LosMode,
    selected: Option<EntityId>,
    current_action: Option<usize>,
}

impl Game {
    /// Returns `None` when the house has no floors to play on.
    pub fn new(house: Arc<HouseDef>, side: Side) -> Option<Self> {
        house.ground()?;
        Some(Self {
            house,
            side,
            turn: 1,
            ents: Vec::new(),
            next_id: 1,
            los: LosMode::default(),
            selected: None,
            current_action: None,
        })
    }

    pub fn house(&self) -> &Arc<HouseDef> {
        &self.house
    }

    pub fn floor(&self) -> &Floor {
        // `new` rejects houses without floors.
        &self.house.floors[0]
    }

    pub fn ents(&self) -> &[Entity] {
        &self.ents
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.ents.iter().find(|ent| ent.id == id)
    }

    pub fn spawn_entity(&mut self, def: EntityDef, x: i32, y: i32) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        self.ents.push(Entity {
            id,
            name: def.name,
            pos: IVec2::new(x, y),
            side: def.side,
            hp_cur: def.stats.hp_max,
            ap_cur: def.stats.ap_max,
            stats: def.stats,
            actions: def.actions,
        });
        id
    }

    pub fn is_cell_occupied(&self, x: i32, y: i32) -> bool {
        let cell = IVec2::new(x, y);
        self.ents.iter().any(|ent| ent.pos == cell) || self.floor().is_blocked(x, y)
    }

    pub fn los_mode(&self) -> &LosMode {
        &self.los
    }

    pub fn set_los_mode(&mut self, mode: LosMode) {
        self.los = mode;
    }

    /// Whether the cell is revealed under the current line-of-sight mode.
    pub fn is_visible(&self, x: i32, y: i32) -> bool {
        match &self.los {
            LosMode::None => false,
            LosMode::All => true,
            LosMode::Entities => self.ents.iter().any(|ent| {
                let delta = (ent.pos - IVec2::new(x, y)).abs();
                delta.x.max(delta.y) <= ent.stats.ego.max(1)
            }),
            LosMode::Rooms(rooms) => self.floor().room_at(x, y).map_or(false, |room| rooms.contains(&room)),
        }
    }

    pub fn round_number(&self) -> u32 {
        (self.turn + 1) / 2
    }

    pub fn is_player_side(&self) -> bool {
        self.side == Side::Explorers
    }

    pub fn end_turn(&mut self) {
        self.turn += 1;
        self.side = self.side.other();
        self.current_action = None;
        for ent in &mut self.ents {
            ent.ap_cur = ent.stats.ap_max;
        }
    }

    pub fn selected(&self) -> Option<&Entity> {
        self.selected.and_then(|id| self.entity(id))
    }

    pub fn select(&mut self, id: Option<EntityId>) {
        self.selected = id.filter(|id| self.entity(*id).is_some());
        self.current_action = None;
    }

    /// Selects the next entity on the side whose turn it is, wrapping around.
    pub fn select_next(&mut self) {
        let start = self.selected_index();
        let len = self.ents.len();
        let after = start.map_or(0, |index| index + 1);
        let wrapped = (after..len).chain(0..=start.unwrap_or(0).min(len.saturating_sub(1)));
        self.select_first_of_side(wrapped);
    }

    /// Selects the previous entity on the side whose turn it is, wrapping around.
    pub fn select_prev(&mut self) {
        let len = self.ents.len();
        let start = self.selected_index().unwrap_or(len);
        let wrapped = (0..start).rev().chain((start.min(len)..len).rev());
        self.select_first_of_side(wrapped);
    }

    fn selected_index(&self) -> Option<usize> {
        self.selected.and_then(|id| self.ents.iter().position(|ent| ent.id == id))
    }

    fn select_first_of_side(&mut self, order: impl Iterator<Item = usize>) {
        self.current_action = None;
        let side = self.side;
        let found = order.filter_map(|index| self.ents.get(index)).find(|ent| ent.side == side).map(|ent| ent.id);
        if found.is_some() {
            self.selected = found;
        }
    }

    pub fn current_action(&self) -> Option<&ActionDef> {
        let index = self.current_action?;
        self.selected()?.actions.get(index)
    }

    /// Moves to the next action of the selected entity it can afford.
    pub fn select_next_action(&mut self) {
        let Some(ent) = self.selected() else {
            return;
        };
        let start = self.current_action.map_or(0, |index| index + 1);
        let found = (start..ent.actions.len()).find(|&index| ent.can_prep(&ent.actions[index]));
        if found.is_some() {
            self.current_action = found;
        }
    }

    /// Moves to the previous action of the selected entity it can afford.
    pub fn select_prev_action(&mut self) {
        let Some(ent) = self.selected() else {
            return;
        };
        let start = self.current_action.unwrap_or(ent.actions.len());
        let found = (0..start).rev().find(|&index| ent.can_prep(&ent.actions[index]));
        if found.is_some() {
            self.current_action = found;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::house::{Furniture, Room};

    fn game() -> Game {
        let floor = Floor {
            rooms: vec![Room { name: "hall".into(), x: 0, y: 0, dx: 4, dy: 4 }],
            furniture: vec![Furniture { name: "bed".into(), x: 3, y: 3, dx: 1, dy: 1 }],
            spawns: Vec::new(),
        };
        Game::new(Arc::new(HouseDef { name: "manor".into(), floors: vec![floor] }), Side::Explorers)
            .expect("house has floors")
    }

    fn def(name: &str) -> EntityDef {
        EntityDef {
            name: name.into(),
            stats: Stats { corpus: 3, ego: 2, hp_max: 7, ap_max: 5 },
            ..EntityDef::default()
        }
    }

    #[test]
    fn rejects_house_without_floors() {
        let empty = Arc::new(HouseDef { name: "void".into(), floors: Vec::new() });
        assert!(Game::new(empty, Side::Haunts).is_none());
    }

    #[test]
    fn spawn_fills_pools_and_occupies_cell() {
        let mut game = game();
        let id = game.spawn_entity(def("ghost"), 1, 2);
        let ent = game.entity(id).expect("spawned");
        assert_eq!((ent.hp_cur, ent.ap_cur), (7, 5));
        assert!(game.is_cell_occupied(1, 2));
        assert!(game.is_cell_occupied(3, 3), "furniture blocks cells");
        assert!(!game.is_cell_occupied(0, 0));
    }

    #[test]
    fn los_kind_parsing_rejects_unknown_modes() {
        assert_eq!("rooms".parse::<LosModeKind>(), Ok(LosModeKind::Rooms));
        assert_eq!("fog".parse::<LosModeKind>(), Err(UnknownLosMode("fog".into())));
    }

    #[test]
    fn visibility_follows_mode() {
        let mut game = game();
        assert!(game.is_visible(9, 9));
        game.set_los_mode(LosMode::Rooms(vec![0]));
        assert!(game.is_visible(1, 1));
        assert!(!game.is_visible(9, 9));
        game.set_los_mode(LosMode::None);
        assert!(!game.is_visible(1, 1));
    }

    #[test]
    fn rounds_advance_every_two_turns() {
        let mut game = game();
        assert_eq!((game.round_number(), game.is_player_side()), (1, true));
        game.end_turn();
        assert_eq!((game.round_number(), game.is_player_side()), (1, false));
        game.end_turn();
        assert_eq!((game.round_number(), game.is_player_side()), (2, true));
    }

    #[test]
    fn selection_cycles_through_the_current_side() {
        let mut game = game();
        let a = game.spawn_entity(def("a"), 0, 0);
        game.spawn_entity(EntityDef { side: Side::Haunts, ..def("ghost") }, 2, 0);
        let b = game.spawn_entity(def("b"), 1, 0);
        game.select_next();
        assert_eq!(game.selected().map(|e| e.id), Some(a));
        game.select_next();
        assert_eq!(game.selected().map(|e| e.id), Some(b));
        game.select_next();
        assert_eq!(game.selected().map(|e| e.id), Some(a));
        game.select_prev();
        assert_eq!(game.selected().map(|e| e.id), Some(b));
        game.select_prev();
        assert_eq!(game.selected().map(|e| e.id), Some(a));

        game.end_turn();
        game.select_next();
        assert_eq!(game.selected().map(|e| e.name.as_str()), Some("ghost"));
        game.select_prev();
        assert_eq!(game.selected().map(|e| e.name.as_str()), Some("ghost"));
    }

    #[test]
    fn selection_ignores_an_empty_side() {
        let mut game = game();
        game.spawn_entity(EntityDef { side: Side::Haunts, ..def("ghost") }, 2, 0);
        game.select_next();
        assert!(game.selected().is_none());
        game.select_prev();
        assert!(game.selected().is_none());
    }

    #[test]
    fn action_selection_skips_unaffordable_actions() {
        let mut game = game();
        let actions = vec![
            ActionDef { name: "move".into(), ap: 1 },
            ActionDef { name: "banish".into(), ap: 9 },
            ActionDef { name: "search".into(), ap: 2 },
        ];
        let id = game.spawn_entity(EntityDef { actions, ..def("priest") }, 0, 0);
        game.select_next_action();
        assert!(game.current_action().is_none(), "nothing selected");

        game.select(Some(id));
        game.select_next_action();
        assert_eq!(game.current_action().map(|a| a.name.as_str()), Some("move"));
        game.select_next_action();
        assert_eq!(game.current_action().map(|a| a.name.as_str()), Some("search"));
        game.select_next_action();
        assert_eq!(game.current_action().map(|a| a.name.as_str()), Some("search"), "stays on the last one");
        game.select_prev_action();
        assert_eq!(game.current_action().map(|a| a.name.as_str()), Some("move"));
        game.select_next();
        assert!(game.current_action().is_none(), "changing unit clears the action");
    }
}
