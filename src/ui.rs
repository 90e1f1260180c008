use crossbeam_channel::{bounded, Receiver, Sender};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::game::{EntityDef, EntityFactory, EntityId, Game};
use crate::logging::LogSink;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub wx: f32,
    pub wy: f32,
    pub bx: f32,
    pub by: f32,
}

impl Anchor {
    pub const CENTER: Anchor = Anchor { wx: 0.5, wy: 0.5, bx: 0.5, by: 0.5 };
    pub const BOTTOM: Anchor = Anchor { wx: 0.5, wy: 0.0, bx: 0.5, by: 0.0 };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PanelId(pub u32);

#[derive(Debug)]
pub enum Panel {
    Viewer(HouseViewer),
    MainBar(MainBar),
    Placer(EntityPlacer),
    MapSelector(MapSelector),
}

impl Panel {
    pub fn label(&self) -> &'static str {
        match self {
            Panel::Viewer(_) => "viewer",
            Panel::MainBar(_) => "main_bar",
            Panel::Placer(_) => "entity_placer",
            Panel::MapSelector(_) => "map_selector",
        }
    }
}

#[derive(Debug)]
pub struct AnchoredPanel {
    pub id: PanelId,
    pub anchor: Anchor,
    pub panel: Panel,
}

/// Root of the widget tree the session renders every frame.
#[derive(Debug)]
pub struct AnchorBox {
    pub dims: (u32, u32),
    next_id: u32,
    children: Vec<AnchoredPanel>,
}

impl AnchorBox {
    pub fn new(dims: (u32, u32)) -> Self {
        Self { dims, next_id: 1, children: Vec::new() }
    }

    pub fn add_child(&mut self, panel: Panel, anchor: Anchor) -> PanelId {
        let id = PanelId(self.next_id);
        self.next_id += 1;
        self.children.push(AnchoredPanel { id, anchor, panel });
        id
    }

    pub fn remove_child(&mut self, id: PanelId) -> Option<Panel> {
        let index = self.children.iter().position(|child| child.id == id)?;
        Some(self.children.remove(index).panel)
    }

    pub fn children(&self) -> &[AnchoredPanel] {
        &self.children
    }

    pub fn find(&self, id: PanelId) -> Option<&Panel> {
        self.children.iter().find(|child| child.id == id).map(|child| &child.panel)
    }

    pub fn placer_mut(&mut self) -> Option<&mut EntityPlacer> {
        self.children.iter_mut().find_map(|child| match &mut child.panel {
            Panel::Placer(placer) => Some(placer),
            _ => None,
        })
    }

    pub fn map_selector_mut(&mut self) -> Option<&mut MapSelector> {
        self.children.iter_mut().find_map(|child| match &mut child.panel {
            Panel::MapSelector(selector) => Some(selector),
            _ => None,
        })
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.children.iter().map(|child| child.panel.label()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HouseViewer {
    pub house: String,
    pub zoom: f32,
    pub edit_mode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Justification {
    Left,
    #[default]
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown justification '{0}'")]
pub struct UnknownJustification(pub String);

impl FromStr for Justification {
    type Err = UnknownJustification;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Justification::Left),
            "center" => Ok(Justification::Center),
            "right" => Ok(Justification::Right),
            other => Err(UnknownJustification(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextArea {
    pub x: i32,
    pub y: i32,
    pub size: u32,
    #[serde(default = "TextArea::default_justification")]
    pub justification: String,
}

impl TextArea {
    fn default_justification() -> String {
        "center".to_string()
    }

    fn at(x: i32, y: i32) -> Self {
        Self { x, y, size: 12, justification: Self::default_justification() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainBarLayout {
    pub name: TextArea,
    pub ap: TextArea,
    pub hp: TextArea,
    pub corpus: TextArea,
    pub ego: TextArea,
}

impl Default for MainBarLayout {
    fn default() -> Self {
        Self {
            name: TextArea::at(512, 90),
            ap: TextArea::at(420, 60),
            hp: TextArea::at(420, 40),
            corpus: TextArea::at(604, 60),
            ego: TextArea::at(604, 40),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub size: u32,
    pub justification: Justification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MainBarButton {
    EndTurn,
    UnitLeft,
    UnitRight,
    ActionLeft,
    ActionRight,
}

#[derive(Debug, Clone)]
pub struct MainBar {
    layout: MainBarLayout,
}

impl MainBar {
    pub fn new(layout: MainBarLayout) -> Self {
        Self { layout }
    }

    /// Text for the selected unit. Unknown justifications are reported and
    /// rendered centered.
    pub fn lines(&self, game: &Game, log: &dyn LogSink) -> Vec<TextLine> {
        let Some(ent) = game.selected() else {
            return Vec::new();
        };
        let fields = [
            (&self.layout.name, ent.name.clone()),
            (&self.layout.ap, format!("Ap:{}/{}", ent.ap_cur, ent.stats.ap_max)),
            (&self.layout.hp, format!("Hp:{}/{}", ent.hp_cur, ent.stats.hp_max)),
            (&self.layout.corpus, format!("Corpus:{}", ent.stats.corpus)),
            (&self.layout.ego, format!("Ego:{}", ent.stats.ego)),
        ];
        fields
            .into_iter()
            .map(|(area, text)| {
                let justification = area.justification.parse().unwrap_or_else(|err: UnknownJustification| {
                    log.warn(&format!("{err} in main gui bar."));
                    Justification::Center
                });
                TextLine { text, x: area.x, y: area.y, size: area.size, justification }
            })
            .collect()
    }

    /// Applies a button press to the game. Returns true when the press ended
    /// the turn, in which case the caller starts the script's next round.
    pub fn press(&self, button: MainBarButton, game: &mut Game) -> bool {
        match button {
            MainBarButton::EndTurn => {
                game.end_turn();
                return true;
            }
            MainBarButton::UnitLeft => game.select_prev(),
            MainBarButton::UnitRight => game.select_next(),
            MainBarButton::ActionLeft => game.select_prev_action(),
            MainBarButton::ActionRight => game.select_next_action(),
        }
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    #[error("placement already finished")]
    Finished,
    #[error("'{0}' is not on the placement roster")]
    NotOnRoster(String),
    #[error("'{name}' costs {cost} but only {remaining} points remain")]
    TooExpensive { name: String, cost: i32, remaining: i32 },
    #[error("({0},{1}) is not a free cell in a matching spawn point")]
    BadCell(i32, i32),
}

#[derive(Debug, Clone)]
struct RosterEntry {
    def: EntityDef,
    cost: i32,
}

/// Interactive step where the player spends points placing entities on
/// spawn cells whose spawn point name matches a pattern.
#[derive(Debug)]
pub struct EntityPlacer {
    cells: Vec<(i32, i32)>,
    points: i32,
    roster: Vec<RosterEntry>,
    placed: Vec<EntityId>,
    result: Option<Sender<Vec<EntityId>>>,
}

impl EntityPlacer {
    /// Roster names the factory cannot build are reported and dropped. When
    /// nothing can be placed the result is delivered immediately.
    pub fn new(
        game: &Game,
        pattern: &Regex,
        points: i32,
        roster: &[(String, i32)],
        factory: &dyn EntityFactory,
        log: &dyn LogSink,
    ) -> (Self, Receiver<Vec<EntityId>>) {
        let (tx, rx) = bounded(1);
        let cells = game
            .floor()
            .spawns
            .iter()
            .filter(|sp| pattern.is_match(&sp.name))
            .flat_map(|sp| sp.cells())
            .collect();
        let roster = roster
            .iter()
            .filter_map(|(name, cost)| match factory.make(name) {
                Some(def) => Some(RosterEntry { def, cost: *cost }),
                None => {
                    log.error(&format!("Cannot make an entity named '{name}', no such thing."));
                    None
                }
            })
            .collect();
        let mut placer = Self { cells, points, roster, placed: Vec::new(), result: Some(tx) };
        if !placer.can_place_more(game) {
            placer.finish();
        }
        (placer, rx)
    }

    pub fn remaining_points(&self) -> i32 {
        self.points
    }

    pub fn is_done(&self) -> bool {
        self.result.is_none()
    }

    pub fn placed(&self) -> &[EntityId] {
        &self.placed
    }

    pub fn free_cells(&self, game: &Game) -> Vec<(i32, i32)> {
        self.cells.iter().copied().filter(|&(x, y)| !game.is_cell_occupied(x, y)).collect()
    }

    fn can_place_more(&self, game: &Game) -> bool {
        self.roster.iter().any(|entry| entry.cost <= self.points) && !self.free_cells(game).is_empty()
    }

    pub fn place(&mut self, game: &mut Game, name: &str, x: i32, y: i32) -> Result<EntityId, PlacementError> {
        if self.is_done() {
            return Err(PlacementError::Finished);
        }
        let entry = self
            .roster
            .iter()
            .find(|entry| entry.def.name == name)
            .ok_or_else(|| PlacementError::NotOnRoster(name.to_string()))?;
        if entry.cost > self.points {
            return Err(PlacementError::TooExpensive {
                name: name.to_string(),
                cost: entry.cost,
                remaining: self.points,
            });
        }
        if !self.cells.contains(&(x, y)) || game.is_cell_occupied(x, y) {
            return Err(PlacementError::BadCell(x, y));
        }
        self.points -= entry.cost;
        let id = game.spawn_entity(entry.def.clone(), x, y);
        self.placed.push(id);
        if !self.can_place_more(game) {
            self.finish();
        }
        Ok(id)
    }

    /// Delivers whatever has been placed so far. Later calls do nothing.
    pub fn finish(&mut self) {
        if let Some(result) = self.result.take() {
            let _ = result.send(self.placed.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no map named '{0}'")]
pub struct UnknownMap(pub String);

#[derive(Debug)]
pub struct MapSelector {
    maps: Vec<String>,
    result: Option<Sender<String>>,
}

impl MapSelector {
    pub fn new(maps: Vec<String>) -> (Self, Receiver<String>) {
        let (tx, rx) = bounded(1);
        (Self { maps, result: Some(tx) }, rx)
    }

    pub fn maps(&self) -> &[String] {
        &self.maps
    }

    pub fn is_done(&self) -> bool {
        self.result.is_none()
    }

    pub fn choose(&mut self, name: &str) -> Result<(), UnknownMap> {
        if !self.maps.iter().any(|map| map == name) {
            return Err(UnknownMap(name.to_string()));
        }
        if let Some(result) = self.result.take() {
            let _ = result.send(name.to_string());
        }
        Ok(())
    }
}
