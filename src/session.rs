use std::sync::Arc;

use serde::Serialize;

use crate::game::{EntityFactory, Game};
use crate::house::HouseProvider;
use crate::logging::{LogSink, SharedLog};
use crate::marshal::EntitySnapshot;
use crate::ui::{Anchor, AnchorBox, HouseViewer, MainBar, MainBarButton, Panel, PanelId};

pub const SCREEN_DIMS: (u32, u32) = (1024, 700);

/// Everything the render loop draws and the script mutates. Scripts reach it
/// only through gated operations.
#[derive(Debug)]
pub struct Session {
    pub ui: AnchorBox,
    pub game: Option<Game>,
    pub viewer: Option<PanelId>,
    pub main_bar: Option<PanelId>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self { ui: AnchorBox::new(SCREEN_DIMS), game: None, viewer: None, main_bar: None }
    }

    /// Swaps in a freshly loaded game with a clean widget tree showing it.
    pub fn install_game(&mut self, game: Game) {
        let viewer = HouseViewer { house: game.house().name.clone(), zoom: 62.0, edit_mode: true };
        self.ui = AnchorBox::new(SCREEN_DIMS);
        self.viewer = Some(self.ui.add_child(Panel::Viewer(viewer), Anchor::CENTER));
        self.main_bar = None;
        self.game = Some(game);
    }

    fn shown_main_bar(&self) -> Option<&MainBar> {
        match self.ui.find(self.main_bar?)? {
            Panel::MainBar(bar) => Some(bar),
            _ => None,
        }
    }

    /// Presses a button on the main bar. Returns true when the press ended the
    /// turn. Does nothing while the bar is hidden or no game is loaded.
    pub fn press_main_bar(&mut self, button: MainBarButton) -> bool {
        let Session { ui, game, main_bar, .. } = self;
        let bar = match main_bar.and_then(|id| ui.find(id)) {
            Some(Panel::MainBar(bar)) => bar,
            _ => return false,
        };
        match game.as_mut() {
            Some(game) => bar.press(button, game),
            None => false,
        }
    }

    /// Text the main bar currently shows for the selected unit.
    pub fn main_bar_text(&self, log: &dyn LogSink) -> Vec<String> {
        match (self.shown_main_bar(), self.game.as_ref()) {
            (Some(bar), Some(game)) => bar.lines(game, log).into_iter().map(|line| line.text).collect(),
            _ => Vec::new(),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let game = self.game.as_ref();
        SessionSummary {
            house: game.map(|game| game.house().name.clone()),
            turn: game.map(|game| game.turn),
            los_mode: game.map(|game| game.los_mode().to_string()),
            selected: game.and_then(|game| game.selected()).map(|ent| ent.name.clone()),
            entities: game.map(|game| game.ents().iter().map(EntitySnapshot::from).collect()).unwrap_or_default(),
            panels: self.ui.labels().into_iter().map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub house: Option<String>,
    pub turn: Option<u32>,
    pub los_mode: Option<String>,
    pub selected: Option<String>,
    pub entities: Vec<EntitySnapshot>,
    pub panels: Vec<String>,
}

/// External services the script operations consult.
#[derive(Clone)]
pub struct Collaborators {
    pub houses: Arc<dyn HouseProvider>,
    pub entities: Arc<dyn EntityFactory>,
    pub log: SharedLog,
}

impl Collaborators {
    pub fn new(houses: Arc<dyn HouseProvider>, entities: Arc<dyn EntityFactory>, log: SharedLog) -> Self {
        Self { houses, entities, log }
    }

    pub fn log(&self) -> &dyn LogSink {
        self.log.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{EntityDef, Side};
    use crate::house::{Floor, HouseDef};
    use crate::logging::MemoryLog;
    use crate::ui::MainBarLayout;

    #[test]
    fn main_bar_presses_need_a_shown_bar() {
        let house = Arc::new(HouseDef { name: "manor".into(), floors: vec![Floor::default()] });
        let mut session = Session::new();
        session.install_game(Game::new(house, Side::Explorers).expect("house has floors"));
        assert!(!session.press_main_bar(MainBarButton::EndTurn));

        let bar = MainBar::new(MainBarLayout::default());
        session.main_bar = Some(session.ui.add_child(Panel::MainBar(bar), Anchor::BOTTOM));
        if let Some(game) = session.game.as_mut() {
            game.spawn_entity(EntityDef { name: "Teen".into(), ..EntityDef::default() }, 0, 0);
        }
        assert!(!session.press_main_bar(MainBarButton::UnitRight));
        let log = MemoryLog::new();
        assert_eq!(session.main_bar_text(&*log).first().map(String::as_str), Some("Teen"));
        assert_eq!(session.summary().selected.as_deref(), Some("Teen"));
        assert!(session.press_main_bar(MainBarButton::EndTurn));
        assert_eq!(session.summary().turn, Some(2));
    }
}
