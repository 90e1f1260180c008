//! Headless driver that plays a game script through a simulated render loop.
//! The loop pumps the gate every frame and stands in for the player whenever
//! the script opens an interactive panel.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::ScriptConfig;
use crate::events::Action;
use crate::game::EntityCatalog;
use crate::house::HouseCatalog;
use crate::logging::{LogSink, MemoryLog};
use crate::round::{RoundCoordinator, RoundError, RoundInfo};
use crate::scripts::{InitStatus, ScriptContext};
use crate::session::{Collaborators, Session, SessionSummary};
use crate::ui::MainBarButton;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessFixture {
    #[serde(default = "default_main_script")]
    pub script: String,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    #[serde(default)]
    pub actions: Vec<FixtureAction>,
    /// Answer for map selection panels; the first listed map otherwise.
    #[serde(default)]
    pub map_choice: Option<String>,
    /// Placements attempted, in order, whenever a placement panel is open.
    #[serde(default)]
    pub placements: Vec<FixturePlacement>,
    /// Main bar buttons pressed at the start of every round.
    #[serde(default)]
    pub bar_presses: Vec<MainBarButton>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixtureAction {
    pub name: String,
    pub actor: u32,
    #[serde(default)]
    pub target: Option<[i32; 2]>,
    /// Restricts the action to one round; it is reported every round otherwise.
    #[serde(default)]
    pub round: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixturePlacement {
    pub name: String,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HarnessOutput {
    pub script: String,
    pub init: String,
    pub rounds: Vec<RoundReport>,
    pub logs: Vec<String>,
    pub main_bar: Vec<String>,
    pub session: SessionSummary,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RoundReport {
    pub index: u32,
    pub round: u32,
    pub player_side: bool,
    pub actions: usize,
    pub outcome: String,
    pub selected: Option<String>,
    pub action: Option<String>,
}

fn default_main_script() -> String {
    "main.rhai".to_string()
}

fn default_rounds() -> u32 {
    2
}

pub fn load_fixture(path: impl AsRef<Path>) -> Result<HarnessFixture> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening fixture '{}'", path.display()))?;
    serde_json::from_reader(file).with_context(|| format!("parsing fixture '{}'", path.display()))
}

/// Loads the catalogs under `config`, runs the fixture's script and reports
/// what happened. Script failures are part of the report, not errors; only
/// unreadable data or a script that fails to load is.
pub fn run_fixture(fixture: &HarnessFixture, config: &ScriptConfig) -> Result<HarnessOutput> {
    let houses = HouseCatalog::load_dir(config.levels_path())?;
    let entities = EntityCatalog::load_dir(config.entities_path())?;
    let log = MemoryLog::new();
    let collab = Collaborators::new(Arc::new(houses), Arc::new(entities), log.clone());
    let timeout = config.phase_timeout();

    let mut context = ScriptContext::start(&fixture.script, collab, config)?;
    let pump = Pump { fixture, log: &*log, timeout };
    let deadline = Instant::now() + timeout;
    let init = loop {
        pump.frame(&context);
        match context.poll_init() {
            InitStatus::Pending if Instant::now() < deadline => thread::sleep(Duration::from_millis(1)),
            InitStatus::Pending => break "pending",
            InitStatus::Finished => break "finished",
            InitStatus::Failed => break "failed",
        }
    };

    let mut rounds = Vec::new();
    for index in 0..fixture.rounds {
        let (selected, action) = context.gate().with_state(|session| {
            for &button in &fixture.bar_presses {
                session.press_main_bar(button);
            }
            let game = session.game.as_ref();
            (
                game.and_then(|game| game.selected()).map(|ent| ent.name.clone()),
                game.and_then(|game| game.current_action()).map(|action| action.name.clone()),
            )
        });
        let info = context
            .round_info()
            .unwrap_or(RoundInfo { is_player_side: index % 2 == 0, round: index / 2 + 1 });
        let (actions, outcome) = match play_round(&pump, &context, info, index) {
            Ok(actions) => (actions, "completed".to_string()),
            Err((actions, err)) => (actions, err.to_string()),
        };
        rounds.push(RoundReport {
            index,
            round: info.round,
            player_side: info.is_player_side,
            actions,
            outcome,
            selected,
            action,
        });
        // Scripts that never show the bar still get their turns ended.
        context.gate().with_state(|session| {
            if !session.press_main_bar(MainBarButton::EndTurn) {
                if let Some(game) = session.game.as_mut() {
                    game.end_turn();
                }
            }
        });
    }

    let (session, main_bar) =
        context.gate().with_state(|session| (session.summary(), session.main_bar_text(&*log)));
    drop(context);
    Ok(HarnessOutput {
        script: fixture.script.clone(),
        init: init.to_string(),
        rounds,
        logs: log.take_lines(),
        main_bar,
        session,
    })
}

fn play_round(
    pump: &Pump<'_>,
    context: &ScriptContext,
    info: RoundInfo,
    index: u32,
) -> Result<usize, (usize, RoundError)> {
    let mut coordinator = context.on_round(info).map_err(|err| (0, err))?;
    let mut reported = 0;
    pump.settle(context, &mut coordinator).map_err(|err| (reported, err))?;
    for action in pump.fixture.actions.iter().filter(|action| action.round.map_or(true, |round| round == index)) {
        let mut event = Action::new(action.name.clone(), action.actor);
        if let Some([x, y]) = action.target {
            event = event.targeting(x, y);
        }
        coordinator.report_action(event).map_err(|err| (reported, err))?;
        pump.frame(context);
        coordinator.action_executed().map_err(|err| (reported, err))?;
        pump.settle(context, &mut coordinator).map_err(|err| (reported, err))?;
        reported += 1;
    }
    coordinator.end_round().map_err(|err| (reported, err))?;
    pump.settle(context, &mut coordinator).map_err(|err| (reported, err))?;
    Ok(reported)
}

struct Pump<'a> {
    fixture: &'a HarnessFixture,
    log: &'a dyn LogSink,
    timeout: Duration,
}

impl Pump<'_> {
    /// One rendered frame: drain pending script requests, then act as the
    /// player on any open interactive panel.
    fn frame(&self, context: &ScriptContext) {
        context.think();
        context.gate().with_state(|session| autopilot(session, self.fixture, self.log));
    }

    fn settle(&self, context: &ScriptContext, coordinator: &mut RoundCoordinator) -> Result<(), RoundError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            self.frame(context);
            if coordinator.poll()? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(RoundError::TimedOut { phase: coordinator.phase() });
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

fn autopilot(session: &mut Session, fixture: &HarnessFixture, log: &dyn LogSink) {
    let Session { ui, game, .. } = session;
    if let Some(selector) = ui.map_selector_mut() {
        if !selector.is_done() {
            let first = selector.maps().first().cloned();
            let choice = fixture.map_choice.clone().or_else(|| first.clone());
            if let Some(choice) = choice {
                if let Err(err) = selector.choose(&choice) {
                    log.warn(&format!("Harness: {err}"));
                    if let Some(first) = first {
                        let _ = selector.choose(&first);
                    }
                }
            }
        }
    }
    if let (Some(placer), Some(game)) = (ui.placer_mut(), game.as_mut()) {
        if !placer.is_done() {
            for placement in &fixture.placements {
                if placer.is_done() {
                    break;
                }
                if let Err(err) = placer.place(game, &placement.name, placement.x, placement.y) {
                    log.warn(&format!("Harness: {err}"));
                }
            }
            placer.finish();
        }
    }
}
