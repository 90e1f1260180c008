use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Position, Scope, AST, INT};

use crate::config::ScriptConfig;
use crate::events::Action;
use crate::gate::{GateCloser, SyncGate};
use crate::logging::SharedLog;
use crate::marshal::{to_script, ActionSnapshot};
use crate::ops::{self, Operations};
use crate::round::{
    drive_round, round_channels, ActiveRound, RoundCoordinator, RoundError, RoundHooks, RoundInfo, RoundOutcome,
    RoundPhase, ScriptMailbox,
};
use crate::session::{Collaborators, Session};
use crate::ui::MainBarLayout;

/// A script entry point failed: runtime error, budget exhaustion, or a value
/// that could not be handed to the interpreter.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("{entry} failed: {source}")]
    Call {
        entry: String,
        #[source]
        source: Box<EvalAltResult>,
    },
}

impl ScriptError {
    pub fn runtime(entry: impl Into<String>, message: impl ToString) -> Self {
        let source = EvalAltResult::ErrorRuntime(Dynamic::from(message.to_string()), Position::NONE).into();
        ScriptError::Call { entry: entry.into(), source }
    }

    pub fn entry(&self) -> &str {
        match self {
            ScriptError::Call { entry, .. } => entry,
        }
    }

    pub fn is_budget_exhausted(&self) -> bool {
        match self {
            ScriptError::Call { source, .. } => matches!(source.as_ref(), EvalAltResult::ErrorTooManyOperations(..)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    Pending,
    Finished,
    Failed,
}

enum ScriptCommand {
    Round { info: RoundInfo, mailbox: ScriptMailbox },
}

struct WorkerSetup {
    name: String,
    source: String,
    gate: SyncGate<Session>,
    collab: Collaborators,
    main_bar: MainBarLayout,
    rng_seed: Option<u64>,
    init_budget: u64,
    budget: u64,
}

/// Owns one interpreter running on its own thread, and the gate through which
/// that interpreter reaches the session. Dropping the context closes the gate,
/// which unblocks and retires the script thread.
pub struct ScriptContext {
    path: PathBuf,
    gate: SyncGate<Session>,
    closer: Option<GateCloser>,
    commands: Option<Sender<ScriptCommand>>,
    init_rx: Receiver<bool>,
    init: InitStatus,
    round_flag: Arc<AtomicBool>,
    log: SharedLog,
    worker: Option<JoinHandle<()>>,
}

impl ScriptContext {
    /// Compiles the script, runs its top-level code under the init budget and
    /// then calls `Init` on the script thread. Only load failures are
    /// returned here; an `Init` failure shows up through [`Self::poll_init`].
    pub fn start(script: impl AsRef<Path>, collab: Collaborators, config: &ScriptConfig) -> Result<Self> {
        let path = config.resolve_script(script);
        let log = collab.log.clone();
        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(err) => {
                log.error(&format!("Unable to load game script file {}: {err}", path.display()));
                return Err(err).with_context(|| format!("Reading {}", path.display()));
            }
        };

        let (gate, closer) = SyncGate::new(Session::new());
        let (load_tx, load_rx) = bounded(1);
        let (init_tx, init_rx) = bounded(1);
        let (command_tx, command_rx) = bounded(1);
        let setup = WorkerSetup {
            name: path.display().to_string(),
            source,
            gate: gate.clone(),
            collab,
            main_bar: config.main_bar.clone(),
            rng_seed: config.rng_seed,
            init_budget: config.init_operation_budget,
            budget: config.operation_budget,
        };
        let worker = thread::Builder::new()
            .name("game-script".into())
            .spawn(move || run_worker(setup, load_tx, init_tx, command_rx))
            .context("Spawning script thread")?;

        let context = Self {
            path,
            gate,
            closer: Some(closer),
            commands: Some(command_tx),
            init_rx,
            init: InitStatus::Pending,
            round_flag: Arc::new(AtomicBool::new(false)),
            log,
            worker: Some(worker),
        };

        let loaded = {
            let _think = context.gate.sit_and_think();
            load_rx.recv_timeout(config.phase_timeout())
        };
        let failure = match loaded {
            Ok(Ok(())) => None,
            Ok(Err(message)) => Some(message),
            Err(RecvTimeoutError::Timeout) => Some("top-level code did not finish in time".to_string()),
            Err(RecvTimeoutError::Disconnected) => Some("script thread exited during load".to_string()),
        };
        if let Some(message) = failure {
            context.log.error(&format!("Error loading game script {}: {message}", context.path.display()));
            // Dropping the context closes the gate and joins the worker.
            drop(context);
            bail!("Failed to load game script: {message}");
        }
        tracing::info!(target: "script", path = %context.path.display(), "game script loaded");
        Ok(context)
    }

    /// The gate the render loop pumps and reads the session through.
    pub fn gate(&self) -> &SyncGate<Session> {
        &self.gate
    }

    /// Idle-drain pump; call once per rendered frame.
    pub fn think(&self) -> usize {
        self.gate.think_once()
    }

    pub fn poll_init(&mut self) -> InitStatus {
        if self.init == InitStatus::Pending {
            self.init = match self.init_rx.try_recv() {
                Ok(true) => InitStatus::Finished,
                Ok(false) | Err(TryRecvError::Disconnected) => InitStatus::Failed,
                Err(TryRecvError::Empty) => InitStatus::Pending,
            };
        }
        self.init
    }

    /// Blocks until `Init` returns, draining the gate meanwhile. Stays
    /// `Pending` if the timeout expires first.
    pub fn wait_init(&mut self, timeout: Duration) -> InitStatus {
        if self.init != InitStatus::Pending {
            return self.init;
        }
        let received = {
            let _think = self.gate.sit_and_think();
            self.init_rx.recv_timeout(timeout)
        };
        self.init = match received {
            Ok(true) => InitStatus::Finished,
            Ok(false) | Err(RecvTimeoutError::Disconnected) => InitStatus::Failed,
            Err(RecvTimeoutError::Timeout) => InitStatus::Pending,
        };
        self.init
    }

    /// Side and round number derived from the loaded game, if any.
    pub fn round_info(&self) -> Option<RoundInfo> {
        self.gate.with_state(|session| {
            session
                .game
                .as_ref()
                .map(|game| RoundInfo { is_player_side: game.is_player_side(), round: game.round_number() })
        })
    }

    /// Starts a round on the script thread. The returned coordinator is
    /// waiting for the `RoundStart` acknowledgement.
    pub fn on_round(&self, info: RoundInfo) -> Result<RoundCoordinator, RoundError> {
        let active = ActiveRound::acquire(&self.round_flag)?;
        let (coordinator, mailbox) = round_channels(info, active, self.gate.closed_signal());
        let abandoned = RoundError::Abandoned { phase: RoundPhase::RoundStarting };
        let commands = self.commands.as_ref().ok_or_else(|| abandoned.clone())?;
        commands.send(ScriptCommand::Round { info, mailbox }).map_err(|_| abandoned)?;
        tracing::debug!(target: "script.round", round = info.round, player = info.is_player_side, "round started");
        Ok(coordinator)
    }
}

impl Drop for ScriptContext {
    fn drop(&mut self) {
        self.closer.take();
        self.commands.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!(target: "script", "script thread panicked");
            }
        }
    }
}

fn run_worker(
    setup: WorkerSetup,
    load_tx: Sender<Result<(), String>>,
    init_tx: Sender<bool>,
    commands: Receiver<ScriptCommand>,
) {
    let WorkerSetup { name, source, gate, collab, main_bar, rng_seed, init_budget, budget } = setup;
    let log = collab.log.clone();
    let rng = match rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut engine = Engine::new();
    engine.set_fast_operators(true);
    ops::register(&mut engine, &Operations::new(gate, collab, main_bar, rng));

    engine.set_max_operations(init_budget);
    let ast = match engine.compile(&source) {
        Ok(ast) => ast,
        Err(err) => {
            let _ = load_tx.send(Err(format!("compiling {name}: {err}")));
            return;
        }
    };
    let mut scope = Scope::new();
    if let Err(err) = engine.run_ast_with_scope(&mut scope, &ast) {
        let _ = load_tx.send(Err(format!("running top-level code of {name}: {err}")));
        return;
    }
    let _ = load_tx.send(Ok(()));

    engine.set_max_operations(budget);
    let mut runner = ScriptRunner { engine, ast, scope };
    let init_ok = match runner.call("Init", Vec::new()) {
        Ok(()) => true,
        Err(err) => {
            log.error(&err.to_string());
            false
        }
    };
    let _ = init_tx.send(init_ok);

    for command in commands.iter() {
        match command {
            ScriptCommand::Round { info, mailbox } => {
                let outcome = drive_round(&mut runner, mailbox, info, log.as_ref());
                match &outcome {
                    RoundOutcome::Completed { actions } => {
                        tracing::debug!(target: "script.round", round = info.round, actions, "round completed")
                    }
                    other => {
                        tracing::warn!(target: "script.round", round = info.round, outcome = ?other, "round abandoned")
                    }
                }
            }
        }
    }
    tracing::debug!(target: "script", "script thread exiting");
}

/// Calls named entry points. Entry points the script does not define are
/// skipped.
struct ScriptRunner {
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
}

impl ScriptRunner {
    fn defines(&self, name: &str, arity: usize) -> bool {
        self.ast.iter_functions().any(|f| f.name == name && f.params.len() == arity)
    }

    fn call(&mut self, name: &str, args: Vec<Dynamic>) -> Result<(), ScriptError> {
        if !self.defines(name, args.len()) {
            tracing::trace!(target: "script", entry = name, "entry point not defined");
            return Ok(());
        }
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        self.engine
            .call_fn_with_options::<Dynamic>(options, &mut self.scope, &self.ast, name, args)
            .map(|_| ())
            .map_err(|source| ScriptError::Call { entry: name.to_string(), source })
    }

    fn round_args(info: RoundInfo) -> Vec<Dynamic> {
        vec![Dynamic::from(info.is_player_side), Dynamic::from(INT::from(info.round))]
    }
}

impl RoundHooks for ScriptRunner {
    fn round_start(&mut self, info: RoundInfo) -> Result<(), ScriptError> {
        self.call("RoundStart", Self::round_args(info))
    }

    fn on_action(&mut self, _info: RoundInfo, action: &Action) -> Result<(), ScriptError> {
        let snapshot = to_script(&ActionSnapshot::from(action))
            .map_err(|source| ScriptError::Call { entry: "OnAction".to_string(), source })?;
        self.call("OnAction", vec![snapshot])
    }

    fn round_end(&mut self, info: RoundInfo) -> Result<(), ScriptError> {
        self.call("RoundEnd", Self::round_args(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_errors_name_their_entry_point() {
        let err = ScriptError::runtime("RoundStart", "boom");
        assert_eq!(err.entry(), "RoundStart");
        assert!(err.to_string().starts_with("RoundStart failed:"), "{err}");
        assert!(err.to_string().contains("boom"));
        assert!(!err.is_budget_exhausted());
    }

    #[test]
    fn missing_entry_points_are_skipped() {
        let engine = Engine::new();
        let ast = engine.compile("fn RoundStart(side, round) { side }").expect("compile");
        let mut runner = ScriptRunner { engine, ast, scope: Scope::new() };
        assert!(runner.defines("RoundStart", 2));
        assert!(!runner.defines("RoundStart", 0));
        runner.call("Init", Vec::new()).expect("absent Init is not an error");
        runner.round_start(RoundInfo { is_player_side: true, round: 1 }).expect("defined entry point runs");
    }
}
