//! Round lifecycle shared between the game loop and the script thread.
//!
//! The game side holds a [`RoundCoordinator`], the script side a
//! [`ScriptMailbox`]. Each side talks through a single-slot channel and the
//! exchange is strictly alternating: the game never sends the next message of
//! a phase before consuming the script's acknowledgement of the previous one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::events::{Action, RoundMessage};
use crate::gate::SyncGate;
use crate::logging::LogSink;
use crate::scripts::ScriptError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Idle,
    RoundStarting,
    ActionWait,
    ActionProcessing,
    RoundEnding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundInfo {
    pub is_player_side: bool,
    pub round: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoundError {
    #[error("a round is already active")]
    AlreadyActive,
    #[error("cannot {attempted} while the round is in {phase:?}")]
    OutOfOrder { phase: RoundPhase, attempted: &'static str },
    #[error("script abandoned the round during {phase:?}")]
    Abandoned { phase: RoundPhase },
    #[error("timed out waiting for the script during {phase:?}")]
    TimedOut { phase: RoundPhase },
}

/// Marks the single round a session may have in flight.
#[derive(Debug)]
pub struct ActiveRound(Arc<AtomicBool>);

impl ActiveRound {
    pub fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, RoundError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RoundError::AlreadyActive)?;
        Ok(Self(Arc::clone(flag)))
    }
}

impl Drop for ActiveRound {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Creates both halves of a round's mailboxes. The script half stops waiting
/// once `closed` disconnects.
pub fn round_channels(
    info: RoundInfo,
    active: ActiveRound,
    closed: Receiver<()>,
) -> (RoundCoordinator, ScriptMailbox) {
    let (to_script, from_game) = bounded(1);
    let (to_game, acks) = bounded(1);
    let coordinator =
        RoundCoordinator { info, phase: RoundPhase::RoundStarting, awaiting_ack: true, to_script, acks };
    let mailbox = ScriptMailbox { active: Some(active), from_game, to_game, closed };
    (coordinator, mailbox)
}

/// Game-loop half of a round.
#[derive(Debug)]
pub struct RoundCoordinator {
    info: RoundInfo,
    phase: RoundPhase,
    awaiting_ack: bool,
    to_script: Sender<RoundMessage>,
    acks: Receiver<()>,
}

impl RoundCoordinator {
    pub fn info(&self) -> RoundInfo {
        self.info
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// True while the script still owes an acknowledgement for the current phase.
    pub fn awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }

    pub fn is_finished(&self) -> bool {
        self.phase == RoundPhase::Idle
    }

    fn settle(&mut self) {
        self.awaiting_ack = false;
        self.phase = match self.phase {
            RoundPhase::RoundStarting | RoundPhase::ActionProcessing => RoundPhase::ActionWait,
            RoundPhase::RoundEnding => RoundPhase::Idle,
            other => other,
        };
        tracing::debug!(target: "script.round", phase = ?self.phase, "script acknowledged");
    }

    /// Non-blocking check for the pending acknowledgement. Returns true once
    /// the game loop may proceed.
    pub fn poll(&mut self) -> Result<bool, RoundError> {
        if !self.awaiting_ack {
            return Ok(true);
        }
        match self.acks.try_recv() {
            Ok(()) => {
                self.settle();
                Ok(true)
            }
            Err(TryRecvError::Empty) => Ok(false),
            Err(TryRecvError::Disconnected) => Err(RoundError::Abandoned { phase: self.phase }),
        }
    }

    /// Blocks until the pending acknowledgement arrives, draining the gate
    /// meanwhile so gated operations issued by the phase can run.
    pub fn wait<T: Send + 'static>(&mut self, gate: &SyncGate<T>, timeout: Duration) -> Result<(), RoundError> {
        if !self.awaiting_ack {
            return Ok(());
        }
        let received = {
            let _think = gate.sit_and_think();
            self.acks.recv_timeout(timeout)
        };
        match received {
            Ok(()) => {
                self.settle();
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(RoundError::TimedOut { phase: self.phase }),
            Err(RecvTimeoutError::Disconnected) => Err(RoundError::Abandoned { phase: self.phase }),
        }
    }

    fn expect_settled(&self, phase: RoundPhase, attempted: &'static str) -> Result<(), RoundError> {
        if self.phase != phase || self.awaiting_ack {
            return Err(RoundError::OutOfOrder { phase: self.phase, attempted });
        }
        Ok(())
    }

    fn send(&self, message: RoundMessage) -> Result<(), RoundError> {
        tracing::debug!(target: "script.round", %message, "to script");
        self.to_script.send(message).map_err(|_| RoundError::Abandoned { phase: self.phase })
    }

    /// An action just started executing.
    pub fn report_action(&mut self, action: Action) -> Result<(), RoundError> {
        self.expect_settled(RoundPhase::ActionWait, "report an action")?;
        self.send(RoundMessage::Action(action))?;
        self.phase = RoundPhase::ActionProcessing;
        Ok(())
    }

    /// The reported action finished; the script may now react to it.
    pub fn action_executed(&mut self) -> Result<(), RoundError> {
        self.expect_settled(RoundPhase::ActionProcessing, "finish an action")?;
        self.send(RoundMessage::Executed)?;
        self.awaiting_ack = true;
        Ok(())
    }

    pub fn end_round(&mut self) -> Result<(), RoundError> {
        self.expect_settled(RoundPhase::ActionWait, "end the round")?;
        self.send(RoundMessage::EndOfRound)?;
        self.phase = RoundPhase::RoundEnding;
        self.awaiting_ack = true;
        Ok(())
    }
}

/// Script half of a round. Dropping it without acknowledging tells the game
/// loop the round was abandoned.
#[derive(Debug)]
pub struct ScriptMailbox {
    // Declared first so the flag clears before the channels disconnect.
    active: Option<ActiveRound>,
    from_game: Receiver<RoundMessage>,
    to_game: Sender<()>,
    closed: Receiver<()>,
}

impl ScriptMailbox {
    fn ack(&self) -> bool {
        self.to_game.send(()).is_ok()
    }

    fn recv(&self) -> Option<RoundMessage> {
        select! {
            recv(self.from_game) -> message => message.ok(),
            recv(self.closed) -> _ => None,
        }
    }
}

/// Entry points the round loop calls into.
pub trait RoundHooks {
    fn round_start(&mut self, info: RoundInfo) -> Result<(), ScriptError>;
    fn on_action(&mut self, info: RoundInfo, action: &Action) -> Result<(), ScriptError>;
    fn round_end(&mut self, info: RoundInfo) -> Result<(), ScriptError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    Completed { actions: usize },
    Failed { phase: RoundPhase },
    Disconnected { phase: RoundPhase },
    ProtocolViolation { phase: RoundPhase, message: String },
}

/// Runs one round on the script thread: start, every action in order, end.
pub fn drive_round(
    hooks: &mut dyn RoundHooks,
    mut mailbox: ScriptMailbox,
    info: RoundInfo,
    log: &dyn LogSink,
) -> RoundOutcome {
    let fail = |phase: RoundPhase, err: ScriptError| {
        log.error(&format!("{err}"));
        RoundOutcome::Failed { phase }
    };

    if let Err(err) = hooks.round_start(info) {
        return fail(RoundPhase::RoundStarting, err);
    }
    if !mailbox.ack() {
        return RoundOutcome::Disconnected { phase: RoundPhase::RoundStarting };
    }
    tracing::debug!(target: "script.round", round = info.round, "done with round start");

    let mut actions = 0;
    loop {
        let action = match mailbox.recv() {
            Some(RoundMessage::Action(action)) => action,
            Some(RoundMessage::EndOfRound) => break,
            Some(other) => {
                let message = format!("expected an action, got {other}");
                log.error(&format!("Round {}: {message}", info.round));
                return RoundOutcome::ProtocolViolation { phase: RoundPhase::ActionWait, message };
            }
            None => return RoundOutcome::Disconnected { phase: RoundPhase::ActionWait },
        };
        tracing::debug!(target: "script.round", %action, "got action");
        match mailbox.recv() {
            Some(RoundMessage::Executed) => {}
            Some(other) => {
                let message = format!("expected {action} to finish, got {other}");
                log.error(&format!("Round {}: {message}", info.round));
                return RoundOutcome::ProtocolViolation { phase: RoundPhase::ActionProcessing, message };
            }
            None => return RoundOutcome::Disconnected { phase: RoundPhase::ActionProcessing },
        }
        if let Err(err) = hooks.on_action(info, &action) {
            return fail(RoundPhase::ActionProcessing, err);
        }
        actions += 1;
        if !mailbox.ack() {
            return RoundOutcome::Disconnected { phase: RoundPhase::ActionProcessing };
        }
    }

    if let Err(err) = hooks.round_end(info) {
        return fail(RoundPhase::RoundEnding, err);
    }
    // Retire the round before the final acknowledgement so the game loop can
    // immediately start the next one.
    mailbox.active.take();
    if !mailbox.ack() {
        return RoundOutcome::Disconnected { phase: RoundPhase::RoundEnding };
    }
    tracing::debug!(target: "script.round", round = info.round, actions, "done with round end");
    RoundOutcome::Completed { actions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemoryLog;
    use std::thread;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        fail_on: Option<&'static str>,
    }

    impl Recorder {
        fn call(&mut self, name: String) -> Result<(), ScriptError> {
            let failing = self.fail_on.map_or(false, |prefix| name.starts_with(prefix));
            self.calls.push(name.clone());
            if failing {
                return Err(ScriptError::runtime(name, "boom"));
            }
            Ok(())
        }
    }

    impl RoundHooks for Recorder {
        fn round_start(&mut self, info: RoundInfo) -> Result<(), ScriptError> {
            self.call(format!("start {}", info.round))
        }
        fn on_action(&mut self, _info: RoundInfo, action: &Action) -> Result<(), ScriptError> {
            self.call(format!("action {}", action.name))
        }
        fn round_end(&mut self, info: RoundInfo) -> Result<(), ScriptError> {
            self.call(format!("end {}", info.round))
        }
    }

    fn spawn_round(
        fail_on: Option<&'static str>,
    ) -> (RoundCoordinator, thread::JoinHandle<(RoundOutcome, Vec<String>)>, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        let info = RoundInfo { is_player_side: true, round: 3 };
        let active = ActiveRound::acquire(&flag).expect("no round active");
        let (closer_tx, closed) = bounded::<()>(0);
        let (coordinator, mailbox) = round_channels(info, active, closed);
        let script = thread::spawn(move || {
            let _closer = closer_tx;
            let mut hooks = Recorder { fail_on, ..Recorder::default() };
            let log = MemoryLog::new();
            let outcome = drive_round(&mut hooks, mailbox, info, &*log);
            (outcome, hooks.calls)
        });
        (coordinator, script, flag)
    }

    fn wait(coordinator: &mut RoundCoordinator) -> Result<(), RoundError> {
        let (gate, _closer) = SyncGate::new(());
        coordinator.wait(&gate, Duration::from_secs(5))
    }

    #[test]
    fn actions_are_processed_in_order_until_sentinel() {
        let (mut coordinator, script, flag) = spawn_round(None);
        wait(&mut coordinator).expect("round start");
        assert_eq!(coordinator.phase(), RoundPhase::ActionWait);
        for name in ["move", "attack", "search"] {
            coordinator.report_action(Action::new(name, 1)).expect("report");
            assert_eq!(coordinator.phase(), RoundPhase::ActionProcessing);
            coordinator.action_executed().expect("executed");
            wait(&mut coordinator).expect("action ack");
        }
        coordinator.end_round().expect("end");
        wait(&mut coordinator).expect("round end");
        assert!(coordinator.is_finished());
        let (outcome, calls) = script.join().expect("script thread");
        assert_eq!(outcome, RoundOutcome::Completed { actions: 3 });
        assert_eq!(calls, vec!["start 3", "action move", "action attack", "action search", "end 3"]);
        assert!(!flag.load(Ordering::Acquire), "round retired");
    }

    #[test]
    fn sentinel_right_after_start_skips_action_processing() {
        let (mut coordinator, script, _flag) = spawn_round(None);
        wait(&mut coordinator).expect("round start");
        coordinator.end_round().expect("end");
        wait(&mut coordinator).expect("round end");
        let (outcome, calls) = script.join().expect("script thread");
        assert_eq!(outcome, RoundOutcome::Completed { actions: 0 });
        assert_eq!(calls, vec!["start 3", "end 3"]);
    }

    #[test]
    fn out_of_order_calls_are_rejected() {
        let (mut coordinator, script, _flag) = spawn_round(None);
        assert_eq!(
            coordinator.report_action(Action::new("move", 1)),
            Err(RoundError::OutOfOrder { phase: RoundPhase::RoundStarting, attempted: "report an action" })
        );
        wait(&mut coordinator).expect("round start");
        assert!(matches!(coordinator.action_executed(), Err(RoundError::OutOfOrder { .. })));
        coordinator.report_action(Action::new("move", 1)).expect("report");
        assert!(matches!(coordinator.end_round(), Err(RoundError::OutOfOrder { .. })));
        coordinator.action_executed().expect("executed");
        wait(&mut coordinator).expect("ack");
        coordinator.end_round().expect("end");
        wait(&mut coordinator).expect("round end");
        script.join().expect("script thread");
    }

    #[test]
    fn failed_round_start_is_reported_as_abandoned() {
        let (mut coordinator, script, flag) = spawn_round(Some("start"));
        let (outcome, _) = script.join().expect("script thread");
        assert_eq!(outcome, RoundOutcome::Failed { phase: RoundPhase::RoundStarting });
        assert_eq!(coordinator.poll(), Err(RoundError::Abandoned { phase: RoundPhase::RoundStarting }));
        assert!(!flag.load(Ordering::Acquire));
    }

    #[test]
    fn failed_action_abandons_remaining_signals() {
        let (mut coordinator, script, _flag) = spawn_round(Some("action"));
        wait(&mut coordinator).expect("round start");
        coordinator.report_action(Action::new("move", 1)).expect("report");
        coordinator.action_executed().expect("executed");
        assert_eq!(wait(&mut coordinator), Err(RoundError::Abandoned { phase: RoundPhase::ActionProcessing }));
        let (outcome, calls) = script.join().expect("script thread");
        assert_eq!(outcome, RoundOutcome::Failed { phase: RoundPhase::ActionProcessing });
        assert_eq!(calls, vec!["start 3", "action move"]);
    }

    #[test]
    fn only_one_round_at_a_time() {
        let flag = Arc::new(AtomicBool::new(false));
        let first = ActiveRound::acquire(&flag).expect("first");
        assert_eq!(ActiveRound::acquire(&flag).err(), Some(RoundError::AlreadyActive));
        drop(first);
        assert!(ActiveRound::acquire(&flag).is_ok());
    }
}
