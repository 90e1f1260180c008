use glam::IVec2;
use std::fmt;

use crate::game::EntityId;

/// One atomic game event reported to the script during a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub name: String,
    pub actor: EntityId,
    pub target: Option<IVec2>,
}

impl Action {
    pub fn new(name: impl Into<String>, actor: EntityId) -> Self {
        Self { name: name.into(), actor, target: None }
    }

    pub fn targeting(mut self, x: i32, y: i32) -> Self {
        self.target = Some(IVec2::new(x, y));
        self
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            Some(target) => write!(f, "{} actor={} target=({},{})", self.name, self.actor, target.x, target.y),
            None => write!(f, "{} actor={}", self.name, self.actor),
        }
    }
}

/// Messages the game loop sends to the script's round loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundMessage {
    /// An action just happened; it is still being executed.
    Action(Action),
    /// The previously reported action finished executing.
    Executed,
    /// No more actions this round.
    EndOfRound,
}

impl fmt::Display for RoundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundMessage::Action(action) => write!(f, "Action {action}"),
            RoundMessage::Executed => write!(f, "Executed"),
            RoundMessage::EndOfRound => write!(f, "EndOfRound"),
        }
    }
}
