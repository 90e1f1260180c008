pub mod cli;
pub mod config;
pub mod events;
pub mod game;
pub mod gate;
pub mod house;
pub mod logging;
pub mod marshal;
pub mod ops;
pub mod round;
pub mod script_harness;
pub mod scripts;
pub mod session;
pub mod ui;

pub use gate::{GateClosed, SyncGate};
pub use round::{RoundCoordinator, RoundError, RoundInfo, RoundPhase};
pub use scripts::{InitStatus, ScriptContext, ScriptError};
