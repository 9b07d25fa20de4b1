//! The consensus state machine.
//!
//! Everything in this module runs on the processor task and is driven one
//! event at a time by [`IbftController`]. The controller owns the
//! [`FinalState`] and the current [`HeightManager`]; the height manager
//! owns its rounds.

mod controller;
mod final_state;
mod height_manager;
mod round;
mod round_change;
mod round_state;

pub use controller::IbftController;
pub use final_state::FinalState;
pub use height_manager::{
    ActiveHeightManager, BlockHeightManager, HeightManager, InactiveHeightManager,
};
pub use round::IbftRound;
pub use round_change::{RoundChangeArtifacts, RoundChangeManager};
pub use round_state::{RoundPhase, RoundState};

#[cfg(test)]
mod tests;
