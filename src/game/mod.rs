//! Games: registry, connected clients and the per-game task

pub mod registry;
pub mod roster;
pub mod session;

pub use registry::{GameEvent, GameHandle, GameRegistry, JoinError};
pub use roster::{ClientSlot, Roster, PALETTE};
pub use session::{GameCore, GameSession, InputGate, Phase};
