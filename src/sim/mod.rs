//! Game-mode simulators
//!
//! A simulator owns all per-player physical state of one match. The world
//! drives it one tick at a time and never looks inside.

pub mod achtung;
pub mod pong;

pub use achtung::AchtungSimulator;
pub use pong::PongSimulator;

use crate::config::{GameMode, SimulatorSettings};
use crate::protocol::{Command, GameOptions, PlayerId, StartPlayer, TickPacket};

/// Public per-player setup data, shared between the session and its simulator
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerData {
    pub id: PlayerId,
    pub name: String,
    pub color: String,
    pub x: f64,
    pub y: f64,
    /// Initial heading in radians, y axis pointing down
    pub angle: f64,
}

impl PlayerData {
    pub fn new(id: PlayerId, name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            color: color.into(),
            x: 0.0,
            y: 0.0,
            angle: 0.0,
        }
    }

    pub fn to_start_player(&self) -> StartPlayer {
        StartPlayer {
            id: self.id,
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            color: self.color.clone(),
            you: false,
        }
    }
}

/// Capabilities every game mode provides to the world
pub trait Simulator: Send {
    fn mode(&self) -> GameMode;

    /// Assign the spawn of `player`, given everyone set up before it (join order)
    fn set_up_player_data(&mut self, player: &mut PlayerData, already_set_up: &[PlayerData]);

    /// Reset per-match state and build the id lookup for `players`
    fn start(&mut self, players: &[PlayerData]) -> Result<(), SimulatorError>;

    /// Overwrite the latest command of a player; unknown ids are ignored
    fn on_input_received(&mut self, player_id: PlayerId, command: Command);

    /// Advance one tick, writing deltas into `tick`. Returns true when the match is over.
    fn simulate(&mut self, delta_time: f64, tick: &mut TickPacket) -> bool;

    /// Rate at which the discrete collision checks stay sound
    fn desired_tps(&self) -> f64;

    fn options(&self) -> GameOptions;

    fn alive_count(&self) -> usize;
}

/// Build the simulator for `mode`; `seed` drives every random choice it makes
pub fn build_simulator(mode: GameMode, settings: SimulatorSettings, seed: u64) -> Box<dyn Simulator> {
    match mode {
        GameMode::Achtung => Box::new(AchtungSimulator::new(settings, seed)),
        GameMode::Pong => Box::new(PongSimulator::new(settings, seed)),
    }
}

pub(crate) fn game_options(mode: GameMode, settings: &SimulatorSettings, tps: f64) -> GameOptions {
    GameOptions {
        mode,
        game_width: settings.game_width,
        game_height: settings.game_height,
        line_size: settings.line_size,
        movement_speed: settings.movement_speed,
        turning_speed: settings.turning_speed,
        tps,
    }
}

/// Simulator configuration errors, raised before a match starts
#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error("Cannot start a match without players")]
    NoPlayers,

    #[error("{mode} needs {expected} players, got {got}")]
    PlayerCount {
        mode: GameMode,
        expected: usize,
        got: usize,
    },

    #[error("Player {0} listed twice")]
    DuplicatePlayer(PlayerId),
}
