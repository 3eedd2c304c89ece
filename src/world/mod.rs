//! Authoritative per-match tick driver
//!
//! A [`World`] owns one simulator and advances it one tick per call to
//! [`World::tick`]. It never sleeps itself: the owner schedules the next call
//! after the interval the tick returns, so at most one simulation step is in
//! flight per world.

pub mod pacing;

pub use pacing::{adapt_interval, sleep_until, PacingDecision, TickScheduler, SAFETY_MARGIN};

use std::time::Duration;

use tracing::{debug, info};

use crate::protocol::{Command, GameOptions, PlayerId, TickPacket};
use crate::sim::{PlayerData, Simulator, SimulatorError};
use crate::util::time::{as_millis_f64, Timer};

/// Receives each finished tick and the end of the match
pub trait OutputHandler {
    /// Flush a completed tick packet to the clients
    fn tick_ended(&mut self, packet: TickPacket);

    fn game_over(&mut self);
}

/// Input side of a match; told to stop accepting commands at game over
pub trait InputHandler {
    fn game_over(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldState {
    Idle,
    Running,
    Ended,
}

/// What the owner should do after a tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Schedule the next tick after this interval
    Continue(Duration),
    /// The match ended during this tick; handlers were notified
    GameOver,
    /// The world was not running; nothing happened
    Stopped,
}

/// Aggregate timing of one match
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldStats {
    pub ticks_run: u64,
    pub total_computation: Duration,
    pub max_computation: Duration,
    pub slow_ticks: u64,
}

impl WorldStats {
    fn record(&mut self, computation: Duration) {
        self.ticks_run += 1;
        self.total_computation += computation;
        self.max_computation = self.max_computation.max(computation);
    }

    pub fn mean_computation(&self) -> Duration {
        if self.ticks_run == 0 {
            return Duration::ZERO;
        }
        self.total_computation.div_f64(self.ticks_run as f64)
    }
}

pub struct World {
    simulator: Box<dyn Simulator>,
    state: WorldState,
    tick_number: u64,
    desired_interval: Duration,
    current_interval: Duration,
    allow_tps_compensation: bool,
    /// Carried into the next tick packet
    tps_text: String,
    stats: WorldStats,
}

impl World {
    pub fn new(simulator: Box<dyn Simulator>, allow_tps_compensation: bool) -> Self {
        let desired_interval = desired_interval(simulator.desired_tps());
        Self {
            simulator,
            state: WorldState::Idle,
            tick_number: 0,
            desired_interval,
            current_interval: desired_interval,
            allow_tps_compensation,
            tps_text: String::new(),
            stats: WorldStats::default(),
        }
    }

    pub fn state(&self) -> WorldState {
        self.state
    }

    pub fn tick_number(&self) -> u64 {
        self.tick_number
    }

    pub fn desired_interval(&self) -> Duration {
        self.desired_interval
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn stats(&self) -> &WorldStats {
        &self.stats
    }

    pub fn options(&self) -> GameOptions {
        self.simulator.options()
    }

    pub fn alive_count(&self) -> usize {
        self.simulator.alive_count()
    }

    /// Assign spawn data in join order before the match starts
    pub fn set_up_players(&mut self, players: &mut [PlayerData]) {
        for index in 0..players.len() {
            let (done, rest) = players.split_at_mut(index);
            self.simulator.set_up_player_data(&mut rest[0], done);
        }
    }

    /// Idle -> Running. Returns the delay before the first tick.
    pub fn start(&mut self, players: &[PlayerData]) -> Result<Duration, SimulatorError> {
        if players.is_empty() {
            return Err(SimulatorError::NoPlayers);
        }
        self.simulator.start(players)?;
        self.state = WorldState::Running;
        self.tick_number = 0;
        self.current_interval = self.desired_interval;
        self.tps_text.clear();
        info!(
            players = players.len(),
            tps = self.simulator.desired_tps(),
            "World started"
        );
        Ok(self.desired_interval)
    }

    /// Forward a command; ignored unless running
    pub fn on_input(&mut self, player_id: PlayerId, command: Command) {
        if self.state == WorldState::Running {
            self.simulator.on_input_received(player_id, command);
        }
    }

    /// Run one iteration of the loop
    pub fn tick(&mut self, output: &mut dyn OutputHandler, input: &mut dyn InputHandler) -> TickOutcome {
        if self.state != WorldState::Running {
            return TickOutcome::Stopped;
        }

        let delta_time = if self.allow_tps_compensation {
            self.current_interval
        } else {
            self.desired_interval
        };
        let mut packet = TickPacket::new(self.tick_number).with_tps_text(self.tps_text.clone());

        let timer = Timer::new();
        let game_over = self.simulator.simulate(delta_time.as_secs_f64(), &mut packet);
        let computation = timer.elapsed();

        self.tick_number += 1;
        let timer = Timer::new();
        output.tick_ended(packet);
        let render = timer.elapsed();
        self.stats.record(computation);

        if game_over {
            self.finish(output, input);
            return TickOutcome::GameOver;
        }

        let decision = adapt_interval(self.desired_interval, computation, render);
        if let Some(diagnostic) = &decision.diagnostic {
            self.stats.slow_ticks += 1;
            debug!(tick = self.tick_number, %diagnostic, "Tick over budget, slowing down");
        }
        self.current_interval = decision.interval;
        self.tps_text = decision.tps_text();
        TickOutcome::Continue(decision.interval)
    }

    /// End a running match early. Handlers are notified exactly once;
    /// returns false if the world was not running.
    pub fn stop(&mut self, output: &mut dyn OutputHandler, input: &mut dyn InputHandler) -> bool {
        if self.state != WorldState::Running {
            return false;
        }
        self.finish(output, input);
        true
    }

    /// Ended -> Idle
    pub fn clear(&mut self) {
        self.state = WorldState::Idle;
        self.tick_number = 0;
        self.current_interval = self.desired_interval;
        self.tps_text.clear();
        self.stats = WorldStats::default();
    }

    fn finish(&mut self, output: &mut dyn OutputHandler, input: &mut dyn InputHandler) {
        self.state = WorldState::Ended;
        output.game_over();
        input.game_over();
        info!(
            ticks = self.stats.ticks_run,
            mean_ms = as_millis_f64(self.stats.mean_computation()),
            max_ms = as_millis_f64(self.stats.max_computation),
            slow_ticks = self.stats.slow_ticks,
            alive = self.simulator.alive_count(),
            "World ended"
        );
    }
}

fn desired_interval(tps: f64) -> Duration {
    if tps.is_finite() && tps > 0.0 {
        Duration::from_secs_f64(1.0 / tps)
    } else {
        Duration::from_secs(1)
    }
}
