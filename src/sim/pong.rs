//! Two-paddle mode: a miss scores for the opponent, first to the limit wins

use std::collections::HashMap;
use std::f64::consts::{FRAC_PI_4, PI};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::{GameMode, SimulatorSettings};
use crate::protocol::{Command, GameOptions, PaddleDelta, PlayerDelta, PlayerId, TickPacket};

use super::{game_options, PlayerData, Simulator, SimulatorError};

pub const SCORE_LIMIT: u32 = 5;
/// Paddle length as a fraction of the arena height
const PADDLE_LENGTH: f64 = 0.2;
/// Ball speed relative to paddle speed
const BALL_SPEED_FACTOR: f64 = 1.5;

#[derive(Debug, Clone)]
struct Paddle {
    id: PlayerId,
    /// Goal line this paddle guards
    x: f64,
    /// Paddle center on the vertical axis
    offset: f64,
    score: u32,
    alive: bool,
    input: Command,
}

#[derive(Debug, Clone, Copy, Default)]
struct Ball {
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
}

pub struct PongSimulator {
    settings: SimulatorSettings,
    rng: ChaCha8Rng,
    /// Left paddle first
    paddles: Vec<Paddle>,
    by_id: HashMap<PlayerId, usize>,
    ball: Ball,
}

impl PongSimulator {
    pub fn new(settings: SimulatorSettings, seed: u64) -> Self {
        Self {
            settings,
            rng: ChaCha8Rng::seed_from_u64(seed),
            paddles: Vec::new(),
            by_id: HashMap::new(),
            ball: Ball::default(),
        }
    }

    fn create_player(&self, data: &PlayerData) -> Paddle {
        Paddle {
            id: data.id,
            x: data.x,
            offset: data.y,
            score: 0,
            alive: true,
            input: Command::Straight,
        }
    }

    fn half_paddle(&self) -> f64 {
        self.settings.game_height * PADDLE_LENGTH / 2.0
    }

    /// Put the ball in the center, heading at `side` (-1 left, 1 right)
    fn serve(&mut self, side: f64) {
        let angle = self.rng.gen_range(-FRAC_PI_4..FRAC_PI_4);
        let speed = self.settings.movement_speed * BALL_SPEED_FACTOR;
        self.ball = Ball {
            x: self.settings.game_width / 2.0,
            y: self.settings.game_height / 2.0,
            vx: side * angle.cos() * speed,
            vy: angle.sin() * speed,
        };
    }

    fn move_ball(&mut self, delta_time: f64) {
        let height = self.settings.game_height;
        self.ball.x += self.ball.vx * delta_time;
        self.ball.y += self.ball.vy * delta_time;

        if self.ball.y < 0.0 {
            self.ball.y = -self.ball.y;
            self.ball.vy = self.ball.vy.abs();
        } else if self.ball.y > height {
            self.ball.y = 2.0 * height - self.ball.y;
            self.ball.vy = -self.ball.vy.abs();
        }
    }

    /// Bounce the ball off a paddle or award the point. Returns the scorer, if any.
    fn resolve_goal_lines(&mut self) -> Option<usize> {
        let reach = self.half_paddle() + self.settings.line_size / 2.0;
        let (left, right) = (&self.paddles[0], &self.paddles[1]);

        if self.ball.x <= left.x && self.ball.vx < 0.0 {
            if (self.ball.y - left.offset).abs() <= reach {
                self.ball.x = 2.0 * left.x - self.ball.x;
                self.ball.vx = self.ball.vx.abs();
                return None;
            }
            return Some(1);
        }
        if self.ball.x >= right.x && self.ball.vx > 0.0 {
            if (self.ball.y - right.offset).abs() <= reach {
                self.ball.x = 2.0 * right.x - self.ball.x;
                self.ball.vx = -self.ball.vx.abs();
                return None;
            }
            return Some(0);
        }
        None
    }

    fn delta(&self, paddle: &Paddle) -> PlayerDelta {
        PlayerDelta::Pong(PaddleDelta {
            offset: paddle.offset,
            score: paddle.score,
            ball_x: self.ball.x,
            ball_y: self.ball.y,
        })
    }
}

impl Simulator for PongSimulator {
    fn mode(&self) -> GameMode {
        GameMode::Pong
    }

    fn set_up_player_data(&mut self, player: &mut PlayerData, already_set_up: &[PlayerData]) {
        let inset = self.settings.line_size;
        if already_set_up.len() % 2 == 0 {
            player.x = inset;
            player.angle = 0.0;
        } else {
            player.x = self.settings.game_width - inset;
            player.angle = PI;
        }
        player.y = self.settings.game_height / 2.0;
    }

    fn start(&mut self, players: &[PlayerData]) -> Result<(), SimulatorError> {
        if players.len() != 2 {
            return Err(SimulatorError::PlayerCount {
                mode: GameMode::Pong,
                expected: 2,
                got: players.len(),
            });
        }

        let mut by_id = HashMap::with_capacity(2);
        let mut paddles = Vec::with_capacity(2);
        for (index, data) in players.iter().enumerate() {
            if by_id.insert(data.id, index).is_some() {
                return Err(SimulatorError::DuplicatePlayer(data.id));
            }
            paddles.push(self.create_player(data));
        }
        paddles.sort_by(|a, b| a.x.total_cmp(&b.x));
        for (index, paddle) in paddles.iter().enumerate() {
            by_id.insert(paddle.id, index);
        }

        self.paddles = paddles;
        self.by_id = by_id;
        let side = if self.rng.gen_bool(0.5) { -1.0 } else { 1.0 };
        self.serve(side);
        Ok(())
    }

    fn on_input_received(&mut self, player_id: PlayerId, command: Command) {
        if let Some(&index) = self.by_id.get(&player_id) {
            self.paddles[index].input = command;
        }
    }

    fn simulate(&mut self, delta_time: f64, tick: &mut TickPacket) -> bool {
        if self.paddles.len() != 2 {
            return true;
        }

        let sampled: Vec<Command> = self.paddles.iter().map(|p| p.input).collect();
        let half = self.half_paddle();
        let height = self.settings.game_height;
        let step = self.settings.movement_speed * delta_time;
        for (paddle, command) in self.paddles.iter_mut().zip(sampled) {
            match command {
                Command::Up => paddle.offset -= step,
                Command::Down => paddle.offset += step,
                Command::Straight | Command::Left | Command::Right => {}
            }
            paddle.offset = paddle.offset.clamp(half, height - half);
        }

        self.move_ball(delta_time);
        let mut game_over = false;
        if let Some(scorer) = self.resolve_goal_lines() {
            self.paddles[scorer].score += 1;
            if self.paddles[scorer].score >= SCORE_LIMIT {
                self.paddles[1 - scorer].alive = false;
                game_over = true;
            } else {
                // Serve towards the player who just missed
                let side = if scorer == 0 { 1.0 } else { -1.0 };
                self.serve(side);
            }
        }

        for paddle in &self.paddles {
            tick.set_player_data(paddle.id, self.delta(paddle));
        }
        game_over
    }

    fn desired_tps(&self) -> f64 {
        self.settings.movement_speed / self.settings.line_size
    }

    fn options(&self) -> GameOptions {
        game_options(GameMode::Pong, &self.settings, self.desired_tps())
    }

    fn alive_count(&self) -> usize {
        self.paddles.iter().filter(|p| p.alive).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_up(sim: &mut PongSimulator) -> Vec<PlayerData> {
        let mut done: Vec<PlayerData> = Vec::new();
        for id in [10, 20] {
            let mut data = PlayerData::new(id, format!("p{}", id), "#fff");
            sim.set_up_player_data(&mut data, &done);
            done.push(data);
        }
        done
    }

    fn started() -> PongSimulator {
        let mut sim = PongSimulator::new(SimulatorSettings::default(), 7);
        let players = set_up(&mut sim);
        sim.start(&players).unwrap();
        sim
    }

    #[test]
    fn needs_exactly_two_players() {
        let mut sim = PongSimulator::new(SimulatorSettings::default(), 7);
        let players = set_up(&mut sim);
        let err = sim.start(&players[..1]).unwrap_err();
        assert!(matches!(err, SimulatorError::PlayerCount { expected: 2, got: 1, .. }));
    }

    #[test]
    fn paddles_follow_input_and_stay_in_the_arena() {
        let mut sim = started();
        sim.on_input_received(10, Command::Up);
        sim.on_input_received(404, Command::Down);

        for tick in 0..200 {
            let mut packet = TickPacket::new(tick);
            sim.ball = Ball { x: 400.0, y: 300.0, vx: 0.0, vy: 0.0 };
            sim.simulate(1.0 / 30.0, &mut packet);
        }
        assert_eq!(sim.paddles[0].offset, sim.half_paddle());
        assert_eq!(sim.paddles[1].offset, 300.0);
    }

    #[test]
    fn missed_ball_scores_for_the_opponent() {
        let mut sim = started();
        sim.paddles[0].offset = 500.0;
        sim.ball = Ball { x: 5.0, y: 100.0, vx: -90.0, vy: 0.0 };

        let mut packet = TickPacket::new(0);
        assert!(!sim.simulate(0.1, &mut packet));
        assert_eq!(sim.paddles[1].score, 1);
        match packet.player_data(20) {
            Some(PlayerDelta::Pong(delta)) => assert_eq!(delta.score, 1),
            other => panic!("unexpected delta {:?}", other),
        }
    }

    #[test]
    fn paddle_returns_the_ball() {
        let mut sim = started();
        sim.paddles[0].offset = 100.0;
        sim.ball = Ball { x: 5.0, y: 100.0, vx: -90.0, vy: 0.0 };

        let mut packet = TickPacket::new(0);
        sim.simulate(0.1, &mut packet);
        assert!(sim.ball.vx > 0.0);
        assert_eq!(sim.paddles[1].score, 0);
    }

    #[test]
    fn reaching_the_score_limit_ends_the_match() {
        let mut sim = started();
        sim.paddles[1].score = SCORE_LIMIT - 1;
        sim.paddles[0].offset = 500.0;
        sim.ball = Ball { x: 5.0, y: 100.0, vx: -90.0, vy: 0.0 };

        let mut packet = TickPacket::new(0);
        assert!(sim.simulate(0.1, &mut packet));
        assert_eq!(sim.alive_count(), 1);
        assert!(!sim.paddles[0].alive);
    }
}
