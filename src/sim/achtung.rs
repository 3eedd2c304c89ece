//! Light-trail racer: every player leaves a trail, touching any trail is fatal

use std::collections::HashMap;
use std::f64::consts::PI;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::{GameMode, SimulatorSettings};
use crate::protocol::{Command, GameOptions, PlayerDelta, PlayerId, TickPacket, TrailDelta};

use super::{game_options, PlayerData, Simulator, SimulatorError};

/// Spawns keep this fraction of the arena width from the side walls
const SPAWN_EDGE_MARGIN: f64 = 0.1;
/// Extra inset for each further pair of players
const SPAWN_LAYER_STEP: f64 = 0.08;
/// Vertical spawn band, as fractions of the arena height
const SPAWN_BAND: (f64, f64) = (0.25, 0.75);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// One racer and the trail it has drawn this match
#[derive(Debug, Clone)]
pub struct TrailPlayer {
    pub id: PlayerId,
    pub position: Point,
    pub angle: f64,
    pub alive: bool,
    input: Command,
    /// Append-only during a match, one point per tick
    trail: Vec<Point>,
}

impl TrailPlayer {
    fn advance(&mut self, command: Command, delta_time: f64, settings: &SimulatorSettings) {
        match command {
            Command::Left => self.angle -= settings.turning_speed * delta_time,
            Command::Right => self.angle += settings.turning_speed * delta_time,
            Command::Straight | Command::Up | Command::Down => {}
        }
        self.angle = self.angle.rem_euclid(2.0 * PI);

        let step = settings.movement_speed * delta_time;
        self.position.x += self.angle.cos() * step;
        self.position.y += self.angle.sin() * step;
        self.trail.push(self.position);
    }

    fn delta(&self) -> PlayerDelta {
        PlayerDelta::Achtung(TrailDelta {
            x: self.position.x,
            y: self.position.y,
            angle: self.angle,
            alive: self.alive,
        })
    }
}

/// Number of own most recent trail points skipped in the self-collision test
pub fn self_exclusion_window(settings: &SimulatorSettings, delta_time: f64) -> usize {
    let step = settings.movement_speed * delta_time;
    if step <= 0.0 {
        return usize::MAX;
    }
    (2.0 * settings.line_size / step).ceil() as usize
}

pub struct AchtungSimulator {
    settings: SimulatorSettings,
    rng: ChaCha8Rng,
    /// Every player of the match, dead ones included (their trails stay)
    players: Vec<TrailPlayer>,
    by_id: HashMap<PlayerId, usize>,
    /// Indices into `players` still racing
    active: Vec<usize>,
}

impl AchtungSimulator {
    pub fn new(settings: SimulatorSettings, seed: u64) -> Self {
        Self {
            settings,
            rng: ChaCha8Rng::seed_from_u64(seed),
            players: Vec::new(),
            by_id: HashMap::new(),
            active: Vec::new(),
        }
    }

    pub fn create_player(&self, data: &PlayerData) -> TrailPlayer {
        let position = Point { x: data.x, y: data.y };
        TrailPlayer {
            id: data.id,
            position,
            angle: data.angle,
            alive: true,
            input: Command::Straight,
            trail: vec![position],
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&TrailPlayer> {
        self.by_id.get(&id).map(|&index| &self.players[index])
    }

    fn out_of_bounds(&self, point: &Point) -> bool {
        point.x < 0.0
            || point.y < 0.0
            || point.x > self.settings.game_width
            || point.y > self.settings.game_height
    }

    /// Closest trail point within `line_size` of the player's head, if any
    fn closest_collision(&self, index: usize, delta_time: f64) -> Option<f64> {
        let head = self.players[index].position;
        if self.out_of_bounds(&head) {
            return Some(0.0);
        }

        let window = self_exclusion_window(&self.settings, delta_time);
        let mut closest: Option<f64> = None;
        for (other_index, other) in self.players.iter().enumerate() {
            let points = if other_index == index {
                let checked = other.trail.len().saturating_sub(window);
                &other.trail[..checked]
            } else {
                &other.trail[..]
            };

            for point in points {
                let distance = head.distance(point);
                if distance <= self.settings.line_size {
                    closest = Some(closest.map_or(distance, |c: f64| c.min(distance)));
                }
            }
        }
        closest
    }
}

impl Simulator for AchtungSimulator {
    fn mode(&self) -> GameMode {
        GameMode::Achtung
    }

    fn set_up_player_data(&mut self, player: &mut PlayerData, already_set_up: &[PlayerData]) {
        let order = already_set_up.len();
        let width = self.settings.game_width;
        let height = self.settings.game_height;

        let inset = (SPAWN_EDGE_MARGIN + SPAWN_LAYER_STEP * (order / 2) as f64).min(0.45);
        if order % 2 == 0 {
            player.x = width * inset;
            player.angle = 0.0;
        } else {
            player.x = width * (1.0 - inset);
            player.angle = PI;
        }
        player.y = self.rng.gen_range(height * SPAWN_BAND.0..height * SPAWN_BAND.1);
    }

    fn start(&mut self, players: &[PlayerData]) -> Result<(), SimulatorError> {
        if players.is_empty() {
            return Err(SimulatorError::NoPlayers);
        }

        let mut created = Vec::with_capacity(players.len());
        let mut by_id = HashMap::with_capacity(players.len());
        for (index, data) in players.iter().enumerate() {
            if by_id.insert(data.id, index).is_some() {
                return Err(SimulatorError::DuplicatePlayer(data.id));
            }
            created.push(self.create_player(data));
        }

        self.active = (0..created.len()).collect();
        self.players = created;
        self.by_id = by_id;
        Ok(())
    }

    fn on_input_received(&mut self, player_id: PlayerId, command: Command) {
        if let Some(&index) = self.by_id.get(&player_id) {
            self.players[index].input = command;
        }
    }

    fn simulate(&mut self, delta_time: f64, tick: &mut TickPacket) -> bool {
        // Sample everyone before anyone moves
        let sampled: Vec<(usize, Command)> = self
            .active
            .iter()
            .map(|&index| (index, self.players[index].input))
            .collect();

        for (index, command) in sampled {
            let player = &mut self.players[index];
            player.advance(command, delta_time, &self.settings);
            tick.set_player_data(player.id, player.delta());
        }

        let mut collisions: Vec<(usize, f64)> = self
            .active
            .iter()
            .filter_map(|&index| {
                self.closest_collision(index, delta_time)
                    .map(|distance| (index, distance))
            })
            .collect();
        // Closest impact is eliminated first; stable for equal distances
        collisions.sort_by(|a, b| a.1.total_cmp(&b.1));

        for (index, _) in collisions {
            let player = &mut self.players[index];
            player.alive = false;
            tick.set_player_data(player.id, player.delta());
            self.active.retain(|&i| i != index);

            if self.active.len() <= 1 {
                return true;
            }
        }

        self.active.is_empty()
    }

    fn desired_tps(&self) -> f64 {
        self.settings.movement_speed / self.settings.line_size
    }

    fn options(&self) -> GameOptions {
        game_options(GameMode::Achtung, &self.settings, self.desired_tps())
    }

    fn alive_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(line_size: f64, movement_speed: f64) -> SimulatorSettings {
        SimulatorSettings {
            turning_speed: PI / 2.0,
            movement_speed,
            line_size,
            game_width: 800.0,
            game_height: 600.0,
            allow_tps_compensation: false,
        }
    }

    fn player(id: PlayerId, x: f64, y: f64, angle: f64) -> PlayerData {
        PlayerData {
            id,
            name: format!("p{}", id),
            color: "#fff".to_string(),
            x,
            y,
            angle,
        }
    }

    fn alive(sim: &AchtungSimulator, id: PlayerId) -> bool {
        sim.player(id).map(|p| p.alive).unwrap_or(false)
    }

    #[test]
    fn desired_tps_keeps_samples_within_line_size() {
        let sim = AchtungSimulator::new(settings(3.0, 90.0), 1);
        assert_eq!(sim.desired_tps(), 30.0);
        let step = 90.0 / sim.desired_tps();
        assert!(step <= 3.0);
    }

    #[test]
    fn spawns_alternate_sides_and_are_reproducible() {
        let mut first = AchtungSimulator::new(settings(3.0, 90.0), 42);
        let mut second = AchtungSimulator::new(settings(3.0, 90.0), 42);

        let set_up = |sim: &mut AchtungSimulator| {
            let mut done: Vec<PlayerData> = Vec::new();
            for id in 1..=3 {
                let mut data = PlayerData::new(id, "x", "#fff");
                sim.set_up_player_data(&mut data, &done);
                done.push(data);
            }
            done
        };
        let a = set_up(&mut first);
        let b = set_up(&mut second);

        assert_eq!(a, b);
        assert!(a[0].x < 400.0 && a[0].angle == 0.0);
        assert!(a[1].x > 400.0 && a[1].angle == PI);
        assert!(a[2].x > a[0].x && a[2].x < 400.0);
        for data in &a {
            assert!(data.y >= 150.0 && data.y < 450.0);
        }
    }

    #[test]
    fn start_rejects_empty_and_duplicate_rosters() {
        let mut sim = AchtungSimulator::new(settings(3.0, 90.0), 1);
        assert!(matches!(sim.start(&[]), Err(SimulatorError::NoPlayers)));

        let twice = [player(1, 10.0, 10.0, 0.0), player(1, 50.0, 50.0, 0.0)];
        assert!(matches!(sim.start(&twice), Err(SimulatorError::DuplicatePlayer(1))));
    }

    #[test]
    fn unknown_player_input_is_ignored() {
        let mut sim = AchtungSimulator::new(settings(3.0, 90.0), 1);
        sim.start(&[player(1, 100.0, 100.0, 0.0)]).unwrap();
        sim.on_input_received(99, Command::Left);
        assert_eq!(sim.player(1).map(|p| p.input), Some(Command::Straight));
    }

    #[test]
    fn input_changed_after_a_tick_only_affects_the_next_tick() {
        let mut sim = AchtungSimulator::new(settings(12.0, 12.0), 1);
        sim.start(&[player(1, 100.0, 300.0, 0.0), player(2, 600.0, 300.0, PI)]).unwrap();

        sim.on_input_received(1, Command::Right);
        let mut first = TickPacket::new(0);
        assert!(!sim.simulate(1.0, &mut first));
        let after_first = sim.player(1).unwrap().position;

        sim.on_input_received(1, Command::Left);
        assert_eq!(first.player_data(1), Some(&sim.player(1).unwrap().delta()));
        assert_eq!(sim.player(1).unwrap().position, after_first);

        let mut second = TickPacket::new(1);
        sim.simulate(1.0, &mut second);
        // Turned right then back left: heading is east again
        assert!(sim.player(1).unwrap().angle.abs() < 1e-9);
    }

    #[test]
    fn straight_runner_never_hits_its_own_fresh_trail() {
        // Points land 1.5 apart with a 3.0 line; the last four are excluded
        let s = settings(3.0, 1.5);
        assert_eq!(self_exclusion_window(&s, 1.0), 4);

        let mut sim = AchtungSimulator::new(s, 1);
        sim.start(&[player(1, 50.0, 300.0, 0.0)]).unwrap();
        for tick in 0..100 {
            let mut packet = TickPacket::new(tick);
            assert!(!sim.simulate(1.0, &mut packet), "self collision at tick {}", tick);
        }
        assert!(alive(&sim, 1));
    }

    #[test]
    fn exclusion_window_is_clamped_for_degenerate_steps() {
        let s = settings(3.0, 90.0);
        assert_eq!(self_exclusion_window(&s, 0.0), usize::MAX);

        let mut sim = AchtungSimulator::new(s, 1);
        sim.start(&[player(1, 50.0, 300.0, 0.0), player(2, 500.0, 300.0, PI)]).unwrap();
        let mut packet = TickPacket::new(0);
        assert!(!sim.simulate(0.0, &mut packet));
    }

    #[test]
    fn closest_collision_is_eliminated_first_and_ends_the_match() {
        let mut sim = AchtungSimulator::new(settings(12.0, 12.0), 1);
        sim.start(&[player(1, 100.0, 100.0, 0.0), player(2, 100.0, 400.0, 0.0)]).unwrap();

        // Obstacles near each next head position: player 2 hits harder
        sim.players[0].trail.insert(0, Point { x: 112.0, y: 402.0 });
        sim.players[1].trail.insert(0, Point { x: 112.0, y: 105.0 });

        let mut packet = TickPacket::new(0);
        assert!(sim.simulate(1.0, &mut packet));
        assert!(alive(&sim, 1));
        assert!(!alive(&sim, 2));
        assert_eq!(sim.alive_count(), 1);
    }

    #[test]
    fn tie_break_follows_distance_not_join_order() {
        let mut sim = AchtungSimulator::new(settings(12.0, 12.0), 1);
        sim.start(&[player(1, 100.0, 100.0, 0.0), player(2, 100.0, 400.0, 0.0)]).unwrap();

        sim.players[0].trail.insert(0, Point { x: 112.0, y: 405.0 });
        sim.players[1].trail.insert(0, Point { x: 112.0, y: 102.0 });

        let mut packet = TickPacket::new(0);
        assert!(sim.simulate(1.0, &mut packet));
        assert!(!alive(&sim, 1));
        assert!(alive(&sim, 2));
        match packet.player_data(1) {
            Some(PlayerDelta::Achtung(delta)) => assert!(!delta.alive),
            other => panic!("unexpected delta {:?}", other),
        }
    }

    #[test]
    fn three_players_continue_after_one_crash() {
        let mut sim = AchtungSimulator::new(settings(12.0, 12.0), 1);
        sim.start(&[
            player(1, 100.0, 100.0, 0.0),
            player(2, 100.0, 300.0, 0.0),
            player(3, 100.0, 500.0, 0.0),
        ])
        .unwrap();
        sim.players[0].trail.insert(0, Point { x: 112.0, y: 303.0 });

        let mut packet = TickPacket::new(0);
        assert!(!sim.simulate(1.0, &mut packet));
        assert!(!alive(&sim, 2));
        assert_eq!(sim.alive_count(), 2);

        // The dead player's trail stays and it no longer moves
        let frozen = sim.player(2).unwrap().position;
        let mut packet = TickPacket::new(1);
        sim.simulate(1.0, &mut packet);
        assert_eq!(sim.player(2).unwrap().position, frozen);
        assert!(packet.player_data(2).is_none());
    }

    #[test]
    fn leaving_the_arena_is_fatal() {
        let mut sim = AchtungSimulator::new(settings(12.0, 12.0), 1);
        sim.start(&[player(1, 795.0, 300.0, 0.0), player(2, 100.0, 300.0, 0.0)]).unwrap();

        let mut packet = TickPacket::new(0);
        assert!(sim.simulate(1.0, &mut packet));
        assert!(!alive(&sim, 1));
        assert!(alive(&sim, 2));
    }
}
