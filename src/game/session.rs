//! One game: lobby, countdown, match and restart
//!
//! [`GameCore`] holds the state and reacts synchronously to every event.
//! [`GameSession`] is the task around it: it owns the inbox, the packet
//! dispatcher and the two timers, and feeds them to the core one at a time.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::protocol::{Command, Packet, PacketKind, PlayerId, StartPlayer};
use crate::sim::{build_simulator, PlayerData};
use crate::transport::{HandlerId, PacketDispatcher};
use crate::world::{sleep_until, InputHandler, TickOutcome, TickScheduler, World};

use super::registry::{GameEvent, GameHandle};
use super::roster::Roster;

pub const MAX_NAME_CHARS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lobby,
    Countdown,
    Running,
    Ended,
    /// No clients left; the task exits
    Discarded,
}

impl Phase {
    /// Names can change until a match starts
    pub fn accepts_names(self) -> bool {
        matches!(self, Phase::Lobby | Phase::Countdown)
    }
}

/// Accept a HELLO whose trimmed name has 1 to 20 characters
pub fn validate_name(packet: &Packet) -> Option<String> {
    match packet {
        Packet::Hello { name } => {
            let name = name.trim();
            let chars = name.chars().count();
            (1..=MAX_NAME_CHARS).contains(&chars).then(|| name.to_string())
        }
        _ => None,
    }
}

/// Decides whose commands reach the world; closed at game over
#[derive(Debug, Default)]
pub struct InputGate {
    open: bool,
    participants: HashSet<PlayerId>,
}

impl InputGate {
    fn open(&mut self, participants: impl IntoIterator<Item = PlayerId>) {
        self.participants = participants.into_iter().collect();
        self.open = true;
    }

    pub fn admits(&self, id: PlayerId) -> bool {
        self.open && self.participants.contains(&id)
    }

    /// Returns whether `id` was playing
    fn remove(&mut self, id: PlayerId) -> bool {
        self.participants.remove(&id)
    }
}

impl InputHandler for InputGate {
    fn game_over(&mut self) {
        self.open = false;
    }
}

/// State of one game, mutated only from its own task
pub struct GameCore {
    id: Uuid,
    seed: u64,
    matches_played: u64,
    config: GameConfig,
    phase: Phase,
    roster: Roster,
    world: Option<World>,
    gate: InputGate,
    ticker: TickScheduler,
    countdown: TickScheduler,
    clients: Arc<AtomicUsize>,
    accepting: Arc<AtomicBool>,
}

impl GameCore {
    pub fn new(id: Uuid, seed: u64, config: GameConfig, clients: Arc<AtomicUsize>, accepting: Arc<AtomicBool>) -> Self {
        accepting.store(true, Ordering::Relaxed);
        Self {
            id,
            seed,
            matches_played: 0,
            config,
            phase: Phase::Lobby,
            roster: Roster::new(),
            world: None,
            gate: InputGate::default(),
            ticker: TickScheduler::new(),
            countdown: TickScheduler::new(),
            clients,
            accepting,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn world(&self) -> Option<&World> {
        self.world.as_ref()
    }

    pub fn matches_played(&self) -> u64 {
        self.matches_played
    }

    /// Add a client if the lobby is open and not full
    pub fn connect(&mut self, client_id: PlayerId, outbound: mpsc::Sender<String>) -> bool {
        if self.phase != Phase::Lobby || self.roster.len() >= self.config.max_players {
            return false;
        }
        self.roster.add(client_id, outbound);
        info!(game_id = %self.id, client_id, clients = self.roster.len(), "Client connected");
        self.refresh_lobby();
        self.reap();
        true
    }

    pub fn set_name(&mut self, client_id: PlayerId, name: String) {
        if !self.phase.accepts_names() {
            return;
        }
        let Some(slot) = self.roster.get_mut(client_id) else {
            return;
        };
        debug!(game_id = %self.id, client_id, name = %name, "Client named");
        slot.name = Some(name);
        self.refresh_lobby();
        self.reap();
    }

    /// START: ready up in the lobby, or vote for a restart after game over
    pub fn mark_ready(&mut self, client_id: PlayerId) {
        match self.phase {
            Phase::Lobby | Phase::Countdown | Phase::Ended => {}
            Phase::Running | Phase::Discarded => return,
        }
        let Some(slot) = self.roster.get_mut(client_id) else {
            return;
        };
        if !slot.is_named() {
            debug!(game_id = %self.id, client_id, "START from unnamed client ignored");
            return;
        }
        slot.ready = true;

        if self.phase == Phase::Ended {
            self.maybe_restart();
        } else {
            self.refresh_lobby();
        }
        self.reap();
    }

    pub fn input(&mut self, client_id: PlayerId, command: Command) {
        if self.phase != Phase::Running || !self.gate.admits(client_id) {
            return;
        }
        if let Some(world) = self.world.as_mut() {
            world.on_input(client_id, command);
        }
    }

    /// The tick timer fired
    pub fn on_tick(&mut self) {
        let outcome = match self.world.as_mut() {
            Some(world) => world.tick(&mut self.roster, &mut self.gate),
            None => TickOutcome::Stopped,
        };
        match outcome {
            TickOutcome::Continue(interval) => self.ticker.schedule(interval),
            TickOutcome::GameOver => self.finish_match(),
            TickOutcome::Stopped => self.ticker.cancel(),
        }
        self.reap();
    }

    /// The countdown timer fired
    pub fn on_countdown_elapsed(&mut self) {
        if self.phase == Phase::Countdown {
            self.start_match();
        }
        self.reap();
    }

    /// The client's reader ended; an ordinary send tells whether it is gone
    pub fn probe(&mut self, client_id: PlayerId) {
        let packet = self.lobby_packet();
        self.roster.send_to(client_id, &packet);
        self.reap();
    }

    pub fn shutdown(&mut self) {
        if self.phase == Phase::Running {
            self.end_match_early("server shutting down");
        }
        self.roster.clear();
        self.discard();
    }

    /// Remove every client whose send failed, until no new failures appear
    pub fn reap(&mut self) {
        loop {
            let failed = self.roster.take_failed();
            if failed.is_empty() {
                break;
            }
            for client_id in failed {
                self.remove_client(client_id);
            }
        }
    }

    fn remove_client(&mut self, client_id: PlayerId) {
        if self.roster.remove(client_id).is_none() {
            return;
        }
        info!(game_id = %self.id, client_id, clients = self.roster.len(), phase = ?self.phase, "Client removed");

        if self.roster.is_empty() {
            self.discard();
            return;
        }

        match self.phase {
            Phase::Lobby => self.refresh_lobby(),
            Phase::Countdown => {
                // Roster changed: the countdown starts over if still ready
                self.countdown.cancel();
                self.phase = Phase::Lobby;
                self.refresh_lobby();
            }
            Phase::Running => {
                self.publish_counts();
                // Losing any participant ends the match for everyone
                if self.gate.remove(client_id) {
                    self.end_match_early("participant disconnected");
                }
            }
            Phase::Ended => {
                self.publish_counts();
                if self.roster.named_count() < self.config.min_players {
                    self.reopen_lobby();
                } else {
                    self.maybe_restart();
                }
            }
            Phase::Discarded => {}
        }
    }

    /// Enter or leave the countdown, then publish the lobby
    fn refresh_lobby(&mut self) {
        let ready = self.roster.all_named_ready(self.config.min_players);
        match self.phase {
            Phase::Lobby if ready => {
                self.phase = Phase::Countdown;
                self.countdown
                    .schedule(Duration::from_secs(self.config.start_countdown_seconds));
                info!(
                    game_id = %self.id,
                    seconds = self.config.start_countdown_seconds,
                    "Countdown started"
                );
            }
            Phase::Countdown if !ready => {
                self.phase = Phase::Lobby;
                self.countdown.cancel();
                info!(game_id = %self.id, "Countdown cancelled");
            }
            _ => {}
        }
        self.publish_counts();
        let packet = self.lobby_packet();
        self.roster.broadcast(&packet);
    }

    fn lobby_packet(&self) -> Packet {
        Packet::lobby_state(
            self.config.min_players,
            self.config.max_players,
            self.roster.len(),
            self.roster.ready_count(),
            self.roster.lobby_infos(),
            self.phase == Phase::Countdown,
        )
    }

    fn maybe_restart(&mut self) {
        if self.phase == Phase::Ended && self.roster.all_named_ready(self.config.min_players) {
            info!(game_id = %self.id, "All players ready again, restarting");
            self.start_match();
        }
    }

    fn start_match(&mut self) {
        self.countdown.cancel();
        let match_number = self.matches_played + 1;
        let seed = self.seed.wrapping_add(match_number);
        let simulator = build_simulator(self.config.mode, self.config.simulator, seed);
        let mut world = World::new(simulator, self.config.simulator.allow_tps_compensation);

        let mut players = self.roster.match_players();
        world.set_up_players(&mut players);
        let first_tick = match world.start(&players) {
            Ok(delay) => delay,
            Err(e) => {
                warn!(game_id = %self.id, error = %e, "Match could not start, back to lobby");
                self.reopen_lobby();
                return;
            }
        };

        self.phase = Phase::Running;
        self.matches_played = match_number;
        self.roster.clear_ready();
        self.gate.open(players.iter().map(|p| p.id));
        let start_players: Vec<StartPlayer> = players.iter().map(PlayerData::to_start_player).collect();
        self.roster.send_start_data(&world.options(), &start_players);
        self.world = Some(world);
        self.ticker.schedule(first_tick);
        self.publish_counts();

        info!(
            game_id = %self.id,
            match_number = self.matches_played,
            players = players.len(),
            mode = %self.config.mode,
            "Match started"
        );
    }

    /// Stop a running world through the regular game-over path
    fn end_match_early(&mut self, reason: &str) {
        let stopped = match self.world.as_mut() {
            Some(world) => world.stop(&mut self.roster, &mut self.gate),
            None => false,
        };
        if stopped {
            info!(game_id = %self.id, reason, "Match ended early");
            self.finish_match();
        }
    }

    fn finish_match(&mut self) {
        self.phase = Phase::Ended;
        self.ticker.cancel();
        self.roster.clear_ready();
        if let Some(world) = &self.world {
            info!(
                game_id = %self.id,
                match_number = self.matches_played,
                ticks = world.stats().ticks_run,
                slow_ticks = world.stats().slow_ticks,
                "Match over"
            );
        }
        if self.roster.named_count() < self.config.min_players {
            self.reopen_lobby();
        } else {
            self.publish_counts();
        }
    }

    fn reopen_lobby(&mut self) {
        self.phase = Phase::Lobby;
        self.world = None;
        self.ticker.cancel();
        self.countdown.cancel();
        self.roster.clear_ready();
        info!(game_id = %self.id, clients = self.roster.len(), "Lobby reopened");
        self.refresh_lobby();
    }

    fn discard(&mut self) {
        self.phase = Phase::Discarded;
        self.world = None;
        self.ticker.cancel();
        self.countdown.cancel();
        self.publish_counts();
        info!(game_id = %self.id, "Game discarded");
    }

    fn publish_counts(&self) {
        let clients = self.roster.len();
        self.clients.store(clients, Ordering::Relaxed);
        let accepting = self.phase == Phase::Lobby && clients < self.config.max_players;
        self.accepting.store(accepting, Ordering::Relaxed);
    }
}

/// The task that owns one game
pub struct GameSession {
    id: Uuid,
    core: GameCore,
    dispatcher: PacketDispatcher<GameCore>,
    hello_handler: Option<HandlerId>,
    inbox: mpsc::Receiver<GameEvent>,
}

impl GameSession {
    pub fn new(
        id: Uuid,
        seed: u64,
        config: GameConfig,
        inbox_tx: mpsc::Sender<GameEvent>,
        inbox: mpsc::Receiver<GameEvent>,
    ) -> (Self, GameHandle) {
        let clients = Arc::new(AtomicUsize::new(0));
        let accepting = Arc::new(AtomicBool::new(true));
        let handle = GameHandle::new(id, inbox_tx, clients.clone(), accepting.clone());
        let core = GameCore::new(id, seed, config, clients, accepting);

        let mut dispatcher = PacketDispatcher::<GameCore>::new();
        dispatcher.set_object_hook(move |client_id, packet| {
            trace!(game_id = %id, client_id, kind = %packet.kind(), "Packet received");
        });
        dispatcher.on_validated(
            PacketKind::Input,
            |packet| match packet {
                Packet::Input { command } => Some(*command),
                _ => None,
            },
            |core: &mut GameCore, client_id, command| core.input(client_id, command),
        );
        dispatcher.on_packet(PacketKind::Start, |core: &mut GameCore, client_id, _| {
            core.mark_ready(client_id)
        });

        let mut session = Self {
            id,
            core,
            dispatcher,
            hello_handler: None,
            inbox,
        };
        session.sync_handlers();
        (session, handle)
    }

    /// HELLO is only handled while names may change
    fn sync_handlers(&mut self) {
        let wants_hello = self.core.phase().accepts_names();
        match (wants_hello, self.hello_handler) {
            (true, None) => {
                let id = self.dispatcher.on_validated(
                    PacketKind::Hello,
                    validate_name,
                    |core: &mut GameCore, client_id, name| core.set_name(client_id, name),
                );
                self.hello_handler = Some(id);
            }
            (false, Some(id)) => {
                if let Err(e) = self.dispatcher.unregister(id) {
                    warn!(game_id = %self.id, error = %e, "HELLO handler already gone");
                }
                self.hello_handler = None;
            }
            _ => {}
        }
    }

    pub fn handle_event(&mut self, event: GameEvent) {
        match event {
            GameEvent::Connected {
                client_id,
                outbound,
                reply,
            } => {
                let accepted = self.core.connect(client_id, outbound);
                // A joiner that gave up has also dropped its socket
                let _ = reply.send(accepted);
            }
            GameEvent::Frame { client_id, text } => {
                if !self.core.roster.contains(client_id) {
                    return;
                }
                if let Err(e) = self.dispatcher.dispatch_text(&mut self.core, client_id, &text) {
                    warn!(game_id = %self.id, client_id, error = %e, "Dropping inbound frame");
                }
            }
            GameEvent::ReaderClosed { client_id } => self.core.probe(client_id),
            GameEvent::Shutdown => self.core.shutdown(),
        }
        self.sync_handlers();
    }

    /// Run until the game is discarded
    pub async fn run(mut self) {
        info!(game_id = %self.id, "Game task started");

        while self.core.phase() != Phase::Discarded {
            let tick_at = self.core.ticker.deadline();
            let countdown_at = self.core.countdown.deadline();

            tokio::select! {
                biased;

                _ = sleep_until(tick_at) => {
                    self.core.ticker.cancel();
                    self.core.on_tick();
                }
                _ = sleep_until(countdown_at) => {
                    self.core.countdown.cancel();
                    self.core.on_countdown_elapsed();
                }
                event = self.inbox.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => self.core.shutdown(),
                },
            }
            self.sync_handlers();
        }

        info!(game_id = %self.id, matches = self.core.matches_played(), "Game task finished");
    }
}
