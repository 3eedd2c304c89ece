//! Wire packet definitions
//! Every packet is a JSON object with a `type` discriminator

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::GameMode;

/// Identity of a player, stable for the lifetime of a game
pub type PlayerId = u32;

/// Discriminator of every packet kind, used for callback dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Tick,
    Input,
    Start,
    Hello,
    StartData,
    GameOver,
    LobbyState,
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tick => "TICK",
            Self::Input => "INPUT",
            Self::Start => "START",
            Self::Hello => "HELLO",
            Self::StartData => "START_DATA",
            Self::GameOver => "GAME_OVER",
            Self::LobbyState => "LOBBY_STATE",
        };
        f.write_str(name)
    }
}

/// Player commands; only the latest one per player matters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Keep heading / hold paddle still
    #[default]
    Straight,
    /// Turn counter-clockwise
    Left,
    /// Turn clockwise
    Right,
    /// Paddle up
    Up,
    /// Paddle down
    Down,
}

/// All packets exchanged between server and clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Packet {
    /// Per-tick world delta (server -> client, broadcast)
    Tick(TickPacket),

    /// Latest command of a player (client -> server)
    Input { command: Command },

    /// Request to start or restart (client -> server)
    Start,

    /// Announce the display name (client -> server)
    Hello { name: String },

    /// Match parameters and spawn info (server -> client, per recipient)
    StartData {
        options: GameOptions,
        players: Vec<StartPlayer>,
    },

    /// Match has ended (server -> client, broadcast)
    GameOver,

    /// Lobby roster and readiness (server -> client)
    LobbyState(LobbyState),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::Tick(_) => PacketKind::Tick,
            Self::Input { .. } => PacketKind::Input,
            Self::Start => PacketKind::Start,
            Self::Hello { .. } => PacketKind::Hello,
            Self::StartData { .. } => PacketKind::StartData,
            Self::GameOver => PacketKind::GameOver,
            Self::LobbyState(_) => PacketKind::LobbyState,
        }
    }

    pub fn input(command: Command) -> Self {
        Self::Input { command }
    }

    pub fn hello(name: impl Into<String>) -> Self {
        Self::Hello { name: name.into() }
    }

    pub fn start() -> Self {
        Self::Start
    }

    /// `you` flags are all false here; the roster sets them per recipient
    pub fn start_data(options: GameOptions, players: Vec<StartPlayer>) -> Self {
        Self::StartData { options, players }
    }

    pub fn game_over() -> Self {
        Self::GameOver
    }

    pub fn lobby_state(
        min_players: usize,
        max_players: usize,
        connected_players: usize,
        players_ready: usize,
        player_infos: Vec<LobbyPlayerInfo>,
        prepare_for_start: bool,
    ) -> Self {
        Self::LobbyState(LobbyState {
            min_players,
            max_players,
            connected_players,
            players_ready,
            player_infos,
            prepare_for_start,
        })
    }
}

/// Tick packet payload; filled in during a tick, then frozen into a [`Packet`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickPacket {
    pub tick_number: u64,
    /// Keyed by the decimal player id; JSON object keys are strings
    pub players: HashMap<String, PlayerDelta>,
    pub tps_text: String,
}

impl TickPacket {
    pub fn new(tick_number: u64) -> Self {
        Self {
            tick_number,
            players: HashMap::new(),
            tps_text: String::new(),
        }
    }

    pub fn with_tps_text(mut self, tps_text: impl Into<String>) -> Self {
        self.tps_text = tps_text.into();
        self
    }

    /// Last write per player wins
    pub fn set_player_data(&mut self, player_id: PlayerId, delta: PlayerDelta) {
        self.players.insert(player_id.to_string(), delta);
    }

    pub fn player_data(&self, player_id: PlayerId) -> Option<&PlayerDelta> {
        self.players.get(&player_id.to_string())
    }

    pub fn into_packet(self) -> Packet {
        Packet::Tick(self)
    }
}

/// Mode-specific state delta of one player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PlayerDelta {
    Achtung(TrailDelta),
    Pong(PaddleDelta),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailDelta {
    pub x: f64,
    pub y: f64,
    pub angle: f64,
    pub alive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaddleDelta {
    /// Paddle center along the vertical axis
    pub offset: f64,
    pub score: u32,
    pub ball_x: f64,
    pub ball_y: f64,
}

/// Match parameters sent with START_DATA
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOptions {
    pub mode: GameMode,
    pub game_width: f64,
    pub game_height: f64,
    pub line_size: f64,
    pub movement_speed: f64,
    pub turning_speed: f64,
    pub tps: f64,
}

/// Public spawn info of one player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartPlayer {
    pub id: PlayerId,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub color: String,
    /// True only in the copy sent to this player
    pub you: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyState {
    pub min_players: usize,
    pub max_players: usize,
    pub connected_players: usize,
    pub players_ready: usize,
    pub player_infos: Vec<LobbyPlayerInfo>,
    pub prepare_for_start: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyPlayerInfo {
    pub id: PlayerId,
    pub name: Option<String>,
    pub color: String,
    pub ready: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(packet: &Packet) -> Packet {
        let text = serde_json::to_string(packet).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    fn options() -> GameOptions {
        GameOptions {
            mode: GameMode::Achtung,
            game_width: 800.0,
            game_height: 600.0,
            line_size: 3.0,
            movement_speed: 90.0,
            turning_speed: 3.0,
            tps: 30.0,
        }
    }

    #[test]
    fn every_packet_kind_survives_the_wire() {
        let mut tick = TickPacket::new(42).with_tps_text("tps: 30.0");
        tick.set_player_data(
            1,
            PlayerDelta::Achtung(TrailDelta { x: 10.5, y: 20.25, angle: 0.1, alive: true }),
        );
        tick.set_player_data(
            2,
            PlayerDelta::Pong(PaddleDelta { offset: 300.0, score: 3, ball_x: 1.0, ball_y: 2.0 }),
        );

        let packets = vec![
            tick.into_packet(),
            Packet::input(Command::Left),
            Packet::hello("ada"),
            Packet::start(),
            Packet::start_data(
                options(),
                vec![StartPlayer {
                    id: 1,
                    name: "ada".to_string(),
                    x: 80.0,
                    y: 310.0,
                    color: "#ff4136".to_string(),
                    you: true,
                }],
            ),
            Packet::game_over(),
            Packet::lobby_state(
                2,
                8,
                1,
                0,
                vec![LobbyPlayerInfo { id: 1, name: None, color: "#ff4136".to_string(), ready: false }],
                false,
            ),
        ];

        for packet in packets {
            assert_eq!(roundtrip(&packet), packet, "{} changed on the wire", packet.kind());
        }
    }

    #[test]
    fn wire_shape_uses_screaming_kinds_and_camel_fields() {
        let value = serde_json::to_value(TickPacket::new(7).into_packet()).unwrap();
        assert_eq!(value, json!({ "type": "TICK", "tickNumber": 7, "players": {}, "tpsText": "" }));

        let value = serde_json::to_value(Packet::input(Command::Right)).unwrap();
        assert_eq!(value, json!({ "type": "INPUT", "command": "RIGHT" }));

        let value = serde_json::to_value(Packet::game_over()).unwrap();
        assert_eq!(value, json!({ "type": "GAME_OVER" }));
    }

    #[test]
    fn client_frames_decode() {
        let packet: Packet = serde_json::from_str(r#"{"type":"HELLO","name":"bob"}"#).unwrap();
        assert_eq!(packet, Packet::hello("bob"));
        assert_eq!(packet.kind(), PacketKind::Hello);

        let packet: Packet = serde_json::from_str(r#"{"type":"START"}"#).unwrap();
        assert_eq!(packet.kind(), PacketKind::Start);
    }

    #[test]
    fn last_player_write_wins() {
        let mut tick = TickPacket::new(1);
        let delta = |x| PlayerDelta::Achtung(TrailDelta { x, y: 0.0, angle: 0.0, alive: true });
        tick.set_player_data(5, delta(1.0));
        tick.set_player_data(5, delta(2.0));
        assert_eq!(tick.players.len(), 1);
        assert_eq!(tick.player_data(5), Some(&delta(2.0)));
    }
}
