//! Configuration module - environment variable parsing

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Game modes the server can host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    /// Light-trail racer: last player alive wins
    Achtung,
    /// Two paddles, one ball
    Pong,
}

impl FromStr for GameMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "achtung" => Ok(Self::Achtung),
            "pong" => Ok(Self::Pong),
            _ => Err(()),
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Achtung => f.write_str("achtung"),
            Self::Pong => f.write_str("pong"),
        }
    }
}

/// Physics settings handed to every simulator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatorSettings {
    /// Radians per second
    pub turning_speed: f64,
    /// Units per second
    pub movement_speed: f64,
    /// Trail thickness, also the collision radius
    pub line_size: f64,
    pub game_width: f64,
    pub game_height: f64,
    /// Feed the measured (possibly slowed) interval to the simulator instead of the desired one
    pub allow_tps_compensation: bool,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            turning_speed: 3.0,
            movement_speed: 90.0,
            line_size: 3.0,
            game_width: 800.0,
            game_height: 600.0,
            allow_tps_compensation: true,
        }
    }
}

/// Per-game lobby and simulation settings
#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    pub mode: GameMode,
    pub min_players: usize,
    pub max_players: usize,
    pub start_countdown_seconds: u64,
    pub simulator: SimulatorSettings,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            mode: GameMode::Achtung,
            min_players: 2,
            max_players: 8,
            start_countdown_seconds: 3,
            simulator: SimulatorSettings::default(),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub bind_addr: SocketAddr,
    /// Address advertised to browser clients
    pub connect_address: String,
    /// Port advertised to browser clients
    pub connect_port: u16,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origin for CORS
    pub client_origin: String,
    pub game: GameConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_address = lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_string());
        // Hosting platforms provide PORT, fall back to BIND_PORT
        let bind_port: u16 = match lookup("PORT") {
            Some(port) => parse_value("PORT", &port)?,
            None => parse_or(&lookup, "BIND_PORT", 8080)?,
        };
        let bind_addr = format!("{}:{}", bind_address, bind_port)
            .parse()
            .map_err(|_| ConfigError::InvalidAddress)?;

        let defaults = GameConfig::default();
        let mode = parse_or(&lookup, "GAME_MODE", defaults.mode)?;
        let min_players = parse_or(&lookup, "MIN_PLAYERS", defaults.min_players)?;
        let mut max_players = parse_or(&lookup, "MAX_PLAYERS", defaults.max_players)?;
        if mode == GameMode::Pong {
            max_players = max_players.min(2);
        }

        if min_players == 0 {
            return Err(ConfigError::Invalid {
                key: "MIN_PLAYERS",
                reason: "must be at least 1".to_string(),
            });
        }
        if min_players > max_players {
            return Err(ConfigError::Invalid {
                key: "MIN_PLAYERS",
                reason: format!("{} exceeds MAX_PLAYERS ({})", min_players, max_players),
            });
        }

        let sim = SimulatorSettings::default();
        let simulator = SimulatorSettings {
            turning_speed: parse_or(&lookup, "TURNING_SPEED", sim.turning_speed)?,
            movement_speed: positive(parse_or(&lookup, "MOVEMENT_SPEED", sim.movement_speed)?, "MOVEMENT_SPEED")?,
            line_size: positive(parse_or(&lookup, "LINE_SIZE", sim.line_size)?, "LINE_SIZE")?,
            game_width: positive(parse_or(&lookup, "GAME_WIDTH", sim.game_width)?, "GAME_WIDTH")?,
            game_height: positive(parse_or(&lookup, "GAME_HEIGHT", sim.game_height)?, "GAME_HEIGHT")?,
            allow_tps_compensation: parse_or(
                &lookup,
                "ALLOW_TPS_COMPENSATION",
                sim.allow_tps_compensation,
            )?,
        };

        Ok(Self {
            bind_addr,
            connect_address: lookup("CONNECT_ADDRESS").unwrap_or_else(|| "localhost".to_string()),
            connect_port: parse_or(&lookup, "CONNECT_PORT", bind_port)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: lookup("CLIENT_ORIGIN").unwrap_or_else(|| "*".to_string()),
            game: GameConfig {
                mode,
                min_players,
                max_players,
                start_countdown_seconds: parse_or(
                    &lookup,
                    "START_COUNTDOWN_SECONDS",
                    defaults.start_countdown_seconds,
                )?,
                simulator,
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        reason: format!("cannot parse {:?}", raw),
    })
}

fn positive(value: f64, key: &'static str) -> Result<f64, ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            reason: "must be a positive number".to_string(),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.connect_port, 8080);
        assert_eq!(config.connect_address, "localhost");
        assert_eq!(config.game, GameConfig::default());
    }

    #[test]
    fn port_env_overrides_bind_port() {
        let config = load(&[("PORT", "9000"), ("BIND_PORT", "7000")]).unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.connect_port, 9000);
    }

    #[test]
    fn simulator_options_are_parsed() {
        let config = load(&[
            ("GAME_MODE", "Achtung"),
            ("MOVEMENT_SPEED", "12"),
            ("LINE_SIZE", "12"),
            ("ALLOW_TPS_COMPENSATION", "false"),
        ])
        .unwrap();
        assert_eq!(config.game.simulator.movement_speed, 12.0);
        assert_eq!(config.game.simulator.line_size, 12.0);
        assert!(!config.game.simulator.allow_tps_compensation);
    }

    #[test]
    fn pong_caps_max_players_at_two() {
        let config = load(&[("GAME_MODE", "pong"), ("MAX_PLAYERS", "6")]).unwrap();
        assert_eq!(config.game.mode, GameMode::Pong);
        assert_eq!(config.game.max_players, 2);
    }

    #[test]
    fn rejects_inconsistent_player_limits() {
        let err = load(&[("MIN_PLAYERS", "5"), ("MAX_PLAYERS", "3")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MIN_PLAYERS", .. }));
    }

    #[test]
    fn rejects_non_positive_line_size() {
        let err = load(&[("LINE_SIZE", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "LINE_SIZE", .. }));
    }

    #[test]
    fn rejects_garbage_numbers() {
        assert!(load(&[("MAX_PLAYERS", "many")]).is_err());
        assert!(load(&[("GAME_MODE", "tetris")]).is_err());
    }
}
