//! Kurve Server - authoritative tick server for a multiplayer light-trail arena
//!
//! Browser clients connect over WebSocket, announce a name and ready up in a
//! lobby. Each game runs in its own task that samples input once per tick,
//! advances the simulator and broadcasts the resulting deltas.

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod protocol;
pub mod sim;
pub mod transport;
pub mod util;
pub mod world;
pub mod ws;
