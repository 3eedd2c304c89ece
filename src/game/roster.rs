//! Connected clients of one game, in join order

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use crate::protocol::{GameOptions, LobbyPlayerInfo, Packet, PlayerId, StartPlayer, TickPacket};
use crate::sim::PlayerData;
use crate::transport::ClientTransport;
use crate::world::OutputHandler;

/// Player colors, handed out in join order
pub const PALETTE: [&str; 8] = [
    "#ff4136", "#0074d9", "#2ecc40", "#ffdc00", "#b10dc9", "#ff851b", "#39cccc", "#f012be",
];

/// One connected client
pub struct ClientSlot {
    pub transport: ClientTransport,
    /// Set by HELLO; unnamed clients only watch
    pub name: Option<String>,
    pub color: String,
    pub ready: bool,
}

impl ClientSlot {
    pub fn id(&self) -> PlayerId {
        self.transport.client_id()
    }

    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }
}

pub struct Roster {
    slots: Vec<ClientSlot>,
    /// Filled by send-error callbacks, drained by the owning game
    failed: Arc<Mutex<Vec<PlayerId>>>,
    joins: usize,
}

impl Roster {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            failed: Arc::new(Mutex::new(Vec::new())),
            joins: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.slots.iter().any(|s| s.id() == id)
    }

    pub fn get(&self, id: PlayerId) -> Option<&ClientSlot> {
        self.slots.iter().find(|s| s.id() == id)
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut ClientSlot> {
        self.slots.iter_mut().find(|s| s.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientSlot> {
        self.slots.iter()
    }

    /// Register a client whose send failures get queued for removal
    pub fn add(&mut self, client_id: PlayerId, outbound: mpsc::Sender<String>) -> &ClientSlot {
        let mut transport = ClientTransport::new(client_id, outbound);
        let failed = self.failed.clone();
        transport.set_send_error_callback(Box::new(move |id, reason| {
            warn!(client_id = id, reason, "Send failed, dropping client");
            failed.lock().push(id);
        }));

        let color = self.next_color();
        self.joins += 1;
        self.slots.push(ClientSlot {
            transport,
            name: None,
            color,
            ready: false,
        });
        &self.slots[self.slots.len() - 1]
    }

    /// First palette color not in use; wraps around once all are taken
    fn next_color(&self) -> String {
        PALETTE
            .iter()
            .find(|color| !self.slots.iter().any(|s| s.color == **color))
            .unwrap_or(&PALETTE[self.joins % PALETTE.len()])
            .to_string()
    }

    pub fn remove(&mut self, id: PlayerId) -> Option<ClientSlot> {
        let position = self.slots.iter().position(|s| s.id() == id)?;
        Some(self.slots.remove(position))
    }

    /// Clients whose sends failed since the last call
    pub fn take_failed(&self) -> Vec<PlayerId> {
        std::mem::take(&mut *self.failed.lock())
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.failed.lock().clear();
    }

    pub fn named_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_named()).count()
    }

    pub fn ready_count(&self) -> usize {
        self.slots.iter().filter(|s| s.ready).count()
    }

    /// At least `min` ready clients and no named client still waiting
    pub fn all_named_ready(&self, min: usize) -> bool {
        self.ready_count() >= min && self.slots.iter().filter(|s| s.is_named()).all(|s| s.ready)
    }

    pub fn clear_ready(&mut self) {
        for slot in &mut self.slots {
            slot.ready = false;
        }
    }

    pub fn lobby_infos(&self) -> Vec<LobbyPlayerInfo> {
        self.slots
            .iter()
            .map(|s| LobbyPlayerInfo {
                id: s.id(),
                name: s.name.clone(),
                color: s.color.clone(),
                ready: s.ready,
            })
            .collect()
    }

    /// Named clients in join order, before spawn assignment
    pub fn match_players(&self) -> Vec<PlayerData> {
        self.slots
            .iter()
            .filter_map(|s| {
                s.name
                    .as_ref()
                    .map(|name| PlayerData::new(s.id(), name.clone(), s.color.clone()))
            })
            .collect()
    }

    /// Serialize once, send the same text to everyone
    pub fn broadcast(&mut self, packet: &Packet) {
        let text = match serde_json::to_string(packet) {
            Ok(text) => text,
            Err(e) => {
                warn!(kind = %packet.kind(), error = %e, "Failed to encode broadcast");
                return;
            }
        };
        for slot in &mut self.slots {
            // Failures were already routed to the callback
            let _ = slot.transport.send_text(text.clone());
        }
    }

    pub fn send_to(&mut self, id: PlayerId, packet: &Packet) {
        if let Some(slot) = self.get_mut(id) {
            if let Err(e) = slot.transport.send_object(packet) {
                warn!(client_id = id, error = %e, "Failed to send packet");
            }
        }
    }

    /// START_DATA with each recipient's own entry flagged as `you`
    pub fn send_start_data(&mut self, options: &GameOptions, players: &[StartPlayer]) {
        for slot in &mut self.slots {
            let id = slot.id();
            let personal = players
                .iter()
                .cloned()
                .map(|mut p| {
                    p.you = p.id == id;
                    p
                })
                .collect();
            let packet = Packet::start_data(options.clone(), personal);
            if let Err(e) = slot.transport.send_object(&packet) {
                warn!(client_id = id, error = %e, "Failed to send start data");
            }
        }
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputHandler for Roster {
    fn tick_ended(&mut self, packet: TickPacket) {
        self.broadcast(&packet.into_packet());
    }

    fn game_over(&mut self) {
        self.broadcast(&Packet::game_over());
    }
}
