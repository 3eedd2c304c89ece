//! Registry of live games and the lobby new connections join

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::protocol::PlayerId;

use super::session::GameSession;

/// Inbox capacity of a game task
const GAME_INBOX_CAPACITY: usize = 1024;

/// Lobbies tried before a join gives up
const JOIN_ATTEMPTS: usize = 3;

/// Everything a game task reacts to besides its own timers
#[derive(Debug)]
pub enum GameEvent {
    /// A new connection; the game answers whether it took the client
    Connected {
        client_id: PlayerId,
        outbound: mpsc::Sender<String>,
        reply: oneshot::Sender<bool>,
    },
    /// One inbound text frame
    Frame { client_id: PlayerId, text: String },
    /// The reader ended; the game probes the client with a send
    ReaderClosed { client_id: PlayerId },
    Shutdown,
}

/// Handle to a running game
#[derive(Clone)]
pub struct GameHandle {
    pub id: Uuid,
    inbox: mpsc::Sender<GameEvent>,
    clients: Arc<AtomicUsize>,
    accepting: Arc<AtomicBool>,
}

impl GameHandle {
    pub(crate) fn new(
        id: Uuid,
        inbox: mpsc::Sender<GameEvent>,
        clients: Arc<AtomicUsize>,
        accepting: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            inbox,
            clients,
            accepting,
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }

    /// In the lobby and below the player limit
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Relaxed)
    }

    pub async fn send(&self, event: GameEvent) -> Result<(), JoinError> {
        self.inbox.send(event).await.map_err(|_| JoinError::GameClosed(self.id))
    }
}

/// Registry of all live games
pub struct GameRegistry {
    config: GameConfig,
    games: Arc<DashMap<Uuid, GameHandle>>,
    /// Lobby new connections are sent to first
    open_game: Mutex<Option<Uuid>>,
    next_client_id: AtomicU32,
}

impl GameRegistry {
    pub fn new(config: GameConfig) -> Self {
        Self {
            config,
            games: Arc::new(DashMap::new()),
            open_game: Mutex::new(None),
            next_client_id: AtomicU32::new(1),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<GameHandle> {
        self.games.get(id).map(|g| g.value().clone())
    }

    pub fn active_games(&self) -> usize {
        self.games.len()
    }

    pub fn connected_players(&self) -> usize {
        self.games.iter().map(|g| g.value().client_count()).sum()
    }

    /// Place a connection in an open lobby, creating a game when none accepts it
    pub async fn join(&self, outbound: mpsc::Sender<String>) -> Result<(GameHandle, PlayerId), JoinError> {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let mut last_error = None;

        for _ in 0..JOIN_ATTEMPTS {
            let handle = self.open_lobby();
            let (reply, accepted) = oneshot::channel();
            let event = GameEvent::Connected {
                client_id,
                outbound: outbound.clone(),
                reply,
            };

            if let Err(e) = handle.send(event).await {
                last_error = Some(e);
            } else if accepted.await.unwrap_or(false) {
                debug!(game_id = %handle.id, client_id, "Client joined game");
                return Ok((handle, client_id));
            } else {
                last_error = Some(JoinError::GameClosed(handle.id));
            }
            self.close_lobby(handle.id);
        }

        Err(last_error.unwrap_or(JoinError::NoLobby))
    }

    /// Current lobby, a reopened one, or a fresh game
    fn open_lobby(&self) -> GameHandle {
        let mut open = self.open_game.lock();
        if let Some(handle) = (*open).and_then(|id| self.get(&id)) {
            if handle.is_accepting() {
                return handle;
            }
        }

        let reopened = self
            .games
            .iter()
            .find(|g| g.value().is_accepting())
            .map(|g| g.value().clone());
        let handle = match reopened {
            Some(handle) => handle,
            None => self.spawn_game(),
        };
        *open = Some(handle.id);
        handle
    }

    fn close_lobby(&self, id: Uuid) {
        let mut open = self.open_game.lock();
        if *open == Some(id) {
            *open = None;
        }
    }

    fn spawn_game(&self) -> GameHandle {
        let id = Uuid::new_v4();
        let seed: u64 = rand::random();
        let (inbox_tx, inbox_rx) = mpsc::channel(GAME_INBOX_CAPACITY);
        let (session, handle) = GameSession::new(id, seed, self.config.clone(), inbox_tx, inbox_rx);
        self.games.insert(id, handle.clone());

        let games = self.games.clone();
        tokio::spawn(async move {
            session.run().await;
            games.remove(&id);
            info!(game_id = %id, "Game removed");
        });

        info!(game_id = %id, mode = %self.config.mode, "Game created");
        handle
    }

    /// Tell every live game to shut down
    pub async fn shutdown_all(&self) {
        let handles: Vec<GameHandle> = self.games.iter().map(|g| g.value().clone()).collect();
        for handle in handles {
            // A game that already exited has nothing to shut down
            let _ = handle.send(GameEvent::Shutdown).await;
        }
    }
}

/// Join errors
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("Game {0} is closed")]
    GameClosed(Uuid),

    #[error("No lobby accepted the connection")]
    NoLobby,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_players: usize) -> GameConfig {
        GameConfig {
            max_players,
            ..GameConfig::default()
        }
    }

    #[tokio::test]
    async fn connections_share_the_open_lobby() {
        let registry = GameRegistry::new(config(8));
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);

        let (first, id1) = registry.join(tx1).await.unwrap();
        let (second, id2) = registry.join(tx2).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_ne!(id1, id2);
        assert_eq!(registry.active_games(), 1);
        assert_eq!(registry.connected_players(), 2);
    }

    #[tokio::test]
    async fn full_lobby_spills_into_a_new_game() {
        let registry = GameRegistry::new(config(2));
        let mut receivers = Vec::new();
        let mut games = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = mpsc::channel(8);
            receivers.push(rx);
            games.push(registry.join(tx).await.unwrap().0.id);
        }

        assert_eq!(games[0], games[1]);
        assert_ne!(games[1], games[2]);
        assert_eq!(registry.active_games(), 2);
    }

    #[tokio::test]
    async fn shut_down_games_leave_the_registry() {
        let registry = GameRegistry::new(config(8));
        let (tx, mut rx) = mpsc::channel(8);
        let (handle, _) = registry.join(tx).await.unwrap();

        registry.shutdown_all().await;
        // Lobby state, then the socket closes
        while rx.recv().await.is_some() {}
        handle.inbox.closed().await;

        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while registry.active_games() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
