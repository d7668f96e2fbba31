//! Player records and the per-game player store
//!
//! This module handles the server-side management of a game's participants:
//! - Player lifecycle (join, voluntary leave, kick, game shutdown)
//! - Unique player id minting inside the store's lock
//! - Answer recording with write-once semantics per question
//! - Thread-safe iteration, including snapshot iteration for callbacks that
//!   mutate the store
//!
//! The host is never a member of the store; it is reachable only through the
//! game's host connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::info;
use parking_lot::{Mutex, RwLock};
use shared::{AnswerIndex, QuestionIndex, ScoreMap, MODE_ADD, MODE_SELF};
use tokio::time::Instant;

use crate::connection::Connection;
use crate::utils::{mint_id, PLAYER_ID_LENGTH};

/// A participant in a single game.
///
/// Players are created on join and live until they are removed from their
/// game or the game stops; they are never shared across games.
pub struct Player {
    /// Unique id within the owning store.
    pub id: String,
    /// Display name, unique within the game up to case folding.
    pub name: String,
    /// The connection answers and broadcasts are delivered over.
    pub net: Arc<Connection>,
    score: AtomicU32,
    answers: Mutex<HashMap<QuestionIndex, AnswerIndex>>,
    answer_time: Mutex<Option<Instant>>,
}

impl Player {
    fn new(id: String, name: &str, net: Arc<Connection>) -> Self {
        Self {
            id,
            name: name.to_string(),
            net,
            score: AtomicU32::new(0),
            answers: Mutex::new(HashMap::new()),
            answer_time: Mutex::new(None),
        }
    }

    /// Records the answer for the provided question and stamps the answer
    /// time. Returns false when the question was already answered; answers
    /// are immutable once written.
    pub fn record_answer(&self, question: QuestionIndex, answer: AnswerIndex) -> bool {
        let mut answers = self.answers.lock();
        if answers.contains_key(&question) {
            return false;
        }
        answers.insert(question, answer);
        *self.answer_time.lock() = Some(Instant::now());
        true
    }

    /// Whether the player has answered the provided question.
    pub fn has_answered(&self, question: QuestionIndex) -> bool {
        self.answers.lock().contains_key(&question)
    }

    /// The answer chosen for the provided question, if any.
    pub fn answer_for(&self, question: QuestionIndex) -> Option<AnswerIndex> {
        self.answers.lock().get(&question).copied()
    }

    /// When the player most recently answered.
    pub fn answer_time(&self) -> Option<Instant> {
        *self.answer_time.lock()
    }

    /// Adds points to the player's score. Scores only ever grow.
    pub fn award(&self, points: u32) {
        self.score.fetch_add(points, Ordering::AcqRel);
    }

    pub fn score(&self) -> u32 {
        self.score.load(Ordering::Acquire)
    }
}

/// Concurrent map of player id to player for one game.
pub struct PlayerStore {
    players: RwLock<HashMap<String, Arc<Player>>>,
}

impl PlayerStore {
    pub fn new() -> Self {
        Self {
            players: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a player for the provided connection and name.
    ///
    /// The id is minted while the write lock is held so the uniqueness check
    /// stays consistent through insertion. Before the player is inserted the
    /// joiner is told its own identity and then sent one roster entry per
    /// existing player, in that order.
    pub fn create(&self, net: Arc<Connection>, name: &str) -> Arc<Player> {
        let mut players = self.players.write();
        let id = mint_id(PLAYER_ID_LENGTH, |candidate| players.contains_key(candidate));
        let player = Arc::new(Player::new(id, name, net));

        player
            .net
            .send(&shared::player_data_packet(&player.id, &player.name, MODE_SELF));
        for other in players.values() {
            player
                .net
                .send(&shared::player_data_packet(&other.id, &other.name, MODE_ADD));
        }

        players.insert(player.id.clone(), Arc::clone(&player));
        player
    }

    /// Retrieves a player by id.
    pub fn get(&self, id: &str) -> Option<Arc<Player>> {
        self.players.read().get(id).cloned()
    }

    /// Removes a player by id, returning it when present.
    pub fn remove(&self, id: &str) -> Option<Arc<Player>> {
        let removed = self.players.write().remove(id);
        if let Some(player) = &removed {
            info!("Player '{}' ({}) removed from store", player.name, player.id);
        }
        removed
    }

    /// Whether any player matches the provided test.
    pub fn any_match(&self, test: impl Fn(&Player) -> bool) -> bool {
        self.players.read().values().any(|player| test(player))
    }

    /// Whether every player matches the provided test. Vacuously true for an
    /// empty store.
    pub fn all_match(&self, test: impl Fn(&Player) -> bool) -> bool {
        self.players.read().values().all(|player| test(player))
    }

    /// Runs the action on every player while holding the read lock. The
    /// action must not touch the store.
    pub fn for_each(&self, mut action: impl FnMut(&Arc<Player>)) {
        for player in self.players.read().values() {
            action(player);
        }
    }

    /// Runs the action on a snapshot of the players, taken under the read
    /// lock and iterated outside it. Required whenever the action may mutate
    /// the store, e.g. removals during shutdown.
    pub fn for_each_safe(&self, mut action: impl FnMut(&Arc<Player>)) {
        let snapshot: Vec<Arc<Player>> = self.players.read().values().cloned().collect();
        for player in &snapshot {
            action(player);
        }
    }

    /// Snapshots every player's score for the scoreboard packet.
    pub fn collect_scores(&self) -> ScoreMap {
        self.players
            .read()
            .values()
            .map(|player| (player.id.clone(), player.score()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.players.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.read().is_empty()
    }
}

impl Default for PlayerStore {
    fn default() -> Self {
        Self::new()
    }
}
