//! Process-wide registry of active games
//!
//! Games are registered under their public code from creation until they
//! reach the stopped state, at which point they remove themselves exactly
//! once. Lookups take a read lock; creation holds the write lock across code
//! minting and insertion so freshly minted codes cannot collide.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use parking_lot::RwLock;
use shared::QuestionData;

use crate::connection::Connection;
use crate::game::Game;
use crate::utils::{mint_id, GAME_CODE_LENGTH};

pub struct GameRegistry {
    games: RwLock<HashMap<String, Arc<Game>>>,
}

impl GameRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            games: RwLock::new(HashMap::new()),
        })
    }

    /// Creates a game hosted by the provided connection, registers it under
    /// a freshly minted code and spawns its driver task.
    pub fn create_game(
        self: &Arc<Self>,
        host: Arc<Connection>,
        title: String,
        questions: Vec<QuestionData>,
    ) -> Arc<Game> {
        let mut games = self.games.write();
        let id = mint_id(GAME_CODE_LENGTH, |candidate| games.contains_key(candidate));
        let game = Game::new(id.clone(), title, host, questions, Arc::clone(self));
        games.insert(id, Arc::clone(&game));
        tokio::spawn(Arc::clone(&game).run());

        info!("Created game '{}' ({})", game.title, game.id);
        game
    }

    /// Looks up a game by its code.
    pub fn get(&self, id: &str) -> Option<Arc<Game>> {
        self.games.read().get(id).cloned()
    }

    /// Drops a game from the registry. Called by the game itself on its
    /// stopped transition.
    pub(crate) fn remove(&self, id: &str) {
        if self.games.write().remove(id).is_some() {
            info!("Game '{}' removed from registry", id);
        }
    }

    pub fn len(&self) -> usize {
        self.games.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.read().is_empty()
    }
}
