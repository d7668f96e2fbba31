//! Per-connection packet dispatch
//!
//! A session binds one duplex connection to at most one of two roles: the
//! host of a game it created, or a player in a game it joined. The roles are
//! mutually exclusive for the lifetime of the session. All inbound packets
//! are dispatched here; every effect on a game goes through the game's
//! public operations.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use log::{debug, info, warn};
use shared::{
    client_id, state_change, AnswerData, CheckNameTakenData, CreateGameData, GameState, KickData,
    Packet, RequestGameStateData, RequestJoinData, StateChangeData,
};
use tokio_tungstenite::tungstenite::Message;

use crate::connection::Connection;
use crate::game::Game;
use crate::player::Player;
use crate::registry::GameRegistry;

pub struct Session {
    conn: Arc<Connection>,
    registry: Arc<GameRegistry>,
    hosted: Option<Arc<Game>>,
    joined: Option<(Arc<Game>, Arc<Player>)>,
}

impl Session {
    pub fn new(conn: Arc<Connection>, registry: Arc<GameRegistry>) -> Session {
        Session {
            conn,
            registry,
            hosted: None,
            joined: None,
        }
    }

    /// The reader loop: decodes each text frame into a packet envelope and
    /// dispatches it. Ends on peer close, transport error, an undecodable
    /// frame, or a client-requested disconnect; cleanup runs exactly once on
    /// the way out.
    pub async fn run<S, E>(mut self, mut messages: S)
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: std::fmt::Display,
    {
        while let Some(result) = messages.next().await {
            let message = match result {
                Ok(message) => message,
                Err(err) => {
                    debug!("Connection closed: {}", err);
                    break;
                }
            };

            match message {
                Message::Text(text) => match serde_json::from_str::<Packet>(&text) {
                    Ok(packet) => {
                        if !self.handle_packet(&packet) {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!("Failed to decode packet: {}", err);
                        self.conn
                            .send(&shared::disconnect_packet("Failed to decode packet"));
                        break;
                    }
                },
                Message::Close(_) => break,
                // Pings, pongs and binary frames carry no packets
                _ => {}
            }
        }

        self.cleanup();
        self.conn.close();
    }

    /// Dispatches one inbound packet. Returns false when the session should
    /// end. Unknown ids are logged and ignored; packets whose payload is
    /// missing or malformed are logged and dropped by the decode step.
    pub fn handle_packet(&mut self, packet: &Packet) -> bool {
        match packet.id {
            client_id::CREATE_GAME => {
                if let Some(data) = packet.decode::<CreateGameData>() {
                    self.handle_create_game(data);
                }
            }
            client_id::CHECK_NAME_TAKEN => {
                if let Some(data) = packet.decode::<CheckNameTakenData>() {
                    self.handle_check_name_taken(data);
                }
            }
            client_id::REQUEST_GAME_STATE => {
                if let Some(data) = packet.decode::<RequestGameStateData>() {
                    self.handle_request_game_state(data);
                }
            }
            client_id::REQUEST_JOIN => {
                if let Some(data) = packet.decode::<RequestJoinData>() {
                    self.handle_request_join(data);
                }
            }
            client_id::STATE_CHANGE => {
                if let Some(data) = packet.decode::<StateChangeData>() {
                    return self.handle_state_change(data);
                }
            }
            client_id::ANSWER => {
                if let Some(data) = packet.decode::<AnswerData>() {
                    self.handle_answer(data);
                }
            }
            client_id::KICK => {
                if let Some(data) = packet.decode::<KickData>() {
                    self.handle_kick(data);
                }
            }
            unknown => debug!("Ignoring unknown packet id {:#04x}", unknown),
        }
        true
    }

    fn handle_create_game(&mut self, data: CreateGameData) {
        if self.hosted.is_some() || self.joined.is_some() {
            self.conn.send(&shared::error_packet("Already in a game"));
            return;
        }

        let game = self
            .registry
            .create_game(Arc::clone(&self.conn), data.title, data.questions);
        self.conn
            .send(&shared::joined_game_packet(true, &game.id, &game.title));
        self.conn
            .send(&shared::game_state_packet(GameState::Waiting));
        self.hosted = Some(game);
    }

    fn handle_check_name_taken(&mut self, data: CheckNameTakenData) {
        match self.registry.get(&data.id) {
            Some(game) => {
                let taken = game.is_name_taken(&data.name);
                self.conn.send(&shared::name_taken_result_packet(taken));
            }
            None => self
                .conn
                .send(&shared::error_packet("That game code doesn't exist")),
        }
    }

    fn handle_request_game_state(&mut self, data: RequestGameStateData) {
        let state = self
            .registry
            .get(&data.id)
            .map(|game| game.state())
            .unwrap_or(GameState::DoesNotExist);
        self.conn.send(&shared::game_state_packet(state));
    }

    fn handle_request_join(&mut self, data: RequestJoinData) {
        if self.hosted.is_some() || self.joined.is_some() {
            self.conn.send(&shared::error_packet("Already in a game"));
            return;
        }

        let Some(game) = self.registry.get(&data.id) else {
            self.conn
                .send(&shared::error_packet("That game code doesn't exist"));
            return;
        };
        if game.state() != GameState::Waiting {
            self.conn
                .send(&shared::error_packet("That game is already started"));
            return;
        }
        if game.is_name_taken(&data.name) {
            self.conn
                .send(&shared::error_packet("That name is already in use"));
            return;
        }

        let player = game.join(Arc::clone(&self.conn), &data.name);
        self.conn
            .send(&shared::joined_game_packet(false, &game.id, &game.title));
        self.joined = Some((game, player));
    }

    fn handle_state_change(&mut self, data: StateChangeData) -> bool {
        match data.state {
            state_change::DISCONNECT => {
                info!("Client requested disconnect");
                return false;
            }
            state_change::START => match &self.hosted {
                Some(game) if game.state() == GameState::Waiting => game.start(),
                Some(_) => self
                    .conn
                    .send(&shared::error_packet("The game has already started")),
                None => self
                    .conn
                    .send(&shared::error_packet("Only the host can start the game")),
            },
            state_change::SKIP => match &self.hosted {
                Some(game) if game.state() == GameState::Started => game.skip_question(),
                Some(_) => self
                    .conn
                    .send(&shared::error_packet("The game is not started")),
                None => self
                    .conn
                    .send(&shared::error_packet("Only the host can skip the question")),
            },
            unknown => debug!("Ignoring unknown state change {}", unknown),
        }
        true
    }

    fn handle_answer(&mut self, data: AnswerData) {
        let Some((game, player)) = &self.joined else {
            self.conn.send(&shared::error_packet("You are not in a game"));
            return;
        };
        if game.state() != GameState::Started {
            self.conn
                .send(&shared::error_packet("The game is not accepting answers"));
            return;
        }
        match game.active_index() {
            None => self
                .conn
                .send(&shared::error_packet("There is no question to answer")),
            Some(index) if player.has_answered(index) => {
                self.conn
                    .send(&shared::error_packet("You have already answered the question."));
            }
            Some(_) => {
                game.submit_answer(player, data.id);
            }
        }
    }

    fn handle_kick(&mut self, data: KickData) {
        let Some(game) = &self.hosted else {
            self.conn
                .send(&shared::error_packet("Only the host can kick players"));
            return;
        };
        match game.players.get(&data.id) {
            Some(player) => {
                info!("Host kicked '{}' ({}) from '{}'", player.name, player.id, game.id);
                player.net.send(&shared::disconnect_packet("Kicked from game"));
                game.remove_player(&player);
            }
            None => debug!("Kick for unknown player id '{}'", data.id),
        }
    }

    /// Releases everything this session holds: a hosted game is stopped
    /// (tearing down its players), a joined player is removed from its game.
    /// Safe to call more than once.
    pub fn cleanup(&mut self) {
        if let Some(game) = self.hosted.take() {
            game.stop();
        }
        if let Some((game, player)) = self.joined.take() {
            game.remove_player(&player);
        }
    }
}
