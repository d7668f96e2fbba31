//! Server-side game state management and question progression
//!
//! Each game is an independent state machine driven by its own task. The
//! driver wakes about once a second, advances the countdown or the active
//! question, and broadcasts `TimeSync` packets so client UIs can run their
//! own smooth countdowns; exact timing lives client-side, not in tight
//! server polling.

use std::sync::Arc;
use std::time::Duration;

use log::info;
use parking_lot::{Mutex, RwLock};
use shared::{AnswerIndex, GameState, Packet, QuestionData, QuestionIndex, MODE_ADD, MODE_REMOVE};
use tokio::time::{sleep, Instant};

use crate::connection::Connection;
use crate::player::{Player, PlayerStore};
use crate::registry::GameRegistry;

/// Countdown between a host pressing start and the first question.
pub const START_DELAY: Duration = Duration::from_secs(5);

/// The answer window for each question.
pub const QUESTION_TIME: Duration = Duration::from_secs(10);

/// How long results stay on screen before the next question.
pub const MARK_TIME: Duration = Duration::from_secs(3);

/// Minimum interval between `TimeSync` broadcasts.
pub const SYNC_DELAY: Duration = Duration::from_secs(2);

/// The window in which answering quickly earns bonus points.
pub const BONUS_TIME: Duration = Duration::from_secs(5);

/// Points for any correct answer.
pub const BASE_SCORE: u32 = 100;

/// Extra points for an instantaneous correct answer, tapering to zero over
/// [`BONUS_TIME`].
pub const MAX_BONUS: u32 = 200;

/// The bonus for a correct answer given `elapsed` after the question was
/// served: a linear taper from [`MAX_BONUS`] down to zero at [`BONUS_TIME`],
/// rounded half to even.
pub fn speed_bonus(elapsed: Duration) -> u32 {
    if elapsed >= BONUS_TIME {
        return 0;
    }
    let fraction = 1.0 - elapsed.as_secs_f64() / BONUS_TIME.as_secs_f64();
    (fraction * MAX_BONUS as f64).round_ties_even() as u32
}

/// The question currently being answered.
#[derive(Debug, Clone, Copy)]
pub struct ActiveQuestion {
    /// Position in the game's question list.
    pub index: QuestionIndex,
    /// When the question was served.
    pub start_time: Instant,
    /// Whether the scoring pass has run for this question.
    pub marked: bool,
}

/// A single hosted quiz game.
///
/// The game owns its players; the host connection is a back-reference only.
/// When the host goes away the owning session calls [`Game::stop`], and the
/// host reference stays usable until the shutdown broadcasts are out.
pub struct Game {
    /// The public game code players type to join.
    pub id: String,
    pub title: String,
    pub host: Arc<Connection>,
    pub players: PlayerStore,
    questions: Mutex<Vec<QuestionData>>,
    state: RwLock<GameState>,
    start_time: Mutex<Instant>,
    active: Mutex<Option<ActiveQuestion>>,
    registry: Arc<GameRegistry>,
}

impl Game {
    pub(crate) fn new(
        id: String,
        title: String,
        host: Arc<Connection>,
        questions: Vec<QuestionData>,
        registry: Arc<GameRegistry>,
    ) -> Arc<Game> {
        Arc::new(Game {
            id,
            title,
            host,
            players: PlayerStore::new(),
            questions: Mutex::new(questions),
            state: RwLock::new(GameState::Waiting),
            start_time: Mutex::new(Instant::now()),
            active: Mutex::new(None),
            registry,
        })
    }

    pub fn state(&self) -> GameState {
        *self.state.read()
    }

    /// The index of the question currently being answered, if any.
    pub fn active_index(&self) -> Option<QuestionIndex> {
        (*self.active.lock()).map(|question| question.index)
    }

    /// Adds a player to the game. The joiner is told the current game state,
    /// its own identity and the existing roster (in that order, on this
    /// task), then everyone else learns about the new player.
    pub fn join(&self, conn: Arc<Connection>, name: &str) -> Arc<Player> {
        conn.send(&shared::game_state_packet(self.state()));
        let player = self.players.create(conn, name);

        let added = shared::player_data_packet(&player.id, &player.name, MODE_ADD);
        self.broadcast_excluding(&player.id, &added, true);

        info!(
            "Player '{}' has joined '{}' ({}) given id '{}'",
            player.name, self.title, self.id, player.id
        );
        player
    }

    /// Whether any player already uses this name, ignoring case.
    pub fn is_name_taken(&self, name: &str) -> bool {
        let wanted = name.to_lowercase();
        self.players
            .any_match(|player| player.name.to_lowercase() == wanted)
    }

    /// Moves the game from `Waiting` into the `Starting` countdown. Calling
    /// this in any other state does nothing; the session layer reports the
    /// violation to the host.
    pub fn start(&self) {
        {
            let mut state = self.state.write();
            if *state != GameState::Waiting {
                return;
            }
            *state = GameState::Starting;
        }
        *self.start_time.lock() = Instant::now();
        self.broadcast(&shared::game_state_packet(GameState::Starting), true);
        info!("Game '{}' ({}) is starting", self.title, self.id);
    }

    /// Host-only skip. Backdates the active question so the driver's next
    /// pass lands past the answer window; with no active question the next
    /// question is served directly.
    pub fn skip_question(&self) {
        let mut active = self.active.lock();
        match active.as_mut() {
            Some(question) => {
                if let Some(jumped) = Instant::now().checked_sub(QUESTION_TIME) {
                    if jumped < question.start_time {
                        question.start_time = jumped;
                    }
                }
            }
            None => {
                drop(active);
                self.next_question();
            }
        }
    }

    /// Retires the active question and serves the next one, or ends the game
    /// when the list is exhausted. The previous question's image is released;
    /// images dominate per-game memory.
    pub fn next_question(&self) {
        let next = {
            let mut active = self.active.lock();
            match active.take() {
                Some(previous) => {
                    let mut questions = self.questions.lock();
                    if let Some(question) = questions.get_mut(previous.index) {
                        question.release_image();
                    }
                    previous.index + 1
                }
                None => 0,
            }
        };

        let packet = {
            let questions = self.questions.lock();
            questions.get(next).map(shared::question_packet)
        };

        match packet {
            Some(packet) => {
                *self.active.lock() = Some(ActiveQuestion {
                    index: next,
                    start_time: Instant::now(),
                    marked: false,
                });
                // The host already holds the question list
                self.broadcast(&packet, false);
            }
            None => self.game_over(),
        }
    }

    /// The scoring pass after the answer window closes: every player gets
    /// their `AnswerResult` first, correct answers are awarded, and then the
    /// scoreboard snapshot goes to everyone including the host.
    pub fn mark_question(&self) {
        let (index, start_time) = {
            let mut active = self.active.lock();
            let Some(question) = active.as_mut() else {
                return;
            };
            if question.marked {
                return;
            }
            question.marked = true;
            (question.index, question.start_time)
        };

        let values = {
            let questions = self.questions.lock();
            match questions.get(index) {
                Some(question) => question.values.clone(),
                None => return,
            }
        };

        self.players.for_each(|player| {
            let answer = player.answer_for(index);
            let correct = answer.is_some_and(|chosen| values.contains(&chosen));
            player.net.send(&shared::answer_result_packet(correct));
            if correct {
                let elapsed = player
                    .answer_time()
                    .map(|at| at.saturating_duration_since(start_time))
                    .unwrap_or(BONUS_TIME);
                player.award(BASE_SCORE + speed_bonus(elapsed));
            }
        });

        self.broadcast(&shared::scores_packet(self.players.collect_scores()), true);
    }

    /// Records the player's answer to the active question, clamping an
    /// out-of-range index to the last answer. Returns false when there is no
    /// active question or the player already answered it.
    pub fn submit_answer(&self, player: &Player, answer: AnswerIndex) -> bool {
        let active = self.active.lock();
        let Some(question) = active.as_ref() else {
            return false;
        };
        let count = {
            let questions = self.questions.lock();
            questions
                .get(question.index)
                .map(|q| q.answers.len())
                .unwrap_or(0)
        };
        let clamped = answer.min(count.saturating_sub(1));
        player.record_answer(question.index, clamped)
    }

    fn game_over(&self) {
        info!("Game '{}' ({}) is out of questions", self.title, self.id);
        self.stop();
    }

    /// Transitions to `Stopped` exactly once: the game leaves the registry,
    /// everyone (host included) learns the final state, and every player is
    /// disconnected and dropped from the store. The host reference is not
    /// released until the shutdown messages have been sent.
    pub fn stop(&self) {
        {
            let mut state = self.state.write();
            if *state == GameState::Stopped {
                return;
            }
            *state = GameState::Stopped;
        }

        self.registry.remove(&self.id);
        self.broadcast(&shared::game_state_packet(GameState::Stopped), true);
        self.players.for_each_safe(|player| {
            player.net.send(&shared::disconnect_packet("Removed from game"));
            self.players.remove(&player.id);
        });

        info!("Stopped game '{}' ({})", self.title, self.id);
    }

    /// Drops a player from the game. While the game is live everyone else,
    /// host included, sees the roster shrink.
    pub fn remove_player(&self, player: &Player) {
        if self.state() != GameState::Stopped {
            let packet = shared::player_data_packet(&player.id, &player.name, MODE_REMOVE);
            self.broadcast_excluding(&player.id, &packet, true);
        }
        self.players.remove(&player.id);
    }

    /// Sends the packet to every player, and to the host when asked.
    pub fn broadcast(&self, packet: &Packet, include_host: bool) {
        self.players.for_each(|player| player.net.send(packet));
        if include_host {
            self.host.send(packet);
        }
    }

    /// Sends the packet to every player except `exclude`, and to the host
    /// when asked.
    pub fn broadcast_excluding(&self, exclude: &str, packet: &Packet, include_host: bool) {
        self.players.for_each(|player| {
            if player.id != exclude {
                player.net.send(packet);
            }
        });
        if include_host {
            self.host.send(packet);
        }
    }

    pub(crate) fn begin_questions(&self) {
        {
            let mut state = self.state.write();
            if *state != GameState::Starting {
                return;
            }
            *state = GameState::Started;
        }
        self.broadcast(&shared::game_state_packet(GameState::Started), true);
    }

    /// The per-game driver task, running from creation until the `Stopped`
    /// transition. The 1 s cadence is deliberate: clients count down from
    /// `TimeSync` values, so the server only needs coarse wakeups.
    pub async fn run(self: Arc<Self>) {
        info!("Starting game loop for '{}' ({})", self.title, self.id);
        let mut last_sync: Option<Instant> = None;

        loop {
            let state = self.state();
            if state == GameState::Stopped {
                break;
            }

            let now = Instant::now();
            let due_sync = last_sync.map_or(true, |at| now - at >= SYNC_DELAY);

            match state {
                GameState::Starting => {
                    let elapsed = now.saturating_duration_since(*self.start_time.lock());
                    if elapsed >= START_DELAY {
                        self.begin_questions();
                        last_sync = None;
                    } else if due_sync {
                        last_sync = Some(now);
                        self.broadcast(
                            &shared::time_sync_packet(START_DELAY, START_DELAY - elapsed),
                            true,
                        );
                    }
                }
                GameState::Started => {
                    let active = *self.active.lock();
                    match active {
                        None => {
                            self.next_question();
                            last_sync = None;
                        }
                        Some(question) => {
                            let elapsed = now.saturating_duration_since(question.start_time);
                            if elapsed >= QUESTION_TIME + MARK_TIME {
                                self.next_question();
                                last_sync = None;
                            } else if elapsed >= QUESTION_TIME {
                                if !question.marked {
                                    self.mark_question();
                                }
                            } else if self
                                .players
                                .all_match(|player| player.has_answered(question.index))
                            {
                                self.skip_question();
                            } else if due_sync {
                                last_sync = Some(now);
                                self.broadcast(
                                    &shared::time_sync_packet(QUESTION_TIME, QUESTION_TIME - elapsed),
                                    true,
                                );
                            }
                        }
                    }
                }
                // Waiting: players gather, nothing to drive yet
                _ => {}
            }

            sleep(Duration::from_secs(1)).await;
        }

        info!("Game loop for '{}' ({}) ended", self.title, self.id);
    }
}
