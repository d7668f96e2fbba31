//! # Shared Quiz Protocol Library
//!
//! This module contains the wire protocol shared between the quiz game server
//! and its clients. Every message is a JSON envelope `{ id, data? }` where `id`
//! selects the packet kind and `data` carries the kind-specific payload.
//!
//! ## Protocol Overview
//!
//! ### Client → Server
//! Game management (`CreateGame`, `Kick`), lobby queries (`CheckNameTaken`,
//! `RequestGameState`, `RequestJoin`), lifecycle control (`StateChange`) and
//! gameplay (`Answer`).
//!
//! ### Server → Client
//! Connection control (`Disconnect`, `Error`), lobby responses (`JoinedGame`,
//! `NameTakenResult`, `GameState`), roster updates (`PlayerData`) and gameplay
//! broadcasts (`TimeSync`, `Question`, `AnswerResult`, `Scores`).
//!
//! ## Design Principles
//!
//! - **Typed payloads**: each packet id has a payload struct decoded with
//!   `serde_json`, so field binding stays name-based and version tolerant.
//! - **Authoritative server**: the outbound `Question` payload never includes
//!   the correct answer indices; marking happens server-side only.
//! - **Compact states**: game states and player-data modes travel as small
//!   integers matching the protocol constants below.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Packet identifier type (one byte on the wire).
pub type PacketId = u8;

/// Index into a question's answer list.
pub type AnswerIndex = usize;

/// Index into a game's question list.
pub type QuestionIndex = usize;

/// Map of player id to score, as carried by the `Scores` packet.
pub type ScoreMap = HashMap<String, u32>;

/// Inbound packet ids (client → server).
pub mod client_id {
    use super::PacketId;

    pub const CREATE_GAME: PacketId = 0x00;
    pub const CHECK_NAME_TAKEN: PacketId = 0x01;
    pub const REQUEST_GAME_STATE: PacketId = 0x02;
    pub const REQUEST_JOIN: PacketId = 0x03;
    pub const STATE_CHANGE: PacketId = 0x04;
    pub const ANSWER: PacketId = 0x05;
    pub const KICK: PacketId = 0x06;
}

/// Outbound packet ids (server → client).
pub mod server_id {
    use super::PacketId;

    pub const DISCONNECT: PacketId = 0x00;
    pub const ERROR: PacketId = 0x01;
    pub const JOINED_GAME: PacketId = 0x02;
    pub const NAME_TAKEN_RESULT: PacketId = 0x03;
    pub const GAME_STATE: PacketId = 0x04;
    pub const PLAYER_DATA: PacketId = 0x05;
    pub const TIME_SYNC: PacketId = 0x06;
    pub const QUESTION: PacketId = 0x07;
    pub const ANSWER_RESULT: PacketId = 0x08;
    pub const SCORES: PacketId = 0x09;
}

/// Substates carried by the `StateChange` packet.
pub mod state_change {
    pub const DISCONNECT: u8 = 0;
    pub const START: u8 = 1;
    pub const SKIP: u8 = 2;
}

/// Modes carried by the `PlayerData` packet.
///
/// `MODE_ADD` introduces a player to the receiver, `MODE_REMOVE` retracts
/// one, and `MODE_SELF` tells a joining player its own identity.
pub type PlayerDataMode = u8;

pub const MODE_ADD: PlayerDataMode = 0;
pub const MODE_REMOVE: PlayerDataMode = 1;
pub const MODE_SELF: PlayerDataMode = 2;

/// Game lifecycle states as they travel on the wire.
///
/// `DoesNotExist` is only ever reported to clients querying an unknown game
/// code; no stored game carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GameState {
    Waiting = 0,
    Starting = 1,
    Started = 2,
    Stopped = 3,
    DoesNotExist = 4,
}

impl GameState {
    /// The wire representation of this state.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// A single quiz question.
///
/// `values` holds the indices of every accepted answer; multi-correct
/// questions are permitted, and the set must be non-empty for a playable
/// question. Images may be multi-megabyte data URLs, so the server releases
/// them once a question is no longer active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub question: String,
    pub answers: Vec<String>,
    pub values: Vec<AnswerIndex>,
}

impl QuestionData {
    /// Whether the provided answer index is one of the accepted answers.
    pub fn is_correct(&self, index: AnswerIndex) -> bool {
        self.values.contains(&index)
    }

    /// Drops the image payload. Images dominate per-game memory, so they are
    /// released as soon as the question leaves the active slot.
    pub fn release_image(&mut self) {
        self.image = None;
    }
}

/// The envelope every message travels in.
///
/// `data` is absent for packets that carry no payload and is decoded into a
/// typed payload struct once the id is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    pub id: PacketId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Packet {
    /// Creates a packet with the provided id and typed payload.
    pub fn new(id: PacketId, data: impl Serialize) -> Packet {
        let data = match serde_json::to_value(data) {
            Ok(value) => Some(value),
            Err(err) => {
                log::warn!("Failed to encode data for packet {:#04x}: {}", id, err);
                None
            }
        };
        Packet { id, data }
    }

    /// Creates a packet with no payload.
    pub fn empty(id: PacketId) -> Packet {
        Packet { id, data: None }
    }

    /// Decodes the payload into the expected type, or `None` when the packet
    /// carries no data or the data does not match. Both cases are logged so
    /// malformed traffic is visible without tearing anything down.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        match &self.data {
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(data) => Some(data),
                Err(err) => {
                    log::warn!("Failed to decode data for packet {:#04x}: {}", self.id, err);
                    None
                }
            },
            None => {
                log::warn!("Packet {:#04x} expected data but received none", self.id);
                None
            }
        }
    }
}

// === Client → Server payloads ===

/// Payload of `CreateGame`: the quiz to host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGameData {
    pub title: String,
    pub questions: Vec<QuestionData>,
}

/// Payload of `CheckNameTaken`: is `name` free in game `id`?
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckNameTakenData {
    pub id: String,
    pub name: String,
}

/// Payload of `RequestGameState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestGameStateData {
    pub id: String,
}

/// Payload of `RequestJoin`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestJoinData {
    pub id: String,
    pub name: String,
}

/// Payload of `StateChange`; see [`state_change`] for the accepted values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChangeData {
    pub state: u8,
}

/// Payload of `Answer`: the chosen answer index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerData {
    pub id: AnswerIndex,
}

/// Payload of `Kick`: the id of the player to remove.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KickData {
    pub id: String,
}

// === Server → Client payloads ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectData {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub cause: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinedGameData {
    pub id: String,
    pub owner: bool,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameTakenResultData {
    pub result: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStateData {
    pub state: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerDataData {
    pub id: String,
    pub name: String,
    pub mode: PlayerDataMode,
}

/// Countdown synchronisation; both fields are milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSyncData {
    pub total: u64,
    pub remaining: u64,
}

/// The question as served to players. Deliberately excludes the accepted
/// answer indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub question: String,
    pub answers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResultData {
    pub result: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoresData {
    pub scores: ScoreMap,
}

// === Outbound packet constructors ===

/// Creates a disconnect packet with the provided reason.
pub fn disconnect_packet(reason: &str) -> Packet {
    Packet::new(
        server_id::DISCONNECT,
        DisconnectData {
            reason: reason.to_string(),
        },
    )
}

/// Creates an error packet with the provided cause.
pub fn error_packet(cause: &str) -> Packet {
    Packet::new(
        server_id::ERROR,
        ErrorData {
            cause: cause.to_string(),
        },
    )
}

/// Creates a joined-game packet; `owner` is true only for the host.
pub fn joined_game_packet(owner: bool, id: &str, title: &str) -> Packet {
    Packet::new(
        server_id::JOINED_GAME,
        JoinedGameData {
            id: id.to_string(),
            owner,
            title: title.to_string(),
        },
    )
}

/// Creates a name-taken result packet.
pub fn name_taken_result_packet(result: bool) -> Packet {
    Packet::new(server_id::NAME_TAKEN_RESULT, NameTakenResultData { result })
}

/// Creates a game state packet.
pub fn game_state_packet(state: GameState) -> Packet {
    Packet::new(
        server_id::GAME_STATE,
        GameStateData {
            state: state.code(),
        },
    )
}

/// Creates a player data packet with the provided id, name and mode.
pub fn player_data_packet(id: &str, name: &str, mode: PlayerDataMode) -> Packet {
    Packet::new(
        server_id::PLAYER_DATA,
        PlayerDataData {
            id: id.to_string(),
            name: name.to_string(),
            mode,
        },
    )
}

/// Creates a time sync packet from the countdown's total and remaining time.
pub fn time_sync_packet(total: Duration, remaining: Duration) -> Packet {
    Packet::new(
        server_id::TIME_SYNC,
        TimeSyncData {
            total: total.as_millis() as u64,
            remaining: remaining.as_millis() as u64,
        },
    )
}

/// Creates a question packet for players. The accepted answer indices are
/// stripped; only the server marks answers.
pub fn question_packet(question: &QuestionData) -> Packet {
    Packet::new(
        server_id::QUESTION,
        QuestionPayload {
            image: question.image.clone(),
            question: question.question.clone(),
            answers: question.answers.clone(),
        },
    )
}

/// Creates an answer result packet.
pub fn answer_result_packet(result: bool) -> Packet {
    Packet::new(server_id::ANSWER_RESULT, AnswerResultData { result })
}

/// Creates a scores packet from a snapshot of every player's score.
pub fn scores_packet(scores: ScoreMap) -> Packet {
    Packet::new(server_id::SCORES, ScoresData { scores })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question() -> QuestionData {
        QuestionData {
            image: None,
            question: "What is 2 + 2?".to_string(),
            answers: vec!["3".to_string(), "4".to_string(), "5".to_string()],
            values: vec![1],
        }
    }

    #[test]
    fn test_state_wire_codes() {
        assert_eq!(GameState::Waiting.code(), 0);
        assert_eq!(GameState::Starting.code(), 1);
        assert_eq!(GameState::Started.code(), 2);
        assert_eq!(GameState::Stopped.code(), 3);
        assert_eq!(GameState::DoesNotExist.code(), 4);
    }

    #[test]
    fn test_envelope_without_data() {
        let packet = Packet::empty(server_id::DISCONNECT);
        let json = serde_json::to_string(&packet).unwrap();
        assert_eq!(json, r#"{"id":0}"#);

        let parsed: Packet = serde_json::from_str(r#"{"id":4}"#).unwrap();
        assert_eq!(parsed.id, 4);
        assert!(parsed.data.is_none());
    }

    #[test]
    fn test_envelope_roundtrip_with_data() {
        let packet = error_packet("Something went wrong");
        let json = serde_json::to_string(&packet).unwrap();
        let parsed: Packet = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, server_id::ERROR);
        let data: ErrorData = parsed.decode().unwrap();
        assert_eq!(data.cause, "Something went wrong");
    }

    #[test]
    fn test_decode_missing_data() {
        let packet = Packet::empty(client_id::ANSWER);
        assert!(packet.decode::<AnswerData>().is_none());
    }

    #[test]
    fn test_decode_mismatched_data() {
        let packet = Packet {
            id: client_id::ANSWER,
            data: Some(serde_json::json!({ "id": "not a number" })),
        };
        assert!(packet.decode::<AnswerData>().is_none());
    }

    #[test]
    fn test_inbound_payload_binding() {
        let raw = r#"{"id":3,"data":{"id":"ABC12","name":"Bob"}}"#;
        let packet: Packet = serde_json::from_str(raw).unwrap();
        assert_eq!(packet.id, client_id::REQUEST_JOIN);

        let data: RequestJoinData = packet.decode().unwrap();
        assert_eq!(data.id, "ABC12");
        assert_eq!(data.name, "Bob");
    }

    #[test]
    fn test_create_game_payload() {
        let raw = r#"{
            "id": 0,
            "data": {
                "title": "Trivia Night",
                "questions": [
                    {"question": "Q?", "answers": ["a", "b"], "values": [0, 1]}
                ]
            }
        }"#;
        let packet: Packet = serde_json::from_str(raw).unwrap();
        let data: CreateGameData = packet.decode().unwrap();

        assert_eq!(data.title, "Trivia Night");
        assert_eq!(data.questions.len(), 1);
        assert_eq!(data.questions[0].answers.len(), 2);
        assert!(data.questions[0].image.is_none());
        assert_eq!(data.questions[0].values, vec![0, 1]);
    }

    #[test]
    fn test_question_packet_hides_values() {
        let packet = question_packet(&question());
        let json = serde_json::to_string(&packet).unwrap();

        assert!(!json.contains("values"));
        let data: QuestionPayload = packet.decode().unwrap();
        assert_eq!(data.question, "What is 2 + 2?");
        assert_eq!(data.answers.len(), 3);
    }

    #[test]
    fn test_question_correctness() {
        let q = question();
        assert!(q.is_correct(1));
        assert!(!q.is_correct(0));
        assert!(!q.is_correct(2));
    }

    #[test]
    fn test_release_image() {
        let mut q = question();
        q.image = Some("data:image/png;base64,AAAA".to_string());
        q.release_image();
        assert!(q.image.is_none());
    }

    #[test]
    fn test_time_sync_millis() {
        let packet = time_sync_packet(Duration::from_secs(10), Duration::from_millis(3500));
        let data: TimeSyncData = packet.decode().unwrap();
        assert_eq!(data.total, 10_000);
        assert_eq!(data.remaining, 3_500);
    }

    #[test]
    fn test_player_data_modes() {
        let packet = player_data_packet("AB12CD", "Alice", MODE_SELF);
        let data: PlayerDataData = packet.decode().unwrap();
        assert_eq!(data.mode, 2);
        assert_eq!(data.id, "AB12CD");
        assert_eq!(data.name, "Alice");
    }

    #[test]
    fn test_scores_packet() {
        let mut scores = ScoreMap::new();
        scores.insert("AB12CD".to_string(), 300);

        let packet = scores_packet(scores);
        let data: ScoresData = packet.decode().unwrap();
        assert_eq!(data.scores.get("AB12CD"), Some(&300));
    }
}
