//! Integration tests for the quiz game engine
//!
//! These tests validate cross-component behavior: full game rounds driven by
//! the per-game driver task under tokio's paused clock, and the session
//! reader loop fed from scripted message streams.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream;
use server::connection::Connection;
use server::game::{Game, BASE_SCORE, MARK_TIME, QUESTION_TIME, START_DELAY};
use server::registry::GameRegistry;
use server::session::Session;
use shared::{
    client_id, server_id, state_change, AnswerResultData, CreateGameData, DisconnectData,
    GameState, Packet, QuestionData, ScoresData, StateChangeData, TimeSyncData,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;

fn question() -> QuestionData {
    QuestionData {
        image: None,
        question: "Pick b".to_string(),
        answers: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        values: vec![1],
    }
}

fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<Packet> {
    let mut packets = Vec::new();
    while let Ok(message) = rx.try_recv() {
        let Message::Text(text) = message else {
            continue;
        };
        packets.push(serde_json::from_str(&text).unwrap());
    }
    packets
}

fn new_game(
    registry: &Arc<GameRegistry>,
) -> (Arc<Game>, UnboundedReceiver<Message>) {
    let (host, host_rx) = Connection::new();
    let game = registry.create_game(host, "Trivia Night".to_string(), vec![question()]);
    (game, host_rx)
}

/// DRIVER LOOP TESTS
mod driver_tests {
    use super::*;

    /// A full round: countdown, question, early answer, skip, marking, end.
    #[tokio::test(start_paused = true)]
    async fn full_game_round() {
        let registry = GameRegistry::new();
        let (game, mut host_rx) = new_game(&registry);
        let code = game.id.clone();

        let (bob_conn, mut bob_rx) = Connection::new();
        let bob = game.join(bob_conn, "Bob");
        game.start();
        assert_eq!(game.state(), GameState::Starting);

        // Let the countdown elapse and the first question go out
        sleep(START_DELAY + Duration::from_secs(2)).await;
        assert_eq!(game.state(), GameState::Started);

        let packets = drain(&mut bob_rx);
        assert!(packets.iter().any(|p| p.id == server_id::QUESTION));

        // The host saw the countdown ticking
        let host_packets = drain(&mut host_rx);
        let countdown: Vec<TimeSyncData> = host_packets
            .iter()
            .filter(|p| p.id == server_id::TIME_SYNC)
            .map(|p| p.decode().unwrap())
            .collect();
        assert!(countdown.iter().any(|sync| sync.total == 5_000));

        // Bob answers correctly, one virtual second into the question
        assert!(game.submit_answer(&bob, 1));

        // With every player answered the driver skips the rest of the answer
        // window; marking and the end of the game follow well before the
        // natural question time would have elapsed
        sleep(Duration::from_secs(5)).await;
        assert_eq!(game.state(), GameState::Stopped);
        assert!(registry.get(&code).is_none());

        let packets = drain(&mut bob_rx);
        let result_at = packets
            .iter()
            .position(|p| p.id == server_id::ANSWER_RESULT)
            .expect("answer result missing");
        let scores_at = packets
            .iter()
            .position(|p| p.id == server_id::SCORES)
            .expect("scores missing");
        let goodbye_at = packets
            .iter()
            .position(|p| p.id == server_id::DISCONNECT)
            .expect("disconnect missing");
        assert!(result_at < scores_at && scores_at < goodbye_at);

        let result: AnswerResultData = packets[result_at].decode().unwrap();
        assert!(result.result);

        // Base points plus the speed bonus for a one-second answer
        let scores: ScoresData = packets[scores_at].decode().unwrap();
        assert_eq!(scores.scores.get(&bob.id), Some(&(BASE_SCORE + 160)));

        let goodbye: DisconnectData = packets[goodbye_at].decode().unwrap();
        assert_eq!(goodbye.reason, "Removed from game");

        // The host got the final scoreboard too
        let host_packets = drain(&mut host_rx);
        assert!(host_packets.iter().any(|p| p.id == server_id::SCORES));
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_answer_scores_zero() {
        let registry = GameRegistry::new();
        let (game, _host_rx) = new_game(&registry);

        let (bob_conn, mut bob_rx) = Connection::new();
        let bob = game.join(bob_conn, "Bob");
        game.start();

        sleep(START_DELAY + Duration::from_secs(2)).await;
        assert!(game.submit_answer(&bob, 0));

        sleep(Duration::from_secs(5)).await;
        assert_eq!(game.state(), GameState::Stopped);

        let packets = drain(&mut bob_rx);
        let result: AnswerResultData = packets
            .iter()
            .find(|p| p.id == server_id::ANSWER_RESULT)
            .unwrap()
            .decode()
            .unwrap();
        assert!(!result.result);

        let scores: ScoresData = packets
            .iter()
            .find(|p| p.id == server_id::SCORES)
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(scores.scores.get(&bob.id), Some(&0));
    }

    /// A player that never answers is marked wrong once the window closes.
    #[tokio::test(start_paused = true)]
    async fn unanswered_question_times_out() {
        let registry = GameRegistry::new();
        let (game, _host_rx) = new_game(&registry);
        let code = game.id.clone();

        let (bob_conn, mut bob_rx) = Connection::new();
        game.join(bob_conn, "Bob");
        game.start();

        sleep(START_DELAY + Duration::from_secs(2)).await;
        assert_eq!(game.state(), GameState::Started);
        drain(&mut bob_rx);

        // Sit through the whole answer window and the marking display
        sleep(QUESTION_TIME + MARK_TIME + Duration::from_secs(2)).await;
        assert_eq!(game.state(), GameState::Stopped);
        assert!(registry.get(&code).is_none());

        let packets = drain(&mut bob_rx);
        let result: AnswerResultData = packets
            .iter()
            .find(|p| p.id == server_id::ANSWER_RESULT)
            .unwrap()
            .decode()
            .unwrap();
        assert!(!result.result);
    }

    /// The driver exits promptly once the game stops.
    #[tokio::test(start_paused = true)]
    async fn driver_exits_after_stop() {
        let registry = GameRegistry::new();
        let (game, _host_rx) = new_game(&registry);

        sleep(Duration::from_secs(3)).await;
        game.stop();
        sleep(Duration::from_secs(2)).await;

        assert_eq!(game.state(), GameState::Stopped);
        assert!(registry.is_empty());
        assert_eq!(Arc::strong_count(&game), 1, "driver task has released the game");
    }

    /// Question packets keep flowing for multi-question games.
    #[tokio::test(start_paused = true)]
    async fn questions_advance_in_order() {
        let registry = GameRegistry::new();
        let (host, _host_rx) = Connection::new();
        let mut first = question();
        first.image = Some("data:image/png;base64,AAAA".to_string());
        let second = QuestionData {
            image: None,
            question: "Pick a".to_string(),
            answers: vec!["a".to_string(), "b".to_string()],
            values: vec![0],
        };
        let game = registry.create_game(host, "Two rounds".to_string(), vec![first, second]);

        let (bob_conn, mut bob_rx) = Connection::new();
        game.join(bob_conn, "Bob");
        game.start();

        sleep(START_DELAY + Duration::from_secs(2)).await;
        assert_eq!(game.active_index(), Some(0));
        drain(&mut bob_rx);

        sleep(QUESTION_TIME + MARK_TIME + Duration::from_secs(2)).await;
        assert_eq!(game.active_index(), Some(1));
        assert_eq!(game.state(), GameState::Started);

        let packets = drain(&mut bob_rx);
        assert!(packets.iter().any(|p| p.id == server_id::QUESTION));
    }
}

/// SESSION READER TESTS
mod session_tests {
    use super::*;

    fn text(packet: &Packet) -> Result<Message, std::io::Error> {
        Ok(Message::Text(serde_json::to_string(packet).unwrap()))
    }

    #[tokio::test]
    async fn malformed_frame_disconnects() {
        let registry = GameRegistry::new();
        let (conn, mut rx) = Connection::new();
        let session = Session::new(Arc::clone(&conn), registry);

        let frames = vec![Ok::<_, std::io::Error>(Message::Text("{not json".to_string()))];
        session.run(stream::iter(frames)).await;

        let Message::Text(reply) = rx.try_recv().unwrap() else {
            panic!("expected a text frame");
        };
        let packet: Packet = serde_json::from_str(&reply).unwrap();
        assert_eq!(packet.id, server_id::DISCONNECT);
        let data: DisconnectData = packet.decode().unwrap();
        assert_eq!(data.reason, "Failed to decode packet");
        assert!(!conn.is_open());
    }

    /// The transport closing on a host tears its game down.
    #[tokio::test]
    async fn host_stream_end_stops_game() {
        let registry = GameRegistry::new();
        let (conn, _rx) = Connection::new();
        let session = Session::new(conn, Arc::clone(&registry));

        let create = Packet::new(
            client_id::CREATE_GAME,
            CreateGameData {
                title: "Short lived".to_string(),
                questions: vec![question()],
            },
        );
        session.run(stream::iter(vec![text(&create)])).await;

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn client_disconnect_packet_ends_session() {
        let registry = GameRegistry::new();
        let (conn, _rx) = Connection::new();
        let session = Session::new(Arc::clone(&conn), Arc::clone(&registry));

        let create = Packet::new(
            client_id::CREATE_GAME,
            CreateGameData {
                title: "Short lived".to_string(),
                questions: vec![question()],
            },
        );
        let leave = Packet::new(
            client_id::STATE_CHANGE,
            StateChangeData {
                state: state_change::DISCONNECT,
            },
        );
        session.run(stream::iter(vec![text(&create), text(&leave)])).await;

        assert!(registry.is_empty());
        assert!(!conn.is_open());
    }

    /// Non-text frames are ignored rather than treated as packets.
    #[tokio::test]
    async fn binary_and_ping_frames_are_ignored() {
        let registry = GameRegistry::new();
        let (conn, mut rx) = Connection::new();
        let session = Session::new(Arc::clone(&conn), registry);

        let frames = vec![
            Ok::<_, std::io::Error>(Message::Binary(vec![1, 2, 3])),
            Ok(Message::Ping(Vec::new())),
        ];
        session.run(stream::iter(frames)).await;

        assert!(rx.try_recv().is_err());
    }
}
