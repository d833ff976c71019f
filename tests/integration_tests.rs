//! Integration tests for the lobby server
//!
//! These tests run a real server on a loopback port and drive it with raw
//! TCP clients speaking the framed protocol.

use server::config::ServerConfig;
use server::directory::{InMemoryDirectory, UserProfile, UserStats};
use server::network::Server;
use shared::{
    encode_frame, read_message, write_message, ClientMessage, EndReason, ServerMessage,
    SessionMode, SessionUpdate, TeamId, Vec3, WIN_SCORE,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Starts a server with five mutual friends and returns its address.
async fn start_server() -> (SocketAddr, Arc<InMemoryDirectory>) {
    let names = ["alice", "bob", "carol", "dave", "erin"];
    let directory = Arc::new(InMemoryDirectory::with_users(names.iter().map(|name| {
        let friends = names.iter().filter(|other| *other != name).copied();
        UserProfile::new(*name, name.to_uppercase()).with_friends(friends)
    })));

    let config = ServerConfig {
        port: 0,
        seed: Some(7),
        ..ServerConfig::default()
    };
    let server = Server::bind(&config, directory.clone()).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (addr, directory)
}

struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self { stream }
    }

    /// Connects and completes authentication.
    async fn login(addr: SocketAddr, user_id: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client
            .send(ClientMessage::Authenticate {
                user_id: user_id.into(),
            })
            .await;
        client
            .expect(|m| matches!(m, ServerMessage::Authenticated { .. }))
            .await;
        client
    }

    async fn send(&mut self, message: ClientMessage) {
        write_message(&mut self.stream, &message).await.unwrap();
    }

    async fn recv(&mut self) -> Option<ServerMessage> {
        timeout(RECV_TIMEOUT, read_message(&mut self.stream))
            .await
            .expect("timed out waiting for server")
            .unwrap()
    }

    /// Reads until a message matches, skipping unrelated notifications.
    async fn expect<F>(&mut self, matches: F) -> ServerMessage
    where
        F: Fn(&ServerMessage) -> bool,
    {
        loop {
            match self.recv().await {
                Some(message) if matches(&message) => return message,
                Some(_) => continue,
                None => panic!("connection closed before expected message"),
            }
        }
    }

    /// Asserts nothing arrives within a short window.
    async fn expect_silence(&mut self) {
        let result = timeout(
            Duration::from_millis(200),
            read_message::<_, ServerMessage>(&mut self.stream),
        )
        .await;
        assert!(result.is_err(), "unexpected message: {:?}", result);
    }
}

/// Queues two clients and returns them with their session id.
async fn matched_pair(addr: SocketAddr) -> (TestClient, TestClient, String) {
    let mut alice = TestClient::login(addr, "alice").await;
    let mut bob = TestClient::login(addr, "bob").await;

    alice.send(ClientMessage::JoinSoloQueue).await;
    alice
        .expect(|m| matches!(m, ServerMessage::QueueJoined))
        .await;
    bob.send(ClientMessage::JoinSoloQueue).await;

    let session_id = match alice
        .expect(|m| matches!(m, ServerMessage::SessionStart { .. }))
        .await
    {
        ServerMessage::SessionStart {
            session_id,
            mode,
            teams,
            ..
        } => {
            assert_eq!(mode, SessionMode::OneVsOne);
            assert_eq!(teams.team1, vec!["alice"]);
            assert_eq!(teams.team2, vec!["bob"]);
            session_id
        }
        _ => unreachable!(),
    };
    bob.expect(|m| matches!(m, ServerMessage::SessionStart { .. }))
        .await;

    (alice, bob, session_id)
}

async fn wait_for_stats(directory: &InMemoryDirectory, user_id: &str) -> UserStats {
    for _ in 0..50 {
        if let Some(stats) = directory.stats(user_id).await {
            if stats != UserStats::default() {
                return stats;
            }
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("stats for {} never updated", user_id);
}

/// AUTHENTICATION TESTS
mod auth_tests {
    use super::*;

    /// Unknown users get an auth error and stay unauthenticated
    #[tokio::test]
    async fn unknown_user_rejected() {
        let (addr, _) = start_server().await;
        let mut client = TestClient::connect(addr).await;

        client
            .send(ClientMessage::Authenticate {
                user_id: "mallory".into(),
            })
            .await;
        assert_eq!(
            client.recv().await,
            Some(ServerMessage::AuthError {
                reason: "User not found".into()
            })
        );

        client.send(ClientMessage::JoinSoloQueue).await;
        assert_eq!(
            client.recv().await,
            Some(ServerMessage::Error {
                message: "Not authenticated".into()
            })
        );
    }

    /// A second login supersedes and closes the first connection
    #[tokio::test]
    async fn second_login_supersedes_first() {
        let (addr, _) = start_server().await;
        let mut first = TestClient::login(addr, "alice").await;
        let _second = TestClient::login(addr, "alice").await;

        first
            .expect(|m| matches!(m, ServerMessage::Superseded))
            .await;
        assert_eq!(first.recv().await, None);
    }

    /// Friends see each other come online and go offline
    #[tokio::test]
    async fn friend_presence_notifications() {
        let (addr, _) = start_server().await;
        let mut alice = TestClient::login(addr, "alice").await;
        let bob = TestClient::login(addr, "bob").await;

        assert_eq!(
            alice
                .expect(|m| matches!(m, ServerMessage::FriendOnline { .. }))
                .await,
            ServerMessage::FriendOnline {
                user_id: "bob".into()
            }
        );

        drop(bob);
        assert_eq!(
            alice
                .expect(|m| matches!(m, ServerMessage::FriendOffline { .. }))
                .await,
            ServerMessage::FriendOffline {
                user_id: "bob".into()
            }
        );
    }
}

/// NETWORK PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// A frame that fails to decode is skipped and the connection stays usable
    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let (addr, _) = start_server().await;
        let mut client = TestClient::connect(addr).await;

        client
            .stream
            .write_all(&[0, 0, 0, 4, 0xff, 0xff, 0xff, 0xff])
            .await
            .unwrap();
        let frame = encode_frame(&ClientMessage::Authenticate {
            user_id: "carol".into(),
        })
        .unwrap();
        client.stream.write_all(&frame).await.unwrap();

        assert!(matches!(
            client.recv().await,
            Some(ServerMessage::Authenticated { user_id, .. }) if user_id == "carol"
        ));
    }
}

/// SOLO QUEUE AND SESSION TESTS
mod session_tests {
    use super::*;

    /// Relayed state reaches the opponent but is not echoed back
    #[tokio::test]
    async fn session_update_relayed_to_others_only() {
        let (addr, _) = start_server().await;
        let (mut alice, mut bob, session_id) = matched_pair(addr).await;

        alice
            .send(ClientMessage::SessionUpdate {
                session_id: session_id.clone(),
                update: SessionUpdate::MalletMove {
                    position: Vec3::new(0.25, 0.0, -1.5),
                },
            })
            .await;

        match bob.recv().await {
            Some(ServerMessage::SessionState { state, .. }) => {
                assert_eq!(state.mallets.get("alice"), Some(&Vec3::new(0.25, 0.0, -1.5)));
            }
            other => panic!("expected session state, got {:?}", other),
        }
        alice.expect_silence().await;
    }

    /// Reaching the winning score ends the session and records stats
    #[tokio::test]
    async fn score_limit_ends_session() {
        let (addr, directory) = start_server().await;
        let (mut alice, mut bob, session_id) = matched_pair(addr).await;

        for _ in 0..WIN_SCORE {
            bob.send(ClientMessage::Score {
                session_id: session_id.clone(),
                team: TeamId::Team2,
            })
            .await;
        }

        for (client, expected_winner) in [(&mut alice, false), (&mut bob, true)] {
            match client
                .expect(|m| matches!(m, ServerMessage::SessionEnd { .. }))
                .await
            {
                ServerMessage::SessionEnd {
                    winner,
                    scores,
                    is_winner,
                    reason,
                    ..
                } => {
                    assert_eq!(winner, TeamId::Team2);
                    assert_eq!(scores.team2, WIN_SCORE);
                    assert_eq!(scores.team1, 0);
                    assert_eq!(is_winner, expected_winner);
                    assert_eq!(reason, EndReason::ScoreLimit);
                }
                _ => unreachable!(),
            }
        }

        assert_eq!(wait_for_stats(&directory, "bob").await.wins, 1);
        assert_eq!(wait_for_stats(&directory, "alice").await.losses, 1);

        // Both are free to queue again
        alice.send(ClientMessage::JoinSoloQueue).await;
        alice
            .expect(|m| matches!(m, ServerMessage::QueueJoined))
            .await;
    }

    /// The remaining player is told when an opponent drops mid-session
    #[tokio::test]
    async fn opponent_disconnect_then_claim_victory() {
        let (addr, directory) = start_server().await;
        let (mut alice, bob, session_id) = matched_pair(addr).await;

        drop(bob);
        assert_eq!(
            alice
                .expect(|m| matches!(m, ServerMessage::OpponentLeft { .. }))
                .await,
            ServerMessage::OpponentLeft {
                session_id: session_id.clone(),
                user_id: "bob".into()
            }
        );

        alice
            .send(ClientMessage::ClaimVictory { session_id })
            .await;
        assert!(matches!(
            alice
                .expect(|m| matches!(m, ServerMessage::SessionEnd { .. }))
                .await,
            ServerMessage::SessionEnd {
                is_winner: true,
                reason: EndReason::ClaimVictory,
                ..
            }
        ));
        assert_eq!(wait_for_stats(&directory, "bob").await.losses, 1);
    }
}

/// PARTY TESTS
mod party_tests {
    use super::*;

    /// Invite, join and ready up a duo into a 1v1 session
    #[tokio::test]
    async fn party_launches_session() {
        let (addr, _) = start_server().await;
        let mut carol = TestClient::login(addr, "carol").await;
        let mut dave = TestClient::login(addr, "dave").await;

        carol.send(ClientMessage::CreateParty { max_size: 2 }).await;
        let party_id = match carol
            .expect(|m| matches!(m, ServerMessage::PartyCreated(_)))
            .await
        {
            ServerMessage::PartyCreated(status) => {
                assert_eq!(status.leader_id, "carol");
                status.id
            }
            _ => unreachable!(),
        };

        carol
            .send(ClientMessage::InviteToParty {
                target_user_id: "dave".into(),
            })
            .await;
        match dave
            .expect(|m| matches!(m, ServerMessage::PartyInvite { .. }))
            .await
        {
            ServerMessage::PartyInvite { party_id: id, from, .. } => {
                assert_eq!(id, party_id);
                assert_eq!(from, "carol");
            }
            _ => unreachable!(),
        }

        dave.send(ClientMessage::JoinParty {
            party_id: party_id.clone(),
        })
        .await;
        dave.expect(|m| matches!(m, ServerMessage::PartyJoined(_)))
            .await;
        carol
            .expect(|m| matches!(m, ServerMessage::PartyUpdated(s) if s.members.len() == 2))
            .await;

        carol.send(ClientMessage::ToggleReady).await;
        dave.send(ClientMessage::ToggleReady).await;

        for client in [&mut carol, &mut dave] {
            match client
                .expect(|m| matches!(m, ServerMessage::SessionStart { .. }))
                .await
            {
                ServerMessage::SessionStart { mode, players, .. } => {
                    assert_eq!(mode, SessionMode::OneVsOne);
                    assert_eq!(players, vec!["carol", "dave"]);
                }
                _ => unreachable!(),
            }
        }

        carol.send(ClientMessage::CheckPartyStatus).await;
        assert_eq!(
            carol
                .expect(|m| matches!(m, ServerMessage::PartyStatus(_)))
                .await,
            ServerMessage::PartyStatus(None)
        );
    }

    /// Disconnecting hands leadership to the remaining member
    #[tokio::test]
    async fn leader_disconnect_promotes_member() {
        let (addr, _) = start_server().await;
        let mut erin = TestClient::login(addr, "erin").await;
        let mut alice = TestClient::login(addr, "alice").await;

        erin.send(ClientMessage::CreateParty { max_size: 4 }).await;
        let party_id = match erin
            .expect(|m| matches!(m, ServerMessage::PartyCreated(_)))
            .await
        {
            ServerMessage::PartyCreated(status) => status.id,
            _ => unreachable!(),
        };
        alice.send(ClientMessage::JoinParty { party_id }).await;
        alice
            .expect(|m| matches!(m, ServerMessage::PartyJoined(_)))
            .await;

        drop(erin);
        match alice
            .expect(|m| matches!(m, ServerMessage::PartyUpdated(s) if s.members.len() == 1))
            .await
        {
            ServerMessage::PartyUpdated(status) => assert_eq!(status.leader_id, "alice"),
            _ => unreachable!(),
        }

        alice.send(ClientMessage::JoinSoloQueue).await;
        assert_eq!(
            alice
                .expect(|m| matches!(m, ServerMessage::Error { .. }))
                .await,
            ServerMessage::Error {
                message: "Leave your party first".into()
            }
        );
    }
}
