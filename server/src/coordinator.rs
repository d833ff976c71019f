//! Event routing over the lobby state.
//!
//! [`Coordinator`] exclusively owns presence, parties, the solo queue and
//! sessions. It is synchronous and does no I/O: every entry point consumes
//! one event and returns the [`Effect`]s the network layer has to carry out.
//! The network layer feeds it from a single task, so each event is applied
//! completely before the next one is looked at. That ordering is what makes
//! "one session per launched party" and "one session per queued pair" hold.

use crate::config::ServerConfig;
use crate::directory::{MatchOutcome, UserProfile};
use crate::error::{CoordinatorError, DirectoryError, Result};
use crate::party::{PartyManager, ReadyOutcome};
use crate::presence::{ConnectionId, PresenceRegistry};
use crate::queue::SoloQueue;
use crate::session::{SessionManager, SessionResult};
use log::{debug, error, info, warn};
use shared::{
    ClientMessage, FriendPresence, PartyStatus, ServerMessage, SessionUpdate, TeamId, UserId,
};
use std::collections::HashMap;
use std::time::Instant;

/// Work the network layer performs on behalf of the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send {
        connection: ConnectionId,
        message: ServerMessage,
    },
    Close {
        connection: ConnectionId,
    },
    /// Look the user up in the identity directory and report back through
    /// [`Coordinator::complete_authentication`] with the same `attempt`.
    ResolveIdentity {
        connection: ConnectionId,
        user_id: UserId,
        attempt: u64,
    },
    /// Fire-and-forget stat update.
    RecordResult {
        user_id: UserId,
        outcome: MatchOutcome,
    },
}

pub struct Coordinator {
    presence: PresenceRegistry,
    parties: PartyManager,
    queue: SoloQueue,
    sessions: SessionManager,
    effects: Vec<Effect>,

    // Latest pending Authenticate per connection
    auth_attempts: HashMap<ConnectionId, u64>,
    next_attempt: u64,
}

impl Coordinator {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            presence: PresenceRegistry::new(),
            parties: PartyManager::new(),
            queue: SoloQueue::new(),
            sessions: SessionManager::new(config.win_score, config.claim_after(), config.seed),
            effects: Vec::new(),
            auth_attempts: HashMap::new(),
            next_attempt: 1,
        }
    }

    /// Applies one inbound event from `connection`.
    pub fn handle_message(
        &mut self,
        connection: ConnectionId,
        message: ClientMessage,
    ) -> Vec<Effect> {
        if let ClientMessage::Authenticate { user_id } = message {
            let attempt = self.next_attempt;
            self.next_attempt += 1;
            self.auth_attempts.insert(connection, attempt);
            self.effects.push(Effect::ResolveIdentity {
                connection,
                user_id,
                attempt,
            });
            return self.take_effects();
        }

        let Some(user_id) = self.presence.user_for(connection).cloned() else {
            debug!(
                "Rejected {} from unauthenticated connection {}",
                message.name(),
                connection
            );
            self.send(connection, error_message(CoordinatorError::NotAuthenticated));
            return self.take_effects();
        };

        let event = message.name();
        let result = match message {
            ClientMessage::Authenticate { .. } => Ok(()),
            ClientMessage::CreateParty { max_size } => self.create_party(&user_id, max_size),
            ClientMessage::InviteToParty { target_user_id } => {
                self.invite(&user_id, &target_user_id)
            }
            ClientMessage::JoinParty { party_id } => self.join_party(&user_id, &party_id),
            ClientMessage::LeaveParty => self.leave_party(&user_id),
            ClientMessage::KickMember { member_id } => self.kick_member(&user_id, &member_id),
            ClientMessage::ToggleReady => self.toggle_ready(&user_id),
            ClientMessage::JoinSoloQueue => self.join_queue(&user_id),
            ClientMessage::LeaveSoloQueue => self.leave_queue(&user_id),
            ClientMessage::SessionUpdate { session_id, update } => {
                self.relay_update(&user_id, &session_id, update)
            }
            ClientMessage::Score { session_id, team } => {
                self.record_score(&user_id, &session_id, team)
            }
            ClientMessage::ClaimVictory { session_id } => {
                self.claim_victory(&user_id, &session_id)
            }
            ClientMessage::Surrender { session_id } => self.surrender(&user_id, &session_id),
            ClientMessage::GetFriends => self.friends_list(&user_id),
            ClientMessage::CheckPartyStatus => self.party_status(&user_id),
        };

        if let Err(e) = result {
            debug!("{} from {} rejected: {}", event, user_id, e);
            self.send(connection, error_message(e));
        }

        self.take_effects()
    }

    /// Finishes an `Authenticate` once the directory has answered.
    ///
    /// Only the latest attempt on a connection counts. Answers that arrive
    /// after a newer `Authenticate` on the same connection are dropped.
    pub fn complete_authentication(
        &mut self,
        connection: ConnectionId,
        attempt: u64,
        requested: &str,
        result: std::result::Result<UserProfile, DirectoryError>,
    ) -> Vec<Effect> {
        if self.auth_attempts.get(&connection) != Some(&attempt) {
            debug!(
                "Dropping stale identity of {} for connection {} (attempt {})",
                requested, connection, attempt
            );
            return Vec::new();
        }
        self.auth_attempts.remove(&connection);

        let profile = match result {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Authentication of {} failed: {}", requested, e);
                self.send(
                    connection,
                    ServerMessage::AuthError {
                        reason: e.to_string(),
                    },
                );
                return self.take_effects();
            }
        };

        // Switching identity on one connection counts as the old user leaving
        if self
            .presence
            .user_for(connection)
            .is_some_and(|current| *current != profile.id)
        {
            self.depart(connection);
        }

        let user_id = profile.id;
        let was_online = self.presence.is_online(&user_id);
        let registration = self
            .presence
            .register(&user_id, connection, profile.friends);

        if let Some(stale) = registration.superseded {
            self.send(stale, ServerMessage::Superseded);
            self.effects.push(Effect::Close { connection: stale });
        }

        let online_friends = registration
            .online_friends
            .iter()
            .map(|(id, _)| id.clone())
            .collect();
        let active_session = self.sessions.session_of(&user_id).map(|s| s.id.clone());
        self.send(
            connection,
            ServerMessage::Authenticated {
                user_id: user_id.clone(),
                online_friends,
                active_session,
            },
        );

        // Friends already saw this user come online
        if !was_online {
            for (_, friend_connection) in registration.online_friends {
                self.send(
                    friend_connection,
                    ServerMessage::FriendOnline {
                        user_id: user_id.clone(),
                    },
                );
            }
        }

        info!("User {} authenticated on connection {}", user_id, connection);
        self.take_effects()
    }

    /// Cleans up after a closed connection.
    pub fn handle_disconnect(&mut self, connection: ConnectionId) -> Vec<Effect> {
        self.auth_attempts.remove(&connection);
        self.depart(connection);
        self.take_effects()
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn parties(&self) -> &PartyManager {
        &self.parties
    }

    pub fn queue(&self) -> &SoloQueue {
        &self.queue
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    fn depart(&mut self, connection: ConnectionId) {
        let Some(departure) = self.presence.unregister(connection) else {
            return;
        };
        let user_id = departure.user_id;
        info!("User {} went offline", user_id);

        for (_, friend_connection) in departure.online_friends {
            self.send(
                friend_connection,
                ServerMessage::FriendOffline {
                    user_id: user_id.clone(),
                },
            );
        }

        if let Ok(left) = self.parties.leave(&user_id) {
            if let Some(status) = left.remaining {
                self.broadcast_party(&status);
            }
        }

        self.queue.dequeue(&user_id);

        if let Some(session) = self.sessions.session_of(&user_id) {
            let session_id = session.id.clone();
            let anyone_left = session
                .others(&user_id)
                .iter()
                .any(|id| self.presence.is_online(id));
            let opponents: Vec<UserId> = session
                .teams
                .team_of(&user_id)
                .map(|team| session.teams.members(team.opponent()).to_vec())
                .unwrap_or_default();

            if !anyone_left {
                self.sessions.discard(&session_id);
            } else {
                for player in &opponents {
                    self.send_to_user(
                        player,
                        ServerMessage::OpponentLeft {
                            session_id: session_id.clone(),
                            user_id: user_id.clone(),
                        },
                    );
                }
            }
        }
    }

    fn create_party(&mut self, user_id: &str, max_size: u8) -> Result<()> {
        self.ensure_free_for_party(user_id)?;
        let status = self.parties.create(user_id, max_size)?;
        self.send_to_user(user_id, ServerMessage::PartyCreated(status));
        Ok(())
    }

    fn invite(&mut self, user_id: &str, target_user_id: &str) -> Result<()> {
        let party = self
            .parties
            .party_of(user_id)
            .ok_or(CoordinatorError::NotInParty)?;
        let target = self
            .presence
            .lookup(target_user_id)
            .ok_or(CoordinatorError::UserOffline)?;

        let invite = ServerMessage::PartyInvite {
            party_id: party.id.clone(),
            from: user_id.to_string(),
            max_size: party.size as u8,
        };
        debug!("{} invited {} to {}", user_id, target_user_id, party.id);
        self.send(target, invite);
        Ok(())
    }

    fn join_party(&mut self, user_id: &str, party_id: &str) -> Result<()> {
        self.ensure_free_for_party(user_id)?;
        let status = self.parties.join(party_id, user_id)?;
        self.send_to_user(user_id, ServerMessage::PartyJoined(status.clone()));
        self.broadcast_party(&status);
        Ok(())
    }

    fn leave_party(&mut self, user_id: &str) -> Result<()> {
        let departure = self.parties.leave(user_id)?;
        self.send_to_user(user_id, ServerMessage::LeftParty);
        if let Some(status) = departure.remaining {
            self.broadcast_party(&status);
        }
        Ok(())
    }

    fn kick_member(&mut self, user_id: &str, member_id: &str) -> Result<()> {
        let departure = self.parties.kick(user_id, member_id)?;
        self.send_to_user(member_id, ServerMessage::LeftParty);
        if let Some(status) = departure.remaining {
            self.broadcast_party(&status);
        }
        Ok(())
    }

    fn toggle_ready(&mut self, user_id: &str) -> Result<()> {
        match self.parties.toggle_ready(user_id)? {
            ReadyOutcome::Updated(status) => self.broadcast_party(&status),
            ReadyOutcome::Launched { status, members } => {
                self.broadcast_party(&status);
                if let Err(e) = self.start_session(members.clone()) {
                    error!("Party {} could not start a session: {}", status.id, e);
                    self.broadcast(&members, error_message(e));
                }
            }
        }
        Ok(())
    }

    fn join_queue(&mut self, user_id: &str) -> Result<()> {
        if self.parties.is_member(user_id) {
            return Err(CoordinatorError::PartiedUserCannotQueue);
        }
        if self.sessions.is_playing(user_id) {
            return Err(CoordinatorError::AlreadyInSession);
        }

        self.queue.enqueue(user_id);
        self.send_to_user(user_id, ServerMessage::QueueJoined);
        self.try_match();
        Ok(())
    }

    fn leave_queue(&mut self, user_id: &str) -> Result<()> {
        self.queue.dequeue(user_id);
        self.send_to_user(user_id, ServerMessage::QueueLeft);
        Ok(())
    }

    /// Pairs the two longest-waiting users until fewer than two remain.
    fn try_match(&mut self) {
        while let Some(pair) = self.queue.peek_pair() {
            // Players leave the queue only once their session exists
            if let Err(e) = self.start_session(pair.to_vec()) {
                error!("Could not match {} and {}: {}", pair[0], pair[1], e);
                break;
            }
            self.queue.take_pair();
        }
    }

    fn start_session(&mut self, players: Vec<UserId>) -> Result<()> {
        let session = self.sessions.start(players)?;
        let announcement = ServerMessage::SessionStart {
            session_id: session.id.clone(),
            mode: session.mode,
            teams: session.teams.clone(),
            players: session.players.clone(),
        };
        let players = session.players.clone();
        self.broadcast(&players, announcement);
        Ok(())
    }

    fn relay_update(
        &mut self,
        user_id: &str,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<()> {
        let relay = self
            .sessions
            .relay(session_id, user_id, update, Instant::now())?;
        self.broadcast(
            &relay.recipients,
            ServerMessage::SessionState {
                session_id: session_id.to_string(),
                state: relay.state,
            },
        );
        Ok(())
    }

    fn record_score(&mut self, user_id: &str, session_id: &str, team: TeamId) -> Result<()> {
        let outcome = self
            .sessions
            .record_score(session_id, user_id, team, Instant::now())?;
        self.broadcast(
            &outcome.players,
            ServerMessage::ScoreUpdate {
                session_id: session_id.to_string(),
                scores: outcome.scores,
            },
        );

        if let Some(result) = outcome.finished {
            self.finish_session(result);
        }
        Ok(())
    }

    fn claim_victory(&mut self, user_id: &str, session_id: &str) -> Result<()> {
        let presence = &self.presence;
        let result = self.sessions.claim_victory(
            session_id,
            user_id,
            Instant::now(),
            |id| presence.is_online(id),
        )?;
        self.finish_session(result);
        Ok(())
    }

    fn surrender(&mut self, user_id: &str, session_id: &str) -> Result<()> {
        let result = self.sessions.surrender(session_id, user_id)?;
        self.finish_session(result);
        Ok(())
    }

    fn finish_session(&mut self, result: SessionResult) {
        for player in &result.players {
            self.send_to_user(
                player,
                ServerMessage::SessionEnd {
                    session_id: result.session_id.clone(),
                    winner: result.winner,
                    scores: result.scores,
                    is_winner: result.is_winner(player),
                    reason: result.reason,
                },
            );
            self.effects.push(Effect::RecordResult {
                user_id: player.clone(),
                outcome: result.outcome_for(player),
            });
        }
    }

    fn friends_list(&mut self, user_id: &str) -> Result<()> {
        let friends = self
            .presence
            .friends_of(user_id)
            .iter()
            .map(|id| FriendPresence {
                user_id: id.clone(),
                online: self.presence.is_online(id),
            })
            .collect();
        self.send_to_user(user_id, ServerMessage::FriendsList(friends));
        Ok(())
    }

    fn party_status(&mut self, user_id: &str) -> Result<()> {
        let status = self.parties.party_of(user_id).map(|party| party.status());
        self.send_to_user(user_id, ServerMessage::PartyStatus(status));
        Ok(())
    }

    fn ensure_free_for_party(&self, user_id: &str) -> Result<()> {
        if self.sessions.is_playing(user_id) {
            return Err(CoordinatorError::AlreadyInSession);
        }
        if self.queue.contains(user_id) {
            return Err(CoordinatorError::QueuedUserCannotParty);
        }
        Ok(())
    }

    /// Sends to the party's members as they are right now.
    fn broadcast_party(&mut self, status: &PartyStatus) {
        let members = status.member_ids();
        self.broadcast(&members, ServerMessage::PartyUpdated(status.clone()));
    }

    fn broadcast(&mut self, users: &[UserId], message: ServerMessage) {
        for user_id in users {
            self.send_to_user(user_id, message.clone());
        }
    }

    fn send_to_user(&mut self, user_id: &str, message: ServerMessage) {
        if let Some(connection) = self.presence.lookup(user_id) {
            self.send(connection, message);
        }
    }

    fn send(&mut self, connection: ConnectionId, message: ServerMessage) {
        self.effects.push(Effect::Send {
            connection,
            message,
        });
    }

    fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }
}

fn error_message(error: CoordinatorError) -> ServerMessage {
    ServerMessage::Error {
        message: error.to_string(),
    }
}
