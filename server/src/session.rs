//! Running matches: team assignment, state relay, scoring and termination.
//!
//! A session lives from the moment its players are matched until one team
//! reaches the winning score, someone surrenders, or victory is claimed over
//! silent opponents. Finished sessions are removed immediately; the caller
//! receives a [`SessionResult`] to notify players and update stats with.

use crate::directory::MatchOutcome;
use crate::error::{CoordinatorError, Result};
use crate::utils::{generate_id, get_timestamp};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use shared::{
    EndReason, PuckState, Scores, SessionId, SessionMode, SessionState, SessionUpdate, TeamId,
    Teams, UserId,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub mode: SessionMode,
    pub teams: Teams,
    /// Participants in the order they were matched.
    pub players: Vec<UserId>,
    pub scores: Scores,
    pub state: SessionState,
    /// Unix time in milliseconds.
    pub started_at: u64,
    last_activity: HashMap<UserId, Instant>,
}

impl Session {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.players.iter().any(|id| id == user_id)
    }

    /// Every participant except `user_id`.
    pub fn others(&self, user_id: &str) -> Vec<UserId> {
        self.players
            .iter()
            .filter(|id| *id != user_id)
            .cloned()
            .collect()
    }

    fn touch(&mut self, user_id: &str, now: Instant) {
        if let Some(seen) = self.last_activity.get_mut(user_id) {
            *seen = now;
        }
    }

    fn idle_for(&self, user_id: &str, now: Instant) -> Duration {
        self.last_activity
            .get(user_id)
            .map(|seen| now.saturating_duration_since(*seen))
            .unwrap_or(Duration::MAX)
    }
}

/// Final result of a session that has just been removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResult {
    pub session_id: SessionId,
    pub winner: TeamId,
    pub scores: Scores,
    pub teams: Teams,
    pub players: Vec<UserId>,
    pub reason: EndReason,
}

impl SessionResult {
    pub fn is_winner(&self, user_id: &str) -> bool {
        self.teams.team_of(user_id) == Some(self.winner)
    }

    pub fn outcome_for(&self, user_id: &str) -> MatchOutcome {
        if self.is_winner(user_id) {
            MatchOutcome::Win
        } else {
            MatchOutcome::Loss
        }
    }
}

/// A relayed update and who should receive it.
#[derive(Debug, Clone, PartialEq)]
pub struct Relay {
    pub recipients: Vec<UserId>,
    pub state: SessionState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreOutcome {
    pub scores: Scores,
    pub players: Vec<UserId>,
    /// Set when this point ended the session.
    pub finished: Option<SessionResult>,
}

pub struct SessionManager {
    sessions: HashMap<SessionId, Session>,
    by_user: HashMap<UserId, SessionId>,
    rng: StdRng,
    win_score: u32,
    claim_after: Duration,
}

impl SessionManager {
    pub fn new(win_score: u32, claim_after: Duration, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            sessions: HashMap::new(),
            by_user: HashMap::new(),
            rng,
            win_score: win_score.max(1),
            claim_after,
        }
    }

    /// Creates a session for 2 (1v1) or 4 (2v2) players.
    ///
    /// 1v1 puts the first player on team 1; 2v2 shuffles players into two
    /// random pairs.
    pub fn start(&mut self, players: Vec<UserId>) -> Result<&Session> {
        let mode = SessionMode::for_player_count(players.len())
            .ok_or(CoordinatorError::InvalidParticipantCount(players.len()))?;

        if players.iter().any(|id| self.by_user.contains_key(id)) {
            return Err(CoordinatorError::AlreadyInSession);
        }

        let teams = match mode {
            SessionMode::OneVsOne => Teams {
                team1: vec![players[0].clone()],
                team2: vec![players[1].clone()],
            },
            SessionMode::TwoVsTwo => {
                let mut shuffled = players.clone();
                shuffled.shuffle(&mut self.rng);
                let team2 = shuffled.split_off(2);
                Teams {
                    team1: shuffled,
                    team2,
                }
            }
        };

        let now = Instant::now();
        let session = Session {
            id: generate_id("session"),
            mode,
            teams,
            last_activity: players.iter().map(|id| (id.clone(), now)).collect(),
            players,
            scores: Scores::default(),
            state: SessionState::default(),
            started_at: get_timestamp(),
        };

        info!(
            "Session {} started ({}): {:?} vs {:?}",
            session.id, session.mode, session.teams.team1, session.teams.team2
        );

        for player in &session.players {
            self.by_user.insert(player.clone(), session.id.clone());
        }
        let id = session.id.clone();
        Ok(self.sessions.entry(id).or_insert(session))
    }

    /// Merges a participant's update and returns the state for the others.
    pub fn relay(
        &mut self,
        session_id: &str,
        from: &str,
        update: SessionUpdate,
        now: Instant,
    ) -> Result<Relay> {
        let session = self.participant_session_mut(session_id, from)?;
        session.touch(from, now);

        match update {
            SessionUpdate::MalletMove { position } => {
                session.state.mallets.insert(from.to_string(), position);
            }
            SessionUpdate::PuckUpdate { puck } => {
                session.state.puck = puck;
            }
        }

        Ok(Relay {
            recipients: session.others(from),
            state: session.state.clone(),
        })
    }

    /// Adds a point for `team`, ending the session at the winning score.
    pub fn record_score(
        &mut self,
        session_id: &str,
        from: &str,
        team: TeamId,
        now: Instant,
    ) -> Result<ScoreOutcome> {
        let win_score = self.win_score;
        let session = self.participant_session_mut(session_id, from)?;
        session.touch(from, now);

        session.scores.increment(team);
        session.state.puck = PuckState::centered();
        debug!(
            "Session {} score {}-{}",
            session_id, session.scores.team1, session.scores.team2
        );

        let scores = session.scores;
        let players = session.players.clone();
        // Winner is the strictly leading team once either side reaches the limit
        let finished = if scores.get(team) >= win_score {
            let winner = scores.leader().unwrap_or(team);
            self.finish(session_id, winner, EndReason::ScoreLimit)
        } else {
            None
        };

        Ok(ScoreOutcome {
            scores,
            players,
            finished,
        })
    }

    /// Ends the session in favour of the caller's opponents.
    pub fn surrender(&mut self, session_id: &str, user_id: &str) -> Result<SessionResult> {
        let team = self.team_in(session_id, user_id)?;
        self.finish(session_id, team.opponent(), EndReason::Surrender)
            .ok_or_else(|| CoordinatorError::SessionNotFound(session_id.to_string()))
    }

    /// Ends the session in the caller's favour if every opponent is offline
    /// or has been silent for at least the claim threshold.
    pub fn claim_victory<F>(
        &mut self,
        session_id: &str,
        user_id: &str,
        now: Instant,
        is_online: F,
    ) -> Result<SessionResult>
    where
        F: Fn(&str) -> bool,
    {
        let team = self.team_in(session_id, user_id)?;
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| CoordinatorError::SessionNotFound(session_id.to_string()))?;
        session.touch(user_id, now);

        let abandoned = session.teams.members(team.opponent()).iter().all(|id| {
            !is_online(id) || session.idle_for(id, now) >= self.claim_after
        });
        if !abandoned {
            return Err(CoordinatorError::OpponentsStillActive);
        }

        self.finish(session_id, team, EndReason::ClaimVictory)
            .ok_or_else(|| CoordinatorError::SessionNotFound(session_id.to_string()))
    }

    /// Drops a session without a result.
    pub fn discard(&mut self, session_id: &str) -> Option<Session> {
        let session = self.sessions.remove(session_id)?;
        for player in &session.players {
            self.by_user.remove(player);
        }
        info!("Session {} discarded, no participant left", session_id);
        Some(session)
    }

    pub fn session_of(&self, user_id: &str) -> Option<&Session> {
        self.by_user
            .get(user_id)
            .and_then(|session_id| self.sessions.get(session_id))
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn is_playing(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn finish(
        &mut self,
        session_id: &str,
        winner: TeamId,
        reason: EndReason,
    ) -> Option<SessionResult> {
        let session = self.sessions.remove(session_id)?;
        for player in &session.players {
            self.by_user.remove(player);
        }

        info!(
            "Session {} ended {}-{}, {} wins ({:?})",
            session.id, session.scores.team1, session.scores.team2, winner, reason
        );
        Some(SessionResult {
            session_id: session.id,
            winner,
            scores: session.scores,
            teams: session.teams,
            players: session.players,
            reason,
        })
    }

    fn participant_session_mut(&mut self, session_id: &str, user_id: &str) -> Result<&mut Session> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| CoordinatorError::SessionNotFound(session_id.to_string()))?;
        if !session.is_participant(user_id) {
            return Err(CoordinatorError::NotParticipant);
        }
        Ok(session)
    }

    fn team_in(&self, session_id: &str, user_id: &str) -> Result<TeamId> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| CoordinatorError::SessionNotFound(session_id.to_string()))?
            .teams
            .team_of(user_id)
            .ok_or(CoordinatorError::NotParticipant)
    }
}
