//! Wire protocol shared by the lobby server and its clients.
//!
//! Every inbound event a client can send is a variant of [`ClientMessage`],
//! every outbound notification is a variant of [`ServerMessage`]. Both travel
//! as length-prefixed bincode frames (see [`codec`]).

pub mod codec;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub use codec::{decode_frame, encode_frame, read_message, write_message, CodecError};

/// Points a team needs to win a session.
pub const WIN_SCORE: u32 = 7;
/// Largest accepted frame payload in bytes.
pub const MAX_FRAME_LEN: usize = 64 * 1024;
/// Resting height of the puck above the table surface.
pub const PUCK_REST_HEIGHT: f32 = 0.15;

pub type UserId = String;
pub type PartyId = String;
pub type SessionId = String;

/// Opaque 3D coordinate relayed between clients.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Last reported puck position and velocity.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct PuckState {
    pub position: Vec3,
    pub velocity: Vec3,
}

impl PuckState {
    /// Puck at rest in the middle of the table.
    pub fn centered() -> Self {
        Self {
            position: Vec3::new(0.0, PUCK_REST_HEIGHT, 0.0),
            velocity: Vec3::default(),
        }
    }
}

impl Default for PuckState {
    fn default() -> Self {
        Self::centered()
    }
}

/// Relayed state of a running session.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct SessionState {
    pub puck: PuckState,
    pub mallets: HashMap<UserId, Vec3>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionMode {
    OneVsOne,
    TwoVsTwo,
}

impl SessionMode {
    /// Picks the mode matching a participant count, if there is one.
    pub fn for_player_count(count: usize) -> Option<Self> {
        match count {
            2 => Some(Self::OneVsOne),
            4 => Some(Self::TwoVsTwo),
            _ => None,
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneVsOne => write!(f, "1v1"),
            Self::TwoVsTwo => write!(f, "2v2"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeamId {
    Team1,
    Team2,
}

impl TeamId {
    pub fn opponent(&self) -> Self {
        match self {
            Self::Team1 => Self::Team2,
            Self::Team2 => Self::Team1,
        }
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Team1 => write!(f, "team1"),
            Self::Team2 => write!(f, "team2"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Teams {
    pub team1: Vec<UserId>,
    pub team2: Vec<UserId>,
}

impl Teams {
    pub fn members(&self, team: TeamId) -> &[UserId] {
        match team {
            TeamId::Team1 => &self.team1,
            TeamId::Team2 => &self.team2,
        }
    }

    /// Returns the team a user plays for.
    pub fn team_of(&self, user_id: &str) -> Option<TeamId> {
        if self.team1.iter().any(|id| id == user_id) {
            Some(TeamId::Team1)
        } else if self.team2.iter().any(|id| id == user_id) {
            Some(TeamId::Team2)
        } else {
            None
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scores {
    pub team1: u32,
    pub team2: u32,
}

impl Scores {
    pub fn get(&self, team: TeamId) -> u32 {
        match team {
            TeamId::Team1 => self.team1,
            TeamId::Team2 => self.team2,
        }
    }

    pub fn increment(&mut self, team: TeamId) -> u32 {
        let score = match team {
            TeamId::Team1 => &mut self.team1,
            TeamId::Team2 => &mut self.team2,
        };
        *score += 1;
        *score
    }

    /// The strictly leading team, `None` on a tie.
    pub fn leader(&self) -> Option<TeamId> {
        match self.team1.cmp(&self.team2) {
            std::cmp::Ordering::Greater => Some(TeamId::Team1),
            std::cmp::Ordering::Less => Some(TeamId::Team2),
            std::cmp::Ordering::Equal => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PartyMember {
    pub user_id: UserId,
    pub ready: bool,
}

/// Snapshot of a party as broadcast to its members.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PartyStatus {
    pub id: PartyId,
    pub leader_id: UserId,
    pub max_size: u8,
    /// Members in join order.
    pub members: Vec<PartyMember>,
}

impl PartyStatus {
    pub fn member_ids(&self) -> Vec<UserId> {
        self.members.iter().map(|m| m.user_id.clone()).collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FriendPresence {
    pub user_id: UserId,
    pub online: bool,
}

/// Why a session ended.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    ScoreLimit,
    Surrender,
    ClaimVictory,
}

/// In-session state change reported by a participant.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum SessionUpdate {
    MalletMove { position: Vec3 },
    PuckUpdate { puck: PuckState },
}

/// Events sent from a client to the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ClientMessage {
    Authenticate { user_id: UserId },
    CreateParty { max_size: u8 },
    InviteToParty { target_user_id: UserId },
    JoinParty { party_id: PartyId },
    LeaveParty,
    KickMember { member_id: UserId },
    ToggleReady,
    JoinSoloQueue,
    LeaveSoloQueue,
    SessionUpdate {
        session_id: SessionId,
        update: SessionUpdate,
    },
    Score { session_id: SessionId, team: TeamId },
    ClaimVictory { session_id: SessionId },
    Surrender { session_id: SessionId },
    GetFriends,
    CheckPartyStatus,
}

impl ClientMessage {
    /// Event name as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::CreateParty { .. } => "create_party",
            Self::InviteToParty { .. } => "invite_to_party",
            Self::JoinParty { .. } => "join_party",
            Self::LeaveParty => "leave_party",
            Self::KickMember { .. } => "kick_member",
            Self::ToggleReady => "toggle_ready",
            Self::JoinSoloQueue => "join_solo_queue",
            Self::LeaveSoloQueue => "leave_solo_queue",
            Self::SessionUpdate { .. } => "session_update",
            Self::Score { .. } => "score",
            Self::ClaimVictory { .. } => "claim_victory",
            Self::Surrender { .. } => "surrender",
            Self::GetFriends => "get_friends",
            Self::CheckPartyStatus => "check_party_status",
        }
    }
}

/// Events sent from the server to a client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ServerMessage {
    Authenticated {
        user_id: UserId,
        online_friends: Vec<UserId>,
        active_session: Option<SessionId>,
    },
    AuthError {
        reason: String,
    },
    Superseded,
    PartyCreated(PartyStatus),
    PartyInvite {
        party_id: PartyId,
        from: UserId,
        max_size: u8,
    },
    PartyJoined(PartyStatus),
    PartyUpdated(PartyStatus),
    LeftParty,
    PartyStatus(Option<PartyStatus>),
    QueueJoined,
    QueueLeft,
    SessionStart {
        session_id: SessionId,
        mode: SessionMode,
        teams: Teams,
        players: Vec<UserId>,
    },
    SessionState {
        session_id: SessionId,
        state: SessionState,
    },
    ScoreUpdate {
        session_id: SessionId,
        scores: Scores,
    },
    SessionEnd {
        session_id: SessionId,
        winner: TeamId,
        scores: Scores,
        is_winner: bool,
        reason: EndReason,
    },
    OpponentLeft {
        session_id: SessionId,
        user_id: UserId,
    },
    FriendOnline {
        user_id: UserId,
    },
    FriendOffline {
        user_id: UserId,
    },
    FriendsList(Vec<FriendPresence>),
    Error {
        message: String,
    },
}
