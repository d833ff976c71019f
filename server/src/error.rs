//! Error types for the lobby server.
//!
//! [`CoordinatorError`] covers every rejected client request; its `Display`
//! text is what the client receives in an `Error` event.

use shared::{PartyId, SessionId, UserId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Already in a party")]
    AlreadyInParty,

    #[error("Not in a party")]
    NotInParty,

    #[error("Party not found: {0}")]
    PartyNotFound(PartyId),

    #[error("Party is full")]
    PartyFull,

    #[error("Only the party leader can do that")]
    NotLeader,

    #[error("{0} is not a member of your party")]
    NotPartyMember(UserId),

    #[error("Use leave instead of kicking yourself")]
    CannotKickSelf,

    #[error("User is offline")]
    UserOffline,

    #[error("Leave your party first")]
    PartiedUserCannotQueue,

    #[error("Leave the solo queue first")]
    QueuedUserCannotParty,

    #[error("Already in a session")]
    AlreadyInSession,

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Not a participant of this session")]
    NotParticipant,

    #[error("A session needs 2 or 4 players, got {0}")]
    InvalidParticipantCount(usize),

    #[error("Opponents are still active")]
    OpponentsStillActive,
}

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("User not found")]
    UserNotFound(UserId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid user data: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
