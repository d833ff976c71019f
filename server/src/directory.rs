//! Identity directory: the external user store consulted by the lobby.
//!
//! The lobby only needs two things from it: resolving a user id to a
//! profile (friends included) at authentication time, and bumping win/loss
//! counters when a session ends. [`InMemoryDirectory`] is the bundled
//! implementation, seeded from a JSON file.

use crate::error::DirectoryError;
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use shared::UserId;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserStats {
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub nickname: String,
    #[serde(default)]
    pub friends: Vec<UserId>,
    #[serde(default)]
    pub stats: UserStats,
}

impl UserProfile {
    pub fn new(id: impl Into<UserId>, nickname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nickname: nickname.into(),
            friends: Vec::new(),
            stats: UserStats::default(),
        }
    }

    pub fn with_friends<I, S>(mut self, friends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<UserId>,
    {
        self.friends = friends.into_iter().map(Into::into).collect();
        self
    }
}

/// Result of a finished session for one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Win,
    Loss,
    Draw,
}

impl UserStats {
    pub fn record(&mut self, outcome: MatchOutcome) {
        match outcome {
            MatchOutcome::Win => self.wins += 1,
            MatchOutcome::Loss => self.losses += 1,
            MatchOutcome::Draw => self.draws += 1,
        }
    }
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Resolves a user id to its profile.
    async fn find_user(&self, user_id: &str) -> Result<UserProfile, DirectoryError>;

    /// Increments the counter matching `outcome` for the user.
    async fn record_result(
        &self,
        user_id: &str,
        outcome: MatchOutcome,
    ) -> Result<(), DirectoryError>;
}

/// Directory backed by a process-local map.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashMap<UserId, UserProfile>>,
}

impl InMemoryDirectory {
    pub fn with_users(users: impl IntoIterator<Item = UserProfile>) -> Self {
        let users = users
            .into_iter()
            .map(|profile| (profile.id.clone(), profile))
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }

    /// Loads a JSON array of profiles.
    pub fn from_json_file(path: &Path) -> Result<Self, DirectoryError> {
        let data = std::fs::read_to_string(path)?;
        let profiles: Vec<UserProfile> = serde_json::from_str(&data)?;
        info!("Loaded {} user profiles from {}", profiles.len(), path.display());
        Ok(Self::with_users(profiles))
    }

    pub async fn stats(&self, user_id: &str) -> Option<UserStats> {
        self.users.read().await.get(user_id).map(|p| p.stats)
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryDirectory {
    async fn find_user(&self, user_id: &str) -> Result<UserProfile, DirectoryError> {
        self.users
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| DirectoryError::UserNotFound(user_id.to_string()))
    }

    async fn record_result(
        &self,
        user_id: &str,
        outcome: MatchOutcome,
    ) -> Result<(), DirectoryError> {
        let mut users = self.users.write().await;
        let profile = users
            .get_mut(user_id)
            .ok_or_else(|| DirectoryError::UserNotFound(user_id.to_string()))?;
        profile.stats.record(outcome);
        Ok(())
    }
}
