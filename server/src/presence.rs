//! Online presence: which user is reachable through which connection.
//!
//! The registry is a bidirectional map between user ids and connection ids.
//! A user has at most one live connection; registering again from another
//! connection replaces the old association and hands the stale connection
//! back to the caller so it can be closed.

use log::info;
use shared::UserId;
use std::collections::HashMap;

/// Server-assigned connection identifier.
pub type ConnectionId = u64;

#[derive(Debug, Clone)]
struct PresenceEntry {
    connection: ConnectionId,
    /// Friend ids as returned by the directory when the user authenticated.
    friends: Vec<UserId>,
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Registration {
    /// Older connection of the same user that no longer maps to anyone.
    pub superseded: Option<ConnectionId>,
    /// Online friends, paired with their connections.
    pub online_friends: Vec<(UserId, ConnectionId)>,
}

/// Outcome of removing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub user_id: UserId,
    pub online_friends: Vec<(UserId, ConnectionId)>,
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    by_user: HashMap<UserId, PresenceEntry>,
    by_connection: HashMap<ConnectionId, UserId>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `user_id` with `connection`.
    ///
    /// The connection must not be registered for a different user; callers
    /// process that user's departure first.
    pub fn register(
        &mut self,
        user_id: &str,
        connection: ConnectionId,
        friends: Vec<UserId>,
    ) -> Registration {
        let superseded = self
            .by_user
            .insert(
                user_id.to_string(),
                PresenceEntry {
                    connection,
                    friends,
                },
            )
            .map(|old| old.connection)
            .filter(|old| *old != connection);

        if let Some(old) = superseded {
            self.by_connection.remove(&old);
            info!(
                "User {} moved from connection {} to {}",
                user_id, old, connection
            );
        }
        self.by_connection.insert(connection, user_id.to_string());

        Registration {
            superseded,
            online_friends: self.online_friends(user_id),
        }
    }

    /// Removes the connection and its user, if it was authenticated.
    pub fn unregister(&mut self, connection: ConnectionId) -> Option<Departure> {
        let user_id = self.by_connection.remove(&connection)?;
        let entry = self.by_user.remove(&user_id)?;

        let online_friends = self.online_subset(&entry.friends);
        Some(Departure {
            user_id,
            online_friends,
        })
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnectionId> {
        self.by_user.get(user_id).map(|entry| entry.connection)
    }

    pub fn user_for(&self, connection: ConnectionId) -> Option<&UserId> {
        self.by_connection.get(&connection)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    /// Friend ids cached for an online user.
    pub fn friends_of(&self, user_id: &str) -> &[UserId] {
        self.by_user
            .get(user_id)
            .map(|entry| entry.friends.as_slice())
            .unwrap_or(&[])
    }

    pub fn online_friends(&self, user_id: &str) -> Vec<(UserId, ConnectionId)> {
        self.online_subset(self.friends_of(user_id))
    }

    fn online_subset(&self, ids: &[UserId]) -> Vec<(UserId, ConnectionId)> {
        ids.iter()
            .filter_map(|id| self.lookup(id).map(|conn| (id.clone(), conn)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }
}
