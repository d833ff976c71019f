//! FIFO pool of unpartied users waiting for an automatic 1v1 pairing.

use log::debug;
use shared::UserId;
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Default)]
pub struct SoloQueue {
    order: VecDeque<UserId>,
    queued: HashSet<UserId>,
}

impl SoloQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the user. Returns false if they were already waiting.
    pub fn enqueue(&mut self, user_id: &str) -> bool {
        if !self.queued.insert(user_id.to_string()) {
            return false;
        }
        self.order.push_back(user_id.to_string());
        debug!("{} queued ({} waiting)", user_id, self.order.len());
        true
    }

    /// Removes the user wherever they are in line.
    pub fn dequeue(&mut self, user_id: &str) -> bool {
        if !self.queued.remove(user_id) {
            return false;
        }
        self.order.retain(|id| id != user_id);
        true
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.queued.contains(user_id)
    }

    /// The two longest-waiting users, without removing them.
    pub fn peek_pair(&self) -> Option<[UserId; 2]> {
        match (self.order.front(), self.order.get(1)) {
            (Some(first), Some(second)) => Some([first.clone(), second.clone()]),
            _ => None,
        }
    }

    /// Removes the two longest-waiting users.
    pub fn take_pair(&mut self) -> Option<[UserId; 2]> {
        let pair = self.peek_pair()?;
        for user_id in &pair {
            self.dequeue(user_id);
        }
        Some(pair)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
