//! Side-channel state written and read by pipeline stages.
//!
//! The real persistence layer is an external collaborator; pipeline stages
//! only need this narrow seam. `InMemoryStore` backs tests and apps that do
//! not plug in their own store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::events::event::{ChannelId, MessageId, UserId};

pub trait StateStore: Send + Sync {
    /// Record an incoming message.
    fn record_message(&self, channel: &ChannelId, message: &MessageId, author: &UserId);

    /// Record that `user` has read `channel` up to now.
    fn record_read(&self, channel: &ChannelId, user: &UserId);

    /// Messages in `channel` authored by others since `user`'s last read.
    fn unread_count(&self, channel: &ChannelId, user: &UserId) -> u64;

    fn set_typing(&self, channel: &ChannelId, user: &UserId, typing: bool);

    fn typing_users(&self, channel: &ChannelId) -> BTreeSet<UserId>;
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    /// Per-channel message log: (message id, author).
    messages: BTreeMap<ChannelId, Vec<(MessageId, UserId)>>,
    /// Read watermark: how many foreign messages the user had seen at read time.
    reads: BTreeMap<(ChannelId, UserId), u64>,
    typing: BTreeMap<ChannelId, BTreeSet<UserId>>,
}

impl StoreInner {
    fn foreign_message_count(&self, channel: &ChannelId, user: &UserId) -> u64 {
        self.messages
            .get(channel)
            .map(|log| log.iter().filter(|(_, author)| author != user).count() as u64)
            .unwrap_or(0)
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        // The inner maps stay consistent even if a holder panicked mid-update.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StateStore for InMemoryStore {
    fn record_message(&self, channel: &ChannelId, message: &MessageId, author: &UserId) {
        self.lock()
            .messages
            .entry(channel.clone())
            .or_default()
            .push((message.clone(), author.clone()));
    }

    fn record_read(&self, channel: &ChannelId, user: &UserId) {
        let mut inner = self.lock();
        let seen = inner.foreign_message_count(channel, user);
        inner.reads.insert((channel.clone(), user.clone()), seen);
    }

    fn unread_count(&self, channel: &ChannelId, user: &UserId) -> u64 {
        let inner = self.lock();
        let total = inner.foreign_message_count(channel, user);
        let seen = inner
            .reads
            .get(&(channel.clone(), user.clone()))
            .copied()
            .unwrap_or(0);
        total.saturating_sub(seen)
    }

    fn set_typing(&self, channel: &ChannelId, user: &UserId, typing: bool) {
        let mut inner = self.lock();
        let entry = inner.typing.entry(channel.clone()).or_default();
        if typing {
            entry.insert(user.clone());
        } else {
            entry.remove(user);
        }
    }

    fn typing_users(&self, channel: &ChannelId) -> BTreeSet<UserId> {
        self.lock()
            .typing
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (ChannelId, UserId, UserId) {
        (
            ChannelId::from("general"),
            UserId::from("ada"),
            UserId::from("grace"),
        )
    }

    #[test]
    fn unread_counts_exclude_own_messages() {
        let (channel, ada, grace) = ids();
        let store = InMemoryStore::new();

        store.record_message(&channel, &MessageId::from("m1"), &grace);
        store.record_message(&channel, &MessageId::from("m2"), &ada);

        assert_eq!(store.unread_count(&channel, &ada), 1);
        assert_eq!(store.unread_count(&channel, &grace), 1);
    }

    #[test]
    fn read_resets_unread_until_new_messages() {
        let (channel, ada, grace) = ids();
        let store = InMemoryStore::new();

        store.record_message(&channel, &MessageId::from("m1"), &grace);
        store.record_read(&channel, &ada);
        assert_eq!(store.unread_count(&channel, &ada), 0);

        store.record_message(&channel, &MessageId::from("m2"), &grace);
        assert_eq!(store.unread_count(&channel, &ada), 1);
    }

    #[test]
    fn typing_set_tracks_start_and_stop() {
        let (channel, ada, grace) = ids();
        let store = InMemoryStore::new();

        store.set_typing(&channel, &ada, true);
        store.set_typing(&channel, &grace, true);
        store.set_typing(&channel, &ada, false);

        let typing = store.typing_users(&channel);
        assert_eq!(typing.len(), 1);
        assert!(typing.contains(&grace));
    }
}
