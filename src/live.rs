//! Live-Update Channel.
//!
//! Row changes on `messages` are published into a [`ChangeFeed`] by the store
//! backend; consumers subscribe to a [`Topic`] and only see the changes that
//! topic selects. Delivery follows publish order and nothing more: no replay,
//! no persistence, and a receiver that falls behind skips what it missed.

use std::fmt;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use crate::models::{Id, Message};

const FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum MessageChange {
    Inserted(Message),
    Deleted(Message),
}

impl MessageChange {
    pub fn message(&self) -> &Message {
        match self {
            Self::Inserted(m) | Self::Deleted(m) => m,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Inserts and deletes inside one chat.
    Chat(Id),
    /// Inserts of messages the given user did not send.
    UnreadMessages(Id),
}

impl Topic {
    pub fn matches(&self, change: &MessageChange) -> bool {
        match (self, change) {
            (Topic::Chat(chat_id), change) => change.message().chat_id == *chat_id,
            (Topic::UnreadMessages(user_id), MessageChange::Inserted(m)) => m.sender_id != *user_id,
            (Topic::UnreadMessages(_), MessageChange::Deleted(_)) => false,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Chat(id) => write!(f, "chat:{id}"),
            Topic::UnreadMessages(id) => write!(f, "unread_messages:{id}"),
        }
    }
}

pub trait LiveChannel: Send + Sync {
    fn subscribe(&self, topic: Topic) -> Subscription;
}

/// Fan-out of message row changes to every subscriber.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<MessageChange>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, change: MessageChange) {
        // no subscribers is not an error
        let _ = self.tx.send(change);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveChannel for ChangeFeed {
    fn subscribe(&self, topic: Topic) -> Subscription {
        debug!(%topic, "subscribed");
        Subscription { topic, rx: self.tx.subscribe() }
    }
}

/// A topic-filtered receiver. Dropping it unsubscribes.
pub struct Subscription {
    topic: Topic,
    rx: broadcast::Receiver<MessageChange>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Waits for the next matching change; `None` once the feed is gone.
    pub async fn recv(&mut self) -> Option<MessageChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if self.topic.matches(&change) => return Some(change),
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, skipped = n, "live subscription lagged");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching change that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<MessageChange> {
        loop {
            match self.rx.try_recv() {
                Ok(change) if self.topic.matches(&change) => return Some(change),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, skipped = n, "live subscription lagged");
                    continue;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!(topic = %self.topic, "unsubscribed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn msg(chat_id: Id, sender_id: Id) -> Message {
        Message {
            id: Uuid::new_v4(),
            chat_id,
            sender_id,
            content: "hi".into(),
            created_at: Utc::now(),
            is_read: false,
            deleted_by: vec![],
        }
    }

    #[test]
    fn topic_names() {
        let id = Uuid::nil();
        assert_eq!(Topic::Chat(id).to_string(), format!("chat:{id}"));
        assert_eq!(Topic::UnreadMessages(id).to_string(), format!("unread_messages:{id}"));
    }

    #[test]
    fn chat_topic_filters_by_chat() {
        let feed = ChangeFeed::new();
        let chat = Uuid::new_v4();
        let mut sub = feed.subscribe(Topic::Chat(chat));
        feed.publish(MessageChange::Inserted(msg(Uuid::new_v4(), Uuid::new_v4())));
        let mine = msg(chat, Uuid::new_v4());
        feed.publish(MessageChange::Deleted(mine.clone()));
        assert_eq!(sub.try_recv(), Some(MessageChange::Deleted(mine)));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn unread_topic_ignores_own_messages_and_deletes() {
        let feed = ChangeFeed::new();
        let me = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let mut sub = feed.subscribe(Topic::UnreadMessages(me));
        feed.publish(MessageChange::Inserted(msg(chat, me)));
        feed.publish(MessageChange::Deleted(msg(chat, Uuid::new_v4())));
        assert!(sub.try_recv().is_none());
        feed.publish(MessageChange::Inserted(msg(chat, Uuid::new_v4())));
        assert!(sub.try_recv().is_some());
    }

    #[test]
    fn dropping_unsubscribes() {
        let feed = ChangeFeed::new();
        let sub = feed.subscribe(Topic::Chat(Uuid::nil()));
        assert_eq!(feed.subscriber_count(), 1);
        drop(sub);
        assert_eq!(feed.subscriber_count(), 0);
    }
}
