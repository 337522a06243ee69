//! Per-conversation view state.
//!
//! Optimistic local writes and live echoes both go through [`Conversation::apply`],
//! so a message that arrives twice (once from our own send, once from the
//! live channel) collapses into one entry. Merge rule:
//!
//! * messages are keyed by id; a later event for the same id replaces the
//!   earlier fields,
//! * reactions are keyed by reaction id and unioned,
//! * messages sent by the owner always read as read,
//! * messages the owner has hidden are dropped.

use crate::models::{Id, Message, Reaction};

#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub message: Message,
    pub reactions: Vec<Reaction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Id>,
    /// Whether the viewer is among the holders; clicking the badge removes it.
    pub mine: bool,
}

impl MessageView {
    pub fn new(message: Message) -> Self {
        Self { message, reactions: vec![] }
    }

    /// Reactions grouped by emoji in order of first appearance.
    pub fn reaction_groups(&self, viewer: Id) -> Vec<ReactionGroup> {
        let mut groups: Vec<ReactionGroup> = Vec::new();
        for r in &self.reactions {
            let idx = match groups.iter().position(|g| g.emoji == r.emoji) {
                Some(i) => i,
                None => {
                    groups.push(ReactionGroup { emoji: r.emoji.clone(), count: 0, user_ids: vec![], mine: false });
                    groups.len() - 1
                }
            };
            let g = &mut groups[idx];
            g.count += 1;
            if !g.user_ids.contains(&r.user_id) {
                g.user_ids.push(r.user_id);
            }
            g.mine |= r.user_id == viewer;
        }
        groups
    }

    pub fn has_reaction(&self, user_id: Id, emoji: &str) -> bool {
        self.reactions.iter().any(|r| r.user_id == user_id && r.emoji == emoji)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendPhase {
    Idle,
    Sending,
    Sent(Id),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPhase {
    Loading,
    Loaded,
    ReceivingLive,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Loading,
    Loaded(Vec<MessageView>),
    SendStarted,
    SendSucceeded(Message),
    SendFailed(String),
    /// A live insert was received and its reactions are being fetched.
    LiveReceived,
    LiveInserted(MessageView),
    LiveDeleted(Id),
    /// Removed by the owner, either hidden or deleted.
    Removed(Id),
    ReactionAdded(Reaction),
    ReactionRemoved { message_id: Id, user_id: Id, emoji: String },
    MarkedRead,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    chat_id: Id,
    me: Id,
    messages: Vec<MessageView>,
    send: SendPhase,
    feed: FeedPhase,
}

impl Conversation {
    pub fn new(chat_id: Id, me: Id) -> Self {
        Self { chat_id, me, messages: vec![], send: SendPhase::Idle, feed: FeedPhase::Loading }
    }

    pub fn chat_id(&self) -> Id {
        self.chat_id
    }

    pub fn messages(&self) -> &[MessageView] {
        &self.messages
    }

    pub fn get(&self, message_id: Id) -> Option<&MessageView> {
        self.messages.iter().find(|v| v.message.id == message_id)
    }

    pub fn contains(&self, message_id: Id) -> bool {
        self.get(message_id).is_some()
    }

    pub fn send_phase(&self) -> &SendPhase {
        &self.send
    }

    pub fn feed_phase(&self) -> FeedPhase {
        self.feed
    }

    pub fn is_sending(&self) -> bool {
        self.send == SendPhase::Sending
    }

    pub fn apply(&mut self, action: Action) {
        match action {
            Action::Loading => {
                self.feed = FeedPhase::Loading;
            }
            Action::Loaded(views) => {
                self.messages.clear();
                for v in views {
                    self.merge(v);
                }
                self.feed = FeedPhase::Loaded;
            }
            Action::SendStarted => {
                self.send = SendPhase::Sending;
            }
            Action::SendSucceeded(message) => {
                self.send = SendPhase::Sent(message.id);
                self.merge(MessageView::new(message));
            }
            Action::SendFailed(reason) => {
                self.send = SendPhase::Failed(reason);
            }
            Action::LiveReceived => {
                self.feed = FeedPhase::ReceivingLive;
            }
            Action::LiveInserted(view) => {
                if view.message.chat_id == self.chat_id {
                    self.merge(view);
                }
                self.feed = FeedPhase::Loaded;
            }
            Action::LiveDeleted(id) | Action::Removed(id) => {
                self.messages.retain(|v| v.message.id != id);
            }
            Action::ReactionAdded(reaction) => {
                if let Some(v) = self.messages.iter_mut().find(|v| v.message.id == reaction.message_id) {
                    merge_reaction(&mut v.reactions, reaction);
                }
            }
            Action::ReactionRemoved { message_id, user_id, emoji } => {
                if let Some(v) = self.messages.iter_mut().find(|v| v.message.id == message_id) {
                    v.reactions.retain(|r| !(r.user_id == user_id && r.emoji == emoji));
                }
            }
            Action::MarkedRead => {
                for v in self.messages.iter_mut().filter(|v| v.message.sender_id != self.me) {
                    v.message.is_read = true;
                }
            }
        }
    }

    fn merge(&mut self, mut incoming: MessageView) {
        if incoming.message.is_hidden_for(self.me) {
            self.messages.retain(|v| v.message.id != incoming.message.id);
            return;
        }
        if incoming.message.sender_id == self.me {
            incoming.message.is_read = true;
        }
        match self.messages.iter_mut().find(|v| v.message.id == incoming.message.id) {
            Some(existing) => {
                existing.message = incoming.message;
                for r in incoming.reactions {
                    merge_reaction(&mut existing.reactions, r);
                }
            }
            None => {
                self.messages.push(incoming);
                // stable, so equal timestamps keep arrival order
                self.messages.sort_by(|a, b| a.message.created_at.cmp(&b.message.created_at));
            }
        }
    }
}

fn merge_reaction(list: &mut Vec<Reaction>, reaction: Reaction) {
    match list.iter_mut().find(|r| r.id == reaction.id) {
        Some(slot) => *slot = reaction,
        None => list.push(reaction),
    }
}
