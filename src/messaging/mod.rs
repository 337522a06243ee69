//! Messaging Module.
//!
//! One [`ChatSession`] is the chat modal of one signed-in user: its chat list,
//! the active conversation, block set and user search, kept in sync with the
//! store through the live channel. Sessions never coordinate with each other.

pub mod conversation;

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::interact::{Confirm, Interaction, Notice};
use crate::live::{LiveChannel, MessageChange, Subscription, Topic};
use crate::models::{Chat, Id, Message, NewMessage, ProfileStub, Reaction};
use crate::repo::{Repo, RepoError};

pub use conversation::{Action, Conversation, FeedPhase, MessageView, ReactionGroup, SendPhase};

pub const REACTION_EMOJIS: [&str; 6] = ["👍", "❤️", "😂", "😮", "😢", "🔥"];
pub const SEARCH_LIMIT: usize = 10;

pub fn is_supported_emoji(emoji: &str) -> bool {
    REACTION_EMOJIS.contains(&emoji)
}

#[derive(thiserror::Error, Debug)]
pub enum MessagingError {
    #[error("you have blocked this user")] BlockedRecipient,
    #[error("this user is not accepting messages")] ChatDisabled,
    #[error("you cannot start a chat with yourself")] SelfChat,
    #[error("unsupported reaction {0}")] UnsupportedEmoji(String),
    #[error("not a participant of this chat")] NotParticipant,
    #[error(transparent)] Store(#[from] RepoError),
}

pub type MessagingResult<T> = Result<T, MessagingError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Hide the message from the deleting viewer only.
    #[default]
    SoftPerViewer,
    /// Remove reactions, then the message row, for everyone.
    Hard,
}

impl FromStr for DeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "soft" | "soft_per_viewer" => Ok(Self::SoftPerViewer),
            "hard" => Ok(Self::Hard),
            other => Err(format!("unknown delete policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long after a send the chat list is reloaded, so the live echo lands first.
    pub refresh_delay: Duration,
    pub delete_policy: DeletePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { refresh_delay: Duration::from_millis(500), delete_policy: DeletePolicy::default() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatSummary {
    pub chat: Chat,
    pub other: ProfileStub,
    pub last_message: Option<Message>,
    pub unread: u64,
}

impl ChatSummary {
    pub fn last_activity(&self) -> chrono::DateTime<chrono::Utc> {
        self.last_message.as_ref().map_or(self.chat.created_at, |m| m.created_at)
    }
}

enum Incoming {
    Chat(MessageChange),
    Unread,
}

pub struct ChatSession {
    repo: Arc<dyn Repo>,
    live: Arc<dyn LiveChannel>,
    ui: Arc<dyn Interaction>,
    me: Id,
    cfg: SessionConfig,
    chats: Vec<ChatSummary>,
    blocked: HashSet<Id>,
    active: Option<Conversation>,
    active_other: Option<ProfileStub>,
    chat_sub: Option<Subscription>,
    unread_sub: Subscription,
    refresh_at: Option<Instant>,
    search_results: Vec<ProfileStub>,
    draft: String,
    deleting: Option<Id>,
}

impl ChatSession {
    /// Mounts the session: subscribes to incoming messages, then loads blocks and chats.
    pub async fn open(
        repo: Arc<dyn Repo>,
        live: Arc<dyn LiveChannel>,
        ui: Arc<dyn Interaction>,
        me: Id,
        cfg: SessionConfig,
    ) -> MessagingResult<Self> {
        let unread_sub = live.subscribe(Topic::UnreadMessages(me));
        let mut session = Self {
            repo,
            live,
            ui,
            me,
            cfg,
            chats: vec![],
            blocked: HashSet::new(),
            active: None,
            active_other: None,
            chat_sub: None,
            unread_sub,
            refresh_at: None,
            search_results: vec![],
            draft: String::new(),
            deleting: None,
        };
        session.load_blocks().await?;
        session.load_chats().await?;
        info!(user = %me, chats = session.chats.len(), "chat session opened");
        Ok(session)
    }

    pub fn me(&self) -> Id {
        self.me
    }

    pub fn chats(&self) -> &[ChatSummary] {
        &self.chats
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active.as_ref()
    }

    pub fn active_chat_id(&self) -> Option<Id> {
        self.active.as_ref().map(Conversation::chat_id)
    }

    pub fn active_other(&self) -> Option<&ProfileStub> {
        self.active_other.as_ref()
    }

    pub fn is_blocked(&self, user_id: Id) -> bool {
        self.blocked.contains(&user_id)
    }

    /// False when there is no active chat or its other participant is blocked;
    /// the message input is hidden in that case.
    pub fn can_send(&self) -> bool {
        match &self.active_other {
            Some(other) => self.active.is_some() && !self.is_blocked(other.id),
            None => false,
        }
    }

    pub fn search_results(&self) -> &[ProfileStub] {
        &self.search_results
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn deleting(&self) -> Option<Id> {
        self.deleting
    }

    pub fn refresh_pending(&self) -> bool {
        self.refresh_at.is_some()
    }

    fn fail(&self, err: MessagingError) -> MessagingError {
        warn!(user = %self.me, error = %err, "messaging operation failed");
        self.ui.notify(Notice::Failure(err.to_string()));
        err
    }

    async fn load_blocks(&mut self) -> MessagingResult<()> {
        let rows = self.repo.list_blocks_by(self.me).await?;
        self.blocked = rows.into_iter().map(|b| b.blocked_user_id).collect();
        Ok(())
    }

    /// Reloads the chat list, newest activity first.
    pub async fn load_chats(&mut self) -> MessagingResult<()> {
        let mut out = Vec::new();
        for chat in self.repo.list_chats_for(self.me).await? {
            let Some(other_id) = self.other_participant(chat.id).await? else {
                debug!(chat = %chat.id, "chat without a second participant");
                continue;
            };
            let other = ProfileStub::from(&self.repo.get_profile(other_id).await?);
            let last_message = self.repo.latest_message(chat.id, self.me).await?;
            let unread = self.repo.count_unread(chat.id, self.me).await?;
            out.push(ChatSummary { chat, other, last_message, unread });
        }
        out.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
        self.chats = out;
        Ok(())
    }

    async fn other_participant(&self, chat_id: Id) -> MessagingResult<Option<Id>> {
        let parts = self.repo.list_participants(chat_id).await?;
        Ok(parts.into_iter().map(|p| p.user_id).find(|u| *u != self.me))
    }

    /// Every chat of mine that `target` takes part in. Racing sessions can
    /// leave more than one per pair.
    async fn chats_with(&self, target: Id) -> MessagingResult<Vec<Id>> {
        let mut found = Vec::new();
        for chat in self.repo.list_chats_for(self.me).await? {
            let parts = self.repo.list_participants(chat.id).await?;
            if parts.iter().any(|p| p.user_id == target) {
                found.push(chat.id);
            }
        }
        Ok(found)
    }

    /// Resolves the 1:1 chat with `target`, creating it if none exists, and makes it active.
    pub async fn open_chat_with(&mut self, target: &ProfileStub) -> MessagingResult<Id> {
        if target.id == self.me {
            return Err(self.fail(MessagingError::SelfChat));
        }
        if self.is_blocked(target.id) {
            return Err(self.fail(MessagingError::BlockedRecipient));
        }
        let chat_id = match self.resolve_chat(target.id).await {
            Ok(id) => id,
            Err(e) => return Err(self.fail(e)),
        };
        self.select_chat(chat_id).await?;
        Ok(chat_id)
    }

    async fn resolve_chat(&mut self, target: Id) -> MessagingResult<Id> {
        let profile = self.repo.get_profile(target).await?;
        if profile.disable_chat {
            return Err(MessagingError::ChatDisabled);
        }
        if let Some(&existing) = self.chats_with(target).await?.first() {
            debug!(chat = %existing, "reusing existing chat");
            return Ok(existing);
        }
        let chat = self.repo.create_chat().await?;
        // an orphaned chat row is left behind if this fails
        self.repo.add_participants(chat.id, &[self.me, target]).await?;
        info!(chat = %chat.id, user = %self.me, with = %target, "chat created");
        self.load_chats().await?;
        Ok(chat.id)
    }

    /// Activates a chat: swaps the live subscription, loads messages and marks them read.
    pub async fn select_chat(&mut self, chat_id: Id) -> MessagingResult<()> {
        let parts = match self.repo.list_participants(chat_id).await {
            Ok(p) => p,
            Err(e) => return Err(self.fail(e.into())),
        };
        let other = parts.iter().map(|p| p.user_id).find(|u| *u != self.me);
        let (true, Some(other)) = (parts.iter().any(|p| p.user_id == self.me), other) else {
            return Err(self.fail(MessagingError::NotParticipant));
        };

        let other = match self.repo.get_profile(other).await {
            Ok(p) => ProfileStub::from(&p),
            Err(e) => return Err(self.fail(e.into())),
        };

        self.close_chat();
        self.chat_sub = Some(self.live.subscribe(Topic::Chat(chat_id)));
        let mut conv = Conversation::new(chat_id, self.me);
        conv.apply(Action::Loading);

        let views = match self.load_views(chat_id).await {
            Ok(v) => v,
            Err(e) => {
                // leave no subscription and no active chat behind
                self.close_chat();
                return Err(self.fail(e));
            }
        };
        conv.apply(Action::Loaded(views));
        self.active_other = Some(other);
        self.active = Some(conv);
        self.mark_as_read(chat_id).await?;
        Ok(())
    }

    async fn load_views(&self, chat_id: Id) -> MessagingResult<Vec<MessageView>> {
        let messages: Vec<Message> = self
            .repo
            .list_messages(chat_id)
            .await?
            .into_iter()
            .filter(|m| !m.is_hidden_for(self.me))
            .collect();
        let ids: Vec<Id> = messages.iter().map(|m| m.id).collect();
        let reactions = self.repo.list_reactions(&ids).await?;
        Ok(messages
            .into_iter()
            .map(|message| {
                let reactions = reactions.iter().filter(|r| r.message_id == message.id).cloned().collect();
                MessageView { message, reactions }
            })
            .collect())
    }

    /// Deactivates the current chat and drops its live subscription.
    pub fn close_chat(&mut self) {
        self.chat_sub = None;
        self.active = None;
        self.active_other = None;
    }

    /// Sends `text` into the active chat. `Ok(None)` when nothing was sent:
    /// blank text, no active chat, or a send already in flight.
    pub async fn send_message(&mut self, text: &str) -> MessagingResult<Option<Message>> {
        self.draft = text.to_string();
        let content = text.trim();
        if content.is_empty() {
            return Ok(None);
        }
        let Some(conv) = self.active.as_ref() else { return Ok(None) };
        if conv.is_sending() {
            return Ok(None);
        }
        let chat_id = conv.chat_id();
        let Some(other) = self.active_other.as_ref().map(|o| o.id) else {
            return Err(self.fail(MessagingError::NotParticipant));
        };
        if self.is_blocked(other) {
            return Err(self.fail(MessagingError::BlockedRecipient));
        }

        if let Some(conv) = self.active.as_mut() {
            conv.apply(Action::SendStarted);
        }
        let new = NewMessage { chat_id, sender_id: self.me, content: content.to_string() };
        match self.repo.insert_message(new).await {
            Ok(message) => {
                if let Some(conv) = self.active.as_mut() {
                    conv.apply(Action::SendSucceeded(message.clone()));
                }
                self.draft.clear();
                self.refresh_at = Some(Instant::now() + self.cfg.refresh_delay);
                debug!(chat = %chat_id, message = %message.id, "message sent");
                Ok(Some(message))
            }
            Err(e) => {
                if let Some(conv) = self.active.as_mut() {
                    conv.apply(Action::SendFailed(e.to_string()));
                }
                Err(self.fail(e.into()))
            }
        }
    }

    /// Deletes a message of the active chat after confirmation. `Ok(false)` if declined.
    pub async fn delete_message(&mut self, message_id: Id) -> MessagingResult<bool> {
        let Some(view) = self.active.as_ref().and_then(|c| c.get(message_id)) else {
            return Err(self.fail(MessagingError::Store(RepoError::NotFound)));
        };
        let sender = view.message.sender_id;
        if !self.ui.confirm(&Confirm::DeleteMessage(message_id)) {
            return Ok(false);
        }

        self.deleting = Some(message_id);
        let res = match self.cfg.delete_policy {
            DeletePolicy::SoftPerViewer => self.repo.hide_message(message_id, self.me).await.map(|_| ()),
            DeletePolicy::Hard if sender != self.me => Err(RepoError::Denied),
            DeletePolicy::Hard => match self.repo.delete_reactions_for(message_id).await {
                // without reactions, a failure here leaves the bare message behind
                Ok(_) => self.repo.delete_message(message_id).await,
                Err(e) => Err(e),
            },
        };
        self.deleting = None;

        match res {
            Ok(()) => {
                if let Some(conv) = self.active.as_mut() {
                    conv.apply(Action::Removed(message_id));
                }
                self.refresh_at = Some(Instant::now() + self.cfg.refresh_delay);
                self.ui.notify(Notice::Success("Message deleted".into()));
                Ok(true)
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    /// Deletes a chat and everything in it after confirmation.
    pub async fn delete_chat(&mut self, chat_id: Id) -> MessagingResult<bool> {
        let with = self
            .chats
            .iter()
            .find(|c| c.chat.id == chat_id)
            .map(|c| c.other.username.clone())
            .unwrap_or_else(|| "this user".to_string());
        if !self.ui.confirm(&Confirm::DeleteChat { with }) {
            return Ok(false);
        }
        if let Err(e) = self.remove_chat(chat_id).await {
            return Err(self.fail(e));
        }
        self.ui.notify(Notice::Success("Chat deleted".into()));
        Ok(true)
    }

    async fn remove_chat(&mut self, chat_id: Id) -> MessagingResult<()> {
        self.repo.delete_chat(chat_id).await?;
        if self.active_chat_id() == Some(chat_id) {
            self.close_chat();
        }
        self.chats.retain(|c| c.chat.id != chat_id);
        info!(chat = %chat_id, user = %self.me, "chat deleted");
        Ok(())
    }

    fn check_emoji(&self, emoji: &str) -> MessagingResult<()> {
        if is_supported_emoji(emoji) {
            Ok(())
        } else {
            Err(self.fail(MessagingError::UnsupportedEmoji(emoji.to_string())))
        }
    }

    pub async fn add_reaction(&mut self, message_id: Id, emoji: &str) -> MessagingResult<Reaction> {
        self.check_emoji(emoji)?;
        match self.repo.add_reaction(message_id, self.me, emoji).await {
            Ok(r) => {
                if let Some(conv) = self.active.as_mut() {
                    conv.apply(Action::ReactionAdded(r.clone()));
                }
                Ok(r)
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    /// Removes every reaction of mine with this emoji on the message.
    pub async fn remove_reaction(&mut self, message_id: Id, emoji: &str) -> MessagingResult<u64> {
        self.check_emoji(emoji)?;
        match self.repo.remove_reaction(message_id, self.me, emoji).await {
            Ok(n) => {
                if let Some(conv) = self.active.as_mut() {
                    conv.apply(Action::ReactionRemoved { message_id, user_id: self.me, emoji: emoji.to_string() });
                }
                Ok(n)
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    /// Badge click: removes my reaction if I hold it, adds it otherwise.
    /// Returns whether the reaction is now present.
    pub async fn toggle_reaction(&mut self, message_id: Id, emoji: &str) -> MessagingResult<bool> {
        let held = self
            .active
            .as_ref()
            .and_then(|c| c.get(message_id))
            .map_or(false, |v| v.has_reaction(self.me, emoji));
        if held {
            self.remove_reaction(message_id, emoji).await?;
            Ok(false)
        } else {
            self.add_reaction(message_id, emoji).await?;
            Ok(true)
        }
    }

    /// Marks every incoming message of the chat read. Safe to repeat.
    pub async fn mark_as_read(&mut self, chat_id: Id) -> MessagingResult<u64> {
        let touched = match self.repo.mark_read(chat_id, self.me).await {
            Ok(n) => n,
            Err(e) => return Err(self.fail(e.into())),
        };
        if let Some(summary) = self.chats.iter_mut().find(|c| c.chat.id == chat_id) {
            summary.unread = 0;
        }
        if let Some(conv) = self.active.as_mut().filter(|c| c.chat_id() == chat_id) {
            conv.apply(Action::MarkedRead);
        }
        Ok(touched)
    }

    /// Blocks `target` after confirmation and deletes every chat with them.
    pub async fn block_user(&mut self, target: &ProfileStub) -> MessagingResult<bool> {
        if !self.ui.confirm(&Confirm::BlockUser { username: target.username.clone() }) {
            return Ok(false);
        }
        match self.repo.insert_block(self.me, target.id).await {
            Ok(_) => {}
            Err(RepoError::Conflict) => debug!(user = %self.me, blocked = %target.id, "already blocked"),
            Err(e) => return Err(self.fail(e.into())),
        }
        self.blocked.insert(target.id);
        info!(user = %self.me, blocked = %target.id, "user blocked");

        let existing = match self.chats_with(target.id).await {
            Ok(found) => found,
            Err(e) => return Err(self.fail(e)),
        };
        for chat_id in existing {
            if let Err(e) = self.remove_chat(chat_id).await {
                return Err(self.fail(e));
            }
        }
        self.ui.notify(Notice::Success(format!("{} has been blocked", target.username)));
        Ok(true)
    }

    /// Unblocks `target` after confirmation. Deleted chats stay deleted.
    pub async fn unblock_user(&mut self, target: &ProfileStub) -> MessagingResult<bool> {
        if !self.ui.confirm(&Confirm::UnblockUser { username: target.username.clone() }) {
            return Ok(false);
        }
        if let Err(e) = self.repo.delete_block(self.me, target.id).await {
            return Err(self.fail(e.into()));
        }
        self.blocked.remove(&target.id);
        info!(user = %self.me, unblocked = %target.id, "user unblocked");
        self.ui.notify(Notice::Success(format!("{} has been unblocked", target.username)));
        Ok(true)
    }

    /// Case-insensitive search over usernames and display names, excluding me.
    pub async fn search_users(&mut self, query: &str) -> MessagingResult<&[ProfileStub]> {
        let query = query.trim();
        if query.is_empty() {
            self.search_results.clear();
            return Ok(&self.search_results);
        }
        match self.repo.search_profiles(query, self.me, SEARCH_LIMIT).await {
            Ok(rows) => {
                self.search_results = rows.iter().map(ProfileStub::from).collect();
                Ok(&self.search_results)
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    async fn apply_chat_change(&mut self, change: MessageChange) {
        let Some(active_id) = self.active_chat_id() else { return };
        match change {
            MessageChange::Inserted(message) if message.chat_id == active_id => {
                if let Some(conv) = self.active.as_mut() {
                    conv.apply(Action::LiveReceived);
                }
                let reactions = match self.repo.list_reactions(&[message.id]).await {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(message = %message.id, error = %e, "failed to load reactions for live message");
                        vec![]
                    }
                };
                if let Some(conv) = self.active.as_mut() {
                    conv.apply(Action::LiveInserted(MessageView { message, reactions }));
                }
            }
            MessageChange::Deleted(message) if message.chat_id == active_id => {
                if let Some(conv) = self.active.as_mut() {
                    conv.apply(Action::LiveDeleted(message.id));
                }
            }
            _ => {}
        }
    }

    async fn flush_refresh(&mut self) -> MessagingResult<()> {
        if self.refresh_at.map_or(false, |at| at <= Instant::now()) {
            self.refresh_at = None;
            self.load_chats().await?;
        }
        Ok(())
    }

    /// Applies every live change already queued without waiting, then runs a
    /// due chat-list refresh. Returns how many changes were handled.
    pub async fn process_live(&mut self) -> MessagingResult<usize> {
        let mut handled = 0;
        while let Some(change) = self.chat_sub.as_mut().and_then(Subscription::try_recv) {
            self.apply_chat_change(change).await;
            handled += 1;
        }
        let mut incoming = 0;
        while self.unread_sub.try_recv().is_some() {
            incoming += 1;
        }
        if incoming > 0 {
            handled += incoming;
            self.load_chats().await?;
        }
        self.flush_refresh().await?;
        Ok(handled)
    }

    /// Waits for the next live change and applies it. `Ok(false)` once the channel is gone.
    pub async fn next_live(&mut self) -> MessagingResult<bool> {
        let incoming = {
            let unread = &mut self.unread_sub;
            match self.chat_sub.as_mut() {
                Some(chat) => tokio::select! {
                    c = chat.recv() => c.map(Incoming::Chat),
                    u = unread.recv() => u.map(|_| Incoming::Unread),
                },
                None => unread.recv().await.map(|_| Incoming::Unread),
            }
        };
        match incoming {
            Some(Incoming::Chat(change)) => self.apply_chat_change(change).await,
            Some(Incoming::Unread) => self.load_chats().await?,
            None => return Ok(false),
        }
        self.flush_refresh().await?;
        Ok(true)
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        debug!(user = %self.me, "chat session closed");
    }
}
