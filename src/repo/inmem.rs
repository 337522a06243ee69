use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::*;
use crate::live::{ChangeFeed, MessageChange};

#[derive(Default, Serialize, Deserialize)]
struct State {
    profiles: Vec<Profile>,
    badges: Vec<UserBadge>,
    problems: Vec<Problem>,
    projects: Vec<Project>,
    upvotes: Vec<Upvote>,
    chats: Vec<Chat>,
    participants: Vec<ChatParticipant>,
    messages: Vec<Message>,
    reactions: Vec<Reaction>,
    blocks: Vec<Block>,
    transactions: Vec<PointTransaction>,
    items: Vec<CustomizationItem>,
    customizations: Vec<UserCustomization>,
    aliases: Vec<UserAlias>,
}

/// Process-local store. Optionally snapshotted to a JSON file after every write.
#[derive(Clone)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
    snapshot_path: Option<Arc<PathBuf>>,
    feed: ChangeFeed,
}

impl InMemRepo {
    pub fn new() -> Self {
        Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None, feed: ChangeFeed::new() }
    }

    /// Loads `path` if it holds a snapshot and keeps it updated afterwards.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = Self::load_state_from(&path);
        Self { state: Arc::new(RwLock::new(state)), snapshot_path: Some(Arc::new(path)), feed: ChangeFeed::new() }
    }

    /// The feed this store publishes message row changes into.
    pub fn feed(&self) -> ChangeFeed {
        self.feed.clone()
    }

    fn load_state_from(path: &Path) -> State {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                Ok(s) => {
                    info!(path = %path.display(), "loaded snapshot");
                    s
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable snapshot, starting empty");
                    State::default()
                }
            },
            Err(e) => {
                info!(path = %path.display(), error = %e, "no snapshot, starting empty");
                State::default()
            }
        }
    }

    fn persist(&self) {
        let Some(path) = self.snapshot_path.as_deref() else { return };
        let bytes = match self.state.read() {
            Ok(s) => serde_json::to_vec_pretty(&*s),
            Err(_) => return,
        };
        match bytes {
            Ok(bytes) => {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(path, bytes) {
                    warn!(path = %path.display(), error = %e, "failed to write snapshot");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialise snapshot"),
        }
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|e| RepoError::Internal(format!("state lock poisoned: {e}")))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|e| RepoError::Internal(format!("state lock poisoned: {e}")))
    }

    /// Runs a write under the lock, then snapshots once the lock is released.
    fn mutate<T>(&self, f: impl FnOnce(&mut State) -> RepoResult<T>) -> RepoResult<T> {
        let out = {
            let mut s = self.write()?;
            f(&mut s)?
        };
        self.persist();
        Ok(out)
    }
}

impl Default for InMemRepo {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

trait FeedRow: Clone {
    fn title(&self) -> &str;
    fn description(&self) -> &str;
    fn category(&self) -> &str;
    fn upvotes(&self) -> i64;
    fn created_at(&self) -> DateTime<Utc>;
}

impl FeedRow for Problem {
    fn title(&self) -> &str { &self.title }
    fn description(&self) -> &str { &self.description }
    fn category(&self) -> &str { &self.category }
    fn upvotes(&self) -> i64 { self.upvotes }
    fn created_at(&self) -> DateTime<Utc> { self.created_at }
}

impl FeedRow for Project {
    fn title(&self) -> &str { &self.title }
    fn description(&self) -> &str { &self.description }
    fn category(&self) -> &str { &self.category }
    fn upvotes(&self) -> i64 { self.upvotes }
    fn created_at(&self) -> DateTime<Utc> { self.created_at }
}

fn page_of<T: FeedRow>(rows: &[T], query: &FeedQuery, offset: usize, limit: usize) -> Page<T> {
    let needle = query.search_term().map(str::to_lowercase);
    // newest first before the stable sort so equal keys keep newest-first order
    let mut v: Vec<T> = rows
        .iter()
        .rev()
        .filter(|r| match needle.as_deref() {
            Some(n) => contains_ci(r.title(), n) || contains_ci(r.description(), n),
            None => true,
        })
        .filter(|r| query.category_filter().map_or(true, |c| r.category() == c))
        .cloned()
        .collect();
    match query.sort {
        Sort::Recent => v.sort_by(|a, b| b.created_at().cmp(&a.created_at())),
        Sort::Popular => v.sort_by(|a, b| {
            b.upvotes().cmp(&a.upvotes()).then_with(|| b.created_at().cmp(&a.created_at()))
        }),
    }
    let total = v.len() as u64;
    Page { items: v.into_iter().skip(offset).take(limit).collect(), total: Some(total) }
}

#[async_trait]
impl ProfileRepo for InMemRepo {
    async fn get_profile(&self, id: Id) -> RepoResult<Profile> {
        let s = self.read()?;
        s.profiles.iter().find(|p| p.id == id).cloned().ok_or(RepoError::NotFound)
    }

    async fn find_profile_by_username(&self, username: &str) -> RepoResult<Option<Profile>> {
        let wanted = username.trim().to_lowercase();
        let s = self.read()?;
        Ok(s.profiles.iter().find(|p| p.username == wanted).cloned())
    }

    async fn create_profile(&self, new: NewProfile) -> RepoResult<Profile> {
        let username = new.username.trim().to_lowercase();
        self.mutate(|s| {
            if s.profiles.iter().any(|p| p.id == new.id || p.username == username) {
                return Err(RepoError::Conflict);
            }
            let profile = Profile {
                id: new.id,
                username,
                display_name: new.display_name,
                avatar_url: new.avatar_url,
                bio: None,
                points: 0,
                disable_chat: false,
                created_at: Utc::now(),
            };
            s.profiles.push(profile.clone());
            Ok(profile)
        })
    }

    async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<Profile> {
        self.mutate(|s| {
            let p = s.profiles.iter_mut().find(|p| p.id == id).ok_or(RepoError::NotFound)?;
            if let Some(v) = upd.display_name { p.display_name = Some(v); }
            if let Some(v) = upd.avatar_url { p.avatar_url = Some(v); }
            if let Some(v) = upd.bio { p.bio = Some(v); }
            if let Some(v) = upd.disable_chat { p.disable_chat = v; }
            Ok(p.clone())
        })
    }

    async fn set_points(&self, id: Id, points: i64) -> RepoResult<Profile> {
        self.mutate(|s| {
            let p = s.profiles.iter_mut().find(|p| p.id == id).ok_or(RepoError::NotFound)?;
            p.points = points;
            Ok(p.clone())
        })
    }

    async fn search_profiles(&self, query: &str, exclude: Id, limit: usize) -> RepoResult<Vec<Profile>> {
        let needle = query.trim().to_lowercase();
        let s = self.read()?;
        let mut v: Vec<Profile> = s
            .profiles
            .iter()
            .filter(|p| p.id != exclude)
            .filter(|p| {
                contains_ci(&p.username, &needle)
                    || p.display_name.as_deref().map_or(false, |d| contains_ci(d, &needle))
            })
            .cloned()
            .collect();
        v.sort_by(|a, b| a.username.cmp(&b.username));
        v.truncate(limit);
        Ok(v)
    }

    async fn list_profile_ids(&self) -> RepoResult<Vec<Id>> {
        Ok(self.read()?.profiles.iter().map(|p| p.id).collect())
    }

    async fn list_badges(&self, user_id: Id) -> RepoResult<Vec<UserBadge>> {
        Ok(self.read()?.badges.iter().filter(|b| b.user_id == user_id).cloned().collect())
    }

    async fn award_badge(&self, user_id: Id, badge: &str) -> RepoResult<UserBadge> {
        self.mutate(|s| {
            if !s.profiles.iter().any(|p| p.id == user_id) {
                return Err(RepoError::NotFound);
            }
            if s.badges.iter().any(|b| b.user_id == user_id && b.badge == badge) {
                return Err(RepoError::Conflict);
            }
            let b = UserBadge { id: Uuid::new_v4(), user_id, badge: badge.to_string(), awarded_at: Utc::now() };
            s.badges.push(b.clone());
            Ok(b)
        })
    }
}

#[async_trait]
impl ContentRepo for InMemRepo {
    async fn create_problem(&self, author_id: Id, new: NewProblem) -> RepoResult<Problem> {
        self.mutate(|s| {
            let problem = Problem {
                id: Uuid::new_v4(),
                author_id,
                title: new.title,
                description: new.description,
                category: new.category,
                upvotes: 0,
                created_at: Utc::now(),
            };
            s.problems.push(problem.clone());
            Ok(problem)
        })
    }

    async fn get_problem(&self, id: Id) -> RepoResult<Problem> {
        let s = self.read()?;
        s.problems.iter().find(|p| p.id == id).cloned().ok_or(RepoError::NotFound)
    }

    async fn list_problems(&self, query: &FeedQuery, offset: usize, limit: usize) -> RepoResult<Page<Problem>> {
        Ok(page_of(&self.read()?.problems, query, offset, limit))
    }

    async fn set_problem_upvotes(&self, id: Id, upvotes: i64) -> RepoResult<()> {
        self.mutate(|s| {
            let p = s.problems.iter_mut().find(|p| p.id == id).ok_or(RepoError::NotFound)?;
            p.upvotes = upvotes;
            Ok(())
        })
    }

    async fn delete_problem(&self, id: Id) -> RepoResult<()> {
        self.mutate(|s| {
            let before = s.problems.len();
            s.problems.retain(|p| p.id != id);
            if s.problems.len() == before {
                return Err(RepoError::NotFound);
            }
            s.upvotes.retain(|u| u.problem_id != id);
            Ok(())
        })
    }

    async fn create_project(&self, owner_id: Id, new: NewProject) -> RepoResult<Project> {
        self.mutate(|s| {
            let project = Project {
                id: Uuid::new_v4(),
                owner_id,
                title: new.title,
                description: new.description,
                category: new.category,
                url: new.url,
                upvotes: 0,
                created_at: Utc::now(),
            };
            s.projects.push(project.clone());
            Ok(project)
        })
    }

    async fn list_projects(&self, query: &FeedQuery, offset: usize, limit: usize) -> RepoResult<Page<Project>> {
        Ok(page_of(&self.read()?.projects, query, offset, limit))
    }
}

#[async_trait]
impl UpvoteRepo for InMemRepo {
    async fn find_upvote(&self, problem_id: Id, user_id: Id) -> RepoResult<Option<Upvote>> {
        let s = self.read()?;
        Ok(s.upvotes.iter().find(|u| u.problem_id == problem_id && u.user_id == user_id).cloned())
    }

    async fn insert_upvote(&self, problem_id: Id, user_id: Id) -> RepoResult<Upvote> {
        self.mutate(|s| {
            if !s.problems.iter().any(|p| p.id == problem_id) {
                return Err(RepoError::NotFound);
            }
            if s.upvotes.iter().any(|u| u.problem_id == problem_id && u.user_id == user_id) {
                return Err(RepoError::Conflict);
            }
            let up = Upvote { id: Uuid::new_v4(), problem_id, user_id, created_at: Utc::now() };
            s.upvotes.push(up.clone());
            Ok(up)
        })
    }

    async fn delete_upvote(&self, problem_id: Id, user_id: Id) -> RepoResult<bool> {
        self.mutate(|s| {
            let before = s.upvotes.len();
            s.upvotes.retain(|u| !(u.problem_id == problem_id && u.user_id == user_id));
            Ok(s.upvotes.len() != before)
        })
    }
}

#[async_trait]
impl ChatRepo for InMemRepo {
    async fn list_chats_for(&self, user_id: Id) -> RepoResult<Vec<Chat>> {
        let s = self.read()?;
        Ok(s.chats
            .iter()
            .filter(|c| s.participants.iter().any(|p| p.chat_id == c.id && p.user_id == user_id))
            .cloned()
            .collect())
    }

    async fn list_participants(&self, chat_id: Id) -> RepoResult<Vec<ChatParticipant>> {
        Ok(self.read()?.participants.iter().filter(|p| p.chat_id == chat_id).cloned().collect())
    }

    async fn create_chat(&self) -> RepoResult<Chat> {
        self.mutate(|s| {
            let chat = Chat { id: Uuid::new_v4(), created_at: Utc::now() };
            s.chats.push(chat.clone());
            Ok(chat)
        })
    }

    async fn add_participants(&self, chat_id: Id, user_ids: &[Id]) -> RepoResult<()> {
        self.mutate(|s| {
            if !s.chats.iter().any(|c| c.id == chat_id) {
                return Err(RepoError::NotFound);
            }
            if user_ids.iter().any(|u| s.participants.iter().any(|p| p.chat_id == chat_id && p.user_id == *u)) {
                return Err(RepoError::Conflict);
            }
            s.participants.extend(user_ids.iter().map(|u| ChatParticipant { chat_id, user_id: *u }));
            Ok(())
        })
    }

    async fn delete_chat(&self, chat_id: Id) -> RepoResult<()> {
        self.mutate(|s| {
            let before = s.chats.len();
            s.chats.retain(|c| c.id != chat_id);
            if s.chats.len() == before {
                return Err(RepoError::NotFound);
            }
            let doomed: Vec<Id> = s.messages.iter().filter(|m| m.chat_id == chat_id).map(|m| m.id).collect();
            s.reactions.retain(|r| !doomed.contains(&r.message_id));
            s.messages.retain(|m| m.chat_id != chat_id);
            s.participants.retain(|p| p.chat_id != chat_id);
            Ok(())
        })
    }
}

#[async_trait]
impl MessageRepo for InMemRepo {
    async fn list_messages(&self, chat_id: Id) -> RepoResult<Vec<Message>> {
        Ok(self.read()?.messages.iter().filter(|m| m.chat_id == chat_id).cloned().collect())
    }

    async fn get_message(&self, id: Id) -> RepoResult<Message> {
        let s = self.read()?;
        s.messages.iter().find(|m| m.id == id).cloned().ok_or(RepoError::NotFound)
    }

    async fn insert_message(&self, new: NewMessage) -> RepoResult<Message> {
        let message = self.mutate(|s| {
            if !s.participants.iter().any(|p| p.chat_id == new.chat_id && p.user_id == new.sender_id) {
                return Err(RepoError::Denied);
            }
            let m = Message {
                id: Uuid::new_v4(),
                chat_id: new.chat_id,
                sender_id: new.sender_id,
                content: new.content,
                created_at: Utc::now(),
                is_read: false,
                deleted_by: vec![],
            };
            s.messages.push(m.clone());
            Ok(m)
        })?;
        self.feed.publish(MessageChange::Inserted(message.clone()));
        Ok(message)
    }

    async fn delete_message(&self, id: Id) -> RepoResult<()> {
        let removed = self.mutate(|s| {
            let idx = s.messages.iter().position(|m| m.id == id).ok_or(RepoError::NotFound)?;
            Ok(s.messages.remove(idx))
        })?;
        self.feed.publish(MessageChange::Deleted(removed));
        Ok(())
    }

    async fn hide_message(&self, id: Id, viewer: Id) -> RepoResult<Message> {
        self.mutate(|s| {
            let m = s.messages.iter_mut().find(|m| m.id == id).ok_or(RepoError::NotFound)?;
            if !m.deleted_by.contains(&viewer) {
                m.deleted_by.push(viewer);
            }
            Ok(m.clone())
        })
    }

    async fn mark_read(&self, chat_id: Id, reader: Id) -> RepoResult<u64> {
        self.mutate(|s| {
            let mut touched = 0;
            for m in s.messages.iter_mut().filter(|m| m.chat_id == chat_id && m.sender_id != reader && !m.is_read) {
                m.is_read = true;
                touched += 1;
            }
            Ok(touched)
        })
    }

    async fn count_unread(&self, chat_id: Id, reader: Id) -> RepoResult<u64> {
        let s = self.read()?;
        Ok(s.messages
            .iter()
            .filter(|m| m.chat_id == chat_id && m.sender_id != reader && !m.is_read && !m.is_hidden_for(reader))
            .count() as u64)
    }

    async fn latest_message(&self, chat_id: Id, viewer: Id) -> RepoResult<Option<Message>> {
        let s = self.read()?;
        Ok(s.messages.iter().rev().find(|m| m.chat_id == chat_id && !m.is_hidden_for(viewer)).cloned())
    }
}

#[async_trait]
impl ReactionRepo for InMemRepo {
    async fn list_reactions(&self, message_ids: &[Id]) -> RepoResult<Vec<Reaction>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }
        Ok(self.read()?.reactions.iter().filter(|r| message_ids.contains(&r.message_id)).cloned().collect())
    }

    async fn add_reaction(&self, message_id: Id, user_id: Id, emoji: &str) -> RepoResult<Reaction> {
        self.mutate(|s| {
            if !s.messages.iter().any(|m| m.id == message_id) {
                return Err(RepoError::NotFound);
            }
            if let Some(existing) = s
                .reactions
                .iter()
                .find(|r| r.message_id == message_id && r.user_id == user_id && r.emoji == emoji)
            {
                return Ok(existing.clone());
            }
            let r = Reaction { id: Uuid::new_v4(), message_id, user_id, emoji: emoji.to_string(), created_at: Utc::now() };
            s.reactions.push(r.clone());
            Ok(r)
        })
    }

    async fn remove_reaction(&self, message_id: Id, user_id: Id, emoji: &str) -> RepoResult<u64> {
        self.mutate(|s| {
            let before = s.reactions.len();
            s.reactions.retain(|r| !(r.message_id == message_id && r.user_id == user_id && r.emoji == emoji));
            Ok((before - s.reactions.len()) as u64)
        })
    }

    async fn delete_reactions_for(&self, message_id: Id) -> RepoResult<u64> {
        self.mutate(|s| {
            let before = s.reactions.len();
            s.reactions.retain(|r| r.message_id != message_id);
            Ok((before - s.reactions.len()) as u64)
        })
    }
}

#[async_trait]
impl BlockRepo for InMemRepo {
    async fn list_blocks_by(&self, blocker_id: Id) -> RepoResult<Vec<Block>> {
        Ok(self.read()?.blocks.iter().filter(|b| b.blocker_id == blocker_id).cloned().collect())
    }

    async fn insert_block(&self, blocker_id: Id, blocked_user_id: Id) -> RepoResult<Block> {
        self.mutate(|s| {
            if s.blocks.iter().any(|b| b.blocker_id == blocker_id && b.blocked_user_id == blocked_user_id) {
                return Err(RepoError::Conflict);
            }
            let b = Block { id: Uuid::new_v4(), blocker_id, blocked_user_id, created_at: Utc::now() };
            s.blocks.push(b.clone());
            Ok(b)
        })
    }

    async fn delete_block(&self, blocker_id: Id, blocked_user_id: Id) -> RepoResult<bool> {
        self.mutate(|s| {
            let before = s.blocks.len();
            s.blocks.retain(|b| !(b.blocker_id == blocker_id && b.blocked_user_id == blocked_user_id));
            Ok(s.blocks.len() != before)
        })
    }
}

#[async_trait]
impl LedgerRepo for InMemRepo {
    async fn append_transaction(&self, new: NewPointTransaction) -> RepoResult<PointTransaction> {
        self.mutate(|s| {
            let tx = PointTransaction {
                id: Uuid::new_v4(),
                user_id: new.user_id,
                points: new.points,
                kind: new.kind,
                description: new.description,
                created_at: Utc::now(),
            };
            s.transactions.push(tx.clone());
            Ok(tx)
        })
    }

    async fn list_transactions(&self, user_id: Id) -> RepoResult<Vec<PointTransaction>> {
        Ok(self.read()?.transactions.iter().filter(|t| t.user_id == user_id).cloned().collect())
    }
}

#[async_trait]
impl ShopRepo for InMemRepo {
    async fn list_items(&self) -> RepoResult<Vec<CustomizationItem>> {
        let mut v = self.read()?.items.clone();
        v.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.name.cmp(&b.name)));
        Ok(v)
    }

    async fn get_item(&self, id: Id) -> RepoResult<CustomizationItem> {
        let s = self.read()?;
        s.items.iter().find(|i| i.id == id).cloned().ok_or(RepoError::NotFound)
    }

    async fn create_item(&self, new: NewCustomizationItem) -> RepoResult<CustomizationItem> {
        self.mutate(|s| {
            if s.items.iter().any(|i| i.name == new.name) {
                return Err(RepoError::Conflict);
            }
            let item = CustomizationItem {
                id: Uuid::new_v4(),
                name: new.name,
                description: new.description,
                kind: new.kind,
                rarity: new.rarity,
                price: new.price,
            };
            s.items.push(item.clone());
            Ok(item)
        })
    }

    async fn list_owned(&self, user_id: Id) -> RepoResult<Vec<UserCustomization>> {
        Ok(self.read()?.customizations.iter().filter(|c| c.user_id == user_id).cloned().collect())
    }

    async fn insert_purchase(&self, user_id: Id, item_id: Id) -> RepoResult<UserCustomization> {
        self.mutate(|s| {
            if !s.items.iter().any(|i| i.id == item_id) {
                return Err(RepoError::NotFound);
            }
            if s.customizations.iter().any(|c| c.user_id == user_id && c.item_id == item_id) {
                return Err(RepoError::Conflict);
            }
            let c = UserCustomization { id: Uuid::new_v4(), user_id, item_id, purchased_at: Utc::now() };
            s.customizations.push(c.clone());
            Ok(c)
        })
    }
}

#[async_trait]
impl AliasRepo for InMemRepo {
    async fn find_alias(&self, alias: &str) -> RepoResult<Option<UserAlias>> {
        let wanted = alias.trim().to_lowercase();
        Ok(self.read()?.aliases.iter().find(|a| a.alias == wanted).cloned())
    }

    async fn get_alias(&self, id: Id) -> RepoResult<UserAlias> {
        let s = self.read()?;
        s.aliases.iter().find(|a| a.id == id).cloned().ok_or(RepoError::NotFound)
    }

    async fn list_aliases(&self, user_id: Id) -> RepoResult<Vec<UserAlias>> {
        Ok(self.read()?.aliases.iter().filter(|a| a.user_id == user_id).cloned().collect())
    }

    async fn insert_alias(&self, user_id: Id, alias: &str, price_paid: i64) -> RepoResult<UserAlias> {
        let alias = alias.trim().to_lowercase();
        self.mutate(|s| {
            if s.aliases.iter().any(|a| a.alias == alias) {
                return Err(RepoError::Conflict);
            }
            let a = UserAlias { id: Uuid::new_v4(), user_id, alias, price_paid, created_at: Utc::now() };
            s.aliases.push(a.clone());
            Ok(a)
        })
    }

    async fn delete_alias(&self, id: Id) -> RepoResult<()> {
        self.mutate(|s| {
            let before = s.aliases.len();
            s.aliases.retain(|a| a.id != id);
            if s.aliases.len() == before {
                return Err(RepoError::NotFound);
            }
            Ok(())
        })
    }
}
