#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use startorigin::interact::{Confirm, Interaction, Notice};
use startorigin::live::LiveChannel;
use startorigin::messaging::{ChatSession, DeletePolicy, SessionConfig};
use startorigin::models::*;
use startorigin::repo::inmem::InMemRepo;
use startorigin::repo::{
    AliasRepo, BlockRepo, ChatRepo, ContentRepo, LedgerRepo, MessageRepo, ProfileRepo, ReactionRepo, Repo,
    RepoError, RepoResult, ShopRepo, UpvoteRepo,
};

/// Interaction double that records prompts and notices and answers every
/// confirmation with a switchable value.
#[derive(Default)]
pub struct Recorder {
    decline: AtomicBool,
    pub asked: Mutex<Vec<Confirm>>,
    pub notices: Mutex<Vec<Notice>>,
}

impl Recorder {
    pub fn set_decline(&self, decline: bool) {
        self.decline.store(decline, Ordering::SeqCst);
    }

    pub fn failures(&self) -> usize {
        self.notices.lock().unwrap().iter().filter(|n| matches!(n, Notice::Failure(_))).count()
    }
}

impl Interaction for Recorder {
    fn confirm(&self, question: &Confirm) -> bool {
        self.asked.lock().unwrap().push(question.clone());
        !self.decline.load(Ordering::SeqCst)
    }

    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

pub async fn user(repo: &InMemRepo, username: &str) -> ProfileStub {
    let p = repo
        .create_profile(NewProfile {
            id: uuid::Uuid::new_v4(),
            username: username.into(),
            display_name: Some(format!("{username} display")),
            avatar_url: None,
        })
        .await
        .unwrap();
    ProfileStub::from(&p)
}

pub fn config(policy: DeletePolicy) -> SessionConfig {
    SessionConfig { refresh_delay: Duration::ZERO, delete_policy: policy }
}

pub async fn session(repo: &InMemRepo, me: &ProfileStub, ui: Arc<Recorder>, policy: DeletePolicy) -> ChatSession {
    let store: Arc<dyn Repo> = Arc::new(repo.clone());
    let live: Arc<dyn LiveChannel> = Arc::new(repo.feed());
    ChatSession::open(store, live, ui, me.id, config(policy)).await.unwrap()
}

/// Store double over [`InMemRepo`] whose methods can be switched to fail by name.
pub struct FlakyRepo {
    pub inner: InMemRepo,
    failing: Mutex<HashSet<&'static str>>,
    calls: Mutex<Vec<&'static str>>,
    created_chats: Mutex<Vec<Id>>,
}

impl FlakyRepo {
    pub fn new(inner: InMemRepo) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(vec![]),
            created_chats: Mutex::new(vec![]),
        }
    }

    pub fn fail_on(&self, method: &'static str) {
        self.failing.lock().unwrap().insert(method);
    }

    pub fn heal(&self, method: &'static str) {
        self.failing.lock().unwrap().remove(method);
    }

    pub fn called(&self, method: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|m| *m == method)
    }

    pub fn created_chats(&self) -> Vec<Id> {
        self.created_chats.lock().unwrap().clone()
    }

    fn check(&self, method: &'static str) -> RepoResult<()> {
        self.calls.lock().unwrap().push(method);
        if self.failing.lock().unwrap().contains(method) {
            return Err(RepoError::Internal(format!("{method} unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileRepo for FlakyRepo {
    async fn get_profile(&self, id: Id) -> RepoResult<Profile> {
        self.check("get_profile")?;
        self.inner.get_profile(id).await
    }
    async fn find_profile_by_username(&self, username: &str) -> RepoResult<Option<Profile>> {
        self.check("find_profile_by_username")?;
        self.inner.find_profile_by_username(username).await
    }
    async fn create_profile(&self, new: NewProfile) -> RepoResult<Profile> {
        self.check("create_profile")?;
        self.inner.create_profile(new).await
    }
    async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<Profile> {
        self.check("update_profile")?;
        self.inner.update_profile(id, upd).await
    }
    async fn set_points(&self, id: Id, points: i64) -> RepoResult<Profile> {
        self.check("set_points")?;
        self.inner.set_points(id, points).await
    }
    async fn search_profiles(&self, query: &str, exclude: Id, limit: usize) -> RepoResult<Vec<Profile>> {
        self.check("search_profiles")?;
        self.inner.search_profiles(query, exclude, limit).await
    }
    async fn list_profile_ids(&self) -> RepoResult<Vec<Id>> {
        self.check("list_profile_ids")?;
        self.inner.list_profile_ids().await
    }
    async fn list_badges(&self, user_id: Id) -> RepoResult<Vec<UserBadge>> {
        self.check("list_badges")?;
        self.inner.list_badges(user_id).await
    }
    async fn award_badge(&self, user_id: Id, badge: &str) -> RepoResult<UserBadge> {
        self.check("award_badge")?;
        self.inner.award_badge(user_id, badge).await
    }
}

#[async_trait]
impl ContentRepo for FlakyRepo {
    async fn create_problem(&self, author_id: Id, new: NewProblem) -> RepoResult<Problem> {
        self.check("create_problem")?;
        self.inner.create_problem(author_id, new).await
    }
    async fn get_problem(&self, id: Id) -> RepoResult<Problem> {
        self.check("get_problem")?;
        self.inner.get_problem(id).await
    }
    async fn list_problems(&self, query: &FeedQuery, offset: usize, limit: usize) -> RepoResult<Page<Problem>> {
        self.check("list_problems")?;
        self.inner.list_problems(query, offset, limit).await
    }
    async fn set_problem_upvotes(&self, id: Id, upvotes: i64) -> RepoResult<()> {
        self.check("set_problem_upvotes")?;
        self.inner.set_problem_upvotes(id, upvotes).await
    }
    async fn delete_problem(&self, id: Id) -> RepoResult<()> {
        self.check("delete_problem")?;
        self.inner.delete_problem(id).await
    }
    async fn create_project(&self, owner_id: Id, new: NewProject) -> RepoResult<Project> {
        self.check("create_project")?;
        self.inner.create_project(owner_id, new).await
    }
    async fn list_projects(&self, query: &FeedQuery, offset: usize, limit: usize) -> RepoResult<Page<Project>> {
        self.check("list_projects")?;
        self.inner.list_projects(query, offset, limit).await
    }
}

#[async_trait]
impl UpvoteRepo for FlakyRepo {
    async fn find_upvote(&self, problem_id: Id, user_id: Id) -> RepoResult<Option<Upvote>> {
        self.check("find_upvote")?;
        self.inner.find_upvote(problem_id, user_id).await
    }
    async fn insert_upvote(&self, problem_id: Id, user_id: Id) -> RepoResult<Upvote> {
        self.check("insert_upvote")?;
        self.inner.insert_upvote(problem_id, user_id).await
    }
    async fn delete_upvote(&self, problem_id: Id, user_id: Id) -> RepoResult<bool> {
        self.check("delete_upvote")?;
        self.inner.delete_upvote(problem_id, user_id).await
    }
}

#[async_trait]
impl ChatRepo for FlakyRepo {
    async fn list_chats_for(&self, user_id: Id) -> RepoResult<Vec<Chat>> {
        self.check("list_chats_for")?;
        self.inner.list_chats_for(user_id).await
    }
    async fn list_participants(&self, chat_id: Id) -> RepoResult<Vec<ChatParticipant>> {
        self.check("list_participants")?;
        self.inner.list_participants(chat_id).await
    }
    async fn create_chat(&self) -> RepoResult<Chat> {
        self.check("create_chat")?;
        let chat = self.inner.create_chat().await?;
        self.created_chats.lock().unwrap().push(chat.id);
        Ok(chat)
    }
    async fn add_participants(&self, chat_id: Id, user_ids: &[Id]) -> RepoResult<()> {
        self.check("add_participants")?;
        self.inner.add_participants(chat_id, user_ids).await
    }
    async fn delete_chat(&self, chat_id: Id) -> RepoResult<()> {
        self.check("delete_chat")?;
        self.inner.delete_chat(chat_id).await
    }
}

#[async_trait]
impl MessageRepo for FlakyRepo {
    async fn list_messages(&self, chat_id: Id) -> RepoResult<Vec<Message>> {
        self.check("list_messages")?;
        self.inner.list_messages(chat_id).await
    }
    async fn get_message(&self, id: Id) -> RepoResult<Message> {
        self.check("get_message")?;
        self.inner.get_message(id).await
    }
    async fn insert_message(&self, new: NewMessage) -> RepoResult<Message> {
        self.check("insert_message")?;
        self.inner.insert_message(new).await
    }
    async fn delete_message(&self, id: Id) -> RepoResult<()> {
        self.check("delete_message")?;
        self.inner.delete_message(id).await
    }
    async fn hide_message(&self, id: Id, viewer: Id) -> RepoResult<Message> {
        self.check("hide_message")?;
        self.inner.hide_message(id, viewer).await
    }
    async fn mark_read(&self, chat_id: Id, reader: Id) -> RepoResult<u64> {
        self.check("mark_read")?;
        self.inner.mark_read(chat_id, reader).await
    }
    async fn count_unread(&self, chat_id: Id, reader: Id) -> RepoResult<u64> {
        self.check("count_unread")?;
        self.inner.count_unread(chat_id, reader).await
    }
    async fn latest_message(&self, chat_id: Id, viewer: Id) -> RepoResult<Option<Message>> {
        self.check("latest_message")?;
        self.inner.latest_message(chat_id, viewer).await
    }
}

#[async_trait]
impl ReactionRepo for FlakyRepo {
    async fn list_reactions(&self, message_ids: &[Id]) -> RepoResult<Vec<Reaction>> {
        self.check("list_reactions")?;
        self.inner.list_reactions(message_ids).await
    }
    async fn add_reaction(&self, message_id: Id, user_id: Id, emoji: &str) -> RepoResult<Reaction> {
        self.check("add_reaction")?;
        self.inner.add_reaction(message_id, user_id, emoji).await
    }
    async fn remove_reaction(&self, message_id: Id, user_id: Id, emoji: &str) -> RepoResult<u64> {
        self.check("remove_reaction")?;
        self.inner.remove_reaction(message_id, user_id, emoji).await
    }
    async fn delete_reactions_for(&self, message_id: Id) -> RepoResult<u64> {
        self.check("delete_reactions_for")?;
        self.inner.delete_reactions_for(message_id).await
    }
}

#[async_trait]
impl BlockRepo for FlakyRepo {
    async fn list_blocks_by(&self, blocker_id: Id) -> RepoResult<Vec<Block>> {
        self.check("list_blocks_by")?;
        self.inner.list_blocks_by(blocker_id).await
    }
    async fn insert_block(&self, blocker_id: Id, blocked_user_id: Id) -> RepoResult<Block> {
        self.check("insert_block")?;
        self.inner.insert_block(blocker_id, blocked_user_id).await
    }
    async fn delete_block(&self, blocker_id: Id, blocked_user_id: Id) -> RepoResult<bool> {
        self.check("delete_block")?;
        self.inner.delete_block(blocker_id, blocked_user_id).await
    }
}

#[async_trait]
impl LedgerRepo for FlakyRepo {
    async fn append_transaction(&self, new: NewPointTransaction) -> RepoResult<PointTransaction> {
        self.check("append_transaction")?;
        self.inner.append_transaction(new).await
    }
    async fn list_transactions(&self, user_id: Id) -> RepoResult<Vec<PointTransaction>> {
        self.check("list_transactions")?;
        self.inner.list_transactions(user_id).await
    }
}

#[async_trait]
impl ShopRepo for FlakyRepo {
    async fn list_items(&self) -> RepoResult<Vec<CustomizationItem>> {
        self.check("list_items")?;
        self.inner.list_items().await
    }
    async fn get_item(&self, id: Id) -> RepoResult<CustomizationItem> {
        self.check("get_item")?;
        self.inner.get_item(id).await
    }
    async fn create_item(&self, new: NewCustomizationItem) -> RepoResult<CustomizationItem> {
        self.check("create_item")?;
        self.inner.create_item(new).await
    }
    async fn list_owned(&self, user_id: Id) -> RepoResult<Vec<UserCustomization>> {
        self.check("list_owned")?;
        self.inner.list_owned(user_id).await
    }
    async fn insert_purchase(&self, user_id: Id, item_id: Id) -> RepoResult<UserCustomization> {
        self.check("insert_purchase")?;
        self.inner.insert_purchase(user_id, item_id).await
    }
}

#[async_trait]
impl AliasRepo for FlakyRepo {
    async fn find_alias(&self, alias: &str) -> RepoResult<Option<UserAlias>> {
        self.check("find_alias")?;
        self.inner.find_alias(alias).await
    }
    async fn get_alias(&self, id: Id) -> RepoResult<UserAlias> {
        self.check("get_alias")?;
        self.inner.get_alias(id).await
    }
    async fn list_aliases(&self, user_id: Id) -> RepoResult<Vec<UserAlias>> {
        self.check("list_aliases")?;
        self.inner.list_aliases(user_id).await
    }
    async fn insert_alias(&self, user_id: Id, alias: &str, price_paid: i64) -> RepoResult<UserAlias> {
        self.check("insert_alias")?;
        self.inner.insert_alias(user_id, alias, price_paid).await
    }
    async fn delete_alias(&self, id: Id) -> RepoResult<()> {
        self.check("delete_alias")?;
        self.inner.delete_alias(id).await
    }
}

pub async fn flaky_session(
    store: &Arc<FlakyRepo>,
    me: &ProfileStub,
    ui: Arc<Recorder>,
    policy: DeletePolicy,
) -> ChatSession {
    let repo: Arc<dyn Repo> = store.clone();
    let live: Arc<dyn LiveChannel> = Arc::new(store.inner.feed());
    ChatSession::open(repo, live, ui, me.id, config(policy)).await.unwrap()
}
