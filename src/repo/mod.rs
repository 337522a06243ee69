//! Data Store boundary.
//!
//! The hosted relational store is reached only through the traits below. Every
//! service receives an `Arc<dyn Repo>` at construction; nothing holds a global
//! client. Row-level access policy is enforced by the store itself and surfaces
//! here as [`RepoError::Denied`].

use async_trait::async_trait;

use crate::models::*;

#[cfg(feature = "inmem-store")]
pub mod inmem;
#[cfg(feature = "postgres-store")]
pub mod pg;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("permission denied")] Denied,
    #[error("store error: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait ProfileRepo: Send + Sync {
    async fn get_profile(&self, id: Id) -> RepoResult<Profile>;
    async fn find_profile_by_username(&self, username: &str) -> RepoResult<Option<Profile>>;
    async fn create_profile(&self, new: NewProfile) -> RepoResult<Profile>;
    async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<Profile>;
    async fn set_points(&self, id: Id, points: i64) -> RepoResult<Profile>;
    /// Case-insensitive partial match on username or display name.
    async fn search_profiles(&self, query: &str, exclude: Id, limit: usize) -> RepoResult<Vec<Profile>>;
    async fn list_profile_ids(&self) -> RepoResult<Vec<Id>>;
    async fn list_badges(&self, user_id: Id) -> RepoResult<Vec<UserBadge>>;
    async fn award_badge(&self, user_id: Id, badge: &str) -> RepoResult<UserBadge>;
}

#[async_trait]
pub trait ContentRepo: Send + Sync {
    async fn create_problem(&self, author_id: Id, new: NewProblem) -> RepoResult<Problem>;
    async fn get_problem(&self, id: Id) -> RepoResult<Problem>;
    async fn list_problems(&self, query: &FeedQuery, offset: usize, limit: usize) -> RepoResult<Page<Problem>>;
    async fn set_problem_upvotes(&self, id: Id, upvotes: i64) -> RepoResult<()>;
    async fn delete_problem(&self, id: Id) -> RepoResult<()>;
    async fn create_project(&self, owner_id: Id, new: NewProject) -> RepoResult<Project>;
    async fn list_projects(&self, query: &FeedQuery, offset: usize, limit: usize) -> RepoResult<Page<Project>>;
}

#[async_trait]
pub trait UpvoteRepo: Send + Sync {
    async fn find_upvote(&self, problem_id: Id, user_id: Id) -> RepoResult<Option<Upvote>>;
    async fn insert_upvote(&self, problem_id: Id, user_id: Id) -> RepoResult<Upvote>;
    async fn delete_upvote(&self, problem_id: Id, user_id: Id) -> RepoResult<bool>;
}

#[async_trait]
pub trait ChatRepo: Send + Sync {
    async fn list_chats_for(&self, user_id: Id) -> RepoResult<Vec<Chat>>;
    async fn list_participants(&self, chat_id: Id) -> RepoResult<Vec<ChatParticipant>>;
    async fn create_chat(&self) -> RepoResult<Chat>;
    async fn add_participants(&self, chat_id: Id, user_ids: &[Id]) -> RepoResult<()>;
    /// Removes the chat together with its participants, messages and their reactions.
    async fn delete_chat(&self, chat_id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait MessageRepo: Send + Sync {
    async fn list_messages(&self, chat_id: Id) -> RepoResult<Vec<Message>>;
    async fn get_message(&self, id: Id) -> RepoResult<Message>;
    async fn insert_message(&self, new: NewMessage) -> RepoResult<Message>;
    async fn delete_message(&self, id: Id) -> RepoResult<()>;
    async fn hide_message(&self, id: Id, viewer: Id) -> RepoResult<Message>;
    /// Marks every unread message in the chat not sent by `reader`; returns rows touched.
    async fn mark_read(&self, chat_id: Id, reader: Id) -> RepoResult<u64>;
    async fn count_unread(&self, chat_id: Id, reader: Id) -> RepoResult<u64>;
    async fn latest_message(&self, chat_id: Id, viewer: Id) -> RepoResult<Option<Message>>;
}

#[async_trait]
pub trait ReactionRepo: Send + Sync {
    async fn list_reactions(&self, message_ids: &[Id]) -> RepoResult<Vec<Reaction>>;
    /// Unique per (message, user, emoji): repeating an add returns the existing row.
    async fn add_reaction(&self, message_id: Id, user_id: Id, emoji: &str) -> RepoResult<Reaction>;
    async fn remove_reaction(&self, message_id: Id, user_id: Id, emoji: &str) -> RepoResult<u64>;
    async fn delete_reactions_for(&self, message_id: Id) -> RepoResult<u64>;
}

#[async_trait]
pub trait BlockRepo: Send + Sync {
    async fn list_blocks_by(&self, blocker_id: Id) -> RepoResult<Vec<Block>>;
    async fn insert_block(&self, blocker_id: Id, blocked_user_id: Id) -> RepoResult<Block>;
    async fn delete_block(&self, blocker_id: Id, blocked_user_id: Id) -> RepoResult<bool>;
}

#[async_trait]
pub trait LedgerRepo: Send + Sync {
    async fn append_transaction(&self, new: NewPointTransaction) -> RepoResult<PointTransaction>;
    async fn list_transactions(&self, user_id: Id) -> RepoResult<Vec<PointTransaction>>;
}

#[async_trait]
pub trait ShopRepo: Send + Sync {
    async fn list_items(&self) -> RepoResult<Vec<CustomizationItem>>;
    async fn get_item(&self, id: Id) -> RepoResult<CustomizationItem>;
    async fn create_item(&self, new: NewCustomizationItem) -> RepoResult<CustomizationItem>;
    async fn list_owned(&self, user_id: Id) -> RepoResult<Vec<UserCustomization>>;
    async fn insert_purchase(&self, user_id: Id, item_id: Id) -> RepoResult<UserCustomization>;
}

#[async_trait]
pub trait AliasRepo: Send + Sync {
    async fn find_alias(&self, alias: &str) -> RepoResult<Option<UserAlias>>;
    async fn get_alias(&self, id: Id) -> RepoResult<UserAlias>;
    async fn list_aliases(&self, user_id: Id) -> RepoResult<Vec<UserAlias>>;
    async fn insert_alias(&self, user_id: Id, alias: &str, price_paid: i64) -> RepoResult<UserAlias>;
    async fn delete_alias(&self, id: Id) -> RepoResult<()>;
}

pub trait Repo:
    ProfileRepo + ContentRepo + UpvoteRepo + ChatRepo + MessageRepo + ReactionRepo + BlockRepo + LedgerRepo + ShopRepo + AliasRepo
{
}

impl<T> Repo for T where
    T: ProfileRepo + ContentRepo + UpvoteRepo + ChatRepo + MessageRepo + ReactionRepo + BlockRepo + LedgerRepo + ShopRepo + AliasRepo
{
}
