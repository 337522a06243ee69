use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// Identity comes from the session provider, so every row is keyed by UUID
pub type Id = Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Profile {
    pub id: Id,
    pub username: String, // always lowercase
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub points: i64, // denormalized running balance of the ledger
    pub disable_chat: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewProfile {
    pub id: Id,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateProfile {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub disable_chat: Option<bool>,
}

/// The slice of a profile that chat lists and search results carry around.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct ProfileStub {
    pub id: Id,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<&Profile> for ProfileStub {
    fn from(p: &Profile) -> Self {
        Self {
            id: p.id,
            username: p.username.clone(),
            display_name: p.display_name.clone(),
            avatar_url: p.avatar_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Problem {
    pub id: Id,
    pub author_id: Id,
    pub title: String,
    pub description: String,
    pub category: String,
    pub upvotes: i64, // denormalized, written by the client in lockstep with upvote rows
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewProblem {
    pub title: String,
    pub description: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Project {
    pub id: Id,
    pub owner_id: Id,
    pub title: String,
    pub description: String,
    pub category: String,
    pub url: Option<String>,
    pub upvotes: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewProject {
    pub title: String,
    pub description: String,
    pub category: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Upvote {
    pub id: Id,
    pub problem_id: Id,
    pub user_id: Id,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Chat {
    pub id: Id,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct ChatParticipant {
    pub chat_id: Id,
    pub user_id: Id,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Message {
    pub id: Id,
    pub chat_id: Id,
    pub sender_id: Id,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub deleted_by: Vec<Id>, // viewers who hid the message from their own view
}

impl Message {
    pub fn is_hidden_for(&self, viewer: Id) -> bool {
        self.deleted_by.contains(&viewer)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewMessage {
    pub chat_id: Id,
    pub sender_id: Id,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Reaction {
    pub id: Id,
    pub message_id: Id,
    pub user_id: Id,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Block {
    pub id: Id,
    pub blocker_id: Id,
    pub blocked_user_id: Id,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "point_kind", rename_all = "lowercase")]
pub enum PointKind {
    Earned,
    Spent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct PointTransaction {
    pub id: Id,
    pub user_id: Id,
    pub points: i64, // signed: spending is negative
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: PointKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPointTransaction {
    pub user_id: Id,
    pub points: i64,
    #[serde(rename = "type")]
    pub kind: PointKind,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "item_kind", rename_all = "snake_case")]
pub enum ItemKind {
    AvatarFrame,
    NameColor,
    ProfileBanner,
    Title,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "rarity", rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct CustomizationItem {
    pub id: Id,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: ItemKind,
    pub rarity: Rarity,
    pub price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewCustomizationItem {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub rarity: Rarity,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct UserCustomization {
    pub id: Id,
    pub user_id: Id,
    pub item_id: Id,
    pub purchased_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct UserAlias {
    pub id: Id,
    pub user_id: Id,
    pub alias: String,
    pub price_paid: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct UserBadge {
    pub id: Id,
    pub user_id: Id,
    pub badge: String,
    pub awarded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Sort {
    #[default]
    Recent,
    Popular,
}

/// Filters shared by the problem and project feeds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FeedQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub sort: Sort,
}

impl FeedQuery {
    /// Trimmed, non-empty search term.
    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn category_filter(&self) -> Option<&str> {
        self.category.as_deref().filter(|c| !c.is_empty() && *c != "all")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[aliases(ProblemPage = Page<Problem>, ProjectPage = Page<Project>)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: Option<u64>,
}
