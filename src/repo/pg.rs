use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Pool, Postgres, QueryBuilder};

use super::*;
use crate::live::{ChangeFeed, MessageChange};

/// Postgres backend. Schema lives in `migrations/`; message row changes are
/// published into the feed after each successful write.
#[derive(Clone)]
pub struct PgRepo {
    pool: Pool<Postgres>,
    feed: ChangeFeed,
}

impl PgRepo {
    pub fn new(pool: Pool<Postgres>, feed: ChangeFeed) -> Self {
        Self { pool, feed }
    }

    pub fn feed(&self) -> ChangeFeed {
        self.feed.clone()
    }

    async fn page<T>(&self, table: &str, query: &FeedQuery, offset: usize, limit: usize) -> RepoResult<Page<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let mut count = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM {table}"));
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await.map_err(map_err)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT * FROM {table}"));
        push_filters(&mut qb, query);
        qb.push(match query.sort {
            Sort::Recent => " ORDER BY created_at DESC",
            Sort::Popular => " ORDER BY upvotes DESC, created_at DESC",
        });
        qb.push(" LIMIT ").push_bind(limit as i64);
        qb.push(" OFFSET ").push_bind(offset as i64);
        let items = qb.build_query_as::<T>().fetch_all(&self.pool).await.map_err(map_err)?;
        Ok(Page { items, total: Some(total.max(0) as u64) })
    }
}

fn map_err(e: sqlx::Error) -> RepoError {
    match &e {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => RepoError::Conflict,
            // foreign key: the referenced row is missing
            Some("23503") => RepoError::NotFound,
            Some("42501") => RepoError::Denied,
            _ => RepoError::Internal(e.to_string()),
        },
        _ => RepoError::Internal(e.to_string()),
    }
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &FeedQuery) {
    qb.push(" WHERE TRUE");
    if let Some(term) = query.search_term() {
        let pattern = format!("%{}%", escape_like(term));
        qb.push(" AND (title ILIKE ").push_bind(pattern.clone());
        qb.push(" OR description ILIKE ").push_bind(pattern).push(")");
    }
    if let Some(category) = query.category_filter() {
        qb.push(" AND category = ").push_bind(category.to_string());
    }
}

#[async_trait]
impl ProfileRepo for PgRepo {
    async fn get_profile(&self, id: Id) -> RepoResult<Profile> {
        sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn find_profile_by_username(&self, username: &str) -> RepoResult<Option<Profile>> {
        sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE username = lower($1)")
            .bind(username.trim())
            .fetch_optional(&self.pool).await.map_err(map_err)
    }

    async fn create_profile(&self, new: NewProfile) -> RepoResult<Profile> {
        sqlx::query_as::<_, Profile>(
            "INSERT INTO profiles (id, username, display_name, avatar_url) VALUES ($1, lower($2), $3, $4) RETURNING *",
        )
        .bind(new.id)
        .bind(new.username.trim())
        .bind(&new.display_name)
        .bind(&new.avatar_url)
        .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<Profile> {
        sqlx::query_as::<_, Profile>(
            r#"UPDATE profiles SET
                   display_name = COALESCE($2, display_name),
                   avatar_url = COALESCE($3, avatar_url),
                   bio = COALESCE($4, bio),
                   disable_chat = COALESCE($5, disable_chat)
               WHERE id = $1 RETURNING *"#,
        )
        .bind(id)
        .bind(upd.display_name)
        .bind(upd.avatar_url)
        .bind(upd.bio)
        .bind(upd.disable_chat)
        .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn set_points(&self, id: Id, points: i64) -> RepoResult<Profile> {
        sqlx::query_as::<_, Profile>("UPDATE profiles SET points = $2 WHERE id = $1 RETURNING *")
            .bind(id)
            .bind(points)
            .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn search_profiles(&self, query: &str, exclude: Id, limit: usize) -> RepoResult<Vec<Profile>> {
        let pattern = format!("%{}%", escape_like(query.trim()));
        sqlx::query_as::<_, Profile>(
            r#"SELECT * FROM profiles
               WHERE id <> $1 AND (username ILIKE $2 OR display_name ILIKE $2)
               ORDER BY username LIMIT $3"#,
        )
        .bind(exclude)
        .bind(pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool).await.map_err(map_err)
    }

    async fn list_profile_ids(&self) -> RepoResult<Vec<Id>> {
        sqlx::query_scalar::<_, Id>("SELECT id FROM profiles ORDER BY created_at")
            .fetch_all(&self.pool).await.map_err(map_err)
    }

    async fn list_badges(&self, user_id: Id) -> RepoResult<Vec<UserBadge>> {
        sqlx::query_as::<_, UserBadge>("SELECT * FROM user_badges WHERE user_id = $1 ORDER BY awarded_at")
            .bind(user_id)
            .fetch_all(&self.pool).await.map_err(map_err)
    }

    async fn award_badge(&self, user_id: Id, badge: &str) -> RepoResult<UserBadge> {
        sqlx::query_as::<_, UserBadge>("INSERT INTO user_badges (user_id, badge) VALUES ($1, $2) RETURNING *")
            .bind(user_id)
            .bind(badge)
            .fetch_one(&self.pool).await.map_err(map_err)
    }
}

#[async_trait]
impl ContentRepo for PgRepo {
    async fn create_problem(&self, author_id: Id, new: NewProblem) -> RepoResult<Problem> {
        sqlx::query_as::<_, Problem>(
            "INSERT INTO problems (author_id, title, description, category) VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(author_id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.category)
        .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn get_problem(&self, id: Id) -> RepoResult<Problem> {
        sqlx::query_as::<_, Problem>("SELECT * FROM problems WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn list_problems(&self, query: &FeedQuery, offset: usize, limit: usize) -> RepoResult<Page<Problem>> {
        self.page("problems", query, offset, limit).await
    }

    async fn set_problem_upvotes(&self, id: Id, upvotes: i64) -> RepoResult<()> {
        let res = sqlx::query("UPDATE problems SET upvotes = $2 WHERE id = $1")
            .bind(id)
            .bind(upvotes)
            .execute(&self.pool).await.map_err(map_err)?;
        if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
        Ok(())
    }

    async fn delete_problem(&self, id: Id) -> RepoResult<()> {
        // upvotes cascade
        let res = sqlx::query("DELETE FROM problems WHERE id = $1")
            .bind(id)
            .execute(&self.pool).await.map_err(map_err)?;
        if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
        Ok(())
    }

    async fn create_project(&self, owner_id: Id, new: NewProject) -> RepoResult<Project> {
        sqlx::query_as::<_, Project>(
            "INSERT INTO projects (owner_id, title, description, category, url) VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(owner_id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.category)
        .bind(&new.url)
        .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn list_projects(&self, query: &FeedQuery, offset: usize, limit: usize) -> RepoResult<Page<Project>> {
        self.page("projects", query, offset, limit).await
    }
}

#[async_trait]
impl UpvoteRepo for PgRepo {
    async fn find_upvote(&self, problem_id: Id, user_id: Id) -> RepoResult<Option<Upvote>> {
        sqlx::query_as::<_, Upvote>("SELECT * FROM upvotes WHERE problem_id = $1 AND user_id = $2")
            .bind(problem_id)
            .bind(user_id)
            .fetch_optional(&self.pool).await.map_err(map_err)
    }

    async fn insert_upvote(&self, problem_id: Id, user_id: Id) -> RepoResult<Upvote> {
        sqlx::query_as::<_, Upvote>("INSERT INTO upvotes (problem_id, user_id) VALUES ($1, $2) RETURNING *")
            .bind(problem_id)
            .bind(user_id)
            .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn delete_upvote(&self, problem_id: Id, user_id: Id) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM upvotes WHERE problem_id = $1 AND user_id = $2")
            .bind(problem_id)
            .bind(user_id)
            .execute(&self.pool).await.map_err(map_err)?;
        Ok(res.rows_affected() > 0)
    }
}

#[async_trait]
impl ChatRepo for PgRepo {
    async fn list_chats_for(&self, user_id: Id) -> RepoResult<Vec<Chat>> {
        sqlx::query_as::<_, Chat>(
            r#"SELECT c.* FROM chats c
               JOIN chat_participants p ON p.chat_id = c.id
               WHERE p.user_id = $1
               ORDER BY c.created_at"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool).await.map_err(map_err)
    }

    async fn list_participants(&self, chat_id: Id) -> RepoResult<Vec<ChatParticipant>> {
        sqlx::query_as::<_, ChatParticipant>("SELECT chat_id, user_id FROM chat_participants WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_all(&self.pool).await.map_err(map_err)
    }

    async fn create_chat(&self) -> RepoResult<Chat> {
        sqlx::query_as::<_, Chat>("INSERT INTO chats DEFAULT VALUES RETURNING *")
            .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn add_participants(&self, chat_id: Id, user_ids: &[Id]) -> RepoResult<()> {
        if user_ids.is_empty() {
            return Ok(());
        }
        let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO chat_participants (chat_id, user_id) ");
        qb.push_values(user_ids, |mut row, user_id| {
            row.push_bind(chat_id).push_bind(*user_id);
        });
        qb.build().execute(&self.pool).await.map_err(map_err)?;
        Ok(())
    }

    async fn delete_chat(&self, chat_id: Id) -> RepoResult<()> {
        // participants, messages and reactions cascade
        let res = sqlx::query("DELETE FROM chats WHERE id = $1")
            .bind(chat_id)
            .execute(&self.pool).await.map_err(map_err)?;
        if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
        Ok(())
    }
}

#[async_trait]
impl MessageRepo for PgRepo {
    async fn list_messages(&self, chat_id: Id) -> RepoResult<Vec<Message>> {
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE chat_id = $1 ORDER BY created_at")
            .bind(chat_id)
            .fetch_all(&self.pool).await.map_err(map_err)
    }

    async fn get_message(&self, id: Id) -> RepoResult<Message> {
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn insert_message(&self, new: NewMessage) -> RepoResult<Message> {
        let message = sqlx::query_as::<_, Message>(
            r#"INSERT INTO messages (chat_id, sender_id, content)
               SELECT $1, $2, $3
               WHERE EXISTS (SELECT 1 FROM chat_participants WHERE chat_id = $1 AND user_id = $2)
               RETURNING *"#,
        )
        .bind(new.chat_id)
        .bind(new.sender_id)
        .bind(&new.content)
        .fetch_optional(&self.pool).await.map_err(map_err)?
        .ok_or(RepoError::Denied)?;
        self.feed.publish(MessageChange::Inserted(message.clone()));
        Ok(message)
    }

    async fn delete_message(&self, id: Id) -> RepoResult<()> {
        let message = sqlx::query_as::<_, Message>("DELETE FROM messages WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool).await.map_err(map_err)?
            .ok_or(RepoError::NotFound)?;
        self.feed.publish(MessageChange::Deleted(message));
        Ok(())
    }

    async fn hide_message(&self, id: Id, viewer: Id) -> RepoResult<Message> {
        sqlx::query_as::<_, Message>(
            r#"UPDATE messages
               SET deleted_by = CASE WHEN $2 = ANY(deleted_by) THEN deleted_by ELSE array_append(deleted_by, $2) END
               WHERE id = $1 RETURNING *"#,
        )
        .bind(id)
        .bind(viewer)
        .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn mark_read(&self, chat_id: Id, reader: Id) -> RepoResult<u64> {
        let res = sqlx::query(
            "UPDATE messages SET is_read = TRUE WHERE chat_id = $1 AND sender_id <> $2 AND is_read = FALSE",
        )
        .bind(chat_id)
        .bind(reader)
        .execute(&self.pool).await.map_err(map_err)?;
        Ok(res.rows_affected())
    }

    async fn count_unread(&self, chat_id: Id, reader: Id) -> RepoResult<u64> {
        let n: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM messages
               WHERE chat_id = $1 AND sender_id <> $2 AND is_read = FALSE AND NOT ($2 = ANY(deleted_by))"#,
        )
        .bind(chat_id)
        .bind(reader)
        .fetch_one(&self.pool).await.map_err(map_err)?;
        Ok(n.max(0) as u64)
    }

    async fn latest_message(&self, chat_id: Id, viewer: Id) -> RepoResult<Option<Message>> {
        sqlx::query_as::<_, Message>(
            r#"SELECT * FROM messages
               WHERE chat_id = $1 AND NOT ($2 = ANY(deleted_by))
               ORDER BY created_at DESC LIMIT 1"#,
        )
        .bind(chat_id)
        .bind(viewer)
        .fetch_optional(&self.pool).await.map_err(map_err)
    }
}

#[async_trait]
impl ReactionRepo for PgRepo {
    async fn list_reactions(&self, message_ids: &[Id]) -> RepoResult<Vec<Reaction>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }
        sqlx::query_as::<_, Reaction>("SELECT * FROM message_reactions WHERE message_id = ANY($1) ORDER BY created_at")
            .bind(message_ids)
            .fetch_all(&self.pool).await.map_err(map_err)
    }

    async fn add_reaction(&self, message_id: Id, user_id: Id, emoji: &str) -> RepoResult<Reaction> {
        let inserted = sqlx::query_as::<_, Reaction>(
            r#"INSERT INTO message_reactions (message_id, user_id, emoji) VALUES ($1, $2, $3)
               ON CONFLICT (message_id, user_id, emoji) DO NOTHING RETURNING *"#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .fetch_optional(&self.pool).await.map_err(map_err)?;
        match inserted {
            Some(r) => Ok(r),
            None => sqlx::query_as::<_, Reaction>(
                "SELECT * FROM message_reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
            )
            .bind(message_id)
            .bind(user_id)
            .bind(emoji)
            .fetch_one(&self.pool).await.map_err(map_err),
        }
    }

    async fn remove_reaction(&self, message_id: Id, user_id: Id, emoji: &str) -> RepoResult<u64> {
        let res = sqlx::query("DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3")
            .bind(message_id)
            .bind(user_id)
            .bind(emoji)
            .execute(&self.pool).await.map_err(map_err)?;
        Ok(res.rows_affected())
    }

    async fn delete_reactions_for(&self, message_id: Id) -> RepoResult<u64> {
        let res = sqlx::query("DELETE FROM message_reactions WHERE message_id = $1")
            .bind(message_id)
            .execute(&self.pool).await.map_err(map_err)?;
        Ok(res.rows_affected())
    }
}

#[async_trait]
impl BlockRepo for PgRepo {
    async fn list_blocks_by(&self, blocker_id: Id) -> RepoResult<Vec<Block>> {
        sqlx::query_as::<_, Block>("SELECT * FROM blocks WHERE blocker_id = $1")
            .bind(blocker_id)
            .fetch_all(&self.pool).await.map_err(map_err)
    }

    async fn insert_block(&self, blocker_id: Id, blocked_user_id: Id) -> RepoResult<Block> {
        sqlx::query_as::<_, Block>("INSERT INTO blocks (blocker_id, blocked_user_id) VALUES ($1, $2) RETURNING *")
            .bind(blocker_id)
            .bind(blocked_user_id)
            .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn delete_block(&self, blocker_id: Id, blocked_user_id: Id) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM blocks WHERE blocker_id = $1 AND blocked_user_id = $2")
            .bind(blocker_id)
            .bind(blocked_user_id)
            .execute(&self.pool).await.map_err(map_err)?;
        Ok(res.rows_affected() > 0)
    }
}

#[async_trait]
impl LedgerRepo for PgRepo {
    async fn append_transaction(&self, new: NewPointTransaction) -> RepoResult<PointTransaction> {
        sqlx::query_as::<_, PointTransaction>(
            "INSERT INTO point_transactions (user_id, points, type, description) VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(new.user_id)
        .bind(new.points)
        .bind(new.kind)
        .bind(&new.description)
        .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn list_transactions(&self, user_id: Id) -> RepoResult<Vec<PointTransaction>> {
        sqlx::query_as::<_, PointTransaction>("SELECT * FROM point_transactions WHERE user_id = $1 ORDER BY created_at")
            .bind(user_id)
            .fetch_all(&self.pool).await.map_err(map_err)
    }
}

#[async_trait]
impl ShopRepo for PgRepo {
    async fn list_items(&self) -> RepoResult<Vec<CustomizationItem>> {
        sqlx::query_as::<_, CustomizationItem>("SELECT * FROM customization_items ORDER BY price, name")
            .fetch_all(&self.pool).await.map_err(map_err)
    }

    async fn get_item(&self, id: Id) -> RepoResult<CustomizationItem> {
        sqlx::query_as::<_, CustomizationItem>("SELECT * FROM customization_items WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn create_item(&self, new: NewCustomizationItem) -> RepoResult<CustomizationItem> {
        sqlx::query_as::<_, CustomizationItem>(
            r#"INSERT INTO customization_items (name, description, type, rarity, price)
               VALUES ($1, $2, $3, $4, $5) RETURNING *"#,
        )
        .bind(&new.name)
        .bind(&new.description)
        .bind(new.kind)
        .bind(new.rarity)
        .bind(new.price)
        .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn list_owned(&self, user_id: Id) -> RepoResult<Vec<UserCustomization>> {
        sqlx::query_as::<_, UserCustomization>("SELECT * FROM user_customizations WHERE user_id = $1 ORDER BY purchased_at")
            .bind(user_id)
            .fetch_all(&self.pool).await.map_err(map_err)
    }

    async fn insert_purchase(&self, user_id: Id, item_id: Id) -> RepoResult<UserCustomization> {
        sqlx::query_as::<_, UserCustomization>(
            "INSERT INTO user_customizations (user_id, item_id) VALUES ($1, $2) RETURNING *",
        )
        .bind(user_id)
        .bind(item_id)
        .fetch_one(&self.pool).await.map_err(map_err)
    }
}

#[async_trait]
impl AliasRepo for PgRepo {
    async fn find_alias(&self, alias: &str) -> RepoResult<Option<UserAlias>> {
        sqlx::query_as::<_, UserAlias>("SELECT * FROM user_aliases WHERE alias = lower($1)")
            .bind(alias.trim())
            .fetch_optional(&self.pool).await.map_err(map_err)
    }

    async fn get_alias(&self, id: Id) -> RepoResult<UserAlias> {
        sqlx::query_as::<_, UserAlias>("SELECT * FROM user_aliases WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn list_aliases(&self, user_id: Id) -> RepoResult<Vec<UserAlias>> {
        sqlx::query_as::<_, UserAlias>("SELECT * FROM user_aliases WHERE user_id = $1 ORDER BY created_at")
            .bind(user_id)
            .fetch_all(&self.pool).await.map_err(map_err)
    }

    async fn insert_alias(&self, user_id: Id, alias: &str, price_paid: i64) -> RepoResult<UserAlias> {
        sqlx::query_as::<_, UserAlias>(
            "INSERT INTO user_aliases (user_id, alias, price_paid) VALUES ($1, lower($2), $3) RETURNING *",
        )
        .bind(user_id)
        .bind(alias.trim())
        .bind(price_paid)
        .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn delete_alias(&self, id: Id) -> RepoResult<()> {
        let res = sqlx::query("DELETE FROM user_aliases WHERE id = $1")
            .bind(id)
            .execute(&self.pool).await.map_err(map_err)?;
        if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
        Ok(())
    }
}
