/// PostgreSQL-backed store
///
/// Schema is created idempotently on startup; all queries are runtime-checked
/// `sqlx::query` calls so the crate builds without a live database.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::models::{
    Category, MonitoredUser, Post, PostCounts, PostMetrics, PostedRecord, ScheduledPost,
    MANUAL_POST_PREFIX,
};
use crate::store::Store;

const USER_COLUMNS: &str = "username, category, last_post_at, last_fetch_at, created_at";
const POST_COLUMNS: &str =
    "id, text, author, category, created_at, like_count, retweet_count, reply_count, fetched_at, is_used";
const SCHEDULED_COLUMNS: &str =
    "id, content, context, source_post_ids, created_at, scheduled_for, is_posted, posted_at";

pub struct PgStore {
    db_pool: PgPool,
}

impl PgStore {
    /// Connect to PostgreSQL
    pub async fn connect(database_url: &str) -> Result<Self> {
        // Check if using connection pooler (pgBouncer)
        let use_pooler = database_url.contains(":6543") || database_url.contains("pgbouncer=true");

        let mut pool_options = PgPoolOptions::new().max_connections(10);

        if use_pooler {
            log::info!("Using connection pooler - resetting statement timeout per connection");
            pool_options = pool_options.after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("SET statement_timeout = 0")
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            });
        }

        let db_pool = pool_options
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self { db_pool })
    }

    /// Create tables and indexes if they don't exist
    pub async fn initialize_schema(&self) -> Result<()> {
        log::info!("Initializing database tables...");

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS monitored_users (
                username TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                last_post_at TIMESTAMPTZ,
                last_fetch_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                author TEXT NOT NULL,
                category TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                like_count BIGINT NOT NULL DEFAULT 0,
                retweet_count BIGINT NOT NULL DEFAULT 0,
                reply_count BIGINT NOT NULL DEFAULT 0,
                fetched_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                is_used BOOLEAN NOT NULL DEFAULT false
            )
            "#,
            "CREATE INDEX IF NOT EXISTS posts_unused_created_idx ON posts (is_used, created_at DESC)",
            r#"
            CREATE TABLE IF NOT EXISTS posted_records (
                id UUID PRIMARY KEY,
                post_id TEXT,
                author TEXT NOT NULL,
                rewritten_content TEXT NOT NULL,
                posted_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_posts (
                id UUID PRIMARY KEY,
                content TEXT NOT NULL,
                context TEXT,
                source_post_ids TEXT[] NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                scheduled_for TIMESTAMPTZ,
                is_posted BOOLEAN NOT NULL DEFAULT false,
                posted_at TIMESTAMPTZ
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.db_pool)
                .await
                .context("Failed to initialize database schema")?;
        }

        log::info!("Database tables initialized successfully");
        Ok(())
    }
}

fn parse_category(row: &PgRow) -> Result<Category> {
    let raw: String = row.try_get("category")?;
    raw.parse()
}

fn user_from_row(row: &PgRow) -> Result<MonitoredUser> {
    Ok(MonitoredUser {
        username: row.try_get("username")?,
        category: parse_category(row)?,
        last_post_at: row.try_get("last_post_at")?,
        last_fetch_at: row.try_get("last_fetch_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn post_from_row(row: &PgRow) -> Result<Post> {
    Ok(Post {
        id: row.try_get("id")?,
        text: row.try_get("text")?,
        author: row.try_get("author")?,
        category: parse_category(row)?,
        created_at: row.try_get("created_at")?,
        metrics: PostMetrics {
            like_count: row.try_get("like_count")?,
            retweet_count: row.try_get("retweet_count")?,
            reply_count: row.try_get("reply_count")?,
        },
        fetched_at: row.try_get("fetched_at")?,
        is_used: row.try_get("is_used")?,
    })
}

fn scheduled_from_row(row: &PgRow) -> Result<ScheduledPost> {
    Ok(ScheduledPost {
        id: row.try_get("id")?,
        content: row.try_get("content")?,
        context: row.try_get("context")?,
        source_post_ids: row.try_get("source_post_ids")?,
        created_at: row.try_get("created_at")?,
        scheduled_for: row.try_get("scheduled_for")?,
        is_posted: row.try_get("is_posted")?,
        posted_at: row.try_get("posted_at")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn list_users(&self) -> Result<Vec<MonitoredUser>> {
        let query = format!(
            "SELECT {} FROM monitored_users ORDER BY created_at DESC",
            USER_COLUMNS
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.db_pool)
            .await
            .context("Failed to list monitored users")?;
        rows.iter().map(user_from_row).collect()
    }

    async fn get_user(&self, username: &str) -> Result<Option<MonitoredUser>> {
        let query = format!(
            "SELECT {} FROM monitored_users WHERE username = $1",
            USER_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(username)
            .fetch_optional(&self.db_pool)
            .await
            .context("Failed to load monitored user")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn create_user(&self, user: MonitoredUser) -> Result<Option<MonitoredUser>> {
        let query = format!(
            r#"
            INSERT INTO monitored_users (username, category, last_post_at, last_fetch_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (username) DO NOTHING
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(&user.username)
            .bind(user.category.as_str())
            .bind(user.last_post_at)
            .bind(user.last_fetch_at)
            .bind(user.created_at)
            .fetch_optional(&self.db_pool)
            .await
            .context("Failed to insert monitored user")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn update_user(
        &self,
        username: &str,
        new_username: Option<&str>,
        category: Option<Category>,
    ) -> Result<Option<MonitoredUser>> {
        let query = format!(
            r#"
            UPDATE monitored_users
            SET username = COALESCE($2, username), category = COALESCE($3, category)
            WHERE username = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(username)
            .bind(new_username)
            .bind(category.map(|c| c.as_str()))
            .fetch_optional(&self.db_pool)
            .await
            .context("Failed to update monitored user")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn delete_user(&self, username: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM monitored_users WHERE username = $1")
            .bind(username)
            .execute(&self.db_pool)
            .await
            .context("Failed to delete monitored user")?;
        Ok(result.rows_affected() > 0)
    }

    async fn advance_cursor(
        &self,
        username: &str,
        newest: Option<DateTime<Utc>>,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        // GREATEST skips NULLs, so a missing cursor or a missing candidate
        // leaves the other side in place
        sqlx::query(
            r#"
            UPDATE monitored_users
            SET last_post_at = GREATEST(last_post_at, $2), last_fetch_at = $3
            WHERE username = $1
            "#,
        )
        .bind(username)
        .bind(newest)
        .bind(fetched_at)
        .execute(&self.db_pool)
        .await
        .context("Failed to advance fetch cursor")?;
        Ok(())
    }

    async fn insert_post(&self, post: &Post) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO posts (id, text, author, category, created_at,
                               like_count, retweet_count, reply_count, fetched_at, is_used)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&post.id)
        .bind(&post.text)
        .bind(&post.author)
        .bind(post.category.as_str())
        .bind(post.created_at)
        .bind(post.metrics.like_count)
        .bind(post.metrics.retweet_count)
        .bind(post.metrics.reply_count)
        .bind(post.fetched_at)
        .bind(post.is_used)
        .execute(&self.db_pool)
        .await
        .context("Failed to insert post")?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_post(&self, id: &str) -> Result<Option<Post>> {
        let query = format!("SELECT {} FROM posts WHERE id = $1", POST_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await
            .context("Failed to load post")?;
        row.as_ref().map(post_from_row).transpose()
    }

    async fn unused_posts(&self, categories: &[Category], limit: Option<i64>) -> Result<Vec<Post>> {
        let categories: Vec<String> = categories.iter().map(|c| c.as_str().to_string()).collect();
        let query = format!(
            r#"
            SELECT {} FROM posts
            WHERE is_used = false AND category = ANY($1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
            POST_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(categories)
            .bind(limit)
            .fetch_all(&self.db_pool)
            .await
            .context("Failed to load unused posts")?;
        rows.iter().map(post_from_row).collect()
    }

    async fn manual_posts(&self) -> Result<Vec<Post>> {
        let query = format!(
            "SELECT {} FROM posts WHERE starts_with(id, $1) ORDER BY created_at DESC",
            POST_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(MANUAL_POST_PREFIX)
            .fetch_all(&self.db_pool)
            .await
            .context("Failed to load manual posts")?;
        rows.iter().map(post_from_row).collect()
    }

    async fn mark_post_used(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE posts SET is_used = true WHERE id = $1")
            .bind(id)
            .execute(&self.db_pool)
            .await
            .context("Failed to mark post used")?;
        Ok(result.rows_affected() > 0)
    }

    async fn post_counts(&self) -> Result<PostCounts> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE is_used) AS used
            FROM posts
            "#,
        )
        .fetch_one(&self.db_pool)
        .await
        .context("Failed to count posts")?;

        let total: i64 = row.try_get("total")?;
        let used: i64 = row.try_get("used")?;
        Ok(PostCounts {
            total,
            used,
            unused: total - used,
        })
    }

    async fn delete_used_posts_fetched_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM posts WHERE is_used = true AND fetched_at < $1")
            .bind(cutoff)
            .execute(&self.db_pool)
            .await
            .context("Failed to delete used posts")?;
        Ok(result.rows_affected())
    }

    async fn posted_record_exists(&self, post_id: Option<&str>, author: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM posted_records
                WHERE author = $1 AND post_id IS NOT DISTINCT FROM $2
            ) AS found
            "#,
        )
        .bind(author)
        .bind(post_id)
        .fetch_one(&self.db_pool)
        .await
        .context("Failed to look up posted record")?;
        Ok(row.try_get("found")?)
    }

    async fn insert_posted_record(&self, record: &PostedRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posted_records (id, post_id, author, rewritten_content, posted_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(&record.post_id)
        .bind(&record.author)
        .bind(&record.rewritten_content)
        .bind(record.posted_at)
        .execute(&self.db_pool)
        .await
        .context("Failed to insert posted record")?;
        Ok(())
    }

    async fn delete_posted_records_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM posted_records WHERE posted_at < $1")
            .bind(cutoff)
            .execute(&self.db_pool)
            .await
            .context("Failed to delete posted records")?;
        Ok(result.rows_affected())
    }

    async fn list_scheduled(&self) -> Result<Vec<ScheduledPost>> {
        let query = format!(
            "SELECT {} FROM scheduled_posts ORDER BY created_at DESC",
            SCHEDULED_COLUMNS
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.db_pool)
            .await
            .context("Failed to list scheduled posts")?;
        rows.iter().map(scheduled_from_row).collect()
    }

    async fn get_scheduled(&self, id: Uuid) -> Result<Option<ScheduledPost>> {
        let query = format!(
            "SELECT {} FROM scheduled_posts WHERE id = $1",
            SCHEDULED_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await
            .context("Failed to load scheduled post")?;
        row.as_ref().map(scheduled_from_row).transpose()
    }

    async fn insert_scheduled(&self, post: &ScheduledPost) -> Result<()> {
        let query = format!(
            "INSERT INTO scheduled_posts ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            SCHEDULED_COLUMNS
        );
        sqlx::query(&query)
            .bind(post.id)
            .bind(&post.content)
            .bind(&post.context)
            .bind(&post.source_post_ids)
            .bind(post.created_at)
            .bind(post.scheduled_for)
            .bind(post.is_posted)
            .bind(post.posted_at)
            .execute(&self.db_pool)
            .await
            .context("Failed to insert scheduled post")?;
        Ok(())
    }

    async fn update_scheduled(&self, post: &ScheduledPost) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET content = $2, scheduled_for = $3, is_posted = $4, posted_at = $5
            WHERE id = $1
            "#,
        )
        .bind(post.id)
        .bind(&post.content)
        .bind(post.scheduled_for)
        .bind(post.is_posted)
        .bind(post.posted_at)
        .execute(&self.db_pool)
        .await
        .context("Failed to update scheduled post")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_scheduled(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scheduled_posts WHERE id = $1")
            .bind(id)
            .execute(&self.db_pool)
            .await
            .context("Failed to delete scheduled post")?;
        Ok(result.rows_affected() > 0)
    }

    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPost>> {
        let query = format!(
            r#"
            SELECT {} FROM scheduled_posts
            WHERE is_posted = false AND scheduled_for <= $1
            ORDER BY scheduled_for ASC
            "#,
            SCHEDULED_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .fetch_all(&self.db_pool)
            .await
            .context("Failed to load due scheduled posts")?;
        rows.iter().map(scheduled_from_row).collect()
    }
}
