/// Storage module
///
/// `Store` is the seam between the HTTP/ingest layers and persistence.
/// `PgStore` (see `pg_store`) backs it with PostgreSQL; `MemoryStore` keeps
/// everything in process and is used when no database is configured.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    Category, MonitoredUser, Post, PostCounts, PostedRecord, ScheduledPost, MANUAL_POST_PREFIX,
};

#[async_trait]
pub trait Store: Send + Sync {
    /// All monitored users, newest first
    async fn list_users(&self) -> Result<Vec<MonitoredUser>>;

    async fn get_user(&self, username: &str) -> Result<Option<MonitoredUser>>;

    /// Insert a user; `None` when the username is already taken
    async fn create_user(&self, user: MonitoredUser) -> Result<Option<MonitoredUser>>;

    /// Rename and/or retag a user; `None` when it does not exist
    async fn update_user(
        &self,
        username: &str,
        new_username: Option<&str>,
        category: Option<Category>,
    ) -> Result<Option<MonitoredUser>>;

    async fn delete_user(&self, username: &str) -> Result<bool>;

    /// Record a poll. The cursor only moves forward; `newest` may be `None`
    /// when the poll returned nothing.
    async fn advance_cursor(
        &self,
        username: &str,
        newest: Option<DateTime<Utc>>,
        fetched_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Insert a post; `false` when a post with the same id already exists
    async fn insert_post(&self, post: &Post) -> Result<bool>;

    async fn get_post(&self, id: &str) -> Result<Option<Post>>;

    /// Unused posts in the given categories, newest first
    async fn unused_posts(&self, categories: &[Category], limit: Option<i64>) -> Result<Vec<Post>>;

    /// Operator-entered posts, newest first
    async fn manual_posts(&self) -> Result<Vec<Post>>;

    async fn mark_post_used(&self, id: &str) -> Result<bool>;

    async fn post_counts(&self) -> Result<PostCounts>;

    async fn delete_used_posts_fetched_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn posted_record_exists(&self, post_id: Option<&str>, author: &str) -> Result<bool>;

    async fn insert_posted_record(&self, record: &PostedRecord) -> Result<()>;

    async fn delete_posted_records_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// All drafts, newest first
    async fn list_scheduled(&self) -> Result<Vec<ScheduledPost>>;

    async fn get_scheduled(&self, id: Uuid) -> Result<Option<ScheduledPost>>;

    async fn insert_scheduled(&self, post: &ScheduledPost) -> Result<()>;

    async fn update_scheduled(&self, post: &ScheduledPost) -> Result<bool>;

    async fn delete_scheduled(&self, id: Uuid) -> Result<bool>;

    /// Unposted drafts whose time has come, oldest schedule first
    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPost>>;
}

#[derive(Default)]
struct Tables {
    users: Vec<MonitoredUser>,
    posts: HashMap<String, Post>,
    posted: Vec<PostedRecord>,
    scheduled: Vec<ScheduledPost>,
}

/// Process-local store
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(posts: &mut [Post]) {
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_users(&self) -> Result<Vec<MonitoredUser>> {
        let tables = self.tables.read().await;
        let mut users = tables.users.clone();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    async fn get_user(&self, username: &str) -> Result<Option<MonitoredUser>> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|u| u.username == username).cloned())
    }

    async fn create_user(&self, user: MonitoredUser) -> Result<Option<MonitoredUser>> {
        let mut tables = self.tables.write().await;
        if tables.users.iter().any(|u| u.username == user.username) {
            return Ok(None);
        }
        tables.users.push(user.clone());
        Ok(Some(user))
    }

    async fn update_user(
        &self,
        username: &str,
        new_username: Option<&str>,
        category: Option<Category>,
    ) -> Result<Option<MonitoredUser>> {
        let mut tables = self.tables.write().await;
        let Some(user) = tables.users.iter_mut().find(|u| u.username == username) else {
            return Ok(None);
        };
        if let Some(new_username) = new_username {
            user.username = new_username.to_string();
        }
        if let Some(category) = category {
            user.category = category;
        }
        Ok(Some(user.clone()))
    }

    async fn delete_user(&self, username: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.users.len();
        tables.users.retain(|u| u.username != username);
        Ok(tables.users.len() != before)
    }

    async fn advance_cursor(
        &self,
        username: &str,
        newest: Option<DateTime<Utc>>,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(user) = tables.users.iter_mut().find(|u| u.username == username) {
            if let Some(newest) = newest {
                user.advance_cursor(newest);
            }
            user.last_fetch_at = Some(fetched_at);
        }
        Ok(())
    }

    async fn insert_post(&self, post: &Post) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if tables.posts.contains_key(&post.id) {
            return Ok(false);
        }
        tables.posts.insert(post.id.clone(), post.clone());
        Ok(true)
    }

    async fn get_post(&self, id: &str) -> Result<Option<Post>> {
        Ok(self.tables.read().await.posts.get(id).cloned())
    }

    async fn unused_posts(&self, categories: &[Category], limit: Option<i64>) -> Result<Vec<Post>> {
        let tables = self.tables.read().await;
        let mut posts: Vec<Post> = tables
            .posts
            .values()
            .filter(|p| !p.is_used && categories.contains(&p.category))
            .cloned()
            .collect();
        newest_first(&mut posts);
        if let Some(limit) = limit {
            posts.truncate(limit.max(0) as usize);
        }
        Ok(posts)
    }

    async fn manual_posts(&self) -> Result<Vec<Post>> {
        let tables = self.tables.read().await;
        let mut posts: Vec<Post> = tables
            .posts
            .values()
            .filter(|p| p.id.starts_with(MANUAL_POST_PREFIX))
            .cloned()
            .collect();
        newest_first(&mut posts);
        Ok(posts)
    }

    async fn mark_post_used(&self, id: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.posts.get_mut(id) {
            Some(post) => {
                post.is_used = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn post_counts(&self) -> Result<PostCounts> {
        let tables = self.tables.read().await;
        let total = tables.posts.len() as i64;
        let used = tables.posts.values().filter(|p| p.is_used).count() as i64;
        Ok(PostCounts {
            total,
            used,
            unused: total - used,
        })
    }

    async fn delete_used_posts_fetched_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.posts.len();
        tables
            .posts
            .retain(|_, p| !(p.is_used && p.fetched_at < cutoff));
        Ok((before - tables.posts.len()) as u64)
    }

    async fn posted_record_exists(&self, post_id: Option<&str>, author: &str) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .posted
            .iter()
            .any(|r| r.author == author && r.post_id.as_deref() == post_id))
    }

    async fn insert_posted_record(&self, record: &PostedRecord) -> Result<()> {
        self.tables.write().await.posted.push(record.clone());
        Ok(())
    }

    async fn delete_posted_records_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.posted.len();
        tables.posted.retain(|r| r.posted_at >= cutoff);
        Ok((before - tables.posted.len()) as u64)
    }

    async fn list_scheduled(&self) -> Result<Vec<ScheduledPost>> {
        let mut posts = self.tables.read().await.scheduled.clone();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(posts)
    }

    async fn get_scheduled(&self, id: Uuid) -> Result<Option<ScheduledPost>> {
        let tables = self.tables.read().await;
        Ok(tables.scheduled.iter().find(|p| p.id == id).cloned())
    }

    async fn insert_scheduled(&self, post: &ScheduledPost) -> Result<()> {
        self.tables.write().await.scheduled.push(post.clone());
        Ok(())
    }

    async fn update_scheduled(&self, post: &ScheduledPost) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.scheduled.iter_mut().find(|p| p.id == post.id) {
            Some(existing) => {
                *existing = post.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_scheduled(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.scheduled.len();
        tables.scheduled.retain(|p| p.id != id);
        Ok(tables.scheduled.len() != before)
    }

    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPost>> {
        let tables = self.tables.read().await;
        let mut due: Vec<ScheduledPost> = tables
            .scheduled
            .iter()
            .filter(|p| p.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|p| p.scheduled_for);
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PostMetrics;
    use chrono::Duration;

    fn post(id: &str, category: Category, created_at: DateTime<Utc>) -> Post {
        Post {
            id: id.to_string(),
            text: format!("post {}", id),
            author: "alice".to_string(),
            category,
            created_at,
            metrics: PostMetrics::default(),
            fetched_at: created_at,
            is_used: false,
        }
    }

    #[tokio::test]
    async fn duplicate_usernames_are_refused() {
        let store = MemoryStore::new();
        let first = store
            .create_user(MonitoredUser::new("alice", Category::Influencer))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = store
            .create_user(MonitoredUser::new("alice", Category::Company))
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(store.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_posts_are_skipped() {
        let store = MemoryStore::new();
        let p = post("1", Category::Company, Utc::now());
        assert!(store.insert_post(&p).await.unwrap());
        assert!(!store.insert_post(&p).await.unwrap());
        assert_eq!(store.post_counts().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn unused_posts_filter_and_order() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_post(&post("old", Category::Influencer, now - Duration::hours(2))).await.unwrap();
        store.insert_post(&post("new", Category::Influencer, now)).await.unwrap();
        store.insert_post(&post("corp", Category::Company, now)).await.unwrap();
        store.insert_post(&post("used", Category::Influencer, now)).await.unwrap();
        store.mark_post_used("used").await.unwrap();

        let influencers = store
            .unused_posts(&[Category::Influencer], None)
            .await
            .unwrap();
        let ids: Vec<_> = influencers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);

        let limited = store.unused_posts(&Category::ALL, Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn cleanup_only_drops_old_used_posts() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut stale = post("stale", Category::Company, now);
        stale.fetched_at = now - Duration::days(2);
        stale.is_used = true;
        let mut fresh_used = post("fresh", Category::Company, now);
        fresh_used.is_used = true;
        let mut stale_unused = post("keep", Category::Company, now);
        stale_unused.fetched_at = now - Duration::days(2);

        for p in [&stale, &fresh_used, &stale_unused] {
            store.insert_post(p).await.unwrap();
        }

        let deleted = store
            .delete_used_posts_fetched_before(now - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_post("stale").await.unwrap().is_none());
        assert!(store.get_post("keep").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cursor_update_keeps_latest() {
        let store = MemoryStore::new();
        store
            .create_user(MonitoredUser::new("alice", Category::Influencer))
            .await
            .unwrap();
        let now = Utc::now();

        store.advance_cursor("alice", Some(now), now).await.unwrap();
        store
            .advance_cursor("alice", Some(now - Duration::hours(1)), now)
            .await
            .unwrap();
        store.advance_cursor("alice", None, now).await.unwrap();

        let user = store.get_user("alice").await.unwrap().unwrap();
        assert_eq!(user.last_post_at, Some(now));
        assert_eq!(user.last_fetch_at, Some(now));
    }

    #[tokio::test]
    async fn due_scheduled_sorted_by_time() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let later = ScheduledPost::new("later", None, vec![], Some(now - Duration::minutes(1)));
        let earlier = ScheduledPost::new("earlier", None, vec![], Some(now - Duration::hours(1)));
        let future = ScheduledPost::new("future", None, vec![], Some(now + Duration::hours(1)));
        for p in [&later, &earlier, &future] {
            store.insert_scheduled(p).await.unwrap();
        }

        let due = store.due_scheduled(now).await.unwrap();
        let contents: Vec<_> = due.iter().map(|p| p.content.as_str()).collect();
        assert_eq!(contents, vec!["earlier", "later"]);
    }
}
