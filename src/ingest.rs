/// Post ingestion
///
/// Polls every monitored account through the Twitter client, stores what is
/// new, and moves each account's cursor forward. A first poll takes a small
/// bootstrap batch; later polls ask only for posts since the cursor.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{IngestSettings, RetentionSettings};
use crate::models::{Category, MonitoredUser, Post, PostMetrics};
use crate::store::Store;
use crate::twitter::{TimelineQuery, Tweet, TwitterApi};

// Global lock so two fetch-all passes never interleave
lazy_static::lazy_static! {
    static ref FETCH_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::new(());
}

/// Timeline reads for a single preview are capped here
pub const PREVIEW_MAX: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchType {
    Initial,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchOutcome {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFetchResult {
    pub username: String,
    pub status: FetchOutcome,
    pub new_tweets: usize,
    pub saved_tweets: usize,
    pub tweets: Vec<Post>,
    pub fetch_type: FetchType,
    /// Cursor before this pass
    pub last_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchError {
    pub username: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchReport {
    pub total_users: usize,
    pub total_new_tweets: usize,
    pub total_saved_tweets: usize,
    pub results: Vec<UserFetchResult>,
    pub errors: Vec<FetchError>,
    pub completed_at: DateTime<Utc>,
}

struct UserPass {
    new_tweets: usize,
    saved: Vec<Post>,
}

fn to_post(tweet: Tweet, user: &MonitoredUser, fetched_at: DateTime<Utc>) -> Post {
    let metrics = tweet.public_metrics.unwrap_or_default();
    Post {
        id: tweet.id,
        text: tweet.text,
        author: user.username.clone(),
        category: user.category,
        created_at: tweet.created_at.unwrap_or(fetched_at),
        metrics: PostMetrics {
            like_count: metrics.like_count,
            retweet_count: metrics.retweet_count,
            reply_count: metrics.reply_count,
        },
        fetched_at,
        is_used: false,
    }
}

/// Query for one user: bootstrap without a cursor, incremental after it
pub fn timeline_query(settings: &IngestSettings, cursor: Option<DateTime<Utc>>) -> TimelineQuery {
    match cursor {
        None => TimelineQuery {
            max_results: settings.bootstrap_batch,
            start_time: None,
        },
        Some(since) => TimelineQuery {
            max_results: settings.incremental_batch,
            start_time: Some(since),
        },
    }
}

async fn fetch_user(
    settings: &IngestSettings,
    store: &dyn Store,
    twitter: &dyn TwitterApi,
    user: &MonitoredUser,
) -> Result<UserPass> {
    let account = twitter
        .lookup_user(&user.username)
        .await?
        .with_context(|| format!("User {} not found on Twitter", user.username))?;

    let tweets = twitter
        .user_timeline(&account.id, timeline_query(settings, user.last_post_at))
        .await?;

    let fetched_at = Utc::now();
    let new_tweets = tweets.len();
    let mut newest: Option<DateTime<Utc>> = None;
    let mut saved = Vec::new();

    for tweet in tweets {
        let post = to_post(tweet, user, fetched_at);
        newest = newest.max(Some(post.created_at));
        if store.insert_post(&post).await? {
            saved.push(post);
        }
    }

    store
        .advance_cursor(&user.username, newest, fetched_at)
        .await?;

    Ok(UserPass { new_tweets, saved })
}

/// Serial pass over every monitored user. Per-user failures are collected.
pub async fn fetch_all_posts(
    settings: &IngestSettings,
    store: &dyn Store,
    twitter: &dyn TwitterApi,
) -> Result<FetchReport> {
    let _lock = FETCH_LOCK.lock().await;

    let users = store.list_users().await?;
    log::info!("Fetching posts for {} monitored users", users.len());

    let mut results = Vec::with_capacity(users.len());
    let mut errors = Vec::new();

    for (i, user) in users.iter().enumerate() {
        if i > 0 && !settings.delay_between_users.is_zero() {
            tokio::time::sleep(settings.delay_between_users).await;
        }

        let fetch_type = if user.last_post_at.is_some() {
            FetchType::Incremental
        } else {
            FetchType::Initial
        };

        match fetch_user(settings, store, twitter, user).await {
            Ok(pass) => {
                log::info!(
                    "{} ({:?}): {} fetched, {} new",
                    user.username,
                    fetch_type,
                    pass.new_tweets,
                    pass.saved.len()
                );
                results.push(UserFetchResult {
                    username: user.username.clone(),
                    status: FetchOutcome::Success,
                    new_tweets: pass.new_tweets,
                    saved_tweets: pass.saved.len(),
                    tweets: pass.saved,
                    fetch_type,
                    last_timestamp: user.last_post_at,
                    error: None,
                });
            }
            Err(e) => {
                let message = format!("{:#}", e);
                log::error!("Fetching {} failed: {}", user.username, message);
                errors.push(FetchError {
                    username: user.username.clone(),
                    error: message.clone(),
                });
                results.push(UserFetchResult {
                    username: user.username.clone(),
                    status: FetchOutcome::Error,
                    new_tweets: 0,
                    saved_tweets: 0,
                    tweets: Vec::new(),
                    fetch_type,
                    last_timestamp: user.last_post_at,
                    error: Some(message),
                });
            }
        }
    }

    let report = FetchReport {
        total_users: users.len(),
        total_new_tweets: results.iter().map(|r| r.new_tweets).sum(),
        total_saved_tweets: results.iter().map(|r| r.saved_tweets).sum(),
        results,
        errors,
        completed_at: Utc::now(),
    };

    log::info!(
        "Fetch complete: {} fetched, {} saved, {} errors",
        report.total_new_tweets,
        report.total_saved_tweets,
        report.errors.len()
    );

    Ok(report)
}

/// Read a user's latest posts without storing them; `None` when the account is unknown
pub async fn preview_user(
    twitter: &dyn TwitterApi,
    username: &str,
    count: u32,
) -> Result<Option<Vec<Tweet>>> {
    let Some(account) = twitter.lookup_user(username).await? else {
        return Ok(None);
    };

    let query = TimelineQuery {
        max_results: count.clamp(1, PREVIEW_MAX),
        start_time: None,
    };
    let tweets = twitter.user_timeline(&account.id, query).await?;
    Ok(Some(tweets))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFetchState {
    pub username: String,
    pub tag: Category,
    pub last_post_at: Option<DateTime<Utc>>,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub fetch_type: FetchType,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchStatus {
    pub users: Vec<UserFetchState>,
    pub total_tweets: i64,
    pub used_tweets: i64,
    pub unused_tweets: i64,
    pub cleanup_needed: bool,
}

pub async fn fetch_status(store: &dyn Store) -> Result<FetchStatus> {
    let users = store.list_users().await?;
    let counts = store.post_counts().await?;

    Ok(FetchStatus {
        users: users
            .into_iter()
            .map(|u| UserFetchState {
                fetch_type: if u.last_post_at.is_some() {
                    FetchType::Incremental
                } else {
                    FetchType::Initial
                },
                username: u.username,
                tag: u.category,
                last_post_at: u.last_post_at,
                last_fetch_at: u.last_fetch_at,
            })
            .collect(),
        total_tweets: counts.total,
        used_tweets: counts.used,
        unused_tweets: counts.unused,
        cleanup_needed: counts.used > 0,
    })
}

/// Drop used posts fetched before the retention window
pub async fn cleanup_used_posts(
    store: &dyn Store,
    retention: &RetentionSettings,
    now: DateTime<Utc>,
) -> Result<u64> {
    let deleted = store
        .delete_used_posts_fetched_before(now - retention.used_post_max_age)
        .await?;
    log::info!("Cleanup removed {} used posts", deleted);
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::twitter::{TweetMetrics, TwitterUser};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, hour, 0, 0).unwrap()
    }

    /// Serves canned timelines, newest first, honouring start_time and max_results
    #[derive(Default)]
    struct FakeTwitter {
        timelines: HashMap<String, Vec<Tweet>>,
        failing: Vec<String>,
        queries: Mutex<Vec<(String, TimelineQuery)>>,
    }

    impl FakeTwitter {
        fn with(mut self, username: &str, tweets: Vec<Tweet>) -> Self {
            self.timelines.insert(username.to_string(), tweets);
            self
        }
    }

    #[async_trait]
    impl TwitterApi for FakeTwitter {
        async fn lookup_user(&self, username: &str) -> Result<Option<TwitterUser>> {
            if self.failing.iter().any(|u| u == username) {
                anyhow::bail!("Twitter API error: 503 - down");
            }
            Ok(self.timelines.contains_key(username).then(|| TwitterUser {
                id: format!("id-{}", username),
                username: username.to_string(),
                name: username.to_string(),
            }))
        }

        async fn user_timeline(&self, user_id: &str, query: TimelineQuery) -> Result<Vec<Tweet>> {
            let username = user_id.trim_start_matches("id-").to_string();
            self.queries.lock().unwrap().push((username.clone(), query));
            let mut tweets: Vec<Tweet> = self.timelines[&username]
                .iter()
                .filter(|t| match (query.start_time, t.created_at) {
                    (Some(since), Some(created)) => created >= since,
                    _ => true,
                })
                .cloned()
                .collect();
            tweets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            tweets.truncate(query.max_results as usize);
            Ok(tweets)
        }
    }

    fn tweet(id: &str, hour: u32) -> Tweet {
        Tweet {
            id: id.to_string(),
            text: format!("post {}", id),
            created_at: Some(at(hour)),
            public_metrics: Some(TweetMetrics { like_count: 1, retweet_count: 0, reply_count: 0 }),
        }
    }

    fn settings() -> IngestSettings {
        IngestSettings {
            delay_between_users: std::time::Duration::ZERO,
            ..IngestSettings::default()
        }
    }

    async fn store_with(users: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        for u in users {
            store
                .create_user(MonitoredUser::new(u, Category::Influencer))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn first_pass_bootstraps_then_goes_incremental() {
        let store = store_with(&["alice"]).await;
        let twitter = FakeTwitter::default().with(
            "alice",
            vec![tweet("1", 1), tweet("2", 2), tweet("3", 3), tweet("4", 4)],
        );

        let report = fetch_all_posts(&settings(), &store, &twitter).await.unwrap();
        assert_eq!(report.results[0].fetch_type, FetchType::Initial);
        assert_eq!(report.total_saved_tweets, 2);
        assert_eq!(store.get_user("alice").await.unwrap().unwrap().last_post_at, Some(at(4)));

        let report = fetch_all_posts(&settings(), &store, &twitter).await.unwrap();
        let result = &report.results[0];
        assert_eq!(result.fetch_type, FetchType::Incremental);
        assert_eq!(result.last_timestamp, Some(at(4)));
        // the post at the cursor itself comes back and is deduplicated
        assert_eq!(result.new_tweets, 1);
        assert_eq!(result.saved_tweets, 0);

        let queries = twitter.queries.lock().unwrap();
        assert_eq!(queries[0].1, TimelineQuery { max_results: 2, start_time: None });
        assert_eq!(queries[1].1, TimelineQuery { max_results: 100, start_time: Some(at(4)) });
    }

    #[tokio::test]
    async fn cursor_never_moves_back() {
        let store = store_with(&["bob"]).await;
        store.advance_cursor("bob", Some(at(10)), at(10)).await.unwrap();

        let twitter = FakeTwitter::default().with("bob", vec![tweet("old", 3)]);
        let report = fetch_all_posts(&settings(), &store, &twitter).await.unwrap();
        assert_eq!(report.results[0].new_tweets, 0);
        let bob = store.get_user("bob").await.unwrap().unwrap();
        assert_eq!(bob.last_post_at, Some(at(10)));

        let pass_store = store_with(&["carol"]).await;
        pass_store.advance_cursor("carol", Some(at(10)), at(10)).await.unwrap();
        pass_store.advance_cursor("carol", Some(at(5)), at(11)).await.unwrap();
        let carol = pass_store.get_user("carol").await.unwrap().unwrap();
        assert_eq!(carol.last_post_at, Some(at(10)));
        assert_eq!(carol.last_fetch_at, Some(at(11)));
    }

    #[tokio::test]
    async fn failures_are_collected_per_user() {
        let store = store_with(&["ghost", "down", "alice"]).await;
        let mut twitter = FakeTwitter::default().with("alice", vec![tweet("1", 1)]);
        twitter.timelines.insert("down".into(), vec![]);
        twitter.failing.push("down".into());

        let report = fetch_all_posts(&settings(), &store, &twitter).await.unwrap();
        assert_eq!(report.total_users, 3);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.total_saved_tweets, 1);

        let ghost = report.results.iter().find(|r| r.username == "ghost").unwrap();
        assert_eq!(ghost.status, FetchOutcome::Error);
        assert!(ghost.error.as_deref().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn empty_timeline_still_records_fetch_time() {
        let store = store_with(&["quiet"]).await;
        let twitter = FakeTwitter::default().with("quiet", vec![]);

        fetch_all_posts(&settings(), &store, &twitter).await.unwrap();
        let user = store.get_user("quiet").await.unwrap().unwrap();
        assert!(user.last_post_at.is_none());
        assert!(user.last_fetch_at.is_some());
    }

    #[tokio::test]
    async fn preview_caps_count_and_handles_unknown_users() {
        let twitter = FakeTwitter::default().with("alice", vec![tweet("1", 1)]);
        assert!(preview_user(&twitter, "nobody", 10).await.unwrap().is_none());

        let tweets = preview_user(&twitter, "alice", 500).await.unwrap().unwrap();
        assert_eq!(tweets.len(), 1);
        assert_eq!(twitter.queries.lock().unwrap()[0].1.max_results, PREVIEW_MAX);
    }

    #[tokio::test]
    async fn status_and_cleanup() {
        let store = store_with(&["alice"]).await;
        let now = at(12);
        for (id, fetched_hours_ago) in [("a", 30), ("b", 2)] {
            let fetched_at = now - Duration::hours(fetched_hours_ago);
            store
                .insert_post(&Post {
                    id: id.into(),
                    text: "t".into(),
                    author: "alice".into(),
                    category: Category::Influencer,
                    created_at: fetched_at,
                    metrics: PostMetrics::default(),
                    fetched_at,
                    is_used: false,
                })
                .await
                .unwrap();
            store.mark_post_used(id).await.unwrap();
        }

        let status = fetch_status(&store).await.unwrap();
        assert_eq!((status.total_tweets, status.used_tweets), (2, 2));
        assert!(status.cleanup_needed);
        assert_eq!(status.users[0].fetch_type, FetchType::Initial);

        let deleted = cleanup_used_posts(&store, &RetentionSettings::default(), now)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_post("b").await.unwrap().is_some());
    }

    /// Every lookup takes a while; tracks how many lookups overlap
    #[derive(Default)]
    struct SlowTwitter {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl TwitterApi for SlowTwitter {
        async fn lookup_user(&self, username: &str) -> Result<Option<TwitterUser>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.lookups.fetch_add(1, Ordering::SeqCst);

            Ok(Some(TwitterUser {
                id: format!("id-{}", username),
                username: username.to_string(),
                name: username.to_string(),
            }))
        }

        async fn user_timeline(&self, _user_id: &str, _query: TimelineQuery) -> Result<Vec<Tweet>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_passes_run_one_after_another() {
        let store = store_with(&["alice", "bob"]).await;
        let twitter = SlowTwitter::default();
        let settings = settings();

        let (first, second) = tokio::join!(
            fetch_all_posts(&settings, &store, &twitter),
            fetch_all_posts(&settings, &store, &twitter),
        );

        assert_eq!(first.unwrap().total_users, 2);
        assert_eq!(second.unwrap().total_users, 2);
        assert_eq!(twitter.lookups.load(Ordering::SeqCst), 4);
        assert_eq!(twitter.peak.load(Ordering::SeqCst), 1);
    }
}
