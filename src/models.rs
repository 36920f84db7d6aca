/// Domain models
///
/// Records kept by the store: monitored accounts, ingested posts, drafts
/// waiting for manual posting, and the audit log of rewrites that went out.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix carried by the id of every operator-entered post
pub const MANUAL_POST_PREFIX: &str = "manual_";

/// Category tag attached to a monitored account and inherited by its posts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Influencer,
    Company,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Influencer, Category::Company];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Influencer => "influencer",
            Category::Company => "company",
        }
    }

    /// Short description used when asking the model to rewrite a post
    pub fn voice(&self) -> &'static str {
        match self {
            Category::Influencer => "crypto influencer sharing market insights",
            Category::Company => "crypto company making official announcements",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "influencer" => Ok(Category::Influencer),
            "company" => Ok(Category::Company),
            other => bail!("Unknown category: {}", other),
        }
    }
}

/// A Twitter account whose timeline is polled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredUser {
    pub username: String,
    #[serde(rename = "tag")]
    pub category: Category,
    /// Cursor: creation time of the newest post seen so far
    pub last_post_at: Option<DateTime<Utc>>,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MonitoredUser {
    pub fn new(username: &str, category: Category) -> Self {
        Self {
            username: normalize_username(username),
            category,
            last_post_at: None,
            last_fetch_at: None,
            created_at: Utc::now(),
        }
    }

    /// Move the cursor to `candidate` unless it already points later
    pub fn advance_cursor(&mut self, candidate: DateTime<Utc>) {
        self.last_post_at = Some(match self.last_post_at {
            Some(current) if current >= candidate => current,
            _ => candidate,
        });
    }
}

/// Strip whitespace and a leading `@` from a handle
pub fn normalize_username(raw: &str) -> String {
    raw.trim().trim_start_matches('@').trim().to_string()
}

/// Twitter handles are 1 to 15 ASCII letters, digits or underscores
pub fn is_valid_username(name: &str) -> bool {
    (1..=15).contains(&name.len())
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetrics {
    pub like_count: i64,
    pub retweet_count: i64,
    pub reply_count: i64,
}

/// A stored social post, either ingested from Twitter or entered by hand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub text: String,
    pub author: String,
    #[serde(rename = "tag")]
    pub category: Category,
    pub created_at: DateTime<Utc>,
    pub metrics: PostMetrics,
    pub fetched_at: DateTime<Utc>,
    pub is_used: bool,
}

impl Post {
    /// Operator-entered post with a fresh `manual_` id and zero metrics
    pub fn manual(text: &str, author: &str, category: Category) -> Self {
        let now = Utc::now();
        Self {
            id: manual_post_id(now),
            text: text.trim().to_string(),
            author: normalize_username(author),
            category,
            created_at: now,
            metrics: PostMetrics::default(),
            fetched_at: now,
            is_used: false,
        }
    }

    pub fn is_manual(&self) -> bool {
        self.id.starts_with(MANUAL_POST_PREFIX)
    }
}

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `manual_<unix millis>_<9 base36 chars>`
pub fn manual_post_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{}{}_{}", MANUAL_POST_PREFIX, now.timestamp_millis(), suffix)
}

/// A generated draft waiting for an operator to publish it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledPost {
    pub id: Uuid,
    pub content: String,
    pub context: Option<String>,
    #[serde(rename = "selectedPostIds")]
    pub source_post_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub is_posted: bool,
    pub posted_at: Option<DateTime<Utc>>,
}

/// Partial update of a scheduled post
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledPostPatch {
    pub content: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub is_posted: Option<bool>,
}

/// Why a patch was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchRejected {
    #[error("Content cannot be empty")]
    EmptyContent,
    #[error("Scheduled post has already been posted and can no longer be changed")]
    AlreadyPosted,
}

impl ScheduledPost {
    pub fn new(
        content: &str,
        context: Option<String>,
        source_post_ids: Vec<String>,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.trim().to_string(),
            context,
            source_post_ids,
            created_at: Utc::now(),
            scheduled_for,
            is_posted: false,
            posted_at: None,
        }
    }

    /// Apply `patch` in place.
    ///
    /// Once posted, only no-op patches are accepted. `posted_at` is stamped the
    /// first time the post is marked posted.
    pub fn apply(
        &mut self,
        patch: ScheduledPostPatch,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), PatchRejected> {
        let content = patch.content.map(|c| c.trim().to_string());
        if matches!(&content, Some(c) if c.is_empty()) {
            return Err(PatchRejected::EmptyContent);
        }

        if self.is_posted {
            let changes_content = content.as_ref().is_some_and(|c| *c != self.content);
            let changes_schedule = patch
                .scheduled_for
                .is_some_and(|s| Some(s) != self.scheduled_for);
            let unposts = patch.is_posted == Some(false);
            if changes_content || changes_schedule || unposts {
                return Err(PatchRejected::AlreadyPosted);
            }
            return Ok(());
        }

        if let Some(content) = content {
            self.content = content;
        }
        if let Some(scheduled_for) = patch.scheduled_for {
            self.scheduled_for = Some(scheduled_for);
        }
        if patch.is_posted == Some(true) {
            self.is_posted = true;
            self.posted_at = Some(now);
        }
        Ok(())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_posted && self.scheduled_for.is_some_and(|at| at <= now)
    }
}

/// Audit entry for an AI rewrite that went out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostedRecord {
    pub id: Uuid,
    pub post_id: Option<String>,
    pub author: String,
    pub rewritten_content: String,
    pub posted_at: DateTime<Utc>,
}

impl PostedRecord {
    pub fn new(post_id: Option<String>, author: &str, rewritten_content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            post_id,
            author: author.to_string(),
            rewritten_content: rewritten_content.to_string(),
            posted_at: Utc::now(),
        }
    }
}

/// Post totals reported by the fetch status endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCounts {
    pub total: i64,
    pub used: i64,
    pub unused: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!("Influencer".parse::<Category>().unwrap(), Category::Influencer);
        assert_eq!(" company ".parse::<Category>().unwrap(), Category::Company);
        assert!("whale".parse::<Category>().is_err());
    }

    #[test]
    fn manual_posts_get_prefixed_ids() {
        let post = Post::manual(" gm ", "@alice", Category::Influencer);
        assert!(post.is_manual());
        assert_eq!(post.author, "alice");
        assert_eq!(post.text, "gm");
        assert_eq!(post.metrics, PostMetrics::default());

        let id = manual_post_id(Utc::now());
        let suffix = id.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 9);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn username_loses_leading_at() {
        assert_eq!(normalize_username(" @solana "), "solana");
        assert_eq!(MonitoredUser::new("@vitalik", Category::Influencer).username, "vitalik");
        assert!(is_valid_username("Vitalik_Buterin"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("a_very_long_handle"));
        assert!(!is_valid_username("alice?x=1"));
        assert!(!is_valid_username("../2/tweets"));
        assert!(!is_valid_username("jos\u{e9}"));
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let mut user = MonitoredUser::new("alice", Category::Influencer);
        let t1 = Utc::now();
        let t0 = t1 - Duration::hours(3);

        user.advance_cursor(t1);
        user.advance_cursor(t0);
        assert_eq!(user.last_post_at, Some(t1));

        let t2 = t1 + Duration::minutes(1);
        user.advance_cursor(t2);
        assert_eq!(user.last_post_at, Some(t2));
    }

    #[test]
    fn marking_posted_stamps_time_once() {
        let now = Utc::now();
        let mut post = ScheduledPost::new("  gm  ", None, vec![], None);
        assert_eq!(post.content, "gm");

        post.apply(
            ScheduledPostPatch {
                is_posted: Some(true),
                ..Default::default()
            },
            now,
        )
        .unwrap();
        assert!(post.is_posted);
        assert_eq!(post.posted_at, Some(now));

        // Re-sending the same flag is a no-op, not a restamp
        post.apply(
            ScheduledPostPatch {
                is_posted: Some(true),
                ..Default::default()
            },
            now + Duration::hours(1),
        )
        .unwrap();
        assert_eq!(post.posted_at, Some(now));
    }

    #[test]
    fn posted_content_is_frozen() {
        let now = Utc::now();
        let mut post = ScheduledPost::new("gm", None, vec![], None);
        post.apply(
            ScheduledPostPatch {
                is_posted: Some(true),
                ..Default::default()
            },
            now,
        )
        .unwrap();

        let edit = ScheduledPostPatch {
            content: Some("gn".into()),
            ..Default::default()
        };
        assert_eq!(post.apply(edit, now), Err(PatchRejected::AlreadyPosted));

        let unpost = ScheduledPostPatch {
            is_posted: Some(false),
            ..Default::default()
        };
        assert_eq!(post.apply(unpost, now), Err(PatchRejected::AlreadyPosted));
        assert_eq!(post.content, "gm");
    }

    #[test]
    fn blank_content_rejected() {
        let mut post = ScheduledPost::new("gm", None, vec![], None);
        let patch = ScheduledPostPatch {
            content: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(post.apply(patch, Utc::now()), Err(PatchRejected::EmptyContent));
    }

    #[test]
    fn due_only_when_scheduled_in_past_and_unposted() {
        let now = Utc::now();
        let unscheduled = ScheduledPost::new("a", None, vec![], None);
        let past = ScheduledPost::new("b", None, vec![], Some(now - Duration::minutes(5)));
        let future = ScheduledPost::new("c", None, vec![], Some(now + Duration::minutes(5)));

        assert!(!unscheduled.is_due(now));
        assert!(past.is_due(now));
        assert!(!future.is_due(now));
    }

    #[test]
    fn post_serializes_category_as_tag() {
        let post = Post {
            id: "1".into(),
            text: "gm".into(),
            author: "alice".into(),
            category: Category::Company,
            created_at: Utc::now(),
            metrics: PostMetrics::default(),
            fetched_at: Utc::now(),
            is_used: false,
        };
        let json = serde_json::to_value(&post).unwrap();
        assert_eq!(json["tag"], "company");
        assert_eq!(json["isUsed"], false);
        assert_eq!(json["metrics"]["like_count"], 0);
    }
}
