/// Twitter API v2 client
///
/// Looks up accounts by handle and reads their timelines using app-only
/// Bearer Token authentication.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Response;
use serde::{Deserialize, Serialize};

use crate::models::is_valid_username;

/// Requests outside this window are rejected by the timeline endpoint
const TIMELINE_MIN_RESULTS: u32 = 5;
const TIMELINE_MAX_RESULTS: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwitterUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub id: String,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub public_metrics: Option<TweetMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TweetMetrics {
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub retweet_count: i64,
    #[serde(default)]
    pub reply_count: i64,
}

/// Timeline read parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineQuery {
    /// Number of posts wanted
    pub max_results: u32,
    /// Only posts created at or after this instant
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct UserLookupResponse {
    data: Option<TwitterUser>,
}

#[derive(Debug, Deserialize)]
struct TimelineResponse {
    data: Option<Vec<Tweet>>,
}

#[async_trait]
pub trait TwitterApi: Send + Sync {
    /// Resolve a handle; `None` when the account does not exist
    async fn lookup_user(&self, username: &str) -> Result<Option<TwitterUser>>;

    /// Most recent original posts (no retweets or replies), newest first
    async fn user_timeline(&self, user_id: &str, query: TimelineQuery) -> Result<Vec<Tweet>>;
}

pub struct TwitterClient {
    http_client: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

impl TwitterClient {
    pub fn new(base_url: &str, bearer_token: &str) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.trim().to_string(),
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        log::debug!("GET {} {:?}", url, query);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .query(query)
            .send()
            .await
            .context("Failed to reach Twitter API")?;

        check_response(response).await
    }
}

/// Clamp a wanted count into the window the timeline endpoint accepts
pub fn wire_max_results(wanted: u32) -> u32 {
    wanted.clamp(TIMELINE_MIN_RESULTS, TIMELINE_MAX_RESULTS)
}

#[async_trait]
impl TwitterApi for TwitterClient {
    async fn lookup_user(&self, username: &str) -> Result<Option<TwitterUser>> {
        if !is_valid_username(username) {
            return Ok(None);
        }
        let response = self
            .get(&format!("/2/users/by/username/{}", username), &[])
            .await?;

        let lookup: UserLookupResponse = response
            .json()
            .await
            .context("Failed to parse Twitter user lookup response")?;

        Ok(lookup.data)
    }

    async fn user_timeline(&self, user_id: &str, query: TimelineQuery) -> Result<Vec<Tweet>> {
        let mut params = vec![
            ("max_results", wire_max_results(query.max_results).to_string()),
            ("exclude", "retweets,replies".to_string()),
            ("tweet.fields", "created_at,public_metrics".to_string()),
        ];
        if let Some(start_time) = query.start_time {
            params.push(("start_time", start_time.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)));
        }

        let response = self
            .get(&format!("/2/users/{}/tweets", user_id), &params)
            .await?;

        let timeline: TimelineResponse = response
            .json()
            .await
            .context("Failed to parse Twitter timeline response")?;

        let mut tweets = timeline.data.unwrap_or_default();
        tweets.truncate(query.max_results as usize);
        Ok(tweets)
    }
}

/// Turn non-success statuses into descriptive errors and log rate limit headroom
async fn check_response(response: Response) -> Result<Response> {
    let rate_limit_remaining = response
        .headers()
        .get("x-rate-limit-remaining")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<u32>().ok());

    let rate_limit_reset = response
        .headers()
        .get("x-rate-limit-reset")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<i64>().ok());

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        anyhow::bail!("{}", describe_failure(status.as_u16(), &text, rate_limit_reset, Utc::now()));
    }

    if let Some(remaining) = rate_limit_remaining {
        log::info!("Twitter API rate limit: {} requests remaining", remaining);
        if remaining < 5 {
            log::warn!("Low Twitter rate limit remaining ({})", remaining);
        }
    }

    Ok(response)
}

fn describe_failure(
    status: u16,
    body: &str,
    rate_limit_reset: Option<i64>,
    now: DateTime<Utc>,
) -> String {
    match status {
        401 => format!(
            "Unauthorized (401): invalid or missing Bearer Token. \
            Check TWITTER_BEARER_TOKEN. API Response: {}",
            body
        ),
        403 => format!(
            "Forbidden (403): the Bearer Token has no access to this endpoint. API Response: {}",
            body
        ),
        429 => {
            let reset_info = match rate_limit_reset
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0).map(|at| (ts, at)))
            {
                Some((ts, reset_time)) => {
                    let wait_seconds = (ts - now.timestamp()).max(0);
                    format!(
                        "Rate limit resets at {} (in about {} minutes)",
                        reset_time.format("%Y-%m-%d %H:%M:%S UTC"),
                        wait_seconds / 60
                    )
                }
                None => "Wait 15 minutes before retrying".to_string(),
            };
            format!("Rate Limited (429): too many requests. {}", reset_info)
        }
        _ => format!("Twitter API error: {} - {}", status, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_handles_never_reach_the_api() {
        // Nothing listens on the discard port; a request would fail
        let client = TwitterClient::new("http://127.0.0.1:9", "token");
        for handle in ["alice?max_results=100", "../2/tweets", "a/b"] {
            assert_eq!(client.lookup_user(handle).await.unwrap(), None);
        }
    }

    #[test]
    fn max_results_clamped_to_api_window() {
        assert_eq!(wire_max_results(2), 5);
        assert_eq!(wire_max_results(10), 10);
        assert_eq!(wire_max_results(500), 100);
    }

    #[test]
    fn rate_limit_message_reports_reset() {
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let msg = describe_failure(429, "", Some(1_700_000_600), now);
        assert!(msg.starts_with("Rate Limited (429)"));
        assert!(msg.contains("in about 10 minutes"));

        let msg = describe_failure(429, "", None, now);
        assert!(msg.contains("15 minutes"));
    }

    #[test]
    fn other_statuses_include_body() {
        let now = Utc::now();
        assert!(describe_failure(401, "bad token", None, now).contains("bad token"));
        assert!(describe_failure(503, "down", None, now).contains("503 - down"));
    }

    #[test]
    fn timeline_payload_parses() {
        let body = r#"{
            "data": [
                {"id": "2", "text": "gm", "created_at": "2024-05-01T10:00:00.000Z",
                 "public_metrics": {"like_count": 4, "retweet_count": 1, "reply_count": 0, "quote_count": 0}},
                {"id": "1", "text": "hello", "created_at": "2024-04-30T10:00:00.000Z"}
            ],
            "meta": {"result_count": 2}
        }"#;
        let parsed: TimelineResponse = serde_json::from_str(body).unwrap();
        let tweets = parsed.data.unwrap();
        assert_eq!(tweets.len(), 2);
        assert_eq!(tweets[0].public_metrics.unwrap().like_count, 4);
        assert!(tweets[1].public_metrics.is_none());
    }

    #[test]
    fn missing_user_has_no_data() {
        let body = r#"{"errors": [{"detail": "Could not find user"}]}"#;
        let parsed: UserLookupResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.data.is_none());
    }
}
