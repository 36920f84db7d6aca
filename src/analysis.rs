/// Post analysis and prompt context
///
/// Runs the extractor over unused posts, ranks them, and renders the
/// internal half of the generation context. The external half comes from
/// `market`; `combined_context` glues the two together.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::extract::{extract, relevance_score, summarize, Extracted, Summary};
use crate::market::{render_market_prompt, ContextRequest, MarketSource, SOURCES};
use crate::models::{Category, Post};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedPost {
    #[serde(flatten)]
    pub post: Post,
    pub extracted: Extracted,
    pub relevance_score: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub tweets: Vec<AnalyzedPost>,
    pub summary: Summary,
    pub total_analyzed: usize,
}

/// Score posts, highest first; equal scores keep their input order
pub fn rank(posts: Vec<Post>) -> Vec<AnalyzedPost> {
    let mut analyzed: Vec<AnalyzedPost> = posts
        .into_iter()
        .map(|post| {
            let extracted = extract(&post.text);
            let relevance_score = relevance_score(&extracted);
            AnalyzedPost {
                post,
                extracted,
                relevance_score,
            }
        })
        .collect();

    analyzed.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
    analyzed
}

pub async fn analyze_posts(store: &dyn Store, limit: i64) -> Result<Analysis> {
    let posts = store.unused_posts(&Category::ALL, Some(limit)).await?;
    let tweets = rank(posts);
    let summary = summarize(tweets.iter().map(|t| &t.extracted));

    log::info!("Analyzed {} unused posts", tweets.len());

    Ok(Analysis {
        total_analyzed: tweets.len(),
        tweets,
        summary,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyInfo {
    pub tokens: Vec<String>,
    pub keywords: Vec<String>,
    pub dates: Vec<String>,
    pub requirements: Vec<String>,
    pub urls: &'static str,
}

impl From<Extracted> for KeyInfo {
    fn from(e: Extracted) -> Self {
        Self {
            urls: if e.urls.is_empty() { "No links" } else { "Has links" },
            tokens: e.tokens,
            keywords: e.keywords,
            dates: e.dates,
            requirements: e.requirements,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEntry {
    pub author: String,
    pub tag: Category,
    pub text: String,
    pub key_info: KeyInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptContext {
    pub context_data: Vec<ContextEntry>,
    pub structured_prompt: String,
    pub total_tweets: usize,
}

/// Categories feeding a niche: crypto draws on every account, anything else on influencers
pub fn niche_categories(niche: &str) -> &'static [Category] {
    if niche == "crypto" {
        &Category::ALL
    } else {
        &[Category::Influencer]
    }
}

pub fn render_prompt_context(niche: &str, entries: &[ContextEntry]) -> String {
    let body: Vec<String> = entries
        .iter()
        .map(|e| {
            let key_info = serde_json::to_string(&e.key_info).unwrap_or_default();
            format!("{} ({}):\n\"{}\"\nKey Info: {}\n", e.author, e.tag, e.text, key_info)
        })
        .collect();

    format!("Recent {} trends and opportunities:\n\n{}", niche, body.join("\n"))
}

pub async fn prompt_context(store: &dyn Store, niche: &str) -> Result<PromptContext> {
    let posts = store.unused_posts(niche_categories(niche), None).await?;

    let context_data: Vec<ContextEntry> = posts
        .into_iter()
        .map(|post| ContextEntry {
            key_info: extract(&post.text).into(),
            author: post.author,
            tag: post.category,
            text: post.text,
        })
        .collect();

    Ok(PromptContext {
        structured_prompt: render_prompt_context(niche, &context_data),
        total_tweets: context_data.len(),
        context_data,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedContext {
    pub internal_tweets: usize,
    pub external_sources: Vec<&'static str>,
    pub combined_prompt: String,
    pub timestamp: DateTime<Utc>,
}

/// Internal post context followed by the rendered market context
pub async fn combined_context(
    store: &dyn Store,
    market: &dyn MarketSource,
    niche: &str,
) -> Result<CombinedContext> {
    let request = ContextRequest::for_niche(niche);
    let (internal, external) = tokio::join!(prompt_context(store, niche), market.gather(&request));
    let internal = internal?;
    let now = Utc::now();

    Ok(CombinedContext {
        internal_tweets: internal.total_tweets,
        external_sources: SOURCES.to_vec(),
        combined_prompt: internal.structured_prompt + &render_market_prompt(&external, now),
        timestamp: now,
    })
}
