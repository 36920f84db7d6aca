/// External market context
///
/// Best-effort fan-out to free price, trend, news and DeFi feeds. Every feed
/// may fail on its own; a failed feed is logged and contributes nothing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rss::Channel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

const COINGECKO_API: &str = "https://api.coingecko.com/api/v3";
const COINDESK_RSS: &str = "https://www.coindesk.com/arc/outboundfeeds/rss/";
const COINTELEGRAPH_RSS: &str = "https://cointelegraph.com/rss";
const REDDIT_HOT: &str = "https://www.reddit.com/r/CryptoCurrency/hot.json?limit=10";
const DEFILLAMA_PROTOCOLS: &str = "https://api.llama.fi/protocols";

const PRICE_IDS: [&str; 2] = ["bitcoin", "ethereum"];
const TRENDING_LIMIT: usize = 5;
const NEWS_LIMIT: usize = 5;
const PER_SOURCE_NEWS_LIMIT: usize = 3;
const DEFI_LIMIT: usize = 5;

/// Names of the feeds folded into the context
pub const SOURCES: [&str; 3] = ["CoinGecko", "CryptoNews", "DeFiLlama"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoinPrice {
    pub usd: f64,
    #[serde(default)]
    pub usd_24h_change: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingCoin {
    pub name: String,
    pub symbol: String,
    pub rank: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    pub title: String,
    pub link: String,
    pub pub_date: Option<DateTime<Utc>>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefiProtocol {
    pub name: String,
    pub tvl: f64,
    pub change_1d: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendTag {
    pub trend: String,
    pub volume: String,
}

/// Everything gathered for one prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketContext {
    pub timestamp: DateTime<Utc>,
    pub niche: String,
    pub prices: BTreeMap<String, CoinPrice>,
    pub trending: Vec<TrendingCoin>,
    pub news: Vec<NewsItem>,
    pub defi: Vec<DefiProtocol>,
    pub twitter_trends: Vec<TrendTag>,
}

impl MarketContext {
    pub fn empty(niche: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            niche: niche.to_string(),
            prices: BTreeMap::new(),
            trending: Vec::new(),
            news: Vec::new(),
            defi: Vec::new(),
            twitter_trends: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextRequest {
    pub niche: String,
    pub include_news: bool,
    pub include_prices: bool,
}

impl ContextRequest {
    pub fn for_niche(niche: &str) -> Self {
        Self {
            niche: niche.to_string(),
            include_news: true,
            include_prices: true,
        }
    }
}

#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Gather whatever can be gathered; never fails
    async fn gather(&self, request: &ContextRequest) -> MarketContext;
}

/// Live feeds over HTTP
pub struct MarketFeeds {
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TrendingResponse {
    coins: Vec<TrendingEntry>,
}

#[derive(Debug, Deserialize)]
struct TrendingEntry {
    item: TrendingItem,
}

#[derive(Debug, Deserialize)]
struct TrendingItem {
    name: String,
    symbol: String,
    market_cap_rank: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RedditListing {
    data: RedditListingData,
}

#[derive(Debug, Deserialize)]
struct RedditListingData {
    children: Vec<RedditChild>,
}

#[derive(Debug, Deserialize)]
struct RedditChild {
    data: RedditPost,
}

#[derive(Debug, Deserialize)]
struct RedditPost {
    title: String,
    permalink: String,
    created_utc: f64,
    #[serde(default)]
    score: i64,
}

#[derive(Debug, Deserialize)]
struct LlamaProtocol {
    name: String,
    tvl: Option<f64>,
    change_1d: Option<f64>,
}

impl MarketFeeds {
    pub fn new() -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("tweet_pipeline/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { http_client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("{} answered {}", url, status);
        }
        Ok(response)
    }

    async fn prices(&self) -> Result<BTreeMap<String, CoinPrice>> {
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd&include_24hr_change=true",
            COINGECKO_API,
            PRICE_IDS.join(",")
        );
        self.get(&url)
            .await?
            .json()
            .await
            .context("Failed to parse CoinGecko prices")
    }

    async fn trending(&self) -> Result<Vec<TrendingCoin>> {
        let response: TrendingResponse = self
            .get(&format!("{}/search/trending", COINGECKO_API))
            .await?
            .json()
            .await
            .context("Failed to parse CoinGecko trending")?;

        Ok(response
            .coins
            .into_iter()
            .take(TRENDING_LIMIT)
            .map(|c| TrendingCoin {
                name: c.item.name,
                symbol: c.item.symbol,
                rank: c.item.market_cap_rank,
            })
            .collect())
    }

    async fn rss(&self, url: &str, source: &str) -> Result<Vec<NewsItem>> {
        let body = self.get(url).await?.text().await?;
        let mut items = parse_rss(&body, source)?;
        items.truncate(PER_SOURCE_NEWS_LIMIT);
        Ok(items)
    }

    async fn reddit(&self) -> Result<Vec<NewsItem>> {
        let listing: RedditListing = self
            .get(REDDIT_HOT)
            .await?
            .json()
            .await
            .context("Failed to parse Reddit listing")?;
        Ok(reddit_items(listing, PER_SOURCE_NEWS_LIMIT))
    }

    async fn news(&self) -> Vec<NewsItem> {
        let (coindesk, cointelegraph, reddit) = tokio::join!(
            best_effort("CoinDesk RSS", self.rss(COINDESK_RSS, "CoinDesk")),
            best_effort("CoinTelegraph RSS", self.rss(COINTELEGRAPH_RSS, "CoinTelegraph")),
            best_effort("Reddit trending", self.reddit()),
        );
        merge_news([coindesk, cointelegraph, reddit], NEWS_LIMIT)
    }

    async fn defi(&self) -> Result<Vec<DefiProtocol>> {
        let protocols: Vec<LlamaProtocol> = self
            .get(DEFILLAMA_PROTOCOLS)
            .await?
            .json()
            .await
            .context("Failed to parse DeFiLlama protocols")?;

        Ok(protocols
            .into_iter()
            .take(DEFI_LIMIT)
            .map(|p| DefiProtocol {
                name: p.name,
                tvl: p.tvl.unwrap_or_default(),
                change_1d: p.change_1d,
            })
            .collect())
    }
}

#[async_trait]
impl MarketSource for MarketFeeds {
    async fn gather(&self, request: &ContextRequest) -> MarketContext {
        let mut context = MarketContext::empty(&request.niche);
        if request.niche != "crypto" {
            return context;
        }

        let prices = async {
            if request.include_prices {
                best_effort("CoinGecko prices", self.prices()).await
            } else {
                BTreeMap::new()
            }
        };
        let news = async {
            if request.include_news {
                self.news().await
            } else {
                Vec::new()
            }
        };

        let (prices, trending, news, defi) = tokio::join!(
            prices,
            best_effort("CoinGecko trending", self.trending()),
            news,
            best_effort("DeFiLlama protocols", self.defi()),
        );

        context.prices = prices;
        context.trending = trending;
        context.news = news;
        context.defi = defi;
        context.twitter_trends = evergreen_trends();
        context
    }
}

async fn best_effort<T: Default>(label: &str, fut: impl Future<Output = Result<T>>) -> T {
    match fut.await {
        Ok(value) => value,
        Err(e) => {
            log::error!("{} unavailable: {:#}", label, e);
            T::default()
        }
    }
}

/// Fixed tags standing in for live trends, which the app-only API tier does not expose
fn evergreen_trends() -> Vec<TrendTag> {
    [("#Bitcoin", "High"), ("#Ethereum", "Medium"), ("#DeFi", "Medium")]
        .into_iter()
        .map(|(trend, volume)| TrendTag {
            trend: trend.to_string(),
            volume: volume.to_string(),
        })
        .collect()
}

fn non_empty(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Title, link and publication date of each titled item in an RSS 2.0 document
pub fn parse_rss(body: &str, source: &str) -> Result<Vec<NewsItem>> {
    let channel = Channel::read_from(body.as_bytes())
        .with_context(|| format!("Failed to parse {} RSS feed", source))?;

    Ok(channel
        .items()
        .iter()
        .filter_map(|item| {
            Some(NewsItem {
                title: non_empty(item.title())?,
                link: non_empty(item.link()).unwrap_or_default(),
                pub_date: item
                    .pub_date()
                    .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok())
                    .map(|d| d.with_timezone(&Utc)),
                source: source.to_string(),
                score: None,
            })
        })
        .collect())
}

fn reddit_items(listing: RedditListing, limit: usize) -> Vec<NewsItem> {
    listing
        .data
        .children
        .into_iter()
        .take(limit)
        .map(|child| NewsItem {
            title: child.data.title,
            link: format!("https://reddit.com{}", child.data.permalink),
            pub_date: DateTime::<Utc>::from_timestamp(child.data.created_utc as i64, 0),
            source: "Reddit r/CryptoCurrency".to_string(),
            score: Some(child.data.score),
        })
        .collect()
}

/// Newest first across all sources; undated items sink to the end
pub fn merge_news(sources: impl IntoIterator<Item = Vec<NewsItem>>, limit: usize) -> Vec<NewsItem> {
    let mut all: Vec<NewsItem> = sources.into_iter().flatten().collect();
    all.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
    all.truncate(limit);
    all
}

/// Compact age label: minutes, hours, or days
pub fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now - then;
    let hours = elapsed.num_hours();
    if hours > 24 {
        format!("{}d ago", hours / 24)
    } else if hours > 0 {
        format!("{}h ago", hours)
    } else {
        format!("{}m ago", elapsed.num_minutes())
    }
}

fn signed_percent(change: f64) -> String {
    if change > 0.0 {
        format!("+{:.2}%", change)
    } else {
        format!("{:.2}%", change)
    }
}

/// Render the gathered context as prompt text
pub fn render_market_prompt(context: &MarketContext, now: DateTime<Utc>) -> String {
    let mut prompt = format!("\n\nCurrent Market Context ({}):\n", now.format("%-m/%-d/%Y"));

    if !context.prices.is_empty() {
        prompt.push_str("\nPrices:\n");
        for (coin, price) in &context.prices {
            match price.usd_24h_change {
                Some(change) => prompt.push_str(&format!(
                    "- {}: ${} ({} 24h)\n",
                    coin,
                    price.usd,
                    signed_percent(change)
                )),
                None => prompt.push_str(&format!("- {}: ${}\n", coin, price.usd)),
            }
        }
    }

    if !context.trending.is_empty() {
        let symbols: Vec<String> = context
            .trending
            .iter()
            .map(|c| format!("${}", c.symbol))
            .collect();
        prompt.push_str(&format!("\nTrending: {}\n", symbols.join(", ")));
    }

    if !context.news.is_empty() {
        prompt.push_str("\nBreaking/Trending News:\n");
        for article in context.news.iter().take(4) {
            match article.pub_date {
                Some(published) => prompt.push_str(&format!(
                    "- {} ({} - {})\n",
                    article.title,
                    article.source,
                    time_ago(published, now)
                )),
                None => prompt.push_str(&format!("- {} ({})\n", article.title, article.source)),
            }
        }
    }

    if !context.twitter_trends.is_empty() {
        let trends: Vec<&str> = context
            .twitter_trends
            .iter()
            .map(|t| t.trend.as_str())
            .collect();
        prompt.push_str(&format!("\nTwitter Trending: {}\n", trends.join(", ")));
    }

    if !context.defi.is_empty() {
        prompt.push_str("\nTop DeFi Protocols:\n");
        for protocol in context.defi.iter().take(3) {
            prompt.push_str(&format!(
                "- {}: ${:.1}B TVL\n",
                protocol.name,
                protocol.tvl / 1e9
            ));
        }
    }

    prompt
}
