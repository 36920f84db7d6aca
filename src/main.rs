/// Tweet Pipeline
///
/// HTTP backend that:
/// - Keeps a registry of monitored Twitter accounts
/// - Pulls their posts incrementally and scores them for crypto signals
/// - Builds prompts from those posts plus live market data
/// - Drafts tweets and threads with Gemini for manual review and scheduling

use anyhow::Result;
use std::sync::Arc;
use tweet_pipeline::{
    config,
    content::ContentGenerator,
    gemini::{GeminiClient, TextModel},
    http_server::{start_server, AppState},
    market::{MarketFeeds, MarketSource},
    pg_store::PgStore,
    scheduler,
    store::{MemoryStore, Store},
    twitter::{TwitterApi, TwitterClient},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    pretty_env_logger::init();

    log::info!("Starting tweet pipeline...");

    // Load configuration from environment
    let cfg = config::Config::from_env()?;

    // Validate configuration and connections
    cfg.validate().await?;

    let store: Arc<dyn Store> = match &cfg.database_url {
        Some(url) => {
            let store = PgStore::connect(url).await?;
            store.initialize_schema().await?;
            Arc::new(store)
        }
        None => {
            log::warn!("DATABASE_URL not set - using the in-memory store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let twitter: Option<Arc<dyn TwitterApi>> = cfg
        .twitter_bearer_token
        .as_deref()
        .map(|token| Arc::new(TwitterClient::new(&cfg.twitter_api_base, token)) as Arc<dyn TwitterApi>);

    let generator = cfg.gemini_api_key.as_deref().map(|key| {
        let model: Arc<dyn TextModel> = Arc::new(GeminiClient::new(&cfg.gemini_api_base, key));
        Arc::new(ContentGenerator::new(
            model,
            &cfg.gemini_pro_model,
            &cfg.gemini_flash_model,
        ))
    });

    let market: Arc<dyn MarketSource> = Arc::new(MarketFeeds::new()?);

    tokio::spawn(scheduler::start_cleanup_scheduler(
        store.clone(),
        cfg.retention.clone(),
    ));

    let port = cfg.port;
    let state = AppState::new(cfg, store, twitter, generator, market);

    start_server(state, port).await
}
