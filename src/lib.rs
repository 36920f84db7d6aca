/// Tweet Pipeline Library
///
/// Backend for a crypto social-media content pipeline: monitored Twitter
/// accounts are polled into a store, posts are scored with regex signals,
/// and Gemini drafts new content from those signals plus live market data.

pub mod analysis;
pub mod config;
pub mod content;
pub mod error;
pub mod extract;
pub mod gemini;
pub mod http_server;
pub mod ingest;
pub mod market;
pub mod models;
pub mod pg_store;
pub mod prompts;
pub mod scheduler;
pub mod store;
pub mod twitter;
