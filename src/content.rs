/// Content generation
///
/// Wraps a `TextModel` with the two configured Gemini models, the pro-then-flash
/// fallback, and the rewrite bookkeeping against the store.

use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::extract::is_crypto_post;
use crate::gemini::TextModel;
use crate::models::{Category, PostedRecord};
use crate::prompts::{enhanced_rewrite_prompt, rewrite_prompt, ThreadTemplate};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Generation {
    pub content: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    pub requests: u64,
    pub successes: u64,
    pub fallbacks: u64,
    pub failures: u64,
}

#[derive(Default)]
struct UsageCounters {
    requests: AtomicU64,
    successes: AtomicU64,
    fallbacks: AtomicU64,
    failures: AtomicU64,
}

/// Why a rewrite was refused or failed
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("This post is not crypto/airdrop related")]
    NotCrypto,
    #[error("This tweet has already been rewritten and posted")]
    AlreadyRewritten,
    #[error("Tweet already processed")]
    AlreadyUsed,
    #[error("Content generation failed")]
    Generation(#[source] anyhow::Error),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Input shared by both rewrite flavours
#[derive(Debug, Clone)]
pub struct RewriteRequest {
    pub original_text: String,
    pub author: String,
    pub category: Option<Category>,
    pub post_id: Option<String>,
}

pub struct ContentGenerator {
    model: Arc<dyn TextModel>,
    pro_model: String,
    flash_model: String,
    usage: UsageCounters,
}

impl ContentGenerator {
    pub fn new(model: Arc<dyn TextModel>, pro_model: &str, flash_model: &str) -> Self {
        Self {
            model,
            pro_model: pro_model.to_string(),
            flash_model: flash_model.to_string(),
            usage: UsageCounters::default(),
        }
    }

    async fn call(&self, model: &str, prompt: &str) -> Result<Generation> {
        self.usage.requests.fetch_add(1, Ordering::Relaxed);
        match self.model.generate(model, prompt).await {
            Ok(text) => {
                self.usage.successes.fetch_add(1, Ordering::Relaxed);
                Ok(Generation {
                    content: text.trim().to_string(),
                    model: model.to_string(),
                })
            }
            Err(e) => {
                self.usage.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Pro model first; one retry on the flash model
    pub async fn generate_with_fallback(&self, prompt: &str) -> Result<Generation> {
        match self.call(&self.pro_model, prompt).await {
            Ok(generation) => Ok(generation),
            Err(pro_err) => {
                log::error!("{} failed, falling back to {}: {:#}", self.pro_model, self.flash_model, pro_err);
                self.usage.fallbacks.fetch_add(1, Ordering::Relaxed);

                self.call(&self.flash_model, prompt).await.map_err(|flash_err| {
                    log::error!("{} failed: {:#}", self.flash_model, flash_err);
                    anyhow::anyhow!("Both models failed: {:#}; {:#}", pro_err, flash_err)
                })
            }
        }
    }

    pub async fn generate_pro(&self, prompt: &str) -> Result<Generation> {
        self.call(&self.pro_model, prompt).await
    }

    pub async fn generate_flash(&self, prompt: &str) -> Result<Generation> {
        self.call(&self.flash_model, prompt).await
    }

    /// Thread from a catalogue template, with gathered and custom context spliced in
    pub async fn generate_thread(
        &self,
        template: &ThreadTemplate,
        context: &str,
        custom_context: Option<&str>,
    ) -> Result<Generation> {
        let mut context = context.to_string();
        if let Some(custom) = custom_context.filter(|c| !c.trim().is_empty()) {
            context.push_str("\n\nCustom Context:\n");
            context.push_str(custom);
        }
        self.generate_pro(&template.render(&context)).await
    }

    /// Rewrite a crypto post once per (post, author); records what went out
    pub async fn rewrite(
        &self,
        store: &dyn Store,
        request: &RewriteRequest,
    ) -> std::result::Result<Generation, RewriteError> {
        if !is_crypto_post(&request.original_text) {
            return Err(RewriteError::NotCrypto);
        }
        if store
            .posted_record_exists(request.post_id.as_deref(), &request.author)
            .await?
        {
            return Err(RewriteError::AlreadyRewritten);
        }

        let generation = self
            .generate_with_fallback(&rewrite_prompt(&request.original_text, request.category))
            .await
            .map_err(RewriteError::Generation)?;

        store
            .insert_posted_record(&PostedRecord::new(
                request.post_id.clone(),
                &request.author,
                &generation.content,
            ))
            .await?;

        log::info!("Rewrote post by {} with {}", request.author, generation.model);
        Ok(generation)
    }

    /// Rewrite a stored post with the fast model and mark it used
    pub async fn rewrite_enhanced(
        &self,
        store: &dyn Store,
        request: &RewriteRequest,
    ) -> std::result::Result<Generation, RewriteError> {
        if let Some(post_id) = &request.post_id {
            if let Some(post) = store.get_post(post_id).await? {
                if post.is_used {
                    return Err(RewriteError::AlreadyUsed);
                }
            }
        }

        let generation = self
            .generate_flash(&enhanced_rewrite_prompt(&request.original_text, request.category))
            .await
            .map_err(RewriteError::Generation)?;

        if let Some(post_id) = &request.post_id {
            store.mark_post_used(post_id).await?;
        }

        Ok(generation)
    }

    pub fn usage(&self) -> UsageStats {
        UsageStats {
            requests: self.usage.requests.load(Ordering::Relaxed),
            successes: self.usage.successes.load(Ordering::Relaxed),
            fallbacks: self.usage.fallbacks.load(Ordering::Relaxed),
            failures: self.usage.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Post, PostMetrics};
    use crate::prompts::thread_template;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Replies with "<model>: ok" unless the model is listed as down
    #[derive(Default)]
    struct ScriptedModel {
        down: Vec<&'static str>,
        prompts: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl TextModel for ScriptedModel {
        async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((model.to_string(), prompt.to_string()));
            if self.down.contains(&model) {
                anyhow::bail!("{} unavailable", model);
            }
            Ok(format!("  {}: ok \n", model))
        }
    }

    fn generator(down: Vec<&'static str>) -> (Arc<ScriptedModel>, ContentGenerator) {
        let model = Arc::new(ScriptedModel { down, ..Default::default() });
        let generator = ContentGenerator::new(model.clone(), "pro", "flash");
        (model, generator)
    }

    fn request(text: &str, post_id: Option<&str>) -> RewriteRequest {
        RewriteRequest {
            original_text: text.to_string(),
            author: "alice".to_string(),
            category: Some(Category::Influencer),
            post_id: post_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn pro_model_answers_first() {
        let (_, generator) = generator(vec![]);
        let out = generator.generate_with_fallback("hi").await.unwrap();
        assert_eq!(out, Generation { content: "pro: ok".into(), model: "pro".into() });
        assert_eq!(generator.usage().fallbacks, 0);
    }

    #[tokio::test]
    async fn flash_model_covers_pro_failure() {
        let (_, generator) = generator(vec!["pro"]);
        let out = generator.generate_with_fallback("hi").await.unwrap();
        assert_eq!(out.model, "flash");
        assert_eq!(
            generator.usage(),
            UsageStats { requests: 2, successes: 1, fallbacks: 1, failures: 1 }
        );
    }

    #[tokio::test]
    async fn both_models_down_is_an_error() {
        let (_, generator) = generator(vec!["pro", "flash"]);
        let err = generator.generate_with_fallback("hi").await.unwrap_err();
        assert!(err.to_string().starts_with("Both models failed"));
    }

    #[tokio::test]
    async fn thread_gets_custom_context_on_pro() {
        let (model, generator) = generator(vec![]);
        let template = thread_template("alpha_airdrop").unwrap();
        generator
            .generate_thread(template, "MARKET", Some("zkSync snapshot soon"))
            .await
            .unwrap();

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts[0].0, "pro");
        assert!(prompts[0].1.contains("MARKET\n\nCustom Context:\nzkSync snapshot soon"));
    }

    #[tokio::test]
    async fn rewrite_refuses_non_crypto_and_repeats() {
        let (_, generator) = generator(vec![]);
        let store = MemoryStore::new();

        let err = generator.rewrite(&store, &request("lunch time", Some("1"))).await.unwrap_err();
        assert!(matches!(err, RewriteError::NotCrypto));

        let out = generator.rewrite(&store, &request("New airdrop live", Some("1"))).await.unwrap();
        assert_eq!(out.content, "pro: ok");
        assert!(store.posted_record_exists(Some("1"), "alice").await.unwrap());

        let err = generator.rewrite(&store, &request("New airdrop live", Some("1"))).await.unwrap_err();
        assert!(matches!(err, RewriteError::AlreadyRewritten));
    }

    #[tokio::test]
    async fn enhanced_rewrite_marks_post_used() {
        let (model, generator) = generator(vec![]);
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert_post(&Post {
                id: "42".into(),
                text: "claim your tokens".into(),
                author: "alice".into(),
                category: Category::Influencer,
                created_at: now,
                metrics: PostMetrics::default(),
                fetched_at: now,
                is_used: false,
            })
            .await
            .unwrap();

        let out = generator
            .rewrite_enhanced(&store, &request("claim your tokens", Some("42")))
            .await
            .unwrap();
        assert_eq!(out.model, "flash");
        assert!(model.prompts.lock().unwrap()[0].1.starts_with("Rewrite this influencer tweet"));
        assert!(store.get_post("42").await.unwrap().unwrap().is_used);

        let err = generator
            .rewrite_enhanced(&store, &request("claim your tokens", Some("42")))
            .await
            .unwrap_err();
        assert!(matches!(err, RewriteError::AlreadyUsed));
    }
}
