//! Scenario tests against a real SQLite store with in-process fakes for the
//! network-facing collaborators.

mod ingest;
mod search;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    ai::Generator,
    app::{context::RequestContext, errors::AppError, App, Providers},
    config::{Config, EMBEDDING_DIMENSIONS},
    models::{Item, NewItem, Source, SubscriptionStatus, User},
    scrape::ContentFetcher,
    semantic::{
        embeddings::{EmbeddingError, EmbeddingRequest},
        Embedder,
    },
    store::Store,
};

pub const ANSWER: &str = "Ownership is explained in the saved article about Rust.";

pub fn article_html(title: &str, body: &str) -> String {
    format!(
        "<html lang=\"en\"><head><title>{title}</title></head>\
         <body><nav>Home</nav><article><p>{body}</p></article></body></html>"
    )
}

/// Serves registered pages, and a generic article for any other URL.
#[derive(Default)]
pub struct FakeFetcher {
    pages: Mutex<HashMap<String, String>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn add_page(&self, url: &str, title: &str, body: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), article_html(title, body));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentFetcher for FakeFetcher {
    async fn fetch(&self, _ctx: &RequestContext, url: &str) -> Result<String, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let page = self.pages.lock().unwrap().get(url).cloned();
        Ok(page.unwrap_or_else(|| {
            article_html(
                &format!("Saved page {url}"),
                "A generic article body with enough words to be worth keeping around.",
            )
        }))
    }
}

/// Answers enrichment prompts with well-formed sections and anything else
/// with `ANSWER`. Can be switched into a failing mode.
#[derive(Default)]
pub struct FakeGenerator {
    failing: AtomicBool,
    prompts: Mutex<Vec<String>>,
}

impl FakeGenerator {
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(&self, _ctx: &RequestContext, prompt: &str) -> Result<String, AppError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::AI("connection reset by peer".to_string()));
        }

        if let Some((_, article)) = prompt.split_once("Article:\n") {
            let article = article.trim();
            return Ok(format!(
                "===MARKDOWN===\n# Notes\n\n{article}\n===END MARKDOWN===\n\
                 ===SUMMARY===\nA summary of the article.\n===END SUMMARY===\n\
                 ===EXCERPT===\n{article}\n===END EXCERPT===\n\
                 ===TAGS===\nReading, Notes\n===END TAGS===\n"
            ));
        }
        Ok(ANSWER.to_string())
    }
}

/// Bag-of-words vectors: identical word sets embed to identical directions.
#[derive(Default)]
pub struct FakeEmbedder {
    failing: AtomicBool,
}

impl FakeEmbedder {
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

fn bucket(word: &str) -> usize {
    word.bytes()
        .fold(17usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize))
        % EMBEDDING_DIMENSIONS
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<Vec<f32>, EmbeddingError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Transport("connection reset by peer".to_string()));
        }

        let text = format!("{} {}", request.title.unwrap_or_default(), request.text).to_lowercase();
        let mut vector = vec![0.0f32; EMBEDDING_DIMENSIONS];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            vector[bucket(word)] += 1.0;
        }
        Ok(vector)
    }
}

pub struct TestEnv {
    pub app: App,
    pub fetcher: Arc<FakeFetcher>,
    pub generator: Arc<FakeGenerator>,
    pub embedder: Arc<FakeEmbedder>,
    pub tmp: tempfile::TempDir,
}

impl TestEnv {
    pub fn store(&self) -> &Store {
        &self.app.store
    }

    pub async fn user(&self, email: &str, verified: bool, status: SubscriptionStatus) -> User {
        self.store()
            .create_user(&RequestContext::anonymous(), email, verified, status)
            .await
            .expect("failed to create user")
    }

    /// Insert an item directly, bypassing fetch, quotas and enrichment.
    pub async fn seed_item(&self, user: &User, link: &str, title: &str) -> Item {
        let new = NewItem {
            user_id: user.id,
            source: Source::Web,
            link: link.to_string(),
            title: title.to_string(),
            excerpt: String::new(),
            image_url: String::new(),
            site_name: String::new(),
            article_lang: "en".to_string(),
            published_time: None,
            content: format!("Content of {title}"),
        };
        self.store()
            .create(&RequestContext::anonymous(), new, None)
            .await
            .expect("failed to seed item")
    }
}

pub fn create_env() -> TestEnv {
    create_env_with(|_| {})
}

/// Isolated app in its own temp directory; `tune` adjusts the config first.
pub fn create_env_with(tune: impl FnOnce(&mut Config)) -> TestEnv {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let mut config = Config::load_with(tmp.path()).expect("failed to load config");
    config.database.max_connections = 4;
    config.database.min_idle = 1;
    tune(&mut config);

    let store = Store::open(&config.database_path(), &config.database).expect("failed to open store");
    let fetcher = Arc::new(FakeFetcher::default());
    let generator = Arc::new(FakeGenerator::default());
    let embedder = Arc::new(FakeEmbedder::default());

    let providers = Providers {
        fetcher: fetcher.clone(),
        generator: Some(generator.clone()),
        embedder: Some(embedder.clone()),
    };

    TestEnv {
        app: App::new(config, store, providers),
        fetcher,
        generator,
        embedder,
        tmp,
    }
}
