pub mod context;
pub mod demo_limiter;
pub mod errors;
pub mod factory;
pub mod importer;
pub mod limits;
pub mod orchestrator;
pub mod rag;
pub mod search;
pub mod task_runner;

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    ai::{Enricher, Generator},
    config::Config,
    models::ImportJob,
    scrape::ContentFetcher,
    semantic::Embedder,
    store::Store,
};

pub use factory::AppFactory;

use self::{
    context::RequestContext,
    errors::AppError,
    importer::{ImportProcessor, IMPORT_OPTIONS},
    limits::RateLimiter,
    orchestrator::Ingestor,
    rag::{Answer, RagEngine},
    search::SearchEngine,
    task_runner::ImportWorker,
};

static SOURCE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_-]{1,32}$").expect("Failed to compile source name regex"));

/// External collaborators the services are built on. Tests swap in fakes.
#[derive(Clone)]
pub struct Providers {
    pub fetcher: Arc<dyn ContentFetcher>,
    pub generator: Option<Arc<dyn Generator>>,
    pub embedder: Option<Arc<dyn Embedder>>,
}

/// Every core service wired around one store.
#[derive(Clone)]
pub struct App {
    pub config: Arc<Config>,
    pub store: Store,
    pub limiter: RateLimiter,
    pub ingestor: Ingestor,
    pub search: SearchEngine,
    pub rag: RagEngine,
    pub importer: ImportProcessor,
}

impl App {
    pub fn new(config: Config, store: Store, providers: Providers) -> Self {
        let limiter = RateLimiter::new(store.clone(), config.limits.clone());
        let enricher = providers
            .generator
            .clone()
            .map(|generator| Arc::new(Enricher::new(generator, config.ai.enrichment_window)));

        let ingestor = Ingestor::new(
            store.clone(),
            limiter.clone(),
            providers.fetcher,
            enricher,
            providers.embedder.clone(),
        );
        let search = SearchEngine::new(store.clone(), providers.embedder);
        let rag = RagEngine::new(store.clone(), search.clone(), providers.generator);
        let importer = ImportProcessor::new(store.clone(), ingestor.clone());

        Self {
            config: Arc::new(config),
            store,
            limiter,
            ingestor,
            search,
            rag,
            importer,
        }
    }

    pub fn import_worker(&self) -> ImportWorker {
        ImportWorker::new(self.store.clone(), self.importer.clone(), &self.config.import)
    }

    /// Answer a question for the context's user, who must be verified and
    /// premium. Counts against their daily quota before any retrieval work.
    pub async fn ask(&self, ctx: &RequestContext, question: &str) -> Result<Answer, AppError> {
        let user = ctx.user()?;
        if !user.email_verified || !user.is_premium() {
            return Err(AppError::PremiumRequired);
        }
        if question.trim().is_empty() {
            return Err(AppError::InvalidInput("question is required".to_string()));
        }

        let count = self.limiter.consume_ai_question(ctx, user).await?;
        log::debug!("user {} asked question {count} today", user.id);
        self.rag.ask(ctx, user, question).await
    }

    /// Store an uploaded export of the context's user and queue a pending job for it.
    pub async fn enqueue_import(
        &self,
        ctx: &RequestContext,
        source: &str,
        option: &str,
        data: Vec<u8>,
    ) -> Result<ImportJob, AppError> {
        let source = source.trim().to_lowercase();
        if !SOURCE_NAME.is_match(&source) {
            return Err(AppError::InvalidInput(format!("invalid import source {source:?}")));
        }
        if !IMPORT_OPTIONS.contains(&option) {
            return Err(AppError::InvalidInput(format!(
                "import option must be one of {}",
                IMPORT_OPTIONS.join(", ")
            )));
        }
        if data.is_empty() {
            return Err(AppError::InvalidInput("import file is empty".to_string()));
        }
        let user_id = ctx.user()?.id;

        let path = importer::upload_path(&self.config.uploads_path(), user_id, &source);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;

        let job = self
            .store
            .create_job(ctx, user_id, &source, option, &path.to_string_lossy())
            .await?;
        log::info!("queued {source} import {} for user {user_id}", job.id);
        Ok(job)
    }

    /// The user's bookmarks as a re-importable Pocket-style ZIP.
    pub async fn export(&self, ctx: &RequestContext) -> Result<Vec<u8>, AppError> {
        let user_id = ctx.user()?.id;
        let items = self.store.all_for_user(ctx, user_id).await?;
        log::info!("exporting {} bookmarks for user {user_id}", items.len());
        ctx.run(async move {
            tokio::task::spawn_blocking(move || importer::export_pocket_zip(&items))
                .await
                .map_err(|err| AppError::Other(anyhow::anyhow!("export task failed: {err}")))?
                .map_err(AppError::from)
        })
        .await
    }
}
