use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

const DEFAULT_LISTEN: &str = "0.0.0.0:8080";

const DEFAULT_POOL_MAX_SIZE: u32 = 25;
const DEFAULT_POOL_MIN_IDLE: u32 = 5;
const DEFAULT_POOL_MAX_LIFETIME_SECS: u64 = 60 * 60;
const DEFAULT_POOL_IDLE_TIMEOUT_SECS: u64 = 30 * 60;

/// Readability fetch deadline
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 5;
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.36";
const DEFAULT_MAX_META_REFRESH: usize = 5;

const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_GENERATION_MODEL: &str = "gemini-2.5-flash-lite";
const DEFAULT_AI_TIMEOUT_SECS: u64 = 30;
/// Characters of article text sent to the enrichment prompt
const DEFAULT_ENRICHMENT_WINDOW: usize = 8000;

const DEFAULT_GEMINI_EMBEDDING_MODEL: &str = "gemini-embedding-001";
/// Local fallback model; bge-base produces 768 dimensions
const DEFAULT_LOCAL_EMBEDDING_MODEL: &str = "bge-base-en-v1.5";
pub const EMBEDDING_DIMENSIONS: usize = 768;

const DEFAULT_PAGE_SIZE: usize = 5;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

/// Database file and connection pool sizing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Relative paths are resolved against the data directory
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_pool_max_size")]
    pub max_connections: u32,

    #[serde(default = "default_pool_min_idle")]
    pub min_idle: u32,

    #[serde(default = "default_pool_max_lifetime_secs")]
    pub max_lifetime_secs: u64,

    #[serde(default = "default_pool_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: DEFAULT_POOL_MAX_SIZE,
            min_idle: DEFAULT_POOL_MIN_IDLE,
            max_lifetime_secs: DEFAULT_POOL_MAX_LIFETIME_SECS,
            idle_timeout_secs: DEFAULT_POOL_IDLE_TIMEOUT_SECS,
        }
    }
}

fn default_db_path() -> String {
    "bookshelf.db".to_string()
}

fn default_pool_max_size() -> u32 {
    DEFAULT_POOL_MAX_SIZE
}

fn default_pool_min_idle() -> u32 {
    DEFAULT_POOL_MIN_IDLE
}

fn default_pool_max_lifetime_secs() -> u64 {
    DEFAULT_POOL_MAX_LIFETIME_SECS
}

fn default_pool_idle_timeout_secs() -> u64 {
    DEFAULT_POOL_IDLE_TIMEOUT_SECS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// How many `<meta http-equiv="refresh">` hops to follow
    #[serde(default = "default_max_meta_refresh")]
    pub max_meta_refresh: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            user_agent: default_user_agent(),
            max_meta_refresh: DEFAULT_MAX_META_REFRESH,
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_max_meta_refresh() -> usize {
    DEFAULT_MAX_META_REFRESH
}

/// Generative model settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Falls back to the `GEMINI_API_KEY` environment variable
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_enrichment_window")]
    pub enrichment_window: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: default_gemini_base_url(),
            model: default_generation_model(),
            api_key: None,
            timeout_secs: DEFAULT_AI_TIMEOUT_SECS,
            enrichment_window: DEFAULT_ENRICHMENT_WINDOW,
        }
    }
}

fn default_gemini_base_url() -> String {
    DEFAULT_GEMINI_BASE_URL.to_string()
}

fn default_generation_model() -> String {
    DEFAULT_GENERATION_MODEL.to_string()
}

fn default_ai_timeout_secs() -> u64 {
    DEFAULT_AI_TIMEOUT_SECS
}

fn default_enrichment_window() -> usize {
    DEFAULT_ENRICHMENT_WINDOW
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Gemini,
    Local,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: EmbeddingProvider,

    /// Model name; defaults depend on the provider
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Gemini,
            model: None,
            dimensions: EMBEDDING_DIMENSIONS,
        }
    }
}

impl EmbeddingsConfig {
    pub fn model_name(&self) -> &str {
        match (&self.model, self.provider) {
            (Some(model), _) => model,
            (None, EmbeddingProvider::Gemini) => DEFAULT_GEMINI_EMBEDDING_MODEL,
            (None, EmbeddingProvider::Local) => DEFAULT_LOCAL_EMBEDDING_MODEL,
        }
    }
}

fn default_embedding_provider() -> EmbeddingProvider {
    EmbeddingProvider::Gemini
}

fn default_embedding_dimensions() -> usize {
    EMBEDDING_DIMENSIONS
}

/// Per-user quotas
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Lifetime bookmark cap for users who have not verified their email
    #[serde(default = "default_unverified_total")]
    pub unverified_total: i64,

    #[serde(default = "default_free_daily")]
    pub free_daily: i64,

    #[serde(default = "default_premium_daily")]
    pub premium_daily: i64,

    #[serde(default = "default_ai_free_daily")]
    pub ai_free_daily: i64,

    #[serde(default = "default_ai_premium_daily")]
    pub ai_premium_daily: i64,

    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            unverified_total: default_unverified_total(),
            free_daily: default_free_daily(),
            premium_daily: default_premium_daily(),
            ai_free_daily: default_ai_free_daily(),
            ai_premium_daily: default_ai_premium_daily(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

fn default_unverified_total() -> i64 {
    10
}

fn default_free_daily() -> i64 {
    20
}

fn default_premium_daily() -> i64 {
    100
}

fn default_ai_free_daily() -> i64 {
    5
}

fn default_ai_premium_daily() -> i64 {
    50
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

/// Unauthenticated extraction endpoint throttling
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DemoConfig {
    #[serde(default = "default_demo_attempts")]
    pub attempts: usize,

    #[serde(default = "default_demo_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_demo_cleanup_secs")]
    pub cleanup_secs: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            attempts: default_demo_attempts(),
            window_secs: default_demo_window_secs(),
            cleanup_secs: default_demo_cleanup_secs(),
        }
    }
}

fn default_demo_attempts() -> usize {
    3
}

fn default_demo_window_secs() -> u64 {
    15 * 60
}

fn default_demo_cleanup_secs() -> u64 {
    60
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,

    /// Pending jobs picked up per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Relative paths are resolved against the data directory
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,

    /// Jobs left in `processing` longer than this are failed on startup
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            poll_secs: default_poll_secs(),
            batch_size: default_batch_size(),
            uploads_dir: default_uploads_dir(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

fn default_poll_secs() -> u64 {
    5
}

fn default_batch_size() -> usize {
    3
}

fn default_uploads_dir() -> String {
    "uploads".to_string()
}

fn default_stale_after_secs() -> u64 {
    60 * 60
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub demo: DemoConfig,
    #[serde(default)]
    pub import: ImportConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        let db = &self.database;
        if db.max_connections == 0 {
            bail!("database.max_connections must be greater than 0");
        }
        if db.min_idle > db.max_connections {
            bail!(
                "database.min_idle ({}) cannot exceed database.max_connections ({})",
                db.min_idle,
                db.max_connections
            );
        }

        if self.fetch.timeout_secs == 0 {
            bail!("fetch.timeout_secs must be greater than 0");
        }

        if self.ai.enrichment_window == 0 {
            bail!("ai.enrichment_window must be greater than 0");
        }

        if self.embeddings.dimensions != EMBEDDING_DIMENSIONS {
            bail!(
                "embeddings.dimensions must be {EMBEDDING_DIMENSIONS}, got {}",
                self.embeddings.dimensions
            );
        }

        let limits = &self.limits;
        for (name, value) in [
            ("limits.unverified_total", limits.unverified_total),
            ("limits.free_daily", limits.free_daily),
            ("limits.premium_daily", limits.premium_daily),
            ("limits.ai_free_daily", limits.ai_free_daily),
            ("limits.ai_premium_daily", limits.ai_premium_daily),
        ] {
            if value < 0 {
                bail!("{name} cannot be negative, got {value}");
            }
        }
        if limits.page_size == 0 {
            bail!("limits.page_size must be greater than 0");
        }

        if self.demo.attempts == 0 || self.demo.window_secs == 0 || self.demo.cleanup_secs == 0 {
            bail!("demo.attempts, demo.window_secs and demo.cleanup_secs must be greater than 0");
        }

        if self.import.poll_secs == 0 || self.import.batch_size == 0 {
            bail!("import.poll_secs and import.batch_size must be greater than 0");
        }

        Ok(())
    }

    /// Data directory from `BOOKSHELF_DATA_DIR`, else `~/.local/share/bookshelf`.
    pub fn default_base_path() -> anyhow::Result<PathBuf> {
        if let Ok(path) = std::env::var("BOOKSHELF_DATA_DIR") {
            return Ok(PathBuf::from(path));
        }

        let home = homedir::my_home()
            .context("could not determine home directory")?
            .context("home directory path is empty")?;
        Ok(home.join(".local/share/bookshelf"))
    }

    pub fn load() -> anyhow::Result<Self> {
        let base_path = Self::default_base_path()?;
        Self::load_with(&base_path)
    }

    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        let config_path = base_path.join("config.yaml");

        // create new if does not exist
        if !config_path.exists() {
            std::fs::write(&config_path, serde_yml::to_string(&Self::default())?)
                .with_context(|| format!("failed to write {}", config_path.display()))?;
        }

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();
        config.apply_env();
        config.validate()?;

        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(listen) = std::env::var("BOOKSHELF_LISTEN") {
            self.server.listen = listen;
        }
        if self.ai.api_key.is_none() {
            self.ai.api_key = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve(&self.database.path)
    }

    pub fn uploads_path(&self) -> PathBuf {
        self.resolve(&self.import.uploads_dir)
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }
}
