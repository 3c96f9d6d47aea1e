use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};

use crate::{
    ai::{GeminiClient, Generator},
    app::{App, Providers},
    config::{Config, EmbeddingProvider},
    scrape::HttpFetcher,
    semantic::{Embedder, GeminiEmbedder},
    store::Store,
};

/// Builds the application from configuration.
pub struct AppFactory;

impl AppFactory {
    /// Open the database and construct the production clients.
    pub fn create_app(config: Config) -> Result<App> {
        let db_path = config.database_path();
        let store = Store::open(&db_path, &config.database)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;
        let providers = Self::create_providers(&config)?;
        Ok(App::new(config, store, providers))
    }

    pub fn create_providers(config: &Config) -> Result<Providers> {
        let fetcher = Arc::new(HttpFetcher::new(&config.fetch).context("failed to build http client")?);

        Ok(Providers {
            fetcher,
            generator: Self::create_generator(config)?,
            embedder: Self::create_embedder(config)?,
        })
    }

    fn create_generator(config: &Config) -> Result<Option<Arc<dyn Generator>>> {
        let Some(api_key) = config.ai.api_key.as_deref() else {
            log::warn!("no Gemini API key configured, AI enrichment and questions are disabled");
            return Ok(None);
        };

        let client = GeminiClient::new(
            &config.ai.base_url,
            &config.ai.model,
            api_key,
            Duration::from_secs(config.ai.timeout_secs),
        )
        .context("failed to build Gemini client")?;
        log::info!("using generative model {}", client.model_version());
        Ok(Some(Arc::new(client)))
    }

    fn create_embedder(config: &Config) -> Result<Option<Arc<dyn Embedder>>> {
        let embeddings = &config.embeddings;
        match embeddings.provider {
            EmbeddingProvider::Gemini => {
                let Some(api_key) = config.ai.api_key.as_deref() else {
                    log::warn!("no Gemini API key configured, embeddings are disabled");
                    return Ok(None);
                };
                let embedder = GeminiEmbedder::new(
                    &config.ai.base_url,
                    embeddings.model_name(),
                    api_key,
                    embeddings.dimensions,
                    Duration::from_secs(config.ai.timeout_secs),
                )
                .context("failed to build Gemini embedder")?;
                log::info!("using embedding model {}", embeddings.model_name());
                Ok(Some(Arc::new(embedder)))
            }
            #[cfg(feature = "local-embeddings")]
            EmbeddingProvider::Local => {
                let embedder = crate::semantic::embeddings::LocalEmbedder::new(
                    embeddings.model_name(),
                    config.base_path().to_path_buf(),
                )
                .context("failed to load local embedding model")?;
                Ok(Some(Arc::new(embedder)))
            }
            #[cfg(not(feature = "local-embeddings"))]
            EmbeddingProvider::Local => {
                anyhow::bail!("embeddings.provider is local but bookshelf was built without local-embeddings")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_app_without_api_key() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::load_with(tmp.path()).unwrap();
        config.ai.api_key = None;

        let providers = AppFactory::create_providers(&config).unwrap();
        assert!(providers.generator.is_none());
        assert!(providers.embedder.is_none());

        let app = AppFactory::create_app(config).unwrap();
        assert!(tmp.path().join("bookshelf.db").exists());
        assert_eq!(app.config.limits.free_daily, 20);
    }
}
