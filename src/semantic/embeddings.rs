//! Text embedding providers.
//!
//! Every provider produces vectors of a fixed dimensionality and distinguishes
//! documents (ingestion time) from queries (search and question time):
//! - `GeminiEmbedder` calls the hosted `embedContent` endpoint with a task type
//! - `LocalEmbedder` wraps fastembed and applies the BGE query instruction

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    app::context::RequestContext,
    semantic::preprocess::{document_text, query_text},
};

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Embedding request failed: {0}")]
    Transport(String),

    #[error("No embedding returned")]
    Empty,

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Embedding cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Document,
    Query,
}

impl TaskType {
    fn as_gemini(&self) -> &'static str {
        match self {
            TaskType::Document => "RETRIEVAL_DOCUMENT",
            TaskType::Query => "RETRIEVAL_QUERY",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRequest {
    pub task: TaskType,
    /// Only meaningful for documents
    pub title: Option<String>,
    pub text: String,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    /// Raw provider call. Callers go through `embed_document`/`embed_query`
    /// so truncation stays consistent.
    async fn embed(&self, request: EmbeddingRequest) -> Result<Vec<f32>, EmbeddingError>;

    async fn embed_document(
        &self,
        ctx: &RequestContext,
        title: &str,
        body: &str,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let request = EmbeddingRequest {
            task: TaskType::Document,
            title: Some(title.trim().to_string()).filter(|t| !t.is_empty()),
            text: document_text(body),
        };
        self.embed_checked(ctx, request).await
    }

    async fn embed_query(&self, ctx: &RequestContext, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = EmbeddingRequest {
            task: TaskType::Query,
            title: None,
            text: query_text(query),
        };
        self.embed_checked(ctx, request).await
    }

    async fn embed_checked(
        &self,
        ctx: &RequestContext,
        request: EmbeddingRequest,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let embedding = tokio::select! {
            biased;
            _ = ctx.token().cancelled() => return Err(EmbeddingError::Cancelled),
            res = self.embed(request) => res?,
        };

        if embedding.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        if embedding.len() != self.dimensions() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions(),
                got: embedding.len(),
            });
        }

        Ok(embedding)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: GeminiContent<'a>,
    task_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    output_dimensionality: usize,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: Option<ContentEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}

/// Hosted embedding model speaking the Gemini `embedContent` API.
pub struct GeminiEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    dimensions: usize,
}

impl GeminiEmbedder {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: &str,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/v1beta/models/{}:embedContent", self.base_url, self.model);
        let title = match request.task {
            TaskType::Document => request.title.as_deref(),
            TaskType::Query => None,
        };

        let body = EmbedContentRequest {
            model: format!("models/{}", self.model),
            content: GeminiContent {
                parts: vec![GeminiPart {
                    text: &request.text,
                }],
            },
            task_type: request.task.as_gemini(),
            title,
            output_dimensionality: self.dimensions,
        };

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Transport(format!("{status}: {error_text}")));
        }

        let parsed: EmbedContentResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Transport(e.to_string()))?;

        parsed
            .embedding
            .map(|e| e.values)
            .filter(|v| !v.is_empty())
            .ok_or(EmbeddingError::Empty)
    }
}

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use std::{
        path::PathBuf,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use fastembed::{InitOptions, TextEmbedding};

    use super::{Embedder, EmbeddingError, EmbeddingRequest, TaskType};

    /// Instruction BGE models expect in front of retrieval queries
    const QUERY_INSTRUCTION: &str = "Represent this sentence for searching relevant passages: ";

    /// Wrapper around fastembed's TextEmbedding model.
    /// Uses a Mutex because fastembed's embed() requires &mut self.
    pub struct LocalEmbedder {
        model: Arc<Mutex<TextEmbedding>>,
        model_name: String,
        dimensions: usize,
    }

    impl LocalEmbedder {
        /// Models are cached in the `models/` subdirectory of `cache_dir` and
        /// downloaded on first use.
        pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
            let model_enum = parse_model_name(model_name)?;

            let models_dir = cache_dir.join("models");
            std::fs::create_dir_all(&models_dir).map_err(|e| {
                EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
            })?;

            let options = InitOptions::new(model_enum)
                .with_cache_dir(models_dir)
                .with_show_download_progress(false);

            let mut model = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

            let dimensions = probe_dimensions(&mut model)?;
            log::info!("loaded embedding model {model_name} ({dimensions} dimensions)");

            Ok(Self {
                model: Arc::new(Mutex::new(model)),
                model_name: model_name.to_string(),
                dimensions,
            })
        }

        pub fn name(&self) -> &str {
            &self.model_name
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn dimensions(&self) -> usize {
            self.dimensions
        }

        async fn embed(&self, request: EmbeddingRequest) -> Result<Vec<f32>, EmbeddingError> {
            let input = match (request.task, request.title) {
                (TaskType::Query, _) => format!("{QUERY_INSTRUCTION}{}", request.text),
                (TaskType::Document, Some(title)) => format!("{title}\n\n{}", request.text),
                (TaskType::Document, None) => request.text,
            };

            let model = self.model.clone();
            tokio::task::spawn_blocking(move || {
                let mut model = model.lock().map_err(|e| {
                    EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
                })?;

                model
                    .embed(vec![input], None)
                    .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
                    .into_iter()
                    .next()
                    .ok_or(EmbeddingError::Empty)
            })
            .await
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
        }
    }

    pub(super) fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-base-en-v1.5-q" | "bgebaseenv15q" => {
                Ok(fastembed::EmbeddingModel::BGEBaseENV15Q)
            }
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported 768-dimension models: bge-base-en-v1.5 (add -q suffix for quantized)",
                name
            ))),
        }
    }

    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_invalid_model_name() {
            let temp_dir = tempfile::tempdir().unwrap();
            let result = LocalEmbedder::new("all-MiniLM-L6-v2", temp_dir.path().to_path_buf());
            assert!(matches!(result, Err(EmbeddingError::InvalidModel(_))));
        }

        #[test]
        #[ignore = "requires model download"]
        fn test_model_dimensions() {
            let temp_dir = tempfile::tempdir().unwrap();
            let model = LocalEmbedder::new("bge-base-en-v1.5", temp_dir.path().to_path_buf()).unwrap();
            assert_eq!(model.name(), "bge-base-en-v1.5");
            assert_eq!(model.dimensions(), 768);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Records requests and answers with a vector of the configured size.
    struct Recording {
        dims: usize,
        answer_dims: usize,
        seen: Mutex<Vec<EmbeddingRequest>>,
    }

    #[async_trait]
    impl Embedder for Recording {
        fn dimensions(&self) -> usize {
            self.dims
        }

        async fn embed(&self, request: EmbeddingRequest) -> Result<Vec<f32>, EmbeddingError> {
            self.seen.lock().unwrap().push(request);
            Ok(vec![0.5; self.answer_dims])
        }
    }

    #[tokio::test]
    async fn test_document_and_query_truncation() {
        let embedder = Recording {
            dims: 4,
            answer_dims: 4,
            seen: Mutex::new(vec![]),
        };
        let ctx = RequestContext::anonymous();

        embedder
            .embed_document(&ctx, " Title ", &"b".repeat(3000))
            .await
            .unwrap();
        embedder.embed_query(&ctx, &"q".repeat(300)).await.unwrap();

        let seen = embedder.seen.lock().unwrap();
        assert_eq!(seen[0].task, TaskType::Document);
        assert_eq!(seen[0].title.as_deref(), Some("Title"));
        assert_eq!(seen[0].text.chars().count(), 2001);
        assert_eq!(seen[1].task, TaskType::Query);
        assert_eq!(seen[1].text.len(), 100);
    }

    #[tokio::test]
    async fn test_wrong_dimensions_rejected() {
        let embedder = Recording {
            dims: 768,
            answer_dims: 3,
            seen: Mutex::new(vec![]),
        };
        let res = embedder
            .embed_query(&RequestContext::anonymous(), "hello")
            .await;
        assert!(matches!(
            res,
            Err(EmbeddingError::DimensionMismatch { expected: 768, got: 3 })
        ));
    }

    #[test]
    fn test_gemini_request_shape() {
        let body = EmbedContentRequest {
            model: "models/gemini-embedding-001".into(),
            content: GeminiContent {
                parts: vec![GeminiPart { text: "hello" }],
            },
            task_type: TaskType::Query.as_gemini(),
            title: None,
            output_dimensionality: 768,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["taskType"], "RETRIEVAL_QUERY");
        assert_eq!(json["outputDimensionality"], 768);
        assert_eq!(json["content"]["parts"][0]["text"], "hello");
        assert!(json.get("title").is_none());
    }
}
