//! Semantic retrieval infrastructure.
//!
//! # Architecture
//!
//! - `embeddings`: Embedder trait with hosted and local providers
//! - `index`: Per-query cosine-distance ranking and vector blob encoding
//! - `preprocess`: Truncation policy for embedding and prompt input

pub mod embeddings;
pub mod index;
pub mod preprocess;

pub use embeddings::{Embedder, GeminiEmbedder};
