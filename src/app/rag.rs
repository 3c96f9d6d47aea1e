//! Question answering grounded in the user's own bookmarks.

use std::sync::Arc;

use serde::Serialize;

use crate::{
    ai::Generator,
    app::{context::RequestContext, errors::AppError, search::SearchEngine},
    models::{Item, User},
    semantic::preprocess::{truncate_with_suffix, ELLIPSIS},
    store::Store,
};

pub const NO_SOURCES_ANSWER: &str = "I couldn't find any relevant bookmarks to answer your question.";
pub const NO_CONTENT_ANSWER: &str = "I found some relevant bookmarks but couldn't access their content.";

const MAX_SOURCES: usize = 3;
const SOURCE_SNIPPET_CHARS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceBookmark {
    pub id: String,
    pub title: String,
    pub link: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceBookmark>,
}

struct SourceContent<'a> {
    item: &'a Item,
    snippet: String,
}

#[derive(Clone)]
pub struct RagEngine {
    store: Store,
    search: SearchEngine,
    generator: Option<Arc<dyn Generator>>,
}

impl RagEngine {
    pub fn new(store: Store, search: SearchEngine, generator: Option<Arc<dyn Generator>>) -> Self {
        Self {
            store,
            search,
            generator,
        }
    }

    /// Answer `question` from the user's nearest bookmarks. Quota checks are
    /// the caller's job.
    pub async fn ask(&self, ctx: &RequestContext, user: &User, question: &str) -> Result<Answer, AppError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::InvalidInput("question is required".to_string()));
        }

        let hits = self.search.vector_search(ctx, user.id, question).await?;
        if hits.is_empty() {
            return Ok(Answer {
                answer: NO_SOURCES_ANSWER.to_string(),
                sources: Vec::new(),
            });
        }

        let top: Vec<_> = hits.into_iter().take(MAX_SOURCES).collect();
        let sources: Vec<SourceBookmark> = top
            .iter()
            .map(|hit| SourceBookmark {
                id: hit.item.id.clone(),
                title: hit.item.title.clone(),
                link: hit.item.link.clone(),
                score: hit.score,
            })
            .collect();

        let mut contents = Vec::with_capacity(top.len());
        for hit in &top {
            match self.store.get_markdown(ctx, &hit.item.id).await {
                Ok(markdown) => contents.push(SourceContent {
                    item: &hit.item,
                    snippet: truncate_with_suffix(&markdown, SOURCE_SNIPPET_CHARS, ELLIPSIS),
                }),
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(err) => log::debug!("no markdown for {}: {err}", hit.item.id),
            }
        }

        if contents.is_empty() {
            return Ok(Answer {
                answer: NO_CONTENT_ANSWER.to_string(),
                sources,
            });
        }

        let generator = self
            .generator
            .as_ref()
            .ok_or_else(|| AppError::AI("no generative model configured".to_string()))?;
        let answer = generator.generate(ctx, &build_prompt(question, &contents)).await?;

        Ok(Answer {
            answer: answer.trim().to_string(),
            sources,
        })
    }
}

fn build_prompt(question: &str, sources: &[SourceContent]) -> String {
    let mut prompt = String::from(
        "You are a helpful assistant that answers questions using only the user's saved bookmarks.\n\
         Answer the question using ONLY the sources below. If they do not contain the answer, say so.\n\
         Cite sources by their title. Keep the answer under 300 words.\n\n",
    );
    prompt.push_str(&format!("Question: {question}\n\nSources:\n\n"));

    for (n, source) in sources.iter().enumerate() {
        prompt.push_str(&format!(
            "[Source {}: {}]\nURL: {}\nContent: {}\n\n",
            n + 1,
            source.item.title,
            source.item.link,
            source.snippet
        ));
    }

    prompt.push_str("Answer:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;

    fn item(id: &str, title: &str) -> Item {
        Item {
            id: id.into(),
            user_id: 1,
            title: title.into(),
            link: format!("https://example.com/{id}"),
            source: Source::Web,
            excerpt: String::new(),
            image_url: String::new(),
            site_name: String::new(),
            article_lang: String::new(),
            published_time: None,
            created_at: chrono::Utc::now(),
            ai_summary: None,
            ai_excerpt: None,
            ai_tags: None,
        }
    }

    #[test]
    fn test_prompt_lists_numbered_sources() {
        let a = item("a", "Rust ownership");
        let b = item("b", "Tokio internals");
        let sources = [
            SourceContent {
                item: &a,
                snippet: "Borrowing rules".into(),
            },
            SourceContent {
                item: &b,
                snippet: "Work stealing".into(),
            },
        ];

        let prompt = build_prompt("How does borrowing work?", &sources);
        assert!(prompt.contains("Question: How does borrowing work?"));
        assert!(prompt.contains("[Source 1: Rust ownership]\nURL: https://example.com/a\nContent: Borrowing rules\n"));
        assert!(prompt.contains("[Source 2: Tokio internals]\nURL: https://example.com/b\nContent: Work stealing\n"));
        assert!(prompt.contains("under 300 words"));
    }
}
