//! 知识库模块：基于向量相似度的学习资料检索。
//!
//! In-memory knowledge base.
//!
//! Documents are embedded once when added; queries are embedded on search and ranked
//! by cosine similarity. The base also assembles bounded prompt context and derives
//! study recommendations from the categories it retrieves.

mod defaults;
mod vectors;

pub use vectors::{
    cosine_similarity, dot_product, magnitude, normalize_vector, top_k_cosine, SimilarityResult,
    Vector,
};

use crate::providers::Embedder;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// Space that must remain before a truncated entry is worth adding to the context.
const MIN_PARTIAL_CHARS: usize = 50;
const ELLIPSIS: &str = "...";

const GENERIC_TIPS: [&str; 3] = [
    "Try active recall techniques",
    "Use spaced repetition for memorization",
    "Take regular breaks using the Pomodoro technique",
];
const MAX_RECOMMENDATIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewKnowledge {
    pub title: String,
    pub content: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: u64,
    pub title: String,
    pub category: String,
    pub source_url: Option<String>,
    pub content: String,
    pub relevance_score: f32,
}

#[derive(Debug, Clone)]
struct Entry {
    id: u64,
    doc: NewKnowledge,
    vector: Vector,
}

pub struct KnowledgeBase {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<Entry>>,
}

impl KnowledgeBase {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn embedder_name(&self) -> &str {
        self.embedder.name()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn titles(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|e| e.doc.title.clone())
            .collect()
    }

    pub async fn add(&self, doc: NewKnowledge) -> Result<u64> {
        for (field, value) in [
            ("title", &doc.title),
            ("content", &doc.content),
            ("category", &doc.category),
        ] {
            if value.trim().is_empty() {
                return Err(Error::validation_with_context(
                    format!("Missing required field: {}", field),
                    ErrorContext::new()
                        .with_field_path(field)
                        .with_source("knowledge_base"),
                ));
            }
        }

        let text = format!("{}\n{}", doc.title, doc.content);
        let vector = self
            .embedder
            .embed(std::slice::from_ref(&text))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::upstream(self.embedder.name(), "embedder returned no vectors"))?;

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let id = entries.last().map_or(1, |e| e.id + 1);
        tracing::info!(id, title = %doc.title, "added knowledge item");
        entries.push(Entry { id, doc, vector });
        Ok(id)
    }

    /// Add the built-in study-skills documents whose titles are not present yet.
    pub async fn seed_defaults(&self) -> Result<usize> {
        let existing: HashSet<String> = self.titles().into_iter().collect();
        let mut added = 0;
        for (title, category, content) in defaults::DEFAULT_KNOWLEDGE {
            if existing.contains(*title) {
                continue;
            }
            self.add(NewKnowledge {
                title: title.to_string(),
                content: content.to_string(),
                category: category.to_string(),
                source_url: None,
            })
            .await?;
            added += 1;
        }
        Ok(added)
    }

    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let query_vector = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::upstream(self.embedder.name(), "embedder returned no vectors"))?;

        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let candidates: Vec<&[f32]> = entries.iter().map(|e| e.vector.as_slice()).collect();
        let hits = top_k_cosine(&query_vector, &candidates, k)
            .into_iter()
            .map(|r| {
                let entry = &entries[r.index];
                SearchHit {
                    id: entry.id,
                    title: entry.doc.title.clone(),
                    category: entry.doc.category.clone(),
                    source_url: entry.doc.source_url.clone(),
                    content: entry.doc.content.clone(),
                    relevance_score: r.score,
                }
            })
            .collect();
        Ok(hits)
    }

    /// Prompt context built from the `k` best hits, at most `max_chars` characters.
    pub async fn context_for(&self, query: &str, k: usize, max_chars: usize) -> Result<String> {
        let hits = self.search(query, k).await?;
        Ok(assemble_context(&hits, max_chars))
    }

    pub async fn recommendations(&self, query: &str, k: usize) -> Result<Vec<String>> {
        let hits = self.search(query, k).await?;
        Ok(recommend(query, &hits))
    }
}

/// Concatenate `"[title]: content\n\n"` blocks while they fit; when one does not, add a
/// truncated version ending in `...` if enough room is left, then stop.
pub fn assemble_context(hits: &[SearchHit], max_chars: usize) -> String {
    let mut context = String::new();
    let mut used = 0;
    for hit in hits {
        let block = format!("[{}]: {}\n\n", hit.title, hit.content);
        let len = block.chars().count();
        if used + len <= max_chars {
            context.push_str(&block);
            used += len;
            continue;
        }
        let room = max_chars - used;
        if room > MIN_PARTIAL_CHARS {
            let prefix = format!("[{}]: ", hit.title);
            let overhead = prefix.chars().count() + ELLIPSIS.len();
            if overhead >= room {
                break;
            }
            let take = room - overhead;
            context.push_str(&prefix);
            context.extend(hit.content.chars().take(take));
            context.push_str(ELLIPSIS);
        }
        break;
    }
    context
}

pub fn recommend(query: &str, hits: &[SearchHit]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out: Vec<String> = hits
        .iter()
        .filter(|h| seen.insert(h.category.as_str()))
        .map(|h| format!("Review {} materials", h.category))
        .collect();
    let q = query.to_lowercase();
    if q.contains("study") || q.contains("learn") {
        out.extend(GENERIC_TIPS.iter().map(|s| s.to_string()));
    }
    out.truncate(MAX_RECOMMENDATIONS);
    out
}
