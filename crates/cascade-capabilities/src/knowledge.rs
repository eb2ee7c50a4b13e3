//! Knowledge base articles and the retrieval capability built on them

use crate::bm25::Bm25;
use crate::embedder::tokenize;
use async_trait::async_trait;
use cascade_core::{EvaluationError, Retrieval, RetrievalCapability, RetrievedPassage};
use cascade_telemetry::{estimate_tokens, estimate_tokens_all, TokenUsage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;

const TOP_K: usize = 3;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("failed to read knowledge base: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse knowledge base: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate article id {0}")]
    DuplicateId(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub body: String,
}

impl Article {
    pub fn new(id: &str, title: &str, body: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        }
    }

    fn tokens(&self) -> Vec<String> {
        let mut tokens = tokenize(&self.title);
        tokens.extend(tokenize(&self.body));
        tokens
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub articles: Vec<Article>,
}

impl KnowledgeBase {
    pub fn load(path: &Path) -> Result<Self, KnowledgeError> {
        let content = std::fs::read_to_string(path)?;
        let kb: KnowledgeBase = serde_json::from_str(&content)?;
        kb.check()?;
        Ok(kb)
    }

    fn check(&self) -> Result<(), KnowledgeError> {
        let mut seen = std::collections::HashSet::new();
        for article in &self.articles {
            if !seen.insert(article.id.as_str()) {
                return Err(KnowledgeError::DuplicateId(article.id.clone()));
            }
        }
        Ok(())
    }

    /// A small starter catalogue for a wellness store
    pub fn sample() -> Self {
        Self {
            articles: vec![
                Article::new(
                    "kb_focus_gummies",
                    "Focus gummies",
                    "Our focus gummies contain L-theanine, green tea extract and B vitamins. Take two gummies in the morning. Each gummy has 20mg of caffeine from green tea.",
                ),
                Article::new(
                    "kb_green_tea_extract",
                    "Green tea extract",
                    "Green tea extract provides natural caffeine and antioxidants. It is sourced from organic farms and standardized for EGCG content.",
                ),
                Article::new(
                    "kb_sleep_gummies",
                    "Sleep gummies",
                    "Sleep gummies combine melatonin, chamomile and magnesium. Take one gummy thirty minutes before bed. Not habit forming.",
                ),
                Article::new(
                    "kb_shipping",
                    "Shipping and delivery",
                    "Orders ship within two business days. Standard delivery takes three to five days. Free shipping on orders over fifty dollars.",
                ),
                Article::new(
                    "kb_subscriptions",
                    "Subscriptions",
                    "Subscriptions renew monthly. You can pause, skip or cancel a subscription from your account page before the renewal date.",
                ),
            ],
        }
    }
}

/// BM25 retrieval with an extractive answer from the best passages.
///
/// Raw BM25 scores are unbounded; they are mapped into [0,1) with
/// `1 - e^(-raw / scale)`, where `scale` is the index's reference score.
/// One match on the rarest term lands at about 0.63, while matches on terms
/// most articles share stay well below it.
#[derive(Debug, Clone)]
pub struct KnowledgeBaseRetriever {
    index: Bm25,
    scale: f64,
    articles: HashMap<String, Article>,
}

impl KnowledgeBaseRetriever {
    pub fn new(kb: &KnowledgeBase) -> Self {
        let index = Bm25::new(kb.articles.iter().map(|a| (a.id.clone(), a.tokens())).collect());
        let scale = index.reference_score().max(f64::EPSILON);
        let articles = kb
            .articles
            .iter()
            .map(|a| (a.id.clone(), a.clone()))
            .collect();
        Self {
            index,
            scale,
            articles,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn passages(&self, text: &str) -> Vec<RetrievedPassage> {
        self.index
            .search(&tokenize(text), TOP_K)
            .into_iter()
            .filter_map(|(id, raw)| {
                let article = self.articles.get(&id)?;
                Some(RetrievedPassage {
                    id,
                    score: 1.0 - (-raw / self.scale).exp(),
                    text: article.body.clone(),
                })
            })
            .collect()
    }
}

fn compose_answer(passages: &[RetrievedPassage]) -> String {
    let Some(best) = passages.first() else {
        return String::new();
    };
    let lead = best
        .text
        .split_inclusive(". ")
        .take(2)
        .collect::<String>();
    format!("Here's what I found: {}", lead.trim())
}

#[async_trait]
impl RetrievalCapability for KnowledgeBaseRetriever {
    async fn retrieve(&self, text: &str) -> Result<Retrieval, EvaluationError> {
        let started = Instant::now();
        let passages = self.passages(text);
        let answer = compose_answer(&passages);

        let context = estimate_tokens_all(passages.iter().map(|p| p.text.as_str()));
        let usage = TokenUsage {
            embedding_tokens: estimate_tokens(text),
            completion_input_tokens: estimate_tokens(text) + context,
            completion_output_tokens: estimate_tokens(&answer),
            flat_cost: 0.0,
            api_calls: 1,
        };

        Ok(Retrieval {
            passages,
            answer,
            usage,
            generation: started.elapsed(),
        })
    }
}
