//! Local implementations of the routing capabilities
//!
//! Everything here runs in-process with no network access: regex matching,
//! a lexical hash embedder for exemplar similarity, BM25 retrieval over a
//! JSON knowledge base, and a file-backed handoff queue.

pub mod bm25;
pub mod embedder;
pub mod handoff;
pub mod knowledge;
pub mod regex_matcher;
pub mod similarity;

pub use bm25::Bm25;
pub use embedder::{tokenize, HashEmbedder};
pub use handoff::QueueHandoff;
pub use knowledge::{Article, KnowledgeBase, KnowledgeBaseRetriever, KnowledgeError};
pub use regex_matcher::RegexMatcher;
pub use similarity::{default_exemplars, ExemplarSimilarity};
