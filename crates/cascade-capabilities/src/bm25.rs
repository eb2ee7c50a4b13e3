//! Okapi BM25 over tokenized knowledge-base articles

use std::collections::{HashMap, HashSet};

const K1: f64 = 1.5;
const B: f64 = 0.75;

#[derive(Debug, Clone, Default)]
pub struct Bm25 {
    avg_doc_len: f64,
    docs: Vec<Doc>,
    idf: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
struct Doc {
    id: String,
    len: usize,
    term_freq: HashMap<String, usize>,
}

impl Bm25 {
    pub fn new(documents: Vec<(String, Vec<String>)>) -> Self {
        if documents.is_empty() {
            return Self::default();
        }

        let doc_count = documents.len() as f64;
        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for (_, tokens) in &documents {
            let unique: HashSet<&str> = tokens.iter().map(String::as_str).collect();
            for token in unique {
                *doc_freq.entry(token).or_insert(0) += 1;
            }
        }
        let idf = doc_freq
            .into_iter()
            .map(|(term, df)| {
                let df = df as f64;
                let idf = ((doc_count - df + 0.5) / (df + 0.5) + 1.0).ln();
                (term.to_string(), idf)
            })
            .collect();

        let total_len: usize = documents.iter().map(|(_, t)| t.len()).sum();
        let docs = documents
            .iter()
            .map(|(id, tokens)| {
                let mut term_freq = HashMap::new();
                for token in tokens {
                    *term_freq.entry(token.clone()).or_insert(0) += 1;
                }
                Doc {
                    id: id.clone(),
                    len: tokens.len(),
                    term_freq,
                }
            })
            .collect();

        Self {
            avg_doc_len: total_len as f64 / doc_count,
            docs,
            idf,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Score of the rarest indexed term appearing once in an average-length
    /// document; zero for an empty index
    pub fn reference_score(&self) -> f64 {
        self.idf.values().copied().fold(0.0, f64::max)
    }

    /// Top `k` documents with a positive score, best first; ties keep index order
    pub fn search(&self, query: &[String], k: usize) -> Vec<(String, f64)> {
        let mut scores: Vec<(String, f64)> = self
            .docs
            .iter()
            .map(|doc| (doc.id.clone(), self.score(doc, query)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scores.truncate(k);
        scores
    }

    fn score(&self, doc: &Doc, query: &[String]) -> f64 {
        let avg = if self.avg_doc_len > 0.0 {
            self.avg_doc_len
        } else {
            1.0
        };
        let norm = K1 * (1.0 - B + B * doc.len as f64 / avg);

        let unique: HashSet<&String> = query.iter().collect();
        unique
            .into_iter()
            .filter_map(|term| {
                let tf = *doc.term_freq.get(term)? as f64;
                let idf = self.idf.get(term)?;
                Some(idf * tf * (K1 + 1.0) / (tf + norm))
            })
            .sum()
    }
}
