//! FNV-1a hash embedder
//!
//! Lexical, not semantic: each token lands in one dimension of a fixed-size
//! vector. Deterministic and model-free, so exemplar similarity works
//! offline and replays identically.

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

const MIN_TOKEN_LEN: usize = 2;
const DEFAULT_DIMENSION: usize = 384;

/// Function words and conversational filler. Left in, they dominate the
/// overlap between short questions and exemplars.
const STOPWORDS: &[&str] = &[
    "a", "about", "am", "an", "and", "any", "are", "as", "at", "be", "been", "but", "by", "can",
    "could", "did", "do", "does", "during", "for", "from", "get", "got", "had", "has", "have",
    "here", "how", "i", "i'm", "if", "in", "into", "is", "it", "it's", "its", "just", "me", "my",
    "need", "of", "on", "or", "our", "out", "please", "should", "so", "some", "tell", "than",
    "that", "the", "then", "there", "these", "this", "those", "to", "too", "up", "us", "use",
    "using", "very", "want", "was", "we", "were", "what", "when", "while", "will", "with",
    "would", "you", "you're", "your",
];

/// Lowercased alphanumeric tokens of at least two characters, stopwords removed
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|t| t.trim_matches('\'').to_lowercase())
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
        }
    }
}

impl HashEmbedder {
    /// A zero dimension is bumped to one
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Unit-length embedding; the zero vector when `text` has no tokens
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];
        for token in tokenize(text) {
            let hash = fnv1a(token.as_bytes());
            let index = (hash % self.dimension as u64) as usize;
            embedding[index] += 1.0;
        }
        l2_normalize(&mut embedding);
        embedding
    }
}

/// Cosine similarity of two unit vectors
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum()
}
