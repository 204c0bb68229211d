use conductor_core::{ConductorError, ConductorResult};
use std::collections::{BTreeSet, HashMap};

/// Longest n-gram indexed by the vector-space scorer.
const MAX_NGRAM: usize = 2;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "into", "is", "it",
    "of", "on", "or", "that", "the", "this", "to", "we", "with",
];

/// Semantic relevance between a task description and candidate documents.
///
/// Two interchangeable implementations exist; the one in use is chosen when
/// the agent scorer is constructed.
pub trait RelevanceScorer: Send + Sync {
    /// Short name, used in score rationales and logs.
    fn name(&self) -> &'static str;

    /// One score in [0, 1] per document, in document order.
    fn score(&self, query: &str, documents: &[&str]) -> ConductorResult<Vec<f64>>;
}

/// Tokenize into lowercase words, dropping one-character tokens.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() > 1)
        .collect()
}

fn content_tokens(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Term-frequency × inverse-document-frequency vectors over word 1–2-grams,
/// compared by cosine similarity. The corpus is the query plus every document.
#[derive(Debug, Clone, Default)]
pub struct TfIdfScorer;

impl TfIdfScorer {
    /// Create the scorer.
    pub fn new() -> Self {
        Self
    }

    fn term_counts(text: &str) -> HashMap<String, f64> {
        let tokens = content_tokens(text);
        let mut counts = HashMap::new();
        for n in 1..=MAX_NGRAM {
            for window in tokens.windows(n) {
                *counts.entry(window.join(" ")).or_insert(0.0) += 1.0;
            }
        }
        counts
    }
}

impl RelevanceScorer for TfIdfScorer {
    fn name(&self) -> &'static str {
        "tf-idf"
    }

    fn score(&self, query: &str, documents: &[&str]) -> ConductorResult<Vec<f64>> {
        let corpus: Vec<HashMap<String, f64>> = std::iter::once(query)
            .chain(documents.iter().copied())
            .map(Self::term_counts)
            .collect();

        if corpus[0].is_empty() {
            return Err(ConductorError::Relevance(
                "task description has no indexable terms".into(),
            ));
        }

        let n = corpus.len() as f64;
        let mut document_frequency: HashMap<&str, f64> = HashMap::new();
        for doc in &corpus {
            for term in doc.keys() {
                *document_frequency.entry(term.as_str()).or_insert(0.0) += 1.0;
            }
        }

        // Smoothed IDF: ln((1 + N) / (1 + df)) + 1, always positive.
        let weigh = |doc: &HashMap<String, f64>| -> HashMap<String, f64> {
            doc.iter()
                .map(|(term, tf)| {
                    let df = document_frequency.get(term.as_str()).copied().unwrap_or(0.0);
                    let idf = ((1.0 + n) / (1.0 + df)).ln() + 1.0;
                    (term.clone(), tf * idf)
                })
                .collect()
        };

        let query_vec = weigh(&corpus[0]);
        let query_norm = norm(&query_vec);

        Ok(corpus[1..]
            .iter()
            .map(|doc| {
                let doc_vec = weigh(doc);
                let doc_norm = norm(&doc_vec);
                if query_norm == 0.0 || doc_norm == 0.0 {
                    return 0.0;
                }
                let dot: f64 = query_vec
                    .iter()
                    .filter_map(|(term, w)| doc_vec.get(term).map(|d| w * d))
                    .sum();
                (dot / (query_norm * doc_norm)).clamp(0.0, 1.0)
            })
            .collect())
    }
}

fn norm(vector: &HashMap<String, f64>) -> f64 {
    vector.values().map(|w| w * w).sum::<f64>().sqrt()
}

/// Normalized keyword overlap: |intersection| / |union| of lowercase keyword sets.
#[derive(Debug, Clone, Default)]
pub struct KeywordOverlapScorer;

impl KeywordOverlapScorer {
    /// Create the scorer.
    pub fn new() -> Self {
        Self
    }
}

impl RelevanceScorer for KeywordOverlapScorer {
    fn name(&self) -> &'static str {
        "keyword-overlap"
    }

    fn score(&self, query: &str, documents: &[&str]) -> ConductorResult<Vec<f64>> {
        let query_set: BTreeSet<String> = tokenize(query).into_iter().collect();
        Ok(documents
            .iter()
            .map(|doc| {
                let doc_set: BTreeSet<String> = tokenize(doc).into_iter().collect();
                let union = query_set.union(&doc_set).count();
                if union == 0 {
                    0.0
                } else {
                    query_set.intersection(&doc_set).count() as f64 / union as f64
                }
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_tfidf_prefers_relevant_document() {
        let scorer = TfIdfScorer::new();
        let scores = scorer
            .score(
                "Fix authentication bug in login API",
                &[
                    "Backend engineer: REST API, authentication, login flows, sessions",
                    "Frontend designer: CSS layouts, animations, typography",
                ],
            )
            .unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores[0] > scores[1]);
        assert_eq!(scores[1], 0.0);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_tfidf_identical_text_scores_one() {
        let scorer = TfIdfScorer::new();
        let scores = scorer.score("database migration", &["database migration"]).unwrap();
        assert!((scores[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_tfidf_bigrams_add_signal() {
        let scorer = TfIdfScorer::new();
        let scores = scorer
            .score(
                "login api",
                &["login api specialist", "api for login pages"],
            )
            .unwrap();
        // Both share the unigrams, only the first shares the bigram.
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_tfidf_fails_without_terms() {
        let scorer = TfIdfScorer::new();
        let err = scorer.score("a !", &["anything"]).unwrap_err();
        assert!(err.to_string().contains("no indexable terms"));
    }

    #[test]
    fn test_keyword_overlap_ratio() {
        let scorer = KeywordOverlapScorer::new();
        let scores = scorer
            .score("login api bug", &["login api", "", "unrelated words"])
            .unwrap();
        // {login, api} / {login, api, bug}
        assert!((scores[0] - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(scores[1], 0.0);
        assert_eq!(scores[2], 0.0);
    }
}
