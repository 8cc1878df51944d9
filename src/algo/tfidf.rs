use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::clustering::{SparseVector, Vectorizer};
use super::tokenizer;
use crate::error::ClusterError;

/// A corpus of documents for TF-IDF weighting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Corpus {
    /// document_id -> term -> count
    doc_terms: Vec<HashMap<String, u32>>,
    /// term -> number of documents containing it
    doc_freq: HashMap<String, u32>,
    num_docs: u32,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document (as pre-tokenized terms) to the corpus.
    pub fn add_document(&mut self, tokens: &[String]) {
        let mut term_counts: HashMap<String, u32> = HashMap::new();
        for token in tokens {
            *term_counts.entry(token.clone()).or_insert(0) += 1;
        }
        for term in term_counts.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.doc_terms.push(term_counts);
        self.num_docs += 1;
    }

    /// Smoothed IDF: ln((1 + N) / (1 + df)) + 1. Always positive.
    pub fn idf(&self, term: &str) -> f64 {
        let df = *self.doc_freq.get(term).unwrap_or(&0) as f64;
        let n = self.num_docs as f64;
        ((1.0 + n) / (1.0 + df)).ln() + 1.0
    }

    pub fn doc_freq(&self, term: &str) -> u32 {
        *self.doc_freq.get(term).unwrap_or(&0)
    }

    /// Terms with document frequency >= `min_df`, keeping the `max_features`
    /// most frequent (ties by term).
    pub fn vocabulary(&self, min_df: u32, max_features: usize) -> Vocabulary {
        let mut candidates: Vec<(&String, u32)> = self
            .doc_freq
            .iter()
            .filter(|(_, &df)| df >= min_df)
            .map(|(t, &df)| (t, df))
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        candidates.truncate(max_features);

        let sorted: BTreeSet<&String> = candidates.into_iter().map(|(t, _)| t).collect();
        Vocabulary {
            terms: sorted
                .into_iter()
                .enumerate()
                .map(|(i, t)| (t.clone(), i as u32))
                .collect(),
        }
    }

    /// Raw count x IDF over vocabulary terms of one document.
    pub fn tfidf_vector(&self, doc_idx: usize, vocabulary: &Vocabulary) -> SparseVector {
        let pairs = self.doc_terms[doc_idx]
            .iter()
            .filter_map(|(term, &count)| {
                vocabulary
                    .id(term)
                    .map(|id| (id, count as f64 * self.idf(term)))
            })
            .collect();
        SparseVector::from_pairs(pairs)
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }
}

/// Term -> dense id, ids assigned in term order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    terms: BTreeMap<String, u32>,
}

impl Vocabulary {
    pub fn id(&self, term: &str) -> Option<u32> {
        self.terms.get(term).copied()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Word n-gram TF-IDF over signatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TfidfVectorizer {
    pub ngram_max: usize,
    pub min_df: u32,
    pub max_features: usize,
}

impl Default for TfidfVectorizer {
    fn default() -> Self {
        Self {
            ngram_max: 2,
            min_df: 2,
            max_features: 1000,
        }
    }
}

impl Vectorizer for TfidfVectorizer {
    fn compute_representation(&self, signatures: &[String]) -> Result<Vec<SparseVector>, ClusterError> {
        if signatures.len() < 2 {
            return Err(ClusterError::TooFewSamples(signatures.len()));
        }
        let documents: Vec<Vec<String>> = signatures
            .par_iter()
            .map(|s| tokenizer::ngram_range(&tokenizer::tokenize(s), self.ngram_max.max(1)))
            .collect();

        let mut corpus = Corpus::new();
        for doc in &documents {
            corpus.add_document(doc);
        }
        let vocabulary = corpus.vocabulary(self.min_df, self.max_features);
        if vocabulary.is_empty() {
            return Err(ClusterError::EmptyVocabulary);
        }

        let vectors: Vec<SparseVector> = (0..documents.len())
            .into_par_iter()
            .map(|i| corpus.tfidf_vector(i, &vocabulary).normalized())
            .collect();
        ensure_finite(&vectors)?;
        Ok(vectors)
    }
}

/// Character n-gram counts, independent per product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShingleVectorizer {
    pub n: usize,
}

impl Default for ShingleVectorizer {
    fn default() -> Self {
        Self { n: 3 }
    }
}

impl Vectorizer for ShingleVectorizer {
    fn compute_representation(&self, signatures: &[String]) -> Result<Vec<SparseVector>, ClusterError> {
        if signatures.len() < 2 {
            return Err(ClusterError::TooFewSamples(signatures.len()));
        }
        let n = self.n.max(1);
        let shingle_lists: Vec<Vec<String>> = signatures
            .par_iter()
            .map(|s| {
                if s.trim().is_empty() {
                    Vec::new()
                } else {
                    tokenizer::shingles(s, n)
                }
            })
            .collect();

        let dictionary: BTreeMap<&String, u32> = shingle_lists
            .iter()
            .flatten()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .enumerate()
            .map(|(i, s)| (s, i as u32))
            .collect();
        if dictionary.is_empty() {
            return Err(ClusterError::EmptyVocabulary);
        }

        let vectors: Vec<SparseVector> = shingle_lists
            .par_iter()
            .map(|list| {
                let pairs = list
                    .iter()
                    .filter_map(|s| dictionary.get(s).map(|&id| (id, 1.0)))
                    .collect();
                SparseVector::from_pairs(pairs).normalized()
            })
            .collect();
        ensure_finite(&vectors)?;
        Ok(vectors)
    }
}

fn ensure_finite(vectors: &[SparseVector]) -> Result<(), ClusterError> {
    match vectors
        .iter()
        .position(|v| v.entries().iter().any(|(_, w)| !w.is_finite()))
    {
        Some(i) => Err(ClusterError::NonFinite(i)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::clustering::cosine;

    fn make_corpus() -> Corpus {
        let mut c = Corpus::new();
        c.add_document(&["шина".into(), "michelin".into(), "16".into()]);
        c.add_document(&["шина".into(), "hankook".into(), "16".into()]);
        c.add_document(&["перчатки".into(), "нитрил".into(), "michelin".into()]);
        c
    }

    fn sigs(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn idf_rare_term_higher() {
        let c = make_corpus();
        assert!(c.idf("нитрил") > c.idf("шина"));
        assert!((c.idf("шина") - c.idf("michelin")).abs() < 1e-12);
    }

    #[test]
    fn idf_empty_corpus_is_finite() {
        let c = Corpus::new();
        assert_eq!(c.num_docs(), 0);
        assert!(c.idf("unknown").is_finite());
    }

    #[test]
    fn vocabulary_min_df_prunes() {
        let c = make_corpus();
        let vocab = c.vocabulary(2, 1000);
        assert_eq!(vocab.len(), 3);
        assert!(vocab.id("шина").is_some());
        assert!(vocab.id("нитрил").is_none());
    }

    #[test]
    fn vocabulary_max_features_keeps_frequent() {
        let mut c = make_corpus();
        c.add_document(&["шина".into()]);
        let vocab = c.vocabulary(1, 1);
        assert_eq!(vocab.len(), 1);
        assert!(vocab.id("шина").is_some());
    }

    #[test]
    fn vocabulary_ids_follow_term_order() {
        let c = make_corpus();
        let vocab = c.vocabulary(2, 1000);
        assert_eq!(vocab.id("16"), Some(0));
        assert_eq!(vocab.id("michelin"), Some(1));
        assert_eq!(vocab.id("шина"), Some(2));
    }

    #[test]
    fn tfidf_vector_only_vocabulary_terms() {
        let c = make_corpus();
        let vocab = c.vocabulary(2, 1000);
        let v = c.tfidf_vector(2, &vocab);
        assert_eq!(v.entries().len(), 1);
        assert!(v.entries()[0].1 > 0.0);
    }

    #[test]
    fn tfidf_vectorizer_similar_signatures_close() {
        let vectorizer = TfidfVectorizer::default();
        let vectors = vectorizer
            .compute_representation(&sigs(&[
                "перчатки рабочие нитрил серые",
                "перчатки рабочие нитрил черные",
                "шина летняя michelin 16",
                "шина зимняя michelin 16",
            ]))
            .unwrap();
        assert_eq!(vectors.len(), 4);
        let same = cosine(&vectors[0], &vectors[1]);
        let cross = cosine(&vectors[0], &vectors[2]);
        assert!(same > 0.9, "{same}");
        assert_eq!(cross, 0.0);
    }

    #[test]
    fn tfidf_vectorizer_empty_vocabulary() {
        let vectorizer = TfidfVectorizer::default();
        let err = vectorizer
            .compute_representation(&sigs(&["alpha", "beta", "gamma"]))
            .unwrap_err();
        assert_eq!(err, ClusterError::EmptyVocabulary);
    }

    #[test]
    fn tfidf_vectorizer_too_few() {
        let err = TfidfVectorizer::default()
            .compute_representation(&sigs(&["шина"]))
            .unwrap_err();
        assert_eq!(err, ClusterError::TooFewSamples(1));
    }

    #[test]
    fn shingle_vectorizer_cosine() {
        let vectors = ShingleVectorizer::default()
            .compute_representation(&sigs(&["hb 500 перчатки", "hb 500 перчатка", "шина 16", ""]))
            .unwrap();
        assert!(cosine(&vectors[0], &vectors[1]) > 0.7);
        assert!(cosine(&vectors[0], &vectors[2]) < 0.2);
        assert!(vectors[3].is_empty());
    }

    #[test]
    fn shingle_vectorizer_all_empty() {
        let err = ShingleVectorizer::default()
            .compute_representation(&sigs(&["", " "]))
            .unwrap_err();
        assert_eq!(err, ClusterError::EmptyVocabulary);
    }
}
