//! Trigram Index
//!
//! Inverted index from 3-character shingles to posting lists.
//!
//! Text is lowercased and whitespace runs are collapsed to a single space
//! before shingling, for documents and queries alike. Title and content are
//! shingled separately so no trigram spans the two.
//!
//! Updates replace a document's postings wholesale (remove, then insert).

use std::collections::{BTreeMap, HashMap};

use crate::document::{Document, DocumentId};

/// Three consecutive characters of normalized text
pub type Trigram = [char; 3];

/// What a document contributed to the index
#[derive(Debug, Clone)]
struct DocEntry {
    trigrams: Vec<Trigram>,
    /// Total trigram occurrences (document length for scoring)
    total: u32,
    updated_at: u64,
}

/// Per-candidate accumulator during a search
#[derive(Default)]
struct Candidate {
    matched: u32,
    tf_sum: u32,
}

/// Inverted trigram index over title and content
#[derive(Debug, Default)]
pub struct TrigramIndex {
    postings: HashMap<Trigram, BTreeMap<DocumentId, u32>>,
    docs: HashMap<DocumentId, DocEntry>,
    posting_count: usize,
}

impl TrigramIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a document, replacing whatever was indexed for its id before
    pub fn insert(&mut self, document: &Document) {
        self.remove(&document.id);

        let mut counts = extract_trigrams(&document.title);
        for (trigram, tf) in extract_trigrams(&document.content_text()) {
            *counts.entry(trigram).or_insert(0) += tf;
        }

        let total = counts.values().sum();
        let mut trigrams = Vec::with_capacity(counts.len());
        for (trigram, tf) in counts {
            self.postings.entry(trigram).or_default().insert(document.id, tf);
            trigrams.push(trigram);
        }
        self.posting_count += trigrams.len();

        self.docs.insert(
            document.id,
            DocEntry {
                trigrams,
                total,
                updated_at: document.updated_at,
            },
        );
    }

    /// Remove every posting for `id`; returns whether it was indexed
    pub fn remove(&mut self, id: &DocumentId) -> bool {
        let Some(entry) = self.docs.remove(id) else {
            return false;
        };
        for trigram in &entry.trigrams {
            if let Some(list) = self.postings.get_mut(trigram) {
                if list.remove(id).is_some() {
                    self.posting_count -= 1;
                }
                if list.is_empty() {
                    self.postings.remove(trigram);
                }
            }
        }
        true
    }

    /// Ranked search
    ///
    /// Candidates share at least one distinct trigram with the query. The
    /// score grows with the fraction of query trigrams matched and with their
    /// term frequency, normalized by document length. Results are ordered by
    /// score, then most recent `updated_at`, then id. Queries with fewer than
    /// three characters after normalization return nothing.
    pub fn search<F>(&self, query: &str, limit: usize, filter: F) -> Vec<(DocumentId, f64)>
    where
        F: Fn(&DocumentId) -> bool,
    {
        let query_trigrams = extract_trigrams(query);
        if query_trigrams.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut candidates: HashMap<DocumentId, Candidate> = HashMap::new();
        for trigram in query_trigrams.keys() {
            let Some(list) = self.postings.get(trigram) else {
                continue;
            };
            for (id, tf) in list {
                let candidate = candidates.entry(*id).or_default();
                candidate.matched += 1;
                candidate.tf_sum += tf;
            }
        }

        let query_len = query_trigrams.len() as f64;
        let mut hits: Vec<(DocumentId, f64, u64)> = candidates
            .into_iter()
            .filter(|(id, _)| filter(id))
            .filter_map(|(id, c)| {
                let entry = self.docs.get(&id)?;
                let coverage = f64::from(c.matched) / query_len;
                let score = coverage * f64::from(c.tf_sum) / f64::from(entry.total.max(1)).sqrt();
                Some((id, score, entry.updated_at))
            })
            .collect();

        hits.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| b.2.cmp(&a.2))
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(limit);
        hits.into_iter().map(|(id, score, _)| (id, score)).collect()
    }

    /// Posting list for one trigram of `text` (normalized first), ordered by id
    pub fn postings(&self, text: &str) -> Vec<(DocumentId, u32)> {
        let chars: Vec<char> = normalize_text(text).chars().collect();
        let Ok(trigram) = <[char; 3]>::try_from(chars.as_slice()) else {
            return Vec::new();
        };
        self.postings
            .get(&trigram)
            .map(|list| list.iter().map(|(id, tf)| (*id, *tf)).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.docs.contains_key(id)
    }

    /// `updated_at` recorded when `id` was last indexed
    pub fn indexed_version(&self, id: &DocumentId) -> Option<u64> {
        self.docs.get(id).map(|entry| entry.updated_at)
    }

    /// Number of indexed documents
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Number of distinct trigrams
    pub fn trigram_count(&self) -> usize {
        self.postings.len()
    }

    /// Total (trigram, document) postings
    pub fn posting_count(&self) -> usize {
        self.posting_count
    }

    pub fn clear(&mut self) {
        self.postings.clear();
        self.docs.clear();
        self.posting_count = 0;
    }
}

/// Lowercase, collapse whitespace runs to one space, trim
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(word.chars().flat_map(char::to_lowercase));
    }
    out
}

/// Distinct trigrams of the normalized text with their frequencies
pub fn extract_trigrams(text: &str) -> HashMap<Trigram, u32> {
    let chars: Vec<char> = normalize_text(text).chars().collect();
    let mut counts = HashMap::new();
    for window in chars.windows(3) {
        *counts.entry([window[0], window[1], window[2]]).or_insert(0) += 1;
    }
    counts
}
