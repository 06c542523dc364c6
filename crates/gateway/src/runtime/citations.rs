//! Citation extraction from the streamed answer.
//!
//! The synthesizer mandates `K[docId_chunkIndex]` tokens (chunk ordinal
//! 1-based). As chunks stream in, the tracker scans the accumulated text
//! and emits an updated citation payload whenever a new token appears,
//! always after the text that introduced it.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use cairn_domain::fragment::Fragment;

use super::events::CitationsPayload;
use super::fragments::FragmentStore;

fn citation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"K\[([A-Za-z0-9][A-Za-z0-9.-]*)_(\d+)\]").unwrap())
}

/// The token the model must write to cite a fragment.
pub fn citation_token(fragment: &Fragment) -> String {
    format!("K[{}]", fragment.citation_key())
}

/// Incremental citation scanner for one streamed answer.
#[derive(Default)]
pub struct CitationTracker {
    /// Citation keys (`docId_ordinal`) in first-appearance order.
    seen_keys: Vec<String>,
    /// Ids of fragments cited, parallel to `seen_keys`.
    cited_fragment_ids: Vec<String>,
}

impl CitationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan the full accumulated text; returns a fresh payload when new
    /// citations appeared since the last scan.
    pub fn scan(&mut self, text: &str, store: &FragmentStore) -> Option<CitationsPayload> {
        let mut changed = false;
        for cap in citation_re().captures_iter(text) {
            let key = cap[0][2..cap[0].len() - 1].to_string();
            if self.seen_keys.contains(&key) {
                continue;
            }
            let doc_id = &cap[1];
            let Some(ordinal) = cap[2].parse::<u32>().ok().filter(|&n| n >= 1) else {
                continue;
            };
            let Some(fragment) = store.by_citation(doc_id, ordinal) else {
                tracing::debug!(key = %key, "citation token does not match any fragment");
                continue;
            };
            self.seen_keys.push(key);
            self.cited_fragment_ids.push(fragment.id.clone());
            changed = true;
        }

        if !changed {
            return None;
        }
        Some(self.payload(store))
    }

    /// Build the payload for everything cited so far.
    pub fn payload(&self, store: &FragmentStore) -> CitationsPayload {
        let context_chunks = self
            .cited_fragment_ids
            .iter()
            .filter_map(|id| store.by_id(id))
            .map(|f| f.source.clone())
            .collect();
        let citation_map: BTreeMap<u32, usize> = (0..self.cited_fragment_ids.len())
            .map(|i| (i as u32 + 1, i))
            .collect();
        CitationsPayload {
            context_chunks,
            citation_map,
        }
    }

    /// Ids of fragments cited in the answer, in appearance order.
    pub fn cited_ids(&self) -> &[String] {
        &self.cited_fragment_ids
    }

    pub fn is_empty(&self) -> bool {
        self.cited_fragment_ids.is_empty()
    }
}
