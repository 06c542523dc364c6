//! Per-run evidence accumulator.
//!
//! Owns every fragment, image reference, and the seen-document set for
//! one run, partitioned by turn. Mutated only by the orchestrator loop,
//! so it needs no interior locking.

use std::collections::{BTreeMap, HashSet};

use cairn_domain::expectation::Expectation;
use cairn_domain::fragment::{Fragment, FragmentImageReference};
use cairn_domain::trace::ToolStatus;

/// Summary of one tool output, kept for the reviewer's turn snapshot.
#[derive(Debug, Clone)]
pub struct ToolOutputSummary {
    pub tool_name: String,
    pub args_summary: String,
    pub result_summary: String,
    pub status: ToolStatus,
}

/// Artifacts gathered during the in-progress turn, folded into the
/// run-wide stores at turn end.
#[derive(Debug, Clone, Default)]
pub struct CurrentTurnArtifacts {
    pub fragment_ids: Vec<String>,
    pub tool_outputs: Vec<ToolOutputSummary>,
    pub expectations: Vec<Expectation>,
    pub image_names: Vec<String>,
}

#[derive(Default)]
pub struct FragmentStore {
    /// Every accepted fragment, in acceptance order.
    all: Vec<Fragment>,
    /// Fragment ids and document ids already incorporated (plus any
    /// `excludedIds` the model has asked to skip).
    seen_documents: HashSet<String>,
    fragments_by_turn: BTreeMap<u32, Vec<String>>,
    images: Vec<FragmentImageReference>,
    images_by_turn: BTreeMap<u32, Vec<String>>,
    current: CurrentTurnArtifacts,
}

impl FragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn all(&self) -> &[Fragment] {
        &self.all
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn images(&self) -> &[FragmentImageReference] {
        &self.images
    }

    pub fn current_turn(&self) -> &CurrentTurnArtifacts {
        &self.current
    }

    /// Ids of fragments accepted during the given turn.
    pub fn fragments_for_turn(&self, turn: u32) -> &[String] {
        self.fragments_by_turn
            .get(&turn)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// File names of images discovered during the given turn.
    pub fn images_for_turn(&self, turn: u32) -> &[String] {
        self.images_by_turn
            .get(&turn)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_seen(&self, id: &str) -> bool {
        self.seen_documents.contains(id)
    }

    /// Sorted snapshot of the seen-document set, injected into search
    /// tool arguments as `excludedIds`.
    pub fn seen_snapshot(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.seen_documents.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn by_id(&self, fragment_id: &str) -> Option<&Fragment> {
        self.all.iter().find(|f| f.id == fragment_id)
    }

    /// Resolve a `docId` + 1-based chunk ordinal citation back to its
    /// fragment.
    pub fn by_citation(&self, doc_id: &str, chunk_ordinal: u32) -> Option<&Fragment> {
        self.all.iter().find(|f| {
            f.source.doc_id == doc_id && f.source.chunk_index + 1 == chunk_ordinal
        })
    }

    /// The most recent `limit` fragments, oldest first.
    pub fn recent(&self, limit: usize) -> &[Fragment] {
        let start = self.all.len().saturating_sub(limit);
        &self.all[start..]
    }

    // ── Mutation ──────────────────────────────────────────────────

    /// Merge external exclusions (the model's `excludedIds`) into the
    /// seen set.
    pub fn exclude_documents<I: IntoIterator<Item = String>>(&mut self, ids: I) {
        self.seen_documents.extend(ids);
    }

    /// Whether a candidate duplicates something already gathered.
    pub fn is_duplicate(&self, candidate: &Fragment) -> bool {
        self.seen_documents.contains(&candidate.id)
            || self.seen_documents.contains(&candidate.source.doc_id)
    }

    /// Accept a fragment into the run. The fragment id and its document
    /// id enter the seen set immediately, before any further tool call
    /// can be dispatched.
    pub fn admit(&mut self, fragment: Fragment, turn: u32) {
        self.seen_documents.insert(fragment.id.clone());
        self.seen_documents.insert(fragment.source.doc_id.clone());
        self.fragments_by_turn
            .entry(turn)
            .or_default()
            .push(fragment.id.clone());
        self.current.fragment_ids.push(fragment.id.clone());
        self.all.push(fragment);
    }

    pub fn add_image(&mut self, image: FragmentImageReference) {
        self.images_by_turn
            .entry(image.added_at_turn)
            .or_default()
            .push(image.file_name.clone());
        self.current.image_names.push(image.file_name.clone());
        self.images.push(image);
    }

    pub fn record_tool_output(&mut self, summary: ToolOutputSummary) {
        self.current.tool_outputs.push(summary);
    }

    pub fn record_expectation(&mut self, expectation: Expectation) {
        self.current.expectations.push(expectation);
    }

    /// Fold the in-progress turn's artifacts away; the per-turn indexes
    /// were maintained incrementally, so this just resets the window.
    pub fn finalize_turn(&mut self) -> CurrentTurnArtifacts {
        std::mem::take(&mut self.current)
    }

    // ── Synthesis support ─────────────────────────────────────────

    /// Select images for the final synthesizer: user attachments first,
    /// then the most recently discovered, capped at `max`.
    pub fn images_for_synthesis(&self, max: usize) -> Vec<FragmentImageReference> {
        let mut picked: Vec<FragmentImageReference> = Vec::new();
        for img in self.images.iter().filter(|i| i.is_user_attachment) {
            if picked.len() >= max {
                return picked;
            }
            picked.push(img.clone());
        }
        for img in self.images.iter().rev().filter(|i| !i.is_user_attachment) {
            if picked.len() >= max {
                break;
            }
            picked.push(img.clone());
        }
        picked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_domain::fragment::{Citation, SourceApp};

    fn frag(id: &str, doc_id: &str) -> Fragment {
        Fragment {
            id: id.into(),
            content: "c".into(),
            source: Citation {
                doc_id: doc_id.into(),
                title: "t".into(),
                url: None,
                app: SourceApp::KnowledgeBase,
                entity: None,
                chunk_index: 0,
            },
            confidence: 0.5,
            images: vec![],
        }
    }

    fn img(name: &str, turn: u32, user: bool) -> FragmentImageReference {
        FragmentImageReference {
            file_name: name.into(),
            added_at_turn: turn,
            source_fragment_id: "f".into(),
            source_tool_name: "searchGlobal".into(),
            is_user_attachment: user,
        }
    }

    #[test]
    fn admitted_fragments_enter_seen_set_immediately() {
        let mut store = FragmentStore::new();
        store.admit(frag("f1", "d1"), 0);
        assert!(store.has_seen("f1"));
        assert!(store.has_seen("d1"));
        assert!(store.is_duplicate(&frag("f2", "d1")));
        assert!(!store.is_duplicate(&frag("f3", "d3")));
    }

    #[test]
    fn excluded_ids_count_as_seen() {
        let mut store = FragmentStore::new();
        store.exclude_documents(vec!["dx".into()]);
        assert!(store.is_duplicate(&frag("f9", "dx")));
    }

    #[test]
    fn finalize_turn_resets_window_but_keeps_run_state() {
        let mut store = FragmentStore::new();
        store.admit(frag("f1", "d1"), 0);
        let artifacts = store.finalize_turn();
        assert_eq!(artifacts.fragment_ids, vec!["f1"]);
        assert!(store.current_turn().fragment_ids.is_empty());
        assert_eq!(store.len(), 1);

        store.admit(frag("f2", "d2"), 1);
        assert_eq!(store.current_turn().fragment_ids, vec!["f2"]);
        assert_eq!(store.fragments_for_turn(0), &["f1"]);
        assert_eq!(store.fragments_for_turn(1), &["f2"]);
        assert!(store.fragments_for_turn(9).is_empty());
    }

    #[test]
    fn images_are_indexed_per_turn_and_globally() {
        let mut store = FragmentStore::new();
        store.add_image(img("0_d1_1", 0, false));
        store.add_image(img("1_d2_1", 1, false));
        assert_eq!(store.images().len(), 2);
        assert_eq!(store.images_for_turn(1), &["1_d2_1"]);
        assert!(store.images_for_turn(5).is_empty());
    }

    #[test]
    fn image_selection_prefers_attachments_then_recency() {
        let mut store = FragmentStore::new();
        store.add_image(img("0_d1_1", 0, false));
        store.add_image(img("0_att_1", 0, true));
        store.add_image(img("1_d2_1", 1, false));
        store.add_image(img("2_d3_1", 2, false));

        let picked = store.images_for_synthesis(3);
        let names: Vec<_> = picked.iter().map(|i| i.file_name.as_str()).collect();
        assert_eq!(names, vec!["0_att_1", "2_d3_1", "1_d2_1"]);
    }

    #[test]
    fn citation_lookup_uses_one_based_ordinal() {
        let mut store = FragmentStore::new();
        let mut f = frag("f1", "d1");
        f.source.chunk_index = 2;
        store.admit(f, 0);
        assert!(store.by_citation("d1", 3).is_some());
        assert!(store.by_citation("d1", 2).is_none());
    }

    #[test]
    fn recent_returns_tail() {
        let mut store = FragmentStore::new();
        for i in 0..5 {
            store.admit(frag(&format!("f{i}"), &format!("d{i}")), 0);
        }
        let recent = store.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "f3");
    }
}
