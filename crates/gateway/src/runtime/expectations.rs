//! Expectation ledger.
//!
//! Parses `<expected_results>` blocks out of assistant text, queues the
//! validated entries, and hands them to tool calls FIFO by tool name.
//! Whatever is never assigned surfaces to the reviewer as unmet.

use std::collections::{BTreeMap, VecDeque};
use std::sync::OnceLock;

use regex::Regex;

use cairn_domain::expectation::Expectation;

fn block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<expected_results>(.*?)</expected_results>").unwrap()
    })
}

/// Parse every `<expected_results>` block in `text`.
///
/// Blocks hold either a JSON array of expectations or an object with a
/// `toolExpectations` array. Entries failing the schema are dropped with
/// a warning.
pub fn extract(text: &str) -> Vec<Expectation> {
    let mut out = Vec::new();
    for cap in block_re().captures_iter(text) {
        let body = cap[1].trim();
        let parsed: Option<Vec<serde_json::Value>> =
            match serde_json::from_str::<serde_json::Value>(body) {
                Ok(serde_json::Value::Array(items)) => Some(items),
                Ok(serde_json::Value::Object(mut obj)) => match obj.remove("toolExpectations") {
                    Some(serde_json::Value::Array(items)) => Some(items),
                    _ => None,
                },
                _ => None,
            };

        let Some(items) = parsed else {
            tracing::warn!("unparseable <expected_results> block dropped");
            continue;
        };

        for item in items {
            match serde_json::from_value::<Expectation>(item) {
                Ok(exp) if exp.is_valid() => out.push(exp),
                Ok(exp) => {
                    tracing::warn!(tool = %exp.tool_name, "invalid expectation dropped");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed expectation entry dropped");
                }
            }
        }
    }
    out
}

#[derive(Default)]
pub struct ExpectationLedger {
    /// Validated expectations awaiting assignment, FIFO.
    pending: VecDeque<Expectation>,
    /// Expectations declared before the first turn started.
    pre_turn_buffer: Vec<Expectation>,
    history: BTreeMap<u32, Vec<Expectation>>,
    started: bool,
}

impl ExpectationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest expectations extracted from assistant text during `turn`.
    pub fn ingest(&mut self, expectations: Vec<Expectation>, turn: u32) {
        if !self.started {
            self.pre_turn_buffer.extend(expectations.iter().cloned());
        } else {
            self.record_for_turn(turn, expectations.iter().cloned());
        }
        self.pending.extend(expectations);
    }

    /// Flush the pre-turn buffer into the first turn's history. Applied
    /// exactly once.
    pub fn on_turn_start(&mut self, turn: u32) {
        if self.started {
            return;
        }
        self.started = true;
        let buffered = std::mem::take(&mut self.pre_turn_buffer);
        self.record_for_turn(turn, buffered);
    }

    pub fn record_for_turn<I: IntoIterator<Item = Expectation>>(&mut self, turn: u32, exps: I) {
        let entry = self.history.entry(turn).or_default();
        entry.extend(exps);
    }

    /// Pop the first pending expectation matching the tool name
    /// (case-insensitive).
    pub fn assign(&mut self, tool_name: &str) -> Option<Expectation> {
        let idx = self
            .pending
            .iter()
            .position(|e| e.tool_name.eq_ignore_ascii_case(tool_name))?;
        self.pending.remove(idx)
    }

    /// Expectations never matched to a tool call.
    pub fn unassigned(&self) -> Vec<Expectation> {
        self.pending.iter().cloned().collect()
    }

    pub fn for_turn(&self, turn: u32) -> &[Expectation] {
        self.history.get(&turn).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exp(tool: &str) -> Expectation {
        Expectation {
            tool_name: tool.into(),
            goal: format!("goal for {tool}"),
            success_criteria: vec!["something found".into()],
            failure_signals: vec![],
            stop_condition: None,
        }
    }

    #[test]
    fn extract_array_block() {
        let text = r#"Let me search.
<expected_results>
[{"toolName":"searchGlobal","goal":"find the doc","successCriteria":["one hit"]}]
</expected_results>"#;
        let exps = extract(text);
        assert_eq!(exps.len(), 1);
        assert_eq!(exps[0].tool_name, "searchGlobal");
    }

    #[test]
    fn extract_tool_expectations_object() {
        let text = r#"<expected_results>{"toolExpectations":[
            {"toolName":"searchGmail","goal":"find the thread","successCriteria":["thread found"]},
            {"toolName":"searchDrive","goal":"find slides","successCriteria":["deck found"]}
        ]}</expected_results>"#;
        let exps = extract(text);
        assert_eq!(exps.len(), 2);
    }

    #[test]
    fn extract_drops_invalid_entries() {
        let text = r#"<expected_results>
[{"toolName":"searchGlobal","goal":"ok","successCriteria":["x"]},
 {"toolName":"","goal":"no tool","successCriteria":["x"]},
 {"not":"an expectation"}]
</expected_results>"#;
        let exps = extract(text);
        assert_eq!(exps.len(), 1);
    }

    #[test]
    fn extract_multiple_blocks() {
        let text = r#"
<expected_results>[{"toolName":"a","goal":"g","successCriteria":["c"]}]</expected_results>
middle text
<expected_results>[{"toolName":"b","goal":"g","successCriteria":["c"]}]</expected_results>"#;
        assert_eq!(extract(text).len(), 2);
    }

    #[test]
    fn round_trip_serialize_extract() {
        let original = vec![exp("searchGlobal"), exp("searchGmail")];
        let block = format!(
            "<expected_results>{}</expected_results>",
            serde_json::to_string(&original).unwrap()
        );
        assert_eq!(extract(&block), original);
    }

    #[test]
    fn assignment_is_fifo_case_insensitive() {
        let mut ledger = ExpectationLedger::new();
        let mut first = exp("searchGlobal");
        first.goal = "first".into();
        let mut second = exp("searchGlobal");
        second.goal = "second".into();
        ledger.ingest(vec![first, second, exp("searchGmail")], 0);

        assert_eq!(ledger.assign("SEARCHGLOBAL").unwrap().goal, "first");
        assert_eq!(ledger.assign("searchglobal").unwrap().goal, "second");
        assert!(ledger.assign("searchGlobal").is_none());
        assert_eq!(ledger.unassigned().len(), 1);
    }

    #[test]
    fn pre_turn_buffer_flushes_once() {
        let mut ledger = ExpectationLedger::new();
        ledger.ingest(vec![exp("searchGlobal")], 0);
        assert!(ledger.for_turn(0).is_empty());

        ledger.on_turn_start(0);
        assert_eq!(ledger.for_turn(0).len(), 1);

        // A second turn start must not re-apply the buffer.
        ledger.on_turn_start(1);
        assert!(ledger.for_turn(1).is_empty());
        assert_eq!(ledger.for_turn(0).len(), 1);
    }

    #[test]
    fn post_start_ingest_records_directly() {
        let mut ledger = ExpectationLedger::new();
        ledger.on_turn_start(0);
        ledger.ingest(vec![exp("searchDrive")], 2);
        assert_eq!(ledger.for_turn(2).len(), 1);
    }
}
