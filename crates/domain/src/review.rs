//! Review verdicts — the strictly-typed output of the between-turn reviewer.

use serde::{Deserialize, Serialize};

/// What triggered a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewFocus {
    TurnEnd,
    ToolError,
    RunEnd,
}

impl ReviewFocus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewFocus::TurnEnd => "turn_end",
            ReviewFocus::ToolError => "tool_error",
            ReviewFocus::RunEnd => "run_end",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Ok,
    NeedsAttention,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    #[default]
    Proceed,
    GatherMore,
    ClarifyQuery,
    Replan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Met,
    Missed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolFeedback {
    pub tool_name: String,
    pub outcome: ToolOutcome,
    pub summary: String,
}

/// The reviewer's verdict for one turn (or the whole run).
///
/// Deserialization is lenient about missing optional fields but strict
/// about types: a non-boolean `planChangeNeeded` fails the parse, and the
/// caller falls back to [`ReviewResult::default_ok`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    pub status: ReviewStatus,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tool_feedback: Vec<ToolFeedback>,
    #[serde(default)]
    pub unmet_expectations: Vec<String>,
    #[serde(default)]
    pub plan_change_needed: bool,
    #[serde(default)]
    pub anomalies: Vec<String>,
    #[serde(default)]
    pub recommendation: Recommendation,
    #[serde(default)]
    pub ambiguity_resolved: bool,
    #[serde(default)]
    pub clarification_questions: Vec<String>,
}

impl ReviewResult {
    /// The fallback verdict used when the reviewer's output cannot be
    /// parsed, so the loop never halts on a malformed review.
    pub fn default_ok() -> Self {
        Self {
            status: ReviewStatus::Ok,
            notes: "No notable findings.".into(),
            tool_feedback: Vec::new(),
            unmet_expectations: Vec::new(),
            plan_change_needed: false,
            anomalies: Vec::new(),
            recommendation: Recommendation::Proceed,
            ambiguity_resolved: true,
            clarification_questions: Vec::new(),
        }
    }

    /// Parse a review payload out of raw model text.
    ///
    /// Strips code fences and leading prose, then requires the remainder to
    /// deserialize into the schema. Returns `None` on any mismatch.
    pub fn from_llm_text(text: &str) -> Option<Self> {
        let json = extract_json_object(text)?;
        serde_json::from_str(json).ok()
    }
}

/// Find the outermost `{ … }` object in a blob of model output.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => in_string = false,
                _ => escaped = false,
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_verdict() {
        let text = r#"{
            "status": "needs_attention",
            "notes": "gmail search missed the thread",
            "toolFeedback": [
                {"toolName": "searchGmail", "outcome": "missed", "summary": "no thread found"}
            ],
            "unmetExpectations": ["find contract email"],
            "planChangeNeeded": true,
            "anomalies": ["duplicate results from drive"],
            "recommendation": "gather_more",
            "ambiguityResolved": false,
            "clarificationQuestions": ["which quarter?"]
        }"#;
        let review = ReviewResult::from_llm_text(text).unwrap();
        assert_eq!(review.status, ReviewStatus::NeedsAttention);
        assert_eq!(review.recommendation, Recommendation::GatherMore);
        assert!(review.plan_change_needed);
        assert_eq!(review.tool_feedback[0].outcome, ToolOutcome::Missed);
    }

    #[test]
    fn parses_verdict_wrapped_in_fences_and_prose() {
        let text = "Here is my assessment:\n```json\n{\"status\": \"ok\"}\n```";
        let review = ReviewResult::from_llm_text(text).unwrap();
        assert_eq!(review.status, ReviewStatus::Ok);
    }

    #[test]
    fn rejects_non_boolean_flag() {
        let text = r#"{"status": "ok", "planChangeNeeded": "yes"}"#;
        assert!(ReviewResult::from_llm_text(text).is_none());
    }

    #[test]
    fn normalized_verdict_reserializes_valid() {
        let review = ReviewResult::from_llm_text(r#"{"status": "ok"}"#).unwrap();
        let json = serde_json::to_string(&review).unwrap();
        let back = ReviewResult::from_llm_text(&json).unwrap();
        assert_eq!(review, back);
    }

    #[test]
    fn braces_inside_strings_do_not_break_extraction() {
        let text = r#"{"status": "ok", "notes": "literal } brace and { brace"}"#;
        let review = ReviewResult::from_llm_text(text).unwrap();
        assert!(review.notes.contains('}'));
    }
}
