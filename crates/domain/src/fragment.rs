//! Evidence fragments — the unit of citable content flowing from tools to
//! the final synthesized answer.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// The application a fragment was retrieved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceApp {
    Gmail,
    GoogleDrive,
    GoogleCalendar,
    GoogleWorkspace,
    Slack,
    KnowledgeBase,
    /// Result attributed to a delegated sub-agent.
    Agent,
    /// User-provided attachment.
    Attachment,
    /// MCP connector output.
    Mcp,
}

impl fmt::Display for SourceApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceApp::Gmail => "gmail",
            SourceApp::GoogleDrive => "google-drive",
            SourceApp::GoogleCalendar => "google-calendar",
            SourceApp::GoogleWorkspace => "google-workspace",
            SourceApp::Slack => "slack",
            SourceApp::KnowledgeBase => "knowledge-base",
            SourceApp::Agent => "agent",
            SourceApp::Attachment => "attachment",
            SourceApp::Mcp => "mcp",
        };
        f.write_str(s)
    }
}

/// Source citation carried by every fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub doc_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub app: SourceApp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    /// Chunk index within the document, used by the `K[docId_chunkIndex]`
    /// citation format.
    #[serde(default)]
    pub chunk_index: u32,
}

/// A unit of evidence: content plus its source citation.
///
/// Ids are unique within one run; the fragment store enforces this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: String,
    pub content: String,
    pub source: Citation,
    /// Retrieval confidence in `[0, 1]`.
    pub confidence: f64,
    /// Image file names referenced by this fragment's content.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl Fragment {
    /// The `docId_chunkOrdinal` key cited by the synthesizer. The chunk
    /// ordinal is 1-based on the wire.
    pub fn citation_key(&self) -> String {
        format!("{}_{}", self.source.doc_id, self.source.chunk_index + 1)
    }
}

/// An image discovered in fragment content, indexed per turn and run-wide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentImageReference {
    pub file_name: String,
    pub added_at_turn: u32,
    pub source_fragment_id: String,
    pub source_tool_name: String,
    #[serde(default)]
    pub is_user_attachment: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Image filename scanning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn image_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // {docIndex}_{docId}_{pageOrChunk}, e.g. "0_doc-abc123_4".
    RE.get_or_init(|| Regex::new(r"\b(\d+)_([A-Za-z0-9][A-Za-z0-9._-]*)_(\d+)\b").unwrap())
}

/// Scan text for image filename tokens of the form
/// `{docIndex}_{docId}_{pageOrChunk}`, preserving first-seen order.
pub fn scan_image_names(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut names = Vec::new();
    for cap in image_name_re().captures_iter(text) {
        let name = cap[0].to_string();
        if seen.insert(name.clone()) {
            names.push(name);
        }
    }
    names
}
