//! Document ranker — a secondary LLM pass that filters candidate
//! fragments for relevance to the user's question.

use std::sync::Arc;

use cairn_domain::fragment::Fragment;
use cairn_providers::{ChatRequest, LlmProvider};

use cairn_domain::tool::Message;

/// Ask the fast model which candidates to keep.
///
/// The model sees the question plus each candidate's title and content
/// and must answer with a JSON array of 1-based indexes. On any error,
/// or when the model returns no indexes, every candidate is kept.
pub async fn rank_fragments(
    provider: Option<(Arc<dyn LlmProvider>, Option<String>)>,
    question: &str,
    candidates: Vec<Fragment>,
) -> Vec<Fragment> {
    if candidates.len() <= 1 {
        return candidates;
    }
    let Some((provider, model)) = provider else {
        return candidates;
    };

    let mut listing = String::new();
    for (i, f) in candidates.iter().enumerate() {
        listing.push_str(&format!(
            "{}. {} — {}\n",
            i + 1,
            f.source.title,
            truncated(&f.content, 400)
        ));
    }
    let prompt = format!(
        "Question: {question}\n\nCandidate documents:\n{listing}\n\
         Reply with a JSON array of the 1-based indexes of documents that \
         help answer the question, most relevant first. Reply with [] if \
         none do. No other text."
    );

    let req = ChatRequest {
        messages: vec![Message::user(prompt)],
        temperature: Some(0.0),
        model,
        ..Default::default()
    };

    let keep = match provider.chat(&req).await {
        Ok(resp) => parse_indexes(&resp.content, candidates.len()),
        Err(e) => {
            tracing::warn!(error = %e, "document ranker call failed, keeping all candidates");
            return candidates;
        }
    };

    match keep {
        Some(indexes) if !indexes.is_empty() => {
            let kept: Vec<Fragment> = indexes
                .into_iter()
                .map(|i| candidates[i - 1].clone())
                .collect();
            tracing::debug!(
                kept = kept.len(),
                total = candidates.len(),
                "ranker filtered candidates"
            );
            kept
        }
        _ => candidates,
    }
}

/// Parse a JSON array of 1-based indexes out of model text, dropping
/// out-of-range and duplicate entries.
fn parse_indexes(text: &str, len: usize) -> Option<Vec<usize>> {
    let start = text.find('[')?;
    let end = text[start..].find(']')? + start;
    let arr: Vec<serde_json::Value> = serde_json::from_str(&text[start..=end]).ok()?;
    let mut seen = std::collections::HashSet::new();
    let indexes: Vec<usize> = arr
        .into_iter()
        .filter_map(|v| v.as_u64().map(|n| n as usize))
        .filter(|&i| i >= 1 && i <= len && seen.insert(i))
        .collect();
    Some(indexes)
}

fn truncated(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_domain::fragment::{Citation, SourceApp};
    use cairn_providers::mock::{MockProvider, ScriptedResponse};

    fn frag(id: &str) -> Fragment {
        Fragment {
            id: id.into(),
            content: format!("content of {id}"),
            source: Citation {
                doc_id: id.into(),
                title: format!("title {id}"),
                url: None,
                app: SourceApp::KnowledgeBase,
                entity: None,
                chunk_index: 0,
            },
            confidence: 0.7,
            images: vec![],
        }
    }

    #[test]
    fn parse_indexes_filters_garbage() {
        assert_eq!(parse_indexes("[2, 1, 9, 2, 0]", 3), Some(vec![2, 1]));
        assert_eq!(parse_indexes("keep [1] only", 3), Some(vec![1]));
        assert_eq!(parse_indexes("no array here", 3), None);
        assert_eq!(parse_indexes("[]", 3), Some(vec![]));
    }

    #[tokio::test]
    async fn keeps_selected_in_ranked_order() {
        let mock: Arc<dyn LlmProvider> = Arc::new(MockProvider::with_script(
            "fast",
            vec![ScriptedResponse::text("[3, 1]")],
        ));
        let kept = rank_fragments(
            Some((mock, None)),
            "which doc?",
            vec![frag("a"), frag("b"), frag("c")],
        )
        .await;
        let ids: Vec<_> = kept.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn keeps_all_on_empty_response_and_on_error() {
        let mock: Arc<dyn LlmProvider> = Arc::new(MockProvider::with_script(
            "fast",
            vec![ScriptedResponse::text("[]")],
        ));
        let kept = rank_fragments(
            Some((mock.clone(), None)),
            "q",
            vec![frag("a"), frag("b")],
        )
        .await;
        assert_eq!(kept.len(), 2);

        // Script exhausted -> provider errors -> keep all.
        let kept = rank_fragments(Some((mock, None)), "q", vec![frag("a"), frag("b")]).await;
        assert_eq!(kept.len(), 2);
    }

    #[tokio::test]
    async fn single_candidate_skips_the_call() {
        let mock = Arc::new(MockProvider::new("fast"));
        let calls = mock.calls();
        let kept = rank_fragments(
            Some((mock as Arc<dyn LlmProvider>, None)),
            "q",
            vec![frag("only")],
        )
        .await;
        assert_eq!(kept.len(), 1);
        assert!(calls.lock().is_empty());
    }
}
