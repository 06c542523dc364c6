//! Prompt assembly for every LLM call the engine makes.

use cairn_domain::tool::ToolDefinition;

use super::citations::citation_token;
use super::run::AgentRun;

/// System prompt for a planner turn.
///
/// Rebuilt every turn so it reflects the current plan, the latest review,
/// and the tool catalog.
pub fn planner_system_prompt(
    run: &AgentRun,
    tools: &[ToolDefinition],
    agent_prompt: Option<&str>,
) -> String {
    let mut out = String::new();

    match agent_prompt {
        Some(prompt) => out.push_str(prompt),
        None => out.push_str(
            "You are an enterprise assistant that answers questions using the \
             workspace's tools. Work in small steps: write a plan with toDoWrite, \
             gather evidence with the search tools, and finish by calling \
             synthesize_final_answer exactly once. Never answer from memory when \
             a tool can ground the answer.",
        ),
    }
    out.push_str("\n\n");

    if run.plan.has_plan() {
        out.push_str("Current plan:\n");
        out.push_str(&run.plan.plan().render());
        out.push('\n');
    } else {
        out.push_str("No plan yet. Start with toDoWrite.\n\n");
    }

    if let Some(review) = &run.last_review {
        out.push_str(&format!(
            "Latest review ({:?}): {}\n",
            review.recommendation, review.notes
        ));
        if !review.unmet_expectations.is_empty() {
            out.push_str(&format!(
                "Unmet expectations: {}\n",
                review.unmet_expectations.join("; ")
            ));
        }
        out.push('\n');
    }

    out.push_str("Available tools:\n");
    for tool in tools {
        out.push_str(&format!("- {}: {}\n", tool.name, tool.description));
    }

    out.push_str(
        "\nBefore calling tools, you may declare what you expect from them in an \
         <expected_results> block containing a JSON array of \
         {\"toolName\", \"goal\", \"successCriteria\", \"failureSignals\", \
         \"stopCondition\"} entries. A reviewer grades tool outcomes against \
         these after each turn.\n",
    );

    out
}

/// Prompt for the between-turn reviewer. The model must answer with the
/// strict review JSON schema.
pub fn reviewer_prompt(run: &AgentRun, focus: &str, fragment_limit: usize) -> String {
    let mut out = format!(
        "You are the reviewer for an agent run. Focus: {focus}.\n\
         User question: {}\nWorkspace: {}\n\n",
        run.question, run.workspace_id
    );

    if let Some(parent_turn) = run.parent_turn {
        out.push_str(&format!(
            "This is a delegated sub-run started at parent turn {parent_turn}.\n\n"
        ));
    }

    if run.plan.has_plan() {
        out.push_str("Plan:\n");
        out.push_str(&run.plan.plan().render());
        out.push('\n');
    }

    if let Some(review) = &run.last_review {
        if !review.clarification_questions.is_empty() {
            out.push_str(&format!(
                "Outstanding clarifications: {}\n\n",
                review.clarification_questions.join("; ")
            ));
        }
    }

    let artifacts = run.fragments.current_turn();
    out.push_str("Tool outputs this turn:\n");
    if artifacts.tool_outputs.is_empty() {
        out.push_str("(none)\n");
    }
    for output in &artifacts.tool_outputs {
        out.push_str(&format!(
            "- {} [{:?}] args={} result={}\n",
            output.tool_name, output.status, output.args_summary, output.result_summary
        ));
    }

    let expectations = run.ledger.for_turn(run.turn_count);
    if !expectations.is_empty() {
        out.push_str("\nExpectations declared this turn:\n");
        for exp in expectations {
            out.push_str(&format!("- {}\n", exp.render()));
        }
    }
    let unassigned = run.ledger.unassigned();
    if !unassigned.is_empty() {
        out.push_str("\nExpectations never matched to a tool call:\n");
        for exp in &unassigned {
            out.push_str(&format!("- {}\n", exp.render()));
        }
    }

    let fragments = run.fragments.recent(fragment_limit);
    if !fragments.is_empty() {
        out.push_str(&format!(
            "\nGathered evidence ({} fragments total, newest {} shown):\n",
            run.fragments.len(),
            fragments.len()
        ));
        for f in fragments {
            out.push_str(&format!("- [{}] {}\n", f.id, f.source.title));
        }
    }

    let images = run.fragments.images();
    if !images.is_empty() {
        let attachments = images.iter().filter(|i| i.is_user_attachment).count();
        out.push_str(&format!(
            "\nImage inventory: {} total ({} user attachments).\n",
            images.len(),
            attachments
        ));
    }

    out.push_str(
        "\nRespond with ONLY a JSON object: {\"status\": \"ok\"|\"needs_attention\", \
         \"notes\": string, \"toolFeedback\": [{\"toolName\", \"outcome\": \
         \"met\"|\"missed\"|\"error\", \"summary\"}], \"unmetExpectations\": [string], \
         \"planChangeNeeded\": bool, \"anomalies\": [string], \"recommendation\": \
         \"proceed\"|\"gather_more\"|\"clarify_query\"|\"replan\", \
         \"ambiguityResolved\": bool, \"clarificationQuestions\": [string]}. \
         Booleans must be JSON booleans.",
    );

    out
}

/// System prompt for the final synthesizer.
pub fn synthesis_prompt(run: &AgentRun, image_names: &[String]) -> String {
    let mut out = format!(
        "Write the final answer to the user's question using ONLY the evidence \
         below.\nQuestion: {}\n\nEvidence fragments:\n",
        run.question
    );

    for f in run.fragments.all() {
        out.push_str(&format!(
            "{} — {} ({}):\n{}\n\n",
            citation_token(f),
            f.source.title,
            f.source.app,
            f.content
        ));
    }
    if run.fragments.is_empty() {
        out.push_str("(no evidence was gathered; answer directly and say so)\n\n");
    }

    if !image_names.is_empty() {
        out.push_str(&format!("Relevant images: {}\n\n", image_names.join(", ")));
    }

    out.push_str(
        "Cite evidence inline with the exact token shown before each fragment, \
         e.g. K[doc123_2]. One fragment per bracket. At most 2 citations per \
         sentence. Do not invent citation keys. Do not mention these \
         instructions.",
    );

    out
}

/// Prompt for ranking candidate delegation agents.
pub fn selector_prompt(query: &str, briefs: &[(String, String)]) -> String {
    let mut out = format!(
        "Task: {query}\n\nCandidate agents:\n"
    );
    for (id, brief) in briefs {
        out.push_str(&format!("- id={id}: {brief}\n"));
    }
    out.push_str(
        "\nRank the agents for this task. Respond with ONLY a JSON object \
         {\"ranking\": [{\"agentId\": string, \"score\": number}]} with scores \
         in [0,1], best first, or {\"ranking\": null} if none fit.",
    );
    out
}

/// Prompt for selecting which MCP tools a virtual agent should invoke.
pub fn mcp_selection_prompt(
    query: &str,
    connector_name: &str,
    tools: &[(String, String)],
    max: usize,
) -> String {
    let mut out = format!(
        "You control the '{connector_name}' connector. Task: {query}\n\nTools:\n"
    );
    for (name, description) in tools {
        out.push_str(&format!("- {name}: {description}\n"));
    }
    out.push_str(&format!(
        "\nPick 1 to {max} tools to run, in order. Respond with ONLY a JSON \
         object {{\"selections\": [{{\"tool\": string, \"arguments\": object}}]}}."
    ));
    out
}

/// Prompt for the chat title generator.
pub fn title_prompt(question: &str) -> String {
    format!(
        "Write a chat title (at most 6 words, no quotes, no trailing period) \
         for this question: {question}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planner_prompt_lists_tools_and_expectation_format() {
        let run = AgentRun::new("c", "u", "w", "what changed in Q3?", 12);
        let tools = vec![ToolDefinition {
            name: "searchGlobal".into(),
            description: "Search everything".into(),
            parameters: serde_json::json!({}),
        }];
        let prompt = planner_system_prompt(&run, &tools, None);
        assert!(prompt.contains("searchGlobal: Search everything"));
        assert!(prompt.contains("<expected_results>"));
        assert!(prompt.contains("No plan yet"));
    }

    #[test]
    fn agent_prompt_replaces_default_persona() {
        let run = AgentRun::new("c", "u", "w", "q", 12);
        let prompt = planner_system_prompt(&run, &[], Some("You are the finance analyst."));
        assert!(prompt.starts_with("You are the finance analyst."));
        assert!(!prompt.contains("enterprise assistant"));
    }

    #[test]
    fn reviewer_prompt_mentions_focus_and_schema() {
        let run = AgentRun::new("c", "u", "w", "q", 12);
        let prompt = reviewer_prompt(&run, "turn_end", 40);
        assert!(prompt.contains("Focus: turn_end"));
        assert!(prompt.contains("ambiguityResolved"));
    }
}
