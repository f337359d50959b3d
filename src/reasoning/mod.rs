//! Multi-step reasoner (C9): an Explore→Plan→Execute→Conclude loop layered
//! on top of the same provider/router/spill core the single-shot
//! orchestrator (`agent.rs`) uses. Grounded in the teacher's `chat_loop`
//! driving pattern, generalized from tool-call-only iteration to the
//! plan/step/tag-extraction cycle this mode adds.

mod interpreter;

pub use interpreter::Interpreter;

use crate::llm::{LLMProvider, LoopAction, LoopDetector, StreamChunk, Tool, ToolCall};
use crate::log;
use crate::mcp::ServerPool;
use crate::router::route_tool_call;
use crate::spill::SpillConfig;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, thiserror::Error)]
pub enum ReasoningError {
    #[error(transparent)]
    Provider(#[from] crate::llm::ProviderError),
}

/// Tunables for one reasoning run. `max_iterations = 0` means the execute
/// loop body never runs and the engine reports failure immediately.
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    pub max_iterations: usize,
    pub enable_planning: bool,
    pub is_reasoning: bool,
    pub loop_detector: Option<crate::llm::LoopDetectorConfig>,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            enable_planning: true,
            is_reasoning: false,
            loop_detector: None,
        }
    }
}

const REASONING_SYSTEM_PROMPT: &str = "\
You work through problems in four phases: Explore, Plan, Execute, Conclude. \
At each step, take exactly one action:\n\
- To run code, emit <python>...</python> (or a fenced ```python block).\n\
- To call a tool, emit <tool_code>{\"name\": \"server_tool\"}</tool_code>.\n\
- To finish, emit <final_answer>...</final_answer>, <ask>...</ask> for a \
clarifying question, or <monitor>...</monitor> to report an ongoing watch.\n\
Take one action per turn and wait for its result before continuing.";

static CALL_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Runs the plan phase and then the execute loop to completion, returning
/// `(success, answer)`.
pub async fn run_query<P: LLMProvider>(
    provider: &P,
    pool: &ServerPool,
    tools: &[Tool],
    query: &str,
    config: ReasoningConfig,
    mut on_trace: impl FnMut(&str),
) -> (bool, String) {
    let plan = plan_phase(provider, query, tools, &config).await;
    on_trace(&format!("[plan] {}", plan));

    execute_reasoning_loop(provider, pool, tools, query, &plan, config, &mut on_trace).await
}

/// §4.9 plan phase. Never returns an `Err` — every failure mode collapses
/// into the documented fallback strings instead.
async fn plan_phase<P: LLMProvider>(
    provider: &P,
    query: &str,
    tools: &[Tool],
    config: &ReasoningConfig,
) -> String {
    if !config.enable_planning {
        return "No specific plan - proceeding with direct execution.".to_string();
    }

    let names = tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ");
    let role = if config.is_reasoning { "developer" } else { "system" };
    let prompt = format!(
        "[{role}] Break the following query into sub-questions, extract the \
relevant entities, identify which of these tools (by name only) could help \
-- START TOOLS\n{tools}\nEND TOOLS -- state any constraints, and outline a \
solution approach.\n\nQuery: {query}",
        role = role,
        tools = names,
        query = query,
    );

    match ask_model(provider, &prompt).await {
        Ok(text) => text,
        Err(err) => format!("Planning failed: {}. Proceeding with basic approach.", err),
    }
}

/// §4.9 execute phase.
async fn execute_reasoning_loop<P: LLMProvider>(
    provider: &P,
    pool: &ServerPool,
    tools: &[Tool],
    query: &str,
    plan: &str,
    config: ReasoningConfig,
    on_trace: &mut impl FnMut(&str),
) -> (bool, String) {
    let mut interpreter = Interpreter::new();
    interpreter.reset();

    let mut detector = config.loop_detector.clone().map(LoopDetector::with_config);

    let spill_config = SpillConfig::default();

    let mut transcript = format!(
        "{}\n\nUser query: {}\n\nPlan:\n{}\n",
        REASONING_SYSTEM_PROMPT, query, plan
    );

    for _ in 0..config.max_iterations {
        let assistant_text = match ask_model(provider, &transcript).await {
            Ok(text) => text,
            Err(err) => {
                on_trace(&format!("[error] {}", err));
                transcript.push_str(&format!(
                    "\nAssistant: (call failed: {})\n",
                    err
                ));
                continue;
            }
        };
        on_trace(&assistant_text);
        transcript.push_str(&format!("\nAssistant: {}\n", assistant_text));

        let tool_calls = extract_all(&assistant_text, "tool_code");
        let mut ran_code = false;

        if !tool_calls.is_empty() {
            for raw in &tool_calls {
                let Some(name) = parse_tool_name(raw) else {
                    transcript.push_str("\nUser: <tool_output>{\"error\": \"malformed tool_code block\"}</tool_output>\n");
                    continue;
                };

                let Some(descriptor) = tools.iter().find(|t| t.name == name) else {
                    transcript.push_str(&format!(
                        "\nUser: <tool_output>{{\"error\": \"unknown tool '{}'\"}}</tool_output>\n",
                        name
                    ));
                    continue;
                };

                let arguments = match generate_tool_arguments(provider, &transcript, descriptor).await {
                    Ok(args) => args,
                    Err(raw_response) => {
                        let observation = serde_json::json!({"error": "failed to parse argument JSON", "raw_response": raw_response});
                        transcript.push_str(&format!("\nUser: <tool_output>{}</tool_output>\n", observation));
                        continue;
                    }
                };

                let call = ToolCall {
                    id: format!("reasoning-{}", CALL_COUNTER.fetch_add(1, Ordering::SeqCst)),
                    name: name.clone(),
                    arguments,
                };

                if let Some(detector) = detector.as_mut() {
                    if let Some(detection) = detector.check(&call) {
                        log(format!("[reasoning] loop detected: {:?}", detection.loop_type));
                        if detection.action == LoopAction::Terminate {
                            return (
                                false,
                                format!(
                                    "Process stopped after detecting a repeating loop ({:?}).",
                                    detection.loop_type
                                ),
                            );
                        }
                        if let Some(warning) = &detection.warning_message {
                            transcript.push_str(&format!("\nUser: {}\n", warning));
                        }
                    }
                }

                let message = route_tool_call(pool, &call, spill_config).await;
                transcript.push_str(&format!("\nUser: <tool_output>{}</tool_output>\n", message.content));
            }
        } else {
            let code_blocks = extract_code_blocks(&assistant_text);
            if !code_blocks.is_empty() {
                ran_code = true;
                for code in &code_blocks {
                    let output = interpreter.run(code);
                    transcript.push_str(&format!("\nUser: <code_output>{}</code_output>\n", output));
                }
            } else {
                transcript.push_str("\nUser: <no_code_output>No tool call or code block was found in the previous response.</no_code_output>\n");
            }
        }

        if ran_code {
            continue;
        }

        transcript.push_str(
            "\nUser: Provide your next step, or a <final_answer>, <ask>, or <monitor> block if you are done.\n",
        );

        if let Some((tag, content)) = last_terminal_tag(&assistant_text) {
            log(format!("[reasoning] terminal tag: {}", tag));
            return (true, content);
        }
    }

    (
        false,
        format!(
            "Process stopped after reaching maximum iterations ({}).",
            config.max_iterations
        ),
    )
}

/// Secondary call: ask the model to produce JSON arguments for one tool,
/// tolerating fenced code in the reply. Returns `Err(raw_response)` rather
/// than propagating a parse error.
async fn generate_tool_arguments<P: LLMProvider>(
    provider: &P,
    transcript: &str,
    tool: &Tool,
) -> Result<serde_json::Value, String> {
    let prompt = format!(
        "{}\n\nProduce ONLY a JSON object with the arguments for the tool \
'{}' (description: {}). Schema: {}. Do not include any other text.",
        transcript,
        tool.name,
        tool.description,
        tool.parameters,
    );

    let raw = ask_model(provider, &prompt).await.map_err(|e| e.to_string())?;
    let cleaned = strip_code_fence(&raw).trim().to_string();
    serde_json::from_str(&cleaned).map_err(|_| raw)
}

/// Drains `provider.chat()` to a single string, treating the streaming call
/// as the "non-streaming" ask the spec describes.
async fn ask_model<P: LLMProvider>(provider: &P, prompt: &str) -> Result<String, crate::llm::ProviderError> {
    let mut stream = provider.chat(prompt).await?;
    let mut content = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk? {
            StreamChunk::Content(text) => content.push_str(&text),
            StreamChunk::Thinking(_) => {}
            StreamChunk::ToolCallDelta { .. } => {}
            StreamChunk::Done { full_content, .. } => {
                if !full_content.is_empty() {
                    content = full_content;
                }
            }
        }
    }
    Ok(content)
}

fn parse_tool_name(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fence(raw).trim()).ok()?;
    value.get("name")?.as_str().map(str::to_string)
}

/// Strips a single layer of ` ``` ` or ` ```lang ` fencing from a block if
/// present, tolerating the model wrapping its structured output in markdown.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Returns every `<tag>...</tag>` occurrence, in document order.
fn extract_all(text: &str, tag: &str) -> Vec<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut out = Vec::new();
    let mut cursor = 0;
    while let Some(start) = text[cursor..].find(&open) {
        let content_start = cursor + start + open.len();
        let Some(end) = text[content_start..].find(&close) else {
            break;
        };
        out.push(text[content_start..content_start + end].trim().to_string());
        cursor = content_start + end + close.len();
    }
    out
}

fn tag_start(text: &str, tag: &str) -> Option<usize> {
    text.rfind(&format!("<{}>", tag))
}

/// Extracts `<python>` blocks, falling back to fenced ` ```python ` blocks.
fn extract_code_blocks(text: &str) -> Vec<String> {
    let tagged = extract_all(text, "python");
    if !tagged.is_empty() {
        return tagged;
    }

    let mut out = Vec::new();
    let marker = "```python";
    let mut cursor = 0;
    while let Some(start) = text[cursor..].find(marker) {
        let body_start = cursor + start + marker.len();
        let Some(end) = text[body_start..].find("```") else {
            break;
        };
        out.push(text[body_start..body_start + end].trim().to_string());
        cursor = body_start + end + 3;
    }
    out
}

/// Checks `<final_answer>`, `<ask>`, `<monitor>` in that priority order, but
/// when more than one is present, the tag whose *opening* marker occurs
/// latest in the text wins (§4.9 step 5).
fn last_terminal_tag(text: &str) -> Option<(&'static str, String)> {
    let candidates: [(&str, &str); 3] = [
        ("final_answer", "final_answer"),
        ("ask", "ask"),
        ("monitor", "monitor"),
    ];

    let mut best: Option<(usize, &'static str)> = None;
    for (label, tag) in candidates {
        if let Some(pos) = tag_start(text, tag) {
            if best.map(|(best_pos, _)| pos > best_pos).unwrap_or(true) {
                best = Some((pos, label));
            }
        }
    }

    let (_, label) = best?;
    let content = extract_all(text, label).pop()?;
    Some((label, content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_multiple_tool_code_blocks_in_order() {
        let text = r#"<tool_code>{"name": "a"}</tool_code> then <tool_code>{"name": "b"}</tool_code>"#;
        let blocks = extract_all(text, "tool_code");
        assert_eq!(blocks.len(), 2);
        assert_eq!(parse_tool_name(&blocks[0]), Some("a".to_string()));
        assert_eq!(parse_tool_name(&blocks[1]), Some("b".to_string()));
    }

    #[test]
    fn fenced_python_block_is_tolerated() {
        let text = "Let's compute:\n```python\nprint(1 + 1)\n```\n";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks, vec!["print(1 + 1)".to_string()]);
    }

    #[test]
    fn last_terminal_tag_wins_when_multiple_present() {
        let text = "<ask>which one?</ask> actually <final_answer>42</final_answer>";
        let (label, content) = last_terminal_tag(text).unwrap();
        assert_eq!(label, "final_answer");
        assert_eq!(content, "42");
    }

    #[test]
    fn no_terminal_tag_returns_none() {
        assert!(last_terminal_tag("still thinking").is_none());
    }

    #[test]
    fn strip_code_fence_unwraps_json_block() {
        let wrapped = "```json\n{\"x\": 1}\n```";
        assert_eq!(strip_code_fence(wrapped), "{\"x\": 1}");
    }
}
