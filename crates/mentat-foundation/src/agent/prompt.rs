//! 提示词辅助函数
//! Prompt helpers shared by the reasoning engines

use mentat_kernel::agent::error::{AgentError, AgentResult};
use mentat_kernel::agent::types::{AgentInput, ToolArgs, value_to_text};
use serde_json::Value;

/// Task text followed by the input context, keys sorted.
pub fn render_task(input: &AgentInput) -> String {
    if input.context.is_empty() {
        return input.task.clone();
    }
    let mut keys: Vec<&String> = input.context.keys().collect();
    keys.sort();
    let context = keys
        .into_iter()
        .map(|k| format!("- {k}: {}", value_to_text(&input.context[k])))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}\n\nContext:\n{context}", input.task)
}

/// Truncate to at most `max_chars` characters, marking the cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...[truncated]", &text[..idx]),
        None => text.to_string(),
    }
}

/// 从响应中提取 JSON 块
/// Extract a JSON block from a response
///
/// Looks for a ```json fence, then a bare fence holding JSON, then the
/// outermost braces or brackets.
pub fn extract_json_block(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let content = &text[start + 7..];
        if let Some(end) = content.find("```") {
            return Some(content[..end].trim());
        }
    }

    if let Some(start) = text.find("```") {
        let content = &text[start + 3..];
        if let Some(end) = content.find("```") {
            let block = content[..end].trim();
            if block.starts_with('{') || block.starts_with('[') {
                return Some(block);
            }
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}'))
        && end > start
    {
        return Some(&text[start..=end]);
    }
    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']'))
        && end > start
    {
        return Some(&text[start..=end]);
    }
    None
}

/// 解析 LLM 返回的 JSON
/// Parse JSON out of a model response
pub fn parse_llm_json<T: serde::de::DeserializeOwned>(response: &str) -> AgentResult<T> {
    let json_str = extract_json_block(response).unwrap_or(response);
    serde_json::from_str(json_str)
        .map_err(|e| AgentError::ParserFailed(format!("invalid JSON in model response: {e}")))
}

/// Tool arguments from free text: a JSON object is used as is, any other
/// text is passed as a single `input` field.
pub fn parse_tool_args(raw: &str) -> ToolArgs {
    let trimmed = raw.trim().trim_matches('`').trim();
    let trimmed = trimmed.strip_prefix("json").map(str::trim).unwrap_or(trimmed);
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => map,
        Ok(Value::String(s)) => single_input(Value::String(s)),
        Ok(other) if !other.is_null() => single_input(other),
        _ => single_input(Value::String(raw.trim().to_string())),
    }
}

fn single_input(value: Value) -> ToolArgs {
    let mut args = ToolArgs::new();
    args.insert("input".to_string(), value);
    args
}
