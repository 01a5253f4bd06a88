use crate::traits::ToolCall;
use serde_json::Value;

const OPEN_TAG: &str = "<tool_call>";
const CLOSE_TAG: &str = "</tool_call>";

/// Splits `text` into the prose around the tags and the calls inside them.
///
/// An unterminated block is left in the prose untouched.
pub fn extract_tool_calls(text: &str) -> (String, Vec<ToolCall>) {
    if !text.contains(OPEN_TAG) {
        return (text.to_string(), Vec::new());
    }

    let mut prose = Vec::new();
    let mut calls = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(OPEN_TAG) {
        let after_open = &rest[start + OPEN_TAG.len()..];
        let Some(end) = after_open.find(CLOSE_TAG) else {
            break;
        };

        let before = rest[..start].trim();
        if !before.is_empty() {
            prose.push(before.to_string());
        }
        for value in json_objects(&after_open[..end]) {
            if let Some(call) = to_call(&value, calls.len()) {
                calls.push(call);
            }
        }
        rest = &after_open[end + CLOSE_TAG.len()..];
    }

    let tail = rest.trim();
    if !tail.is_empty() {
        prose.push(tail.to_string());
    }

    (prose.join("\n"), calls)
}

/// Top-level `{...}` objects in `text` that parse as JSON.
fn json_objects(text: &str) -> Vec<Value> {
    let mut values = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0
                    && let Some(s) = start.take()
                    && let Ok(value) = serde_json::from_str::<Value>(&text[s..=i])
                {
                    values.push(value);
                }
            }
            _ => {}
        }
    }

    values
}

/// Ids hash the call's position too, so repeated identical calls in one
/// reply stay distinguishable.
fn to_call(value: &Value, index: usize) -> Option<ToolCall> {
    let name = value.get("name")?.as_str()?.to_string();
    let arguments = match value.get("arguments") {
        Some(Value::String(raw)) => raw.clone(),
        Some(args) => serde_json::to_string(args).ok()?,
        None => "{}".to_string(),
    };
    let digest = md5::compute(format!("{}:{}:{}", index, name, arguments).as_bytes());

    Some(ToolCall {
        id: format!("call_{:x}", digest),
        name,
        arguments,
    })
}
