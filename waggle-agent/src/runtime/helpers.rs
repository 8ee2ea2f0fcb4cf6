use serde_json::Value;

/// Session title heuristic: first line of the first user turn, capped at 30
/// characters on a char boundary.
pub(super) fn derive_title(message: &str) -> String {
    let first_line = message.lines().next().unwrap_or("").trim();
    let char_count = first_line.chars().count();
    if char_count <= 30 {
        first_line.to_string()
    } else {
        let truncated: String = first_line.chars().take(30).collect();
        format!("{truncated}...")
    }
}

/// Cap a tool result before it enters the event log. String payloads are
/// truncated directly; anything else is serialized first.
pub(super) fn truncate_tool_result(value: Value, max_chars: usize) -> Value {
    let text = match &value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let char_count = text.chars().count();
    if char_count <= max_chars {
        return value;
    }
    let kept: String = text.chars().take(max_chars).collect();
    Value::String(format!(
        "{kept}...[truncated {} chars]",
        char_count - max_chars
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_keeps_short_messages() {
        assert_eq!(derive_title("fix the login bug"), "fix the login bug");
    }

    #[test]
    fn title_truncates_on_char_boundary() {
        let message = "\u{2014}".repeat(40);
        let title = derive_title(&message);
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), 33);
    }

    #[test]
    fn title_uses_first_line_only() {
        assert_eq!(derive_title("short ask\nwith details below"), "short ask");
    }

    #[test]
    fn truncation_preserves_small_values() {
        let value = serde_json::json!({"ok": true});
        assert_eq!(truncate_tool_result(value.clone(), 100), value);
    }

    #[test]
    fn truncation_marks_dropped_chars() {
        let value = Value::String("x".repeat(500));
        let out = truncate_tool_result(value, 100);
        let text = out.as_str().unwrap();
        assert!(text.starts_with(&"x".repeat(100)));
        assert!(text.contains("truncated 400 chars"));
    }
}
