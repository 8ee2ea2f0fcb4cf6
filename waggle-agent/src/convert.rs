//! Event log to rig message conversion. The tool name doubles as the rig
//! call id: function_call and function_response parts correlate by name.

use waggle_core::session::{Author, Event, Part};
use waggle_core::tool::ToolSpec;

/// Convert a session's event log into rig chat messages. System-authored
/// events are skipped (the system prompt travels beside the history) and
/// thought parts are not replayed to the model.
pub fn events_to_rig_messages(events: &[Event]) -> Vec<rig::completion::Message> {
    let mut out = Vec::new();

    for event in events {
        if event.author == Author::System {
            continue;
        }

        let mut text_buf = String::new();
        let mut calls: Vec<(String, serde_json::Value)> = Vec::new();

        let flush_text = |buf: &mut String, out: &mut Vec<rig::completion::Message>| {
            if buf.is_empty() {
                return;
            }
            let text = std::mem::take(buf);
            match event.author {
                Author::Model => out.push(rig::completion::Message::assistant(text)),
                _ => out.push(rig::completion::Message::user(text)),
            }
        };

        for part in &event.content.parts {
            match part {
                Part::Text { text } => text_buf.push_str(text),
                Part::Thought { .. } => {}
                Part::FunctionCall { tool_name, args } => {
                    flush_text(&mut text_buf, &mut out);
                    calls.push((tool_name.clone(), args.clone()));
                }
                Part::FunctionResponse { tool_name, result } => {
                    flush_text(&mut text_buf, &mut out);
                    out.push(rig::completion::Message::User {
                        content: rig::OneOrMany::one(rig::message::UserContent::tool_result(
                            tool_name,
                            rig::OneOrMany::one(rig::message::ToolResultContent::text(
                                result.to_string(),
                            )),
                        )),
                    });
                }
            }
        }

        flush_text(&mut text_buf, &mut out);

        // Keep a single assistant turn even when multiple tools were
        // requested in it.
        if !calls.is_empty() {
            if let Ok(content) = rig::OneOrMany::many(calls.iter().map(|(name, args)| {
                rig::message::AssistantContent::tool_call(name, name, args.clone())
            })) {
                out.push(rig::completion::Message::Assistant { content });
            }
        }
    }

    out
}

/// Convert tool specs to rig ToolDefinitions.
pub fn specs_to_rig_definitions(specs: &[ToolSpec]) -> Vec<rig::completion::ToolDefinition> {
    specs
        .iter()
        .map(|s| rig::completion::ToolDefinition {
            name: s.name.clone(),
            description: s.description.clone(),
            parameters: s.parameters.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use waggle_core::session::Event;

    #[test]
    fn user_and_model_text_convert() {
        let events = vec![Event::user("Hello"), Event::model_text("Hi there")];
        let messages = events_to_rig_messages(&events);
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            messages[1],
            rig::completion::Message::Assistant { .. }
        ));
    }

    #[test]
    fn system_events_and_thoughts_are_skipped() {
        let events = vec![
            Event::system("[System] notice"),
            Event::model(vec![
                Part::Thought {
                    text: "thinking...".into(),
                },
                Part::Text {
                    text: "answer".into(),
                },
            ]),
        ];
        let messages = events_to_rig_messages(&events);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn multi_call_event_stays_one_assistant_message() {
        let events = vec![Event::model(vec![
            Part::FunctionCall {
                tool_name: "dispatch_task".into(),
                args: serde_json::json!({}),
            },
            Part::FunctionCall {
                tool_name: "skill_load".into(),
                args: serde_json::json!({"skill_id": "bash"}),
            },
        ])];
        let messages = events_to_rig_messages(&events);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            rig::completion::Message::Assistant { content, .. } => assert_eq!(content.len(), 2),
            _ => panic!("expected assistant message"),
        }
    }

    #[test]
    fn tool_result_becomes_user_tool_response() {
        let events = vec![
            Event::function_call("dispatch_task", serde_json::json!({})),
            Event::function_response("dispatch_task", serde_json::json!({"ok": true})),
        ];
        let messages = events_to_rig_messages(&events);
        assert_eq!(messages.len(), 2);
        match &messages[1] {
            rig::completion::Message::User { content } => {
                assert!(matches!(
                    content.first(),
                    rig::message::UserContent::ToolResult(_)
                ));
            }
            _ => panic!("expected tool response as user tool_result"),
        }
    }
}
