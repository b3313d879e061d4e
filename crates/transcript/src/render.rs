//! Plain-text transcript rendering.

use duckling_core::message::{Message, Part, Role, ToolState};
use std::fmt::Write;

/// Render messages as chat lines.
///
/// User messages are labelled `You:`, assistant messages `Duckling:`. Each
/// tool invocation gets an indented `Tool:` line followed by its `Result:` or
/// `Failed:` line once it has an outcome. System messages are not shown.
pub fn render(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        let label = match message.role {
            Role::User => "You",
            Role::Assistant => "Duckling",
            Role::System => continue,
        };

        let mut line = format!("{label}: ");
        let mut labelled = false;
        for part in &message.parts {
            match part {
                Part::Text { text, .. } => line.push_str(text),
                Part::ToolInvocation(call) => {
                    flush(&mut line, &mut labelled, &mut out);
                    let _ = writeln!(out, "  Tool: {}", call.tool_name);
                    match call.state {
                        ToolState::OutputAvailable => {
                            if let Some(output) = &call.output {
                                let _ = writeln!(out, "  Result: {output}");
                            }
                        }
                        ToolState::OutputError => {
                            let error = call.error_text.as_deref().unwrap_or("unknown error");
                            let _ = writeln!(out, "  Failed: {error}");
                        }
                        _ => {}
                    }
                }
            }
        }
        flush(&mut line, &mut labelled, &mut out);
    }
    out
}

fn flush(line: &mut String, labelled: &mut bool, out: &mut String) {
    let trimmed = line.trim_end();
    if !trimmed.is_empty() || !*labelled {
        out.push_str(trimmed);
        out.push('\n');
    }
    *labelled = true;
    line.clear();
}
