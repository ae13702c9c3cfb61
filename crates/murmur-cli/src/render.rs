//! Plain-text rendering for transcripts and live session output.

use murmur_core::notification::Notification;
use murmur_core::repository::TranscriptSummary;
use murmur_core::{Message, Transcript};
use murmur_orchestration::SessionOutcome;
use std::collections::HashMap;
use std::io::{self, Write};

pub fn message_lines(message: &Message) -> String {
    let mut out = format!("[{}] {}", message.role, message.content);
    if let Some(call_id) = &message.tool_call_id {
        out.push_str(&format!(" (answers {})", call_id));
    }
    for call in &message.tool_calls {
        out.push_str(&format!(
            "\n  -> {}({}) [{}]",
            call.function.name, call.function.arguments, call.id
        ));
    }
    out
}

pub fn transcript_text(transcript: &Transcript) -> String {
    let mut out = String::new();
    if let Some(title) = &transcript.title {
        out.push_str(&format!("# {}\n\n", title));
    }
    for message in &transcript.messages {
        out.push_str(&message_lines(message));
        out.push('\n');
    }
    out
}

pub fn summary_line(summary: &TranscriptSummary) -> String {
    format!(
        "{:<32} {}  {}",
        summary.display_name,
        summary.modified.format("%Y-%m-%d %H:%M:%S"),
        summary.id
    )
}

pub fn outcome_text(outcome: &SessionOutcome) -> String {
    let mut out = format!("session {:?}", outcome.status).to_lowercase();
    if outcome.forked() {
        out.push_str(&format!("\nsaved as {}", outcome.identifier));
    }
    for invocation in &outcome.tool_invocations {
        out.push_str(&format!(
            "\ntool {}({}) -> {}",
            invocation.name, invocation.arguments, invocation.output
        ));
    }
    if let Some(error) = &outcome.error {
        out.push_str(&format!("\nerror: {}", error));
    }
    if let Some(error) = &outcome.persist_error {
        out.push_str(&format!("\nsave failed: {}", error));
    }
    out
}

/// Prints only the new tail of each cumulative progress update.
pub struct DeltaPrinter<W: Write> {
    out: W,
    printed: HashMap<usize, usize>,
}

impl<W: Write> DeltaPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed: HashMap::new(),
        }
    }

    pub fn print(&mut self, notification: &Notification) -> io::Result<()> {
        let index = notification.message_index();
        let content = notification.content();
        let seen = self.printed.entry(index).or_insert(0);

        match content.get(*seen..) {
            Some(tail) => self.out.write_all(tail.as_bytes())?,
            // Content was rewritten; start over on a fresh line.
            _ => write!(self.out, "\n{}", content)?,
        }
        *seen = content.len();

        if notification.is_complete() {
            self.out.write_all(b"\n")?;
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::ToolCall;

    fn progress(index: usize, content: &str) -> Notification {
        Notification::Progress {
            message_index: index,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_delta_printer_prints_tails() {
        let mut printer = DeltaPrinter::new(Vec::new());
        printer
            .print(&Notification::PlaceholderCreated { message_index: 1 })
            .unwrap();
        printer.print(&progress(1, "Hel")).unwrap();
        printer.print(&progress(1, "Hello, wo")).unwrap();
        printer
            .print(&Notification::Final {
                message_index: 1,
                content: "Hello, world".to_string(),
            })
            .unwrap();

        let printed = String::from_utf8(printer.into_inner()).unwrap();
        assert_eq!(printed, "Hello, world\n");
    }

    #[test]
    fn test_delta_printer_multibyte_and_rewrite() {
        let mut printer = DeltaPrinter::new(Vec::new());
        printer.print(&progress(0, "caf")).unwrap();
        printer.print(&progress(0, "café")).unwrap();
        printer.print(&progress(0, "tea")).unwrap();

        let printed = String::from_utf8(printer.into_inner()).unwrap();
        assert_eq!(printed, "café\ntea");
    }

    #[test]
    fn test_transcript_text() {
        let mut transcript = Transcript::new(Some("Weather".to_string()));
        transcript.push(Message::user("Paris?"));
        let mut reply = Message::assistant("");
        reply.tool_calls = vec![ToolCall::function("call_1", "get_weather", r#"{"location":"Paris"}"#)];
        transcript.push(reply);
        transcript.push(Message::tool_result("call_1", "Tornado watch!"));

        let text = transcript_text(&transcript);
        assert!(text.starts_with("# Weather\n\n[user] Paris?\n"));
        assert!(text.contains(r#"  -> get_weather({"location":"Paris"}) [call_1]"#));
        assert!(text.contains("[tool] Tornado watch! (answers call_1)"));
    }
}
