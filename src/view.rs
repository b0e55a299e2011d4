//! Terminal rendering of session state. Nothing here mutates a session.

use crate::session::{Notice, Session, SessionPhase};

pub const BANNER: &str = "My Knowledge Xpert";

pub const HELP: &str = "\
Commands:
  :upload <path>...   add PDF/DOCX files to the context
  :clear              clear the conversation, keep the documents
  :back               drop documents and conversation, upload again
  :history            show all answered questions
  :sources            list ingested files
  :transcript         print the session history as JSON
  :help               show this help
  exit                quit
Anything else is sent as a question once documents are loaded.";

pub fn prompt(session: &Session) -> &'static str {
    match session.phase() {
        SessionPhase::Unauthenticated => "Password > ",
        SessionPhase::AwaitingDocuments => "Upload > ",
        SessionPhase::Ready => "How may I help? > ",
    }
}

/// One-line hint shown whenever the phase changes.
pub fn phase_hint(session: &Session) -> &'static str {
    match session.phase() {
        SessionPhase::Unauthenticated => "Enter the password to access the system files.",
        SessionPhase::AwaitingDocuments => "Upload files with ':upload <path>...' (PDF or DOCX).",
        SessionPhase::Ready => "Connected.... Ask a question about your documents.",
    }
}

pub fn notice(notice: &Notice) -> String {
    match notice {
        Notice::Info(message) => message.clone(),
        Notice::Answer(answer) => format!("Response:\n{answer}"),
        Notice::Error(err) => format!("[error] {err}"),
    }
}

pub fn history(session: &Session) -> String {
    if session.history.is_empty() {
        return "No questions asked yet.".to_string();
    }

    session
        .history
        .iter()
        .enumerate()
        .map(|(index, exchange)| {
            format!(
                "#{} [{}]\nQ: {}\nA: {}",
                index + 1,
                exchange.asked_at.format("%H:%M:%S"),
                exchange.question,
                exchange.answer
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn sources(session: &Session) -> String {
    if session.sources.is_empty() {
        return "No documents loaded.".to_string();
    }

    session
        .sources
        .iter()
        .map(|source| {
            let status = if source.failed { "failed" } else { "ok" };
            format!(
                "{} ({}) {} chars, {status}, blake3 {}",
                source.name,
                source.media_type,
                source.extracted_chars,
                &source.digest[..source.digest.len().min(12)]
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
