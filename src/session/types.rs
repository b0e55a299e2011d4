use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::documents::{AccumulateError, DocumentKind, ExtractionError, SourceRecord, UploadedFile};
use crate::llm_client::ServiceError;

/// Where a session currently stands. Derived from [`Session`], never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Unauthenticated,
    AwaitingDocuments,
    Ready,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => f.write_str("unauthenticated"),
            Self::AwaitingDocuments => f.write_str("awaiting documents"),
            Self::Ready => f.write_str("ready"),
        }
    }
}

/// One answered question. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
    pub asked_at: DateTime<Utc>,
}

impl Exchange {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            asked_at: Utc::now(),
        }
    }
}

/// Per-user state. Passed by value through [`crate::session::SessionEngine::reduce`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub authenticated: bool,
    pub context: String,
    pub history: Vec<Exchange>,
    pub pending_query: String,
    pub sources: Vec<SourceRecord>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SessionPhase {
        if !self.authenticated {
            SessionPhase::Unauthenticated
        } else if self.context.is_empty() {
            SessionPhase::AwaitingDocuments
        } else {
            SessionPhase::Ready
        }
    }
}

/// How answered questions are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryMode {
    /// Every exchange is appended.
    #[default]
    Full,
    /// Only the newest exchange is kept.
    Latest,
}

impl FromStr for HistoryMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "latest" => Ok(Self::Latest),
            other => anyhow::bail!("unknown history mode '{other}' (expected full|latest)"),
        }
    }
}

/// What a failed answer-service call leaves behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailedAnswerPolicy {
    /// Report the error only; history is untouched and the query stays pending.
    #[default]
    Surface,
    /// Record an exchange whose answer is the error text.
    Record,
}

impl FromStr for FailedAnswerPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "surface" => Ok(Self::Surface),
            "record" => Ok(Self::Record),
            other => anyhow::bail!("unknown failed answer policy '{other}' (expected surface|record)"),
        }
    }
}

/// User intents fed into the engine.
#[derive(Debug, Clone)]
pub enum Action {
    SubmitLogin { password: String },
    UploadFiles { files: Vec<UploadedFile> },
    DraftQuery { text: String },
    Ask { question: String },
    ClearConversation,
    Back,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SubmitLogin { .. } => "submit_login",
            Self::UploadFiles { .. } => "upload_files",
            Self::DraftQuery { .. } => "draft_query",
            Self::Ask { .. } => "ask",
            Self::ClearConversation => "clear_conversation",
            Self::Back => "back",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Access denied! Incorrect password.")]
    Auth,
    #[error("{file}: Unsupported file type: {media_type}")]
    UnsupportedType { file: String, media_type: String },
    #[error("{file}: Error reading {kind}: {cause}")]
    ExtractionFailed {
        file: String,
        kind: DocumentKind,
        cause: String,
    },
    #[error("No text could be extracted from the documents.")]
    EmptyContext,
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("'{action}' is not available while {phase}")]
    NotPermitted {
        action: &'static str,
        phase: SessionPhase,
    },
}

impl From<AccumulateError> for SessionError {
    fn from(err: AccumulateError) -> Self {
        match err {
            AccumulateError::EmptyContext => Self::EmptyContext,
            AccumulateError::Extraction {
                file,
                source: ExtractionError::UnsupportedType(media_type),
            } => Self::UnsupportedType { file, media_type },
            AccumulateError::Extraction {
                file,
                source: ExtractionError::ExtractionFailed { kind, cause },
            } => Self::ExtractionFailed { file, kind, cause },
        }
    }
}

/// Something the presentation layer should show once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Answer(String),
    Error(SessionError),
}

/// Result of reducing one action: the next session plus an optional notice.
#[derive(Debug, Clone)]
pub struct Transition {
    pub session: Session,
    pub notice: Option<Notice>,
}

impl Transition {
    pub fn quiet(session: Session) -> Self {
        Self {
            session,
            notice: None,
        }
    }

    pub fn info(session: Session, message: impl Into<String>) -> Self {
        Self {
            session,
            notice: Some(Notice::Info(message.into())),
        }
    }

    pub fn answer(session: Session, answer: impl Into<String>) -> Self {
        Self {
            session,
            notice: Some(Notice::Answer(answer.into())),
        }
    }

    pub fn error(session: Session, error: impl Into<SessionError>) -> Self {
        Self {
            session,
            notice: Some(Notice::Error(error.into())),
        }
    }

    #[cfg(test)]
    pub fn error_ref(&self) -> Option<&SessionError> {
        match &self.notice {
            Some(Notice::Error(err)) => Some(err),
            _ => None,
        }
    }
}
