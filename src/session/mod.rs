pub mod engine;
pub mod types;

pub use engine::SessionEngine;
pub use types::{Action, FailedAnswerPolicy, HistoryMode, Notice, Session, SessionPhase};
