use tracing::{info, instrument, warn};

use super::types::{
    Action, Exchange, FailedAnswerPolicy, HistoryMode, Session, SessionError, SessionPhase,
    Transition,
};
use crate::config::{SessionPolicies, SharedCredentials};
use crate::documents::{ContextAccumulator, UploadedFile};
use crate::llm_client::SharedAnswerClient;

/// Applies user actions to a [`Session`]. Holds only read-only shared state.
pub struct SessionEngine {
    credentials: SharedCredentials,
    accumulator: ContextAccumulator,
    answers: SharedAnswerClient,
    history: HistoryMode,
    failed_answers: FailedAnswerPolicy,
}

impl SessionEngine {
    pub fn new(
        credentials: SharedCredentials,
        answers: SharedAnswerClient,
        policies: SessionPolicies,
    ) -> Self {
        Self {
            credentials,
            accumulator: ContextAccumulator::new(policies.extraction_errors),
            answers,
            history: policies.history,
            failed_answers: policies.failed_answers,
        }
    }

    /// Consume one action and produce the next session.
    #[instrument(skip_all, fields(action = action.name(), phase = %session.phase()))]
    pub async fn reduce(&self, session: Session, action: Action) -> Transition {
        match action {
            Action::SubmitLogin { password } => self.submit_login(session, &password),
            Action::UploadFiles { files } => self.upload_files(session, &files),
            Action::DraftQuery { text } => Self::draft_query(session, text),
            Action::Ask { question } => self.ask(session, question).await,
            Action::ClearConversation => Self::clear_conversation(session),
            Action::Back => Self::back(session),
        }
    }

    fn submit_login(&self, mut session: Session, password: &str) -> Transition {
        if session.authenticated {
            return not_permitted(session, "submit_login");
        }

        if self.credentials.contains(password) {
            session.authenticated = true;
            info!("login accepted");
            Transition::info(session, "Access granted! You can now upload files.")
        } else {
            warn!("login rejected");
            Transition::error(session, SessionError::Auth)
        }
    }

    fn upload_files(&self, mut session: Session, files: &[UploadedFile]) -> Transition {
        if !session.authenticated {
            return not_permitted(session, "upload_files");
        }

        match self.accumulator.accumulate(files) {
            Ok(accumulated) => {
                session.context.push_str(&accumulated.text);
                session.sources.extend(accumulated.sources);
                info!(
                    files = files.len(),
                    context_chars = session.context.len(),
                    "context updated"
                );
                let message = format!(
                    "Connected: {} file(s), {} characters of context.",
                    files.len(),
                    session.context.chars().count()
                );
                Transition::info(session, message)
            }
            Err(err) => {
                warn!(error = %err, "upload produced no usable context");
                Transition::error(session, err)
            }
        }
    }

    fn draft_query(mut session: Session, text: String) -> Transition {
        if !session.authenticated {
            return not_permitted(session, "draft_query");
        }
        session.pending_query = text;
        Transition::quiet(session)
    }

    async fn ask(&self, mut session: Session, question: String) -> Transition {
        if !session.authenticated {
            return not_permitted(session, "ask");
        }
        if question.trim().is_empty() {
            return Transition::quiet(session);
        }
        if session.phase() != SessionPhase::Ready {
            return not_permitted(session, "ask");
        }

        match self.answers.ask(&question, &session.context).await {
            Ok(answer) => {
                info!(answer_chars = answer.len(), "question answered");
                self.record(&mut session, Exchange::new(question, answer.clone()));
                session.pending_query.clear();
                Transition::answer(session, answer)
            }
            Err(err) => {
                warn!(error = %err, policy = ?self.failed_answers, "answer service failed");
                match self.failed_answers {
                    FailedAnswerPolicy::Surface => session.pending_query = question,
                    FailedAnswerPolicy::Record => {
                        self.record(&mut session, Exchange::new(question, err.to_string()));
                        session.pending_query.clear();
                    }
                }
                Transition::error(session, err)
            }
        }
    }

    fn record(&self, session: &mut Session, exchange: Exchange) {
        if self.history == HistoryMode::Latest {
            session.history.clear();
        }
        session.history.push(exchange);
    }

    fn clear_conversation(mut session: Session) -> Transition {
        if !session.authenticated {
            return not_permitted(session, "clear_conversation");
        }
        session.history.clear();
        session.pending_query.clear();
        Transition::quiet(session)
    }

    fn back(mut session: Session) -> Transition {
        if !session.authenticated {
            return not_permitted(session, "back");
        }
        session.context.clear();
        session.sources.clear();
        session.history.clear();
        session.pending_query.clear();
        Transition::quiet(session)
    }
}

fn not_permitted(session: Session, action: &'static str) -> Transition {
    let phase = session.phase();
    Transition::error(session, SessionError::NotPermitted { action, phase })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::config::CredentialSet;
    use crate::documents::fixtures::{docx_with_paragraphs, pdf_with_pages};
    use crate::documents::types::{DOCX_MEDIA_TYPE, PDF_MEDIA_TYPE};
    use crate::documents::ExtractionErrorPolicy;
    use crate::llm_client::{AnswerClient, ServiceError};
    use crate::session::types::Notice;

    /// Answers from a script and records every (question, context) it is asked.
    #[derive(Default)]
    struct ScriptedAnswers {
        replies: Mutex<Vec<Result<String, ServiceError>>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedAnswers {
        fn replying(replies: Vec<Result<String, ServiceError>>) -> Arc<Self> {
            let mut replies = replies;
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().expect("lock poisoned").clone()
        }
    }

    #[async_trait]
    impl AnswerClient for ScriptedAnswers {
        async fn ask(&self, question: &str, context: &str) -> Result<String, ServiceError> {
            self.calls
                .lock()
                .expect("lock poisoned")
                .push((question.to_string(), context.to_string()));
            self.replies
                .lock()
                .expect("lock poisoned")
                .pop()
                .unwrap_or_else(|| Err(ServiceError::from_cause("script exhausted")))
        }
    }

    fn engine_with(answers: Arc<ScriptedAnswers>, policies: SessionPolicies) -> SessionEngine {
        let credentials = Arc::new(CredentialSet::parse("letmein,hunter2").expect("credentials"));
        SessionEngine::new(credentials, answers, policies)
    }

    fn engine(answers: Arc<ScriptedAnswers>) -> SessionEngine {
        engine_with(answers, SessionPolicies::default())
    }

    fn login(password: &str) -> Action {
        Action::SubmitLogin {
            password: password.to_string(),
        }
    }

    fn ask(question: &str) -> Action {
        Action::Ask {
            question: question.to_string(),
        }
    }

    fn upload(files: Vec<UploadedFile>) -> Action {
        Action::UploadFiles { files }
    }

    fn notes(text: &str) -> UploadedFile {
        UploadedFile::new("notes.docx", docx_with_paragraphs(&[text]), DOCX_MEDIA_TYPE)
    }

    async fn ready_session(engine: &SessionEngine, text: &str) -> Session {
        let session = engine.reduce(Session::new(), login("letmein")).await.session;
        engine.reduce(session, upload(vec![notes(text)])).await.session
    }

    #[tokio::test]
    async fn wrong_password_never_transitions() {
        let engine = engine(ScriptedAnswers::replying(vec![]));

        let transition = engine.reduce(Session::new(), login("wrong")).await;

        assert_eq!(transition.session, Session::new());
        assert_eq!(transition.error_ref(), Some(&SessionError::Auth));
    }

    #[tokio::test]
    async fn configured_password_authenticates_once() {
        let engine = engine(ScriptedAnswers::replying(vec![]));

        let first = engine.reduce(Session::new(), login("hunter2")).await;
        assert_eq!(first.session.phase(), SessionPhase::AwaitingDocuments);
        assert!(matches!(first.notice, Some(Notice::Info(_))));

        let second = engine.reduce(first.session.clone(), login("hunter2")).await;
        assert_eq!(second.session, first.session);
        assert!(matches!(
            second.error_ref(),
            Some(SessionError::NotPermitted {
                action: "submit_login",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn actions_before_login_are_rejected() {
        let engine = engine(ScriptedAnswers::replying(vec![]));

        for action in [upload(vec![notes("x")]), Action::Back, Action::ClearConversation] {
            let transition = engine.reduce(Session::new(), action).await;
            assert_eq!(transition.session, Session::new());
            assert!(matches!(
                transition.error_ref(),
                Some(SessionError::NotPermitted {
                    phase: SessionPhase::Unauthenticated,
                    ..
                })
            ));
        }
    }

    #[tokio::test]
    async fn sky_scenario_records_the_exchange() {
        let answers = ScriptedAnswers::replying(vec![Ok("Blue.".into())]);
        let engine = engine(answers.clone());

        let session = engine.reduce(Session::new(), login("letmein")).await.session;
        let pdf = UploadedFile::new("sky.pdf", pdf_with_pages(&["The sky is blue."]), PDF_MEDIA_TYPE);
        let uploaded = engine.reduce(session, upload(vec![pdf])).await;
        assert_eq!(uploaded.session.phase(), SessionPhase::Ready);
        assert_eq!(uploaded.session.context, "The sky is blue.");

        let answered = engine
            .reduce(uploaded.session, ask("What color is the sky?"))
            .await;

        let calls = answers.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            ("What color is the sky?".to_string(), "The sky is blue.".to_string())
        );

        let history: Vec<_> = answered
            .session
            .history
            .iter()
            .map(|exchange| (exchange.question.as_str(), exchange.answer.as_str()))
            .collect();
        assert_eq!(history, [("What color is the sky?", "Blue.")]);
        assert_eq!(answered.notice, Some(Notice::Answer("Blue.".into())));
    }

    #[tokio::test]
    async fn blank_question_is_a_no_op() {
        let answers = ScriptedAnswers::replying(vec![Ok("unused".into())]);
        let engine = engine(answers.clone());
        let session = ready_session(&engine, "context").await;

        for blank in ["", "   ", "\n\t"] {
            let transition = engine.reduce(session.clone(), ask(blank)).await;
            assert_eq!(transition.session, session);
            assert!(transition.notice.is_none());
        }
        assert!(answers.calls().is_empty());
    }

    #[tokio::test]
    async fn blank_question_before_login_is_rejected() {
        let answers = ScriptedAnswers::replying(vec![Ok("unused".into())]);
        let engine = engine(answers.clone());

        for blank in ["", "   "] {
            let transition = engine.reduce(Session::new(), ask(blank)).await;

            assert_eq!(transition.session, Session::new());
            assert!(matches!(
                transition.error_ref(),
                Some(SessionError::NotPermitted {
                    phase: SessionPhase::Unauthenticated,
                    ..
                })
            ));
        }
        assert!(answers.calls().is_empty());
    }

    #[tokio::test]
    async fn ask_without_context_is_rejected() {
        let answers = ScriptedAnswers::replying(vec![Ok("unused".into())]);
        let engine = engine(answers.clone());
        let session = engine.reduce(Session::new(), login("letmein")).await.session;

        let transition = engine.reduce(session, ask("anything?")).await;

        assert!(matches!(
            transition.error_ref(),
            Some(SessionError::NotPermitted {
                action: "ask",
                phase: SessionPhase::AwaitingDocuments
            })
        ));
        assert!(answers.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_upload_keeps_waiting_for_documents() {
        let engine = engine(ScriptedAnswers::replying(vec![]));
        let session = engine.reduce(Session::new(), login("letmein")).await.session;

        let transition = engine.reduce(session.clone(), upload(vec![])).await;

        assert_eq!(transition.session, session);
        assert_eq!(transition.error_ref(), Some(&SessionError::EmptyContext));
    }

    #[tokio::test]
    async fn later_uploads_append_to_the_episode_context() {
        let engine = engine(ScriptedAnswers::replying(vec![]));
        let session = ready_session(&engine, "first").await;

        let transition = engine.reduce(session, upload(vec![notes("second")])).await;

        assert_eq!(transition.session.context, "first\nsecond\n");
        assert_eq!(transition.session.sources.len(), 2);
    }

    #[tokio::test]
    async fn abort_policy_surfaces_the_failing_file() {
        let policies = SessionPolicies {
            extraction_errors: ExtractionErrorPolicy::Abort,
            ..SessionPolicies::default()
        };
        let engine = engine_with(ScriptedAnswers::replying(vec![]), policies);
        let session = engine.reduce(Session::new(), login("letmein")).await.session;
        let files = vec![
            notes("fine"),
            UploadedFile::new("scan.tiff", b"II*".to_vec(), "image/tiff"),
        ];

        let transition = engine.reduce(session.clone(), upload(files)).await;

        assert_eq!(transition.session, session);
        assert_eq!(
            transition.error_ref(),
            Some(&SessionError::UnsupportedType {
                file: "scan.tiff".into(),
                media_type: "image/tiff".into()
            })
        );
    }

    // Under the default policy an unreadable file still yields context made of its error text.
    #[tokio::test]
    async fn embed_policy_lets_error_text_reach_the_answer_service() {
        let answers = ScriptedAnswers::replying(vec![Ok("I cannot read that.".into())]);
        let engine = engine(answers.clone());
        let session = engine.reduce(Session::new(), login("letmein")).await.session;
        let broken = UploadedFile::new("broken.pdf", b"not a pdf".to_vec(), PDF_MEDIA_TYPE);

        let uploaded = engine.reduce(session, upload(vec![broken])).await;
        assert_eq!(uploaded.session.phase(), SessionPhase::Ready);
        assert!(uploaded.session.sources[0].failed);

        engine.reduce(uploaded.session, ask("Summarize?")).await;
        assert!(answers.calls()[0].1.starts_with("Error reading PDF: "));
    }

    #[tokio::test]
    async fn back_resets_context_and_history() {
        let answers =
            ScriptedAnswers::replying(vec![Ok("one".into()), Ok("two".into())]);
        let engine = engine(answers);
        let session = ready_session(&engine, "context").await;
        let session = engine.reduce(session, ask("first?")).await.session;
        let session = engine.reduce(session, ask("second?")).await.session;
        assert_eq!(session.history.len(), 2);

        let transition = engine.reduce(session, Action::Back).await;

        assert_eq!(transition.session.phase(), SessionPhase::AwaitingDocuments);
        assert!(transition.session.context.is_empty());
        assert!(transition.session.history.is_empty());
        assert!(transition.session.sources.is_empty());
        assert!(transition.session.authenticated);
    }

    #[tokio::test]
    async fn clear_conversation_keeps_the_context() {
        let answers = ScriptedAnswers::replying(vec![Ok("one".into())]);
        let engine = engine(answers);
        let session = ready_session(&engine, "context").await;
        let session = engine.reduce(session, ask("first?")).await.session;
        let session = engine
            .reduce(
                session,
                Action::DraftQuery {
                    text: "half typed".into(),
                },
            )
            .await
            .session;

        let transition = engine.reduce(session, Action::ClearConversation).await;

        assert_eq!(transition.session.phase(), SessionPhase::Ready);
        assert_eq!(transition.session.context, "context\n");
        assert!(transition.session.history.is_empty());
        assert!(transition.session.pending_query.is_empty());
    }

    #[tokio::test]
    async fn successful_ask_clears_the_pending_query() {
        let answers = ScriptedAnswers::replying(vec![Ok("answer".into())]);
        let engine = engine(answers);
        let session = ready_session(&engine, "context").await;
        let session = engine
            .reduce(
                session,
                Action::DraftQuery {
                    text: "question?".into(),
                },
            )
            .await
            .session;
        assert_eq!(session.pending_query, "question?");

        let transition = engine.reduce(session, ask("question?")).await;

        assert!(transition.session.pending_query.is_empty());
    }

    #[tokio::test]
    async fn service_fault_is_surfaced_without_history() {
        let answers = ScriptedAnswers::replying(vec![Err(ServiceError::from_cause(
            "connection reset by peer",
        ))]);
        let engine = engine(answers);
        let session = ready_session(&engine, "context").await;

        let transition = engine.reduce(session, ask("still there?")).await;

        assert_eq!(transition.session.phase(), SessionPhase::Ready);
        assert!(transition.session.history.is_empty());
        assert_eq!(transition.session.pending_query, "still there?");
        let err = transition.error_ref().expect("service error notice");
        assert_eq!(err.to_string(), "Error: connection reset by peer");
    }

    #[tokio::test]
    async fn service_fault_can_be_recorded_as_an_exchange() {
        let answers = ScriptedAnswers::replying(vec![Err(ServiceError::from_cause("timeout"))]);
        let policies = SessionPolicies {
            failed_answers: FailedAnswerPolicy::Record,
            ..SessionPolicies::default()
        };
        let engine = engine_with(answers, policies);
        let session = ready_session(&engine, "context").await;

        let transition = engine.reduce(session, ask("still there?")).await;

        assert_eq!(transition.session.phase(), SessionPhase::Ready);
        assert_eq!(transition.session.history.len(), 1);
        assert_eq!(transition.session.history[0].answer, "Error: timeout");
        assert!(matches!(
            transition.error_ref(),
            Some(SessionError::Service(_))
        ));
    }

    #[tokio::test]
    async fn latest_mode_keeps_only_the_newest_exchange() {
        let answers = ScriptedAnswers::replying(vec![Ok("one".into()), Ok("two".into())]);
        let policies = SessionPolicies {
            history: HistoryMode::Latest,
            ..SessionPolicies::default()
        };
        let engine = engine_with(answers, policies);
        let session = ready_session(&engine, "context").await;
        let session = engine.reduce(session, ask("first?")).await.session;

        let transition = engine.reduce(session, ask("second?")).await;

        assert_eq!(transition.session.history.len(), 1);
        let latest = transition.session.history.last().expect("one exchange");
        assert_eq!(latest.question, "second?");
        assert_eq!(latest.answer, "two");
    }
}
