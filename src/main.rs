mod config;
mod documents;
mod llm_client;
mod session;
mod view;

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use config::{read_env, AppConfig, SessionPolicies};
use documents::{ContextAccumulator, ExtractionErrorPolicy, UploadedFile};
use llm_client::{build_answer_client_from_env, EchoAnswerClient, SharedAnswerClient};
use session::{Action, FailedAnswerPolicy, HistoryMode, Notice, Session, SessionEngine};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "knowledge-xpert",
    about = "Password-gated question answering over your PDF and DOCX documents"
)]
struct Cli {
    /// Answer with a local echo instead of calling the chat completion service.
    #[arg(long, global = true, default_value_t = false)]
    offline: bool,

    /// What a failed extraction does to an upload batch (embed|abort).
    #[arg(long, global = true)]
    extraction_errors: Option<ExtractionErrorPolicy>,

    /// Keep every exchange or only the latest one (full|latest).
    #[arg(long, global = true)]
    history: Option<HistoryMode>,

    /// Whether a failed answer is recorded in the history (surface|record).
    #[arg(long, global = true)]
    failed_answers: Option<FailedAnswerPolicy>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the context the given files would produce, without logging in.
    Extract {
        /// PDF or DOCX files, concatenated in the order given.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Print the per-file source records as JSON instead of the text.
        #[arg(long, default_value_t = false)]
        sources: bool,
    },
    /// Log in, upload files, ask one question and print the answer.
    Ask {
        /// Document to load; repeat for several files.
        #[arg(short, long = "file", required = true)]
        files: Vec<PathBuf>,
        /// Shared password; falls back to KX_PASSWORD.
        #[arg(long)]
        password: Option<String>,
        question: String,
    },
}

impl Cli {
    /// Flags given on the command line win over the environment.
    fn with_overrides(&self, mut policies: SessionPolicies) -> SessionPolicies {
        if let Some(policy) = self.extraction_errors {
            policies.extraction_errors = policy;
        }
        if let Some(mode) = self.history {
            policies.history = mode;
        }
        if let Some(policy) = self.failed_answers {
            policies.failed_answers = policy;
        }
        policies
    }
}

const PASSWORD_VARS: [&str; 2] = ["KX_PASSWORD", "KNOWLEDGE_XPERT_PASSWORD"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let mut cli = Cli::parse();

    match cli.command.take() {
        // Extraction needs neither credentials nor the answer service.
        Some(Commands::Extract { paths, sources }) => {
            let policies = SessionPolicies::from_env()
                .context("Invalid session policy configuration")?;
            let policies = cli.with_overrides(policies);
            run_extract(&paths, sources, policies.extraction_errors)
        }
        Some(Commands::Ask {
            files,
            password,
            question,
        }) => {
            let password = password
                .or_else(|| read_env(&PASSWORD_VARS))
                .context("Pass --password or set KX_PASSWORD")?;
            let engine = build_engine(&cli)?;
            run_single(&engine, password, &files, question).await
        }
        None => run_repl(&build_engine(&cli)?).await,
    }
}

fn build_engine(cli: &Cli) -> anyhow::Result<SessionEngine> {
    let config = AppConfig::from_env().context("Configuration loading failed")?;
    let policies = cli.with_overrides(config.policies);
    info!(
        passwords = config.credentials.len(),
        policies = ?policies,
        "configuration loaded"
    );

    let answers: SharedAnswerClient = if cli.offline {
        EchoAnswerClient::shared()
    } else {
        build_answer_client_from_env(false).context("Answer service initialization failed")?
    };
    Ok(SessionEngine::new(config.credentials, answers, policies))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

fn read_uploads(paths: &[PathBuf]) -> anyhow::Result<Vec<UploadedFile>> {
    paths
        .iter()
        .map(|path| {
            UploadedFile::from_path(path)
                .with_context(|| format!("Failed to read {}", path.display()))
        })
        .collect()
}

fn run_extract(
    paths: &[PathBuf],
    sources: bool,
    policy: ExtractionErrorPolicy,
) -> anyhow::Result<()> {
    let files = read_uploads(paths)?;
    let accumulated = ContextAccumulator::new(policy).accumulate(&files)?;

    if sources {
        println!("{}", serde_json::to_string_pretty(&accumulated.sources)?);
    } else {
        println!("{}", accumulated.text);
    }
    Ok(())
}

async fn run_single(
    engine: &SessionEngine,
    password: String,
    paths: &[PathBuf],
    question: String,
) -> anyhow::Result<()> {
    let files = read_uploads(paths)?;

    let mut session = Session::new();
    for action in [
        Action::SubmitLogin { password },
        Action::UploadFiles { files },
        Action::Ask { question },
    ] {
        let transition = engine.reduce(session, action).await;
        session = transition.session;
        match transition.notice {
            Some(Notice::Error(err)) => {
                error!(error = %err, "one-shot question failed");
                bail!(err);
            }
            Some(Notice::Answer(answer)) => println!("{answer}"),
            Some(Notice::Info(message)) => info!("{message}"),
            None => {}
        }
    }

    Ok(())
}

/// One line of REPL input once the user is logged in.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplCommand {
    Upload(Vec<PathBuf>),
    Clear,
    Back,
    History,
    Sources,
    Transcript,
    Help,
    Exit,
    Question(String),
    Empty,
}

fn parse_command(line: &str) -> ReplCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ReplCommand::Empty;
    }
    if trimmed.eq_ignore_ascii_case("exit") {
        return ReplCommand::Exit;
    }

    let Some(command) = trimmed.strip_prefix(':') else {
        return ReplCommand::Question(trimmed.to_string());
    };

    let mut parts = command.split_whitespace();
    match parts.next().map(str::to_ascii_lowercase).as_deref() {
        Some("upload") => ReplCommand::Upload(parts.map(PathBuf::from).collect()),
        Some("clear") => ReplCommand::Clear,
        Some("back") => ReplCommand::Back,
        Some("history") => ReplCommand::History,
        Some("sources") => ReplCommand::Sources,
        Some("transcript") => ReplCommand::Transcript,
        Some("exit") | Some("quit") => ReplCommand::Exit,
        _ => ReplCommand::Help,
    }
}

/// Read uploads for the REPL, reporting unreadable paths instead of failing.
fn read_uploads_lenient(paths: &[PathBuf]) -> Vec<UploadedFile> {
    paths
        .iter()
        .filter_map(|path| match UploadedFile::from_path(path) {
            Ok(file) => Some(file),
            Err(err) => {
                warn!(path = %path.display(), %err, "skipping unreadable upload");
                println!("[error] could not read {}: {err}", path.display());
                None
            }
        })
        .collect()
}

async fn run_repl(engine: &SessionEngine) -> anyhow::Result<()> {
    println!("{}\n", view::BANNER);
    let stdin = io::stdin();
    let mut session = Session::new();
    let mut last_phase = None;

    loop {
        if last_phase != Some(session.phase()) {
            println!("{}", view::phase_hint(&session));
            last_phase = Some(session.phase());
        }

        print!("{}", view::prompt(&session));
        io::stdout().flush()?;

        let mut buffer = String::new();
        if stdin.read_line(&mut buffer)? == 0 {
            break;
        }
        let line = buffer.trim_end_matches(['\r', '\n']);

        if line.trim().eq_ignore_ascii_case("exit") {
            info!("User exited CLI");
            break;
        }

        let actions = if session.authenticated {
            match parse_command(line) {
                ReplCommand::Empty => continue,
                ReplCommand::Exit => break,
                ReplCommand::Help => {
                    println!("{}", view::HELP);
                    continue;
                }
                ReplCommand::History => {
                    println!("{}", view::history(&session));
                    continue;
                }
                ReplCommand::Sources => {
                    println!("{}", view::sources(&session));
                    continue;
                }
                ReplCommand::Transcript => {
                    println!("{}", serde_json::to_string_pretty(&session.history)?);
                    continue;
                }
                ReplCommand::Upload(paths) if paths.is_empty() => {
                    println!("Usage: :upload <path>...");
                    continue;
                }
                ReplCommand::Upload(paths) => vec![Action::UploadFiles {
                    files: read_uploads_lenient(&paths),
                }],
                ReplCommand::Clear => vec![Action::ClearConversation],
                ReplCommand::Back => vec![Action::Back],
                ReplCommand::Question(question) => vec![
                    Action::DraftQuery {
                        text: question.clone(),
                    },
                    Action::Ask { question },
                ],
            }
        } else {
            vec![Action::SubmitLogin {
                password: line.to_string(),
            }]
        };

        for action in actions {
            let transition = engine.reduce(session, action).await;
            session = transition.session;
            if let Some(notice) = &transition.notice {
                println!("{}\n", view::notice(notice));
            }
        }
    }

    Ok(())
}
