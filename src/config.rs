use std::collections::HashSet;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;

use crate::documents::ExtractionErrorPolicy;
use crate::session::{FailedAnswerPolicy, HistoryMode};

pub(crate) fn read_env(candidates: &[&'static str]) -> Option<String> {
    candidates.iter().find_map(|key| env::var(key).ok())
}

fn parse_env<T>(candidates: &[&'static str]) -> anyhow::Result<Option<T>>
where
    T: FromStr<Err = anyhow::Error>,
{
    read_env(candidates)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("invalid value for {}", candidates[0]))
        })
        .transpose()
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
}

impl LlmConfig {
    pub const DEFAULT_MODEL: &'static str = "gpt-3.5-turbo";
    const API_KEY_VARS: [&'static str; 2] =
        ["OPENAI_API_KEY", "KNOWLEDGE_XPERT_OPENAI_API_KEY"];
    const BASE_URL_VARS: [&'static str; 2] =
        ["OPENAI_BASE_URL", "KNOWLEDGE_XPERT_OPENAI_BASE_URL"];
    const MODEL_VARS: [&'static str; 2] = ["KX_LLM_MODEL", "KNOWLEDGE_XPERT_LLM_MODEL"];

    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = read_env(&Self::API_KEY_VARS)
            .context("Set OPENAI_API_KEY to use the answer service (or run with --offline)")?;

        Ok(Self {
            api_key,
            base_url: read_env(&Self::BASE_URL_VARS),
            model: read_env(&Self::MODEL_VARS).unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
        })
    }
}

/// Shared passwords accepted at login. Never empty.
#[derive(Clone)]
pub struct CredentialSet {
    passwords: HashSet<String>,
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("passwords", &format_args!("<{} redacted>", self.passwords.len()))
            .finish()
    }
}

pub type SharedCredentials = Arc<CredentialSet>;

impl CredentialSet {
    const PASSWORD_VARS: [&'static str; 2] = ["VALID_PASSWORDS", "KNOWLEDGE_XPERT_VALID_PASSWORDS"];

    /// Entries are taken verbatim; empty entries from stray commas are dropped.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let credentials = Self {
            passwords: raw
                .split(',')
                .filter(|entry| !entry.is_empty())
                .map(str::to_owned)
                .collect(),
        };

        anyhow::ensure!(
            !credentials.is_empty(),
            "VALID_PASSWORDS must list at least one password"
        );
        Ok(credentials)
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let raw = read_env(&Self::PASSWORD_VARS)
            .context("Set VALID_PASSWORDS to a comma-separated list of shared passwords")?;
        Self::parse(&raw)
    }

    pub fn contains(&self, candidate: &str) -> bool {
        self.passwords.contains(candidate)
    }

    pub fn len(&self) -> usize {
        self.passwords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passwords.is_empty()
    }
}

/// Behavioural switches for the session engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionPolicies {
    pub extraction_errors: ExtractionErrorPolicy,
    pub history: HistoryMode,
    pub failed_answers: FailedAnswerPolicy,
}

impl SessionPolicies {
    const EXTRACTION_VARS: [&'static str; 2] =
        ["KX_EXTRACTION_ERRORS", "KNOWLEDGE_XPERT_EXTRACTION_ERRORS"];
    const HISTORY_VARS: [&'static str; 2] = ["KX_HISTORY", "KNOWLEDGE_XPERT_HISTORY"];
    const FAILED_ANSWER_VARS: [&'static str; 2] =
        ["KX_FAILED_ANSWERS", "KNOWLEDGE_XPERT_FAILED_ANSWERS"];

    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            extraction_errors: parse_env(&Self::EXTRACTION_VARS)?
                .unwrap_or(defaults.extraction_errors),
            history: parse_env(&Self::HISTORY_VARS)?.unwrap_or(defaults.history),
            failed_answers: parse_env(&Self::FAILED_ANSWER_VARS)?
                .unwrap_or(defaults.failed_answers),
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub credentials: SharedCredentials,
    pub policies: SessionPolicies,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            credentials: Arc::new(CredentialSet::from_env()?),
            policies: SessionPolicies::from_env()?,
        })
    }
}
