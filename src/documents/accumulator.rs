use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::extractor::extract;
use super::types::{AccumulateError, SourceRecord, UploadedFile};

/// What to do when one file in a batch fails to extract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionErrorPolicy {
    /// Write the error message into the context in place of the file's text.
    #[default]
    Embed,
    /// Reject the whole batch on the first failure.
    Abort,
}

impl FromStr for ExtractionErrorPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "embed" => Ok(Self::Embed),
            "abort" => Ok(Self::Abort),
            other => anyhow::bail!("unknown extraction error policy '{other}' (expected embed|abort)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accumulated {
    pub text: String,
    pub sources: Vec<SourceRecord>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContextAccumulator {
    policy: ExtractionErrorPolicy,
}

impl ContextAccumulator {
    pub fn new(policy: ExtractionErrorPolicy) -> Self {
        Self { policy }
    }

    /// Extract every file in order and concatenate the results without a delimiter.
    #[instrument(skip_all, fields(files = files.len(), policy = ?self.policy))]
    pub fn accumulate(&self, files: &[UploadedFile]) -> Result<Accumulated, AccumulateError> {
        let mut text = String::new();
        let mut sources = Vec::with_capacity(files.len());

        for file in files {
            let digest = blake3::hash(&file.content).to_hex().to_string();
            let (extracted, failed) = match extract(&file.content, &file.media_type) {
                Ok(extracted) => (extracted, false),
                Err(source) => match self.policy {
                    ExtractionErrorPolicy::Abort => {
                        warn!(file = %file.name, error = %source, "aborting upload batch");
                        return Err(AccumulateError::Extraction {
                            file: file.name.clone(),
                            source,
                        });
                    }
                    ExtractionErrorPolicy::Embed => {
                        warn!(file = %file.name, error = %source, "embedding extraction error into context");
                        (source.to_string(), true)
                    }
                },
            };

            debug!(file = %file.name, %digest, chars = extracted.len(), "file ingested");
            sources.push(SourceRecord {
                name: file.name.clone(),
                media_type: file.media_type.clone(),
                digest,
                extracted_chars: extracted.chars().count(),
                failed,
            });
            text.push_str(&extracted);
        }

        if text.trim().is_empty() {
            return Err(AccumulateError::EmptyContext);
        }

        Ok(Accumulated { text, sources })
    }
}
