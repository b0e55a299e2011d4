pub mod accumulator;
pub mod extractor;
pub mod types;

#[cfg(test)]
pub(crate) mod fixtures;

pub use accumulator::{ContextAccumulator, ExtractionErrorPolicy};
pub use types::{
    AccumulateError, DocumentKind, ExtractionError, SourceRecord, UploadedFile,
};
