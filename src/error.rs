use std::path::PathBuf;

use thiserror::Error;

/// Failures with a fixed shape that callers and tests may want to inspect.
///
/// Everything else travels as `anyhow::Error` with file-path context.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{tool} exited with {status}; last lines of output:\n{tail}")]
    ToolFailed {
        tool: String,
        status: String,
        tail: String,
    },

    #[error("failed to launch {tool}: {source}")]
    ToolLaunch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("required input not found: {}", path.display())]
    MissingInput { path: PathBuf },

    #[error("{tool} unit tables disagree on columns: expected {expected:?}, found {found:?}")]
    SchemaMismatch {
        tool: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("malformed identifier '{id}': expected {expected}")]
    MalformedId { id: String, expected: String },

    #[error("no line containing '{pattern}' in {}", path.display())]
    LogFieldMissing { pattern: String, path: PathBuf },

    #[error("{context}: expected {expected} columns, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("transcript {enst} has no variants in {}", path.display())]
    UnknownGene { enst: String, path: PathBuf },

    #[error("{n} samples in the include list is too few for a minimum allele count of {min_ac}")]
    TooFewSamples { n: usize, min_ac: u64 },
}
