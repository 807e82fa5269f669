//! Error types for the aggregation pipeline
//!
//! One taxonomy for the whole pipeline: fetch failures abort the owning
//! pipeline and are surfaced with the source name and underlying cause,
//! per-record parse problems are recovered locally (skip and log) and never
//! appear here, store failures are fatal to the current step. Cancellation is
//! not an error and is reported through
//! [`PipelineOutcome`](crate::pipeline::PipelineOutcome) instead.

use crate::record::SourceKind;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a pipeline step.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The HTTP client itself could not be constructed.
    #[error("failed to build HTTP client")]
    ClientBuild {
        #[source]
        source: reqwest::Error,
    },

    /// Network-level failure talking to an upstream.
    #[error("request to '{url}' failed")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The upstream answered, but not with a success status.
    #[error("'{url}' returned HTTP {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    /// The HTML listing carried no recognizable pagination links.
    #[error("no pagination links found on '{url}'")]
    NoPagesFound { url: String },

    /// A whole payload (not a single record) failed to decode.
    #[error("failed to decode {source_kind} payload")]
    Decode {
        source_kind: SourceKind,
        #[source]
        source: serde_json::Error,
    },

    /// The downloaded archive could not be read as a gzip tarball.
    #[error("failed to read archive: {context}")]
    Archive {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A parser was handed a payload fetched for a different source.
    #[error("{source_kind} parser was handed another source's payload")]
    PayloadMismatch { source_kind: SourceKind },

    /// Persistence layer failure.
    #[error("database {operation} failed")]
    Store {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Cache snapshot could not be read or written.
    #[error("snapshot '{path}' could not be {operation}")]
    Snapshot {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Failure class for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::ClientBuild { .. }
            | PipelineError::Http { .. }
            | PipelineError::HttpStatus { .. }
            | PipelineError::NoPagesFound { .. } => "fetch",
            PipelineError::Decode { .. }
            | PipelineError::Archive { .. }
            | PipelineError::PayloadMismatch { .. } => "parse",
            PipelineError::Store { .. } => "store",
            PipelineError::Snapshot { .. } => "snapshot",
        }
    }

    /// Distinguishable process exit code per failure class.
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            "fetch" => 2,
            "parse" => 3,
            "store" => 4,
            "snapshot" => 5,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_distinguish_failure_classes() {
        let fetch = PipelineError::NoPagesFound { url: "http://x".into() };
        let parse = PipelineError::PayloadMismatch { source_kind: SourceKind::Ckan };
        let snapshot = PipelineError::Snapshot {
            path: PathBuf::from("data/ckan.json"),
            operation: "read",
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into(),
        };
        assert_eq!(fetch.exit_code(), 2);
        assert_eq!(parse.exit_code(), 3);
        assert_eq!(snapshot.exit_code(), 5);
        assert_ne!(fetch.category(), parse.category());
    }

    #[test]
    fn errors_name_the_failing_source() {
        let err = PipelineError::PayloadMismatch { source_kind: SourceKind::Curse };
        assert!(err.to_string().contains("Curse"));
    }
}
