//! Error types for the procmap library.
//!
//! A single fatal error type, [`ProcmapError`], covers every way a
//! conversion can fail. Inside a job's background task these errors are
//! never propagated out of the worker: they are caught and recorded as the
//! job's terminal `Error` state, so one bad document can never take down
//! the process or disturb other jobs. Only the direct request/response
//! paths (the library entry points and the `generate` proxy) return them
//! to the caller.
//!
//! Upstream credentials are deliberately absent from every variant: error
//! messages may end up in HTTP responses and log lines, and neither may
//! ever contain an API key.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the procmap library.
#[derive(Debug, Error)]
pub enum ProcmapError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The file's extension maps to no known decoder and the bytes are not text.
    #[error("Unsupported file type '{extension}' for '{filename}'\nSupported: pdf, docx, xlsx, xls, csv, txt, md.")]
    UnsupportedFileType { filename: String, extension: String },

    /// A format-specific decoder failed on the document.
    #[error("Text extraction failed for '{filename}': {detail}")]
    ExtractionFailed { filename: String, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// No credential or endpoint is configured for any LLM backend.
    #[error("No LLM backend is configured.\n{hint}")]
    UpstreamAuthMissing { hint: String },

    /// The LLM call failed after all retries (network or HTTP error).
    #[error("LLM call failed after {retries} retries: {detail}")]
    UpstreamCallFailed { retries: u32, detail: String },

    /// The model's reply could not be parsed into the expected structure.
    #[error("Model output could not be parsed: {detail}")]
    MalformedModelOutput { detail: String },

    // ── Registry errors ───────────────────────────────────────────────────
    /// Unknown job id, or a requested artifact that has not been produced.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// A store update would move a job's status backwards.
    #[error("Invalid status transition for job {id}: {from} → {to}")]
    InvalidTransition { id: String, from: String, to: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not persist an uploaded file or a produced artifact.
    #[error("Failed to write '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProcmapError {
    /// True for failures caused by the upstream LLM service rather than
    /// the request itself. The HTTP layer maps these to 502.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            ProcmapError::UpstreamCallFailed { .. } | ProcmapError::MalformedModelOutput { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_file_type_display() {
        let e = ProcmapError::UnsupportedFileType {
            filename: "report.zip".into(),
            extension: "zip".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("zip"), "got: {msg}");
        assert!(msg.contains("report.zip"));
    }

    #[test]
    fn upstream_call_failed_display() {
        let e = ProcmapError::UpstreamCallFailed {
            retries: 3,
            detail: "HTTP 503 from upstream".into(),
        };
        assert!(e.to_string().contains("3 retries"));
        assert!(e.is_upstream());
    }

    #[test]
    fn auth_missing_is_not_upstream() {
        let e = ProcmapError::UpstreamAuthMissing {
            hint: "Set OPENAI_API_KEY.".into(),
        };
        assert!(!e.is_upstream());
    }

    #[test]
    fn invalid_transition_display() {
        let e = ProcmapError::InvalidTransition {
            id: "j1".into(),
            from: "DONE".into(),
            to: "PENDING".into(),
        };
        assert!(e.to_string().contains("DONE → PENDING"));
    }
}
