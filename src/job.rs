//! Job: one document-to-diagram conversion attempt and its state machine.
//!
//! A job's status only ever advances forward:
//!
//! ```text
//! Pending ──▶ Processing ──▶ Done
//!                       └──▶ Error
//! ```
//!
//! The transition methods on [`Job`] are the only way to change status, so
//! regressions and skipped states are unrepresentable at the call sites
//! that matter. Output fields (`documents`, `processes`) are written in the
//! same mutation that sets `Done`; `error_message` in the one that sets
//! `Error`.

use crate::error::ProcmapError;
use crate::output::{BpmnDocument, ConversionOutput, ProcessDefinition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Bound applied to sanitized upload filenames, matching the historic
/// behaviour of the upload endpoint.
const MAX_FILENAME_LEN: usize = 80;

/// Lifecycle states of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Done => "DONE",
            JobStatus::Error => "ERROR",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// Whether `self → next` is a legal forward step.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Done)
                | (JobStatus::Processing, JobStatus::Error)
        )
    }
}

/// One document-to-diagram conversion attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    /// Original uploaded name, sanitized before use as a path component.
    pub source_filename: String,
    /// Where the uploaded bytes were stored.
    pub source_path: PathBuf,
    /// Detected content type, informational only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Plain text pulled from the source document; written once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    /// Unmodified model reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_output_raw: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<ProcessDefinition>,
    /// Populated only when the job reaches `Done`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<BpmnDocument>,
    /// Set only when the job reaches `Error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Job {
    /// Create a fresh `Pending` job for an uploaded file.
    pub fn new(original_filename: &str, source_path: PathBuf) -> Self {
        Self::with_id(
            uuid::Uuid::new_v4().to_string(),
            original_filename,
            source_path,
        )
    }

    /// Create a fresh `Pending` job under a caller-chosen id.
    ///
    /// The upload handler picks the id first because the stored file lives
    /// in a directory named after it.
    pub fn with_id(id: String, original_filename: &str, source_path: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id,
            source_filename: sanitize_filename(original_filename),
            mime_type: detect_mime_type(&source_path),
            source_path,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            extracted_text: None,
            model_output_raw: None,
            processes: Vec::new(),
            documents: Vec::new(),
            error_message: None,
        }
    }

    fn advance(&mut self, next: JobStatus) -> Result<(), ProcmapError> {
        if !self.status.can_advance_to(next) {
            return Err(ProcmapError::InvalidTransition {
                id: self.id.clone(),
                from: self.status.as_str().into(),
                to: next.as_str().into(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `Pending → Processing`; called by the worker that picked the job up.
    pub fn begin_processing(&mut self) -> Result<(), ProcmapError> {
        self.advance(JobStatus::Processing)
    }

    /// `Processing → Done`, writing all outputs in the same mutation.
    pub fn complete(&mut self, output: ConversionOutput) -> Result<(), ProcmapError> {
        self.advance(JobStatus::Done)?;
        self.extracted_text = Some(output.extracted_text);
        self.model_output_raw = Some(output.model_output_raw);
        self.processes = output.processes;
        self.documents = output.documents;
        Ok(())
    }

    /// `Processing → Error` with a human-readable message.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), ProcmapError> {
        self.advance(JobStatus::Error)?;
        let message = message.into();
        self.error_message = Some(if message.is_empty() {
            "unknown error".to_string()
        } else {
            message
        });
        Ok(())
    }
}

/// Summary row for the admin listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: String,
    pub filename: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            filename: job.source_filename.clone(),
            status: job.status,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Reduce an untrusted upload name to a safe path component: basename
/// only, `[A-Za-z0-9._-]`, length-bounded, never empty.
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name);
    let mut out: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILENAME_LEN)
        .collect();
    // A dotfile-only or fully-replaced name gives path handling nothing to
    // work with.
    if out.trim_matches(['.', '_']).is_empty() {
        out = "uploaded_file".to_string();
    }
    out
}

fn detect_mime_type(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first().map(|m| m.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ConversionStats;

    fn output_with_doc() -> ConversionOutput {
        ConversionOutput {
            extracted_text: "text".into(),
            model_output_raw: "raw".into(),
            processes: vec![],
            documents: vec![BpmnDocument {
                name: "p".into(),
                xml: "<bpmn:definitions/>".into(),
            }],
            stats: ConversionStats::default(),
        }
    }

    #[test]
    fn fresh_job_is_pending() {
        let job = Job::new("report.pdf", PathBuf::from("/tmp/x/report.pdf"));
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.documents.is_empty());
        assert!(job.error_message.is_none());
        assert_eq!(job.mime_type.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn happy_path_transitions() {
        let mut job = Job::new("a.txt", PathBuf::from("/tmp/a.txt"));
        job.begin_processing().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        job.complete(output_with_doc()).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.documents.len(), 1);
    }

    #[test]
    fn failure_records_message() {
        let mut job = Job::new("a.txt", PathBuf::from("/tmp/a.txt"));
        job.begin_processing().unwrap();
        job.fail("extraction exploded").unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error_message.as_deref(), Some("extraction exploded"));
    }

    #[test]
    fn cannot_skip_processing() {
        let mut job = Job::new("a.txt", PathBuf::from("/tmp/a.txt"));
        assert!(job.complete(output_with_doc()).is_err());
        assert!(job.fail("nope").is_err());
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut job = Job::new("a.txt", PathBuf::from("/tmp/a.txt"));
        job.begin_processing().unwrap();
        job.complete(output_with_doc()).unwrap();
        assert!(job.begin_processing().is_err());
        assert!(job.fail("late").is_err());
        assert_eq!(job.status, JobStatus::Done);
    }

    #[test]
    fn empty_failure_message_is_replaced() {
        let mut job = Job::new("a.txt", PathBuf::from("/tmp/a.txt"));
        job.begin_processing().unwrap();
        job.fail("").unwrap();
        assert_eq!(job.error_message.as_deref(), Some("unknown error"));
    }

    #[test]
    fn status_wire_format() {
        assert_eq!(serde_json::to_string(&JobStatus::Pending).unwrap(), "\"PENDING\"");
        assert_eq!(serde_json::to_string(&JobStatus::Error).unwrap(), "\"ERROR\"");
    }

    #[test]
    fn sanitize_strips_directories_and_specials() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("quarterly report (v2).pdf"), "quarterly_report__v2_.pdf");
        assert_eq!(sanitize_filename("..."), "uploaded_file");
        assert_eq!(sanitize_filename(""), "uploaded_file");
    }

    #[test]
    fn sanitize_bounds_length() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_filename(&long).len(), 80);
    }
}
