//! # procmap
//!
//! Convert office documents into BPMN 2.0 process diagrams using LLMs.
//!
//! ## Why this crate?
//!
//! Standard Operating Procedures live in PDFs, Word files, and
//! spreadsheets — formats a process-mining tool can't draw. procmap pulls
//! the plain text out, asks a model to describe the processes it finds,
//! and turns the reply into BPMN documents a browser viewer can render.
//! Models being models, the reply arrives as fenced code, bare XML, JSON,
//! or prose on different days; the value of this crate is the tested
//! normalisation layer that makes every backend's output land in the same
//! place.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Extract   decode PDF / DOCX / XLSX / CSV to plain text
//!  ├─ 2. Generate  one LLM call with a fixed extraction prompt
//!  ├─ 3. Normalise recover the JSON process list and/or BPMN XML
//!  ├─ 4. Diagram   extracted XML when valid, else a synthesized skeleton
//!  └─ 5. Publish   job registry → status / result endpoints
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use procmap::{convert_document, resolve_generator, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Backend auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = ConversionConfig::default();
//!     let generator = resolve_generator(&config)?;
//!     let output = convert_document("procedure.docx", &config, generator.as_ref()).await?;
//!     for doc in &output.documents {
//!         println!("{}: {} bytes of BPMN", doc.name, doc.xml.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | Enables the `procmapd` binary and the axum HTTP surface |
//!
//! Disable `server` when using only the library to avoid pulling in the
//! HTTP stack:
//! ```toml
//! procmap = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod bpmn;
pub mod config;
pub mod convert;
pub mod error;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod queue;
#[cfg(feature = "server")]
pub mod server;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use bpmn::{escape_xml, is_well_formed_bpmn, sanitize_id, BpmnSkeleton};
pub use config::{ConversionConfig, ConversionConfigBuilder};
pub use convert::convert_document;
pub use error::ProcmapError;
pub use job::{Job, JobStatus, JobSummary};
pub use output::{BpmnDocument, Control, ConversionOutput, ConversionStats, ProcessDefinition, Risk};
pub use pipeline::llm::{resolve_generator, RestGenerator, SdkGenerator, TextGenerator};
pub use pipeline::parse::{extract_reply, extract_reply_unchecked, ModelReply};
pub use queue::{JobQueue, WorkerPool};
pub use store::{JobStore, MemoryJobStore};
