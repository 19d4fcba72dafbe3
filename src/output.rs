//! Output types returned by a conversion.
//!
//! Wire field names are camelCase to match the JSON the HTTP surface has
//! always served; the Rust side stays snake_case.

use serde::{Deserialize, Serialize};

/// A named BPMN 2.0 XML document produced from one described process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BpmnDocument {
    /// Display name, derived from the process name (sanitized).
    pub name: String,
    /// The full XML text.
    pub xml: String,
}

/// A risk the source document associates with a process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Risk {
    #[serde(default)]
    pub category: String,
    #[serde(default, alias = "risk_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A control the source document describes for a process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Control {
    #[serde(default, alias = "control_name")]
    pub name: String,
    #[serde(default, alias = "control_type")]
    pub control_type: String,
    #[serde(default)]
    pub description: String,
}

/// One business process recovered from the model's structured answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Ordered step labels; used for skeleton synthesis when the model
    /// supplied no usable diagram.
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub risks: Vec<Risk>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub controls: Vec<Control>,
}

/// Statistics for one conversion run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionStats {
    /// Characters of plain text pulled from the source document.
    pub extracted_chars: usize,
    /// Processes the model described.
    pub process_count: usize,
    /// BPMN documents produced (extracted or synthesized).
    pub document_count: usize,
    /// Documents taken verbatim from the model's reply.
    pub extracted_documents: usize,
    /// Documents synthesized from step lists.
    pub synthesized_documents: usize,
    pub extract_duration_ms: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Complete result of converting one document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOutput {
    /// Plain text extracted from the source document.
    pub extracted_text: String,
    /// The model's reply, unmodified.
    pub model_output_raw: String,
    /// Structured process descriptions parsed from the reply.
    pub processes: Vec<ProcessDefinition>,
    /// One BPMN document per process (plus at most one unnamed document
    /// when the reply carried XML but no parseable process list).
    pub documents: Vec<BpmnDocument>,
    pub stats: ConversionStats,
}
