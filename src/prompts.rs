//! System prompts for LLM-based process extraction.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing the extraction behaviour (e.g.
//!    adding a field to the requested JSON) requires editing exactly one
//!    place, regardless of which backend makes the call.
//!
//! 2. **Testability** — unit tests can import and inspect prompts directly
//!    without a live model, making prompt regressions easy to catch.
//!
//! Callers can override the default via
//! [`crate::config::ConversionConfig::system_prompt`]; the constants here
//! are used only when no override is provided.

/// Default system prompt for extracting business processes from document text.
///
/// Used when `ConversionConfig::system_prompt` is `None`.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert business analyst specializing in process modeling. Analyze the provided text from a Standard Operating Procedure document and extract every business process it describes.

For each process:

1. PROCESS IDENTIFICATION
   - Identify the process name and a one-paragraph description
   - List the process steps as short imperative labels, in execution order

2. DIAGRAM
   - Where the flow is rich enough, produce a valid BPMN 2.0 XML
     representation in the "bpmn_xml" field, including start event, end
     event, tasks, and gateways where appropriate
   - Otherwise leave "bpmn_xml" empty; the steps will be used instead

3. RISKS AND CONTROLS
   - List every risk the document associates with the process, with a
     category and description
   - List every control the document describes, with its type

4. OUTPUT FORMAT
   - Output a single JSON object:
     {"found_processes": bool, "process_count": int, "processes": [
       {"name": str, "description": str, "steps": [str],
        "bpmn_xml": str, "risks": [{"category": str, "name": str, "description": str}],
        "controls": [{"name": str, "control_type": str, "description": str}]}]}
   - Do NOT wrap the JSON in ``` fences
   - Do NOT add commentary outside the JSON object"#;

/// System prompt for the direct `generate` proxy, which asks for BPMN XML
/// rather than the JSON envelope.
pub const BPMN_MODELLER_PROMPT: &str =
    "You are an expert BPMN process modeller. Produce correct BPMN 2.0 XML only.";

/// Wrap extracted document text in an unambiguous envelope for the user turn.
///
/// The delimiters keep the model from confusing document content with
/// instructions, and the trailing reminder measurably improves the rate of
/// fence-free JSON replies.
pub fn document_envelope(extracted_text: &str) -> String {
    format!(
        "DOCUMENT_START\n{}\nDOCUMENT_END\n\nReturn only JSON.",
        extracted_text
    )
}
