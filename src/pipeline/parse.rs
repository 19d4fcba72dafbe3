//! Reply normalisation: recover structure from free-form LLM output.
//!
//! ## Why is this necessary?
//!
//! Even well-prompted models disobey output instructions in predictable
//! ways: wrapping the payload in ` ``` ` fences despite the prompt saying
//! not to, prepending "Here is your diagram:", or emitting the XML inline
//! with surrounding commentary. Every backend (SDK, REST, alternate model)
//! suffers the same quirks, so the recovery rules live here as shared pure
//! functions rather than as per-call-site copies — results are identical
//! regardless of which backend produced the text.
//!
//! Two recoveries are implemented:
//!
//! * [`extract_reply`] — pull a BPMN 2.0 XML document out of a reply.
//!   Candidates are tried in priority order (fenced block, full document
//!   with declaration, bare `definitions` element, whole trimmed reply)
//!   and each must pass a well-formedness gate before it is returned.
//!   Structurally-delimited matches outrank bare-tag heuristics so that
//!   explanatory prose outside the fence can never leak into the "XML".
//!
//! * [`parse_processes`] — decode the JSON process list the conversion
//!   prompt asks for, tolerating the field spellings and envelope shapes
//!   different model generations have produced.

use crate::bpmn::is_well_formed_bpmn;
use crate::error::ProcmapError;
use crate::output::{Control, ProcessDefinition, Risk};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// Result of normalising one model reply.
///
/// `raw` is the trimmed reply (None only for empty/whitespace input);
/// `xml` is the extracted BPMN document, if any candidate survived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReply {
    pub raw: Option<String>,
    pub xml: Option<String>,
}

// Priority 1: fenced code block, optionally tagged `xml`, lazy to the
// closing fence. Priority 2: a full document from the XML declaration to
// the closing definitions tag. Priority 3: a bare definitions element.
static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?si)```(?:xml)?\s*(.*?)```").unwrap());
static RE_DECL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?si)(<\?xml.*</bpmn:definitions>)").unwrap());
static RE_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?si)(<bpmn:definitions.*</bpmn:definitions>)").unwrap());

/// Extract a BPMN document from an arbitrary reply, gating every candidate
/// on well-formedness.
///
/// Never panics, never mutates its input. Empty or whitespace-only input
/// yields `ModelReply { raw: None, xml: None }`.
pub fn extract_reply(text: &str) -> ModelReply {
    extract_with(text, true)
}

/// Extraction without the well-formedness gate.
///
/// This reproduces the historic behaviour of falling back to the whole
/// trimmed reply when no delimiter matches — which can hand prose to the
/// viewer as "XML". Kept only for callers that validate downstream;
/// [`extract_reply`] is the default.
pub fn extract_reply_unchecked(text: &str) -> ModelReply {
    extract_with(text, false)
}

fn extract_with(text: &str, validate: bool) -> ModelReply {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ModelReply::default();
    }

    let candidates = [
        RE_FENCE.captures(trimmed),
        RE_DECL.captures(trimmed),
        RE_BARE.captures(trimmed),
    ];

    let mut xml = None;
    for caps in candidates.iter().flatten() {
        let candidate = caps[1].trim();
        if !validate || is_well_formed_bpmn(candidate) {
            xml = Some(candidate.to_string());
            break;
        }
    }
    // Last resort: the reply itself may be the document, unfenced and
    // undeclared. Under validation only a clean document passes; without
    // it, any non-empty reply goes through (historic fallback).
    if xml.is_none() && (!validate || is_well_formed_bpmn(trimmed)) {
        xml = Some(trimmed.to_string());
    }

    ModelReply {
        raw: Some(trimmed.to_string()),
        xml,
    }
}

// ── JSON process list ────────────────────────────────────────────────────────

/// One process parsed from the model's JSON answer: the normalised
/// definition plus the BPMN XML the model may have embedded for it.
#[derive(Debug, Clone)]
pub struct ParsedProcess {
    pub definition: ProcessDefinition,
    pub bpmn_xml: Option<String>,
}

/// A step is either a bare string or an object with a label-ish field.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawStep {
    Text(String),
    Labeled {
        #[serde(alias = "label", alias = "name")]
        text: String,
    },
}

impl RawStep {
    fn into_label(self) -> String {
        match self {
            RawStep::Text(s) => s,
            RawStep::Labeled { text } => text,
        }
    }
}

/// Field spellings across the implementations this service replaces:
/// `processName` (template backend), `process_name` + `process_map_bpmn_xml`
/// (multi-process extraction), and the plain names the current prompt asks for.
#[derive(Debug, Deserialize)]
struct RawProcess {
    #[serde(default, alias = "processName", alias = "process_name")]
    name: Option<String>,
    #[serde(default, alias = "process_description")]
    description: Option<String>,
    #[serde(default)]
    steps: Vec<RawStep>,
    #[serde(default, alias = "process_map_bpmn_xml", alias = "bpmnXml")]
    bpmn_xml: Option<String>,
    #[serde(default, alias = "risk_taxonomy")]
    risks: Vec<Risk>,
    #[serde(default)]
    controls: Vec<Control>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModelAnswer {
    Envelope { processes: Vec<RawProcess> },
    List(Vec<RawProcess>),
}

impl ModelAnswer {
    fn into_processes(self) -> Vec<RawProcess> {
        match self {
            ModelAnswer::Envelope { processes } => processes,
            ModelAnswer::List(list) => list,
        }
    }
}

/// Parse the model's structured answer into a process list.
///
/// Accepts a bare JSON array, an `{ "processes": [...] }` envelope, or
/// either of those wrapped in a fenced code block. Returns
/// [`ProcmapError::MalformedModelOutput`] when no shape matches.
pub fn parse_processes(reply: &str) -> Result<Vec<ParsedProcess>, ProcmapError> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return Err(ProcmapError::MalformedModelOutput {
            detail: "empty reply".into(),
        });
    }

    let unfenced = strip_json_fences(trimmed);
    let answer: ModelAnswer = serde_json::from_str(unfenced).map_err(|e| {
        ProcmapError::MalformedModelOutput {
            detail: format!("expected a JSON process list: {e}"),
        }
    })?;

    Ok(answer
        .into_processes()
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            let name = raw
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("process_{}", i + 1));
            ParsedProcess {
                definition: ProcessDefinition {
                    name,
                    description: raw.description.unwrap_or_default(),
                    steps: raw.steps.into_iter().map(RawStep::into_label).collect(),
                    risks: raw.risks,
                    controls: raw.controls,
                },
                bpmn_xml: raw.bpmn_xml.filter(|x| !x.trim().is_empty()),
            }
        })
        .collect())
}

/// Strip one outer fenced block (optionally tagged `json`) if it wraps the
/// entire string; otherwise return the input unchanged.
fn strip_json_fences(input: &str) -> &str {
    static RE_OUTER: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*(.*?)\s*```$").unwrap());
    match RE_OUTER.captures(input) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(input),
        None => input,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const BPMN: &str = r#"<bpmn:definitions xmlns:bpmn="http://www.omg.org/spec/BPMN/20100524/MODEL"><bpmn:process id="p"/></bpmn:definitions>"#;

    fn bpmn_with_decl() -> String {
        format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{BPMN}")
    }

    #[test]
    fn fenced_xml_block_is_extracted() {
        let reply = format!("Sure, here you go:\n```xml\n{BPMN}\n```\nLet me know!");
        let out = extract_reply(&reply);
        assert_eq!(out.xml.as_deref(), Some(BPMN));
        assert_eq!(out.raw.as_deref(), Some(reply.trim()));
    }

    #[test]
    fn fence_without_language_tag() {
        let reply = format!("```\n{BPMN}\n```");
        assert_eq!(extract_reply(&reply).xml.as_deref(), Some(BPMN));
    }

    #[test]
    fn bare_document_with_declaration_unchanged() {
        let doc = bpmn_with_decl();
        let out = extract_reply(&doc);
        assert_eq!(out.xml.as_deref(), Some(doc.as_str()));
    }

    #[test]
    fn declaration_document_inside_prose() {
        let doc = bpmn_with_decl();
        let reply = format!("Model output follows.\n{doc}");
        assert_eq!(extract_reply(&reply).xml.as_deref(), Some(doc.as_str()));
    }

    #[test]
    fn bare_definitions_element_inside_prose() {
        let reply = format!("Diagram:\n{BPMN}\nDone.");
        assert_eq!(extract_reply(&reply).xml.as_deref(), Some(BPMN));
    }

    #[test]
    fn fenced_match_outranks_bare_tag() {
        // Prose mentions a definitions element before the fence; the fence
        // must still win so commentary never contaminates the result.
        let inner = BPMN.replace("id=\"p\"", "id=\"fenced\"");
        let reply = format!("The outer {BPMN} is wrong; use this:\n```xml\n{inner}\n```");
        assert_eq!(extract_reply(&reply).xml.as_deref(), Some(inner.as_str()));
    }

    #[test]
    fn no_markers_yields_raw_only() {
        let out = extract_reply("The document describes no processes.");
        assert_eq!(out.raw.as_deref(), Some("The document describes no processes."));
        assert_eq!(out.xml, None);
    }

    #[test]
    fn empty_and_whitespace_input() {
        assert_eq!(extract_reply(""), ModelReply::default());
        assert_eq!(extract_reply("   \n\t "), ModelReply::default());
    }

    #[test]
    fn malformed_candidate_falls_through() {
        // The fence holds garbage; the valid bare element after it must be
        // picked up instead.
        let reply = format!("```xml\nnot xml\n```\n{BPMN}");
        assert_eq!(extract_reply(&reply).xml.as_deref(), Some(BPMN));
    }

    #[test]
    fn json_fence_is_not_mistaken_for_xml() {
        let out = extract_reply("```json\n{\"processes\": []}\n```");
        assert_eq!(out.xml, None);
        assert!(out.raw.is_some());
    }

    #[test]
    fn unchecked_extraction_falls_back_to_whole_reply() {
        let out = extract_reply_unchecked("not xml at all");
        assert_eq!(out.xml.as_deref(), Some("not xml at all"));
    }

    #[test]
    fn input_is_not_mutated() {
        let reply = format!("  ```xml\n{BPMN}\n```  ");
        let before = reply.clone();
        let _ = extract_reply(&reply);
        assert_eq!(reply, before);
    }

    // ── parse_processes ──────────────────────────────────────────────────

    #[test]
    fn parses_bare_array_with_legacy_names() {
        let json = r#"[{"processName": "Onboarding", "steps": [{"text": "Collect forms"}, "Verify identity"]}]"#;
        let procs = parse_processes(json).unwrap();
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].definition.name, "Onboarding");
        assert_eq!(
            procs[0].definition.steps,
            vec!["Collect forms".to_string(), "Verify identity".to_string()]
        );
        assert!(procs[0].bpmn_xml.is_none());
    }

    #[test]
    fn parses_envelope_with_risks_and_controls() {
        let json = r#"{
            "found_processes": true,
            "process_count": 1,
            "processes": [{
                "process_name": "Claims",
                "process_description": "Handle claims",
                "steps": ["Receive claim"],
                "process_map_bpmn_xml": "<bpmn:definitions/>",
                "risk_taxonomy": [{"category": "Fraud", "risk_name": "Fake claim", "description": "d"}],
                "controls": [{"control_name": "Dual review", "control_type": "preventive", "description": "d"}]
            }]
        }"#;
        let procs = parse_processes(json).unwrap();
        assert_eq!(procs[0].definition.name, "Claims");
        assert_eq!(procs[0].definition.risks[0].name, "Fake claim");
        assert_eq!(procs[0].definition.controls[0].control_type, "preventive");
        assert_eq!(procs[0].bpmn_xml.as_deref(), Some("<bpmn:definitions/>"));
    }

    #[test]
    fn parses_fenced_json() {
        let json = "```json\n[{\"name\": \"P\", \"steps\": [\"a\"]}]\n```";
        let procs = parse_processes(json).unwrap();
        assert_eq!(procs[0].definition.name, "P");
    }

    #[test]
    fn unnamed_process_gets_positional_name() {
        let procs = parse_processes(r#"[{"steps": ["a"]}, {"steps": ["b"]}]"#).unwrap();
        assert_eq!(procs[0].definition.name, "process_1");
        assert_eq!(procs[1].definition.name, "process_2");
    }

    #[test]
    fn prose_is_malformed() {
        let err = parse_processes("I could not find any processes.").unwrap_err();
        assert!(matches!(err, ProcmapError::MalformedModelOutput { .. }));
    }

    #[test]
    fn empty_reply_is_malformed() {
        assert!(parse_processes("  ").is_err());
    }
}
