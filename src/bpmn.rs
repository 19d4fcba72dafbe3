//! BPMN 2.0 document synthesis and validation.
//!
//! [`BpmnSkeleton`] is the template generator used whenever no usable
//! diagram came back from the model: given a process name and an ordered
//! list of step labels it emits a minimal linear diagram — start event,
//! one task per step, end event, sequence flows joining them in order.
//!
//! The generator is total and deterministic: it never fails, byte-identical
//! input produces byte-identical output, and an empty step list still
//! yields a valid start→end diagram. Every user-supplied string passes
//! through [`escape_xml`] before landing in an attribute, and every
//! generated identifier passes through [`sanitize_id`].
//!
//! No diagram-interchange shapes are emitted; the browser viewer
//! auto-lays-out diagrams that lack them.

use quick_xml::events::Event;
use quick_xml::Reader;

/// Upper bound applied by [`sanitize_id`] when callers pass no explicit one.
pub const DEFAULT_MAX_ID_LEN: usize = 50;

/// Input to the template generator: a process name and its ordered steps.
///
/// Pure value type — no persistent identity, no side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BpmnSkeleton {
    pub process_name: String,
    pub steps: Vec<String>,
}

impl BpmnSkeleton {
    pub fn new(process_name: impl Into<String>, steps: Vec<String>) -> Self {
        Self {
            process_name: process_name.into(),
            steps,
        }
    }

    /// Emit the BPMN 2.0 XML document for this skeleton.
    ///
    /// Layout: all flow nodes first (start, tasks in input order, end),
    /// then all sequence flows. N steps produce N tasks and N+1 flows.
    pub fn to_xml(&self) -> String {
        self.to_xml_with_id_len(DEFAULT_MAX_ID_LEN)
    }

    /// Like [`to_xml`](Self::to_xml) with an explicit identifier length bound.
    pub fn to_xml_with_id_len(&self, max_id_len: usize) -> String {
        let base = sanitize_id(&self.process_name, max_id_len);
        let name = escape_xml(&self.process_name);

        let mut nodes = Vec::with_capacity(self.steps.len() + 2);
        let mut flows = Vec::with_capacity(self.steps.len() + 1);

        nodes.push(r#"<bpmn:startEvent id="start" name="Start"/>"#.to_string());
        let mut prev = "start".to_string();
        for (i, step) in self.steps.iter().enumerate() {
            let tid = format!("task_{i}");
            let label = if step.is_empty() {
                format!("Task {}", i + 1)
            } else {
                escape_xml(step)
            };
            nodes.push(format!(r#"<bpmn:task id="{tid}" name="{label}"/>"#));
            flows.push(format!(
                r#"<bpmn:sequenceFlow id="flow_{i}" sourceRef="{prev}" targetRef="{tid}"/>"#
            ));
            prev = tid;
        }
        nodes.push(r#"<bpmn:endEvent id="end" name="End"/>"#.to_string());
        flows.push(format!(
            r#"<bpmn:sequenceFlow id="flow_end" sourceRef="{prev}" targetRef="end"/>"#
        ));

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<bpmn:definitions xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
  xmlns:bpmn="http://www.omg.org/spec/BPMN/20100524/MODEL"
  xmlns:bpmndi="http://www.omg.org/spec/BPMN/20100524/DI"
  xmlns:omgdc="http://www.omg.org/spec/DD/20100524/DC"
  xmlns:omgdi="http://www.omg.org/spec/DD/20100524/DI"
  id="{base}_definitions" targetNamespace="http://procmap.dev/bpmn">
  <bpmn:process id="{base}_process" isExecutable="false" name="{name}">
    {nodes}
    {flows}
  </bpmn:process>
</bpmn:definitions>
"#,
            nodes = nodes.join("\n    "),
            flows = flows.join("\n    "),
        )
    }
}

/// Escape `&`, `<`, `>`, and `"` for use in XML attribute values.
pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

/// Reduce an arbitrary string to a safe XML identifier.
///
/// Keeps ASCII letters, digits, `_`, `-`, and `.`; everything else becomes
/// `_`. The result is truncated to `max_len` and prefixed with `_` if it
/// would otherwise start with a character an NCName may not start with.
/// An empty input yields `"p"`.
pub fn sanitize_id(s: &str, max_len: usize) -> String {
    let mut id: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    if id.is_empty() {
        id.push('p');
    }
    let first = id.chars().next().unwrap_or('p');
    if !(first.is_ascii_alphabetic() || first == '_') {
        id.insert(0, '_');
        id.truncate(max_len.max(1));
    }
    id
}

/// Check that `xml` parses as a single well-formed document whose root
/// element is a (namespaced) `definitions`.
///
/// This is a well-formedness gate, not schema validation: mismatched tags,
/// stray top-level prose, multiple roots, and non-BPMN roots are rejected;
/// semantically wrong but syntactically clean BPMN passes.
pub fn is_well_formed_bpmn(xml: &str) -> bool {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    let mut roots = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if depth == 0 {
                    roots += 1;
                    if roots > 1 || e.local_name().as_ref() != b"definitions" {
                        return false;
                    }
                }
                depth += 1;
            }
            Ok(Event::Empty(e)) => {
                if depth == 0 {
                    roots += 1;
                    if roots > 1 || e.local_name().as_ref() != b"definitions" {
                        return false;
                    }
                }
            }
            Ok(Event::End(_)) => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Ok(Event::Text(t)) => {
                // Prose outside the root element means the candidate is a
                // reply that merely contains XML, not an XML document.
                if depth == 0 && !t.iter().all(|b| b.is_ascii_whitespace()) {
                    return false;
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return false,
            Ok(_) => {}
        }
    }

    roots == 1 && depth == 0
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn count(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn skeleton_is_deterministic() {
        let skel = BpmnSkeleton::new("Order Handling", vec!["Receive".into(), "Ship".into()]);
        assert_eq!(skel.to_xml(), skel.to_xml());
    }

    #[test]
    fn skeleton_task_and_flow_counts() {
        for n in 0..6 {
            let steps: Vec<String> = (0..n).map(|i| format!("Step {i}")).collect();
            let xml = BpmnSkeleton::new("P", steps).to_xml();
            assert_eq!(count(&xml, "<bpmn:task "), n, "tasks for n={n}");
            assert_eq!(count(&xml, "<bpmn:sequenceFlow "), n + 1, "flows for n={n}");
            assert_eq!(count(&xml, "<bpmn:startEvent "), 1);
            assert_eq!(count(&xml, "<bpmn:endEvent "), 1);
        }
    }

    #[test]
    fn empty_steps_still_valid() {
        let xml = BpmnSkeleton::new("Empty", vec![]).to_xml();
        assert!(is_well_formed_bpmn(&xml));
        assert!(xml.contains(r#"sourceRef="start" targetRef="end""#));
    }

    #[test]
    fn skeleton_output_is_well_formed() {
        let xml = BpmnSkeleton::new(
            "Quotes & <Brackets>",
            vec![r#"Check "totals" & <limits>"#.into()],
        )
        .to_xml();
        assert!(is_well_formed_bpmn(&xml), "xml:\n{xml}");
    }

    #[test]
    fn three_step_sop_scenario() {
        let xml = BpmnSkeleton::new(
            "Order SOP",
            vec![
                "Receive order".into(),
                "Approve order".into(),
                "Ship order".into(),
            ],
        )
        .to_xml();

        assert_eq!(count(&xml, "<bpmn:task "), 3);
        assert_eq!(count(&xml, "<bpmn:sequenceFlow "), 4);
        // 5 flow nodes: start + 3 tasks + end
        assert_eq!(
            count(&xml, "<bpmn:startEvent ") + count(&xml, "<bpmn:task ") + count(&xml, "<bpmn:endEvent "),
            5
        );
        assert!(xml.contains(r#"name="Receive order""#));
        assert!(xml.contains(r#"name="Approve order""#));
        assert!(xml.contains(r#"name="Ship order""#));
    }

    #[test]
    fn escape_covers_reserved_chars() {
        assert_eq!(
            escape_xml(r#"a & b < c > d " e"#),
            "a &amp; b &lt; c &gt; d &quot; e"
        );
    }

    #[test]
    fn escaped_label_round_trips_through_parser() {
        let label = r#"Check & verify <totals> against "ledger""#;
        let xml = BpmnSkeleton::new("P", vec![label.into()]).to_xml();

        // Recover the attribute through a real XML parser.
        let mut reader = Reader::from_str(&xml);
        let mut recovered = None;
        loop {
            match reader.read_event().expect("skeleton output must parse") {
                Event::Empty(e) if e.local_name().as_ref() == b"task" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"name" {
                            let raw = String::from_utf8(attr.value.to_vec()).unwrap();
                            recovered =
                                Some(quick_xml::escape::unescape(&raw).unwrap().into_owned());
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        assert_eq!(recovered.as_deref(), Some(label));
    }

    #[test]
    fn sanitize_id_replaces_and_truncates() {
        assert_eq!(sanitize_id("Order Handling!", 50), "Order_Handling_");
        assert_eq!(sanitize_id("abcdef", 3), "abc");
        assert_eq!(sanitize_id("", 50), "p");
        assert_eq!(sanitize_id("料金プラン", 50), "_____");
    }

    #[test]
    fn sanitize_id_prefixes_leading_digit() {
        let id = sanitize_id("3rd Party Review", 50);
        assert!(id.starts_with('_'), "got: {id}");
    }

    #[test]
    fn well_formedness_rejects_prose_wrapped_xml() {
        let text = "Here is your diagram:\n<bpmn:definitions xmlns:bpmn=\"x\"></bpmn:definitions>\nHope this helps!";
        assert!(!is_well_formed_bpmn(text));
    }

    #[test]
    fn well_formedness_rejects_mismatched_tags() {
        assert!(!is_well_formed_bpmn(
            "<bpmn:definitions><bpmn:process></bpmn:definitions>"
        ));
    }

    #[test]
    fn well_formedness_rejects_non_definitions_root() {
        assert!(!is_well_formed_bpmn("<html><body/></html>"));
    }

    #[test]
    fn well_formedness_accepts_declaration() {
        let xml = "<?xml version=\"1.0\"?>\n<bpmn:definitions xmlns:bpmn=\"x\"><bpmn:process/></bpmn:definitions>";
        assert!(is_well_formed_bpmn(xml));
    }
}
