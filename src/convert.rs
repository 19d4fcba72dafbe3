//! One-shot conversion entry point: document file in, processes and BPMN
//! documents out.
//!
//! This is the routine a worker runs per job, and equally the primary
//! library API for callers that don't want the job registry at all. It
//! owns stage ordering and stats; the stages themselves live in
//! [`crate::pipeline`].

use crate::bpmn::{sanitize_id, BpmnSkeleton};
use crate::config::ConversionConfig;
use crate::error::ProcmapError;
use crate::output::{BpmnDocument, ConversionOutput, ConversionStats, ProcessDefinition};
use crate::pipeline::llm::{generate_with_retry, TextGenerator};
use crate::pipeline::{extract, parse};
use crate::prompts::{document_envelope, DEFAULT_SYSTEM_PROMPT};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Bound on generated document names, matching the historic per-process
/// file naming.
const MAX_DOC_NAME_LEN: usize = 80;

/// Convert one document into BPMN process diagrams.
///
/// # Errors
/// Any stage failure is returned as a single [`ProcmapError`]; callers in
/// worker context record it as the job's terminal error. Decoding runs
/// under `spawn_blocking`, so even a panicking decoder surfaces as
/// `ExtractionFailed` rather than tearing the task down.
pub async fn convert_document(
    path: impl AsRef<Path>,
    config: &ConversionConfig,
    generator: &dyn TextGenerator,
) -> Result<ConversionOutput, ProcmapError> {
    let total_start = Instant::now();
    let path = path.as_ref().to_path_buf();
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document")
        .to_string();
    info!("Starting conversion: {}", filename);

    // ── Step 1: Extract text ─────────────────────────────────────────────
    let extract_start = Instant::now();
    let extracted_text = {
        let path = path.clone();
        let filename = filename.clone();
        tokio::task::spawn_blocking(move || extract::extract_text(&path))
            .await
            .map_err(|e| ProcmapError::ExtractionFailed {
                filename,
                detail: format!("decoder panicked: {e}"),
            })??
    };
    let extract_duration_ms = extract_start.elapsed().as_millis() as u64;

    if extracted_text.trim().is_empty() {
        return Err(ProcmapError::ExtractionFailed {
            filename,
            detail: "document contained no extractable text".into(),
        });
    }
    debug!(
        "Extracted {} chars in {}ms",
        extracted_text.len(),
        extract_duration_ms
    );

    // ── Step 2: Ask the model ────────────────────────────────────────────
    let llm_start = Instant::now();
    let system_prompt = config
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SYSTEM_PROMPT);
    let user_prompt = document_envelope(&extracted_text);
    let model_output_raw =
        generate_with_retry(generator, system_prompt, &user_prompt, config).await?;
    let llm_duration_ms = llm_start.elapsed().as_millis() as u64;

    // ── Step 3: Recover structure from the reply ─────────────────────────
    let (processes, documents, extracted_documents, synthesized_documents) =
        build_documents(&model_output_raw, config)?;

    let stats = ConversionStats {
        extracted_chars: extracted_text.len(),
        process_count: processes.len(),
        document_count: documents.len(),
        extracted_documents,
        synthesized_documents,
        extract_duration_ms,
        llm_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        "Conversion complete: {} processes, {} documents, {}ms total",
        stats.process_count, stats.document_count, stats.total_duration_ms
    );

    Ok(ConversionOutput {
        extracted_text,
        model_output_raw,
        processes,
        documents,
        stats,
    })
}

/// Turn the raw reply into process definitions plus one BPMN document per
/// process.
///
/// Per process the model's own diagram wins when it survives extraction;
/// otherwise a skeleton is synthesized from the step list. When the reply
/// is not parseable JSON at all but does carry an extractable BPMN
/// document, that single document is returned — the model answered with
/// a diagram instead of the requested envelope.
fn build_documents(
    model_output_raw: &str,
    config: &ConversionConfig,
) -> Result<(Vec<ProcessDefinition>, Vec<BpmnDocument>, usize, usize), ProcmapError> {
    let extract_xml = |text: &str| {
        if config.validate_xml {
            parse::extract_reply(text).xml
        } else {
            parse::extract_reply_unchecked(text).xml
        }
    };

    match parse::parse_processes(model_output_raw) {
        Ok(parsed) => {
            let mut processes = Vec::with_capacity(parsed.len());
            let mut documents = Vec::with_capacity(parsed.len());
            let mut extracted = 0usize;
            let mut synthesized = 0usize;

            for item in parsed {
                let doc_name = format!(
                    "{}.bpmn",
                    sanitize_id(&item.definition.name, MAX_DOC_NAME_LEN)
                );
                let xml = match item.bpmn_xml.as_deref().and_then(&extract_xml) {
                    Some(xml) => {
                        extracted += 1;
                        xml
                    }
                    None => {
                        synthesized += 1;
                        BpmnSkeleton::new(
                            item.definition.name.clone(),
                            item.definition.steps.clone(),
                        )
                        .to_xml_with_id_len(config.max_id_len)
                    }
                };
                documents.push(BpmnDocument {
                    name: doc_name,
                    xml,
                });
                processes.push(item.definition);
            }

            Ok((processes, documents, extracted, synthesized))
        }
        Err(parse_err) => match extract_xml(model_output_raw) {
            Some(xml) => {
                warn!("Reply was not a JSON process list; using its embedded diagram");
                Ok((
                    Vec::new(),
                    vec![BpmnDocument {
                        name: "process.bpmn".into(),
                        xml,
                    }],
                    1,
                    0,
                ))
            }
            None => Err(parse_err),
        },
    }
}
