//! Plain-text extraction from uploaded office documents.
//!
//! Pure library delegation — each supported format has a dedicated
//! decoder and the result is a single plain-text string. Decoding is
//! synchronous and CPU-bound; callers run it under `spawn_blocking`
//! (see [`crate::convert`]).
//!
//! Failure modes matter more than fidelity here: a decode error must
//! surface as a job-terminal [`ProcmapError`], never a panic, because the
//! worker records it and moves on.

use crate::error::ProcmapError;
use calamine::{open_workbook_auto, Reader as SheetReader};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::Read;
use std::path::Path;

/// Source formats the extractor can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Spreadsheet,
    Csv,
    Text,
}

impl DocumentFormat {
    /// Map a lowercase file extension to a format. `None` means the
    /// extension is unknown and the raw-UTF-8 fallback applies.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "doc" | "docx" => Some(Self::Docx),
            "xls" | "xlsx" | "ods" => Some(Self::Spreadsheet),
            "csv" => Some(Self::Csv),
            "txt" | "md" => Some(Self::Text),
            _ => None,
        }
    }
}

/// Extract plain text from the document at `path`.
///
/// Unknown extensions fall back to raw UTF-8 decoding; bytes that are not
/// valid UTF-8 fail with [`ProcmapError::UnsupportedFileType`].
pub fn extract_text(path: &Path) -> Result<String, ProcmapError> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document")
        .to_string();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string();

    let bytes = std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProcmapError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            ProcmapError::ExtractionFailed {
                filename: filename.clone(),
                detail: e.to_string(),
            }
        }
    })?;

    match DocumentFormat::from_extension(&extension) {
        Some(DocumentFormat::Pdf) => extract_pdf(&bytes, &filename),
        Some(DocumentFormat::Docx) => extract_docx(&bytes, &filename),
        Some(DocumentFormat::Spreadsheet) => extract_sheet(path, &filename),
        Some(DocumentFormat::Csv) => extract_csv(&bytes, &filename),
        Some(DocumentFormat::Text) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        None => String::from_utf8(bytes).map_err(|_| ProcmapError::UnsupportedFileType {
            filename,
            extension,
        }),
    }
}

// ── PDF ──────────────────────────────────────────────────────────────────────

fn extract_pdf(bytes: &[u8], filename: &str) -> Result<String, ProcmapError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ProcmapError::ExtractionFailed {
        filename: filename.to_string(),
        detail: format!("failed to load PDF: {e}"),
    })?;

    let mut text = String::new();
    for (page_num, _) in doc.get_pages() {
        if let Ok(page_text) = doc.extract_text(&[page_num]) {
            text.push_str(&page_text);
            text.push('\n');
        }
    }
    Ok(text)
}

// ── DOCX ─────────────────────────────────────────────────────────────────────

fn extract_docx(bytes: &[u8], filename: &str) -> Result<String, ProcmapError> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive =
        zip::ZipArchive::new(cursor).map_err(|e| ProcmapError::ExtractionFailed {
            filename: filename.to_string(),
            detail: format!("failed to open DOCX archive: {e}"),
        })?;

    let mut document_xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| ProcmapError::ExtractionFailed {
            filename: filename.to_string(),
            detail: format!("document.xml missing: {e}"),
        })?
        .read_to_string(&mut document_xml)
        .map_err(|e| ProcmapError::ExtractionFailed {
            filename: filename.to_string(),
            detail: format!("failed to read document.xml: {e}"),
        })?;

    docx_body_text(&document_xml, filename)
}

/// Walk `word/document.xml`: `w:t` runs carry the text, `w:p` ends become
/// newlines, `w:tab` becomes a tab.
fn docx_body_text(xml: &str, filename: &str) -> Result<String, ProcmapError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut text = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = true,
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => {
                if e.local_name().as_ref() == b"tab" {
                    text.push('\t');
                }
            }
            Ok(Event::Text(e)) => {
                if in_text_run {
                    text.push_str(&e.xml_content().unwrap_or_default());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ProcmapError::ExtractionFailed {
                    filename: filename.to_string(),
                    detail: format!("DOCX body parse error: {e}"),
                });
            }
            _ => {}
        }
    }

    Ok(text)
}

// ── Spreadsheets ─────────────────────────────────────────────────────────────

/// Flatten every sheet: cells tab-joined, rows newline-joined, sheets in
/// workbook order.
fn extract_sheet(path: &Path, filename: &str) -> Result<String, ProcmapError> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| ProcmapError::ExtractionFailed {
            filename: filename.to_string(),
            detail: format!("failed to open workbook: {e}"),
        })?;

    let mut text = String::new();
    for sheet in workbook.sheet_names().to_owned() {
        let range =
            workbook
                .worksheet_range(&sheet)
                .map_err(|e| ProcmapError::ExtractionFailed {
                    filename: filename.to_string(),
                    detail: format!("failed to read sheet '{sheet}': {e}"),
                })?;
        for row in range.rows() {
            let line: Vec<String> = row.iter().map(|cell| cell.to_string()).collect();
            text.push_str(&line.join("\t"));
            text.push('\n');
        }
    }
    Ok(text)
}

// ── CSV ──────────────────────────────────────────────────────────────────────

fn extract_csv(bytes: &[u8], filename: &str) -> Result<String, ProcmapError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut text = String::new();
    for record in reader.records() {
        let record = record.map_err(|e| ProcmapError::ExtractionFailed {
            filename: filename.to_string(),
            detail: format!("CSV parse error: {e}"),
        })?;
        let line: Vec<&str> = record.iter().collect();
        text.push_str(&line.join("\t"));
        text.push('\n');
    }
    Ok(text)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn format_detection() {
        assert_eq!(DocumentFormat::from_extension("PDF"), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_extension("docx"), Some(DocumentFormat::Docx));
        assert_eq!(DocumentFormat::from_extension("xlsx"), Some(DocumentFormat::Spreadsheet));
        assert_eq!(DocumentFormat::from_extension("csv"), Some(DocumentFormat::Csv));
        assert_eq!(DocumentFormat::from_extension("md"), Some(DocumentFormat::Text));
        assert_eq!(DocumentFormat::from_extension("exe"), None);
    }

    #[test]
    fn plain_text_file() {
        let mut f = tempfile::NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(f, "Receive order\nShip order").unwrap();
        let text = extract_text(f.path()).unwrap();
        assert!(text.contains("Receive order"));
        assert!(text.contains("Ship order"));
    }

    #[test]
    fn unknown_extension_utf8_fallback() {
        let mut f = tempfile::NamedTempFile::with_suffix(".sop").unwrap();
        writeln!(f, "free-form procedure text").unwrap();
        let text = extract_text(f.path()).unwrap();
        assert!(text.contains("free-form procedure text"));
    }

    #[test]
    fn unknown_extension_binary_is_unsupported() {
        let mut f = tempfile::NamedTempFile::with_suffix(".bin").unwrap();
        f.write_all(&[0xFF, 0xFE, 0x00, 0x80, 0xC1]).unwrap();
        let err = extract_text(f.path()).unwrap_err();
        assert!(matches!(err, ProcmapError::UnsupportedFileType { .. }));
    }

    #[test]
    fn missing_file() {
        let err = extract_text(Path::new("/nonexistent/doc.txt")).unwrap_err();
        assert!(matches!(err, ProcmapError::FileNotFound { .. }));
    }

    #[test]
    fn csv_rows_tab_joined() {
        let mut f = tempfile::NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(f, "step,owner\nReceive order,Sales").unwrap();
        let text = extract_text(f.path()).unwrap();
        assert!(text.contains("step\towner"));
        assert!(text.contains("Receive order\tSales"));
    }

    #[test]
    fn corrupt_pdf_fails_cleanly() {
        let mut f = tempfile::NamedTempFile::with_suffix(".pdf").unwrap();
        f.write_all(b"%PDF-1.5 not actually a pdf").unwrap();
        let err = extract_text(f.path()).unwrap_err();
        assert!(matches!(err, ProcmapError::ExtractionFailed { .. }));
    }

    #[test]
    fn docx_body_text_walks_runs_and_paragraphs() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
        <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
            <w:body>
                <w:p><w:r><w:t>Receive order</w:t></w:r></w:p>
                <w:p><w:r><w:t>Ship</w:t><w:tab/><w:t>order</w:t></w:r></w:p>
            </w:body>
        </w:document>"#;
        let text = docx_body_text(xml, "t.docx").unwrap();
        assert_eq!(text, "Receive order\nShip\torder\n");
    }

    #[test]
    fn docx_archive_round_trip() {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            writer
                .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer
                .write_all(
                    br#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>Approve order</w:t></w:r></w:p></w:body></w:document>"#,
                )
                .unwrap();
            writer.finish().unwrap();
        }
        let mut f = tempfile::NamedTempFile::with_suffix(".docx").unwrap();
        f.write_all(&buf).unwrap();

        let text = extract_text(f.path()).unwrap();
        assert_eq!(text.trim(), "Approve order");
    }

    #[test]
    fn docx_without_body_fails_cleanly() {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            writer
                .start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"<x/>").unwrap();
            writer.finish().unwrap();
        }
        let mut f = tempfile::NamedTempFile::with_suffix(".docx").unwrap();
        f.write_all(&buf).unwrap();

        let err = extract_text(f.path()).unwrap_err();
        assert!(matches!(err, ProcmapError::ExtractionFailed { .. }));
    }
}
