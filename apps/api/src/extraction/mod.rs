//! Document text extraction for uploaded files (PDF, DOCX, plain text).
//!
//! The orchestrator only ever sees the extracted text; extraction errors are
//! surfaced to the caller unchanged.

use std::io::Read;

use quick_xml::events::Event;
use thiserror::Error;
use tracing::debug;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TEXT: &str = "text/plain";

/// Decompressed size cap for `word/document.xml` (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 20 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    PlainText,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("unsupported document type: {0}")]
    UnsupportedFormat(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("DOCX extraction failed: {0}")]
    Docx(String),

    #[error("document is not valid UTF-8 text")]
    Encoding,

    #[error("document contains no extractable text")]
    Empty,
}

impl DocumentFormat {
    /// Resolves the format from the declared content type, the file name, and
    /// finally the leading magic bytes.
    pub fn detect(
        content_type: Option<&str>,
        file_name: Option<&str>,
        bytes: &[u8],
    ) -> Result<Self, ExtractionError> {
        let mime = content_type
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase());
        match mime.as_deref() {
            Some(MIME_PDF) => return Ok(DocumentFormat::Pdf),
            Some(MIME_DOCX) => return Ok(DocumentFormat::Docx),
            Some(MIME_TEXT) | Some("text/markdown") => return Ok(DocumentFormat::PlainText),
            _ => {}
        }

        let ext = file_name
            .and_then(|n| n.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match ext.as_deref() {
            Some("pdf") => return Ok(DocumentFormat::Pdf),
            Some("docx") => return Ok(DocumentFormat::Docx),
            Some("txt") | Some("md") => return Ok(DocumentFormat::PlainText),
            _ => {}
        }

        if bytes.starts_with(b"%PDF") {
            Ok(DocumentFormat::Pdf)
        } else if bytes.starts_with(b"PK\x03\x04") {
            Ok(DocumentFormat::Docx)
        } else if std::str::from_utf8(bytes).is_ok() {
            Ok(DocumentFormat::PlainText)
        } else {
            Err(ExtractionError::UnsupportedFormat(
                mime.or(ext).unwrap_or_else(|| "unknown".to_string()),
            ))
        }
    }
}

/// Extracts plain text, trimmed. Empty output is an error.
pub fn extract_text(bytes: &[u8], format: DocumentFormat) -> Result<String, ExtractionError> {
    let text = match format {
        DocumentFormat::Pdf => extract_pdf(bytes)?,
        DocumentFormat::Docx => extract_docx(bytes)?,
        DocumentFormat::PlainText => String::from_utf8(bytes.to_vec())
            .map_err(|_| ExtractionError::Encoding)?,
    };

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(ExtractionError::Empty);
    }
    debug!("Extracted {} chars from {:?} document", text.len(), format);
    Ok(text)
}

/// The PDF parser panics on some malformed inputs; those become errors too.
fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractionError> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(bytes)
    }))
    .map_err(|_| ExtractionError::Pdf("parser aborted on malformed input".to_string()))?
    .map_err(|e| ExtractionError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractionError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractionError::Docx("word/document.xml not found".to_string()))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractionError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractionError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    document_xml_text(&xml)
}

/// Collects `<w:t>` runs, turning paragraphs and breaks into newlines and
/// tabs into spaces so line-oriented heuristics still see a title line.
fn document_xml_text(xml: &[u8]) -> Result<String, ExtractionError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"br" | b"cr" => out.push('\n'),
                b"tab" => out.push(' '),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| ExtractionError::Docx(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractionError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
