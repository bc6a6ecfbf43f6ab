//! Multi-format text extraction for ingested documents.
//!
//! Dispatches on the file extension (case-insensitive):
//!
//! | Extension | Strategy |
//! |-----------|----------|
//! | `.pdf` | page-by-page text via lopdf, `\n` after each page |
//! | `.docx` | paragraph text from `word/document.xml`, `\n` after each paragraph |
//! | `.txt` `.md` `.csv` | whole file as UTF-8, verbatim |
//!
//! Anything else fails with [`Error::UnsupportedFormat`]. Read and decode
//! failures become [`Error::DocumentLoad`]; bulk ingestion records them
//! and moves on to the next file.

use std::io::Read;
use std::path::Path;

use petcare_core::{Error, Result};
use quick_xml::events::Event;
use tracing::debug;

/// Extensions accepted by [`extract`], lowercase and without the dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "txt", "md", "csv"];

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extraction strategy selected from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    PlainText,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "txt" | "md" | "csv" => Ok(Self::PlainText),
            _ => Err(Error::UnsupportedFormat(if ext.is_empty() {
                path.display().to_string()
            } else {
                format!(".{}", ext)
            })),
        }
    }
}

/// Whether `path` has one of the [`SUPPORTED_EXTENSIONS`].
pub fn is_supported(path: &Path) -> bool {
    DocumentFormat::from_path(path).is_ok()
}

/// Read `path` and convert it to a single plain-text string.
pub fn extract(path: &Path) -> Result<String> {
    let format = DocumentFormat::from_path(path)?;
    let label = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|e| Error::document_load(&label, e))?;
    extract_bytes(&bytes, format, &label)
}

/// Extract text from in-memory document bytes. `label` names the document in errors.
pub fn extract_bytes(bytes: &[u8], format: DocumentFormat, label: &str) -> Result<String> {
    let text = match format {
        DocumentFormat::Pdf => extract_pdf(bytes),
        DocumentFormat::Docx => extract_docx(bytes),
        DocumentFormat::PlainText => String::from_utf8(bytes.to_vec())
            .map_err(|e| format!("invalid UTF-8: {}", e)),
    };
    text.map_err(|cause| Error::document_load(label, cause))
}

fn extract_pdf(bytes: &[u8]) -> std::result::Result<String, String> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| format!("invalid PDF: {}", e))?;
    let mut out = String::new();
    for (page_number, _) in doc.get_pages() {
        match doc.extract_text(&[page_number]) {
            Ok(text) => out.push_str(&text),
            // Unreadable pages count as empty.
            Err(e) => debug!(page = page_number, error = %e, "PDF page yielded no text"),
        }
        out.push('\n');
    }
    Ok(out)
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> std::result::Result<Vec<u8>, String> {
    let entry = archive.by_name(name).map_err(|e| format!("{}: {}", name, e))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= max_bytes {
        return Err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        ));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| format!("invalid DOCX container: {}", e))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    extract_docx_paragraphs(&xml)
}

/// Concatenate the text of every `w:p` paragraph, one line each.
///
/// Only `w:t` content is collected. `w:tab` and `w:br` count only inside a
/// run (`w:r`), since paragraph properties also contain `w:tab` stops.
fn extract_docx_paragraphs(xml: &[u8]) -> std::result::Result<String, String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_run = false;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"r" => in_run = true,
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" => out.push('\n'),
                b"tab" if in_run => out.push('\t'),
                b"br" | b"cr" if in_run => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| e.to_string())?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"r" => in_run = false,
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("malformed document.xml: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}
