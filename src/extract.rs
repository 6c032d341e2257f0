//! Text extraction for uploaded documents (PDF and plain text).
//!
//! Callers supply bytes plus a content type (see [`content_type_for`]); this
//! module returns cleaned UTF-8 text or an [`ExtractError`]. Extraction is
//! deterministic, so failures are never retried.

use crate::error::ExtractError;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";

/// How far into the file the `%PDF-` marker may appear.
const PDF_HEADER_WINDOW: usize = 1024;

/// Map a filename to a supported content type by extension.
pub fn content_type_for(filename: &str) -> Option<&'static str> {
    let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "txt" => Some(MIME_TEXT),
        _ => None,
    }
}

/// Extracts and cleans text from `bytes`.
///
/// Fails with [`ExtractError::Empty`] when the document parses but holds no
/// text once cleaned.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    let raw = match content_type {
        MIME_PDF => extract_pdf(bytes)?,
        MIME_TEXT => extract_plain(bytes)?,
        _ => return Err(ExtractError::Unsupported(content_type.to_string())),
    };

    let text = clean_text(&raw);
    if text.is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(text)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let head = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    if !contains(head, b"%PDF-") {
        return Err(ExtractError::Malformed("missing %PDF header".to_string()));
    }
    if contains(bytes, b"/Encrypt") {
        return Err(ExtractError::Encrypted);
    }

    // pdf-extract panics on some malformed inputs instead of returning an error.
    std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| ExtractError::Malformed("PDF parser aborted".to_string()))?
        .map_err(|e| ExtractError::Malformed(e.to_string()))
}

fn extract_plain(bytes: &[u8]) -> Result<String, ExtractError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| ExtractError::Malformed(format!("not valid UTF-8: {}", e)))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Drops control characters, collapses whitespace runs to one space, trims.
pub fn clean_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for c in raw.chars() {
        if c.is_whitespace() {
            pending_space = true;
        } else if c.is_control() {
            continue;
        } else {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        }
    }
    out
}
