//! PDF loader.

use super::{Document, IngestError, Locator};

/// Extract one document per page from a PDF upload.
pub(crate) fn parse(source: &str, bytes: &[u8]) -> Result<Vec<Document>, IngestError> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|error| IngestError::Malformed(format!("could not extract PDF text: {error}")))?;
    Ok(page_documents(source, &text))
}

/// `pdf_extract` renders the whole file as one text stream with form-feed characters at page
/// breaks, so the stream is split on `\f` to recover page numbers. A stream with no breaks
/// becomes a single page-1 document. Blank pages are skipped without renumbering.
fn page_documents(source: &str, text: &str) -> Vec<Document> {
    text.split('\u{c}')
        .enumerate()
        .filter_map(|(index, page)| {
            let trimmed = page.trim();
            if trimmed.is_empty() {
                return None;
            }
            Some(Document::new(
                source,
                Locator::Page(index as u32 + 1),
                trimmed.to_string(),
            ))
        })
        .collect()
}
