//! Plain-text and Markdown loader.

use super::{Document, IngestError, Locator};

/// Extract documents from a text or Markdown upload.
///
/// Emits the whole file as one document plus one document per blank-line separated paragraph.
/// Paragraph numbers count every blank-line segment so they stay stable when empty segments
/// appear between paragraphs.
pub(crate) fn parse(source: &str, bytes: &[u8]) -> Result<Vec<Document>, IngestError> {
    let content = String::from_utf8_lossy(bytes);
    let mut documents = Vec::new();

    if content.trim().is_empty() {
        return Ok(documents);
    }

    documents.push(Document::new(source, Locator::Whole, content.to_string()));

    for (index, paragraph) in content.split("\n\n").enumerate() {
        let trimmed = paragraph.trim();
        if trimmed.is_empty() {
            continue;
        }
        documents.push(Document::new(
            source,
            Locator::Paragraph(index as u32 + 1),
            trimmed.to_string(),
        ));
    }

    Ok(documents)
}
