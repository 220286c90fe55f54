//! DOCX loader.
//!
//! A `.docx` file is a ZIP container; the body text lives in `word/document.xml` as `<w:p>`
//! paragraphs holding `<w:t>` text runs. The loader emits the full text, one document per
//! detected section, and one document per paragraph.

use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::Event;

use super::{Document, IngestError, Locator};

/// Extract documents from a DOCX upload.
pub(crate) fn parse(source: &str, bytes: &[u8]) -> Result<Vec<Document>, IngestError> {
    let xml = read_archive_entry(bytes, "word/document.xml")?;
    let paragraphs = collect_paragraphs(&xml, "w:p", "w:t")?;
    Ok(assemble(source, &paragraphs))
}

/// Read one entry of an OOXML ZIP container as UTF-8 text.
pub(super) fn read_archive_entry(bytes: &[u8], entry: &str) -> Result<String, IngestError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|error| IngestError::Malformed(format!("not a valid OOXML container: {error}")))?;
    let mut file = archive
        .by_name(entry)
        .map_err(|error| IngestError::Malformed(format!("missing '{entry}': {error}")))?;
    let mut xml = String::new();
    file.read_to_string(&mut xml)
        .map_err(|error| IngestError::Malformed(format!("could not read '{entry}': {error}")))?;
    Ok(xml)
}

/// Collect the text of every `<{paragraph_tag}>` element, concatenating its
/// `<{text_tag}>` runs. Empty paragraphs are kept so numbering stays positional.
pub(super) fn collect_paragraphs(
    xml: &str,
    paragraph_tag: &str,
    text_tag: &str,
) -> Result<Vec<String>, IngestError> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_paragraph = false;
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                let name = element.name();
                if name.as_ref() == paragraph_tag.as_bytes() {
                    in_paragraph = true;
                    current.clear();
                } else if name.as_ref() == text_tag.as_bytes() {
                    in_text = true;
                }
            }
            Ok(Event::End(element)) => {
                let name = element.name();
                if name.as_ref() == paragraph_tag.as_bytes() {
                    if in_paragraph {
                        paragraphs.push(std::mem::take(&mut current));
                    }
                    in_paragraph = false;
                } else if name.as_ref() == text_tag.as_bytes() {
                    in_text = false;
                }
            }
            Ok(Event::Empty(element)) => {
                let name = element.name();
                if name.as_ref() == paragraph_tag.as_bytes() {
                    // Self-closing empty paragraph; keep it for positional numbering.
                    paragraphs.push(String::new());
                } else if in_paragraph {
                    match name.as_ref() {
                        b"w:br" => current.push('\n'),
                        b"w:tab" => current.push('\t'),
                        _ => {}
                    }
                }
            }
            Ok(Event::Text(fragment)) => {
                if in_text {
                    let text = fragment.unescape().map_err(|error| {
                        IngestError::Malformed(format!("invalid XML text: {error}"))
                    })?;
                    current.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(error) => {
                return Err(IngestError::Malformed(format!("invalid XML: {error}")));
            }
        }
    }

    Ok(paragraphs)
}

/// A section heading is a short all-caps paragraph that does not end in a colon.
fn is_heading(text: &str) -> bool {
    text.chars().any(|c| c.is_alphabetic())
        && !text.chars().any(|c| c.is_lowercase())
        && text.chars().count() < 50
        && !text.ends_with(':')
}

fn assemble(source: &str, paragraphs: &[String]) -> Vec<Document> {
    let mut full_text: Vec<&str> = Vec::new();
    let mut sections: Vec<(String, Vec<&str>)> = vec![("HEADER".to_string(), Vec::new())];
    let mut paragraph_documents = Vec::new();

    for (index, paragraph) in paragraphs.iter().enumerate() {
        let text = paragraph.trim();
        if text.is_empty() {
            continue;
        }

        full_text.push(text);
        if is_heading(text) {
            sections.push((text.to_string(), Vec::new()));
        } else if let Some((_, body)) = sections.last_mut() {
            body.push(text);
        }

        paragraph_documents.push(Document::new(
            source,
            Locator::Paragraph(index as u32 + 1),
            text.to_string(),
        ));
    }

    if full_text.is_empty() {
        return Vec::new();
    }

    let mut documents = vec![Document::new(
        source,
        Locator::Whole,
        full_text.join("\n"),
    )];

    for (name, body) in sections {
        if body.is_empty() {
            continue;
        }
        let content = format!("{name}\n{}", body.join("\n"));
        documents.push(Document::new(source, Locator::Section(name), content));
    }

    documents.extend(paragraph_documents);
    documents
}
