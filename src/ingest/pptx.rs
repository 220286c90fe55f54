//! PPTX loader.
//!
//! Slides live at `ppt/slides/slideN.xml` inside the ZIP container, with text in `<a:t>` runs
//! grouped under `<a:p>` paragraphs. The loader emits one document per non-empty slide.

use std::io::{Cursor, Read};

use super::docx::collect_paragraphs;
use super::{Document, IngestError, Locator};

/// Extract one document per slide from a PPTX upload.
pub(crate) fn parse(source: &str, bytes: &[u8]) -> Result<Vec<Document>, IngestError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|error| IngestError::Malformed(format!("not a valid OOXML container: {error}")))?;

    let mut slide_entries: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| Some((slide_number(name)?, name.to_string())))
        .collect();
    slide_entries.sort_by_key(|(number, _)| *number);

    let mut documents = Vec::new();
    for (index, (_, entry)) in slide_entries.iter().enumerate() {
        let mut xml = String::new();
        archive
            .by_name(entry)
            .map_err(|error| IngestError::Malformed(format!("missing '{entry}': {error}")))?
            .read_to_string(&mut xml)
            .map_err(|error| IngestError::Malformed(format!("could not read '{entry}': {error}")))?;

        let paragraphs = collect_paragraphs(&xml, "a:p", "a:t")?;
        let slide_text = paragraphs
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        if slide_text.is_empty() {
            continue;
        }
        documents.push(Document::new(
            source,
            Locator::Slide(index as u32 + 1),
            slide_text,
        ));
    }

    Ok(documents)
}

/// Parse `ppt/slides/slide12.xml` into `12`; anything else is not a slide entry.
fn slide_number(name: &str) -> Option<u32> {
    name.strip_prefix("ppt/slides/slide")?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn pptx_bytes(slides: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (entry, xml) in slides {
                writer.start_file(entry.to_string(), options).unwrap();
                writer.write_all(xml.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn slide_xml(lines: &[&str]) -> String {
        let paragraphs: String = lines
            .iter()
            .map(|line| format!("<a:p><a:r><a:t>{line}</a:t></a:r></a:p>"))
            .collect();
        format!(
            "<?xml version=\"1.0\"?><p:sld \
             xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\" \
             xmlns:p=\"http://schemas.openxmlformats.org/presentationml/2006/main\">\
             <p:cSld><p:spTree><p:sp><p:txBody>{paragraphs}</p:txBody></p:sp>\
             </p:spTree></p:cSld></p:sld>"
        )
    }

    #[test]
    fn orders_slides_numerically_not_lexically() {
        let bytes = pptx_bytes(&[
            ("ppt/slides/slide10.xml", &slide_xml(&["Tenth"])),
            ("ppt/slides/slide2.xml", &slide_xml(&["Second"])),
            ("ppt/slides/slide1.xml", &slide_xml(&["First"])),
            ("ppt/presentation.xml", "<p:presentation/>"),
        ]);
        let documents = parse("deck.pptx", &bytes).unwrap();

        let contents: Vec<_> = documents.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["First", "Second", "Tenth"]);
        assert_eq!(documents[2].locator, Locator::Slide(3));
    }

    #[test]
    fn joins_paragraphs_within_a_slide() {
        let bytes = pptx_bytes(&[(
            "ppt/slides/slide1.xml",
            &slide_xml(&["Quarterly Review", "Revenue up 12%"]),
        )]);
        let documents = parse("deck.pptx", &bytes).unwrap();
        assert_eq!(documents[0].content, "Quarterly Review\nRevenue up 12%");
    }

    #[test]
    fn skips_empty_slides_without_renumbering() {
        let bytes = pptx_bytes(&[
            ("ppt/slides/slide1.xml", &slide_xml(&["Title"])),
            ("ppt/slides/slide2.xml", &slide_xml(&[])),
            ("ppt/slides/slide3.xml", &slide_xml(&["Body"])),
        ]);
        let documents = parse("deck.pptx", &bytes).unwrap();

        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].locator, Locator::Slide(1));
        assert_eq!(documents[1].locator, Locator::Slide(3));
    }

    #[test]
    fn deck_without_slides_is_empty() {
        let bytes = pptx_bytes(&[("ppt/presentation.xml", "<p:presentation/>")]);
        assert!(parse("deck.pptx", &bytes).unwrap().is_empty());
    }
}
