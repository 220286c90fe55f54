//! Upload ingestion: file-type dispatch, text extraction, and chunking.
//!
//! Each supported format is handled by a small loader that turns raw bytes into [`Document`]s
//! (unstructured formats) or [`SheetGrid`]s (tabular formats). The service layer registers
//! grids as SQL tables and sends documents through [`chunking`] before indexing.

pub mod chunking;
pub(crate) mod docx;
pub(crate) mod pdf;
pub(crate) mod pptx;
pub(crate) mod sanitize;
pub(crate) mod sheet;
pub(crate) mod text;

use thiserror::Error;

use crate::store::tabular::SheetGrid;

/// Errors raised while extracting content from an upload.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Container, encoding, or structure was not valid for the declared type.
    #[error("{0}")]
    Malformed(String),
}

/// Supported upload formats, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Portable Document Format.
    Pdf,
    /// Word OOXML document.
    Docx,
    /// PowerPoint OOXML presentation.
    Pptx,
    /// Plain text.
    Txt,
    /// Markdown, treated as plain text.
    Md,
    /// Comma-separated values.
    Csv,
    /// Legacy Excel workbook.
    Xls,
    /// Excel OOXML workbook.
    Xlsx,
}

impl FileKind {
    /// Resolve a kind from a filename's extension, case-insensitively.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let extension = filename.rsplit_once('.')?.1.to_lowercase();
        match extension.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "pptx" => Some(Self::Pptx),
            "txt" => Some(Self::Txt),
            "md" => Some(Self::Md),
            "csv" => Some(Self::Csv),
            "xls" => Some(Self::Xls),
            "xlsx" => Some(Self::Xlsx),
            _ => None,
        }
    }

    /// Canonical lowercase extension for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Pptx => "pptx",
            Self::Txt => "txt",
            Self::Md => "md",
            Self::Csv => "csv",
            Self::Xls => "xls",
            Self::Xlsx => "xlsx",
        }
    }

    /// Whether this kind is routed through the tabular pipeline.
    pub fn is_structured(self) -> bool {
        matches!(self, Self::Csv | Self::Xls | Self::Xlsx)
    }
}

/// Position of a document within its source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// The entire file.
    Whole,
    /// A single PDF page, 1-based.
    Page(u32),
    /// A single presentation slide, 1-based.
    Slide(u32),
    /// A blank-line or `<w:p>` separated paragraph, 1-based.
    Paragraph(u32),
    /// A named document section under an all-caps heading.
    Section(String),
    /// A single spreadsheet row, 1-based.
    Row(u64),
}

impl Locator {
    /// Fragment rendered into citation tags, `page=3` style. `Whole` and
    /// `Section` documents cite by filename alone.
    pub fn suffix(&self) -> Option<String> {
        match self {
            Self::Whole | Self::Section(_) => None,
            Self::Page(n) => Some(format!("page={n}")),
            Self::Slide(n) => Some(format!("slide={n}")),
            Self::Paragraph(n) => Some(format!("paragraph={n}")),
            Self::Row(n) => Some(format!("row={n}")),
        }
    }
}

/// A unit of extracted text headed for chunking and indexing.
#[derive(Debug, Clone)]
pub struct Document {
    /// Sanitized filename the text came from.
    pub source: String,
    /// Position within the source file.
    pub locator: Locator,
    /// Extracted text.
    pub content: String,
    /// Registered SQL table the text describes, for tabular documents.
    pub table: Option<String>,
}

impl Document {
    pub(crate) fn new(source: &str, locator: Locator, content: String) -> Self {
        Self {
            source: source.to_string(),
            locator,
            content,
            table: None,
        }
    }

    pub(crate) fn for_table(source: &str, locator: Locator, content: String, table: &str) -> Self {
        Self {
            source: source.to_string(),
            locator,
            content,
            table: Some(table.to_string()),
        }
    }
}

/// One sheet extracted from a tabular upload, paired with the table name it
/// should be registered under (before SQL-level sanitization).
#[derive(Debug)]
pub struct NamedSheet {
    /// Desired table name seed, derived from the file stem and sheet name.
    pub table_seed: String,
    /// Parsed cell grid.
    pub grid: SheetGrid,
}

/// Parsed content of one upload.
#[derive(Debug)]
pub enum ParsedUpload {
    /// Free-text documents ready for chunking.
    Unstructured(Vec<Document>),
    /// Sheets to register as SQL tables.
    Structured(Vec<NamedSheet>),
}

/// Extract content from an upload according to its resolved kind.
///
/// `source` is the sanitized filename used in locators and citations.
pub(crate) fn parse_upload(
    kind: FileKind,
    source: &str,
    bytes: &[u8],
) -> Result<ParsedUpload, IngestError> {
    match kind {
        FileKind::Pdf => Ok(ParsedUpload::Unstructured(pdf::parse(source, bytes)?)),
        FileKind::Docx => Ok(ParsedUpload::Unstructured(docx::parse(source, bytes)?)),
        FileKind::Pptx => Ok(ParsedUpload::Unstructured(pptx::parse(source, bytes)?)),
        FileKind::Txt | FileKind::Md => Ok(ParsedUpload::Unstructured(text::parse(source, bytes)?)),
        FileKind::Csv => Ok(ParsedUpload::Structured(sheet::parse_csv(source, bytes)?)),
        FileKind::Xls | FileKind::Xlsx => {
            Ok(ParsedUpload::Structured(sheet::parse_workbook(source, bytes)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_kinds_case_insensitively() {
        assert_eq!(FileKind::from_filename("Report.PDF"), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_filename("deck.pptx"), Some(FileKind::Pptx));
        assert_eq!(FileKind::from_filename("notes.Md"), Some(FileKind::Md));
        assert_eq!(FileKind::from_filename("data.XLSX"), Some(FileKind::Xlsx));
    }

    #[test]
    fn rejects_unknown_and_missing_extensions() {
        assert_eq!(FileKind::from_filename("archive.tar.gz"), None);
        assert_eq!(FileKind::from_filename("noextension"), None);
        assert_eq!(FileKind::from_filename("image.png"), None);
    }

    #[test]
    fn classifies_structured_kinds() {
        assert!(FileKind::Csv.is_structured());
        assert!(FileKind::Xlsx.is_structured());
        assert!(!FileKind::Pdf.is_structured());
        assert!(!FileKind::Txt.is_structured());
    }

    #[test]
    fn locator_suffixes_match_citation_format() {
        assert_eq!(Locator::Page(3).suffix().as_deref(), Some("page=3"));
        assert_eq!(Locator::Slide(1).suffix().as_deref(), Some("slide=1"));
        assert_eq!(Locator::Paragraph(7).suffix().as_deref(), Some("paragraph=7"));
        assert_eq!(Locator::Row(12).suffix().as_deref(), Some("row=12"));
        assert_eq!(Locator::Whole.suffix(), None);
        assert_eq!(Locator::Section("SUMMARY".into()).suffix(), None);
    }
}
