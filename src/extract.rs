//! Plain-text extraction for ingestible source files (PDF, CSV).
//!
//! Extraction is a pure transformation from bytes to UTF-8 text. A failure
//! here is fatal for the one file being ingested; the ingestion loop logs
//! it and moves on.
//!
//! # PDF
//!
//! Page texts are concatenated in page order, each followed by a newline.
//! Pages with no extractable text contribute nothing.
//!
//! # CSV
//!
//! The first record is the header row. Output starts with a
//! `CSV Headers: a, b` line, then one block per data row:
//!
//! ```text
//! Row 1:
//!   ID: 1
//!   Question: What is the refund policy?
//! ```
//!
//! Empty cells are omitted. A row whose column count differs from the
//! header count is kept as a raw line (`Row 2: 1`) rather than dropped.
//! Files that are not valid UTF-8 are decoded as Windows-1252/Latin-1.

use std::path::Path;

use thiserror::Error;

/// Source formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Csv,
}

impl SourceKind {
    /// Detect the kind from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(SourceKind::Pdf),
            "csv" => Some(SourceKind::Csv),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Pdf => "pdf",
            SourceKind::Csv => "csv",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("CSV extraction failed: {0}")]
    Csv(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Read and extract the file at `path`, detecting its kind by extension.
pub fn extract_file(path: &Path) -> Result<String, ExtractError> {
    let kind = SourceKind::from_path(path)
        .ok_or_else(|| ExtractError::UnsupportedType(path.display().to_string()))?;
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;
    extract_text(&bytes, kind)
}

/// Extract plain text from in-memory file contents.
pub fn extract_text(bytes: &[u8], kind: SourceKind) -> Result<String, ExtractError> {
    match kind {
        SourceKind::Pdf => extract_pdf(bytes),
        SourceKind::Csv => extract_csv(bytes),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;

    let mut out = String::new();
    for page in pages {
        if page.trim().is_empty() {
            continue;
        }
        out.push_str(&page);
        out.push('\n');
    }
    Ok(out)
}

fn extract_csv(bytes: &[u8]) -> Result<String, ExtractError> {
    let decoded = decode_text(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(decoded.as_bytes());

    let mut records = reader.records();
    let headers: Vec<String> = match records.next() {
        Some(record) => record
            .map_err(|e| ExtractError::Csv(e.to_string()))?
            .iter()
            .map(|h| h.to_string())
            .collect(),
        None => return Ok(String::new()),
    };

    let mut out = format!("CSV Headers: {}\n\n", headers.join(", "));

    for (i, record) in records.enumerate() {
        let record = record.map_err(|e| ExtractError::Csv(e.to_string()))?;
        let row_num = i + 1;

        if record.len() == headers.len() {
            out.push_str(&format!("Row {}:\n", row_num));
            for (header, value) in headers.iter().zip(record.iter()) {
                if !value.trim().is_empty() {
                    out.push_str(&format!("  {}: {}\n", header, value));
                }
            }
            out.push('\n');
        } else {
            let raw: Vec<&str> = record.iter().collect();
            out.push_str(&format!("Row {}: {}\n\n", row_num, raw.join(", ")));
        }
    }

    Ok(out)
}

/// Decode as UTF-8, falling back to a Windows-1252/Latin-1 byte mapping.
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| decode_cp1252(b)).collect(),
    }
}

fn decode_cp1252(b: u8) -> char {
    match b {
        0x80 => '\u{20AC}',
        0x82 => '\u{201A}',
        0x83 => '\u{0192}',
        0x84 => '\u{201E}',
        0x85 => '\u{2026}',
        0x86 => '\u{2020}',
        0x87 => '\u{2021}',
        0x88 => '\u{02C6}',
        0x89 => '\u{2030}',
        0x8A => '\u{0160}',
        0x8B => '\u{2039}',
        0x8C => '\u{0152}',
        0x8E => '\u{017D}',
        0x91 => '\u{2018}',
        0x92 => '\u{2019}',
        0x93 => '\u{201C}',
        0x94 => '\u{201D}',
        0x95 => '\u{2022}',
        0x96 => '\u{2013}',
        0x97 => '\u{2014}',
        0x98 => '\u{02DC}',
        0x99 => '\u{2122}',
        0x9A => '\u{0161}',
        0x9B => '\u{203A}',
        0x9C => '\u{0153}',
        0x9E => '\u{017E}',
        0x9F => '\u{0178}',
        other => other as char,
    }
}

/// Strip embedded NUL characters, which SQLite text columns reject.
///
/// Returns the cleaned text and whether anything was removed.
pub fn strip_nul(text: String) -> (String, bool) {
    if text.contains('\0') {
        (text.replace('\0', ""), true)
    } else {
        (text, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_extension() {
        assert_eq!(
            SourceKind::from_path(Path::new("handbook.PDF")),
            Some(SourceKind::Pdf)
        );
        assert_eq!(
            SourceKind::from_path(Path::new("faq.csv")),
            Some(SourceKind::Csv)
        );
        assert_eq!(SourceKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(SourceKind::from_path(Path::new("README")), None);
    }

    #[test]
    fn csv_rows_become_labeled_blocks() {
        let csv = b"ID,Question,Answer\n1,Refunds?,Within 30 days\n2,Hours?,\n";
        let text = extract_text(csv, SourceKind::Csv).unwrap();
        assert_eq!(
            text,
            "CSV Headers: ID, Question, Answer\n\n\
             Row 1:\n  ID: 1\n  Question: Refunds?\n  Answer: Within 30 days\n\n\
             Row 2:\n  ID: 2\n  Question: Hours?\n\n"
        );
    }

    #[test]
    fn csv_malformed_row_uses_raw_fallback() {
        let csv = b"ID,Question\n1\n2,Is it open?\n";
        let text = extract_text(csv, SourceKind::Csv).unwrap();
        assert!(text.contains("Row 1: 1\n"));
        assert!(text.contains("Row 2:\n  ID: 2\n  Question: Is it open?\n"));
    }

    #[test]
    fn csv_quoted_fields_keep_commas() {
        let csv = b"Name,Link\n\"Smith, Jane\",https://example.com\n";
        let text = extract_text(csv, SourceKind::Csv).unwrap();
        assert!(text.contains("  Name: Smith, Jane\n"));
    }

    #[test]
    fn csv_latin1_fallback() {
        let csv = b"Name\nJos\xe9\n";
        let text = extract_text(csv, SourceKind::Csv).unwrap();
        assert!(text.contains("Name: Jos\u{e9}"));
    }

    #[test]
    fn csv_empty_and_header_only() {
        assert_eq!(extract_text(b"", SourceKind::Csv).unwrap(), "");
        assert_eq!(
            extract_text(b"A,B\n", SourceKind::Csv).unwrap(),
            "CSV Headers: A, B\n\n"
        );
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", SourceKind::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn unsupported_file_returns_error() {
        let err = extract_file(Path::new("/nonexistent/notes.txt")).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedType(_)));
    }

    #[test]
    fn missing_file_returns_io_error() {
        let err = extract_file(Path::new("/nonexistent/handbook.pdf")).unwrap_err();
        assert!(matches!(err, ExtractError::Io { .. }));
    }

    #[test]
    fn strip_nul_reports_removal() {
        assert_eq!(strip_nul("a\0b".to_string()), ("ab".to_string(), true));
        assert_eq!(strip_nul("ab".to_string()), ("ab".to_string(), false));
    }
}
