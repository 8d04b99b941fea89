//! Document preview for the `/upload` endpoint.
//!
//! Nothing is stored or indexed: the upload is read, a short preview of its
//! text is extracted and echoed back.
//!
//! - `.docx` — paragraphs of `word/document.xml`, first 500 chars
//! - `.pdf` — text of every page, first 500 chars
//! - anything else — decoded as UTF-8 (invalid bytes dropped), first 300 chars

use std::io::{Cursor, Read};

use lopdf::Document as PdfDocument;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use thiserror::Error;

const RICH_PREVIEW_CHARS: usize = 500;
const PLAIN_PREVIEW_CHARS: usize = 300;

pub const EMPTY_DOCX_NOTE: &str = "[File is empty or has no readable text]";
pub const EMPTY_PDF_NOTE: &str = "[PDF has no readable text]";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("invalid DOCX archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("invalid DOCX document.xml: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("invalid PDF: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Strip directories and anything outside `[A-Za-z0-9_.-]`.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let mut cleaned = base.split_whitespace().collect::<Vec<_>>().join("_");
    if let Ok(re) = Regex::new(r"[^A-Za-z0-9_.\-]") {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_');

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Response text for an uploaded file.
pub fn preview(filename: &str, bytes: &[u8]) -> Result<String, UploadError> {
    let lower = filename.to_ascii_lowercase();

    if lower.ends_with(".docx") {
        let text = docx_text(bytes)?;
        Ok(extracted_message(filename, &text, EMPTY_DOCX_NOTE))
    } else if lower.ends_with(".pdf") {
        let text = pdf_text(bytes)?;
        Ok(extracted_message(filename, &text, EMPTY_PDF_NOTE))
    } else {
        let text: String = String::from_utf8_lossy(bytes)
            .chars()
            .filter(|c| *c != char::REPLACEMENT_CHARACTER)
            .take(PLAIN_PREVIEW_CHARS)
            .collect();
        Ok(format!(
            "File '{}' received.\n\nFirst {} characters:\n\n{}",
            filename, PLAIN_PREVIEW_CHARS, text
        ))
    }
}

fn extracted_message(filename: &str, text: &str, empty_note: &str) -> String {
    let preview = if text.trim().is_empty() {
        empty_note.to_string()
    } else {
        text.chars().take(RICH_PREVIEW_CHARS).collect()
    };
    format!("File '{}' received.\n\nExtracted text:\n\n{}", filename, preview)
}

fn docx_text(bytes: &[u8]) -> Result<String, UploadError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut document = archive.by_name("word/document.xml")?;
    let mut xml = String::new();
    document.read_to_string(&mut xml)?;
    document_xml_text(&xml)
}

/// Text of `<w:t>` runs, one line per `<w:p>` paragraph, tabs and breaks kept.
fn document_xml_text(xml: &str) -> Result<String, UploadError> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut inside_run_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"w:t" => inside_run_text = true,
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => inside_run_text = false,
                b"w:p" => text.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => text.push('\t'),
                b"w:br" | b"w:cr" => text.push('\n'),
                _ => {}
            },
            Event::Text(e) if inside_run_text => text.push_str(&e.unescape()?),
            Event::CData(e) if inside_run_text => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()))
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(text.trim_end_matches('\n').to_string())
}

fn pdf_text(bytes: &[u8]) -> Result<String, UploadError> {
    let doc = PdfDocument::load_mem(bytes)?;
    let mut content = String::new();

    for page_num in doc.get_pages().keys() {
        match doc.extract_text(&[*page_num]) {
            Ok(text) => {
                content.push_str(&text);
                content.push('\n');
            }
            Err(e) => {
                tracing::warn!("Failed to extract text from PDF page {}: {}", page_num, e);
            }
        }
    }

    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn docx_with(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\Yönetmelik 2023.pdf"), "Ynetmelik_2023.pdf");
        assert_eq!(sanitize_filename("my report.docx"), "my_report.docx");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename("çğü"), "upload");
    }

    #[test]
    fn test_plain_text_preview_is_first_300_chars() {
        let body = "ş".repeat(400);
        let message = preview("notes.txt", body.as_bytes()).unwrap();
        assert!(message.starts_with("File 'notes.txt' received.\n\nFirst 300 characters:\n\n"));
        assert_eq!(message.matches('ş').count(), 300);
    }

    #[test]
    fn test_plain_text_drops_invalid_utf8() {
        let message = preview("raw.bin", b"ok\xff\xfeok").unwrap();
        assert!(message.ends_with("okok"));
    }

    #[test]
    fn test_docx_paragraphs_become_lines() {
        let xml = r#"<?xml version="1.0"?><w:document><w:body>
<w:p><w:r><w:t>Madde 1</w:t></w:r></w:p><w:p><w:r><w:t xml:space="preserve">Sermaye &amp; </w:t><w:tab/><w:t>5.000.000 TL</w:t></w:r></w:p>
</w:body></w:document>"#;
        let message = preview("reg.docx", &docx_with(xml)).unwrap();
        assert!(message.starts_with("File 'reg.docx' received.\n\nExtracted text:\n\n"));
        assert!(message.contains("Madde 1\nSermaye & \t5.000.000 TL"), "got {:?}", message);
    }

    #[test]
    fn test_docx_decodes_character_references() {
        let xml = "<w:p><w:r><w:t>Madde&#160;5 &#x2019;A&#x2019; &amp;lt;</w:t></w:r></w:p>";
        let message = preview("x.docx", &docx_with(xml)).unwrap();
        assert!(!message.contains("&#"), "got {:?}", message);
        assert!(message.ends_with("Madde\u{a0}5 \u{2019}A\u{2019} &lt;"), "got {:?}", message);
    }

    #[test]
    fn test_docx_with_broken_xml_is_an_error() {
        let xml = "<w:p><w:t>Madde 1</w:p>";
        assert!(matches!(preview("broken.docx", &docx_with(xml)), Err(UploadError::Xml(_))));
    }

    #[test]
    fn test_docx_without_text_gets_note() {
        let xml = r#"<w:document><w:body><w:p></w:p></w:body></w:document>"#;
        let message = preview("empty.DOCX", &docx_with(xml)).unwrap();
        assert!(message.ends_with(EMPTY_DOCX_NOTE));
    }

    #[test]
    fn test_docx_preview_is_capped_at_500_chars() {
        let xml = format!("<w:p><w:t>{}</w:t></w:p>", "z".repeat(800));
        let message = preview("long.docx", &docx_with(&xml)).unwrap();
        assert_eq!(message.matches('z').count(), 500);
    }

    #[test]
    fn test_corrupt_docx_and_pdf_are_errors() {
        assert!(matches!(preview("bad.docx", b"not a zip"), Err(UploadError::Zip(_))));
        assert!(matches!(preview("bad.pdf", b"not a pdf"), Err(UploadError::Pdf(_))));
    }
}
