use crate::error::ExtractError;
use lopdf::Document;
use regex::Regex;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::OnceLock;

pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["pdf", "docx", "txt", "md"];

const DOCX_BODY: &str = "word/document.xml";

/// Turns raw file bytes into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, file_name: &str, bytes: &[u8]) -> Result<String, ExtractError>;
}

/// Extracts PDFs with lopdf, Word documents from their XML body, and reads
/// text formats as UTF-8.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentTextExtractor;

impl TextExtractor for DocumentTextExtractor {
    fn extract(&self, file_name: &str, bytes: &[u8]) -> Result<String, ExtractError> {
        match extension(file_name).as_deref() {
            Some("pdf") => extract_pdf(bytes),
            Some("docx") => extract_docx(bytes),
            Some("txt") | Some("md") => String::from_utf8(bytes.to_vec())
                .map_err(|error| ExtractError::CorruptFile(format!("{file_name}: {error}"))),
            _ => Err(ExtractError::UnsupportedFormat(file_name.to_string())),
        }
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let document =
        Document::load_mem(bytes).map_err(|error| ExtractError::CorruptFile(error.to_string()))?;

    let mut pages = Vec::new();
    for page_no in document.get_pages().keys() {
        let text = document
            .extract_text(&[*page_no])
            .map_err(|error| ExtractError::CorruptFile(error.to_string()))?;
        if !text.trim().is_empty() {
            pages.push(text);
        }
    }

    Ok(pages.join("\n"))
}

fn text_run() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>").expect("static text run pattern compiles")
    })
}

/// One line per non-empty paragraph of `word/document.xml`.
fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(corrupt)?;
    let mut xml = String::new();
    archive
        .by_name(DOCX_BODY)
        .map_err(corrupt)?
        .read_to_string(&mut xml)
        .map_err(corrupt)?;

    let paragraphs: Vec<String> = xml
        .split("</w:p>")
        .map(|paragraph| {
            text_run()
                .captures_iter(paragraph)
                .filter_map(|run| run.get(1))
                .map(|run| unescape_xml(run.as_str()))
                .collect::<String>()
        })
        .filter(|paragraph| !paragraph.trim().is_empty())
        .collect();

    Ok(paragraphs.join("\n"))
}

fn corrupt(error: impl std::fmt::Display) -> ExtractError {
    ExtractError::CorruptFile(error.to_string())
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

pub fn is_supported(file_name: &str) -> bool {
    extension(file_name).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

pub fn mime_type_for(file_name: &str) -> &'static str {
    match extension(file_name).as_deref() {
        Some("pdf") => "application/pdf",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        _ => "application/octet-stream",
    }
}
