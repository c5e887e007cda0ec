//! PDF text extraction module
//!
//! Extracts text content from PDF bytes using lopdf. Pages are separated by a
//! blank line so the chunker can break on them.

use ragforge_common::errors::{AppError, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, warn};

/// Text and metadata extracted from one PDF
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub text: String,
    pub page_count: usize,
    /// Hex SHA-256 of the raw PDF bytes
    pub sha256: String,
}

/// Read a PDF from disk
pub async fn read_pdf(source_id: &str, path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| AppError::DocumentParse {
        source_id: source_id.to_string(),
        message: format!("Failed to read {}: {}", path.display(), e),
    })
}

/// Extract text content from PDF bytes
pub fn extract_text_from_pdf(source_id: &str, bytes: &[u8]) -> Result<ExtractedDocument> {
    let parse_error = |message: String| AppError::DocumentParse {
        source_id: source_id.to_string(),
        message,
    };

    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| parse_error(format!("Failed to load PDF: {}", e)))?;

    if doc.is_encrypted() {
        return Err(parse_error("Encrypted PDFs are not supported".to_string()));
    }

    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    let mut page_texts = Vec::with_capacity(pages.len());
    for page_num in pages.keys() {
        match doc.extract_text(&[*page_num]) {
            Ok(page_text) => {
                let cleaned = clean_text(&page_text);
                if !cleaned.is_empty() {
                    page_texts.push(cleaned);
                }
            }
            Err(e) => {
                warn!(page = page_num, error = %e, "Failed to extract text from page, skipping");
            }
        }
    }

    if page_texts.is_empty() {
        return Err(parse_error("No text content extracted from PDF".to_string()));
    }

    let text = page_texts.join("\n\n");
    debug!(chars = text.chars().count(), "Text extraction complete");

    Ok(ExtractedDocument {
        text,
        page_count: pages.len(),
        sha256: hex::encode(Sha256::digest(bytes)),
    })
}

/// Clean extracted text
///
/// Whitespace runs inside a paragraph collapse to one space; blank lines
/// survive as paragraph breaks.
fn clean_text(text: &str) -> String {
    let normalized = text
        // Remove BOMs
        .replace('\u{FEFF}', "")
        // Normalize quotes
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in normalized.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
            continue;
        }
        current.extend(line.split_whitespace());
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }

    paragraphs.join("\n\n")
}

/// Build a minimal PDF with one text line per page
#[cfg(test)]
pub(crate) fn build_test_pdf(pages: &[&str]) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 10.into()]),
                Operation::new("Td", vec![40.into(), 800.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}
