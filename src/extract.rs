use std::path::Path;

use lopdf::Document;

use crate::error::{Error, Result};

/// Text of a single page. Page numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page: u32,
    pub text: String,
}

/// Extracts ordered page text from a source document.
pub trait Extractor {
    fn extract(&self, path: &Path) -> Result<Vec<PageText>>;
}

/// PDF text extraction backed by lopdf.
///
/// Pages are returned in page order; pages whose text is blank after
/// trimming are dropped. Layout analysis and OCR are not attempted.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<PageText>> {
        let document_name = path.display().to_string();
        let doc = Document::load(path).map_err(|e| Error::Extraction {
            document: document_name.clone(),
            reason: e.to_string(),
        })?;

        let mut pages = Vec::new();
        for page in doc.get_pages().into_keys() {
            let text =
                doc.extract_text(&[page]).map_err(|e| Error::Extraction {
                    document: document_name.clone(),
                    reason: format!("page {page}: {e}"),
                })?;
            let text = text.trim();
            if !text.is_empty() {
                pages.push(PageText {
                    page,
                    text: text.to_string(),
                });
            }
        }

        Ok(pages)
    }
}
