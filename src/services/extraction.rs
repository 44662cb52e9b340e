use async_trait::async_trait;
use std::time::Duration;

const EXTRACTION_TIMEOUT: Duration = Duration::from_secs(30);
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Document-to-text capability used by the workers.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Cheap type check run on the submission path.
    fn supports(&self, data: &[u8]) -> bool;

    async fn extract_text(&self, data: &[u8]) -> Result<String, ExtractionError>;
}

/// Extracts the embedded text layer of digital PDFs.
#[derive(Debug, Default)]
pub struct PdfTextExtractor;

impl PdfTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    fn supports(&self, data: &[u8]) -> bool {
        data.starts_with(PDF_MAGIC)
    }

    #[tracing::instrument(skip(self, data), fields(size_bytes = data.len()))]
    async fn extract_text(&self, data: &[u8]) -> Result<String, ExtractionError> {
        if !self.supports(data) {
            return Err(ExtractionError::Unsupported);
        }

        let bytes = data.to_vec();
        let pages = tokio::time::timeout(
            EXTRACTION_TIMEOUT,
            tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem_by_pages(&bytes)),
        )
        .await
        .map_err(|_| ExtractionError::TimedOut)?
        .map_err(|e| ExtractionError::Failed(format!("extraction task aborted: {e}")))?
        .map_err(|e| ExtractionError::Failed(e.to_string()))?;

        tracing::debug!(page_count = pages.len(), "PDF text extraction complete");
        normalize_pages(&pages)
    }
}

/// Trims pages, drops blank ones and collapses runs of blank lines.
pub fn normalize_pages<S: AsRef<str>>(pages: &[S]) -> Result<String, ExtractionError> {
    let mut lines: Vec<&str> = Vec::new();
    for page in pages {
        let page = page.as_ref().trim();
        if page.is_empty() {
            continue;
        }
        for line in page.lines() {
            let line = line.trim_end();
            if line.trim().is_empty() && lines.last().map_or(true, |l| l.is_empty()) {
                continue;
            }
            lines.push(if line.trim().is_empty() { "" } else { line });
        }
        lines.push("");
    }

    let text = lines.join("\n").trim().to_string();
    if text.is_empty() {
        return Err(ExtractionError::NoText);
    }
    Ok(text)
}

/// Extraction problems are permanent for a given artifact; they are never retried.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("document is not a supported PDF")]
    Unsupported,

    #[error("no readable text found in the document")]
    NoText,

    #[error("text extraction timed out")]
    TimedOut,

    #[error("text extraction failed: {0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_pdf_magic_only() {
        let extractor = PdfTextExtractor::new();
        assert!(extractor.supports(b"%PDF-1.7\n..."));
        assert!(!extractor.supports(b"PK\x03\x04 zip archive"));
        assert!(!extractor.supports(b""));
    }

    #[test]
    fn test_normalize_drops_blank_pages_and_collapses_gaps() {
        let pages = vec![
            "  Hemoglobin 13.5 g/dL\n\n\n\nWBC 6.1  \n",
            "   \n  ",
            "Platelets 250",
        ];
        let text = normalize_pages(&pages).unwrap();
        assert_eq!(text, "Hemoglobin 13.5 g/dL\n\nWBC 6.1\n\nPlatelets 250");
    }

    #[test]
    fn test_normalize_rejects_empty_documents() {
        let pages = vec!["", "  \n\t"];
        assert!(matches!(normalize_pages(&pages), Err(ExtractionError::NoText)));
    }

    #[tokio::test]
    async fn test_garbage_pdf_fails_cleanly() {
        let extractor = PdfTextExtractor::new();
        let result = extractor.extract_text(b"%PDF-1.4 not really a pdf").await;
        assert!(matches!(result, Err(ExtractionError::Failed(_))));
    }
}
