//! Text extraction seam.
//!
//! Extraction is an opaque capability as far as the pipeline is
//! concerned; failures are treated as retryable upstream. The local
//! implementation covers plain text directly and PDFs via the
//! `pdftotext` binary.

use async_trait::async_trait;
use tokio::process::Command;

/// Result of text extraction.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub text: String,
    /// Coarse label detected during extraction (e.g. "invoice"), when the
    /// extractor can tell.
    pub label: Option<String>,
}

/// Extracts text from raw document content.
#[async_trait]
pub trait TextExtraction: Send + Sync {
    async fn extract(&self, content: &[u8], content_type: &str) -> anyhow::Result<Extracted>;
}

/// Local extractor: UTF-8 passthrough for text, `pdftotext` for PDFs.
#[derive(Default)]
pub struct LocalTextExtractor;

impl LocalTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextExtraction for LocalTextExtractor {
    async fn extract(&self, content: &[u8], content_type: &str) -> anyhow::Result<Extracted> {
        if content_type.starts_with("text/") || content_type == "application/json" {
            return Ok(Extracted {
                text: String::from_utf8_lossy(content).into_owned(),
                label: None,
            });
        }
        if content_type == "application/pdf" {
            let text = extract_pdf_text(content).await?;
            return Ok(Extracted { text, label: None });
        }
        anyhow::bail!("unsupported content type for extraction: {content_type}");
    }
}

/// Run pdftotext over the content via a temporary file.
async fn extract_pdf_text(content: &[u8]) -> anyhow::Result<String> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.pdf");
    tokio::fs::write(&input, content).await?;

    let output = Command::new("pdftotext")
        .arg("-layout")
        .arg(&input)
        .arg("-")
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => Ok(String::from_utf8_lossy(&out.stdout).into_owned()),
        Ok(out) => anyhow::bail!(
            "pdftotext failed: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        ),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            anyhow::bail!("pdftotext not found on PATH")
        }
        Err(err) => Err(err.into()),
    }
}
