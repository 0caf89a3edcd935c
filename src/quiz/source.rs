use std::path::Path;
use std::process::Command;

use log::{debug, info, warn};
use thiserror::Error;

/// Words hinting that part of the content lives in figures rather than text.
const OCR_HINTS: [&str; 2] = ["diagram", "pathway"];

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Failed to read PDF: {0}")]
    Pdf(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExtractionError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrOptions {
    pub lang: String,
    pub dpi: u32,
    /// Only the first `pages` pages are rendered
    pub pages: u32,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            lang: "eng".to_string(),
            dpi: 300,
            pages: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    /// Why the OCR step was skipped, when it was wanted but failed
    pub degraded: Option<String>,
}

impl Extraction {
    /// Joins the text of several documents; the first degradation notice is kept.
    pub fn merge(&mut self, other: Extraction) {
        if !self.text.is_empty() && !other.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(&other.text);
        if self.degraded.is_none() {
            self.degraded = other.degraded;
        }
    }
}

/// Text of a PDF, with best effort OCR for scanned pages and diagrams.
pub struct PdfTextSource {
    ocr: Option<OcrOptions>,
}

impl PdfTextSource {
    pub fn new(ocr: Option<OcrOptions>) -> Self {
        Self { ocr }
    }

    pub fn extract(&self, document: &[u8]) -> Result<Extraction> {
        let text = pdf_extract::extract_text_from_mem(document)
            .map_err(|e| ExtractionError::Pdf(e.to_string()))?;
        debug!("Extracted {} characters of text", text.len());

        let mut extraction = Extraction {
            text,
            degraded: None,
        };
        let Some(options) = &self.ocr else {
            return Ok(extraction);
        };
        if !wants_ocr(&extraction.text) {
            return Ok(extraction);
        }

        match ocr_pdf(document, options) {
            Ok(ocr_text) => {
                info!("OCR added {} characters", ocr_text.len());
                if !ocr_text.trim().is_empty() {
                    extraction.merge(Extraction {
                        text: ocr_text,
                        degraded: None,
                    });
                }
            }
            Err(reason) => {
                warn!("Image processing skipped, continuing with text only: {}", reason);
                extraction.degraded = Some(reason);
            }
        }
        Ok(extraction)
    }
}

fn wants_ocr(text: &str) -> bool {
    let lowered = text.to_lowercase();
    text.trim().is_empty() || OCR_HINTS.iter().any(|hint| lowered.contains(hint))
}

/// Renders pages with `pdftoppm` and reads each image with `tesseract`.
fn ocr_pdf(document: &[u8], options: &OcrOptions) -> std::result::Result<String, String> {
    let temp_dir = tempfile::tempdir().map_err(|e| e.to_string())?;
    let pdf_path = temp_dir.path().join("document.pdf");
    std::fs::write(&pdf_path, document).map_err(|e| e.to_string())?;

    let prefix = temp_dir.path().join("page");
    run(Command::new("pdftoppm")
        .arg("-png")
        .arg("-r")
        .arg(options.dpi.to_string())
        .arg("-f")
        .arg("1")
        .arg("-l")
        .arg(options.pages.max(1).to_string())
        .arg(&pdf_path)
        .arg(&prefix))?;

    let mut images = std::fs::read_dir(temp_dir.path())
        .map_err(|e| e.to_string())?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|ext| ext == "png").unwrap_or(false))
        .collect::<Vec<_>>();
    images.sort();
    if images.is_empty() {
        return Err("pdftoppm produced no page images".to_string());
    }

    let mut text = String::new();
    for image in &images {
        text.push_str(&tesseract(image, &options.lang)?);
        text.push('\n');
    }
    Ok(text)
}

fn tesseract(image: &Path, lang: &str) -> std::result::Result<String, String> {
    run(Command::new("tesseract")
        .arg(image)
        .arg("stdout")
        .arg("-l")
        .arg(lang))
}

fn run(command: &mut Command) -> std::result::Result<String, String> {
    let program = command.get_program().to_string_lossy().to_string();
    let output = command
        .output()
        .map_err(|e| format!("failed to run {}: {}", program, e))?;
    if !output.status.success() {
        return Err(format!(
            "{} failed: {}",
            program,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
