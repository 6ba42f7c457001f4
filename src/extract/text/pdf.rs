//! PDF and image text extraction using poppler-utils and Tesseract.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;
use tracing::{debug, warn};

use super::{handle_cmd_output, RawText, TextError};

const PDFTOTEXT: &str = "pdftotext (install poppler-utils)";
const PDFTOPPM: &str = "pdftoppm (install poppler-utils)";
const TESSERACT: &str = "tesseract (install tesseract-ocr)";

/// Extract text from a PDF.
///
/// Runs pdftotext first; when a page has almost no text layer it is
/// rasterized and OCR'd, keeping whichever version has more content.
pub(super) fn extract_pdf(
    path: &Path,
    ocr_language: &str,
    min_chars_per_page: usize,
) -> Result<RawText, TextError> {
    let text = run_pdftotext(path)?;
    let mut pages: Vec<String> = text.split('\x0c').map(|p| p.to_string()).collect();
    // pdftotext terminates every page with a form feed
    if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
        pages.pop();
    }
    let page_count = pdf_page_count(path).unwrap_or(pages.len().max(1) as u32);

    let sparse: Vec<usize> = pages
        .iter()
        .enumerate()
        .filter(|(_, p)| visible_chars(p) < min_chars_per_page)
        .map(|(i, _)| i)
        .collect();

    if !sparse.is_empty() {
        debug!(
            "{} of {} pages look scanned, trying OCR",
            sparse.len(),
            pages.len()
        );
        match ocr_pdf_pages(path, ocr_language) {
            Ok(ocr_pages) => {
                for i in sparse {
                    let Some(ocr_text) = ocr_pages.get(i) else {
                        continue;
                    };
                    let pdf_chars = visible_chars(&pages[i]);
                    // Prefer OCR only with noticeably more content
                    if visible_chars(ocr_text) > pdf_chars + pdf_chars / 5 {
                        pages[i] = ocr_text.clone();
                    }
                }
            }
            Err(e) if pages.iter().all(|p| visible_chars(p) == 0) => {
                // Nothing to fall back to
                return Err(e);
            }
            Err(e) => warn!("OCR fallback failed, keeping text layer: {}", e),
        }
    }

    Ok(RawText::new(pages.join("\n\n"), page_count))
}

/// Extract text from an image with Tesseract.
pub(super) fn extract_image(path: &Path, ocr_language: &str) -> Result<RawText, TextError> {
    let text = run_tesseract(path, ocr_language)?;
    Ok(RawText::new(text, 1))
}

fn visible_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// Run pdftotext on a PDF file.
fn run_pdftotext(path: &Path) -> Result<String, TextError> {
    let output = Command::new("pdftotext")
        .args(["-layout", "-enc", "UTF-8"])
        .arg(path)
        .arg("-")
        .output();

    handle_cmd_output(output, PDFTOTEXT, TextError::Corrupted)
}

/// Get the page count of a PDF.
fn pdf_page_count(path: &Path) -> Option<u32> {
    let output = Command::new("pdfinfo").arg(path).output().ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find(|line| line.starts_with("Pages:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse().ok())
}

/// Rasterize every page and OCR it. Returns one string per page.
fn ocr_pdf_pages(path: &Path, ocr_language: &str) -> Result<Vec<String>, TextError> {
    let temp_dir = TempDir::new()?;
    let temp_path = temp_dir.path();

    let output = Command::new("pdftoppm")
        .args(["-png", "-r", "300"])
        .arg(path)
        .arg(temp_path.join("page"))
        .output();
    handle_cmd_output(output, PDFTOPPM, TextError::TransientProviderError)?;

    let mut images: Vec<PathBuf> = std::fs::read_dir(temp_path)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
        .collect();
    // page-01.png, page-02.png ... sort lexically within one width
    images.sort();

    if images.is_empty() {
        return Err(TextError::TransientProviderError(
            "No images generated from PDF".to_string(),
        ));
    }

    images
        .iter()
        .map(|image| run_tesseract(image, ocr_language))
        .collect()
}

/// Run Tesseract OCR on an image.
fn run_tesseract(image_path: &Path, ocr_language: &str) -> Result<String, TextError> {
    let output = Command::new("tesseract")
        .arg(image_path)
        .arg("stdout")
        .args(["-l", ocr_language])
        .output();

    handle_cmd_output(output, TESSERACT, TextError::TransientProviderError)
}
