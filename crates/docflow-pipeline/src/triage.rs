//! Triage router: decide fast path vs heavy path per document.
//!
//! Plain-text-like files are always fast-path. PDFs get their text layer
//! extracted with the `pdftotext` subprocess and run through a four-signal
//! quality classifier; anything that fails extraction or the classifier
//! routes to the external OCR worker (heavy path). Everything else is
//! heavy-path by default.

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use docflow_core::{defaults, Error, Result};

/// Routing decision for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriageRoute {
    /// Usable text was obtained inline; processing continues immediately.
    FastPath { text: String },
    /// The document needs the external OCR/vision worker.
    HeavyPath { reason: String },
}

/// Text layer pulled out of a PDF.
#[derive(Debug, Clone)]
pub struct PdfText {
    /// Full text with page breaks turned into blank lines.
    pub text: String,
    /// Per-page text, split on the form-feed separators `pdftotext` emits.
    pub pages: Vec<String>,
}

/// Whether this extension always takes the fast path.
pub fn is_fast_path_extension(extension: &str) -> bool {
    let ext = extension.to_lowercase();
    defaults::FAST_PATH_EXTENSIONS.contains(&ext.as_str())
}

/// Byte-level MIME sniffing with the declared type as fallback.
pub fn sniff_mime(data: &[u8], declared: &str) -> String {
    if let Some(kind) = infer::get(data) {
        return kind.mime_type().to_string();
    }
    if declared.trim().is_empty() {
        "application/octet-stream".to_string()
    } else {
        declared.trim().to_string()
    }
}

fn extension(filename: &str) -> Option<String> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

fn looks_like_pdf(filename: &str, data: &[u8]) -> bool {
    if extension(filename).as_deref() == Some("pdf") {
        return true;
    }
    data.starts_with(b"%PDF")
        || infer::get(data)
            .map(|kind| kind.mime_type() == "application/pdf")
            .unwrap_or(false)
}

/// Route one document.
#[instrument(skip(data), fields(subsystem = "pipeline", component = "triage", filename = %filename, size = data.len()))]
pub async fn route(filename: &str, data: &[u8]) -> TriageRoute {
    if let Some(ext) = extension(filename) {
        if is_fast_path_extension(&ext) {
            debug!(extension = %ext, "Fast-path extension");
            return TriageRoute::FastPath {
                text: String::from_utf8_lossy(data).into_owned(),
            };
        }
    }

    if looks_like_pdf(filename, data) {
        return match extract_pdf_text(data, filename).await {
            Ok(pdf) if is_pdf_text_extractable(&pdf.pages) => {
                debug!(pages = pdf.pages.len(), "PDF text layer passed the quality gate");
                TriageRoute::FastPath { text: pdf.text }
            }
            Ok(pdf) => {
                debug!(pages = pdf.pages.len(), "PDF text layer failed the quality gate");
                TriageRoute::HeavyPath {
                    reason: "PDF text layer failed the quality gate".to_string(),
                }
            }
            Err(e) => {
                warn!(error = %e, "PDF text extraction failed");
                TriageRoute::HeavyPath {
                    reason: format!("PDF text extraction failed: {e}"),
                }
            }
        };
    }

    let mime = sniff_mime(data, "");
    TriageRoute::HeavyPath {
        reason: format!("no inline text route for {mime}"),
    }
}

/// Extract the text layer of a PDF via the `pdftotext` subprocess.
///
/// The bytes are spilled to a temp file because `pdftotext` reads from a
/// path; output pages are split on form-feed.
pub async fn extract_pdf_text(data: &[u8], filename: &str) -> Result<PdfText> {
    if data.is_empty() {
        return Err(Error::InvalidInput(
            "cannot extract text from empty PDF data".to_string(),
        ));
    }
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::InvalidInput(format!(
            "file '{filename}' is not a valid PDF (missing %PDF header)"
        )));
    }

    let mut tmp = NamedTempFile::new()?;
    tmp.write_all(data)?;
    let tmp_path = tmp.path().to_string_lossy().to_string();

    let raw = run_with_timeout(
        Command::new("pdftotext").arg(&tmp_path).arg("-"),
        defaults::PDF_EXTRACT_TIMEOUT_SECS,
    )
    .await?;

    let mut pages: Vec<String> = raw.split('\x0c').map(str::to_string).collect();
    // pdftotext ends every page with a form feed, leaving one empty tail.
    if pages.last().map(|p| p.trim().is_empty()).unwrap_or(false) {
        pages.pop();
    }
    let text = pages.join("\n\n");
    Ok(PdfText { text, pages })
}

/// Whether `pdftotext` is installed. The dev binary warns at startup when
/// it is not.
pub async fn pdftotext_available() -> bool {
    match Command::new("pdftotext").arg("-v").output().await {
        // Older pdftotext versions exit 99 on -v; both mean the binary runs.
        Ok(output) => output.status.success() || output.status.code() == Some(99),
        Err(_) => false,
    }
}

async fn run_with_timeout(cmd: &mut Command, timeout_secs: u64) -> Result<String> {
    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| Error::Triage(format!("pdftotext timed out after {timeout_secs}s")))?
        .map_err(|e| Error::Triage(format!("failed to run pdftotext: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Triage(format!(
            "pdftotext failed (exit {}): {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Four-signal classifier over extracted PDF page text. All four signals
/// must pass for the text layer to count as usable.
pub fn is_pdf_text_extractable(pages: &[String]) -> bool {
    let text = pages.join("\n");

    // 1. Minimum content after collapsing whitespace runs.
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() < defaults::TRIAGE_MIN_CONTENT_CHARS {
        return false;
    }

    // 2. Word density: maximal letter runs of length >= 2.
    if letter_runs(&text) < defaults::TRIAGE_MIN_WORD_RUNS {
        return false;
    }

    // 3. Garbage ratio: control characters (excluding line/tab whitespace)
    //    plus U+FFFD replacement characters.
    let total = text.chars().count();
    let garbage = text.chars().filter(|c| is_garbage(*c)).count();
    if total > 0 && garbage as f64 / total as f64 > defaults::TRIAGE_MAX_GARBAGE_RATIO {
        return false;
    }

    // 4. Page coverage, only meaningful beyond the page floor.
    if pages.len() > defaults::TRIAGE_COVERAGE_PAGE_FLOOR {
        let covered = pages
            .iter()
            .filter(|p| {
                p.chars().filter(|c| !c.is_whitespace()).count() > defaults::TRIAGE_PAGE_MIN_CHARS
            })
            .count();
        if (covered as f64) < pages.len() as f64 * defaults::TRIAGE_PAGE_COVERAGE_RATIO {
            return false;
        }
    }

    true
}

fn is_garbage(c: char) -> bool {
    c == '\u{FFFD}' || (c.is_control() && c != '\n' && c != '\r' && c != '\t')
}

fn letter_runs(text: &str) -> usize {
    let mut runs = 0;
    let mut current = 0usize;
    for c in text.chars() {
        if c.is_alphabetic() {
            current += 1;
        } else {
            if current >= 2 {
                runs += 1;
            }
            current = 0;
        }
    }
    if current >= 2 {
        runs += 1;
    }
    runs
}
