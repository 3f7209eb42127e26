//! Page text extraction through poppler-utils with a tesseract OCR fallback.
//!
//! Every page goes through the same ladder:
//!
//! 1. `pdftotext` on exactly that page (UTF-8, no page-break markers).
//! 2. `pdftoppm` renders the page into a scratch directory, then `tesseract` reads it back with
//!    the configured language list, engine mode and segmentation mode.
//!
//! Subprocesses are killed when their time limit runs out or their future is dropped.
//! Scratch directories are prefixed with the source file stem and carry a random suffix, so
//! concurrent runs over the same file never share one; they are removed on drop.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::sanitize::file_stem;
use super::types::{ExtractionError, IngestionSettings};

/// Source of page counts and per-page text for one document.
#[async_trait]
pub trait PageTextExtractor: Send + Sync {
    /// Number of pages in the document; must be at least one.
    async fn page_count(&self, path: &Path) -> Result<u32, ExtractionError>;

    /// Trimmed, non-empty text of a single page (1-based).
    async fn extract_page(&self, path: &Path, page: u32) -> Result<String, ExtractionError>;
}

/// Executables invoked by [`PopplerExtractor`].
#[derive(Debug, Clone)]
pub struct ToolPaths {
    /// Page count lookup.
    pub pdfinfo: PathBuf,
    /// Native text-layer extraction.
    pub pdftotext: PathBuf,
    /// Page rasterization.
    pub pdftoppm: PathBuf,
    /// OCR engine.
    pub tesseract: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            pdfinfo: PathBuf::from("pdfinfo"),
            pdftotext: PathBuf::from("pdftotext"),
            pdftoppm: PathBuf::from("pdftoppm"),
            tesseract: PathBuf::from("tesseract"),
        }
    }
}

/// OCR parameters passed to tesseract.
#[derive(Debug, Clone)]
pub struct OcrOptions {
    /// Language models joined with `+`, primary language first.
    pub languages: String,
    /// `--oem` value.
    pub engine_mode: u8,
    /// `--psm` value.
    pub page_segmentation_mode: u8,
}

/// Extractor shelling out to poppler-utils and tesseract.
#[derive(Debug, Clone)]
pub struct PopplerExtractor {
    tools: ToolPaths,
    ocr: OcrOptions,
    work_dir: Option<PathBuf>,
    timeout: Duration,
}

impl PopplerExtractor {
    /// Build an extractor from ingestion settings using tools found on `PATH`.
    pub fn new(settings: &IngestionSettings) -> Self {
        Self {
            tools: ToolPaths::default(),
            ocr: OcrOptions {
                languages: settings.ocr_languages.clone(),
                engine_mode: settings.ocr_engine_mode,
                page_segmentation_mode: settings.ocr_page_segmentation_mode,
            },
            work_dir: settings.ocr_work_dir.clone(),
            timeout: settings.page_timeout,
        }
    }

    /// Override the executables used for each stage.
    pub fn with_tools(mut self, tools: ToolPaths) -> Self {
        self.tools = tools;
        self
    }

    /// Read the native text layer of one page.
    pub async fn extract_native(&self, path: &Path, page: u32) -> Result<String, ExtractionError> {
        let page_arg = page.to_string();
        let stdout = self
            .run(
                &self.tools.pdftotext,
                vec![
                    "-f".into(),
                    page_arg.clone().into(),
                    "-l".into(),
                    page_arg.into(),
                    "-enc".into(),
                    "UTF-8".into(),
                    "-nopgbrk".into(),
                    path.as_os_str().to_owned(),
                    "-".into(),
                ],
            )
            .await?;

        non_empty_text(&stdout, page)
    }

    /// Rasterize one page and run OCR over the image.
    pub async fn extract_ocr(&self, path: &Path, page: u32) -> Result<String, ExtractionError> {
        let root = self.work_dir.clone().unwrap_or_else(std::env::temp_dir);
        tokio::fs::create_dir_all(&root).await?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-p{page}-", file_stem(path)))
            .tempdir_in(&root)?;

        let page_arg = page.to_string();
        self.run(
            &self.tools.pdftoppm,
            vec![
                "-f".into(),
                page_arg.clone().into(),
                "-l".into(),
                page_arg.into(),
                "-png".into(),
                path.as_os_str().to_owned(),
                scratch.path().join("page").into_os_string(),
            ],
        )
        .await?;

        let image = find_rendered_image(scratch.path())
            .await?
            .ok_or(ExtractionError::MissingImage { page })?;

        let stdout = self
            .run(
                &self.tools.tesseract,
                vec![
                    image.into_os_string(),
                    "stdout".into(),
                    "-l".into(),
                    self.ocr.languages.clone().into(),
                    "--oem".into(),
                    self.ocr.engine_mode.to_string().into(),
                    "--psm".into(),
                    self.ocr.page_segmentation_mode.to_string().into(),
                ],
            )
            .await?;

        non_empty_text(&stdout, page)
    }

    async fn run(&self, program: &Path, args: Vec<OsString>) -> Result<Vec<u8>, ExtractionError> {
        let tool = program.display().to_string();
        let child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExtractionError::Spawn {
                tool: tool.clone(),
                source,
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ExtractionError::Spawn {
                tool: tool.clone(),
                source,
            })?,
            Err(_) => {
                return Err(ExtractionError::Timeout {
                    tool,
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            return Err(ExtractionError::ToolFailed {
                tool,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl PageTextExtractor for PopplerExtractor {
    async fn page_count(&self, path: &Path) -> Result<u32, ExtractionError> {
        let stdout = self
            .run(&self.tools.pdfinfo, vec![path.as_os_str().to_owned()])
            .await?;
        parse_page_count(&String::from_utf8_lossy(&stdout))
    }

    async fn extract_page(&self, path: &Path, page: u32) -> Result<String, ExtractionError> {
        match self.extract_native(path, page).await {
            Ok(text) => return Ok(text),
            Err(error) => {
                tracing::debug!(page, error = %error, "No native text layer; falling back to OCR");
            }
        }

        match self.extract_ocr(path, page).await {
            Ok(text) => Ok(text),
            Err(ExtractionError::NothingExtracted { .. }) => {
                Err(ExtractionError::NothingExtracted { page, cause: None })
            }
            Err(error) => Err(ExtractionError::NothingExtracted {
                page,
                cause: Some(Box::new(error)),
            }),
        }
    }
}

/// Read the `Pages:` line printed by `pdfinfo`.
pub fn parse_page_count(output: &str) -> Result<u32, ExtractionError> {
    let count = output
        .lines()
        .find_map(|line| line.trim_start().strip_prefix("Pages:"))
        .ok_or_else(|| ExtractionError::PageCount("no `Pages:` line in pdfinfo output".into()))?
        .trim()
        .parse::<u32>()
        .map_err(|error| ExtractionError::PageCount(format!("invalid page count: {error}")))?;

    if count == 0 {
        return Err(ExtractionError::PageCount("document has no pages".into()));
    }
    Ok(count)
}

fn non_empty_text(stdout: &[u8], page: u32) -> Result<String, ExtractionError> {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Err(ExtractionError::NothingExtracted { page, cause: None })
    } else {
        Ok(trimmed.to_string())
    }
}

async fn find_rendered_image(dir: &Path) -> Result<Option<PathBuf>, ExtractionError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut images = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("png") {
            images.push(path);
        }
    }
    images.sort();
    Ok(images.into_iter().next())
}
