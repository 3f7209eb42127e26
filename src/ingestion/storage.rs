//! Persistence of uploaded PDFs under the configured upload directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::sanitize::{file_stem, stored_file_name};
use super::types::IngestionError;

/// Extension accepted for ingestion.
pub const PDF_EXTENSION: &str = ".pdf";

/// Reject anything that is not a `.pdf` file name.
pub fn validate_extension(file_name: &str) -> Result<(), IngestionError> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("pdf") => Ok(()),
        Some(other) => Err(IngestionError::UnsupportedFileType(format!(".{other}"))),
        None => Err(IngestionError::UnsupportedFileType(format!(
            "{file_name} has no extension"
        ))),
    }
}

/// Write uploaded bytes to `<upload_dir>/<title>_<created_at>.pdf`.
///
/// An existing file is never overwritten; a colliding name gets a random suffix instead.
pub async fn store_upload(
    upload_dir: &Path,
    file_name: &str,
    title: &str,
    bytes: &[u8],
    created_at: i64,
) -> Result<PathBuf, IngestionError> {
    validate_extension(file_name)?;
    tokio::fs::create_dir_all(upload_dir).await?;

    let (target, mut file) = create_unique(upload_dir, title, created_at).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    tracing::info!(path = %target.display(), bytes = bytes.len(), "Stored upload");
    Ok(target)
}

/// Copy a local PDF into `upload_dir` under a timestamped name.
pub async fn copy_with_timestamp(
    source: &Path,
    upload_dir: &Path,
    created_at: i64,
) -> Result<PathBuf, IngestionError> {
    let file_name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    validate_extension(&file_name)?;
    tokio::fs::create_dir_all(upload_dir).await?;

    let mut reader = File::open(source).await?;
    let (target, mut file) = create_unique(upload_dir, &file_stem(source), created_at).await?;
    tokio::io::copy(&mut reader, &mut file).await?;
    file.flush().await?;
    tracing::debug!(from = %source.display(), to = %target.display(), "Copied document into upload dir");
    Ok(target)
}

async fn create_unique(
    upload_dir: &Path,
    stem: &str,
    created_at: i64,
) -> Result<(PathBuf, File), IngestionError> {
    let preferred = upload_dir.join(stored_file_name(stem, PDF_EXTENSION, created_at));
    match OpenOptions::new().write(true).create_new(true).open(&preferred).await {
        Ok(file) => return Ok((preferred, file)),
        Err(error) if error.kind() == ErrorKind::AlreadyExists => {}
        Err(error) => return Err(error.into()),
    }

    loop {
        let suffix = Uuid::new_v4().simple().to_string();
        let stamp = format!("{created_at}_{}", &suffix[..8]);
        let candidate = upload_dir.join(stored_file_name(stem, PDF_EXTENSION, stamp));
        match OpenOptions::new().write(true).create_new(true).open(&candidate).await {
            Ok(file) => {
                tracing::debug!(path = %candidate.display(), "Upload name taken; using suffixed name");
                return Ok((candidate, file));
            }
            Err(error) if error.kind() == ErrorKind::AlreadyExists => continue,
            Err(error) => return Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pdf_is_accepted() {
        assert!(validate_extension("report.PDF").is_ok());
        assert!(matches!(
            validate_extension("notes.docx"),
            Err(IngestionError::UnsupportedFileType(ext)) if ext == ".docx"
        ));
        assert!(validate_extension("README").is_err());
    }

    #[tokio::test]
    async fn store_upload_writes_timestamped_file() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let path = store_upload(&uploads, "scan.pdf", "Quarterly report", b"%PDF-1.4", 1_700_000_000)
            .await
            .expect("stored");

        assert_eq!(path, uploads.join("Quarterly_report_1700000000.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4");
    }

    #[tokio::test]
    async fn same_title_and_second_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let first = store_upload(dir.path(), "a.pdf", "Report", b"first", 42)
            .await
            .expect("first stored");
        let second = store_upload(dir.path(), "b.pdf", "Report", b"second", 42)
            .await
            .expect("second stored");

        assert_ne!(first, second);
        assert_eq!(std::fs::read(&first).unwrap(), b"first");
        assert_eq!(std::fs::read(&second).unwrap(), b"second");
        let name = second.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Report_42_"));
        assert!(name.ends_with(".pdf"));
    }

    #[tokio::test]
    async fn store_upload_rejects_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let error = store_upload(dir.path(), "scan.png", "Scan", b"", 1)
            .await
            .unwrap_err();
        assert!(error.is_client_error());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn copy_with_timestamp_keeps_stem() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("hand book.pdf");
        std::fs::write(&source, b"%PDF").unwrap();

        let target = copy_with_timestamp(&source, &dir.path().join("out"), 5)
            .await
            .expect("copied");
        assert_eq!(target.file_name().unwrap(), "hand_book_5.pdf");
        assert!(target.exists());

        let again = copy_with_timestamp(&source, &dir.path().join("out"), 5)
            .await
            .expect("copied again");
        assert_ne!(again, target);
        assert_eq!(std::fs::read(&again).unwrap(), b"%PDF");
        assert_eq!(std::fs::read_dir(dir.path().join("out")).unwrap().count(), 2);
    }
}
