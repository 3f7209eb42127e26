//! Normalization of extracted page text and upload metadata.

use std::collections::HashSet;
use std::path::Path;

use super::types::{DocumentMetadata, IngestionError, UploadRequest};

/// Clean raw extractor output before it reaches the chunker.
///
/// Drops NUL, replacement, escape and other control characters, turns form feeds into
/// newlines, removes dagger marks and private-use glyphs (where PDF fonts park logos),
/// collapses runs of spaces and trims the result.
pub fn clean_page_text(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    let mut previous_space = false;

    for ch in raw.chars() {
        let mapped = match ch {
            '\u{0C}' => Some('\n'),
            '\n' => Some('\n'),
            '\t' | ' ' | '\u{A0}' => Some(' '),
            '\u{FFFD}' | '\u{2020}' | '\u{2021}' => None,
            '\u{E000}'..='\u{F8FF}' => None,
            c if c.is_control() => None,
            c => Some(c),
        };

        let Some(next) = mapped else {
            continue;
        };

        if next == ' ' {
            if previous_space {
                continue;
            }
            previous_space = true;
        } else {
            previous_space = false;
        }
        cleaned.push(next);
    }

    cleaned.trim().to_string()
}

/// Trim arbitrary string input and drop empties.
pub(crate) fn sanitize_string(value: Option<String>) -> Option<String> {
    value.and_then(|input| {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Normalize and dedupe tag values, dropping empties.
pub fn sanitize_tags(values: Vec<String>) -> Vec<String> {
    let mut unique = HashSet::new();
    let mut sanitized = Vec::new();

    for tag in values {
        let trimmed = tag.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lower = trimmed.to_lowercase();
        if unique.insert(lower.clone()) {
            sanitized.push(lower);
        }
    }

    sanitized
}

/// Validate an upload request and freeze it into the per-document metadata template.
pub fn sanitize_metadata(
    request: UploadRequest,
    created_at: i64,
) -> Result<DocumentMetadata, IngestionError> {
    let UploadRequest {
        title,
        source,
        tags,
    } = request;

    let title = sanitize_string(Some(title))
        .map(|value| strip_pdf_suffix(&value).trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| IngestionError::InvalidMetadata("title must not be empty".into()))?;

    Ok(DocumentMetadata {
        title,
        source: sanitize_string(source),
        tags: sanitize_tags(tags),
        created_at,
    })
}

fn strip_pdf_suffix(value: &str) -> &str {
    let len = value.len();
    if len >= 4 && value.is_char_boundary(len - 4) && value[len - 4..].eq_ignore_ascii_case(".pdf")
    {
        &value[..len - 4]
    } else {
        value
    }
}

/// File name without directory or extension, used for titles and scratch directory prefixes.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "document".to_string())
}

/// Build the stored file name `<stem>_<timestamp><ext>` with unsafe characters replaced by `_`.
pub fn stored_file_name(
    stem: &str,
    extension: &str,
    timestamp: impl std::fmt::Display,
) -> String {
    let stem = stem.strip_suffix(extension).unwrap_or(stem);
    format!("{stem}_{timestamp}{extension}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
