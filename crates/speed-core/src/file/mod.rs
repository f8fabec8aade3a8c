//! File helpers for Speed.
//!
//! Received files are named by the sending peer, so the name is reduced to a
//! single safe path component before anything touches the disk, and an
//! existing file is never overwritten.

use std::path::{Path, PathBuf};

/// Name used when the sender's file name is unusable.
pub const FALLBACK_FILE_NAME: &str = "received-file";

/// Reduce a peer-supplied file name to one safe path component.
///
/// Directory parts are stripped, control characters and separators are
/// replaced with `_`, and names that end up empty, `.` or `..` fall back to
/// [`FALLBACK_FILE_NAME`].
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .find(|part| !part.trim().is_empty())
        .unwrap_or("");

    let cleaned: String = last
        .trim()
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        FALLBACK_FILE_NAME.to_string()
    } else {
        cleaned
    }
}

/// First path in `dir` for `name` that does not exist yet.
///
/// `report.pdf` becomes `report (1).pdf`, `report (2).pdf`, ...
#[must_use]
pub fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };

    (1u32..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// Format a file size for display.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
