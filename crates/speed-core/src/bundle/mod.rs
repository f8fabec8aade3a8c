//! Preparing the selection for transfer.
//!
//! A transfer always carries exactly one file. A single regular file is sent
//! as is; several files, or any directory, are packed into one deflated zip
//! archive named [`BUNDLE_NAME`].

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::protocol::FileInfo;

/// File name of a multi-file bundle.
pub const BUNDLE_NAME: &str = "speed-transfer.zip";

/// MIME type of a multi-file bundle.
pub const BUNDLE_MIME: &str = "application/zip";

/// MIME type used when nothing better is known.
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// A file held in memory, ready to stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    /// File name announced to the receiver
    pub name: String,
    /// MIME type announced to the receiver
    pub mime_type: String,
    /// File content
    pub data: Vec<u8>,
}

impl OutgoingFile {
    /// Metadata announced before the chunks.
    #[must_use]
    pub fn info(&self) -> FileInfo {
        FileInfo {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.data.len() as u64,
        }
    }

    /// Whether this file is a multi-file bundle.
    #[must_use]
    pub fn is_bundle(&self) -> bool {
        self.name == BUNDLE_NAME && self.mime_type == BUNDLE_MIME
    }
}

/// Whether `paths` will be zipped rather than sent directly.
#[must_use]
pub fn needs_bundle(paths: &[PathBuf]) -> bool {
    paths.len() > 1 || paths.iter().any(|p| p.is_dir())
}

/// Read the selection into one [`OutgoingFile`].
///
/// # Errors
///
/// - `Error::InvalidInput` if `paths` is empty
/// - `Error::FileRead` if a file cannot be read
/// - `Error::BundleFailed` if the archive cannot be written
pub async fn prepare(paths: &[PathBuf]) -> Result<OutgoingFile> {
    if paths.is_empty() {
        return Err(Error::InvalidInput("no files selected".to_string()));
    }

    if !needs_bundle(paths) {
        return read_single(&paths[0]).await;
    }

    let paths = paths.to_vec();
    let data = tokio::task::spawn_blocking(move || build_zip(&paths))
        .await
        .map_err(|e| Error::Internal(format!("bundle task failed: {e}")))??;

    tracing::debug!("Bundled selection into {} bytes", data.len());

    Ok(OutgoingFile {
        name: BUNDLE_NAME.to_string(),
        mime_type: BUNDLE_MIME.to_string(),
        data,
    })
}

async fn read_single(path: &Path) -> Result<OutgoingFile> {
    let data = tokio::fs::read(path).await.map_err(|e| file_read_error(path, &e))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;

    let mime_type = mime_guess::from_path(path)
        .first()
        .map_or_else(|| DEFAULT_MIME.to_string(), |m| m.to_string());

    Ok(OutgoingFile {
        name,
        mime_type,
        data,
    })
}

fn file_read_error(path: &Path, e: &std::io::Error) -> Error {
    Error::FileRead {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn zip_error(e: &zip::result::ZipError) -> Error {
    Error::BundleFailed(e.to_string())
}

/// Archive entries for one selected path, as (entry name, source path).
fn entries_for(path: &Path) -> Result<Vec<(String, PathBuf)>> {
    let root_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;

    if !path.is_dir() {
        return Ok(vec![(root_name, path.to_path_buf())]);
    }

    let base = path.parent().unwrap_or(path);
    let mut entries = Vec::new();
    for entry in walkdir::WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(base).unwrap_or(entry.path());
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        entries.push((name, entry.path().to_path_buf()));
    }
    Ok(entries)
}

fn build_zip(paths: &[PathBuf]) -> Result<Vec<u8>> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));

    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut seen = std::collections::HashSet::new();
    for path in paths {
        for (name, source) in entries_for(path)? {
            if !seen.insert(name.clone()) {
                tracing::warn!("Skipping duplicate bundle entry {}", name);
                continue;
            }
            let content = std::fs::read(&source).map_err(|e| file_read_error(&source, &e))?;
            zip.start_file(name.as_str(), options)
                .map_err(|e| zip_error(&e))?;
            zip.write_all(&content)?;
        }
    }

    let cursor = zip.finish().map_err(|e| zip_error(&e))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn read_archive(data: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut file = archive.by_index(i).unwrap();
                let mut content = Vec::new();
                file.read_to_end(&mut content).unwrap();
                (file.name().to_string(), content)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_single_file_passes_through() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello speed").unwrap();

        let file = prepare(&[path]).await.unwrap();
        assert_eq!(file.name, "notes.txt");
        assert_eq!(file.mime_type, "text/plain");
        assert_eq!(file.data, b"hello speed");
        assert!(!file.is_bundle());
        assert_eq!(file.info().size, 11);
    }

    #[tokio::test]
    async fn test_unknown_extension_is_octet_stream() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.speedtestunknown");
        std::fs::write(&path, [0u8, 1, 2]).unwrap();

        let file = prepare(&[path]).await.unwrap();
        assert_eq!(file.mime_type, DEFAULT_MIME);
    }

    #[tokio::test]
    async fn test_multiple_files_are_zipped() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, b"first").unwrap();
        std::fs::write(&b, [9u8; 300]).unwrap();

        let file = prepare(&[a, b]).await.unwrap();
        assert!(file.is_bundle());
        assert_eq!(file.name, BUNDLE_NAME);

        let entries = read_archive(&file.data);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ("a.txt".to_string(), b"first".to_vec()));
        assert_eq!(entries[1], ("b.bin".to_string(), vec![9u8; 300]));
    }

    #[tokio::test]
    async fn test_directory_is_walked() {
        let dir = TempDir::new().unwrap();
        let album = dir.path().join("album");
        std::fs::create_dir_all(album.join("raw")).unwrap();
        std::fs::write(album.join("one.jpg"), b"1").unwrap();
        std::fs::write(album.join("raw/two.cr2"), b"2").unwrap();

        let file = prepare(&[album]).await.unwrap();
        assert!(file.is_bundle());

        let names: Vec<String> = read_archive(&file.data).into_iter().map(|e| e.0).collect();
        assert_eq!(names, vec!["album/one.jpg", "album/raw/two.cr2"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let result = prepare(&[dir.path().join("nope.txt")]).await;
        assert!(matches!(result, Err(Error::FileRead { .. })));
    }

    #[tokio::test]
    async fn test_empty_selection() {
        assert!(matches!(prepare(&[]).await, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_needs_bundle() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("x");
        std::fs::write(&file, b"x").unwrap();

        assert!(!needs_bundle(&[file.clone()]));
        assert!(needs_bundle(&[file.clone(), file]));
        assert!(needs_bundle(&[dir.path().to_path_buf()]));
    }
}
