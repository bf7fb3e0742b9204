//! Upload validation and storage for the HTTP transport.
//!
//! Uploaded files are checked (count, type, size), written to the upload
//! folder under fresh UUID names, and handed to the pipeline as documents.

use std::path::Path;

use anyhow::Context;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::schema::Document;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

/// A file received in a multipart request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Per-request upload limits.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_files: usize,
    pub max_file_bytes: usize,
}

/// Reasons an upload request is refused before any processing.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UploadError {
    #[error("No files selected for upload")]
    NoFiles,

    #[error("Maximum {0} files are allowed at a time")]
    TooManyFiles(usize),

    #[error("{0} is not an image file")]
    NotAnImage(String),

    #[error("{name} is too large (max size {limit})")]
    TooLarge { name: String, limit: String },
}

/// Lower-cased extension after the last dot, if any.
fn extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

/// Check whether a file name carries an accepted image extension.
pub fn is_image_file(filename: &str) -> bool {
    extension(filename)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// A fresh storage name that keeps the original extension.
pub fn generate_unique_filename(filename: &str) -> String {
    let id = Uuid::new_v4();
    match extension(filename) {
        Some(ext) => format!("{}.{}", id, ext),
        None => id.to_string(),
    }
}

fn human_size(bytes: usize) -> String {
    const MB: usize = 1024 * 1024;
    if bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Validate a request's files in the order the service reports problems.
pub fn validate(files: &[UploadedFile], limits: &UploadLimits) -> Result<(), UploadError> {
    if files.is_empty() {
        return Err(UploadError::NoFiles);
    }

    if files.len() > limits.max_files {
        return Err(UploadError::TooManyFiles(limits.max_files));
    }

    for file in files {
        if !is_image_file(&file.filename) {
            return Err(UploadError::NotAnImage(file.filename.clone()));
        }

        if file.bytes.len() > limits.max_file_bytes {
            return Err(UploadError::TooLarge {
                name: file.filename.clone(),
                limit: human_size(limits.max_file_bytes),
            });
        }
    }

    Ok(())
}

/// Persist files under unique names and turn them into pipeline documents.
pub async fn store(dir: &Path, files: Vec<UploadedFile>) -> anyhow::Result<Vec<Document>> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create upload directory {:?}", dir))?;

    let mut documents = Vec::with_capacity(files.len());
    for file in files {
        let name = generate_unique_filename(&file.filename);
        let path = dir.join(&name);
        tokio::fs::write(&path, &file.bytes)
            .await
            .with_context(|| format!("Failed to save upload {:?}", path))?;
        debug!("Stored {} as {:?} ({} bytes)", file.filename, path, file.bytes.len());
        documents.push(Document::new(name, file.bytes));
    }

    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: UploadLimits = UploadLimits {
        max_files: 2,
        max_file_bytes: 5 * 1024 * 1024,
    };

    fn file(name: &str, size: usize) -> UploadedFile {
        UploadedFile {
            filename: name.to_string(),
            bytes: vec![0; size],
        }
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file("scan.png"));
        assert!(is_image_file("SCAN.JPG"));
        assert!(is_image_file("archive.tar.gif"));
        assert!(!is_image_file("invoice.pdf"));
        assert!(!is_image_file("README"));
    }

    #[test]
    fn test_unique_filename_keeps_extension() {
        let a = generate_unique_filename("Invoice.PNG");
        let b = generate_unique_filename("Invoice.PNG");
        assert!(a.ends_with(".png"));
        assert_ne!(a, b);
        assert_eq!(a.len(), 36 + 4);
    }

    #[test]
    fn test_validation_messages() {
        assert_eq!(
            validate(&[], &LIMITS).unwrap_err().to_string(),
            "No files selected for upload"
        );
        assert_eq!(
            validate(&[file("a.png", 1), file("b.png", 1), file("c.png", 1)], &LIMITS)
                .unwrap_err()
                .to_string(),
            "Maximum 2 files are allowed at a time"
        );
        assert_eq!(
            validate(&[file("notes.txt", 1)], &LIMITS)
                .unwrap_err()
                .to_string(),
            "notes.txt is not an image file"
        );
        assert_eq!(
            validate(&[file("big.jpg", 5 * 1024 * 1024 + 1)], &LIMITS)
                .unwrap_err()
                .to_string(),
            "big.jpg is too large (max size 5MB)"
        );
    }

    #[test]
    fn test_valid_upload() {
        assert!(validate(&[file("a.png", 10), file("b.jpeg", 5 * 1024 * 1024)], &LIMITS).is_ok());
    }

    #[tokio::test]
    async fn test_store_writes_files() {
        let root = tempfile::tempdir().unwrap();
        // store creates the directory on demand
        let dir = root.path().join("input");
        let docs = store(&dir, vec![file("a.png", 3), file("b.gif", 4)]).await.unwrap();

        assert_eq!(docs.len(), 2);
        assert_ne!(docs[0].id, docs[1].id);
        for doc in &docs {
            let on_disk = tokio::fs::read(dir.join(&doc.id)).await.unwrap();
            assert_eq!(on_disk, doc.bytes);
        }
    }
}
