//! Uploaded source images.
//!
//! An input reference is a bare file name inside the upload directory.
//! References containing path separators or parent components are
//! rejected, so a reference can never point outside the directory.

use std::path::{Component, Path, PathBuf};

use uuid::Uuid;

use crate::error::StorageError;

/// Extensions kept from the uploaded file name.
const KNOWN_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Directory-backed store for uploaded inputs.
#[derive(Debug, Clone)]
pub struct InputStore {
    dir: PathBuf,
}

impl InputStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save an upload under a fresh name and return its reference.
    pub async fn save(
        &self,
        original_filename: Option<&str>,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let extension = original_filename
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .filter(|ext| KNOWN_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or_else(|| "img".to_string());
        let input_ref = format!("{}.{extension}", Uuid::new_v4());

        tokio::fs::write(self.dir.join(&input_ref), bytes).await?;
        tracing::debug!(input_ref = %input_ref, size = bytes.len(), "Upload saved");
        Ok(input_ref)
    }

    /// Path of an existing input.
    pub async fn resolve(&self, input_ref: &str) -> Result<PathBuf, StorageError> {
        let path = self.path_for(input_ref)?;
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(path),
            Ok(false) => Err(StorageError::NotFound(input_ref.to_string())),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Read an input's bytes.
    pub async fn read(&self, input_ref: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(input_ref).await?;
        Ok(tokio::fs::read(path).await?)
    }

    /// Delete an input. A missing file is not an error.
    pub async fn remove(&self, input_ref: &str) -> Result<(), StorageError> {
        let path = self.path_for(input_ref)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn path_for(&self, input_ref: &str) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(input_ref).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.dir.join(input_ref)),
            _ => Err(StorageError::InvalidReference(input_ref.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn save_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = InputStore::new(dir.path());

        let input_ref = store.save(Some("Cat.PNG"), b"bytes").await.unwrap();
        assert!(input_ref.ends_with(".png"));
        assert_eq!(store.read(&input_ref).await.unwrap(), b"bytes");

        store.remove(&input_ref).await.unwrap();
        assert_matches!(
            store.resolve(&input_ref).await,
            Err(StorageError::NotFound(_))
        );
        store.remove(&input_ref).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_extension_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = InputStore::new(dir.path());
        let input_ref = store.save(Some("photo.exe"), b"x").await.unwrap();
        assert!(input_ref.ends_with(".img"));
        let input_ref = store.save(None, b"x").await.unwrap();
        assert!(input_ref.ends_with(".img"));
    }

    #[tokio::test]
    async fn references_cannot_escape_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = InputStore::new(dir.path());

        for bad in ["../etc/passwd", "/etc/passwd", "a/b.png", "..", ""] {
            assert_matches!(
                store.resolve(bad).await,
                Err(StorageError::InvalidReference(_)),
                "{bad}"
            );
        }
    }
}
