//! FsContentStore - ファイルシステム上の artifact を読む ContentStore
//!
//! - 相対パスは `root` の下として解決する
//! - 絶対パスはそのまま読む（エンジンが絶対パスを返す場合）
//! - `..` で root の外に出る相対パスは拒否する

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::domain::ContentStoreError;
use crate::ports::ContentStore;

#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, location: &str) -> Result<PathBuf, ContentStoreError> {
        let path = Path::new(location);
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(ContentStoreError::OutsideRoot(location.to_string()));
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn read(&self, location: &str) -> Result<Option<Vec<u8>>, ContentStoreError> {
        let path = self.resolve(location)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ContentStoreError::Io {
                location: location.to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_relative_and_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("7")).unwrap();
        std::fs::write(dir.path().join("7/2025-03-14.html"), b"<h1>hi</h1>").unwrap();

        let store = FsContentStore::new(dir.path());
        let relative = store.read("7/2025-03-14.html").await.unwrap();
        assert_eq!(relative.as_deref(), Some(&b"<h1>hi</h1>"[..]));

        let absolute = dir.path().join("7/2025-03-14.html");
        let absolute = store.read(absolute.to_str().unwrap()).await.unwrap();
        assert!(absolute.is_some());
    }

    #[tokio::test]
    async fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path());
        assert!(store.read("nope.html").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn parent_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path());
        let err = store.read("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, ContentStoreError::OutsideRoot(_)));
    }
}
