//! On-disk layout for sources and derivative artifacts.
//!
//! ```text
//! upload_dir/<source>          source bytes
//! upload_dir/<source>.json     source document
//! cache_dir/<identity>         artifact bytes
//! cache_dir/<identity>.json    artifact document
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::identity::{DerivativeId, SourceId};
use crate::error::{DeriveError, DeriveResult};
use crate::types::ImageDocument;

/// File-backed store for sources and artifacts.
#[derive(Debug, Clone)]
pub struct Store {
    upload_dir: PathBuf,
    cache_dir: PathBuf,
}

impl Store {
    pub fn new(upload_dir: PathBuf, cache_dir: PathBuf) -> Self {
        Self {
            upload_dir,
            cache_dir,
        }
    }

    /// Create both directories if they are missing.
    pub async fn ensure_dirs(&self) -> DeriveResult<()> {
        for dir in [&self.upload_dir, &self.cache_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| DeriveError::storage(dir, e))?;
        }
        Ok(())
    }

    pub fn source_path(&self, id: &SourceId) -> PathBuf {
        self.upload_dir.join(id.as_str())
    }

    pub fn artifact_path(&self, id: &DerivativeId) -> PathBuf {
        self.cache_dir.join(id.to_string())
    }

    /// The source document; `SourceNotFound` if there is none.
    pub async fn load_source(&self, id: &SourceId) -> DeriveResult<ImageDocument> {
        read_document(&sidecar(&self.source_path(id)))
            .await?
            .ok_or_else(|| DeriveError::SourceNotFound(id.to_string()))
    }

    pub async fn read_source(&self, id: &SourceId) -> DeriveResult<Vec<u8>> {
        let path = self.source_path(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(DeriveError::SourceNotFound(id.to_string()))
            }
            Err(e) => Err(DeriveError::storage(path, e)),
        }
    }

    /// Store a new source. The document is written last, so a source is
    /// only visible once its bytes are complete.
    pub async fn put_source(
        &self,
        id: &SourceId,
        bytes: &[u8],
        document: &ImageDocument,
    ) -> DeriveResult<()> {
        let path = self.source_path(id);
        write_atomic(&path, bytes).await?;
        write_document(&sidecar(&path), document).await
    }

    /// Replace the document of an existing source.
    pub async fn write_source_document(
        &self,
        id: &SourceId,
        document: &ImageDocument,
    ) -> DeriveResult<()> {
        write_document(&sidecar(&self.source_path(id)), document).await
    }

    pub async fn has_artifact(&self, id: &DerivativeId) -> bool {
        tokio::fs::try_exists(self.artifact_path(id))
            .await
            .unwrap_or(false)
    }

    /// Artifact bytes, or `None` if it has not been materialised.
    pub async fn read_artifact(&self, id: &DerivativeId) -> DeriveResult<Option<Vec<u8>>> {
        let path = self.artifact_path(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DeriveError::storage(path, e)),
        }
    }

    pub async fn read_artifact_document(&self, id: &DerivativeId) -> DeriveResult<Option<ImageDocument>> {
        read_document(&sidecar(&self.artifact_path(id))).await
    }

    /// Materialise an artifact. The document goes first and the bytes are
    /// renamed into place last, so an existing artifact always has its
    /// document.
    pub async fn write_artifact(
        &self,
        id: &DerivativeId,
        bytes: &[u8],
        document: &ImageDocument,
    ) -> DeriveResult<()> {
        let path = self.artifact_path(id);
        write_document(&sidecar(&path), document).await?;
        write_atomic(&path, bytes).await
    }
}

fn sidecar(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

async fn read_document(path: &Path) -> DeriveResult<Option<ImageDocument>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(DeriveError::storage(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| DeriveError::storage(path, e))
}

async fn write_document(path: &Path, document: &ImageDocument) -> DeriveResult<()> {
    let json = serde_json::to_vec_pretty(document).map_err(|e| DeriveError::storage(path, e))?;
    write_atomic(path, &json).await
}

/// Write to a sibling temporary file, then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> DeriveResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    let tmp = PathBuf::from(tmp);

    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        return Err(DeriveError::storage(&tmp, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(DeriveError::storage(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::DeriveParams;
    use crate::types::{Created, ImageMetadata, Link, Links};

    fn document(href: &str) -> ImageDocument {
        ImageDocument {
            metadata: ImageMetadata {
                width: 1,
                height: 1,
                channels: 3,
                density: None,
                size: 3,
                mimetype: "image/png".into(),
                format: "png".into(),
            },
            created: Created::now(),
            links: Links {
                self_: Link::new(href),
                source: None,
                origin: None,
            },
            userdata: None,
        }
    }

    fn store(dir: &Path) -> Store {
        Store::new(dir.join("uploads"), dir.join("cache"))
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.ensure_dirs().await.unwrap();
        let id = SourceId::parse("nope").unwrap();
        assert!(matches!(
            store.load_source(&id).await,
            Err(DeriveError::SourceNotFound(_))
        ));
        assert!(matches!(
            store.read_source(&id).await,
            Err(DeriveError::SourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_source_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.ensure_dirs().await.unwrap();
        let id = SourceId::generate();

        store.put_source(&id, b"abc", &document("/x")).await.unwrap();
        assert_eq!(store.read_source(&id).await.unwrap(), b"abc");
        assert_eq!(store.load_source(&id).await.unwrap().links.self_.href, "/x");
        assert!(dir.path().join("uploads").join(format!("{id}.json")).exists());
    }

    #[tokio::test]
    async fn test_artifact_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.ensure_dirs().await.unwrap();
        let id = DerivativeId::new(&SourceId::generate(), &DeriveParams::default());

        assert!(!store.has_artifact(&id).await);
        assert_eq!(store.read_artifact(&id).await.unwrap(), None);

        store.write_artifact(&id, b"pixels", &document("/y")).await.unwrap();
        assert!(store.has_artifact(&id).await);
        assert_eq!(store.read_artifact(&id).await.unwrap().unwrap(), b"pixels");
        assert!(store.read_artifact_document(&id).await.unwrap().is_some());

        let names: Vec<_> = std::fs::read_dir(dir.path().join("cache"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| !n.ends_with(".tmp")));
    }

    #[tokio::test]
    async fn test_corrupt_document_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.ensure_dirs().await.unwrap();
        let id = SourceId::parse("broken").unwrap();
        std::fs::write(dir.path().join("uploads/broken.json"), "{not json").unwrap();
        assert!(matches!(
            store.load_source(&id).await,
            Err(DeriveError::Storage { .. })
        ));
    }
}
