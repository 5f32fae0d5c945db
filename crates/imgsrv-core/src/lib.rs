//! imgsrv core - polygon-aware image derivative server library.
//!
//! Sources are stored once; derivatives (polygon crops, rotations, resizes,
//! grayscale) are computed on first request and served from the on-disk
//! cache afterwards. Concurrent requests for the same derivative are
//! coordinated so that exactly one of them does the work.
//!
//! # Architecture
//!
//! ```text
//! params → identity → cache hit? ──yes──▶ artifact
//!                         │
//!                         no → acquire ─Reserved─▶ plan → execute → write → release
//!                                  └────Queued───▶ wait for release → artifact
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use imgsrv_core::{Config, DeriveParams, ImgSrv};
//!
//! #[tokio::main]
//! async fn main() -> imgsrv_core::Result<()> {
//!     let server = ImgSrv::new(Config::load()?).await?;
//!     let source = server.ingest_upload(std::fs::read("photo.jpg")?).await?;
//!
//!     let params = DeriveParams { width: Some(400), ..Default::default() };
//!     let derivation = server.derive(&source.id, params).await?;
//!     println!("{} bytes", derivation.data.len());
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod geometry;
pub mod params;
pub mod pipeline;
pub mod types;

use std::sync::Arc;

// Re-exports for convenient access
pub use cache::{Derivation, DerivativeId, Ingested, Provenance, SourceId};
pub use config::{Config, CoordinatorMode};
pub use coordinator::{Coordinator, CoordinatorServer};
pub use error::{ConfigError, DeriveError, DeriveResult, ImgSrvError, Result};
pub use geometry::{Polygon, TransformPlan};
pub use params::DeriveParams;
pub use types::ImageDocument;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The derivative server: source ingestion plus coordinated derivation.
///
/// Cheap to clone; clones share the store and the coordinator connection.
#[derive(Clone)]
pub struct ImgSrv {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    library: cache::SourceLibrary,
    gateway: cache::DerivativeGateway,
}

impl ImgSrv {
    /// Create the storage directories and connect to (or start) the
    /// reservation authority described by `config.coordinator`.
    pub async fn new(config: Config) -> Result<Self> {
        tracing::debug!("Initializing imgsrv v{}", VERSION);
        config.validate()?;

        let store = cache::Store::new(config.upload_dir(), config.cache_dir());
        store.ensure_dirs().await?;

        let coordinator = match (config.coordinator.mode, config.coordinator.address) {
            (CoordinatorMode::Remote, Some(addr)) => {
                tracing::info!("Using remote coordinator at {}", addr);
                Coordinator::connect(addr).await?
            }
            (CoordinatorMode::Remote, None) => {
                return Err(ConfigError::ValidationError(
                    "coordinator.address is required in remote mode".to_string(),
                )
                .into());
            }
            (CoordinatorMode::Local, _) => Coordinator::spawn_local(&config.coordinator),
        };

        let library = cache::SourceLibrary::new(&config, store.clone());
        let gateway = cache::DerivativeGateway::new(&config, store, coordinator);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                library,
                gateway,
            }),
        })
    }

    /// Serve the derivative of `source` described by `params`.
    pub async fn derive(&self, source: &SourceId, params: DeriveParams) -> DeriveResult<Derivation> {
        self.inner.gateway.derive(source, params).await
    }

    /// Store uploaded image bytes as a new source.
    pub async fn ingest_upload(&self, bytes: Vec<u8>) -> DeriveResult<Ingested> {
        self.inner.library.ingest(bytes).await
    }

    /// Download an image from `url` and store it as a new source.
    pub async fn ingest_origin(
        &self,
        url: &str,
        userdata: Option<serde_json::Value>,
    ) -> DeriveResult<Ingested> {
        self.inner.library.ingest_from_origin(url, userdata).await
    }

    /// Replace a source's userdata. Derivatives computed afterwards carry it.
    pub async fn update_userdata(
        &self,
        source: &SourceId,
        userdata: serde_json::Value,
    ) -> DeriveResult<ImageDocument> {
        self.inner.library.update_userdata(source, userdata).await
    }

    /// The stored document of `source`.
    pub async fn source(&self, source: &SourceId) -> DeriveResult<ImageDocument> {
        self.inner.library.load(source).await
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.upload_dir = dir.join("uploads");
        config.storage.cache_dir = dir.join("cache");
        config
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 10, 10])))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[tokio::test]
    async fn test_new_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let server = ImgSrv::new(config(dir.path())).await.unwrap();
        assert!(dir.path().join("uploads").is_dir());
        assert!(dir.path().join("cache").is_dir());
        assert_eq!(server.config().coordinator.mode, CoordinatorMode::Local);
    }

    #[tokio::test]
    async fn test_upload_then_derive() {
        let dir = tempfile::tempdir().unwrap();
        let server = ImgSrv::new(config(dir.path())).await.unwrap();
        let source = server.ingest_upload(png(300, 200)).await.unwrap();

        let params = DeriveParams::from_query([("width", "150"), ("grayscale", "true")]).unwrap();
        let derived = server.derive(&source.id, params).await.unwrap();
        assert_eq!(derived.provenance, Provenance::Computed);
        assert_eq!(derived.document.metadata.width, 150);
        assert_eq!(derived.document.metadata.height, 100);
        assert_eq!(derived.document.metadata.channels, 1);
    }

    #[tokio::test]
    async fn test_remote_mode_without_coordinator_fails() {
        let dir = tempfile::tempdir().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = config(dir.path());
        config.coordinator.mode = CoordinatorMode::Remote;
        config.coordinator.address = Some(addr);
        assert!(matches!(
            ImgSrv::new(config).await,
            Err(ImgSrvError::Derive(DeriveError::CoordinatorUnavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_workers_share_a_remote_coordinator() {
        let dir = tempfile::tempdir().unwrap();
        let base = config(dir.path());

        let authority = Coordinator::spawn_local(&base.coordinator);
        let server = CoordinatorServer::bind("127.0.0.1:0".parse().unwrap(), authority, &base.coordinator)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let mut remote = base.clone();
        remote.coordinator.mode = CoordinatorMode::Remote;
        remote.coordinator.address = Some(addr);

        let a = ImgSrv::new(remote.clone()).await.unwrap();
        let b = ImgSrv::new(remote).await.unwrap();
        let source = a.ingest_upload(png(120, 80)).await.unwrap();

        let params = DeriveParams::from_query([("rotation", "90")]).unwrap();
        let (ra, rb) = tokio::join!(a.derive(&source.id, params.clone()), b.derive(&source.id, params));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        let computed = [ra.provenance, rb.provenance]
            .iter()
            .filter(|p| **p == Provenance::Computed)
            .count();
        assert_eq!(computed, 1);
        assert_eq!(ra.data, rb.data);
        assert_eq!((ra.document.metadata.width, ra.document.metadata.height), (80, 120));
    }
}
