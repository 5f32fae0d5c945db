//! Source ingestion and source documents.

use std::path::Path;

use super::identity::SourceId;
use super::origin::OriginFetcher;
use super::store::Store;
use crate::config::Config;
use crate::error::DeriveResult;
use crate::pipeline::{ImageDecoder, MetadataExtractor, Validator};
use crate::types::{Created, ImageDocument, Link, Links};

/// A freshly stored source.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub id: SourceId,
    pub document: ImageDocument,
}

/// Validates, describes and stores uploaded sources.
pub struct SourceLibrary {
    store: Store,
    validator: Validator,
    decoder: ImageDecoder,
    fetcher: OriginFetcher,
    base_url: String,
}

impl SourceLibrary {
    pub fn new(config: &Config, store: Store) -> Self {
        Self {
            store,
            validator: Validator::new(config.limits.clone()),
            decoder: ImageDecoder::new(config.limits.clone()),
            fetcher: OriginFetcher::new(&config.limits),
            base_url: config.server.base_url.clone(),
        }
    }

    /// Store uploaded image bytes under a fresh id.
    pub async fn ingest(&self, bytes: Vec<u8>) -> DeriveResult<Ingested> {
        self.ingest_with(bytes, None, None).await
    }

    /// Download `url` and store it, remembering where it came from.
    pub async fn ingest_from_origin(
        &self,
        url: &str,
        userdata: Option<serde_json::Value>,
    ) -> DeriveResult<Ingested> {
        let bytes = self.fetcher.fetch(url).await?;
        self.ingest_with(bytes, Some(url), userdata).await
    }

    async fn ingest_with(
        &self,
        bytes: Vec<u8>,
        origin: Option<&str>,
        userdata: Option<serde_json::Value>,
    ) -> DeriveResult<Ingested> {
        let label = Path::new(origin.unwrap_or("upload"));
        self.validator.validate_bytes(&bytes, label)?;
        let decoded = self.decoder.decode_from_bytes(bytes.clone(), label).await?;

        let id = SourceId::generate();
        let document = ImageDocument {
            metadata: MetadataExtractor::describe(
                &bytes,
                decoded.width,
                decoded.height,
                decoded.channels,
                decoded.format,
            ),
            created: Created::now(),
            links: Links {
                self_: Link::new(format!("{}{}", self.base_url, id)),
                source: None,
                origin: origin.map(Link::new),
            },
            userdata,
        };

        self.store.put_source(&id, &bytes, &document).await?;
        tracing::info!(
            "New source {} ({}x{} {})",
            id,
            document.metadata.width,
            document.metadata.height,
            document.metadata.format
        );
        Ok(Ingested { id, document })
    }

    /// Replace the userdata of an existing source.
    pub async fn update_userdata(
        &self,
        id: &SourceId,
        userdata: serde_json::Value,
    ) -> DeriveResult<ImageDocument> {
        let mut document = self.store.load_source(id).await?;
        document.userdata = Some(userdata);
        self.store.write_source_document(id, &document).await?;
        tracing::debug!("Updated userdata of {}", id);
        Ok(document)
    }

    pub async fn load(&self, id: &SourceId) -> DeriveResult<ImageDocument> {
        self.store.load_source(id).await
    }
}
