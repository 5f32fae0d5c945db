//! The derivative cache gateway.
//!
//! Serves a derivative from disk when it exists, and otherwise makes sure
//! exactly one requester computes it while everyone else asking for the
//! same identity waits for the result.

use std::sync::Arc;

use super::identity::{DerivativeId, RequesterId, SourceId};
use super::store::Store;
use crate::config::{Config, LimitsConfig};
use crate::coordinator::{Acquisition, Coordinator, Notice};
use crate::error::{DeriveError, DeriveResult};
use crate::geometry::TransformPlan;
use crate::params::DeriveParams;
use crate::pipeline::{MetadataExtractor, PipelineExecutor};
use crate::types::{Created, ImageDocument, Link, Links};

/// Where a derivation's bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// No parameters: the source itself
    Original,
    /// The artifact was already on disk
    Cached,
    /// This request computed it
    Computed,
    /// Another request computed it while this one waited
    Shared,
}

/// A served image and its document.
#[derive(Debug, Clone)]
pub struct Derivation {
    pub data: Arc<[u8]>,
    pub document: ImageDocument,
    pub provenance: Provenance,
}

pub struct DerivativeGateway {
    store: Store,
    coordinator: Coordinator,
    executor: PipelineExecutor,
    limits: LimitsConfig,
    base_url: String,
    release_on_failure: bool,
}

impl DerivativeGateway {
    pub fn new(config: &Config, store: Store, coordinator: Coordinator) -> Self {
        Self {
            store,
            coordinator,
            executor: PipelineExecutor::new(config),
            limits: config.limits.clone(),
            base_url: config.server.base_url.clone(),
            release_on_failure: config.coordinator.release_on_failure,
        }
    }

    /// Serve the derivative of `source` described by `params`.
    pub async fn derive(&self, source: &SourceId, params: DeriveParams) -> DeriveResult<Derivation> {
        let params = params.normalized();
        params.validate(&self.limits)?;
        let source_doc = self.store.load_source(source).await?;

        if params.is_empty() {
            let data = self.store.read_source(source).await?;
            return Ok(Derivation {
                data: data.into(),
                document: source_doc,
                provenance: Provenance::Original,
            });
        }

        let identity = DerivativeId::new(source, &params);
        if let Some(found) = self.read_artifact(&identity, Provenance::Cached).await? {
            tracing::debug!("Cache hit for {}", identity);
            return Ok(found);
        }

        let requester = RequesterId::new();
        loop {
            match self.coordinator.acquire(identity.clone(), requester).await? {
                Acquisition::Reserved(guard) => {
                    // an owner may have finished between the lookup and the acquire
                    if let Some(found) = self.read_artifact(&identity, Provenance::Cached).await? {
                        guard.complete();
                        return Ok(found);
                    }

                    return match self.materialize(source, &source_doc, &params, &identity).await {
                        Ok(derivation) => {
                            guard.complete();
                            Ok(derivation)
                        }
                        Err(e) => {
                            tracing::error!("Materialising {} failed: {}", identity, e);
                            if self.release_on_failure {
                                guard.abort();
                            } else {
                                guard.abandon();
                            }
                            Err(e)
                        }
                    };
                }
                Acquisition::Queued(pending) => {
                    tracing::debug!("Waiting for {} computed elsewhere", identity);
                    match pending.wait().await? {
                        Notice::Released => {
                            return match self.read_artifact(&identity, Provenance::Shared).await? {
                                Some(found) => Ok(found),
                                None => {
                                    tracing::warn!("{} was released without an artifact", identity);
                                    Err(DeriveError::CoordinatorDefect {
                                        identity: identity.to_string(),
                                    })
                                }
                            };
                        }
                        Notice::Expired => {
                            tracing::debug!("Owner of {} gave up, acquiring again", identity);
                        }
                    }
                }
            }
        }
    }

    /// Plan and run the transform, then write the artifact and its document.
    async fn materialize(
        &self,
        source: &SourceId,
        source_doc: &ImageDocument,
        params: &DeriveParams,
        identity: &DerivativeId,
    ) -> DeriveResult<Derivation> {
        let bytes = self.store.read_source(source).await?;
        let plan = TransformPlan::build(params, source_doc.metadata.width, source_doc.metadata.height);
        tracing::debug!("Plan for {}: {} step(s)", identity, plan.len());

        let derived = self.executor.execute(bytes.into(), plan).await?;

        let source_href = format!("{}{}", self.base_url, source);
        let document = ImageDocument {
            metadata: MetadataExtractor::describe(
                &derived.data,
                derived.width,
                derived.height,
                derived.channels,
                derived.format,
            ),
            created: Created::now(),
            links: Links {
                self_: Link::new(format!("{}?{}", source_href, params.canonical_query())),
                source: Some(Link::new(source_href)),
                origin: None,
            },
            userdata: source_doc.userdata.clone(),
        };

        self.store
            .write_artifact(identity, &derived.data, &document)
            .await?;
        tracing::info!(
            "Materialised {} ({}x{})",
            identity,
            derived.width,
            derived.height
        );

        Ok(Derivation {
            data: derived.data,
            document,
            provenance: Provenance::Computed,
        })
    }

    async fn read_artifact(
        &self,
        identity: &DerivativeId,
        provenance: Provenance,
    ) -> DeriveResult<Option<Derivation>> {
        let Some(data) = self.store.read_artifact(identity).await? else {
            return Ok(None);
        };
        let document = self
            .store
            .read_artifact_document(identity)
            .await?
            .ok_or_else(|| DeriveError::CoordinatorDefect {
                identity: identity.to_string(),
            })?;
        Ok(Some(Derivation {
            data: data.into(),
            document,
            provenance,
        }))
    }
}
