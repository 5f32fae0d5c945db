//! Pipeline execution: runs a [`TransformPlan`] against source bytes.

use image::ImageFormat;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use super::backend::{ImageBackend, RasterBackend};
use crate::config::Config;
use crate::error::{DeriveError, DeriveResult};
use crate::geometry::TransformPlan;

/// The encoded result of executing a plan.
///
/// Cheap to clone; the bytes are shared.
#[derive(Debug, Clone)]
pub struct DerivedImage {
    pub data: Arc<[u8]>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

/// Runs transform plans on a backend.
pub struct PipelineExecutor<B = RasterBackend> {
    backend: Arc<B>,
    timeout_ms: u64,
}

impl<B> Clone for PipelineExecutor<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            timeout_ms: self.timeout_ms,
        }
    }
}

impl PipelineExecutor<RasterBackend> {
    /// Create an executor on the raster backend with limits from `config`.
    pub fn new(config: &Config) -> Self {
        Self::with_backend(
            RasterBackend::new(config.limits.max_image_dimension, config.output.jpeg_quality),
            config.limits.transform_timeout_ms,
        )
    }
}

impl<B: ImageBackend + 'static> PipelineExecutor<B> {
    pub fn with_backend(backend: B, timeout_ms: u64) -> Self {
        Self {
            backend: Arc::new(backend),
            timeout_ms,
        }
    }

    /// Decode, apply every step in order, encode. Any step failure aborts
    /// the whole plan; no partial output is produced.
    pub fn execute_sync(&self, source: &[u8], plan: &TransformPlan) -> DeriveResult<DerivedImage> {
        let backend = self.backend.as_ref();
        let start = Instant::now();

        let mut canvas = backend.decode(source)?;
        tracing::trace!("  Decode: {:?}", start.elapsed());

        for step in plan.steps() {
            let step_start = Instant::now();
            canvas = backend.apply(canvas, step)?;
            tracing::trace!(
                "  {}: {:?} -> {:?}",
                step.name(),
                step_start.elapsed(),
                backend.dimensions(&canvas)
            );
        }

        let (width, height) = backend.dimensions(&canvas);
        let encoded = backend.encode(&canvas)?;
        tracing::debug!(
            "Executed {} step(s) in {:?} ({}x{})",
            plan.len(),
            start.elapsed(),
            width,
            height
        );

        Ok(DerivedImage {
            data: encoded.bytes.into(),
            format: encoded.format,
            width,
            height,
            channels: encoded.channels,
        })
    }

    /// Run [`Self::execute_sync`] on the blocking pool under the transform timeout.
    pub async fn execute(&self, source: Arc<[u8]>, plan: TransformPlan) -> DeriveResult<DerivedImage> {
        let this = self.clone();
        let result = timeout(
            Duration::from_millis(self.timeout_ms),
            tokio::task::spawn_blocking(move || this.execute_sync(&source, &plan)),
        )
        .await;

        match result {
            Ok(Ok(derived)) => derived,
            Ok(Err(e)) => Err(DeriveError::transform("execute", format!("Task join error: {}", e))),
            Err(_) => Err(DeriveError::Timeout {
                stage: "transform".to_string(),
                timeout_ms: self.timeout_ms,
            }),
        }
    }
}
