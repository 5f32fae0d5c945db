//! The `imgsrv derive` command: run the geometry engine and the transform
//! pipeline once on a local file, without the server or the cache.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use imgsrv_core::pipeline::{ImageDecoder, PipelineExecutor};
use imgsrv_core::{Config, DeriveParams, Polygon, TransformPlan};

/// Arguments for the `derive` command.
#[derive(Args, Debug)]
pub struct DeriveArgs {
    /// Source image file
    #[arg(required = true)]
    pub image: PathBuf,

    /// Polygon to extract, e.g. `[{x:421,y:264},{x:755,y:264},{x:755,y:453}]`
    #[arg(long)]
    pub polygon: Option<String>,

    /// Clockwise rotation in degrees
    #[arg(long, allow_hyphen_values = true)]
    pub rotation: Option<f64>,

    /// Target width in pixels
    #[arg(long)]
    pub width: Option<u32>,

    /// Target height in pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// Convert to grayscale
    #[arg(long)]
    pub grayscale: bool,

    /// Output file (required unless --plan)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print the transform plan as JSON instead of running it
    #[arg(long)]
    pub plan: bool,
}

impl DeriveArgs {
    fn params(&self) -> anyhow::Result<DeriveParams> {
        let polygon = self
            .polygon
            .as_deref()
            .map(Polygon::parse)
            .transpose()?;
        Ok(DeriveParams {
            polygon,
            rotation: self.rotation,
            width: self.width,
            height: self.height,
            grayscale: self.grayscale,
        }
        .normalized())
    }
}

/// Execute the derive command.
pub async fn execute(args: DeriveArgs, config: &Config) -> anyhow::Result<()> {
    let params = args.params()?;
    params.validate(&config.limits)?;

    let bytes = tokio::fs::read(&args.image)
        .await
        .with_context(|| format!("Failed to read {}", args.image.display()))?;
    let decoded = ImageDecoder::new(config.limits.clone())
        .decode_from_bytes(bytes.clone(), &args.image)
        .await?;
    let plan = TransformPlan::build(&params, decoded.width, decoded.height);
    drop(decoded);

    if args.plan {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    let Some(output) = args.output else {
        anyhow::bail!("--output is required unless --plan is given");
    };

    tracing::debug!("Running {} step(s) on {}", plan.len(), args.image.display());
    let derived = PipelineExecutor::new(config)
        .execute(bytes.into(), plan)
        .await?;
    tokio::fs::write(&output, &derived.data)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    tracing::info!(
        "Wrote {} ({}x{}, {} bytes)",
        output.display(),
        derived.width,
        derived.height,
        derived.data.len()
    );
    Ok(())
}
