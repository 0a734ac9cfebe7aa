// src/pipeline.rs
//! Glue between the artifact store, the run context and the cleaning transform.

use crate::{
    artifact::{ArtifactManifest, ArtifactStore, NewArtifact},
    cli::CleaningArgs,
    process::{self, PriceRange},
    run::{RunContext, RunEvent},
};
use anyhow::{Context, Result};
use tokio::fs;
use tracing::{info, Span};

pub const JOB_TYPE: &str = "basic_cleaning";

/// Name of the file the cleaned table is staged in and logged under.
pub const OUTPUT_FILE: &str = "clean_sample.csv";

/// Download the input artifact, clean it and log the result as a new artifact version.
pub async fn go(
    ctx: &RunContext,
    store: &ArtifactStore,
    args: &CleaningArgs,
) -> Result<ArtifactManifest> {
    ctx.update_config(args)?;
    let range = PriceRange::new(args.min_price, args.max_price)?;
    info!(min_price = range.min(), max_price = range.max(), "price range");

    info!("Downloading artifact {}", args.input_artifact);
    let input = store
        .use_artifact(&args.input_artifact)
        .await
        .with_context(|| format!("using artifact {}", args.input_artifact))?;
    ctx.record(&input.manifest.qualified_name(), RunEvent::UsedArtifact)?;
    let input_path = input.file()?;

    let output_path = ctx.staging_path(OUTPUT_FILE);
    let staged = output_path.clone();
    let output_artifact = args.output_artifact.clone();
    let span = Span::current();

    // parsing and cleaning are CPU-bound; keep them off the async workers
    tokio::task::spawn_blocking(move || -> Result<()> {
        let _enter = span.enter();

        info!("Loading dataset");
        let df = process::read_csv(&input_path)?;
        info!(rows = df.num_rows(), columns = df.num_columns(), "loaded dataset");

        info!("Basic Cleaning");
        let cleaned = process::clean(&df, &range)
            .with_context(|| format!("cleaning {}", input_path.display()))?;
        info!(
            kept = cleaned.num_rows(),
            dropped = df.num_rows() - cleaned.num_rows(),
            "cleaned dataset"
        );

        info!("Save clean csv {}", output_artifact);
        process::write_csv(&cleaned, &staged)
    })
    .await??;

    info!("Save clean csv artifact");
    let mut artifact = NewArtifact::new(
        &args.output_artifact,
        &args.output_type,
        &args.output_description,
    );
    artifact.add_file(&output_path);
    let manifest = store.log_artifact(&artifact, ctx.run_id()).await?;
    ctx.record(&manifest.qualified_name(), RunEvent::LoggedArtifact)?;

    fs::remove_file(&output_path)
        .await
        .with_context(|| format!("removing staged file {}", output_path.display()))?;

    Ok(manifest)
}
