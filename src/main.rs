use anyhow::Result;
use basic_cleaning::{
    artifact::ArtifactStore,
    cli::Args,
    pipeline,
    run::{Outcome, RunContext},
};
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info, warn, Instrument};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_target(false)
        .init();

    // ─── 2) parse args ───────────────────────────────────────────────
    let args = Args::parse();

    // ─── 3) run, translating any failure into a non-zero exit ────────
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let store = ArtifactStore::from_location(&args.artifact_store, &args.artifact_cache)?;
    let ctx = RunContext::init(&args.run_dir, pipeline::JOB_TYPE)?;

    let result = pipeline::go(&ctx, &store, &args.job)
        .instrument(ctx.span())
        .await;

    let outcome = match &result {
        Ok(_) => Outcome::Success,
        Err(_) => Outcome::Failure,
    };
    if let Err(e) = ctx.finish(outcome) {
        warn!("could not close run: {:#}", e);
    }

    let manifest = result?;
    info!(
        artifact = %manifest.qualified_name(),
        files = manifest.files.len(),
        "all done"
    );
    Ok(())
}
