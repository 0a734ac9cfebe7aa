use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "A very basic data cleaning")]
pub struct Args {
    #[command(flatten)]
    pub job: CleaningArgs,

    /// Artifact store: a directory or an http(s) base URL
    #[arg(long, env = "ARTIFACT_STORE", default_value = "artifacts", hide = true)]
    pub artifact_store: String,

    /// Where artifacts fetched from a remote store are cached
    #[arg(long, env = "ARTIFACT_CACHE", default_value = ".artifact_cache", hide = true)]
    pub artifact_cache: PathBuf,

    /// Directory holding one sub-directory per run
    #[arg(long, env = "RUN_DIR", default_value = "runs", hide = true)]
    pub run_dir: PathBuf,
}

/// The job parameters; also what gets recorded as the run config.
#[derive(clap::Args, Debug, Clone, Serialize)]
pub struct CleaningArgs {
    /// Name for input artifact
    #[arg(long, alias = "input_artifact")]
    pub input_artifact: String,

    /// Output artifact name
    #[arg(long, alias = "output_artifact")]
    pub output_artifact: String,

    /// Type for output artifact
    #[arg(long, alias = "output_type")]
    pub output_type: String,

    /// Output artifact description
    #[arg(long, alias = "output_description")]
    pub output_description: String,

    /// Min price value, inclusive
    #[arg(long, alias = "min_price", allow_negative_numbers = true)]
    pub min_price: f64,

    /// Max price value, inclusive
    #[arg(long, alias = "max_price", allow_negative_numbers = true)]
    pub max_price: f64,
}
