// src/run/mod.rs
//! Per-process run context: identity, recorded config, event history and the tracing span
//! the pipeline runs under. Created once in `main`, passed by reference, finished at exit.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, info_span, Span};

pub mod event;
pub mod history;

pub use event::RunEvent;
pub use history::{History, HistoryRecord};

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

pub struct RunContext {
    run_id: String,
    job_type: String,
    run_dir: PathBuf,
    started_at: DateTime<Utc>,
    history: History,
    span: Span,
}

impl RunContext {
    /// Start a new run under `run_root/<run_id>` and record `Started`.
    pub fn init(run_root: impl AsRef<Path>, job_type: &str) -> Result<Self> {
        let started_at = Utc::now();
        let run_id = format!(
            "{}-{}-{}",
            job_type,
            started_at.format("%Y%m%dT%H%M%S%.6f"),
            std::process::id()
        );
        let run_dir = run_root.as_ref().join(&run_id);
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("creating run directory {}", run_dir.display()))?;

        let history = History::new(run_dir.join("history"))?;
        history.record(&run_id, RunEvent::Started)?;

        let span = info_span!("run", run_id = %run_id, job_type = %job_type);
        info!(run_id = %run_id, dir = %run_dir.display(), "run started");

        Ok(Self {
            run_id,
            job_type: job_type.to_string(),
            run_dir,
            started_at,
            history,
            span,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn dir(&self) -> &Path {
        &self.run_dir
    }

    /// Span to instrument the run's work with.
    pub fn span(&self) -> Span {
        self.span.clone()
    }

    /// Where the pipeline stages a file before handing it to the artifact store.
    pub fn staging_path(&self, file_name: &str) -> PathBuf {
        self.run_dir.join(file_name)
    }

    /// Persist the run configuration as `config.yaml`; later calls overwrite earlier ones.
    pub fn update_config<T: Serialize>(&self, config: &T) -> Result<()> {
        let yaml = serde_yaml::to_string(config).context("serializing run config")?;
        let path = self.run_dir.join("config.yaml");
        fs::write(&path, yaml).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn record(&self, subject: &str, event: RunEvent) -> Result<HistoryRecord> {
        self.history.record(subject, event)
    }

    pub fn events(&self) -> Result<Vec<HistoryRecord>> {
        self.history.load()
    }

    /// Close the run, recording how it ended.
    pub fn finish(self, outcome: Outcome) -> Result<()> {
        let event = match outcome {
            Outcome::Success => RunEvent::Finished,
            Outcome::Failure => RunEvent::Failed,
        };
        self.history.record(&self.run_id, event)?;
        let elapsed = Utc::now() - self.started_at;
        info!(
            run_id = %self.run_id,
            outcome = ?outcome,
            elapsed_ms = elapsed.num_milliseconds(),
            "run finished"
        );
        Ok(())
    }
}
