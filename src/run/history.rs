use super::event::RunEvent;
use anyhow::{Context, Result};
use arrow::{
    array::{Array, StringArray, TimestampMicrosecondArray},
    datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit},
    record_batch::RecordBatch,
};
use chrono::{DateTime, TimeZone, Utc};
use glob::glob;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::{
    fs::{self, File},
    io::BufWriter,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing::warn;

/// One row of run history.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryRecord {
    pub subject: String,
    pub event: RunEvent,
    pub event_time: DateTime<Utc>,
}

/// Run history kept as one tiny Parquet file per event:
/// `<safe_subject>---<Event>---<ts_micros>.parquet`.
pub struct History {
    history_dir: PathBuf,
    /// Last timestamp handed out, so events from one process sort in call order.
    last_ts: Mutex<i64>,
}

fn history_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("subject", DataType::Utf8, false),
        Field::new("event", DataType::Utf8, false),
        Field::new(
            "event_time",
            DataType::Timestamp(TimeUnit::Microsecond, None),
            false,
        ),
    ]))
}

/// Keep filenames portable; the full subject is stored inside the file.
fn safe_name(subject: &str) -> String {
    subject
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect()
}

impl History {
    /// Open (creating if needed) the history directory.
    pub fn new(history_dir: impl Into<PathBuf>) -> Result<Self> {
        let history_dir = history_dir.into();
        fs::create_dir_all(&history_dir)
            .with_context(|| format!("creating history directory {:?}", &history_dir))?;
        Ok(Self {
            history_dir,
            last_ts: Mutex::new(0),
        })
    }

    fn next_ts(&self) -> i64 {
        let mut last = self.last_ts.lock().unwrap_or_else(|e| e.into_inner());
        let ts = Utc::now().timestamp_micros().max(*last + 1);
        *last = ts;
        ts
    }

    /// Record `event` for `subject`. Written to a `.tmp` file first, then renamed.
    pub fn record(&self, subject: &str, event: RunEvent) -> Result<HistoryRecord> {
        let safe = safe_name(subject);
        let mut ts_micros = self.next_ts();
        let mut final_path;
        loop {
            final_path = self.history_dir.join(format!(
                "{}---{}---{}.parquet",
                safe,
                event.as_str(),
                ts_micros
            ));
            if !final_path.exists() {
                break;
            }
            ts_micros += 1;
        }
        let tmp_path = final_path.with_extension("parquet.tmp");

        let schema = history_schema();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![subject.to_string()])),
                Arc::new(StringArray::from(vec![event.as_str().to_string()])),
                Arc::new(TimestampMicrosecondArray::from(vec![ts_micros])),
            ],
        )
        .context("building history record batch")?;

        let tmp_file = File::create(&tmp_path)
            .with_context(|| format!("could not create temporary file `{}`", tmp_path.display()))?;
        let mut writer = ArrowWriter::try_new(BufWriter::new(tmp_file), schema, None)
            .context("creating Arrow writer for history")?;
        writer.write(&batch).context("writing history batch")?;
        writer.close().context("closing history writer")?;

        fs::rename(&tmp_path, &final_path).with_context(|| {
            format!(
                "failed to rename `{}` to `{}`",
                tmp_path.display(),
                final_path.display()
            )
        })?;

        Ok(HistoryRecord {
            subject: subject.to_string(),
            event,
            event_time: micros_to_utc(ts_micros)?,
        })
    }

    /// Load every recorded event, oldest first.
    pub fn load(&self) -> Result<Vec<HistoryRecord>> {
        let pattern = format!("{}/*.parquet", self.history_dir.display());
        let mut records = Vec::new();

        for entry in glob(&pattern).context("invalid glob pattern for history")? {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "cannot read history entry");
                    continue;
                }
            };
            let file =
                File::open(&path).with_context(|| format!("failed to open `{}`", path.display()))?;
            let reader = ParquetRecordBatchReaderBuilder::try_new(file)
                .with_context(|| format!("failed to read `{}`", path.display()))?
                .build()?;

            for batch in reader {
                let batch = batch?;
                records.extend(batch_records(&batch)?);
            }
        }

        records.sort_by_key(|r| r.event_time);
        Ok(records)
    }

    /// Distinct subjects that saw `event`.
    pub fn subjects_with(&self, event: RunEvent) -> Result<Vec<String>> {
        let mut subjects: Vec<String> = Vec::new();
        for record in self.load()? {
            if record.event == event && !subjects.contains(&record.subject) {
                subjects.push(record.subject);
            }
        }
        Ok(subjects)
    }
}

fn micros_to_utc(ts_micros: i64) -> Result<DateTime<Utc>> {
    let seconds = ts_micros.div_euclid(1_000_000);
    let nanos = (ts_micros.rem_euclid(1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(seconds, nanos)
        .single()
        .with_context(|| format!("invalid history timestamp {}", ts_micros))
}

fn batch_records(batch: &RecordBatch) -> Result<Vec<HistoryRecord>> {
    let column = |name: &str| {
        batch
            .column_by_name(name)
            .with_context(|| format!("history file lacks `{}` column", name))
    };
    let subjects = column("subject")?
        .as_any()
        .downcast_ref::<StringArray>()
        .context("history `subject` is not text")?;
    let events = column("event")?
        .as_any()
        .downcast_ref::<StringArray>()
        .context("history `event` is not text")?;
    let times = column("event_time")?
        .as_any()
        .downcast_ref::<TimestampMicrosecondArray>()
        .context("history `event_time` is not a timestamp")?;

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        if subjects.is_null(i) || events.is_null(i) || times.is_null(i) {
            continue;
        }
        let Some(event) = RunEvent::from_str(events.value(i)) else {
            continue;
        };
        out.push(HistoryRecord {
            subject: subjects.value(i).to_string(),
            event,
            event_time: micros_to_utc(times.value(i))?,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn records_round_trip_in_time_order() -> Result<()> {
        let dir = tempdir()?;
        let history = History::new(dir.path().join("history"))?;

        history.record("run-1", RunEvent::Started)?;
        history.record("sample.csv:v0", RunEvent::UsedArtifact)?;
        history.record("clean_sample.csv:v0", RunEvent::LoggedArtifact)?;

        let records = history.load()?;
        let events: Vec<RunEvent> = records.iter().map(|r| r.event).collect();
        assert_eq!(
            events,
            vec![
                RunEvent::Started,
                RunEvent::UsedArtifact,
                RunEvent::LoggedArtifact
            ]
        );
        assert_eq!(records[1].subject, "sample.csv:v0");
        assert_eq!(
            history.subjects_with(RunEvent::LoggedArtifact)?,
            vec!["clean_sample.csv:v0".to_string()]
        );
        Ok(())
    }

    #[test]
    fn same_subject_and_event_do_not_overwrite() -> Result<()> {
        let dir = tempdir()?;
        let history = History::new(dir.path())?;
        for _ in 0..5 {
            history.record("x", RunEvent::UsedArtifact)?;
        }
        assert_eq!(history.load()?.len(), 5);
        Ok(())
    }

    #[test]
    fn subject_is_sanitized_for_filenames() {
        assert_eq!(safe_name("team/sample.csv:v3"), "team_sample.csv_v3");
    }
}
