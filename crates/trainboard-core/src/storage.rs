//! Storage layer: job snapshots, evaluation-metrics logs and YAML config on disk.
//!
//! Layout under the data directory:
//!
//! ```text
//! <data_dir>/jobs/<source>.json          array of job records
//! <data_dir>/emetrics/<training_id>.jsonl  one metrics record per line
//! ```

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{DashError, Result};
use crate::models::{EMetricsRecord, JobRecord, JobResults};

// ─── Directory helpers ────────────────────────────────────────────────────────

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// File stems in `dir` with the given extension, sorted.
fn list_stems(dir: &Path, ext: &str) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut names = vec![];
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(ext) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|n| n.to_str()) {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Reject names that would escape their directory.
fn checked_name<'a>(name: &'a str, what: fn(String) -> DashError) -> Result<&'a str> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(what(name.to_string()));
    }
    Ok(name)
}

// ─── YAML config I/O ─────────────────────────────────────────────────────────

pub fn save_yaml<T: serde::Serialize>(path: &Path, data: &T) -> Result<()> {
    let content = serde_yaml::to_string(data)?;
    fs::write(path, content)?;
    Ok(())
}

pub fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T>
where
    T: Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path)?;
    let val = serde_yaml::from_str(&content)?;
    Ok(val)
}

// ─── Job snapshots ───────────────────────────────────────────────────────────

/// Job history snapshots, one JSON file per source.
#[derive(Debug, Clone)]
pub struct JobStore {
    dir: PathBuf,
}

impl JobStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("jobs"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn list_sources(&self) -> Result<Vec<String>> {
        list_stems(&self.dir, "json")
    }

    pub fn load_source(&self, source: &str) -> Result<Vec<JobRecord>> {
        let source = checked_name(source, DashError::SourceNotFound)?;
        let path = self.dir.join(format!("{source}.json"));
        if !path.exists() {
            return Err(DashError::SourceNotFound(source.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load the given sources in order; an empty list loads every source.
    pub fn load(&self, sources: &[String]) -> Result<JobResults> {
        let names = if sources.is_empty() {
            self.list_sources()?
        } else {
            sources.to_vec()
        };
        let mut results = JobResults::new();
        for name in names {
            let jobs = self.load_source(&name)?;
            results.insert(name, jobs);
        }
        Ok(results)
    }

    pub fn save_source(&self, source: &str, jobs: &[JobRecord]) -> Result<()> {
        let source = checked_name(source, DashError::SourceNotFound)?;
        ensure_dir(&self.dir)?;
        let content = serde_json::to_string_pretty(jobs)?;
        fs::write(self.dir.join(format!("{source}.json")), content)?;
        Ok(())
    }
}

// ─── Evaluation metrics ──────────────────────────────────────────────────────

/// A paginated provider of evaluation-metrics records for a training.
pub trait MetricsSource: Send + Sync + 'static {
    /// Up to `pagesize` records starting at offset `pos`.
    fn fetch_page(&self, training_id: &str, pos: u64, pagesize: usize)
        -> Result<Vec<EMetricsRecord>>;
}

/// Metrics logs stored as JSON lines, one file per training.
#[derive(Debug, Clone)]
pub struct JsonlMetricsSource {
    dir: PathBuf,
}

impl JsonlMetricsSource {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("emetrics"),
        }
    }

    pub fn list_trainings(&self) -> Result<Vec<String>> {
        list_stems(&self.dir, "jsonl")
    }

    fn path(&self, training_id: &str) -> Result<PathBuf> {
        let id = checked_name(training_id, DashError::TrainingNotFound)?;
        Ok(self.dir.join(format!("{id}.jsonl")))
    }

    /// Valid records of a training's log in file order. Blank and malformed
    /// lines are skipped and take no position.
    fn records(
        &self,
        training_id: &str,
    ) -> Result<impl Iterator<Item = Result<EMetricsRecord>>> {
        let path = self.path(training_id)?;
        if !path.exists() {
            return Err(DashError::TrainingNotFound(training_id.to_string()));
        }
        let training = training_id.to_string();
        let reader = BufReader::new(fs::File::open(&path)?);
        Ok(reader
            .lines()
            .enumerate()
            .filter_map(move |(lineno, line)| {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => return Some(Err(DashError::Io(e))),
                };
                if line.trim().is_empty() {
                    return None;
                }
                match serde_json::from_str::<EMetricsRecord>(&line) {
                    Ok(record) => Some(Ok(record)),
                    Err(e) => {
                        debug!(training = %training, line = lineno + 1, "Skipping malformed metrics record: {e}");
                        None
                    }
                }
            }))
    }

    /// Every record of a training's log, read in one pass.
    pub fn read_all(&self, training_id: &str) -> Result<Vec<EMetricsRecord>> {
        self.records(training_id)?.collect()
    }

    /// Append records to a training's log, creating it if needed.
    pub fn append(&self, training_id: &str, records: &[EMetricsRecord]) -> Result<()> {
        use std::io::Write;
        ensure_dir(&self.dir)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(training_id)?)?;
        for record in records {
            writeln!(file, "{}", serde_json::to_string(record)?)?;
        }
        Ok(())
    }
}

impl MetricsSource for JsonlMetricsSource {
    fn fetch_page(
        &self,
        training_id: &str,
        pos: u64,
        pagesize: usize,
    ) -> Result<Vec<EMetricsRecord>> {
        let records = self.records(training_id)?;
        if pagesize == 0 {
            return Ok(vec![]);
        }
        let skip = usize::try_from(pos).unwrap_or(usize::MAX);
        records.skip(skip).take(pagesize).collect()
    }
}
