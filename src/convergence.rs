#[cfg(feature = "json_export")]
use json::{object, JsonValue};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Default file name of the DOF convergence graph
pub const DOF_LOG_NAME: &str = "conv_dof_est.dat";
/// Default file name of the timing convergence graph
pub const CPU_LOG_NAME: &str = "conv_cpu_est.dat";

/// One completed adaptivity iteration
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based iteration number
    pub iteration: usize,
    /// Total DOFs of the working spaces
    pub ndof_coarse: usize,
    /// Total DOFs of the reference spaces
    pub ndof_reference: usize,
    /// Combined relative error estimate (%)
    pub error_percent: f64,
    /// Accumulated computation time (seconds)
    pub cpu_seconds: f64,
}

impl IterationRecord {
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "iteration": self.iteration,
            "ndof_coarse": self.ndof_coarse,
            "ndof_reference": self.ndof_reference,
            "error_percent": self.error_percent,
            "cpu_seconds": self.cpu_seconds,
        }
    }
}

/// Rows of the convergence graph, in iteration order
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceHistory {
    records: Vec<IterationRecord>,
}

impl ConvergenceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: IterationRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IterationRecord> + '_ {
        self.records.iter()
    }

    /// `(ndof, error %)` pairs
    pub fn dof_graph(&self) -> Vec<(usize, f64)> {
        self.records.iter().map(|r| (r.ndof_coarse, r.error_percent)).collect()
    }

    /// `(seconds, error %)` pairs
    pub fn cpu_graph(&self) -> Vec<(f64, f64)> {
        self.records.iter().map(|r| (r.cpu_seconds, r.error_percent)).collect()
    }

    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        JsonValue::from(self.records.iter().map(|r| r.to_json()).collect::<Vec<_>>())
    }

    /// Print the history to a JSON file specified by path.
    #[cfg(feature = "json_export")]
    pub fn export_to_json(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let f = File::create(path.as_ref())?;
        let mut w = BufWriter::new(&f);

        object! { "iterations": self.to_json() }.write_pretty(&mut w, 4)?;

        Ok(())
    }
}

/// Plain-text convergence graphs, one `x y` row per completed iteration
///
/// Rows are appended as soon as an iteration completes, so a run which aborts keeps the rows of its earlier iterations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConvergenceLog {
    dof_path: PathBuf,
    cpu_path: PathBuf,
}

impl ConvergenceLog {
    /// Create (or truncate) `conv_dof_est.dat` and `conv_cpu_est.dat` in `dir`
    pub fn create(dir: impl AsRef<Path>) -> io::Result<Self> {
        Self::with_paths(dir.as_ref().join(DOF_LOG_NAME), dir.as_ref().join(CPU_LOG_NAME))
    }

    /// Create (or truncate) the two graph files at the given paths
    pub fn with_paths(dof_path: impl Into<PathBuf>, cpu_path: impl Into<PathBuf>) -> io::Result<Self> {
        let log = Self {
            dof_path: dof_path.into(),
            cpu_path: cpu_path.into(),
        };
        File::create(&log.dof_path)?;
        File::create(&log.cpu_path)?;
        Ok(log)
    }

    pub fn dof_path(&self) -> &Path {
        &self.dof_path
    }

    pub fn cpu_path(&self) -> &Path {
        &self.cpu_path
    }

    pub fn append(&self, record: &IterationRecord) -> io::Result<()> {
        append_row(&self.dof_path, record.ndof_coarse as f64, record.error_percent)?;
        append_row(&self.cpu_path, record.cpu_seconds, record.error_percent)
    }
}

fn append_row(path: &Path, x: f64, y: f64) -> io::Result<()> {
    let f = OpenOptions::new().append(true).create(true).open(path)?;
    let mut w = BufWriter::new(f);
    writeln!(w, "{} {}", x, y)?;
    w.flush()
}

/// Accumulates the time spent in computation steps
///
/// [tick](Self::tick) adds the time since the previous call; [skip](Self::skip) discards it (used around observers).
#[derive(Clone, Copy, Debug)]
pub struct CpuClock {
    accumulated: Duration,
    last: Instant,
}

impl CpuClock {
    pub fn start() -> Self {
        Self {
            accumulated: Duration::ZERO,
            last: Instant::now(),
        }
    }

    pub fn tick(&mut self) {
        let now = Instant::now();
        self.accumulated += now - self.last;
        self.last = now;
    }

    pub fn skip(&mut self) {
        self.last = Instant::now();
    }

    /// Accumulated seconds as of the last tick
    pub fn seconds(&self) -> f64 {
        self.accumulated.as_secs_f64()
    }
}

impl Default for CpuClock {
    fn default() -> Self {
        Self::start()
    }
}
