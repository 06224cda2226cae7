//! CSV export of run results and study tables.

use std::fs::{self, File};
use std::path::PathBuf;

use csv::Writer;
use evalrun_core::{ExperimentResult, ResultTable};
use tracing::{debug, info};

use crate::error::HarnessError;

/// Name of the session-wide per-run log.
pub const RUNS_FILE: &str = "runs.csv";

/// Writes result files into the work directory.
pub struct Exporter {
    dir: PathBuf,
    runs: Writer<File>,
    runs_written: usize,
}

impl Exporter {
    /// Create the work directory if needed and start a fresh `runs.csv`.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, HarnessError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut runs = Writer::from_path(dir.join(RUNS_FILE))?;
        runs.write_record(["name", "mean_secs", "success"])?;
        runs.flush()?;

        Ok(Self {
            dir,
            runs,
            runs_written: 0,
        })
    }

    /// Number of runs appended so far.
    pub fn runs_written(&self) -> usize {
        self.runs_written
    }

    /// Append one completed run and flush, so an interrupt never loses it.
    pub fn append_run(&mut self, result: &ExperimentResult) -> Result<(), HarnessError> {
        self.runs.write_record([
            result.name.clone(),
            result.mean_secs.to_string(),
            result.success.to_string(),
        ])?;
        self.runs.flush()?;
        self.runs_written += 1;
        debug!(run = %result.name, "Run appended to {}", RUNS_FILE);
        Ok(())
    }

    /// Write `table` to `{stem}.csv` and return the path.
    ///
    /// Layout: a header of an empty cell followed by the column values, then
    /// one line per row starting with its label. Missing cells are empty.
    pub fn write_table(&self, stem: &str, table: &ResultTable) -> Result<PathBuf, HarnessError> {
        let path = self.dir.join(format!("{}.csv", stem));
        let mut wtr = Writer::from_path(&path)?;

        let header = std::iter::once(String::new())
            .chain(table.columns.iter().map(u64::to_string));
        wtr.write_record(header)?;

        for (index, label) in table.row_labels().into_iter().enumerate() {
            let cells = table.row(index).iter().map(|&v| format_cell(v));
            wtr.write_record(std::iter::once(label).chain(cells))?;
        }
        wtr.flush()?;

        info!(path = %path.display(), "Table exported");
        Ok(path)
    }
}

fn format_cell(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}
