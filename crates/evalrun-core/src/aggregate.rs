//! Result tables and per-metric aggregation of timing samples.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{MetricKind, MetricSample, Study, NANOS_PER_SEC};

/// A study's results laid out as `rows x columns`.
///
/// Cells start as NaN and stay NaN for runs that never completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    /// Column axis values (outer axis).
    pub columns: Vec<u64>,
    /// Row axis values, or `None` for a single unnamed row.
    pub rows: Option<Vec<u64>>,
    /// Row-major cell values.
    pub cells: Vec<f64>,
}

impl ResultTable {
    /// Empty table shaped like `study`'s grid.
    pub fn for_study(study: &Study) -> Self {
        let columns = study.columns.values.clone();
        let rows = study.rows.as_ref().map(|axis| axis.values.clone());
        let len = study.row_count() * columns.len();
        Self {
            columns,
            rows,
            cells: vec![f64::NAN; len],
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.as_ref().map_or(1, Vec::len)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn index(&self, row: usize, column: usize) -> Option<usize> {
        (row < self.row_count() && column < self.column_count())
            .then(|| row * self.column_count() + column)
    }

    /// Store a value. Returns false if the cell is out of range.
    pub fn set(&mut self, row: usize, column: usize, value: f64) -> bool {
        match self.index(row, column) {
            Some(i) => {
                self.cells[i] = value;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, row: usize, column: usize) -> Option<f64> {
        self.index(row, column).map(|i| self.cells[i])
    }

    /// Labels of the rows; a single-axis table has the one label `0`.
    pub fn row_labels(&self) -> Vec<String> {
        match &self.rows {
            Some(rows) => rows.iter().map(u64::to_string).collect(),
            None => vec!["0".to_string()],
        }
    }

    /// Cells of row `row`, in column order.
    pub fn row(&self, row: usize) -> &[f64] {
        let width = self.column_count();
        let start = (row * width).min(self.cells.len());
        let end = (start + width).min(self.cells.len());
        &self.cells[start..end]
    }
}

/// Where a completed run's results go in its study's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunCell {
    pub row: usize,
    pub column: usize,
    /// Ordinal the run's samples were stamped with.
    pub ordinal: u64,
}

/// Mean of `values_ns` after dropping the first `warmup` values, in seconds.
///
/// NaN if nothing is left after the warm-up.
pub fn mean_after_warmup(values_ns: &[u64], warmup: usize) -> f64 {
    let measured = values_ns.get(warmup..).unwrap_or_default();
    if measured.is_empty() {
        return f64::NAN;
    }
    let total: f64 = measured.iter().map(|&v| v as f64).sum();
    total / measured.len() as f64 / NANOS_PER_SEC
}

/// Build the table for one metric kind.
///
/// Samples are grouped by run ordinal in arrival order; each run's first
/// `warmup` samples belong to the warm-up probes and are discarded.
pub fn aggregate_metric(
    study: &Study,
    runs: &[RunCell],
    samples: &[MetricSample],
    kind: &MetricKind,
    warmup: usize,
) -> ResultTable {
    let mut by_run: HashMap<u64, Vec<u64>> = HashMap::new();
    for sample in samples.iter().filter(|s| &s.kind == kind) {
        by_run.entry(sample.run).or_default().push(sample.value_ns);
    }

    let mut table = ResultTable::for_study(study);
    for cell in runs {
        let values = by_run.get(&cell.ordinal).map_or(&[][..], Vec::as_slice);
        table.set(cell.row, cell.column, mean_after_warmup(values, warmup));
    }
    table
}
