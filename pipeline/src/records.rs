//! Input project records.
//!
//! Raw rows are interpreted exactly once, here: every cell becomes either a
//! present, non-blank string or `None`. Nothing downstream re-checks cells.

use std::io::BufRead;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// Column holding the project identifier.
pub const PROJECT_ID_COLUMN: &str = "project_id";
/// Column used when `project_id` is absent.
pub const GENERATED_ID_COLUMN: &str = "generated_id";
/// Column holding the project title.
pub const TITLE_COLUMN: &str = "title";
/// Column holding the project summary.
pub const SUMMARY_COLUMN: &str = "summary";

/// One input row, with its identifier resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Resolved, non-empty project identifier.
    pub project_id: String,

    /// Project title.
    pub title: Option<String>,

    /// Project summary.
    pub summary: Option<String>,
}

impl ProjectRecord {
    /// Create a record with no text fields.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            title: None,
            summary: None,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Build a record from a raw row.
    ///
    /// The identifier is `project_id` when present, `generated_id` otherwise.
    pub fn from_row(row_index: usize, row: &Value) -> Result<Self> {
        let Some(fields) = row.as_object() else {
            return Err(PipelineError::MalformedRow { row: row_index });
        };

        let project_id = cell_text(fields.get(PROJECT_ID_COLUMN))
            .or_else(|| cell_text(fields.get(GENERATED_ID_COLUMN)))
            .ok_or(PipelineError::MissingIdentifier { row: row_index })?;

        Ok(Self {
            project_id,
            title: cell_text(fields.get(TITLE_COLUMN)),
            summary: cell_text(fields.get(SUMMARY_COLUMN)),
        })
    }

    /// Apply the cell rules to a record built in code.
    fn resolved(self, row_index: usize) -> Result<Self> {
        let project_id = text_cell(&self.project_id)
            .ok_or(PipelineError::MissingIdentifier { row: row_index })?;
        Ok(Self {
            project_id,
            title: self.title.as_deref().and_then(text_cell),
            summary: self.summary.as_deref().and_then(text_cell),
        })
    }
}

fn text_cell(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Interpret one cell. Missing, null, blank and `NaN` cells are absent.
fn cell_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => text_cell(s),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                // Ids exported from float columns come through as 123.0.
                let f = n.as_f64()?;
                if f.is_finite() && f.fract() == 0.0 {
                    Some(format!("{f:.0}"))
                } else if f.is_finite() {
                    Some(f.to_string())
                } else {
                    None
                }
            }
        }
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// The loaded input table.
#[derive(Debug, Clone, Default)]
pub struct ProjectTable {
    records: Vec<ProjectRecord>,
    rejected_rows: usize,
}

impl ProjectTable {
    /// Wrap records built in code. Ids and text fields follow the same cell
    /// rules as raw rows; records whose id is blank are skipped and counted.
    pub fn from_records(records: Vec<ProjectRecord>) -> Self {
        Self::collect(
            records
                .into_iter()
                .enumerate()
                .map(|(row_index, record)| record.resolved(row_index)),
        )
    }

    /// Build from raw rows, skipping rows that cannot be resolved.
    pub fn from_rows(rows: impl IntoIterator<Item = Value>) -> Self {
        Self::collect(
            rows.into_iter()
                .enumerate()
                .map(|(row_index, row)| ProjectRecord::from_row(row_index, &row)),
        )
    }

    fn collect(resolved: impl Iterator<Item = Result<ProjectRecord>>) -> Self {
        let mut table = Self::default();
        for record in resolved {
            match record {
                Ok(record) => table.records.push(record),
                Err(e) => {
                    warn!("Skipping input row: {e}");
                    table.rejected_rows += 1;
                }
            }
        }
        debug!(
            "Loaded {} project records ({} rejected)",
            table.records.len(),
            table.rejected_rows
        );
        table
    }

    /// Build from raw rows, failing on the first row that cannot be resolved.
    pub fn try_from_rows(rows: impl IntoIterator<Item = Value>) -> Result<Self> {
        let records = rows
            .into_iter()
            .enumerate()
            .map(|(row_index, row)| ProjectRecord::from_row(row_index, &row))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            records,
            rejected_rows: 0,
        })
    }

    /// Read one JSON object per line. Blank lines are ignored.
    pub fn from_json_lines(reader: impl BufRead) -> Result<Self> {
        let mut rows = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            rows.push(serde_json::from_str::<Value>(&line)?);
        }
        Ok(Self::from_rows(rows))
    }

    /// All records in input order.
    pub fn records(&self) -> &[ProjectRecord] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows dropped because they had no identifier or were not records.
    pub fn rejected_rows(&self) -> usize {
        self.rejected_rows
    }

    /// Records for one project, in input order.
    pub fn records_for<'a>(&'a self, project_id: &'a str) -> impl Iterator<Item = &'a ProjectRecord> {
        self.records
            .iter()
            .filter(move |r| r.project_id == project_id)
    }

    /// Distinct project ids in order of first appearance.
    pub fn project_ids(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.records
            .iter()
            .map(|r| r.project_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }
}
