//! Merges a project's rows into the text that gets embedded.

use serde::{Deserialize, Serialize};

use crate::records::{ProjectRecord, ProjectTable};

/// Separator between fields and between records.
pub const DEFAULT_SEPARATOR: &str = ". ";

/// The text attributed to one project for this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    /// Project id.
    pub project_id: String,

    /// Combined text. Empty when there is nothing to embed.
    pub text: String,

    /// Number of input rows for this project.
    pub source_record_count: usize,
}

impl ProjectContext {
    /// Whether there is nothing to embed.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Builds [`ProjectContext`]s from the input table.
///
/// A lone row only counts when it has both a title and a summary. Several
/// rows for the same id are folded together in input order so later
/// descriptions extend earlier ones instead of replacing them; a row
/// missing one field still contributes the other.
#[derive(Debug, Clone)]
pub struct TextCombiner {
    separator: String,
}

impl Default for TextCombiner {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }
}

impl TextCombiner {
    /// Create a combiner with the default separator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the separator.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Combine the rows of one project.
    pub fn combine(&self, table: &ProjectTable, project_id: &str) -> ProjectContext {
        let records: Vec<&ProjectRecord> = table.records_for(project_id).collect();

        let text = match records.as_slice() {
            [] => String::new(),
            [single] => match (&single.title, &single.summary) {
                (Some(title), Some(summary)) => self.join([title.as_str(), summary.as_str()]),
                _ => String::new(),
            },
            many => {
                let mut seen: Vec<(Option<&str>, Option<&str>)> = Vec::new();
                let mut fragments = Vec::new();
                for record in many {
                    let pair = (record.title.as_deref(), record.summary.as_deref());
                    if seen.contains(&pair) {
                        continue;
                    }
                    seen.push(pair);
                    fragments.extend(pair.0);
                    fragments.extend(pair.1);
                }
                self.join(fragments)
            }
        };

        ProjectContext {
            project_id: project_id.to_string(),
            text,
            source_record_count: records.len(),
        }
    }

    /// Combine every project in the table, in order of first appearance.
    pub fn combine_all(&self, table: &ProjectTable) -> Vec<ProjectContext> {
        table
            .project_ids()
            .into_iter()
            .map(|id| self.combine(table, id))
            .collect()
    }

    fn join<'a>(&self, fragments: impl IntoIterator<Item = &'a str>) -> String {
        let pieces: Vec<&str> = fragments
            .into_iter()
            .map(|f| f.trim().trim_end_matches('.').trim_end())
            .filter(|f| !f.is_empty())
            .collect();
        pieces.join(&self.separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table(records: Vec<ProjectRecord>) -> ProjectTable {
        ProjectTable::from_records(records)
    }

    #[test]
    fn test_single_record_with_both_fields() {
        let t = table(vec![
            ProjectRecord::new("P1")
                .with_title("Solar microgrid")
                .with_summary("Off-grid power for two villages."),
        ]);

        let context = TextCombiner::new().combine(&t, "P1");
        assert_eq!(context.text, "Solar microgrid. Off-grid power for two villages");
        assert_eq!(context.source_record_count, 1);
    }

    #[test]
    fn test_single_record_missing_a_field_is_empty() {
        let t = table(vec![
            ProjectRecord::new("P1").with_title("Title only"),
            ProjectRecord::new("P2").with_summary("Summary only"),
        ]);
        let combiner = TextCombiner::new();

        assert!(combiner.combine(&t, "P1").is_empty());
        assert!(combiner.combine(&t, "P2").is_empty());
    }

    #[test]
    fn test_multiple_records_fold_fragments() {
        let t = table(vec![
            ProjectRecord::new("P7").with_title("Clean water"),
            ProjectRecord::new("P8")
                .with_title("Other")
                .with_summary("Unrelated"),
            ProjectRecord::new("P7").with_summary("Filters for schools"),
        ]);

        let context = TextCombiner::new().combine(&t, "P7");
        assert_eq!(context.text, "Clean water. Filters for schools");
        assert_eq!(context.source_record_count, 2);
    }

    #[test]
    fn test_duplicate_rows_are_folded_once() {
        let t = table(vec![
            ProjectRecord::new("P1").with_title("A").with_summary("First"),
            ProjectRecord::new("P1").with_title("A").with_summary("First"),
            ProjectRecord::new("P1").with_title("A").with_summary("Second"),
        ]);

        let context = TextCombiner::new().combine(&t, "P1");
        assert_eq!(context.text, "A. First. A. Second");
        assert_eq!(context.source_record_count, 3);
    }

    #[test]
    fn test_unknown_project_is_empty() {
        let context = TextCombiner::new().combine(&ProjectTable::default(), "missing");
        assert!(context.is_empty());
        assert_eq!(context.source_record_count, 0);
    }

    #[test]
    fn test_combine_all_follows_first_appearance() {
        let t = table(vec![
            ProjectRecord::new("B").with_title("b").with_summary("bb"),
            ProjectRecord::new("A").with_title("a").with_summary("aa"),
            ProjectRecord::new("B").with_summary("more"),
        ]);

        let ids: Vec<String> = TextCombiner::new()
            .combine_all(&t)
            .into_iter()
            .map(|c| c.project_id)
            .collect();
        assert_eq!(ids, vec!["B", "A"]);
    }

    #[test]
    fn test_custom_separator() {
        let t = table(vec![ProjectRecord::new("P1").with_title("a").with_summary("b")]);
        let context = TextCombiner::new().with_separator(" | ").combine(&t, "P1");
        assert_eq!(context.text, "a | b");
    }
}
