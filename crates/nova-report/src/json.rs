//! JSON export of graded sessions.
//!
//! Each exported entry carries its [`ResultsSummary`] next to the full
//! history entry, so consumers get the headline figures without
//! recomputing the tally.
//!
//! # Example
//!
//! ```rust,no_run
//! use nova_report::json::JsonGenerator;
//! use std::path::Path;
//!
//! let entries = Vec::new();
//! let generator = JsonGenerator::all(&entries);
//! generator.write_to_file(Path::new("history.json"), true).unwrap();
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use nova_session::HistoryEntry;
use serde::Serialize;

use crate::{ReportError, ResultsSummary, Result};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportedEntry<'a> {
    summary: ResultsSummary,
    entry: &'a HistoryEntry,
}

impl<'a> ExportedEntry<'a> {
    fn new(entry: &'a HistoryEntry) -> Self {
        Self {
            summary: ResultsSummary::from_entry(entry),
            entry,
        }
    }
}

enum Target<'a> {
    One(&'a HistoryEntry),
    All(&'a [HistoryEntry]),
}

/// JSON export generator for one entry or the whole history.
pub struct JsonGenerator<'a> {
    target: Target<'a>,
}

impl<'a> JsonGenerator<'a> {
    /// Exports a single entry as a JSON object.
    #[must_use]
    pub const fn entry(entry: &'a HistoryEntry) -> Self {
        Self {
            target: Target::One(entry),
        }
    }

    /// Exports every entry as a JSON array, oldest first.
    #[must_use]
    pub const fn all(entries: &'a [HistoryEntry]) -> Self {
        Self {
            target: Target::All(entries),
        }
    }

    fn to_value(&self) -> Result<serde_json::Value> {
        match &self.target {
            Target::One(entry) => serde_json::to_value(ExportedEntry::new(entry)),
            Target::All(entries) => serde_json::to_value(
                entries.iter().map(ExportedEntry::new).collect::<Vec<_>>(),
            ),
        }
        .map_err(ReportError::from)
    }

    /// Generates compact JSON output (single line).
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    pub fn generate(&self) -> Result<String> {
        serde_json::to_string(&self.to_value()?).map_err(ReportError::from)
    }

    /// Generates pretty-printed JSON output with indentation.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    pub fn generate_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.to_value()?).map_err(ReportError::from)
    }

    /// Writes the export to a file, creating or overwriting it. Parent
    /// directories must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    /// Returns [`ReportError::Io`] if file creation or writing fails.
    pub fn write_to_file(&self, path: &Path, pretty: bool) -> Result<()> {
        let json = if pretty {
            self.generate_pretty()?
        } else {
            self.generate()?
        };

        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tests::sample_entry;

    #[test]
    fn test_single_entry_export() {
        let entry = sample_entry();
        let json = JsonGenerator::entry(&entry).generate().unwrap();

        assert!(!json.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["summary"]["apScore"], 3);
        assert_eq!(value["summary"]["mcq"]["correct"], 1);
        assert_eq!(value["entry"]["id"], "18c2f9a1b00");
        assert_eq!(value["entry"]["answers"]["2"]["type"], "parts");
    }

    #[test]
    fn test_all_entries_export_is_array() {
        let entries = vec![sample_entry(), sample_entry()];
        let json = JsonGenerator::all(&entries).generate_pretty().unwrap();

        assert!(json.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);

        let empty = JsonGenerator::all(&[]).generate().unwrap();
        assert_eq!(empty, "[]");
    }

    #[test]
    fn test_write_to_file() {
        let entry = sample_entry();
        let path = std::env::temp_dir().join(format!("nova-export-{}.json", std::process::id()));

        JsonGenerator::entry(&entry).write_to_file(&path, true).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"examTitle\": \"AP Calculus AB Quick Check\""));

        std::fs::remove_file(&path).ok();
    }
}
