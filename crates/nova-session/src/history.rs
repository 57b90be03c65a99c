//! Append-only store of graded sessions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{NovaError, Result};
use crate::exam::{Answer, ExamRequestConfig, Question, QuestionId};
use crate::grading::GradingReport;

/// A graded session, frozen at the moment it was graded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Unique, timestamp-derived key.
    pub id: String,
    /// What the learner asked for.
    pub config: ExamRequestConfig,
    /// Title of the generated exam.
    pub exam_title: String,
    /// Questions as generated.
    pub questions: Vec<Question>,
    /// Submitted answers; unanswered questions have no entry.
    pub answers: BTreeMap<QuestionId, Answer>,
    /// The model's grade.
    pub report: GradingReport,
    /// When grading completed.
    pub completed_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Returns the answer given for a question, if any.
    #[must_use]
    pub fn answer_for(&self, id: QuestionId) -> Option<&Answer> {
        self.answers.get(&id)
    }
}

/// Finite iterator over history entries, oldest first. Call
/// [`HistoryStore::list`] again to start over.
pub type HistoryIter<'a> = std::slice::Iter<'a, HistoryEntry>;

/// Ordered, append-only collection of [`HistoryEntry`] values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryStore {
    entries: Vec<HistoryEntry>,
}

impl HistoryStore {
    /// Creates an empty store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Creates a store from previously persisted entries.
    #[must_use]
    pub const fn from_entries(entries: Vec<HistoryEntry>) -> Self {
        Self { entries }
    }

    /// Appends an entry.
    ///
    /// # Errors
    ///
    /// Returns `NovaError::DuplicateHistoryEntry` if an entry with the same
    /// id is already stored; the store is unchanged.
    pub fn append(&mut self, entry: HistoryEntry) -> Result<()> {
        if self.entries.iter().any(|e| e.id == entry.id) {
            return Err(NovaError::DuplicateHistoryEntry { id: entry.id });
        }
        info!(id = %entry.id, subject = %entry.config.subject, "Appended history entry");
        self.entries.push(entry);
        Ok(())
    }

    /// Lists entries oldest first. Reverse the iterator for newest first.
    pub fn list(&self) -> HistoryIter<'_> {
        self.entries.iter()
    }

    /// Looks up an entry by id.
    pub fn get(&self, id: &str) -> Result<&HistoryEntry> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| NovaError::history_not_found(id))
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        info!(removed = self.entries.len(), "Cleared history");
        self.entries.clear();
    }

    /// Returns the entries as a slice, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::exam::tests::mcq;
    use crate::exam::{ExamMode, LengthClass};
    use crate::grading::{QuestionAnalysis, QuestionStatus};

    pub fn entry(id: &str) -> HistoryEntry {
        let mut answers = BTreeMap::new();
        answers.insert(0, Answer::Choice("A".to_string()));
        HistoryEntry {
            id: id.to_string(),
            config: ExamRequestConfig::new(
                "AP Biology",
                "Photosynthesis",
                LengthClass::Quick,
                ExamMode::Timed,
            ),
            exam_title: "AP Biology Quick Check".to_string(),
            questions: vec![mcq(0, "A"), mcq(1, "B")],
            answers,
            report: GradingReport {
                ap_score_estimate: 3,
                raw_score: "1/2".to_string(),
                feedback: "Review the Calvin cycle.".to_string(),
                strengths: vec!["Light reactions".to_string()],
                weaknesses: vec!["Calvin cycle".to_string()],
                per_question_analysis: vec![
                    QuestionAnalysis {
                        question_id: 0,
                        status: QuestionStatus::Correct,
                        note: String::new(),
                    },
                    QuestionAnalysis {
                        question_id: 1,
                        status: QuestionStatus::Incorrect,
                        note: "Unanswered".to_string(),
                    },
                ],
            },
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_append_preserves_order_and_list_restarts() {
        let mut store = HistoryStore::new();
        store.append(entry("a")).unwrap();
        store.append(entry("b")).unwrap();
        store.append(entry("c")).unwrap();

        let ids: Vec<_> = store.list().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);

        let newest_first: Vec<_> = store.list().rev().map(|e| e.id.as_str()).collect();
        assert_eq!(newest_first, ["c", "b", "a"]);

        // A fresh listing starts from the beginning again
        assert_eq!(store.list().count(), 3);
    }

    #[test]
    fn test_append_rejects_duplicate_ids() {
        let mut store = HistoryStore::new();
        tokio_test::assert_ok!(store.append(entry("a")));
        let err = tokio_test::assert_err!(store.append(entry("a")));
        assert!(matches!(err, NovaError::DuplicateHistoryEntry { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_and_not_found() {
        let store = HistoryStore::from_entries(vec![entry("a")]);
        assert_eq!(store.get("a").unwrap().exam_title, "AP Biology Quick Check");
        assert!(matches!(
            store.get("missing"),
            Err(NovaError::HistoryEntryNotFound { .. })
        ));
    }

    #[test]
    fn test_clear_empties_store() {
        let mut store = HistoryStore::from_entries(vec![entry("a"), entry("b")]);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.list().count(), 0);
    }

    #[test]
    fn test_entry_serialization_keeps_answer_keys() {
        let json = serde_json::to_value(entry("a")).unwrap();
        assert_eq!(json["answers"]["0"]["type"], "choice");
        assert_eq!(json["report"]["apScoreEstimate"], 3);

        let restored: HistoryEntry = serde_json::from_value(json).unwrap();
        assert_eq!(restored.answer_for(0), Some(&Answer::Choice("A".to_string())));
        assert_eq!(restored.answer_for(1), None);
    }
}
