//! Local persisted state: accommodations and the app snapshot.
//!
//! State lives as one JSON document per key under the configured data
//! directory. Loading falls back to defaults when a document is absent or
//! unreadable; saving is best effort and never fails the caller.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{NovaError, Result};
use crate::history::HistoryEntry;
use crate::session::ExamSession;

/// Key of the accommodation flags document.
pub const SETTINGS_KEY: &str = "settings";

/// Key of the app snapshot document.
pub const SNAPSHOT_KEY: &str = "snapshot";

// ============================================================================
// File Store
// ============================================================================

/// Flat key-value store backed by `<dir>/<key>.json` files.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the documents.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Reads a document.
    ///
    /// Returns `Ok(None)` when the document does not exist.
    ///
    /// # Errors
    ///
    /// Returns `NovaError::StoreCorrupted` if the document cannot be read or
    /// does not deserialize as `T`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(NovaError::store_corrupted(path, e.to_string())),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| NovaError::store_corrupted(path, e.to_string()))
    }

    /// Reads a document, falling back to `T::default()` when it is absent
    /// or corrupt. Corruption is logged.
    pub fn load_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.load(key) {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(e) => {
                warn!(key, error = %e, "Ignoring unreadable stored state");
                T::default()
            }
        }
    }

    /// Writes a document, replacing any previous version.
    ///
    /// The document is written to a sibling temporary file and renamed into
    /// place so a reader never sees a half-written file.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), "Saved state");
        Ok(())
    }

    /// Writes a document, logging instead of failing.
    pub fn save_best_effort<T: Serialize>(&self, key: &str, value: &T) {
        if let Err(e) = self.save(key, value) {
            warn!(key, error = %e, "Failed to save state");
        }
    }

    /// Deletes a document if present.
    pub fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Accommodations
// ============================================================================

/// Accessibility and timing adjustments chosen by the learner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accommodations {
    /// Larger rendering of question text.
    #[serde(default)]
    pub large_text: bool,
    /// High-contrast rendering.
    #[serde(default)]
    pub high_contrast: bool,
    /// Dyslexia-friendly font.
    #[serde(default)]
    pub dyslexia_font: bool,
    /// Multiply timed budgets by the configured factor.
    #[serde(default)]
    pub extended_time: bool,
}

/// One accommodation flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Accommodation {
    /// See [`Accommodations::large_text`].
    LargeText,
    /// See [`Accommodations::high_contrast`].
    HighContrast,
    /// See [`Accommodations::dyslexia_font`].
    DyslexiaFont,
    /// See [`Accommodations::extended_time`].
    ExtendedTime,
}

impl Accommodation {
    /// Every flag, in display order.
    pub const ALL: [Self; 4] = [
        Self::LargeText,
        Self::HighContrast,
        Self::DyslexiaFont,
        Self::ExtendedTime,
    ];

    /// Kebab-case name used on the command line.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LargeText => "large-text",
            Self::HighContrast => "high-contrast",
            Self::DyslexiaFont => "dyslexia-font",
            Self::ExtendedTime => "extended-time",
        }
    }
}

impl std::fmt::Display for Accommodation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Accommodation {
    type Err = NovaError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == normalized)
            .ok_or_else(|| {
                NovaError::validation(
                    format!("unknown accommodation '{s}'"),
                    "Use one of: large-text, high-contrast, dyslexia-font, extended-time",
                )
            })
    }
}

impl Accommodations {
    /// Reads one flag.
    #[must_use]
    pub const fn get(&self, which: Accommodation) -> bool {
        match which {
            Accommodation::LargeText => self.large_text,
            Accommodation::HighContrast => self.high_contrast,
            Accommodation::DyslexiaFont => self.dyslexia_font,
            Accommodation::ExtendedTime => self.extended_time,
        }
    }

    /// Flips one flag and returns its new value.
    pub fn toggle(&mut self, which: Accommodation) -> bool {
        let flag = match which {
            Accommodation::LargeText => &mut self.large_text,
            Accommodation::HighContrast => &mut self.high_contrast,
            Accommodation::DyslexiaFont => &mut self.dyslexia_font,
            Accommodation::ExtendedTime => &mut self.extended_time,
        };
        *flag = !*flag;
        *flag
    }
}

/// Loads accommodations at startup and saves them on every change.
#[derive(Debug, Clone)]
pub struct SettingsManager {
    store: FileStore,
    current: Accommodations,
}

impl SettingsManager {
    /// Loads the stored flags, or defaults when absent or corrupt.
    pub fn load(store: FileStore) -> Self {
        let current = store.load_or_default(SETTINGS_KEY);
        Self { store, current }
    }

    /// Current flags.
    #[must_use]
    pub const fn current(&self) -> Accommodations {
        self.current
    }

    /// Flips one flag, saves, and returns the new value.
    pub fn toggle(&mut self, which: Accommodation) -> bool {
        let value = self.current.toggle(which);
        self.store.save_best_effort(SETTINGS_KEY, &self.current);
        value
    }
}

// ============================================================================
// App Snapshot
// ============================================================================

/// Screen the learner was on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    /// Landing screen.
    #[default]
    Home,
    /// Choosing subject, topic, length and mode.
    ExamSetup,
    /// Answering questions.
    ExamTaking,
    /// Looking at a grading report.
    ExamResults,
    /// Reviewing a past attempt.
    ExamReview,
    /// Browsing history.
    ExamHistory,
    /// Accommodation settings.
    Settings,
}

/// Everything restored on the next start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSnapshot {
    /// Current screen.
    #[serde(default)]
    pub view: View,
    /// In-progress session, if any.
    #[serde(default)]
    pub session: Option<ExamSession>,
    /// Graded sessions, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl AppSnapshot {
    /// Loads the snapshot, normalizing any restored session.
    pub fn load(store: &FileStore) -> Self {
        let mut snapshot: Self = store.load_or_default(SNAPSHOT_KEY);
        snapshot.session = snapshot
            .session
            .map(ExamSession::restored)
            .filter(|s| !s.status().is_terminal());
        snapshot
    }

    /// Saves the snapshot, best effort.
    pub fn save(&self, store: &FileStore) {
        store.save_best_effort(SNAPSHOT_KEY, self);
    }
}
