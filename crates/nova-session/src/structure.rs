//! Subject structure table and per-attempt blueprints.
//!
//! The table maps an AP subject to its official section composition and
//! time limit. A [`ExamBlueprint`] is the concrete shape of one attempt,
//! derived from the subject's structure and the chosen [`LengthClass`].

use serde::{Deserialize, Serialize};

use crate::exam::{LengthClass, QuestionKind};

/// Minutes allotted per question for quick and diagnostic attempts.
pub const MINUTES_PER_PRACTICE_QUESTION: u32 = 2;

/// Multiple-choice share of a quick attempt.
const QUICK_MCQ: u32 = 7;
/// Free-response share of a quick attempt.
const QUICK_FREE_RESPONSE: u32 = 3;
/// Multiple-choice share of a diagnostic attempt.
const DIAGNOSTIC_MCQ: u32 = 14;
/// Free-response share of a diagnostic attempt.
const DIAGNOSTIC_FREE_RESPONSE: u32 = 6;

/// One section of an exam: how many questions of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Question kind of the section.
    pub kind: QuestionKind,
    /// Number of questions.
    pub count: u32,
    /// Human label, e.g. "Free Response Questions (2 long, 4 short)".
    pub label: String,
}

impl Section {
    /// Creates a section labelled with the kind's default label.
    #[must_use]
    pub fn new(kind: QuestionKind, count: u32) -> Self {
        Self {
            kind,
            count,
            label: kind.label().to_string(),
        }
    }
}

/// Official structure of one subject's exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStructure {
    /// Sections in exam order.
    pub sections: Vec<Section>,
    /// Official time limit.
    pub time_budget_minutes: u32,
}

impl SubjectStructure {
    /// Returns `true` when the exam has document-based or short-answer
    /// sections, which changes how prompts describe those questions.
    #[must_use]
    pub fn is_history_style(&self) -> bool {
        self.sections
            .iter()
            .any(|s| matches!(s.kind, QuestionKind::Dbq | QuestionKind::Saq))
    }

    /// Returns the free-response kind used when the exam is shortened.
    ///
    /// `None` when the subject has no free-response section at all.
    #[must_use]
    pub fn primary_free_response(&self) -> Option<QuestionKind> {
        if self.sections.iter().any(|s| s.kind == QuestionKind::Saq) {
            Some(QuestionKind::Saq)
        } else if self.sections.iter().any(|s| s.kind != QuestionKind::Mcq) {
            Some(QuestionKind::Frq)
        } else {
            None
        }
    }
}

/// The concrete composition and time budget of one exam attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamBlueprint {
    /// Sections to generate, in order.
    pub sections: Vec<Section>,
    /// Time budget before accommodations.
    pub time_budget_minutes: u32,
    /// Whether the subject is history-style.
    pub history_style: bool,
    /// Whether the subject was found in the table.
    pub known_subject: bool,
}

impl ExamBlueprint {
    /// Total number of questions across all sections.
    #[must_use]
    pub fn total_questions(&self) -> u32 {
        self.sections.iter().map(|s| s.count).sum()
    }

    /// Number of questions of one kind.
    #[must_use]
    pub fn count_of(&self, kind: QuestionKind) -> u32 {
        self.sections
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.count)
            .sum()
    }

    /// Time budget in seconds before accommodations.
    #[must_use]
    pub fn time_budget_seconds(&self) -> u64 {
        u64::from(self.time_budget_minutes) * 60
    }

    /// Renders the sections as "55 Multiple Choice Questions, 3 Short ...".
    #[must_use]
    pub fn describe(&self) -> String {
        self.sections
            .iter()
            .map(|s| format!("{} {}", s.count, s.label))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Static subject rows: name, sections as (kind, count, label), minutes.
type SubjectRow = (
    &'static str,
    &'static [(QuestionKind, u32, &'static str)],
    u32,
);

const MCQ: QuestionKind = QuestionKind::Mcq;
const FRQ: QuestionKind = QuestionKind::Frq;
const SAQ: QuestionKind = QuestionKind::Saq;
const DBQ: QuestionKind = QuestionKind::Dbq;
const LEQ: QuestionKind = QuestionKind::Leq;

const MC: &str = "Multiple Choice Questions";
const MC_RL: &str = "Multiple Choice Questions (Reading/Listening)";
const FR: &str = "Free Response Questions";
const HISTORY: &[(QuestionKind, u32, &str)] = &[
    (MCQ, 55, MC),
    (SAQ, 3, "Short Answer Questions"),
    (DBQ, 1, "Document-Based Question"),
    (LEQ, 1, "Long Essay Question"),
];
const WORLD_LANGUAGE: &[(QuestionKind, u32, &str)] = &[
    (MCQ, 65, MC_RL),
    (
        FRQ,
        4,
        "Free Response Questions (Email Reply, Argumentative Essay, Conversation, Cultural Comparison)",
    ),
];
const ASIAN_LANGUAGE: &[(QuestionKind, u32, &str)] = &[
    (MCQ, 70, MC_RL),
    (
        FRQ,
        4,
        "Free Response Questions (Story Narration, Email Response, Conversation, Cultural Presentation)",
    ),
];

const SUBJECTS: &[SubjectRow] = &[
    // History & Social Sciences
    ("AP World History", HISTORY, 195),
    ("AP US History", HISTORY, 195),
    ("AP European History", HISTORY, 195),
    (
        "AP US Government and Politics",
        &[
            (MCQ, 55, MC),
            (FRQ, 4, "Free Response Questions (Concept Application, SCOTUS Comparison, Argument Essay)"),
        ],
        180,
    ),
    (
        "AP Comparative Government and Politics",
        &[
            (MCQ, 55, MC),
            (FRQ, 4, "Free Response Questions (Concept Application, Comparison, Data Analysis)"),
        ],
        150,
    ),
    ("AP Human Geography", &[(MCQ, 60, MC), (FRQ, 3, FR)], 135),
    ("AP Psychology", &[(MCQ, 100, MC), (FRQ, 2, FR)], 120),
    (
        "AP Macroeconomics",
        &[(MCQ, 60, MC), (FRQ, 3, "Free Response Questions (1 long, 2 short)")],
        130,
    ),
    (
        "AP Microeconomics",
        &[(MCQ, 60, MC), (FRQ, 3, "Free Response Questions (1 long, 2 short)")],
        130,
    ),
    // Math & Computer Science
    ("AP Calculus AB", &[(MCQ, 45, MC), (FRQ, 6, FR)], 195),
    ("AP Calculus BC", &[(MCQ, 45, MC), (FRQ, 6, FR)], 195),
    (
        "AP Statistics",
        &[(MCQ, 40, MC), (FRQ, 6, "Free Response Questions (5 short, 1 investigative task)")],
        180,
    ),
    ("AP Precalculus", &[(MCQ, 40, MC), (FRQ, 4, FR)], 180),
    (
        "AP Computer Science A",
        &[(MCQ, 40, MC), (FRQ, 4, "Free Response Questions (Methods, Classes, Arrays, 2D Arrays)")],
        180,
    ),
    ("AP Computer Science Principles", &[(MCQ, 70, MC)], 120),
    // Sciences
    (
        "AP Biology",
        &[(MCQ, 60, MC), (FRQ, 6, "Free Response Questions (2 long, 4 short)")],
        180,
    ),
    (
        "AP Chemistry",
        &[(MCQ, 60, MC), (FRQ, 7, "Free Response Questions (3 long, 4 short)")],
        195,
    ),
    ("AP Physics 1", &[(MCQ, 50, MC), (FRQ, 5, FR)], 180),
    ("AP Physics 2", &[(MCQ, 50, MC), (FRQ, 4, FR)], 180),
    ("AP Physics C: Mechanics", &[(MCQ, 35, MC), (FRQ, 3, FR)], 90),
    ("AP Physics C: Electricity and Magnetism", &[(MCQ, 35, MC), (FRQ, 3, FR)], 90),
    (
        "AP Environmental Science",
        &[
            (MCQ, 80, MC),
            (FRQ, 3, "Free Response Questions (Design Investigation, Analyze Environmental Problem, Analyze Environmental Problem with Calculations)"),
        ],
        160,
    ),
    // English & Languages
    (
        "AP English Language and Composition",
        &[(MCQ, 45, MC), (FRQ, 3, "Free Response Questions (Synthesis, Rhetorical Analysis, Argument)")],
        195,
    ),
    (
        "AP English Literature and Composition",
        &[(MCQ, 55, MC), (FRQ, 3, "Free Response Questions (Poetry Analysis, Prose Analysis, Literary Argument)")],
        180,
    ),
    ("AP Spanish Language and Culture", WORLD_LANGUAGE, 180),
    (
        "AP Spanish Literature and Culture",
        &[
            (MCQ, 65, MC),
            (FRQ, 4, "Free Response Questions (Text Explanation, Text/Art Comparison, Analysis, Text-based Essay)"),
        ],
        180,
    ),
    ("AP French Language and Culture", WORLD_LANGUAGE, 180),
    ("AP German Language and Culture", WORLD_LANGUAGE, 180),
    ("AP Italian Language and Culture", WORLD_LANGUAGE, 180),
    ("AP Chinese Language and Culture", ASIAN_LANGUAGE, 150),
    ("AP Japanese Language and Culture", ASIAN_LANGUAGE, 150),
    (
        "AP Latin",
        &[(MCQ, 50, MC), (FRQ, 5, "Free Response Questions (Translation, Short Essays, Analytical Essay)")],
        180,
    ),
    // Arts
    (
        "AP Art History",
        &[(MCQ, 80, MC), (FRQ, 6, "Free Response Questions (Long Essay, Visual Analysis, Attribution)")],
        180,
    ),
    (
        "AP Music Theory",
        &[
            (MCQ, 75, MC),
            (FRQ, 7, "Free Response Questions (Part-Writing, Harmonic Analysis, Sight-Singing, Melodic Dictation)"),
        ],
        160,
    ),
];

/// Read-only mapping from subject name to official structure.
#[derive(Debug, Clone)]
pub struct StructureTable {
    subjects: Vec<(String, SubjectStructure)>,
    fallback: SubjectStructure,
}

impl Default for StructureTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl StructureTable {
    /// Returns the built-in AP subject table.
    #[must_use]
    pub fn builtin() -> Self {
        let subjects = SUBJECTS
            .iter()
            .map(|(name, sections, minutes)| {
                let structure = SubjectStructure {
                    sections: sections
                        .iter()
                        .map(|(kind, count, label)| Section {
                            kind: *kind,
                            count: *count,
                            label: (*label).to_string(),
                        })
                        .collect(),
                    time_budget_minutes: *minutes,
                };
                ((*name).to_string(), structure)
            })
            .collect();

        Self {
            subjects,
            fallback: SubjectStructure {
                sections: vec![Section::new(MCQ, 40), Section::new(FRQ, 4)],
                time_budget_minutes: 180,
            },
        }
    }

    /// Creates a table from explicit entries and a fallback structure.
    #[must_use]
    pub const fn new(subjects: Vec<(String, SubjectStructure)>, fallback: SubjectStructure) -> Self {
        Self { subjects, fallback }
    }

    /// Looks up a subject by name, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn lookup(&self, subject: &str) -> Option<&SubjectStructure> {
        let wanted = subject.trim();
        self.subjects
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, structure)| structure)
    }

    /// Returns the subject's structure, or the generic fallback.
    #[must_use]
    pub fn resolve(&self, subject: &str) -> &SubjectStructure {
        self.lookup(subject).unwrap_or(&self.fallback)
    }

    /// Iterates over subject names in table order.
    pub fn subjects(&self) -> impl Iterator<Item = (&str, &SubjectStructure)> {
        self.subjects.iter().map(|(name, s)| (name.as_str(), s))
    }

    /// Derives the blueprint of one attempt.
    #[must_use]
    pub fn blueprint(&self, subject: &str, length: LengthClass) -> ExamBlueprint {
        let known = self.lookup(subject);
        let structure = known.unwrap_or(&self.fallback);
        let history_style = structure.is_history_style();

        let (sections, time_budget_minutes) = match length {
            LengthClass::Full => (structure.sections.clone(), structure.time_budget_minutes),
            LengthClass::Diagnostic => {
                shortened(structure, DIAGNOSTIC_MCQ, DIAGNOSTIC_FREE_RESPONSE)
            }
            LengthClass::Quick => shortened(structure, QUICK_MCQ, QUICK_FREE_RESPONSE),
        };

        ExamBlueprint {
            sections,
            time_budget_minutes,
            history_style,
            known_subject: known.is_some(),
        }
    }
}

fn shortened(structure: &SubjectStructure, mcq: u32, free_response: u32) -> (Vec<Section>, u32) {
    let sections = match structure.primary_free_response() {
        Some(kind) => vec![Section::new(MCQ, mcq), Section::new(kind, free_response)],
        None => vec![Section::new(MCQ, mcq + free_response)],
    };
    let minutes = (mcq + free_response) * MINUTES_PER_PRACTICE_QUESTION;
    (sections, minutes)
}
