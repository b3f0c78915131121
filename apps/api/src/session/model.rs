//! The serializable session state the Dialogue Controller reads and mutates
//! on every turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::FactSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Interview,
    Qa,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Interview
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AwaitSemesterProgress,
    General,
    TlSearch,
    InTl,
    WrapUp,
}

impl Default for Stage {
    fn default() -> Self {
        Stage::AwaitSemesterProgress
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct General {
    pub semester: Option<u8>,
    pub progress_percent: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counters {
    pub general_q: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub idx: usize,
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTlCandidate {
    pub id: String,
    pub title: String,
}

/// The per-course working set while the controller is either searching for
/// or actively interviewing about one "Teilleistung".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentTl {
    pub area: Option<String>,
    pub tl_id: Option<String>,
    pub tl_title: Option<String>,

    #[serde(default)]
    pub awaiting_written_confirm: bool,
    #[serde(default)]
    pub awaiting_title_written_confirm: bool,
    #[serde(default)]
    pub awaiting_candidate_choice: bool,

    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub pending_tl_candidate: Option<PendingTlCandidate>,

    #[serde(default)]
    pub tl_facts: FactSet,
    #[serde(default)]
    pub in_tl_rounds: u32,

    #[serde(default)]
    pub declined_written: Vec<String>,
    pub last_confirm_tl: Option<String>,
}

impl CurrentTl {
    /// At most one `awaiting_*` flag may be true at a time.
    pub fn awaiting_count(&self) -> u8 {
        self.awaiting_written_confirm as u8
            + self.awaiting_title_written_confirm as u8
            + self.awaiting_candidate_choice as u8
    }

    /// Resets the in-TL working counters. Called on every transition into
    /// `Stage::InTl`.
    pub fn reset_in_tl(&mut self) {
        self.in_tl_rounds = 0;
        self.tl_facts = FactSet::default();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Flags {
    #[serde(default)]
    pub llm_disabled: bool,
    pub llm_disabled_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationPhase {
    InProgress,
    Done,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evaluation {
    pub state: Option<EvaluationPhase>,
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub answers: Vec<serde_json::Value>,
    pub comments: Option<String>,
    pub corrections: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub mode: Mode,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub stage: Stage,
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub counters: Counters,
    #[serde(default)]
    pub asked_log: Vec<String>,
    #[serde(default)]
    pub transcript: Vec<TranscriptTurn>,
    #[serde(default)]
    pub current: CurrentTl,
    #[serde(default)]
    pub flags: Flags,
    #[serde(default)]
    pub evaluation: Evaluation,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            mode: Mode::Interview,
            started_at: Utc::now(),
            stage: Stage::AwaitSemesterProgress,
            general: General::default(),
            counters: Counters::default(),
            asked_log: Vec::new(),
            transcript: Vec::new(),
            current: CurrentTl::default(),
            flags: Flags::default(),
            evaluation: Evaluation::default(),
        }
    }

    /// Appends a question to `asked_log`, enforcing the no-duplicate-text
    /// invariant. Returns `false` (and does not append) if `question` was
    /// already asked.
    pub fn record_question(&mut self, question: &str) -> bool {
        if self.asked_log.iter().any(|q| q == question) {
            return false;
        }
        self.asked_log.push(question.to_string());
        true
    }

    pub fn push_user_turn(&mut self, content: &str) {
        self.transcript.push(TranscriptTurn {
            role: Role::User,
            content: content.to_string(),
            timestamp: Utc::now(),
            meta: None,
        });
    }

    pub fn push_assistant_turn(&mut self, content: &str, meta: Option<serde_json::Value>) {
        self.transcript.push(TranscriptTurn {
            role: Role::Assistant,
            content: content.to_string(),
            timestamp: Utc::now(),
            meta,
        });
    }

    pub fn enter_in_tl(&mut self, tl_id: String, tl_title: String) {
        self.stage = Stage::InTl;
        self.current.tl_id = Some(tl_id);
        self.current.tl_title = Some(tl_title);
        self.current.reset_in_tl();
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_question_rejects_duplicates() {
        let mut s = SessionState::new();
        assert!(s.record_question("Wie viele Semester studierst du schon?"));
        assert!(!s.record_question("Wie viele Semester studierst du schon?"));
        assert_eq!(s.asked_log.len(), 1);
    }

    #[test]
    fn enter_in_tl_resets_rounds_and_facts() {
        let mut s = SessionState::new();
        s.current.in_tl_rounds = 4;
        s.current.tl_facts.difficulty_1_5 = Some(3);
        s.enter_in_tl("T-1".into(), "Statistik".into());
        assert_eq!(s.stage, Stage::InTl);
        assert_eq!(s.current.in_tl_rounds, 0);
        assert_eq!(s.current.tl_facts, FactSet::default());
    }

    #[test]
    fn at_most_one_awaiting_flag_by_construction_default() {
        let s = SessionState::new();
        assert_eq!(s.current.awaiting_count(), 0);
    }
}
