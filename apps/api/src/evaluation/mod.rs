//! Evaluation entry points: `evaluation.start` and `evaluation.submit`.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::catalog::{CatalogIndex, FactSet};
use crate::oracle::{classifiers, OracleAdapter, OracleError};
use crate::session::SessionHandle;

const RATING_ITEMS: [(&str, &str); 5] = [
    ("clarity", "Wie klar waren die Fragen formuliert?"),
    ("relevance", "Wie relevant waren die Fragen für dein Studium?"),
    ("pace", "Wie war das Tempo des Gesprächs?"),
    ("trust", "Wie sehr hast du dem System vertraut?"),
    ("overall", "Wie zufrieden bist du insgesamt?"),
];

#[derive(Debug, Clone, Serialize)]
pub struct EvalSchemaItem {
    pub id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalScale {
    pub min: u8,
    pub max: u8,
    pub labels: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalSchema {
    pub items: Vec<EvalSchemaItem>,
    pub scale: EvalScale,
}

fn eval_schema() -> EvalSchema {
    EvalSchema {
        items: RATING_ITEMS
            .iter()
            .map(|(id, prompt)| EvalSchemaItem {
                id: id.to_string(),
                prompt: prompt.to_string(),
            })
            .collect(),
        scale: EvalScale {
            min: 1,
            max: 5,
            labels: json!({"1": "trifft gar nicht zu", "5": "trifft voll zu"}),
        },
    }
}

pub struct EvaluationService {
    catalog: Arc<CatalogIndex>,
    oracle: Arc<OracleAdapter>,
    evaluations_path: PathBuf,
}

pub struct StartResult {
    pub answer: String,
    pub summary: String,
    pub eval_schema: EvalSchema,
    pub knowledge_markdown: String,
    pub new_knowledge: Vec<Value>,
}

impl EvaluationService {
    pub fn new(catalog: Arc<CatalogIndex>, oracle: Arc<OracleAdapter>, data_dir: &std::path::Path) -> Self {
        Self {
            catalog,
            oracle,
            evaluations_path: data_dir.join("evaluations.jsonl"),
        }
    }

    /// `evaluation.start`: per the spec's open-question resolution, `stage`
    /// is left untouched — only `evaluation.state` moves to `in_progress`.
    pub async fn start(&self, session_id: &str, handle: &SessionHandle) -> StartResult {
        let mut state = handle.lock().await;
        state.evaluation.state = Some(crate::session::model::EvaluationPhase::InProgress);

        let recent: Vec<String> = state
            .transcript
            .iter()
            .rev()
            .take(30)
            .rev()
            .map(|t| format!("{:?}: {}", t.role, t.content))
            .collect();
        let transcript_text = recent.join("\n");

        let summary = match classifiers::summarize_transcript(&self.oracle, session_id, &transcript_text).await {
            Ok(s) => s,
            Err(OracleError::QuotaExhausted) => {
                state.flags.llm_disabled = true;
                state.flags.llm_disabled_reason =
                    Some("Die KI-Anbindung hat ihr Nutzungskontingent erschöpft.".to_string());
                "Zusammenfassung momentan nicht verfügbar.".to_string()
            }
            Err(_) => "Zusammenfassung momentan nicht verfügbar.".to_string(),
        };

        let (knowledge_markdown, new_knowledge) = self.render_session_knowledge(session_id);

        let answer = "Danke für das Gespräch! Bevor wir abschließen, würde ich gerne dein Feedback hören.".to_string();

        StartResult {
            answer,
            summary,
            eval_schema: eval_schema(),
            knowledge_markdown,
            new_knowledge,
        }
    }

    /// Renders the Knowledge Markdown narrative for every course this
    /// session contributed facts to, and returns the raw JSON-LD documents
    /// alongside it for the `new_knowledge` response field.
    fn render_session_knowledge(&self, session_id: &str) -> (String, Vec<Value>) {
        let mut sections = Vec::new();
        let mut documents = Vec::new();

        for course in self.catalog.all() {
            if let Some(entry) = course.entry_for_session(session_id) {
                sections.push(render_course_section(&course.id, &course.title, &entry.facts));
                documents.push(entry.jsonld.clone());
            }
        }

        (sections.join("\n\n"), documents)
    }

    /// `evaluation.submit`: rejects if any rating is not a finite number in
    /// 1..5. Appends one JSON-lines record on success.
    pub async fn submit(
        &self,
        session_id: &str,
        handle: &SessionHandle,
        ratings: &std::collections::HashMap<String, f64>,
        comments: Option<String>,
        corrections: Option<String>,
    ) -> Result<String, String> {
        for (id, value) in ratings {
            if !value.is_finite() || !(1.0..=5.0).contains(value) {
                return Err(format!("rating '{id}' must be a finite number between 1 and 5"));
            }
        }

        let mut state = handle.lock().await;
        state.evaluation.state = Some(crate::session::model::EvaluationPhase::Done);
        state.evaluation.comments = comments.clone();
        state.evaluation.corrections = corrections.clone();

        let record = json!({
            "ts": Utc::now().to_rfc3339(),
            "sessionId": session_id,
            "ratings": ratings,
            "comments": comments,
            "corrections": corrections,
        });
        if let Err(e) = self.append_evaluation(&record) {
            tracing::error!("failed to append evaluation record for {session_id}: {e}");
        }

        let message = "Danke für dein Feedback!".to_string();
        state.push_assistant_turn(&message, None);
        Ok(message)
    }

    fn append_evaluation(&self, record: &Value) -> std::io::Result<()> {
        if let Some(parent) = self.evaluations_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.evaluations_path)?;
        writeln!(file, "{record}")
    }
}

fn render_course_section(id: &str, title: &str, facts: &FactSet) -> String {
    let clean = crate::catalog::clean_title(title);
    let mut sentences = Vec::new();

    match facts.exam_type {
        Some(crate::catalog::ExamType::Schriftlich) => sentences.push("Die Prüfung ist schriftlich.".to_string()),
        Some(crate::catalog::ExamType::Muendlich) => sentences.push("Die Prüfung ist mündlich.".to_string()),
        None => sentences.push("Die Prüfungsform ist nicht bekannt.".to_string()),
    }

    if let Some(difficulty) = facts.difficulty_1_5 {
        sentences.push(format!(
            "Der Schwierigkeitsgrad wird mit {}/5 ({}) eingeschätzt.",
            difficulty,
            difficulty_label(difficulty)
        ));
    } else {
        sentences.push("Der Schwierigkeitsgrad ist nicht bekannt.".to_string());
    }

    if let Some(weeks) = facts.prep_weeks {
        sentences.push(format!("Die Vorbereitung dauerte etwa {weeks} Wochen."));
    }
    if let Some(hours) = facts.hours_per_week {
        sentences.push(format!("Dafür wurden ungefähr {hours} Stunden pro Woche investiert."));
    }

    if !facts.strategies.is_empty() {
        sentences.push(format!("Als Strategie wurde genannt: {}.", join_german(&facts.strategies)));
    }
    if !facts.materials.is_empty() {
        sentences.push(format!("Genutztes Material: {}.", join_german(&facts.materials)));
    }
    if !facts.pitfalls.is_empty() {
        sentences.push(format!("Typische Stolperfallen: {}.", join_german(&facts.pitfalls)));
    }
    if !facts.tips.is_empty() {
        sentences.push(format!("Tipps: {}.", join_german(&facts.tips)));
    }

    format!("### {clean} ({id})\n\n{}", sentences.join(" "))
}

fn difficulty_label(value: u8) -> &'static str {
    match value {
        1 => "sehr leicht",
        2 => "leicht",
        3 => "mittel",
        4 => "anspruchsvoll",
        _ => "sehr anspruchsvoll",
    }
}

/// Joins a list of strings in German natural style: `A`, `A und B`, or
/// `A, B und C`.
fn join_german(items: &[String]) -> String {
    match items.len() {
        0 => String::new(),
        1 => items[0].clone(),
        n => format!("{} und {}", items[..n - 1].join(", "), items[n - 1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_german_single_item() {
        assert_eq!(join_german(&["A".to_string()]), "A");
    }

    #[test]
    fn join_german_two_items() {
        assert_eq!(join_german(&["A".to_string(), "B".to_string()]), "A und B");
    }

    #[test]
    fn join_german_three_items() {
        assert_eq!(
            join_german(&["A".to_string(), "B".to_string(), "C".to_string()]),
            "A, B und C"
        );
    }

    #[test]
    fn difficulty_labels_cover_full_range() {
        assert_eq!(difficulty_label(1), "sehr leicht");
        assert_eq!(difficulty_label(3), "mittel");
        assert_eq!(difficulty_label(5), "sehr anspruchsvoll");
    }

    #[test]
    fn render_course_section_has_heading_with_clean_title_and_id() {
        let section = render_course_section("T-1", "Statistik (T-1)", &FactSet::default());
        assert!(section.starts_with("### Statistik (T-1)"));
    }
}
