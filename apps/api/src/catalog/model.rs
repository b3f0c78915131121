use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single free-text question answer, merged into the course-level knowledge log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FactSet {
    pub exam_type: Option<ExamType>,
    pub prep_weeks: Option<f64>,
    pub hours_per_week: Option<f64>,
    pub difficulty_1_5: Option<u8>,
    #[serde(default)]
    pub strategies: Vec<String>,
    #[serde(default)]
    pub materials: Vec<String>,
    #[serde(default)]
    pub pitfalls: Vec<String>,
    #[serde(default)]
    pub tips: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExamType {
    Schriftlich,
    #[serde(rename = "mündlich")]
    Muendlich,
}

impl FactSet {
    pub fn is_empty(&self) -> bool {
        self.exam_type.is_none()
            && self.prep_weeks.is_none()
            && self.hours_per_week.is_none()
            && self.difficulty_1_5.is_none()
            && self.strategies.is_empty()
            && self.materials.is_empty()
            && self.pitfalls.is_empty()
            && self.tips.is_empty()
    }

    /// Scalars from `b` win if non-null, else keep `a`. List fields become a
    /// deduplicated union preserving first-seen order. Associative: calling
    /// this repeatedly in any grouping yields the same result for list fields.
    pub fn merge(a: &FactSet, b: &FactSet) -> FactSet {
        FactSet {
            exam_type: b.exam_type.or(a.exam_type),
            prep_weeks: b.prep_weeks.or(a.prep_weeks),
            hours_per_week: b.hours_per_week.or(a.hours_per_week),
            difficulty_1_5: b.difficulty_1_5.or(a.difficulty_1_5),
            strategies: merge_unique(&a.strategies, &b.strategies),
            materials: merge_unique(&a.materials, &b.materials),
            pitfalls: merge_unique(&a.pitfalls, &b.pitfalls),
            tips: merge_unique(&a.tips, &b.tips),
        }
    }
}

fn merge_unique(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    for item in a.iter().chain(b.iter()) {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

/// One (course, session) extraction. At most one entry exists per
/// `(course_id, session_id)` pair in a course's `new_knowledge` log —
/// subsequent extractions merge into it rather than appending a duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub facts: FactSet,
    pub jsonld: serde_json::Value,
    pub ttl: String,
}

/// A curated course entry ("Teilleistung"), immutable at runtime apart from
/// its append/merge `new_knowledge` log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub new_knowledge: Vec<KnowledgeEntry>,
}

impl Course {
    pub fn entry_for_session(&self, session_id: &str) -> Option<&KnowledgeEntry> {
        self.new_knowledge.iter().find(|e| e.session_id == session_id)
    }

    pub fn entry_for_session_mut(&mut self, session_id: &str) -> Option<&mut KnowledgeEntry> {
        self.new_knowledge
            .iter_mut()
            .find(|e| e.session_id == session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(strategies: &[&str]) -> FactSet {
        FactSet {
            strategies: strategies.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn merge_scalars_right_biased() {
        let a = FactSet {
            difficulty_1_5: Some(3),
            ..Default::default()
        };
        let b = FactSet {
            difficulty_1_5: Some(4),
            ..Default::default()
        };
        assert_eq!(FactSet::merge(&a, &b).difficulty_1_5, Some(4));
    }

    #[test]
    fn merge_keeps_prior_scalar_when_new_is_null() {
        let a = FactSet {
            difficulty_1_5: Some(3),
            ..Default::default()
        };
        let b = FactSet::default();
        assert_eq!(FactSet::merge(&a, &b).difficulty_1_5, Some(3));
    }

    #[test]
    fn merge_dedups_lists_preserving_first_seen_order() {
        let a = facts(&["Altklausuren", "Karteikarten"]);
        let b = facts(&["Karteikarten", "Lerngruppe"]);
        let merged = FactSet::merge(&a, &b);
        assert_eq!(merged.strategies, vec!["Altklausuren", "Karteikarten", "Lerngruppe"]);
    }

    #[test]
    fn merge_is_associative_for_list_fields() {
        let a = facts(&["A", "B"]);
        let b = facts(&["B", "C"]);
        let c = facts(&["C", "D"]);
        let left = FactSet::merge(&FactSet::merge(&a, &b), &c);
        let right = FactSet::merge(&a, &FactSet::merge(&b, &c));
        assert_eq!(left.strategies, right.strategies);
        assert_eq!(left.strategies, vec!["A", "B", "C", "D"]);
    }
}
