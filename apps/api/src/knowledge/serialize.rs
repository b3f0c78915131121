//! Dual serialization of a course's facts into JSON-LD and Turtle.

use serde_json::{json, Value};

use crate::catalog::{ExamType, FactSet};

/// Builds a single JSON-LD document for one course's effective facts.
pub fn to_jsonld(course_id: &str, title: &str, facts: &FactSet) -> Value {
    let mut node = json!({
        "@context": {
            "ex": "http://example.org/wi-ontology#",
            "schema": "http://schema.org/"
        },
        "@id": format!("ex:{course_id}"),
        "name": title,
    });

    let obj = node.as_object_mut().expect("object literal");

    if let Some(exam_type) = facts.exam_type {
        obj.insert("examType".into(), json!(exam_type_label(exam_type)));
    }
    if let Some(weeks) = facts.prep_weeks {
        obj.insert("prepWeeks".into(), json!(weeks));
    }
    if let Some(hours) = facts.hours_per_week {
        obj.insert("hoursPerWeek".into(), json!(hours));
    }
    if let Some(difficulty) = facts.difficulty_1_5 {
        obj.insert("difficulty".into(), json!(difficulty));
    }
    if !facts.strategies.is_empty() {
        obj.insert("strategy".into(), json!(facts.strategies));
    }
    if !facts.materials.is_empty() {
        obj.insert("material".into(), json!(facts.materials));
    }
    if !facts.pitfalls.is_empty() {
        obj.insert("pitfall".into(), json!(facts.pitfalls));
    }
    if !facts.tips.is_empty() {
        obj.insert("tip".into(), json!(facts.tips));
    }
    obj.insert("evidence".into(), json!(format!("ex:{course_id}#new_knowledge")));

    node
}

/// Builds a Turtle subject block for one course's effective facts. String
/// literals are escaped for `\` and `"`.
pub fn to_turtle(course_id: &str, title: &str, facts: &FactSet) -> String {
    let subject = format!("ex:{course_id}");
    let mut lines = vec![format!("{subject} schema:name \"{}\" ;", escape(title))];

    if let Some(exam_type) = facts.exam_type {
        lines.push(format!("  ex:examType \"{}\" ;", exam_type_label(exam_type)));
    }
    if let Some(weeks) = facts.prep_weeks {
        lines.push(format!("  ex:prepWeeks {weeks} ;"));
    }
    if let Some(hours) = facts.hours_per_week {
        lines.push(format!("  ex:hoursPerWeek {hours} ;"));
    }
    if let Some(difficulty) = facts.difficulty_1_5 {
        lines.push(format!("  ex:difficulty {difficulty} ;"));
    }
    for s in &facts.strategies {
        lines.push(format!("  ex:strategy \"{}\" ;", escape(s)));
    }
    for m in &facts.materials {
        lines.push(format!("  ex:material \"{}\" ;", escape(m)));
    }
    for p in &facts.pitfalls {
        lines.push(format!("  ex:pitfall \"{}\" ;", escape(p)));
    }
    for t in &facts.tips {
        lines.push(format!("  ex:tip \"{}\" ;", escape(t)));
    }
    lines.push(format!("  ex:evidence \"{subject}#new_knowledge\" ."));

    lines.join("\n")
}

fn exam_type_label(exam_type: ExamType) -> &'static str {
    match exam_type {
        ExamType::Schriftlich => "schriftlich",
        ExamType::Muendlich => "mündlich",
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_facts() -> FactSet {
        FactSet {
            exam_type: Some(ExamType::Schriftlich),
            prep_weeks: Some(3.0),
            hours_per_week: Some(5.0),
            difficulty_1_5: Some(4),
            strategies: vec!["Altklausuren üben".into()],
            materials: vec!["Skript \"v2\"".into()],
            pitfalls: vec![],
            tips: vec![],
        }
    }

    #[test]
    fn jsonld_contains_context_and_predicates() {
        let doc = to_jsonld("T-1", "Statistik", &sample_facts());
        assert_eq!(doc["@context"]["ex"], "http://example.org/wi-ontology#");
        assert_eq!(doc["examType"], "schriftlich");
        assert_eq!(doc["difficulty"], 4);
        assert_eq!(doc["strategy"][0], "Altklausuren üben");
    }

    #[test]
    fn jsonld_omits_absent_fields() {
        let doc = to_jsonld("T-1", "Statistik", &FactSet::default());
        assert!(doc.get("examType").is_none());
        assert!(doc.get("strategy").is_none());
    }

    #[test]
    fn turtle_escapes_backslash_and_quote() {
        let ttl = to_turtle("T-1", "Statistik", &sample_facts());
        assert!(ttl.contains("Skript \\\"v2\\\""));
    }

    #[test]
    fn turtle_has_one_subject_block() {
        let ttl = to_turtle("T-1", "Statistik", &sample_facts());
        assert!(ttl.starts_with("ex:T-1 schema:name"));
        assert!(ttl.trim_end().ends_with('.'));
    }
}
