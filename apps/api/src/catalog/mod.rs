//! Catalog Index — the load-time structure over curated course entries
//! ("Teilleistungen"). Fuzzy candidate search plus per-id lookups.

pub mod fuzzy;
pub mod model;

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use regex::Regex;
use tracing::warn;

pub use model::{Course, ExamType, FactSet, KnowledgeEntry};

/// A scored fuzzy match against the catalog.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CandidateMatch {
    pub id: String,
    pub title: String,
    pub score: f64,
}

/// Load-time index over the course catalog. If the backing file is missing
/// or malformed, the index comes up empty rather than failing startup — the
/// Dialogue Controller degrades to treating every mention as unresolved.
pub struct CatalogIndex {
    path: PathBuf,
    courses: RwLock<Vec<Course>>,
}

impl CatalogIndex {
    /// Loads `<data_dir>/catalog.json`. Never fails: a missing or malformed
    /// file yields an empty index and a warning log line.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join("catalog.json");
        let courses = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<Course>>(&raw) {
                Ok(courses) => courses,
                Err(e) => {
                    warn!("catalog file at {path:?} is malformed, starting empty: {e}");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("catalog file at {path:?} not found, starting empty: {e}");
                Vec::new()
            }
        };

        Self {
            path,
            courses: RwLock::new(courses),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Top-`k` fuzzy candidates for `query`, sorted descending by score.
    pub fn candidates(&self, query: &str, k: usize) -> Vec<CandidateMatch> {
        let courses = self.courses.read().expect("catalog lock poisoned");
        let mut scored: Vec<CandidateMatch> = courses
            .iter()
            .map(|c| CandidateMatch {
                id: c.id.clone(),
                title: c.title.clone(),
                score: fuzzy::score(query, &c.title),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    pub fn entry(&self, id: &str) -> Option<Course> {
        self.courses
            .read()
            .expect("catalog lock poisoned")
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    /// A snapshot of every course currently in the index, in catalog order.
    pub fn all(&self) -> Vec<Course> {
        self.courses.read().expect("catalog lock poisoned").clone()
    }

    /// Finds a course by exact id, by id embedded in another course's title,
    /// or by case-insensitive clean-title match. Used by the Knowledge Store
    /// to resolve a loosely-identified course before writing facts.
    pub fn resolve(&self, id_or_title: &str) -> Option<Course> {
        let courses = self.courses.read().expect("catalog lock poisoned");
        if let Some(c) = courses.iter().find(|c| c.id == id_or_title) {
            return Some(c.clone());
        }
        if let Some(c) = courses.iter().find(|c| c.title.contains(id_or_title)) {
            return Some(c.clone());
        }
        let needle = clean_title(id_or_title).to_lowercase();
        courses
            .iter()
            .find(|c| clean_title(&c.title).to_lowercase() == needle)
            .cloned()
    }

    /// Replaces a course's stored state (after the Knowledge Store merges a
    /// new knowledge entry into it) and persists the full catalog back to disk.
    pub fn replace_and_persist(&self, updated: Course) -> std::io::Result<()> {
        {
            let mut courses = self.courses.write().expect("catalog lock poisoned");
            if let Some(slot) = courses.iter_mut().find(|c| c.id == updated.id) {
                *slot = updated;
            } else {
                courses.push(updated);
            }
        }
        self.persist()
    }

    fn persist(&self) -> std::io::Result<()> {
        let courses = self.courses.read().expect("catalog lock poisoned");
        let raw = serde_json::to_string_pretty(&*courses)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, raw)
    }

    /// The "Erfolgskontrolle(n)" paragraph extracted from a course's descriptor
    /// text, if present.
    pub fn erfolgskontrolle_text(&self, id: &str) -> Option<String> {
        let course = self.entry(id)?;
        extract_erfolgskontrolle(&course.text)
    }

    /// The name on the course's "Dozent:" line, if present.
    pub fn primary_instructor(&self, id: &str) -> Option<String> {
        let course = self.entry(id)?;
        extract_instructor(&course.text)
    }
}

/// Strips a bracketed id suffix such as " (T-123)" from a display title.
pub fn clean_title(title: &str) -> String {
    let re = Regex::new(r"\s*\(T-[^)]*\)\s*$").expect("static regex is valid");
    re.replace(title, "").trim().to_string()
}

fn extract_erfolgskontrolle(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let start = lower.find("erfolgskontrolle")?;
    let rest = &text[start..];
    let end = rest.find("\n\n").unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}

fn extract_instructor(text: &str) -> Option<String> {
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("Dozent:") {
            return Some(rest.trim().to_string());
        }
        if let Some(rest) = trimmed.strip_prefix("Dozentin:") {
            return Some(rest.trim().to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn course(id: &str, title: &str, text: &str) -> Course {
        Course {
            id: id.to_string(),
            title: title.to_string(),
            text: text.to_string(),
            new_knowledge: Vec::new(),
        }
    }

    fn write_catalog(dir: &Path, courses: &[Course]) {
        let raw = serde_json::to_string(courses).unwrap();
        std::fs::write(dir.join("catalog.json"), raw).unwrap();
    }

    #[test]
    fn missing_catalog_file_yields_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = CatalogIndex::load(dir.path());
        assert!(index.candidates("anything", 5).is_empty());
    }

    #[test]
    fn malformed_catalog_file_yields_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("catalog.json")).unwrap();
        writeln!(f, "not valid json").unwrap();
        let index = CatalogIndex::load(dir.path());
        assert!(index.candidates("anything", 5).is_empty());
    }

    #[test]
    fn candidates_sorted_descending_and_truncated() {
        let dir = tempfile::tempdir().unwrap();
        write_catalog(
            &dir.path(),
            &[
                course("T-1", "Mathe 1", ""),
                course("T-2", "Grundlagen der Mathematik", ""),
                course("T-3", "Geschichte der Kunst", ""),
            ],
        );
        let index = CatalogIndex::load(dir.path());
        let top = index.candidates("mathe", 2);
        assert_eq!(top.len(), 2);
        assert!(top[0].score >= top[1].score);
        assert!(top.iter().any(|c| c.id == "T-1"));
    }

    #[test]
    fn resolve_by_exact_id() {
        let dir = tempfile::tempdir().unwrap();
        write_catalog(&dir.path(), &[course("T-9", "Statistik", "")]);
        let index = CatalogIndex::load(dir.path());
        assert_eq!(index.resolve("T-9").unwrap().id, "T-9");
    }

    #[test]
    fn resolve_by_clean_title_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        write_catalog(&dir.path(), &[course("T-9", "Statistik (T-9)", "")]);
        let index = CatalogIndex::load(dir.path());
        assert_eq!(index.resolve("STATISTIK").unwrap().id, "T-9");
    }

    #[test]
    fn clean_title_strips_bracketed_id() {
        assert_eq!(clean_title("Statistik (T-9)"), "Statistik");
        assert_eq!(clean_title("Statistik"), "Statistik");
    }

    #[test]
    fn erfolgskontrolle_and_instructor_extraction() {
        let dir = tempfile::tempdir().unwrap();
        write_catalog(
            &dir.path(),
            &[course(
                "T-5",
                "Statistik",
                "Einfuehrung in die Methoden.\n\nErfolgskontrolle: Klausur 90 Minuten.\n\nDozent: Prof. Mueller",
            )],
        );
        let index = CatalogIndex::load(dir.path());
        assert_eq!(
            index.erfolgskontrolle_text("T-5").unwrap(),
            "Erfolgskontrolle: Klausur 90 Minuten."
        );
        assert_eq!(index.primary_instructor("T-5").unwrap(), "Prof. Mueller");
    }
}
