//! Knowledge Store — read-modify-write of per-course `new_knowledge` entries
//! plus append-only global JSON-LD and Turtle serializations.

pub mod serialize;

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use fs2::FileExt;
use serde_json::Value;

use crate::catalog::{CatalogIndex, FactSet, KnowledgeEntry};

pub struct KnowledgeStore {
    catalog: std::sync::Arc<CatalogIndex>,
    jsonld_path: PathBuf,
    turtle_path: PathBuf,
    write_lock: Mutex<()>,
}

impl KnowledgeStore {
    pub fn new(catalog: std::sync::Arc<CatalogIndex>, data_dir: &Path) -> Self {
        Self {
            catalog,
            jsonld_path: data_dir.join("knowledge.jsonld"),
            turtle_path: data_dir.join("knowledge.ttl"),
            write_lock: Mutex::new(()),
        }
    }

    /// Locates the course by id, embedded-id, or clean-title match; merges or
    /// appends a `(course_id, session_id)` entry; recomputes and appends the
    /// two global serializations. Idempotent: saving identical facts twice
    /// for the same session produces the same merged entry and does not
    /// duplicate the course's `new_knowledge` log.
    pub fn save_new_knowledge(
        &self,
        course_id_or_title: &str,
        session_id: &str,
        facts: &FactSet,
    ) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().expect("knowledge store lock poisoned");

        let mut course = self
            .catalog
            .resolve(course_id_or_title)
            .ok_or_else(|| anyhow::anyhow!("no catalog entry matches '{course_id_or_title}'"))?;

        let effective_facts = match course.entry_for_session(session_id) {
            Some(prev) => FactSet::merge(&prev.facts, facts),
            None => facts.clone(),
        };

        let clean_title = crate::catalog::clean_title(&course.title);
        let jsonld = serialize::to_jsonld(&course.id, &clean_title, &effective_facts);
        let ttl = serialize::to_turtle(&course.id, &clean_title, &effective_facts);

        let is_new = course.entry_for_session(session_id).is_none();
        if let Some(entry) = course.entry_for_session_mut(session_id) {
            entry.facts = effective_facts;
            entry.jsonld = jsonld.clone();
            entry.ttl = ttl.clone();
            entry.timestamp = Utc::now();
        } else {
            course.new_knowledge.push(KnowledgeEntry {
                session_id: session_id.to_string(),
                timestamp: Utc::now(),
                facts: effective_facts,
                jsonld: jsonld.clone(),
                ttl: ttl.clone(),
            });
        }

        self.catalog.replace_and_persist(course)?;

        if is_new {
            self.append_jsonld(&jsonld)?;
            self.append_turtle(&ttl)?;
        }

        Ok(())
    }

    fn append_jsonld(&self, doc: &Value) -> anyhow::Result<()> {
        let existing = std::fs::read_to_string(&self.jsonld_path).unwrap_or_default();
        let mut array: Vec<Value> = if existing.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&existing).unwrap_or_default()
        };
        array.push(doc.clone());

        if let Some(parent) = self.jsonld_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.jsonld_path)?;
        file.lock_exclusive()?;
        serde_json::to_writer_pretty(&file, &array)?;
        fs2::FileExt::unlock(&file)?;
        Ok(())
    }

    fn append_turtle(&self, block: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.turtle_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.turtle_path)?;
        file.lock_exclusive()?;
        writeln!(file, "{block}\n")?;
        fs2::FileExt::unlock(&file)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Course;
    use std::sync::Arc;

    fn setup() -> (tempfile::TempDir, Arc<CatalogIndex>, KnowledgeStore) {
        let dir = tempfile::tempdir().unwrap();
        let courses = vec![Course {
            id: "T-1".into(),
            title: "Statistik".into(),
            text: String::new(),
            new_knowledge: Vec::new(),
        }];
        std::fs::write(
            dir.path().join("catalog.json"),
            serde_json::to_string(&courses).unwrap(),
        )
        .unwrap();
        let catalog = Arc::new(CatalogIndex::load(dir.path()));
        let store = KnowledgeStore::new(catalog.clone(), dir.path());
        (dir, catalog, store)
    }

    fn facts(difficulty: u8) -> FactSet {
        FactSet {
            difficulty_1_5: Some(difficulty),
            ..Default::default()
        }
    }

    #[test]
    fn first_save_appends_one_entry_and_one_serialization() {
        let (_dir, catalog, store) = setup();
        store.save_new_knowledge("T-1", "sess-1", &facts(3)).unwrap();

        let course = catalog.entry("T-1").unwrap();
        assert_eq!(course.new_knowledge.len(), 1);

        let jsonld_raw = std::fs::read_to_string(&store.jsonld_path).unwrap();
        let array: Vec<Value> = serde_json::from_str(&jsonld_raw).unwrap();
        assert_eq!(array.len(), 1);
    }

    #[test]
    fn repeated_save_same_session_merges_in_place_without_duplicating() {
        let (_dir, catalog, store) = setup();
        store.save_new_knowledge("T-1", "sess-1", &facts(3)).unwrap();
        store.save_new_knowledge("T-1", "sess-1", &facts(3)).unwrap();

        let course = catalog.entry("T-1").unwrap();
        assert_eq!(course.new_knowledge.len(), 1);

        let jsonld_raw = std::fs::read_to_string(&store.jsonld_path).unwrap();
        let array: Vec<Value> = serde_json::from_str(&jsonld_raw).unwrap();
        assert_eq!(array.len(), 1, "merge-on-same-session must not append a second document");
    }

    #[test]
    fn distinct_sessions_each_get_their_own_entry() {
        let (_dir, catalog, _store) = setup();
        let store = _store;
        store.save_new_knowledge("T-1", "sess-1", &facts(3)).unwrap();
        store.save_new_knowledge("T-1", "sess-2", &facts(5)).unwrap();

        let course = catalog.entry("T-1").unwrap();
        assert_eq!(course.new_knowledge.len(), 2);
    }

    #[test]
    fn resolve_failure_is_an_error_not_a_panic() {
        let (_dir, _catalog, store) = setup();
        let result = store.save_new_knowledge("unknown course entirely", "sess-1", &facts(3));
        assert!(result.is_err());
    }
}
