use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::DocError;
use crate::types::{DocKind, ElementId};

/// What an element is known to do, per action kind. Empty means unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementDoc {
    #[serde(default)]
    pub tap: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub v_swipe: String,
    #[serde(default)]
    pub h_swipe: String,
    #[serde(default)]
    pub long_press: String,
}

impl ElementDoc {
    pub fn get(&self, kind: DocKind) -> &str {
        match kind {
            DocKind::Tap => &self.tap,
            DocKind::Text => &self.text,
            DocKind::VSwipe => &self.v_swipe,
            DocKind::HSwipe => &self.h_swipe,
            DocKind::LongPress => &self.long_press,
        }
    }

    fn slot(&mut self, kind: DocKind) -> &mut String {
        match kind {
            DocKind::Tap => &mut self.tap,
            DocKind::Text => &mut self.text,
            DocKind::VSwipe => &mut self.v_swipe,
            DocKind::HSwipe => &mut self.h_swipe,
            DocKind::LongPress => &mut self.long_press,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Written,
    /// The slot was already populated; nothing changed on disk.
    AlreadyDocumented,
}

/// Element documentation, one JSON file per element id.
#[derive(Debug, Clone)]
pub struct DocStore {
    dir: PathBuf,
}

impl DocStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, id: &ElementId) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(id)))
    }

    pub fn load(&self, id: &ElementId) -> Result<Option<ElementDoc>, DocError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let file = std::fs::File::open(&path).map_err(|source| DocError::Io {
            path: path.clone(),
            source,
        })?;
        let reader = BufReader::new(file);
        let doc = serde_json::from_reader(reader).map_err(|source| DocError::Json { path, source })?;
        Ok(Some(doc))
    }

    /// Fill one slot of an element's record. Populated slots are never overwritten.
    pub fn merge(&self, id: &ElementId, kind: DocKind, text: &str) -> Result<MergeOutcome, DocError> {
        let mut doc = self.load(id)?.unwrap_or_default();
        let slot = doc.slot(kind);
        if !slot.is_empty() {
            warn!(element = %id, kind = kind.as_str(), "documentation already exists, keeping it");
            return Ok(MergeOutcome::AlreadyDocumented);
        }
        *slot = text.to_string();
        self.save(id, &doc)?;
        info!(element = %id, kind = kind.as_str(), "documentation saved");
        Ok(MergeOutcome::Written)
    }

    /// Write through a temp file and rename, so a record is either old or new.
    fn save(&self, id: &ElementId, doc: &ElementDoc) -> Result<(), DocError> {
        let io = |path: &Path| {
            let path = path.to_path_buf();
            move |source| DocError::Io { path, source }
        };
        std::fs::create_dir_all(&self.dir).map_err(io(&self.dir))?;

        let path = self.path_for(id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(doc).map_err(|source| DocError::Json {
            path: path.clone(),
            source,
        })?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .map_err(io(&tmp))?;
        file.write_all(&body).map_err(io(&tmp))?;
        file.sync_all().map_err(io(&tmp))?;
        std::fs::rename(&tmp, &path).map_err(io(&path))?;
        Ok(())
    }
}

/// Ids come from resource names and may contain path separators.
fn file_stem(id: &ElementId) -> String {
    id.as_str()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_fills_empty_slot_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocStore::new(dir.path().join("auto_docs"));
        let id = ElementId::from("btn_42");

        assert_eq!(store.load(&id).unwrap(), None);
        assert_eq!(
            store.merge(&id, DocKind::Tap, "Opens settings.").unwrap(),
            MergeOutcome::Written
        );
        assert_eq!(
            store.merge(&id, DocKind::Tap, "Something else.").unwrap(),
            MergeOutcome::AlreadyDocumented
        );

        let doc = store.load(&id).unwrap().unwrap();
        assert_eq!(doc.tap, "Opens settings.");
        assert_eq!(doc.get(DocKind::LongPress), "");
    }

    #[test]
    fn merging_same_entry_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocStore::new(dir.path());
        let id = ElementId::from("list");

        store.merge(&id, DocKind::VSwipe, "Scrolls the list.").unwrap();
        let first = std::fs::read(store.path_for(&id)).unwrap();
        store.merge(&id, DocKind::VSwipe, "Scrolls the list.").unwrap();
        let second = std::fs::read(store.path_for(&id)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn other_slots_merge_into_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocStore::new(dir.path());
        let id = ElementId::from("pager");

        store.merge(&id, DocKind::HSwipe, "Switches tabs.").unwrap();
        store.merge(&id, DocKind::Tap, "Selects the tab.").unwrap();
        let doc = store.load(&id).unwrap().unwrap();
        assert_eq!(doc.h_swipe, "Switches tabs.");
        assert_eq!(doc.tap, "Selects the tab.");
        assert!(!store.path_for(&id).with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocStore::new(dir.path());
        let id = ElementId::from("broken");
        std::fs::write(store.path_for(&id), "{not json").unwrap();
        assert!(matches!(
            store.merge(&id, DocKind::Tap, "x"),
            Err(DocError::Json { .. })
        ));
    }

    #[test]
    fn ids_with_separators_stay_in_store_dir() {
        let store = DocStore::new("/tmp/docs");
        let path = store.path_for(&ElementId::from("a/b:c"));
        assert_eq!(path, PathBuf::from("/tmp/docs/a_b_c.json"));
    }
}
