use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::path::{Path, PathBuf};

use crate::frontend::translation_unit::normalize_path;
use crate::frontend::UnsavedFile;
use crate::settings::{PathContext, Settings};
use crate::workspace::language::Language;

/// An open editor view: one file, its effective settings and the buffer
/// contents when they differ from disk.
#[derive(Debug, Clone)]
pub struct View {
    pub id: String,
    pub file: PathBuf,
    pub language: Language,
    pub settings: Settings,
    pub paths: PathContext,
    pub buffer: Option<String>,
    pub last_modified: DateTime<Utc>,
}

impl View {
    pub fn new(file: &Path, language: Option<Language>, settings: Settings, folders: Vec<PathBuf>) -> Self {
        let file = normalize_path(file);
        let language = language
            .or_else(|| Language::from_path(&file))
            .unwrap_or(Language::Cpp);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            paths: PathContext {
                folders,
                this_file: Some(file.clone()),
            },
            file,
            language,
            settings,
            buffer: None,
            last_modified: Utc::now(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.buffer.is_some()
    }

    /// The dirty buffer as an unsaved file, if any.
    pub fn unsaved_files(&self) -> Vec<UnsavedFile> {
        self.buffer
            .as_ref()
            .map(|b| vec![UnsavedFile::new(&self.file, b.clone())])
            .unwrap_or_default()
    }

    /// Current text: the dirty buffer or the file on disk.
    pub fn text(&self) -> std::io::Result<String> {
        match &self.buffer {
            Some(b) => Ok(b.clone()),
            None => std::fs::read_to_string(&self.file),
        }
    }
}

/// Open views keyed by file.
#[derive(Default)]
pub struct ViewRegistry {
    views: DashMap<PathBuf, View>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, view: View) -> View {
        self.views.insert(view.file.clone(), view.clone());
        view
    }

    pub fn get(&self, file: &Path) -> Option<View> {
        self.views.get(&normalize_path(file)).map(|v| v.value().clone())
    }

    pub fn close(&self, file: &Path) -> Option<View> {
        self.views.remove(&normalize_path(file)).map(|(_, v)| v)
    }

    /// Records new buffer contents; returns the updated view.
    pub fn modify(&self, file: &Path, buffer: String) -> Option<View> {
        let mut view = self.views.get_mut(&normalize_path(file))?;
        view.buffer = Some(buffer);
        view.last_modified = Utc::now();
        Some(view.clone())
    }

    /// The buffer now matches the file on disk.
    pub fn saved(&self, file: &Path) -> Option<View> {
        let mut view = self.views.get_mut(&normalize_path(file))?;
        view.buffer = None;
        Some(view.clone())
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_track_dirty_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.mm");
        std::fs::write(&file, "int x;").expect("write");
        let registry = ViewRegistry::new();
        let view = registry.open(View::new(&file, None, Settings::default(), vec![]));
        assert_eq!(view.language, Language::ObjCpp);
        assert!(!view.is_dirty());
        assert_eq!(view.text().expect("text"), "int x;");

        let view = registry.modify(&file, "int y;".into()).expect("modified");
        assert!(view.is_dirty());
        assert_eq!(view.unsaved_files().len(), 1);
        assert_eq!(view.text().expect("text"), "int y;");

        assert!(!registry.saved(&file).expect("saved").is_dirty());
        assert!(registry.close(&file).is_some());
        assert!(registry.is_empty());
    }
}
