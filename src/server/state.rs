use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheConfig, TuCache};
use crate::editor::MainThread;
use crate::server::errors::AppError;
use crate::server::jobs::{Jobs, Messages, Prompts, ServerUi};
use crate::settings::Settings;
use crate::workspace::language::Language;
use crate::workspace::views::{View, ViewRegistry};
use crate::workspace::watcher;

/// Shared application state, wrapped in Arc for axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub cache: TuCache,
    pub views: Arc<ViewRegistry>,
    /// Settings loaded at startup; views override them key by key.
    pub settings: Settings,
    pub folders: Vec<PathBuf>,
    pub jobs: Arc<Jobs>,
    pub prompts: Arc<Prompts>,
    pub messages: Arc<Messages>,
    /// Edit generation per file; a debounced reparse only runs when no
    /// later edit arrived.
    pub generations: DashMap<PathBuf, u64>,
    next_generation: AtomicU64,
    // Held alive to keep the filesystem watcher running.
    #[allow(dead_code)]
    watcher: Mutex<Option<watcher::WatcherHandle>>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Starts the editor thread, the cache workers and the watcher over
    /// `folders`. The handle is the editor thread's.
    pub fn new(settings: Settings, folders: Vec<PathBuf>, config: CacheConfig) -> (Self, JoinHandle<()>) {
        let prompts = Arc::new(Prompts::new());
        let messages = Arc::new(Messages::new());
        let ui = Arc::new(ServerUi::new(prompts.clone(), messages.clone()));
        let (main, handle) = MainThread::spawn(ui);
        let cache = TuCache::new(config, main);
        let views = Arc::new(ViewRegistry::new());

        let watcher = if folders.is_empty() {
            None
        } else {
            match watcher::start_watcher(&folders, cache.clone(), views.clone()) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("Filesystem watcher not started: {}", e);
                    None
                }
            }
        };

        let state = Self {
            inner: Arc::new(AppStateInner {
                cache,
                views,
                settings,
                folders,
                jobs: Arc::new(Jobs::new()),
                prompts,
                messages,
                generations: DashMap::new(),
                next_generation: AtomicU64::new(1),
                watcher: Mutex::new(watcher),
                started_at: Utc::now(),
            }),
        };
        (state, handle)
    }

    pub fn cache(&self) -> &TuCache {
        &self.inner.cache
    }

    /// Registers a view with the startup settings plus `overrides`.
    pub fn open_view(
        &self,
        file: &Path,
        language: Option<&str>,
        overrides: &serde_json::Value,
    ) -> Result<View, AppError> {
        let language = match language {
            Some(name) => Some(
                Language::from_syntax(name)
                    .ok_or_else(|| AppError::BadRequest(format!("Unsupported language '{}'", name)))?,
            ),
            None => None,
        };
        if language.is_none() && Language::from_path(file).is_none() {
            return Err(AppError::BadRequest(format!(
                "'{}' is not a C-family file",
                file.display()
            )));
        }
        let settings = self.inner.settings.with_overrides(overrides)?;
        let view = View::new(file, language, settings, self.inner.folders.clone());
        info!("Opened view {} ({})", view.file.display(), view.language.as_flag());
        Ok(self.inner.views.open(view))
    }

    pub fn require_view(&self, file: &Path) -> Result<View, AppError> {
        self.inner
            .views
            .get(file)
            .ok_or_else(|| AppError::NotFound(format!("No open view for '{}'", file.display())))
    }

    /// Records an edit. With `reparse_use_dirty_buffer` a reparse follows
    /// once no further edit arrived for `recompile_delay` milliseconds.
    pub fn buffer_modified(&self, file: &Path, buffer: String) -> Result<View, AppError> {
        let view = self
            .inner
            .views
            .modify(file, buffer)
            .ok_or_else(|| AppError::NotFound(format!("No open view for '{}'", file.display())))?;
        if !view.settings.reparse_use_dirty_buffer {
            return Ok(view);
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        self.inner.generations.insert(view.file.clone(), generation);
        let delay = Duration::from_millis(view.settings.recompile_delay);
        let state = self.clone();
        let file = view.file.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let latest = state.inner.generations.get(&file).map(|g| *g);
            if latest != Some(generation) {
                return;
            }
            state.inner.generations.remove(&file);
            if let Some(view) = state.inner.views.get(&file) {
                debug!("Reparsing {} after edits", file.display());
                state.inner.cache.reparse(&view, view.unsaved_files(), None);
            }
        });
        Ok(view)
    }
}
