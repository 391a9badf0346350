use anyhow::Result;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, DebouncedEventKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::TuCache;
use crate::config;
use crate::workspace::views::ViewRegistry;
use crate::workspace::walker;

/// Watches the workspace folders for files written or deleted behind the
/// editor's back. Returns a handle that keeps the watcher alive; drop it
/// to stop watching.
pub fn start_watcher(folders: &[PathBuf], cache: TuCache, views: Arc<ViewRegistry>) -> Result<WatcherHandle> {
    let roots = folders.to_vec();
    let roots_for_handler = roots.clone();

    let mut debouncer = new_debouncer(
        Duration::from_millis(500),
        move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
            Ok(events) => handle_events(&roots_for_handler, &cache, &views, events),
            Err(e) => warn!("Filesystem watcher error: {}", e),
        },
    )?;

    for root in &roots {
        debouncer
            .watcher()
            .watch(root, notify::RecursiveMode::Recursive)?;
        info!("Filesystem watcher started for {}", root.display());
    }

    Ok(WatcherHandle {
        _debouncer: Some(debouncer),
    })
}

pub struct WatcherHandle {
    _debouncer: Option<notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>>,
}

fn handle_events(roots: &[PathBuf], cache: &TuCache, views: &ViewRegistry, events: Vec<DebouncedEvent>) {
    for event in events {
        let path = &event.path;
        let Some(rel_path) = walker::containing_folder(roots, path)
            .and_then(|root| path.strip_prefix(root).ok())
            .map(|r| r.to_string_lossy().replace('\\', "/"))
        else {
            continue;
        };
        if config::should_skip(&rel_path) || !config::is_c_family(&rel_path) {
            continue;
        }

        match event.kind {
            DebouncedEventKind::Any => {
                if path.is_file() {
                    handle_file_saved(cache, views, path);
                } else if !path.exists() {
                    handle_file_delete(cache, path);
                }
            }
            // a final Any follows
            DebouncedEventKind::AnyContinuous => {}
            _ => {}
        }
    }
}

/// A file written on disk is reparsed if it is cached, open and the view
/// asks for reparses on save.
pub fn handle_file_saved(cache: &TuCache, views: &ViewRegistry, path: &Path) -> bool {
    let Some(view) = views.get(path) else {
        return false;
    };
    if !view.settings.reparse_on_save || cache.cached(&view.file).is_none() {
        return false;
    }
    debug!("{} changed on disk, reparsing", view.file.display());
    cache.reparse(&view, view.unsaved_files(), None)
}

/// A deleted file leaves the cache.
pub fn handle_file_delete(cache: &TuCache, path: &Path) {
    if cache.cached(path).is_some() {
        cache.remove(path);
        debug!("Removed {} from the cache", path.display());
    }
}
