//! The translation unit cache: parsed files keyed by path, a queue of
//! parse/reparse/remove tasks and the pool of workers draining it.

pub mod entry;
pub mod options;
mod worker;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::analyzer::{self, AnalyzeDone, AnalyzeRequest, ProjectTally};
use crate::editor::MainThread;
use crate::frontend::translation_unit::normalize_path;
use crate::frontend::{Index, ParseFlags, UnsavedFile};
use crate::search::SearchCache;
use crate::settings::{PathContext, Settings};
use crate::workspace::views::View;

pub use entry::{LockedTranslationUnit, TuState};

pub type OnDone = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ready,
    Parsing,
    Reparsing,
    NotInCache,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Number of workers; below 1 means one per CPU.
    pub workers: i64,
    /// Delay before workers start taking tasks.
    pub startup_delay: Duration,
    /// Back-off before a task for a busy file is queued again.
    pub busy_retry_delay: Duration,
    /// Bundled include directory prepended to every file's options.
    pub clang_includes: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            workers: -1,
            startup_delay: Duration::from_millis(500),
            busy_retry_delay: Duration::from_millis(100),
            clang_includes: None,
        }
    }
}

/// Everything a parse needs, captured from the view when the task is
/// queued.
#[derive(Debug, Clone)]
pub struct ParseRequest {
    pub filename: PathBuf,
    pub opts: Vec<String>,
    pub opts_script: Option<String>,
    pub paths: PathContext,
    pub flags: ParseFlags,
    pub debug_options: bool,
}

impl ParseRequest {
    pub fn from_view(view: &View, clang_includes: Option<&Path>) -> Self {
        Self {
            filename: view.file.clone(),
            opts: options::get_opts(view, clang_includes),
            opts_script: options::get_opts_script(view),
            paths: view.paths.clone(),
            flags: ParseFlags::from_bits_truncate(view.settings.index_parse_options),
            debug_options: view.settings.debug_options,
        }
    }
}

pub(crate) enum Task {
    Parse {
        request: ParseRequest,
        on_done: Option<OnDone>,
    },
    Reparse {
        request: ParseRequest,
        unsaved: Vec<UnsavedFile>,
        on_done: Option<OnDone>,
    },
    Remove(PathBuf),
    Clear,
    Analyze {
        request: AnalyzeRequest,
        on_done: Option<AnalyzeDone>,
    },
    #[cfg(test)]
    Fail(PathBuf),
}

impl Task {
    fn filename(&self) -> Option<&Path> {
        match self {
            Task::Parse { request, .. } | Task::Reparse { request, .. } => Some(&request.filename),
            Task::Analyze { request, .. } => Some(&request.filename),
            Task::Remove(filename) => Some(filename),
            #[cfg(test)]
            Task::Fail(filename) => Some(filename),
            Task::Clear => None,
        }
    }

    /// Tasks counted in the `parsing` map while queued.
    fn is_parse(&self) -> bool {
        match self {
            Task::Parse { .. } | Task::Reparse { .. } => true,
            #[cfg(test)]
            Task::Fail(_) => true,
            _ => false,
        }
    }
}

/// A queued task. Tasks naming a file carry a ticket; a file's tasks run
/// in ticket order.
pub(crate) struct Queued {
    task: Task,
    ticket: Option<u64>,
}

/// Tickets handed out and served for one file.
#[derive(Debug, Default)]
struct Turn {
    issued: u64,
    served: u64,
}

/// Options last used for a file: the declared ones and what they expanded
/// to.
#[derive(Debug, Clone)]
struct OptionsEntry {
    declared: Vec<String>,
    script: Option<String>,
    effective: Vec<String>,
}

pub(crate) struct Inner {
    /// Locks are taken in the order tus, parsing, busy, turns.
    tus: Mutex<HashMap<PathBuf, Arc<LockedTranslationUnit>>>,
    /// Pending or running parse/reparse tasks per file.
    parsing: Mutex<HashMap<PathBuf, usize>>,
    busy: Mutex<HashSet<PathBuf>>,
    turns: Mutex<HashMap<PathBuf, Turn>>,
    opts_cache: Mutex<HashMap<PathBuf, OptionsEntry>>,
    tasks: Sender<Queued>,
    /// Tasks queued or running.
    pending: AtomicUsize,
    index: Index,
    config: CacheConfig,
    main: MainThread,
    search_cache: Arc<SearchCache>,
}

/// Shared handle to the cache.
#[derive(Clone)]
pub struct TuCache {
    inner: Arc<Inner>,
}

impl TuCache {
    pub fn new(config: CacheConfig, main: MainThread) -> Self {
        let (sender, receiver): (Sender<Queued>, Receiver<Queued>) = channel::unbounded();
        let workers = if config.workers < 1 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            config.workers as usize
        };
        let inner = Arc::new(Inner {
            tus: Mutex::new(HashMap::new()),
            parsing: Mutex::new(HashMap::new()),
            busy: Mutex::new(HashSet::new()),
            turns: Mutex::new(HashMap::new()),
            opts_cache: Mutex::new(HashMap::new()),
            tasks: sender,
            pending: AtomicUsize::new(0),
            index: Index::create(),
            config,
            main,
            search_cache: Arc::new(SearchCache::new()),
        });
        worker::spawn_workers(&inner, receiver, workers);
        Self { inner }
    }

    pub fn main_thread(&self) -> &MainThread {
        &self.inner.main
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn search_cache(&self) -> &Arc<SearchCache> {
        &self.inner.search_cache
    }

    pub fn request_for(&self, view: &View) -> ParseRequest {
        ParseRequest::from_view(view, self.inner.config.clang_includes.as_deref())
    }

    /// Queues a parse unless the file is cached or already queued.
    pub fn add(&self, view: &View, on_done: Option<OnDone>) -> bool {
        let request = self.request_for(view);
        let tus = self.inner.tus.lock();
        let mut parsing = self.inner.parsing.lock();
        if tus.contains_key(&request.filename) || parsing.contains_key(&request.filename) {
            return false;
        }
        *parsing.entry(request.filename.clone()).or_insert(0) += 1;
        drop(parsing);
        drop(tus);
        self.inner.enqueue(Task::Parse { request, on_done });
        true
    }

    /// Queues a reparse unless one is already pending for the file.
    pub fn reparse(&self, view: &View, unsaved: Vec<UnsavedFile>, on_done: Option<OnDone>) -> bool {
        let request = self.request_for(view);
        let mut parsing = self.inner.parsing.lock();
        if parsing.contains_key(&request.filename) {
            return false;
        }
        *parsing.entry(request.filename.clone()).or_insert(0) += 1;
        drop(parsing);
        self.inner.enqueue(Task::Reparse {
            request,
            unsaved,
            on_done,
        });
        true
    }

    pub fn remove(&self, filename: &Path) {
        self.inner.enqueue(Task::Remove(normalize_path(filename)));
    }

    /// Drops every entry, the options cache and the search cache.
    pub fn clear(&self) {
        self.inner.enqueue(Task::Clear);
    }

    /// Queues a static analysis of one file.
    pub fn analyze_file(&self, request: AnalyzeRequest, on_done: Option<AnalyzeDone>) {
        self.inner.enqueue(Task::Analyze { request, on_done });
    }

    /// Queues an analysis of every file under `paths.folders` with one of
    /// the `analyzer_extensions`. `on_done` gets the findings of all of
    /// them once the last one finished. Returns the number of files.
    pub fn analyze_project(
        &self,
        settings: &Settings,
        paths: &PathContext,
        on_done: Option<AnalyzeDone>,
    ) -> usize {
        let files = analyzer::project_files(&paths.folders, &settings.analyzer_extensions);
        let main = self.inner.main.clone();
        if files.is_empty() {
            main.status_message("Project analyzed");
            if let Some(on_done) = on_done {
                main.run(move || on_done(Vec::new()));
            }
            return 0;
        }

        let count = files.len();
        let tally = Arc::new(ProjectTally::new(count, on_done));
        for file in files {
            let request = AnalyzeRequest::new(settings, paths, &file);
            let tally = tally.clone();
            let main = main.clone();
            let report: AnalyzeDone = Box::new(move |findings: Vec<analyzer::Finding>| {
                if let Some((all, on_done)) = tally.record(findings) {
                    main.ui().status_message("Project analyzed");
                    if let Some(on_done) = on_done {
                        on_done(all);
                    }
                }
            });
            self.inner.enqueue(Task::Analyze {
                request,
                on_done: Some(report),
            });
        }
        count
    }

    pub fn status(&self, filename: &Path) -> Status {
        let filename = normalize_path(filename);
        let tus = self.inner.tus.lock();
        let parsing = self.inner.parsing.lock();
        match (tus.contains_key(&filename), parsing.contains_key(&filename)) {
            (true, true) => Status::Reparsing,
            (true, false) => Status::Ready,
            (false, true) => Status::Parsing,
            (false, false) => Status::NotInCache,
        }
    }

    /// The cached entry for a file, without parsing.
    pub fn cached(&self, filename: &Path) -> Option<Arc<LockedTranslationUnit>> {
        self.inner.tus.lock().get(&normalize_path(filename)).cloned()
    }

    /// The entry for a file, parsed inline when absent. When the file is
    /// cached with other options the entry is evicted, a parse is queued
    /// and the old entry is returned for this one call.
    pub fn get_translation_unit(
        &self,
        request: &ParseRequest,
        unsaved: &[UnsavedFile],
    ) -> Option<Arc<LockedTranslationUnit>> {
        self.inner.get_translation_unit(request, unsaved)
    }

    /// Convenience over [`TuCache::get_translation_unit`] for a view.
    pub fn get_for_view(&self, view: &View) -> Option<Arc<LockedTranslationUnit>> {
        self.get_translation_unit(&self.request_for(view), &view.unsaved_files())
    }

    pub fn len(&self) -> usize {
        self.inner.tus.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Files with a pending or running parse or reparse.
    pub fn parsing(&self) -> Vec<PathBuf> {
        self.inner.parsing.lock().keys().cloned().collect()
    }

    /// Files a worker is handling right now.
    pub fn busy(&self) -> Vec<PathBuf> {
        self.inner.busy.lock().iter().cloned().collect()
    }

    /// No task queued or running.
    pub fn is_idle(&self) -> bool {
        self.inner.pending.load(Ordering::SeqCst) == 0 && self.inner.parsing.lock().is_empty()
    }
}

impl Inner {
    fn enqueue(&self, task: Task) {
        let ticket = task.filename().map(|filename| {
            let mut turns = self.turns.lock();
            let turn = turns.entry(filename.to_path_buf()).or_default();
            turn.issued += 1;
            turn.issued - 1
        });
        self.requeue(Queued { task, ticket });
    }

    /// Puts a task at the tail of the queue, keeping its ticket.
    fn requeue(&self, queued: Queued) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tasks.send(queued).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("Task queue is closed");
        }
    }

    fn analyze(&self, request: &AnalyzeRequest, on_done: Option<AnalyzeDone>) {
        let name = request.filename.display().to_string();
        self.main.status_message(format!("Analyzing {}", name));
        let findings = match analyzer::run(request) {
            Ok(findings) => findings,
            Err(e) => {
                warn!("{}", e);
                Vec::new()
            }
        };
        for finding in &findings {
            info!("{}", finding);
        }
        self.main.status_message(format!("Analyzing {} done", name));
        if let Some(on_done) = on_done {
            self.main.run(move || on_done(findings));
        }
    }

    fn get_translation_unit(
        &self,
        request: &ParseRequest,
        unsaved: &[UnsavedFile],
    ) -> Option<Arc<LockedTranslationUnit>> {
        let filename = &request.filename;
        {
            let mut tus = self.tus.lock();
            if let Some(existing) = tus.get(filename).cloned() {
                if existing.matches(&request.opts, request.opts_script.as_deref()) {
                    return Some(existing);
                }
                debug!("Options of {} changed; parsing again", filename.display());
                tus.remove(filename);
                let mut parsing = self.parsing.lock();
                *parsing.entry(filename.clone()).or_insert(0) += 1;
                drop(parsing);
                drop(tus);
                self.opts_cache.lock().remove(filename);
                self.enqueue(Task::Parse {
                    request: request.clone(),
                    on_done: None,
                });
                return Some(existing);
            }
        }

        let effective = self.effective_options(request);
        match self.index.parse(filename, &effective, unsaved, request.flags) {
            Ok(tu) => {
                let entry = Arc::new(LockedTranslationUnit::new(
                    filename.clone(),
                    tu,
                    request.opts.clone(),
                    request.opts_script.clone(),
                ));
                self.tus.lock().insert(filename.clone(), entry.clone());
                Some(entry)
            }
            Err(e) => {
                warn!("Failed to parse {}: {}", filename.display(), e);
                None
            }
        }
    }

    /// Effective options for a request, reusing the last expansion when the
    /// declared options did not change.
    fn effective_options(&self, request: &ParseRequest) -> Vec<String> {
        if let Some(cached) = self.opts_cache.lock().get(&request.filename) {
            if cached.declared == request.opts && cached.script == request.opts_script {
                return cached.effective.clone();
            }
        }
        let effective = options::effective_options(
            &request.opts,
            request.opts_script.as_deref(),
            &request.filename,
            &request.paths,
            request.debug_options,
        );
        self.opts_cache.lock().insert(
            request.filename.clone(),
            OptionsEntry {
                declared: request.opts.clone(),
                script: request.opts_script.clone(),
                effective: effective.clone(),
            },
        );
        effective
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::LogUi;
    use crate::settings::Settings;
    use std::fs;
    use std::time::Instant;

    fn cache(workers: i64) -> TuCache {
        delayed_cache(workers, Duration::ZERO)
    }

    fn delayed_cache(workers: i64, startup_delay: Duration) -> TuCache {
        let (main, _handle) = MainThread::spawn(Arc::new(LogUi));
        TuCache::new(
            CacheConfig {
                workers,
                startup_delay,
                busy_retry_delay: Duration::from_millis(10),
                clang_includes: None,
            },
            main,
        )
    }

    fn wait_idle(cache: &TuCache) {
        let start = Instant::now();
        while !cache.is_idle() {
            assert!(start.elapsed() < Duration::from_secs(20), "cache never became idle");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn view(path: &Path) -> View {
        View::new(path, None, Settings::default(), vec![])
    }

    #[test]
    fn add_twice_parses_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.cpp");
        fs::write(&file, "int a;\n").expect("write");
        let cache = cache(2);
        let v = view(&file);
        assert!(cache.add(&v, None));
        assert!(!cache.add(&v, None));
        wait_idle(&cache);
        assert_eq!(cache.status(&file), Status::Ready);
        assert!(!cache.add(&v, None));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn reparse_is_not_queued_twice() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.cpp");
        fs::write(&file, "int a;\n").expect("write");
        let cache = delayed_cache(1, Duration::from_millis(300));
        let v = view(&file);
        assert!(cache.get_for_view(&v).is_some());
        assert!(cache.reparse(&v, vec![UnsavedFile::new(&file, "int b;\n")], None));
        assert!(!cache.reparse(&v, vec![], None));
        wait_idle(&cache);
        let entry = cache.cached(&file).expect("cached");
        let state = entry.lock();
        assert_eq!(state.tu.file_text(&file), Some("int b;\n"));
        assert!(!state.symbols().complete_startswith("b").is_empty());
    }

    #[test]
    fn option_change_evicts_and_reparses() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.cpp");
        fs::write(&file, "int a;\n").expect("write");
        let cache = cache(1);
        let mut v = view(&file);
        let first = cache.get_for_view(&v).expect("parsed");
        assert!(Arc::ptr_eq(&first, &cache.get_for_view(&v).expect("cached")));

        v.settings.options = vec!["-DCHANGED".into()];
        let stale = cache.get_for_view(&v).expect("old entry");
        assert!(Arc::ptr_eq(&first, &stale));
        wait_idle(&cache);
        let fresh = cache.cached(&file).expect("reparsed");
        assert!(fresh.declared_options().contains(&"-DCHANGED".to_string()));
    }

    #[test]
    fn remove_and_clear() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.cpp");
        let b = dir.path().join("b.cpp");
        fs::write(&a, "int a;\n").expect("write");
        fs::write(&b, "int b;\n").expect("write");
        let cache = cache(2);
        cache.add(&view(&a), None);
        cache.add(&view(&b), None);
        wait_idle(&cache);
        assert_eq!(cache.len(), 2);
        assert!(cache.inner.opts_cache.lock().contains_key(&a));
        cache.remove(&a);
        wait_idle(&cache);
        assert_eq!(cache.status(&a), Status::NotInCache);
        assert!(!cache.inner.opts_cache.lock().contains_key(&a));
        assert_eq!(cache.status(&b), Status::Ready);
        cache.clear();
        wait_idle(&cache);
        assert!(cache.is_empty());
    }

    #[test]
    fn failed_parse_leaves_no_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.cpp");
        let cache = cache(1);
        let (tx, rx) = channel::bounded(1);
        assert!(cache.add(
            &view(&missing),
            Some(Box::new(move || {
                let _ = tx.send(());
            }))
        ));
        rx.recv_timeout(Duration::from_secs(20)).expect("on_done ran");
        wait_idle(&cache);
        assert_eq!(cache.status(&missing), Status::NotInCache);
    }

    #[test]
    fn tasks_for_one_file_run_once_in_queue_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.cpp");
        fs::write(&file, "int a;\n").expect("write");
        let cache = cache(3);
        let v = view(&file);
        let ran = Arc::new(Mutex::new(Vec::new()));

        // every task finds the file taken and goes round the queue
        cache.inner.busy.lock().insert(file.clone());
        for i in 0..4 {
            let ran = ran.clone();
            cache.inner.enqueue(Task::Reparse {
                request: cache.request_for(&v),
                unsaved: vec![UnsavedFile::new(&file, format!("int v{};\n", i))],
                on_done: Some(Box::new(move || ran.lock().push(i))),
            });
        }
        std::thread::sleep(Duration::from_millis(100));
        assert!(ran.lock().is_empty());
        assert_eq!(cache.busy(), vec![file.clone()]);

        cache.inner.busy.lock().remove(&file);
        wait_idle(&cache);
        cache.main_thread().flush();
        assert_eq!(*ran.lock(), vec![0, 1, 2, 3]);
        assert!(cache.busy().is_empty());
        assert!(cache.inner.turns.lock().is_empty());
        let entry = cache.cached(&file).expect("cached");
        assert_eq!(entry.lock().tu.file_text(&file), Some("int v3;\n"));
    }

    #[test]
    fn panicking_task_releases_the_file_and_the_worker_goes_on() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.cpp");
        fs::write(&file, "int a;\n").expect("write");
        let cache = cache(1);

        *cache.inner.parsing.lock().entry(file.clone()).or_insert(0) += 1;
        cache.inner.enqueue(Task::Fail(file.clone()));
        wait_idle(&cache);
        assert!(cache.busy().is_empty());
        assert!(cache.parsing().is_empty());
        assert_eq!(cache.status(&file), Status::NotInCache);

        let (tx, rx) = channel::bounded(1);
        assert!(cache.add(
            &view(&file),
            Some(Box::new(move || {
                let _ = tx.send(());
            }))
        ));
        rx.recv_timeout(Duration::from_secs(20)).expect("on_done ran");
        wait_idle(&cache);
        assert_eq!(cache.status(&file), Status::Ready);
    }

    const REPORT: &str = "<plist version=\"1.0\"><dict>
<key>diagnostics</key><array><dict>
<key>description</key><string>Division by zero</string>
<key>location</key><dict><key>line</key><integer>3</integer><key>col</key><integer>12</integer><key>file</key><integer>0</integer></dict>
</dict></array>
<key>files</key><array><string>/src/math.c</string></array>
</dict></plist>
";

    #[test]
    fn project_analysis_reports_every_file_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("one.plist"), REPORT).expect("write");
        fs::write(dir.path().join("two.plist"), REPORT).expect("write");
        fs::write(dir.path().join("skipped.txt"), REPORT).expect("write");
        let settings = Settings {
            analyzer_commandline: vec!["cat".to_string()],
            analyzer_extensions: vec!["plist".to_string()],
            ..Settings::default()
        };
        let paths = PathContext {
            folders: vec![dir.path().to_path_buf()],
            this_file: None,
        };
        let cache = cache(2);
        let (tx, rx) = channel::bounded(1);
        let files = cache.analyze_project(
            &settings,
            &paths,
            Some(Box::new(move |findings: Vec<analyzer::Finding>| {
                let _ = tx.send(findings);
            })),
        );
        assert_eq!(files, 2);
        let findings = rx.recv_timeout(Duration::from_secs(20)).expect("analysis finished");
        let lines: Vec<String> = findings.iter().map(|f| f.to_string()).collect();
        assert_eq!(lines, vec!["/src/math.c:3:12 - Division by zero"; 2]);

        let (tx, rx) = channel::bounded(1);
        let request = AnalyzeRequest::new(&settings, &paths, &dir.path().join("one.plist"));
        cache.analyze_file(
            request,
            Some(Box::new(move |findings: Vec<analyzer::Finding>| {
                let _ = tx.send(findings.len());
            })),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(20)).expect("analysis finished"), 1);
    }
}
