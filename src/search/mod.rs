//! Extensive search: when a declaration's implementation (or a
//! definition's declaration) is not part of the current translation unit,
//! scan the workspace for matching signatures, most similar file names
//! first, and confirm hits by parsing the candidate files.

pub mod queue;
pub mod status;

use dashmap::DashMap;
use parking_lot::Mutex;
use regex::Regex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::cache::{ParseRequest, Status, TuCache};
use crate::config;
use crate::error::{Error, Result};
use crate::frontend::format_cursor;
use crate::frontend::translation_unit::normalize_path;
use crate::goto::{GotoCallback, GotoTarget};
use crate::parsehelp;
use crate::settings::PathContext;
use crate::workspace::walker;

use queue::{SearchQueue, Token, SCAN_PRIORITY, STOP_PRIORITY};
use status::StatusThrottle;

/// Workers give up after this long without a token.
pub const QUEUE_TIMEOUT: Duration = Duration::from_secs(60);

const IMPLEMENTATION_FILES: &str = r"(\.cpp|\.c|\.cc|\.m|\.mm)$";
const DECLARATION_FILES: &str = r"(\.h|\.hpp)$";

/// Identity of a search. Two searches with equal keys share a result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchKey {
    pub origin: Option<String>,
    pub spelling: String,
    pub file_regex: String,
    pub signature_regex: String,
    pub implementation: bool,
    pub folders: Vec<PathBuf>,
}

/// Results of finished searches for the lifetime of the process. `None`
/// records a search that found nothing.
#[derive(Default)]
pub struct SearchCache {
    results: DashMap<SearchKey, Option<GotoTarget>>,
}

impl SearchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &SearchKey) -> Option<Option<GotoTarget>> {
        self.results.get(key).map(|r| r.value().clone())
    }

    /// Stores a result unless the key already has one. Returns whether it
    /// was stored.
    pub fn insert(&self, key: SearchKey, result: Option<GotoTarget>) -> bool {
        match self.results.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(result);
                true
            }
        }
    }

    pub fn clear(&self) {
        self.results.clear();
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// What to look for and where.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// `file:line:col` of the canonical declaration the search started
    /// from, if the front end knew one.
    pub origin: Option<String>,
    pub spelling: String,
    /// File the search was started from; candidates with a similar name
    /// are searched first.
    pub origin_file: PathBuf,
    pub folders: Vec<PathBuf>,
    /// Looking for an implementation (true) or a declaration.
    pub implementation: bool,
    /// Options candidate files are parsed with.
    pub parse: ParseRequest,
}

/// Signature regex for `spelling`. Group 1 is the signature, group 2
/// starts at the name.
pub fn signature_regex(spelling: &str, implementation: bool) -> Result<Regex, regex::Error> {
    let terminator = if implementation { r"\{" } else { ";" };
    Regex::new(&format!(
        r"(\w+[\*&\s]+(?:\w+::)?({}\s*\([^;\{{]*\))(?:\s*const)?)\s*{}",
        regex::escape(spelling),
        terminator
    ))
}

pub fn file_regex(implementation: bool) -> Result<Regex, regex::Error> {
    Regex::new(if implementation {
        IMPLEMENTATION_FILES
    } else {
        DECLARATION_FILES
    })
}

pub struct ExtensiveSearch {
    cache: TuCache,
    key: SearchKey,
    request: SearchRequest,
    signature_regex: Regex,
    file_regex: Regex,
    queue: SearchQueue,
    status: StatusThrottle,
    candidates: Mutex<Vec<(String, String)>>,
    target: Mutex<Option<String>>,
    finished: AtomicBool,
    workers_left: AtomicUsize,
    callback: Mutex<Option<GotoCallback>>,
}

impl ExtensiveSearch {
    /// Asks the user whether to search. A known exact hit is reported
    /// straight away; known candidates are offered next to the choice of
    /// searching again.
    pub fn start(cache: &TuCache, request: SearchRequest, callback: GotoCallback) {
        let main = cache.main_thread().clone();
        let (signature_regex, file_regex) = match (
            signature_regex(&request.spelling, request.implementation),
            file_regex(request.implementation),
        ) {
            (Ok(s), Ok(f)) => (s, f),
            (Err(e), _) | (_, Err(e)) => {
                error!("Invalid search regex for {}: {}", request.spelling, e);
                main.run(move || callback(None));
                return;
            }
        };
        let key = SearchKey {
            origin: request.origin.clone(),
            spelling: request.spelling.clone(),
            file_regex: file_regex.as_str().to_string(),
            signature_regex: signature_regex.as_str().to_string(),
            implementation: request.implementation,
            folders: request.folders.clone(),
        };

        let mut options = vec![
            vec!["Yes".to_string(), "Do extensive search".to_string()],
            vec!["No".to_string(), "Don't do extensive search".to_string()],
        ];
        let mut previous = Vec::new();
        if let Some(known) = cache.search_cache().get(&key) {
            options = vec![
                vec!["Redo search".to_string(), "Redo extensive search".to_string()],
                vec!["Don't redo".to_string(), "Don't redo extensive search".to_string()],
            ];
            match known {
                Some(GotoTarget::Location(location)) => {
                    main.run(move || callback(Some(GotoTarget::Location(location))));
                    return;
                }
                Some(GotoTarget::Candidates(candidates)) => {
                    options.extend(candidates.iter().map(|(sig, loc)| vec![sig.clone(), loc.clone()]));
                    previous = candidates;
                }
                None => {}
            }
        }

        let search = Arc::new(ExtensiveSearch {
            cache: cache.clone(),
            key,
            request,
            signature_regex,
            file_regex,
            queue: SearchQueue::new(),
            status: StatusThrottle::new(main.clone()),
            candidates: Mutex::new(Vec::new()),
            target: Mutex::new(None),
            finished: AtomicBool::new(false),
            workers_left: AtomicUsize::new(0),
            callback: Mutex::new(Some(callback)),
        });
        main.show_quick_panel(
            options,
            Box::new(move |choice| match choice {
                Some(0) => search.run(),
                Some(n) if n >= 2 => {
                    let location = previous.get(n - 2).map(|(_, loc)| loc.clone());
                    search.respond(location.map(GotoTarget::Location));
                }
                _ => search.respond(None),
            }),
        );
    }

    fn respond(&self, result: Option<GotoTarget>) {
        if let Some(callback) = self.callback.lock().take() {
            self.cache.main_thread().run(move || callback(result));
        }
    }

    fn run(self: Arc<Self>) {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.workers_left.store(workers, Ordering::SeqCst);
        self.queue.push(SCAN_PRIORITY, Token::Scan);
        for _ in 0..workers {
            let search = self.clone();
            std::thread::spawn(move || search.worker(workers));
        }
    }

    fn worker(&self, workers: usize) {
        while !self.finished.load(Ordering::SeqCst) {
            let Some(token) = self.queue.pop(QUEUE_TIMEOUT) else {
                debug!("Search for {} timed out", self.request.spelling);
                break;
            };
            match token {
                Token::Scan => self.scan(workers),
                Token::Stop => break,
                Token::File(path) => {
                    match catch_unwind(AssertUnwindSafe(|| self.search_file(&path))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => debug!("Skipping {}: {}", path.display(), e),
                        Err(_) => error!("Search of {} panicked", path.display()),
                    }
                }
            }
        }
        if self.workers_left.fetch_sub(1, Ordering::SeqCst) == 1 && !self.finished.swap(true, Ordering::SeqCst) {
            self.finish();
        }
    }

    /// Queues every candidate file, then one stop token per worker.
    fn scan(&self, workers: usize) {
        self.cache.main_thread().status_message(format!(
            "Searching for {}...",
            if self.request.implementation {
                "implementation"
            } else {
                "definition"
            }
        ));
        let origin = base_name(&self.request.origin_file);
        let files = walker::matching_files(&self.request.folders, &self.file_regex, config::DEFAULT_MAX_FILE_SIZE);
        for file in files {
            let priority = queue::similarity_priority(&base_name(&file), &origin);
            self.queue.push(priority, Token::File(file));
        }
        for _ in 0..workers {
            self.queue.push(STOP_PRIORITY, Token::Stop);
        }
    }

    fn search_file(&self, path: &Path) -> Result<()> {
        let path = normalize_path(path);
        let was_cached = self.cache.status(&path) != Status::NotInCache;
        self.status.update(format!("Searching {}", path.display()));

        let text = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let mut matches = Vec::new();
        for caps in self.signature_regex.captures_iter(&text) {
            let (Some(signature), Some(name)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let (line, column) = parsehelp::get_line_and_column(&text, name.start());
            matches.push((line as u32, column as u32, signature.as_str().to_string()));
        }
        if matches.is_empty() {
            return Ok(());
        }
        self.candidates.lock().extend(
            matches
                .iter()
                .map(|(line, column, sig)| (sig.clone(), format!("{}:{}:{}", path.display(), line, column))),
        );

        if let (Some(origin), true) = (&self.request.origin, self.request.implementation) {
            if let Some(target) = self.confirm(&path, origin, &matches) {
                *self.target.lock() = Some(target);
                if !self.finished.swap(true, Ordering::SeqCst) {
                    self.finish();
                }
            }
            if !was_cached {
                self.cache.remove(&path);
            }
        }
        Ok(())
    }

    /// Parses a candidate file and checks whether one of the matches is a
    /// definition of the declaration the search started from.
    fn confirm(&self, path: &Path, origin: &str, matches: &[(u32, u32, String)]) -> Option<String> {
        let request = ParseRequest {
            filename: path.to_path_buf(),
            paths: PathContext {
                folders: self.request.folders.clone(),
                this_file: Some(path.to_path_buf()),
            },
            ..self.request.parse.clone()
        };
        let entry = self.cache.get_translation_unit(&request, &[])?;
        let state = entry.lock();
        for (line, column, _) in matches {
            let Some(cursor) = state.tu.get_cursor(path, *line, *column) else {
                continue;
            };
            let canonical = cursor.canonical();
            if canonical != cursor && format_cursor(&canonical) == origin {
                return Some(format_cursor(&cursor));
            }
        }
        None
    }

    /// Publishes the result once: the confirmed target if there is one,
    /// otherwise every text match.
    fn finish(&self) {
        self.status.flush();
        let result = match self.target.lock().clone() {
            Some(target) => Some(GotoTarget::Location(target)),
            None => {
                let candidates = std::mem::take(&mut *self.candidates.lock());
                (!candidates.is_empty()).then_some(GotoTarget::Candidates(candidates))
            }
        };
        info!("Extensive search for {} finished: {:?}", self.request.spelling, result);
        self.cache.search_cache().insert(self.key.clone(), result.clone());
        self.respond(result);
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_regex_finds_definitions_only() {
        let re = signature_regex("draw", true).expect("regex");
        let text = "void Widget::draw(int x) const {\n}\nvoid draw();\nint undraw(int) {}\n";
        let caps: Vec<(String, usize)> = re
            .captures_iter(text)
            .map(|c| (c[1].to_string(), c.get(2).map(|m| m.start()).unwrap_or(0)))
            .collect();
        assert_eq!(caps, vec![("void Widget::draw(int x) const".to_string(), 13)]);

        let decl = signature_regex("draw", false).expect("regex");
        assert!(decl.is_match("  virtual void draw();"));
        assert!(!decl.is_match("void draw() {}"));
    }

    #[test]
    fn file_regexes_pick_sources_or_headers() {
        assert!(file_regex(true).expect("regex").is_match("/a/b.mm"));
        assert!(!file_regex(true).expect("regex").is_match("/a/b.h"));
        assert!(file_regex(false).expect("regex").is_match("/a/b.hpp"));
    }

    #[test]
    fn cached_results_never_change() {
        let cache = SearchCache::new();
        let key = SearchKey {
            origin: None,
            spelling: "f".into(),
            file_regex: IMPLEMENTATION_FILES.into(),
            signature_regex: "x".into(),
            implementation: true,
            folders: vec![],
        };
        assert!(cache.insert(key.clone(), Some(GotoTarget::Location("a.cpp:1:1".into()))));
        assert!(!cache.insert(key.clone(), None));
        assert_eq!(cache.get(&key), Some(Some(GotoTarget::Location("a.cpp:1:1".into()))));
        cache.clear();
        assert!(cache.is_empty());
    }
}
