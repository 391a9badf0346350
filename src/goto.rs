//! Definition and implementation lookup.

use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::cache::{ParseRequest, TuCache};
use crate::config;
use crate::editor::MainThread;
use crate::frontend::{format_cursor, Cursor, CursorKind, SourceLocation, TranslationUnit, UnsavedFile};
use crate::parsehelp;
use crate::search::{ExtensiveSearch, SearchRequest};
use crate::settings::PathContext;
use crate::workspace::views::View;

/// Where a lookup led: one location, or several `(signature, location)`
/// candidates for the user to pick from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GotoTarget {
    Location(String),
    Candidates(Vec<(String, String)>),
}

pub type GotoCallback = Box<dyn FnOnce(Option<GotoTarget>) + Send + 'static>;

static SPELLING_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(enum\s+|(class|struct)\s+(\w+::)*)").expect("Invalid spelling regex"));

static TRAILING_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)[\(\[\&\+\-\*/]*$").expect("Invalid word regex"));

/// What is left to do once the translation unit lock is released.
#[derive(Debug, PartialEq)]
enum Plan {
    Done(Option<GotoTarget>),
    /// Look for the definition of a header declaration in the header's
    /// sibling sources.
    Probe { header: SourceLocation, origin: String },
    Search { origin: Option<String> },
}

/// Spelling of a cursor without elaborated type keywords.
fn cursor_spelling(cursor: &Cursor<'_>) -> String {
    let spelling = if cursor.spelling().is_empty() {
        cursor.displayname()
    } else {
        cursor.spelling().to_string()
    };
    SPELLING_PREFIX_RE.replace(&spelling, "").into_owned()
}

/// The word at `offset`; right after a name, a call or subscript opener
/// or an operator still selects the name.
fn word_at(data: &str, offset: usize) -> String {
    let word = parsehelp::extract_word_at_offset(data, offset);
    if !word.is_empty() {
        return word.to_string();
    }
    let line = parsehelp::extract_line_until_offset(data, offset);
    TRAILING_WORD_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

fn cursor_at<'tu>(tu: &'tu TranslationUnit, file: &Path, data: &str, offset: usize) -> Option<Cursor<'tu>> {
    let (line, column) = parsehelp::get_line_and_column(data, offset);
    tu.get_cursor(file, line as u32, column as u32)
}

fn location_of(cursor: &Cursor<'_>) -> Option<GotoTarget> {
    Some(GotoTarget::Location(format_cursor(cursor)))
}

fn plan_definition(cursor: Option<Cursor<'_>>, word: &str) -> Option<GotoTarget> {
    if word.is_empty() {
        return None;
    }
    let cursor = cursor?;
    if let Some(reference) = cursor.reference() {
        return location_of(&reference);
    }
    if cursor.kind() == CursorKind::InclusionDirective {
        return cursor
            .included_file()
            .map(|f| GotoTarget::Location(f.display().to_string()));
    }
    None
}

fn plan_implementation(cursor: Option<Cursor<'_>>, word: &str) -> Plan {
    if word.is_empty() {
        return Plan::Done(None);
    }
    let cursor = match cursor {
        Some(c) if cursor_spelling(&c) == word => c,
        other => {
            return Plan::Search {
                origin: other.map(|c| format_cursor(&c.canonical())),
            }
        }
    };
    let kind = cursor.kind();
    match cursor.definition() {
        Some(d) if d != cursor => Plan::Done(location_of(&d)),
        Some(_) if matches!(kind, CursorKind::VarDecl | CursorKind::ParmDecl | CursorKind::FieldDecl) => {
            let target = cursor
                .children()
                .into_iter()
                .find(|c| c.kind() == CursorKind::TypeRef)
                .and_then(|t| t.definition());
            Plan::Done(target.as_ref().and_then(location_of))
        }
        _ if kind == CursorKind::ClassDecl => {
            let target = cursor
                .children()
                .into_iter()
                .filter(|c| c.kind() == CursorKind::CxxBaseSpecifier)
                .filter_map(|b| b.definition())
                .last();
            Plan::Done(target.as_ref().and_then(location_of))
        }
        Some(d) => Plan::Done(location_of(&d)),
        None => {
            let declaration = if kind.is_expression() {
                cursor.reference()
            } else {
                Some(cursor)
            };
            let Some(declaration) = declaration else {
                return Plan::Search { origin: None };
            };
            let origin = format_cursor(&declaration.canonical());
            let function = matches!(
                declaration.kind(),
                CursorKind::CxxMethod | CursorKind::FunctionDecl | CursorKind::Constructor | CursorKind::Destructor
            );
            let location = declaration.location();
            if function && config::is_header(&location.file.to_string_lossy()) {
                Plan::Probe {
                    header: location,
                    origin,
                }
            } else {
                Plan::Search { origin: Some(origin) }
            }
        }
    }
}

/// Reparses the view's translation unit with its current text and runs
/// `plan` on the cursor and word at `offset` under the entry lock.
fn with_cursor<T>(
    cache: &TuCache,
    view: &View,
    offset: usize,
    plan: impl FnOnce(Option<Cursor<'_>>, &str) -> T,
) -> Option<(T, String)> {
    let data = match view.text() {
        Ok(data) => data,
        Err(e) => {
            warn!("Cannot read {}: {}", view.file.display(), e);
            return None;
        }
    };
    let entry = cache.get_for_view(view)?;
    if let Err(e) = entry.reparse(&[UnsavedFile::new(&view.file, data.clone())]) {
        warn!("Reparse of {} failed: {}", view.file.display(), e);
    }
    let state = entry.lock();
    let cursor = cursor_at(&state.tu, &view.file, &data, offset);
    let word = word_at(&data, offset);
    debug!("Goto on {:?} ({})", cursor, word);
    Some((plan(cursor, &word), word))
}

/// Wraps a callback so it runs on the editor thread and reports when
/// nothing was found.
fn deliver(main: &MainThread, word: String, callback: GotoCallback) -> GotoCallback {
    let main = main.clone();
    Box::new(move |result| {
        let report = main.clone();
        main.run(move || {
            if result.is_none() && !word.is_empty() {
                report.status_message(format!("Don't know where the {} is!", word));
            }
            callback(result);
        });
    })
}

/// Finds where the symbol at `offset` is declared (or the file an include
/// names).
pub fn get_definition(cache: &TuCache, view: &View, offset: usize, callback: GotoCallback) {
    match with_cursor(cache, view, offset, plan_definition) {
        Some((target, word)) => deliver(cache.main_thread(), word, callback)(target),
        None => deliver(cache.main_thread(), String::new(), callback)(None),
    }
}

/// Finds where the symbol at `offset` is implemented, probing the sources
/// next to a header and falling back to an extensive search.
pub fn get_implementation(cache: &TuCache, view: &View, offset: usize, callback: GotoCallback) {
    let Some((plan, word)) = with_cursor(cache, view, offset, plan_implementation) else {
        deliver(cache.main_thread(), String::new(), callback)(None);
        return;
    };
    let request = cache.request_for(view);
    let origin = match plan {
        Plan::Done(target) => {
            deliver(cache.main_thread(), word, callback)(target);
            return;
        }
        Plan::Probe { header, origin } => {
            if let Some(target) = probe_siblings(cache, &request, &view.paths, &header) {
                deliver(cache.main_thread(), word, callback)(Some(target));
                return;
            }
            Some(origin)
        }
        Plan::Search { origin } => origin,
    };
    let search = SearchRequest {
        origin,
        spelling: word.clone(),
        origin_file: view.file.clone(),
        folders: view.paths.folders.clone(),
        implementation: true,
        parse: request,
    };
    ExtensiveSearch::start(cache, search, deliver(cache.main_thread(), word, callback));
}

/// Source files sharing the header's base name.
pub fn sibling_sources(header: &Path) -> Vec<PathBuf> {
    config::SOURCE_EXTENSIONS
        .iter()
        .map(|ext| header.with_extension(ext))
        .collect()
}

fn probe_siblings(
    cache: &TuCache,
    request: &ParseRequest,
    paths: &PathContext,
    header: &SourceLocation,
) -> Option<GotoTarget> {
    for sibling in sibling_sources(&header.file) {
        if sibling == request.filename || !sibling.is_file() {
            continue;
        }
        let sibling_request = ParseRequest {
            filename: sibling.clone(),
            paths: PathContext {
                folders: paths.folders.clone(),
                this_file: Some(sibling.clone()),
            },
            ..request.clone()
        };
        let Some(entry) = cache.get_translation_unit(&sibling_request, &[]) else {
            continue;
        };
        let state = entry.lock();
        let Some(cursor) = state.tu.get_cursor(&header.file, header.line, header.column) else {
            continue;
        };
        if let Some(d) = cursor.definition().filter(|d| *d != cursor) {
            debug!("Found implementation in sibling {}", sibling.display());
            return location_of(&d);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{Index, ParseFlags};
    use pretty_assertions::assert_eq;
    use std::fs;

    fn parse(path: &Path) -> TranslationUnit {
        Index::create()
            .parse(path, &[], &[], ParseFlags::default())
            .expect("parse")
    }

    #[test]
    fn words_include_trailing_call_openers() {
        assert_eq!(word_at("foo(", 4), "foo");
        assert_eq!(word_at("a.bar", 3), "bar");
        assert_eq!(word_at("  ", 1), "");
    }

    #[test]
    fn spelling_drops_elaborated_keywords() {
        assert_eq!(SPELLING_PREFIX_RE.replace("class ns::Foo", ""), "Foo");
        assert_eq!(SPELLING_PREFIX_RE.replace("enum Color", ""), "Color");
    }

    #[test]
    fn definition_follows_references() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.cpp");
        let data = "struct Point { int x; };\nint main() { Point p; return p.x; }\n";
        fs::write(&path, data).expect("write");
        let tu = parse(&path);
        let offset = data.find("Point p").expect("use");
        let cursor = cursor_at(&tu, &path, data, offset + 1);
        let target = plan_definition(cursor, &word_at(data, offset + 1));
        assert_eq!(
            target,
            Some(GotoTarget::Location(format!("{}:1:8", path.display())))
        );
    }

    #[test]
    fn implementation_of_a_variable_is_its_type() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.cpp");
        let data = "struct Point { int x; };\nPoint origin;\n";
        fs::write(&path, data).expect("write");
        let tu = parse(&path);
        let offset = data.find("origin").expect("var") + 2;
        let plan = plan_implementation(cursor_at(&tu, &path, data, offset), &word_at(data, offset));
        assert_eq!(
            plan,
            Plan::Done(Some(GotoTarget::Location(format!("{}:1:8", path.display()))))
        );
    }

    #[test]
    fn header_declarations_probe_siblings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let header = dir.path().join("widget.h");
        fs::write(&header, "class Widget {\npublic:\n    void draw();\n};\n").expect("write");
        let main = dir.path().join("main.cpp");
        let data = "#include \"widget.h\"\nvoid use(Widget &w) { w.draw(); }\n";
        fs::write(&main, data).expect("write");
        let tu = parse(&main);
        let offset = data.find("draw").expect("call") + 1;
        match plan_implementation(cursor_at(&tu, &main, data, offset), &word_at(data, offset)) {
            Plan::Probe { header: location, .. } => {
                assert_eq!(location.file, crate::frontend::translation_unit::normalize_path(&header));
                assert_eq!((location.line, location.column), (3, 10));
            }
            other => panic!("expected a probe, got {:?}", other),
        }
        assert_eq!(sibling_sources(&header)[0], dir.path().join("widget.cpp"));
    }
}
