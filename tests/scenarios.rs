//! End-to-end scenarios over the fixture files: fast-path completion,
//! front end fallback, namespace enumeration, extensive search and the
//! watcher's cache maintenance.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel;
use pretty_assertions::assert_eq;

use cxxsense::cache::{CacheConfig, LockedTranslationUnit, Status, TuCache};
use cxxsense::complete::{complete_unit, complete_view, Resolver, Row};
use cxxsense::editor::{LogUi, MainThread, OnSelect, Ui};
use cxxsense::frontend::UnsavedFile;
use cxxsense::goto::{self, GotoTarget};
use cxxsense::settings::Settings;
use cxxsense::workspace::views::{View, ViewRegistry};
use cxxsense::workspace::watcher;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn settings() -> Settings {
    Settings {
        options: vec![format!("-I{}", fixture("include").display())],
        ..Settings::default()
    }
}

fn new_cache(ui: Arc<dyn Ui>) -> TuCache {
    let (main, _handle) = MainThread::spawn(ui);
    TuCache::new(
        CacheConfig {
            workers: 2,
            startup_delay: Duration::ZERO,
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

fn open(cache: &TuCache, file: &Path) -> (View, Arc<LockedTranslationUnit>) {
    let view = View::new(file, None, settings(), vec![]);
    let entry = cache.get_for_view(&view).expect("fixture parses");
    (view, entry)
}

/// Fast-path completion of `input` against the parsed fixture.
fn complete(entry: &LockedTranslationUnit, input: &str) -> Option<Vec<Row>> {
    let state = entry.lock();
    Resolver::for_state(&state, entry.filename()).complete(input, "")
}

fn names(rows: &[Row]) -> Vec<&str> {
    rows.iter()
        .map(|(display, _)| display.split(['(', '<', '\t']).next().unwrap_or(""))
        .collect()
}

#[test]
fn s1_dot_completion_hides_private_members() {
    let cache = new_cache(Arc::new(LogUi));
    let (_, entry) = open(&cache, &fixture("2.cpp"));

    let rows = complete(&entry, "Class1 c;\nc.").expect("resolved");
    let names = names(&rows);
    assert!(names.contains(&"publicFunction"));
    assert!(names.contains(&"publicField"));
    assert!(!names.contains(&"x"));
    assert!(!names.contains(&"privateFunction"));
    assert!(!names.contains(&"protectedField"));
    assert!(!names.contains(&"publicStaticFunction"));
}

#[test]
fn s2_this_inside_subclass_sees_inherited_members() {
    let cache = new_cache(Arc::new(LogUi));
    let (_, entry) = open(&cache, &fixture("2.cpp"));

    let rows = complete(&entry, "void Class2::something() { this->").expect("resolved");
    let names = names(&rows);
    assert!(names.contains(&"publicFunction"));
    assert!(names.contains(&"protectedFunction"));
    assert!(names.contains(&"c2PrivateFunction"));
    assert!(!names.contains(&"privateFunction"));
    assert!(!names.contains(&"privateField"));
    assert!(!names.contains(&"x"));
}

#[test]
fn s3_template_members_substitute_the_argument() {
    let cache = new_cache(Arc::new(LogUi));
    let (_, entry) = open(&cache, &fixture("3.cpp"));

    let rows = complete(&entry, "using namespace Test; std::vector<Test::Class1> t; t.").expect("resolved");
    let names = names(&rows);
    assert!(names.contains(&"push_back"));
    assert!(names.contains(&"size"));
    assert!(!names.contains(&"data"));
    assert!(!names.contains(&"vector"));
    let push_back = rows
        .iter()
        .find(|(display, _)| display.starts_with("push_back"))
        .expect("push_back row");
    assert!(push_back.0.contains("Test::Class1"), "{:?}", push_back);
}

#[test]
fn s3_typedefed_templates_complete_through_the_alias() {
    let cache = new_cache(Arc::new(LogUi));
    let (_, entry) = open(&cache, &fixture("3.cpp"));

    let rows = complete(&entry, "Test::intvector v; v.").expect("resolved");
    assert!(names(&rows).contains(&"push_back"));
}

#[test]
fn s4_subscripts_on_the_root_fall_back_to_the_front_end() {
    let cache = new_cache(Arc::new(LogUi));
    let file = fixture("4.cpp");
    let (_, entry) = open(&cache, &file);
    let source = std::fs::read_to_string(&file).expect("fixture");

    let data = format!("{}void C::something() {{ tripleA[0][0][0]->", source);
    assert_eq!(complete(&entry, &data), None);

    let buffer = format!("{}\n}}\n", data);
    let unsaved = [UnsavedFile::new(&file, buffer)];
    let state = entry.lock();
    let rows = complete_unit(&state, &file, &data, "", true, &unsaved);
    let names = names(&rows);
    assert!(names.contains(&"something"));
    assert!(names.contains(&"value"));
    assert!(names.contains(&"singleA"));
    drop(state);

    let over = format!("{}void C::something() {{ tripleA[0][0][0][0].", source);
    assert_eq!(complete(&entry, &over), Some(Vec::new()));
}

#[test]
fn s4_pointer_levels_decide_the_operator() {
    let cache = new_cache(Arc::new(LogUi));
    let (_, entry) = open(&cache, &fixture("4.cpp"));

    assert_eq!(complete(&entry, "C *c; c."), Some(Vec::new()));
    assert_eq!(complete(&entry, "C c; c->"), Some(Vec::new()));
    let rows = complete(&entry, "C *c; c->").expect("resolved");
    assert!(names(&rows).contains(&"tripleA"));
    let rows = complete(&entry, "void C::something() { singleA->").expect("resolved");
    assert!(names(&rows).contains(&"doubleA"));
}

#[test]
fn s5_namespaces_from_included_headers_enumerate() {
    let cache = new_cache(Arc::new(LogUi));
    let (_, entry) = open(&cache, &fixture("5.cpp"));

    let rows = complete(&entry, "std::").expect("resolved");
    let names = names(&rows);
    assert!(!names.is_empty());
    assert!(names.contains(&"vector"));
    assert!(names.contains(&"string"));
}

#[test]
fn completions_never_repeat() {
    let cache = new_cache(Arc::new(LogUi));
    let (_, entry) = open(&cache, &fixture("3.cpp"));

    for input in ["std::", "Test::", "using namespace Test; ", "std::vector<int> v; v."] {
        let rows = complete(&entry, input).unwrap_or_default();
        let mut unique = rows.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), rows.len(), "duplicates for {:?}", input);
    }
}

#[test]
fn view_completion_applies_the_startswith_filter() {
    let cache = new_cache(Arc::new(LogUi));
    let file = fixture("4.cpp");
    let source = std::fs::read_to_string(&file).expect("fixture");
    let mut view = View::new(&file, None, settings(), vec![]);
    view.settings.dont_complete_startswith = vec!["single".to_string()];
    let buffer = format!("{}C c; c.", source);
    view.buffer = Some(buffer.clone());

    let response = complete_view(&cache, &view, buffer.len(), "");
    assert!(response.inhibit);
    let names = names(&response.completions);
    assert!(names.contains(&"doubleA"));
    assert!(!names.contains(&"singleA"));
}

/// Answers every prompt with its first choice.
struct AcceptingUi;

impl Ui for AcceptingUi {
    fn status_message(&self, _message: &str) {}

    fn error_message(&self, _message: &str) {}

    fn show_quick_panel(&self, _items: Vec<Vec<String>>, on_select: OnSelect) {
        on_select(Some(0));
    }

    fn open_location(&self, _location: &str) {}
}

fn copy_workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    for name in ["widget.h", "main.cpp", "widget_impl.cpp"] {
        std::fs::copy(fixture("workspace").join(name), dir.path().join(name)).expect("copy fixture");
    }
    dir
}

#[test]
fn s6_implementation_outside_the_unit_is_found_by_extensive_search() {
    let dir = copy_workspace();
    let root = dir.path().canonicalize().expect("canonical");
    let file = root.join("main.cpp");
    let text = std::fs::read_to_string(&file).expect("fixture");
    let offset = text.find("resize").expect("call site") + 2;

    let cache = new_cache(Arc::new(AcceptingUi));
    let view = View::new(&file, None, settings(), vec![root.clone()]);
    let (tx, rx) = channel::bounded(1);
    goto::get_implementation(
        &cache,
        &view,
        offset,
        Box::new(move |target| {
            let _ = tx.send(target);
        }),
    );

    let target = rx.recv_timeout(Duration::from_secs(60)).expect("search finished");
    match target {
        Some(GotoTarget::Location(location)) => {
            let expected = format!("{}:7:", root.join("widget_impl.cpp").display());
            assert!(location.starts_with(&expected), "{}", location);
        }
        other => panic!("expected a single location, got {:?}", other),
    }
}

#[test]
fn s6_definition_of_a_local_type_is_immediate() {
    let dir = copy_workspace();
    let root = dir.path().canonicalize().expect("canonical");
    let file = root.join("main.cpp");
    let text = std::fs::read_to_string(&file).expect("fixture");
    let offset = text.find("Widget w").expect("declaration") + 1;

    let cache = new_cache(Arc::new(LogUi));
    let view = View::new(&file, None, settings(), vec![root.clone()]);
    let (tx, rx) = channel::bounded(1);
    goto::get_definition(
        &cache,
        &view,
        offset,
        Box::new(move |target| {
            let _ = tx.send(target);
        }),
    );
    let target = rx.recv_timeout(Duration::from_secs(20)).expect("callback ran");
    assert_eq!(
        target,
        Some(GotoTarget::Location(format!("{}:1:7", root.join("widget.h").display())))
    );
}

#[test]
fn watcher_reparses_saved_files_and_drops_deleted_ones() {
    let dir = copy_workspace();
    let root = dir.path().canonicalize().expect("canonical");
    let file = root.join("widget_impl.cpp");
    let cache = new_cache(Arc::new(LogUi));
    let views = ViewRegistry::new();

    assert!(!watcher::handle_file_saved(&cache, &views, &file));
    let view = views.open(View::new(&file, None, settings(), vec![root.clone()]));
    assert!(!watcher::handle_file_saved(&cache, &views, &file));

    cache.get_for_view(&view).expect("parsed");
    std::fs::write(&file, "#include \"widget.h\"\nint extra;\n").expect("rewrite");
    assert!(watcher::handle_file_saved(&cache, &views, &file));
    wait_idle(&cache);
    {
        let entry = cache.cached(&file).expect("still cached");
        let state = entry.lock();
        assert!(!state.symbols().complete_startswith("extra").is_empty());
    }

    std::fs::remove_file(&file).expect("delete");
    watcher::handle_file_delete(&cache, &file);
    wait_idle(&cache);
    assert_eq!(cache.status(&file), Status::NotInCache);
}
