//! Fast-path completion: works out what the expression before the cursor
//! refers to and lists its members from the symbol cache, without asking
//! the front end to complete. When the expression cannot be resolved the
//! front end's own completion is used instead.

pub mod chain;
pub mod filter;

use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::cache::{TuCache, TuState};
use crate::frontend::{AccessSpecifier, Cursor, CursorKind, TranslationUnit, UnsavedFile};
use crate::parsehelp::{
    extract_enclosing_class, extract_line_until_offset, extract_namespace, extract_used_namespaces,
    extract_variables, get_base_type, get_line_and_column, get_pointer_level, get_type_definition, Op,
    TailToken,
};
use crate::symbols::{CacheEntry, Symbols};
use crate::workspace::views::View;

use chain::{Template, Walk};
pub use filter::Row;
use filter::{apply_all, drop_startswith, filter, remove_duplicates, Replacement};

const MAX_BASE_DEPTH: usize = 16;

static SCOPE_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"::$").expect("Invalid scope suffix regex"));

static NEW_QUALIFIED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\W|^)new\s+(\w+::)+$").expect("Invalid new regex"));

static QUALIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^\(\s,]+::)+$").expect("Invalid qualifier regex"));

static MEMBER_ACCESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\w+\]+\s+$|\[[\w.\->]+\s+$|([^ \t]+)(\.|->)$)").expect("Invalid member access regex")
});

static NEW_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(^|\W)new\s+$").expect("Invalid new regex"));

static STATIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\b)\s*static\s+").expect("Invalid static regex"));

/// Kinds a `Type::` completion lists even when they are not static.
fn is_nested_type_kind(kind: CursorKind) -> bool {
    matches!(
        kind,
        CursorKind::TypedefDecl
            | CursorKind::TypeAliasDecl
            | CursorKind::ClassDecl
            | CursorKind::StructDecl
            | CursorKind::EnumConstantDecl
            | CursorKind::EnumDecl
            | CursorKind::ClassTemplate
    )
}

fn rows<'a, 'tu: 'a>(entries: impl IntoIterator<Item = &'a CacheEntry<'tu>>) -> Vec<Row> {
    entries
        .into_iter()
        .map(|e| (e.display.clone(), e.insert.clone()))
        .collect()
}

/// Whether `parent` is `child` or one of its (transitive) bases.
pub fn inherits(parent: Cursor<'_>, child: Cursor<'_>) -> bool {
    inherits_inner(parent, child, 0)
}

fn inherits_inner(parent: Cursor<'_>, child: Cursor<'_>, depth: usize) -> bool {
    if depth > MAX_BASE_DEPTH {
        return false;
    }
    if parent == child || (parent.returned_cursor().is_some() && parent.returned_cursor() == child.returned_cursor()) {
        return true;
    }
    child
        .bases()
        .into_iter()
        .any(|(base, _)| inherits_inner(parent, base, depth + 1))
}

/// The fast-path resolver over one translation unit and its symbol cache.
pub struct Resolver<'tu> {
    symbols: Symbols<'tu>,
    tu: &'tu TranslationUnit,
    file: &'tu Path,
}

impl<'tu> Resolver<'tu> {
    pub fn new(symbols: Symbols<'tu>, tu: &'tu TranslationUnit, file: &'tu Path) -> Self {
        Self { symbols, tu, file }
    }

    pub fn for_state(state: &'tu TuState, file: &'tu Path) -> Self {
        Self::new(state.symbols(), &state.tu, file)
    }

    // -----------------------------------------------------------------------
    // Type lookup
    // -----------------------------------------------------------------------

    /// Resolves a type name the way code at the end of `data` sees it: from
    /// the global scope, the enclosing namespace, then every namespace
    /// pulled in with `using`. `Outer::Inner` also resolves when `Outer` is
    /// a class.
    pub fn find_type(&self, data: &str, typename: &str) -> Option<Cursor<'tu>> {
        self.find_type_inner(data, typename.trim().trim_start_matches("::"), 0)
    }

    fn find_type_inner(&self, data: &str, typename: &str, depth: usize) -> Option<Cursor<'tu>> {
        if depth > MAX_BASE_DEPTH {
            return None;
        }
        let (extra, name) = match typename.rfind("::") {
            Some(i) => (Some(&typename[..i]), &typename[i + 2..]),
            None => (None, typename),
        };
        let name = name.split('<').next().unwrap_or("").trim();
        if name.is_empty() {
            return None;
        }

        let mut namespaces = vec![String::new(), extract_namespace(data)];
        namespaces.extend(extract_used_namespaces(data));
        for ns in namespaces {
            let ns = match (ns.is_empty(), extra) {
                (false, Some(extra)) => format!("{}::{}", ns, extra),
                (false, None) => ns,
                (true, Some(extra)) => extra.to_string(),
                (true, None) => String::new(),
            };
            let path: Vec<String> = ns
                .split("::")
                .map(|s| s.split('<').next().unwrap_or("").trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if let Some(found) = self.symbols.find_type(&path, name) {
                let found = if found.kind().is_reference() {
                    found.reference().unwrap_or(found)
                } else {
                    found
                };
                return Some(found);
            }
        }

        // maybe a type nested in a class
        let parent = self.find_type_inner(data, extra?, depth + 1)?;
        let parent = parent.returned_cursor().unwrap_or(parent);
        parent
            .children()
            .into_iter()
            .find(|c| c.kind().is_declaration() && c.spelling() == name)
    }

    // -----------------------------------------------------------------------
    // Entry point
    // -----------------------------------------------------------------------

    /// Completes at the end of `data` after `prefix` was typed. `None`
    /// means the expression could not be resolved and the front end should
    /// be asked instead.
    pub fn complete(&self, data: &str, prefix: &str) -> Option<Vec<Row>> {
        let line = extract_line_until_offset(data, data.len());
        let before = line.strip_suffix(prefix).unwrap_or(line);

        let rows = if SCOPE_SUFFIX_RE.is_match(before) {
            self.complete_scope(data, before, prefix)
        } else if MEMBER_ACCESS_RE.is_match(before) {
            self.complete_member(data, prefix)
        } else {
            Some(self.complete_visible(data, before, prefix))
        };
        rows.map(remove_duplicates)
    }

    // -----------------------------------------------------------------------
    // `Qualifier::`
    // -----------------------------------------------------------------------

    fn complete_scope(&self, data: &str, before: &str, prefix: &str) -> Option<Vec<Row>> {
        let constructor_mode = NEW_QUALIFIED_RE.is_match(before);
        let Some(qualifier) = QUALIFIER_RE.find(before) else {
            let entries = self.symbols.complete_startswith(prefix);
            return Some(rows(entries.iter().filter(|e| {
                !matches!(e.cursor.kind(), CursorKind::MacroDefinition | CursorKind::CxxMethod)
            })));
        };
        let mut namespace: Vec<String> = qualifier.as_str().split("::").map(str::to_string).collect();
        // the last item is the empty completion prefix
        namespace.pop();

        let mut ret = rows(self.symbols.complete_namespace(&namespace).iter());
        if ret.is_empty() {
            let typename = namespace.join("::");
            let mut target = self
                .find_type(data, &typename)
                .filter(|c| c.kind() != CursorKind::EnumDecl);
            let mut template = None;
            if let Some(c) = target.filter(|c| !c.kind().is_namespace()) {
                target = c.returned_cursor();
                if let Some(t) = target {
                    if matches!(t.kind(), CursorKind::TypedefDecl | CursorKind::TypeAliasDecl) {
                        match self.expand_alias(t) {
                            Some((record, args)) => {
                                target = Some(record);
                                template = Some(args);
                            }
                            // too complex for the fast path
                            None => return None,
                        }
                    }
                }
            }
            if let Some(c) = target {
                if c.kind().is_namespace() {
                    return Some(filter(rows(self.symbols.complete_cursor(c).iter()), constructor_mode));
                }
                ret = self.scope_members(data, c, template.as_ref());
            }
        }
        Some(filter(ret, constructor_mode))
    }

    /// Members of a type reachable through `Type::`.
    fn scope_members(&self, data: &str, target: Cursor<'tu>, template: Option<&Template<'tu>>) -> Vec<Row> {
        let clazz = extract_enclosing_class(data);
        let inherits = clazz
            .as_deref()
            .and_then(|c| self.find_type(data, c))
            .is_some_and(|child| inherits(target, child));
        let self_completion = clazz.as_deref() == Some(target.spelling());
        let replacements = template.map(|t| self.replacements(target, t)).unwrap_or_default();

        self.symbols
            .complete_cursor(target)
            .iter()
            .filter(|e| {
                (self_completion && !e.baseclass)
                    || (inherits && e.access != AccessSpecifier::Private)
                    || (e.access == AccessSpecifier::Public
                        && (e.is_static || is_nested_type_kind(e.cursor.kind())))
            })
            .map(|e| (apply_all(&replacements, &e.display), apply_all(&replacements, &e.insert)))
            .collect()
    }

    // -----------------------------------------------------------------------
    // `expr.`, `expr->`, `[receiver `
    // -----------------------------------------------------------------------

    fn complete_member(&self, data: &str, prefix: &str) -> Option<Vec<Row>> {
        let comp = data.strip_suffix(prefix).unwrap_or(data);
        let def = get_type_definition(comp)?;
        let typename = def.typename.clone()?;
        let mut template = Template::parse(&get_base_type(&typename), None);
        let mut pointer = get_pointer_level(&typename) as u32;
        if def.var.as_deref() == Some("this") {
            pointer = 1;
        }
        let mut cursor = None;
        let mut empty = false;

        if let Some(var) = def.var.as_deref() {
            let at_declaration = (def.line > 0 && def.column > 0)
                .then(|| self.tu.get_cursor(self.file, def.line as u32, def.column as u32))
                .flatten()
                .filter(|c| c.spelling() == var);
            let declaration = match at_declaration {
                Some(c) => {
                    // the declaration knows its own pointer level
                    pointer = 0;
                    Some(c)
                }
                None => self.find_type(data, &template.name),
            };
            match declaration {
                Some(c) if c.kind() == CursorKind::VarDecl && c.spelling() == typename => {
                    // a variable used as a type
                    empty = true;
                }
                Some(c) => {
                    pointer += c.returned_pointer_level();
                    cursor = c.returned_cursor();
                    empty = cursor.is_none();
                }
                None => {}
            }
        } else {
            let (name, is_function) = match typename.strip_suffix("()") {
                Some(name) => (name, true),
                None => (typename.as_str(), false),
            };

            // a member of the enclosing class
            let owner = extract_enclosing_class(data).and_then(|clazz| self.find_type(data, &clazz));
            if let Some(owner) = owner {
                if let Some(member) = owner.member(name, is_function) {
                    let solved = self.solve_member(data, owner, member, template.clone());
                    cursor = solved.cursor;
                    template = solved.template;
                    pointer = solved.pointer;
                    empty = cursor.is_none();
                }
            }

            // a global variable, or a type named directly
            if cursor.is_none() {
                let scoped = matches!(def.tail.first(), Some(TailToken::Op(Op::Scope)));
                let found = self.find_type(data, &template.name).filter(|c| {
                    let kind_ok = if scoped {
                        matches!(
                            c.kind(),
                            CursorKind::ClassDecl
                                | CursorKind::StructDecl
                                | CursorKind::ObjCInterfaceDecl
                                | CursorKind::ClassTemplate
                        )
                    } else {
                        matches!(c.kind(), CursorKind::VarDecl | CursorKind::ObjCInterfaceDecl)
                    };
                    c.spelling() == typename && kind_ok
                });
                if let Some(c) = found {
                    pointer = c.returned_pointer_level();
                    cursor = c.returned_cursor();
                    empty = cursor.is_none();
                }
            }

            // a free function or global variable
            if cursor.is_none() {
                let entries = self.symbols.complete_startswith(name);
                let found = entries.iter().find(|e| {
                    e.cursor.spelling() == name
                        && matches!(e.cursor.kind(), CursorKind::VarDecl | CursorKind::FunctionDecl)
                });
                if let Some(e) = found {
                    pointer = e.cursor.returned_pointer_level();
                    cursor = e.cursor.returned_cursor();
                    empty = cursor.is_none();
                }
            }
        }

        let walk = match cursor {
            Some(_) => self.walk_chain(data, Walk::new(cursor, template, pointer), &def.tail),
            None => Walk::new(None, template, pointer),
        };
        debug!(
            "Member completion on {:?}: pointer {}, empty {}",
            walk.cursor, walk.pointer, walk.empty
        );
        let ret = match walk.completable() {
            Some(target) => Some(self.member_rows(data, target, &walk, def.var.is_none())),
            None if empty || walk.empty => Some(Vec::new()),
            None => None,
        };
        ret.map(|r| filter(r, false))
    }

    fn replacements(&self, target: Cursor<'tu>, template: &Template<'tu>) -> Vec<Replacement> {
        let Some(args) = template.args.as_deref() else {
            return Vec::new();
        };
        target
            .template_parameters()
            .iter()
            .zip(args)
            .filter_map(|(param, arg)| Replacement::new(param.spelling(), &arg.spelling()))
            .collect()
    }

    fn member_rows(&self, data: &str, target: Cursor<'tu>, walk: &Walk<'tu>, no_var: bool) -> Vec<Row> {
        let entries = self.symbols.complete_cursor(target);

        if target.kind() == CursorKind::ObjCInterfaceDecl {
            let is_ivar = |e: &CacheEntry<'_>| e.cursor.kind() == CursorKind::ObjCIvarDecl;
            return match walk.last_op {
                // dot syntax: properties and methods without arguments
                Some(Op::Dot) => rows(
                    entries
                        .iter()
                        .filter(|e| !is_ivar(*e) && !e.cursor.spelling().contains(':')),
                ),
                Some(Op::Arrow) => rows(entries.iter().filter(|e| is_ivar(*e))),
                _ => rows(
                    entries
                        .iter()
                        .filter(|e| e.is_static == no_var && !is_ivar(*e)),
                ),
            };
        }

        let clazz = extract_enclosing_class(data);
        let self_completion = clazz.as_deref() == Some(target.spelling());
        let replacements = self.replacements(target, &walk.template);
        entries
            .iter()
            .filter(|e| {
                !e.is_static
                    && !is_nested_type_kind(e.cursor.kind())
                    && (e.access == AccessSpecifier::Public
                        || (self_completion && !(e.baseclass && e.access == AccessSpecifier::Private)))
            })
            .map(|e| (apply_all(&replacements, &e.display), apply_all(&replacements, &e.insert)))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Everything else
    // -----------------------------------------------------------------------

    fn complete_visible(&self, data: &str, before: &str, prefix: &str) -> Vec<Row> {
        let constructor_mode = NEW_RE.is_match(before);
        let mut ret = rows(self.symbols.complete_startswith(prefix).iter());

        if !constructor_mode {
            for (ty, name) in extract_variables(data) {
                if name.starts_with(prefix) {
                    let ty = STATIC_RE.replace_all(&ty, "");
                    ret.push((format!("{}\t{}", name, ty.trim()), name));
                }
            }
        }

        if let Some(clazz) = extract_enclosing_class(data) {
            if let Some(c) = self.find_type(data, &clazz) {
                ret.extend(rows(self.symbols.complete_cursor(c).iter().filter(|e| {
                    !e.is_static && !(e.baseclass && e.access == AccessSpecifier::Private)
                })));
            }
        }

        let mut namespaces = extract_used_namespaces(data);
        let ns = extract_namespace(data);
        if !ns.is_empty() {
            namespaces.push(ns);
        }
        for ns in namespaces {
            let path: Vec<String> = ns.split("::").map(str::to_string).collect();
            ret.extend(rows(self.symbols.complete_namespace(&path).iter()));
        }
        filter(ret, constructor_mode)
    }

    /// The front end's own completion at the end of `data`.
    pub fn front_end_complete(&self, data: &str, prefix: &str, unsaved: &[UnsavedFile]) -> Vec<Row> {
        let at = data.len().saturating_sub(prefix.len());
        let before = extract_line_until_offset(data, at);
        let member = is_member_completion(before);
        let (line, column) = get_line_and_column(data, at);
        self.symbols
            .clang_complete(self.file, line as u32, column as u32, unsaved, member)
            .into_iter()
            .map(|c| (c.display, c.insert))
            .collect()
    }
}

/// Whether the text before the completion point ends in a member or scope
/// operator.
pub fn is_member_completion(before: &str) -> bool {
    let before = before.trim_end();
    before.ends_with('.') || before.ends_with("->") || before.ends_with("::")
}

/// Completion result for the editor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompletionResponse {
    pub completions: Vec<Row>,
    /// Tells the editor to hide its own word completions.
    pub inhibit: bool,
}

/// Completes against a locked cache entry: the fast path when enabled,
/// the front end when it is disabled or inconclusive.
pub fn complete_unit(
    state: &TuState,
    file: &Path,
    data: &str,
    prefix: &str,
    fast: bool,
    unsaved: &[UnsavedFile],
) -> Vec<Row> {
    let resolver = Resolver::for_state(state, file);
    let fast_rows = if fast { resolver.complete(data, prefix) } else { None };
    match fast_rows {
        Some(rows) => rows,
        None => {
            debug!("Falling back to front end completion in {}", file.display());
            remove_duplicates(resolver.front_end_complete(data, prefix, unsaved))
        }
    }
}

/// Completes in a view at byte `offset`, after `prefix` was typed.
pub fn complete_view(cache: &TuCache, view: &View, offset: usize, prefix: &str) -> CompletionResponse {
    let settings = &view.settings;
    let mut response = CompletionResponse {
        completions: Vec::new(),
        inhibit: settings.inhibit_sublime_completions,
    };
    let text = match view.text() {
        Ok(text) => text,
        Err(e) => {
            warn!("Cannot read {}: {}", view.file.display(), e);
            return response;
        }
    };
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    let Some(entry) = cache.get_for_view(view) else {
        return response;
    };
    let state = entry.lock();
    let rows = complete_unit(
        &state,
        &view.file,
        &text[..offset],
        prefix,
        settings.enable_fast_completions,
        &view.unsaved_files(),
    );
    response.completions = drop_startswith(rows, &settings.dont_complete_startswith);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{Index, ParseFlags};
    use crate::symbols::SymbolCache;
    use std::fs;

    /// Parses `header + input` as one file and completes at its end.
    fn complete(header: &str, input: &str, prefix: &str) -> Option<Vec<Row>> {
        complete_in("main.cpp", header, input, prefix)
    }

    fn complete_in(name: &str, header: &str, input: &str, prefix: &str) -> Option<Vec<Row>> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(name);
        let data = format!("{}{}", header, input);
        fs::write(&path, &data).expect("write source");
        let tu = Index::create()
            .parse(&path, &[], &[], ParseFlags::default())
            .expect("parse");
        let cache = SymbolCache::create(&tu);
        let resolver = Resolver::new(cache.bind(&tu), &tu, &path);
        resolver.complete(&data, prefix)
    }

    fn names(rows: &[Row]) -> Vec<&str> {
        rows.iter()
            .map(|(display, _)| display.split(['(', '<', '\t']).next().unwrap_or(""))
            .collect()
    }

    const CLASSES: &str = "\
class Class1 {
public:
    void publicFunction();
    static int staticField;
    typedef int Number;
protected:
    int protectedField;
private:
    int x;
};
class Class2 : public Class1 {
public:
    void something();
    Class1 *next;
};
";

    #[test]
    fn dot_lists_public_instance_members() {
        let rows = complete(CLASSES, "Class1 c;\nc.", "").expect("resolved");
        let names = names(&rows);
        assert!(names.contains(&"publicFunction"));
        assert!(!names.contains(&"x"));
        assert!(!names.contains(&"protectedField"));
        assert!(!names.contains(&"staticField"));
        assert!(!names.contains(&"Number"));
    }

    #[test]
    fn this_sees_inherited_non_private_members() {
        let rows = complete(CLASSES, "void Class2::something() { this->", "").expect("resolved");
        let names = names(&rows);
        assert!(names.contains(&"publicFunction"));
        assert!(names.contains(&"protectedField"));
        assert!(names.contains(&"something"));
        assert!(!names.contains(&"x"));
    }

    #[test]
    fn dot_on_a_pointer_has_no_members() {
        assert_eq!(complete(CLASSES, "Class1 *c;\nc.", ""), Some(Vec::new()));
        let rows = complete(CLASSES, "Class1 *c;\nc->", "").expect("resolved");
        assert!(names(&rows).contains(&"publicFunction"));
    }

    #[test]
    fn arrow_on_an_object_without_operator_has_no_members() {
        assert_eq!(complete(CLASSES, "Class1 c;\nc->", ""), Some(Vec::new()));
    }

    #[test]
    fn chains_follow_member_types() {
        let rows = complete(CLASSES, "Class2 c;\nc.next->", "").expect("resolved");
        assert!(names(&rows).contains(&"publicFunction"));
        assert_eq!(complete(CLASSES, "Class2 c;\nc.next.", ""), Some(Vec::new()));
    }

    #[test]
    fn scope_lists_static_and_nested_types() {
        let rows = complete(CLASSES, "Class1::", "").expect("resolved");
        let names = names(&rows);
        assert!(names.contains(&"staticField"));
        assert!(names.contains(&"Number"));
        assert!(!names.contains(&"publicFunction"));
    }

    #[test]
    fn this_outside_a_class_is_unresolved() {
        assert_eq!(complete("int a;\n", "void f() { this->", ""), None);
    }

    #[test]
    fn templates_substitute_their_arguments() {
        let header = "\
template <typename T>
class Box {
public:
    T get();
    void put(T value);
};
class Item { public: int weight; };
";
        let rows = complete(header, "Box<Item> b;\nb.", "").expect("resolved");
        assert!(rows.iter().any(|(display, _)| display == "put(Item value)\tvoid"));
        let rows = complete(header, "Box<Item> b;\nb.get().", "").expect("resolved");
        assert_eq!(names(&rows), vec!["weight"]);
    }

    #[test]
    fn namespaces_enumerate_and_constructors_follow_new() {
        let header = "namespace Test { class Class1 { public: Class1(); }; int counter; }\n";
        let rows = complete(header, "Test::", "").expect("resolved");
        let names_plain = names(&rows);
        assert!(names_plain.contains(&"Class1"));
        assert!(names_plain.contains(&"counter"));

        let rows = complete(header, "x = new Test::", "").expect("resolved");
        assert!(rows.iter().any(|(display, _)| display == "Class1\tclass"));
        assert!(!rows.iter().any(|(display, _)| display.starts_with("counter")));
    }

    #[test]
    fn plain_words_see_locals_and_globals() {
        let rows = complete("int globalCount;\n", "void f() { static int localCount; glo", "glo").expect("rows");
        assert_eq!(names(&rows), vec!["globalCount"]);
        let rows = complete("int globalCount;\n", "void f() { static int localCount; loc", "loc").expect("rows");
        assert_eq!(rows, vec![("localCount\tint".to_string(), "localCount".to_string())]);
    }

    #[test]
    fn objective_c_messages_list_class_or_instance_methods() {
        let header = "\
@interface Widget {
    int count;
}
+ (Widget *)shared;
- (void)redraw;
- (void)resize:(int)width;
@end
";
        let rows = complete_in("main.m", header, "void f() { [Widget ", "").expect("resolved");
        assert_eq!(names(&rows), vec!["shared"]);
    }

    #[test]
    fn objective_c_dot_lists_properties_and_arrow_lists_ivars() {
        let header = "\
@interface Widget {
    int count;
}
@property int size;
- (void)redraw;
- (void)resize:(int)width;
@end
";
        let rows = complete_in("main.m", header, "void f() { Widget *w; w.", "").expect("resolved");
        let names_dot = names(&rows);
        assert!(names_dot.contains(&"size"));
        assert!(names_dot.contains(&"redraw"));
        assert!(!names_dot.contains(&"count"));
        assert!(!rows.iter().any(|(display, _)| display.starts_with("resize")));

        let rows = complete_in("main.m", header, "void f() { Widget *w; w->", "").expect("resolved");
        assert_eq!(names(&rows), vec!["count"]);
    }

    #[test]
    fn chains_resolve_up_to_ten_member_accesses() {
        let header = "struct N { N *n; int v; };\n";
        // `x.` then `n->` repeated: one access per operator
        let chain = |accesses: usize| format!("N x;\nx.{}", "n->".repeat(accesses - 1));

        for accesses in [9, 10] {
            let rows = complete(header, &chain(accesses), "").expect("resolved");
            let names = names(&rows);
            assert!(names.contains(&"n"), "{} accesses", accesses);
            assert!(names.contains(&"v"), "{} accesses", accesses);
        }
        assert_eq!(complete(header, &chain(11), ""), None);
    }

    #[test]
    fn results_never_repeat() {
        let rows = complete(CLASSES, "Class2 c;\nc.", "").expect("resolved");
        let mut unique = rows.clone();
        unique.dedup();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), rows.len());
    }
}
