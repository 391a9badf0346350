//! Companion index over a translation unit. Built once per parse or
//! reparse and answers the lookups the completion resolver needs without
//! walking the whole unit again.

use std::collections::HashSet;
use std::path::Path;

use crate::frontend::ast::{Ast, EntityId, ROOT};
use crate::frontend::{
    AccessSpecifier, CodeCompletion, Cursor, CursorKind, Filter, TranslationUnit, UnsavedFile,
};

const MAX_BASE_DEPTH: usize = 16;

/// One completion row. Borrows the translation unit it was produced from.
#[derive(Debug, Clone)]
pub struct CacheEntry<'tu> {
    pub cursor: Cursor<'tu>,
    pub insert: String,
    pub display: String,
    pub access: AccessSpecifier,
    pub is_static: bool,
    /// Inherited from a base class.
    pub baseclass: bool,
}

impl CacheEntry<'_> {
    /// The part of `display` after the tab: a kind or a result type.
    pub fn kind_text(&self) -> &str {
        self.display.split_once('\t').map(|(_, k)| k).unwrap_or("")
    }
}

/// A batch of completion rows, released when dropped.
#[derive(Debug, Clone, Default)]
pub struct CompletionResults<'tu> {
    entries: Vec<CacheEntry<'tu>>,
}

impl<'tu> CompletionResults<'tu> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CacheEntry<'tu>> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CacheEntry<'tu>> {
        self.entries.iter()
    }
}

impl<'tu> IntoIterator for CompletionResults<'tu> {
    type Item = CacheEntry<'tu>;
    type IntoIter = std::vec::IntoIter<CacheEntry<'tu>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'tu> FromIterator<CacheEntry<'tu>> for CompletionResults<'tu> {
    fn from_iter<I: IntoIterator<Item = CacheEntry<'tu>>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Globally reachable declarations of a translation unit, sorted by
/// spelling. Holds entity ids only, so it must be rebuilt together with the
/// unit it indexes.
#[derive(Debug, Clone, Default)]
pub struct SymbolCache {
    globals: Vec<(String, EntityId)>,
}

impl SymbolCache {
    pub fn create(tu: &TranslationUnit) -> Self {
        let ast = &tu.ast;
        let mut globals = Vec::new();
        let mut visited = HashSet::new();
        collect_globals(ast, ROOT, &mut visited, &mut globals);
        globals.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        globals.dedup_by_key(|g| g.1);
        tracing::debug!(
            "Symbol cache for {}: {} global declarations",
            tu.path().display(),
            globals.len()
        );
        Self { globals }
    }

    pub fn len(&self) -> usize {
        self.globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }

    /// Pairs the index with the unit it was built from.
    pub fn bind<'tu>(&'tu self, tu: &'tu TranslationUnit) -> Symbols<'tu> {
        Symbols { cache: self, tu }
    }
}

fn collect_globals(
    ast: &Ast,
    scope: EntityId,
    visited: &mut HashSet<EntityId>,
    out: &mut Vec<(String, EntityId)>,
) {
    if !visited.insert(scope) {
        return;
    }
    for id in ast.declarations_in(scope) {
        let e = ast.entity(id);
        // out-of-line member definitions belong to their class
        if e.semantic_parent != e.lexical_parent {
            continue;
        }
        if e.kind == CursorKind::UsingDirective {
            let ns = e
                .target
                .as_deref()
                .and_then(|t| ast.lookup_qualified(scope, t, Filter::Namespace))
                .and_then(|n| ast.resolve_namespace_alias(n));
            if let Some(ns) = ns {
                collect_globals(ast, ns, visited, out);
            }
            continue;
        }
        out.push((e.spelling.clone(), id));
    }
}

/// A symbol cache bound to its translation unit.
#[derive(Clone, Copy)]
pub struct Symbols<'tu> {
    cache: &'tu SymbolCache,
    tu: &'tu TranslationUnit,
}

impl<'tu> Symbols<'tu> {
    fn ast(&self) -> &'tu Ast {
        &self.tu.ast
    }

    fn entry(&self, id: EntityId, access: AccessSpecifier, baseclass: bool) -> Option<CacheEntry<'tu>> {
        let cursor = Cursor::new(self.ast(), id);
        let cs = cursor.completion_string()?;
        Some(CacheEntry {
            cursor,
            insert: cs.insert(),
            display: cs.display(),
            access,
            is_static: cursor.is_static(),
            baseclass,
        })
    }

    fn entries(&self, ids: impl IntoIterator<Item = EntityId>) -> CompletionResults<'tu> {
        let ast = self.ast();
        ids.into_iter()
            .filter_map(|id| self.entry(id, ast.entity(id).access, false))
            .collect()
    }

    /// Every globally reachable declaration whose spelling starts with
    /// `prefix`.
    pub fn complete_startswith(&self, prefix: &str) -> CompletionResults<'tu> {
        let globals = &self.cache.globals;
        let start = globals.partition_point(|(name, _)| name.as_str() < prefix);
        let ids = globals[start..]
            .iter()
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(_, id)| *id);
        self.entries(ids)
    }

    fn resolve_namespace(&self, path: &[String]) -> Option<EntityId> {
        let ast = self.ast();
        let path: Vec<&str> = path.iter().map(|s| s.as_str()).filter(|s| !s.is_empty()).collect();
        if path.is_empty() {
            return Some(ROOT);
        }
        let ns = ast.lookup_qualified(ROOT, &path.join("::"), Filter::Namespace)?;
        ast.resolve_namespace_alias(ns)
    }

    /// Members of a namespace, with re-opened blocks merged and names
    /// brought in by `using` declarations and directives included.
    pub fn complete_namespace(&self, path: &[String]) -> CompletionResults<'tu> {
        match self.resolve_namespace(path) {
            Some(ns) if ns != ROOT => {
                let mut ids = Vec::new();
                self.namespace_members(ns, &mut HashSet::new(), &mut ids);
                self.entries(ids)
            }
            _ => CompletionResults::default(),
        }
    }

    fn namespace_members(&self, ns: EntityId, visited: &mut HashSet<EntityId>, out: &mut Vec<EntityId>) {
        if visited.len() > MAX_BASE_DEPTH || !visited.insert(ns) {
            return;
        }
        let ast = self.ast();
        for id in ast.declarations_in(ns) {
            let e = ast.entity(id);
            if e.semantic_parent != e.lexical_parent {
                continue;
            }
            match (e.kind, e.target.as_deref()) {
                (CursorKind::UsingDirective, Some(target)) => {
                    let inner = ast
                        .lookup_qualified(ns, target, Filter::Namespace)
                        .and_then(|n| ast.resolve_namespace_alias(n));
                    if let Some(inner) = inner {
                        self.namespace_members(inner, visited, out);
                    }
                }
                (CursorKind::UsingDeclaration, Some(target)) => {
                    if let Some(t) = ast.lookup_qualified(ns, target, Filter::Any) {
                        out.push(t);
                    }
                }
                _ => out.push(id),
            }
        }
    }

    /// Members of a class, struct, union, enum or Objective-C interface.
    /// Inherited members are flagged `baseclass` and carry the access they
    /// have through the inheritance path.
    pub fn complete_cursor(&self, cursor: Cursor<'tu>) -> CompletionResults<'tu> {
        let ast = self.ast();
        let target = match cursor.kind() {
            CursorKind::TypedefDecl | CursorKind::TypeAliasDecl => match ast.returned(cursor.id()) {
                Some((t, _)) if t != cursor.id() => t,
                _ => return CompletionResults::default(),
            },
            k if k.is_record() => ast.record_definition(cursor.id()),
            _ => cursor.id(),
        };
        let kind = ast.entity(target).kind;
        if kind.is_namespace() {
            let mut ids = Vec::new();
            let ns = ast.resolve_namespace_alias(target).unwrap_or(target);
            self.namespace_members(ns, &mut HashSet::new(), &mut ids);
            return self.entries(ids);
        }
        if !kind.is_record() && kind != CursorKind::EnumDecl {
            return CompletionResults::default();
        }
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        self.record_members(target, None, 0, &mut visited, &mut out);
        out.into_iter().collect()
    }

    fn record_members(
        &self,
        record: EntityId,
        inherited: Option<AccessSpecifier>,
        depth: usize,
        visited: &mut HashSet<EntityId>,
        out: &mut Vec<CacheEntry<'tu>>,
    ) {
        if depth > MAX_BASE_DEPTH || !visited.insert(record) {
            return;
        }
        let ast = self.ast();
        let mut scopes = vec![record];
        let e = ast.entity(record);
        if e.kind == CursorKind::ObjCInterfaceDecl {
            // categories extend the interface they name
            scopes.extend(
                ast.scope_members(ROOT)
                    .into_iter()
                    .filter(|&c| {
                        let c = ast.entity(c);
                        c.kind == CursorKind::ObjCCategoryDecl && c.spelling == e.spelling
                    }),
            );
        }
        for scope in scopes {
            for id in ast.declarations_in(scope) {
                let m = ast.entity(id);
                if inherited.is_some() && matches!(m.kind, CursorKind::Constructor | CursorKind::Destructor) {
                    continue;
                }
                let access = match inherited {
                    Some(through) => m.access.narrow(through),
                    None => m.access,
                };
                if let Some(entry) = self.entry(id, access, inherited.is_some()) {
                    out.push(entry);
                }
            }
        }
        for (base, access) in ast.bases(record) {
            let through = match inherited {
                Some(outer) => access.narrow(outer),
                None => access,
            };
            self.record_members(base, Some(through), depth + 1, visited, out);
        }
    }

    /// Resolves a type name inside a namespace path (global when empty).
    /// Types and namespaces win over other declarations of the same name.
    pub fn find_type(&self, namespace: &[String], name: &str) -> Option<Cursor<'tu>> {
        let ast = self.ast();
        let scope = self.resolve_namespace(namespace).unwrap_or(ROOT);
        let name = name.trim().trim_start_matches("::");
        if name.is_empty() {
            return None;
        }
        [Filter::Type, Filter::Scope, Filter::Any]
            .into_iter()
            .find_map(|filter| ast.lookup_qualified(scope, name, filter))
            .map(|id| Cursor::new(ast, id))
    }

    /// Full front-end completion at a position.
    pub fn clang_complete(
        &self,
        file: &Path,
        line: u32,
        column: u32,
        unsaved: &[UnsavedFile],
        member: bool,
    ) -> Vec<CodeCompletion> {
        self.tu.code_complete(file, line, column, unsaved, member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{Index, ParseFlags};
    use std::fs;

    fn parse(source: &str) -> (tempfile::TempDir, TranslationUnit) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("main.cpp");
        fs::write(&path, source).expect("write source");
        let tu = Index::create()
            .parse(&path, &[], &[], ParseFlags::default())
            .expect("parse");
        (dir, tu)
    }

    fn displays(results: &CompletionResults<'_>) -> Vec<String> {
        results.iter().map(|e| e.display.clone()).collect()
    }

    #[test]
    fn startswith_uses_global_scope_only() {
        let (_dir, tu) = parse(
            "int counter;\nint count_items();\nclass Counter { int inner; };\nnamespace N { int country; }\n",
        );
        let cache = SymbolCache::create(&tu);
        let symbols = cache.bind(&tu);
        let found = displays(&symbols.complete_startswith("count"));
        assert!(found.iter().any(|d| d.starts_with("counter\t")));
        assert!(found.iter().any(|d| d.starts_with("count_items(")));
        assert!(!found.iter().any(|d| d.starts_with("country")));
        assert!(!found.iter().any(|d| d.starts_with("inner")));
    }

    #[test]
    fn namespace_blocks_and_aliases_merge() {
        let (_dir, tu) = parse(
            "namespace Test { int a; }\nnamespace Test { int b; }\nnamespace T2 = Test;\nnamespace Other { using Test::a; int c; }\n",
        );
        let cache = SymbolCache::create(&tu);
        let symbols = cache.bind(&tu);
        let test = displays(&symbols.complete_namespace(&["Test".into()]));
        assert!(test.contains(&"a\tint".to_string()));
        assert!(test.contains(&"b\tint".to_string()));
        let alias = displays(&symbols.complete_namespace(&["T2".into()]));
        assert_eq!(alias.len(), test.len());
        let other = displays(&symbols.complete_namespace(&["Other".into()]));
        assert!(other.contains(&"a\tint".to_string()));
        assert!(other.contains(&"c\tint".to_string()));
        assert!(symbols.complete_namespace(&["Missing".into()]).is_empty());
    }

    #[test]
    fn inherited_members_are_flagged() {
        let (_dir, tu) = parse(
            "class Base {\npublic:\n    void visible();\nprivate:\n    int hidden;\n};\nclass Derived : public Base {\npublic:\n    Derived();\n    int own;\n};\n",
        );
        let cache = SymbolCache::create(&tu);
        let symbols = cache.bind(&tu);
        let derived = symbols.find_type(&[], "Derived").expect("Derived");
        let results = symbols.complete_cursor(derived);
        let own = results.iter().find(|e| e.display.starts_with("own\t")).expect("own");
        assert!(!own.baseclass);
        let visible = results.iter().find(|e| e.display.starts_with("visible(")).expect("visible");
        assert!(visible.baseclass);
        assert_eq!(visible.access, AccessSpecifier::Public);
        let hidden = results.iter().find(|e| e.display.starts_with("hidden\t")).expect("hidden");
        assert_eq!(hidden.access, AccessSpecifier::Private);
    }

    #[test]
    fn find_type_inside_namespace() {
        let (_dir, tu) = parse("namespace A { namespace B { struct S { int x; }; } }\n");
        let cache = SymbolCache::create(&tu);
        let symbols = cache.bind(&tu);
        let s = symbols.find_type(&["A".into(), "B".into()], "S").expect("S");
        assert_eq!(s.kind(), CursorKind::StructDecl);
        assert!(symbols.find_type(&["A".into()], "B::S").is_some());
        assert!(symbols.find_type(&[], "S").is_none());
    }
}
