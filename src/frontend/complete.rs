use std::collections::HashSet;
use std::path::Path;

use super::ast::{AccessSpecifier, Ast, CursorKind, EntityId, FileId, ROOT};
use super::completion_string;
use super::resolve::Filter;
use super::translation_unit::{Index, TranslationUnit, UnsavedFile};
use crate::parsehelp::extract_completion;

const MAX_BASE_DEPTH: usize = 16;

/// One result of the front end's own completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeCompletion {
    pub kind: CursorKind,
    pub display: String,
    pub insert: String,
    pub access: AccessSpecifier,
    pub is_static: bool,
}

impl TranslationUnit {
    /// Completes at a 1-based position. With `member` set the expression
    /// before the position (ending in `.`, `->` or `::`) is evaluated and
    /// its members are returned; otherwise every name visible at the
    /// position is. Unsaved buffers are parsed into a scratch unit; the
    /// receiver is left untouched.
    pub fn code_complete(
        &self,
        file: &Path,
        line: u32,
        column: u32,
        unsaved: &[UnsavedFile],
        member: bool,
    ) -> Vec<CodeCompletion> {
        let scratch;
        let tu: &TranslationUnit = if unsaved.is_empty() {
            self
        } else {
            match Index::create().parse(self.path(), self.args(), unsaved, self.flags()) {
                Ok(reparsed) => {
                    scratch = reparsed;
                    &scratch
                }
                Err(e) => {
                    tracing::warn!("Completion reparse of {} failed: {}", self.path().display(), e);
                    return Vec::new();
                }
            }
        };
        let ast = &tu.ast;
        let path = super::translation_unit::normalize_path(file);
        let Some(file_id) = ast.file_id(&path) else {
            return Vec::new();
        };
        let source = ast.file(file_id);
        let offset = source.offset(line, column);
        let scope = ast.scope_at(file_id, offset);

        let ids = if member {
            let before = &source.text[..offset];
            match extract_completion(before) {
                Some(expr) => ast.members_of_expression(scope, &expr),
                None => Vec::new(),
            }
        } else {
            ast.visible_names(scope)
        };

        let mut seen = HashSet::new();
        ids.into_iter()
            .filter_map(|id| {
                let e = ast.entity(id);
                let cs = completion_string::build(ast, id)?;
                let display = cs.display();
                seen.insert(display.clone()).then(|| CodeCompletion {
                    kind: e.kind,
                    display,
                    insert: cs.insert(),
                    access: e.access,
                    is_static: e.is_static,
                })
            })
            .collect()
    }
}

impl Ast {
    /// Innermost function, class or namespace containing `offset`.
    pub(crate) fn scope_at(&self, file: FileId, offset: usize) -> EntityId {
        let mut best = (ROOT, usize::MAX);
        for (id, e) in self.entities.iter().enumerate().skip(1) {
            let scope_like = e.kind.is_function_like() || e.kind.is_record() || e.kind == CursorKind::Namespace;
            if !scope_like || e.file != file || offset < e.extent.0 || offset > e.extent.1 {
                continue;
            }
            let size = e.extent.1 - e.extent.0;
            if size <= best.1 {
                best = (id, size);
            }
        }
        best.0
    }

    fn members_of_expression(&self, scope: EntityId, expr: &str) -> Vec<EntityId> {
        if let Some(prefix) = expr.strip_suffix("::") {
            let Some(target) = self.lookup_qualified(scope, prefix, Filter::Scope) else {
                return Vec::new();
            };
            let target = self.resolve_namespace_alias(target).unwrap_or(target);
            let target = self.returned(target).map(|(t, _)| t).unwrap_or(target);
            return self.declarations_in(target);
        }
        let object = expr
            .strip_suffix("->")
            .or_else(|| expr.strip_suffix('.'))
            .unwrap_or(expr);
        match self.eval_expression(scope, object, 0) {
            Some(record) => {
                let mut out = Vec::new();
                self.collect_members(record, true, 0, &mut HashSet::new(), &mut out);
                out
            }
            None => Vec::new(),
        }
    }

    fn collect_members(
        &self,
        record: EntityId,
        own: bool,
        depth: usize,
        visited: &mut HashSet<EntityId>,
        out: &mut Vec<EntityId>,
    ) {
        if depth > MAX_BASE_DEPTH || !visited.insert(record) {
            return;
        }
        for id in self.declarations_in(record) {
            let kind = self.entity(id).kind;
            if !own && matches!(kind, CursorKind::Constructor | CursorKind::Destructor) {
                continue;
            }
            out.push(id);
        }
        for (base, _) in self.bases(record) {
            self.collect_members(base, false, depth + 1, visited, out);
        }
    }

    /// Declarations directly in a scope, looking through anonymous records
    /// and unscoped enums.
    pub(crate) fn declarations_in(&self, scope: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        for id in self.scope_members(scope) {
            let e = self.entity(id);
            if !e.kind.is_declaration() {
                continue;
            }
            let transparent = (e.kind == CursorKind::EnumDecl && !e.scoped_enum)
                || (e.is_anonymous() && (e.kind.is_record() || e.kind == CursorKind::Namespace));
            if transparent {
                out.extend(
                    self.scope_members(id)
                        .into_iter()
                        .filter(|&c| self.entity(c).kind.is_declaration()),
                );
            }
            if !e.is_anonymous() {
                out.push(id);
            }
        }
        out
    }

    fn visible_names(&self, scope: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut current = Some(scope);
        let mut steps = 0;
        while let Some(s) = current {
            out.extend(self.declarations_in(s));
            for id in self.scope_members(s) {
                let e = self.entity(id);
                if e.kind != CursorKind::UsingDirective {
                    continue;
                }
                let parent = e.semantic_parent.unwrap_or(ROOT);
                let ns = e
                    .target
                    .as_deref()
                    .and_then(|t| self.lookup_qualified(parent, t, Filter::Namespace))
                    .and_then(|n| self.resolve_namespace_alias(n));
                if let Some(ns) = ns {
                    out.extend(self.declarations_in(ns));
                }
            }
            if self.entity(s).kind.is_record() {
                let mut visited = HashSet::new();
                for (base, _) in self.bases(s) {
                    self.collect_members(base, false, 0, &mut visited, &mut out);
                }
            }
            steps += 1;
            if steps > 64 {
                break;
            }
            let e = self.entity(s);
            current = e.semantic_parent.or(e.lexical_parent);
        }
        out
    }
}
