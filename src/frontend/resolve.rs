//! Name lookup over the lowered entity graph: references, definitions,
//! canonical declarations and the types expressions evaluate to.

use std::collections::HashSet;

use super::ast::{AccessSpecifier, Ast, CursorKind, EntityId, ROOT};
use crate::parsehelp::{
    collapse_parenthesis, collapse_square_brackets, get_base_type, split_root, tokenize_tail, Op,
    TailToken,
};

const MAX_DEPTH: usize = 12;

const PRIMITIVE_TYPES: &[&str] = &[
    "void", "bool", "char", "short", "int", "long", "float", "double", "signed", "unsigned",
    "wchar_t", "char8_t", "char16_t", "char32_t", "auto", "decltype", "_Bool",
];

/// Which declarations a lookup accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Any,
    Type,
    /// Anything that can appear before `::`.
    Scope,
    Namespace,
    Value,
    Function,
}

impl Filter {
    fn accepts(self, kind: CursorKind) -> bool {
        match self {
            Filter::Any => kind.is_declaration(),
            Filter::Type => kind.is_type_declaration(),
            Filter::Scope => kind.is_type_declaration() || kind.is_namespace(),
            Filter::Namespace => kind.is_namespace(),
            Filter::Value => matches!(
                kind,
                CursorKind::VarDecl
                    | CursorKind::FieldDecl
                    | CursorKind::ParmDecl
                    | CursorKind::EnumConstantDecl
                    | CursorKind::NonTypeTemplateParameter
                    | CursorKind::ObjCPropertyDecl
                    | CursorKind::ObjCIvarDecl
            ) || kind.is_function_like(),
            Filter::Function => kind.is_function_like(),
        }
    }
}

fn is_primitive(name: &str) -> bool {
    name.split_whitespace().all(|w| PRIMITIVE_TYPES.contains(&w))
}

/// Drops template argument lists but keeps spacing: `A<int>::B` is `A::B`.
fn without_template_args(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0u32;
    for c in s.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

impl Ast {
    fn namespace_key(&self, id: EntityId) -> String {
        match self.qualified.get(id) {
            Some(q) if !q.is_empty() => q.clone(),
            _ => self.lexical_qualified_name(id),
        }
    }

    /// Children visible in a scope, with re-opened namespace blocks merged.
    pub(crate) fn scope_members(&self, scope: EntityId) -> Vec<EntityId> {
        let e = self.entity(scope);
        if e.kind == CursorKind::Namespace {
            if let Some(blocks) = self.namespaces.get(&self.namespace_key(scope)) {
                return blocks
                    .iter()
                    .flat_map(|b| self.entity(*b).children.iter().copied())
                    .collect();
            }
        }
        e.children.clone()
    }

    /// Looks `name` up directly inside `scope`, following transparent
    /// members, using declarations/directives and base classes.
    pub(crate) fn find_in_scope(
        &self,
        scope: EntityId,
        name: &str,
        filter: Filter,
        depth: usize,
    ) -> Option<EntityId> {
        if depth > MAX_DEPTH {
            return None;
        }
        let members = self.scope_members(scope);
        let mut found = None;
        for &m in &members {
            let e = self.entity(m);
            if e.spelling != name
                || matches!(e.kind, CursorKind::UsingDirective | CursorKind::UsingDeclaration)
                || !filter.accepts(e.kind)
            {
                continue;
            }
            if e.is_definition {
                return Some(m);
            }
            found.get_or_insert(m);
        }
        if found.is_some() {
            return found;
        }

        for &m in &members {
            let e = self.entity(m);
            let transparent = (e.kind == CursorKind::EnumDecl && !e.scoped_enum)
                || (e.is_anonymous() && (e.kind.is_record() || e.kind == CursorKind::Namespace));
            if transparent && m != scope {
                if let Some(f) = self.find_in_scope(m, name, filter, depth + 1) {
                    return Some(f);
                }
            }
        }

        for &m in &members {
            let e = self.entity(m);
            let parent = e.semantic_parent.unwrap_or(ROOT);
            match (e.kind, e.target.as_deref()) {
                (CursorKind::UsingDeclaration, Some(target)) if e.spelling == name => {
                    if let Some(f) = self.lookup_qualified_inner(parent, target, filter, depth + 1) {
                        return Some(f);
                    }
                }
                (CursorKind::UsingDirective, Some(target)) => {
                    let ns = self
                        .lookup_qualified_inner(parent, target, Filter::Namespace, depth + 1)
                        .and_then(|n| self.resolve_namespace_alias_inner(n, depth + 1));
                    if let Some(ns) = ns.filter(|&n| n != scope) {
                        if let Some(f) = self.find_in_scope(ns, name, filter, depth + 1) {
                            return Some(f);
                        }
                    }
                }
                _ => {}
            }
        }

        if self.entity(scope).kind.is_record() {
            for (base, _) in self.bases_inner(scope, depth + 1) {
                if let Some(f) = self.find_in_scope(base, name, filter, depth + 1) {
                    return Some(f);
                }
            }
        }
        None
    }

    fn lookup_unqualified(&self, from: EntityId, name: &str, filter: Filter, depth: usize) -> Option<EntityId> {
        let mut scope = Some(from);
        let mut steps = 0;
        while let Some(s) = scope {
            if let Some(found) = self.find_in_scope(s, name, filter, depth) {
                return Some(found);
            }
            steps += 1;
            if steps > 64 {
                break;
            }
            let e = self.entity(s);
            scope = e.semantic_parent.or(e.lexical_parent);
        }
        None
    }

    /// Resolves a possibly qualified name as seen from `from`.
    pub fn lookup_qualified(&self, from: EntityId, name: &str, filter: Filter) -> Option<EntityId> {
        self.lookup_qualified_inner(from, name, filter, 0)
    }

    fn lookup_qualified_inner(
        &self,
        from: EntityId,
        name: &str,
        filter: Filter,
        depth: usize,
    ) -> Option<EntityId> {
        if depth > MAX_DEPTH {
            return None;
        }
        let name = without_template_args(name);
        let (global, rest) = match name.strip_prefix("::") {
            Some(r) => (true, r),
            None => (false, name.as_str()),
        };
        let parts: Vec<&str> = rest.split("::").map(str::trim).filter(|p| !p.is_empty()).collect();
        let (last, scopes) = parts.split_last()?;
        if scopes.is_empty() {
            return if global {
                self.find_in_scope(ROOT, last, filter, depth)
            } else {
                self.lookup_unqualified(from, last, filter, depth)
            };
        }
        let first = if global {
            self.find_in_scope(ROOT, scopes[0], Filter::Scope, depth)
        } else {
            self.lookup_unqualified(from, scopes[0], Filter::Scope, depth)
        }?;
        let mut current = self.scope_target(first, depth + 1)?;
        for part in &scopes[1..] {
            let next = self.find_in_scope(current, part, Filter::Scope, depth + 1)?;
            current = self.scope_target(next, depth + 1)?;
        }
        self.find_in_scope(current, last, filter, depth + 1)
    }

    /// The entity whose members a `X::` prefix names.
    fn scope_target(&self, id: EntityId, depth: usize) -> Option<EntityId> {
        match self.entity(id).kind {
            CursorKind::NamespaceAlias => self.resolve_namespace_alias_inner(id, depth),
            CursorKind::TypedefDecl | CursorKind::TypeAliasDecl => {
                self.returned_inner(id, depth).map(|(t, _)| t)
            }
            k if k.is_record() => Some(self.record_definition(id)),
            _ => Some(id),
        }
    }

    pub fn resolve_namespace_alias(&self, id: EntityId) -> Option<EntityId> {
        self.resolve_namespace_alias_inner(id, 0)
    }

    fn resolve_namespace_alias_inner(&self, id: EntityId, depth: usize) -> Option<EntityId> {
        let mut current = id;
        for step in 0..8 {
            let e = self.entity(current);
            match (e.kind, e.target.as_deref()) {
                (CursorKind::Namespace, _) => return Some(current),
                (CursorKind::NamespaceAlias, Some(target)) => {
                    let from = e.semantic_parent.unwrap_or(ROOT);
                    current = self.lookup_qualified_inner(from, target, Filter::Namespace, depth + step + 1)?;
                }
                _ => return None,
            }
        }
        None
    }

    /// The defining declaration of a record when one is visible.
    pub(crate) fn record_definition(&self, id: EntityId) -> EntityId {
        let e = self.entity(id);
        if e.is_definition {
            return id;
        }
        self.by_qualified
            .get(self.qualified_name(id))
            .and_then(|ids| {
                ids.iter()
                    .copied()
                    .find(|&c| self.entity(c).is_definition && self.same_family(c, id))
            })
            .unwrap_or(id)
    }

    fn same_family(&self, a: EntityId, b: EntityId) -> bool {
        let (ea, eb) = (self.entity(a), self.entity(b));
        if ea.kind.is_function_like() && eb.kind.is_function_like() {
            return ea.params.len() == eb.params.len();
        }
        if ea.kind.is_record() && eb.kind.is_record() {
            return true;
        }
        ea.kind == eb.kind
    }

    /// Base classes with their inheritance access.
    pub fn bases(&self, id: EntityId) -> Vec<(EntityId, AccessSpecifier)> {
        self.bases_inner(id, 0)
    }

    fn bases_inner(&self, id: EntityId, depth: usize) -> Vec<(EntityId, AccessSpecifier)> {
        if depth > MAX_DEPTH {
            return Vec::new();
        }
        let record = self.record_definition(id);
        let e = self.entity(record);
        // base names are looked up from the enclosing scope
        let outer = e.semantic_parent.unwrap_or(ROOT);
        let mut bases = Vec::new();
        for &child in &e.children {
            let spec = self.entity(child);
            if spec.kind != CursorKind::CxxBaseSpecifier {
                continue;
            }
            let name = without_template_args(&spec.spelling);
            let target = e
                .children
                .iter()
                .copied()
                .find(|&c| {
                    let t = self.entity(c);
                    t.kind == CursorKind::TemplateTypeParameter && t.spelling == name
                })
                .or_else(|| self.lookup_qualified_inner(outer, &name, Filter::Type, depth + 1))
                .and_then(|t| self.scope_target(t, depth + 1));
            if let Some(t) = target.filter(|&t| t != record) {
                bases.push((t, spec.access));
            }
        }
        bases
    }

    fn lookup_scope(&self, id: EntityId) -> EntityId {
        self.entity(id).lexical_parent.unwrap_or(ROOT)
    }

    fn written_name(&self, id: EntityId) -> String {
        let e = self.entity(id);
        match &e.qualifier {
            Some(q) if !q.is_empty() => format!("{}::{}", q, e.spelling),
            _ => e.spelling.clone(),
        }
    }

    /// The declaration a reference or expression refers to; declarations
    /// refer to themselves.
    pub fn reference(&self, id: EntityId) -> Option<EntityId> {
        self.reference_inner(id, 0)
    }

    fn reference_inner(&self, id: EntityId, depth: usize) -> Option<EntityId> {
        if depth > MAX_DEPTH {
            return None;
        }
        let e = self.entity(id);
        let scope = self.lookup_scope(id);
        match e.kind {
            CursorKind::TypeRef | CursorKind::TemplateRef => {
                self.lookup_qualified_inner(scope, &self.written_name(id), Filter::Type, depth)
            }
            CursorKind::NamespaceRef => {
                self.lookup_qualified_inner(scope, &self.written_name(id), Filter::Scope, depth)
            }
            CursorKind::DeclRefExpr => self
                .lookup_qualified_inner(scope, &self.written_name(id), Filter::Value, depth)
                .or_else(|| self.lookup_qualified_inner(scope, &self.written_name(id), Filter::Any, depth)),
            CursorKind::CallExpr => match &e.base_expr {
                Some(base) => {
                    let record = self.eval_expression(scope, base, depth + 1)?;
                    self.member_inner(record, &e.spelling, Some(true), depth + 1)
                }
                None => self
                    .lookup_qualified_inner(scope, &self.written_name(id), Filter::Function, depth)
                    .or_else(|| self.lookup_qualified_inner(scope, &self.written_name(id), Filter::Type, depth)),
            },
            CursorKind::MemberRefExpr => {
                let record = self.eval_expression(scope, e.base_expr.as_deref()?, depth + 1)?;
                self.member_inner(record, &e.spelling, Some(false), depth + 1)
                    .or_else(|| self.member_inner(record, &e.spelling, None, depth + 1))
            }
            CursorKind::CxxBaseSpecifier => {
                let first = e.children.first().copied()?;
                self.reference_inner(first, depth + 1)
            }
            CursorKind::InclusionDirective | CursorKind::TranslationUnit => None,
            _ => Some(id),
        }
    }

    /// The entity defining `id`, possibly elsewhere in the translation unit.
    pub fn definition(&self, id: EntityId) -> Option<EntityId> {
        let target = self.reference(id)?;
        let e = self.entity(target);
        if e.is_definition {
            return Some(target);
        }
        let defines = e.kind.is_function_like()
            || e.kind.is_record()
            || matches!(e.kind, CursorKind::EnumDecl | CursorKind::VarDecl);
        if !defines {
            return None;
        }
        let qualified = self.qualified_name(target);
        self.by_qualified.get(qualified).and_then(|ids| {
            ids.iter()
                .copied()
                .find(|&c| self.entity(c).is_definition && self.same_family(c, target))
        })
    }

    /// The first declaration of the entity `id` declares.
    pub fn canonical(&self, id: EntityId) -> EntityId {
        if !self.is_scoped_declaration(id) {
            return id;
        }
        self.by_qualified
            .get(self.qualified_name(id))
            .and_then(|ids| ids.iter().copied().find(|&c| self.same_family(c, id)))
            .map(|c| c.min(id))
            .unwrap_or(id)
    }

    /// The type entity an entity evaluates to, with the pointer level of
    /// its declared type. Complex typedefs (with template arguments) are
    /// returned themselves.
    pub fn returned(&self, id: EntityId) -> Option<(EntityId, u32)> {
        self.returned_inner(id, 0)
    }

    fn returned_inner(&self, id: EntityId, depth: usize) -> Option<(EntityId, u32)> {
        if depth > MAX_DEPTH {
            return None;
        }
        let e = self.entity(id);
        match e.kind {
            k if k.is_record() => Some((self.record_definition(id), 0)),
            CursorKind::EnumDecl | CursorKind::Namespace | CursorKind::TemplateTypeParameter => Some((id, 0)),
            CursorKind::NamespaceAlias => self.resolve_namespace_alias_inner(id, depth).map(|n| (n, 0)),
            CursorKind::EnumConstantDecl | CursorKind::Constructor => e.semantic_parent.map(|p| (p, 0)),
            CursorKind::TypedefDecl | CursorKind::TypeAliasDecl => {
                let ty = e.ty.as_ref()?;
                if ty.base.contains('<') {
                    return Some((id, ty.pointer_level));
                }
                let target = self.resolve_type_text(id, &ty.base, depth + 1)?;
                let (t, level) = self.returned_inner(target, depth + 1)?;
                Some((t, level + ty.pointer_level))
            }
            CursorKind::VarDecl
            | CursorKind::FieldDecl
            | CursorKind::ParmDecl
            | CursorKind::ObjCPropertyDecl
            | CursorKind::ObjCIvarDecl => self.returned_of_type(id, depth),
            k if k.is_function_like() => self.returned_of_type(id, depth),
            k if k.is_reference() || k.is_expression() => {
                let target = self.reference_inner(id, depth + 1)?;
                if target == id {
                    return None;
                }
                self.returned_inner(target, depth + 1)
            }
            _ => None,
        }
    }

    fn returned_of_type(&self, id: EntityId, depth: usize) -> Option<(EntityId, u32)> {
        let ty = self.entity(id).ty.as_ref()?;
        let target = self.resolve_type_text(id, &ty.base, depth + 1)?;
        let (t, level) = self.returned_inner(target, depth + 1)?;
        Some((t, level + ty.pointer_level))
    }

    /// Resolves a type as written, from the scope of `from`.
    pub fn resolve_type_text(&self, from: EntityId, text: &str, depth: usize) -> Option<EntityId> {
        let base = get_base_type(text);
        let name = without_template_args(&base);
        if name.is_empty() || is_primitive(&name) {
            return None;
        }
        let scope = match self.entity(from).kind {
            k if k.is_function_like() || k.is_type_declaration() => from,
            _ => self.lookup_scope(from),
        };
        self.lookup_qualified_inner(scope, &name, Filter::Type, depth)
    }

    /// The innermost class around an entity.
    pub fn enclosing_record(&self, id: EntityId) -> Option<EntityId> {
        let mut current = Some(id);
        let mut steps = 0;
        while let Some(c) = current {
            let e = self.entity(c);
            if e.kind.is_record() {
                return Some(self.record_definition(c));
            }
            steps += 1;
            if steps > 64 {
                break;
            }
            current = e.semantic_parent;
        }
        None
    }

    /// Looks up a member of the record (or typedef of a record) `id`.
    /// `is_function` selects methods, non-methods, or either when `None`.
    pub fn member(&self, id: EntityId, name: &str, is_function: Option<bool>) -> Option<EntityId> {
        self.member_inner(id, name, is_function, 0)
    }

    fn member_inner(&self, id: EntityId, name: &str, is_function: Option<bool>, depth: usize) -> Option<EntityId> {
        let (record, _) = self.returned_inner(id, depth)?;
        let mut visited = HashSet::new();
        self.find_member(record, name, is_function, depth, &mut visited)
    }

    fn find_member(
        &self,
        record: EntityId,
        name: &str,
        is_function: Option<bool>,
        depth: usize,
        visited: &mut HashSet<EntityId>,
    ) -> Option<EntityId> {
        if depth > MAX_DEPTH || !visited.insert(record) {
            return None;
        }
        let e = self.entity(record);
        if !e.kind.is_record() && e.kind != CursorKind::EnumDecl {
            return None;
        }
        for &child in &e.children {
            let c = self.entity(child);
            if !c.kind.is_declaration() {
                continue;
            }
            if c.is_anonymous() && c.kind.is_record() {
                if let Some(found) = self.find_member(child, name, is_function, depth + 1, visited) {
                    return Some(found);
                }
                continue;
            }
            let kind_ok = match is_function {
                Some(true) => c.kind.is_function_like(),
                Some(false) => !c.kind.is_function_like(),
                None => true,
            };
            if kind_ok && c.spelling == name {
                return Some(child);
            }
        }
        for (base, _) in self.bases_inner(record, depth + 1) {
            if let Some(found) = self.find_member(base, name, is_function, depth + 1, visited) {
                return Some(found);
            }
        }
        None
    }

    /// The record type an expression such as `a.b()->c` evaluates to.
    pub fn eval_expression(&self, scope: EntityId, expr: &str, depth: usize) -> Option<EntityId> {
        if depth > MAX_DEPTH {
            return None;
        }
        let collapsed = collapse_square_brackets(&collapse_parenthesis(expr.trim()));
        let (root, rest) = split_root(&collapsed)?;
        let (is_call, rest) = match rest.strip_prefix("()") {
            Some(r) => (true, r),
            None => (false, rest),
        };
        let tail = tokenize_tail(rest)?;
        let mut current = if root == "this" {
            self.enclosing_record(scope)?
        } else if is_call {
            let f = self
                .lookup_qualified_inner(scope, root, Filter::Function, depth + 1)
                .or_else(|| self.lookup_qualified_inner(scope, root, Filter::Type, depth + 1))?;
            self.returned_inner(f, depth + 1)?.0
        } else {
            let v = self
                .lookup_qualified_inner(scope, root, Filter::Value, depth + 1)
                .or_else(|| self.lookup_qualified_inner(scope, root, Filter::Scope, depth + 1))?;
            self.returned_inner(v, depth + 1)?.0
        };
        for token in tail {
            match token {
                TailToken::Member { name, call } => {
                    let m = self
                        .member_inner(current, &name, Some(call), depth + 1)
                        .or_else(|| self.member_inner(current, &name, None, depth + 1))?;
                    current = self.returned_inner(m, depth + 1)?.0;
                }
                TailToken::Op(op @ (Op::Subscript | Op::Call | Op::Arrow)) => {
                    let operator = match op {
                        Op::Subscript => "operator[]",
                        Op::Call => "operator()",
                        _ => "operator->",
                    };
                    if let Some(m) = self.member_inner(current, operator, Some(true), depth + 1) {
                        current = self.returned_inner(m, depth + 1)?.0;
                    }
                }
                TailToken::Op(_) => {}
            }
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_accept_expected_kinds() {
        assert!(Filter::Type.accepts(CursorKind::TypedefDecl));
        assert!(!Filter::Type.accepts(CursorKind::Namespace));
        assert!(Filter::Scope.accepts(CursorKind::NamespaceAlias));
        assert!(Filter::Value.accepts(CursorKind::CxxMethod));
        assert!(!Filter::Function.accepts(CursorKind::FieldDecl));
    }

    #[test]
    fn primitive_names() {
        assert!(is_primitive("unsigned long"));
        assert!(!is_primitive("Foo"));
        assert_eq!(without_template_args("std::vector<int>"), "std::vector");
        assert_eq!(without_template_args("A<B<int> >::C"), "A::C");
    }
}
