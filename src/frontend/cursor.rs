use std::fmt;
use std::path::Path;

use super::ast::{AccessSpecifier, Ast, CursorKind, Entity, EntityId, SourceLocation};
use super::completion_string::{self, CompletionString};

/// A handle to one entity of a translation unit. Cursors borrow the unit
/// and cannot outlive it.
#[derive(Clone, Copy)]
pub struct Cursor<'tu> {
    ast: &'tu Ast,
    id: EntityId,
}

impl PartialEq for Cursor<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.ast, other.ast) && self.id == other.id
    }
}

impl Eq for Cursor<'_> {}

impl fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("kind", &self.kind())
            .field("spelling", &self.spelling())
            .field("location", &self.location().to_string())
            .finish()
    }
}

impl<'tu> Cursor<'tu> {
    pub(crate) fn new(ast: &'tu Ast, id: EntityId) -> Self {
        Self { ast, id }
    }

    fn wrap(&self, id: EntityId) -> Cursor<'tu> {
        Cursor::new(self.ast, id)
    }

    fn entity(&self) -> &'tu Entity {
        self.ast.entity(self.id)
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> CursorKind {
        self.entity().kind
    }

    pub fn spelling(&self) -> &'tu str {
        &self.entity().spelling
    }

    /// Spelling plus parameter types for functions and parameter names for
    /// class templates: `f(int, Foo &)`, `sp<T>`.
    pub fn displayname(&self) -> String {
        let e = self.entity();
        if e.kind.is_function_like() {
            let params: Vec<String> = e.params.iter().map(|p| p.ty.display()).collect();
            return format!("{}({})", e.spelling, params.join(", "));
        }
        if e.kind == CursorKind::ClassTemplate {
            let params: Vec<&str> = self.template_parameters().iter().map(|c| c.spelling()).collect();
            return format!("{}<{}>", e.spelling, params.join(", "));
        }
        e.spelling.clone()
    }

    pub fn qualified_name(&self) -> &'tu str {
        self.ast.qualified_name(self.id)
    }

    pub fn location(&self) -> SourceLocation {
        self.ast.location(self.id)
    }

    /// Byte range of the cursor in its file.
    pub fn extent(&self) -> (usize, usize) {
        self.entity().extent
    }

    pub fn file(&self) -> Option<&'tu Path> {
        self.ast.files.get(self.entity().file).map(|f| f.path.as_path())
    }

    pub fn children(&self) -> Vec<Cursor<'tu>> {
        self.entity().children.iter().map(|&c| self.wrap(c)).collect()
    }

    pub fn lexical_parent(&self) -> Option<Cursor<'tu>> {
        self.entity().lexical_parent.map(|p| self.wrap(p))
    }

    pub fn semantic_parent(&self) -> Option<Cursor<'tu>> {
        self.entity().semantic_parent.map(|p| self.wrap(p))
    }

    pub fn reference(&self) -> Option<Cursor<'tu>> {
        self.ast.reference(self.id).map(|r| self.wrap(r))
    }

    pub fn definition(&self) -> Option<Cursor<'tu>> {
        self.ast.definition(self.id).map(|d| self.wrap(d))
    }

    pub fn canonical(&self) -> Cursor<'tu> {
        self.wrap(self.ast.canonical(self.id))
    }

    /// The type declaration this cursor evaluates to: the record of a
    /// variable's type, the return type of a function, the target of a
    /// simple typedef.
    pub fn returned_cursor(&self) -> Option<Cursor<'tu>> {
        self.ast.returned(self.id).map(|(r, _)| self.wrap(r))
    }

    pub fn returned_pointer_level(&self) -> u32 {
        self.ast.returned(self.id).map(|(_, level)| level).unwrap_or(0)
    }

    pub fn member(&self, name: &str, is_function: bool) -> Option<Cursor<'tu>> {
        self.ast
            .member(self.id, name, Some(is_function))
            .map(|m| self.wrap(m))
    }

    pub fn bases(&self) -> Vec<(Cursor<'tu>, AccessSpecifier)> {
        self.ast
            .bases(self.id)
            .into_iter()
            .map(|(b, access)| (self.wrap(b), access))
            .collect()
    }

    pub fn included_file(&self) -> Option<&'tu Path> {
        self.entity().included_file.as_deref()
    }

    pub fn access(&self) -> AccessSpecifier {
        self.entity().access
    }

    pub fn is_static(&self) -> bool {
        self.entity().is_static
    }

    pub fn is_definition(&self) -> bool {
        self.entity().is_definition
    }

    pub fn is_anonymous(&self) -> bool {
        self.entity().is_anonymous()
    }

    pub fn is_scoped_enum(&self) -> bool {
        self.entity().scoped_enum
    }

    /// Declared type (or result type) as written.
    pub fn type_spelling(&self) -> Option<String> {
        self.entity().ty.as_ref().map(|t| t.display())
    }

    /// Base part of the declared type: `std::vector<int>` for
    /// `const std::vector<int> *`.
    pub fn type_base(&self) -> Option<&'tu str> {
        self.entity().ty.as_ref().map(|t| t.base.as_str())
    }

    /// What a using declaration, using directive or namespace alias names.
    pub fn target(&self) -> Option<&'tu str> {
        self.entity().target.as_deref()
    }

    pub fn template_parameters(&self) -> Vec<Cursor<'tu>> {
        self.entity()
            .children
            .iter()
            .copied()
            .filter(|&c| self.ast.entity(c).kind == CursorKind::TemplateTypeParameter)
            .map(|c| self.wrap(c))
            .collect()
    }

    pub fn completion_string(&self) -> Option<CompletionString> {
        completion_string::build(self.ast, self.id)
    }

    /// Resolves a type name as seen from this cursor's scope.
    pub fn resolve_type(&self, name: &str) -> Option<Cursor<'tu>> {
        self.ast.resolve_type_text(self.id, name, 0).map(|t| self.wrap(t))
    }

    /// Looks up a name in this scope (namespace, class, function, unit).
    pub fn lookup(&self, name: &str, filter: super::resolve::Filter) -> Option<Cursor<'tu>> {
        self.ast.lookup_qualified(self.id, name, filter).map(|t| self.wrap(t))
    }

    /// Namespace aliases resolve to the namespace they name.
    pub fn resolve_alias(&self) -> Option<Cursor<'tu>> {
        self.ast.resolve_namespace_alias(self.id).map(|n| self.wrap(n))
    }

    /// All blocks of the namespace this cursor belongs to, merged.
    pub fn scope_members(&self) -> Vec<Cursor<'tu>> {
        self.ast
            .scope_members(self.id)
            .into_iter()
            .map(|c| self.wrap(c))
            .collect()
    }
}

/// `file:line:column` of a cursor.
pub fn format_cursor(cursor: &Cursor<'_>) -> String {
    cursor.location().to_string()
}
