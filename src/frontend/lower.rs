use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use streaming_iterator::StreamingIterator;
use tracing::{debug, warn};
use tree_sitter::{Node, Parser, Query, QueryCursor};

use super::ast::{AccessSpecifier, Ast, CursorKind, Entity, EntityId, FileId, Param, TypeSpelling};
use super::queries::get_language_config;
use super::resolve::Filter;
use super::translation_unit::{
    normalize_path, read_source, CompileArgs, Diagnostic, ParseFlags, Severity, UnsavedFile,
};
use crate::error::Result;

const MAX_INCLUDE_DEPTH: usize = 64;
const MAX_SYNTAX_ERRORS_PER_FILE: usize = 20;

static OBJC_CONTAINER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*@(?P<kw>interface|implementation|protocol)\s+(?P<name>\w+)\s*(?:\(\s*(?P<category>\w*)\s*\))?\s*(?::\s*(?P<super>\w+))?(?P<forward>\s*;)?",
    )
    .expect("Invalid ObjC container regex")
});

static OBJC_METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?P<sign>[-+])\s*\((?P<ret>[^)]*)\)\s*(?P<sel>[^;{]+)")
        .expect("Invalid ObjC method regex")
});

static OBJC_SELECTOR_PART_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<part>\w+)\s*(?::\s*(?:\((?P<ty>[^)]*)\))?\s*(?P<arg>\w+))?")
        .expect("Invalid ObjC selector regex")
});

static OBJC_PROPERTY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*@property\s*(?:\([^)]*\))?\s*(?P<ty>[\w\s<>]+?)\s*(?P<ptr>\**)\s*(?P<name>\w+)\s*;")
        .expect("Invalid ObjC property regex")
});

static OBJC_IVAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?P<ty>[A-Za-z_][\w<>]*)\s*(?P<ptr>\**)\s*(?P<name>\w+)\s*;")
        .expect("Invalid ObjC ivar regex")
});

/// Lowering state for one translation unit.
pub(crate) struct Lowering<'a> {
    pub ast: Ast,
    args: &'a CompileArgs,
    unsaved: &'a [UnsavedFile],
    flags: ParseFlags,
    parser: Parser,
    query: Query,
    objc: bool,
    visited: HashSet<PathBuf>,
    depth: usize,
    pub diagnostics: Vec<Diagnostic>,
    /// Definitions written with a qualifier (`void A::f() {}`) whose
    /// semantic parent is resolved once everything is lowered.
    pending: Vec<(EntityId, String)>,
}

#[derive(Debug, Clone)]
struct Scope {
    parent: EntityId,
    access: AccessSpecifier,
    class_name: Option<String>,
}

impl Scope {
    fn new(parent: EntityId) -> Self {
        Self {
            parent,
            access: AccessSpecifier::Invalid,
            class_name: None,
        }
    }
}

#[derive(Default)]
struct DeclaratorInfo<'t> {
    name: Option<Node<'t>>,
    function: Option<Node<'t>>,
    pointer_level: u32,
    array_dims: u32,
    is_reference: bool,
}

struct RefCapture<'t> {
    node: Node<'t>,
    capture: &'static str,
    priority: u8,
}

impl<'a> Lowering<'a> {
    pub fn new(
        main: &Path,
        args: &'a CompileArgs,
        unsaved: &'a [UnsavedFile],
        flags: ParseFlags,
    ) -> Result<Self> {
        let config = get_language_config(args.language);
        let mut parser = Parser::new();
        parser.set_language(&config.language)?;
        let query = Query::new(&config.language, config.references_query)?;
        Ok(Self {
            ast: Ast::new(main),
            args,
            unsaved,
            flags,
            parser,
            query,
            objc: args.language.is_objc(),
            visited: HashSet::new(),
            depth: 0,
            diagnostics: Vec::new(),
            pending: Vec::new(),
        })
    }

    /// Lowers `path` and everything it includes under `parent`.
    pub fn lower_file(&mut self, path: &Path, parent: EntityId) -> Result<FileId> {
        let text = read_source(path, self.unsaved)?;
        let tree = self
            .parser
            .parse(&text, None)
            .ok_or_else(|| crate::error::Error::Parse(path.to_path_buf()))?;
        let file = self.ast.add_file(path.to_path_buf(), text.clone());
        self.visited.insert(path.to_path_buf());

        let objc_ranges = if self.objc {
            self.lower_objc(file, &text, parent)
        } else {
            Vec::new()
        };
        self.report_syntax_errors(tree.root_node(), file, &objc_ranges);

        let mut scope = Scope::new(parent);
        self.lower_items(tree.root_node(), file, &text, &mut scope, &objc_ranges);
        debug!("Lowered {} ({} entities so far)", path.display(), self.ast.len());
        Ok(file)
    }

    /// Resolves out-of-line definitions and builds the lookup tables.
    pub fn finish(mut self) -> (Ast, Vec<Diagnostic>) {
        self.ast.index_namespaces();
        for (id, qualifier) in std::mem::take(&mut self.pending) {
            let from = self.ast.entity(id).lexical_parent.unwrap_or(super::ast::ROOT);
            let Some(target) = self.ast.lookup_qualified(from, &qualifier, Filter::Scope) else {
                continue;
            };
            let target = self.ast.resolve_namespace_alias(target).unwrap_or(target);
            let target_kind = self.ast.entity(target).kind;
            let spelling = self.ast.entity(id).spelling.clone();
            let declared = self
                .ast
                .entity(target)
                .children
                .iter()
                .copied()
                .find(|&c| self.ast.entity(c).spelling == spelling && !self.ast.entity(c).is_definition);
            let (access, is_static) = declared
                .map(|d| (self.ast.entity(d).access, self.ast.entity(d).is_static))
                .unwrap_or((AccessSpecifier::Invalid, false));
            let e = self.ast.entity_mut(id);
            e.semantic_parent = Some(target);
            if target_kind == CursorKind::Namespace {
                if matches!(e.kind, CursorKind::CxxMethod | CursorKind::ConversionFunction) {
                    e.kind = CursorKind::FunctionDecl;
                }
            } else {
                e.access = access;
                e.is_static |= is_static;
            }
        }
        self.ast.index_declarations();
        (self.ast, self.diagnostics)
    }

    fn lower_items(
        &mut self,
        node: Node,
        file: FileId,
        src: &str,
        scope: &mut Scope,
        skip: &[(usize, usize)],
    ) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            if skip.iter().any(|&(s, e)| child.start_byte() >= s && child.start_byte() < e) {
                continue;
            }
            self.lower_item(child, file, src, scope, None);
        }
    }

    fn lower_item(
        &mut self,
        node: Node,
        file: FileId,
        src: &str,
        scope: &mut Scope,
        template: Option<Node>,
    ) {
        match node.kind() {
            "access_specifier" => {
                scope.access = AccessSpecifier::from_keyword(text(node, src));
            }
            "namespace_definition" => self.lower_namespace(node, file, src, scope),
            "namespace_alias_definition" => self.lower_namespace_alias(node, file, src, scope),
            "using_declaration" => self.lower_using(node, file, src, scope),
            "alias_declaration" => self.lower_type_alias(node, file, src, scope),
            "type_definition" => self.lower_typedef(node, file, src, scope),
            "class_specifier" | "struct_specifier" | "union_specifier" => {
                self.lower_record(node, file, src, scope, template);
            }
            "enum_specifier" => {
                self.lower_enum(node, file, src, scope);
            }
            "template_declaration" => {
                let params = node.child_by_field_name("parameters");
                let mut cursor = node.walk();
                let inner: Vec<Node> = node
                    .named_children(&mut cursor)
                    .filter(|c| Some(*c) != params)
                    .collect();
                for child in inner {
                    self.lower_item(child, file, src, scope, params);
                }
            }
            "function_definition" | "inline_method_definition" => {
                self.lower_function_definition(node, file, src, scope, template);
            }
            "declaration" | "field_declaration" => {
                self.lower_declaration(node, file, src, scope, template);
            }
            "preproc_include" => self.lower_include(node, file, src, scope),
            "preproc_def" | "preproc_function_def" => self.lower_macro(node, file, src, scope),
            "preproc_if" | "preproc_ifdef" | "preproc_else" | "preproc_elif" | "preproc_elifdef"
            | "declaration_list" | "field_declaration_list" | "ERROR" => {
                self.lower_items(node, file, src, scope, &[]);
            }
            "linkage_specification" => {
                if let Some(body) = node.child_by_field_name("body") {
                    if body.kind() == "declaration_list" {
                        self.lower_items(body, file, src, scope, &[]);
                    } else {
                        self.lower_item(body, file, src, scope, None);
                    }
                }
            }
            _ => {}
        }
    }

    fn push(&mut self, parent: EntityId, entity: Entity) -> EntityId {
        self.ast.push(parent, entity)
    }

    // -----------------------------------------------------------------------
    // Namespaces and using
    // -----------------------------------------------------------------------

    fn lower_namespace(&mut self, node: Node, file: FileId, src: &str, scope: &Scope) {
        let name_node = node.child_by_field_name("name");
        let name = name_node.map(|n| text(n, src)).unwrap_or("");
        let parts: Vec<&str> = if name.is_empty() {
            vec![""]
        } else {
            name.split("::").map(str::trim).collect()
        };
        let mut parent = scope.parent;
        for part in parts {
            let mut e = Entity::new(CursorKind::Namespace, part, file);
            e.name_start = name_node.map(|n| n.start_byte()).unwrap_or(node.start_byte());
            e.extent = range(node);
            e.is_definition = true;
            parent = self.push(parent, e);
        }
        if let Some(body) = node.child_by_field_name("body") {
            let mut inner = Scope::new(parent);
            self.lower_items(body, file, src, &mut inner, &[]);
        }
    }

    fn lower_namespace_alias(&mut self, node: Node, file: FileId, src: &str, scope: &Scope) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let count = node.named_child_count();
        let Some(target) = node.named_child(count.saturating_sub(1)).filter(|t| *t != name) else {
            return;
        };
        let mut e = Entity::new(CursorKind::NamespaceAlias, text(name, src), file);
        e.name_start = name.start_byte();
        e.extent = range(node);
        e.is_definition = true;
        e.target = Some(normalize_spaces(text(target, src)));
        self.push(scope.parent, e);
    }

    fn lower_using(&mut self, node: Node, file: FileId, src: &str, scope: &Scope) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        let directive = children.iter().any(|c| c.kind() == "namespace");
        let Some(target) = children.iter().rev().find(|c| c.is_named()) else {
            return;
        };
        let target_text = normalize_spaces(text(*target, src));
        let (kind, spelling) = if directive {
            (CursorKind::UsingDirective, target_text.clone())
        } else {
            let last = target_text.rsplit("::").next().unwrap_or(&target_text).to_string();
            (CursorKind::UsingDeclaration, last)
        };
        let mut e = Entity::new(kind, spelling, file);
        e.name_start = target.start_byte();
        e.extent = range(node);
        e.access = scope.access;
        e.target = Some(target_text);
        let id = self.push(scope.parent, e);
        if directive {
            self.add_type_refs(id, *target, file, src, None);
        }
    }

    // -----------------------------------------------------------------------
    // Types
    // -----------------------------------------------------------------------

    fn lower_type_alias(&mut self, node: Node, file: FileId, src: &str, scope: &Scope) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let Some(descriptor) = node.child_by_field_name("type") else {
            return;
        };
        let mut e = Entity::new(CursorKind::TypeAliasDecl, text(name, src), file);
        e.name_start = name.start_byte();
        e.extent = range(node);
        e.access = scope.access;
        e.is_definition = true;
        e.ty = Some(descriptor_spelling(descriptor, src));
        let id = self.push(scope.parent, e);
        self.add_type_refs(id, descriptor, file, src, None);
    }

    fn lower_typedef(&mut self, node: Node, file: FileId, src: &str, scope: &mut Scope) {
        let Some(type_node) = node.child_by_field_name("type") else {
            return;
        };
        let mut cursor = node.walk();
        let declarators: Vec<Node> = node.children_by_field_name("declarator", &mut cursor).collect();

        let inline_record = is_tag_specifier(type_node) && type_node.child_by_field_name("body").is_some();
        let mut record_name = None;
        if inline_record {
            let anonymous = type_node.child_by_field_name("name").is_none();
            let alias = declarators
                .first()
                .and_then(|d| analyze_declarator(*d).name)
                .map(|n| text(n, src).to_string());
            let id = if type_node.kind() == "enum_specifier" {
                self.lower_enum(type_node, file, src, scope)
            } else {
                self.lower_record(type_node, file, src, scope, None)
            };
            if let (Some(id), true, Some(alias)) = (id, anonymous, alias) {
                // `typedef struct { ... } Foo;` names the struct itself
                self.ast.entity_mut(id).spelling = alias.clone();
                record_name = Some(alias);
            } else if let Some(id) = id {
                record_name = Some(self.ast.entity(id).spelling.clone());
            }
        }

        for d in declarators {
            let info = analyze_declarator(d);
            let Some(name) = info.name else {
                continue;
            };
            let (_, spelling, start) = split_name(name, src);
            if record_name.as_deref() == Some(spelling.as_str()) && info.pointer_level == 0 {
                continue;
            }
            let mut e = Entity::new(CursorKind::TypedefDecl, spelling, file);
            e.name_start = start;
            e.extent = (node.start_byte(), d.end_byte());
            e.access = scope.access;
            e.is_definition = true;
            let mut ty = type_spelling(node, type_node, &info, src);
            if let Some(record) = &record_name {
                ty.base = record.clone();
            }
            e.ty = Some(ty);
            let id = self.push(scope.parent, e);
            if !inline_record {
                self.add_type_refs(id, type_node, file, src, None);
            }
        }
    }

    fn lower_record(
        &mut self,
        node: Node,
        file: FileId,
        src: &str,
        scope: &Scope,
        template: Option<Node>,
    ) -> Option<EntityId> {
        let name_node = node.child_by_field_name("name");
        let body = node.child_by_field_name("body");
        if name_node.is_none() && body.is_none() {
            return None;
        }
        let name = name_node
            .map(|n| split_name(n, src).1)
            .unwrap_or_default();
        let (kind, default_access) = match node.kind() {
            "class_specifier" => (CursorKind::ClassDecl, AccessSpecifier::Private),
            "union_specifier" => (CursorKind::UnionDecl, AccessSpecifier::Public),
            _ => (CursorKind::StructDecl, AccessSpecifier::Public),
        };
        let kind = if template.is_some() {
            CursorKind::ClassTemplate
        } else {
            kind
        };
        let mut e = Entity::new(kind, name.clone(), file);
        e.name_start = name_node.map(|n| n.start_byte()).unwrap_or(node.start_byte());
        e.extent = range(node);
        e.access = scope.access;
        e.is_definition = body.is_some();
        let id = self.push(scope.parent, e);

        if let Some(params) = template {
            self.lower_template_params(params, id, file, src);
        }
        let mut cursor = node.walk();
        let clauses: Vec<Node> = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "base_class_clause")
            .collect();
        for clause in clauses {
            self.lower_bases(clause, id, default_access, file, src);
        }
        if let Some(body) = body {
            let mut inner = Scope {
                parent: id,
                access: default_access,
                class_name: Some(name),
            };
            self.lower_items(body, file, src, &mut inner, &[]);
        }
        Some(id)
    }

    fn lower_bases(
        &mut self,
        clause: Node,
        class: EntityId,
        default_access: AccessSpecifier,
        file: FileId,
        src: &str,
    ) {
        let mut access = None;
        let mut cursor = clause.walk();
        let children: Vec<Node> = clause.children(&mut cursor).collect();
        for child in children {
            match child.kind() {
                "," => access = None,
                "access_specifier" => access = Some(AccessSpecifier::from_keyword(text(child, src))),
                "public" | "protected" | "private" => access = Some(AccessSpecifier::from_keyword(child.kind())),
                _ if child.is_named() => {
                    let mut e = Entity::new(CursorKind::CxxBaseSpecifier, normalize_spaces(text(child, src)), file);
                    e.name_start = child.start_byte();
                    e.extent = range(child);
                    e.access = access.unwrap_or(default_access);
                    let id = self.push(class, e);
                    self.add_type_refs(id, child, file, src, None);
                }
                _ => {}
            }
        }
    }

    fn lower_template_params(&mut self, params: Node, owner: EntityId, file: FileId, src: &str) {
        let mut cursor = params.walk();
        let children: Vec<Node> = params.named_children(&mut cursor).collect();
        for param in children {
            let (kind, name) = match param.kind() {
                "type_parameter_declaration"
                | "optional_type_parameter_declaration"
                | "variadic_type_parameter_declaration" => {
                    let name = param.child_by_field_name("name").or_else(|| {
                        let mut c = param.walk();
                        let found = param.named_children(&mut c).find(|n| n.kind() == "type_identifier");
                        found
                    });
                    (CursorKind::TemplateTypeParameter, name)
                }
                "parameter_declaration" | "optional_parameter_declaration" => (
                    CursorKind::NonTypeTemplateParameter,
                    param
                        .child_by_field_name("declarator")
                        .and_then(|d| analyze_declarator(d).name),
                ),
                _ => continue,
            };
            let Some(name) = name else {
                continue;
            };
            let mut e = Entity::new(kind, text(name, src), file);
            e.name_start = name.start_byte();
            e.extent = range(param);
            e.is_definition = true;
            self.push(owner, e);
        }
    }

    fn lower_enum(&mut self, node: Node, file: FileId, src: &str, scope: &Scope) -> Option<EntityId> {
        let name_node = node.child_by_field_name("name");
        let body = node.child_by_field_name("body");
        if name_node.is_none() && body.is_none() {
            return None;
        }
        let mut cursor = node.walk();
        let scoped = node
            .children(&mut cursor)
            .any(|c| c.kind() == "class" || c.kind() == "struct");
        let mut e = Entity::new(
            CursorKind::EnumDecl,
            name_node.map(|n| split_name(n, src).1).unwrap_or_default(),
            file,
        );
        e.name_start = name_node.map(|n| n.start_byte()).unwrap_or(node.start_byte());
        e.extent = range(node);
        e.access = scope.access;
        e.is_definition = body.is_some();
        e.scoped_enum = scoped;
        let access = scope.access;
        let id = self.push(scope.parent, e);
        if let Some(body) = body {
            let mut cursor = body.walk();
            let enumerators: Vec<Node> = body
                .named_children(&mut cursor)
                .filter(|c| c.kind() == "enumerator")
                .collect();
            for enumerator in enumerators {
                let Some(name) = enumerator.child_by_field_name("name") else {
                    continue;
                };
                let mut c = Entity::new(CursorKind::EnumConstantDecl, text(name, src), file);
                c.name_start = name.start_byte();
                c.extent = range(enumerator);
                c.access = access;
                c.is_definition = true;
                self.push(id, c);
            }
        }
        Some(id)
    }

    // -----------------------------------------------------------------------
    // Functions and variables
    // -----------------------------------------------------------------------

    fn lower_function_definition(
        &mut self,
        node: Node,
        file: FileId,
        src: &str,
        scope: &Scope,
        template: Option<Node>,
    ) {
        let Some(declarator) = node.child_by_field_name("declarator") else {
            return;
        };
        let info = analyze_declarator(declarator);
        if info.function.is_some() {
            let type_node = node.child_by_field_name("type");
            self.lower_function(node, type_node, &info, file, src, scope, template, true);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_function(
        &mut self,
        node: Node,
        type_node: Option<Node>,
        info: &DeclaratorInfo,
        file: FileId,
        src: &str,
        scope: &Scope,
        template: Option<Node>,
        is_definition: bool,
    ) -> Option<EntityId> {
        let name_node = info.name?;
        let (qualifier, spelling, start) = split_name(name_node, src);
        let owner_name = scope
            .class_name
            .clone()
            .or_else(|| qualifier.as_deref().map(|q| last_component(q).to_string()));
        let in_class = scope.class_name.is_some();
        let kind = if spelling.starts_with('~') {
            CursorKind::Destructor
        } else if type_node.is_none() && owner_name.as_deref() == Some(spelling.as_str()) {
            CursorKind::Constructor
        } else if type_node.is_none() && spelling.starts_with("operator ") && (in_class || qualifier.is_some()) {
            CursorKind::ConversionFunction
        } else if template.is_some() {
            CursorKind::FunctionTemplate
        } else if in_class || qualifier.is_some() {
            CursorKind::CxxMethod
        } else {
            CursorKind::FunctionDecl
        };

        let mut e = Entity::new(kind, spelling, file);
        e.name_start = start;
        e.extent = if is_definition {
            range(node)
        } else {
            (node.start_byte(), info.function.map(|f| f.end_byte()).unwrap_or(node.end_byte()))
        };
        e.access = scope.access;
        e.is_definition = is_definition;
        e.is_static = has_keyword(node, "storage_class_specifier", "static", src);
        e.is_virtual = has_kind(node, "virtual") || has_kind(node, "virtual_function_specifier");
        e.is_const = info
            .function
            .is_some_and(|f| has_keyword(f, "type_qualifier", "const", src));
        e.ty = type_node.map(|t| type_spelling(node, t, info, src));
        e.qualifier = qualifier.clone();
        let id = self.push(scope.parent, e);
        if let Some(q) = qualifier {
            self.pending.push((id, q));
        }
        if let Some(params) = template {
            self.lower_template_params(params, id, file, src);
        }
        if let Some(t) = type_node {
            self.add_type_refs(id, t, file, src, None);
        }
        if let Some(params) = info.function.and_then(|f| f.child_by_field_name("parameters")) {
            self.lower_params(params, id, file, src);
        }
        if is_definition && !self.flags.contains(ParseFlags::SKIP_FUNCTION_BODIES) {
            if let Some(body) = node.child_by_field_name("body") {
                self.lower_body(body, id, file, src);
            }
        }
        Some(id)
    }

    fn lower_params(&mut self, params: Node, owner: EntityId, file: FileId, src: &str) {
        let mut cursor = params.walk();
        let children: Vec<Node> = params.children(&mut cursor).collect();
        for param in children {
            match param.kind() {
                "parameter_declaration" | "optional_parameter_declaration" => {}
                "variadic_parameter_declaration" | "variadic_parameter" | "..." => {
                    self.ast.entity_mut(owner).variadic = true;
                    continue;
                }
                _ => continue,
            }
            let Some(type_node) = param.child_by_field_name("type") else {
                continue;
            };
            let declarator = param.child_by_field_name("declarator");
            let info = declarator.map(analyze_declarator).unwrap_or_default();
            let ty = type_spelling(param, type_node, &info, src);
            if declarator.is_none() && ty.base == "void" && ty.pointer_level == 0 {
                continue;
            }
            let name = info.name.map(|n| text(n, src).to_string()).unwrap_or_default();
            self.ast.entity_mut(owner).params.push(Param {
                ty: ty.clone(),
                name: name.clone(),
                has_default: param.child_by_field_name("default_value").is_some(),
            });
            if let Some(name_node) = info.name {
                let mut e = Entity::new(CursorKind::ParmDecl, name, file);
                e.name_start = name_node.start_byte();
                e.extent = range(param);
                e.is_definition = true;
                e.ty = Some(ty);
                let id = self.push(owner, e);
                self.add_type_refs(id, type_node, file, src, None);
            }
        }
    }

    fn lower_declaration(
        &mut self,
        node: Node,
        file: FileId,
        src: &str,
        scope: &mut Scope,
        template: Option<Node>,
    ) {
        let type_node = node.child_by_field_name("type");
        let mut cursor = node.walk();
        let declarators: Vec<Node> = node.children_by_field_name("declarator", &mut cursor).collect();

        let mut inline_type = false;
        if let Some(t) = type_node.filter(|t| is_tag_specifier(*t)) {
            if t.child_by_field_name("body").is_some() || declarators.is_empty() {
                inline_type = true;
                if t.kind() == "enum_specifier" {
                    self.lower_enum(t, file, src, scope);
                } else {
                    let template = if declarators.is_empty() { template } else { None };
                    self.lower_record(t, file, src, scope, template);
                }
            }
        }

        let is_static = has_keyword(node, "storage_class_specifier", "static", src);
        let is_extern = has_keyword(node, "storage_class_specifier", "extern", src);
        for d in declarators {
            let info = analyze_declarator(d);
            if info.function.is_some() {
                self.lower_function(node, type_node, &info, file, src, scope, template, false);
                continue;
            }
            let Some(name_node) = info.name else {
                continue;
            };
            let (qualifier, spelling, start) = split_name(name_node, src);
            let kind = if node.kind() == "field_declaration" && !is_static {
                CursorKind::FieldDecl
            } else {
                CursorKind::VarDecl
            };
            let mut e = Entity::new(kind, spelling, file);
            e.name_start = start;
            e.extent = (node.start_byte(), d.end_byte());
            e.access = scope.access;
            e.is_static = is_static;
            e.is_definition = !is_extern;
            e.ty = type_node.map(|t| type_spelling(node, t, &info, src));
            e.qualifier = qualifier.clone();
            let id = self.push(scope.parent, e);
            if let Some(q) = qualifier {
                self.pending.push((id, q));
            }
            if let (Some(t), false) = (type_node, inline_type) {
                self.add_type_refs(id, t, file, src, None);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Function bodies
    // -----------------------------------------------------------------------

    fn lower_body(&mut self, body: Node, function: EntityId, file: FileId, src: &str) {
        let locals = self.lower_locals(body, function, file, src);

        let mut captures: BTreeMap<usize, RefCapture> = BTreeMap::new();
        {
            let names: Vec<&'static str> = self
                .query
                .capture_names()
                .iter()
                .map(|n| capture_name(n))
                .collect();
            let mut qc = QueryCursor::new();
            let mut matches = qc.matches(&self.query, body, src.as_bytes());
            while let Some(m) = matches.next() {
                for cap in m.captures {
                    let capture = names[cap.index as usize];
                    let priority = match capture {
                        "call.name" | "call.member" | "call.qualified" => 3,
                        "member.name" | "decl.qualified" => 2,
                        "type.name" | "namespace.name" => 1,
                        _ => 0,
                    };
                    let key = cap.node.start_byte();
                    let replace = captures.get(&key).map_or(true, |c| c.priority < priority);
                    if replace {
                        captures.insert(
                            key,
                            RefCapture {
                                node: cap.node,
                                capture,
                                priority,
                            },
                        );
                    }
                }
            }
        }

        for capture in captures.into_values() {
            let node = capture.node;
            let parent = locals
                .iter()
                .rev()
                .find(|(_, (s, e))| node.start_byte() >= *s && node.end_byte() <= *e)
                .map(|(id, _)| *id)
                .unwrap_or(function);
            let spelling = text(node, src).to_string();
            let mut e = match capture.capture {
                "call.name" => Entity::new(CursorKind::CallExpr, spelling, file),
                "call.qualified" => {
                    let mut e = Entity::new(CursorKind::CallExpr, spelling, file);
                    e.qualifier = outer_qualifier(node, src);
                    e
                }
                "call.member" | "member.name" => {
                    let kind = if capture.capture == "call.member" {
                        CursorKind::CallExpr
                    } else {
                        CursorKind::MemberRefExpr
                    };
                    let mut e = Entity::new(kind, spelling, file);
                    if let Some(field_expr) = node.parent() {
                        if let Some(arg) = field_expr.child_by_field_name("argument") {
                            e.base_expr = Some(normalize_spaces(text(arg, src)));
                            e.arrow = src
                                .get(arg.end_byte()..node.start_byte())
                                .is_some_and(|between| between.contains("->"));
                        }
                    }
                    e
                }
                "decl.qualified" => {
                    let mut e = Entity::new(CursorKind::DeclRefExpr, spelling, file);
                    e.qualifier = outer_qualifier(node, src);
                    e
                }
                "type.name" => {
                    let template_name = node
                        .parent()
                        .filter(|p| p.kind() == "template_type")
                        .and_then(|p| p.child_by_field_name("name"))
                        == Some(node);
                    let kind = if template_name {
                        CursorKind::TemplateRef
                    } else {
                        CursorKind::TypeRef
                    };
                    let mut e = Entity::new(kind, spelling, file);
                    let owner = if template_name { node.parent() } else { Some(node) };
                    e.qualifier = owner.and_then(|o| outer_qualifier(o, src));
                    e
                }
                "namespace.name" => {
                    let mut e = Entity::new(CursorKind::NamespaceRef, spelling, file);
                    e.qualifier = node.parent().and_then(|p| outer_qualifier(p, src));
                    e
                }
                _ => {
                    if is_declarator_name(node) {
                        continue;
                    }
                    Entity::new(CursorKind::DeclRefExpr, spelling, file)
                }
            };
            e.name_start = node.start_byte();
            e.extent = range(node);
            self.push(parent, e);
        }
    }

    /// Local variables of a body, attached to the function. Returns their
    /// extents so references can be attached to the declaring variable.
    fn lower_locals(
        &mut self,
        body: Node,
        function: EntityId,
        file: FileId,
        src: &str,
    ) -> Vec<(EntityId, (usize, usize))> {
        let mut locals = Vec::new();
        let mut stack = vec![body];
        let mut pending = Vec::new();
        while let Some(node) = stack.pop() {
            match node.kind() {
                "declaration" => {
                    let Some(type_node) = node.child_by_field_name("type") else {
                        continue;
                    };
                    let mut cursor = node.walk();
                    for d in node.children_by_field_name("declarator", &mut cursor) {
                        pending.push((node, type_node, d));
                    }
                }
                "for_range_loop" => {
                    if let (Some(t), Some(d)) = (
                        node.child_by_field_name("type"),
                        node.child_by_field_name("declarator"),
                    ) {
                        pending.push((node, t, d));
                    }
                }
                _ => {}
            }
            let mut cursor = node.walk();
            let children: Vec<Node> = node.named_children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
        pending.sort_by_key(|(_, _, d)| d.start_byte());
        for (decl, type_node, d) in pending {
            let info = analyze_declarator(d);
            if info.function.is_some() {
                continue;
            }
            let Some(name) = info.name else {
                continue;
            };
            let mut e = Entity::new(CursorKind::VarDecl, text(name, src), file);
            e.name_start = name.start_byte();
            let extent = (decl.start_byte(), d.end_byte());
            e.extent = extent;
            e.is_definition = true;
            e.is_static = has_keyword(decl, "storage_class_specifier", "static", src);
            e.ty = Some(type_spelling(decl, type_node, &info, src));
            let id = self.push(function, e);
            locals.push((id, extent));
        }
        locals
    }

    // -----------------------------------------------------------------------
    // Type references
    // -----------------------------------------------------------------------

    fn add_type_refs(
        &mut self,
        owner: EntityId,
        node: Node,
        file: FileId,
        src: &str,
        qualifier: Option<String>,
    ) {
        match node.kind() {
            "type_identifier" => self.push_ref(owner, CursorKind::TypeRef, node, file, src, qualifier),
            "namespace_identifier" => {
                self.push_ref(owner, CursorKind::NamespaceRef, node, file, src, qualifier)
            }
            "template_type" => {
                if let Some(name) = node.child_by_field_name("name") {
                    self.push_ref(owner, CursorKind::TemplateRef, name, file, src, qualifier);
                }
                if let Some(args) = node.child_by_field_name("arguments") {
                    self.add_type_refs(owner, args, file, src, None);
                }
            }
            "qualified_identifier" => {
                let scope = node.child_by_field_name("scope");
                if let Some(s) = scope {
                    self.add_type_refs(owner, s, file, src, qualifier.clone());
                }
                let q = join_qualifier(
                    qualifier,
                    scope.map(|s| strip_template_args(text(s, src))),
                );
                if let Some(name) = node.child_by_field_name("name") {
                    self.add_type_refs(owner, name, file, src, q);
                }
            }
            "type_descriptor" => {
                if let Some(t) = node.child_by_field_name("type") {
                    self.add_type_refs(owner, t, file, src, None);
                }
            }
            "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier" => {
                if let Some(name) = node.child_by_field_name("name") {
                    self.add_type_refs(owner, name, file, src, qualifier);
                }
            }
            "primitive_type" | "sized_type_specifier" | "placeholder_type_specifier" | "auto"
            | "identifier" | "number_literal" => {}
            _ => {
                let mut cursor = node.walk();
                let children: Vec<Node> = node.named_children(&mut cursor).collect();
                for child in children {
                    self.add_type_refs(owner, child, file, src, None);
                }
            }
        }
    }

    fn push_ref(
        &mut self,
        owner: EntityId,
        kind: CursorKind,
        node: Node,
        file: FileId,
        src: &str,
        qualifier: Option<String>,
    ) {
        let mut e = Entity::new(kind, text(node, src), file);
        e.name_start = node.start_byte();
        e.extent = range(node);
        e.qualifier = qualifier;
        self.push(owner, e);
    }

    // -----------------------------------------------------------------------
    // Preprocessor
    // -----------------------------------------------------------------------

    fn lower_include(&mut self, node: Node, file: FileId, src: &str, scope: &Scope) {
        let Some(path_node) = node.child_by_field_name("path") else {
            return;
        };
        let quoted = path_node.kind() == "string_literal";
        let name = text(path_node, src)
            .trim()
            .trim_matches(|c| c == '"' || c == '<' || c == '>')
            .to_string();
        let from = self.ast.file(file).path.clone();
        let resolved = self.resolve_include(&from, &name, quoted);

        if self.flags.contains(ParseFlags::DETAILED_PREPROCESSING_RECORD) {
            let mut e = Entity::new(CursorKind::InclusionDirective, name.clone(), file);
            e.name_start = path_node.start_byte();
            e.extent = range(node);
            e.included_file = resolved.clone();
            self.push(scope.parent, e);
        }

        match resolved {
            Some(path) if self.visited.contains(&path) => {}
            Some(path) if self.depth >= MAX_INCLUDE_DEPTH => {
                self.diagnose(file, path_node.start_byte(), Severity::Fatal, format!("#include nested too deeply: '{}'", path.display()));
            }
            Some(path) => {
                self.depth += 1;
                if let Err(e) = self.lower_file(&path, scope.parent) {
                    warn!("Failed to lower include {}: {}", path.display(), e);
                    self.diagnose(file, path_node.start_byte(), Severity::Fatal, format!("'{}' could not be read", name));
                }
                self.depth -= 1;
            }
            None => {
                self.diagnose(file, path_node.start_byte(), Severity::Fatal, format!("'{}' file not found", name));
            }
        }
    }

    fn resolve_include(&self, from: &Path, name: &str, quoted: bool) -> Option<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        if quoted {
            if let Some(dir) = from.parent() {
                dirs.push(dir.to_path_buf());
            }
            dirs.extend(self.args.quote_dirs.iter().cloned());
        }
        dirs.extend(self.args.include_dirs.iter().cloned());
        dirs.extend(self.args.system_dirs.iter().cloned());
        dirs.into_iter()
            .map(|dir| normalize_path(&dir.join(name)))
            .find(|p| p.is_file() || self.unsaved.iter().any(|u| u.path == *p))
    }

    fn lower_macro(&mut self, node: Node, file: FileId, src: &str, scope: &Scope) {
        if !self.flags.contains(ParseFlags::DETAILED_PREPROCESSING_RECORD) {
            return;
        }
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let mut e = Entity::new(CursorKind::MacroDefinition, text(name, src), file);
        e.name_start = name.start_byte();
        e.extent = range(node);
        e.is_definition = true;
        e.macro_params = node
            .child_by_field_name("parameters")
            .map(|p| normalize_spaces(text(p, src)));
        self.push(scope.parent, e);
    }

    // -----------------------------------------------------------------------
    // Objective-C
    // -----------------------------------------------------------------------

    /// Lowers `@interface`/`@protocol`/`@implementation` blocks and returns
    /// their byte ranges, which the grammar cannot read.
    fn lower_objc(&mut self, file: FileId, src: &str, parent: EntityId) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        for cap in OBJC_CONTAINER_RE.captures_iter(src) {
            let (Some(whole), Some(name)) = (cap.get(0), cap.name("name")) else {
                continue;
            };
            if cap.name("forward").is_some() {
                continue;
            }
            let start = whole.start();
            let end = src[whole.end()..]
                .find("@end")
                .map(|i| whole.end() + i + 4)
                .unwrap_or(src.len());
            ranges.push((start, end));
            let block = &src[whole.end()..end];
            let keyword = cap.name("kw").map(|m| m.as_str()).unwrap_or("");
            let implementation = keyword == "implementation";

            let kind = match (keyword, cap.name("category")) {
                ("protocol", _) => CursorKind::ObjCProtocolDecl,
                (_, Some(_)) => CursorKind::ObjCCategoryDecl,
                _ => CursorKind::ObjCInterfaceDecl,
            };
            let container = if implementation {
                None
            } else {
                let mut e = Entity::new(kind, name.as_str(), file);
                e.name_start = name.start();
                e.extent = (start, end);
                e.is_definition = true;
                e.access = AccessSpecifier::Public;
                let id = self.push(parent, e);
                if let Some(sup) = cap.name("super") {
                    let mut b = Entity::new(CursorKind::CxxBaseSpecifier, sup.as_str(), file);
                    b.name_start = sup.start();
                    b.extent = (sup.start(), sup.end());
                    b.access = AccessSpecifier::Public;
                    let base = self.push(id, b);
                    let mut r = Entity::new(CursorKind::TypeRef, sup.as_str(), file);
                    r.name_start = sup.start();
                    r.extent = (sup.start(), sup.end());
                    self.push(base, r);
                }
                Some(id)
            };
            let owner = container.unwrap_or(parent);
            let offset = whole.end();

            // instance variables
            if let Some(open) = block.find('{').filter(|&i| block[..i].trim().is_empty()) {
                if let Some(close) = block[open..].find('}') {
                    let ivars = &block[open + 1..open + close];
                    let mut access = AccessSpecifier::Protected;
                    let mut line_start = offset + open + 1;
                    for line in ivars.split_inclusive('\n') {
                        let this_line = line_start;
                        line_start += line.len();
                        let trimmed = line.trim();
                        if let Some(kw) = trimmed.strip_prefix('@') {
                            access = AccessSpecifier::from_keyword(kw);
                            continue;
                        }
                        if let Some(c) = OBJC_IVAR_RE.captures(line) {
                            let (Some(ty), Some(n)) = (c.name("ty"), c.name("name")) else {
                                continue;
                            };
                            let line_start = this_line;
                            let mut e = Entity::new(CursorKind::ObjCIvarDecl, n.as_str(), file);
                            e.name_start = line_start + n.start();
                            e.extent = (line_start, line_start + line.len());
                            e.access = access;
                            e.is_definition = true;
                            e.ty = Some(TypeSpelling {
                                base: ty.as_str().to_string(),
                                pointer_level: c.name("ptr").map(|p| p.len() as u32).unwrap_or(0),
                                ..Default::default()
                            });
                            self.push(owner, e);
                        }
                    }
                }
            }

            for c in OBJC_PROPERTY_RE.captures_iter(block) {
                let (Some(ty), Some(n)) = (c.name("ty"), c.name("name")) else {
                    continue;
                };
                let mut e = Entity::new(CursorKind::ObjCPropertyDecl, n.as_str(), file);
                e.name_start = offset + n.start();
                e.extent = (offset + c.get(0).map(|m| m.start()).unwrap_or(0), offset + n.end());
                e.access = AccessSpecifier::Public;
                e.is_definition = true;
                e.ty = Some(TypeSpelling {
                    base: normalize_spaces(ty.as_str()),
                    pointer_level: c.name("ptr").map(|p| p.len() as u32).unwrap_or(0),
                    ..Default::default()
                });
                self.push(owner, e);
            }

            for c in OBJC_METHOD_RE.captures_iter(block) {
                let (Some(sign), Some(ret), Some(sel)) = (c.name("sign"), c.name("ret"), c.name("sel")) else {
                    continue;
                };
                let mut selector = String::new();
                let mut params = Vec::new();
                for part in OBJC_SELECTOR_PART_RE.captures_iter(sel.as_str()) {
                    let Some(p) = part.name("part") else {
                        continue;
                    };
                    selector.push_str(p.as_str());
                    if let Some(arg) = part.name("arg") {
                        selector.push(':');
                        let ty = part.name("ty").map(|t| t.as_str()).unwrap_or("id");
                        params.push(Param {
                            ty: objc_type(ty),
                            name: arg.as_str().to_string(),
                            has_default: false,
                        });
                    } else {
                        break;
                    }
                }
                let kind = if sign.as_str() == "+" {
                    CursorKind::ObjCClassMethodDecl
                } else {
                    CursorKind::ObjCInstanceMethodDecl
                };
                let mut e = Entity::new(kind, selector, file);
                e.name_start = offset + sel.start();
                e.extent = (offset + c.get(0).map(|m| m.start()).unwrap_or(0), offset + sel.end());
                e.access = AccessSpecifier::Public;
                e.is_definition = implementation;
                e.is_static = kind == CursorKind::ObjCClassMethodDecl;
                e.ty = Some(objc_type(ret.as_str()));
                e.params = params;
                if implementation {
                    e.qualifier = Some(name.as_str().to_string());
                }
                let id = self.push(owner, e);
                if implementation {
                    self.pending.push((id, name.as_str().to_string()));
                }
            }
        }
        ranges
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    fn diagnose(&mut self, file: FileId, offset: usize, severity: Severity, spelling: String) {
        let source = self.ast.file(file);
        let (line, column) = source.line_col(offset);
        self.diagnostics.push(Diagnostic {
            severity,
            location: super::ast::SourceLocation {
                file: source.path.clone(),
                line,
                column,
            },
            spelling,
        });
    }

    fn report_syntax_errors(&mut self, root: Node, file: FileId, skip: &[(usize, usize)]) {
        if !root.has_error() {
            return;
        }
        let mut found = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if found.len() >= MAX_SYNTAX_ERRORS_PER_FILE {
                break;
            }
            let start = node.start_byte();
            if skip.iter().any(|&(s, e)| start >= s && start < e) {
                continue;
            }
            if node.is_error() {
                found.push((start, "syntax error".to_string()));
                continue;
            }
            if node.is_missing() {
                found.push((start, format!("expected '{}'", node.kind())));
                continue;
            }
            if node.has_error() {
                let mut cursor = node.walk();
                let children: Vec<Node> = node.children(&mut cursor).collect();
                stack.extend(children.into_iter().rev());
            }
        }
        for (offset, message) in found {
            self.diagnose(file, offset, Severity::Error, message);
        }
    }
}

// ---------------------------------------------------------------------------
// Node helpers
// ---------------------------------------------------------------------------

fn text<'s>(node: Node, src: &'s str) -> &'s str {
    node.utf8_text(src.as_bytes()).unwrap_or("")
}

fn range(node: Node) -> (usize, usize) {
    (node.start_byte(), node.end_byte())
}

fn capture_name(name: &str) -> &'static str {
    match name {
        "call.name" => "call.name",
        "call.member" => "call.member",
        "call.qualified" => "call.qualified",
        "member.name" => "member.name",
        "decl.qualified" => "decl.qualified",
        "namespace.name" => "namespace.name",
        "type.name" => "type.name",
        _ => "decl.name",
    }
}

fn normalize_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_tag_specifier(node: Node) -> bool {
    matches!(
        node.kind(),
        "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier"
    )
}

fn has_kind(node: Node, kind: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == kind);
    found
}

fn has_keyword(node: Node, kind: &str, keyword: &str, src: &str) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|c| c.kind() == kind && text(c, src) == keyword);
    found
}

fn last_component(qualifier: &str) -> &str {
    qualifier.rsplit("::").next().unwrap_or(qualifier)
}

fn join_qualifier(outer: Option<String>, inner: Option<String>) -> Option<String> {
    match (outer, inner) {
        (Some(o), Some(i)) if !o.is_empty() => Some(format!("{}::{}", o, i)),
        (_, Some(i)) if !i.is_empty() => Some(i),
        (o, _) => o,
    }
}

/// Removes template argument lists: `sp<T>::x` becomes `sp::x`.
pub(crate) fn strip_template_args(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0u32;
    for c in s.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            _ if depth == 0 && !c.is_whitespace() => out.push(c),
            _ => {}
        }
    }
    out
}

/// Splits a declarator name into its qualifier, spelling and name offset.
fn split_name(node: Node, src: &str) -> (Option<String>, String, usize) {
    match node.kind() {
        "qualified_identifier" => {
            let scope = node
                .child_by_field_name("scope")
                .map(|s| strip_template_args(text(s, src)));
            match node.child_by_field_name("name") {
                Some(name) => {
                    let (inner, spelling, start) = split_name(name, src);
                    (join_qualifier(scope, inner), spelling, start)
                }
                None => (None, text(node, src).to_string(), node.start_byte()),
            }
        }
        "template_function" | "template_type" | "template_method" => match node.child_by_field_name("name") {
            Some(name) => split_name(name, src),
            None => (None, strip_template_args(text(node, src)), node.start_byte()),
        },
        "destructor_name" => (None, text(node, src).split_whitespace().collect(), node.start_byte()),
        "operator_name" => {
            let raw = text(node, src);
            let rest = raw.trim_start_matches("operator").trim();
            let spelling = if rest.starts_with(|c: char| c.is_alphabetic()) {
                format!("operator {}", normalize_spaces(rest))
            } else {
                format!("operator{}", rest.split_whitespace().collect::<String>())
            };
            (None, spelling, node.start_byte())
        }
        "operator_cast" => {
            let ty = node
                .child_by_field_name("type")
                .map(|t| normalize_spaces(text(t, src)))
                .unwrap_or_default();
            (None, format!("operator {}", ty), node.start_byte())
        }
        _ => (None, text(node, src).to_string(), node.start_byte()),
    }
}

/// Walks a declarator chain down to its name, counting indirection.
fn analyze_declarator(node: Node) -> DeclaratorInfo {
    let mut info = DeclaratorInfo::default();
    let mut current = Some(node);
    let mut function_pointer = false;
    while let Some(node) = current {
        match node.kind() {
            "init_declarator" => current = node.child_by_field_name("declarator"),
            "pointer_declarator" | "abstract_pointer_declarator" => {
                if info.function.is_none() && !function_pointer {
                    info.pointer_level += 1;
                }
                current = node.child_by_field_name("declarator");
            }
            "reference_declarator" | "abstract_reference_declarator" => {
                if info.function.is_none() && !function_pointer {
                    info.is_reference = true;
                }
                current = node.named_child(0);
            }
            "array_declarator" | "abstract_array_declarator" => {
                if info.function.is_none() {
                    info.array_dims += 1;
                }
                current = node.child_by_field_name("declarator");
            }
            "function_declarator" | "abstract_function_declarator" => {
                let inner = node.child_by_field_name("declarator");
                if inner.is_some_and(|i| i.kind() == "parenthesized_declarator") {
                    // `void (*fp)(int)` declares a pointer, not a function
                    function_pointer = true;
                    info.pointer_level += 1;
                } else if info.function.is_none() {
                    info.function = Some(node);
                }
                current = inner;
            }
            "parenthesized_declarator" | "attributed_declarator" => current = node.named_child(0),
            "operator_cast" => {
                info.name = Some(node);
                info.function = node.child_by_field_name("declarator");
                break;
            }
            "identifier" | "field_identifier" | "type_identifier" | "destructor_name"
            | "operator_name" | "qualified_identifier" | "template_function" | "template_method" => {
                info.name = Some(node);
                break;
            }
            _ => break,
        }
    }
    if function_pointer {
        info.pointer_level = 1;
    }
    info
}

fn type_spelling(decl: Node, type_node: Node, info: &DeclaratorInfo, src: &str) -> TypeSpelling {
    TypeSpelling {
        base: normalize_spaces(text(type_node, src)),
        is_const: has_keyword(decl, "type_qualifier", "const", src),
        pointer_level: info.pointer_level + info.array_dims,
        is_reference: info.is_reference,
    }
}

fn descriptor_spelling(descriptor: Node, src: &str) -> TypeSpelling {
    let base = descriptor
        .child_by_field_name("type")
        .map(|t| normalize_spaces(text(t, src)))
        .unwrap_or_else(|| normalize_spaces(text(descriptor, src)));
    let info = descriptor
        .child_by_field_name("declarator")
        .map(analyze_declarator)
        .unwrap_or_default();
    TypeSpelling {
        base,
        is_const: has_keyword(descriptor, "type_qualifier", "const", src),
        pointer_level: info.pointer_level + info.array_dims,
        is_reference: info.is_reference,
    }
}

fn objc_type(raw: &str) -> TypeSpelling {
    let pointer_level = raw.matches('*').count() as u32;
    let base = raw.replace('*', " ");
    let base = normalize_spaces(&base);
    let base = base
        .split(' ')
        .filter(|w| !matches!(*w, "const" | "__strong" | "__weak" | "nonnull" | "nullable"))
        .collect::<Vec<_>>()
        .join(" ");
    TypeSpelling {
        base,
        pointer_level,
        ..Default::default()
    }
}

/// Scope text written before a name inside a (possibly nested)
/// `qualified_identifier`.
fn outer_qualifier(node: Node, src: &str) -> Option<String> {
    let mut parts = Vec::new();
    let mut current = node;
    while let Some(parent) = current.parent() {
        if parent.kind() != "qualified_identifier" || parent.child_by_field_name("name") != Some(current) {
            break;
        }
        if let Some(scope) = parent.child_by_field_name("scope") {
            parts.push(strip_template_args(text(scope, src)));
        }
        current = parent;
    }
    parts.reverse();
    (!parts.is_empty()).then(|| parts.join("::"))
}

fn is_declarator_name(node: Node) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    match parent.kind() {
        "reference_declarator" | "parenthesized_declarator" | "attributed_declarator" => true,
        "init_declarator" | "pointer_declarator" | "array_declarator" | "function_declarator"
        | "declaration" | "parameter_declaration" | "optional_parameter_declaration"
        | "field_declaration" | "for_range_loop" | "enumerator" | "preproc_def"
        | "preproc_function_def" => parent.child_by_field_name("declarator") == Some(node)
            || parent.child_by_field_name("name") == Some(node),
        "preproc_params" | "goto_statement" | "labeled_statement" => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> tree_sitter::Tree {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_cpp::LANGUAGE.into())
            .expect("grammar");
        parser.parse(src, None).expect("parse")
    }

    fn first_declarator(tree: &tree_sitter::Tree) -> Node<'_> {
        let decl = tree.root_node().named_child(0).expect("declaration");
        decl.child_by_field_name("declarator").expect("declarator")
    }

    #[test]
    fn declarator_counts_indirection() {
        let src = "int **p[3];";
        let tree = parse(src);
        let info = analyze_declarator(first_declarator(&tree));
        assert_eq!(info.pointer_level, 2);
        assert_eq!(info.array_dims, 1);
        assert_eq!(info.name.map(|n| text(n, src)), Some("p"));
        assert!(info.function.is_none());
    }

    #[test]
    fn declarator_finds_functions_and_return_indirection() {
        let src = "Foo &get(int a) const;";
        let tree = parse(src);
        let info = analyze_declarator(first_declarator(&tree));
        assert!(info.is_reference);
        assert!(info.function.is_some());
        assert_eq!(info.name.map(|n| text(n, src)), Some("get"));
    }

    #[test]
    fn function_pointers_are_variables() {
        let src = "void (*callback)(int);";
        let tree = parse(src);
        let info = analyze_declarator(first_declarator(&tree));
        assert!(info.function.is_none());
        assert_eq!(info.pointer_level, 1);
    }

    #[test]
    fn qualified_names_split() {
        let src = "void A::B::run() {}";
        let tree = parse(src);
        let def = tree.root_node().named_child(0).expect("definition");
        let info = analyze_declarator(def.child_by_field_name("declarator").expect("declarator"));
        let (qualifier, spelling, _) = split_name(info.name.expect("name"), src);
        assert_eq!(qualifier.as_deref(), Some("A::B"));
        assert_eq!(spelling, "run");
    }

    #[test]
    fn template_args_are_stripped() {
        assert_eq!(strip_template_args("sp<T>::x"), "sp::x");
        assert_eq!(strip_template_args("std::map<int, vector<int> >"), "std::map");
    }
}
