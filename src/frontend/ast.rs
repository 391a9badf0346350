use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Index of an entity in its translation unit's arena.
pub type EntityId = usize;
pub type FileId = usize;

/// The translation unit root is always the first entity.
pub const ROOT: EntityId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorKind {
    TranslationUnit,
    Namespace,
    NamespaceAlias,
    UsingDirective,
    UsingDeclaration,
    ClassDecl,
    StructDecl,
    UnionDecl,
    EnumDecl,
    EnumConstantDecl,
    ClassTemplate,
    TemplateTypeParameter,
    NonTypeTemplateParameter,
    TypedefDecl,
    TypeAliasDecl,
    FieldDecl,
    VarDecl,
    ParmDecl,
    FunctionDecl,
    CxxMethod,
    Constructor,
    Destructor,
    ConversionFunction,
    FunctionTemplate,
    CxxBaseSpecifier,
    TypeRef,
    TemplateRef,
    NamespaceRef,
    DeclRefExpr,
    MemberRefExpr,
    CallExpr,
    InclusionDirective,
    MacroDefinition,
    ObjCInterfaceDecl,
    ObjCCategoryDecl,
    ObjCProtocolDecl,
    ObjCInstanceMethodDecl,
    ObjCClassMethodDecl,
    ObjCPropertyDecl,
    ObjCIvarDecl,
}

impl CursorKind {
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            CursorKind::TypeRef | CursorKind::TemplateRef | CursorKind::NamespaceRef
        )
    }

    pub fn is_expression(&self) -> bool {
        matches!(
            self,
            CursorKind::DeclRefExpr | CursorKind::MemberRefExpr | CursorKind::CallExpr
        )
    }

    pub fn is_preprocessing(&self) -> bool {
        matches!(self, CursorKind::InclusionDirective | CursorKind::MacroDefinition)
    }

    pub fn is_declaration(&self) -> bool {
        !self.is_reference()
            && !self.is_expression()
            && !self.is_preprocessing()
            && !matches!(
                self,
                CursorKind::TranslationUnit | CursorKind::CxxBaseSpecifier
            )
    }

    /// Kinds that can have members looked up in them.
    pub fn is_record(&self) -> bool {
        matches!(
            self,
            CursorKind::ClassDecl
                | CursorKind::StructDecl
                | CursorKind::UnionDecl
                | CursorKind::ClassTemplate
                | CursorKind::ObjCInterfaceDecl
                | CursorKind::ObjCCategoryDecl
                | CursorKind::ObjCProtocolDecl
        )
    }

    pub fn is_function_like(&self) -> bool {
        matches!(
            self,
            CursorKind::FunctionDecl
                | CursorKind::CxxMethod
                | CursorKind::Constructor
                | CursorKind::Destructor
                | CursorKind::ConversionFunction
                | CursorKind::FunctionTemplate
                | CursorKind::ObjCInstanceMethodDecl
                | CursorKind::ObjCClassMethodDecl
        )
    }

    pub fn is_type_declaration(&self) -> bool {
        self.is_record()
            || matches!(
                self,
                CursorKind::EnumDecl
                    | CursorKind::TypedefDecl
                    | CursorKind::TypeAliasDecl
                    | CursorKind::TemplateTypeParameter
            )
    }

    pub fn is_namespace(&self) -> bool {
        matches!(self, CursorKind::Namespace | CursorKind::NamespaceAlias)
    }

    pub fn is_objc(&self) -> bool {
        matches!(
            self,
            CursorKind::ObjCInterfaceDecl
                | CursorKind::ObjCCategoryDecl
                | CursorKind::ObjCProtocolDecl
                | CursorKind::ObjCInstanceMethodDecl
                | CursorKind::ObjCClassMethodDecl
                | CursorKind::ObjCPropertyDecl
                | CursorKind::ObjCIvarDecl
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessSpecifier {
    Invalid,
    Public,
    Protected,
    Private,
}

impl AccessSpecifier {
    pub fn from_keyword(s: &str) -> Self {
        match s.trim().trim_end_matches(':').trim() {
            "public" => AccessSpecifier::Public,
            "protected" => AccessSpecifier::Protected,
            "private" => AccessSpecifier::Private,
            _ => AccessSpecifier::Invalid,
        }
    }

    /// Access of an inherited member through a base specifier.
    pub fn narrow(self, inheritance: AccessSpecifier) -> Self {
        match (self, inheritance) {
            (AccessSpecifier::Private, _) => AccessSpecifier::Private,
            (_, AccessSpecifier::Private) => AccessSpecifier::Private,
            (AccessSpecifier::Public, AccessSpecifier::Protected) => AccessSpecifier::Protected,
            (access, _) => access,
        }
    }
}

/// A 1-based position in a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

/// A type as written at a declaration, split into base name and indirection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeSpelling {
    /// Base type including qualification and template arguments: `std::vector<int>`.
    pub base: String,
    pub is_const: bool,
    /// Pointer stars plus array dimensions.
    pub pointer_level: u32,
    pub is_reference: bool,
}

impl TypeSpelling {
    pub fn display(&self) -> String {
        let mut s = String::new();
        if self.is_const {
            s.push_str("const ");
        }
        s.push_str(&self.base);
        if self.pointer_level > 0 || self.is_reference {
            s.push(' ');
        }
        for _ in 0..self.pointer_level {
            s.push('*');
        }
        if self.is_reference {
            s.push('&');
        }
        s
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub ty: TypeSpelling,
    pub name: String,
    pub has_default: bool,
}

impl Param {
    pub fn display(&self) -> String {
        let ty = self.ty.display();
        match (self.name.is_empty(), ty.ends_with(['*', '&'])) {
            (true, _) => ty,
            (false, true) => format!("{}{}", ty, self.name),
            (false, false) => format!("{} {}", ty, self.name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub kind: CursorKind,
    pub spelling: String,
    pub file: FileId,
    /// Byte offset of the name (or of the reference itself).
    pub name_start: usize,
    pub extent: (usize, usize),
    pub lexical_parent: Option<EntityId>,
    pub semantic_parent: Option<EntityId>,
    pub children: Vec<EntityId>,
    pub access: AccessSpecifier,
    pub is_static: bool,
    pub is_const: bool,
    pub is_virtual: bool,
    pub is_definition: bool,
    /// Declared type, or the return type of a function.
    pub ty: Option<TypeSpelling>,
    pub params: Vec<Param>,
    pub variadic: bool,
    /// Scope written before the name: `A::B` in `A::B::f` or `A::B::T`.
    pub qualifier: Option<String>,
    /// Object expression of a member access or member call.
    pub base_expr: Option<String>,
    pub arrow: bool,
    /// Target of an alias, using declaration or using directive, as written.
    pub target: Option<String>,
    pub included_file: Option<PathBuf>,
    pub macro_params: Option<String>,
    pub scoped_enum: bool,
}

impl Entity {
    pub fn new(kind: CursorKind, spelling: impl Into<String>, file: FileId) -> Self {
        Self {
            kind,
            spelling: spelling.into(),
            file,
            name_start: 0,
            extent: (0, 0),
            lexical_parent: None,
            semantic_parent: None,
            children: Vec::new(),
            access: AccessSpecifier::Invalid,
            is_static: false,
            is_const: false,
            is_virtual: false,
            is_definition: false,
            ty: None,
            params: Vec::new(),
            variadic: false,
            qualifier: None,
            base_expr: None,
            arrow: false,
            target: None,
            included_file: None,
            macro_params: None,
            scoped_enum: false,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.spelling.is_empty()
    }
}

/// One file lowered into the translation unit.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
    line_starts: Vec<usize>,
}

impl SourceFile {
    pub fn new(path: PathBuf, text: String) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self {
            path,
            text,
            line_starts,
        }
    }

    /// 1-based line and byte column of `offset`.
    pub fn line_col(&self, offset: usize) -> (u32, u32) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        ((line + 1) as u32, (offset - self.line_starts[line] + 1) as u32)
    }

    /// Byte offset of a 1-based line and column, clamped to the file.
    pub fn offset(&self, line: u32, column: u32) -> usize {
        let line = (line.max(1) as usize - 1).min(self.line_starts.len() - 1);
        let start = self.line_starts[line];
        let end = self
            .line_starts
            .get(line + 1)
            .copied()
            .unwrap_or(self.text.len());
        (start + column.max(1) as usize - 1).min(end)
    }
}

/// The lowered program: an arena of entities over a set of files.
#[derive(Debug, Clone)]
pub struct Ast {
    pub(crate) entities: Vec<Entity>,
    pub(crate) files: Vec<SourceFile>,
    /// Qualified names, filled in once lowering is finished.
    pub(crate) qualified: Vec<String>,
    /// Re-opened namespace blocks, keyed by qualified name.
    pub(crate) namespaces: HashMap<String, Vec<EntityId>>,
    /// Declarations at namespace or class scope, keyed by qualified name.
    pub(crate) by_qualified: HashMap<String, Vec<EntityId>>,
}

impl Ast {
    pub fn new(main: &Path) -> Self {
        let mut root = Entity::new(CursorKind::TranslationUnit, main.display().to_string(), 0);
        root.is_definition = true;
        Self {
            entities: vec![root],
            files: Vec::new(),
            qualified: Vec::new(),
            namespaces: HashMap::new(),
            by_qualified: HashMap::new(),
        }
    }

    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.entities[id]
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.len() <= 1
    }

    pub fn file(&self, id: FileId) -> &SourceFile {
        &self.files[id]
    }

    pub fn file_id(&self, path: &Path) -> Option<FileId> {
        self.files.iter().position(|f| f.path == path)
    }

    pub(crate) fn add_file(&mut self, path: PathBuf, text: String) -> FileId {
        self.files.push(SourceFile::new(path, text));
        self.files.len() - 1
    }

    /// Appends `entity` under `parent`, which becomes both its lexical and
    /// semantic parent.
    pub(crate) fn push(&mut self, parent: EntityId, mut entity: Entity) -> EntityId {
        let id = self.entities.len();
        entity.lexical_parent = Some(parent);
        entity.semantic_parent = Some(parent);
        self.entities.push(entity);
        self.entities[parent].children.push(id);
        id
    }

    pub(crate) fn entity_mut(&mut self, id: EntityId) -> &mut Entity {
        &mut self.entities[id]
    }

    pub fn location(&self, id: EntityId) -> SourceLocation {
        let e = &self.entities[id];
        match self.files.get(e.file) {
            Some(file) => {
                let (line, column) = file.line_col(e.name_start);
                SourceLocation {
                    file: file.path.clone(),
                    line,
                    column,
                }
            }
            None => SourceLocation {
                file: PathBuf::from(&e.spelling),
                line: 0,
                column: 0,
            },
        }
    }

    pub fn qualified_name(&self, id: EntityId) -> &str {
        self.qualified.get(id).map(String::as_str).unwrap_or("")
    }

    /// Whether a declaration lives at namespace or class scope, where its
    /// qualified name identifies it across redeclarations.
    pub(crate) fn is_scoped_declaration(&self, id: EntityId) -> bool {
        let e = &self.entities[id];
        if !e.kind.is_declaration() || e.kind == CursorKind::ParmDecl {
            return false;
        }
        match e.semantic_parent {
            Some(parent) => {
                let pk = self.entities[parent].kind;
                pk == CursorKind::TranslationUnit || pk == CursorKind::Namespace || pk.is_record()
            }
            None => false,
        }
    }

    /// Computes qualified names and the lookup tables. Namespaces are
    /// indexed first because resolving out-of-line members needs them.
    pub(crate) fn index_namespaces(&mut self) {
        self.namespaces.clear();
        for id in 0..self.entities.len() {
            if self.entities[id].kind == CursorKind::Namespace {
                let name = self.lexical_qualified_name(id);
                self.namespaces.entry(name).or_default().push(id);
            }
        }
    }

    pub(crate) fn lexical_qualified_name(&self, id: EntityId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            let e = &self.entities[c];
            if e.kind == CursorKind::TranslationUnit {
                break;
            }
            parts.push(e.spelling.as_str());
            cur = e.lexical_parent;
        }
        parts.reverse();
        parts.join("::")
    }

    pub(crate) fn index_declarations(&mut self) {
        let mut qualified = vec![String::new(); self.entities.len()];
        for id in 1..self.entities.len() {
            let e = &self.entities[id];
            let parent = e.semantic_parent.unwrap_or(ROOT);
            // parents precede children in the arena except for re-parented
            // out-of-line members, whose class always comes first
            let prefix = if parent == ROOT || parent >= id {
                self.semantic_prefix(parent)
            } else {
                qualified[parent].clone()
            };
            qualified[id] = if prefix.is_empty() {
                e.spelling.clone()
            } else {
                format!("{}::{}", prefix, e.spelling)
            };
        }
        self.qualified = qualified;
        self.by_qualified.clear();
        for id in 1..self.entities.len() {
            if self.is_scoped_declaration(id) && !self.entities[id].is_anonymous() {
                self.by_qualified
                    .entry(self.qualified[id].clone())
                    .or_default()
                    .push(id);
            }
        }
    }

    fn semantic_prefix(&self, id: EntityId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        let mut guard = 0;
        while let Some(c) = cur {
            let e = &self.entities[c];
            if e.kind == CursorKind::TranslationUnit || guard > 64 {
                break;
            }
            parts.push(e.spelling.as_str());
            cur = e.semantic_parent;
            guard += 1;
        }
        parts.reverse();
        parts.join("::")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_columns_are_one_based() {
        let file = SourceFile::new(PathBuf::from("a.cpp"), "ab\ncd\n".to_string());
        assert_eq!(file.line_col(0), (1, 1));
        assert_eq!(file.line_col(4), (2, 2));
        assert_eq!(file.offset(2, 2), 4);
        assert_eq!(file.offset(9, 9), 6);
    }

    #[test]
    fn inherited_access_is_narrowed() {
        use AccessSpecifier::*;
        assert_eq!(Public.narrow(Public), Public);
        assert_eq!(Public.narrow(Protected), Protected);
        assert_eq!(Protected.narrow(Private), Private);
        assert_eq!(Private.narrow(Public), Private);
    }

    #[test]
    fn type_spelling_display() {
        let ty = TypeSpelling {
            base: "Foo".into(),
            is_const: true,
            pointer_level: 0,
            is_reference: true,
        };
        assert_eq!(ty.display(), "const Foo &");
        let param = Param {
            ty,
            name: "other".into(),
            has_default: false,
        };
        assert_eq!(param.display(), "const Foo &other");
    }
}
