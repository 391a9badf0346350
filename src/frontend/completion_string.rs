use super::ast::{Ast, CursorKind, EntityId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    ResultType,
    TypedText,
    Text,
    Placeholder,
    Informative,
    LeftParen,
    RightParen,
    LeftAngle,
    RightAngle,
    Comma,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub kind: ChunkKind,
    pub text: String,
}

/// How a declaration is presented and inserted by completion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompletionString {
    chunks: Vec<Chunk>,
}

impl CompletionString {
    fn push(&mut self, kind: ChunkKind, text: impl Into<String>) {
        self.chunks.push(Chunk {
            kind,
            text: text.into(),
        });
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn typed_text(&self) -> &str {
        self.chunks
            .iter()
            .find(|c| c.kind == ChunkKind::TypedText)
            .map(|c| c.text.as_str())
            .unwrap_or("")
    }

    pub fn result_type(&self) -> &str {
        self.chunks
            .iter()
            .find(|c| c.kind == ChunkKind::ResultType)
            .map(|c| c.text.as_str())
            .unwrap_or("")
    }

    /// `<representation>\t<kind or result type>`.
    pub fn display(&self) -> String {
        let mut out: String = self
            .chunks
            .iter()
            .filter(|c| c.kind != ChunkKind::ResultType)
            .map(|c| c.text.as_str())
            .collect();
        out.push('\t');
        out.push_str(self.result_type());
        out
    }

    /// Snippet text starting at the typed text, placeholders as `${n:..}`.
    pub fn insert(&self) -> String {
        let mut out = String::new();
        let mut placeholder = 0;
        let mut started = false;
        for chunk in &self.chunks {
            started |= chunk.kind == ChunkKind::TypedText;
            if !started {
                continue;
            }
            match chunk.kind {
                ChunkKind::ResultType | ChunkKind::Informative => {}
                ChunkKind::Placeholder => {
                    placeholder += 1;
                    out.push_str(&format!("${{{}:{}}}", placeholder, chunk.text));
                }
                _ => out.push_str(&chunk.text),
            }
        }
        out
    }
}

pub(crate) fn build(ast: &Ast, id: EntityId) -> Option<CompletionString> {
    let e = ast.entity(id);
    if e.is_anonymous() {
        return None;
    }
    let mut cs = CompletionString::default();
    match e.kind {
        CursorKind::FunctionDecl
        | CursorKind::CxxMethod
        | CursorKind::FunctionTemplate
        | CursorKind::ConversionFunction
        | CursorKind::Constructor
        | CursorKind::Destructor => {
            let result = match e.kind {
                CursorKind::Constructor => "constructor".to_string(),
                CursorKind::Destructor => "destructor".to_string(),
                CursorKind::ConversionFunction => e.spelling.trim_start_matches("operator ").to_string(),
                _ => e.ty.as_ref().map(|t| t.display()).unwrap_or_else(|| "void".to_string()),
            };
            cs.push(ChunkKind::ResultType, result);
            cs.push(ChunkKind::TypedText, e.spelling.clone());
            cs.push(ChunkKind::LeftParen, "(");
            for (i, param) in e.params.iter().enumerate() {
                if i > 0 {
                    cs.push(ChunkKind::Comma, ", ");
                }
                cs.push(ChunkKind::Placeholder, param.display());
            }
            if e.variadic {
                if !e.params.is_empty() {
                    cs.push(ChunkKind::Comma, ", ");
                }
                cs.push(ChunkKind::Placeholder, "...");
            }
            cs.push(ChunkKind::RightParen, ")");
            if e.is_const {
                cs.push(ChunkKind::Informative, " const");
            }
        }
        CursorKind::ObjCInstanceMethodDecl | CursorKind::ObjCClassMethodDecl => {
            cs.push(
                ChunkKind::ResultType,
                e.ty.as_ref().map(|t| t.display()).unwrap_or_else(|| "id".to_string()),
            );
            let parts: Vec<&str> = e.spelling.split_inclusive(':').collect();
            if e.params.is_empty() {
                cs.push(ChunkKind::TypedText, e.spelling.clone());
            }
            for (i, (part, param)) in parts.iter().zip(e.params.iter()).enumerate() {
                if i == 0 {
                    cs.push(ChunkKind::TypedText, *part);
                } else {
                    cs.push(ChunkKind::Text, format!(" {}", part));
                }
                cs.push(ChunkKind::Placeholder, format!("({}){}", param.ty.display().trim(), param.name));
            }
        }
        CursorKind::VarDecl
        | CursorKind::FieldDecl
        | CursorKind::ParmDecl
        | CursorKind::ObjCPropertyDecl
        | CursorKind::ObjCIvarDecl
        | CursorKind::NonTypeTemplateParameter => {
            cs.push(ChunkKind::TypedText, e.spelling.clone());
            cs.push(
                ChunkKind::ResultType,
                e.ty.as_ref().map(|t| t.display()).unwrap_or_default(),
            );
        }
        CursorKind::EnumConstantDecl => {
            let parent = e
                .semantic_parent
                .map(|p| ast.entity(p).spelling.clone())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "enum".to_string());
            cs.push(ChunkKind::TypedText, e.spelling.clone());
            cs.push(ChunkKind::ResultType, parent);
        }
        CursorKind::ClassTemplate => {
            cs.push(ChunkKind::TypedText, e.spelling.clone());
            cs.push(ChunkKind::LeftAngle, "<");
            let params: Vec<&str> = e
                .children
                .iter()
                .map(|&c| ast.entity(c))
                .filter(|c| {
                    matches!(
                        c.kind,
                        CursorKind::TemplateTypeParameter | CursorKind::NonTypeTemplateParameter
                    )
                })
                .map(|c| c.spelling.as_str())
                .collect();
            for (i, p) in params.iter().enumerate() {
                if i > 0 {
                    cs.push(ChunkKind::Comma, ", ");
                }
                cs.push(ChunkKind::Placeholder, *p);
            }
            cs.push(ChunkKind::RightAngle, ">");
            cs.push(ChunkKind::ResultType, "class");
        }
        CursorKind::MacroDefinition => {
            cs.push(ChunkKind::TypedText, e.spelling.clone());
            if let Some(params) = &e.macro_params {
                cs.push(ChunkKind::LeftParen, "(");
                let inner = params.trim_start_matches('(').trim_end_matches(')');
                for (i, p) in inner.split(',').map(str::trim).filter(|p| !p.is_empty()).enumerate() {
                    if i > 0 {
                        cs.push(ChunkKind::Comma, ", ");
                    }
                    cs.push(ChunkKind::Placeholder, p);
                }
                cs.push(ChunkKind::RightParen, ")");
            }
            cs.push(ChunkKind::ResultType, "macro");
        }
        kind => {
            let suffix = match kind {
                CursorKind::ClassDecl => "class",
                CursorKind::StructDecl => "struct",
                CursorKind::UnionDecl => "union",
                CursorKind::EnumDecl => "enum",
                CursorKind::TypedefDecl | CursorKind::TypeAliasDecl => "typedef",
                CursorKind::Namespace | CursorKind::NamespaceAlias => "namespace",
                CursorKind::ObjCInterfaceDecl | CursorKind::ObjCCategoryDecl => "class",
                CursorKind::ObjCProtocolDecl => "protocol",
                _ => return None,
            };
            cs.push(ChunkKind::TypedText, e.spelling.clone());
            cs.push(ChunkKind::ResultType, suffix);
        }
    }
    Some(cs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::{Entity, Param, TypeSpelling, ROOT};
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn ty(base: &str, pointer_level: u32) -> TypeSpelling {
        TypeSpelling {
            base: base.into(),
            pointer_level,
            ..Default::default()
        }
    }

    #[test]
    fn method_display_and_insert() {
        let mut ast = Ast::new(Path::new("a.cpp"));
        let mut m = Entity::new(CursorKind::CxxMethod, "push_back", 0);
        m.ty = Some(ty("void", 0));
        m.params.push(Param {
            ty: TypeSpelling {
                base: "T".into(),
                is_const: true,
                pointer_level: 0,
                is_reference: true,
            },
            name: "x".into(),
            has_default: false,
        });
        m.is_const = true;
        let id = ast.push(ROOT, m);
        let cs = build(&ast, id).expect("completion string");
        assert_eq!(cs.display(), "push_back(const T &x) const\tvoid");
        assert_eq!(cs.insert(), "push_back(${1:const T &x})");
    }

    #[test]
    fn kinds_become_suffixes() {
        let mut ast = Ast::new(Path::new("a.cpp"));
        let class = ast.push(ROOT, Entity::new(CursorKind::ClassDecl, "Class1", 0));
        let mut field = Entity::new(CursorKind::FieldDecl, "next", 0);
        field.ty = Some(ty("Class1", 1));
        let field = ast.push(class, field);
        let ctor = ast.push(class, Entity::new(CursorKind::Constructor, "Class1", 0));
        let using = ast.push(ROOT, Entity::new(CursorKind::UsingDirective, "std", 0));
        assert_eq!(build(&ast, class).map(|c| c.display()).as_deref(), Some("Class1\tclass"));
        assert_eq!(build(&ast, field).map(|c| c.display()).as_deref(), Some("next\tClass1 *"));
        assert_eq!(build(&ast, ctor).map(|c| c.display()).as_deref(), Some("Class1()\tconstructor"));
        assert!(build(&ast, using).is_none());
    }

    #[test]
    fn objc_selectors_interleave_arguments() {
        let mut ast = Ast::new(Path::new("a.m"));
        let mut m = Entity::new(CursorKind::ObjCInstanceMethodDecl, "setX:y:", 0);
        m.ty = Some(ty("void", 0));
        for name in ["x", "y"] {
            m.params.push(Param {
                ty: ty("int", 0),
                name: name.into(),
                has_default: false,
            });
        }
        let id = ast.push(ROOT, m);
        let cs = build(&ast, id).expect("completion string");
        assert_eq!(cs.display(), "setX:(int)x y:(int)y\tvoid");
        assert_eq!(cs.insert(), "setX:${1:(int)x} y:${2:(int)y}");
    }
}
