use crate::workspace::language::Language;

/// Tree-sitter grammar plus the query that finds references inside
/// function bodies.
pub struct LanguageConfig {
    pub language: tree_sitter::Language,
    /// Captures `@call.*`, `@member.name`, `@decl.*` and `@type.name`.
    pub references_query: &'static str,
}

pub fn get_language_config(lang: Language) -> LanguageConfig {
    match lang {
        Language::C | Language::ObjC => LanguageConfig {
            language: lang.grammar(),
            references_query: C_REFERENCES_QUERY,
        },
        Language::Cpp | Language::ObjCpp => LanguageConfig {
            language: lang.grammar(),
            references_query: CPP_REFERENCES_QUERY,
        },
    }
}

const C_REFERENCES_QUERY: &str = r#"
(call_expression
  function: (identifier) @call.name)

(call_expression
  function: (field_expression
    field: (field_identifier) @call.member))

(field_expression
  field: (field_identifier) @member.name)

(type_identifier) @type.name

(identifier) @decl.name
"#;

const CPP_REFERENCES_QUERY: &str = r#"
(call_expression
  function: (identifier) @call.name)

(call_expression
  function: (field_expression
    field: (field_identifier) @call.member))

(call_expression
  function: (qualified_identifier
    name: (identifier) @call.qualified))

(field_expression
  field: (field_identifier) @member.name)

(qualified_identifier
  name: (identifier) @decl.qualified)

(namespace_identifier) @namespace.name

(type_identifier) @type.name

(identifier) @decl.name
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_compile_against_their_grammars() {
        for lang in [Language::C, Language::Cpp, Language::ObjC, Language::ObjCpp] {
            let config = get_language_config(lang);
            let query = tree_sitter::Query::new(&config.language, config.references_query);
            assert!(query.is_ok(), "{:?}: {:?}", lang, query.err());
        }
    }
}
