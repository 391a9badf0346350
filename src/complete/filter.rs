//! Post-processing of completion rows: kind filtering, de-duplication and
//! template parameter substitution.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// A completion row: `display` is `name\tkind`, `insert` the inserted text.
pub type Row = (String, String);

static CONSTRUCTOR_MODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\t(namespace|constructor|class|typedef|struct)$").expect("Invalid constructor filter regex")
});

/// The kind or result type after the last tab of a display string.
fn kind_text(display: &str) -> Option<&str> {
    display.rsplit_once('\t').map(|(_, kind)| kind)
}

/// Keeps the rows that make sense in context. After `new` only namespaces,
/// types and constructors remain, and a type whose constructor is listed is
/// dropped in favour of the constructor. Elsewhere constructors go.
pub fn filter(rows: Vec<Row>, constructor_mode: bool) -> Vec<Row> {
    if !constructor_mode {
        return rows
            .into_iter()
            .filter(|(display, _)| matches!(kind_text(display), Some(k) if !k.is_empty() && k != "constructor"))
            .collect();
    }

    let mut constructors = Vec::new();
    let mut kept = Vec::new();
    for (display, insert) in rows {
        if !CONSTRUCTOR_MODE_RE.is_match(&display) {
            continue;
        }
        if display.ends_with("constructor") {
            let name = display.split('(').next().unwrap_or("").to_string();
            constructors.push(name);
        }
        kept.push((display, insert));
    }
    kept.retain(|(display, _)| {
        !constructors.iter().any(|name| {
            display
                .strip_prefix(name.as_str())
                .and_then(|rest| rest.strip_prefix('\t'))
                .is_some_and(|kind| matches!(kind, "class" | "typedef" | "struct"))
        })
    });
    kept
}

/// Drops repeated rows, keeping the first occurrence.
pub fn remove_duplicates(rows: Vec<Row>) -> Vec<Row> {
    let mut seen = HashSet::new();
    rows.into_iter().filter(|row| seen.insert(row.clone())).collect()
}

/// Drops rows whose inserted text starts with any of `prefixes`.
pub fn drop_startswith(rows: Vec<Row>, prefixes: &[String]) -> Vec<Row> {
    if prefixes.is_empty() {
        return rows;
    }
    rows.into_iter()
        .filter(|(_, insert)| !prefixes.iter().any(|p| insert.starts_with(p.as_str())))
        .collect()
}

/// Rewrites a template parameter name to its argument wherever it stands as
/// a whole token in a completion string.
#[derive(Debug)]
pub struct Replacement {
    pattern: Regex,
    replacement: String,
}

impl Replacement {
    pub fn new(parameter: &str, argument: &str) -> Option<Self> {
        let pattern = Regex::new(&format!(
            r"(^|,|\(|\d:|\s+)({})($|,|\s+|\))",
            regex::escape(parameter)
        ))
        .ok()?;
        Some(Self {
            pattern,
            replacement: format!("${{1}}{}${{3}}", argument.replace('$', "$$")),
        })
    }

    pub fn apply(&self, text: &str) -> String {
        // adjacent occurrences share a delimiter, so run until stable
        let mut current = text.to_string();
        for _ in 0..4 {
            let next = self.pattern.replace_all(&current, self.replacement.as_str()).into_owned();
            if next == current {
                break;
            }
            current = next;
        }
        current
    }
}

pub fn apply_all(replacements: &[Replacement], text: &str) -> String {
    replacements
        .iter()
        .fold(text.to_string(), |acc, r| r.apply(&acc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(display: &str, insert: &str) -> Row {
        (display.to_string(), insert.to_string())
    }

    #[test]
    fn constructors_are_hidden_outside_new() {
        let rows = vec![
            row("Class1()\tconstructor", "Class1()"),
            row("Class1\tclass", "Class1"),
            row("value\tint", "value"),
            row("broken", "broken"),
        ];
        assert_eq!(
            filter(rows, false),
            vec![row("Class1\tclass", "Class1"), row("value\tint", "value")]
        );
    }

    #[test]
    fn new_prefers_constructors_over_their_types() {
        let rows = vec![
            row("Class1()\tconstructor", "Class1()"),
            row("Class1\tclass", "Class1"),
            row("Other\tstruct", "Other"),
            row("std\tnamespace", "std"),
            row("value\tint", "value"),
        ];
        assert_eq!(
            filter(rows, true),
            vec![
                row("Class1()\tconstructor", "Class1()"),
                row("Other\tstruct", "Other"),
                row("std\tnamespace", "std"),
            ]
        );
    }

    #[test]
    fn duplicates_keep_first_position() {
        let rows = vec![row("a\tint", "a"), row("b\tint", "b"), row("a\tint", "a")];
        assert_eq!(remove_duplicates(rows), vec![row("a\tint", "a"), row("b\tint", "b")]);
    }

    #[test]
    fn startswith_filter_uses_insert_text() {
        let rows = vec![row("_private\tint", "_private"), row("size()\tint", "size()")];
        assert_eq!(
            drop_startswith(rows, &["_".to_string()]),
            vec![row("size()\tint", "size()")]
        );
    }

    #[test]
    fn template_parameters_are_substituted_by_token() {
        let r = Replacement::new("T", "std::string").expect("replacement");
        assert_eq!(r.apply("push_back(const T &x)\tvoid"), "push_back(const std::string &x)\tvoid");
        assert_eq!(r.apply("back()\tT"), "back()\tstd::string");
        assert_eq!(r.apply("Tree()\tvoid"), "Tree()\tvoid");
        let pair = [
            Replacement::new("K", "int").expect("replacement"),
            Replacement::new("V", "Foo").expect("replacement"),
        ];
        assert_eq!(apply_all(&pair, "insert(K,V)\tvoid"), "insert(int,Foo)\tvoid");
    }
}
