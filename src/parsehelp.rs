//! Textual analysis of a C-like buffer.
//!
//! These helpers look at the text before the cursor and make best-effort
//! guesses about the expression being completed, the enclosing class and
//! namespace, and the variables in scope. They are heuristics, not a parser.
//! Offsets are byte offsets; lines and columns are 1-based.

use std::sync::LazyLock;

use regex::Regex;

static NAMESPACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bnamespace\s+([A-Za-z_][\w:]*)\s*\{").expect("Invalid namespace regex")
});

static USING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\busing\s+(namespace\s+)?(?:::)?([A-Za-z_][\w:]*)\s*;").expect("Invalid using regex")
});

static FUNCTION_SCOPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|[^\w:])((?:[A-Za-z_]\w*\s*(?:<[^<>;{}]*>)?\s*::\s*)+)~?\s*(?:[A-Za-z_]\w*|operator\s*[^\s(]+)\s*\([^;{}]*\)\s*(?:const\s*)?(?:noexcept\s*)?(?:override\s*)?(?::[^;{}]*)?\{",
    )
    .expect("Invalid function scope regex")
});

static CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:class|struct|union)\s+(?:[A-Za-z_]\w*\s+)*?([A-Za-z_]\w*)\s*(?:final\s*)?(?::[^;{}]*)?\{",
    )
    .expect("Invalid class regex")
});

static DECLARATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)^\s*(?:(?:public|private|protected)\s*:\s*)?(?P<ty>(?:[A-Za-z_][\w:]*\s*(?:<.*>)?\s+)*?[A-Za-z_][\w:]*\s*(?:<.*>)?)(?P<sep>\s*[*&]+\s*|\s+)(?P<name>[A-Za-z_]\w*)\s*(?P<dims>(?:\[[^\]]*\]\s*)*)(?:=.*)?$",
    )
    .expect("Invalid declaration regex")
});

static OBJC_MESSAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\s*([A-Za-z_]\w*)\s+$").expect("Invalid message regex")
});

static OBJC_NESTED_MESSAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\s*\[\s*([A-Za-z_]\w*)\s+([A-Za-z_]\w*)\s*\]\s+$").expect("Invalid message regex")
});

/// Words that can never start the type of a declaration.
const NON_TYPE_KEYWORDS: &[&str] = &[
    "return", "new", "delete", "else", "case", "goto", "throw", "sizeof", "typedef", "using",
    "namespace", "do", "if", "while", "for", "switch", "operator", "template", "friend",
    "default", "break", "continue", "co_return", "co_await", "co_yield", "public", "private",
    "protected",
];

/// Words that qualify a type without naming it.
const TYPE_QUALIFIERS: &[&str] = &[
    "const", "volatile", "static", "extern", "mutable", "register", "inline", "struct", "class",
    "union", "enum", "typename",
];

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn clamp(buf: &str, off: usize) -> usize {
    let mut off = off.min(buf.len());
    while !buf.is_char_boundary(off) {
        off -= 1;
    }
    off
}

// ---------------------------------------------------------------------------
// Line and column arithmetic
// ---------------------------------------------------------------------------

pub fn get_line_and_column(buf: &str, off: usize) -> (usize, usize) {
    let off = clamp(buf, off);
    let before = &buf[..off];
    let line = before.bytes().filter(|&b| b == b'\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    (line, off - line_start + 1)
}

pub fn get_offset_from_line_and_column(buf: &str, line: usize, column: usize) -> usize {
    let mut start = 0;
    for _ in 1..line.max(1) {
        match buf[start..].find('\n') {
            Some(i) => start += i + 1,
            None => return buf.len(),
        }
    }
    let end = buf[start..].find('\n').map_or(buf.len(), |i| start + i);
    clamp(buf, (start + column.saturating_sub(1)).min(end))
}

pub fn extract_line_at_offset(buf: &str, off: usize) -> &str {
    let off = clamp(buf, off);
    let start = buf[..off].rfind('\n').map_or(0, |i| i + 1);
    let end = buf[off..].find('\n').map_or(buf.len(), |i| off + i);
    &buf[start..end]
}

pub fn extract_line_until_offset(buf: &str, off: usize) -> &str {
    let off = clamp(buf, off);
    let start = buf[..off].rfind('\n').map_or(0, |i| i + 1);
    &buf[start..off]
}

/// The identifier touching `off`, or an empty string.
pub fn extract_word_at_offset(buf: &str, off: usize) -> &str {
    let off = clamp(buf, off);
    let bytes = buf.as_bytes();
    let mut start = off;
    while start > 0 && is_word_byte(bytes[start - 1]) {
        start -= 1;
    }
    let mut end = off;
    while end < bytes.len() && is_word_byte(bytes[end]) {
        end += 1;
    }
    &buf[start..end]
}

// ---------------------------------------------------------------------------
// Masking and collapsing
// ---------------------------------------------------------------------------

fn blank_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b == b'\n' { '\n' } else { ' ' })
        .collect()
}

/// Blanks out comments and the contents of string and character literals.
/// The result has the same length as the input, so offsets stay valid.
pub fn remove_comments(buf: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        Line,
        Block,
        Str(u8),
    }

    let bytes = buf.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut state = State::Code;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            State::Code => match (b, next) {
                (b'/', Some(b'/')) => {
                    state = State::Line;
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                (b'/', Some(b'*')) => {
                    state = State::Block;
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                (b'"', _) | (b'\'', _) => {
                    state = State::Str(b);
                    out.push(b);
                }
                _ => out.push(b),
            },
            State::Line => {
                if b == b'\n' {
                    state = State::Code;
                    out.push(b'\n');
                } else {
                    out.push(b' ');
                }
            }
            State::Block => {
                if b == b'*' && next == Some(b'/') {
                    state = State::Code;
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                out.push(if b == b'\n' { b'\n' } else { b' ' });
            }
            State::Str(quote) => {
                if b == b'\\' && next.is_some() {
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                if b == quote {
                    state = State::Code;
                    out.push(b);
                } else if b == b'\n' {
                    // unterminated literal
                    state = State::Code;
                    out.push(b'\n');
                } else {
                    out.push(b' ');
                }
            }
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Blanks out preprocessor lines, including backslash continuations.
pub fn remove_preprocessing(buf: &str) -> String {
    let mut out = String::with_capacity(buf.len());
    let mut continued = false;
    for line in buf.split_inclusive('\n') {
        let directive = continued || line.trim_start().starts_with('#');
        continued = directive && line.trim_end_matches(['\n', '\r']).ends_with('\\');
        if directive {
            out.push_str(&blank_bytes(line.as_bytes()));
        } else {
            out.push_str(line);
        }
    }
    out
}

/// Blanks out `#include`/`#import` lines only.
pub fn remove_includes(buf: &str) -> String {
    let mut out = String::with_capacity(buf.len());
    for line in buf.split_inclusive('\n') {
        let directive = line.trim_start().strip_prefix('#').map(str::trim_start);
        if directive.is_some_and(|d| d.starts_with("include") || d.starts_with("import")) {
            out.push_str(&blank_bytes(line.as_bytes()));
        } else {
            out.push_str(line);
        }
    }
    out
}

fn collapse(s: &str, open: char, close: char, mask: bool) -> String {
    let mut out = String::with_capacity(s.len());
    let mut stack: Vec<usize> = Vec::new();
    for c in s.chars() {
        if c == open {
            stack.push(out.len());
            out.push(c);
        } else if c == close {
            if let Some(pos) = stack.pop() {
                if mask {
                    let blanked = blank_bytes(&out.as_bytes()[pos + 1..]);
                    out.truncate(pos + 1);
                    out.push_str(&blanked);
                } else {
                    out.truncate(pos + 1);
                }
            }
            out.push(c);
        } else {
            out.push(c);
        }
    }
    out
}

/// Removes the contents of every closed `{...}` block.
pub fn collapse_brackets(s: &str) -> String {
    collapse(s, '{', '}', false)
}

/// Removes the contents of every closed `(...)` group.
pub fn collapse_parenthesis(s: &str) -> String {
    collapse(s, '(', ')', false)
}

/// Removes the contents of every closed `[...]` group.
pub fn collapse_square_brackets(s: &str) -> String {
    collapse(s, '[', ']', false)
}

/// Like `collapse_brackets`, but blanks instead of removing.
pub fn mask_brackets(s: &str) -> String {
    collapse(s, '{', '}', true)
}

/// Removes template argument lists. A `<` only opens a list when it follows
/// an identifier; `->` never closes one.
pub fn collapse_ltgt(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut stack: Vec<usize> = Vec::new();
    let mut prev: Option<char> = None;
    let mut prev_word: Option<char> = None;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '<' if prev_word.is_some_and(|p| p.is_alphanumeric() || p == '_')
                && !matches!(chars.peek(), Some('<') | Some('=')) =>
            {
                stack.push(out.len());
                out.push(c);
            }
            '>' if prev != Some('-') && !stack.is_empty() => {
                if let Some(pos) = stack.pop() {
                    out.truncate(pos + 1);
                }
                out.push(c);
            }
            _ => out.push(c),
        }
        prev = Some(c);
        if !c.is_whitespace() {
            prev_word = Some(c);
        }
    }
    out
}

/// Comments, literals, preprocessing and closed blocks blanked out.
fn visible_text(buf: &str) -> String {
    mask_brackets(&remove_preprocessing(&remove_comments(buf)))
}

fn collapsed_text(buf: &str) -> String {
    collapse_brackets(&remove_preprocessing(&remove_comments(buf)))
}

/// True when the `{` ending at `end` still encloses the end of the text.
fn is_open_block(text: &str, end: usize) -> bool {
    text.as_bytes().get(end) != Some(&b'}')
}

// ---------------------------------------------------------------------------
// Scope extraction
// ---------------------------------------------------------------------------

/// The chain of namespaces enclosing the end of the buffer, joined by `::`.
pub fn extract_namespace(buf: &str) -> String {
    let text = collapsed_text(buf);
    NAMESPACE_RE
        .captures_iter(&text)
        .filter(|cap| cap.get(0).is_some_and(|m| is_open_block(&text, m.end())))
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect::<Vec<_>>()
        .join("::")
}

/// Namespaces pulled in by `using` declarations visible at the end of the
/// buffer. `using A::B;` contributes `A`.
pub fn extract_used_namespaces(buf: &str) -> Vec<String> {
    let text = collapsed_text(buf);
    let mut namespaces = Vec::new();
    for cap in USING_RE.captures_iter(&text) {
        let Some(name) = cap.get(2).map(|m| m.as_str()) else {
            continue;
        };
        let ns = if cap.get(1).is_some() {
            Some(name.to_string())
        } else {
            name.rfind("::").map(|i| name[..i].to_string())
        };
        if let Some(ns) = ns {
            if !ns.is_empty() && !namespaces.contains(&ns) {
                namespaces.push(ns);
            }
        }
    }
    namespaces
}

/// Qualifier of the out-of-line function definition enclosing the end of the
/// buffer: `Test::Class1` for `void Test::Class1::f() {`.
pub fn extract_function_scope(buf: &str) -> Option<String> {
    let text = collapsed_text(buf);
    let cap = FUNCTION_SCOPE_RE
        .captures_iter(&text)
        .filter(|cap| cap.get(0).is_some_and(|m| is_open_block(&text, m.end())))
        .last()?;
    let qualifier = cap.get(1)?.as_str();
    let scope = collapse_ltgt(qualifier)
        .split("::")
        .map(|part| part.split('<').next().unwrap_or("").trim().to_string())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("::");
    (!scope.is_empty()).then_some(scope)
}

/// Class of the out-of-line member function enclosing the end of the buffer.
pub fn extract_class_from_function(buf: &str) -> Option<String> {
    let scope = extract_function_scope(buf)?;
    scope.rsplit("::").next().map(str::to_string)
}

/// Innermost class, struct or union body enclosing the end of the buffer.
pub fn extract_class(buf: &str) -> Option<String> {
    let text = collapsed_text(buf);
    CLASS_RE
        .captures_iter(&text)
        .filter(|cap| cap.get(0).is_some_and(|m| is_open_block(&text, m.end())))
        .last()
        .and_then(|cap| cap.get(1).map(|m| m.as_str().to_string()))
}

/// The enclosing class, preferring an out-of-line definition's qualifier.
pub fn extract_enclosing_class(buf: &str) -> Option<String> {
    extract_class_from_function(buf).or_else(|| extract_class(buf))
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// A declaration found in the text: the declared type spelled with its
/// pointer suffix, the name, and the byte offset of the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub typename: String,
    pub name: String,
    pub offset: usize,
}

/// Splits the text at statement and argument delimiters, ignoring commas
/// inside template argument lists. Yields `(start, end, terminator)`.
fn declaration_segments(text: &str) -> Vec<(usize, usize, u8)> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'<' if i > 0 && (is_word_byte(bytes[i - 1]) || bytes[i - 1] == b' ') => depth += 1,
            b'>' if depth > 0 && (i == 0 || bytes[i - 1] != b'-') => depth -= 1,
            b',' if depth > 0 => {}
            b';' | b'{' | b'}' | b'(' | b')' | b',' => {
                segments.push((start, i, b));
                start = i + 1;
                depth = 0;
            }
            _ => {}
        }
    }
    segments.push((start, bytes.len(), 0));
    segments
}

fn is_declaration_type(ty: &str) -> bool {
    let words: Vec<&str> = ty.split_whitespace().collect();
    if words.iter().any(|w| NON_TYPE_KEYWORDS.contains(w)) {
        return false;
    }
    words.iter().any(|w| !TYPE_QUALIFIERS.contains(w))
}

fn parse_declaration(segment: &str) -> Option<(String, String, usize)> {
    let cap = DECLARATION_RE.captures(segment)?;
    let ty = cap.name("ty")?.as_str().trim();
    if !is_declaration_type(ty) {
        return None;
    }
    let name = cap.name("name")?;
    if NON_TYPE_KEYWORDS.contains(&name.as_str()) || TYPE_QUALIFIERS.contains(&name.as_str()) {
        return None;
    }
    let indirection: String = cap
        .name("sep")
        .map(|m| m.as_str().chars().filter(|c| matches!(c, '*' | '&')).collect())
        .unwrap_or_default();
    let dims = cap
        .name("dims")
        .map_or(0, |m| m.as_str().matches('[').count());
    let mut typename = ty.split_whitespace().collect::<Vec<_>>().join(" ");
    let suffix = format!("{}{}", indirection, "*".repeat(dims));
    if !suffix.is_empty() {
        typename.push(' ');
        typename.push_str(&suffix);
    }
    Some((typename, name.as_str().to_string(), name.start()))
}

fn declarations(buf: &str) -> Vec<Declaration> {
    let text = visible_text(buf);
    declaration_segments(&text)
        .into_iter()
        .filter(|&(start, end, terminator)| terminator != b'(' || text[start..end].contains('='))
        .filter_map(|(start, end, _)| {
            parse_declaration(&text[start..end]).map(|(typename, name, off)| Declaration {
                typename,
                name,
                offset: start + off,
            })
        })
        .collect()
}

/// Variable declarations visible at the end of the buffer, as
/// `(type, name)` pairs in textual order.
pub fn extract_variables(buf: &str) -> Vec<(String, String)> {
    declarations(buf)
        .into_iter()
        .map(|d| (d.typename, d.name))
        .collect()
}

/// The last visible declaration of `var`.
pub fn find_variable_declaration(buf: &str, var: &str) -> Option<Declaration> {
    declarations(buf).into_iter().filter(|d| d.name == var).last()
}

// ---------------------------------------------------------------------------
// Completion expressions
// ---------------------------------------------------------------------------

/// The minimal expression before the cursor that a member or scope
/// completion applies to, with argument and subscript lists emptied:
/// `foo(a, b).bar[3]->` becomes `foo().bar[]->`.
pub fn extract_completion(before: &str) -> Option<String> {
    let s = collapse_parenthesis(&collapse_square_brackets(before));
    let bytes = s.as_bytes();
    let mut i = bytes.len();
    while i > 0 {
        let c = bytes[i - 1];
        if is_word_byte(c) || c == b'.' || c == b':' {
            i -= 1;
        } else if c == b'>' && i >= 2 && bytes[i - 2] == b'-' {
            i -= 2;
        } else if (c == b')' || c == b']') && i >= 2 && matches!(bytes[i - 2], b'(' | b'[') {
            i -= 2;
        } else if c == b'>' {
            let mut depth = 0usize;
            let mut j = i;
            let mut open = None;
            while j > 0 {
                j -= 1;
                match bytes[j] {
                    b'>' => depth += 1,
                    b'<' => {
                        depth -= 1;
                        if depth == 0 {
                            open = Some(j);
                            break;
                        }
                    }
                    b';' | b'{' | b'}' => break,
                    _ => {}
                }
            }
            match open {
                Some(j) if j > 0 && is_word_byte(bytes[j - 1]) => i = j,
                _ => break,
            }
        } else {
            break;
        }
    }
    let expr = s[i..].trim_start_matches(|c: char| c == ':' && !s[i..].starts_with("::"));
    (!expr.is_empty()).then(|| expr.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Dot,
    Arrow,
    Subscript,
    Call,
    Scope,
    /// Objective-C message send, `[receiver `.
    Message,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailToken {
    Member { name: String, call: bool },
    Op(Op),
}

/// The root of a completion expression and how it was declared.
///
/// `var` is the root identifier when it is `this` or a variable declared in
/// the buffer; `typename` is its declared type. When the root is a call or
/// an undeclared name (a member of the enclosing class, a global), `var` is
/// `None` and `typename` is the name itself, with `()` appended for calls.
/// `line`/`column` point at the declaration and are 0 when unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefinition {
    pub line: usize,
    pub column: usize,
    pub typename: Option<String>,
    pub var: Option<String>,
    pub tail: Vec<TailToken>,
}

pub(crate) fn tokenize_tail(rest: &str) -> Option<Vec<TailToken>> {
    let mut tokens = Vec::new();
    let mut s = rest.trim();
    while !s.is_empty() {
        if let Some(r) = s.strip_prefix("->") {
            tokens.push(TailToken::Op(Op::Arrow));
            s = r;
        } else if let Some(r) = s.strip_prefix("::") {
            tokens.push(TailToken::Op(Op::Scope));
            s = r;
        } else if let Some(r) = s.strip_prefix('.') {
            tokens.push(TailToken::Op(Op::Dot));
            s = r;
        } else if let Some(r) = s.strip_prefix("[]") {
            tokens.push(TailToken::Op(Op::Subscript));
            s = r;
        } else if let Some(r) = s.strip_prefix("()") {
            tokens.push(TailToken::Op(Op::Call));
            s = r;
        } else if s.as_bytes()[0] == b'<' {
            // explicit template arguments on a member call are not tracked
            let close = s.find('>')?;
            s = &s[close + 1..];
        } else if is_word_byte(s.as_bytes()[0]) {
            let end = s.bytes().position(|b| !is_word_byte(b)).unwrap_or(s.len());
            let name = s[..end].to_string();
            s = &s[end..];
            let call = s.starts_with("()");
            if call {
                s = &s[2..];
            }
            tokens.push(TailToken::Member { name, call });
        } else {
            return None;
        }
        s = s.trim_start();
    }
    Some(tokens)
}

pub(crate) fn split_root(expr: &str) -> Option<(&str, &str)> {
    let bytes = expr.as_bytes();
    let mut i = 0;
    if expr.starts_with("::") {
        i = 2;
    }
    loop {
        let start = i;
        while i < bytes.len() && is_word_byte(bytes[i]) {
            i += 1;
        }
        if i == start || bytes[start].is_ascii_digit() {
            return None;
        }
        // a qualified root continues only when another identifier follows
        let rest = &expr[i..];
        match rest.strip_prefix("::") {
            Some(r) if r.bytes().next().is_some_and(is_word_byte) && r.contains(['.', '-', '[', ':']) => {
                i += 2;
            }
            _ => break,
        }
    }
    Some((&expr[..i], &expr[i..]))
}

/// Parses the completion expression at the end of `data`.
pub fn get_type_definition(data: &str) -> Option<TypeDefinition> {
    if let Some(cap) = OBJC_NESTED_MESSAGE_RE.captures(data) {
        let receiver = cap.get(1)?.as_str();
        let selector = cap.get(2)?.as_str().to_string();
        let mut def = root_definition(data, receiver)?;
        def.tail = vec![
            TailToken::Op(Op::Message),
            TailToken::Member {
                name: selector,
                call: true,
            },
            TailToken::Op(Op::Message),
        ];
        return Some(def);
    }
    if let Some(cap) = OBJC_MESSAGE_RE.captures(data) {
        let receiver = cap.get(1)?.as_str();
        let mut def = root_definition(data, receiver)?;
        def.tail = vec![TailToken::Op(Op::Message)];
        return Some(def);
    }

    let expr = extract_completion(data)?;
    let (root, rest) = split_root(&expr)?;
    let (is_call, rest) = match rest.strip_prefix("()") {
        Some(r) => (true, r),
        None => (false, rest),
    };
    let tail = tokenize_tail(rest)?;

    let mut def = if is_call {
        TypeDefinition {
            line: 0,
            column: 0,
            typename: Some(format!("{}()", root)),
            var: None,
            tail: Vec::new(),
        }
    } else {
        root_definition(data, root)?
    };
    def.tail = tail;
    Some(def)
}

fn root_definition(data: &str, root: &str) -> Option<TypeDefinition> {
    if root == "this" {
        return Some(TypeDefinition {
            line: 0,
            column: 0,
            typename: extract_enclosing_class(data),
            var: Some("this".to_string()),
            tail: Vec::new(),
        });
    }
    if root.contains("::") {
        return Some(TypeDefinition {
            line: 0,
            column: 0,
            typename: Some(root.trim_start_matches("::").to_string()),
            var: None,
            tail: Vec::new(),
        });
    }
    Some(match find_variable_declaration(data, root) {
        Some(decl) => {
            let (line, column) = get_line_and_column(data, decl.offset);
            TypeDefinition {
                line,
                column,
                typename: Some(decl.typename),
                var: Some(root.to_string()),
                tail: Vec::new(),
            }
        }
        None => TypeDefinition {
            line: 0,
            column: 0,
            typename: Some(root.to_string()),
            var: None,
            tail: Vec::new(),
        },
    })
}

// ---------------------------------------------------------------------------
// Type names
// ---------------------------------------------------------------------------

/// A type name split into its template and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSpec {
    pub name: String,
    pub args: Option<Vec<TemplateSpec>>,
}

impl TemplateSpec {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: None,
        }
    }
}

/// Splits a template argument list at top-level commas.
pub fn template_split(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '<' | '(' => depth += 1,
            '>' | ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current.trim().to_string());
    parts.retain(|p| !p.is_empty());
    parts
}

pub fn solve_template(typename: &str) -> TemplateSpec {
    let t = typename.trim();
    match t.find('<') {
        Some(open) if t.ends_with('>') => TemplateSpec {
            name: t[..open].trim().to_string(),
            args: Some(
                template_split(&t[open + 1..t.len() - 1])
                    .iter()
                    .map(|arg| solve_template(arg))
                    .collect(),
            ),
        },
        _ => TemplateSpec::plain(t),
    }
}

/// Number of pointer dereferences a declared type allows, counting `*` and
/// array dimensions outside template arguments.
pub fn get_pointer_level(typename: &str) -> usize {
    let mut depth = 0i32;
    let mut level = 0;
    for c in typename.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth -= 1,
            '*' | '[' if depth == 0 => level += 1,
            _ => {}
        }
    }
    level
}

/// The type name without qualifiers, indirection or array dimensions.
/// Template arguments are kept verbatim.
pub fn get_base_type(typename: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_dims = false;
    for c in typename.chars() {
        if depth == 0 {
            if in_dims {
                in_dims = c != ']';
                continue;
            }
            if c == '[' {
                in_dims = true;
                continue;
            }
            if c == '*' || c == '&' || c.is_whitespace() {
                flush_word(&mut words, &mut current);
                continue;
            }
        }
        match c {
            '<' => depth += 1,
            '>' => depth -= 1,
            _ => {}
        }
        current.push(c);
    }
    flush_word(&mut words, &mut current);
    words
        .into_iter()
        .filter(|w| !TYPE_QUALIFIERS.contains(&w.as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn flush_word(words: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        words.push(std::mem::take(current));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn line_and_column_round_trip() {
        let buf = "int a;\nint bc;\n  x";
        assert_eq!(get_line_and_column(buf, 0), (1, 1));
        assert_eq!(get_line_and_column(buf, 11), (2, 5));
        assert_eq!(get_line_and_column(buf, buf.len()), (3, 4));
        assert_eq!(get_offset_from_line_and_column(buf, 2, 5), 11);
        assert_eq!(extract_line_at_offset(buf, 9), "int bc;");
        assert_eq!(extract_line_until_offset(buf, 11), "int ");
        assert_eq!(extract_word_at_offset(buf, 12), "bc");
        assert_eq!(extract_word_at_offset(buf, 14), "");
    }

    #[test]
    fn comments_and_strings_are_blanked() {
        let buf = "a // b {\nc /* { */ \"{\" d";
        let masked = remove_comments(buf);
        assert_eq!(masked.len(), buf.len());
        assert!(!masked.contains('{'));
        assert!(masked.contains('c') && masked.contains('d'));
    }

    #[test]
    fn preprocessor_lines_are_blanked() {
        let buf = "#include <a>\n#define X \\\n  1\nint x;\n";
        let stripped = remove_preprocessing(buf);
        assert_eq!(stripped.len(), buf.len());
        assert!(stripped.trim_start().starts_with("int x;"));
        let includes = remove_includes(buf);
        assert!(!includes.contains("include") && includes.contains("define"));
    }

    #[test]
    fn collapse_removes_closed_groups() {
        assert_eq!(collapse_brackets("a { b { c } d } e { f"), "a {} e { f");
        assert_eq!(collapse_parenthesis("foo(a, (b)).bar("), "foo().bar(");
        assert_eq!(mask_brackets("a{bc}d").len(), 6);
        assert_eq!(collapse_ltgt("std::vector<std::map<int, int> > v; a->b"), "std::vector<> v; a->b");
    }

    #[test]
    fn namespaces_and_classes() {
        let buf = "namespace A { namespace Closed { int x; }\nnamespace B {\nusing namespace std;\nusing Test::Class1;\nclass Foo : public Bar {\n void f() {";
        assert_eq!(extract_namespace(buf), "A::B");
        assert_eq!(extract_used_namespaces(buf), vec!["std".to_string(), "Test".to_string()]);
        assert_eq!(extract_class(buf), Some("Foo".to_string()));
        assert_eq!(extract_class("class Done { };"), None);
        assert_eq!(extract_class("template<class T> class sp {"), Some("sp".to_string()));
    }

    #[test]
    fn out_of_line_function_scope() {
        let buf = "void Test::Class1::function(Class1 &other) { other.";
        assert_eq!(extract_function_scope(buf), Some("Test::Class1".to_string()));
        assert_eq!(extract_class_from_function(buf), Some("Class1".to_string()));
        assert_eq!(
            extract_class_from_function("std::vector<int> Foo::bar() const {"),
            Some("Foo".to_string())
        );
        assert_eq!(extract_class_from_function("void Foo::bar() {}\n"), None);
    }

    #[test]
    fn variables_visible_at_end() {
        let buf = "void f(int a, Foo &b) {\n  std::map<int, int> m;\n  { int hidden; }\n  return a;\n  Test t[1];\n  C *c = get(1, 2);\n";
        let vars = extract_variables(buf);
        assert_eq!(
            vars,
            vec![
                ("int".to_string(), "a".to_string()),
                ("Foo &".to_string(), "b".to_string()),
                ("std::map<int, int>".to_string(), "m".to_string()),
                ("Test *".to_string(), "t".to_string()),
                ("C *".to_string(), "c".to_string()),
            ]
        );
    }

    #[test]
    fn completion_expression() {
        assert_eq!(extract_completion("x = foo(a, b).bar[3]->"), Some("foo().bar[]->".to_string()));
        assert_eq!(extract_completion("std::vector<int>::"), Some("std::vector<int>::".to_string()));
        assert_eq!(extract_completion("  "), None);
    }

    #[test]
    fn type_definition_of_declared_variable() {
        let def = get_type_definition("Class1 c;\nc.").unwrap();
        assert_eq!(def.var.as_deref(), Some("c"));
        assert_eq!(def.typename.as_deref(), Some("Class1"));
        assert_eq!((def.line, def.column), (1, 8));
        assert_eq!(def.tail, vec![TailToken::Op(Op::Dot)]);
    }

    #[test]
    fn type_definition_of_chain() {
        let def = get_type_definition("void C::something() { tripleA[0][0][0]->").unwrap();
        assert_eq!(def.var, None);
        assert_eq!(def.typename.as_deref(), Some("tripleA"));
        assert_eq!(
            def.tail,
            vec![
                TailToken::Op(Op::Subscript),
                TailToken::Op(Op::Subscript),
                TailToken::Op(Op::Subscript),
                TailToken::Op(Op::Arrow),
            ]
        );

        let def = get_type_definition("sp<A> t; t.get()->").unwrap();
        assert_eq!(def.typename.as_deref(), Some("sp<A>"));
        assert_eq!(
            def.tail,
            vec![
                TailToken::Op(Op::Dot),
                TailToken::Member { name: "get".to_string(), call: true },
                TailToken::Op(Op::Arrow),
            ]
        );

        let def = get_type_definition("getInstance()->").unwrap();
        assert_eq!(def.typename.as_deref(), Some("getInstance()"));
    }

    #[test]
    fn type_definition_of_this() {
        let def = get_type_definition("void Class2::something() { this->").unwrap();
        assert_eq!(def.var.as_deref(), Some("this"));
        assert_eq!(def.typename.as_deref(), Some("Class2"));
        let outside = get_type_definition("this.").unwrap();
        assert_eq!(outside.typename, None);
    }

    #[test]
    fn objc_message_send() {
        let def = get_type_definition("NSString *s;\n[s ").unwrap();
        assert_eq!(def.var.as_deref(), Some("s"));
        assert_eq!(def.tail, vec![TailToken::Op(Op::Message)]);
    }

    #[test]
    fn template_and_pointer_helpers() {
        assert_eq!(
            solve_template("std::map<std::string, sp<A> >"),
            TemplateSpec {
                name: "std::map".to_string(),
                args: Some(vec![
                    TemplateSpec::plain("std::string"),
                    TemplateSpec {
                        name: "sp".to_string(),
                        args: Some(vec![TemplateSpec::plain("A")]),
                    },
                ]),
            }
        );
        assert_eq!(get_pointer_level("C ***"), 3);
        assert_eq!(get_pointer_level("sp<A*> *"), 1);
        assert_eq!(get_base_type("const std::vector<const char *> &"), "std::vector<const char *>");
        assert_eq!(get_base_type("struct Test *"), "Test");
    }
}
