use bitflags::bitflags;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::ast::{Ast, SourceLocation, ROOT};
use super::cursor::Cursor;
use super::lower::Lowering;
use crate::error::{Error, Result};
use crate::workspace::language::Language;

bitflags! {
    /// Options for [`Index::parse`], bit-compatible with the
    /// `index_parse_options` setting.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ParseFlags: u32 {
        const DETAILED_PREPROCESSING_RECORD = 0x01;
        const INCOMPLETE = 0x02;
        const PRECOMPILED_PREAMBLE = 0x04;
        const CACHE_COMPLETION_RESULTS = 0x08;
        const SKIP_FUNCTION_BODIES = 0x40;
    }
}

impl Default for ParseFlags {
    fn default() -> Self {
        ParseFlags::from_bits_truncate(13)
    }
}

/// Editor buffer contents that take precedence over the file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsavedFile {
    pub path: PathBuf,
    pub contents: String,
}

impl UnsavedFile {
    pub fn new(path: impl AsRef<Path>, contents: impl Into<String>) -> Self {
        Self {
            path: normalize_path(path.as_ref()),
            contents: contents.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ignored,
    Note,
    Warning,
    Error,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub location: SourceLocation,
    pub spelling: String,
}

/// The subset of compiler arguments the front end understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileArgs {
    pub include_dirs: Vec<PathBuf>,
    pub quote_dirs: Vec<PathBuf>,
    pub system_dirs: Vec<PathBuf>,
    pub language: Language,
}

impl CompileArgs {
    pub fn parse(args: &[String], path: &Path) -> Self {
        let mut parsed = CompileArgs {
            include_dirs: Vec::new(),
            quote_dirs: Vec::new(),
            system_dirs: Vec::new(),
            language: Language::from_path(path).unwrap_or(Language::Cpp),
        };
        let mut iter = args.iter().peekable();
        while let Some(arg) = iter.next() {
            let arg = arg.as_str();
            let mut take = |flag: &str| -> Option<PathBuf> {
                let rest = arg.strip_prefix(flag)?;
                if rest.is_empty() {
                    iter.next().map(PathBuf::from)
                } else {
                    Some(PathBuf::from(rest.trim_start_matches('=')))
                }
            };
            if let Some(dir) = take("-isystem") {
                parsed.system_dirs.push(dir);
            } else if let Some(dir) = take("-iquote") {
                parsed.quote_dirs.push(dir);
            } else if let Some(dir) = take("-I") {
                parsed.include_dirs.push(dir);
            } else if arg == "-ObjC" {
                parsed.language = Language::ObjC;
            } else if arg == "-ObjC++" {
                parsed.language = Language::ObjCpp;
            } else if let Some(lang) = take("-x") {
                if let Some(lang) = lang.to_str().and_then(Language::from_flag) {
                    parsed.language = lang;
                }
            }
        }
        parsed
    }
}

/// Absolute, symlink-free form of `path` when it exists, otherwise the
/// path made absolute against the working directory.
pub fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(p) = std::fs::canonicalize(path) {
        return p;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

pub(crate) fn read_source(path: &Path, unsaved: &[UnsavedFile]) -> Result<String> {
    if let Some(buffer) = unsaved.iter().find(|u| u.path == path) {
        return Ok(buffer.contents.clone());
    }
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Entry point for creating translation units.
#[derive(Debug, Clone, Default)]
pub struct Index {
    _private: (),
}

impl Index {
    pub fn create() -> Self {
        Self::default()
    }

    pub fn parse(
        &self,
        path: &Path,
        args: &[String],
        unsaved: &[UnsavedFile],
        flags: ParseFlags,
    ) -> Result<TranslationUnit> {
        let path = normalize_path(path);
        let compile = CompileArgs::parse(args, &path);
        let (ast, diagnostics) = lower(&path, &compile, unsaved, flags)?;
        Ok(TranslationUnit {
            path,
            args: args.to_vec(),
            compile,
            flags,
            ast,
            diagnostics,
        })
    }
}

fn lower(
    path: &Path,
    compile: &CompileArgs,
    unsaved: &[UnsavedFile],
    flags: ParseFlags,
) -> Result<(Ast, Vec<Diagnostic>)> {
    let unsaved: Vec<UnsavedFile> = unsaved
        .iter()
        .map(|u| UnsavedFile {
            path: normalize_path(&u.path),
            contents: u.contents.clone(),
        })
        .collect();
    let mut lowering = Lowering::new(path, compile, &unsaved, flags)?;
    lowering.lower_file(path, ROOT)?;
    let (ast, diagnostics) = lowering.finish();
    debug!(
        "Parsed {}: {} entities, {} files, {} diagnostics",
        path.display(),
        ast.len(),
        ast.files.len(),
        diagnostics.len()
    );
    Ok((ast, diagnostics))
}

/// A parsed source file together with everything it includes.
#[derive(Debug, Clone)]
pub struct TranslationUnit {
    path: PathBuf,
    args: Vec<String>,
    compile: CompileArgs,
    flags: ParseFlags,
    pub(crate) ast: Ast,
    diagnostics: Vec<Diagnostic>,
}

impl TranslationUnit {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn flags(&self) -> ParseFlags {
        self.flags
    }

    pub fn language(&self) -> Language {
        self.compile.language
    }

    /// Re-runs the front end with the same arguments and fresh buffers.
    pub fn reparse(&mut self, unsaved: &[UnsavedFile]) -> Result<()> {
        let (ast, diagnostics) = lower(&self.path, &self.compile, unsaved, self.flags)?;
        self.ast = ast;
        self.diagnostics = diagnostics;
        Ok(())
    }

    /// The translation unit cursor.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(&self.ast, ROOT)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Text of a file that is part of this translation unit.
    pub fn file_text(&self, path: &Path) -> Option<&str> {
        let path = normalize_path(path);
        self.ast.file_id(&path).map(|id| self.ast.file(id).text.as_str())
    }

    /// The innermost cursor at a 1-based position.
    pub fn get_cursor(&self, file: &Path, line: u32, column: u32) -> Option<Cursor<'_>> {
        let path = normalize_path(file);
        let file_id = self.ast.file_id(&path)?;
        let offset = self.ast.file(file_id).offset(line, column);
        let mut best: Option<(usize, usize)> = None;
        for (id, e) in self.ast.entities.iter().enumerate().skip(1) {
            if e.file != file_id || offset < e.extent.0 || offset > e.extent.1 {
                continue;
            }
            // an offset right after a name still belongs to it
            if offset == e.extent.1 && e.extent.0 != e.extent.1 && !e.kind.is_reference() && !e.kind.is_expression() {
                continue;
            }
            let size = e.extent.1 - e.extent.0;
            if best.map_or(true, |(_, s)| size <= s) {
                best = Some((id, size));
            }
        }
        best.map(|(id, _)| Cursor::new(&self.ast, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn compile_args_are_parsed() {
        let parsed = CompileArgs::parse(
            &args(&["-I/a", "-I", "/b", "-isystem/c", "-iquote", "/d", "-Wall", "-x", "c"]),
            Path::new("x.cpp"),
        );
        assert_eq!(parsed.include_dirs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(parsed.system_dirs, vec![PathBuf::from("/c")]);
        assert_eq!(parsed.quote_dirs, vec![PathBuf::from("/d")]);
        assert_eq!(parsed.language, Language::C);
        assert_eq!(CompileArgs::parse(&args(&["-ObjC++"]), Path::new("x.c")).language, Language::ObjCpp);
    }

    #[test]
    fn default_flags_are_thirteen() {
        let flags = ParseFlags::default();
        assert!(flags.contains(ParseFlags::DETAILED_PREPROCESSING_RECORD));
        assert!(flags.contains(ParseFlags::PRECOMPILED_PREAMBLE));
        assert!(!flags.contains(ParseFlags::SKIP_FUNCTION_BODIES));
        assert_eq!(ParseFlags::from_bits_truncate(0x41 | 0x100).bits(), 0x41);
    }

    #[test]
    fn unsaved_buffers_override_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.cpp");
        std::fs::write(&path, "int onDisk;\n").expect("write");
        let index = Index::create();
        let unsaved = [UnsavedFile::new(&path, "int inBuffer;\n")];
        let tu = index
            .parse(&path, &[], &unsaved, ParseFlags::default())
            .expect("parse");
        let names: Vec<&str> = tu.cursor().children().iter().map(|c| c.spelling()).collect();
        assert_eq!(names, vec!["inBuffer"]);
        let mut tu = tu;
        tu.reparse(&[]).expect("reparse");
        let names: Vec<&str> = tu.cursor().children().iter().map(|c| c.spelling()).collect();
        assert_eq!(names, vec!["onDisk"]);
    }

    #[test]
    fn missing_includes_are_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.cpp");
        std::fs::write(&path, "#include \"nothere.h\"\nint x;\n").expect("write");
        let tu = Index::create()
            .parse(&path, &[], &[], ParseFlags::default())
            .expect("parse");
        let diag = &tu.diagnostics()[0];
        assert_eq!(diag.severity, Severity::Fatal);
        assert_eq!(diag.spelling, "'nothere.h' file not found");
        assert_eq!((diag.location.line, diag.location.column), (1, 10));
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let result = Index::create().parse(Path::new("/nonexistent/x.cpp"), &[], &[], ParseFlags::default());
        assert!(matches!(result, Err(Error::Io { .. })));
    }
}
