//! Diagnostic reporting. After a parse or reparse the diagnostics of a
//! translation unit are grouped per file and line into errors and warnings,
//! the way an editor shows gutter marks.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::frontend::{Diagnostic, Severity};
use crate::settings::{expand_path, PathContext, Settings};

/// Messages per line (1-based) of one file.
pub type LineMessages = BTreeMap<u32, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileDiagnostics {
    pub errors: LineMessages,
    pub warnings: LineMessages,
}

impl FileDiagnostics {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    /// What the status line shows for `line`: its errors, else its warnings.
    pub fn status_for_line(&self, line: u32) -> Option<String> {
        self.errors
            .get(&line)
            .or_else(|| self.warnings.get(&line))
            .map(|messages| messages.join("; "))
    }
}

/// Diagnostics of one translation unit, keyed by file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub files: BTreeMap<PathBuf, FileDiagnostics>,
}

impl Report {
    pub fn for_file(&self, file: &Path) -> Option<&FileDiagnostics> {
        self.files.get(file)
    }

    pub fn error_count(&self) -> usize {
        self.files
            .values()
            .flat_map(|f| f.errors.values())
            .map(Vec::len)
            .sum()
    }

    pub fn warning_count(&self) -> usize {
        self.files
            .values()
            .flat_map(|f| f.warnings.values())
            .map(Vec::len)
            .sum()
    }

    /// One `path:line: severity: message` line per message, errors first.
    pub fn lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (file, diags) in &self.files {
            for (kind, marks) in [("error", &diags.errors), ("warning", &diags.warnings)] {
                for (line, messages) in marks {
                    for message in messages {
                        out.push(format!("{}:{}: {}: {}", file.display(), line, kind, message));
                    }
                }
            }
        }
        out
    }
}

/// Which diagnostics are left out of a report.
#[derive(Debug, Default)]
pub struct DiagnosticFilter {
    dirs: Vec<PathBuf>,
    regex: Option<Regex>,
}

impl DiagnosticFilter {
    /// Builds the filter from `diagnostic_ignore_dirs` (path-expanded) and
    /// `diagnostic_ignore_regex`. An invalid regex is logged and ignored.
    pub fn from_settings(settings: &Settings, ctx: &PathContext) -> Self {
        let dirs = settings
            .diagnostic_ignore_dirs
            .iter()
            .map(|d| PathBuf::from(expand_path(d, ctx)))
            .collect();
        let regex = settings
            .diagnostic_ignore_regex
            .as_deref()
            .filter(|r| !r.is_empty())
            .and_then(|r| match Regex::new(r) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Ignoring invalid diagnostic_ignore_regex {:?}: {}", r, e);
                    None
                }
            });
        Self { dirs, regex }
    }

    pub fn ignores(&self, diagnostic: &Diagnostic) -> bool {
        if diagnostic.severity == Severity::Ignored {
            return true;
        }
        if self.dirs.iter().any(|d| diagnostic.location.file.starts_with(d)) {
            return true;
        }
        self.regex
            .as_ref()
            .is_some_and(|re| re.is_match(&diagnostic.spelling))
    }
}

/// Groups `diagnostics` into a report. Errors and fatal errors are errors;
/// warnings and notes are warnings.
pub fn group(diagnostics: &[Diagnostic], filter: &DiagnosticFilter) -> Report {
    let mut report = Report::default();
    for diagnostic in diagnostics.iter().filter(|d| !filter.ignores(d)) {
        let entry = report
            .files
            .entry(diagnostic.location.file.clone())
            .or_default();
        let marks = match diagnostic.severity {
            Severity::Error | Severity::Fatal => &mut entry.errors,
            _ => &mut entry.warnings,
        };
        marks
            .entry(diagnostic.location.line)
            .or_default()
            .push(diagnostic.spelling.clone());
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::SourceLocation;
    use pretty_assertions::assert_eq;

    fn diag(severity: Severity, file: &str, line: u32, message: &str) -> Diagnostic {
        Diagnostic {
            severity,
            location: SourceLocation {
                file: PathBuf::from(file),
                line,
                column: 1,
            },
            spelling: message.to_string(),
        }
    }

    #[test]
    fn groups_by_file_and_line() {
        let diagnostics = vec![
            diag(Severity::Error, "/w/a.cpp", 3, "syntax error"),
            diag(Severity::Error, "/w/a.cpp", 3, "expected ';'"),
            diag(Severity::Warning, "/w/a.cpp", 7, "unused"),
            diag(Severity::Fatal, "/w/b.h", 1, "'x.h' file not found"),
            diag(Severity::Note, "/w/b.h", 2, "declared here"),
        ];
        let report = group(&diagnostics, &DiagnosticFilter::default());

        let a = report.for_file(Path::new("/w/a.cpp")).expect("a.cpp");
        assert_eq!(
            a.errors.get(&3),
            Some(&vec!["syntax error".to_string(), "expected ';'".to_string()])
        );
        assert_eq!(a.status_for_line(3).as_deref(), Some("syntax error; expected ';'"));
        assert_eq!(a.status_for_line(7).as_deref(), Some("unused"));
        assert_eq!(a.status_for_line(1), None);

        let b = report.for_file(Path::new("/w/b.h")).expect("b.h");
        assert_eq!(b.errors.len(), 1);
        assert_eq!(b.warnings.len(), 1);
        assert_eq!(report.error_count(), 3);
        assert_eq!(report.warning_count(), 2);
    }

    #[test]
    fn ignored_dirs_and_messages_are_dropped() {
        let settings = Settings {
            diagnostic_ignore_dirs: vec!["/usr/include".to_string()],
            diagnostic_ignore_regex: Some("^pragma once".to_string()),
            ..Settings::default()
        };
        let filter = DiagnosticFilter::from_settings(&settings, &PathContext::default());
        let diagnostics = vec![
            diag(Severity::Error, "/usr/include/stdio.h", 10, "syntax error"),
            diag(Severity::Warning, "/w/a.h", 1, "pragma once in main file"),
            diag(Severity::Ignored, "/w/a.h", 2, "nothing"),
            diag(Severity::Error, "/w/a.h", 4, "syntax error"),
        ];
        let report = group(&diagnostics, &filter);
        assert_eq!(report.lines(), vec!["/w/a.h:4: error: syntax error".to_string()]);
    }

    #[test]
    fn invalid_regex_filters_nothing() {
        let settings = Settings {
            diagnostic_ignore_regex: Some("(".to_string()),
            ..Settings::default()
        };
        let filter = DiagnosticFilter::from_settings(&settings, &PathContext::default());
        assert!(!filter.ignores(&diag(Severity::Error, "/w/a.c", 1, "(")));
    }
}
