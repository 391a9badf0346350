//! Static analysis. The analyzer command (by default `clang --analyze -o -`)
//! runs over one file and prints a plist report; each diagnostic in it
//! becomes a `file:line:col - description` finding.

use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;
use tracing::debug;

use crate::config;
use crate::error::{Error, Result};
use crate::settings::{path_options, PathContext, Settings};
use crate::workspace::walker;

static PLIST_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?P<close>/?)(?P<name>[A-Za-z]+)\s*(?P<empty>/?)>").expect("Invalid plist tag regex")
});

/// Called on the editor thread with what an analysis found.
pub type AnalyzeDone = Box<dyn FnOnce(Vec<Finding>) + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
    pub description: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{} - {}",
            self.file.display(),
            self.line,
            self.column,
            self.description
        )
    }
}

/// One file to analyze and the full argv to do it with.
#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    pub filename: PathBuf,
    pub command: Vec<String>,
}

impl AnalyzeRequest {
    /// The analyzer command line, the path-expanded `options`, then the file.
    pub fn new(settings: &Settings, paths: &PathContext, filename: &Path) -> Self {
        let mut command = settings.analyzer_commandline.clone();
        command.extend(path_options(&settings.options, paths));
        command.push(filename.to_string_lossy().to_string());
        Self {
            filename: filename.to_path_buf(),
            command,
        }
    }
}

fn unescape(text: &str) -> String {
    text.replace("&apos;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

enum Frame {
    Dict(Map<String, Value>),
    Array(Vec<Value>),
}

/// Reads the dict/array/key/string/integer subset of a plist. `None` when
/// no top-level container closes.
pub fn parse_plist(text: &str) -> Option<Value> {
    let mut stack: Vec<(Frame, Option<String>)> = Vec::new();
    let mut key: Option<String> = None;
    let mut result = None;
    let mut last_end = 0;

    for caps in PLIST_TAG_RE.captures_iter(text) {
        let tag = caps.get(0)?;
        let contents = &text[last_end..tag.start()];
        last_end = tag.end();
        let closing = !caps["close"].is_empty();
        let name = &caps["name"];

        let value = match (closing, name) {
            (false, "dict") => {
                stack.push((Frame::Dict(Map::new()), key.take()));
                continue;
            }
            (false, "array") => {
                stack.push((Frame::Array(Vec::new()), key.take()));
                continue;
            }
            (true, "key") => {
                key = Some(unescape(contents));
                continue;
            }
            (true, "string") => Value::String(unescape(contents)),
            (true, "integer") => match contents.trim().parse::<i64>() {
                Ok(n) => Value::from(n),
                Err(_) => Value::Null,
            },
            (true, "real") => contents
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map_or(Value::Null, Value::Number),
            (false, "true") if !caps["empty"].is_empty() => Value::Bool(true),
            (false, "false") if !caps["empty"].is_empty() => Value::Bool(false),
            (true, "dict") | (true, "array") => {
                let (frame, outer_key) = stack.pop()?;
                key = outer_key;
                match frame {
                    Frame::Dict(map) => Value::Object(map),
                    Frame::Array(items) => Value::Array(items),
                }
            }
            _ => continue,
        };

        match stack.last_mut() {
            Some((Frame::Dict(map), _)) => {
                if let Some(k) = key.take() {
                    map.insert(k, value);
                }
            }
            Some((Frame::Array(items), _)) => items.push(value),
            None => result = Some(value),
        }
    }
    result
}

/// The diagnostics of an analyzer report, with file indices resolved.
pub fn findings(report: &Value) -> Vec<Finding> {
    let files = report["files"].as_array().map(Vec::as_slice).unwrap_or_default();
    report["diagnostics"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter_map(|diag| {
            let location = &diag["location"];
            let file = files.get(location["file"].as_u64()? as usize)?.as_str()?;
            Some(Finding {
                file: PathBuf::from(file),
                line: location["line"].as_u64()? as u32,
                column: location["col"].as_u64()? as u32,
                description: diag["description"].as_str()?.to_string(),
            })
        })
        .collect()
}

/// Runs one analysis. Output without a report yields no findings unless
/// the analyzer also failed.
pub fn run(request: &AnalyzeRequest) -> Result<Vec<Finding>> {
    let failed = |message: String| Error::Analyzer {
        path: request.filename.clone(),
        message,
    };
    let (program, args) = request
        .command
        .split_first()
        .ok_or_else(|| failed("empty analyzer command line".to_string()))?;
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| failed(e.to_string()))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    match parse_plist(&stdout) {
        Some(report) => Ok(findings(&report)),
        None if output.status.success() => Ok(Vec::new()),
        None => Err(failed(format!(
            "exit status {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
    }
}

/// Files under `folders` with one of `extensions`.
pub fn project_files(folders: &[PathBuf], extensions: &[String]) -> Vec<PathBuf> {
    if extensions.is_empty() {
        return Vec::new();
    }
    let alternatives: Vec<String> = extensions.iter().map(|e| regex::escape(e)).collect();
    let Ok(pattern) = Regex::new(&format!(r"\.({})$", alternatives.join("|"))) else {
        return Vec::new();
    };
    walker::matching_files(folders, &pattern, config::DEFAULT_MAX_FILE_SIZE)
}

/// Gathers the findings of a project analysis as its files report in.
pub struct ProjectTally {
    remaining: AtomicUsize,
    findings: Mutex<Vec<Finding>>,
    on_done: Mutex<Option<AnalyzeDone>>,
}

impl ProjectTally {
    pub fn new(files: usize, on_done: Option<AnalyzeDone>) -> Self {
        Self {
            remaining: AtomicUsize::new(files),
            findings: Mutex::new(Vec::new()),
            on_done: Mutex::new(on_done),
        }
    }

    /// Adds one file's findings. The last file gets everything gathered
    /// and the callback back.
    pub fn record(&self, findings: Vec<Finding>) -> Option<(Vec<Finding>, Option<AnalyzeDone>)> {
        self.findings.lock().extend(findings);
        if self.remaining.fetch_sub(1, Ordering::SeqCst) != 1 {
            return None;
        }
        let all = std::mem::take(&mut *self.findings.lock());
        debug!("Project analysis gathered {} findings", all.len());
        Some((all, self.on_done.lock().take()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    const REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
 <key>clang_version</key>
<string>clang version 15.0.0</string>
 <key>diagnostics</key>
 <array>
  <dict>
   <key>path</key>
   <array>
   </array>
   <key>description</key><string>Value stored to &apos;x&apos; is never read</string>
   <key>category</key><string>Dead store</string>
   <key>location</key>
   <dict>
    <key>line</key><integer>4</integer>
    <key>col</key><integer>5</integer>
    <key>file</key><integer>0</integer>
   </dict>
  </dict>
  <dict>
   <key>description</key><string>Called function pointer is null</string>
   <key>location</key>
   <dict>
    <key>line</key><integer>9</integer>
    <key>col</key><integer>3</integer>
    <key>file</key><integer>1</integer>
   </dict>
  </dict>
 </array>
 <key>files</key>
 <array>
  <string>/src/main.c</string>
  <string>/src/util.h</string>
 </array>
</dict>
</plist>
"#;

    #[test]
    fn report_diagnostics_become_findings() {
        let report = parse_plist(REPORT).expect("report");
        assert_eq!(report["clang_version"], "clang version 15.0.0");
        let found = findings(&report);
        let lines: Vec<String> = found.iter().map(|f| f.to_string()).collect();
        assert_eq!(
            lines,
            vec![
                "/src/main.c:4:5 - Value stored to 'x' is never read".to_string(),
                "/src/util.h:9:3 - Called function pointer is null".to_string(),
            ]
        );
    }

    #[test]
    fn text_without_a_report_has_nothing() {
        assert_eq!(parse_plist(""), None);
        assert_eq!(parse_plist("<dict><key>a</key>"), None);
        let empty = parse_plist("<plist><dict></dict></plist>").expect("dict");
        assert!(findings(&empty).is_empty());
    }

    #[test]
    fn request_puts_options_before_the_file() {
        let settings = Settings {
            options: vec!["-DA".to_string()],
            ..Settings::default()
        };
        let request = AnalyzeRequest::new(&settings, &PathContext::default(), Path::new("/src/a.c"));
        assert_eq!(
            request.command,
            vec!["clang", "--analyze", "-o", "-", "-DA", "/src/a.c"]
        );
    }

    #[test]
    fn run_reads_the_report_the_command_prints() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = dir.path().join("report.plist");
        fs::write(&report, REPORT).expect("write report");
        let request = AnalyzeRequest {
            filename: report.clone(),
            command: vec!["cat".to_string(), report.to_string_lossy().to_string()],
        };
        assert_eq!(run(&request).expect("analyzed").len(), 2);

        let missing = AnalyzeRequest {
            filename: report,
            command: vec!["definitely-not-an-analyzer-xyz".to_string()],
        };
        assert!(matches!(run(&missing), Err(Error::Analyzer { .. })));
    }

    #[test]
    fn project_files_follow_the_extensions() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.c"), "").expect("write");
        fs::write(dir.path().join("b.mm"), "").expect("write");
        fs::write(dir.path().join("c.h"), "").expect("write");
        let folders = vec![dir.path().to_path_buf()];
        let mut files = project_files(&folders, &["c".to_string(), "mm".to_string()]);
        files.sort();
        assert_eq!(files, vec![dir.path().join("a.c"), dir.path().join("b.mm")]);
        assert!(project_files(&folders, &[]).is_empty());
    }

    #[test]
    fn tally_reports_once_after_the_last_file() {
        let tally = ProjectTally::new(2, None);
        let finding = Finding {
            file: PathBuf::from("/a.c"),
            line: 1,
            column: 1,
            description: "x".to_string(),
        };
        assert!(tally.record(vec![finding.clone()]).is_none());
        let (all, _) = tally.record(Vec::new()).expect("last file");
        assert_eq!(all, vec![finding]);
    }
}
