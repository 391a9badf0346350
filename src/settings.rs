use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::error::{Error, Result};

static PROJECT_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{project_path:(?P<file>[^}]+)\}").expect("Invalid project_path regex"));
static ENV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{env:(?P<variable>[^}]+)\}").expect("Invalid env regex"));
static FOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{folder:(?P<file>[^}]+)\}").expect("Invalid folder regex"));

/// Engine settings. Every key has a default; a view may override any of
/// them key by key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Compiler flags, each one path-expanded.
    pub options: Vec<String>,
    /// Program whose stdout is appended to the options of every file.
    pub options_script: Option<String>,
    pub add_language_option: bool,
    /// Extra flags per language (`c`, `c++`, `objc`, `objc++`).
    pub additional_language_options: HashMap<String, Vec<String>>,
    pub dont_prepend_clang_includes: bool,
    /// Worker pool size; below 1 means one worker per CPU.
    pub worker_threadcount: i64,
    pub index_parse_options: u32,
    pub debug_options: bool,
    pub cache_on_load: bool,
    pub reparse_on_activated: bool,
    pub reparse_on_save: bool,
    pub reparse_use_dirty_buffer: bool,
    pub remove_on_close: bool,
    /// Debounce of on-modified reparses, in milliseconds.
    pub recompile_delay: u64,
    pub enable_fast_completions: bool,
    pub inhibit_sublime_completions: bool,
    pub dont_complete_startswith: Vec<String>,
    pub diagnostic_ignore_dirs: Vec<String>,
    pub diagnostic_ignore_regex: Option<String>,
    /// Static analyzer invocation; `options` and the file name follow it.
    pub analyzer_commandline: Vec<String>,
    /// Extensions of the files a project analysis covers.
    pub analyzer_extensions: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            options: Vec::new(),
            options_script: None,
            add_language_option: true,
            additional_language_options: HashMap::new(),
            dont_prepend_clang_includes: false,
            worker_threadcount: -1,
            index_parse_options: 13,
            debug_options: false,
            cache_on_load: true,
            reparse_on_activated: true,
            reparse_on_save: true,
            reparse_use_dirty_buffer: false,
            remove_on_close: true,
            recompile_delay: 1000,
            enable_fast_completions: true,
            inhibit_sublime_completions: true,
            dont_complete_startswith: vec!["operator".to_string(), "~".to_string()],
            diagnostic_ignore_dirs: Vec::new(),
            diagnostic_ignore_regex: None,
            analyzer_commandline: ["clang", "--analyze", "-o", "-"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            analyzer_extensions: ["cpp", "c", "cc", "m", "mm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Settings {
    /// Reads settings from a JSON file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Settings(format!("{}: {}", path.display(), e)))
    }

    /// These settings with the keys of a JSON object replacing their
    /// counterparts.
    pub fn with_overrides(&self, overrides: &serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(overrides) = overrides else {
            if overrides.is_null() {
                return Ok(self.clone());
            }
            return Err(Error::Settings("overrides must be a JSON object".to_string()));
        };
        let mut merged = serde_json::to_value(self).map_err(|e| Error::Settings(e.to_string()))?;
        if let serde_json::Value::Object(map) = &mut merged {
            for (key, value) in overrides {
                map.insert(key.clone(), value.clone());
            }
        }
        serde_json::from_value(merged).map_err(|e| Error::Settings(e.to_string()))
    }

    /// Number of worker threads to start.
    pub fn worker_count(&self) -> usize {
        if self.worker_threadcount < 1 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.worker_threadcount as usize
        }
    }
}

/// What `${...}` tokens in settings values expand against.
#[derive(Debug, Clone, Default)]
pub struct PathContext {
    pub folders: Vec<PathBuf>,
    pub this_file: Option<PathBuf>,
}

fn home() -> String {
    dirs::home_dir()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|| "HOME_NOT_SET".to_string())
}

/// Substitutes the workspace tokens of a settings value and normalises
/// backslashes to `/`.
pub fn expand_path(value: &str, ctx: &PathContext) -> String {
    let value = PROJECT_PATH_RE.replace_all(value, |caps: &regex::Captures| {
        let file = &caps["file"];
        ctx.folders
            .iter()
            .map(|f| f.join(file))
            .find(|p| p.exists())
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| file.to_string())
    });
    let value = ENV_RE.replace_all(&value, |caps: &regex::Captures| {
        let name = &caps["variable"];
        std::env::var(name).unwrap_or_else(|_| format!("{}_NOT_SET", name))
    });
    let home = home();
    let value = value.replace("${home}", &home).replace("%(home)s", &home);
    let value = FOLDER_RE.replace_all(&value, |caps: &regex::Captures| {
        Path::new(&caps["file"])
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default()
    });
    let this_dir = ctx
        .this_file
        .as_deref()
        .and_then(Path::parent)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| "FILE_NOT_ON_DISK".to_string());
    value.replace("${this_file_path}", &this_dir).replace('\\', "/")
}

/// Expands one option. `-I<dir>/*` becomes one `-I` per subdirectory of
/// `<dir>`, `-I<dir>/**` one per descendant directory; directories starting
/// with a dot are skipped. Anything else goes through [`expand_path`].
pub fn complete_path(value: &str, ctx: &PathContext) -> Vec<String> {
    let (init, last) = match value.rfind('/') {
        Some(i) => (&value[..i], &value[i + 1..]),
        None => ("", value),
    };
    let Some(start) = init.strip_prefix("-I").filter(|_| last == "*" || last == "**") else {
        return vec![expand_path(value, ctx)];
    };
    let start = PathBuf::from(expand_path(start, ctx));
    if !start.is_dir() {
        tracing::warn!("Include wildcard base {} does not exist", start.display());
        return Vec::new();
    }
    let mut dirs = Vec::new();
    if last == "*" {
        if let Ok(entries) = std::fs::read_dir(&start) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if !name.starts_with('.') && entry.path().is_dir() {
                    dirs.push(entry.path());
                }
            }
        }
        dirs.sort();
    } else {
        let walker = ignore::WalkBuilder::new(&start)
            .hidden(true)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .ignore(false)
            .parents(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();
        for entry in walker.flatten() {
            if entry.depth() > 0 && entry.file_type().is_some_and(|ft| ft.is_dir()) {
                dirs.push(entry.into_path());
            }
        }
    }
    dirs.into_iter()
        .map(|d| format!("-I{}", d.to_string_lossy()))
        .collect()
}

/// Expands every entry of a path-valued setting.
pub fn path_options(values: &[String], ctx: &PathContext) -> Vec<String> {
    values.iter().flat_map(|v| complete_path(v, ctx)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn overrides_replace_keys() {
        let base = Settings::default();
        let view = base
            .with_overrides(&serde_json::json!({
                "options": ["-DVIEW"],
                "enable_fast_completions": false
            }))
            .expect("overrides");
        assert_eq!(view.options, vec!["-DVIEW".to_string()]);
        assert!(!view.enable_fast_completions);
        assert_eq!(view.index_parse_options, 13);
        assert!(base.with_overrides(&serde_json::json!([1])).is_err());
        assert_eq!(base.with_overrides(&serde_json::Value::Null).expect("null"), base);
    }

    #[test]
    fn load_fills_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"worker_threadcount": 2, "recompile_delay": 250}"#).expect("write");
        let settings = Settings::load(&path).expect("load");
        assert_eq!(settings.worker_count(), 2);
        assert_eq!(settings.recompile_delay, 250);
        assert!(settings.cache_on_load);
        fs::write(&path, "{not json").expect("write");
        assert!(matches!(Settings::load(&path), Err(Error::Settings(_))));
    }

    #[test]
    fn expands_tokens() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("include")).expect("mkdir");
        let ctx = PathContext {
            folders: vec![dir.path().to_path_buf()],
            this_file: Some(PathBuf::from("/src/app/main.cpp")),
        };
        let expanded = expand_path("-I${project_path:include}", &ctx);
        assert_eq!(expanded, format!("-I{}", dir.path().join("include").to_string_lossy()));
        assert_eq!(expand_path("-I${this_file_path}/x", &ctx), "-I/src/app/x");
        assert_eq!(expand_path("${folder:/a/b/c.h}", &ctx), "/a/b");
        assert_eq!(
            expand_path("${env:CXXSENSE_SURELY_UNSET_VAR}", &ctx),
            "CXXSENSE_SURELY_UNSET_VAR_NOT_SET"
        );
        assert_eq!(expand_path(r"-IC:\sdk\inc", &ctx), "-IC:/sdk/inc");
        assert_eq!(
            expand_path("-I${this_file_path}", &PathContext::default()),
            "-IFILE_NOT_ON_DISK"
        );
    }

    #[test]
    fn wildcard_includes_expand_to_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        for d in ["a", "a/deep", "b", ".hidden", ".hidden/inner"] {
            fs::create_dir_all(root.join(d)).expect("mkdir");
        }
        fs::write(root.join("file.h"), "").expect("write");
        let ctx = PathContext::default();
        let one = complete_path(&format!("-I{}/*", root.display()), &ctx);
        assert_eq!(
            one,
            vec![
                format!("-I{}", root.join("a").display()),
                format!("-I{}", root.join("b").display()),
            ]
        );
        let all = complete_path(&format!("-I{}/**", root.display()), &ctx);
        assert_eq!(
            all,
            vec![
                format!("-I{}", root.join("a").display()),
                format!("-I{}", root.join("a/deep").display()),
                format!("-I{}", root.join("b").display()),
            ]
        );
        assert_eq!(complete_path("-Wall", &ctx), vec!["-Wall".to_string()]);
        assert!(complete_path("-I/definitely/missing/*", &ctx).is_empty());
    }
}
