use std::path::Path;
use std::process::Command;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::settings::{expand_path, path_options, PathContext};
use crate::workspace::views::View;

/// Options of a view as configured, before path expansion and before the
/// options script ran. Compared on every request to detect changes.
pub fn get_opts(view: &View, clang_includes: Option<&Path>) -> Vec<String> {
    let settings = &view.settings;
    let mut opts = Vec::new();
    if let Some(dir) = clang_includes.filter(|_| !settings.dont_prepend_clang_includes) {
        opts.push(format!("-isystem{}", dir.display()));
    }
    opts.extend(settings.options.iter().cloned());
    if settings.add_language_option {
        opts.extend(view.language.compiler_flags());
        if let Some(extra) = settings
            .additional_language_options
            .get(view.language.settings_key())
        {
            opts.extend(extra.iter().cloned());
        }
    }
    opts
}

pub fn get_opts_script(view: &View) -> Option<String> {
    view.settings
        .options_script
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| expand_path(s, &view.paths))
}

/// Options passed to the front end: every declared option path-expanded,
/// followed by whatever the options script prints. A failing script is
/// logged and contributes nothing.
pub fn effective_options(
    declared: &[String],
    opts_script: Option<&str>,
    filename: &Path,
    paths: &PathContext,
    debug: bool,
) -> Vec<String> {
    let mut opts = path_options(declared, paths);
    if let Some(script) = opts_script {
        match run_options_script(script, filename) {
            Ok(extra) => opts.extend(extra),
            Err(e) => warn!("{}", e),
        }
    }
    if debug {
        info!(
            "Will compile file {} with the following options:\n{:?}",
            filename.display(),
            opts
        );
    }
    opts
}

/// Runs the options script with the file name appended to its argv and
/// splits its output by shell rules.
pub fn run_options_script(script: &str, filename: &Path) -> Result<Vec<String>> {
    let failed = |message: String| Error::OptionsScript {
        script: script.to_string(),
        message,
    };
    let mut argv = shlex::split(script).ok_or_else(|| failed("unbalanced quotes".to_string()))?;
    if argv.is_empty() {
        return Err(failed("empty command".to_string()));
    }
    argv.push(filename.to_string_lossy().to_string());
    let output = Command::new(&argv[0])
        .args(&argv[1..])
        .output()
        .map_err(|e| failed(e.to_string()))?;
    if !output.status.success() {
        return Err(failed(format!(
            "exit status {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    shlex::split(&stdout).ok_or_else(|| failed("unparseable output".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::workspace::language::Language;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn view(language: Language, settings: Settings) -> View {
        View::new(Path::new("/tmp/cxxsense-options/a.cpp"), Some(language), settings, vec![])
    }

    #[test]
    fn declared_options_carry_language_flags() {
        let mut settings = Settings::default();
        settings.options = vec!["-DA".into()];
        settings
            .additional_language_options
            .insert("c++".into(), vec!["-std=c++17".into()]);
        let opts = get_opts(&view(Language::Cpp, settings.clone()), Some(Path::new("/inc")));
        assert_eq!(opts, vec!["-isystem/inc", "-DA", "-x", "c++", "-std=c++17"]);

        settings.dont_prepend_clang_includes = true;
        settings.add_language_option = false;
        assert_eq!(get_opts(&view(Language::ObjC, settings), Some(Path::new("/inc"))), vec!["-DA"]);

        let objc = get_opts(&view(Language::ObjC, Settings::default()), None);
        assert_eq!(objc, vec!["-ObjC"]);
    }

    #[test]
    fn script_output_is_appended() {
        let paths = PathContext::default();
        let file = PathBuf::from("/src/main.cpp");
        let opts = effective_options(&["-DX".into()], Some(r#"printf '%s\n' -DFROM_SCRIPT "'-I/with space'""#), &file, &paths, false);
        assert_eq!(opts, vec!["-DX", "-DFROM_SCRIPT", "-I/with space", "/src/main.cpp"]);
    }

    #[test]
    fn failing_script_is_ignored() {
        let paths = PathContext::default();
        let file = PathBuf::from("/src/main.cpp");
        let opts = effective_options(&["-DX".into()], Some("false"), &file, &paths, false);
        assert_eq!(opts, vec!["-DX"]);
        assert!(matches!(
            run_options_script("definitely-not-a-program-xyz", &file),
            Err(Error::OptionsScript { .. })
        ));
        assert!(run_options_script("echo 'open", &file).is_err());
    }
}
