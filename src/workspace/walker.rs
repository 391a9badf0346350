use ignore::WalkBuilder;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config;

/// Lists the files under `folders` whose path matches `file_regex`,
/// honouring .gitignore rules plus the built-in ignore directories.
/// Oversized files are left out.
pub fn matching_files(folders: &[PathBuf], file_regex: &Regex, max_file_size: u64) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for root in folders {
        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if entry.file_type().map_or(true, |ft| ft.is_dir()) {
                continue;
            }
            let path = entry.path();
            let rel_path = match path.strip_prefix(root) {
                Ok(r) => r.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            if config::should_skip(&rel_path) {
                continue;
            }
            if !file_regex.is_match(&path.to_string_lossy()) {
                continue;
            }
            if entry.metadata().map_or(true, |m| m.len() > max_file_size) {
                continue;
            }
            files.push(path.to_path_buf());
        }
    }
    debug!("{} files match {}", files.len(), file_regex.as_str());
    files
}

/// Workspace folder a path lives in, if any.
pub fn containing_folder<'a>(folders: &'a [PathBuf], path: &Path) -> Option<&'a Path> {
    folders
        .iter()
        .filter(|f| path.starts_with(f))
        .max_by_key(|f| f.components().count())
        .map(|f| f.as_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn lists_matching_files_outside_ignored_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs::create_dir_all(root.join("src")).expect("mkdir");
        fs::create_dir_all(root.join("build")).expect("mkdir");
        fs::write(root.join("src/a.cpp"), "").expect("write");
        fs::write(root.join("src/a.h"), "").expect("write");
        fs::write(root.join("build/gen.cpp"), "").expect("write");

        let regex = Regex::new(r"\.(cpp|c|cc|m|mm)$").expect("regex");
        let files = matching_files(&[root.to_path_buf()], &regex, config::DEFAULT_MAX_FILE_SIZE);
        assert_eq!(files, vec![root.join("src/a.cpp")]);
        assert_eq!(
            containing_folder(&[root.to_path_buf()], &root.join("src/a.cpp")),
            Some(root)
        );
    }
}
