/// Directories never worth scanning for C-family sources: VCS metadata,
/// build trees and package caches.
pub const DEFAULT_IGNORE_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "build",
    "CMakeFiles",
    "DerivedData",
    "xcuserdata",
    ".cache",
    ".ccls-cache",
    ".clangd",
    "Pods",
];

/// Source files an implementation can live in.
pub const SOURCE_EXTENSIONS: &[&str] = &["cpp", "c", "cc", "m", "mm"];

/// Files treated as headers when probing for sibling sources.
pub const HEADER_EXTENSIONS: &[&str] = &["h", "hh", "hpp", "hxx"];

/// Files larger than this are not read during extensive search.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 4_000_000;

pub fn should_ignore_dir(name: &str) -> bool {
    DEFAULT_IGNORE_DIRS.iter().any(|&d| d == name)
}

fn has_extension(path: &str, table: &[&str]) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| table.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

pub fn is_header(path: &str) -> bool {
    has_extension(path, HEADER_EXTENSIONS)
}

pub fn is_source(path: &str) -> bool {
    has_extension(path, SOURCE_EXTENSIONS)
}

/// Whether a path is any C-family file the engine cares about.
pub fn is_c_family(path: &str) -> bool {
    is_source(path) || is_header(path) || has_extension(path, &["cxx", "inl"])
}

/// True when any component of a relative path is an ignored directory.
pub fn should_skip(rel_path: &str) -> bool {
    rel_path.split('/').any(should_ignore_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_c_family_files() {
        assert!(is_header("include/foo.HPP"));
        assert!(is_source("src/foo.mm"));
        assert!(!is_source("foo.h"));
        assert!(is_c_family("a/b.inl"));
        assert!(!is_c_family("README"));
        assert!(should_skip("build/gen/foo.cpp"));
        assert!(!should_skip("src/builder.cpp"));
    }
}
