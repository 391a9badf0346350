use serde::{Deserialize, Serialize};
use std::path::Path;

/// Source language of a view or translation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
    #[serde(rename = "objc")]
    ObjC,
    #[serde(rename = "objcpp")]
    ObjCpp,
}

impl Language {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "c" => Some(Language::C),
            "cpp" | "cc" | "cxx" | "c++" | "h" | "hh" | "hpp" | "hxx" | "inl" => Some(Language::Cpp),
            "m" => Some(Language::ObjC),
            "mm" => Some(Language::ObjCpp),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Maps an editor syntax name ("C++", "Objective-C", ...) onto a language.
    pub fn from_syntax(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "c" => Some(Language::C),
            "c++" | "cpp" | "c++11" | "c++14" | "c++17" => Some(Language::Cpp),
            "objective-c" | "objc" => Some(Language::ObjC),
            "objective-c++" | "objc++" | "objcpp" => Some(Language::ObjCpp),
            _ => None,
        }
    }

    /// Value of the `-x` compiler flag for this language.
    pub fn as_flag(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "c++",
            Language::ObjC => "objective-c",
            Language::ObjCpp => "objective-c++",
        }
    }

    /// Inverse of [`Language::as_flag`]; also used for `additional_language_options` keys.
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "c" | "c-header" => Some(Language::C),
            "c++" | "c++-header" => Some(Language::Cpp),
            "objective-c" | "objective-c-header" | "objc" => Some(Language::ObjC),
            "objective-c++" | "objective-c++-header" | "objc++" => Some(Language::ObjCpp),
            _ => None,
        }
    }

    /// Key of this language in `additional_language_options`.
    pub fn settings_key(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "c++",
            Language::ObjC => "objc",
            Language::ObjCpp => "objc++",
        }
    }

    /// Flags that select this language on the command line.
    pub fn compiler_flags(&self) -> Vec<String> {
        match self {
            Language::ObjC => vec!["-ObjC".to_string()],
            Language::ObjCpp => vec!["-ObjC++".to_string()],
            lang => vec!["-x".to_string(), lang.as_flag().to_string()],
        }
    }

    pub fn is_objc(&self) -> bool {
        matches!(self, Language::ObjC | Language::ObjCpp)
    }

    /// Grammar used to lower sources of this language. There is no
    /// Objective-C grammar, so those files are read as C or C++.
    pub fn grammar(&self) -> tree_sitter::Language {
        match self {
            Language::C | Language::ObjC => tree_sitter_c::LANGUAGE.into(),
            Language::Cpp | Language::ObjCpp => tree_sitter_cpp::LANGUAGE.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_languages() {
        assert_eq!(Language::from_path(Path::new("a/b.mm")), Some(Language::ObjCpp));
        assert_eq!(Language::from_path(Path::new("x.HPP")), Some(Language::Cpp));
        assert_eq!(Language::from_path(Path::new("x.rs")), None);
        assert_eq!(Language::from_syntax("Objective-C"), Some(Language::ObjC));
        assert_eq!(Language::from_flag(Language::C.as_flag()), Some(Language::C));
        assert_eq!(Language::Cpp.compiler_flags(), vec!["-x", "c++"]);
        assert_eq!(Language::ObjCpp.compiler_flags(), vec!["-ObjC++"]);
    }
}
