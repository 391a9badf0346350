//! In-process C-family front end. Files are parsed with tree-sitter, lowered
//! into an entity arena and queried through borrowed cursors.

pub mod ast;
pub mod complete;
pub mod completion_string;
pub mod cursor;
mod lower;
pub mod queries;
pub mod resolve;
pub mod translation_unit;

pub use ast::{AccessSpecifier, CursorKind, SourceLocation};
pub use complete::CodeCompletion;
pub use completion_string::CompletionString;
pub use cursor::{format_cursor, Cursor};
pub use resolve::Filter;
pub use translation_unit::{Diagnostic, Index, ParseFlags, Severity, TranslationUnit, UnsavedFile};
