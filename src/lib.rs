//! C, C++ and Objective-C code intelligence for editors: a cache of parsed
//! translation units kept current in the background, fast member
//! completion, definition and implementation lookup, diagnostics and
//! static analysis.

pub mod analyzer;
pub mod cache;
pub mod complete;
pub mod config;
pub mod diagnostics;
pub mod editor;
pub mod error;
pub mod frontend;
pub mod goto;
pub mod parsehelp;
pub mod search;
pub mod server;
pub mod settings;
pub mod symbols;
pub mod workspace;

pub use error::{Error, Result};
