use parking_lot::{Mutex, MutexGuard};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::frontend::{TranslationUnit, UnsavedFile};
use crate::symbols::{SymbolCache, Symbols};

/// A translation unit together with the symbol cache built from it. Both
/// only ever change together, under the entry lock.
pub struct TuState {
    pub tu: TranslationUnit,
    pub symbols: SymbolCache,
}

impl TuState {
    fn new(tu: TranslationUnit) -> Self {
        let symbols = SymbolCache::create(&tu);
        Self { tu, symbols }
    }

    pub fn symbols(&self) -> Symbols<'_> {
        self.symbols.bind(&self.tu)
    }
}

/// One cache slot: a parsed file and the options it was parsed with.
pub struct LockedTranslationUnit {
    filename: PathBuf,
    opts_declared: Vec<String>,
    opts_script: Option<String>,
    state: Mutex<TuState>,
}

impl LockedTranslationUnit {
    pub fn new(
        filename: PathBuf,
        tu: TranslationUnit,
        opts_declared: Vec<String>,
        opts_script: Option<String>,
    ) -> Self {
        Self {
            filename,
            opts_declared,
            opts_script,
            state: Mutex::new(TuState::new(tu)),
        }
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn declared_options(&self) -> &[String] {
        &self.opts_declared
    }

    pub fn options_script(&self) -> Option<&str> {
        self.opts_script.as_deref()
    }

    /// Whether this entry was produced from the given options.
    pub fn matches(&self, opts: &[String], opts_script: Option<&str>) -> bool {
        self.opts_declared == opts && self.opts_script.as_deref() == opts_script
    }

    /// Takes the entry lock. Cursors obtained through the guard cannot
    /// outlive it.
    pub fn lock(&self) -> MutexGuard<'_, TuState> {
        self.state.lock()
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, TuState>> {
        self.state.try_lock()
    }

    /// Reparses with fresh buffers and replaces the symbol cache while the
    /// lock is held.
    pub fn reparse(&self, unsaved: &[UnsavedFile]) -> Result<()> {
        let mut state = self.lock();
        state.tu.reparse(unsaved)?;
        state.symbols = SymbolCache::create(&state.tu);
        Ok(())
    }
}

impl std::fmt::Debug for LockedTranslationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedTranslationUnit")
            .field("filename", &self.filename)
            .field("opts_declared", &self.opts_declared)
            .field("opts_script", &self.opts_script)
            .finish()
    }
}
