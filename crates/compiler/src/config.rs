//! Compile options
//!
//! An explicit options struct threaded through the compiler instead of
//! process-wide flags. Everything here has a conservative default so
//! embedders can call `CompileOptions::new()` and go.

use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Root directory of the system libraries (`core/core.mica`,
    /// `system/system.mica`, …). When unset, no implicit libraries are
    /// loaded and builtin classes are synthesized on demand.
    pub library_root: Option<PathBuf>,

    /// Root directory for `package:` URIs.
    pub package_root: Option<PathBuf>,

    /// Interleave `PushNewName` frames in the session stream so a bridge
    /// session can show symbolic names.
    pub emit_names: bool,
}

impl CompileOptions {
    pub fn new() -> CompileOptions {
        CompileOptions::default()
    }

    pub fn with_library_root(mut self, root: impl Into<PathBuf>) -> CompileOptions {
        self.library_root = Some(root.into());
        self
    }

    pub fn with_package_root(mut self, root: impl Into<PathBuf>) -> CompileOptions {
        self.package_root = Some(root.into());
        self
    }

    pub fn with_emit_names(mut self, emit_names: bool) -> CompileOptions {
        self.emit_names = emit_names;
        self
    }
}
