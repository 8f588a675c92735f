//! The Mica front-end compiler
//!
//! Compiles Mica source, a dynamically-typed, class-based object
//! language, into stack bytecode and streams the program over the
//! session protocol defined in `mica-core`, ready for a VM to
//! reconstruct and run.
//!
//! The pipeline: the library loader walks the import graph, the
//! scanner/parser build a typed AST through a pushdown builder, scope
//! resolution wires identifiers to declarations and classifies captured
//! variables, the constant interpreter folds `const` expressions into a
//! deduplicated pool, and a worklist-driven compiler emits bytecode for
//! every reachable method before the session writer streams the whole
//! program atomically.
//!
//! ```rust,ignore
//! use micac::{CompileOptions, compile_uri};
//!
//! let bytes = compile_uri(
//!     std::path::Path::new("app/main.mica"),
//!     CompileOptions::new().with_library_root("lib"),
//!     Vec::new(),
//! )?;
//! ```

pub mod ast;
pub mod builder;
pub mod compiler;
pub mod config;
pub mod consts;
pub mod emitter;
pub mod error;
pub mod loader;
pub mod map;
pub mod natives;
pub mod parser;
pub mod resolver;
pub mod scanner;
pub mod scope;
pub mod scope_resolver;
pub mod session;
pub mod source;
pub mod tokens;
pub mod trie;
pub mod zone;

pub use compiler::{Compiler, CompilerConsumer};
pub use config::CompileOptions;
pub use error::{CompileError, ErrorKind};
pub use session::{Session, SessionConsumer};
pub use zone::Zone;

use builder::Builder;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// A fatal compile error together with its rendered diagnostic
/// (`path:line: message` plus a caret excerpt).
#[derive(Debug)]
pub struct Diagnostic {
    pub error: CompileError,
    pub rendered: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.rendered)
    }
}

impl std::error::Error for Diagnostic {}

/// Compile the program rooted at `uri` and stream the session to
/// `sink`. On success the sink is handed back; on failure a
/// `CompilerError` frame is sent before the diagnostic is returned.
pub fn compile_uri<W: Write>(
    uri: &Path,
    options: CompileOptions,
    sink: W,
) -> std::result::Result<W, Diagnostic> {
    let emit_names = options.emit_names;
    let zone = Zone::new();
    let builder = Builder::new(&zone);
    let mut compiler = Compiler::new(builder, options);
    let mut consumer = SessionConsumer::new(Session::new(sink, emit_names));

    let result = consumer.begin().and_then(|()| {
        let root = compiler.load_library(&uri.to_string_lossy(), uri)?;
        compiler.compile_library(root, &mut consumer)
    });
    debug!(
        zone_bytes = zone.allocated(),
        ok = result.is_ok(),
        "compile finished"
    );

    match result {
        Ok(()) => {
            let mut session = consumer.into_session();
            if let Err(error) = session.flush() {
                let rendered = compiler.builder.render_diagnostic(&error);
                return Err(Diagnostic { error, rendered });
            }
            Ok(session.into_sink())
        }
        Err(error) => {
            let _ = consumer.session_mut().compiler_error();
            let rendered = compiler.builder.render_diagnostic(&error);
            Err(Diagnostic { error, rendered })
        }
    }
}
