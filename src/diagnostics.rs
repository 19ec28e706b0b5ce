//! Unified diagnostic system for the Understudy engine.
//!
//! All failure modes produced by any stage of the pipeline (index build,
//! name resolution, module evaluation, configuration loading) are
//! represented by [`EngineError`]. Each variant carries a stable error code
//! (`understudy::<area>::<kind>`) surfaced through `miette`'s `Diagnostic`
//! trait so the CLI can render rich reports and tests can match on codes
//! instead of message text.
//!
//! Propagation policy:
//! - Index-build errors (`DuplicateModuleName`, `Config`) abort the whole
//!   run; nothing is resolvable without the index.
//! - `ModuleNotFound` and `Evaluation` abort only the requiring module's
//!   file run and are captured in its result record.
//! - Mock-synthesis introspection failures are never surfaced at all; the
//!   synthesizer downgrades them to inert placeholder members.

use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Unified error type for all Understudy engine failure modes.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Two distinct files claimed the same logical module name. Fatal at
    /// index build: silent shadowing would make mocking non-deterministic.
    #[error("duplicate module name '{name}': registered by both {} and {}", first.display(), second.display())]
    DuplicateModuleName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// No resolution strategy produced a candidate for a requested name.
    /// Fatal to the requiring module, recoverable at the file level.
    #[error("{}", render_not_found(requested, rewritten.as_deref(), from, attempted))]
    ModuleNotFound {
        requested: String,
        rewritten: Option<String>,
        from: PathBuf,
        attempted: Vec<String>,
    },

    /// An error raised while evaluating a module's source. Propagated
    /// verbatim to the orchestrator and recorded as the file's execution
    /// error; the registry never masks or rewrites it.
    #[error("evaluation error in '{module}': {message}")]
    Evaluation { module: String, message: String },

    /// A configured setup script failed to load; the file run fails
    /// immediately with this error.
    #[error("setup script error: {message}")]
    Setup { message: String },

    /// Invalid or unreadable configuration (bad mapping pattern, malformed
    /// config file, unusable root directory).
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Invariant violation inside the engine itself.
    #[error("internal error: {message}")]
    Internal { message: String },
}

fn render_not_found(
    requested: &str,
    rewritten: Option<&str>,
    from: &std::path::Path,
    attempted: &[String],
) -> String {
    let mut msg = format!("cannot resolve module '{requested}'");
    if let Some(rewritten) = rewritten {
        msg.push_str(&format!(" (rewritten to '{rewritten}')"));
    }
    msg.push_str(&format!(" from {}", from.display()));
    if !attempted.is_empty() {
        msg.push_str(&format!("; attempted: {}", attempted.join(", ")));
    }
    msg
}

impl EngineError {
    pub fn evaluation(module: impl fmt::Display, message: impl fmt::Display) -> Self {
        EngineError::Evaluation {
            module: module.to_string(),
            message: message.to_string(),
        }
    }

    pub fn setup(message: impl fmt::Display) -> Self {
        EngineError::Setup {
            message: message.to_string(),
        }
    }

    pub fn config(message: impl fmt::Display) -> Self {
        EngineError::Config {
            message: message.to_string(),
        }
    }

    pub fn internal(message: impl fmt::Display) -> Self {
        EngineError::Internal {
            message: message.to_string(),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::DuplicateModuleName { .. } => "understudy::index::duplicate_name",
            EngineError::ModuleNotFound { .. } => "understudy::resolve::not_found",
            EngineError::Evaluation { .. } => "understudy::registry::evaluation",
            EngineError::Setup { .. } => "understudy::orchestrator::setup",
            EngineError::Config { .. } => "understudy::config::invalid",
            EngineError::Internal { .. } => "understudy::internal",
        }
    }

    /// True for errors that abort the whole run rather than one file.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            EngineError::DuplicateModuleName { .. } | EngineError::Config { .. }
        )
    }
}

impl Diagnostic for EngineError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.error_code()))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        match self {
            EngineError::DuplicateModuleName { .. } => Some(Box::new(
                "rename one of the files or add its directory to the ignore patterns",
            )),
            EngineError::ModuleNotFound { .. } => Some(Box::new(
                "check the spelling of the requested name and the configured name mappings",
            )),
            _ => None,
        }
    }
}
