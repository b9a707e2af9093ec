//! Structured error types for the supervisor's library boundary.
//!
//! Most call sites propagate with `anyhow::Result` and `fn_error_context`,
//! following the same split the rest of this crate uses: a small number of
//! matched-on variants here for conditions callers must branch on, and
//! `anyhow` everywhere else for context-carrying propagation.

use thiserror::Error;

/// Errors raised while loading the daemon's startup configuration. Always
/// fatal: a supervisor that cannot establish its own configuration has
/// nothing useful to do.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The on-disk configuration file could not be parsed.
    #[error("failed to parse configuration at {path}: {source}")]
    ConfigParse {
        /// Path to the offending file.
        path: String,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
}

/// Errors that can occur while resolving or mutating a package record in
/// the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Attempted to add a package whose name is already present.
    #[error("package already exists: {0}")]
    DuplicateName(String),

    /// Attempted to look up or remove a package that isn't present.
    #[error("package not found: {0}")]
    NotFound(String),

    /// A package name was empty or otherwise not a usable identifier.
    #[error("invalid package name: {0:?}")]
    InvalidName(String),
}
