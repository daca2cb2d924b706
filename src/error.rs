// This module defines error types for the tejit execution engine using the thiserror
// crate for idiomatic Rust error handling. JitError covers the four failure classes
// the engine recognizes: host introspection failures at construction, module
// verification and toolchain failures at module submission, unresolved symbols at
// lookup, and stale module handles at removal. Each variant carries the surfaced
// toolchain message together with the context in which it was produced. Every error
// is terminal by contract: the engine never retries, degrades or partially succeeds,
// and embedding applications are expected to treat an Err as fatal unless they
// deliberately catch and convert it at the process boundary.

//! Error types for the execution engine.
//!
//! Using thiserror for more idiomatic error handling. All of these errors are
//! unrecoverable by contract: generated-code correctness cannot be partially
//! trusted, so callers abort rather than continue past a failed compilation
//! or resolution.

use thiserror::Error;

use crate::engine::ModuleHandle;

/// Main error type for JIT engine operations.
#[derive(Error, Debug)]
pub enum JitError {
    #[error("Host target detection failed: {reason}")]
    HostDetection { reason: String },

    #[error("No native code generator is available for target {triple}")]
    TargetMachine { triple: String },

    #[error("Failed to create the execution engine: {reason}")]
    EngineCreation { reason: String },

    #[error("Module `{module}` failed verification: {reason}")]
    InvalidModule { module: String, reason: String },

    #[error("{context}: {message}")]
    Toolchain {
        context: &'static str,
        message: String,
    },

    #[error("Symbol `{name}` could not be resolved: {message}")]
    UnresolvedSymbol { name: String, message: String },

    #[error("Invalid module handle {handle:?}")]
    InvalidHandle { handle: ModuleHandle },
}

/// Result type alias for engine operations.
pub type JitResult<T> = Result<T, JitError>;
