//! All errors that can be _generated_ by the compiler.
//!
//! Runtime failures are deliberately not here: the generated program reports
//! those as [RunResult](crate::program::RunResult) codes, never as Rust
//! errors.

use std::io;

use thiserror::Error;

/// Any error that occurs as a result of compiling the source code.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A `]` was read while no `[` was open.
    #[error("too many ']' brackets. Check that each '[' has a matching ']'")]
    UnbalancedClose,

    /// The program ended with at least one `[` still open.
    #[error("too many '[' brackets. Check that each '[' has a matching ']'")]
    UnbalancedOpen,

    /// The byte source failed mid-stream.
    #[error("failed to read program source: {0}")]
    Source(#[from] io::Error),

    /// The code generator could not be configured for this host.
    #[error("cannot generate native code for this host: {0}")]
    Init(String),

    /// Cranelift rejected the function we built for the program.
    #[error("code generation failed: {0}")]
    Codegen(String),
}
