//! Compiler-wide error type (spec.md §7 "Error handling design").
//!
//! Three kinds — `Invocation`, `Code`, `Internal` — map to the exit codes of
//! spec.md §6 (1/2/3). Built with `thiserror`, following the error-enum
//! style the pack's other compiler-shaped crates (`gdlk_api`, `seq-compiler`)
//! use in place of bare `String`s or `panic!`.

use crate::tac::SourceRef;
use std::fmt;

/// A source location known to the compiler when an error fires — absent for
/// invocation errors (no file context yet) and some internal errors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Location {
  pub file: Option<&'static str>,
  pub line: u32,
  pub col: u32,
}

impl Location {
  #[must_use]
  pub fn new(line: u32, col: u32) -> Self { Self { file: None, line, col } }

  #[must_use]
  pub fn from_source(r: SourceRef) -> Self { Self { file: None, line: r.line, col: r.col } }
}

impl fmt::Display for Location {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.file {
      Some(file) => write!(f, "{file}:{}:{}", self.line, self.col),
      None => write!(f, "{}:{}", self.line, self.col),
    }
  }
}

/// The three error kinds of spec.md §7, each exiting with a distinct code.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
  /// Bad CLI arguments or unopenable files (exit code 1).
  #[error("invocation error: {0}")]
  Invocation(String),

  /// A well-formed AST that violates language rules (exit code 2): undeclared
  /// identifier, type mismatch, illegal dot/arrow target, narrowing
  /// conversion on a call argument, address-of a local array,
  /// return-of-struct-by-value, misuse of `any`, assignment to a local array
  /// variable, use of `extern` outside global scope, arithmetic between two
  /// pointers, use of a function's return value when it returns nothing.
  #[error("{location}: {message}")]
  Code { location: Location, message: String },

  /// A broken compiler invariant (exit code 3): cannot find a lifetime,
  /// cannot find a register for a lifetime, a malformed operand slot, etc.
  /// Carries the *compiler's own* source location to aid debugging, per
  /// spec.md §7 policy.
  #[error("internal compiler error at {at_file}:{at_line}: {message}")]
  Internal { message: String, at_file: &'static str, at_line: u32 },
}

impl CompileError {
  #[must_use]
  pub fn code(location: Location, message: impl Into<String>) -> Self {
    CompileError::Code { location, message: message.into() }
  }

  #[must_use]
  pub fn exit_code(&self) -> i32 {
    match self {
      CompileError::Invocation(_) => 1,
      CompileError::Code { .. } => 2,
      CompileError::Internal { .. } => 3,
    }
  }
}

/// Construct an [`CompileError::Internal`] tagged with the call site, the way
/// the original's `ErrorAndExit(ERROR_INTERNAL, ...)` captured `__FILE__`/
/// `__LINE__`.
#[macro_export]
macro_rules! internal_error {
  ($($arg:tt)*) => {
    $crate::error::CompileError::Internal {
      message: format!($($arg)*),
      at_file: file!(),
      at_line: line!(),
    }
  };
}

impl From<crate::symtab::SymtabError> for CompileError {
  fn from(e: crate::symtab::SymtabError) -> Self {
    CompileError::Code { location: Location::default(), message: e.to_string() }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn exit_codes_match_spec() {
    assert_eq!(CompileError::Invocation("bad arg".into()).exit_code(), 1);
    assert_eq!(CompileError::code(Location::new(1, 1), "oops").exit_code(), 2);
    assert_eq!(internal_error!("broken: {}", 5).exit_code(), 3);
  }
}
