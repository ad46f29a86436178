//! Shared error utilities used across the compilation pipeline.
//!
//! Diagnostics are kept lightweight on purpose: every error is fatal, and
//! positions are resolved to `line:column` once at construction so later
//! stages never need the source text back.

use snafu::Snafu;
use std::path::PathBuf;

pub type CompileResult<T> = Result<T, CompileError>;

/// A `line:column` pair, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
  pub line: u32,
  pub col: u32,
}

impl Pos {
  pub fn new(line: u32, col: u32) -> Self {
    Self { line, col }
  }

  /// Resolve a byte offset in `source` to a position.
  pub fn at(source: &str, loc: usize) -> Self {
    let safe_loc = loc.min(source.len());
    let mut line = 1;
    let mut col = 1;
    for b in source.as_bytes()[..safe_loc].iter() {
      if *b == b'\n' {
        line += 1;
        col = 1;
      } else {
        col += 1;
      }
    }
    Self { line, col }
  }
}

impl std::fmt::Display for Pos {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}", self.line, self.col)
  }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompileError {
  #[snafu(display("{message} at {pos}"))]
  Syntax { message: String, pos: Pos },

  #[snafu(display("name {name} is undefined at {pos}"))]
  Undefined { name: String, pos: Pos },

  #[snafu(display("{name} does not designate a variable at {pos}"))]
  NotAVariable { name: String, pos: Pos },

  #[snafu(display("{name} does not designate a function at {pos}"))]
  NotAFunction { name: String, pos: Pos },

  #[snafu(display("codegeneration for {insn} is not yet implemented"))]
  Unsupported { insn: String },

  #[snafu(display("input stream is exhausted on read"))]
  InputExhausted,

  #[snafu(display("division by zero"))]
  DivisionByZero,

  #[snafu(display("cannot write {}: {source}", path.display()))]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },

  #[snafu(display("cannot run {tool}: {source}"))]
  Toolchain {
    tool: String,
    source: std::io::Error,
  },
}

impl CompileError {
  /// Construct a syntax error anchored at a specific byte offset in the source.
  pub fn at(source: &str, loc: usize, message: impl Into<String>) -> Self {
    Self::Syntax {
      message: message.into(),
      pos: Pos::at(source, loc),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn positions_are_one_based_line_column() {
    let src = "write(1);\nwrite(x)";
    assert_eq!(Pos::at(src, 0), Pos::new(1, 1));
    assert_eq!(Pos::at(src, 10), Pos::new(2, 1));
    assert_eq!(Pos::at(src, 16), Pos::new(2, 7));
  }

  #[test]
  fn naming_errors_render_with_position() {
    let err = CompileError::Undefined {
      name: "fact".to_string(),
      pos: Pos::new(3, 11),
    };
    assert_eq!(err.to_string(), "name fact is undefined at 3:11");
  }

  #[test]
  fn syntax_errors_resolve_offsets() {
    let err = CompileError::at("skip;\n!", 6, "invalid token: '!'");
    assert_eq!(err.to_string(), "invalid token: '!' at 2:1");
  }
}
