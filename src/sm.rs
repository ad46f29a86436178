//! The stack-machine intermediate representation.
//!
//! Programs are flat instruction vectors. Every value-producing construct of
//! the source language pushes exactly one operand; `DROP` marks the places
//! where the front-end discards one. The `Display` impls give the textual
//! form used by dumps, logs and tests.

use crate::parser::BinaryOp;

/// Where a named binding lives at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loc {
  /// i-th argument of the enclosing function.
  Arg(usize),
  /// i-th local slot of the enclosing function.
  Local(usize),
  /// Named global.
  Global(String),
}

impl std::fmt::Display for Loc {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Loc::Arg(i) => write!(f, "arg[{i}]"),
      Loc::Local(i) => write!(f, "loc[{i}]"),
      Loc::Global(name) => f.write_str(name),
    }
  }
}

/// Condition codes understood by `CJMP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
  Z,
  Nz,
}

impl std::fmt::Display for Cond {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Cond::Z => f.write_str("z"),
      Cond::Nz => f.write_str("nz"),
    }
  }
}

/// One stack-machine instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
  /// Read a number from the input stream and push it.
  Read,
  /// Pop a value and write it to the output stream.
  Write,
  /// Pop two operands, apply `op`, push the result.
  Binop(BinaryOp),
  /// Push the value stored at a location.
  Ld(Loc),
  /// Push the address of a location.
  Lda(Loc),
  /// Store the top of the stack to a location, keeping it on the stack.
  St(Loc),
  /// Pop a value, then an address, store through the address and push the
  /// value back.
  Sti,
  /// Push a constant.
  Const(i64),
  Label(String),
  Jmp(String),
  CJmp(Cond, String),
  /// Call a function label with the given number of arguments.
  Call(String, usize),
  /// Function prologue: name, arity, number of locals.
  Begin(String, usize, usize),
  /// Function epilogue.
  End,
  /// Declare a global variable.
  Global(String),
  Drop,
  Dup,
}

impl std::fmt::Display for Insn {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Insn::Read => f.write_str("READ"),
      Insn::Write => f.write_str("WRITE"),
      Insn::Binop(op) => write!(f, "BINOP {op}"),
      Insn::Ld(loc) => write!(f, "LD {loc}"),
      Insn::Lda(loc) => write!(f, "LDA {loc}"),
      Insn::St(loc) => write!(f, "ST {loc}"),
      Insn::Sti => f.write_str("STI"),
      Insn::Const(n) => write!(f, "CONST {n}"),
      Insn::Label(l) => write!(f, "LABEL {l}"),
      Insn::Jmp(l) => write!(f, "JMP {l}"),
      Insn::CJmp(cond, l) => write!(f, "CJMP {cond}, {l}"),
      Insn::Call(name, n_args) => write!(f, "CALL {name}, {n_args}"),
      Insn::Begin(name, n_args, n_locals) => write!(f, "BEGIN {name}, {n_args}, {n_locals}"),
      Insn::End => f.write_str("END"),
      Insn::Global(name) => write!(f, "GLOBAL {name}"),
      Insn::Drop => f.write_str("DROP"),
      Insn::Dup => f.write_str("DUP"),
    }
  }
}

/// Render a program one instruction per line.
pub fn render(program: &[Insn]) -> String {
  let mut out = String::new();
  for insn in program {
    out.push_str(&insn.to_string());
    out.push('\n');
  }
  out
}
