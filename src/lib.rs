//! Crate root: wires together the compilation pipeline.
//!
//! The stages are intentionally small and composable so they can be evolved
//! independently:
//! - `tokenizer` performs lexical analysis and produces a flat token stream.
//! - `parser` owns all syntactic knowledge and returns the program AST.
//! - `lower` compiles the AST into the stack-machine IR defined in `sm`.
//! - `codegen` lowers the SM program into 32-bit x86 AT&T assembly.
//! - `interp` holds the reference interpreters used for cross-checking.
//! - `driver` writes the assembly and invokes the external toolchain.
//! - `error` centralises the diagnostics shared by the other modules.

pub mod codegen;
pub mod driver;
pub mod error;
pub mod interp;
pub mod lower;
pub mod parser;
pub mod sm;
pub mod tokenizer;

pub use error::{CompileError, CompileResult};

/// Parse a source string into its AST.
pub fn parse_program(source: &str) -> CompileResult<parser::Ast> {
  let tokens = tokenizer::tokenize(source)?;
  parser::parse(tokens, source)
}

/// Compile a source string to the stack-machine IR.
pub fn compile_sm(source: &str) -> CompileResult<Vec<sm::Insn>> {
  let program = parse_program(source)?;
  lower::compile(&program)
}

/// Compile a source string into AT&T assembly.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  let program = compile_sm(source)?;
  codegen::compile(&program)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn the_pipeline_produces_assembly_end_to_end() {
    let asm =
      generate_assembly("fun fact(n) { if n == 0 then 1 else n * fact(n-1) fi } write(fact(5))")
        .unwrap();
    assert!(asm.starts_with("\t.global main\n"));
    assert!(asm.contains("main:\n"));
    assert!(asm.contains("Lfact:\n"));
    assert!(asm.contains("\tcall\tLfact\n"));
  }

  #[test]
  fn naming_errors_surface_from_the_pipeline() {
    let err = generate_assembly("write(q(1))").unwrap_err();
    assert_eq!(err.to_string(), "name q is undefined at 1:7");
  }

  #[test]
  fn syntax_errors_surface_from_the_pipeline() {
    let err = generate_assembly("if x then skip").unwrap_err();
    assert!(err.to_string().contains("expected \"fi\""));
  }
}
