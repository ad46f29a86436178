//! AST to stack-machine lowering.
//!
//! The lowering threads a compilation environment through a recursive walk:
//! a label supply, the lexical scope depth, a stacked name table mapping
//! names to argument/local/global homes or function labels, and a queue of
//! function bodies discovered along the way. Bodies are compiled after the
//! code that declares them, against a deep snapshot of the name table taken
//! at declaration time, so mutually recursive functions resolve each other.

use std::collections::HashMap;

use crate::error::{CompileError, CompileResult, Pos};
use crate::parser::{Ast, Def};
use crate::sm::{Cond, Insn, Loc};

/// What a name stands for in the current lexical context.
#[derive(Debug, Clone)]
enum Binding {
  Var(Loc),
  Fun { label: String, arity: usize },
}

/// A function body waiting to be compiled, together with the name table it
/// was declared under.
struct PendingFun {
  label: String,
  args: Vec<String>,
  body: Ast,
  scopes: Vec<HashMap<String, Binding>>,
}

/// Compilation environment for the SM stage.
struct Env {
  labels: usize,
  depth: usize,
  scopes: Vec<HashMap<String, Binding>>,
  n_args: usize,
  n_locals: usize,
  pending: Vec<PendingFun>,
}

impl Env {
  fn new() -> Self {
    Self {
      labels: 0,
      depth: 0,
      // The base frame exists so that names bound on demand (see
      // `lookup_var`) survive scope exits.
      scopes: vec![HashMap::new()],
      n_args: 0,
      n_locals: 0,
      pending: Vec::new(),
    }
  }

  fn gen_label(&mut self) -> String {
    let label = format!("L{}", self.labels);
    self.labels += 1;
    label
  }

  /// Function labels at the outermost scope keep their plain name; nested
  /// functions are uniquified with the label counter.
  fn gen_fun_label(&mut self, name: &str) -> String {
    if self.depth == 1 {
      format!("L{name}")
    } else {
      let label = format!("L{name}_{}", self.labels);
      self.labels += 1;
      label
    }
  }

  fn begin_scope(&mut self) {
    self.scopes.push(HashMap::new());
    self.depth += 1;
  }

  fn end_scope(&mut self) {
    self.scopes.pop();
    self.depth -= 1;
  }

  fn bind(&mut self, name: &str, binding: Binding) {
    self
      .scopes
      .last_mut()
      .expect("scope stack is never empty")
      .insert(name.to_string(), binding);
  }

  fn add_arg(&mut self, name: &str) {
    let loc = Loc::Arg(self.n_args);
    self.n_args += 1;
    self.bind(name, Binding::Var(loc));
  }

  /// Declare a variable: a global at the outermost scope, a fresh local
  /// slot anywhere else.
  fn add_var(&mut self, name: &str) -> Loc {
    let loc = if self.depth == 1 {
      Loc::Global(name.to_string())
    } else {
      let slot = Loc::Local(self.n_locals);
      self.n_locals += 1;
      slot
    };
    self.bind(name, Binding::Var(loc.clone()));
    loc
  }

  fn add_fun(&mut self, name: &str, label: String, arity: usize) {
    self.bind(name, Binding::Fun { label, arity });
  }

  /// Re-enter the name table captured when a function was declared and
  /// reset the per-function state. Arguments are bound on a fresh frame on
  /// top of the captured table.
  fn begin_fun(&mut self, scopes: Vec<HashMap<String, Binding>>) {
    self.depth = 1;
    self.n_args = 0;
    self.n_locals = 0;
    self.scopes = scopes;
    self.scopes.push(HashMap::new());
  }

  fn remember_fun(&mut self, label: String, args: Vec<String>, body: Ast) {
    self.pending.push(PendingFun {
      label,
      args,
      body,
      scopes: self.scopes.clone(),
    });
  }

  /// Drain the pending-function queue. Compiling a body may enqueue more.
  fn take_pending(&mut self) -> Vec<PendingFun> {
    std::mem::take(&mut self.pending)
  }

  fn lookup(&self, name: &str) -> Option<&Binding> {
    self.scopes.iter().rev().find_map(|frame| frame.get(name))
  }

  /// Resolve a name to a storage location. Names never declared are bound
  /// as globals on first use.
  fn lookup_var(&mut self, name: &str, pos: Pos) -> CompileResult<Loc> {
    match self.lookup(name) {
      Some(Binding::Var(loc)) => Ok(loc.clone()),
      Some(Binding::Fun { .. }) => Err(CompileError::NotAVariable {
        name: name.to_string(),
        pos,
      }),
      None => {
        let loc = Loc::Global(name.to_string());
        self.scopes[0].insert(name.to_string(), Binding::Var(loc.clone()));
        Ok(loc)
      }
    }
  }

  fn lookup_fun(&self, name: &str, pos: Pos) -> CompileResult<(String, usize)> {
    match self.lookup(name) {
      Some(Binding::Fun { label, arity }) => Ok((label.clone(), *arity)),
      Some(Binding::Var(_)) => Err(CompileError::NotAFunction {
        name: name.to_string(),
        pos,
      }),
      None => Err(CompileError::Undefined {
        name: name.to_string(),
        pos,
      }),
    }
  }

  /// Label of a function bound in the current scope pass. Only called for
  /// names the first definition pass has just bound.
  fn fun_label(&self, name: &str) -> String {
    match self.lookup(name) {
      Some(Binding::Fun { label, .. }) => label.clone(),
      _ => panic!("function {name} was not bound before its body was queued"),
    }
  }
}

/// Lower a program to a flat SM instruction vector: the main body first,
/// then every queued function body until the queue runs dry.
pub fn compile(program: &Ast) -> CompileResult<Vec<Insn>> {
  let mut env = Env::new();
  let body = compile_node(&mut env, program)?;

  let mut code = Vec::with_capacity(body.len() + 4);
  code.push(Insn::Label("main".to_string()));
  code.push(Insn::Begin("main".to_string(), 0, env.n_locals));
  code.extend(body);
  code.push(Insn::End);

  loop {
    let pending = env.take_pending();
    if pending.is_empty() {
      break;
    }
    for fun in pending {
      log::debug!("lowering function {}", fun.label);
      env.begin_fun(fun.scopes);
      for arg in &fun.args {
        env.add_arg(arg);
      }
      let body = compile_node(&mut env, &fun.body)?;
      code.push(Insn::Label(fun.label.clone()));
      code.push(Insn::Begin(fun.label, fun.args.len(), env.n_locals));
      code.extend(body);
      code.push(Insn::End);
    }
  }

  Ok(code)
}

fn compile_node(env: &mut Env, node: &Ast) -> CompileResult<Vec<Insn>> {
  match node {
    Ast::Const { value } => Ok(vec![Insn::Const(*value)]),
    Ast::Var { name, pos } => {
      let loc = env.lookup_var(name, *pos)?;
      Ok(vec![Insn::Ld(loc)])
    }
    Ast::Ref { name, pos } => {
      let loc = env.lookup_var(name, *pos)?;
      Ok(vec![Insn::Lda(loc)])
    }
    Ast::Read { name, pos } => {
      let loc = env.lookup_var(name, *pos)?;
      Ok(vec![Insn::Read, Insn::St(loc), Insn::Drop])
    }
    Ast::Write { arg } => {
      let mut code = compile_node(env, arg)?;
      code.push(Insn::Write);
      Ok(code)
    }
    Ast::Binop { op, lhs, rhs } => {
      let mut code = compile_node(env, lhs)?;
      code.extend(compile_node(env, rhs)?);
      code.push(Insn::Binop(*op));
      Ok(code)
    }
    Ast::Assn { lhs, rhs } => match lhs.as_ref() {
      Ast::Ref { name, pos } => {
        let loc = env.lookup_var(name, *pos)?;
        let mut code = compile_node(env, rhs)?;
        code.push(Insn::St(loc));
        Ok(code)
      }
      _ => {
        let mut code = compile_node(env, lhs)?;
        code.extend(compile_node(env, rhs)?);
        code.push(Insn::Sti);
        Ok(code)
      }
    },
    Ast::Seq { first, rest } => {
      let mut code = compile_node(env, first)?;
      code.extend(compile_node(env, rest)?);
      Ok(code)
    }
    Ast::Skip => Ok(Vec::new()),
    Ast::Ignore { arg } => {
      let mut code = compile_node(env, arg)?;
      code.push(Insn::Drop);
      Ok(code)
    }
    Ast::If {
      cond,
      then_branch,
      else_branch,
    } => {
      let else_label = env.gen_label();
      let end_label = env.gen_label();
      let mut code = compile_node(env, cond)?;
      code.push(Insn::CJmp(Cond::Z, else_label.clone()));
      code.extend(compile_node(env, then_branch)?);
      code.push(Insn::Jmp(end_label.clone()));
      code.push(Insn::Label(else_label));
      code.extend(compile_node(env, else_branch)?);
      code.push(Insn::Label(end_label));
      Ok(code)
    }
    Ast::While { cond, body } => {
      let cond_label = env.gen_label();
      let body_label = env.gen_label();
      let mut code = vec![Insn::Jmp(cond_label.clone())];
      code.push(Insn::Label(body_label.clone()));
      code.extend(compile_node(env, body)?);
      code.push(Insn::Label(cond_label));
      code.extend(compile_node(env, cond)?);
      code.push(Insn::CJmp(Cond::Nz, body_label));
      Ok(code)
    }
    Ast::Repeat { body, cond } => {
      let start_label = env.gen_label();
      let mut code = vec![Insn::Label(start_label.clone())];
      code.extend(compile_node(env, body)?);
      code.extend(compile_node(env, cond)?);
      code.push(Insn::CJmp(Cond::Z, start_label));
      Ok(code)
    }
    Ast::Call { name, args, pos } => {
      let (label, _arity) = env.lookup_fun(name, *pos)?;
      let mut code = Vec::new();
      for arg in args {
        code.extend(compile_node(env, arg)?);
      }
      code.push(Insn::Call(label, args.len()));
      Ok(code)
    }
    Ast::Scope { defs, body } => compile_scope(env, defs, body),
  }
}

/// Two passes over the definitions: first bind every name (so siblings see
/// each other), then queue the function bodies with the completed table.
/// Top-level `local`s contribute a `GLOBAL` prelude.
fn compile_scope(env: &mut Env, defs: &[Def], body: &Ast) -> CompileResult<Vec<Insn>> {
  env.begin_scope();

  let mut code = Vec::new();
  for def in defs {
    match def {
      Def::Local { names } => {
        for name in names {
          if let Loc::Global(global) = env.add_var(name) {
            code.push(Insn::Global(global));
          }
        }
      }
      Def::Fun { name, args, .. } => {
        let label = env.gen_fun_label(name);
        env.add_fun(name, label, args.len());
      }
    }
  }

  for def in defs {
    if let Def::Fun { name, args, body } = def {
      let label = env.fun_label(name);
      env.remember_fun(label, args.clone(), body.clone());
    }
  }

  code.extend(compile_node(env, body)?);
  env.end_scope();
  Ok(code)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::parse;
  use crate::sm::render;
  use crate::tokenizer::tokenize;

  fn lower_source(src: &str) -> Vec<Insn> {
    let ast = parse(tokenize(src).unwrap(), src).unwrap();
    compile(&ast).unwrap()
  }

  fn lower_text(src: &str) -> String {
    render(&lower_source(src))
  }

  #[test]
  fn straight_line_expression() {
    assert_eq!(
      lower_text("write(1+2*3)"),
      "LABEL main\n\
       BEGIN main, 0, 0\n\
       CONST 1\n\
       CONST 2\n\
       CONST 3\n\
       BINOP *\n\
       BINOP +\n\
       WRITE\n\
       END\n"
    );
  }

  #[test]
  fn declared_globals_get_a_prelude() {
    assert_eq!(
      lower_text("local x; read(x); write(x*x)"),
      "LABEL main\n\
       BEGIN main, 0, 0\n\
       GLOBAL x\n\
       READ\n\
       ST x\n\
       DROP\n\
       LD x\n\
       LD x\n\
       BINOP *\n\
       WRITE\n\
       END\n"
    );
  }

  #[test]
  fn undeclared_names_become_globals_without_prelude() {
    assert_eq!(
      lower_text("x := y := 1"),
      "LABEL main\n\
       BEGIN main, 0, 0\n\
       CONST 1\n\
       ST y\n\
       ST x\n\
       END\n"
    );
  }

  #[test]
  fn while_loops_jump_to_the_condition_first() {
    assert_eq!(
      lower_text("local n = 2; while n > 0 do n := n - 1 od"),
      "LABEL main\n\
       BEGIN main, 0, 0\n\
       GLOBAL n\n\
       CONST 2\n\
       ST n\n\
       DROP\n\
       JMP L0\n\
       LABEL L1\n\
       LD n\n\
       CONST 1\n\
       BINOP -\n\
       ST n\n\
       DROP\n\
       LABEL L0\n\
       LD n\n\
       CONST 0\n\
       BINOP >\n\
       CJMP nz, L1\n\
       END\n"
    );
  }

  #[test]
  fn repeat_loops_test_at_the_bottom() {
    assert_eq!(
      lower_text("repeat read(x) until x == 0"),
      "LABEL main\n\
       BEGIN main, 0, 0\n\
       LABEL L0\n\
       READ\n\
       ST x\n\
       DROP\n\
       LD x\n\
       CONST 0\n\
       BINOP ==\n\
       CJMP z, L0\n\
       END\n"
    );
  }

  #[test]
  fn functions_compile_after_the_main_body() {
    assert_eq!(
      lower_text("fun fact(n) { if n == 0 then 1 else n * fact(n-1) fi } write(fact(5))"),
      "LABEL main\n\
       BEGIN main, 0, 0\n\
       CONST 5\n\
       CALL Lfact, 1\n\
       WRITE\n\
       END\n\
       LABEL Lfact\n\
       BEGIN Lfact, 1, 0\n\
       LD arg[0]\n\
       CONST 0\n\
       BINOP ==\n\
       CJMP z, L0\n\
       CONST 1\n\
       JMP L1\n\
       LABEL L0\n\
       LD arg[0]\n\
       LD arg[0]\n\
       CONST 1\n\
       BINOP -\n\
       CALL Lfact, 1\n\
       BINOP *\n\
       LABEL L1\n\
       END\n"
    );
  }

  #[test]
  fn function_locals_use_local_slots() {
    let text = lower_text("fun f(n) { local t; t := n + 1; t } write(f(1))");
    assert!(text.contains("BEGIN Lf, 1, 1\n"));
    assert!(text.contains("ST loc[0]\n"));
    assert!(text.contains("LD arg[0]\n"));
    assert!(!text.contains("GLOBAL t"));
  }

  #[test]
  fn mutual_recursion_resolves_through_the_queue() {
    let text = lower_text(
      "fun even(n) { if n == 0 then 1 else odd(n-1) fi } \
       fun odd(n) { if n == 0 then 0 else even(n-1) fi } \
       write(even(7))",
    );
    assert!(text.contains("CALL Lodd, 1\n"));
    assert!(text.contains("CALL Leven, 1\n"));
    let even_at = text.find("LABEL Leven").unwrap();
    let odd_at = text.find("LABEL Lodd").unwrap();
    assert!(even_at < odd_at, "bodies are emitted in declaration order");
  }

  #[test]
  fn nested_functions_get_uniquified_labels() {
    let text = lower_text("fun o() { fun i() { 1 } i() } write(o())");
    assert!(text.contains("LABEL Li_0\n"));
    assert!(text.contains("BEGIN Li_0, 0, 0\n"));
  }

  #[test]
  fn calling_an_unknown_name_is_undefined() {
    let src = "write(f(1))";
    let ast = parse(tokenize(src).unwrap(), src).unwrap();
    let err = compile(&ast).unwrap_err();
    assert_eq!(err.to_string(), "name f is undefined at 1:7");
  }

  #[test]
  fn calling_a_variable_is_rejected() {
    let src = "local x; write(x(1))";
    let ast = parse(tokenize(src).unwrap(), src).unwrap();
    let err = compile(&ast).unwrap_err();
    assert_eq!(err.to_string(), "x does not designate a function at 1:16");
  }

  #[test]
  fn assigning_to_a_function_is_rejected() {
    let src = "fun f() { 0 } f := 1";
    let ast = parse(tokenize(src).unwrap(), src).unwrap();
    let err = compile(&ast).unwrap_err();
    assert_eq!(err.to_string(), "f does not designate a variable at 1:15");
  }
}
