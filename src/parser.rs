//! Recursive-descent parser producing the expression-oriented AST.
//!
//! The parser keeps a precedence-climbing set of helpers over a thin
//! `TokenStream` cursor. Besides syntax it owns the value discipline of the
//! language: every construct is classified as value-producing or void, and
//! the parser inserts `Ignore` wrappers, equalizes `if` branches and pads
//! void function bodies so that later stages can rely on balanced stack
//! effects on every control-flow path.

use crate::error::{CompileError, CompileResult, Pos};
use crate::tokenizer::{describe_token, token_text, Token, TokenKind};

/// Binary operators of the source language. `And`/`Or` are not
/// short-circuiting: both operands are always evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Rem,
  Lt,
  Le,
  Gt,
  Ge,
  Eq,
  Ne,
  And,
  Or,
}

impl BinaryOp {
  /// The operator's surface syntax, also used by the SM textual form.
  pub fn symbol(self) -> &'static str {
    match self {
      BinaryOp::Add => "+",
      BinaryOp::Sub => "-",
      BinaryOp::Mul => "*",
      BinaryOp::Div => "/",
      BinaryOp::Rem => "%",
      BinaryOp::Lt => "<",
      BinaryOp::Le => "<=",
      BinaryOp::Gt => ">",
      BinaryOp::Ge => ">=",
      BinaryOp::Eq => "==",
      BinaryOp::Ne => "!=",
      BinaryOp::And => "&&",
      BinaryOp::Or => "!!",
    }
  }
}

impl std::fmt::Display for BinaryOp {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.symbol())
  }
}

/// Expression tree produced by the parser. Statements and expressions share
/// one shape; `Ignore` marks the places where a produced value is discarded.
#[derive(Debug, Clone)]
pub enum Ast {
  Const {
    value: i64,
  },
  Var {
    name: String,
    pos: Pos,
  },
  Ref {
    name: String,
    pos: Pos,
  },
  Binop {
    op: BinaryOp,
    lhs: Box<Ast>,
    rhs: Box<Ast>,
  },
  Assn {
    lhs: Box<Ast>,
    rhs: Box<Ast>,
  },
  Seq {
    first: Box<Ast>,
    rest: Box<Ast>,
  },
  Skip,
  Read {
    name: String,
    pos: Pos,
  },
  Write {
    arg: Box<Ast>,
  },
  If {
    cond: Box<Ast>,
    then_branch: Box<Ast>,
    else_branch: Box<Ast>,
  },
  While {
    cond: Box<Ast>,
    body: Box<Ast>,
  },
  Repeat {
    body: Box<Ast>,
    cond: Box<Ast>,
  },
  Ignore {
    arg: Box<Ast>,
  },
  Call {
    name: String,
    args: Vec<Ast>,
    pos: Pos,
  },
  Scope {
    defs: Vec<Def>,
    body: Box<Ast>,
  },
}

/// Definitions introduced at the head of a scope.
#[derive(Debug, Clone)]
pub enum Def {
  Local { names: Vec<String> },
  Fun { name: String, args: Vec<String>, body: Ast },
}

impl Ast {
  pub fn number(value: i64) -> Self {
    Self::Const { value }
  }

  pub fn var(name: impl Into<String>, pos: Pos) -> Self {
    Self::Var {
      name: name.into(),
      pos,
    }
  }

  pub fn reference(name: impl Into<String>, pos: Pos) -> Self {
    Self::Ref {
      name: name.into(),
      pos,
    }
  }

  pub fn binop(op: BinaryOp, lhs: Ast, rhs: Ast) -> Self {
    Self::Binop {
      op,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    }
  }

  pub fn assign(lhs: Ast, rhs: Ast) -> Self {
    Self::Assn {
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    }
  }

  pub fn seq(first: Ast, rest: Ast) -> Self {
    Self::Seq {
      first: Box::new(first),
      rest: Box::new(rest),
    }
  }

  pub fn read(name: impl Into<String>, pos: Pos) -> Self {
    Self::Read {
      name: name.into(),
      pos,
    }
  }

  pub fn write(arg: Ast) -> Self {
    Self::Write { arg: Box::new(arg) }
  }

  pub fn if_stmt(cond: Ast, then_branch: Ast, else_branch: Ast) -> Self {
    Self::If {
      cond: Box::new(cond),
      then_branch: Box::new(then_branch),
      else_branch: Box::new(else_branch),
    }
  }

  pub fn while_loop(cond: Ast, body: Ast) -> Self {
    Self::While {
      cond: Box::new(cond),
      body: Box::new(body),
    }
  }

  pub fn repeat_loop(body: Ast, cond: Ast) -> Self {
    Self::Repeat {
      body: Box::new(body),
      cond: Box::new(cond),
    }
  }

  pub fn ignore(arg: Ast) -> Self {
    Self::Ignore { arg: Box::new(arg) }
  }

  pub fn call(name: impl Into<String>, args: Vec<Ast>, pos: Pos) -> Self {
    Self::Call {
      name: name.into(),
      args,
      pos,
    }
  }

  pub fn scope(defs: Vec<Def>, body: Ast) -> Self {
    Self::Scope {
      defs,
      body: Box::new(body),
    }
  }

  /// Whether evaluating this node leaves a value on the operand stack.
  pub fn produces_value(&self) -> bool {
    match self {
      Ast::Const { .. }
      | Ast::Var { .. }
      | Ast::Ref { .. }
      | Ast::Binop { .. }
      | Ast::Assn { .. }
      | Ast::Call { .. } => true,
      Ast::Seq { rest, .. } => rest.produces_value(),
      Ast::If { then_branch, .. } => then_branch.produces_value(),
      Ast::Scope { body, .. } => body.produces_value(),
      Ast::Skip
      | Ast::Read { .. }
      | Ast::Write { .. }
      | Ast::While { .. }
      | Ast::Repeat { .. }
      | Ast::Ignore { .. } => false,
    }
  }
}

/// Wrap a node in `Ignore` when its value would otherwise be left behind.
fn coerce_void(node: Ast) -> Ast {
  if node.produces_value() {
    Ast::ignore(node)
  } else {
    node
  }
}

/// Parse a whole program into its top-level scope.
pub fn parse(tokens: Vec<Token>, source: &str) -> CompileResult<Ast> {
  let mut stream = TokenStream::new(tokens, source);
  let program = parse_scope(&mut stream, &[])?;
  if !stream.is_eof() {
    let got = describe_token(stream.peek(), source);
    return Err(CompileError::at(
      source,
      stream.current_loc(),
      format!("expected end of program, but got \"{got}\""),
    ));
  }
  Ok(program)
}

// ----- Scopes and definitions -----

/// Parse `def* stmts` up to (not consuming) one of `terminators` or EOF.
fn parse_scope(stream: &mut TokenStream, terminators: &[&str]) -> CompileResult<Ast> {
  let mut defs = Vec::new();
  let mut initializers = Vec::new();

  loop {
    match stream.peek_keyword() {
      Some("local") => parse_local_def(stream, &mut defs, &mut initializers)?,
      Some("fun") => defs.push(parse_fun_def(stream)?),
      _ => break,
    }
  }

  let mut body = parse_stmts(stream, terminators)?;
  for init in initializers.into_iter().rev() {
    body = Ast::seq(Ast::ignore(init), body);
  }
  Ok(Ast::scope(defs, body))
}

/// `local x = e, y, z = e;` declares names; initializers become plain
/// assignments prepended to the scope body.
fn parse_local_def(
  stream: &mut TokenStream,
  defs: &mut Vec<Def>,
  initializers: &mut Vec<Ast>,
) -> CompileResult<()> {
  stream.skip("local")?;
  let mut names = Vec::new();
  loop {
    let (name, loc) = stream.get_ident()?;
    let pos = Pos::at(stream.source, loc);
    if stream.equal("=") {
      let init = parse_expr(stream)?;
      initializers.push(Ast::assign(Ast::reference(name.as_str(), pos), init));
    }
    names.push(name);
    if stream.equal(",") {
      continue;
    }
    break;
  }
  stream.skip(";")?;
  defs.push(Def::Local { names });
  Ok(())
}

fn parse_fun_def(stream: &mut TokenStream) -> CompileResult<Def> {
  stream.skip("fun")?;
  let (name, _) = stream.get_ident()?;
  stream.skip("(")?;
  let mut args = Vec::new();
  if !stream.peek_is(")") {
    loop {
      let (arg, _) = stream.get_ident()?;
      args.push(arg);
      if stream.equal(",") {
        continue;
      }
      break;
    }
  }
  stream.skip(")")?;
  stream.skip("{")?;
  let mut body = parse_scope(stream, &["}"])?;
  stream.skip("}")?;

  // A body ending in a statement still has to return something.
  if !body.produces_value() {
    body = Ast::seq(body, Ast::number(0));
  }
  Ok(Def::Fun { name, args, body })
}

// ----- Statement parsing -----

/// Parse a `;`-separated statement sequence up to (not consuming) one of
/// `terminators` or EOF. Every element but the last is coerced to void.
fn parse_stmts(stream: &mut TokenStream, terminators: &[&str]) -> CompileResult<Ast> {
  let at_end =
    |stream: &TokenStream| stream.is_eof() || terminators.iter().any(|t| stream.peek_is(t));

  if at_end(stream) {
    return Ok(Ast::Skip);
  }

  let mut items = vec![parse_stmt(stream)?];
  while stream.equal(";") {
    items.push(parse_stmt(stream)?);
  }

  if !at_end(stream) {
    let got = describe_token(stream.peek(), stream.source);
    return Err(CompileError::at(
      stream.source,
      stream.current_loc(),
      format!("expected ';' or end of block, but got \"{got}\""),
    ));
  }

  let last = items.pop().expect("at least one statement was parsed");
  let mut node = last;
  for item in items.into_iter().rev() {
    node = Ast::seq(coerce_void(item), node);
  }
  Ok(node)
}

fn parse_stmt(stream: &mut TokenStream) -> CompileResult<Ast> {
  match stream.peek_keyword() {
    Some("skip") => {
      stream.skip("skip")?;
      Ok(Ast::Skip)
    }
    Some("read") => parse_read_stmt(stream),
    Some("write") => parse_write_stmt(stream),
    Some("if") => parse_if_stmt(stream),
    Some("while") => parse_while_stmt(stream),
    Some("repeat") => parse_repeat_stmt(stream),
    Some(kw @ ("local" | "fun")) => Err(CompileError::at(
      stream.source,
      stream.current_loc(),
      format!("'{kw}' definitions must precede the statements of a scope"),
    )),
    Some(kw) => Err(CompileError::at(
      stream.source,
      stream.current_loc(),
      format!("unexpected '{kw}'"),
    )),
    None => parse_expr(stream),
  }
}

fn parse_read_stmt(stream: &mut TokenStream) -> CompileResult<Ast> {
  stream.skip("read")?;
  stream.skip("(")?;
  let (name, loc) = stream.get_ident()?;
  stream.skip(")")?;
  Ok(Ast::read(name, Pos::at(stream.source, loc)))
}

fn parse_write_stmt(stream: &mut TokenStream) -> CompileResult<Ast> {
  stream.skip("write")?;
  stream.skip("(")?;
  let arg = parse_expr(stream)?;
  stream.skip(")")?;
  Ok(Ast::write(arg))
}

fn parse_if_stmt(stream: &mut TokenStream) -> CompileResult<Ast> {
  stream.skip("if")?;
  let node = parse_if_chain(stream)?;
  stream.skip("fi")?;
  Ok(node)
}

/// One `cond then branch` link of an `if`/`elif` chain. The single closing
/// `fi` is consumed by `parse_if_stmt`.
fn parse_if_chain(stream: &mut TokenStream) -> CompileResult<Ast> {
  let cond = parse_expr(stream)?;
  stream.skip("then")?;
  let mut then_branch = parse_stmts(stream, &["elif", "else", "fi"])?;

  let mut else_branch = if stream.equal("elif") {
    parse_if_chain(stream)?
  } else if stream.equal("else") {
    parse_stmts(stream, &["fi"])?
  } else {
    Ast::Skip
  };

  // Both arms must agree on whether a value is produced, otherwise the two
  // paths would reach the join with different stack shapes.
  if then_branch.produces_value() && !else_branch.produces_value() {
    then_branch = Ast::ignore(then_branch);
  } else if else_branch.produces_value() && !then_branch.produces_value() {
    else_branch = Ast::ignore(else_branch);
  }

  Ok(Ast::if_stmt(cond, then_branch, else_branch))
}

fn parse_while_stmt(stream: &mut TokenStream) -> CompileResult<Ast> {
  stream.skip("while")?;
  let cond = parse_expr(stream)?;
  stream.skip("do")?;
  let body = coerce_void(parse_stmts(stream, &["od"])?);
  stream.skip("od")?;
  Ok(Ast::while_loop(cond, body))
}

fn parse_repeat_stmt(stream: &mut TokenStream) -> CompileResult<Ast> {
  stream.skip("repeat")?;
  let body = coerce_void(parse_stmts(stream, &["until"])?);
  stream.skip("until")?;
  let cond = parse_expr(stream)?;
  Ok(Ast::repeat_loop(body, cond))
}

// ----- Expression parsing -----

fn parse_expr(stream: &mut TokenStream) -> CompileResult<Ast> {
  parse_assign(stream)
}

fn parse_assign(stream: &mut TokenStream) -> CompileResult<Ast> {
  let node = parse_disjunction(stream)?;

  if stream.peek_is(":=") {
    let assign_loc = stream.current_loc();
    stream.skip(":=")?;
    let rhs = parse_assign(stream)?;
    return match node {
      Ast::Var { name, pos } => Ok(Ast::assign(Ast::reference(name, pos), rhs)),
      _ => Err(CompileError::at(
        stream.source,
        assign_loc,
        "left-hand side of assignment is not assignable",
      )),
    };
  }

  Ok(node)
}

fn parse_disjunction(stream: &mut TokenStream) -> CompileResult<Ast> {
  let mut node = parse_conjunction(stream)?;
  while stream.peek_is("!!") {
    stream.skip("!!")?;
    let rhs = parse_conjunction(stream)?;
    node = Ast::binop(BinaryOp::Or, node, rhs);
  }
  Ok(node)
}

fn parse_conjunction(stream: &mut TokenStream) -> CompileResult<Ast> {
  let mut node = parse_equality(stream)?;
  while stream.peek_is("&&") {
    stream.skip("&&")?;
    let rhs = parse_equality(stream)?;
    node = Ast::binop(BinaryOp::And, node, rhs);
  }
  Ok(node)
}

fn parse_equality(stream: &mut TokenStream) -> CompileResult<Ast> {
  let mut node = parse_relational(stream)?;

  loop {
    let op = match stream.peek_punctuator() {
      Some("==") => BinaryOp::Eq,
      Some("!=") => BinaryOp::Ne,
      _ => break,
    };
    stream.skip(op.symbol())?;
    let rhs = parse_relational(stream)?;
    node = Ast::binop(op, node, rhs);
  }

  Ok(node)
}

fn parse_relational(stream: &mut TokenStream) -> CompileResult<Ast> {
  let mut node = parse_add(stream)?;

  loop {
    let op = match stream.peek_punctuator() {
      Some("<=") => BinaryOp::Le,
      Some(">=") => BinaryOp::Ge,
      Some("<") => BinaryOp::Lt,
      Some(">") => BinaryOp::Gt,
      _ => break,
    };
    stream.skip(op.symbol())?;
    let rhs = parse_add(stream)?;
    node = Ast::binop(op, node, rhs);
  }

  Ok(node)
}

fn parse_add(stream: &mut TokenStream) -> CompileResult<Ast> {
  let mut node = parse_mul(stream)?;

  loop {
    let op = match stream.peek_punctuator() {
      Some("+") => BinaryOp::Add,
      Some("-") => BinaryOp::Sub,
      _ => break,
    };
    stream.skip(op.symbol())?;
    let rhs = parse_mul(stream)?;
    node = Ast::binop(op, node, rhs);
  }

  Ok(node)
}

fn parse_mul(stream: &mut TokenStream) -> CompileResult<Ast> {
  let mut node = parse_primary(stream)?;

  loop {
    let op = match stream.peek_punctuator() {
      Some("*") => BinaryOp::Mul,
      Some("/") => BinaryOp::Div,
      Some("%") => BinaryOp::Rem,
      _ => break,
    };
    stream.skip(op.symbol())?;
    let rhs = parse_primary(stream)?;
    node = Ast::binop(op, node, rhs);
  }

  Ok(node)
}

fn parse_primary(stream: &mut TokenStream) -> CompileResult<Ast> {
  if stream.equal("(") {
    let node = parse_expr(stream)?;
    stream.skip(")")?;
    return Ok(node);
  }

  if matches!(stream.peek().map(|t| t.kind), Some(TokenKind::Ident)) {
    let (name, loc) = stream.get_ident()?;
    let pos = Pos::at(stream.source, loc);
    if stream.equal("(") {
      let mut args = Vec::new();
      if !stream.peek_is(")") {
        loop {
          args.push(parse_expr(stream)?);
          if stream.equal(",") {
            continue;
          }
          break;
        }
      }
      stream.skip(")")?;
      return Ok(Ast::call(name, args, pos));
    }
    return Ok(Ast::var(name, pos));
  }

  let (value, _) = stream.get_number()?;
  Ok(Ast::number(value))
}

/// Lightweight cursor over the token vector.
struct TokenStream<'a> {
  tokens: Vec<Token>,
  source: &'a str,
  pos: usize,
}

impl<'a> TokenStream<'a> {
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      tokens,
      source,
      pos: 0,
    }
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn current_loc(&self) -> usize {
    self
      .tokens
      .get(self.pos)
      .map(|token| token.loc)
      .unwrap_or(self.source.len())
  }

  fn peek_is(&self, symbol: &str) -> bool {
    self
      .peek()
      .filter(|token| {
        matches!(token.kind, TokenKind::Punctuator | TokenKind::Keyword)
          && token_text(token, self.source) == symbol
      })
      .is_some()
  }

  fn peek_keyword(&self) -> Option<&str> {
    self.peek().and_then(|token| {
      if token.kind == TokenKind::Keyword {
        Some(token_text(token, self.source))
      } else {
        None
      }
    })
  }

  fn peek_punctuator(&self) -> Option<&str> {
    self.peek().and_then(|token| {
      if token.kind == TokenKind::Punctuator {
        Some(token_text(token, self.source))
      } else {
        None
      }
    })
  }

  /// Consume the current token if it matches the provided symbol.
  fn equal(&mut self, op: &str) -> bool {
    if self.peek_is(op) {
      self.pos += 1;
      return true;
    }
    false
  }

  fn skip(&mut self, s: &str) -> CompileResult<()> {
    if self.equal(s) {
      Ok(())
    } else {
      let (loc, got) = match self.tokens.get(self.pos) {
        Some(token) => (token.loc, describe_token(Some(token), self.source)),
        None => (self.source.len(), "EOF".to_string()),
      };
      Err(CompileError::at(
        self.source,
        loc,
        format!("expected \"{s}\", but got \"{got}\""),
      ))
    }
  }

  /// Parse the current token as an integer literal returning its value and location.
  fn get_number(&mut self) -> CompileResult<(i64, usize)> {
    if let Some(token) = self.tokens.get(self.pos) {
      if token.kind == TokenKind::Num {
        let value = token.value.ok_or_else(|| {
          CompileError::at(
            self.source,
            token.loc,
            "internal error: numeric token missing value",
          )
        })?;
        let loc = token.loc;
        self.pos += 1;
        return Ok((value, loc));
      }
      let got = describe_token(Some(token), self.source);
      return Err(CompileError::at(
        self.source,
        token.loc,
        format!("expected a number, but got \"{got}\""),
      ));
    }
    Err(CompileError::at(
      self.source,
      self.source.len(),
      "unexpected end of input while parsing number",
    ))
  }

  /// Parse the current token as an identifier.
  fn get_ident(&mut self) -> CompileResult<(String, usize)> {
    if let Some(token) = self.tokens.get(self.pos) {
      if token.kind == TokenKind::Ident {
        let text = token_text(token, self.source);
        let loc = token.loc;
        self.pos += 1;
        return Ok((text.to_string(), loc));
      }
      let got = describe_token(Some(token), self.source);
      return Err(CompileError::at(
        self.source,
        token.loc,
        format!("expected an identifier, but got \"{got}\""),
      ));
    }
    Err(CompileError::at(
      self.source,
      self.source.len(),
      "unexpected end of input while parsing identifier",
    ))
  }

  fn is_eof(&self) -> bool {
    matches!(self.peek().map(|token| token.kind), Some(TokenKind::Eof))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tokenizer::tokenize;

  fn parse_source(src: &str) -> Ast {
    parse(tokenize(src).unwrap(), src).unwrap()
  }

  #[test]
  fn program_is_a_scope() {
    let ast = parse_source("write(1+2*3)");
    let Ast::Scope { defs, body } = ast else {
      panic!("expected a top-level scope");
    };
    assert!(defs.is_empty());
    assert!(matches!(*body, Ast::Write { .. }));
  }

  #[test]
  fn precedence_mul_binds_tighter_than_add() {
    let ast = parse_source("write(1+2*3)");
    let Ast::Scope { body, .. } = ast else {
      panic!();
    };
    let Ast::Write { arg } = *body else { panic!() };
    let Ast::Binop { op, rhs, .. } = *arg else {
      panic!()
    };
    assert_eq!(op, BinaryOp::Add);
    assert!(matches!(
      *rhs,
      Ast::Binop {
        op: BinaryOp::Mul,
        ..
      }
    ));
  }

  #[test]
  fn local_initializers_desugar_to_assignments() {
    let ast = parse_source("local n = 10, s = 0; write(n)");
    let Ast::Scope { defs, body } = ast else {
      panic!();
    };
    assert!(matches!(&defs[0], Def::Local { names } if names == &["n", "s"]));
    // body = Ignore(n := 10); Ignore(s := 0); write(n)
    let Ast::Seq { first, rest } = *body else {
      panic!()
    };
    assert!(matches!(*first, Ast::Ignore { .. }));
    let Ast::Seq { first, rest } = *rest else {
      panic!()
    };
    assert!(matches!(*first, Ast::Ignore { .. }));
    assert!(matches!(*rest, Ast::Write { .. }));
  }

  #[test]
  fn sequences_ignore_non_final_values() {
    let ast = parse_source("x := 1; write(x)");
    let Ast::Scope { body, .. } = ast else {
      panic!();
    };
    let Ast::Seq { first, rest } = *body else {
      panic!()
    };
    assert!(matches!(*first, Ast::Ignore { .. }));
    assert!(matches!(*rest, Ast::Write { .. }));
  }

  #[test]
  fn assignment_chains_are_right_associative() {
    let ast = parse_source("x := y := 1");
    let Ast::Scope { body, .. } = ast else {
      panic!();
    };
    let Ast::Assn { lhs, rhs } = *body else {
      panic!()
    };
    assert!(matches!(*lhs, Ast::Ref { ref name, .. } if name == "x"));
    let Ast::Assn { lhs, .. } = *rhs else { panic!() };
    assert!(matches!(*lhs, Ast::Ref { ref name, .. } if name == "y"));
  }

  #[test]
  fn if_branches_are_equalized() {
    let ast = parse_source("if c then x := 1 else skip fi");
    let Ast::Scope { body, .. } = ast else {
      panic!();
    };
    let Ast::If {
      then_branch,
      else_branch,
      ..
    } = *body
    else {
      panic!()
    };
    assert!(matches!(*then_branch, Ast::Ignore { .. }));
    assert!(matches!(*else_branch, Ast::Skip));
  }

  #[test]
  fn if_without_else_gets_skip() {
    let ast = parse_source("if c then write(1) fi");
    let Ast::Scope { body, .. } = ast else {
      panic!();
    };
    let Ast::If { else_branch, .. } = *body else {
      panic!()
    };
    assert!(matches!(*else_branch, Ast::Skip));
  }

  #[test]
  fn elif_desugars_to_nested_if() {
    let ast = parse_source("if a then skip elif b then skip else skip fi");
    let Ast::Scope { body, .. } = ast else {
      panic!();
    };
    let Ast::If { else_branch, .. } = *body else {
      panic!()
    };
    assert!(matches!(*else_branch, Ast::If { .. }));
  }

  #[test]
  fn expression_if_keeps_both_values() {
    let src = "fun sign(n) { if n < 0 then 0 - 1 else 1 fi } write(sign(5))";
    let ast = parse_source(src);
    let Ast::Scope { defs, .. } = ast else {
      panic!();
    };
    let Def::Fun { body, .. } = &defs[0] else {
      panic!()
    };
    let Ast::Scope { body, .. } = body else { panic!() };
    let Ast::If {
      then_branch,
      else_branch,
      ..
    } = body.as_ref()
    else {
      panic!()
    };
    assert!(then_branch.produces_value());
    assert!(else_branch.produces_value());
  }

  #[test]
  fn void_function_bodies_return_zero() {
    let ast = parse_source("fun p(n) { write(n) } skip");
    let Ast::Scope { defs, .. } = ast else {
      panic!();
    };
    let Def::Fun { body, .. } = &defs[0] else {
      panic!()
    };
    assert!(body.produces_value());
    let Ast::Seq { first, rest } = body else { panic!() };
    assert!(matches!(first.as_ref(), Ast::Scope { .. }));
    assert!(matches!(rest.as_ref(), Ast::Const { value: 0 }));
  }

  #[test]
  fn loop_bodies_are_void() {
    let ast = parse_source("while n > 0 do n := n - 1 od");
    let Ast::Scope { body, .. } = ast else {
      panic!();
    };
    let Ast::While { body, .. } = *body else {
      panic!()
    };
    assert!(!body.produces_value());
  }

  #[test]
  fn repeat_parses_body_then_condition() {
    let ast = parse_source("repeat read(x) until x == 0");
    let Ast::Scope { body, .. } = ast else {
      panic!();
    };
    let Ast::Repeat { body, cond } = *body else {
      panic!()
    };
    assert!(matches!(*body, Ast::Read { .. }));
    assert!(matches!(
      *cond,
      Ast::Binop {
        op: BinaryOp::Eq,
        ..
      }
    ));
  }

  #[test]
  fn non_lvalue_assignment_is_rejected() {
    let tokens = tokenize("1 := 2").unwrap();
    let err = parse(tokens, "1 := 2").unwrap_err();
    assert!(err
      .to_string()
      .contains("left-hand side of assignment is not assignable"));
  }

  #[test]
  fn definitions_after_statements_are_rejected() {
    let src = "skip; local x;";
    let err = parse(tokenize(src).unwrap(), src).unwrap_err();
    assert!(err.to_string().contains("must precede"));
  }

  #[test]
  fn call_arguments_parse_left_to_right() {
    let ast = parse_source("write(max(a, b + 1))");
    let Ast::Scope { body, .. } = ast else {
      panic!();
    };
    let Ast::Write { arg } = *body else { panic!() };
    let Ast::Call { name, args, .. } = *arg else {
      panic!()
    };
    assert_eq!(name, "max");
    assert_eq!(args.len(), 2);
    assert!(matches!(args[0], Ast::Var { .. }));
    assert!(matches!(args[1], Ast::Binop { .. }));
  }
}
