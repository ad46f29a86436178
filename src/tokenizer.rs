//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! The tokenizer is intentionally tiny: it knows nothing about semantics
//! beyond recognising keywords, identifiers, operators and numeric literals.
//! Multi-character punctuators are matched before single-character ones to
//! avoid ambiguity (`:=` before `=`, `<=` before `<`, and so on).

use crate::error::{CompileError, CompileResult};

/// Reserved words of the source language.
const KEYWORDS: [&str; 15] = [
  "local", "fun", "if", "then", "elif", "else", "fi", "while", "do", "od", "repeat", "until",
  "skip", "read", "write",
];

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Punctuator,
  Keyword,
  Ident,
  Num,
  Eof,
}

/// Thin wrapper for lexical information needed by later stages.
#[derive(Debug, Clone)]
pub struct Token {
  pub kind: TokenKind,
  pub value: Option<i64>,
  pub loc: usize,
  pub len: usize,
}

impl Token {
  /// Convenience constructor to keep the `tokenize` loop readable.
  pub fn new(kind: TokenKind, loc: usize, len: usize, value: Option<i64>) -> Self {
    Self {
      kind,
      value,
      loc,
      len,
    }
  }
}

/// Lex the input into a flat vector of tokens terminated by an `Eof` marker.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let mut tokens = Vec::new();
  let bytes = input.as_bytes();
  let mut i = 0;

  while i < bytes.len() {
    let c = bytes[i];
    if c.is_ascii_whitespace() {
      i += 1;
      continue;
    }

    if c.is_ascii_digit() {
      let start = i;
      i += 1;
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
      }
      let text = &input[start..i];
      let value = text
        .parse::<i64>()
        .map_err(|err| CompileError::at(input, start, format!("invalid number: {err}")))?;
      tokens.push(Token::new(TokenKind::Num, start, i - start, Some(value)));
      continue;
    }

    if c.is_ascii_alphabetic() || c == b'_' {
      let start = i;
      i += 1;
      while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
      }
      let text = &input[start..i];
      let kind = if KEYWORDS.contains(&text) {
        TokenKind::Keyword
      } else {
        TokenKind::Ident
      };
      tokens.push(Token::new(kind, start, i - start, None));
      continue;
    }

    if let Some(op) = [":=", "==", "!=", "<=", ">=", "&&", "!!"]
      .into_iter()
      .find(|op| input[i..].starts_with(op))
    {
      tokens.push(Token::new(TokenKind::Punctuator, i, op.len(), None));
      i += op.len();
      continue;
    }

    if matches!(
      c,
      b'+' | b'-' | b'*' | b'/' | b'%' | b'(' | b')' | b'{' | b'}' | b'<' | b'>' | b'=' | b';' | b','
    ) {
      tokens.push(Token::new(TokenKind::Punctuator, i, 1, None));
      i += 1;
      continue;
    }

    let invalid_char = input[i..].chars().next().unwrap_or('\0');
    return Err(CompileError::at(
      input,
      i,
      format!("invalid token: '{invalid_char}'"),
    ));
  }

  tokens.push(Token::new(TokenKind::Eof, input.len(), 0, None));
  Ok(tokens)
}

/// Return the slice from the source that produced this token.
pub fn token_text<'a>(token: &Token, source: &'a str) -> &'a str {
  let end = token.loc + token.len;
  &source[token.loc..end]
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: Option<&Token>, source: &str) -> String {
  match token {
    Some(t) => match t.kind {
      TokenKind::Eof => "EOF".to_string(),
      _ => token_text(t, source).to_string(),
    },
    None => "EOF".to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn kinds(input: &str) -> Vec<TokenKind> {
    tokenize(input).unwrap().iter().map(|t| t.kind).collect()
  }

  #[test]
  fn keywords_are_distinguished_from_identifiers() {
    let tokens = tokenize("while whilst od odd").unwrap();
    assert_eq!(
      tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
      vec![
        TokenKind::Keyword,
        TokenKind::Ident,
        TokenKind::Keyword,
        TokenKind::Ident,
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn assignment_is_one_token() {
    let src = "x := y = 1";
    let tokens = tokenize(src).unwrap();
    let texts: Vec<&str> = tokens[..tokens.len() - 1]
      .iter()
      .map(|t| token_text(t, src))
      .collect();
    assert_eq!(texts, vec!["x", ":=", "y", "=", "1"]);
  }

  #[test]
  fn logical_operators_lex_before_single_chars() {
    assert_eq!(
      kinds("a && b !! c"),
      vec![
        TokenKind::Ident,
        TokenKind::Punctuator,
        TokenKind::Ident,
        TokenKind::Punctuator,
        TokenKind::Ident,
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn numbers_carry_their_value() {
    let tokens = tokenize("write(120)").unwrap();
    let num = tokens.iter().find(|t| t.kind == TokenKind::Num).unwrap();
    assert_eq!(num.value, Some(120));
    assert_eq!(num.loc, 6);
    assert_eq!(num.len, 3);
  }

  #[test]
  fn stray_bang_is_rejected_with_position() {
    let err = tokenize("a ! b").unwrap_err();
    assert_eq!(err.to_string(), "invalid token: '!' at 1:3");
  }
}
