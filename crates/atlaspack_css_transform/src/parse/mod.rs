//! Reads stylesheet text into a [`Root`], keeping every piece of formatting
//! in node raws so that printing an unmodified tree reproduces the input.

mod tokenizer;

use thiserror::Error;

pub use tokenizer::{Token, TokenKind, Tokenizer};

use crate::ast::{
  Anchor, AtRule, Comment, Declaration, Node, NodeData, NodeHandle, NodeKind, NodeRef, RawValue,
  Root, Rule,
};
use crate::css_syntax_error::CssSyntaxError;
use crate::input::{Input, InputOptions, InputRef, Position};
use crate::source_map::{MapSetting, PreviousMapError};

#[derive(Debug, Error)]
pub enum ParseError {
  #[error(transparent)]
  PreviousMap(#[from] PreviousMapError),
  #[error(transparent)]
  Syntax(#[from] CssSyntaxError),
}

/// Parses `css`, naming it `from` in positions and errors.
pub fn parse(css: &str, from: Option<&str>) -> Result<Root, ParseError> {
  let input = Input::new(
    css,
    InputOptions {
      from: from.map(str::to_string),
      map: MapSetting::Auto,
    },
  )?;
  Ok(parse_input(InputRef::new(input))?)
}

#[tracing::instrument(level = "trace", skip_all, fields(input = %input.name()))]
pub fn parse_input(input: InputRef) -> Result<Root, CssSyntaxError> {
  Parser::new(input).parse()
}

fn is_space_or_comment(token: &Token) -> bool {
  matches!(token.kind, TokenKind::Space | TokenKind::Comment)
}

fn concat(tokens: &[Token]) -> String {
  tokens.iter().map(|token| token.value.as_str()).collect()
}

struct Parser {
  input: InputRef,
  tokenizer: Tokenizer,
  root: Root,
  current: NodeRef,
  spaces: String,
  semicolon: bool,
}

impl Parser {
  fn new(input: InputRef) -> Self {
    let root = Root::new();
    root.node().borrow_mut().source.input = Some(input.clone());
    root.node().borrow_mut().source.start = Some(Position::new(1, 1, 0));
    Self {
      tokenizer: Tokenizer::new(input.clone()),
      current: root.node().clone(),
      root,
      input,
      spaces: String::new(),
      semicolon: false,
    }
  }

  fn parse(mut self) -> Result<Root, CssSyntaxError> {
    while let Some(token) = self.tokenizer.next_token()? {
      match token.kind {
        TokenKind::Space => self.spaces.push_str(&token.value),
        TokenKind::Semicolon => self.free_semicolon(&token),
        TokenKind::CloseCurly => self.end(&token)?,
        TokenKind::Comment => self.comment(&token)?,
        TokenKind::AtWord => self.at_rule(&token)?,
        TokenKind::OpenCurly => self.empty_rule(&token)?,
        _ => self.other(token)?,
      }
    }
    self.end_file()?;
    Ok(self.root)
  }

  fn position(&self, offset: usize) -> Position {
    self.input.from_offset(offset)
  }

  /// Position of the character starting at `last`, with an offset just past it.
  fn end_position(&self, last: usize) -> Position {
    let mut position = self.input.from_offset(last);
    position.offset = self.input.css()[position.offset..]
      .chars()
      .next()
      .map_or(position.offset, |ch| position.offset + ch.len_utf8());
    position
  }

  fn set_end(&self, node: &NodeRef, last: usize) {
    node.borrow_mut().source.end = Some(self.end_position(last));
  }

  fn init(&mut self, node: &NodeRef, offset: usize) -> Result<(), CssSyntaxError> {
    {
      let mut node = node.borrow_mut();
      node.source.input = Some(self.input.clone());
      node.source.start = Some(self.position(offset));
      node.raws.set("before", std::mem::take(&mut self.spaces));
      if node.kind() != NodeKind::Comment {
        self.semicolon = false;
      }
    }
    Node::insert(&self.current, Anchor::End, vec![node.clone()])
      .map_err(|err| self.input.error(err.to_string(), offset, None))
  }

  fn comment(&mut self, token: &Token) -> Result<(), CssSyntaxError> {
    let node = Comment::new("");
    self.init(node.node(), token.start)?;
    self.set_end(node.node(), token.end);

    let inner = &token.value[2..token.value.len() - 2];
    let trimmed = inner.trim();
    if trimmed.is_empty() {
      node.set_raw("left", inner);
      node.set_raw("right", "");
    } else {
      let left = inner.len() - inner.trim_start().len();
      let right = inner.trim_end().len();
      node.set_text(trimmed);
      node.set_raw("left", &inner[..left]);
      node.set_raw("right", &inner[right..]);
    }
    Ok(())
  }

  fn empty_rule(&mut self, token: &Token) -> Result<(), CssSyntaxError> {
    let node = Rule::new("");
    self.init(node.node(), token.start)?;
    node.set_raw("between", "");
    self.current = node.node().clone();
    Ok(())
  }

  /// A run of tokens that turns out to be a declaration or a rule selector.
  fn other(&mut self, start: Token) -> Result<(), CssSyntaxError> {
    let custom_property = start.value.starts_with("--");
    let mut end = false;
    let mut colon = false;
    let mut bracket: Option<Token> = None;
    let mut brackets: Vec<TokenKind> = Vec::new();
    let mut tokens: Vec<Token> = Vec::new();

    let mut next = Some(start);
    while let Some(token) = next {
      let kind = token.kind;
      let closing = match kind {
        TokenKind::OpenParenthesis => Some(TokenKind::CloseParenthesis),
        TokenKind::OpenSquare => Some(TokenKind::CloseSquare),
        TokenKind::OpenCurly if custom_property && colon => Some(TokenKind::CloseCurly),
        _ => None,
      };
      tokens.push(token);

      if let Some(closing) = closing {
        if bracket.is_none() {
          bracket = tokens.last().cloned();
        }
        brackets.push(closing);
      } else if brackets.is_empty() {
        match kind {
          TokenKind::Semicolon if colon => return self.decl(tokens, custom_property),
          TokenKind::Semicolon => break,
          TokenKind::OpenCurly => return self.rule(tokens),
          TokenKind::CloseCurly => {
            if let Some(token) = tokens.pop() {
              self.tokenizer.back(token);
            }
            end = true;
            break;
          }
          TokenKind::Colon => colon = true,
          _ => {}
        }
      } else if brackets.last() == Some(&kind) {
        brackets.pop();
        if brackets.is_empty() {
          bracket = None;
        }
      }

      next = self.tokenizer.next_token()?;
    }

    if self.tokenizer.end_of_file() {
      end = true;
    }
    if let Some(bracket) = bracket.filter(|_| !brackets.is_empty()) {
      return Err(self.input.error("Unclosed bracket", bracket.start, None));
    }

    if end && colon {
      if !custom_property {
        while tokens.last().is_some_and(is_space_or_comment) {
          if let Some(token) = tokens.pop() {
            self.tokenizer.back(token);
          }
        }
      }
      return self.decl(tokens, custom_property);
    }
    Err(self.unknown_word(&tokens))
  }

  fn rule(&mut self, mut tokens: Vec<Token>) -> Result<(), CssSyntaxError> {
    tokens.pop();
    let node = Rule::new("");
    self.init(node.node(), tokens.first().map_or(0, |token| token.start))?;
    let between = spaces_and_comments_from_end(&mut tokens);
    node.set_raw("between", between);
    self.raw(node.node(), "selector", &tokens, false);
    self.current = node.node().clone();
    Ok(())
  }

  fn decl(&mut self, mut tokens: Vec<Token>, custom_property: bool) -> Result<(), CssSyntaxError> {
    let node = Declaration::new("", "");
    let start = tokens.first().map_or(0, |token| token.start);
    self.init(node.node(), start)?;

    if let Some(last) = tokens.last() {
      self.set_end(node.node(), last.end);
    }
    if tokens.last().is_some_and(|token| token.kind == TokenKind::Semicolon) {
      self.semicolon = true;
      tokens.pop();
    }

    let mut before = node.raw("before").text().to_string();
    while tokens.first().is_some_and(|token| token.kind != TokenKind::Word) {
      if tokens.len() == 1 {
        return Err(self.unknown_word(&tokens));
      }
      before.push_str(&tokens.remove(0).value);
    }
    if let Some(first) = tokens.first() {
      node.node().borrow_mut().source.start = Some(self.position(first.start));
    }

    let mut prop = String::new();
    while tokens
      .first()
      .is_some_and(|token| !matches!(token.kind, TokenKind::Colon | TokenKind::Space | TokenKind::Comment))
    {
      prop.push_str(&tokens.remove(0).value);
    }

    let mut between = String::new();
    while !tokens.is_empty() {
      let token = tokens.remove(0);
      if token.kind == TokenKind::Colon {
        between.push(':');
        break;
      }
      if token.kind == TokenKind::Word && token.value.bytes().any(|byte| byte.is_ascii_alphanumeric() || byte == b'_') {
        return Err(self.unknown_word(std::slice::from_ref(&token)));
      }
      between.push_str(&token.value);
    }

    if prop.starts_with('_') || prop.starts_with('*') {
      before.push_str(&prop[..1]);
      prop.remove(0);
    }
    node.set_raw("before", before);
    node.set_prop(prop);

    let mut first_spaces = Vec::new();
    while tokens.first().is_some_and(is_space_or_comment) {
      first_spaces.push(tokens.remove(0));
    }

    let mut index = tokens.len();
    while index > 0 {
      index -= 1;
      let kind = tokens[index].kind;
      let lower = tokens[index].value.to_ascii_lowercase();
      if lower == "!important" {
        node.set_important(true);
        let mut important = concat(&tokens.split_off(index));
        important.insert_str(0, &spaces_from_end(&mut tokens));
        if important != " !important" {
          node.set_raw("important", important);
        }
        break;
      } else if lower == "important" {
        let mut cache = tokens.clone();
        let mut important = String::new();
        for position in (1..=index).rev() {
          if important.trim().starts_with('!') && cache.get(position).is_some_and(|token| token.kind != TokenKind::Space) {
            break;
          }
          match cache.pop() {
            Some(token) => important.insert_str(0, &token.value),
            None => break,
          }
        }
        if important.trim().starts_with('!') {
          node.set_important(true);
          node.set_raw("important", important);
          tokens = cache;
        }
      }
      if kind != TokenKind::Space && kind != TokenKind::Comment {
        break;
      }
    }

    if tokens.iter().any(|token| !is_space_or_comment(token)) {
      between.push_str(&concat(&first_spaces));
      first_spaces.clear();
    }
    node.set_raw("between", between);

    first_spaces.extend(tokens.iter().cloned());
    self.raw(node.node(), "value", &first_spaces, custom_property);

    if !custom_property && node.value().contains(':') {
      self.check_missed_semicolon(&tokens)?;
    }
    Ok(())
  }

  fn at_rule(&mut self, token: &Token) -> Result<(), CssSyntaxError> {
    let name = &token.value[1..];
    if name.is_empty() {
      return Err(self.input.error(
        "At-rule without name",
        token.start,
        Some(token.end + 1),
      ));
    }
    let node = AtRule::new(name);
    self.init(node.node(), token.start)?;

    let mut last = false;
    let mut open = false;
    let mut params: Vec<Token> = Vec::new();
    let mut brackets: Vec<TokenKind> = Vec::new();

    while let Some(token) = self.tokenizer.next_token()? {
      let kind = token.kind;
      match kind {
        TokenKind::OpenParenthesis => brackets.push(TokenKind::CloseParenthesis),
        TokenKind::OpenSquare => brackets.push(TokenKind::CloseSquare),
        TokenKind::OpenCurly if !brackets.is_empty() => brackets.push(TokenKind::CloseCurly),
        _ if brackets.last() == Some(&kind) => {
          brackets.pop();
        }
        _ => {}
      }

      if brackets.is_empty() {
        match kind {
          TokenKind::Semicolon => {
            self.set_end(node.node(), token.start);
            self.semicolon = true;
            break;
          }
          TokenKind::OpenCurly => {
            open = true;
            break;
          }
          TokenKind::CloseCurly => {
            if let Some(prev) = params.iter().rev().find(|token| token.kind != TokenKind::Space) {
              self.set_end(node.node(), prev.end);
            }
            self.end(&token)?;
            break;
          }
          _ => params.push(token),
        }
      } else {
        params.push(token);
      }

      if self.tokenizer.end_of_file() {
        last = true;
        break;
      }
    }

    let between = spaces_and_comments_from_end(&mut params);
    if params.is_empty() {
      node.set_raw("between", between);
      node.set_raw("afterName", "");
    } else {
      node.set_raw("afterName", spaces_and_comments_from_start(&mut params));
      self.raw(node.node(), "params", &params, false);
      if last {
        if let Some(token) = params.last() {
          self.set_end(node.node(), token.end);
        }
        self.spaces = between;
        node.set_raw("between", "");
      } else {
        node.set_raw("between", between);
      }
    }

    if open {
      let node = node.with_block();
      self.current = node.node().clone();
    }
    Ok(())
  }

  fn end(&mut self, token: &Token) -> Result<(), CssSyntaxError> {
    self.close_current();
    let parent = self.current.borrow().parent();
    match parent {
      Some(parent) => {
        self.set_end(&self.current, token.start);
        self.current = parent;
        Ok(())
      }
      None => Err(self.input.error("Unexpected }", token.start, Some(token.start + 1))),
    }
  }

  fn end_file(&mut self) -> Result<(), CssSyntaxError> {
    if self.current.borrow().parent().is_some() {
      let start = self
        .current
        .borrow()
        .source
        .start
        .map_or(0, |position| position.offset);
      return Err(self.input.error("Unclosed block", start, None));
    }
    self.close_current();
    let end = self.position(self.tokenizer.position());
    self.root.node().borrow_mut().source.end = Some(end);
    Ok(())
  }

  /// Records the trailing whitespace and semicolon style of the open container.
  fn close_current(&mut self) {
    let mut current = self.current.borrow_mut();
    if !current.children().is_empty() {
      current.raws.set("semicolon", self.semicolon);
    }
    current.raws.push_text("after", &self.spaces);
    self.spaces.clear();
    self.semicolon = false;
  }

  fn free_semicolon(&mut self, token: &Token) {
    self.spaces.push_str(&token.value);
    let prev = self.current.borrow().children().last().cloned();
    let Some(prev) = prev else {
      return;
    };
    let mut prev = prev.borrow_mut();
    if prev.kind() == NodeKind::Rule && !prev.raws.contains("ownSemicolon") {
      prev.raws.set("ownSemicolon", std::mem::take(&mut self.spaces));
      prev.source.end = Some(self.end_position(token.start));
    }
  }

  /// Stores the cleaned text of `tokens` in `slot`, and the exact lexeme as a
  /// raw when cleaning dropped comments or trailing whitespace.
  fn raw(&self, node: &NodeRef, slot: &str, tokens: &[Token], custom_property: bool) {
    let mut value = String::new();
    let mut clean = true;
    for (index, token) in tokens.iter().enumerate() {
      match token.kind {
        TokenKind::Space if index == tokens.len() - 1 && !custom_property => clean = false,
        TokenKind::Comment => {
          let safe_neighbor = |token: Option<&Token>| token.map_or(true, |token| token.kind == TokenKind::Space);
          let prev = index.checked_sub(1).and_then(|prev| tokens.get(prev));
          if !safe_neighbor(prev) && !safe_neighbor(tokens.get(index + 1)) {
            if value.ends_with(',') {
              clean = false;
            } else {
              value.push_str(&token.value);
            }
          } else {
            clean = false;
          }
        }
        _ => value.push_str(&token.value),
      }
    }

    let mut node = node.borrow_mut();
    if !clean {
      node.raws.set(
        slot,
        RawValue::Value {
          value: value.clone(),
          raw: concat(tokens),
        },
      );
    }
    match (&mut node.data, slot) {
      (NodeData::Rule { selector }, "selector") => *selector = value,
      (NodeData::AtRule { params, .. }, "params") => *params = value,
      (NodeData::Declaration { value: target, .. }, "value") => *target = value,
      _ => {}
    }
  }

  /// Index of the first top-level colon, if any.
  fn colon(&self, tokens: &[Token]) -> Result<Option<usize>, CssSyntaxError> {
    let mut brackets = 0isize;
    let mut prev: Option<&Token> = None;
    for (index, token) in tokens.iter().enumerate() {
      match token.kind {
        TokenKind::OpenParenthesis => brackets += 1,
        TokenKind::CloseParenthesis => brackets -= 1,
        TokenKind::Colon if brackets == 0 => match prev {
          None => {
            return Err(self.input.error("Double colon", token.start, Some(token.start + 1)));
          }
          Some(prev) if prev.kind == TokenKind::Word && prev.value == "progid" => continue,
          Some(_) => return Ok(Some(index)),
        },
        _ => {}
      }
      prev = Some(token);
    }
    Ok(None)
  }

  fn check_missed_semicolon(&self, tokens: &[Token]) -> Result<(), CssSyntaxError> {
    let Some(colon) = self.colon(tokens)? else {
      return Ok(());
    };
    let mut founded = 0;
    let mut target = None;
    for token in tokens[..colon].iter().rev() {
      target = Some(token);
      if token.kind != TokenKind::Space {
        founded += 1;
        if founded == 2 {
          break;
        }
      }
    }
    let Some(target) = target else {
      return Ok(());
    };
    let offset = if target.kind == TokenKind::Word {
      target.end + 1
    } else {
      target.start
    };
    Err(self.input.error("Missed semicolon", offset, None))
  }

  fn unknown_word(&self, tokens: &[Token]) -> CssSyntaxError {
    match tokens.first() {
      Some(token) => self
        .input
        .error("Unknown word", token.start, Some(token.start + token.value.len())),
      None => self.input.error("Unknown word", 0, None),
    }
  }
}

fn spaces_and_comments_from_end(tokens: &mut Vec<Token>) -> String {
  let mut spaces = String::new();
  while tokens.last().is_some_and(is_space_or_comment) {
    if let Some(token) = tokens.pop() {
      spaces.insert_str(0, &token.value);
    }
  }
  spaces
}

fn spaces_and_comments_from_start(tokens: &mut Vec<Token>) -> String {
  let count = tokens.iter().take_while(|token| is_space_or_comment(token)).count();
  concat(&tokens.drain(..count).collect::<Vec<_>>())
}

fn spaces_from_end(tokens: &mut Vec<Token>) -> String {
  let mut spaces = String::new();
  while tokens.last().is_some_and(|token| token.kind == TokenKind::Space) {
    if let Some(token) = tokens.pop() {
      spaces.insert_str(0, &token.value);
    }
  }
  spaces
}
