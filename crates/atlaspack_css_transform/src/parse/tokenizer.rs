use crate::css_syntax_error::CssSyntaxError;
use crate::input::InputRef;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
  Space,
  Word,
  String,
  AtWord,
  Brackets,
  Comment,
  OpenParenthesis,
  CloseParenthesis,
  OpenSquare,
  CloseSquare,
  OpenCurly,
  CloseCurly,
  Colon,
  Semicolon,
}

/// A lexeme of the input. `start` is the byte offset of its first character
/// and `end` the byte offset of its last one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub value: String,
  pub start: usize,
  pub end: usize,
}

const SINGLE_QUOTE: u8 = b'\'';
const DOUBLE_QUOTE: u8 = b'"';
const BACKSLASH: u8 = b'\\';
const SLASH: u8 = b'/';
const ASTERISK: u8 = b'*';
const FEED: u8 = 0x0c;

fn is_space(code: u8) -> bool {
  matches!(code, b' ' | b'\n' | b'\t' | b'\r' | FEED)
}

fn is_at_end(code: u8) -> bool {
  matches!(
    code,
    b'\t'
      | b'\n'
      | FEED
      | b'\r'
      | b' '
      | b'"'
      | b'#'
      | b'\''
      | b'('
      | b')'
      | b'/'
      | b';'
      | b'['
      | b'\\'
      | b']'
      | b'{'
      | b'}'
  )
}

fn is_word_end(code: u8) -> bool {
  matches!(
    code,
    b'\t'
      | b'\n'
      | FEED
      | b'\r'
      | b' '
      | b'!'
      | b'"'
      | b'#'
      | b'\''
      | b'('
      | b')'
      | b':'
      | b';'
      | b'@'
      | b'['
      | b'\\'
      | b']'
      | b'{'
      | b'}'
  )
}

fn is_bad_bracket(code: u8) -> bool {
  matches!(code, b'\r' | b'\n' | b'"' | b'\'' | b'(' | b'/' | b'\\')
}

/// Splits stylesheet text into tokens on demand.
pub struct Tokenizer {
  input: InputRef,
  pos: usize,
  returned: Vec<Token>,
  /// Word tokens seen so far, consulted by `(` to detect `url(`.
  words: Vec<String>,
}

impl Tokenizer {
  pub fn new(input: InputRef) -> Self {
    Self {
      input,
      pos: 0,
      returned: Vec::new(),
      words: Vec::new(),
    }
  }

  pub fn position(&self) -> usize {
    self.pos
  }

  pub fn end_of_file(&self) -> bool {
    self.returned.is_empty() && self.pos >= self.input.css().len()
  }

  /// Pushes a token back so the next call returns it again.
  pub fn back(&mut self, token: Token) {
    self.returned.push(token);
  }

  fn unclosed(&self, what: &str) -> CssSyntaxError {
    self.input.error(format!("Unclosed {what}"), self.pos, None)
  }

  /// Byte offset just past the character starting at `last`.
  fn char_end(&self, last: usize) -> usize {
    let css = self.input.css();
    css[last..]
      .chars()
      .next()
      .map_or(css.len(), |ch| last + ch.len_utf8())
  }

  /// Byte offset of the character that ends right before `exclusive`.
  fn last_char_start(&self, exclusive: usize) -> usize {
    let css = self.input.css();
    css[..exclusive]
      .char_indices()
      .next_back()
      .map_or(0, |(index, _)| index)
  }

  fn token(&mut self, kind: TokenKind, start: usize, exclusive: usize) -> Token {
    let token = Token {
      kind,
      value: self.input.css()[start..exclusive].to_string(),
      start,
      end: self.last_char_start(exclusive),
    };
    self.pos = exclusive;
    token
  }

  /// Index of the next unescaped `needle` after `from`.
  fn find_unescaped(&self, needle: u8, from: usize) -> Option<usize> {
    let bytes = self.input.css().as_bytes();
    let mut next = from;
    loop {
      next = next + 1 + bytes.get(next + 1..)?.iter().position(|byte| *byte == needle)?;
      let mut escaped = false;
      let mut escape_pos = next;
      while escape_pos > 0 && bytes[escape_pos - 1] == BACKSLASH {
        escape_pos -= 1;
        escaped = !escaped;
      }
      if !escaped {
        return Some(next);
      }
    }
  }

  pub fn next_token(&mut self) -> Result<Option<Token>, CssSyntaxError> {
    if let Some(token) = self.returned.pop() {
      return Ok(Some(token));
    }

    let input = self.input.clone();
    let css = input.css();
    let bytes = css.as_bytes();
    let pos = self.pos;
    let Some(&code) = bytes.get(pos) else {
      return Ok(None);
    };
    let byte_at = |index: usize| bytes.get(index).copied().unwrap_or(0);

    let token = match code {
      b' ' | b'\n' | b'\t' | b'\r' | FEED => {
        let mut next = pos + 1;
        while next < bytes.len() && is_space(bytes[next]) {
          next += 1;
        }
        self.token(TokenKind::Space, pos, next)
      }
      b'[' | b']' | b'{' | b'}' | b':' | b';' | b')' => {
        let kind = match code {
          b'[' => TokenKind::OpenSquare,
          b']' => TokenKind::CloseSquare,
          b'{' => TokenKind::OpenCurly,
          b'}' => TokenKind::CloseCurly,
          b':' => TokenKind::Colon,
          b';' => TokenKind::Semicolon,
          _ => TokenKind::CloseParenthesis,
        };
        self.token(kind, pos, pos + 1)
      }
      b'(' => {
        let prev = self.words.pop().unwrap_or_default();
        let next_code = byte_at(pos + 1);
        if prev == "url" && next_code != SINGLE_QUOTE && next_code != DOUBLE_QUOTE && !is_space(next_code) {
          match self.find_unescaped(b')', pos) {
            Some(next) => self.token(TokenKind::Brackets, pos, next + 1),
            None => return Err(self.unclosed("bracket")),
          }
        } else {
          match css[pos + 1..].find(')') {
            Some(index)
              if !bytes[pos + 1..=pos + 1 + index]
                .iter()
                .any(|byte| is_bad_bracket(*byte)) =>
            {
              self.token(TokenKind::Brackets, pos, pos + 2 + index)
            }
            _ => self.token(TokenKind::OpenParenthesis, pos, pos + 1),
          }
        }
      }
      SINGLE_QUOTE | DOUBLE_QUOTE => match self.find_unescaped(code, pos) {
        Some(next) => self.token(TokenKind::String, pos, next + 1),
        None => return Err(self.unclosed("string")),
      },
      b'@' => {
        let next = bytes[pos + 1..]
          .iter()
          .position(|byte| is_at_end(*byte))
          .map_or(bytes.len(), |index| pos + 1 + index);
        self.token(TokenKind::AtWord, pos, next)
      }
      BACKSLASH => {
        let mut next = pos;
        let mut escape = true;
        while byte_at(next + 1) == BACKSLASH {
          next += 1;
          escape = !escape;
        }
        let code = byte_at(next + 1);
        if escape && next + 1 < bytes.len() && code != SLASH && !is_space(code) {
          next += 1;
          if code.is_ascii_hexdigit() {
            while byte_at(next + 1).is_ascii_hexdigit() {
              next += 1;
            }
            if byte_at(next + 1) == b' ' {
              next += 1;
            }
          }
        }
        let exclusive = self.char_end(next);
        self.token(TokenKind::Word, pos, exclusive)
      }
      SLASH if byte_at(pos + 1) == ASTERISK => match css[pos + 2..].find("*/") {
        Some(index) => self.token(TokenKind::Comment, pos, pos + 2 + index + 2),
        None => return Err(self.unclosed("comment")),
      },
      _ => {
        let first = self.char_end(pos);
        let mut next = first;
        while next < bytes.len() {
          let code = bytes[next];
          if is_word_end(code) || (code == SLASH && byte_at(next + 1) == ASTERISK) {
            break;
          }
          next += 1;
        }
        let token = self.token(TokenKind::Word, pos, next);
        self.words.push(token.value.clone());
        token
      }
    };

    Ok(Some(token))
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::input::{Input, InputOptions};

  fn tokenize(css: &str) -> Vec<(TokenKind, String)> {
    let input = InputRef::new(Input::new(css, InputOptions::default()).unwrap());
    let mut tokenizer = Tokenizer::new(input);
    let mut tokens = Vec::new();
    while let Some(token) = tokenizer.next_token().unwrap() {
      tokens.push((token.kind, token.value));
    }
    tokens
  }

  #[test]
  fn splits_a_rule() {
    assert_eq!(
      tokenize("a { color: red }"),
      vec![
        (TokenKind::Word, "a".into()),
        (TokenKind::Space, " ".into()),
        (TokenKind::OpenCurly, "{".into()),
        (TokenKind::Space, " ".into()),
        (TokenKind::Word, "color".into()),
        (TokenKind::Colon, ":".into()),
        (TokenKind::Space, " ".into()),
        (TokenKind::Word, "red".into()),
        (TokenKind::Space, " ".into()),
        (TokenKind::CloseCurly, "}".into()),
      ]
    );
  }

  #[test]
  fn keeps_unquoted_urls_whole() {
    assert_eq!(
      tokenize("url(a;b)"),
      vec![
        (TokenKind::Word, "url".into()),
        (TokenKind::Brackets, "(a;b)".into()),
      ]
    );
    assert_eq!(
      tokenize("f(\"x\")"),
      vec![
        (TokenKind::Word, "f".into()),
        (TokenKind::OpenParenthesis, "(".into()),
        (TokenKind::String, "\"x\"".into()),
        (TokenKind::CloseParenthesis, ")".into()),
      ]
    );
  }

  #[test]
  fn reads_strings_comments_and_at_words() {
    assert_eq!(
      tokenize("@media'a\\'b'/* c */"),
      vec![
        (TokenKind::AtWord, "@media".into()),
        (TokenKind::String, "'a\\'b'".into()),
        (TokenKind::Comment, "/* c */".into()),
      ]
    );
  }

  #[test]
  fn words_stop_before_comments() {
    assert_eq!(
      tokenize("a/**/b"),
      vec![
        (TokenKind::Word, "a".into()),
        (TokenKind::Comment, "/**/".into()),
        (TokenKind::Word, "b".into()),
      ]
    );
  }

  #[test]
  fn hex_escapes_swallow_one_space() {
    assert_eq!(
      tokenize("\\31 a"),
      vec![(TokenKind::Word, "\\31 ".into()), (TokenKind::Word, "a".into())]
    );
  }

  #[test]
  fn multibyte_words_end_on_char_boundaries() {
    let input = InputRef::new(Input::new("é{", InputOptions::default()).unwrap());
    let mut tokenizer = Tokenizer::new(input);
    let word = tokenizer.next_token().unwrap().unwrap();

    assert_eq!((word.value.as_str(), word.start, word.end), ("é", 0, 0));
    assert_eq!(tokenizer.next_token().unwrap().unwrap().start, 2);
  }

  #[test]
  fn reports_unclosed_constructs() {
    for (css, reason) in [
      ("a 'b", "Unclosed string"),
      ("/* a", "Unclosed comment"),
      ("url(a", "Unclosed bracket"),
    ] {
      let input = InputRef::new(Input::new(css, InputOptions::default()).unwrap());
      let mut tokenizer = Tokenizer::new(input);
      let error = loop {
        match tokenizer.next_token() {
          Ok(Some(_)) => continue,
          Ok(None) => panic!("expected an error for {css}"),
          Err(error) => break error,
        }
      };
      assert_eq!(error.reason, reason);
    }
  }
}
