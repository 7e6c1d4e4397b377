use std::error::Error;
use std::fmt;

use crate::input::{Input, Position};

const CONTEXT_BEFORE: usize = 2;
const CONTEXT_AFTER: usize = 2;

/// A problem located in stylesheet text: malformed input found by the parser,
/// or an error a plugin raised through a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CssSyntaxError {
  pub reason: String,
  pub plugin: Option<String>,
  pub file: Option<String>,
  pub line: Option<u32>,
  pub column: Option<u32>,
  pub end_line: Option<u32>,
  pub end_column: Option<u32>,
  /// Text of the input, kept so the offending lines can be shown.
  pub css: Option<String>,
}

impl CssSyntaxError {
  /// An error without any location.
  pub fn new(reason: impl Into<String>) -> Self {
    Self {
      reason: reason.into(),
      plugin: None,
      file: None,
      line: None,
      column: None,
      end_line: None,
      end_column: None,
      css: None,
    }
  }

  pub fn at(reason: impl Into<String>, input: &Input, start: Position, end: Option<Position>) -> Self {
    Self {
      reason: reason.into(),
      plugin: None,
      file: Some(input.name().to_string()),
      line: Some(start.line),
      column: Some(start.column),
      end_line: end.map(|end| end.line),
      end_column: end.map(|end| end.column),
      css: Some(input.css().to_string()),
    }
  }

  pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
    self.plugin = Some(plugin.into());
    self
  }

  /// `plugin: file:line:column: reason`, leaving out what is unknown.
  pub fn message(&self) -> String {
    let mut message = String::new();
    if let Some(plugin) = &self.plugin {
      message.push_str(plugin);
      message.push_str(": ");
    }
    message.push_str(self.file.as_deref().unwrap_or("<css input>"));
    if let (Some(line), Some(column)) = (self.line, self.column) {
      message.push_str(&format!(":{line}:{column}"));
    }
    message.push_str(": ");
    message.push_str(&self.reason);
    message
  }

  /// Renders the lines around the error with a gutter and a caret under the
  /// reported column. Returns an empty string when there is nothing to show.
  pub fn show_source_code(&self, color: bool) -> String {
    let (Some(css), Some(line)) = (&self.css, self.line) else {
      return String::new();
    };
    let line = line as usize;
    let column = self.column.unwrap_or(1).max(1) as usize;

    let mark = |text: &str| {
      if color {
        format!("\u{1b}[1;31m{text}\u{1b}[0m")
      } else {
        text.to_string()
      }
    };
    let aside = |text: &str| {
      if color {
        format!("\u{1b}[90m{text}\u{1b}[0m")
      } else {
        text.to_string()
      }
    };

    let lines: Vec<&str> = css.split('\n').map(|line| line.trim_end_matches('\r')).collect();
    let first = line.saturating_sub(CONTEXT_BEFORE + 1);
    let last = (line + CONTEXT_AFTER).min(lines.len());
    if first >= last {
      return String::new();
    }
    let width = last.to_string().len();

    let carets = match (self.end_line, self.end_column) {
      (Some(end_line), Some(end_column)) if end_line as usize == line && end_column as usize > column => {
        end_column as usize - column
      }
      _ => 1,
    };

    let mut rendered = Vec::with_capacity(last - first);
    for (index, text) in lines[first..last].iter().enumerate() {
      let number = first + index + 1;
      let gutter = format!(" {number:>width$} | ");
      if number == line {
        let padding: String = text
          .chars()
          .take(column - 1)
          .map(|ch| if ch == '\t' { '\t' } else { ' ' })
          .collect();
        let blank_gutter: String = gutter
          .chars()
          .map(|ch| if ch.is_ascii_digit() { ' ' } else { ch })
          .collect();
        rendered.push(format!(
          "{}{}{}\n {}{}{}",
          mark(">"),
          aside(&gutter),
          text,
          aside(&blank_gutter),
          padding,
          mark(&"^".repeat(carets))
        ));
      } else {
        rendered.push(format!(" {}{}", aside(&gutter), text));
      }
    }
    rendered.join("\n")
  }
}

impl fmt::Display for CssSyntaxError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "CssSyntaxError: {}", self.message())?;
    let code = self.show_source_code(false);
    if !code.is_empty() {
      write!(f, "\n\n{code}\n")?;
    }
    Ok(())
  }
}

impl Error for CssSyntaxError {}
