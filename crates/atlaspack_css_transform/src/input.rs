use std::fmt;
use std::ops::Deref;
use std::path::Path;
use std::rc::Rc;

use once_cell::unsync::OnceCell;
use xxhash_rust::xxh3::xxh3_64;

use crate::css_syntax_error::CssSyntaxError;
use crate::source_map::{MapSetting, PreviousMap, PreviousMapError};

/// A point inside an [`Input`]. Lines and columns are 1-based and count
/// characters, the offset is a 0-based byte index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Position {
  pub line: u32,
  pub column: u32,
  pub offset: usize,
}

impl Position {
  pub fn new(line: u32, column: u32, offset: usize) -> Self {
    Self {
      line,
      column,
      offset,
    }
  }
}

#[derive(Clone, Debug, Default)]
pub struct InputOptions {
  /// Path of the stylesheet, used in errors, warnings and source maps.
  pub from: Option<String>,
  pub map: MapSetting,
}

/// Original stylesheet text, shared by every node parsed out of it.
pub struct Input {
  css: String,
  /// The `from` path, when one was given.
  pub file: Option<String>,
  /// Stable identifier for anonymous inputs, derived from their content.
  pub id: String,
  pub has_bom: bool,
  pub map: Option<PreviousMap>,
  line_starts: OnceCell<Vec<usize>>,
}

impl Input {
  pub fn new(css: impl Into<String>, options: InputOptions) -> Result<Self, PreviousMapError> {
    let mut css = css.into();
    let has_bom = css.starts_with('\u{FEFF}') || css.starts_with('\u{FFFE}');
    if has_bom {
      css.remove(0);
    }

    let id = format!("<input css {:08x}>", xxh3_64(css.as_bytes()) as u32);
    let map = PreviousMap::discover(&css, options.from.as_deref(), &options.map)?;

    Ok(Self {
      css,
      file: options.from,
      id,
      has_bom,
      map,
      line_starts: OnceCell::new(),
    })
  }

  pub fn css(&self) -> &str {
    &self.css
  }

  /// File path when known, otherwise the generated id.
  pub fn name(&self) -> &str {
    self.file.as_deref().unwrap_or(&self.id)
  }

  pub fn directory(&self) -> Option<&Path> {
    self
      .file
      .as_deref()
      .and_then(|file| Path::new(file).parent())
  }

  fn line_starts(&self) -> &[usize] {
    self.line_starts.get_or_init(|| {
      std::iter::once(0)
        .chain(
          self
            .css
            .bytes()
            .enumerate()
            .filter(|(_, byte)| *byte == b'\n')
            .map(|(index, _)| index + 1),
        )
        .collect()
    })
  }

  /// Maps a byte offset to its line and column. Offsets past the end clamp to
  /// the end of the text, offsets inside a multi-byte character snap back to
  /// its first byte.
  pub fn from_offset(&self, offset: usize) -> Position {
    let mut offset = offset.min(self.css.len());
    while !self.css.is_char_boundary(offset) {
      offset -= 1;
    }

    let starts = self.line_starts();
    let line_index = match starts.binary_search(&offset) {
      Ok(index) => index,
      Err(index) => index - 1,
    };
    let column = self.css[starts[line_index]..offset].chars().count() + 1;

    Position {
      line: line_index as u32 + 1,
      column: column as u32,
      offset,
    }
  }

  /// Byte offset of a 1-based line and column, the inverse of [`Input::from_offset`].
  pub fn offset_of(&self, line: u32, column: u32) -> usize {
    let starts = self.line_starts();
    let Some(start) = starts.get(line.saturating_sub(1) as usize).copied() else {
      return self.css.len();
    };
    self.css[start..]
      .char_indices()
      .nth(column.saturating_sub(1) as usize)
      .map(|(index, _)| start + index)
      .unwrap_or(self.css.len())
  }

  pub fn error(&self, message: impl Into<String>, start: usize, end: Option<usize>) -> CssSyntaxError {
    let start = self.from_offset(start);
    let end = end.map(|end| self.from_offset(end));
    CssSyntaxError::at(message, self, start, end)
  }
}

impl fmt::Debug for Input {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Input")
      .field("file", &self.file)
      .field("id", &self.id)
      .field("has_bom", &self.has_bom)
      .field("map", &self.map.is_some())
      .finish()
  }
}

/// Shared handle to an [`Input`]. Equality is identity.
#[derive(Clone, Debug)]
pub struct InputRef(Rc<Input>);

impl InputRef {
  pub fn new(input: Input) -> Self {
    InputRef(Rc::new(input))
  }

  pub fn ptr_eq(&self, other: &InputRef) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }
}

impl Deref for InputRef {
  type Target = Input;

  fn deref(&self) -> &Input {
    &self.0
  }
}

impl PartialEq for InputRef {
  fn eq(&self, other: &Self) -> bool {
    self.ptr_eq(other)
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn input(css: &str) -> Input {
    Input::new(css, InputOptions::default()).unwrap()
  }

  #[test]
  fn maps_offsets_to_lines_and_columns() {
    let input = input("a {\n  color: red;\n}\n");

    assert_eq!(input.from_offset(0), Position::new(1, 1, 0));
    assert_eq!(input.from_offset(6), Position::new(2, 3, 6));
    assert_eq!(input.from_offset(17), Position::new(2, 14, 17));
    assert_eq!(input.from_offset(18), Position::new(3, 1, 18));
    assert_eq!(input.from_offset(100), Position::new(4, 1, 20));
  }

  #[test]
  fn counts_columns_in_characters() {
    let input = input("a{content:\"é\"}");
    let position = input.from_offset(13);

    assert_eq!(position.column, 13);
    assert_eq!(input.offset_of(1, 13), 13);
  }

  #[test]
  fn strips_byte_order_mark() {
    let input = input("\u{FEFF}a{}");

    assert!(input.has_bom);
    assert_eq!(input.css(), "a{}");
  }

  #[test]
  fn anonymous_inputs_get_stable_ids() {
    let first = input("a{}");
    let second = input("a{}");

    assert_eq!(first.file, None);
    assert!(first.id.starts_with("<input css "));
    assert_eq!(first.id, second.id);
    assert_eq!(first.name(), first.id);
  }

  #[test]
  fn named_inputs_report_their_file() {
    let input = Input::new(
      "a{}",
      InputOptions {
        from: Some("styles/app.css".into()),
        ..Default::default()
      },
    )
    .unwrap();

    assert_eq!(input.name(), "styles/app.css");
    assert_eq!(input.directory(), Some(Path::new("styles")));
  }
}
