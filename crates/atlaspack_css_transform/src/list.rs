//! Splitting of comma and space separated values. Separators inside quotes,
//! parentheses, or after a backslash do not split.

/// Splits `value` on any of `separators`. With `last`, a trailing separator
/// yields a final empty item.
pub fn split(value: &str, separators: &[char], last: bool) -> Vec<String> {
  let mut items = Vec::new();
  let mut current = String::new();
  let mut depth = 0usize;
  let mut quote: Option<char> = None;
  let mut escaped = false;

  for ch in value.chars() {
    let mut separator = false;
    if escaped {
      escaped = false;
    } else if ch == '\\' {
      escaped = true;
    } else if let Some(open) = quote {
      if ch == open {
        quote = None;
      }
    } else if ch == '"' || ch == '\'' {
      quote = Some(ch);
    } else if ch == '(' {
      depth += 1;
    } else if ch == ')' {
      depth = depth.saturating_sub(1);
    } else if depth == 0 && separators.contains(&ch) {
      separator = true;
    }

    if separator {
      if !current.is_empty() {
        items.push(current.trim().to_string());
      }
      current.clear();
    } else {
      current.push(ch);
    }
  }

  if last || !current.is_empty() {
    items.push(current.trim().to_string());
  }
  items
}

pub fn comma(value: &str) -> Vec<String> {
  split(value, &[','], true)
}

pub fn space(value: &str) -> Vec<String> {
  split(value, &[' ', '\n', '\t'], false)
}

/// The list helpers as a value, handed to plugins through their helpers.
#[derive(Clone, Copy, Debug, Default)]
pub struct List;

impl List {
  pub fn comma(&self, value: &str) -> Vec<String> {
    comma(value)
  }

  pub fn space(&self, value: &str) -> Vec<String> {
    space(value)
  }

  pub fn split(&self, value: &str, separators: &[char], last: bool) -> Vec<String> {
    split(value, separators, last)
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn space_splits_and_trims() {
    assert_eq!(space(" a  b\nc "), vec!["a", "b", "c"]);
    assert_eq!(space("a\\ b"), vec!["a\\ b"]);
  }

  #[test]
  fn space_keeps_quotes_and_functions_together() {
    assert_eq!(space("\"a b\\\"\" ''"), vec!["\"a b\\\"\"", "''"]);
    assert_eq!(space("f( )) a( () )"), vec!["f( ))", "a( () )"]);
  }

  #[test]
  fn comma_keeps_trailing_empty_item() {
    assert_eq!(comma("a, b,"), vec!["a", "b", ""]);
    assert_eq!(comma("f(,)), a(,(),)"), vec!["f(,))", "a(,(),)"]);
    assert_eq!(comma("'a,b', \"c,d\""), vec!["'a,b'", "\"c,d\""]);
  }

  #[test]
  fn custom_separators() {
    assert_eq!(List.split("a|b|c", &['|'], false), vec!["a", "b", "c"]);
  }
}
