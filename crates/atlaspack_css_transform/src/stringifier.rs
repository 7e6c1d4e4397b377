//! Turns a tree back into CSS text.
//!
//! Formatting comes from each node's raws. A missing raw is detected from
//! how other nodes in the same tree are formatted, and falls back to a fixed
//! default when the tree has no example either.

use std::collections::HashMap;

use crate::ast::{find_descendant, Node, NodeData, NodeKind, NodeRef, RawValue};

/// Marks fragments that open or close a block, so source maps can tell the
/// start of a node from its end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentRole {
  Start,
  End,
}

/// One piece of output, with the node it was produced for.
#[derive(Clone, Copy, Debug)]
pub struct Fragment<'a> {
  pub text: &'a str,
  pub node: Option<&'a NodeRef>,
  pub role: Option<FragmentRole>,
}

/// What to look for in the rest of the tree when a node lacks a raw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Detect<'a> {
  Before,
  After,
  BeforeClose,
  BeforeComment,
  BeforeDecl,
  BeforeOpen,
  BeforeRule,
  Colon,
  CommentLeft,
  CommentRight,
  EmptyBody,
  Indent,
  Semicolon,
  /// Any node's raw of this name.
  Slot(&'a str),
}

impl<'a> Detect<'a> {
  fn from_name(name: &'a str) -> Self {
    match name {
      "before" => Detect::Before,
      "after" => Detect::After,
      "beforeClose" => Detect::BeforeClose,
      "beforeComment" => Detect::BeforeComment,
      "beforeDecl" => Detect::BeforeDecl,
      "beforeOpen" => Detect::BeforeOpen,
      "beforeRule" => Detect::BeforeRule,
      "colon" => Detect::Colon,
      "commentLeft" => Detect::CommentLeft,
      "commentRight" => Detect::CommentRight,
      "emptyBody" => Detect::EmptyBody,
      "indent" => Detect::Indent,
      "semicolon" => Detect::Semicolon,
      other => Detect::Slot(other),
    }
  }

  fn key(&self) -> &'a str {
    match self {
      Detect::Before => "before",
      Detect::After => "after",
      Detect::BeforeClose => "beforeClose",
      Detect::BeforeComment => "beforeComment",
      Detect::BeforeDecl => "beforeDecl",
      Detect::BeforeOpen => "beforeOpen",
      Detect::BeforeRule => "beforeRule",
      Detect::Colon => "colon",
      Detect::CommentLeft => "commentLeft",
      Detect::CommentRight => "commentRight",
      Detect::EmptyBody => "emptyBody",
      Detect::Indent => "indent",
      Detect::Semicolon => "semicolon",
      Detect::Slot(name) => name,
    }
  }

  fn fallback(&self) -> RawValue {
    let text = match self {
      Detect::After
      | Detect::BeforeClose
      | Detect::BeforeComment
      | Detect::BeforeDecl
      | Detect::BeforeRule => "\n",
      Detect::BeforeOpen | Detect::CommentLeft | Detect::CommentRight => " ",
      Detect::Colon => ": ",
      Detect::Indent => "    ",
      Detect::Semicolon => return RawValue::Flag(false),
      Detect::Before | Detect::EmptyBody | Detect::Slot(_) => "",
    };
    RawValue::Text(text.to_string())
  }
}

fn whitespace_only(value: &str) -> String {
  value.chars().filter(|ch| ch.is_whitespace()).collect()
}

/// Keeps everything up to and including the last newline.
fn through_last_newline(value: &str) -> String {
  match value.rfind('\n') {
    Some(index) => value[..=index].to_string(),
    None => value.to_string(),
  }
}

fn own_text(node: &NodeRef, slot: &str) -> Option<String> {
  node.borrow().raws.text(slot).map(str::to_string)
}

pub struct Stringifier<'b> {
  builder: &'b mut dyn FnMut(Fragment<'_>),
  detected: HashMap<String, RawValue>,
}

impl<'b> Stringifier<'b> {
  pub fn new(builder: &'b mut dyn FnMut(Fragment<'_>)) -> Self {
    Self {
      builder,
      detected: HashMap::new(),
    }
  }

  fn emit(&mut self, text: &str, node: Option<&NodeRef>, role: Option<FragmentRole>) {
    (self.builder)(Fragment { text, node, role });
  }

  pub fn stringify(&mut self, node: &NodeRef, semicolon: bool) {
    let kind = node.borrow().kind();
    match kind {
      NodeKind::Root => self.root(node),
      NodeKind::AtRule => self.at_rule(node, semicolon),
      NodeKind::Rule => self.rule(node),
      NodeKind::Declaration => self.decl(node, semicolon),
      NodeKind::Comment => self.comment(node),
    }
  }

  fn root(&mut self, node: &NodeRef) {
    self.body(node);
    if let Some(after) = own_text(node, "after").filter(|after| !after.is_empty()) {
      self.emit(&after, None, None);
    }
  }

  fn rule(&mut self, node: &NodeRef) {
    let selector = raw_value(node, "selector");
    self.block(node, &selector);
    if let Some(own) = own_text(node, "ownSemicolon").filter(|own| !own.is_empty()) {
      self.emit(&own, Some(node), Some(FragmentRole::End));
    }
  }

  fn at_rule(&mut self, node: &NodeRef, semicolon: bool) {
    let (mut start, has_params, has_block) = {
      let node = node.borrow();
      match &node.data {
        NodeData::AtRule { name, params } => (format!("@{name}"), !params.is_empty(), node.has_block()),
        _ => return,
      }
    };
    let params = if has_params {
      raw_value(node, "params")
    } else {
      String::new()
    };
    match own_text(node, "afterName") {
      Some(after_name) => start.push_str(&after_name),
      None if !params.is_empty() => start.push(' '),
      None => {}
    }
    start.push_str(&params);

    if has_block {
      self.block(node, &start);
    } else {
      start.push_str(&own_text(node, "between").unwrap_or_default());
      if semicolon {
        start.push(';');
      }
      self.emit(&start, Some(node), None);
    }
  }

  fn decl(&mut self, node: &NodeRef, semicolon: bool) {
    let (prop, important) = match &node.borrow().data {
      NodeData::Declaration { prop, important, .. } => (prop.clone(), *important),
      _ => return,
    };
    let between = self.raw(node, Some("between"), Detect::Colon);
    let mut text = prop;
    text.push_str(between.text());
    text.push_str(&raw_value(node, "value"));
    if important {
      text.push_str(&own_text(node, "important").unwrap_or_else(|| " !important".to_string()));
    }
    if semicolon {
      text.push(';');
    }
    self.emit(&text, Some(node), None);
  }

  fn comment(&mut self, node: &NodeRef) {
    let text = match &node.borrow().data {
      NodeData::Comment { text } => text.clone(),
      _ => return,
    };
    let left = self.raw(node, Some("left"), Detect::CommentLeft);
    let right = self.raw(node, Some("right"), Detect::CommentRight);
    let out = format!("/*{}{}{}*/", left.text(), text, right.text());
    self.emit(&out, Some(node), None);
  }

  fn block(&mut self, node: &NodeRef, start: &str) {
    let between = self.raw(node, Some("between"), Detect::BeforeOpen);
    let open = format!("{start}{}{{", between.text());
    self.emit(&open, Some(node), Some(FragmentRole::Start));

    let has_children = !node.borrow().children().is_empty();
    let after = if has_children {
      self.body(node);
      self.raw(node, Some("after"), Detect::After)
    } else {
      self.raw(node, Some("after"), Detect::EmptyBody)
    };
    if !after.text().is_empty() {
      self.emit(after.text(), None, None);
    }
    self.emit("}", Some(node), Some(FragmentRole::End));
  }

  fn body(&mut self, node: &NodeRef) {
    let children = node.borrow().children().to_vec();
    // Trailing comments do not take the last declaration's semicolon.
    let mut last = children.len().saturating_sub(1);
    while last > 0 && children[last].borrow().kind() == NodeKind::Comment {
      last -= 1;
    }
    let semicolon = self.raw(node, Some("semicolon"), Detect::Semicolon).is_truthy();
    for (index, child) in children.iter().enumerate() {
      let before = self.raw(child, Some("before"), Detect::Before);
      if !before.text().is_empty() {
        self.emit(before.text(), None, None);
      }
      self.stringify(child, index != last || semicolon);
    }
  }

  fn raw(&mut self, node: &NodeRef, own: Option<&str>, detect: Detect<'_>) -> RawValue {
    if let Some(value) = own.and_then(|own| node.borrow().raws.get(own).cloned()) {
      return value;
    }

    let parent = node.borrow().parent();
    if detect == Detect::Before {
      let first_in_root = parent.as_ref().is_some_and(|parent| {
        let parent = parent.borrow();
        parent.kind() == NodeKind::Root
          && parent
            .children()
            .first()
            .is_some_and(|first| std::rc::Rc::ptr_eq(first, node))
      });
      if parent.is_none() || first_in_root {
        return RawValue::Text(String::new());
      }
    }
    if parent.is_none() {
      return detect.fallback();
    }

    if let Detect::Before | Detect::After = detect {
      return self.before_after(node, detect);
    }
    if let Some(cached) = self.detected.get(detect.key()) {
      return cached.clone();
    }

    let root = Node::root_of(node);
    let value = match detect {
      Detect::BeforeDecl => Some(self.detect_before_decl(&root, node)),
      Detect::BeforeComment => Some(self.detect_before_comment(&root, node)),
      Detect::BeforeRule => detect_before_rule(&root),
      Detect::BeforeClose => detect_before_close(&root),
      Detect::BeforeOpen => detect_before_open(&root),
      Detect::Colon => detect_colon(&root),
      Detect::EmptyBody => detect_empty_body(&root),
      Detect::Indent => detect_indent(&root),
      Detect::Semicolon => detect_semicolon(&root),
      Detect::CommentLeft | Detect::CommentRight | Detect::Slot(_) => own.and_then(|own| {
        find_descendant(&root, &mut |candidate| {
          candidate.borrow().raws.get(own).cloned()
        })
      }),
      Detect::Before | Detect::After => None,
    }
    .unwrap_or_else(|| detect.fallback());

    self.detected.insert(detect.key().to_string(), value.clone());
    value
  }

  fn raw_text(&mut self, node: &NodeRef, detect: Detect<'_>) -> String {
    self.raw(node, None, detect).text().to_string()
  }

  fn before_after(&mut self, node: &NodeRef, detect: Detect<'_>) -> RawValue {
    let kind = node.borrow().kind();
    let mut value = match kind {
      NodeKind::Declaration => self.raw_text(node, Detect::BeforeDecl),
      NodeKind::Comment => self.raw_text(node, Detect::BeforeComment),
      _ if detect == Detect::Before => self.raw_text(node, Detect::BeforeRule),
      _ => self.raw_text(node, Detect::BeforeClose),
    };

    if value.contains('\n') {
      let indent = self.raw_text(node, Detect::Indent);
      if !indent.is_empty() {
        for _ in 0..Node::depth(node) {
          value.push_str(&indent);
        }
      }
    }
    RawValue::Text(value)
  }

  fn detect_before_decl(&mut self, root: &NodeRef, node: &NodeRef) -> RawValue {
    let found = find_descendant(root, &mut |candidate| {
      let candidate = candidate.borrow();
      if candidate.kind() != NodeKind::Declaration {
        return None;
      }
      candidate.raws.text("before").map(str::to_string)
    });
    match found {
      Some(before) => RawValue::Text(whitespace_only(&through_last_newline(&before))),
      None => self.raw(node, None, Detect::BeforeRule),
    }
  }

  fn detect_before_comment(&mut self, root: &NodeRef, node: &NodeRef) -> RawValue {
    let found = find_descendant(root, &mut |candidate| {
      let candidate = candidate.borrow();
      if candidate.kind() != NodeKind::Comment {
        return None;
      }
      candidate.raws.text("before").map(str::to_string)
    });
    match found {
      Some(before) => RawValue::Text(whitespace_only(&through_last_newline(&before))),
      None => self.raw(node, None, Detect::BeforeDecl),
    }
  }
}

/// Current text of a value slot, printed through its raw lexeme when the
/// value has not changed since parsing.
fn raw_value(node: &NodeRef, slot: &str) -> String {
  let node = node.borrow();
  let current = match (&node.data, slot) {
    (NodeData::Declaration { value, .. }, "value") => value.as_str(),
    (NodeData::Rule { selector }, "selector") => selector.as_str(),
    (NodeData::AtRule { params, .. }, "params") => params.as_str(),
    _ => "",
  };
  node
    .raws
    .lexeme_for(slot, current)
    .unwrap_or(current)
    .to_string()
}

fn detect_before_rule(root: &NodeRef) -> Option<RawValue> {
  let first = root.borrow().children().first().cloned();
  find_descendant(root, &mut |candidate| {
    let node = candidate.borrow();
    let is_first_in_root = first
      .as_ref()
      .is_some_and(|first| std::rc::Rc::ptr_eq(first, candidate));
    if !node.has_block() || is_first_in_root {
      return None;
    }
    node.raws.text("before").map(through_last_newline)
  })
  .map(|before| RawValue::Text(whitespace_only(&before)))
}

fn detect_before_close(root: &NodeRef) -> Option<RawValue> {
  find_descendant(root, &mut |candidate| {
    let node = candidate.borrow();
    if node.children().is_empty() {
      return None;
    }
    node.raws.text("after").map(through_last_newline)
  })
  .map(|after| RawValue::Text(whitespace_only(&after)))
}

fn detect_before_open(root: &NodeRef) -> Option<RawValue> {
  find_descendant(root, &mut |candidate| {
    let node = candidate.borrow();
    if node.kind() == NodeKind::Declaration {
      return None;
    }
    node.raws.get("between").cloned()
  })
}

fn detect_colon(root: &NodeRef) -> Option<RawValue> {
  find_descendant(root, &mut |candidate| {
    let node = candidate.borrow();
    if node.kind() != NodeKind::Declaration {
      return None;
    }
    node.raws.text("between").map(|between| {
      RawValue::Text(
        between
          .chars()
          .filter(|ch| ch.is_whitespace() || *ch == ':')
          .collect(),
      )
    })
  })
}

fn detect_empty_body(root: &NodeRef) -> Option<RawValue> {
  find_descendant(root, &mut |candidate| {
    let node = candidate.borrow();
    if !node.has_block() || !node.children().is_empty() {
      return None;
    }
    node.raws.get("after").cloned()
  })
}

fn detect_indent(root: &NodeRef) -> Option<RawValue> {
  if let Some(indent) = own_text(root, "indent").filter(|indent| !indent.is_empty()) {
    return Some(RawValue::Text(indent));
  }
  find_descendant(root, &mut |candidate| {
    let node = candidate.borrow();
    let grandparent_is_root = node
      .parent()
      .filter(|parent| !std::rc::Rc::ptr_eq(parent, root))
      .and_then(|parent| parent.borrow().parent())
      .is_some_and(|grandparent| std::rc::Rc::ptr_eq(&grandparent, root));
    if !grandparent_is_root {
      return None;
    }
    node.raws.text("before").map(|before| {
      let last_line = before.rsplit('\n').next().unwrap_or_default();
      RawValue::Text(whitespace_only(last_line))
    })
  })
}

fn detect_semicolon(root: &NodeRef) -> Option<RawValue> {
  find_descendant(root, &mut |candidate| {
    let node = candidate.borrow();
    let ends_with_decl = node
      .children()
      .last()
      .is_some_and(|last| last.borrow().kind() == NodeKind::Declaration);
    if !ends_with_decl {
      return None;
    }
    node.raws.get("semicolon").cloned()
  })
}

/// Serializes `node` and everything below it.
pub fn stringify(node: &NodeRef) -> String {
  let mut css = String::new();
  stringify_with(node, |fragment| css.push_str(fragment.text));
  css
}

/// Serializes `node`, handing each fragment to `builder` in output order.
pub fn stringify_with(node: &NodeRef, mut builder: impl FnMut(Fragment<'_>)) {
  let mut stringifier = Stringifier::new(&mut builder);
  stringifier.stringify(node, false);
}

/// Formatting `node` would be printed with for `own`, detecting it as
/// `detect` when the node has no such raw.
pub fn resolve_raw(node: &NodeRef, own: &str, detect: &str) -> RawValue {
  let mut ignore = |_: Fragment<'_>| {};
  let mut stringifier = Stringifier::new(&mut ignore);
  stringifier.raw(node, Some(own), Detect::from_name(detect))
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::ast::{AtRule, Comment, Container, Declaration, NodeHandle, Root, Rule};
  use crate::parse::parse;

  fn round_trip(css: &str) -> String {
    stringify(parse(css, None).unwrap().node())
  }

  #[test]
  fn reproduces_parsed_input() {
    let cases = [
      "a{color:red}",
      "a {\n  color: red;\n}\n",
      "@media screen and (min-width: 100px) {\n  a { color : red !important ; }\n}",
      "@import url(foo.css);\n/* c */\n",
      "a{}\n\n\nb { }",
      "a { b: c /* x */ d }",
      "  @charset \"utf-8\";a{;}",
      ":root{--x: { a: b };}",
    ];
    for css in cases {
      assert_eq!(round_trip(css), css);
    }
  }

  #[test]
  fn appended_declaration_follows_sibling_style() {
    let root = parse("a{color:red}", None).unwrap();
    let rule = root.first().unwrap();
    rule.append(Declaration::new("margin", "0")).unwrap();

    assert_eq!(root.to_css(), "a{color:red;margin:0}");
  }

  #[test]
  fn removing_only_child_keeps_block_formatting() {
    let root = parse("a {\n  color: red;\n}", None).unwrap();
    root.walk_decls(|decl, _| {
      decl.remove();
      true
    });

    assert_eq!(root.to_css(), "a {\n}");
  }

  #[test]
  fn built_tree_uses_defaults() {
    let root = Root::new();
    let rule = Rule::new("a");
    rule.append(Declaration::new("color", "red")).unwrap();
    root.append(&rule).unwrap();
    root.append(AtRule::new("media").with_params("print").with_block()).unwrap();
    root.append(Comment::new("note")).unwrap();

    assert_eq!(
      root.to_css(),
      "a {\n    color: red\n}\n@media print {}\n/* note */"
    );
  }

  #[test]
  fn changed_value_drops_raw_lexeme() {
    let root = parse("a{color:red/**/ ;}", None).unwrap();
    let mut decls = Vec::new();
    root.walk_decls(|decl, _| {
      decls.push(decl);
      true
    });

    assert_eq!(root.to_css(), "a{color:red/**/ ;}");
    decls[0].set_value("blue");
    assert_eq!(root.to_css(), "a{color:blue;}");
  }

  #[test]
  fn emits_start_and_end_fragments_for_blocks() {
    let root = parse("a{b:c}", None).unwrap();
    let mut roles = Vec::new();
    stringify_with(root.node(), |fragment| {
      roles.push((fragment.text.to_string(), fragment.role));
    });

    assert_eq!(
      roles,
      vec![
        ("a{".to_string(), Some(FragmentRole::Start)),
        ("b:c".to_string(), None),
        ("}".to_string(), Some(FragmentRole::End)),
      ]
    );
  }

  #[test]
  fn detects_indentation_from_nested_nodes() {
    let root = parse("a {\n\tcolor: red;\n}", None).unwrap();
    let rule = root.first().unwrap();

    assert_eq!(rule.raw("indent").text(), "\t");
    assert_eq!(
      Declaration::new("x", "y").raw("before").text(),
      "",
      "detached nodes have no leading whitespace"
    );
  }
}
