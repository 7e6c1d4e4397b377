use std::fmt;
use std::rc::Rc;

use super::{
  for_each_child, walk_descendants, Anchor, CursorMode, Node, NodeData, NodeKind, NodeRef, RawValue,
  Raws, Source, TreeError,
};
use crate::css_syntax_error::CssSyntaxError;
use crate::input::{InputRef, Position};
use crate::list;
use crate::result::{TransformResult, Warning, WarningOptions};
use crate::stringifier;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CloneOptions {
  /// Drop source positions from the copy.
  pub strip_source: bool,
  /// Drop `before`, `after` and `between` raws from the copy.
  pub clean_raws: bool,
}

/// Behavior shared by every node handle.
pub trait NodeHandle {
  fn node(&self) -> &NodeRef;

  fn kind(&self) -> NodeKind {
    self.node().borrow().kind()
  }

  /// Identity comparison.
  fn same_node(&self, other: &impl NodeHandle) -> bool
  where
    Self: Sized,
  {
    Rc::ptr_eq(self.node(), other.node())
  }

  fn parent(&self) -> Option<AnyNode> {
    let parent = self.node().borrow().parent();
    parent.map(AnyNode::from_node)
  }

  /// The topmost ancestor, or the node itself when it has no parent.
  fn root(&self) -> AnyNode {
    AnyNode::from_node(Node::root_of(self.node()))
  }

  /// Ancestors from the parent up to the root.
  fn ancestors(&self) -> Vec<AnyNode> {
    let mut ancestors = Vec::new();
    let mut current = self.node().borrow().parent();
    while let Some(parent) = current {
      current = parent.borrow().parent();
      ancestors.push(AnyNode::from_node(parent));
    }
    ancestors
  }

  fn index(&self) -> Option<usize> {
    Node::position_in_parent(self.node()).map(|(_, index)| index)
  }

  fn next(&self) -> Option<AnyNode> {
    let (parent, index) = Node::position_in_parent(self.node())?;
    let sibling = parent.borrow().children().get(index + 1).cloned();
    sibling.map(AnyNode::from_node)
  }

  fn prev(&self) -> Option<AnyNode> {
    let (parent, index) = Node::position_in_parent(self.node())?;
    let sibling = parent.borrow().children().get(index.checked_sub(1)?).cloned();
    sibling.map(AnyNode::from_node)
  }

  /// Inserts a sibling right before this node.
  fn before(&self, node: impl Into<NodeRef>) -> Result<(), TreeError>
  where
    Self: Sized,
  {
    let parent = self.node().borrow().parent().ok_or(TreeError::Detached)?;
    Node::insert(&parent, Anchor::Before(self.node().clone()), vec![node.into()])
  }

  /// Inserts a sibling right after this node.
  fn after(&self, node: impl Into<NodeRef>) -> Result<(), TreeError>
  where
    Self: Sized,
  {
    let parent = self.node().borrow().parent().ok_or(TreeError::Detached)?;
    Node::insert(&parent, Anchor::After(self.node().clone()), vec![node.into()])
  }

  fn replace_with<N: Into<NodeRef>>(&self, nodes: impl IntoIterator<Item = N>) -> Result<(), TreeError>
  where
    Self: Sized,
  {
    Node::replace(self.node(), nodes.into_iter().map(Into::into).collect())
  }

  /// Detaches the node. Returns whether it had a parent.
  fn remove(&self) -> bool {
    Node::detach(self.node())
  }

  /// Moves the node to the end of `container`, dropping formatting that
  /// belonged to its old position.
  fn move_to(&self, container: &impl Container) -> Result<(), TreeError>
  where
    Self: Sized,
  {
    let same_root = Rc::ptr_eq(&Node::root_of(self.node()), &Node::root_of(container.node()));
    if Node::is_inclusive_ancestor(self.node(), container.node()) {
      return Err(TreeError::Cycle);
    }
    Node::clean_raws(self.node(), same_root);
    Node::insert(container.node(), Anchor::End, vec![self.node().clone()])
  }

  fn clean_raws(&self, keep_between: bool) {
    Node::clean_raws(self.node(), keep_between);
  }

  fn to_css(&self) -> String {
    stringifier::stringify(self.node())
  }

  /// Formatting for `slot` as the stringifier would print it: the node's own
  /// raw, else a value detected from the rest of the tree, else a default.
  fn raw(&self, slot: &str) -> RawValue {
    stringifier::resolve_raw(self.node(), slot, slot)
  }

  fn raws(&self) -> Raws {
    self.node().borrow().raws.clone()
  }

  fn set_raw(&self, slot: &str, value: impl Into<RawValue>)
  where
    Self: Sized,
  {
    self.node().borrow_mut().raws.set(slot, value);
  }

  fn source(&self) -> Source {
    self.node().borrow().source.clone()
  }

  fn set_source(&self, source: Source) {
    self.node().borrow_mut().source = source;
  }

  fn source_start(&self) -> Option<Position> {
    self.node().borrow().source.start
  }

  fn source_end(&self) -> Option<Position> {
    self.node().borrow().source.end
  }

  fn input(&self) -> Option<InputRef> {
    self.node().borrow().source.input.clone()
  }

  /// An error pointing at this node's source range, or an unlocated error
  /// when the node was built in code.
  fn error(&self, message: impl Into<String>) -> CssSyntaxError
  where
    Self: Sized,
  {
    let node = self.node().borrow();
    match (&node.source.input, node.source.start) {
      (Some(input), Some(start)) => {
        let end = node.source.end.map(|end| Position {
          column: end.column + 1,
          ..end
        });
        CssSyntaxError::at(message, input, start, end)
      }
      _ => CssSyntaxError::new(message),
    }
  }

  /// Records a warning on `result` located at this node.
  fn warn(&self, result: &mut TransformResult, text: impl Into<String>) -> Warning
  where
    Self: Sized,
  {
    result.warn(text, WarningOptions::default().node(self))
  }
}

/// A handle whose node kind is known statically.
pub trait TypedNode: NodeHandle + Clone + Sized {
  const KIND: NodeKind;

  /// Wraps `node` without checking its kind.
  fn wrap(node: NodeRef) -> Self;

  fn from_node(node: NodeRef) -> Option<Self> {
    let kind = node.borrow().kind();
    (kind == Self::KIND).then(|| Self::wrap(node))
  }

  fn clone_node(&self) -> Self {
    self.clone_with(CloneOptions::default())
  }

  fn clone_with(&self, options: CloneOptions) -> Self {
    Self::wrap(Node::deep_clone(self.node(), options))
  }

  /// Clones the node and inserts the copy right before it.
  fn clone_before(&self) -> Result<Self, TreeError> {
    let copy = self.clone_node();
    self.before(copy.node().clone())?;
    Ok(copy)
  }

  /// Clones the node and inserts the copy right after it.
  fn clone_after(&self) -> Result<Self, TreeError> {
    let copy = self.clone_node();
    self.after(copy.node().clone())?;
    Ok(copy)
  }

  fn with_source(self, source: Source) -> Self {
    self.set_source(source);
    self
  }

  fn with_raw(self, slot: &str, value: impl Into<RawValue>) -> Self {
    self.set_raw(slot, value);
    self
  }
}

/// Nodes that own an ordered child list.
pub trait Container: TypedNode {
  fn nodes(&self) -> Vec<AnyNode> {
    let children = self.node().borrow().children().to_vec();
    children.into_iter().map(AnyNode::from_node).collect()
  }

  fn len(&self) -> usize {
    self.node().borrow().children().len()
  }

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn first(&self) -> Option<AnyNode> {
    let first = self.node().borrow().children().first().cloned();
    first.map(AnyNode::from_node)
  }

  fn last(&self) -> Option<AnyNode> {
    let last = self.node().borrow().children().last().cloned();
    last.map(AnyNode::from_node)
  }

  fn child_at(&self, index: usize) -> Option<AnyNode> {
    let child = self.node().borrow().children().get(index).cloned();
    child.map(AnyNode::from_node)
  }

  fn index_of(&self, child: &impl NodeHandle) -> Option<usize> {
    Node::index_of(self.node(), child.node())
  }

  fn append(&self, node: impl Into<NodeRef>) -> Result<(), TreeError> {
    Node::insert(self.node(), Anchor::End, vec![node.into()])
  }

  fn append_all<N: Into<NodeRef>>(&self, nodes: impl IntoIterator<Item = N>) -> Result<(), TreeError> {
    Node::insert(
      self.node(),
      Anchor::End,
      nodes.into_iter().map(Into::into).collect(),
    )
  }

  fn prepend(&self, node: impl Into<NodeRef>) -> Result<(), TreeError> {
    Node::insert(self.node(), Anchor::Start, vec![node.into()])
  }

  fn prepend_all<N: Into<NodeRef>>(&self, nodes: impl IntoIterator<Item = N>) -> Result<(), TreeError> {
    Node::insert(
      self.node(),
      Anchor::Start,
      nodes.into_iter().map(Into::into).collect(),
    )
  }

  fn insert_before(&self, reference: &impl NodeHandle, node: impl Into<NodeRef>) -> Result<(), TreeError> {
    Node::insert(
      self.node(),
      Anchor::Before(reference.node().clone()),
      vec![node.into()],
    )
  }

  fn insert_after(&self, reference: &impl NodeHandle, node: impl Into<NodeRef>) -> Result<(), TreeError> {
    Node::insert(
      self.node(),
      Anchor::After(reference.node().clone()),
      vec![node.into()],
    )
  }

  fn remove_child(&self, child: &impl NodeHandle) -> Result<(), TreeError> {
    let index = Node::index_of(self.node(), child.node()).ok_or(TreeError::NotAChild)?;
    Node::remove_child_at(self.node(), index);
    Ok(())
  }

  fn remove_all(&self) {
    Node::clear_children(self.node());
  }

  /// Visits direct children. Children added or removed by `visit` are
  /// handled without skipping or repeating the others. Returning `false`
  /// stops the iteration, which is reported by returning `false`.
  fn each(&self, mut visit: impl FnMut(AnyNode, usize) -> bool) -> bool {
    for_each_child(self.node(), CursorMode::Sequential, &mut |child, index| {
      visit(AnyNode::from_node(child), index)
    })
  }

  /// Visits every descendant in document order.
  fn walk(&self, mut visit: impl FnMut(AnyNode, usize) -> bool) -> bool {
    walk_descendants(self.node(), &mut |child, index| {
      visit(AnyNode::from_node(child), index)
    })
  }

  fn walk_decls(&self, mut visit: impl FnMut(Declaration, usize) -> bool) -> bool {
    self.walk(|node, index| match node {
      AnyNode::Declaration(decl) => visit(decl, index),
      _ => true,
    })
  }

  /// Like [`Container::walk_decls`], limited to one property name.
  fn walk_decls_named(&self, prop: &str, mut visit: impl FnMut(Declaration, usize) -> bool) -> bool {
    self.walk_decls(|decl, index| {
      if decl.prop() == prop {
        visit(decl, index)
      } else {
        true
      }
    })
  }

  fn walk_rules(&self, mut visit: impl FnMut(Rule, usize) -> bool) -> bool {
    self.walk(|node, index| match node {
      AnyNode::Rule(rule) => visit(rule, index),
      _ => true,
    })
  }

  fn walk_at_rules(&self, mut visit: impl FnMut(AtRule, usize) -> bool) -> bool {
    self.walk(|node, index| match node {
      AnyNode::AtRule(at_rule) => visit(at_rule, index),
      _ => true,
    })
  }

  /// Like [`Container::walk_at_rules`], limited to one at-rule name.
  fn walk_at_rules_named(&self, name: &str, mut visit: impl FnMut(AtRule, usize) -> bool) -> bool {
    self.walk_at_rules(|at_rule, index| {
      if at_rule.name() == name {
        visit(at_rule, index)
      } else {
        true
      }
    })
  }

  fn walk_comments(&self, mut visit: impl FnMut(Comment, usize) -> bool) -> bool {
    self.walk(|node, index| match node {
      AnyNode::Comment(comment) => visit(comment, index),
      _ => true,
    })
  }

  fn every(&self, mut predicate: impl FnMut(&AnyNode) -> bool) -> bool {
    self.nodes().iter().all(|node| predicate(node))
  }

  fn some(&self, mut predicate: impl FnMut(&AnyNode) -> bool) -> bool {
    self.nodes().iter().any(|node| predicate(node))
  }
}

macro_rules! typed_node {
  ($name:ident, $kind:ident) => {
    #[derive(Clone)]
    pub struct $name {
      node: NodeRef,
    }

    impl NodeHandle for $name {
      fn node(&self) -> &NodeRef {
        &self.node
      }
    }

    impl TypedNode for $name {
      const KIND: NodeKind = NodeKind::$kind;

      fn wrap(node: NodeRef) -> Self {
        Self { node }
      }
    }

    impl PartialEq for $name {
      fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
      }
    }

    impl Eq for $name {}

    impl fmt::Debug for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node.try_borrow() {
          Ok(node) => f
            .debug_struct(stringify!($name))
            .field("data", &node.data)
            .field("children", &node.children().len())
            .finish(),
          Err(_) => f.write_str(concat!(stringify!($name), "(<borrowed>)")),
        }
      }
    }

    impl From<$name> for NodeRef {
      fn from(node: $name) -> NodeRef {
        node.node
      }
    }

    impl From<&$name> for NodeRef {
      fn from(node: &$name) -> NodeRef {
        node.node.clone()
      }
    }

    impl From<$name> for AnyNode {
      fn from(node: $name) -> AnyNode {
        AnyNode::$kind(node)
      }
    }
  };
}

typed_node!(Root, Root);
typed_node!(AtRule, AtRule);
typed_node!(Rule, Rule);
typed_node!(Declaration, Declaration);
typed_node!(Comment, Comment);

impl Container for Root {}
impl Container for AtRule {}
impl Container for Rule {}

impl Default for Root {
  fn default() -> Self {
    Self::new()
  }
}

impl Root {
  pub fn new() -> Self {
    Self::wrap(Node::new(NodeData::Root))
  }
}

impl AtRule {
  /// An at-rule without parameters or block. Appending a child gives it a block.
  pub fn new(name: impl Into<String>) -> Self {
    Self::wrap(Node::new(NodeData::AtRule {
      name: name.into(),
      params: String::new(),
    }))
  }

  pub fn with_params(self, params: impl Into<String>) -> Self {
    self.set_params(params);
    self
  }

  /// Gives the at-rule an empty block, so it prints as `@name params {}`.
  pub fn with_block(self) -> Self {
    {
      let mut node = self.node.borrow_mut();
      if node.nodes.is_none() {
        node.nodes = Some(Vec::new());
      }
    }
    self
  }

  pub fn name(&self) -> String {
    match &self.node.borrow().data {
      NodeData::AtRule { name, .. } => name.clone(),
      _ => String::new(),
    }
  }

  pub fn set_name(&self, value: impl Into<String>) {
    if let NodeData::AtRule { name, .. } = &mut self.node.borrow_mut().data {
      *name = value.into();
    }
  }

  pub fn params(&self) -> String {
    match &self.node.borrow().data {
      NodeData::AtRule { params, .. } => params.clone(),
      _ => String::new(),
    }
  }

  pub fn set_params(&self, value: impl Into<String>) {
    if let NodeData::AtRule { params, .. } = &mut self.node.borrow_mut().data {
      *params = value.into();
    }
  }

  pub fn has_block(&self) -> bool {
    self.node.borrow().has_block()
  }
}

impl Rule {
  pub fn new(selector: impl Into<String>) -> Self {
    Self::wrap(Node::new(NodeData::Rule {
      selector: selector.into(),
    }))
  }

  pub fn selector(&self) -> String {
    match &self.node.borrow().data {
      NodeData::Rule { selector } => selector.clone(),
      _ => String::new(),
    }
  }

  pub fn set_selector(&self, value: impl Into<String>) {
    if let NodeData::Rule { selector } = &mut self.node.borrow_mut().data {
      *selector = value.into();
    }
  }

  /// The selector split on top-level commas.
  pub fn selectors(&self) -> Vec<String> {
    list::comma(&self.selector())
  }

  /// Joins `selectors` with the separator the current selector uses.
  pub fn set_selectors<S: AsRef<str>>(&self, selectors: &[S]) {
    let current = self.selector();
    let separator = match current.find(',') {
      Some(comma) => {
        let spaces = current[comma + 1..]
          .chars()
          .take_while(|ch| ch.is_whitespace())
          .collect::<String>();
        format!(",{spaces}")
      }
      None => format!(
        ",{}",
        stringifier::resolve_raw(self.node(), "between", "beforeOpen").text()
      ),
    };
    let joined = selectors
      .iter()
      .map(AsRef::as_ref)
      .collect::<Vec<_>>()
      .join(&separator);
    self.set_selector(joined);
  }
}

impl Declaration {
  pub fn new(prop: impl Into<String>, value: impl Into<String>) -> Self {
    Self::wrap(Node::new(NodeData::Declaration {
      prop: prop.into(),
      value: value.into(),
      important: false,
    }))
  }

  pub fn with_important(self, value: bool) -> Self {
    self.set_important(value);
    self
  }

  pub fn prop(&self) -> String {
    match &self.node.borrow().data {
      NodeData::Declaration { prop, .. } => prop.clone(),
      _ => String::new(),
    }
  }

  pub fn set_prop(&self, value: impl Into<String>) {
    if let NodeData::Declaration { prop, .. } = &mut self.node.borrow_mut().data {
      *prop = value.into();
    }
  }

  pub fn value(&self) -> String {
    match &self.node.borrow().data {
      NodeData::Declaration { value, .. } => value.clone(),
      _ => String::new(),
    }
  }

  pub fn set_value(&self, new_value: impl Into<String>) {
    if let NodeData::Declaration { value, .. } = &mut self.node.borrow_mut().data {
      *value = new_value.into();
    }
  }

  pub fn important(&self) -> bool {
    matches!(
      self.node.borrow().data,
      NodeData::Declaration {
        important: true,
        ..
      }
    )
  }

  pub fn set_important(&self, value: bool) {
    if let NodeData::Declaration { important, .. } = &mut self.node.borrow_mut().data {
      *important = value;
    }
  }

  /// Whether the property is a `--custom` property.
  pub fn is_variable(&self) -> bool {
    self.prop().starts_with("--")
  }
}

impl Comment {
  pub fn new(text: impl Into<String>) -> Self {
    Self::wrap(Node::new(NodeData::Comment { text: text.into() }))
  }

  pub fn text(&self) -> String {
    match &self.node.borrow().data {
      NodeData::Comment { text } => text.clone(),
      _ => String::new(),
    }
  }

  pub fn set_text(&self, value: impl Into<String>) {
    if let NodeData::Comment { text } = &mut self.node.borrow_mut().data {
      *text = value.into();
    }
  }
}

/// Any node, tagged with its kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnyNode {
  Root(Root),
  AtRule(AtRule),
  Rule(Rule),
  Declaration(Declaration),
  Comment(Comment),
}

impl AnyNode {
  pub fn from_node(node: NodeRef) -> Self {
    let kind = node.borrow().kind();
    match kind {
      NodeKind::Root => AnyNode::Root(Root::wrap(node)),
      NodeKind::AtRule => AnyNode::AtRule(AtRule::wrap(node)),
      NodeKind::Rule => AnyNode::Rule(Rule::wrap(node)),
      NodeKind::Declaration => AnyNode::Declaration(Declaration::wrap(node)),
      NodeKind::Comment => AnyNode::Comment(Comment::wrap(node)),
    }
  }

  pub fn into_node(self) -> NodeRef {
    match self {
      AnyNode::Root(node) => node.into(),
      AnyNode::AtRule(node) => node.into(),
      AnyNode::Rule(node) => node.into(),
      AnyNode::Declaration(node) => node.into(),
      AnyNode::Comment(node) => node.into(),
    }
  }

  pub fn as_root(&self) -> Option<&Root> {
    match self {
      AnyNode::Root(root) => Some(root),
      _ => None,
    }
  }

  pub fn as_at_rule(&self) -> Option<&AtRule> {
    match self {
      AnyNode::AtRule(at_rule) => Some(at_rule),
      _ => None,
    }
  }

  pub fn as_rule(&self) -> Option<&Rule> {
    match self {
      AnyNode::Rule(rule) => Some(rule),
      _ => None,
    }
  }

  pub fn as_declaration(&self) -> Option<&Declaration> {
    match self {
      AnyNode::Declaration(decl) => Some(decl),
      _ => None,
    }
  }

  pub fn as_comment(&self) -> Option<&Comment> {
    match self {
      AnyNode::Comment(comment) => Some(comment),
      _ => None,
    }
  }

  pub fn children(&self) -> Vec<AnyNode> {
    let children = self.node().borrow().children().to_vec();
    children.into_iter().map(AnyNode::from_node).collect()
  }

  /// Appends to this node when it is a container.
  pub fn append(&self, node: impl Into<NodeRef>) -> Result<(), TreeError> {
    Node::insert(self.node(), Anchor::End, vec![node.into()])
  }
}

impl NodeHandle for AnyNode {
  fn node(&self) -> &NodeRef {
    match self {
      AnyNode::Root(node) => node.node(),
      AnyNode::AtRule(node) => node.node(),
      AnyNode::Rule(node) => node.node(),
      AnyNode::Declaration(node) => node.node(),
      AnyNode::Comment(node) => node.node(),
    }
  }
}

impl From<AnyNode> for NodeRef {
  fn from(node: AnyNode) -> NodeRef {
    node.into_node()
  }
}

impl From<&AnyNode> for NodeRef {
  fn from(node: &AnyNode) -> NodeRef {
    node.node().clone()
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn sample() -> (Root, Rule, Declaration, Declaration) {
    let root = Root::new();
    let rule = Rule::new("a");
    let color = Declaration::new("color", "red");
    let margin = Declaration::new("margin", "0");
    rule.append(&color).unwrap();
    rule.append(&margin).unwrap();
    root.append(&rule).unwrap();
    (root, rule, color, margin)
  }

  #[test]
  fn navigates_siblings_and_ancestors() {
    let (root, rule, color, margin) = sample();

    assert_eq!(color.next(), Some(AnyNode::Declaration(margin.clone())));
    assert_eq!(margin.prev(), Some(AnyNode::Declaration(color.clone())));
    assert_eq!(color.prev(), None);
    assert_eq!(margin.index(), Some(1));
    assert_eq!(color.parent(), Some(AnyNode::Rule(rule.clone())));
    assert_eq!(color.root(), AnyNode::Root(root.clone()));
    assert_eq!(
      color.ancestors(),
      vec![AnyNode::Rule(rule), AnyNode::Root(root)]
    );
  }

  #[test]
  fn removing_twice_is_harmless() {
    let (_root, rule, color, _margin) = sample();

    assert!(color.remove());
    assert!(!color.remove());
    assert_eq!(rule.len(), 1);
    assert_eq!(color.parent(), None);
  }

  #[test]
  fn clone_before_inserts_detached_copy() {
    let (_root, rule, color, _margin) = sample();

    let copy = color.clone_before().unwrap();
    copy.set_prop("-webkit-color");

    assert_eq!(rule.index_of(&copy), Some(0));
    assert_eq!(color.prop(), "color");
    assert_ne!(copy, color);
  }

  #[test]
  fn move_to_changes_parent() {
    let (root, rule, color, _margin) = sample();
    let other = Rule::new("b");
    root.append(&other).unwrap();

    color.move_to(&other).unwrap();

    assert_eq!(rule.len(), 1);
    assert_eq!(other.first(), Some(AnyNode::Declaration(color)));
    assert_eq!(rule.move_to(&rule), Err(TreeError::Cycle));
  }

  #[test]
  fn walk_visits_in_document_order() {
    let (root, rule, _color, _margin) = sample();
    let media = AtRule::new("media").with_params("print");
    media.append(Rule::new("b")).unwrap();
    rule.after(&media).unwrap();
    let mut seen = Vec::new();

    root.walk(|node, _| {
      seen.push(node.kind().as_str());
      true
    });

    assert_eq!(seen, vec!["rule", "decl", "decl", "atrule", "rule"]);
  }

  #[test]
  fn each_tolerates_removal_of_current_child() {
    let (_root, rule, _color, _margin) = sample();
    let mut props = Vec::new();

    rule.each(|node, _| {
      if let Some(decl) = node.as_declaration() {
        props.push(decl.prop());
        decl.remove();
      }
      true
    });

    assert_eq!(props, vec!["color", "margin"]);
    assert!(rule.is_empty());
  }

  #[test]
  fn walk_can_stop_early() {
    let (root, _rule, _color, _margin) = sample();
    let mut count = 0;

    let completed = root.walk_decls(|_, _| {
      count += 1;
      false
    });

    assert!(!completed);
    assert_eq!(count, 1);
  }

  #[test]
  fn filtered_walks() {
    let (root, _rule, _color, _margin) = sample();
    let mut values = Vec::new();

    root.walk_decls_named("margin", |decl, _| {
      values.push(decl.value());
      true
    });

    assert_eq!(values, vec!["0"]);
    assert!(root.some(|node| node.as_rule().is_some()));
    assert!(root.every(|node| node.kind() == NodeKind::Rule));
  }

  #[test]
  fn replace_with_multiple_nodes() {
    let (_root, rule, color, margin) = sample();

    color
      .replace_with([
        Declaration::new("a", "1"),
        Declaration::new("b", "2"),
      ])
      .unwrap();

    let props: Vec<String> = rule
      .nodes()
      .iter()
      .filter_map(|node| node.as_declaration().map(Declaration::prop))
      .collect();
    assert_eq!(props, vec!["a", "b", "margin"]);
    assert_eq!(margin.index(), Some(2));
  }

  #[test]
  fn selectors_round_trip_through_list() {
    let rule = Rule::new("a, b");
    assert_eq!(rule.selectors(), vec!["a", "b"]);

    rule.set_selectors(&["c", "d", "e"]);
    assert_eq!(rule.selector(), "c, d, e");
  }

  #[test]
  fn error_without_source_has_no_location() {
    let error = Declaration::new("a", "b").error("Bad");

    assert_eq!(error.line, None);
    assert_eq!(error.reason, "Bad");
  }

  #[test]
  fn at_rule_gains_block_on_append() {
    let at_rule = AtRule::new("media");
    assert!(!at_rule.has_block());

    at_rule.append(Rule::new("a")).unwrap();

    assert!(at_rule.has_block());
    assert_eq!(
      Declaration::new("a", "b").node().borrow().kind(),
      NodeKind::Declaration
    );
  }
}
