//! The mutable stylesheet tree.
//!
//! Nodes live behind `Rc<RefCell<_>>` with a weak link to their parent, so a
//! handle to any node can reach its siblings and ancestors while the tree is
//! being edited. Every structural edit goes through the associated functions
//! on [`Node`], which keep parent links and live iterations consistent.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use thiserror::Error;

use crate::input::{InputRef, Position};

pub mod nodes;
mod raws;

pub use nodes::{
  AnyNode, AtRule, CloneOptions, Comment, Container, Declaration, NodeHandle, Root, Rule, TypedNode,
};
pub use raws::{RawValue, Raws};

pub type NodeRef = Rc<RefCell<Node>>;
pub type WeakNodeRef = Weak<RefCell<Node>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
  Root,
  AtRule,
  Rule,
  Declaration,
  Comment,
}

impl NodeKind {
  pub fn as_str(self) -> &'static str {
    match self {
      NodeKind::Root => "root",
      NodeKind::AtRule => "atrule",
      NodeKind::Rule => "rule",
      NodeKind::Declaration => "decl",
      NodeKind::Comment => "comment",
    }
  }

  pub fn is_container(self) -> bool {
    matches!(self, NodeKind::Root | NodeKind::AtRule | NodeKind::Rule)
  }
}

impl fmt::Display for NodeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeData {
  Root,
  AtRule { name: String, params: String },
  Rule { selector: String },
  Declaration { prop: String, value: String, important: bool },
  Comment { text: String },
}

impl NodeData {
  pub fn kind(&self) -> NodeKind {
    match self {
      NodeData::Root => NodeKind::Root,
      NodeData::AtRule { .. } => NodeKind::AtRule,
      NodeData::Rule { .. } => NodeKind::Rule,
      NodeData::Declaration { .. } => NodeKind::Declaration,
      NodeData::Comment { .. } => NodeKind::Comment,
    }
  }
}

/// Where a node came from. `end` points at the node's last character.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Source {
  pub input: Option<InputRef>,
  pub start: Option<Position>,
  pub end: Option<Position>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TreeError {
  #[error("{0} nodes cannot contain children")]
  NotAContainer(NodeKind),
  #[error("cannot insert a node into itself or one of its descendants")]
  Cycle,
  #[error("reference node is not a child of this container")]
  NotAChild,
  #[error("node has no parent")]
  Detached,
}

/// Position an insertion is made relative to.
#[derive(Clone, Debug)]
pub enum Anchor {
  Start,
  End,
  Before(NodeRef),
  After(NodeRef),
}

/// How an iteration reacts to siblings being inserted at or before it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CursorMode {
  /// Plugin traversal: new nodes placed at or before the cursor are visited
  /// next, nodes already visited are skipped until they are inserted again.
  Traversal,
  /// Helper iteration: the cursor shifts past nodes inserted before it.
  Sequential,
}

#[derive(Debug)]
struct Cursor {
  mode: CursorMode,
  /// Index of the child handed out last, -1 before the first one.
  position: isize,
  visited: HashSet<usize>,
}

#[derive(Debug, Default)]
struct Cursors {
  last_id: u32,
  active: BTreeMap<u32, Cursor>,
}

impl Cursors {
  fn open(&mut self, mode: CursorMode) -> u32 {
    self.last_id += 1;
    self.active.insert(
      self.last_id,
      Cursor {
        mode,
        position: -1,
        visited: HashSet::new(),
      },
    );
    self.last_id
  }

  fn inserted(&mut self, index: usize, added: &[usize]) {
    let index = index as isize;
    for cursor in self.active.values_mut() {
      match cursor.mode {
        CursorMode::Traversal => {
          for id in added {
            cursor.visited.remove(id);
          }
          if index <= cursor.position {
            cursor.position = index - 1;
          }
        }
        CursorMode::Sequential => {
          if index <= cursor.position {
            cursor.position += added.len() as isize;
          }
        }
      }
    }
  }

  fn removed(&mut self, index: usize) {
    let index = index as isize;
    for cursor in self.active.values_mut() {
      if index <= cursor.position {
        cursor.position -= 1;
      }
    }
  }

  fn cleared(&mut self) {
    for cursor in self.active.values_mut() {
      cursor.position = -1;
    }
  }
}

fn node_id(node: &NodeRef) -> usize {
  Rc::as_ptr(node) as usize
}

pub struct Node {
  pub data: NodeData,
  pub source: Source,
  pub raws: Raws,
  parent: Option<WeakNodeRef>,
  /// `None` for leaves and for at-rules without a block.
  nodes: Option<Vec<NodeRef>>,
  cursors: Cursors,
}

impl fmt::Debug for Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Node")
      .field("data", &self.data)
      .field("raws", &self.raws)
      .field("start", &self.source.start)
      .field("nodes", &self.nodes)
      .finish()
  }
}

impl Node {
  pub fn new(data: NodeData) -> NodeRef {
    let nodes = match data.kind() {
      NodeKind::Root | NodeKind::Rule => Some(Vec::new()),
      _ => None,
    };
    Rc::new(RefCell::new(Node {
      data,
      source: Source::default(),
      raws: Raws::default(),
      parent: None,
      nodes,
      cursors: Cursors::default(),
    }))
  }

  pub fn kind(&self) -> NodeKind {
    self.data.kind()
  }

  pub fn parent(&self) -> Option<NodeRef> {
    self.parent.as_ref().and_then(Weak::upgrade)
  }

  pub fn children(&self) -> &[NodeRef] {
    self.nodes.as_deref().unwrap_or(&[])
  }

  /// Whether the node owns a child list, even an empty one.
  pub fn has_block(&self) -> bool {
    self.nodes.is_some()
  }

  pub fn index_of(parent: &NodeRef, child: &NodeRef) -> Option<usize> {
    parent
      .borrow()
      .children()
      .iter()
      .position(|candidate| Rc::ptr_eq(candidate, child))
  }

  pub fn position_in_parent(node: &NodeRef) -> Option<(NodeRef, usize)> {
    let parent = node.borrow().parent()?;
    let index = Node::index_of(&parent, node)?;
    Some((parent, index))
  }

  /// The topmost ancestor, which is the node itself when it is detached.
  pub fn root_of(node: &NodeRef) -> NodeRef {
    let mut current = node.clone();
    loop {
      let parent = current.borrow().parent();
      match parent {
        Some(parent) => current = parent,
        None => return current,
      }
    }
  }

  /// Whether `node` is `ancestor` or lies somewhere below it.
  pub fn is_inclusive_ancestor(ancestor: &NodeRef, node: &NodeRef) -> bool {
    let mut current = Some(node.clone());
    while let Some(candidate) = current {
      if Rc::ptr_eq(&candidate, ancestor) {
        return true;
      }
      current = candidate.borrow().parent();
    }
    false
  }

  /// Number of container ancestors between the node and the root.
  pub fn depth(node: &NodeRef) -> usize {
    let mut depth = 0;
    let mut current = node.borrow().parent();
    while let Some(parent) = current {
      if parent.borrow().kind() == NodeKind::Root {
        break;
      }
      depth += 1;
      current = parent.borrow().parent();
    }
    depth
  }

  /// Inserts `incoming` into `parent` at `anchor`.
  ///
  /// Incoming nodes are detached from their previous parent first, and a root
  /// contributes its children instead of itself. Nodes without their own
  /// `before` raw take the whitespace of the sibling they are placed next to.
  pub fn insert(parent: &NodeRef, anchor: Anchor, incoming: Vec<NodeRef>) -> Result<(), TreeError> {
    let kind = parent.borrow().kind();
    if !kind.is_container() {
      return Err(TreeError::NotAContainer(kind));
    }
    let reference = match &anchor {
      Anchor::Before(reference) | Anchor::After(reference) => {
        if Node::index_of(parent, reference).is_none() {
          return Err(TreeError::NotAChild);
        }
        Some(reference.clone())
      }
      Anchor::Start | Anchor::End => None,
    };
    if incoming
      .iter()
      .any(|node| Node::is_inclusive_ancestor(node, parent))
    {
      return Err(TreeError::Cycle);
    }

    let mut nodes = Vec::with_capacity(incoming.len());
    for node in incoming {
      if node.borrow().kind() == NodeKind::Root {
        nodes.extend(Node::clear_children(&node));
      } else if !reference.as_ref().is_some_and(|r| Rc::ptr_eq(r, &node)) {
        nodes.push(node);
      }
    }
    if nodes.is_empty() {
      return Ok(());
    }

    let sample = match &anchor {
      Anchor::Start => parent.borrow().children().first().cloned(),
      Anchor::End => parent.borrow().children().last().cloned(),
      Anchor::Before(reference) | Anchor::After(reference) => Some(reference.clone()),
    };
    let sample_before = sample
      .and_then(|sample| sample.borrow().raws.text("before").map(str::to_string))
      .map(|before| before.chars().filter(|ch| ch.is_whitespace()).collect::<String>());

    for node in &nodes {
      Node::detach(node);
      let mut node = node.borrow_mut();
      if !node.raws.contains("before") {
        if let Some(before) = &sample_before {
          node.raws.set("before", before.as_str());
        }
      }
      node.parent = Some(Rc::downgrade(parent));
    }

    let mut parent = parent.borrow_mut();
    let index = match &anchor {
      Anchor::Start => 0,
      Anchor::End => parent.children().len(),
      Anchor::Before(reference) => position(parent.children(), reference),
      Anchor::After(reference) => position(parent.children(), reference) + 1,
    };
    let ids: Vec<usize> = nodes.iter().map(node_id).collect();
    let Node {
      nodes: children,
      cursors,
      ..
    } = &mut *parent;
    children
      .get_or_insert_with(Vec::new)
      .splice(index..index, nodes);
    cursors.inserted(index, &ids);
    Ok(())
  }

  pub fn remove_child_at(parent: &NodeRef, index: usize) -> Option<NodeRef> {
    let child = {
      let mut parent = parent.borrow_mut();
      let Node {
        nodes: children,
        cursors,
        ..
      } = &mut *parent;
      let children = children.as_mut()?;
      if index >= children.len() {
        return None;
      }
      let child = children.remove(index);
      cursors.removed(index);
      child
    };
    child.borrow_mut().parent = None;
    Some(child)
  }

  /// Removes the node from its parent. Returns whether it was attached.
  pub fn detach(node: &NodeRef) -> bool {
    match Node::position_in_parent(node) {
      Some((parent, index)) => Node::remove_child_at(&parent, index).is_some(),
      None => {
        node.borrow_mut().parent = None;
        false
      }
    }
  }

  /// Removes and returns every child of `parent`.
  pub fn clear_children(parent: &NodeRef) -> Vec<NodeRef> {
    let removed = {
      let mut parent = parent.borrow_mut();
      let Node {
        nodes: children,
        cursors,
        ..
      } = &mut *parent;
      let removed = children.as_mut().map(std::mem::take).unwrap_or_default();
      cursors.cleared();
      removed
    };
    for child in &removed {
      child.borrow_mut().parent = None;
    }
    removed
  }

  /// Puts `replacements` where `node` is. The node itself may be part of the
  /// replacements, in which case it keeps its place among them.
  pub fn replace(node: &NodeRef, replacements: Vec<NodeRef>) -> Result<(), TreeError> {
    let Some(parent) = node.borrow().parent() else {
      return Err(TreeError::Detached);
    };
    let mut bookmark = node.clone();
    let mut found_self = false;
    for replacement in replacements {
      if Rc::ptr_eq(&replacement, node) {
        found_self = true;
        continue;
      }
      let spliced = if replacement.borrow().kind() == NodeKind::Root {
        Node::clear_children(&replacement)
      } else {
        vec![replacement]
      };
      for replacement in spliced {
        if found_self {
          Node::insert(&parent, Anchor::After(bookmark.clone()), vec![replacement.clone()])?;
          bookmark = replacement;
        } else {
          Node::insert(&parent, Anchor::Before(node.clone()), vec![replacement])?;
        }
      }
    }
    if !found_self {
      Node::detach(node);
    }
    Ok(())
  }

  /// Copies a subtree. The copy has no parent.
  pub fn deep_clone(node: &NodeRef, options: CloneOptions) -> NodeRef {
    let source = node.borrow();
    let mut raws = source.raws.clone();
    if options.clean_raws {
      clean_raws(&mut raws, false);
    }
    let copy = Rc::new(RefCell::new(Node {
      data: source.data.clone(),
      source: if options.strip_source {
        Source::default()
      } else {
        source.source.clone()
      },
      raws,
      parent: None,
      nodes: None,
      cursors: Cursors::default(),
    }));
    if let Some(children) = &source.nodes {
      let cloned: Vec<NodeRef> = children
        .iter()
        .map(|child| Node::deep_clone(child, options))
        .collect();
      for child in &cloned {
        child.borrow_mut().parent = Some(Rc::downgrade(&copy));
      }
      copy.borrow_mut().nodes = Some(cloned);
    }
    copy
  }

  /// Drops formatting raws in the subtree so the stringifier falls back to
  /// detected or default formatting.
  pub fn clean_raws(node: &NodeRef, keep_between: bool) {
    let children = {
      let mut node = node.borrow_mut();
      clean_raws(&mut node.raws, keep_between);
      node.children().to_vec()
    };
    for child in &children {
      Node::clean_raws(child, keep_between);
    }
  }

  pub(crate) fn open_cursor(parent: &NodeRef, mode: CursorMode) -> u32 {
    parent.borrow_mut().cursors.open(mode)
  }

  /// Advances a cursor and returns the next child with its index.
  pub(crate) fn next_child(parent: &NodeRef, cursor: u32) -> Option<(NodeRef, usize)> {
    let mut parent = parent.borrow_mut();
    let Node {
      nodes: children,
      cursors,
      ..
    } = &mut *parent;
    let children = children.as_deref().unwrap_or(&[]);
    let cursor = cursors.active.get_mut(&cursor)?;
    loop {
      cursor.position += 1;
      let index = cursor.position as usize;
      let child = children.get(index)?;
      if cursor.mode == CursorMode::Traversal && !cursor.visited.insert(node_id(child)) {
        continue;
      }
      return Some((child.clone(), index));
    }
  }

  pub(crate) fn close_cursor(parent: &NodeRef, cursor: u32) {
    parent.borrow_mut().cursors.active.remove(&cursor);
  }
}

fn position(children: &[NodeRef], reference: &NodeRef) -> usize {
  children
    .iter()
    .position(|child| Rc::ptr_eq(child, reference))
    .unwrap_or(children.len())
}

fn clean_raws(raws: &mut Raws, keep_between: bool) {
  raws.retain(|slot| match slot {
    "before" | "after" => false,
    "between" => keep_between,
    _ => true,
  });
}

/// Walks `parent`'s children with a cursor that survives edits made by
/// `visit`. Stops early when `visit` returns `false`.
pub(crate) fn for_each_child(
  parent: &NodeRef,
  mode: CursorMode,
  visit: &mut dyn FnMut(NodeRef, usize) -> bool,
) -> bool {
  if !parent.borrow().has_block() {
    return true;
  }
  let cursor = Node::open_cursor(parent, mode);
  let mut completed = true;
  while let Some((child, index)) = Node::next_child(parent, cursor) {
    if !visit(child, index) {
      completed = false;
      break;
    }
  }
  Node::close_cursor(parent, cursor);
  completed
}

/// Pre-order walk over every descendant of `node`.
pub(crate) fn walk_descendants(node: &NodeRef, visit: &mut dyn FnMut(NodeRef, usize) -> bool) -> bool {
  for_each_child(node, CursorMode::Sequential, &mut |child, index| {
    if !visit(child.clone(), index) {
      return false;
    }
    walk_descendants(&child, &mut *visit)
  })
}

/// Read-only pre-order search that does not register a cursor.
pub(crate) fn find_descendant<T>(node: &NodeRef, find: &mut dyn FnMut(&NodeRef) -> Option<T>) -> Option<T> {
  let children = node.borrow().children().to_vec();
  for child in &children {
    if let Some(found) = find(child) {
      return Some(found);
    }
    if let Some(found) = find_descendant(child, find) {
      return Some(found);
    }
  }
  None
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn decl(prop: &str) -> NodeRef {
    Node::new(NodeData::Declaration {
      prop: prop.into(),
      value: "0".into(),
      important: false,
    })
  }

  fn rule() -> NodeRef {
    Node::new(NodeData::Rule {
      selector: "a".into(),
    })
  }

  fn props(parent: &NodeRef) -> Vec<String> {
    parent
      .borrow()
      .children()
      .iter()
      .map(|child| match &child.borrow().data {
        NodeData::Declaration { prop, .. } => prop.clone(),
        other => other.kind().to_string(),
      })
      .collect()
  }

  #[test]
  fn insert_sets_parent_and_moves_between_parents() {
    let first = rule();
    let second = rule();
    let color = decl("color");

    Node::insert(&first, Anchor::End, vec![color.clone()]).unwrap();
    assert!(Rc::ptr_eq(&color.borrow().parent().unwrap(), &first));

    Node::insert(&second, Anchor::End, vec![color.clone()]).unwrap();
    assert!(first.borrow().children().is_empty());
    assert!(Rc::ptr_eq(&color.borrow().parent().unwrap(), &second));
  }

  #[test]
  fn insert_relative_to_reference() {
    let parent = rule();
    let b = decl("b");
    Node::insert(&parent, Anchor::End, vec![b.clone()]).unwrap();
    Node::insert(&parent, Anchor::Before(b.clone()), vec![decl("a")]).unwrap();
    Node::insert(&parent, Anchor::After(b.clone()), vec![decl("c")]).unwrap();
    Node::insert(&parent, Anchor::Start, vec![decl("start")]).unwrap();

    assert_eq!(props(&parent), vec!["start", "a", "b", "c"]);
  }

  #[test]
  fn rejects_cycles_and_leaf_parents() {
    let outer = rule();
    let inner = rule();
    Node::insert(&outer, Anchor::End, vec![inner.clone()]).unwrap();

    assert_eq!(
      Node::insert(&inner, Anchor::End, vec![outer.clone()]),
      Err(TreeError::Cycle)
    );
    assert_eq!(
      Node::insert(&inner, Anchor::End, vec![inner.clone()]),
      Err(TreeError::Cycle)
    );
    assert_eq!(
      Node::insert(&decl("a"), Anchor::End, vec![decl("b")]),
      Err(TreeError::NotAContainer(NodeKind::Declaration))
    );
    assert_eq!(
      Node::insert(&outer, Anchor::Before(decl("x")), vec![decl("b")]),
      Err(TreeError::NotAChild)
    );
  }

  #[test]
  fn inserting_root_moves_its_children() {
    let donor = Node::new(NodeData::Root);
    Node::insert(&donor, Anchor::End, vec![decl("a"), decl("b")]).unwrap();
    let parent = rule();

    Node::insert(&parent, Anchor::End, vec![donor.clone()]).unwrap();

    assert_eq!(props(&parent), vec!["a", "b"]);
    assert!(donor.borrow().children().is_empty());
  }

  #[test]
  fn new_nodes_inherit_sibling_whitespace() {
    let parent = rule();
    let existing = decl("a");
    existing.borrow_mut().raws.set("before", "\n  *");
    Node::insert(&parent, Anchor::End, vec![existing]).unwrap();
    let added = decl("b");

    Node::insert(&parent, Anchor::End, vec![added.clone()]).unwrap();

    assert_eq!(added.borrow().raws.text("before"), Some("\n  "));
  }

  #[test]
  fn replace_keeps_self_position() {
    let parent = rule();
    let target = decl("b");
    Node::insert(&parent, Anchor::End, vec![decl("a"), target.clone(), decl("d")]).unwrap();

    Node::replace(&target, vec![decl("before"), target.clone(), decl("after")]).unwrap();
    assert_eq!(props(&parent), vec!["a", "before", "b", "after", "d"]);

    Node::replace(&target, vec![decl("c")]).unwrap();
    assert_eq!(props(&parent), vec!["a", "before", "c", "after", "d"]);
    assert!(target.borrow().parent().is_none());
  }

  #[test]
  fn deep_clone_has_no_parent_and_fresh_children() {
    let parent = rule();
    let child = rule();
    Node::insert(&parent, Anchor::End, vec![child.clone()]).unwrap();
    Node::insert(&child, Anchor::End, vec![decl("a")]).unwrap();

    let copy = Node::deep_clone(&child, CloneOptions::default());

    assert!(copy.borrow().parent().is_none());
    let copied_decl = copy.borrow().children()[0].clone();
    assert!(Rc::ptr_eq(&copied_decl.borrow().parent().unwrap(), &copy));
    assert!(!Rc::ptr_eq(&copied_decl, &child.borrow().children()[0]));
  }

  #[test]
  fn sequential_cursor_skips_nodes_inserted_before_it() {
    let parent = rule();
    Node::insert(&parent, Anchor::End, vec![decl("a"), decl("b")]).unwrap();
    let mut seen = Vec::new();

    for_each_child(&parent, CursorMode::Sequential, &mut |child, _| {
      let prop = match &child.borrow().data {
        NodeData::Declaration { prop, .. } => prop.clone(),
        _ => unreachable!(),
      };
      if prop == "a" {
        Node::insert(&parent, Anchor::Before(child.clone()), vec![decl("x")]).unwrap();
      }
      seen.push(prop);
      true
    });

    assert_eq!(seen, vec!["a", "b"]);
    assert_eq!(props(&parent), vec!["x", "a", "b"]);
  }

  #[test]
  fn traversal_cursor_visits_nodes_inserted_before_it_next() {
    let parent = rule();
    Node::insert(&parent, Anchor::End, vec![decl("a"), decl("b")]).unwrap();
    let mut seen = Vec::new();

    for_each_child(&parent, CursorMode::Traversal, &mut |child, _| {
      let prop = match &child.borrow().data {
        NodeData::Declaration { prop, .. } => prop.clone(),
        _ => unreachable!(),
      };
      if prop == "b" {
        Node::insert(&parent, Anchor::Start, vec![decl("x")]).unwrap();
      }
      seen.push(prop);
      true
    });

    assert_eq!(seen, vec!["a", "b", "x"]);
  }

  #[test]
  fn cursor_survives_removal_of_current_node() {
    let parent = rule();
    Node::insert(&parent, Anchor::End, vec![decl("a"), decl("b"), decl("c")]).unwrap();
    let mut seen = Vec::new();

    for_each_child(&parent, CursorMode::Traversal, &mut |child, _| {
      if let NodeData::Declaration { prop, .. } = &child.borrow().data {
        seen.push(prop.clone());
      }
      if seen.len() == 1 {
        Node::detach(&child);
      }
      true
    });

    assert_eq!(seen, vec!["a", "b", "c"]);
    assert_eq!(props(&parent), vec!["b", "c"]);
  }
}
