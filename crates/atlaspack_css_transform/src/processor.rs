use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use thiserror::Error;

use crate::ast::{AnyNode, AtRule, Comment, CursorMode, Declaration, Node, NodeHandle, Root, Rule};
use crate::css_syntax_error::CssSyntaxError;
use crate::input::{Input, InputOptions, InputRef, Position};
use crate::list::List;
use crate::parse::{parse_input, ParseError};
use crate::result::{Output, TransformResult, Warning, WarningOptions};
use crate::source_map::{MapError, MapOptions, MapSetting};

#[derive(Debug, Error)]
pub enum ProcessorError {
  #[error(transparent)]
  Syntax(#[from] CssSyntaxError),
  #[error(transparent)]
  Parse(#[from] ParseError),
  #[error(transparent)]
  Plugin(#[from] PluginError),
  #[error(transparent)]
  Map(#[from] MapError),
  #[error("Plugin {plugin} suspended while processing synchronously, use run() instead")]
  AsyncInSyncMode { plugin: String },
}

/// A handler failed with an error that is not a [`CssSyntaxError`].
#[derive(Debug)]
pub struct PluginError {
  pub plugin: String,
  pub message: String,
  pub file: Option<String>,
  /// Start of the node being visited, when it has one.
  pub position: Option<Position>,
  source: anyhow::Error,
}

impl PluginError {
  fn new(plugin: &str, node: &AnyNode, source: anyhow::Error) -> Self {
    let input = node.input();
    Self {
      plugin: plugin.to_string(),
      message: format!("{source:#}"),
      file: input.map(|input| input.name().to_string()),
      position: node.source_start(),
      source,
    }
  }
}

impl fmt::Display for PluginError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: ", self.plugin)?;
    if let (Some(file), Some(position)) = (&self.file, self.position) {
      write!(f, "{file}:{}:{}: ", position.line, position.column)?;
    }
    f.write_str(&self.message)
  }
}

impl std::error::Error for PluginError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    Some(&*self.source)
  }
}

#[derive(Clone, Debug, Default)]
pub struct ProcessOptions {
  pub from: Option<String>,
  pub to: Option<String>,
  pub map: MapSetting,
}

impl ProcessOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_path(mut self, from: impl Into<String>) -> Self {
    self.from = Some(from.into());
    self
  }

  pub fn to_path(mut self, to: impl Into<String>) -> Self {
    self.to = Some(to.into());
    self
  }

  pub fn map(mut self, setting: MapSetting) -> Self {
    self.map = setting;
    self
  }

  pub fn enable_map_with(self, options: MapOptions) -> Self {
    self.map(MapSetting::Enabled(options))
  }

  pub fn disable_map(self) -> Self {
    self.map(MapSetting::Disabled)
  }
}

/// What a handler receives next to the node it visits.
pub struct Helpers<'a> {
  pub result: &'a mut TransformResult,
  pub list: List,
  plugin: &'a str,
}

impl<'a> Helpers<'a> {
  fn new(result: &'a mut TransformResult, plugin: &'a str) -> Self {
    Self {
      result,
      list: List,
      plugin,
    }
  }

  pub fn plugin(&self) -> &str {
    self.plugin
  }

  /// The tree being processed.
  pub fn root(&self) -> Root {
    self.result.root.clone()
  }

  pub fn warn(&mut self, node: &impl NodeHandle, text: impl Into<String>) -> Warning {
    let options = WarningOptions::default().plugin(self.plugin).node(node);
    self.result.warn(text, options)
  }

  pub fn decl(&self, prop: impl Into<String>, value: impl Into<String>) -> Declaration {
    Declaration::new(prop, value)
  }

  pub fn rule(&self, selector: impl Into<String>) -> Rule {
    Rule::new(selector)
  }

  pub fn at_rule(&self, name: impl Into<String>) -> AtRule {
    AtRule::new(name)
  }

  pub fn comment(&self, text: impl Into<String>) -> Comment {
    Comment::new(text)
  }

  pub fn new_root(&self) -> Root {
    Root::new()
  }
}

/// A named set of handlers applied during one traversal of a tree.
///
/// Every handler defaults to doing nothing. Handlers may suspend; the
/// processor awaits each one before calling the next.
#[async_trait(?Send)]
pub trait Plugin {
  fn name(&self) -> &str;

  /// Runs once per tree, before the walk.
  async fn once(&self, _root: &Root, _helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    Ok(())
  }

  /// Runs once per tree, after the walk.
  async fn once_exit(&self, _root: &Root, _helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    Ok(())
  }

  async fn root(&self, _root: &Root, _helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    Ok(())
  }

  async fn root_exit(&self, _root: &Root, _helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    Ok(())
  }

  async fn at_rule(&self, _at_rule: &AtRule, _helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    Ok(())
  }

  async fn at_rule_exit(&self, _at_rule: &AtRule, _helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    Ok(())
  }

  async fn rule(&self, _rule: &Rule, _helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    Ok(())
  }

  async fn rule_exit(&self, _rule: &Rule, _helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    Ok(())
  }

  async fn declaration(&self, _decl: &Declaration, _helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    Ok(())
  }

  async fn declaration_exit(
    &self,
    _decl: &Declaration,
    _helpers: &mut Helpers<'_>,
  ) -> anyhow::Result<()> {
    Ok(())
  }

  async fn comment(&self, _comment: &Comment, _helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    Ok(())
  }

  async fn comment_exit(&self, _comment: &Comment, _helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    Ok(())
  }
}

pub trait IntoPlugin {
  fn into_plugin(self) -> Rc<dyn Plugin>;
}

impl<T> IntoPlugin for T
where
  T: Plugin + 'static,
{
  fn into_plugin(self) -> Rc<dyn Plugin> {
    Rc::new(self)
  }
}

impl IntoPlugin for Rc<dyn Plugin> {
  fn into_plugin(self) -> Rc<dyn Plugin> {
    self
  }
}

type NodeHook<T> = Box<dyn Fn(&T, &mut Helpers<'_>) -> anyhow::Result<()>>;

fn call_node_hook<T>(hook: &Option<NodeHook<T>>, node: &T, helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
  match hook {
    Some(handler) => handler(node, helpers),
    None => Ok(()),
  }
}

fn call_filtered_hooks<T>(
  hooks: &HashMap<String, Vec<NodeHook<T>>>,
  key: &str,
  node: &T,
  helpers: &mut Helpers<'_>,
) -> anyhow::Result<()> {
  for handler in hooks.get(&key.to_lowercase()).into_iter().flatten() {
    handler(node, helpers)?;
  }
  Ok(())
}

/// Builds a [`Plugin`] out of synchronous closures.
///
/// ```ignore
/// let plugin = PluginBuilder::new("no-red")
///   .decl_filter("color", |decl, helpers| {
///     if decl.value() == "red" {
///       helpers.warn(decl, "Avoid red");
///     }
///     Ok(())
///   })
///   .build();
/// ```
#[derive(Default)]
pub struct PluginBuilder {
  name: String,
  once: Option<NodeHook<Root>>,
  once_exit: Option<NodeHook<Root>>,
  root: Option<NodeHook<Root>>,
  root_exit: Option<NodeHook<Root>>,
  at_rule: Option<NodeHook<AtRule>>,
  at_rule_exit: Option<NodeHook<AtRule>>,
  rule: Option<NodeHook<Rule>>,
  rule_exit: Option<NodeHook<Rule>>,
  decl: Option<NodeHook<Declaration>>,
  decl_exit: Option<NodeHook<Declaration>>,
  comment: Option<NodeHook<Comment>>,
  comment_exit: Option<NodeHook<Comment>>,
  at_rule_filters: HashMap<String, Vec<NodeHook<AtRule>>>,
  at_rule_exit_filters: HashMap<String, Vec<NodeHook<AtRule>>>,
  decl_filters: HashMap<String, Vec<NodeHook<Declaration>>>,
  decl_exit_filters: HashMap<String, Vec<NodeHook<Declaration>>>,
}

macro_rules! hook_setter {
  ($method:ident, $field:ident, $node:ty) => {
    pub fn $method<F>(mut self, f: F) -> Self
    where
      F: Fn(&$node, &mut Helpers<'_>) -> anyhow::Result<()> + 'static,
    {
      self.$field = Some(Box::new(f));
      self
    }
  };
}

macro_rules! filter_setter {
  ($method:ident, $field:ident, $node:ty) => {
    /// Registers a handler for nodes whose name matches `filter`, ignoring
    /// case.
    pub fn $method<F>(mut self, filter: impl Into<String>, f: F) -> Self
    where
      F: Fn(&$node, &mut Helpers<'_>) -> anyhow::Result<()> + 'static,
    {
      self
        .$field
        .entry(filter.into().to_lowercase())
        .or_default()
        .push(Box::new(f));
      self
    }
  };
}

impl PluginBuilder {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Default::default()
    }
  }

  hook_setter!(once, once, Root);
  hook_setter!(once_exit, once_exit, Root);
  hook_setter!(root, root, Root);
  hook_setter!(root_exit, root_exit, Root);
  hook_setter!(at_rule, at_rule, AtRule);
  hook_setter!(at_rule_exit, at_rule_exit, AtRule);
  hook_setter!(rule, rule, Rule);
  hook_setter!(rule_exit, rule_exit, Rule);
  hook_setter!(decl, decl, Declaration);
  hook_setter!(decl_exit, decl_exit, Declaration);
  hook_setter!(comment, comment, Comment);
  hook_setter!(comment_exit, comment_exit, Comment);
  filter_setter!(at_rule_filter, at_rule_filters, AtRule);
  filter_setter!(at_rule_filter_exit, at_rule_exit_filters, AtRule);
  filter_setter!(decl_filter, decl_filters, Declaration);
  filter_setter!(decl_filter_exit, decl_exit_filters, Declaration);

  pub fn build(self) -> BuiltPlugin {
    BuiltPlugin(self)
  }
}

impl IntoPlugin for PluginBuilder {
  fn into_plugin(self) -> Rc<dyn Plugin> {
    Rc::new(self.build())
  }
}

pub struct BuiltPlugin(PluginBuilder);

#[async_trait(?Send)]
impl Plugin for BuiltPlugin {
  fn name(&self) -> &str {
    &self.0.name
  }

  async fn once(&self, root: &Root, helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    call_node_hook(&self.0.once, root, helpers)
  }

  async fn once_exit(&self, root: &Root, helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    call_node_hook(&self.0.once_exit, root, helpers)
  }

  async fn root(&self, root: &Root, helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    call_node_hook(&self.0.root, root, helpers)
  }

  async fn root_exit(&self, root: &Root, helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    call_node_hook(&self.0.root_exit, root, helpers)
  }

  async fn at_rule(&self, at_rule: &AtRule, helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    call_node_hook(&self.0.at_rule, at_rule, helpers)?;
    call_filtered_hooks(&self.0.at_rule_filters, &at_rule.name(), at_rule, helpers)
  }

  async fn at_rule_exit(&self, at_rule: &AtRule, helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    call_node_hook(&self.0.at_rule_exit, at_rule, helpers)?;
    call_filtered_hooks(&self.0.at_rule_exit_filters, &at_rule.name(), at_rule, helpers)
  }

  async fn rule(&self, rule: &Rule, helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    call_node_hook(&self.0.rule, rule, helpers)
  }

  async fn rule_exit(&self, rule: &Rule, helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    call_node_hook(&self.0.rule_exit, rule, helpers)
  }

  async fn declaration(&self, decl: &Declaration, helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    call_node_hook(&self.0.decl, decl, helpers)?;
    call_filtered_hooks(&self.0.decl_filters, &decl.prop(), decl, helpers)
  }

  async fn declaration_exit(&self, decl: &Declaration, helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    call_node_hook(&self.0.decl_exit, decl, helpers)?;
    call_filtered_hooks(&self.0.decl_exit_filters, &decl.prop(), decl, helpers)
  }

  async fn comment(&self, comment: &Comment, helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    call_node_hook(&self.0.comment, comment, helpers)
  }

  async fn comment_exit(&self, comment: &Comment, helpers: &mut Helpers<'_>) -> anyhow::Result<()> {
    call_node_hook(&self.0.comment_exit, comment, helpers)
  }
}

pub fn plugin(name: impl Into<String>) -> PluginBuilder {
  PluginBuilder::new(name)
}

/// An ordered list of plugins applied to stylesheets.
#[derive(Clone, Default)]
pub struct Processor {
  plugins: Vec<Rc<dyn Plugin>>,
}

impl fmt::Debug for Processor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let names: Vec<&str> = self.plugins.iter().map(|plugin| plugin.name()).collect();
    f.debug_struct("Processor").field("plugins", &names).finish()
  }
}

impl Processor {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_plugins<I, P>(plugins: I) -> Self
  where
    I: IntoIterator<Item = P>,
    P: IntoPlugin,
  {
    let mut processor = Self::new();
    for plugin in plugins {
      processor.use_plugin(plugin);
    }
    processor
  }

  pub fn with_plugin<P: IntoPlugin>(mut self, plugin: P) -> Self {
    self.use_plugin(plugin);
    self
  }

  pub fn use_plugin<P: IntoPlugin>(&mut self, plugin: P) {
    self.plugins.push(plugin.into_plugin());
  }

  pub fn plugin_names(&self) -> Vec<&str> {
    self.plugins.iter().map(|plugin| plugin.name()).collect()
  }

  /// Prepares to parse and transform `css`. Nothing runs until the returned
  /// [`LazyResult`] is driven.
  pub fn process(&self, css: impl Into<String>, options: ProcessOptions) -> LazyResult {
    LazyResult {
      plugins: self.plugins.clone(),
      source: Pending::Css(css.into()),
      options,
    }
  }

  /// Like [`Processor::process`] for a tree that was already parsed.
  pub fn process_root(&self, root: Root, options: ProcessOptions) -> LazyResult {
    LazyResult {
      plugins: self.plugins.clone(),
      source: Pending::Root(root),
      options,
    }
  }
}

enum Pending {
  Css(String),
  Root(Root),
}

/// A processing run that has not started yet.
pub struct LazyResult {
  plugins: Vec<Rc<dyn Plugin>>,
  source: Pending,
  options: ProcessOptions,
}

impl LazyResult {
  fn into_runner(self, sync: bool) -> Result<Runner, ProcessorError> {
    let root = match self.source {
      Pending::Root(root) => root,
      Pending::Css(css) => {
        let input = Input::new(
          css,
          InputOptions {
            from: self.options.from.clone(),
            map: self.options.map.clone(),
          },
        )
        .map_err(ParseError::from)?;
        parse_input(InputRef::new(input))?
      }
    };

    Ok(Runner {
      plugins: self.plugins,
      result: TransformResult::new(root, self.options),
      sync,
    })
  }

  /// Runs every plugin, awaiting handlers that suspend.
  pub async fn run(self) -> Result<TransformResult, ProcessorError> {
    let mut runner = self.into_runner(false)?;
    runner.run().await?;
    Ok(runner.result)
  }

  /// Runs every plugin without an executor. Fails when a handler suspends.
  pub fn sync(self) -> Result<TransformResult, ProcessorError> {
    let mut runner = self.into_runner(true)?;
    let outcome = runner.run().now_or_never();
    match outcome {
      Some(outcome) => outcome.map(|()| runner.result),
      None => Err(ProcessorError::AsyncInSyncMode {
        plugin: runner.result.last_plugin.clone().unwrap_or_default(),
      }),
    }
  }

  /// Runs every plugin and prints the result.
  pub async fn output(self) -> Result<Output, ProcessorError> {
    Ok(self.run().await?.output()?)
  }

  pub fn sync_output(self) -> Result<Output, ProcessorError> {
    Ok(self.sync()?.output()?)
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
  Once,
  Enter,
  Exit,
  OnceExit,
}

struct Runner {
  plugins: Vec<Rc<dyn Plugin>>,
  result: TransformResult,
  sync: bool,
}

impl Runner {
  #[tracing::instrument(level = "debug", skip_all)]
  async fn run(&mut self) -> Result<(), ProcessorError> {
    let root = AnyNode::Root(self.result.root.clone());
    self.dispatch(&root, Phase::Once).await?;
    self.walk(root.clone()).await?;
    self.dispatch(&root, Phase::OnceExit).await?;
    self.result.last_plugin = None;
    tracing::debug!(warnings = self.result.warnings.len(), "processing finished");
    Ok(())
  }

  /// Enter handlers, then children, then exit handlers. Children are read
  /// through a traversal cursor so edits made by handlers are picked up.
  fn walk(&mut self, node: AnyNode) -> LocalBoxFuture<'_, Result<(), ProcessorError>> {
    async move {
      self.dispatch(&node, Phase::Enter).await?;

      let removed = !matches!(node, AnyNode::Root(_)) && node.parent().is_none();
      if removed {
        tracing::trace!(kind = %node.kind(), "node removed on enter, skipping children");
      } else if node.node().borrow().has_block() {
        let parent = node.node().clone();
        let cursor = Node::open_cursor(&parent, CursorMode::Traversal);
        let mut outcome = Ok(());
        while let Some((child, _)) = Node::next_child(&parent, cursor) {
          outcome = self.walk(AnyNode::from_node(child)).await;
          if outcome.is_err() {
            break;
          }
        }
        Node::close_cursor(&parent, cursor);
        outcome?;
      }

      self.dispatch(&node, Phase::Exit).await
    }
    .boxed_local()
  }

  /// Calls each plugin's handler for `node` and `phase` in plugin order.
  async fn dispatch(&mut self, node: &AnyNode, phase: Phase) -> Result<(), ProcessorError> {
    for index in 0..self.plugins.len() {
      let plugin = self.plugins[index].clone();
      let name = plugin.name().to_string();
      self.result.last_plugin = Some(name.clone());
      tracing::trace!(plugin = %name, ?phase, kind = %node.kind(), "dispatch");

      let root = self.result.root.clone();
      let mut helpers = Helpers::new(&mut self.result, &name);
      let future = match (phase, node) {
        (Phase::Once, _) => plugin.once(&root, &mut helpers),
        (Phase::OnceExit, _) => plugin.once_exit(&root, &mut helpers),
        (Phase::Enter, AnyNode::Root(root)) => plugin.root(root, &mut helpers),
        (Phase::Exit, AnyNode::Root(root)) => plugin.root_exit(root, &mut helpers),
        (Phase::Enter, AnyNode::AtRule(at_rule)) => plugin.at_rule(at_rule, &mut helpers),
        (Phase::Exit, AnyNode::AtRule(at_rule)) => plugin.at_rule_exit(at_rule, &mut helpers),
        (Phase::Enter, AnyNode::Rule(rule)) => plugin.rule(rule, &mut helpers),
        (Phase::Exit, AnyNode::Rule(rule)) => plugin.rule_exit(rule, &mut helpers),
        (Phase::Enter, AnyNode::Declaration(decl)) => plugin.declaration(decl, &mut helpers),
        (Phase::Exit, AnyNode::Declaration(decl)) => plugin.declaration_exit(decl, &mut helpers),
        (Phase::Enter, AnyNode::Comment(comment)) => plugin.comment(comment, &mut helpers),
        (Phase::Exit, AnyNode::Comment(comment)) => plugin.comment_exit(comment, &mut helpers),
      };

      let outcome = if self.sync {
        match future.now_or_never() {
          Some(outcome) => outcome,
          None => {
            tracing::debug!(plugin = %name, "handler suspended in sync mode");
            return Err(ProcessorError::AsyncInSyncMode { plugin: name.clone() });
          }
        }
      } else {
        future.await
      };

      if let Err(error) = outcome {
        return Err(failure(&name, node, error));
      }
    }
    Ok(())
  }
}

fn failure(plugin: &str, node: &AnyNode, error: anyhow::Error) -> ProcessorError {
  let error = match error.downcast::<CssSyntaxError>() {
    Ok(mut syntax) => {
      if syntax.plugin.is_none() {
        syntax.plugin = Some(plugin.to_string());
      }
      ProcessorError::Syntax(syntax)
    }
    Err(error) => ProcessorError::Plugin(PluginError::new(plugin, node, error)),
  };
  tracing::debug!(plugin, error = %error, "plugin failed");
  error
}
