use std::fmt;

use sourcemap::SourceMap;

use crate::ast::{NodeHandle, NodeRef, Root};
use crate::input::Position;
use crate::processor::ProcessOptions;
use crate::source_map::{MapError, MapGenerator};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Severity {
  Info,
  #[default]
  Warning,
  Error,
}

#[derive(Clone, Debug, Default)]
pub struct WarningOptions {
  pub plugin: Option<String>,
  pub severity: Severity,
  pub node: Option<NodeRef>,
  /// Overrides the node's start position.
  pub start: Option<Position>,
  pub end: Option<Position>,
}

impl WarningOptions {
  pub fn plugin(mut self, plugin: impl Into<String>) -> Self {
    self.plugin = Some(plugin.into());
    self
  }

  pub fn severity(mut self, severity: Severity) -> Self {
    self.severity = severity;
    self
  }

  pub fn node(mut self, node: &impl NodeHandle) -> Self {
    self.node = Some(node.node().clone());
    self
  }

  pub fn range(mut self, start: Position, end: Option<Position>) -> Self {
    self.start = Some(start);
    self.end = end;
    self
  }
}

/// A non-fatal diagnostic recorded by a plugin.
#[derive(Clone, Debug)]
pub struct Warning {
  pub text: String,
  pub plugin: Option<String>,
  pub severity: Severity,
  pub node: Option<NodeRef>,
  pub file: Option<String>,
  pub line: Option<u32>,
  pub column: Option<u32>,
  pub end_line: Option<u32>,
  pub end_column: Option<u32>,
}

impl Warning {
  pub fn new(text: impl Into<String>, options: WarningOptions) -> Self {
    let (file, start, end) = match &options.node {
      Some(node) => {
        let node = node.borrow();
        (
          node.source.input.as_ref().map(|input| input.name().to_string()),
          node.source.start,
          node.source.end,
        )
      }
      None => (None, None, None),
    };
    let start = options.start.or(start);
    let end = if options.start.is_some() { options.end } else { end };

    Self {
      text: text.into(),
      plugin: options.plugin,
      severity: options.severity,
      node: options.node,
      file,
      line: start.map(|position| position.line),
      column: start.map(|position| position.column),
      end_line: end.map(|position| position.line),
      end_column: end.map(|position| position.column),
    }
  }
}

impl fmt::Display for Warning {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(plugin) = &self.plugin {
      write!(f, "{plugin}: ")?;
    }
    if let (Some(line), Some(column)) = (self.line, self.column) {
      let file = self.file.as_deref().unwrap_or("<css input>");
      write!(f, "{file}:{line}:{column}: ")?;
    }
    f.write_str(&self.text)
  }
}

/// State of one processing run: the tree plugins work on and what they
/// reported.
#[derive(Debug)]
pub struct TransformResult {
  pub root: Root,
  pub opts: ProcessOptions,
  pub warnings: Vec<Warning>,
  /// Plugin whose handler is running, used as the default warning origin.
  pub last_plugin: Option<String>,
}

impl TransformResult {
  pub fn new(root: Root, opts: ProcessOptions) -> Self {
    Self {
      root,
      opts,
      warnings: Vec::new(),
      last_plugin: None,
    }
  }

  pub fn warn(&mut self, text: impl Into<String>, mut options: WarningOptions) -> Warning {
    if options.plugin.is_none() {
      options.plugin = self.last_plugin.clone();
    }
    let warning = Warning::new(text, options);
    tracing::debug!(warning = %warning, "plugin warning");
    self.warnings.push(warning.clone());
    warning
  }

  pub fn warnings(&self) -> &[Warning] {
    &self.warnings
  }

  /// Prints the tree and generates its source map as configured.
  pub fn output(&self) -> Result<Output, MapError> {
    let generated = MapGenerator::new(
      &self.root,
      &self.opts.map,
      self.opts.from.as_deref(),
      self.opts.to.as_deref(),
    )
    .generate()?;

    Ok(Output {
      css: generated.css,
      map: generated.map,
      warnings: self.warnings.clone(),
    })
  }
}

/// Final text of a run.
#[derive(Debug)]
pub struct Output {
  pub css: String,
  /// External source map, when one was requested.
  pub map: Option<SourceMap>,
  pub warnings: Vec<Warning>,
}

impl Output {
  pub fn map_json(&self) -> Result<Option<String>, MapError> {
    let Some(map) = &self.map else {
      return Ok(None);
    };
    let mut json = Vec::new();
    map.to_writer(&mut json)?;
    Ok(Some(String::from_utf8(json)?))
  }
}

impl fmt::Display for Output {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.css)
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::ast::{AnyNode, Container, Declaration};
  use crate::parse::parse;

  #[test]
  fn warnings_point_at_their_node() {
    let root = parse("a {\n  color: red;\n}", Some("a.css")).unwrap();
    let mut result = TransformResult::new(root.clone(), ProcessOptions::default());
    result.last_plugin = Some("lint".into());
    let mut decl = None;
    root.walk_decls(|found, _| {
      decl = Some(found);
      false
    });

    let warning = decl.unwrap().warn(&mut result, "Avoid red");

    assert_eq!(warning.to_string(), "lint: a.css:2:3: Avoid red");
    assert_eq!((warning.end_line, warning.end_column), (Some(2), Some(13)));
    assert_eq!(result.warnings().len(), 1);
  }

  #[test]
  fn warnings_without_position() {
    let mut result = TransformResult::new(crate::ast::Root::new(), ProcessOptions::default());
    let options = WarningOptions::default()
      .plugin("sizes")
      .severity(Severity::Info)
      .node(&Declaration::new("width", "1px"));
    let warning = result.warn("Checked", options);

    assert_eq!(warning.to_string(), "sizes: Checked");
    assert_eq!(warning.severity, Severity::Info);
  }

  #[test]
  fn output_without_map() {
    let root = parse("a{}", None).unwrap();
    let AnyNode::Rule(rule) = root.first().unwrap() else {
      panic!("expected a rule");
    };
    rule.set_selector("b");
    let output = TransformResult::new(root, ProcessOptions::default())
      .output()
      .unwrap();

    assert_eq!(output.css, "b{}");
    assert!(output.map.is_none());
    assert_eq!(output.map_json().unwrap(), None);
  }
}
