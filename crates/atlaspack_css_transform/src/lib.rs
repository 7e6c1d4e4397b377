pub mod ast;
pub mod config;
pub mod css_syntax_error;
pub mod input;
pub mod list;
pub mod parse;
pub mod processor;
pub mod result;
pub mod source_map;
pub mod stringifier;

pub use ast::{
  AnyNode, AtRule, CloneOptions, Comment, Container, Declaration, NodeHandle, NodeKind, Root,
  Rule, TreeError, TypedNode,
};
pub use config::ProcessConfig;
pub use css_syntax_error::CssSyntaxError;
pub use input::{Input, InputOptions, Position};
pub use list::{comma, space, split};
pub use parse::{parse, ParseError};
pub use processor::{
  plugin, BuiltPlugin, Helpers, IntoPlugin, LazyResult, Plugin, PluginBuilder, PluginError,
  ProcessOptions, Processor, ProcessorError,
};
pub use result::{Output, Severity, TransformResult, Warning, WarningOptions};
pub use source_map::{MapAnnotation, MapOptions, MapSetting, PrevMap, UnmappedPolicy};
pub use stringifier::stringify;

pub fn processor<I, P>(plugins: I) -> Processor
where
  I: IntoIterator<Item = P>,
  P: IntoPlugin,
{
  Processor::from_plugins(plugins)
}

pub fn root() -> Root {
  Root::new()
}

pub fn rule(selector: impl Into<String>) -> Rule {
  Rule::new(selector)
}

pub fn at_rule(name: impl Into<String>) -> AtRule {
  AtRule::new(name)
}

pub fn decl(prop: impl Into<String>, value: impl Into<String>) -> Declaration {
  Declaration::new(prop, value)
}

pub fn comment(text: impl Into<String>) -> Comment {
  Comment::new(text)
}
