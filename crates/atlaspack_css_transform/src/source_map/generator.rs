use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pathdiff::diff_paths;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use regex::Regex;
use sourcemap::{SourceMap, SourceMapBuilder, Token};
use thiserror::Error;
use url::Url;

use crate::ast::{find_descendant, Node, NodeData, NodeHandle, NodeKind, NodeRef, Root};
use crate::input::{InputRef, Position};
use crate::stringifier::{stringify, stringify_with, FragmentRole};

use super::options::{MapAnnotation, MapOptions, MapSetting, UnmappedPolicy};
use super::previous_map::PreviousMap;

static URL_SCHEME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w+://").unwrap());

/// Characters `encodeURI` escapes, plus `#` and `?`.
const URI: &AsciiSet = &CONTROLS
  .add(b' ')
  .add(b'"')
  .add(b'#')
  .add(b'%')
  .add(b'<')
  .add(b'>')
  .add(b'?')
  .add(b'[')
  .add(b'\\')
  .add(b']')
  .add(b'^')
  .add(b'`')
  .add(b'{')
  .add(b'|')
  .add(b'}');

const ANNOTATION_PREFIX: &str = "# sourceMappingURL=";

#[derive(Debug, Error)]
pub enum MapError {
  #[error("Unable to serialize source map")]
  Serialize(#[from] sourcemap::Error),
  #[error("Serialized source map is not valid UTF-8")]
  Utf8(#[from] std::string::FromUtf8Error),
}

/// Printed stylesheet with the map that describes it. `map` is `None` when
/// maps are disabled or the map was inlined into `css`.
#[derive(Debug)]
pub struct Generated {
  pub css: String,
  pub map: Option<SourceMap>,
}

/// One output position tied to a position in one of the inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Mapping {
  dst_line: u32,
  dst_col: u32,
  input: usize,
  src_line: u32,
  src_col: u32,
}

pub struct MapGenerator<'a> {
  root: &'a Root,
  setting: &'a MapSetting,
  options: MapOptions,
  from: Option<&'a str>,
  to: Option<&'a str>,
  /// Inputs of the tree that came with a previous map, in document order.
  previous: Vec<InputRef>,
}

impl<'a> MapGenerator<'a> {
  pub fn new(root: &'a Root, setting: &'a MapSetting, from: Option<&'a str>, to: Option<&'a str>) -> Self {
    let mut previous: Vec<InputRef> = Vec::new();
    let mut collect = |node: &NodeRef| -> Option<()> {
      let input = node.borrow().source.input.clone()?;
      if input.map.is_some() && !previous.iter().any(|known| known.ptr_eq(&input)) {
        previous.push(input);
      }
      None
    };
    collect(root.node());
    find_descendant(root.node(), &mut collect);

    Self {
      root,
      setting,
      options: setting.options().cloned().unwrap_or_default(),
      from,
      to,
      previous,
    }
  }

  fn is_map(&self) -> bool {
    match self.setting {
      MapSetting::Disabled => false,
      MapSetting::Enabled(_) => true,
      MapSetting::Auto => !self.previous.is_empty(),
    }
  }

  fn previous_maps(&self) -> impl Iterator<Item = &PreviousMap> {
    self.previous.iter().filter_map(|input| input.map.as_ref())
  }

  fn is_inline(&self) -> bool {
    if let Some(inline) = self.options.inline {
      return inline;
    }
    if self.options.annotation != MapAnnotation::Default {
      return false;
    }
    if self.previous.is_empty() {
      return true;
    }
    self.previous_maps().any(|map| map.inline)
  }

  fn is_annotation(&self) -> bool {
    if self.is_inline() {
      return true;
    }
    match &self.options.annotation {
      MapAnnotation::Disabled => false,
      MapAnnotation::Path(_) => true,
      MapAnnotation::Default if self.previous.is_empty() => true,
      MapAnnotation::Default => self.previous_maps().any(|map| map.annotation.is_some()),
    }
  }

  fn is_sources_content(&self) -> bool {
    if let Some(sources_content) = self.options.sources_content {
      return sources_content;
    }
    if self.previous.is_empty() {
      return true;
    }
    self.previous_maps().any(|map| map.with_content())
  }

  #[tracing::instrument(level = "debug", skip_all, fields(to = ?self.to))]
  pub fn generate(&self) -> Result<Generated, MapError> {
    self.clear_annotation();
    if !self.is_map() {
      return Ok(Generated {
        css: stringify(self.root.node()),
        map: None,
      });
    }

    let (mut css, mappings, inputs) = self.collect();
    let map = self.build(&mappings, &inputs);

    if self.is_annotation() {
      let url = if self.is_inline() {
        let mut json = Vec::new();
        map.to_writer(&mut json)?;
        format!("data:application/json;base64,{}", BASE64.encode(String::from_utf8(json)?))
      } else {
        match &self.options.annotation {
          MapAnnotation::Path(path) => path.clone(),
          _ => format!("{}.map", self.output_file()),
        }
      };
      let eol = if css.contains("\r\n") { "\r\n" } else { "\n" };
      css.push_str(eol);
      css.push_str("/*");
      css.push_str(ANNOTATION_PREFIX);
      css.push_str(&url);
      css.push_str(" */");
    }

    if self.is_inline() {
      return Ok(Generated { css, map: None });
    }
    Ok(Generated { css, map: Some(map) })
  }

  /// Removes annotation comments left at the top level by earlier runs.
  fn clear_annotation(&self) {
    if self.options.annotation == MapAnnotation::Disabled {
      return;
    }
    let root = self.root.node();
    let count = root.borrow().children().len();
    for index in (0..count).rev() {
      let stale = root.borrow().children().get(index).is_some_and(|child| {
        matches!(&child.borrow().data, NodeData::Comment { text } if text.starts_with(ANNOTATION_PREFIX))
      });
      if stale {
        Node::remove_child_at(root, index);
      }
    }
  }

  /// Prints the tree while recording where each node's output starts and ends.
  fn collect(&self) -> (String, Vec<Mapping>, Vec<InputRef>) {
    let mut css = String::new();
    let mut mappings = Vec::new();
    let mut inputs: Vec<InputRef> = Vec::new();
    let mut line = 0u32;
    let mut column = 0u32;

    stringify_with(self.root.node(), |fragment| {
      css.push_str(fragment.text);

      if let Some(node) = fragment.node {
        if fragment.role != Some(FragmentRole::End) {
          if let Some(origin) = self.origin(node, false) {
            push_mapping(&mut mappings, &mut inputs, origin, line, column);
          }
        }
      }

      match fragment.text.rfind('\n') {
        Some(last) => {
          line += fragment.text.matches('\n').count() as u32;
          column = fragment.text[last + 1..].chars().count() as u32;
        }
        None => column += fragment.text.chars().count() as u32,
      }

      if let Some(node) = fragment.node {
        if fragment.role != Some(FragmentRole::Start) && closes_visibly(node) {
          if let Some(origin) = self.origin(node, true) {
            push_mapping(&mut mappings, &mut inputs, origin, line, column.saturating_sub(1));
          }
        }
      }
    });

    (css, mappings, inputs)
  }

  /// Where a node's output came from, following the unmapped policy for
  /// nodes built in code. A position in an input with a previous map only
  /// counts when that map covers it.
  fn origin(&self, node: &NodeRef, end: bool) -> Option<(InputRef, Position)> {
    let own = {
      let node = node.borrow();
      let position = if end { node.source.end } else { node.source.start };
      node.source.input.clone().zip(position)
    };
    let own = own.filter(|(input, position)| resolves(input, *position));
    if own.is_some() || self.options.unmapped == UnmappedPolicy::Skip {
      return own;
    }
    let mut current = node.borrow().parent();
    while let Some(ancestor) = current {
      let found = {
        let ancestor = ancestor.borrow();
        ancestor
          .source
          .input
          .clone()
          .zip(ancestor.source.start)
          .filter(|(input, position)| resolves(input, *position))
      };
      if found.is_some() {
        return found;
      }
      current = ancestor.borrow().parent();
    }
    None
  }

  fn build(&self, mappings: &[Mapping], inputs: &[InputRef]) -> SourceMap {
    let output_file = self.output_file();
    let mut builder = SourceMapBuilder::new(Some(&output_file));
    let mut sources: HashMap<String, u32> = HashMap::new();
    let sources_content = self.is_sources_content();

    let mut add_source = |builder: &mut SourceMapBuilder, name: String, contents: Option<&str>| -> u32 {
      if let Some(id) = sources.get(&name) {
        return *id;
      }
      let id = builder.add_source(&name);
      if sources_content {
        builder.set_source_contents(id, contents);
      }
      sources.insert(name, id);
      id
    };

    for input in inputs {
      if let Some(previous) = &input.map {
        tracing::debug!(input = %input.name(), file = ?previous.file, "applying previous source map");
      }
    }

    for mapping in mappings {
      let input = &inputs[mapping.input];
      let Some(previous) = &input.map else {
        let id = add_source(&mut builder, self.source_path(input), Some(input.css()));
        builder.add_raw(
          mapping.dst_line,
          mapping.dst_col,
          mapping.src_line,
          mapping.src_col,
          Some(id),
          None,
          false,
        );
        continue;
      };
      let Some(token) = previous_token(previous, mapping.src_line, mapping.src_col) else {
        continue;
      };
      let Some(source) = token.get_source() else {
        continue;
      };
      let source = self.previous_source_path(source, previous.root.as_deref());
      let id = add_source(
        &mut builder,
        source,
        previous.map().get_source_contents(token.get_src_id()),
      );
      let name = token.get_name().map(|name| builder.add_name(name));
      builder.add_raw(
        mapping.dst_line,
        mapping.dst_col,
        token.get_src_line(),
        token.get_src_col(),
        Some(id),
        name,
        false,
      );
    }

    builder.into_sourcemap()
  }

  /// Name of the generated file as written into the map and the default
  /// annotation.
  fn output_file(&self) -> String {
    if let Some(to) = self.to {
      return Path::new(to)
        .file_name()
        .map_or_else(|| to.to_string(), |name| name.to_string_lossy().into_owned());
    }
    match self.from {
      Some(from) => to_url(&self.relative_path(Path::new(from))),
      None => "to.css".to_string(),
    }
  }

  /// Directory the sources in the map are relative to.
  fn base_dir(&self) -> PathBuf {
    let output_dir = self
      .to
      .and_then(|to| Path::new(to).parent())
      .map(Path::to_path_buf)
      .unwrap_or_default();
    match &self.options.annotation {
      MapAnnotation::Path(annotation) => output_dir
        .join(annotation)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or(output_dir),
      _ => output_dir,
    }
  }

  fn relative_path(&self, file: &Path) -> String {
    let text = file.to_string_lossy();
    if self.options.absolute || text.starts_with('<') || URL_SCHEME.is_match(&text) {
      return text.into_owned();
    }
    let base = self.base_dir();
    if base.as_os_str().is_empty() {
      return text.into_owned();
    }
    diff_paths(file, &base)
      .map(|relative| relative.to_string_lossy().into_owned())
      .unwrap_or_else(|| text.into_owned())
  }

  fn source_path(&self, input: &InputRef) -> String {
    let name = input.name();
    if self.options.absolute && !name.starts_with('<') {
      if let Some(url) = file_url(Path::new(name)) {
        return url;
      }
    }
    to_url(&self.relative_path(Path::new(name)))
  }

  /// A source of a previous map, resolved against that map's directory and
  /// made relative to the output.
  fn previous_source_path(&self, source: &str, root: Option<&Path>) -> String {
    if source.starts_with('<') || URL_SCHEME.is_match(source) {
      return source.to_string();
    }
    let joined = match root {
      Some(root) => root.join(source),
      None => PathBuf::from(source),
    };
    if self.options.absolute {
      if let Some(url) = file_url(&joined) {
        return url;
      }
    }
    self.relative_path(&joined).replace('\\', "/")
  }
}

/// Token of a previous map covering a 0-based position, if one starts on the
/// same line at or before it.
fn previous_token(previous: &PreviousMap, line: u32, column: u32) -> Option<Token<'_>> {
  previous
    .map()
    .lookup_token(line, column)
    .filter(|token| token.get_dst_line() == line)
}

/// Whether a 1-based position of `input` can be traced to an original
/// source. Inputs without a previous map are their own origin.
fn resolves(input: &InputRef, position: Position) -> bool {
  match &input.map {
    Some(previous) => previous_token(
      previous,
      position.line.saturating_sub(1),
      position.column.saturating_sub(1),
    )
    .is_some_and(|token| token.get_source().is_some()),
    None => true,
  }
}

fn push_mapping(
  mappings: &mut Vec<Mapping>,
  inputs: &mut Vec<InputRef>,
  (input, position): (InputRef, Position),
  dst_line: u32,
  dst_col: u32,
) {
  let index = match inputs.iter().position(|known| known.ptr_eq(&input)) {
    Some(index) => index,
    None => {
      inputs.push(input);
      inputs.len() - 1
    }
  };
  mappings.push(Mapping {
    dst_line,
    dst_col,
    input: index,
    src_line: position.line.saturating_sub(1),
    src_col: position.column.saturating_sub(1),
  });
}

/// Whether the output of `node` ends with text of its own (a closing brace
/// or a semicolon) that deserves an end mapping.
fn closes_visibly(node: &NodeRef) -> bool {
  let node_ref = node.borrow();
  let childless = match node_ref.kind() {
    NodeKind::Declaration => true,
    NodeKind::AtRule => !node_ref.has_block(),
    _ => false,
  };
  if !childless {
    return true;
  }
  let Some(parent) = node_ref.parent() else {
    return true;
  };
  let parent = parent.borrow();
  let is_last = parent
    .children()
    .last()
    .is_some_and(|last| std::rc::Rc::ptr_eq(last, node));
  !is_last || parent.raws.get("semicolon").is_some_and(|raw| raw.is_truthy())
}

fn to_url(path: &str) -> String {
  utf8_percent_encode(&path.replace('\\', "/"), URI).to_string()
}

fn file_url(path: &Path) -> Option<String> {
  let absolute = std::path::absolute(path).ok()?;
  Url::from_file_path(absolute).ok().map(String::from)
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::ast::{Container, Declaration};
  use crate::parse::parse;
  use crate::source_map::{MapOptions, PrevMap};

  fn tokens(map: &SourceMap) -> Vec<(u32, u32, String, u32, u32)> {
    map
      .tokens()
      .map(|token| {
        (
          token.get_dst_line(),
          token.get_dst_col(),
          token.get_source().unwrap_or_default().to_string(),
          token.get_src_line(),
          token.get_src_col(),
        )
      })
      .collect()
  }

  fn external() -> MapSetting {
    MapSetting::Enabled(MapOptions {
      inline: Some(false),
      ..Default::default()
    })
  }

  #[test]
  fn maps_node_starts_and_ends() {
    let root = parse("a {\n  color: red;\n}", Some("a.css")).unwrap();
    let setting = external();
    let generated = MapGenerator::new(&root, &setting, Some("a.css"), Some("b.css"))
      .generate()
      .unwrap();
    let map = generated.map.unwrap();

    assert_eq!(generated.css, "a {\n  color: red;\n}\n/*# sourceMappingURL=b.css.map */");
    assert_eq!(map.get_file(), Some("b.css"));
    assert_eq!(map.get_source_contents(0), Some("a {\n  color: red;\n}"));
    assert_eq!(
      tokens(&map),
      vec![
        (0, 0, "a.css".to_string(), 0, 0),
        (1, 2, "a.css".to_string(), 1, 2),
        (1, 12, "a.css".to_string(), 1, 12),
        (2, 0, "a.css".to_string(), 2, 0),
      ]
    );
  }

  #[test]
  fn synthesized_nodes_follow_unmapped_policy() {
    let css = "a {\n  color: red;\n}";
    let skip = parse(css, Some("a.css")).unwrap();
    let rule = skip.first().unwrap();
    rule.append(Declaration::new("margin", "0")).unwrap();
    let setting = external();
    let map = MapGenerator::new(&skip, &setting, Some("a.css"), Some("b.css"))
      .generate()
      .unwrap()
      .map
      .unwrap();
    assert!(!tokens(&map).iter().any(|token| token.0 == 2 && token.1 == 2));

    let nearest = parse(css, Some("a.css")).unwrap();
    let rule = nearest.first().unwrap();
    rule.append(Declaration::new("margin", "0")).unwrap();
    let setting = MapSetting::Enabled(MapOptions {
      inline: Some(false),
      unmapped: UnmappedPolicy::NearestAncestor,
      ..Default::default()
    });
    let map = MapGenerator::new(&nearest, &setting, Some("a.css"), Some("b.css"))
      .generate()
      .unwrap()
      .map
      .unwrap();
    assert!(tokens(&map).contains(&(2, 2, "a.css".to_string(), 0, 0)));
  }

  #[test]
  fn inline_maps_are_appended_as_data_urls() {
    let root = parse("a{}", Some("a.css")).unwrap();
    let generated = MapGenerator::new(&root, &MapSetting::inline(), Some("a.css"), None)
      .generate()
      .unwrap();

    assert!(generated.map.is_none());
    let (css, url) = generated.css.split_once("\n/*# sourceMappingURL=").unwrap();
    assert_eq!(css, "a{}");
    let encoded = url
      .strip_prefix("data:application/json;base64,")
      .and_then(|url| url.strip_suffix(" */"))
      .unwrap();
    let map = SourceMap::from_slice(&BASE64.decode(encoded).unwrap()).unwrap();
    assert_eq!(map.get_source(0), Some("a.css"));
  }

  #[test]
  fn disabled_maps_still_drop_stale_annotations() {
    let root = parse("a{}\n/*# sourceMappingURL=a.css.map */", None).unwrap();
    let generated = MapGenerator::new(&root, &MapSetting::Disabled, None, None)
      .generate()
      .unwrap();

    assert_eq!(generated.css, "a{}");
    assert!(generated.map.is_none());
  }

  #[test]
  fn custom_annotation_and_relative_sources() {
    let root = parse("a{}", Some("src/a.css")).unwrap();
    let setting = MapSetting::Enabled(MapOptions {
      annotation: MapAnnotation::Path("maps/out.css.map".into()),
      sources_content: Some(false),
      ..Default::default()
    });
    let generated = MapGenerator::new(&root, &setting, Some("src/a.css"), Some("dist/out.css"))
      .generate()
      .unwrap();
    let map = generated.map.unwrap();

    assert!(generated.css.ends_with("/*# sourceMappingURL=maps/out.css.map */"));
    assert_eq!(map.get_source(0), Some("../../src/a.css"));
    assert_eq!(map.get_source_contents(0), None);
  }

  fn generate_over_partial_map(unmapped: UnmappedPolicy) -> SourceMap {
    let previous = r#"{"version":3,"sources":["a.scss"],"names":[],"mappings":"AAAA"}"#;
    let setting = MapSetting::Enabled(MapOptions {
      inline: Some(false),
      prev: Some(PrevMap::Text(previous.into())),
      unmapped,
      ..Default::default()
    });
    let input = crate::input::Input::new(
      "a {\n  color: red;\n}",
      crate::input::InputOptions {
        from: Some("b.css".into()),
        map: setting.clone(),
      },
    )
    .unwrap();
    let root = crate::parse::parse_input(InputRef::new(input)).unwrap();
    MapGenerator::new(&root, &setting, Some("b.css"), Some("c.css"))
      .generate()
      .unwrap()
      .map
      .unwrap()
  }

  #[test]
  fn positions_missing_from_previous_map_stay_unmapped() {
    let map = generate_over_partial_map(UnmappedPolicy::Skip);

    assert_eq!(map.sources().collect::<Vec<_>>(), vec!["a.scss"]);
    assert_eq!(tokens(&map), vec![(0, 0, "a.scss".to_string(), 0, 0)]);
  }

  #[test]
  fn positions_missing_from_previous_map_use_nearest_traced_ancestor() {
    let map = generate_over_partial_map(UnmappedPolicy::NearestAncestor);

    assert_eq!(map.sources().collect::<Vec<_>>(), vec!["a.scss"]);
    assert!(tokens(&map).contains(&(1, 2, "a.scss".to_string(), 0, 0)));
  }

  #[test]
  fn composes_through_previous_map() {
    let previous = r#"{"version":3,"file":"b.css","sources":["a.scss"],"sourcesContent":["$c: red;\na { color: $c }"],"names":[],"mappings":"AACA,IAAM"}"#;
    let setting = MapSetting::Enabled(MapOptions {
      inline: Some(false),
      prev: Some(PrevMap::Text(previous.into())),
      ..Default::default()
    });
    let input = crate::input::Input::new(
      "a { color: red }",
      crate::input::InputOptions {
        from: Some("b.css".into()),
        map: setting.clone(),
      },
    )
    .unwrap();
    let root = crate::parse::parse_input(InputRef::new(input)).unwrap();
    let generated = MapGenerator::new(&root, &setting, Some("b.css"), Some("c.css"))
      .generate()
      .unwrap();
    let map = generated.map.unwrap();
    let first = map.get_token(0).unwrap();

    assert_eq!(first.get_source(), Some("a.scss"));
    assert_eq!((first.get_src_line(), first.get_src_col()), (1, 0));
    assert_eq!(map.get_source_contents(0), Some("$c: red;\na { color: $c }"));
    let decl = map.lookup_token(0, 4).unwrap();
    assert_eq!((decl.get_src_line(), decl.get_src_col()), (1, 6));
  }
}
