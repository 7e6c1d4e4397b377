use std::fs;

use atlaspack_css_transform::{
  plugin, Container, Declaration, MapOptions, MapSetting, PrevMap, ProcessOptions, Processor,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pretty_assertions::assert_eq;
use sourcemap::SourceMap;

/// 0-based line and character column of the first occurrence of `needle`.
fn locate(css: &str, needle: &str) -> (u32, u32) {
  for (line, text) in css.lines().enumerate() {
    if let Some(index) = text.find(needle) {
      return (line as u32, text[..index].chars().count() as u32);
    }
  }
  panic!("{needle} not found in {css}");
}

fn original(map: &SourceMap, (line, column): (u32, u32)) -> (String, u32, u32) {
  let token = map.lookup_token(line, column).expect("position is mapped");
  (
    token.get_source().unwrap_or_default().to_string(),
    token.get_src_line(),
    token.get_src_col(),
  )
}

#[test]
fn chained_runs_resolve_to_the_first_input() {
  let first = Processor::new()
    .with_plugin(plugin("reset").rule(|rule, _| {
      rule.prepend(Declaration::new("margin", "0"))?;
      Ok(())
    }))
    .process(
      "a {\n  color: red;\n}",
      ProcessOptions::new()
        .from_path("a.css")
        .to_path("b.css")
        .map(MapSetting::external()),
    )
    .sync_output()
    .unwrap();
  let first_map = first.map_json().unwrap().expect("external map");
  assert!(first.css.ends_with("\n/*# sourceMappingURL=b.css.map */"));

  let second = Processor::new()
    .with_plugin(plugin("padding").rule(|rule, _| {
      rule.append(Declaration::new("padding", "0"))?;
      Ok(())
    }))
    .process(
      first.css.clone(),
      ProcessOptions::new()
        .from_path("b.css")
        .to_path("c.css")
        .enable_map_with(MapOptions {
          inline: Some(false),
          prev: Some(PrevMap::Text(first_map)),
          ..Default::default()
        }),
    )
    .sync_output()
    .unwrap();
  let map = second.map.expect("external map");

  assert_eq!(locate(&first.css, "color"), (2, 2));
  assert_eq!(map.sources().collect::<Vec<_>>(), vec!["a.css"]);
  assert!(map.tokens().all(|token| token.get_source() == Some("a.css")));
  assert_eq!(original(&map, locate(&second.css, "color")), ("a.css".into(), 1, 2));
  let (line, column) = locate(&second.css, "red;");
  assert_eq!(original(&map, (line, column + 3)), ("a.css".into(), 1, 12));
  assert_eq!(original(&map, locate(&second.css, "a {")), ("a.css".into(), 0, 0));
  assert_eq!(map.get_file(), Some("c.css"));
  assert_eq!(
    second.css.matches("sourceMappingURL").count(),
    1,
    "the old annotation is replaced"
  );
  assert!(second.css.ends_with("\n/*# sourceMappingURL=c.css.map */"));
}

#[test]
fn inline_maps_are_embedded_as_data_urls() {
  let output = Processor::new()
    .process(
      "a{color:red}",
      ProcessOptions::new().from_path("a.css").map(MapSetting::inline()),
    )
    .sync_output()
    .unwrap();
  assert!(output.map.is_none());

  let (css, annotation) = output.css.split_once("\n/*# sourceMappingURL=").unwrap();
  assert_eq!(css, "a{color:red}");
  let encoded = annotation
    .strip_prefix("data:application/json;base64,")
    .and_then(|rest| rest.strip_suffix(" */"))
    .unwrap();
  let map = SourceMap::from_slice(&BASE64.decode(encoded).unwrap()).unwrap();

  assert_eq!(map.sources().collect::<Vec<_>>(), vec!["a.css"]);
  assert_eq!(map.get_source_contents(0), Some("a{color:red}"));
  assert_eq!(original(&map, (0, 2)), ("a.css".into(), 0, 2));
}

#[test]
fn annotated_map_files_are_read_from_disk() {
  let dir = tempfile::tempdir().unwrap();
  fs::write(
    dir.path().join("in.css.map"),
    r#"{"version":3,"sources":["in.scss"],"names":[],"mappings":"AAAA"}"#,
  )
  .unwrap();
  let from = dir.path().join("in.css");
  let to = dir.path().join("out.css");

  let output = Processor::new()
    .process(
      "a{}\n/*# sourceMappingURL=in.css.map */",
      ProcessOptions::new()
        .from_path(from.to_string_lossy())
        .to_path(to.to_string_lossy())
        .map(MapSetting::external()),
    )
    .sync_output()
    .unwrap();
  let map = output.map.unwrap();

  assert_eq!(output.css, "a{}\n/*# sourceMappingURL=out.css.map */");
  assert_eq!(map.sources().collect::<Vec<_>>(), vec!["in.scss"]);
  assert_eq!(map.get_source_contents(0), None);
  assert_eq!(original(&map, (0, 0)), ("in.scss".into(), 0, 0));
}

#[test]
fn maps_are_skipped_without_request_or_previous_map() {
  let output = Processor::new()
    .process("a{}", ProcessOptions::new().from_path("a.css"))
    .sync_output()
    .unwrap();

  assert_eq!(output.css, "a{}");
  assert!(output.map.is_none());
}
