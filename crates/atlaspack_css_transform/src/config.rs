//! Serializable form of [`ProcessOptions`], for callers that keep processing
//! options in JSON documents.

use serde::Deserialize;

use crate::processor::ProcessOptions;
use crate::source_map::{MapAnnotation, MapOptions, MapSetting, PrevMap, UnmappedPolicy};

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfig {
  pub from: Option<String>,
  pub to: Option<String>,
  pub map: Option<MapField>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MapField {
  Bool(bool),
  Options(MapConfig),
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct MapConfig {
  pub inline: Option<bool>,
  pub annotation: Option<AnnotationField>,
  pub sources_content: Option<bool>,
  pub prev: Option<PrevField>,
  pub absolute: bool,
  pub unmapped: UnmappedField,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AnnotationField {
  Bool(bool),
  Path(String),
}

/// `false`, map JSON as a string, or a map object.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PrevField {
  Bool(bool),
  Text(String),
  Json(serde_json::Value),
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum UnmappedField {
  #[default]
  Skip,
  NearestAncestor,
}

impl ProcessConfig {
  pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
    serde_json::from_str(json)
  }
}

impl From<MapConfig> for MapOptions {
  fn from(config: MapConfig) -> Self {
    MapOptions {
      inline: config.inline,
      annotation: match config.annotation {
        None | Some(AnnotationField::Bool(true)) => MapAnnotation::Default,
        Some(AnnotationField::Bool(false)) => MapAnnotation::Disabled,
        Some(AnnotationField::Path(path)) => MapAnnotation::Path(path),
      },
      sources_content: config.sources_content,
      prev: match config.prev {
        None | Some(PrevField::Bool(true)) => None,
        Some(PrevField::Bool(false)) => Some(PrevMap::Disabled),
        Some(PrevField::Text(text)) => Some(PrevMap::Text(text)),
        Some(PrevField::Json(json)) => Some(PrevMap::Json(json)),
      },
      absolute: config.absolute,
      unmapped: match config.unmapped {
        UnmappedField::Skip => UnmappedPolicy::Skip,
        UnmappedField::NearestAncestor => UnmappedPolicy::NearestAncestor,
      },
    }
  }
}

impl From<Option<MapField>> for MapSetting {
  fn from(field: Option<MapField>) -> Self {
    match field {
      None => MapSetting::Auto,
      Some(MapField::Bool(false)) => MapSetting::Disabled,
      Some(MapField::Bool(true)) => MapSetting::Enabled(MapOptions::default()),
      Some(MapField::Options(config)) => MapSetting::Enabled(config.into()),
    }
  }
}

impl From<ProcessConfig> for ProcessOptions {
  fn from(config: ProcessConfig) -> Self {
    ProcessOptions {
      from: config.from,
      to: config.to,
      map: config.map.into(),
    }
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use serde_json::json;

  use super::*;

  #[test]
  fn missing_map_means_auto() {
    let options: ProcessOptions = ProcessConfig::from_json_str(r#"{"from": "a.css"}"#)
      .unwrap()
      .into();

    assert_eq!(options.from.as_deref(), Some("a.css"));
    assert_eq!(options.map, MapSetting::Auto);
  }

  #[test]
  fn boolean_maps() {
    let disabled: ProcessOptions = ProcessConfig::from_json_str(r#"{"map": false}"#)
      .unwrap()
      .into();
    let enabled: ProcessOptions = ProcessConfig::from_json_str(r#"{"map": true}"#)
      .unwrap()
      .into();

    assert_eq!(disabled.map, MapSetting::Disabled);
    assert_eq!(enabled.map, MapSetting::Enabled(MapOptions::default()));
  }

  #[test]
  fn map_options() {
    let config = ProcessConfig::from_json_str(
      r#"{
        "to": "out/app.css",
        "map": {
          "inline": false,
          "annotation": "app.css.map",
          "sourcesContent": false,
          "prev": {"version": 3, "sources": [], "names": [], "mappings": ""},
          "absolute": true,
          "unmapped": "nearestAncestor"
        }
      }"#,
    )
    .unwrap();
    let options = ProcessOptions::from(config);

    assert_eq!(
      options.map,
      MapSetting::Enabled(MapOptions {
        inline: Some(false),
        annotation: MapAnnotation::Path("app.css.map".into()),
        sources_content: Some(false),
        prev: Some(PrevMap::Json(
          json!({"version": 3, "sources": [], "names": [], "mappings": ""})
        )),
        absolute: true,
        unmapped: UnmappedPolicy::NearestAncestor,
      })
    );
  }

  #[test]
  fn prev_and_annotation_toggles() {
    let config: MapConfig =
      serde_json::from_value(json!({"annotation": false, "prev": false})).unwrap();
    let options = MapOptions::from(config);

    assert_eq!(options.annotation, MapAnnotation::Disabled);
    assert_eq!(options.prev, Some(PrevMap::Disabled));

    let config: MapConfig = serde_json::from_value(json!({"prev": "{\"version\":3}"})).unwrap();
    assert_eq!(
      MapOptions::from(config).prev,
      Some(PrevMap::Text("{\"version\":3}".into()))
    );
  }

  #[test]
  fn rejects_unknown_unmapped_policy() {
    assert!(ProcessConfig::from_json_str(r#"{"map": {"unmapped": "closest"}}"#).is_err());
  }
}
