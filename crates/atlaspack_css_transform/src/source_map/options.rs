/// Where a previous map comes from when it is handed over explicitly.
#[derive(Clone, Debug, PartialEq)]
pub enum PrevMap {
  /// Ignore any previous map, including annotations in the input.
  Disabled,
  /// Source map JSON text.
  Text(String),
  /// An already parsed source map object.
  Json(serde_json::Value),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MapAnnotation {
  /// Add an annotation unless previous maps say otherwise.
  #[default]
  Default,
  Disabled,
  /// Use this URL in the annotation comment.
  Path(String),
}

/// What to do with output fragments whose node has no source position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnmappedPolicy {
  /// Emit no mapping for them.
  #[default]
  Skip,
  /// Map them to the start of the closest ancestor that has a position.
  NearestAncestor,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapOptions {
  /// Embed the map as a base64 data URL. Left unset, inline output is used
  /// unless an annotation path was given or previous maps were all external.
  pub inline: Option<bool>,
  pub annotation: MapAnnotation,
  /// Embed original sources. Left unset, contents are embedded unless every
  /// previous map came without them.
  pub sources_content: Option<bool>,
  pub prev: Option<PrevMap>,
  /// Use `file://` URLs instead of relative paths for sources.
  pub absolute: bool,
  pub unmapped: UnmappedPolicy,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum MapSetting {
  /// Generate a map only when an input carried a previous one.
  #[default]
  Auto,
  Disabled,
  Enabled(MapOptions),
}

impl MapSetting {
  /// Maps written next to the output and referenced by an annotation.
  pub fn external() -> Self {
    MapSetting::Enabled(MapOptions {
      inline: Some(false),
      ..Default::default()
    })
  }

  /// Maps embedded into the output as a data URL.
  pub fn inline() -> Self {
    MapSetting::Enabled(MapOptions {
      inline: Some(true),
      ..Default::default()
    })
  }

  pub fn options(&self) -> Option<&MapOptions> {
    match self {
      MapSetting::Enabled(options) => Some(options),
      _ => None,
    }
  }
}
