use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use percent_encoding::percent_decode_str;
use regex::Regex;
use sourcemap::SourceMap;
use thiserror::Error;

use super::options::{MapSetting, PrevMap};

static ANNOTATION: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"/\*\s*#\s*sourceMappingURL=").unwrap());

static DATA_URI: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^data:application/json(?:;charset=utf-?8)?(?<base64>;base64)?,").unwrap()
});

static DATA_URI_ENCODING: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^data:application/json;([^,]+),").unwrap());

#[derive(Debug, Error)]
pub enum PreviousMapError {
  #[error("Unable to load previous source map {path}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("Unsupported source map encoding {0}")]
  Encoding(String),
  #[error("Unable to decode inline source map: {0}")]
  Decode(String),
  #[error("Invalid previous source map")]
  Invalid(#[from] sourcemap::Error),
  #[error("Invalid previous source map JSON")]
  Json(#[from] serde_json::Error),
}

/// A source map that described the input before it reached this run.
#[derive(Clone, Debug)]
pub struct PreviousMap {
  pub text: String,
  /// Location of the map file, or of the stylesheet when the map was inline.
  pub file: Option<PathBuf>,
  /// Directory that relative sources in the map are resolved against.
  pub root: Option<PathBuf>,
  /// URL found in the input's `sourceMappingURL` comment.
  pub annotation: Option<String>,
  pub inline: bool,
  map: SourceMap,
}

impl PreviousMap {
  /// Looks for a previous map, first in the explicit `prev` option, then in
  /// an annotation comment at the end of `css`.
  pub fn discover(
    css: &str,
    from: Option<&str>,
    setting: &MapSetting,
  ) -> Result<Option<Self>, PreviousMapError> {
    if let MapSetting::Disabled = setting {
      return Ok(None);
    }

    let annotation = find_annotation(css);
    let inline = annotation
      .as_deref()
      .is_some_and(|annotation| annotation.starts_with("data:"));
    let prev = setting.options().and_then(|options| options.prev.as_ref());

    let mut map_file = None;
    let mut root = None;
    let text = match prev {
      Some(PrevMap::Disabled) => None,
      Some(PrevMap::Text(text)) => Some(text.clone()),
      Some(PrevMap::Json(value)) => Some(serde_json::to_string(value)?),
      None => match annotation.as_deref() {
        Some(annotation) if inline => Some(decode_inline(annotation)?),
        Some(annotation) => {
          let path = match from.map(Path::new).and_then(Path::parent) {
            Some(dir) => dir.join(annotation),
            None => PathBuf::from(annotation),
          };
          root = path.parent().map(Path::to_path_buf);
          let text = read_map_file(&path)?;
          if text.is_some() {
            map_file = Some(path);
          }
          text
        }
        None => None,
      },
    };

    let Some(text) = text else {
      return Ok(None);
    };

    let file = map_file.or_else(|| from.map(PathBuf::from));
    if let Some(file) = &file {
      root = file.parent().map(Path::to_path_buf);
    }
    let map = SourceMap::from_slice(text.as_bytes())?;
    tracing::debug!(file = ?file, inline, "loaded previous source map");

    Ok(Some(Self {
      text,
      file,
      root,
      annotation,
      inline,
      map,
    }))
  }

  pub fn map(&self) -> &SourceMap {
    &self.map
  }

  /// Whether the map embeds the text of its sources.
  pub fn with_content(&self) -> bool {
    (0..self.map.get_source_count()).any(|index| self.map.get_source_contents(index).is_some())
  }
}

/// URL of the last `sourceMappingURL` annotation comment in `css`.
pub fn find_annotation(css: &str) -> Option<String> {
  let found = ANNOTATION.find_iter(css).last()?;
  let end = css[found.end()..].find("*/")?;
  Some(css[found.end()..found.end() + end].trim().to_string())
}

fn decode_inline(uri: &str) -> Result<String, PreviousMapError> {
  let Some(captures) = DATA_URI.captures(uri) else {
    let encoding = DATA_URI_ENCODING
      .captures(uri)
      .and_then(|captures| captures.get(1))
      .map(|encoding| encoding.as_str().to_string())
      .unwrap_or_else(|| uri.chars().take(40).collect());
    return Err(PreviousMapError::Encoding(encoding));
  };

  let payload = &uri[captures.get(0).map_or(0, |whole| whole.end())..];
  if captures.name("base64").is_some() {
    let bytes = BASE64
      .decode(payload.trim())
      .map_err(|err| PreviousMapError::Decode(err.to_string()))?;
    String::from_utf8(bytes).map_err(|err| PreviousMapError::Decode(err.to_string()))
  } else {
    percent_decode_str(payload)
      .decode_utf8()
      .map(|text| text.into_owned())
      .map_err(|err| PreviousMapError::Decode(err.to_string()))
  }
}

fn read_map_file(path: &Path) -> Result<Option<String>, PreviousMapError> {
  match fs::read_to_string(path) {
    Ok(text) => Ok(Some(text.trim().to_string())),
    Err(err) if err.kind() == io::ErrorKind::NotFound => {
      tracing::debug!(path = %path.display(), "annotated source map does not exist");
      Ok(None)
    }
    Err(source) => Err(PreviousMapError::Read {
      path: path.to_path_buf(),
      source,
    }),
  }
}
