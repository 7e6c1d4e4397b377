use std::collections::BTreeMap;

/// A preserved piece of formatting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawValue {
  Text(String),
  Flag(bool),
  /// The lexeme a value was parsed from, kept next to the cleaned value. It is
  /// only printed while the node still holds that cleaned value.
  Value { value: String, raw: String },
}

impl RawValue {
  pub fn text(&self) -> &str {
    match self {
      RawValue::Text(text) => text,
      RawValue::Value { raw, .. } => raw,
      RawValue::Flag(_) => "",
    }
  }

  pub fn is_truthy(&self) -> bool {
    match self {
      RawValue::Flag(flag) => *flag,
      other => !other.text().is_empty(),
    }
  }
}

impl From<&str> for RawValue {
  fn from(text: &str) -> Self {
    RawValue::Text(text.to_string())
  }
}

impl From<String> for RawValue {
  fn from(text: String) -> Self {
    RawValue::Text(text)
  }
}

impl From<bool> for RawValue {
  fn from(flag: bool) -> Self {
    RawValue::Flag(flag)
  }
}

/// Formatting slots of a node, keyed by slot name (`before`, `between`,
/// `after`, `semicolon`, `afterName`, `important`, `left`, `right`,
/// `ownSemicolon`, and the value slots `selector`, `params`, `value`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Raws {
  slots: BTreeMap<String, RawValue>,
}

impl Raws {
  pub fn get(&self, slot: &str) -> Option<&RawValue> {
    self.slots.get(slot)
  }

  pub fn text(&self, slot: &str) -> Option<&str> {
    self.slots.get(slot).map(RawValue::text)
  }

  pub fn contains(&self, slot: &str) -> bool {
    self.slots.contains_key(slot)
  }

  pub fn set(&mut self, slot: impl Into<String>, value: impl Into<RawValue>) {
    self.slots.insert(slot.into(), value.into());
  }

  pub fn remove(&mut self, slot: &str) -> Option<RawValue> {
    self.slots.remove(slot)
  }

  /// Appends to a text slot, creating it when missing.
  pub fn push_text(&mut self, slot: &str, text: &str) {
    match self.slots.get_mut(slot) {
      Some(RawValue::Text(existing)) => existing.push_str(text),
      _ => {
        self.slots.insert(slot.to_string(), RawValue::Text(text.to_string()));
      }
    }
  }

  /// The raw lexeme for `slot` if it still corresponds to `current`.
  pub fn lexeme_for(&self, slot: &str, current: &str) -> Option<&str> {
    match self.slots.get(slot) {
      Some(RawValue::Value { value, raw }) if value == current => Some(raw),
      _ => None,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
    self.slots.iter().map(|(slot, value)| (slot.as_str(), value))
  }

  pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
    self.slots.retain(|slot, _| keep(slot));
  }
}
