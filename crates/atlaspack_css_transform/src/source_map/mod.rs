mod generator;
mod options;
mod previous_map;

pub use generator::{Generated, MapError, MapGenerator};
pub use options::{MapAnnotation, MapOptions, MapSetting, PrevMap, UnmappedPolicy};
pub use previous_map::{find_annotation, PreviousMap, PreviousMapError};
