//! Media inspection and thumbnail rendering.
//!
//! Both are blocking, local operations. The ingestion pipeline runs them on
//! the blocking pool.

mod document;
mod inspector;
mod thumbnails;
#[cfg(feature = "ffmpeg")]
mod video;

pub use document::DocumentInspector;
pub use inspector::{
    FileInspector, ImageInspector, InspectorRegistry, MediaInspector,
};
pub use thumbnails::{
    ImageThumbnailer, RenderedThumbnail, ThumbnailGenerator,
    ThumbnailerRegistry, fit_within, thumbnail_filename,
};
#[cfg(feature = "ffmpeg")]
pub use video::{VideoInspector, VideoThumbnailer};

use montage_model::DeclaredDuration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What an inspector learned about a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<DeclaredDuration>,
    /// Inspector specific details; may contain nulls.
    pub raw: Map<String, Value>,
}

impl MediaInfo {
    /// The blob stored on a format: everything known about the file with
    /// null entries removed at every depth.
    pub fn info_blob(&self) -> Value {
        let mut blob = self.raw.clone();
        if let Some(width) = self.width {
            blob.insert("width".into(), width.into());
        }
        if let Some(height) = self.height {
            blob.insert("height".into(), height.into());
        }
        if let Some(duration) = self.duration {
            blob.insert("duration".into(), duration.raw().into());
        }
        strip_nulls(Value::Object(blob))
    }
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(key, value)| (key, strip_nulls(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|value| !value.is_null())
                .map(strip_nulls)
                .collect(),
        ),
        other => other,
    }
}
