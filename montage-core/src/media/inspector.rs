use std::{collections::HashMap, fmt, path::Path, sync::Arc};

use serde_json::{Map, Value};
use tracing::debug;

use super::MediaInfo;
use crate::{
    config::{MediaCategory, MediaConfig, extension_of},
    error::{ContentError, Result},
};

/// Extracts structural metadata from a local file. Blocking.
pub trait MediaInspector: Send + Sync {
    /// `filename` is the name the file was uploaded under; `path` is where
    /// its bytes are now.
    fn inspect(&self, path: &Path, filename: &str) -> Result<MediaInfo>;
}

pub(super) fn base_info(path: &Path, filename: &str) -> Result<Map<String, Value>> {
    let size = std::fs::metadata(path)?.len();
    let mut raw = Map::new();
    raw.insert("filename".into(), filename.into());
    raw.insert("size".into(), size.into());
    raw.insert(
        "extension".into(),
        extension_of(filename).map_or(Value::Null, Value::String),
    );
    Ok(raw)
}

/// Name, extension and size only. Used for opaque files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileInspector;

impl MediaInspector for FileInspector {
    fn inspect(&self, path: &Path, filename: &str) -> Result<MediaInfo> {
        Ok(MediaInfo {
            raw: base_info(path, filename)?,
            ..MediaInfo::default()
        })
    }
}

/// Dimensions and container of still images, read from the header only.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageInspector;

impl MediaInspector for ImageInspector {
    fn inspect(&self, path: &Path, filename: &str) -> Result<MediaInfo> {
        let mut raw = base_info(path, filename)?;
        let reader = image::ImageReader::open(path)?
            .with_guessed_format()
            .map_err(ContentError::Io)?;
        let container = reader
            .format()
            .map(|format| format!("{format:?}").to_ascii_lowercase());
        let (width, height) = reader.into_dimensions().map_err(|err| {
            ContentError::InvalidMedia(format!(
                "cannot read image dimensions of {filename}: {err}"
            ))
        })?;

        raw.insert(
            "container".into(),
            container.map_or(Value::Null, Value::String),
        );
        Ok(MediaInfo {
            width: Some(width),
            height: Some(height),
            duration: None,
            raw,
        })
    }
}

/// Routes each file to the inspector registered for its extension
/// category, falling back to [`FileInspector`].
#[derive(Clone)]
pub struct InspectorRegistry {
    categories: HashMap<String, MediaCategory>,
    inspectors: HashMap<MediaCategory, Arc<dyn MediaInspector>>,
    fallback: Arc<dyn MediaInspector>,
}

impl fmt::Debug for InspectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut registered: Vec<String> = self
            .inspectors
            .keys()
            .map(|category| format!("{category:?}"))
            .collect();
        registered.sort();
        f.debug_struct("InspectorRegistry")
            .field("extensions", &self.categories.len())
            .field("registered", &registered)
            .finish()
    }
}

impl InspectorRegistry {
    /// Empty registry: every file goes to the fallback.
    pub fn new(config: &MediaConfig) -> Self {
        let categories = config
            .allowed_extensions()
            .filter_map(|ext| Some((ext.to_string(), config.category(ext)?)))
            .collect();
        Self {
            categories,
            inspectors: HashMap::new(),
            fallback: Arc::new(FileInspector),
        }
    }

    /// Stock inspectors for every category this build supports.
    pub fn from_config(config: &MediaConfig) -> Self {
        let registry = Self::new(config)
            .with(MediaCategory::Image, Arc::new(ImageInspector))
            .with(MediaCategory::Document, Arc::new(super::DocumentInspector));
        #[cfg(feature = "ffmpeg")]
        let registry = registry.with(
            MediaCategory::Video,
            Arc::new(super::video::VideoInspector::new()),
        );
        registry
    }

    pub fn with(
        mut self,
        category: MediaCategory,
        inspector: Arc<dyn MediaInspector>,
    ) -> Self {
        self.inspectors.insert(category, inspector);
        self
    }

    fn inspector_for(&self, filename: &str) -> &Arc<dyn MediaInspector> {
        extension_of(filename)
            .and_then(|ext| self.categories.get(&ext))
            .and_then(|category| self.inspectors.get(category))
            .unwrap_or(&self.fallback)
    }
}

impl MediaInspector for InspectorRegistry {
    fn inspect(&self, path: &Path, filename: &str) -> Result<MediaInfo> {
        debug!(filename, "inspecting media");
        self.inspector_for(filename).inspect(path, filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, width: u32, height: u32) {
        image::RgbImage::from_pixel(width, height, image::Rgb([200, 10, 10]))
            .save_with_format(path, image::ImageFormat::Png)
            .unwrap();
    }

    #[test]
    fn images_report_their_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.bin");
        write_png(&path, 40, 30);

        let info = ImageInspector.inspect(&path, "poster.png").unwrap();
        assert_eq!((info.width, info.height), (Some(40), Some(30)));
        assert_eq!(info.raw["container"], "png");
        assert_eq!(info.raw["filename"], "poster.png");
        assert!(info.duration.is_none());
    }

    #[test]
    fn broken_images_are_invalid_media() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let err = ImageInspector.inspect(&path, "fake.png").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidMedia);
    }

    #[test]
    fn registry_dispatches_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("a.png");
        write_png(&png, 8, 8);
        let pdf = dir.path().join("a.pdf");
        std::fs::write(&pdf, b"%PDF").unwrap();

        let registry = InspectorRegistry::from_config(&MediaConfig::default());
        assert_eq!(registry.inspect(&png, "a.PNG").unwrap().width, Some(8));
        // Documents go to the PDF parser, which refuses a bare header.
        let err = registry.inspect(&pdf, "a.pdf").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidMedia);

        let images_only = InspectorRegistry::new(&MediaConfig::default())
            .with(MediaCategory::Image, Arc::new(ImageInspector));
        let doc = images_only.inspect(&pdf, "a.pdf").unwrap();
        assert_eq!(doc.width, None);
        assert_eq!(doc.raw["size"], 4);
        assert_eq!(doc.raw["extension"], ".pdf");
    }
}
