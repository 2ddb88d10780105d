use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage, imageops::FilterType};
use tracing::{debug, warn};

use crate::{
    config::{MediaCategory, MediaConfig, ThumbnailSize, extension_of},
    error::{ContentError, Result},
};

/// A thumbnail written to local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedThumbnail {
    /// The box that was requested.
    pub size: ThumbnailSize,
    pub path: PathBuf,
}

impl RenderedThumbnail {
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}

/// Renders thumbnails of a local file into `out_dir`. Blocking.
pub trait ThumbnailGenerator: Send + Sync {
    fn render(
        &self,
        source: &Path,
        filename: &str,
        out_dir: &Path,
        sizes: &[ThumbnailSize],
        background: Option<[u8; 4]>,
    ) -> Result<Vec<RenderedThumbnail>>;
}

/// `"{filename}.thumb_{n}.png"` for square boxes,
/// `"{filename}.thumb_{w}x{h}.png"` otherwise.
pub fn thumbnail_filename(filename: &str, size: ThumbnailSize) -> String {
    format!("{filename}.thumb_{}.png", size.label())
}

/// Largest size with the source's aspect ratio that fits inside the box.
/// Images already inside the box keep their size.
pub fn fit_within(width: u32, height: u32, size: ThumbnailSize) -> (u32, u32) {
    if width <= size.width && height <= size.height {
        return (width.max(1), height.max(1));
    }
    let scale = f64::min(
        f64::from(size.width) / f64::from(width),
        f64::from(size.height) / f64::from(height),
    );
    let fitted = |side: u32| ((f64::from(side) * scale).round() as u32).max(1);
    (fitted(width).min(size.width), fitted(height).min(size.height))
}

/// Still-image thumbnails via the `image` crate, written as PNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageThumbnailer;

impl ImageThumbnailer {
    /// Writes one PNG per size of an already decoded picture.
    pub(crate) fn render_all(
        decoded: &DynamicImage,
        filename: &str,
        out_dir: &Path,
        sizes: &[ThumbnailSize],
        background: Option<[u8; 4]>,
    ) -> Result<Vec<RenderedThumbnail>> {
        std::fs::create_dir_all(out_dir)?;

        let mut rendered = Vec::with_capacity(sizes.len());
        for size in sizes {
            let path = out_dir.join(thumbnail_filename(filename, *size));
            Self::render_one(decoded, *size, background)
                .save_with_format(&path, ImageFormat::Png)
                .map_err(|err| {
                    ContentError::Internal(format!(
                        "cannot write thumbnail {}: {err}",
                        path.display()
                    ))
                })?;
            debug!(filename, size = %size.label(), "rendered thumbnail");
            rendered.push(RenderedThumbnail { size: *size, path });
        }
        Ok(rendered)
    }

    fn render_one(
        source: &DynamicImage,
        size: ThumbnailSize,
        background: Option<[u8; 4]>,
    ) -> DynamicImage {
        let (width, height) = fit_within(source.width(), source.height(), size);
        let fitted = source.resize_exact(width, height, FilterType::Lanczos3);

        match background {
            None => fitted,
            Some(rgba) => {
                let mut canvas =
                    RgbaImage::from_pixel(size.width, size.height, Rgba(rgba));
                let x = i64::from((size.width - width) / 2);
                let y = i64::from((size.height - height) / 2);
                image::imageops::overlay(&mut canvas, &fitted.to_rgba8(), x, y);
                DynamicImage::ImageRgba8(canvas)
            }
        }
    }
}

impl ThumbnailGenerator for ImageThumbnailer {
    fn render(
        &self,
        source: &Path,
        filename: &str,
        out_dir: &Path,
        sizes: &[ThumbnailSize],
        background: Option<[u8; 4]>,
    ) -> Result<Vec<RenderedThumbnail>> {
        let decoded = image::ImageReader::open(source)?
            .with_guessed_format()?
            .decode()
            .map_err(|err| {
                ContentError::InvalidMedia(format!("cannot decode {filename}: {err}"))
            })?;
        Self::render_all(&decoded, filename, out_dir, sizes, background)
    }
}

/// Routes each file to the generator registered for its extension
/// category. Files without a generator get no thumbnails.
#[derive(Clone)]
pub struct ThumbnailerRegistry {
    categories: HashMap<String, MediaCategory>,
    generators: HashMap<MediaCategory, Arc<dyn ThumbnailGenerator>>,
}

impl fmt::Debug for ThumbnailerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut registered: Vec<String> = self
            .generators
            .keys()
            .map(|category| format!("{category:?}"))
            .collect();
        registered.sort();
        f.debug_struct("ThumbnailerRegistry")
            .field("extensions", &self.categories.len())
            .field("registered", &registered)
            .finish()
    }
}

impl ThumbnailerRegistry {
    pub fn new(config: &MediaConfig) -> Self {
        let categories = config
            .allowed_extensions()
            .filter_map(|ext| Some((ext.to_string(), config.category(ext)?)))
            .collect();
        Self {
            categories,
            generators: HashMap::new(),
        }
    }

    /// Stock generators for every category this build supports.
    pub fn from_config(config: &MediaConfig) -> Self {
        let registry =
            Self::new(config).with(MediaCategory::Image, Arc::new(ImageThumbnailer));
        #[cfg(feature = "ffmpeg")]
        let registry = registry.with(
            MediaCategory::Video,
            Arc::new(super::video::VideoThumbnailer::default()),
        );
        registry
    }

    pub fn with(
        mut self,
        category: MediaCategory,
        generator: Arc<dyn ThumbnailGenerator>,
    ) -> Self {
        self.generators.insert(category, generator);
        self
    }
}

impl ThumbnailGenerator for ThumbnailerRegistry {
    fn render(
        &self,
        source: &Path,
        filename: &str,
        out_dir: &Path,
        sizes: &[ThumbnailSize],
        background: Option<[u8; 4]>,
    ) -> Result<Vec<RenderedThumbnail>> {
        let extension = extension_of(filename);
        let generator = extension
            .as_ref()
            .and_then(|ext| self.categories.get(ext))
            .and_then(|category| self.generators.get(category));
        match generator {
            Some(generator) => {
                generator.render(source, filename, out_dir, sizes, background)
            }
            None => {
                warn!(
                    filename,
                    extension = extension.as_deref().unwrap_or(""),
                    "no thumbnail generator installed for this extension, skipping thumbnails"
                );
                Ok(Vec::new())
            }
        }
    }
}
