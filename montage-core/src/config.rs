use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    env, fmt, fs,
    path::{Path, PathBuf},
};

use montage_model::DEFAULT_SEQUENCE_DURATION_MS;

pub const CONFIG_PATH_ENV: &str = "MONTAGE_MEDIA_CONFIG_PATH";
pub const CONFIG_JSON_ENV: &str = "MONTAGE_MEDIA_CONFIG_JSON";

fn default_video_extensions() -> Vec<String> {
    [".avi", ".mov", ".mp4", ".ogv", ".webm", ".wmv"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_image_extensions() -> Vec<String> {
    [".jpg", ".png", ".gif"].into_iter().map(String::from).collect()
}

fn default_document_extensions() -> Vec<String> {
    vec![".pdf".to_string()]
}

/// Source that produced the media configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MediaConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

impl fmt::Display for MediaConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaConfigSource::Default => f.write_str("built-in defaults"),
            MediaConfigSource::EnvPath(path) => {
                write!(f, "${CONFIG_PATH_ENV} ({})", path.display())
            }
            MediaConfigSource::EnvInline => write!(f, "${CONFIG_JSON_ENV}"),
            MediaConfigSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Which family an accepted extension belongs to. Inspectors and thumbnail
/// generators are picked per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaCategory {
    Video,
    Image,
    Document,
    Other,
}

/// A thumbnail bounding box. Serialized as a bare integer when square and as
/// a `[width, height]` pair otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "ThumbnailSizeRepr", into = "ThumbnailSizeRepr")]
pub struct ThumbnailSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ThumbnailSizeRepr {
    Square(u32),
    Box([u32; 2]),
}

impl From<ThumbnailSizeRepr> for ThumbnailSize {
    fn from(repr: ThumbnailSizeRepr) -> Self {
        match repr {
            ThumbnailSizeRepr::Square(side) => ThumbnailSize::square(side),
            ThumbnailSizeRepr::Box([width, height]) => {
                ThumbnailSize::new(width, height)
            }
        }
    }
}

impl From<ThumbnailSize> for ThumbnailSizeRepr {
    fn from(size: ThumbnailSize) -> Self {
        if size.is_square() {
            ThumbnailSizeRepr::Square(size.width)
        } else {
            ThumbnailSizeRepr::Box([size.width, size.height])
        }
    }
}

impl ThumbnailSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn square(side: u32) -> Self {
        Self::new(side, side)
    }

    pub fn is_square(&self) -> bool {
        self.width == self.height
    }

    /// `"128"` for square boxes, `"320x180"` otherwise.
    pub fn label(&self) -> String {
        if self.is_square() {
            self.width.to_string()
        } else {
            format!("{}x{}", self.width, self.height)
        }
    }
}

/// Constants used by the duration estimator. All values are milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DurationConfig {
    /// Estimate for a format that declares no duration at all.
    pub unknown_format_ms: u64,
    /// Length of one step when a format declares a step count.
    pub step_ms: u64,
    /// Added once per sequence member for the transition into it.
    pub transition_gap_ms: u64,
    /// Added between consecutive steps of a multi-step member.
    pub step_padding_ms: u64,
    /// Default duration for newly created sequences.
    pub default_sequence_duration_ms: u64,
}

impl Default for DurationConfig {
    fn default() -> Self {
        Self {
            unknown_format_ms: 10_000,
            step_ms: 10_000,
            transition_gap_ms: 1_000,
            step_padding_ms: 250,
            default_sequence_duration_ms: DEFAULT_SEQUENCE_DURATION_MS,
        }
    }
}

/// Media handling settings: what may be uploaded, how thumbnails are
/// rendered, where files land and how ingestion work is scheduled.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MediaConfig {
    pub video_extensions: Vec<String>,
    pub image_extensions: Vec<String>,
    pub document_extensions: Vec<String>,
    /// Accepted for upload but handled as opaque files.
    pub extra_extensions: Vec<String>,
    pub thumbnail_sizes: Vec<ThumbnailSize>,
    /// RGB or RGBA. When set, thumbnails are padded out to the full box.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_background: Option<Vec<u8>>,
    pub upload_bucket: String,
    pub publish_bucket: String,
    pub token_ttl_secs: u64,
    /// Parent directory for per-upload scratch space. System temp when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
    pub ingest_workers: usize,
    pub ingest_queue_size: usize,
    pub duration: DurationConfig,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            video_extensions: default_video_extensions(),
            image_extensions: default_image_extensions(),
            document_extensions: default_document_extensions(),
            extra_extensions: Vec::new(),
            thumbnail_sizes: vec![
                ThumbnailSize::square(128),
                ThumbnailSize::square(256),
                ThumbnailSize::square(512),
            ],
            thumbnail_background: None,
            upload_bucket: "incoming".to_string(),
            publish_bucket: "cdn".to_string(),
            token_ttl_secs: 600,
            scratch_dir: None,
            ingest_workers: 2,
            ingest_queue_size: 64,
            duration: DurationConfig::default(),
        }
    }
}

impl MediaConfig {
    /// Load media configuration using environment variables.
    /// Evaluation order:
    /// 1) `$MONTAGE_MEDIA_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$MONTAGE_MEDIA_CONFIG_JSON` (inline JSON),
    /// 3) `./montage.toml` or `./config/montage.toml` if present,
    /// 4) defaults.
    pub fn load_from_env() -> anyhow::Result<(Self, MediaConfigSource)> {
        if let Ok(path_str) = env::var(CONFIG_PATH_ENV)
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let config = Self::load_from_file(&path)?;
            return Ok((config, MediaConfigSource::EnvPath(path)));
        }

        if let Ok(raw) = env::var(CONFIG_JSON_ENV)
            && !raw.trim().is_empty()
        {
            let parsed = Self::parse_json(&raw)
                .with_context(|| format!("failed to parse {CONFIG_JSON_ENV}"))?;
            return Ok((parsed, MediaConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file() {
            let config = Self::load_from_file(&path)?;
            return Ok((config, MediaConfigSource::File(path)));
        }

        Ok((Self::default(), MediaConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read media config from {}", path.display())
        })?;

        let parsed = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents).with_context(|| {
                format!("invalid media config {}", path.display())
            })?,
            Some("toml") => toml::from_str::<Self>(&contents)
                .map_err(|err| {
                    anyhow!("invalid media config {}: {}", path.display(), err)
                })?
                .validated()?,
            _ => Self::parse_from_str(&contents, &path.display().to_string())?,
        };
        Ok(parsed)
    }

    pub fn parse_from_str(
        contents: &str,
        origin: &str,
    ) -> anyhow::Result<Self> {
        // TOML first, then JSON.
        let parsed = toml::from_str::<Self>(contents).or_else(|toml_err| {
            serde_json::from_str::<Self>(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse media config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })?;
        parsed.validated()
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str::<Self>(raw)
            .map_err(|err| anyhow!("invalid media config json: {err}"))?
            .validated()
    }

    fn find_default_file() -> Option<PathBuf> {
        const CANDIDATES: &[&str] = &["montage.toml", "config/montage.toml"];

        CANDIDATES
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(|path| path.to_path_buf())
    }

    /// Normalises extensions, drops repeated thumbnail sizes and rejects
    /// values the pipeline cannot work with.
    pub fn validated(mut self) -> anyhow::Result<Self> {
        for list in [
            &mut self.video_extensions,
            &mut self.image_extensions,
            &mut self.document_extensions,
            &mut self.extra_extensions,
        ] {
            let mut seen = HashSet::new();
            let normalized: Vec<String> = list
                .iter()
                .filter_map(|ext| normalize_extension(ext))
                .filter(|ext| seen.insert(ext.clone()))
                .collect();
            *list = normalized;
        }

        let mut seen = HashSet::new();
        self.thumbnail_sizes.retain(|size| seen.insert(*size));
        if let Some(size) = self
            .thumbnail_sizes
            .iter()
            .find(|size| size.width == 0 || size.height == 0)
        {
            bail!("thumbnail size {} has a zero dimension", size.label());
        }

        if let Some(background) = &self.thumbnail_background
            && !matches!(background.len(), 3 | 4)
        {
            bail!(
                "thumbnail_background must have 3 (RGB) or 4 (RGBA) channels, got {}",
                background.len()
            );
        }

        if self.ingest_workers == 0 {
            bail!("ingest_workers must be at least 1");
        }
        if self.ingest_queue_size == 0 {
            bail!("ingest_queue_size must be at least 1");
        }
        if self.upload_bucket.trim().is_empty()
            || self.publish_bucket.trim().is_empty()
        {
            bail!("upload_bucket and publish_bucket must be set");
        }
        if self.upload_bucket == self.publish_bucket {
            bail!(
                "upload_bucket and publish_bucket must differ (both '{}')",
                self.upload_bucket
            );
        }
        if self.duration.default_sequence_duration_ms == 0 {
            bail!("duration.default_sequence_duration_ms must be positive");
        }

        Ok(self)
    }

    /// Category of an already normalised extension, or `None` when the
    /// extension is not accepted at all.
    pub fn category(&self, extension: &str) -> Option<MediaCategory> {
        let ext = normalize_extension(extension)?;
        let contains = |list: &[String]| list.iter().any(|e| *e == ext);
        if contains(&self.video_extensions) {
            Some(MediaCategory::Video)
        } else if contains(&self.image_extensions) {
            Some(MediaCategory::Image)
        } else if contains(&self.document_extensions) {
            Some(MediaCategory::Document)
        } else if contains(&self.extra_extensions) {
            Some(MediaCategory::Other)
        } else {
            None
        }
    }

    pub fn is_allowed_extension(&self, extension: &str) -> bool {
        self.category(extension).is_some()
    }

    /// Union of every accepted extension.
    pub fn allowed_extensions(&self) -> impl Iterator<Item = &str> {
        self.video_extensions
            .iter()
            .chain(&self.image_extensions)
            .chain(&self.document_extensions)
            .chain(&self.extra_extensions)
            .map(String::as_str)
    }

    pub fn background_rgba(&self) -> Option<[u8; 4]> {
        match self.thumbnail_background.as_deref()? {
            [r, g, b] => Some([*r, *g, *b, 255]),
            [r, g, b, a] => Some([*r, *g, *b, *a]),
            _ => None,
        }
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(env::temp_dir)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string(self).context("failed to render media config as toml")
    }
}

/// Lowercase with exactly one leading dot. Blank input yields `None`.
pub fn normalize_extension(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!(".{}", trimmed.to_ascii_lowercase()))
}

/// Extension of `filename` including the dot, lowercased.
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(normalize_extension)
}
