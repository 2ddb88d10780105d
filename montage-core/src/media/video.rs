use std::{path::Path, sync::OnceLock};

use ffmpeg_next as ffmpeg;
use image::{DynamicImage, RgbImage};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::{
    ImageThumbnailer, MediaInfo, MediaInspector, RenderedThumbnail,
    ThumbnailGenerator,
};
use crate::{
    config::ThumbnailSize,
    error::{ContentError, Result},
};

/// Packets read from the video stream before giving up on a frame.
const MAX_PACKETS: usize = 500;

static FFMPEG_INIT: OnceLock<std::result::Result<(), ffmpeg::Error>> =
    OnceLock::new();

fn ensure_ffmpeg() -> Result<()> {
    let outcome = FFMPEG_INIT.get_or_init(|| {
        let outcome = ffmpeg::init();
        if outcome.is_ok() {
            info!("FFmpeg initialized successfully");
        }
        outcome
    });
    (*outcome).map_err(ContentError::Ffmpeg)
}

/// Probes audio/video containers with FFmpeg: duration, the main video
/// stream's dimensions, codecs, bitrate and frame rate.
#[derive(Debug, Default, Clone, Copy)]
pub struct VideoInspector;

impl VideoInspector {
    pub fn new() -> Self {
        Self
    }
}

impl MediaInspector for VideoInspector {
    fn inspect(&self, path: &Path, filename: &str) -> Result<MediaInfo> {
        ensure_ffmpeg()?;
        debug!("Opening file with FFmpeg: {}", path.display());

        let input = ffmpeg::format::input(path).map_err(ContentError::Ffmpeg)?;
        let mut info = MediaInfo::default();
        let mut raw = Map::new();
        raw.insert("filename".into(), filename.into());
        raw.insert("container".into(), input.format().name().into());

        if input.duration() != ffmpeg::ffi::AV_NOPTS_VALUE && input.duration() > 0 {
            // AV_TIME_BASE is microseconds.
            let millis = input.duration() / (ffmpeg::ffi::AV_TIME_BASE as i64 / 1_000);
            info.duration = Some(millis.into());
        }
        if input.bit_rate() > 0 {
            raw.insert("bitrate".into(), (input.bit_rate() as u64).into());
        }

        let mut best_video: Option<(u32, u32, String, Option<f64>)> = None;
        let mut audio_codec: Option<String> = None;

        for stream in input.streams() {
            let codec = ffmpeg::codec::context::Context::from_parameters(
                stream.parameters(),
            )
            .map_err(ContentError::Ffmpeg)?;

            match codec.medium() {
                ffmpeg::media::Type::Video => {
                    let Ok(video) = codec.decoder().video() else {
                        continue;
                    };
                    let (width, height) = (video.width(), video.height());
                    let codec_name = video
                        .codec()
                        .map(|c| c.name().to_string())
                        .unwrap_or_default();
                    // Cover art and embedded stills are not the main stream.
                    let attached = stream
                        .disposition()
                        .contains(ffmpeg::format::stream::Disposition::ATTACHED_PIC);
                    if attached || codec_name == "mjpeg" {
                        continue;
                    }
                    let rate = stream.avg_frame_rate();
                    let framerate = (rate.denominator() != 0).then(|| {
                        f64::from(rate.numerator()) / f64::from(rate.denominator())
                    });
                    let better = best_video
                        .as_ref()
                        .is_none_or(|(best_width, ..)| width > *best_width);
                    if better {
                        best_video = Some((width, height, codec_name, framerate));
                    }
                }
                ffmpeg::media::Type::Audio => {
                    if audio_codec.is_none()
                        && let Ok(audio) = codec.decoder().audio()
                    {
                        audio_codec = audio.codec().map(|c| c.name().to_string());
                    }
                }
                _ => {}
            }
        }

        if let Some((width, height, codec_name, framerate)) = best_video {
            info.width = Some(width);
            info.height = Some(height);
            raw.insert("video_codec".into(), codec_name.into());
            raw.insert(
                "framerate".into(),
                framerate.map_or(Value::Null, Value::from),
            );
        }
        raw.insert(
            "audio_codec".into(),
            audio_codec.map_or(Value::Null, Value::String),
        );

        info.raw = raw;
        Ok(info)
    }
}

/// Grabs one frame part way into a video and renders it like a still image.
#[derive(Debug, Clone, Copy)]
pub struct VideoThumbnailer {
    /// Fraction of the duration to seek to before decoding.
    pub position: f64,
}

impl Default for VideoThumbnailer {
    fn default() -> Self {
        Self { position: 0.1 }
    }
}

impl VideoThumbnailer {
    fn grab_frame(&self, source: &Path, filename: &str) -> Result<DynamicImage> {
        ensure_ffmpeg()?;
        let invalid = |what: &str| {
            ContentError::InvalidMedia(format!("cannot take a frame of {filename}: {what}"))
        };

        let mut input = ffmpeg::format::input(source)
            .map_err(|err| invalid(&err.to_string()))?;
        let (stream_index, parameters) = {
            let stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| invalid("no video stream"))?;
            (stream.index(), stream.parameters())
        };

        let duration = input.duration();
        if duration > 0 && self.position > 0.0 {
            let target = (duration as f64 * self.position) as i64;
            if let Err(err) = input.seek(target, ..target) {
                warn!(filename, "seek failed, taking the first frame: {err}");
            }
        }

        let mut decoder = ffmpeg::codec::context::Context::from_parameters(parameters)
            .and_then(|context| context.decoder().video())
            .map_err(|err| invalid(&err.to_string()))?;
        let (width, height) = (decoder.width(), decoder.height());
        if width == 0 || height == 0 {
            return Err(invalid("the stream has no dimensions"));
        }
        let mut scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg::format::Pixel::RGB24,
            width,
            height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(ContentError::Ffmpeg)?;

        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        let mut rgb = ffmpeg::util::frame::video::Video::empty();
        let packets = input
            .packets()
            .filter(|(stream, _)| stream.index() == stream_index)
            .take(MAX_PACKETS);
        for (_, packet) in packets {
            if let Err(err) = decoder.send_packet(&packet) {
                debug!(filename, "skipping undecodable packet: {err}");
                continue;
            }
            if decoder.receive_frame(&mut decoded).is_ok() {
                scaler.run(&decoded, &mut rgb).map_err(ContentError::Ffmpeg)?;
                let pixels = packed_rgb(rgb.data(0), rgb.stride(0), width, height)
                    .ok_or_else(|| invalid("the decoded frame is truncated"))?;
                let frame = RgbImage::from_raw(width, height, pixels)
                    .ok_or_else(|| invalid("the decoded frame is truncated"))?;
                return Ok(DynamicImage::ImageRgb8(frame));
            }
        }
        Err(invalid(&format!("no frame decoded within {MAX_PACKETS} packets")))
    }
}

impl ThumbnailGenerator for VideoThumbnailer {
    fn render(
        &self,
        source: &Path,
        filename: &str,
        out_dir: &Path,
        sizes: &[ThumbnailSize],
        background: Option<[u8; 4]>,
    ) -> Result<Vec<RenderedThumbnail>> {
        let frame = self.grab_frame(source, filename)?;
        ImageThumbnailer::render_all(&frame, filename, out_dir, sizes, background)
    }
}

/// Drops the per-row padding FFmpeg leaves after `width * 3` bytes.
fn packed_rgb(data: &[u8], stride: usize, width: u32, height: u32) -> Option<Vec<u8>> {
    let row = usize::try_from(width).ok()?.checked_mul(3)?;
    let rows = usize::try_from(height).ok()?;
    if stride < row {
        return None;
    }
    let mut packed = Vec::with_capacity(row * rows);
    for y in 0..rows {
        let start = y * stride;
        packed.extend_from_slice(data.get(start..start + row)?);
    }
    Some(packed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_padding_is_removed() {
        // 2x2 RGB with two padding bytes per row.
        let data = [1, 2, 3, 4, 5, 6, 0, 0, 7, 8, 9, 10, 11, 12, 0, 0];
        assert_eq!(
            packed_rgb(&data, 8, 2, 2),
            Some(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12])
        );
        assert_eq!(packed_rgb(&data[..10], 8, 2, 2), None);
        assert_eq!(packed_rgb(&data, 4, 2, 2), None);
    }

    #[test]
    fn files_without_video_are_invalid_media() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"not a video at all").unwrap();

        let err = VideoThumbnailer::default()
            .render(&path, "clip.mp4", dir.path(), &[ThumbnailSize::square(16)], None)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidMedia);
    }
}
