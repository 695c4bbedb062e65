use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, DynamicImage, ImageFormat, RgbaImage};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::domain::MainLayer;
use crate::error::MemorError;
use crate::tools::{ToolPaths, run_tool};

const JPEG_QUALITY: u8 = 95;

/// Merges a transparent overlay onto a `-main` image or video.
pub trait OverlayCompositor {
    /// Returns the `-combined` sibling of `base`. An existing combined file is returned as is.
    fn composite(&self, base: &Path, overlay: &Path) -> Result<PathBuf, MemorError>;
}

impl<T: OverlayCompositor + ?Sized> OverlayCompositor for &T {
    fn composite(&self, base: &Path, overlay: &Path) -> Result<PathBuf, MemorError> {
        (**self).composite(base, overlay)
    }
}

/// Combined sibling path for a `-main.jpg` / `-main.mp4` file.
pub fn combined_path_for(base: &Path) -> Result<(MainLayer, PathBuf), MemorError> {
    let name = base
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| MemorError::InvalidInput(format!("invalid file name: {}", base.display())))?;
    let layer = MainLayer::from_file_name(name).ok_or_else(|| {
        MemorError::InvalidInput(format!(
            "base file must end with '-main.jpg' or '-main.mp4', got: {name}"
        ))
    })?;
    let stem = &name[..name.len() - layer.main_suffix().len()];
    let combined = base.with_file_name(format!("{stem}{}", layer.combined_suffix()));
    Ok((layer, combined))
}

#[derive(Debug, Clone)]
pub struct MediaCompositor {
    tools: ToolPaths,
    video_timeout: Duration,
}

impl MediaCompositor {
    pub fn new(tools: &ToolPaths, video_timeout: Duration) -> Self {
        Self {
            tools: tools.clone(),
            video_timeout,
        }
    }

    fn composite_video(
        &self,
        base: &Path,
        overlay: &Path,
        combined: &Path,
    ) -> Result<(), MemorError> {
        let ffprobe = self.tools.require_ffprobe()?;
        let ffmpeg = self.tools.require_ffmpeg()?;

        let stream = probe_video(ffprobe, base)?;
        match ffmpeg_decoders(ffmpeg) {
            Ok(decoders) => check_decoder(&stream, &decoders, base)?,
            Err(err) => debug!("could not list ffmpeg decoders: {err}"),
        }
        let (width, height) = stream.display_size();

        let dir = parent_dir(combined);
        let scaled = tempfile::Builder::new()
            .prefix(".overlay-")
            .suffix(".png")
            .tempfile_in(dir)
            .map_err(|err| MemorError::VideoProcessing(err.to_string()))?
            .into_temp_path();
        let overlay_img = open_rgba(overlay, MemorError::VideoProcessing)?;
        let overlay_img = fit_to(overlay_img, width, height);
        overlay_img
            .save_with_format(&scaled, ImageFormat::Png)
            .map_err(|err| {
                MemorError::VideoProcessing(format!(
                    "failed to resize overlay to {width}x{height}: {err}"
                ))
            })?;

        let output = tempfile::Builder::new()
            .prefix(".combined-")
            .suffix(".mp4")
            .tempfile_in(dir)
            .map_err(|err| MemorError::VideoProcessing(err.to_string()))?
            .into_temp_path();
        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            base.to_string_lossy().to_string(),
            "-i".to_string(),
            scaled.to_string_lossy().to_string(),
            "-filter_complex".to_string(),
            "[0:v][1:v]overlay=0:0".to_string(),
            "-codec:a".to_string(),
            "copy".to_string(),
            "-y".to_string(),
            output.to_string_lossy().to_string(),
        ];
        let name = display_name(base);
        let result = run_tool(ffmpeg, &args, Some(self.video_timeout)).map_err(|err| match err {
            MemorError::ToolFailed { message, .. } => {
                MemorError::VideoProcessing(format!("ffmpeg failed for {name}: {message}"))
            }
            other => other,
        })?;
        if !result.success {
            return Err(MemorError::VideoProcessing(format!(
                "ffmpeg failed for {name}: {}",
                result.failure_message(ffmpeg)
            )));
        }
        ensure_non_empty(&output, MemorError::VideoProcessing)?;
        output
            .persist(combined)
            .map_err(|err| MemorError::VideoProcessing(err.to_string()))?;
        Ok(())
    }
}

impl OverlayCompositor for MediaCompositor {
    fn composite(&self, base: &Path, overlay: &Path) -> Result<PathBuf, MemorError> {
        let (layer, combined) = combined_path_for(base)?;
        if combined.exists() {
            info!(path = %combined.display(), "combined file already exists, skipping merge");
            return Ok(combined);
        }
        if !base.exists() {
            return Err(MemorError::FileNotFound(base.to_path_buf()));
        }
        if !overlay.exists() {
            return Err(MemorError::FileNotFound(overlay.to_path_buf()));
        }

        match layer {
            MainLayer::Image => composite_image(base, overlay, &combined)?,
            MainLayer::Video => self.composite_video(base, overlay, &combined)?,
        }

        if let Err(err) = fs::remove_file(overlay) {
            warn!(path = %overlay.display(), "could not delete overlay: {err}");
        }
        debug!(path = %combined.display(), "overlay merged");
        Ok(combined)
    }
}

fn composite_image(base: &Path, overlay: &Path, combined: &Path) -> Result<(), MemorError> {
    let mut canvas = open_rgba(base, MemorError::ImageProcessing)?;
    let overlay_img = open_rgba(overlay, MemorError::ImageProcessing)?;
    let (width, height) = canvas.dimensions();
    let overlay_img = fit_to(overlay_img, width, height);
    imageops::overlay(&mut canvas, &overlay_img, 0, 0);
    let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();

    let mut temp = tempfile::Builder::new()
        .prefix(".combined-")
        .suffix(".jpg")
        .tempfile_in(parent_dir(combined))
        .map_err(|err| MemorError::ImageProcessing(err.to_string()))?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        let mut encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
        encoder
            .encode(rgb.as_raw(), width, height, ColorType::Rgb8.into())
            .map_err(|err| {
                MemorError::ImageProcessing(format!(
                    "failed to encode {}: {err}",
                    combined.display()
                ))
            })?;
        writer
            .flush()
            .map_err(|err| MemorError::ImageProcessing(err.to_string()))?;
    }
    ensure_non_empty(temp.path(), MemorError::ImageProcessing)?;
    temp.persist(combined)
        .map_err(|err| MemorError::ImageProcessing(err.to_string()))?;
    Ok(())
}

fn open_rgba(path: &Path, kind: fn(String) -> MemorError) -> Result<RgbaImage, MemorError> {
    let img = image::open(path)
        .map_err(|err| kind(format!("failed to open {}: {err}", display_name(path))))?;
    if img.width() == 0 || img.height() == 0 {
        return Err(kind(format!(
            "{} has invalid dimensions {}x{}",
            display_name(path),
            img.width(),
            img.height()
        )));
    }
    Ok(img.to_rgba8())
}

fn fit_to(img: RgbaImage, width: u32, height: u32) -> RgbaImage {
    if img.dimensions() == (width, height) {
        img
    } else {
        imageops::resize(&img, width, height, FilterType::Lanczos3)
    }
}

fn ensure_non_empty(path: &Path, kind: fn(String) -> MemorError) -> Result<(), MemorError> {
    let len = fs::metadata(path).map(|meta| meta.len()).unwrap_or(0);
    if len == 0 {
        return Err(kind(format!("{} is empty", display_name(path))));
    }
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoStream {
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
    /// Clockwise display rotation in degrees, normalised to `0..360`.
    pub rotation: u32,
}

impl VideoStream {
    /// Frame size after ffmpeg applies the rotation metadata.
    pub fn display_size(&self) -> (u32, u32) {
        if self.rotation % 180 == 90 {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    tags: ProbeTags,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Deserialize, Default)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

impl ProbeStream {
    fn rotation(&self) -> u32 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|side| side.rotation)
            .or_else(|| {
                self.tags
                    .rotate
                    .as_deref()
                    .and_then(|value| value.trim().parse::<f64>().ok())
            })
            .unwrap_or(0.0);
        (degrees.round() as i64).rem_euclid(360) as u32
    }
}

fn probe_video(ffprobe: &Path, video: &Path) -> Result<VideoStream, MemorError> {
    let args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-select_streams".to_string(),
        "v:0".to_string(),
        "-show_entries".to_string(),
        "stream=codec_name,width,height:stream_tags=rotate:stream_side_data=rotation"
            .to_string(),
        "-of".to_string(),
        "json".to_string(),
        video.to_string_lossy().to_string(),
    ];
    let output = run_tool(ffprobe, &args, None)?;
    if !output.success {
        return Err(MemorError::VideoProcessing(format!(
            "failed to read video dimensions from {}: {}",
            display_name(video),
            output.failure_message(ffprobe)
        )));
    }
    parse_probe(&output.stdout)
}

pub fn parse_probe(json: &str) -> Result<VideoStream, MemorError> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|err| MemorError::VideoProcessing(format!("unreadable ffprobe output: {err}")))?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| MemorError::VideoProcessing("no video stream found".to_string()))?;
    let width = stream.width.unwrap_or(0);
    let height = stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(MemorError::VideoProcessing(format!(
            "invalid video dimensions: {width}x{height}"
        )));
    }
    let rotation = stream.rotation();
    Ok(VideoStream {
        codec_name: stream.codec_name.unwrap_or_default(),
        width,
        height,
        rotation,
    })
}

/// Fails with `UnsupportedDecoder` when ffmpeg lists no decoder for the probed codec.
pub fn check_decoder(
    stream: &VideoStream,
    decoders: &HashSet<String>,
    base: &Path,
) -> Result<(), MemorError> {
    if stream.codec_name.is_empty() || decoders.contains(&stream.codec_name) {
        return Ok(());
    }
    Err(MemorError::UnsupportedDecoder {
        codec: stream.codec_name.clone(),
        path: base.to_path_buf(),
    })
}

fn ffmpeg_decoders(ffmpeg: &Path) -> Result<HashSet<String>, MemorError> {
    let args = vec!["-hide_banner".to_string(), "-decoders".to_string()];
    let output = run_tool(ffmpeg, &args, None)?;
    if !output.success {
        return Err(MemorError::ToolFailed {
            tool: "ffmpeg".to_string(),
            message: output.failure_message(ffmpeg),
        });
    }
    Ok(parse_decoders(&output.stdout))
}

/// Decoder names from `ffmpeg -decoders`; entries follow the `------` separator.
pub fn parse_decoders(listing: &str) -> HashSet<String> {
    listing
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}
