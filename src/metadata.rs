use std::path::Path;

use filetime::FileTime;
use tracing::{debug, warn};

use crate::domain::{CaptureTime, Coordinates};
use crate::error::MemorError;
use crate::tools::{ToolPaths, run_tool, tool_name};

/// Embeds capture time and location into a media file.
pub trait MetadataWriter {
    fn write_tags(
        &self,
        path: &Path,
        time: CaptureTime,
        coordinates: Option<Coordinates>,
    ) -> Result<(), MemorError>;
}

impl<T: MetadataWriter + ?Sized> MetadataWriter for &T {
    fn write_tags(
        &self,
        path: &Path,
        time: CaptureTime,
        coordinates: Option<Coordinates>,
    ) -> Result<(), MemorError> {
        (**self).write_tags(path, time, coordinates)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagTarget {
    Jpeg,
    Png,
    Mp4,
}

impl TagTarget {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(TagTarget::Jpeg),
            "png" => Some(TagTarget::Png),
            "mp4" => Some(TagTarget::Mp4),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExifToolWriter {
    tools: ToolPaths,
}

impl ExifToolWriter {
    pub fn new(tools: &ToolPaths) -> Self {
        Self {
            tools: tools.clone(),
        }
    }
}

impl MetadataWriter for ExifToolWriter {
    fn write_tags(
        &self,
        path: &Path,
        time: CaptureTime,
        coordinates: Option<Coordinates>,
    ) -> Result<(), MemorError> {
        if !path.exists() {
            return Err(MemorError::FileNotFound(path.to_path_buf()));
        }
        if path.is_dir() {
            return set_path_timestamp(path, time);
        }
        let Some(target) = TagTarget::from_path(path) else {
            debug!(path = %path.display(), "unsupported format, leaving tags untouched");
            return Ok(());
        };
        if let Some(coords) = &coordinates {
            coords.validate()?;
        }
        let exiftool = self.tools.require_exiftool()?;

        let args = exiftool_args(path, target, time, coordinates);
        let output = run_tool(exiftool, &args, None)?;

        if let Err(err) = set_path_timestamp(path, time) {
            warn!(path = %path.display(), "could not set file timestamp: {err}");
        }

        if !output.success {
            return Err(MemorError::ToolFailed {
                tool: tool_name(exiftool),
                message: output.failure_message(exiftool),
            });
        }
        debug!(path = %path.display(), "tags written");
        Ok(())
    }
}

pub fn exiftool_args(
    path: &Path,
    target: TagTarget,
    time: CaptureTime,
    coordinates: Option<Coordinates>,
) -> Vec<String> {
    let stamp = time.exif_format();
    let mut args = vec![
        format!("-CreateDate={stamp}"),
        format!("-ModifyDate={stamp}"),
        format!("-DateTimeOriginal={stamp}"),
    ];
    if let Some(coords) = &coordinates {
        args.push(format!("-XMP:GPSLatitude={}", coords.latitude));
        args.push(format!("-XMP:GPSLongitude={}", coords.longitude));
    }

    match target {
        TagTarget::Mp4 => {
            // QuickTime dates are stored as UTC.
            args.push("-api".to_string());
            args.push("QuickTimeUTC".to_string());
            args.push(format!("-TrackCreateDate={stamp}"));
            args.push(format!("-TrackModifyDate={stamp}"));
            args.push(format!("-MediaCreateDate={stamp}"));
            args.push(format!("-MediaModifyDate={stamp}"));
            if let Some(coords) = &coordinates {
                args.push(format!(
                    "-Keys:GPSCoordinates={} {}",
                    coords.latitude, coords.longitude
                ));
            }
        }
        TagTarget::Jpeg => {
            if let Some(coords) = &coordinates {
                args.push(format!("-GPSLatitude={}", coords.latitude.abs()));
                args.push(format!("-GPSLatitudeRef={}", coords.latitude_ref()));
                args.push(format!("-GPSLongitude={}", coords.longitude.abs()));
                args.push(format!("-GPSLongitudeRef={}", coords.longitude_ref()));
            }
        }
        TagTarget::Png => {}
    }

    args.push("-overwrite_original".to_string());
    args.push(path.to_string_lossy().to_string());
    args
}

/// Sets both access and modification time of a file or directory.
pub fn set_path_timestamp(path: &Path, time: CaptureTime) -> Result<(), MemorError> {
    if !path.exists() {
        return Err(MemorError::FileNotFound(path.to_path_buf()));
    }
    let stamp = FileTime::from_unix_time(time.unix_timestamp(), 0);
    filetime::set_file_times(path, stamp, stamp).map_err(|err| {
        MemorError::Filesystem(format!(
            "failed to set timestamp on {}: {err}",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn time() -> CaptureTime {
        "2025-12-09 11:10:51 UTC".parse().unwrap()
    }

    #[test]
    fn jpeg_args_carry_hemisphere_refs() {
        let coords = Coordinates::new(-33.5, 151.25).unwrap();
        let args = exiftool_args(Path::new("a.jpg"), TagTarget::Jpeg, time(), Some(coords));
        assert!(args.contains(&"-DateTimeOriginal=2025:12:09 11:10:51".to_string()));
        assert!(args.contains(&"-GPSLatitude=33.5".to_string()));
        assert!(args.contains(&"-GPSLatitudeRef=S".to_string()));
        assert!(args.contains(&"-GPSLongitudeRef=E".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("a.jpg"));
    }

    #[test]
    fn mp4_args_use_signed_coordinates() {
        let coords = Coordinates::new(30.445803, -84.31457).unwrap();
        let args = exiftool_args(Path::new("a.mp4"), TagTarget::Mp4, time(), Some(coords));
        assert!(args.contains(&"-Keys:GPSCoordinates=30.445803 -84.31457".to_string()));
        assert!(args.contains(&"-MediaCreateDate=2025:12:09 11:10:51".to_string()));
        assert!(!args.iter().any(|arg| arg.starts_with("-GPSLatitudeRef")));
    }

    #[test]
    fn no_gps_tags_without_coordinates() {
        let args = exiftool_args(Path::new("a.jpg"), TagTarget::Jpeg, time(), None);
        assert!(!args.iter().any(|arg| arg.contains("GPS")));
    }

    #[test]
    fn out_of_range_coordinates_are_rejected_before_the_tool() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("a.jpg");
        std::fs::write(&file, b"jpeg").unwrap();

        let writer = ExifToolWriter::new(&ToolPaths::default());
        let bad = Coordinates {
            latitude: 95.0,
            longitude: 0.0,
        };
        let err = writer.write_tags(&file, time(), Some(bad)).unwrap_err();
        assert_matches!(err, MemorError::InvalidCoordinates { .. });

        let err = writer.write_tags(&file, time(), None).unwrap_err();
        assert_matches!(err, MemorError::Dependency(_));
    }

    #[test]
    fn directory_only_gets_a_timestamp() {
        let temp = tempfile::tempdir().unwrap();
        let writer = ExifToolWriter::new(&ToolPaths::default());
        writer.write_tags(temp.path(), time(), None).unwrap();

        let meta = std::fs::metadata(temp.path()).unwrap();
        let mtime = FileTime::from_last_modification_time(&meta);
        assert_eq!(mtime.unix_seconds(), time().unix_timestamp());
    }
}
