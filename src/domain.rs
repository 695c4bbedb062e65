use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::MemorError;

const CAPTURE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const BASE_NAME_FORMAT: &str = "%Y-%m-%d-%H%M%S";
const ZONE_SUFFIX_LEN: usize = 4;

/// One entry of the memories export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub date: Option<String>,
    pub kind: String,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub download_url: Option<String>,
}

impl Record {
    pub fn new(date: &str, kind: &str, download_url: &str) -> Self {
        Self {
            date: Some(date.to_string()),
            kind: kind.to_string(),
            latitude: None,
            longitude: None,
            download_url: Some(download_url.to_string()),
        }
    }

    pub fn with_location(mut self, latitude: &str, longitude: &str) -> Self {
        self.latitude = Some(latitude.to_string());
        self.longitude = Some(longitude.to_string());
        self
    }

    pub fn date(&self) -> Option<&str> {
        self.date.as_deref().filter(|value| !value.trim().is_empty())
    }

    pub fn download_url(&self) -> Option<&str> {
        self.download_url
            .as_deref()
            .filter(|value| !value.trim().is_empty())
    }

    /// Valid coordinates, or `None` when either half is missing, unparsable or out of range.
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (&self.latitude, &self.longitude) {
            (Some(lat), Some(lon)) => Coordinates::parse(lat, lon),
            _ => None,
        }
    }

    pub fn base_name(&self) -> Result<BaseName, MemorError> {
        let date = self
            .date()
            .ok_or_else(|| MemorError::InvalidDate("missing date".to_string()))?;
        BaseName::from_date(date)
    }

    pub fn capture_time(&self) -> Result<CaptureTime, MemorError> {
        let date = self
            .date()
            .ok_or_else(|| MemorError::InvalidDate("missing date".to_string()))?;
        parse_record_date(date).map(|(_, time)| time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, MemorError> {
        let coords = Self {
            latitude,
            longitude,
        };
        coords.validate()?;
        Ok(coords)
    }

    pub fn parse(latitude: &str, longitude: &str) -> Option<Self> {
        let latitude = latitude.trim().parse::<f64>().ok()?;
        let longitude = longitude.trim().parse::<f64>().ok()?;
        Self::new(latitude, longitude).ok()
    }

    pub fn validate(&self) -> Result<(), MemorError> {
        let lat_ok = (-90.0..=90.0).contains(&self.latitude);
        let lon_ok = (-180.0..=180.0).contains(&self.longitude);
        if lat_ok && lon_ok {
            Ok(())
        } else {
            Err(MemorError::InvalidCoordinates {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }

    pub fn latitude_ref(&self) -> char {
        if self.latitude >= 0.0 { 'N' } else { 'S' }
    }

    pub fn longitude_ref(&self) -> char {
        if self.longitude >= 0.0 { 'E' } else { 'W' }
    }
}

/// Capture time of a record, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CaptureTime(NaiveDateTime);

impl CaptureTime {
    /// `YYYY:MM:DD HH:MM:SS`, the layout exiftool expects.
    pub fn exif_format(&self) -> String {
        self.0.format("%Y:%m:%d %H:%M:%S").to_string()
    }

    pub fn unix_timestamp(&self) -> i64 {
        self.0.and_utc().timestamp()
    }
}

impl std::str::FromStr for CaptureTime {
    type Err = MemorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let stripped = strip_zone_label(value);
        NaiveDateTime::parse_from_str(stripped, CAPTURE_FORMAT)
            .map(Self)
            .map_err(|err| MemorError::InvalidDate(format!("{value}: {err}")))
    }
}

impl fmt::Display for CaptureTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} UTC", self.0.format(CAPTURE_FORMAT))
    }
}

/// Drops a trailing alphabetic zone label such as `UTC`.
pub fn strip_zone_label(value: &str) -> &str {
    let trimmed = value.trim();
    match trimmed.rsplit_once(' ') {
        Some((head, label))
            if !label.is_empty() && label.chars().all(|ch| ch.is_ascii_alphabetic()) =>
        {
            head.trim_end()
        }
        _ => trimmed,
    }
}

/// Splits an export date such as `2025-12-09 11:10:51 UTC` into its file stem and capture time.
///
/// The last four characters must be a space and an alphabetic zone label.
pub fn parse_record_date(date: &str) -> Result<(BaseName, CaptureTime), MemorError> {
    let invalid = || MemorError::InvalidDate(date.to_string());

    let cut = date
        .char_indices()
        .rev()
        .nth(ZONE_SUFFIX_LEN - 1)
        .map(|(idx, _)| idx)
        .ok_or_else(invalid)?;
    let (stamp, zone) = date.split_at(cut);
    let label = zone.strip_prefix(' ').ok_or_else(invalid)?;
    if !label.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(invalid());
    }
    let time = NaiveDateTime::parse_from_str(stamp, CAPTURE_FORMAT).map_err(|_| invalid())?;

    let name = BaseName(time.format(BASE_NAME_FORMAT).to_string());
    Ok((name, CaptureTime(time)))
}

/// Canonical file stem derived from a record date: `2025-12-09 11:10:51 UTC` -> `2025-12-09-111051`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BaseName(String);

impl BaseName {
    pub fn from_date(date: &str) -> Result<Self, MemorError> {
        parse_record_date(date).map(|(name, _)| name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MediaExtension {
    Jpg,
    Png,
    Mp4,
    Zip,
}

impl MediaExtension {
    pub const ALL: [MediaExtension; 4] = [
        MediaExtension::Jpg,
        MediaExtension::Png,
        MediaExtension::Mp4,
        MediaExtension::Zip,
    ];

    /// First match wins: jpg, png, mp4, zip.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let content_type = content_type.to_ascii_lowercase();
        if content_type.contains("jpg") || content_type.contains("jpeg") {
            Some(MediaExtension::Jpg)
        } else if content_type.contains("png") {
            Some(MediaExtension::Png)
        } else if content_type.contains("mp4") {
            Some(MediaExtension::Mp4)
        } else if content_type.contains("zip") {
            Some(MediaExtension::Zip)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaExtension::Jpg => ".jpg",
            MediaExtension::Png => ".png",
            MediaExtension::Mp4 => ".mp4",
            MediaExtension::Zip => ".zip",
        }
    }
}

impl fmt::Display for MediaExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The base layer found inside a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MainLayer {
    Image,
    Video,
}

impl MainLayer {
    pub fn main_suffix(&self) -> &'static str {
        match self {
            MainLayer::Image => "-main.jpg",
            MainLayer::Video => "-main.mp4",
        }
    }

    pub fn combined_suffix(&self) -> &'static str {
        match self {
            MainLayer::Image => "-combined.jpg",
            MainLayer::Video => "-combined.mp4",
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.ends_with(MainLayer::Video.main_suffix()) {
            Some(MainLayer::Video)
        } else if name.ends_with(MainLayer::Image.main_suffix()) {
            Some(MainLayer::Image)
        } else {
            None
        }
    }
}

pub const OVERLAY_SUFFIX: &str = "-overlay.png";

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn base_name_from_utc_date() {
        let name = BaseName::from_date("2025-12-09 11:10:51 UTC").unwrap();
        assert_eq!(name.as_str(), "2025-12-09-111051");
    }

    #[test]
    fn base_name_rejects_garbage() {
        assert_matches!(BaseName::from_date("UTC"), Err(MemorError::InvalidDate(_)));
        assert_matches!(
            BaseName::from_date("yesterday at noon UTC"),
            Err(MemorError::InvalidDate(_))
        );
        assert_matches!(
            BaseName::from_date("2025-12-09 11:10:51"),
            Err(MemorError::InvalidDate(_))
        );
    }

    #[test]
    fn numeric_offsets_fail_both_name_and_time() {
        let record = Record::new("2025-12-09 11:10:51 +01", "Image", "https://x");
        assert_matches!(record.base_name(), Err(MemorError::InvalidDate(_)));
        assert_matches!(record.capture_time(), Err(MemorError::InvalidDate(_)));

        let record = Record::new("2025-12-09 11:10:51 UTC", "Image", "https://x");
        let (name, time) = parse_record_date(record.date().unwrap()).unwrap();
        assert_eq!(record.base_name().unwrap(), name);
        assert_eq!(record.capture_time().unwrap(), time);
    }

    #[test]
    fn capture_time_strips_zone_label() {
        let time: CaptureTime = "2025-12-09 11:10:51 UTC".parse().unwrap();
        assert_eq!(time.exif_format(), "2025:12:09 11:10:51");
        assert_eq!(time.unix_timestamp(), 1_765_278_651);
    }

    #[test]
    fn coordinates_require_both_halves_in_range() {
        let record = Record::new("2025-12-09 11:10:51 UTC", "Image", "https://x")
            .with_location("30.445803", "-84.31457");
        let coords = record.coordinates().unwrap();
        assert_eq!(coords.latitude_ref(), 'N');
        assert_eq!(coords.longitude_ref(), 'W');

        let out_of_range = record.clone().with_location("91.0", "10.0");
        assert!(out_of_range.coordinates().is_none());

        let mut half = record.clone();
        half.longitude = None;
        assert!(half.coordinates().is_none());

        let garbage = record.with_location("north", "10.0");
        assert!(garbage.coordinates().is_none());
    }

    #[test]
    fn content_type_priority() {
        assert_eq!(
            MediaExtension::from_content_type("image/jpg"),
            Some(MediaExtension::Jpg)
        );
        assert_eq!(
            MediaExtension::from_content_type("Video/MP4"),
            Some(MediaExtension::Mp4)
        );
        assert_eq!(
            MediaExtension::from_content_type("application/zip"),
            Some(MediaExtension::Zip)
        );
        assert_eq!(MediaExtension::from_content_type("text/html"), None);
    }

    #[test]
    fn main_layer_from_member_name() {
        assert_eq!(
            MainLayer::from_file_name("abc-def-main.mp4"),
            Some(MainLayer::Video)
        );
        assert_eq!(
            MainLayer::from_file_name("abc-def-main.jpg"),
            Some(MainLayer::Image)
        );
        assert_eq!(MainLayer::from_file_name("abc-overlay.png"), None);
    }
}
