//! Reader for the `memories_history.html` page of a Snapchat data export.
//!
//! The page carries the whole table on the single line that holds the
//! `mem-info-bar` marker. Each data row has four cells: date, media type,
//! location and a download link whose `onclick` calls
//! `downloadMemories('<url>', this, true)`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use regex::Regex;
use tracing::{debug, info};

use crate::domain::{Coordinates, Record};
use crate::error::MemorError;

const MARKER: &str = "mem-info-bar";

#[derive(Debug, Clone, Default)]
pub struct ParsedExport {
    pub records: Vec<Record>,
    pub skipped: usize,
}

struct ExportPatterns {
    table: Regex,
    row: Regex,
    cell: Regex,
    tag: Regex,
    anchor: Regex,
    download: Regex,
    coordinates: Regex,
}

impl ExportPatterns {
    fn new() -> Result<Self, MemorError> {
        let compile =
            |pattern: &str| Regex::new(pattern).map_err(|err| MemorError::Parse(err.to_string()));
        Ok(Self {
            table: compile(r"(?i)<table\b")?,
            row: compile(r"(?is)<tr\b[^>]*>(.*?)</tr>")?,
            cell: compile(r"(?is)<td\b[^>]*>(.*?)</td>")?,
            tag: compile(r"(?s)<[^>]*>")?,
            anchor: compile(r"(?is)<a\b[^>]*>")?,
            download: compile(r"downloadMemories\('([^']+)'")?,
            coordinates: compile(r"([-0-9.]+),\s*([-0-9.]+)")?,
        })
    }
}

/// Validates the export file and returns the line holding the memories table.
pub fn read_export(path: &Path) -> Result<String, MemorError> {
    if !path.exists() {
        return Err(MemorError::InvalidInput(format!(
            "file not found: {}. Provide the memories_history.html file from your Snapchat export",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(MemorError::InvalidInput(format!(
            "{} is not a file",
            path.display()
        )));
    }
    let file = File::open(path)
        .map_err(|err| MemorError::InvalidInput(format!("{}: {err}", path.display())))?;
    let len = file.metadata().map(|meta| meta.len()).unwrap_or(0);
    if len == 0 {
        return Err(MemorError::InvalidInput(format!("{} is empty", path.display())));
    }

    for line in BufReader::new(file).lines() {
        let line =
            line.map_err(|err| MemorError::InvalidInput(format!("{}: {err}", path.display())))?;
        if line.contains(MARKER) {
            return Ok(line);
        }
    }
    Err(MemorError::InvalidInput(format!(
        "{} does not look like a Snapchat memories export: missing the '{MARKER}' section",
        path.display()
    )))
}

pub fn parse_memories(html: &str) -> Result<ParsedExport, MemorError> {
    let patterns = ExportPatterns::new()?;
    if !patterns.table.is_match(html) {
        return Err(MemorError::Parse(
            "no table found, the export file may be corrupted or incorrect".to_string(),
        ));
    }

    let rows: Vec<&str> = patterns
        .row
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    if rows.len() < 2 {
        return Err(MemorError::Parse(
            "table has no data rows, the memories section appears to be empty".to_string(),
        ));
    }

    let mut parsed = ParsedExport::default();
    for row in &rows[1..] {
        match parse_row(&patterns, row) {
            RowOutcome::Record(record) => parsed.records.push(record),
            RowOutcome::RecordWithoutUrl(record) => {
                parsed.skipped += 1;
                parsed.records.push(record);
            }
            RowOutcome::Skip(reason) => {
                debug!("skipping row: {reason}");
                parsed.skipped += 1;
            }
        }
    }

    if parsed.records.is_empty() {
        return Err(MemorError::Parse(
            "no valid memories found, the export may be empty or in an unexpected format"
                .to_string(),
        ));
    }
    if parsed.skipped > 0 {
        info!(skipped = parsed.skipped, "skipped invalid rows");
    }
    info!(count = parsed.records.len(), "found memories");
    Ok(parsed)
}

enum RowOutcome {
    Record(Record),
    RecordWithoutUrl(Record),
    Skip(&'static str),
}

fn parse_row(patterns: &ExportPatterns, row: &str) -> RowOutcome {
    let cells: Vec<&str> = patterns
        .cell
        .captures_iter(row)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    if cells.len() < 4 {
        return RowOutcome::Skip("fewer than four cells");
    }

    let date = cell_text(patterns, cells[0]);
    let kind = cell_text(patterns, cells[1]);
    if date.is_empty() || kind.is_empty() {
        return RowOutcome::Skip("missing date or type");
    }

    let location = cell_text(patterns, cells[2]);
    let (latitude, longitude) = if location.contains("Latitude") {
        let Some(caps) = patterns.coordinates.captures(&location) else {
            return RowOutcome::Skip("unreadable location");
        };
        let (lat, lon) = (caps[1].to_string(), caps[2].to_string());
        let (Ok(lat_f), Ok(lon_f)) = (lat.parse::<f64>(), lon.parse::<f64>()) else {
            return RowOutcome::Skip("unreadable location");
        };
        if Coordinates::new(lat_f, lon_f).is_ok() {
            (Some(lat), Some(lon))
        } else {
            (None, None)
        }
    } else {
        (None, None)
    };

    let download_url = patterns
        .anchor
        .find(cells[3])
        .and_then(|anchor| patterns.download.captures(anchor.as_str()))
        .map(|caps| decode_entities(&caps[1]));

    let record = Record {
        date: Some(date),
        kind,
        latitude,
        longitude,
        download_url: download_url.clone(),
    };
    if download_url.is_some() {
        RowOutcome::Record(record)
    } else {
        RowOutcome::RecordWithoutUrl(record)
    }
}

fn cell_text(patterns: &ExportPatterns, cell: &str) -> String {
    let stripped = patterns.tag.replace_all(cell, "");
    decode_entities(stripped.trim())
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn strips_markup_and_entities() {
        let patterns = ExportPatterns::new().unwrap();
        assert_eq!(cell_text(&patterns, " <b>Video</b>&nbsp;"), "Video");
        assert_eq!(decode_entities("a=1&amp;b=2"), "a=1&b=2");
    }

    #[test]
    fn table_without_rows_is_a_parse_error() {
        let err = parse_memories("<div id='mem-info-bar'><table><tr><th>Date</th></tr></table>")
            .unwrap_err();
        assert_matches!(err, MemorError::Parse(_));
    }
}
