use assert_matches::assert_matches;

use memoreasy::error::MemorError;
use memoreasy::export::{parse_memories, read_export};

const HEADER: &str = "<tr><th>Date</th><th>Media Type</th><th>Location</th><th></th></tr>";

fn row(date: &str, kind: &str, location: &str, link: &str) -> String {
    format!("<tr><td>{date}</td><td>{kind}</td><td>{location}</td><td>{link}</td></tr>")
}

fn link(url: &str) -> String {
    format!(
        "<a href=\"#\" onclick=\"downloadMemories('{url}', this, true); return false;\">Download</a>"
    )
}

fn page(rows: &[String]) -> String {
    format!(
        "<div class=\"mem-info-bar\">Memories</div><table><tbody>{HEADER}{}</tbody></table>",
        rows.concat()
    )
}

#[test]
fn parses_rows_into_records() {
    let html = page(&[
        row(
            "2025-12-09 11:10:51 UTC",
            "Image",
            "Latitude, Longitude: 30.445803, -84.31457",
            &link("https://example.test/dmd?uid=1&amp;sid=2"),
        ),
        row(
            "2025-12-08 08:00:00 UTC",
            "<b>Video</b>",
            "Latitude, Longitude: 95.0, 10.0",
            &link("https://example.test/dmd?uid=3"),
        ),
    ]);

    let parsed = parse_memories(&html).unwrap();
    assert_eq!(parsed.skipped, 0);
    assert_eq!(parsed.records.len(), 2);

    let first = &parsed.records[0];
    assert_eq!(first.date(), Some("2025-12-09 11:10:51 UTC"));
    assert_eq!(first.kind, "Image");
    assert_eq!(first.latitude.as_deref(), Some("30.445803"));
    assert_eq!(first.longitude.as_deref(), Some("-84.31457"));
    assert_eq!(
        first.download_url(),
        Some("https://example.test/dmd?uid=1&sid=2")
    );

    let second = &parsed.records[1];
    assert_eq!(second.kind, "Video");
    assert!(second.latitude.is_none());
    assert!(second.coordinates().is_none());
}

#[test]
fn malformed_rows_are_counted_as_skipped() {
    let html = page(&[
        row(
            "2025-12-09 11:10:51 UTC",
            "Image",
            "",
            &link("https://example.test/a"),
        ),
        row("", "Image", "", &link("https://example.test/b")),
        row(
            "2025-12-09 11:10:52 UTC",
            "Image",
            "Latitude, Longitude: unknown",
            &link("https://example.test/c"),
        ),
        "<tr><td>2025-12-09 11:10:53 UTC</td><td>Image</td></tr>".to_string(),
        row("2025-12-09 11:10:54 UTC", "Video", "", "no link"),
    ]);

    let parsed = parse_memories(&html).unwrap();
    assert_eq!(parsed.records.len(), 2);
    assert_eq!(parsed.skipped, 4);
    assert_eq!(parsed.records[0].download_url(), Some("https://example.test/a"));
    assert!(parsed.records[1].download_url().is_none());
}

#[test]
fn page_without_table_or_records_fails_to_parse() {
    assert_matches!(
        parse_memories("<div class=\"mem-info-bar\">nothing here</div>"),
        Err(MemorError::Parse(_))
    );

    let only_bad = page(&[row("", "", "", "")]);
    assert_matches!(parse_memories(&only_bad), Err(MemorError::Parse(_)));
}

#[test]
fn read_export_validates_the_file() {
    let temp = tempfile::tempdir().unwrap();

    let missing = temp.path().join("memories_history.html");
    assert_matches!(read_export(&missing), Err(MemorError::InvalidInput(_)));
    assert_matches!(read_export(temp.path()), Err(MemorError::InvalidInput(_)));

    std::fs::write(&missing, "").unwrap();
    assert_matches!(read_export(&missing), Err(MemorError::InvalidInput(_)));

    std::fs::write(&missing, "<html><body>Chat history</body></html>\n").unwrap();
    assert_matches!(read_export(&missing), Err(MemorError::InvalidInput(_)));

    let table = page(&[row(
        "2025-12-09 11:10:51 UTC",
        "Image",
        "",
        &link("https://example.test/a"),
    )]);
    std::fs::write(&missing, format!("<html><head></head>\n{table}\n</html>\n")).unwrap();
    let line = read_export(&missing).unwrap();
    assert_eq!(line, table);
    assert_eq!(parse_memories(&line).unwrap().records.len(), 1);
}
