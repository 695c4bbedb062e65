use std::io::{self, Write};

use crossterm::cursor::MoveToColumn;
use crossterm::style::{Print, Stylize};
use crossterm::terminal::{Clear, ClearType};
use crossterm::{execute, queue};
use serde::Serialize;

use crate::downloader::{BatchFailure, BatchOutcome, DryRunReport, ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_outcome(outcome: &BatchOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    pub fn print_plan(report: &DryRunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Single rewritten status line on stdout; warnings and failures get their own line.
pub struct ConsoleProgress;

impl ConsoleProgress {
    fn status(&self, text: String) -> io::Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(text)
        )
    }

    fn line(&self, text: String) -> io::Result<()> {
        let mut stdout = io::stdout();
        queue!(stdout, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
        writeln!(stdout, "{text}")?;
        stdout.flush()
    }

    fn render(&self, event: ProgressEvent) -> io::Result<()> {
        match event {
            ProgressEvent::Started { total } => {
                self.line(format!("Downloading {total} memories").cyan().to_string())
            }
            ProgressEvent::Record { index, total, name } => {
                self.status(format!("[#{index}] {name} ({total} total)"))
            }
            ProgressEvent::Skipped { index, path } => {
                self.status(format!("[#{index}] already downloaded: {path}"))
            }
            ProgressEvent::Retry {
                index,
                attempt,
                max_attempts,
                reason,
            } => self.line(
                format!("[#{index}] attempt {attempt}/{max_attempts} failed ({reason}), retrying")
                    .yellow()
                    .to_string(),
            ),
            ProgressEvent::Warning { index, message } => {
                self.line(format!("[#{index}] {message}").yellow().to_string())
            }
            ProgressEvent::Failed { index, reason } => {
                self.line(format!("[#{index}] failed: {reason}").red().to_string())
            }
            ProgressEvent::Finished => self.line(String::new()),
        }
    }
}

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        let _ = self.render(event);
    }
}

pub fn print_summary(outcome: &BatchOutcome) {
    println!("{}", "memoreasy summary".cyan());
    println!(
        "{}",
        format!(
            "Succeeded: {}/{} ({} already present)",
            outcome.succeeded,
            outcome.attempted(),
            outcome.skipped
        )
        .green()
    );
    if outcome.warnings > 0 {
        println!("{}", format!("Warnings: {}", outcome.warnings).yellow());
    }
    if outcome.failures.is_empty() {
        println!("{}", "Failed: 0".green());
    } else {
        println!("{}", format!("Failed: {}", outcome.failures.len()).red());
        for failure in &outcome.failures {
            println!("{}", failure_line(failure).red());
        }
    }
    if outcome.cancelled {
        println!(
            "{}",
            format!(
                "Interrupted after {} of {} memories",
                outcome.attempted(),
                outcome.total
            )
            .yellow()
        );
    }
}

pub fn print_plan(report: &DryRunReport) {
    println!("{}", "memoreasy dry run".cyan());
    println!("Memories in export: {}", report.total);
    println!("{}", format!("Would download: {}", report.to_fetch).green());
    println!("Already present: {}", report.present.len());
    for failure in &report.invalid {
        println!("{}", failure_line(failure).yellow());
    }
}

/// Record indices are 0-based everywhere, matching `BatchFailure::index` in the JSON output.
fn failure_line(failure: &BatchFailure) -> String {
    format!("  #{}: {}", failure.index, failure.reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_and_json_share_record_numbering() {
        let failure = BatchFailure {
            index: 0,
            reason: "HTTP 404".to_string(),
        };
        assert_eq!(failure_line(&failure), "  #0: HTTP 404");

        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["index"], 0);
    }
}
