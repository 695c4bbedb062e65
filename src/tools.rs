use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::MemorError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Explicit executable paths taken from config or the command line.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolOverrides {
    #[serde(default)]
    pub exiftool: Option<PathBuf>,
    #[serde(default)]
    pub ffmpeg: Option<PathBuf>,
    #[serde(default)]
    pub ffprobe: Option<PathBuf>,
}

/// External executables, resolved once at startup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolPaths {
    pub exiftool: Option<PathBuf>,
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
}

impl ToolPaths {
    pub fn discover(overrides: &ToolOverrides) -> Self {
        let bundle_dir = bundled_bin_dir();
        let locate = |explicit: &Option<PathBuf>, name: &str| {
            explicit
                .clone()
                .filter(|path| path.exists())
                .or_else(|| bundle_dir.as_deref().and_then(|dir| find_in_dir(dir, name)))
                .or_else(|| find_in_path(name))
        };
        Self {
            exiftool: locate(&overrides.exiftool, "exiftool"),
            ffmpeg: locate(&overrides.ffmpeg, "ffmpeg"),
            ffprobe: locate(&overrides.ffprobe, "ffprobe"),
        }
    }

    pub fn require_exiftool(&self) -> Result<&Path, MemorError> {
        self.exiftool
            .as_deref()
            .ok_or_else(|| MemorError::Dependency("exiftool".to_string()))
    }

    pub fn require_ffmpeg(&self) -> Result<&Path, MemorError> {
        self.ffmpeg
            .as_deref()
            .ok_or_else(|| MemorError::Dependency("ffmpeg".to_string()))
    }

    pub fn require_ffprobe(&self) -> Result<&Path, MemorError> {
        self.ffprobe
            .as_deref()
            .ok_or_else(|| MemorError::Dependency("ffprobe".to_string()))
    }

    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.exiftool.is_none() {
            missing.push("exiftool");
        }
        if self.ffmpeg.is_none() {
            missing.push("ffmpeg");
        }
        if self.ffprobe.is_none() {
            missing.push("ffprobe");
        }
        missing
    }
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Trimmed stderr, or a generic message naming the program when stderr is empty.
    pub fn failure_message(&self, program: &Path) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("command failed: {}", program.display())
        } else {
            stderr.to_string()
        }
    }
}

/// Runs `program` to completion, killing it once `timeout` elapses.
pub fn run_tool(
    program: &Path,
    args: &[String],
    timeout: Option<Duration>,
) -> Result<ToolOutput, MemorError> {
    let tool = tool_name(program);
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| MemorError::ToolFailed {
            tool: tool.clone(),
            message: err.to_string(),
        })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(err) => {
                return Err(MemorError::ToolFailed {
                    tool,
                    message: err.to_string(),
                });
            }
        }
        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                let _ = child.kill();
                let _ = child.wait();
                return Err(MemorError::ToolFailed {
                    tool,
                    message: format!("timed out after {}s", limit.as_secs()),
                });
            }
        }
        thread::sleep(POLL_INTERVAL);
    };

    let collect = |handle: Option<thread::JoinHandle<String>>| {
        handle
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    };
    Ok(ToolOutput {
        success: status.success(),
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

pub fn tool_name(program: &Path) -> String {
    program
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

fn bundled_bin_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?.join("bin");
    dir.is_dir().then_some(dir)
}

fn find_in_dir(dir: &Path, name: &str) -> Option<PathBuf> {
    let exe = dir.join(format!("{name}.exe"));
    if exe.exists() {
        return Some(exe);
    }
    let plain = dir.join(name);
    plain.exists().then_some(plain)
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| find_in_dir(&dir, name))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn explicit_override_wins_when_present() {
        let temp = tempfile::tempdir().unwrap();
        let fake = temp.path().join("exiftool");
        std::fs::write(&fake, b"").unwrap();

        let tools = ToolPaths::discover(&ToolOverrides {
            exiftool: Some(fake.clone()),
            ..ToolOverrides::default()
        });
        assert_eq!(tools.exiftool.as_deref(), Some(fake.as_path()));
    }

    #[test]
    fn missing_tool_is_a_dependency_error() {
        let tools = ToolPaths::default();
        assert_matches!(tools.require_ffmpeg(), Err(MemorError::Dependency(_)));
        assert_eq!(tools.missing(), vec!["exiftool", "ffmpeg", "ffprobe"]);
    }

    #[test]
    fn spawn_failure_is_reported_as_tool_failure() {
        let err = run_tool(Path::new("/nonexistent/memoreasy-tool"), &[], None).unwrap_err();
        assert_matches!(err, MemorError::ToolFailed { tool, .. } if tool == "memoreasy-tool");
    }
}
