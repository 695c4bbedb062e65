//! Unpacking of bundled memories.
//!
//! A bundle is a zip holding a `…-main.jpg` or `…-main.mp4` base layer and,
//! usually, a transparent `…-overlay.png`. Members are renamed after the
//! record's base name, tagged, and merged into a `-combined` sibling.
//!
//! Only three conditions abort a bundle: the archive is missing, it cannot be
//! unpacked, or it holds no main layer. Everything after that is reported as a
//! warning so one malformed bundle never stops the batch.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::compositor::OverlayCompositor;
use crate::domain::{BaseName, CaptureTime, MainLayer, OVERLAY_SUFFIX, Record};
use crate::error::MemorError;
use crate::fs_util;
use crate::layout::OutputLayout;
use crate::metadata::{MetadataWriter, set_path_timestamp};

/// What a processed bundle left on disk.
#[derive(Debug, Clone, Default)]
pub struct ArchiveOutcome {
    pub directory: PathBuf,
    pub main_image: Option<PathBuf>,
    pub main_video: Option<PathBuf>,
    pub overlay: Option<PathBuf>,
    pub combined: Vec<PathBuf>,
    pub unknown: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

impl ArchiveOutcome {
    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }

    fn mains(&self) -> Vec<(MainLayer, PathBuf)> {
        let video = self
            .main_video
            .clone()
            .map(|path| (MainLayer::Video, path));
        let image = self
            .main_image
            .clone()
            .map(|path| (MainLayer::Image, path));
        video.into_iter().chain(image).collect()
    }
}

pub struct ArchiveHandler<'a> {
    layout: &'a OutputLayout,
    writer: &'a dyn MetadataWriter,
    compositor: &'a dyn OverlayCompositor,
}

impl<'a> ArchiveHandler<'a> {
    pub fn new(
        layout: &'a OutputLayout,
        writer: &'a dyn MetadataWriter,
        compositor: &'a dyn OverlayCompositor,
    ) -> Self {
        Self {
            layout,
            writer,
            compositor,
        }
    }

    pub fn handle(
        &self,
        archive: &Path,
        name: &BaseName,
        record: &Record,
    ) -> Result<ArchiveOutcome, MemorError> {
        if !archive.exists() {
            return Err(MemorError::FileNotFound(archive.to_path_buf()));
        }
        let archive_name = archive
            .file_name()
            .map(|value| value.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dest = self.layout.bundle_dir(name).into_std_path_buf();
        let mut outcome = ArchiveOutcome {
            directory: dest.clone(),
            ..ArchiveOutcome::default()
        };

        self.unpack(archive, &dest, &mut outcome)?;
        self.classify(name, &dest, &archive_name, &mut outcome)?;

        let time = match record.capture_time() {
            Ok(time) => Some(time),
            Err(err) => {
                outcome.warn(format!("skipping tags for {archive_name}: {err}"));
                None
            }
        };
        self.tag_and_merge(time, record, &mut outcome);

        if let Some(time) = time {
            if let Err(err) = set_path_timestamp(&dest, time) {
                outcome.warn(format!("could not set folder timestamp: {err}"));
            }
        }
        Ok(outcome)
    }

    fn unpack(
        &self,
        archive: &Path,
        dest: &Path,
        outcome: &mut ArchiveOutcome,
    ) -> Result<(), MemorError> {
        if dest.exists() {
            info!(dir = %dest.display(), "folder already exists, extracting into it");
        }
        fs::create_dir_all(dest).map_err(|err| {
            MemorError::ZipExtraction(format!("failed to create folder {}: {err}", dest.display()))
        })?;

        if let Err(err) = fs_util::extract_zip(archive, dest) {
            if let Err(cleanup) = fs::remove_dir_all(dest) {
                debug!(dir = %dest.display(), "cleanup after failed extraction: {cleanup}");
            }
            return Err(MemorError::ZipExtraction(format!(
                "failed to extract {}: {err}",
                archive.display()
            )));
        }

        if let Err(err) = fs::remove_file(archive) {
            outcome.warn(format!(
                "could not delete zip file {}: {err}",
                archive.display()
            ));
        }
        Ok(())
    }

    fn classify(
        &self,
        name: &BaseName,
        dest: &Path,
        archive_name: &str,
        outcome: &mut ArchiveOutcome,
    ) -> Result<(), MemorError> {
        let files = fs_util::list_files(dest)?;
        if files.is_empty() {
            return Err(MemorError::ZipExtraction(format!(
                "zip file {archive_name} was empty"
            )));
        }

        for file in files {
            let old_name = file
                .file_name()
                .map(|value| value.to_string_lossy().into_owned())
                .unwrap_or_default();
            let (slot, target) = if let Some(layer) = MainLayer::from_file_name(&old_name) {
                let target = self.layout.main_path(name, layer).into_std_path_buf();
                let slot = match layer {
                    MainLayer::Video => &mut outcome.main_video,
                    MainLayer::Image => &mut outcome.main_image,
                };
                (slot, target)
            } else if old_name.ends_with(OVERLAY_SUFFIX) {
                let target = self.layout.overlay_path(name).into_std_path_buf();
                (&mut outcome.overlay, target)
            } else {
                info!(file = %old_name, "unknown file in zip, keeping as-is");
                outcome.unknown.push(file);
                continue;
            };

            if file != target {
                if let Err(err) = fs::rename(&file, &target) {
                    outcome.warn(format!(
                        "could not rename {old_name} to {}: {err}",
                        target.display()
                    ));
                    continue;
                }
            }
            *slot = Some(target);
        }

        if outcome.main_video.is_none() && outcome.main_image.is_none() {
            return Err(MemorError::ZipExtraction(format!(
                "no main media file found in {archive_name}, expected a file ending with '-main.mp4' or '-main.jpg'"
            )));
        }
        if outcome.overlay.is_none() {
            outcome.warn(format!("no overlay png found in {archive_name}"));
        }
        Ok(())
    }

    /// Tags are written only when `time` is known; compositing runs regardless.
    fn tag_and_merge(
        &self,
        time: Option<CaptureTime>,
        record: &Record,
        outcome: &mut ArchiveOutcome,
    ) {
        let coordinates = record.coordinates();
        let mains = outcome.mains();

        if let Some(time) = time {
            for (_, main) in &mains {
                if let Err(err) = self.writer.write_tags(main, time, coordinates) {
                    outcome.warn(format!("failed to tag {}: {err}", main.display()));
                }
            }
        }

        for (layer, main) in &mains {
            let Some(overlay) = outcome.overlay.clone().filter(|path| path.exists()) else {
                break;
            };
            match self.compositor.composite(main, &overlay) {
                Ok(combined) => {
                    if let Some(time) = time {
                        if let Err(err) = self.writer.write_tags(&combined, time, coordinates) {
                            outcome.warn(format!("failed to tag {}: {err}", combined.display()));
                        }
                    }
                    outcome.combined.push(combined);
                }
                Err(MemorError::UnsupportedDecoder { codec, .. }) => {
                    outcome.warn(format!(
                        "no {codec} decoder available, original video kept with metadata"
                    ));
                }
                Err(err) => {
                    let kind = match layer {
                        MainLayer::Video => "MP4",
                        MainLayer::Image => "JPG",
                    };
                    outcome.warn(format!("failed to merge {kind} with overlay: {err}"));
                }
            }
        }
    }
}
