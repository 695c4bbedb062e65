use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{BaseName, MainLayer, MediaExtension, OVERLAY_SUFFIX};
use crate::error::MemorError;

/// Paths of every artifact a record can produce under the output root.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: Utf8PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), MemorError> {
        fs::create_dir_all(self.root.as_std_path()).map_err(|err| {
            MemorError::Download(format!("failed to create output directory {}: {err}", self.root))
        })
    }

    pub fn direct_path(&self, name: &BaseName, ext: MediaExtension) -> Utf8PathBuf {
        self.root.join(format!("{name}{ext}"))
    }

    pub fn bundle_dir(&self, name: &BaseName) -> Utf8PathBuf {
        self.root.join(name.as_str())
    }

    pub fn main_path(&self, name: &BaseName, layer: MainLayer) -> Utf8PathBuf {
        self.bundle_dir(name)
            .join(format!("{name}{}", layer.main_suffix()))
    }

    pub fn overlay_path(&self, name: &BaseName) -> Utf8PathBuf {
        self.bundle_dir(name).join(format!("{name}{OVERLAY_SUFFIX}"))
    }

    pub fn combined_path(&self, name: &BaseName, layer: MainLayer) -> Utf8PathBuf {
        self.bundle_dir(name)
            .join(format!("{name}{}", layer.combined_suffix()))
    }

    /// The first artifact of a previous run for this record, if any.
    pub fn existing_artifact(&self, name: &BaseName) -> Option<Utf8PathBuf> {
        MediaExtension::ALL
            .iter()
            .map(|ext| self.direct_path(name, *ext))
            .chain(std::iter::once(self.bundle_dir(name)))
            .find(|path| path.as_std_path().exists())
    }
}
