use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::error::MemorError;

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), MemorError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        MemorError::ZipExtraction(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| MemorError::ZipExtraction(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| MemorError::ZipExtraction(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(MemorError::ZipExtraction(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| MemorError::ZipExtraction(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| MemorError::ZipExtraction(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| MemorError::ZipExtraction(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| MemorError::ZipExtraction(err.to_string()))?;
    }
    Ok(())
}

/// Regular files directly inside `dir`, sorted by name.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, MemorError> {
    let entries = fs::read_dir(dir).map_err(|err| MemorError::Filesystem(err.to_string()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|err| MemorError::Filesystem(err.to_string()))?
            .path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
