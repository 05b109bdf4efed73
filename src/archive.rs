use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::VfsError;

/// Decides whether a given file is a container that the `Analyzer` must descend into.
///
/// Pure and side-effect-free: implementations should not touch the filesystem beyond
/// reading the bytes they're handed.
pub trait ArchiveDetector: Send + Sync {
    fn is_archive(&self, path: &Path) -> bool;
}

/// Materializes an archive's contents into a target directory.
///
/// Fails when the bytes at `archive_path` are not a recognized archive; on success
/// `target_dir` contains the extracted tree.
pub trait ArchiveExtractor: Send + Sync {
    fn extract(&self, archive_path: &Path, target_dir: &Path) -> Result<(), VfsError>;
}

const ZIP_LOCAL_HEADER: &[u8; 4] = b"PK\x03\x04";
const ZIP_EMPTY_ARCHIVE: &[u8; 4] = b"PK\x05\x06";

/// Reference `ArchiveDetector` sniffing the zip local-file-header magic.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipDetector;

impl ArchiveDetector for ZipDetector {
    fn is_archive(&self, path: &Path) -> bool {
        let Ok(mut file) = File::open(path) else {
            return false;
        };
        let mut magic = [0u8; 4];
        match file.read_exact(&mut magic) {
            Ok(()) => &magic == ZIP_LOCAL_HEADER || &magic == ZIP_EMPTY_ARCHIVE,
            Err(_) => false,
        }
    }
}

/// Reference `ArchiveExtractor` backed by the `zip` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipExtractor;

impl ArchiveExtractor for ZipExtractor {
    fn extract(&self, archive_path: &Path, target_dir: &Path) -> Result<(), VfsError> {
        let to_extraction_error = |source: zip::result::ZipError| VfsError::ExtractionFailed {
            path: archive_path.to_path_buf(),
            source: Box::new(source),
        };

        let file = File::open(archive_path)?;
        let mut archive = zip::ZipArchive::new(file).map_err(to_extraction_error)?;

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index).map_err(to_extraction_error)?;

            let Some(relative_path) = entry.enclosed_name() else {
                continue;
            };
            let out_path = target_dir.join(relative_path);

            if entry.is_dir() {
                std::fs::create_dir_all(&out_path)?;
                continue;
            }

            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let mut out_file = File::create(&out_path)?;
            std::io::copy(&mut entry, &mut out_file)?;
        }

        Ok(())
    }
}
