use std::collections::HashMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::VfsError;
use crate::index::IndexRoot;
use crate::pipeline;
use crate::virtual_file::{AnalyzeContext, VirtualFile};

/// Tunables recognized by the analyzer: `analysis_parallelism` (worker count)
/// and `analysis_queue_depth` (bounded-queue depth).
#[derive(Debug, Clone, Copy)]
pub struct AnalyzerOptions {
    pub parallelism: usize,
    pub queue_depth: usize,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            parallelism: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            queue_depth: pipeline::DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// Converts `root` into a list of root `VirtualFile`s against the current
/// index, reusing unchanged entries and analyzing the rest concurrently.
///
/// On any fatal error the scan aborts and returns `Err`; the caller must not
/// integrate a partial result (see the error-handling design: either a new
/// `IndexRoot` is installed wholesale, or the old one remains).
pub(crate) fn scan(
    current: &IndexRoot,
    root: &Path,
    analyze_ctx: AnalyzeContext,
    options: &AnalyzerOptions,
) -> Result<Vec<VirtualFile>, VfsError> {
    let by_path: HashMap<String, VirtualFile> = current
        .all_files()
        .iter()
        .filter(|file| Path::new(file.name()).exists())
        .map(|file| (file.name().to_string(), file.clone()))
        .collect();

    let mut reused = Vec::new();
    let mut to_analyze: Vec<PathBuf> = Vec::new();

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
    {
        let path = entry.path().to_path_buf();
        let key = path.to_string_lossy().into_owned();
        let metadata = entry.metadata().map_err(std::io::Error::from)?;

        let unchanged = by_path.get(&key).is_some_and(|existing| {
            existing.size() == metadata.len()
                && existing.last_modified() == metadata.modified().ok()
        });

        if unchanged {
            reused.push(by_path[&key].clone());
        } else {
            to_analyze.push(path);
        }
    }

    tracing::debug!(
        root = %root.display(),
        reused = reused.len(),
        to_analyze = to_analyze.len(),
        "scanning root"
    );

    let worker_count = options.parallelism.max(1);
    let results: Vec<Result<VirtualFile, VfsError>> = pipeline::run_unordered(
        to_analyze,
        worker_count,
        options.queue_depth,
        move |path: PathBuf| {
            let logical_name = path.to_string_lossy().into_owned();
            Some(VirtualFile::analyze(&analyze_ctx, None, &path, &logical_name))
        },
    );

    let mut analyzed = Vec::with_capacity(results.len());
    for result in results {
        analyzed.push(result?);
    }

    reused.extend(analyzed);
    Ok(reused)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ZipDetector, ZipExtractor};
    use crate::hash::XxHasher;
    use std::sync::Arc;

    fn ctx(scratch_root: &Path) -> AnalyzeContext {
        AnalyzeContext {
            hasher: Arc::new(XxHasher),
            detector: Arc::new(ZipDetector),
            extractor: Arc::new(ZipExtractor),
            scratch_root: scratch_root.to_path_buf(),
        }
    }

    #[test]
    fn empty_directory_scans_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let result = scan(&IndexRoot::default(), dir.path(), ctx(dir.path()), &AnalyzerOptions::default())
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn flat_directory_scans_every_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("b.bin"), b"hi").unwrap();
        std::fs::write(dir.path().join("c.dat"), vec![0u8; 100]).unwrap();

        let result = scan(&IndexRoot::default(), dir.path(), ctx(dir.path()), &AnalyzerOptions::default())
            .unwrap();

        assert_eq!(result.len(), 3);
        assert!(result.iter().all(|f| f.is_root() && f.hash().is_some()));
    }

    #[test]
    fn rescan_of_unchanged_directory_reuses_nodes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let first = scan(&IndexRoot::default(), dir.path(), ctx(dir.path()), &AnalyzerOptions::default())
            .unwrap();
        let index = IndexRoot::default().integrate(first);

        let second = scan(&index, dir.path(), ctx(dir.path()), &AnalyzerOptions::default()).unwrap();

        assert_eq!(second.len(), 1);
        assert_eq!(second[0], index.all_files()[0]);
    }
}
