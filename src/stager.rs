use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use crate::archive::ArchiveExtractor;
use crate::error::VfsError;
use crate::virtual_file::VirtualFile;

/// Materializes a set of `VirtualFile`s onto disk in correct ancestor order.
pub struct Stager {
    scratch_root: PathBuf,
    extractor: Arc<dyn ArchiveExtractor>,
}

impl Stager {
    pub fn new(scratch_root: impl Into<PathBuf>, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        Self { scratch_root: scratch_root.into(), extractor }
    }

    /// Stages `files`, returning a handle that deletes every scratch
    /// directory it allocated (and clears every `staged_path` it set) when
    /// released, whether explicitly via [`StageHandle::release`] or by drop.
    ///
    /// Extraction groups run in ascending order of their parent's nesting
    /// factor: a deeper archive can only be extracted after its containing
    /// archive has itself been materialized to a concrete path.
    pub fn stage(&self, files: &[VirtualFile]) -> Result<StageHandle, VfsError> {
        let mut seen = HashSet::new();
        let mut needing_staging = Vec::new();

        for file in files {
            for ancestor in file.files_in_full_path() {
                if !ancestor.is_root() && seen.insert(ancestor.clone()) {
                    needing_staging.push(ancestor);
                }
            }
        }

        let mut groups: HashMap<VirtualFile, Vec<VirtualFile>> = HashMap::new();
        for node in needing_staging {
            let parent = node.parent().expect("non-root nodes always have a parent");
            groups.entry(parent).or_default().push(node);
        }

        let mut ordered: Vec<(VirtualFile, Vec<VirtualFile>)> = groups.into_iter().collect();
        ordered.sort_by_key(|(parent, _)| parent.nesting_factor());

        let mut scratch_dirs: Vec<TempDir> = Vec::new();
        let mut touched: Vec<VirtualFile> = Vec::new();

        for (parent, nodes) in ordered {
            let source = if parent.is_root() {
                PathBuf::from(parent.name())
            } else {
                match parent.staged_path() {
                    Some(path) => path,
                    None => {
                        let error = VfsError::LookupMissing(format!(
                            "{} was not staged before its children needed it",
                            parent.full_path()
                        ));
                        return Err(abort(scratch_dirs, touched, error));
                    }
                }
            };

            let scratch = match tempfile::Builder::new().prefix("stage-").tempdir_in(&self.scratch_root) {
                Ok(dir) => dir,
                Err(error) => return Err(abort(scratch_dirs, touched, error.into())),
            };

            tracing::debug!(
                archive = %parent.full_path(),
                scratch = %scratch.path().display(),
                "extracting archive for staging"
            );

            if let Err(error) = self.extractor.extract(&source, scratch.path()) {
                return Err(abort(scratch_dirs, touched, error));
            }

            for node in &nodes {
                node.set_staged_path(scratch.path().join(node.name()));
                touched.push(node.clone());
            }
            scratch_dirs.push(scratch);
        }

        Ok(StageHandle { scratch_dirs, touched })
    }
}

/// Cleans up everything allocated so far and returns the error that triggered
/// the abort, so no partial staging state leaks past a failed `stage` call.
fn abort(scratch_dirs: Vec<TempDir>, touched: Vec<VirtualFile>, error: VfsError) -> VfsError {
    for file in &touched {
        file.clear_staged_path();
    }
    drop(scratch_dirs);
    error
}

/// A scoped staging result. Dropping (or explicitly [`release`](StageHandle::release)ing)
/// this handle deletes every scratch directory it allocated and clears
/// `staged_path` on every node it touched.
pub struct StageHandle {
    scratch_dirs: Vec<TempDir>,
    touched: Vec<VirtualFile>,
}

impl StageHandle {
    /// Number of scratch directories currently held by this handle.
    pub fn scratch_dir_count(&self) -> usize {
        self.scratch_dirs.len()
    }

    /// Explicit, named alternative to letting the handle drop.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for StageHandle {
    fn drop(&mut self) {
        for file in &self.touched {
            file.clear_staged_path();
        }
        // `self.scratch_dirs` drops right after this body runs, deleting
        // every directory it owns.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ZipExtractor;
    use crate::hash::XxHasher;
    use crate::virtual_file::AnalyzeContext;

    fn write_zip(path: &std::path::Path, entries: &[(&str, &[u8])]) {
        use std::io::Write;
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, contents) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn stages_nested_archives_in_ancestor_order() {
        let dir = tempfile::tempdir().unwrap();
        let scratch_root = dir.path().join("scratch");
        std::fs::create_dir_all(&scratch_root).unwrap();

        let middle_path = dir.path().join("middle.zip");
        write_zip(&middle_path, &[("leaf.txt", b"leaf contents")]);
        let middle_bytes = std::fs::read(&middle_path).unwrap();

        let outer_path = dir.path().join("outer.zip");
        write_zip(&outer_path, &[("middle.zip", &middle_bytes)]);

        let analyze_ctx = AnalyzeContext {
            hasher: Arc::new(XxHasher),
            detector: Arc::new(crate::archive::ZipDetector),
            extractor: Arc::new(ZipExtractor),
            scratch_root: scratch_root.clone(),
        };

        let outer = VirtualFile::analyze(
            &analyze_ctx,
            None,
            &outer_path,
            outer_path.to_str().unwrap(),
        )
        .unwrap();

        let middle = outer
            .children()
            .into_iter()
            .find(|f| f.name() == "middle.zip")
            .unwrap();
        let leaf = middle
            .children()
            .into_iter()
            .find(|f| f.name() == "leaf.txt")
            .unwrap();

        let stager = Stager::new(scratch_root, Arc::new(ZipExtractor));
        let handle = stager.stage(&[leaf.clone()]).unwrap();

        assert_eq!(handle.scratch_dir_count(), 2);
        let staged_leaf_path = leaf.staged_path().expect("leaf should be staged");
        assert_eq!(std::fs::read(&staged_leaf_path).unwrap(), b"leaf contents");

        let middle_staged = middle.staged_path().expect("middle archive should be staged too");
        assert!(middle_staged.exists());

        handle.release();
        assert!(leaf.staged_path().is_none());
        assert!(!staged_leaf_path.exists());
    }

    #[test]
    fn staging_roots_needs_no_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let root = VirtualFile::from_parts(
            dir.path().join("plain.txt").to_string_lossy().into_owned(),
            None,
            Some(crate::hash::ContentHash::from_u64(1)),
            0,
            None,
        );

        let stager = Stager::new(dir.path(), Arc::new(ZipExtractor));
        let handle = stager.stage(&[root.clone()]).unwrap();
        assert_eq!(handle.scratch_dir_count(), 0);
        assert!(root.staged_path().is_none());
    }
}
