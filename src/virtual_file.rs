use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use walkdir::WalkDir;

use crate::archive::{ArchiveDetector, ArchiveExtractor};
use crate::error::VfsError;
use crate::hash::{ContentHash, Hasher};

/// Separates archive-internal path components in `VirtualFile::full_path`.
///
/// Chosen to be visually distinct from `/` and `\`, which appear in both root
/// paths and archive-internal names.
pub const FULL_PATH_DELIMITER: &str = "::";

/// The collaborators and scratch location an `Analyze` call needs.
///
/// Cloning is cheap: every field is either an `Arc` or a `PathBuf`.
#[derive(Clone)]
pub(crate) struct AnalyzeContext {
    pub hasher: Arc<dyn Hasher>,
    pub detector: Arc<dyn ArchiveDetector>,
    pub extractor: Arc<dyn ArchiveExtractor>,
    pub scratch_root: PathBuf,
}

struct VfNode {
    name: String,
    parent: Option<Weak<VfNode>>,
    children: RwLock<Vec<VirtualFile>>,
    hash: Option<ContentHash>,
    size: u64,
    last_modified: Option<SystemTime>,
    staged_path: Mutex<Option<PathBuf>>,
}

/// One node in the file forest: a real file, or a child produced by extracting
/// a parent archive.
///
/// Cheap to clone (an `Arc` bump). Two `VirtualFile` handles are equal iff they
/// point at the same node — the forest has no notion of structural equality,
/// only identity, since the same on-disk file reused across scans keeps its
/// original node (see the `Analyzer` reuse gate).
#[derive(Clone)]
pub struct VirtualFile(Arc<VfNode>);

impl PartialEq for VirtualFile {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for VirtualFile {}

impl std::hash::Hash for VirtualFile {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl std::fmt::Debug for VirtualFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualFile")
            .field("name", &self.0.name)
            .field("hash", &self.0.hash)
            .field("size", &self.0.size)
            .field("children", &self.0.children.read().len())
            .finish()
    }
}

impl VirtualFile {
    /// For a root this is the absolute on-disk path; for a child of an archive,
    /// the path of the file within that archive.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn parent(&self) -> Option<VirtualFile> {
        self.0.parent.as_ref().and_then(Weak::upgrade).map(VirtualFile)
    }

    pub fn children(&self) -> Vec<VirtualFile> {
        self.0.children.read().clone()
    }

    pub fn hash(&self) -> Option<ContentHash> {
        self.0.hash
    }

    pub fn size(&self) -> u64 {
        self.0.size
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        self.0.last_modified
    }

    pub fn staged_path(&self) -> Option<PathBuf> {
        self.0.staged_path.lock().clone()
    }

    pub fn is_root(&self) -> bool {
        self.0.parent.is_none()
    }

    /// An archive iff it has at least one child.
    pub fn is_archive(&self) -> bool {
        !self.0.children.read().is_empty()
    }

    /// Number of ancestors; roots have nesting factor 0.
    pub fn nesting_factor(&self) -> usize {
        let mut count = 0;
        let mut current = self.parent();
        while let Some(p) = current {
            count += 1;
            current = p.parent();
        }
        count
    }

    /// The ancestor chain from the root down to this node, inclusive.
    pub fn files_in_full_path(&self) -> Vec<VirtualFile> {
        let mut chain = vec![self.clone()];
        let mut current = self.parent();
        while let Some(p) = current {
            chain.push(p.clone());
            current = p.parent();
        }
        chain.reverse();
        chain
    }

    /// A path composed of the names along the ancestor chain: the root path,
    /// then archive-internal names separated by [`FULL_PATH_DELIMITER`].
    pub fn full_path(&self) -> String {
        self.files_in_full_path()
            .iter()
            .map(VirtualFile::name)
            .collect::<Vec<_>>()
            .join(FULL_PATH_DELIMITER)
    }

    /// Pre-order traversal of the subtree rooted at this node.
    pub fn this_and_all_children(&self) -> Vec<VirtualFile> {
        let mut out = vec![self.clone()];
        for child in self.children() {
            out.extend(child.this_and_all_children());
        }
        out
    }

    /// Opens the underlying bytes. Roots open directly; a virtual child must
    /// already be staged (see `Stager`) or this fails with `LookupMissing`.
    pub fn open(&self) -> Result<File, VfsError> {
        let path = if self.is_root() {
            PathBuf::from(self.name())
        } else {
            self.staged_path().ok_or_else(|| {
                VfsError::LookupMissing(format!("{} is not staged", self.full_path()))
            })?
        };
        Ok(File::open(path)?)
    }

    pub(crate) fn set_staged_path(&self, path: PathBuf) {
        *self.0.staged_path.lock() = Some(path);
    }

    pub(crate) fn clear_staged_path(&self) {
        *self.0.staged_path.lock() = None;
    }

    pub(crate) fn set_children(&self, children: Vec<VirtualFile>) {
        *self.0.children.write() = children;
    }

    pub(crate) fn push_child(&self, child: VirtualFile) {
        self.0.children.write().push(child);
    }

    /// Constructs a node directly from known fields, used by the cache codec
    /// and backfill/portable reconstruction where no on-disk analysis happens.
    pub(crate) fn from_parts(
        name: String,
        parent: Option<&VirtualFile>,
        hash: Option<ContentHash>,
        size: u64,
        last_modified: Option<SystemTime>,
    ) -> VirtualFile {
        VirtualFile(Arc::new(VfNode {
            name,
            parent: parent.map(|p| Arc::downgrade(&p.0)),
            children: RwLock::new(Vec::new()),
            hash,
            size,
            last_modified,
            staged_path: Mutex::new(None),
        }))
    }

    /// Converts a disk path into a `VirtualFile`, hashing it, probing for
    /// archive-ness, and recursively analyzing extracted contents.
    ///
    /// I/O and hashing failures are fatal and abort the containing call.
    /// Extraction failures are not: the node is downgraded to a non-archive
    /// leaf, keeping its own hash and size.
    pub(crate) fn analyze(
        ctx: &AnalyzeContext,
        parent: Option<&VirtualFile>,
        on_disk_path: &Path,
        logical_name: &str,
    ) -> Result<VirtualFile, VfsError> {
        let mut source = File::open(on_disk_path)
            .map_err(|e| VfsError::HashFailed { path: on_disk_path.to_path_buf(), source: e })?;
        let size = source
            .metadata()
            .map_err(|e| VfsError::HashFailed { path: on_disk_path.to_path_buf(), source: e })?
            .len();
        let hash = ctx.hasher.hash(&mut source)?;

        let last_modified = if parent.is_none() {
            Some(std::fs::metadata(on_disk_path)?.modified()?)
        } else {
            None
        };

        let node = VirtualFile::from_parts(
            logical_name.to_string(),
            parent,
            Some(hash),
            size,
            last_modified,
        );

        if ctx.detector.is_archive(on_disk_path) {
            tracing::debug!(path = %on_disk_path.display(), "descending into archive");

            let scratch = tempfile::Builder::new()
                .prefix("analyze-")
                .tempdir_in(&ctx.scratch_root)?;

            match ctx.extractor.extract(on_disk_path, scratch.path()) {
                Ok(()) => {
                    let mut children = Vec::new();
                    for entry in WalkDir::new(scratch.path())
                        .into_iter()
                        .filter_map(|entry| entry.ok())
                        .filter(|entry| entry.file_type().is_file())
                    {
                        let relative = entry
                            .path()
                            .strip_prefix(scratch.path())
                            .unwrap_or(entry.path());
                        let relative_name = relative.to_string_lossy().replace('\\', "/");

                        children.push(VirtualFile::analyze(
                            ctx,
                            Some(&node),
                            entry.path(),
                            &relative_name,
                        )?);
                    }
                    node.set_children(children);
                }
                Err(error) => {
                    tracing::warn!(
                        path = %on_disk_path.display(),
                        %error,
                        "archive extraction failed, treating as a leaf file"
                    );
                }
            }
            // `scratch` drops here regardless of outcome, deleting the directory.
        }

        Ok(node)
    }
}
