use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::analyzer::{self, AnalyzerOptions};
use crate::archive::{ArchiveDetector, ArchiveExtractor, ZipDetector, ZipExtractor};
use crate::cache;
use crate::error::VfsError;
use crate::hash::{ContentHash, Hasher, XxHasher};
use crate::index::IndexRoot;
use crate::pipeline::PipelineOptions;
use crate::portable::{KnownFile, PortableFile};
use crate::stager::Stager;
use crate::virtual_file::{AnalyzeContext, VirtualFile};

/// Builds a [`Context`], defaulting every tunable and collaborator the way
/// `vfstool_lib::VFS::from_directories` takes its knobs as plain arguments.
pub struct ContextBuilder {
    staging_root: PathBuf,
    analyzer_options: AnalyzerOptions,
    pipeline_options: PipelineOptions,
    hasher: Arc<dyn Hasher>,
    detector: Arc<dyn ArchiveDetector>,
    extractor: Arc<dyn ArchiveExtractor>,
}

impl ContextBuilder {
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            analyzer_options: AnalyzerOptions::default(),
            pipeline_options: PipelineOptions::default(),
            hasher: Arc::new(XxHasher),
            detector: Arc::new(ZipDetector),
            extractor: Arc::new(ZipExtractor),
        }
    }

    pub fn with_analysis_parallelism(mut self, parallelism: usize) -> Self {
        self.analyzer_options.parallelism = parallelism;
        self
    }

    pub fn with_analysis_queue_depth(mut self, queue_depth: usize) -> Self {
        self.analyzer_options.queue_depth = queue_depth;
        self
    }

    pub fn with_cache_pipeline(mut self, options: PipelineOptions) -> Self {
        self.pipeline_options = options;
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn Hasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn ArchiveDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn build(self) -> Context {
        Context {
            index: ArcSwap::from_pointee(IndexRoot::default()),
            swap_lock: Mutex::new(()),
            staging_root: self.staging_root,
            known_files: Mutex::new(Vec::new()),
            analyzer_options: self.analyzer_options,
            pipeline_options: self.pipeline_options,
            hasher: self.hasher,
            detector: self.detector,
            extractor: self.extractor,
        }
    }
}

/// Owner of the current [`IndexRoot`], the staging scratch root, and the
/// known-file backfill list. Coordinates scanning, staging, and persistence.
///
/// Reads (`index()`) never block: `index` is an `ArcSwap` so a reader always
/// sees either the previous or the newly integrated snapshot, never a partial
/// one. Writers (`add_root`, `integrate_from_file`, `backfill_missing`,
/// `integrate_from_portable`) do all of their analysis/integration work
/// against a loaded snapshot *before* taking `swap_lock`, which is only ever
/// held across the final `store`.
pub struct Context {
    index: ArcSwap<IndexRoot>,
    swap_lock: Mutex<()>,
    staging_root: PathBuf,
    known_files: Mutex<Vec<KnownFile>>,
    analyzer_options: AnalyzerOptions,
    pipeline_options: PipelineOptions,
    hasher: Arc<dyn Hasher>,
    detector: Arc<dyn ArchiveDetector>,
    extractor: Arc<dyn ArchiveExtractor>,
}

impl Context {
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        ContextBuilder::new(staging_root).build()
    }

    /// The current index snapshot. Cheap: a single atomic load.
    pub fn index(&self) -> Arc<IndexRoot> {
        self.index.load_full()
    }

    /// A `Stager` sharing this context's scratch root and archive extractor.
    pub fn stager(&self) -> Stager {
        Stager::new(self.staging_root.clone(), Arc::clone(&self.extractor))
    }

    fn analyze_context(&self) -> AnalyzeContext {
        AnalyzeContext {
            hasher: Arc::clone(&self.hasher),
            detector: Arc::clone(&self.detector),
            extractor: Arc::clone(&self.extractor),
            scratch_root: self.staging_root.clone(),
        }
    }

    fn swap_in(&self, index: IndexRoot) {
        let _guard = self.swap_lock.lock();
        self.index.store(Arc::new(index));
    }

    /// Scans `root`, reusing unchanged entries from the current index and
    /// analyzing the rest concurrently, then integrates the result.
    ///
    /// `root` must be absolute; this is checked before any scanning happens,
    /// so a rejected call never touches the index.
    pub fn add_root(&self, root: &Path) -> Result<(), VfsError> {
        if !root.is_absolute() {
            return Err(VfsError::NotAbsolutePath(root.to_path_buf()));
        }

        let snapshot = self.index.load_full();
        let new_roots = analyzer::scan(&snapshot, root, self.analyze_context(), &self.analyzer_options)?;
        let integrated = snapshot.integrate(new_roots);

        tracing::debug!(root = %root.display(), files = integrated.all_files().len(), "integrated root");
        self.swap_in(integrated);
        Ok(())
    }

    /// Serializes the current index to the binary cache format.
    pub fn write_to_file<W: Write>(&self, sink: &mut W) -> Result<(), VfsError> {
        let roots = self.index.load().all_files().to_vec();
        cache::write_cache(sink, roots, &self.pipeline_options)
    }

    /// Loads roots from the binary cache format and integrates them.
    pub fn integrate_from_file<R: Read>(&self, reader: &mut R) -> Result<(), VfsError> {
        let roots = cache::read_cache(reader, &self.pipeline_options)?;
        let snapshot = self.index.load_full();
        let integrated = snapshot.integrate(roots);
        self.swap_in(integrated);
        Ok(())
    }

    /// Records a known `(path, hash)` pair for a later `backfill_missing`
    /// call. A root-length known file whose hash collides with a
    /// previously recorded root under a different name is rejected
    /// immediately, since `backfill_missing` would otherwise have no way to
    /// decide which name the synthesized root should carry.
    pub fn add_known(&self, known: KnownFile) -> Result<(), VfsError> {
        let mut known_files = self.known_files.lock();

        if known.is_root() {
            let name = &known.path_components[0];
            if let Some(existing) = known_files
                .iter()
                .filter(|existing| existing.is_root())
                .find(|existing| existing.hash == known.hash && &existing.path_components[0] != name)
            {
                return Err(VfsError::ConflictingKnownRoot {
                    hash: known.hash,
                    first: existing.path_components[0].clone(),
                    second: name.clone(),
                });
            }
        }

        known_files.push(known);
        Ok(())
    }

    /// Synthesizes roots (and intermediate archive nodes) for every recorded
    /// known file, integrates them, and clears the known-file list.
    pub fn backfill_missing(&self) -> Result<(), VfsError> {
        let records = std::mem::take(&mut *self.known_files.lock());
        if records.is_empty() {
            return Ok(());
        }

        let (root_records, mut nested): (Vec<KnownFile>, Vec<KnownFile>) =
            records.into_iter().partition(KnownFile::is_root);
        nested.sort_by_key(|record| record.path_components.len());

        let mut roots: HashMap<String, VirtualFile> = HashMap::new();
        for record in root_records {
            let name = record.path_components[0].clone();
            roots.insert(name.clone(), VirtualFile::from_parts(name, None, Some(record.hash), 0, None));
        }

        for record in nested {
            let root_name = record.path_components[0].clone();
            let mut current = roots
                .entry(root_name.clone())
                .or_insert_with(|| VirtualFile::from_parts(root_name, None, None, 0, None))
                .clone();

            let last_index = record.path_components.len() - 1;
            for (depth, component) in record.path_components.iter().enumerate().skip(1) {
                let existing = current.children().into_iter().find(|child| child.name() == component);
                current = match existing {
                    Some(child) => child,
                    None => {
                        let hash = (depth == last_index).then_some(record.hash);
                        let child = VirtualFile::from_parts(component.clone(), Some(&current), hash, 0, None);
                        current.push_child(child.clone());
                        child
                    }
                };
            }
        }

        let snapshot = self.index.load_full();
        let integrated = snapshot.integrate(roots.into_values().collect());
        self.swap_in(integrated);
        Ok(())
    }

    /// For each file in `files`, flattens its ancestor chain (root down to
    /// the file itself, deduplicated across inputs) into hash-addressed,
    /// path-free records suitable for exchange with a process that has no
    /// access to this machine's on-disk paths.
    pub fn get_portable_state(&self, files: &[VirtualFile]) -> Vec<PortableFile> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for file in files {
            for ancestor in file.files_in_full_path() {
                if seen.insert(ancestor.clone()) {
                    ordered.push(ancestor);
                }
            }
        }

        ordered
            .into_iter()
            .filter_map(|file| {
                let hash = file.hash()?;
                Some(PortableFile {
                    name: (!file.is_root()).then(|| file.name().to_string()),
                    hash,
                    parent_hash: file.parent().and_then(|parent| parent.hash()),
                    size: file.size(),
                })
            })
            .collect()
    }

    /// Inverse of [`get_portable_state`](Context::get_portable_state):
    /// reconstructs a forest from hash-addressed records and integrates it.
    /// `link_map` supplies a real on-disk path for a root-level hash when the
    /// caller has one; a root hash missing from `link_map` falls back to
    /// being named after its own hash, since the portable form itself never
    /// carries an on-disk path for roots.
    pub fn integrate_from_portable(
        &self,
        files: Vec<PortableFile>,
        link_map: &HashMap<ContentHash, PathBuf>,
    ) -> Result<(), VfsError> {
        let mut by_parent: HashMap<Option<ContentHash>, Vec<PortableFile>> = HashMap::new();
        for file in files {
            by_parent.entry(file.parent_hash).or_default().push(file);
        }

        let root_records = by_parent.remove(&None).unwrap_or_default();
        let roots: Vec<VirtualFile> = root_records
            .into_iter()
            .map(|record| build_portable_node(record, None, &by_parent, link_map))
            .collect();

        let snapshot = self.index.load_full();
        let integrated = snapshot.integrate(roots);
        self.swap_in(integrated);
        Ok(())
    }
}

fn build_portable_node(
    file: PortableFile,
    parent: Option<&VirtualFile>,
    by_parent: &HashMap<Option<ContentHash>, Vec<PortableFile>>,
    link_map: &HashMap<ContentHash, PathBuf>,
) -> VirtualFile {
    let name = match (parent, link_map.get(&file.hash)) {
        (None, Some(path)) => path.to_string_lossy().into_owned(),
        _ => file.name.unwrap_or_else(|| file.hash.to_string()),
    };
    let node = VirtualFile::from_parts(name, parent, Some(file.hash), file.size, None);

    if let Some(children) = by_parent.get(&Some(file.hash)) {
        let built: Vec<VirtualFile> = children
            .iter()
            .cloned()
            .map(|child| build_portable_node(child, Some(&node), by_parent, link_map))
            .collect();
        node.set_children(built);
    }

    node
}
