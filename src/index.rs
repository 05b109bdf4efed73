use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::VfsError;
use crate::hash::ContentHash;
use crate::virtual_file::VirtualFile;

fn basename(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

/// An immutable index over a forest of root `VirtualFile`s.
///
/// Every [`IndexRoot::integrate`] call returns a brand new instance; existing
/// instances (and any reader holding one) remain valid. Nothing here is ever
/// mutated in place.
#[derive(Clone)]
pub struct IndexRoot {
    all_files: Arc<Vec<VirtualFile>>,
    by_full_path: Arc<HashMap<String, VirtualFile>>,
    by_root_path: Arc<HashMap<String, VirtualFile>>,
    by_hash: Arc<HashMap<ContentHash, Vec<VirtualFile>>>,
    by_name: Arc<HashMap<String, Vec<VirtualFile>>>,
}

impl Default for IndexRoot {
    fn default() -> Self {
        Self {
            all_files: Arc::new(Vec::new()),
            by_full_path: Arc::new(HashMap::new()),
            by_root_path: Arc::new(HashMap::new()),
            by_hash: Arc::new(HashMap::new()),
            by_name: Arc::new(HashMap::new()),
        }
    }
}

impl IndexRoot {
    pub fn all_files(&self) -> &[VirtualFile] {
        &self.all_files
    }

    pub fn by_full_path(&self, path: &str) -> Option<&VirtualFile> {
        self.by_full_path.get(path)
    }

    pub fn by_root_path(&self, path: &str) -> Option<&VirtualFile> {
        self.by_root_path.get(path)
    }

    pub fn by_hash(&self, hash: ContentHash) -> &[VirtualFile] {
        self.by_hash.get(&hash).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn by_name(&self, name: &str) -> &[VirtualFile] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Merges `new_roots` into this index, producing a fresh `IndexRoot`.
    ///
    /// De-duplication rule: roots are grouped by `name`, and within each group
    /// the *last* occurrence wins. `self`'s roots are considered before
    /// `new_roots`, so a matching name in `new_roots` always overrides the
    /// stored one.
    pub fn integrate(&self, new_roots: Vec<VirtualFile>) -> IndexRoot {
        let mut order: Vec<String> = Vec::new();
        let mut by_key: HashMap<String, VirtualFile> = HashMap::new();

        for file in self.all_files.iter().cloned().chain(new_roots) {
            let key = file.name().to_string();
            if !by_key.contains_key(&key) {
                order.push(key.clone());
            }
            by_key.insert(key, file);
        }

        let all_files: Vec<VirtualFile> =
            order.into_iter().map(|key| by_key.remove(&key).unwrap()).collect();

        let flat: Vec<VirtualFile> =
            all_files.par_iter().flat_map(|root| root.this_and_all_children()).collect();

        let (by_full_path, (by_root_path, (by_hash, by_name))) = rayon::join(
            || {
                flat.iter()
                    .map(|file| (file.full_path(), file.clone()))
                    .collect::<HashMap<_, _>>()
            },
            || {
                rayon::join(
                    || {
                        all_files
                            .iter()
                            .map(|file| (file.name().to_string(), file.clone()))
                            .collect::<HashMap<_, _>>()
                    },
                    || {
                        rayon::join(
                            || {
                                let mut map: HashMap<ContentHash, Vec<VirtualFile>> =
                                    HashMap::new();
                                for file in &flat {
                                    if let Some(hash) = file.hash() {
                                        map.entry(hash).or_default().push(file.clone());
                                    }
                                }
                                map
                            },
                            || {
                                let mut map: HashMap<String, Vec<VirtualFile>> = HashMap::new();
                                for file in &flat {
                                    map.entry(basename(file.name())).or_default().push(file.clone());
                                }
                                map
                            },
                        )
                    },
                )
            },
        );

        IndexRoot {
            all_files: Arc::new(all_files),
            by_full_path: Arc::new(by_full_path),
            by_root_path: Arc::new(by_root_path),
            by_hash: Arc::new(by_hash),
            by_name: Arc::new(by_name),
        }
    }

    /// Resolves an archive hash path: `root_hash` locates the root archive,
    /// and each subsequent basename in `path_segments` locates a child of the
    /// previously resolved node.
    pub fn file_for_archive_hash_path(
        &self,
        root_hash: ContentHash,
        path_segments: &[&str],
    ) -> Result<VirtualFile, VfsError> {
        let candidates = self.by_hash(root_hash);
        let mut current = candidates
            .iter()
            .find(|file| file.is_root())
            .cloned()
            .ok_or_else(|| VfsError::LookupMissing(format!("no root with hash {root_hash}")))?;

        for segment in path_segments {
            let matches = self.by_name(segment);
            current = matches
                .iter()
                .find(|file| file.parent().as_ref() == Some(&current))
                .cloned()
                .ok_or_else(|| {
                    VfsError::LookupMissing(format!(
                        "no child named {segment} under {}",
                        current.full_path()
                    ))
                })?;
        }

        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;

    fn root(name: &str, hash: u64) -> VirtualFile {
        VirtualFile::from_parts(name.to_string(), None, Some(ContentHash::from_u64(hash)), 10, None)
    }

    #[test]
    fn integration_is_idempotent() {
        let index = IndexRoot::default();
        let roots = vec![root("/a", 1), root("/b", 2)];
        let once = index.integrate(roots.clone());
        let twice = once.integrate(roots);

        assert_eq!(once.all_files().len(), twice.all_files().len());
        assert_eq!(
            once.by_root_path("/a").unwrap().hash(),
            twice.by_root_path("/a").unwrap().hash()
        );
    }

    #[test]
    fn last_write_wins_on_name_collision() {
        let index = IndexRoot::default();
        let first = root("/a", 1);
        let second = root("/a", 2);

        let integrated = index.integrate(vec![first, second.clone()]);

        assert_eq!(integrated.all_files().len(), 1);
        assert_eq!(integrated.by_root_path("/a").unwrap(), &second);
    }

    #[test]
    fn by_hash_counts_match_forest_nodes() {
        let index = IndexRoot::default();
        let parent = root("/archive", 5);
        let child =
            VirtualFile::from_parts("inner.txt".into(), Some(&parent), Some(ContentHash::from_u64(6)), 4, None);
        parent.set_children(vec![child]);

        let integrated = index.integrate(vec![parent]);
        assert_eq!(integrated.by_hash(ContentHash::from_u64(6)).len(), 1);
        assert_eq!(integrated.by_hash(ContentHash::from_u64(5)).len(), 1);
    }

    #[test]
    fn archive_hash_path_resolves_nested_child() {
        let index = IndexRoot::default();
        let parent = root("/archive", 5);
        let child = VirtualFile::from_parts(
            "inner/x.txt".into(),
            Some(&parent),
            Some(ContentHash::from_u64(6)),
            4,
            None,
        );
        parent.set_children(vec![child.clone()]);

        let integrated = index.integrate(vec![parent]);
        let resolved = integrated
            .file_for_archive_hash_path(ContentHash::from_u64(5), &["x.txt"])
            .unwrap();
        assert_eq!(resolved, child);
    }
}
