use crate::hash::ContentHash;

/// One node of a forest flattened for exchange with a process that has no
/// access to the original on-disk paths — only hashes and parent links.
///
/// `name` is `None` for a root: a root's name is an on-disk path specific to
/// the machine that produced it, so it is dropped rather than shipped: the
/// receiving side re-anchors roots by hash, not by path.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PortableFile {
    pub name: Option<String>,
    pub hash: ContentHash,
    pub parent_hash: Option<ContentHash>,
    pub size: u64,
}

/// One record supplied to `BackfillMissing`: an ordered chain of path
/// components (outermost first) ending at a file whose hash is already
/// known, but whose position in the forest is not.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct KnownFile {
    pub path_components: Vec<String>,
    pub hash: ContentHash,
}

impl KnownFile {
    pub fn new(path_components: Vec<String>, hash: ContentHash) -> Self {
        Self { path_components, hash }
    }

    /// A known file with a single component names a root outright.
    pub fn is_root(&self) -> bool {
        self.path_components.len() == 1
    }
}
