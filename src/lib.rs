//! A content-addressed virtual file system index for modlist assembly
//! tooling: it enumerates files on disk, recursively descends into nested
//! archives, assigns each file a stable content hash, and builds a queryable
//! index over the resulting forest of real and virtual files.
//!
//! The crate is a library only — no CLI binary, no network transport, no
//! config-file parser. A downstream application owns those.

mod analyzer;
mod archive;
mod cache;
mod context;
mod error;
mod hash;
mod index;
mod pipeline;
mod portable;
mod stager;
mod virtual_file;

pub use analyzer::AnalyzerOptions;
pub use archive::{ArchiveDetector, ArchiveExtractor, ZipDetector, ZipExtractor};
pub use context::{Context, ContextBuilder};
pub use error::{Result, VfsError};
pub use hash::{ContentHash, Hasher, XxHasher};
pub use index::IndexRoot;
pub use pipeline::PipelineOptions;
pub use portable::{KnownFile, PortableFile};
pub use stager::{StageHandle, Stager};
pub use virtual_file::{VirtualFile, FULL_PATH_DELIMITER};
