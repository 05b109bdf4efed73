use std::io::{Cursor, Read, Write};
use std::time::{Duration, UNIX_EPOCH};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::VfsError;
use crate::hash::ContentHash;
use crate::pipeline::{self, PipelineOptions};
use crate::virtual_file::VirtualFile;

/// Literal magic bytes every cache file must start with. The decoder compares
/// against this constant directly — not against whatever bytes it just read —
/// so a corrupt or foreign file is rejected rather than trivially accepted.
pub const MAGIC: &[u8; 18] = b"WABBAJACK VFS FILE";
pub const VERSION: u64 = 2;

/// Serializes `roots` to the binary cache format: magic, version, file count,
/// then one length-prefixed record per root. Each record recursively encodes
/// its whole subtree inline.
pub(crate) fn write_cache<W: Write>(
    sink: &mut W,
    roots: Vec<VirtualFile>,
    options: &PipelineOptions,
) -> Result<(), VfsError> {
    sink.write_all(MAGIC)?;
    sink.write_u64::<LittleEndian>(VERSION)?;
    sink.write_u64::<LittleEndian>(roots.len() as u64)?;

    let buffers: Vec<Vec<u8>> = pipeline::run_unordered(
        roots,
        options.worker_count,
        options.queue_depth,
        |root| Some(encode_node(&root)),
    );

    for buffer in buffers {
        sink.write_u64::<LittleEndian>(buffer.len() as u64)?;
        sink.write_all(&buffer)?;
    }

    Ok(())
}

/// Inverse of [`write_cache`]. Rejects any file whose magic or version does
/// not match exactly.
pub(crate) fn read_cache<R: Read>(
    reader: &mut R,
    options: &PipelineOptions,
) -> Result<Vec<VirtualFile>, VfsError> {
    let mut magic = [0u8; 18];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(VfsError::BadCacheFormat(format!(
            "magic mismatch: expected {:?}, found {:?}",
            String::from_utf8_lossy(MAGIC),
            String::from_utf8_lossy(&magic)
        )));
    }

    let version = reader.read_u64::<LittleEndian>()?;
    if version != VERSION {
        return Err(VfsError::BadCacheFormat(format!(
            "unsupported cache version: {version}"
        )));
    }

    let file_count = reader.read_u64::<LittleEndian>()?;
    let mut buffers = Vec::with_capacity(file_count as usize);
    for _ in 0..file_count {
        let length = reader.read_u64::<LittleEndian>()?;
        let mut buffer = vec![0u8; length as usize];
        reader.read_exact(&mut buffer)?;
        buffers.push(buffer);
    }

    let results: Vec<Result<VirtualFile, VfsError>> = pipeline::run_unordered(
        buffers,
        options.worker_count,
        options.queue_depth,
        |buffer| Some(decode_record(&buffer)),
    );

    let mut roots = Vec::with_capacity(results.len());
    for result in results {
        roots.push(result?);
    }
    Ok(roots)
}

fn encode_node(file: &VirtualFile) -> Vec<u8> {
    let mut buf = Vec::new();

    let name_bytes = file.name().as_bytes();
    buf.write_u32::<LittleEndian>(name_bytes.len() as u32).expect("writes to Vec never fail");
    buf.extend_from_slice(name_bytes);

    match file.hash() {
        Some(hash) => {
            buf.write_u8(1).unwrap();
            buf.extend_from_slice(hash.as_bytes());
        }
        None => buf.write_u8(0).unwrap(),
    }

    buf.write_u64::<LittleEndian>(file.size()).unwrap();

    match file.last_modified() {
        Some(time) => {
            buf.write_u8(1).unwrap();
            let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
            buf.write_u64::<LittleEndian>(since_epoch.as_secs()).unwrap();
            buf.write_u32::<LittleEndian>(since_epoch.subsec_nanos()).unwrap();
        }
        None => buf.write_u8(0).unwrap(),
    }

    let children = file.children();
    buf.write_u64::<LittleEndian>(children.len() as u64).unwrap();
    for child in &children {
        buf.extend_from_slice(&encode_node(child));
    }

    buf
}

fn decode_record(buffer: &[u8]) -> Result<VirtualFile, VfsError> {
    let mut cursor = Cursor::new(buffer);
    decode_node(&mut cursor, None)
}

fn decode_node(
    cursor: &mut Cursor<&[u8]>,
    parent: Option<&VirtualFile>,
) -> Result<VirtualFile, VfsError> {
    let name_len = cursor.read_u32::<LittleEndian>()? as usize;
    let mut name_bytes = vec![0u8; name_len];
    cursor.read_exact(&mut name_bytes)?;
    let name = String::from_utf8(name_bytes)
        .map_err(|error| VfsError::BadCacheFormat(error.to_string()))?;

    let hash = match cursor.read_u8()? {
        0 => None,
        1 => {
            let mut bytes = [0u8; 8];
            cursor.read_exact(&mut bytes)?;
            Some(ContentHash::from_bytes(bytes))
        }
        other => {
            return Err(VfsError::BadCacheFormat(format!(
                "invalid hash-presence tag: {other}"
            )));
        }
    };

    let size = cursor.read_u64::<LittleEndian>()?;

    let last_modified = match cursor.read_u8()? {
        0 => None,
        1 => {
            let secs = cursor.read_u64::<LittleEndian>()?;
            let nanos = cursor.read_u32::<LittleEndian>()?;
            Some(UNIX_EPOCH + Duration::new(secs, nanos))
        }
        other => {
            return Err(VfsError::BadCacheFormat(format!(
                "invalid mtime-presence tag: {other}"
            )));
        }
    };

    let node = VirtualFile::from_parts(name, parent, hash, size, last_modified);

    let child_count = cursor.read_u64::<LittleEndian>()?;
    let mut children = Vec::with_capacity(child_count as usize);
    for _ in 0..child_count {
        children.push(decode_node(cursor, Some(&node))?);
    }
    node.set_children(children);

    Ok(node)
}
