//! Stream window registry key.

use wavestream_io::FileId;

/// Identity of a stream window: which file, where it starts, and whether
/// other sessions may share it.
///
/// Ordered so the registry can do exact-match lookups in a `BTreeMap`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferKey {
    pub file: FileId,
    pub offset: u64,
    pub shareable: bool,
}

impl BufferKey {
    pub fn new(file: FileId, offset: u64, shareable: bool) -> Self {
        Self {
            file,
            offset,
            shareable,
        }
    }
}
