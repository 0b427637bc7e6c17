//! On-disk layout of a WIM metadata resource:
//!
//! * [Dentry records](dentry/index.html)
//! * [Extra stream entries](dentry/index.html)
//! * [Timestamps](time/index.html)
//!
//! All multi-byte integers are little-endian regardless of host, and all
//! records are aligned to 8-byte boundaries within the uncompressed
//! metadata resource.

use bitflags::bitflags;

pub mod dentry;
pub mod time;

pub use time::Time;

/// Size in bytes of a SHA-1 message digest.
pub const SHA1_HASH_SIZE: usize = 20;

/// A SHA-1 message digest identifying a blob in the content-addressed store.
pub type Sha1Hash = [u8; SHA1_HASH_SIZE];

/// The all-zeroes hash, used for zero-length streams.
pub const ZERO_HASH: Sha1Hash = [0; SHA1_HASH_SIZE];

pub fn is_zero_hash(hash: &Sha1Hash) -> bool {
    *hash == ZERO_HASH
}

/// Security descriptor id meaning "no security descriptor".
pub const NO_SECURITY_ID: i32 = -1;

bitflags! {
    /// Windows file attributes, as returned by `GetFileAttributes()`.
    #[derive(Default)]
    pub struct FileAttributes: u32 {
        const READONLY            = 0x0000_0001;
        const HIDDEN              = 0x0000_0002;
        const SYSTEM              = 0x0000_0004;
        const DIRECTORY           = 0x0000_0010;
        const ARCHIVE             = 0x0000_0020;
        const DEVICE              = 0x0000_0040;
        const NORMAL              = 0x0000_0080;
        const TEMPORARY           = 0x0000_0100;
        const SPARSE_FILE         = 0x0000_0200;
        const REPARSE_POINT       = 0x0000_0400;
        const COMPRESSED          = 0x0000_0800;
        const OFFLINE             = 0x0000_1000;
        const NOT_CONTENT_INDEXED = 0x0000_2000;
        const ENCRYPTED           = 0x0000_4000;
        const VIRTUAL             = 0x0001_0000;
    }
}

impl FileAttributes {
    /// True if these attributes describe a real directory, i.e. one that
    /// can have children. A reparse point is never treated as a directory
    /// even when the directory bit is set.
    pub fn is_directory(self) -> bool {
        self & (FileAttributes::DIRECTORY | FileAttributes::REPARSE_POINT)
            == FileAttributes::DIRECTORY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_excludes_reparse_points() {
        assert!(FileAttributes::DIRECTORY.is_directory());
        assert!(!(FileAttributes::DIRECTORY | FileAttributes::REPARSE_POINT).is_directory());
        assert!(!FileAttributes::NORMAL.is_directory());
    }
}
