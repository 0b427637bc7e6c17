//! Fixed-layout records of the dentry stream inside a metadata resource.
//!
//! A directory's children are stored as a run of [`Dentry`] records, each
//! optionally followed by [`ExtraStreamEntry`] records, terminated by a
//! record whose length field is zero (which occupies 8 bytes on disk).

use crate::{Sha1Hash, SHA1_HASH_SIZE};
use zerocopy::byteorder::{LittleEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, Unaligned};

type Le16 = U16<LittleEndian>;
type Le32 = U32<LittleEndian>;
type Le64 = U64<LittleEndian>;

/// Size of the fixed-length portion of a dentry record.
pub const DENTRY_DISK_SIZE: usize = 102;

/// Size of the fixed-length portion of an extra stream entry.
pub const STREAM_ENTRY_DISK_SIZE: usize = 38;

/// An on-disk end-of-sibling-list marker occupies this many bytes even
/// though its length field reads zero.
pub const END_OF_DIRECTORY_SIZE: u64 = 8;

/// Round a record length up to the 8-byte alignment all records use.
pub const fn align8(len: u64) -> u64 {
    (len + 7) & !7
}

/// The fixed-length portion of a dentry record.
///
/// The twelve bytes starting at `rp_unknown_1` are interpreted two ways:
/// for a reparse point they hold the reparse tag and fixup flag, otherwise
/// they hold the hard-link group id. Accessors below decode both views;
/// which one is valid depends on the attributes field.
#[derive(Debug, Clone, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct Dentry {
    /// Total record length in bytes, including names, tagged items and
    /// padding but not any extra stream entries. A value of zero marks the
    /// end of a sibling list.
    pub length: Le64,
    pub attributes: Le32,
    /// Index into the image's security descriptor table, or -1 for none.
    /// Stored as the two's complement bit pattern.
    pub security_id: Le32,
    /// Offset in the uncompressed metadata resource of this directory's
    /// children, or 0 for non-directories and empty directories.
    pub subdir_offset: Le64,
    pub unused_1: Le64,
    pub unused_2: Le64,
    /// 100-nanosecond intervals since 1601-01-01 00:00 UTC.
    pub creation_time: Le64,
    pub last_access_time: Le64,
    pub last_write_time: Le64,
    /// SHA-1 of the default stream (unnamed data, or reparse data), or all
    /// zeroes when extra stream entries carry the hashes instead.
    pub default_hash: [u8; SHA1_HASH_SIZE],
    pub rp_unknown_1: Le32,
    /// Reparse view: reparse tag (4), rp_unknown_2 (2), not_rpfixed (2).
    /// Nonreparse view: hard-link group id (8).
    pub tag_or_link_group: [u8; 8],
    /// Number of extra stream entries directly following this record.
    pub num_extra_streams: Le16,
    /// Length in bytes of the UTF-16LE short (8.3) name, without NUL.
    pub short_name_nbytes: Le16,
    /// Length in bytes of the UTF-16LE long name, without NUL. Zero only
    /// for the root dentry.
    pub file_name_nbytes: Le16,
}

impl Dentry {
    pub fn reparse_tag(&self) -> u32 {
        u32::from_le_bytes([
            self.tag_or_link_group[0],
            self.tag_or_link_group[1],
            self.tag_or_link_group[2],
            self.tag_or_link_group[3],
        ])
    }

    pub fn rp_unknown_2(&self) -> u16 {
        u16::from_le_bytes([self.tag_or_link_group[4], self.tag_or_link_group[5]])
    }

    pub fn not_rpfixed(&self) -> u16 {
        u16::from_le_bytes([self.tag_or_link_group[6], self.tag_or_link_group[7]])
    }

    pub fn hard_link_group_id(&self) -> u64 {
        u64::from_le_bytes(self.tag_or_link_group)
    }

    pub fn set_reparse(&mut self, tag: u32, rp_unknown_2: u16, not_rpfixed: u16) {
        self.tag_or_link_group[0..4].copy_from_slice(&tag.to_le_bytes());
        self.tag_or_link_group[4..6].copy_from_slice(&rp_unknown_2.to_le_bytes());
        self.tag_or_link_group[6..8].copy_from_slice(&not_rpfixed.to_le_bytes());
    }

    pub fn set_hard_link_group_id(&mut self, id: u64) {
        self.tag_or_link_group = id.to_le_bytes();
    }
}

/// An extra NTFS-style stream attached to a file, such as a named data
/// stream. Followed on disk by the NUL-terminated UTF-16LE stream name if
/// `name_nbytes` is nonzero, then padding to 8 bytes.
#[derive(Debug, Clone, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct ExtraStreamEntry {
    /// Length of this entry including name, NUL terminator and padding.
    pub length: Le64,
    pub reserved: Le64,
    /// SHA-1 of the stream's data, or all zeroes for zero-length data.
    pub hash: [u8; SHA1_HASH_SIZE],
    /// Length in bytes of the UTF-16LE stream name, without NUL; zero for
    /// an unnamed stream.
    pub name_nbytes: Le16,
}

/// Minimum record length for a dentry carrying names of the given byte
/// lengths, before 8-byte alignment and tagged items.
pub fn dentry_min_len_with_names(file_name_nbytes: u16, short_name_nbytes: u16) -> u64 {
    let mut length = DENTRY_DISK_SIZE as u64;
    if file_name_nbytes != 0 {
        length += u64::from(file_name_nbytes) + 2;
    }
    if short_name_nbytes != 0 {
        length += u64::from(short_name_nbytes) + 2;
    }
    length
}
