//! Inodes and their streams. An inode is the identity of a file; one or
//! more dentries (hard links) refer to it. The WIM format has no explicit
//! inode records; identity is reconstructed from the hard-link group ids
//! carried by dentries.

use std::collections::BTreeMap;

use repr::{FileAttributes, Sha1Hash, Time, ZERO_HASH};

use super::name::Name;
use super::DentryId;

/// How a stream's data is to be interpreted. The on-disk format does not
/// record this; it is inferred from the stream's name, hash and the
/// owning inode's attributes after all streams are read.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StreamType {
    /// Not yet determined.
    Unknown,
    /// The unnamed data stream or a named alternate data stream.
    Data,
    /// Uncompressed reparse point data.
    ReparsePoint,
    /// All of an encrypted file's data, in the format produced by
    /// `ReadEncryptedFileRaw()` on Windows.
    EfsrpcRawData,
}

/// One data flow attached to an inode.
#[derive(Debug, Clone)]
pub struct Stream {
    pub stream_id: u32,
    pub stream_type: StreamType,
    name: Name,
    pub hash: Sha1Hash,
}

impl Stream {
    pub(crate) fn new(stream_id: u32, stream_type: StreamType, name: Name, hash: Sha1Hash) -> Self {
        Stream {
            stream_id,
            stream_type,
            name,
            hash,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn is_named(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn is_named_data_stream(&self) -> bool {
        self.stream_type == StreamType::Data && self.is_named()
    }

    pub fn is_zero_hash(&self) -> bool {
        repr::is_zero_hash(&self.hash)
    }
}

/// A file's identity and metadata. Directories additionally own the two
/// ordered child indexes, keyed on the child's long name: one compares
/// code units directly, the other compares upper-cased units and holds
/// one representative per equivalence class.
#[derive(Debug)]
pub struct Inode {
    pub attributes: FileAttributes,
    /// Index into the image's security descriptor table, or -1.
    pub security_id: i32,
    pub creation_time: Time,
    pub last_access_time: Time,
    pub last_write_time: Time,
    /// Hard-link group id. Zero means "no hard-link identity", which is
    /// the only value reparse points may carry.
    pub ino: u64,
    pub(crate) nlink: u32,
    streams: Vec<Stream>,
    next_stream_id: u32,
    /// Raw tagged metadata items carried through parse and emission.
    pub extra: Vec<u8>,
    pub rp_unknown_1: u32,
    pub reparse_tag: u32,
    pub rp_unknown_2: u16,
    pub not_rpfixed: u16,
    pub(crate) children: BTreeMap<Vec<u16>, DentryId>,
    pub(crate) children_ci: BTreeMap<Vec<u16>, DentryId>,
}

impl Inode {
    pub(crate) fn new(set_timestamps: bool) -> Self {
        let now = if set_timestamps {
            Time::now()
        } else {
            Time::default()
        };
        Inode {
            attributes: FileAttributes::empty(),
            security_id: repr::NO_SECURITY_ID,
            creation_time: now,
            last_access_time: now,
            last_write_time: now,
            ino: 0,
            nlink: 1,
            streams: Vec::new(),
            next_stream_id: 0,
            extra: Vec::new(),
            rp_unknown_1: 0,
            reparse_tag: 0,
            rp_unknown_2: 0,
            not_rpfixed: 0,
            children: BTreeMap::new(),
            children_ci: BTreeMap::new(),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }

    pub fn is_reparse_point(&self) -> bool {
        self.attributes.contains(FileAttributes::REPARSE_POINT)
    }

    pub fn is_encrypted(&self) -> bool {
        self.attributes.contains(FileAttributes::ENCRYPTED)
    }

    pub fn nlink(&self) -> u32 {
        self.nlink
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    pub fn streams_mut(&mut self) -> &mut [Stream] {
        &mut self.streams
    }

    /// Add a stream. Ids are assigned in creation order and never reused.
    pub fn add_stream(&mut self, stream_type: StreamType, name: Name, hash: Sha1Hash) -> u32 {
        let id = self.next_stream_id;
        self.next_stream_id += 1;
        self.streams.push(Stream::new(id, stream_type, name, hash));
        id
    }

    /// The first unnamed stream of the given type, if any.
    pub fn unnamed_stream(&self, stream_type: StreamType) -> Option<&Stream> {
        self.streams
            .iter()
            .find(|s| !s.is_named() && s.stream_type == stream_type)
    }

    /// Hash of the unnamed data stream, or the zero hash if there is none.
    pub fn unnamed_data_stream_hash(&self) -> Sha1Hash {
        self.unnamed_stream(StreamType::Data)
            .map_or(ZERO_HASH, |s| s.hash)
    }

    /// Assign a type to every stream. The on-disk format does not record
    /// stream types, so they are inferred once all of an inode's streams
    /// have been read.
    pub(crate) fn assign_stream_types(&mut self) {
        if self.is_encrypted() {
            self.assign_stream_types_encrypted();
        } else {
            self.assign_stream_types_unencrypted();
        }
    }

    /// An encrypted file's data streams are packed into a single
    /// EFSRPC-format stream. Encrypted files cannot carry a reparse point
    /// stream in this format, so nothing else is assigned.
    fn assign_stream_types_encrypted(&mut self) {
        for strm in &mut self.streams {
            if !strm.is_named() && !repr::is_zero_hash(&strm.hash) {
                strm.stream_type = StreamType::EfsrpcRawData;
                return;
            }
        }
    }

    /// An unencrypted file has an unnamed data stream, a reparse point
    /// stream, or both, plus any number of named data streams.
    fn assign_stream_types_unencrypted(&mut self) {
        let is_reparse = self.is_reparse_point();
        let mut found_reparse_point_stream = false;
        let mut found_unnamed_data_stream = false;
        let mut unnamed_with_zero_hash: Option<usize> = None;

        for i in 0..self.streams.len() {
            let strm = &mut self.streams[i];
            if strm.is_named() {
                strm.stream_type = StreamType::Data;
            } else if !repr::is_zero_hash(&strm.hash) {
                if is_reparse && !found_reparse_point_stream {
                    found_reparse_point_stream = true;
                    strm.stream_type = StreamType::ReparsePoint;
                } else if !found_unnamed_data_stream {
                    found_unnamed_data_stream = true;
                    strm.stream_type = StreamType::Data;
                }
            } else {
                // Remember a hashless unnamed stream; it becomes the
                // unnamed data stream if no better candidate shows up.
                unnamed_with_zero_hash = Some(i);
            }
        }

        if !found_unnamed_data_stream {
            if let Some(i) = unnamed_with_zero_hash {
                self.streams[i].stream_type = StreamType::Data;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inode_with_streams(attributes: FileAttributes, streams: &[(&str, u8)]) -> Inode {
        let mut inode = Inode::new(false);
        inode.attributes = attributes;
        for &(name, hash_byte) in streams {
            inode.add_stream(StreamType::Unknown, Name::new(name), [hash_byte; 20]);
        }
        inode.assign_stream_types();
        inode
    }

    #[test]
    fn plain_file_gets_unnamed_data_stream() {
        let inode = inode_with_streams(FileAttributes::NORMAL, &[("", 0xab)]);
        assert_eq!(inode.streams()[0].stream_type, StreamType::Data);
        assert_eq!(inode.unnamed_data_stream_hash(), [0xab; 20]);
    }

    #[test]
    fn reparse_point_claims_first_unnamed_stream() {
        let inode = inode_with_streams(
            FileAttributes::REPARSE_POINT,
            &[("", 0x11), ("", 0x22), ("ads", 0x33)],
        );
        assert_eq!(inode.streams()[0].stream_type, StreamType::ReparsePoint);
        assert_eq!(inode.streams()[1].stream_type, StreamType::Data);
        assert_eq!(inode.streams()[2].stream_type, StreamType::Data);
    }

    #[test]
    fn zero_hash_fallback_becomes_data() {
        let inode = inode_with_streams(FileAttributes::NORMAL, &[("", 0x00), ("ads", 0x44)]);
        assert_eq!(inode.streams()[0].stream_type, StreamType::Data);
        assert!(inode.streams()[0].is_zero_hash());
    }

    #[test]
    fn encrypted_file_gets_single_efsrpc_stream() {
        let inode = inode_with_streams(
            FileAttributes::ENCRYPTED,
            &[("", 0x00), ("", 0x55), ("", 0x66)],
        );
        assert_eq!(inode.streams()[0].stream_type, StreamType::Unknown);
        assert_eq!(inode.streams()[1].stream_type, StreamType::EfsrpcRawData);
        assert_eq!(inode.streams()[2].stream_type, StreamType::Unknown);
    }
}
