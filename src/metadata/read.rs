//! Reading a dentry tree out of an uncompressed metadata resource.
//!
//! Corruption that leaves the buffer unparseable is fatal and unwinds the
//! partial tree. Anomalies confined to a single dentry (a missing name,
//! a "." or ".." name, a duplicate sibling, children claimed by a
//! non-directory) drop that dentry with a warning and continue with its
//! siblings.

use slog::{warn, Logger};
use zerocopy::FromBytes;

use repr::dentry::{self, align8, DENTRY_DISK_SIZE, STREAM_ENTRY_DISK_SIZE};
use repr::{FileAttributes, Time};

use super::CancelCheck;
use crate::errors::{Error, MetadataError, Result};
use crate::tree::name::Name;
use crate::tree::{DentryId, StreamType, Tree};

/// Read the dentry tree of one image.
///
/// `root_offset` is where the root dentry record starts, as recorded in
/// the archive header. The returned tree has no root when the resource
/// opens with an end-of-directory marker; that is tolerated as an empty
/// image with a warning.
pub fn read_dentry_tree(
    buf: &[u8],
    root_offset: u64,
    logger: &Logger,
    cancel: Option<CancelCheck<'_>>,
) -> Result<Tree> {
    let mut reader = Reader {
        buf,
        tree: Tree::with_logger(logger.clone()),
        cancel,
    };

    let mut offset = root_offset;
    match reader.read_dentry(&mut offset)? {
        Some(root) => {
            let dentry = reader.tree.dentry(root);
            if dentry.has_long_name() || dentry.has_short_name() {
                warn!(logger, "The root directory has a nonempty name; removing it");
                reader.tree.set_name(root, None);
            }

            if !reader.tree.inode_of(root).is_directory() {
                return Err(MetadataError::RootNotDirectory.into());
            }

            reader.tree.set_root(Some(root));

            if reader.tree.dentry(root).subdir_offset != 0 {
                reader.read_tree_recursive(root)?;
            }
        }
        None => {
            warn!(
                logger,
                "The metadata resource has no directory entries; treating as an empty image"
            );
        }
    }

    Ok(reader.tree)
}

struct Reader<'a, 'c> {
    buf: &'a [u8],
    tree: Tree,
    cancel: Option<CancelCheck<'c>>,
}

impl Reader<'_, '_> {
    fn check_cancel(&self) -> Result<()> {
        match self.cancel {
            Some(cancel) if cancel() => Err(Error::interrupted()),
            _ => Ok(()),
        }
    }

    /// Read one dentry and its extra stream entries, advancing `offset`
    /// past everything consumed. Returns `None` at an end-of-directory
    /// marker, leaving `offset` untouched.
    fn read_dentry(&mut self, offset: &mut u64) -> Result<Option<DentryId>> {
        let buf_len = self.buf.len() as u64;
        let start = *offset;

        // The length field alone decides between a real dentry and an
        // end-of-sibling-list marker, so it is read before anything else.
        if start.checked_add(8).map_or(true, |end| end > buf_len) {
            return Err(MetadataError::DentryOverrun { offset: start }.into());
        }
        let raw = &self.buf[start as usize..];
        let length = align8(u64::from_le_bytes([
            raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
        ]));

        if length <= dentry::END_OF_DIRECTORY_SIZE {
            return Ok(None);
        }

        if length < DENTRY_DISK_SIZE as u64 {
            return Err(MetadataError::BadDentryLength { offset: start, length }.into());
        }
        if start.checked_add(length).map_or(true, |end| end > buf_len) {
            return Err(MetadataError::DentryOverrun { offset: start }.into());
        }

        let disk = dentry::Dentry::read_from_prefix(raw).expect("bounds checked above");

        let short_name_nbytes = disk.short_name_nbytes.get();
        let file_name_nbytes = disk.file_name_nbytes.get();
        if (short_name_nbytes | file_name_nbytes) & 1 != 0 {
            return Err(MetadataError::OddNameLength { offset: start }.into());
        }

        let needed = dentry::dentry_min_len_with_names(file_name_nbytes, short_name_nbytes);
        if length < needed {
            return Err(MetadataError::NamesOverrunDentry {
                offset: start,
                length,
                needed,
            }
            .into());
        }

        let id = self.tree.new_dentry_utf16(Name::empty(), false);
        self.tree.dentry_mut(id).subdir_offset = disk.subdir_offset.get();
        {
            let inode = self.tree.inode_of_mut(id);
            inode.attributes = attributes_from_bits(disk.attributes.get());
            inode.security_id = disk.security_id.get() as i32;
            inode.creation_time = Time(disk.creation_time.get());
            inode.last_access_time = Time(disk.last_access_time.get());
            inode.last_write_time = Time(disk.last_write_time.get());
            inode.rp_unknown_1 = disk.rp_unknown_1.get();

            // The tail of the fixed header is a union. When the reparse
            // attribute bit is set only the reparse view is meaningful;
            // the hard-link group id stays zero, so a WIM cannot express
            // hard links to a reparse point.
            if inode.attributes.contains(FileAttributes::REPARSE_POINT) {
                inode.reparse_tag = disk.reparse_tag();
                inode.rp_unknown_2 = disk.rp_unknown_2();
                inode.not_rpfixed = disk.not_rpfixed();
            } else {
                inode.ino = disk.hard_link_group_id();
            }
        }

        let mut pos = start as usize + DENTRY_DISK_SIZE;
        if file_name_nbytes != 0 {
            let name = read_utf16(&self.buf[pos..pos + file_name_nbytes as usize]);
            self.tree.dentry_mut(id).name = name;
            pos += file_name_nbytes as usize + 2;
        }
        if short_name_nbytes != 0 {
            let name = read_utf16(&self.buf[pos..pos + short_name_nbytes as usize]);
            self.tree.set_short_name_utf16(id, name);
            pos += short_name_nbytes as usize + 2;
        }

        // Any space left in the record after alignment holds tagged
        // metadata items, preserved as raw bytes.
        let record_end = (start + length) as usize;
        let extra_start = align8(pos as u64) as usize;
        if extra_start < record_end {
            self.tree.inode_of_mut(id).extra = self.buf[extra_start..record_end].to_vec();
        }

        *offset = start + length;

        if let Err(e) = self.read_inode_streams(id, disk.num_extra_streams.get(), &disk.default_hash, offset)
        {
            self.tree.free_dentry(id);
            return Err(e);
        }

        Ok(Some(id))
    }

    /// Read an inode's streams: slot 0 comes from the dentry record's
    /// default hash under the unnamed-name sentinel, the rest from the
    /// extra stream entries following the record. Types are assigned
    /// once all streams are present.
    fn read_inode_streams(
        &mut self,
        id: DentryId,
        num_extra_streams: u16,
        default_hash: &repr::Sha1Hash,
        offset: &mut u64,
    ) -> Result<()> {
        let buf_len = self.buf.len() as u64;
        let inode = self.tree.inode_of_mut(id);
        inode.add_stream(StreamType::Unknown, Name::empty(), *default_hash);

        for _ in 0..num_extra_streams {
            let start = *offset;
            if start.checked_add(STREAM_ENTRY_DISK_SIZE as u64).map_or(true, |end| end > buf_len) {
                return Err(MetadataError::BadStreamEntry { offset: start }.into());
            }
            let entry = dentry::ExtraStreamEntry::read_from_prefix(&self.buf[start as usize..])
                .expect("bounds checked above");

            let length = align8(entry.length.get());
            if length < STREAM_ENTRY_DISK_SIZE as u64 || length > buf_len - start {
                return Err(MetadataError::BadStreamEntry { offset: start }.into());
            }

            let name_nbytes = entry.name_nbytes.get();
            let name = if name_nbytes != 0 {
                if name_nbytes & 1 != 0
                    || STREAM_ENTRY_DISK_SIZE as u64 + u64::from(name_nbytes) > length
                {
                    return Err(MetadataError::BadStreamEntry { offset: start }.into());
                }
                let name_start = start as usize + STREAM_ENTRY_DISK_SIZE;
                read_utf16(&self.buf[name_start..name_start + name_nbytes as usize])
            } else {
                Name::empty()
            };

            let inode = self.tree.inode_of_mut(id);
            inode.add_stream(StreamType::Unknown, name, entry.hash);

            *offset = start + length;
        }

        self.tree.inode_of_mut(id).assign_stream_types();
        Ok(())
    }

    /// Read all children of `dir`, recursing into subdirectories.
    fn read_tree_recursive(&mut self, dir: DentryId) -> Result<()> {
        let cur_offset = self.tree.dentry(dir).subdir_offset;

        // A subdir offset equal to an ancestor's would replay that
        // ancestor's children forever; reject it here.
        let mut ancestor = self.tree.dentry(dir).parent;
        while !self.tree.is_root(ancestor) {
            if self.tree.dentry(ancestor).subdir_offset == cur_offset {
                return Err(MetadataError::CyclicDirectory {
                    dir: self.tree.full_path(dir),
                    ancestor: self.tree.full_path(ancestor),
                }
                .into());
            }
            ancestor = self.tree.dentry(ancestor).parent;
        }

        let mut offset = cur_offset;
        loop {
            self.check_cancel()?;

            let child = match self.read_dentry(&mut offset)? {
                Some(child) => child,
                None => return Ok(()),
            };

            if !self.tree.dentry(child).has_long_name() {
                let dir_path = self.tree.full_path(dir);
                warn!(self.tree.logger, "Ignoring unnamed dentry in directory {:?}", dir_path);
                self.tree.free_dentry(child);
                continue;
            }

            if self.tree.dentry(child).name().is_dot_or_dotdot() {
                warn!(
                    self.tree.logger,
                    "Ignoring file named \".\" or \"..\"; potentially malicious archive"
                );
                self.tree.free_dentry(child);
                continue;
            }

            if let Err(duplicate) = self.tree.link_child(dir, child) {
                let path = self.tree.full_path(duplicate);
                warn!(
                    self.tree.logger,
                    "Ignoring duplicate file {:?} (the image already contains a file at that path \
                     with the exact same name)",
                    path
                );
                self.tree.free_dentry(child);
                continue;
            }

            if self.tree.dentry(child).subdir_offset != 0 {
                if self.tree.inode_of(child).is_directory() {
                    self.read_tree_recursive(child)?;
                } else {
                    let path = self.tree.full_path(child);
                    warn!(
                        self.tree.logger,
                        "Ignoring children of non-directory file {:?}", path
                    );
                }
            }
        }
    }
}

fn read_utf16(bytes: &[u8]) -> Name {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Name::from_units(&units)
}

fn attributes_from_bits(bits: u32) -> FileAttributes {
    // Bits this library has no name for still round-trip through
    // re-emission.
    unsafe { FileAttributes::from_bits_unchecked(bits) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default_logger;

    fn parse(buf: &[u8]) -> Result<Tree> {
        read_dentry_tree(buf, 0, &default_logger(), None)
    }

    #[test]
    fn empty_resource_is_empty_image() {
        let tree = parse(&[0u8; 8]).unwrap();
        assert!(tree.root().is_none());
    }

    #[test]
    fn truncated_length_field_rejected() {
        let err = parse(&[0u8; 4]).unwrap_err();
        assert!(err.is_invalid_metadata());
    }

    #[test]
    fn undersized_dentry_rejected() {
        let mut buf = vec![0u8; 64];
        buf[0] = 64;
        let err = parse(&buf).unwrap_err();
        assert!(err.is_invalid_metadata());
    }

    #[test]
    fn overrunning_dentry_rejected() {
        let mut buf = vec![0u8; 112];
        buf[0] = 0xf8;
        buf[1] = 0x01;
        let err = parse(&buf).unwrap_err();
        assert!(err.is_invalid_metadata());
    }

    #[test]
    fn cancellation_observed_per_dentry() {
        // A root with one child; the cancel check fires on the first
        // child visit.
        use crate::metadata::write::write_dentry_tree;
        use crate::tree::Tree;

        let mut tree = Tree::new();
        let root = tree.new_filler_directory();
        tree.set_root(Some(root));
        let child = tree.new_dentry_with_new_inode(Some("f"), false);
        tree.inode_of_mut(child).attributes = FileAttributes::NORMAL;
        tree.link_child(root, child).unwrap();

        let mut buf = Vec::new();
        write_dentry_tree(&mut tree, root, &mut buf);

        let cancel = || true;
        let err = read_dentry_tree(&buf, 0, &default_logger(), Some(&cancel)).unwrap_err();
        assert!(err.is_interrupted());
    }
}
