//! Writing a dentry tree into a metadata resource buffer.
//!
//! Emission is two-phase: subdir offsets are computed for the whole tree
//! first, then records are appended in the same pre-order walk, so every
//! directory's children land exactly where its record says they will.

use zerocopy::byteorder::U64;
use zerocopy::{AsBytes, FromBytes};

use repr::dentry::{self, align8, ExtraStreamEntry, STREAM_ENTRY_DISK_SIZE};
use repr::{Sha1Hash, ZERO_HASH};

use super::pad_to_8;
use crate::tree::name::Name;
use crate::tree::{DentryId, StreamType, Tree};

/// Bytes the dentry will occupy on disk: the fixed header, names, tagged
/// items, extra stream entries, and all alignment padding.
pub fn dentry_out_total_length(tree: &Tree, id: DentryId) -> u64 {
    let dentry = tree.dentry(id);
    let inode = tree.inode_of(id);

    let mut len = align8(dentry::dentry_min_len_with_names(
        dentry.name().nbytes() as u16,
        dentry.short_name().nbytes() as u16,
    ));

    if !inode.extra.is_empty() {
        len += inode.extra.len() as u64;
        len = align8(len);
    }

    if !inode.is_encrypted() {
        // One extra stream entry per named data stream; if there is a
        // reparse stream or any named data stream, the unnamed data
        // stream moves into an extra entry too (Windows PE expects that
        // layout), plus an entry for the reparse stream itself.
        let mut have_named_data_stream = false;
        let mut have_reparse_point_stream = false;
        for strm in inode.streams() {
            if strm.is_named_data_stream() {
                len += stream_out_total_length(strm.name());
                have_named_data_stream = true;
            } else if strm.stream_type == StreamType::ReparsePoint {
                have_reparse_point_stream = true;
            }
        }
        if have_named_data_stream || have_reparse_point_stream {
            if have_reparse_point_stream {
                len += stream_out_total_length(&Name::empty());
            }
            len += stream_out_total_length(&Name::empty());
        }
    }

    len
}

fn stream_out_total_length(name: &Name) -> u64 {
    let mut len = STREAM_ENTRY_DISK_SIZE as u64;
    if !name.is_empty() {
        len += name.nbytes() as u64 + 2;
    }
    align8(len)
}

/// Assign every directory's subdir offset ahead of emission.
///
/// `subdir_offset` enters as the first offset past the root's record and
/// terminator, and leaves advanced past the whole tree. Every directory
/// gets a nonzero offset, even an empty one whose children are just a
/// terminator; non-directories get zero.
pub fn calculate_subdir_offsets(tree: &mut Tree, root: DentryId, subdir_offset: &mut u64) {
    for id in tree.preorder(root) {
        if tree.inode_of(id).is_directory() {
            tree.dentry_mut(id).subdir_offset = *subdir_offset;
            for child in tree.child_ids(id) {
                *subdir_offset += dentry_out_total_length(tree, child);
            }
            *subdir_offset += dentry::END_OF_DIRECTORY_SIZE;
        } else {
            tree.dentry_mut(id).subdir_offset = 0;
        }
    }
}

/// Append one image's dentry tree to `out`. The tree's subdir offsets
/// are recomputed for the current `out.len()`, so the buffer must be
/// positioned where the metadata resource expects the root (byte offsets
/// inside `out` are the offsets the records refer to).
pub fn write_dentry_tree(tree: &mut Tree, root: DentryId, out: &mut Vec<u8>) {
    debug_assert!(tree.is_root(root));
    debug_assert!(tree.inode_of(root).is_directory());

    let mut subdir_offset =
        out.len() as u64 + dentry_out_total_length(tree, root) + dentry::END_OF_DIRECTORY_SIZE;
    calculate_subdir_offsets(tree, root, &mut subdir_offset);

    // The root record and its terminator come first, then each
    // directory's child run in pre-order.
    write_dentry(tree, root, out);
    out.extend_from_slice(&[0u8; 8]);

    for id in tree.preorder(root) {
        if tree.dentry(id).subdir_offset != 0 {
            debug_assert_eq!(out.len() as u64, tree.dentry(id).subdir_offset);
            for child in tree.child_ids(id) {
                write_dentry(tree, child, out);
            }
            out.extend_from_slice(&[0u8; 8]);
        }
    }
}

/// Append one dentry record and its extra stream entries.
fn write_dentry(tree: &Tree, id: DentryId, out: &mut Vec<u8>) {
    debug_assert_eq!(out.len() % 8, 0);
    let start = out.len() as u64;
    let dentry = tree.dentry(id);
    let inode = tree.inode_of(id);

    debug_assert!(tree.is_root(id) != dentry.has_long_name());

    let mut record_len = align8(dentry::dentry_min_len_with_names(
        dentry.name().nbytes() as u16,
        dentry.short_name().nbytes() as u16,
    ));
    if !inode.extra.is_empty() {
        record_len += inode.extra.len() as u64;
        record_len = align8(record_len);
    }

    let mut disk = dentry::Dentry::new_zeroed();
    disk.length = U64::new(record_len);
    disk.attributes.set(inode.attributes.bits());
    disk.security_id.set(inode.security_id as u32);
    disk.subdir_offset.set(dentry.subdir_offset);
    disk.creation_time.set(inode.creation_time.0);
    disk.last_access_time.set(inode.last_access_time.0);
    disk.last_write_time.set(inode.last_write_time.0);
    disk.rp_unknown_1.set(inode.rp_unknown_1);
    if inode.is_reparse_point() {
        disk.set_reparse(inode.reparse_tag, inode.rp_unknown_2, inode.not_rpfixed);
    } else {
        // A lone link writes group id 0, meaning "not hard linked".
        let group_id = if inode.nlink() == 1 { 0 } else { inode.ino };
        disk.set_hard_link_group_id(group_id);
    }
    disk.short_name_nbytes.set(dentry.short_name().nbytes() as u16);
    disk.file_name_nbytes.set(dentry.name().nbytes() as u16);

    // Decide how the streams are laid out before the header is emitted,
    // since the default hash and entry count live in the header.
    let mut extra_entries: Vec<(Option<&Name>, Sha1Hash)> = Vec::new();
    if inode.is_encrypted() {
        let efs_hash = inode
            .unnamed_stream(StreamType::EfsrpcRawData)
            .map_or(ZERO_HASH, |s| s.hash);
        disk.default_hash = efs_hash;
    } else {
        let mut unnamed_data_stream_hash = ZERO_HASH;
        let mut reparse_point_hash = None;
        let mut named: Vec<&crate::tree::Stream> = Vec::new();
        for strm in inode.streams() {
            match strm.stream_type {
                StreamType::Data if strm.is_named() => named.push(strm),
                StreamType::Data => unnamed_data_stream_hash = strm.hash,
                StreamType::ReparsePoint => reparse_point_hash = Some(strm.hash),
                _ => {}
            }
        }

        if reparse_point_hash.is_some() || !named.is_empty() {
            disk.default_hash = ZERO_HASH;
            if let Some(hash) = reparse_point_hash {
                extra_entries.push((None, hash));
            }
            extra_entries.push((None, unnamed_data_stream_hash));
            for strm in named {
                extra_entries.push((Some(strm.name()), strm.hash));
            }
        } else {
            disk.default_hash = unnamed_data_stream_hash;
        }
    }
    disk.num_extra_streams.set(extra_entries.len() as u16);

    out.extend_from_slice(disk.as_bytes());
    write_name(out, dentry.name());
    write_name(out, dentry.short_name());
    pad_to_8(out);
    if !inode.extra.is_empty() {
        out.extend_from_slice(&inode.extra);
        pad_to_8(out);
    }
    debug_assert_eq!(out.len() as u64 - start, record_len);

    for (name, hash) in extra_entries {
        write_extra_stream_entry(out, name, &hash);
    }
}

fn write_name(out: &mut Vec<u8>, name: &Name) {
    if name.is_empty() {
        return;
    }
    for &unit in name.units() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&[0u8; 2]);
}

fn write_extra_stream_entry(out: &mut Vec<u8>, name: Option<&Name>, hash: &Sha1Hash) {
    let unnamed = Name::empty();
    let name = name.unwrap_or(&unnamed);
    let mut entry = ExtraStreamEntry::new_zeroed();
    entry.length = U64::new(stream_out_total_length(name));
    entry.hash = *hash;
    entry.name_nbytes.set(name.nbytes() as u16);
    out.extend_from_slice(entry.as_bytes());
    write_name(out, name);
    pad_to_8(out);
}
