//! Core engine for the Windows Imaging (WIM) archive format.
//!
//! A WIM archive stores one or more independent directory trees ("images")
//! over a content-addressed, deduplicated blob store. This crate implements
//! the engine underneath such archives:
//!
//! * [`codec`]: canonical prefix-code construction and decode tables
//!   shared by the XPRESS/LZX/LZMS codecs, plus the LZMS-specific shared
//!   state (slot bases, x86 filter, LRU queues).
//! * [`tree`]: the in-memory dentry/inode tree with dual case-sensitive
//!   and case-insensitive per-directory indexes and path lookup.
//! * [`metadata`]: decoding and encoding of the dentry stream stored in
//!   an image's metadata resource.
//! * [`windows_info`]: derivation of Windows-specific XML properties from
//!   an image's contents.
//!
//! The WIM file header, blob lookup table, XML serialization, and the
//! entropy coders themselves are external collaborators reached through
//! the traits in [`metadata`], [`windows_info`] and [`codec`].

use slog::Drain;

pub mod codec;
pub mod codec_threads;
pub mod config;
pub mod metadata;
pub mod tree;
pub mod windows_info;

pub(crate) mod errors;
mod pool;

pub use crate::config::{global_init, CaseSensitivity, InitOptions};
pub use crate::errors::{CodeError, Error, LookupError, Result};
pub use repr::{FileAttributes, Sha1Hash, Time};

/// Identifies one image inside an archive. Image numbering is defined by
/// the archive container; the engine treats the value as opaque.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageId(pub u32);

pub(crate) fn default_logger() -> slog::Logger {
    slog::Logger::root(slog_stdlog::StdLog.fuse(), slog::o!())
}
