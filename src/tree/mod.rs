//! The in-memory tree of dentries and inodes for one image.
//!
//! A dentry is a named link to an inode; an inode may be referenced by
//! several dentries (hard links). Directory hard links are not allowed,
//! so the dentries always form a tree. Every directory indexes its
//! children twice: case-sensitively (every child appears) and
//! case-insensitively (one representative per equivalence class, the
//! other members threaded off the representative's conflict list).
//!
//! The tree owns all dentries and inodes in arenas addressed by
//! [`DentryId`] and [`InodeId`]; parent links are ids rather than
//! pointers, and the root's parent is itself.

use std::collections::btree_map::Entry;
use std::mem;

use slog::{warn, Logger};

use repr::FileAttributes;

use crate::config::{will_ignore_case, CaseSensitivity};
use crate::errors::LookupError;

pub mod inode;
pub mod name;

pub use inode::{Inode, Stream, StreamType};
pub use name::{Name, PATH_SEPARATOR};

/// Handle to a dentry owned by a [`Tree`]. Stale handles (freed dentries)
/// must not be used; doing so panics.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DentryId(u32);

/// Handle to an inode owned by a [`Tree`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InodeId(u32);

/// A named link to an inode.
#[derive(Debug)]
pub struct Dentry {
    pub(crate) name: Name,
    pub(crate) short_name: Name,
    pub(crate) parent: DentryId,
    pub(crate) inode: InodeId,
    /// Offset of this directory's children in the uncompressed metadata
    /// resource. Read from disk by the parser; recomputed before
    /// emission.
    pub subdir_offset: u64,
    /// Whether this dentry is its CI-equivalence class's representative
    /// in the case-insensitive index.
    in_ci_index: bool,
    /// Other members of this dentry's CI-equivalence class, maintained on
    /// the representative only.
    ci_conflicts: Vec<DentryId>,
}

impl Dentry {
    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn short_name(&self) -> &Name {
        &self.short_name
    }

    pub fn parent(&self) -> DentryId {
        self.parent
    }

    pub fn inode_id(&self) -> InodeId {
        self.inode
    }

    pub fn has_long_name(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn has_short_name(&self) -> bool {
        !self.short_name.is_empty()
    }

    /// Number of other dentries sharing this dentry's case-insensitive
    /// name, when this dentry is the class representative.
    pub fn ci_conflict_count(&self) -> usize {
        self.ci_conflicts.len()
    }
}

/// One image's dentry tree.
#[derive(Debug)]
pub struct Tree {
    dentries: Vec<Option<Dentry>>,
    free_dentries: Vec<u32>,
    inodes: Vec<Option<Inode>>,
    free_inodes: Vec<u32>,
    root: Option<DentryId>,
    pub(crate) logger: Logger,
}

impl Tree {
    pub fn new() -> Self {
        Self::with_logger(crate::default_logger())
    }

    pub fn with_logger(logger: Logger) -> Self {
        Tree {
            dentries: Vec::new(),
            free_dentries: Vec::new(),
            inodes: Vec::new(),
            free_inodes: Vec::new(),
            root: None,
            logger,
        }
    }

    pub fn root(&self) -> Option<DentryId> {
        self.root
    }

    pub fn set_root(&mut self, root: Option<DentryId>) {
        if let Some(id) = root {
            debug_assert_eq!(self.dentry(id).parent, id);
        }
        self.root = root;
    }

    pub fn dentry(&self, id: DentryId) -> &Dentry {
        self.dentries[id.0 as usize].as_ref().expect("stale dentry id")
    }

    pub fn dentry_mut(&mut self, id: DentryId) -> &mut Dentry {
        self.dentries[id.0 as usize].as_mut().expect("stale dentry id")
    }

    pub fn inode(&self, id: InodeId) -> &Inode {
        self.inodes[id.0 as usize].as_ref().expect("stale inode id")
    }

    pub fn inode_mut(&mut self, id: InodeId) -> &mut Inode {
        self.inodes[id.0 as usize].as_mut().expect("stale inode id")
    }

    pub fn inode_of(&self, id: DentryId) -> &Inode {
        self.inode(self.dentry(id).inode)
    }

    pub fn inode_of_mut(&mut self, id: DentryId) -> &mut Inode {
        let inode = self.dentry(id).inode;
        self.inode_mut(inode)
    }

    /// Number of live dentries.
    pub fn dentry_count(&self) -> usize {
        self.dentries.len() - self.free_dentries.len()
    }

    /// Number of live inodes.
    pub fn inode_count(&self) -> usize {
        self.inodes.len() - self.free_inodes.len()
    }

    pub fn is_root(&self, id: DentryId) -> bool {
        self.dentry(id).parent == id
    }

    fn alloc_dentry(&mut self, dentry: Dentry) -> DentryId {
        match self.free_dentries.pop() {
            Some(slot) => {
                self.dentries[slot as usize] = Some(dentry);
                DentryId(slot)
            }
            None => {
                self.dentries.push(Some(dentry));
                DentryId((self.dentries.len() - 1) as u32)
            }
        }
    }

    fn alloc_inode(&mut self, inode: Inode) -> InodeId {
        match self.free_inodes.pop() {
            Some(slot) => {
                self.inodes[slot as usize] = Some(inode);
                InodeId(slot)
            }
            None => {
                self.inodes.push(Some(inode));
                InodeId((self.inodes.len() - 1) as u32)
            }
        }
    }

    /// Create an unlinked dentry with a fresh inode. With
    /// `set_timestamps`, the inode's times are set to the current time;
    /// otherwise they are zero.
    pub fn new_dentry_with_new_inode(&mut self, name: Option<&str>, set_timestamps: bool) -> DentryId {
        let name = name.map_or_else(Name::empty, Name::new);
        self.new_dentry_utf16(name, set_timestamps)
    }

    pub(crate) fn new_dentry_utf16(&mut self, name: Name, set_timestamps: bool) -> DentryId {
        let inode = self.alloc_inode(Inode::new(set_timestamps));
        let id = self.alloc_dentry(Dentry {
            name,
            short_name: Name::empty(),
            parent: DentryId(0),
            inode,
            subdir_offset: 0,
            in_ci_index: false,
            ci_conflicts: Vec::new(),
        });
        self.dentry_mut(id).parent = id;
        id
    }

    /// Create an unlinked dentry referring to an existing inode, i.e. a
    /// hard link. The inode must not be a directory.
    pub fn new_dentry_with_existing_inode(&mut self, name: &str, inode: InodeId) -> DentryId {
        debug_assert!(!self.inode(inode).is_directory());
        self.inode_mut(inode).nlink += 1;
        let id = self.alloc_dentry(Dentry {
            name: Name::new(name),
            short_name: Name::empty(),
            parent: DentryId(0),
            inode,
            subdir_offset: 0,
            in_ci_index: false,
            ci_conflicts: Vec::new(),
        });
        self.dentry_mut(id).parent = id;
        id
    }

    /// Create an unnamed directory with default metadata, for use as a
    /// synthesized root.
    pub fn new_filler_directory(&mut self) -> DentryId {
        let id = self.new_dentry_with_new_inode(None, true);
        self.inode_of_mut(id).attributes = FileAttributes::DIRECTORY;
        id
    }

    /// Replace a dentry's long name. Any short name is dropped, since it
    /// may no longer correspond. Only valid on unlinked dentries; linked
    /// dentries must be unlinked first so the indexes stay consistent.
    pub fn set_name(&mut self, id: DentryId, name: Option<&str>) {
        debug_assert!(self.is_root(id));
        let dentry = self.dentry_mut(id);
        dentry.name = name.map_or_else(Name::empty, Name::new);
        dentry.short_name = Name::empty();
    }

    pub(crate) fn set_short_name_utf16(&mut self, id: DentryId, short_name: Name) {
        self.dentry_mut(id).short_name = short_name;
    }

    /// Link an unlinked dentry into a directory. Fails with the existing
    /// child when the directory already has a child with the same
    /// case-sensitive name. A case-insensitive collision is not an
    /// error: the new child joins the representative's conflict list and
    /// stays out of the CI index.
    pub fn link_child(&mut self, parent: DentryId, child: DentryId) -> Result<(), DentryId> {
        debug_assert_ne!(parent, child);
        let dir = self.dentry(parent).inode;
        debug_assert!(self.inode(dir).is_directory());

        let child_name = self.dentry(child).name.clone();
        match self.inode_mut(dir).children.entry(child_name.units().to_vec()) {
            Entry::Occupied(existing) => return Err(*existing.get()),
            Entry::Vacant(slot) => {
                slot.insert(child);
            }
        }

        let representative = match self.inode_mut(dir).children_ci.entry(child_name.upcased()) {
            Entry::Occupied(existing) => Some(*existing.get()),
            Entry::Vacant(slot) => {
                slot.insert(child);
                None
            }
        };
        match representative {
            Some(rep) => {
                self.dentry_mut(rep).ci_conflicts.push(child);
                self.dentry_mut(child).in_ci_index = false;
            }
            None => self.dentry_mut(child).in_ci_index = true,
        }

        self.dentry_mut(child).parent = parent;
        Ok(())
    }

    /// Unlink a dentry from the tree. Its name is retained and its parent
    /// reverts to itself. If it was its CI class's representative,
    /// another class member is promoted into the CI index.
    pub fn unlink(&mut self, id: DentryId) {
        let parent = self.dentry(id).parent;
        if parent == id {
            return;
        }
        let dir = self.dentry(parent).inode;
        let name = self.dentry(id).name.clone();
        let ci_key = name.upcased();

        let removed = self.inode_mut(dir).children.remove(name.units());
        debug_assert_eq!(removed, Some(id));

        if self.dentry(id).in_ci_index {
            self.inode_mut(dir).children_ci.remove(&ci_key);

            let mut conflicts = mem::take(&mut self.dentry_mut(id).ci_conflicts);
            if !conflicts.is_empty() {
                let promoted = conflicts.remove(0);
                let promoted_key = self.dentry(promoted).name.upcased();
                {
                    let dentry = self.dentry_mut(promoted);
                    dentry.ci_conflicts = conflicts;
                    dentry.in_ci_index = true;
                }
                let previous = self.inode_mut(dir).children_ci.insert(promoted_key, promoted);
                debug_assert!(previous.is_none());
            }
        } else if let Some(&rep) = self.inode(dir).children_ci.get(&ci_key) {
            let conflicts = &mut self.dentry_mut(rep).ci_conflicts;
            if let Some(pos) = conflicts.iter().position(|&d| d == id) {
                conflicts.remove(pos);
            }
        }

        let dentry = self.dentry_mut(id);
        dentry.in_ci_index = false;
        dentry.parent = id;
    }

    /// Look up a child of a directory by UTF-16 name.
    ///
    /// A case-insensitive lookup that matches several children prefers
    /// the case-sensitively equal one; failing that, the class
    /// representative is returned with a warning. Which of the
    /// candidates is representative depends on insertion order.
    pub fn lookup_child_utf16(
        &self,
        dir: DentryId,
        name: &[u16],
        case: CaseSensitivity,
    ) -> Option<DentryId> {
        let dir_inode = self.inode_of(dir);

        if !will_ignore_case(case) {
            return dir_inode.children.get(name).copied();
        }

        let rep = *dir_inode.children_ci.get(&name::upcase_units(name))?;
        let rep_dentry = self.dentry(rep);
        if rep_dentry.ci_conflicts.is_empty() {
            return Some(rep);
        }

        if rep_dentry.name.units() == name {
            return Some(rep);
        }
        for &alt in &rep_dentry.ci_conflicts {
            if self.dentry(alt).name.units() == name {
                return Some(alt);
            }
        }

        warn!(self.logger, "Result of case-insensitive lookup is ambiguous";
            "chosen" => self.full_path(rep),
            "candidates" => rep_dentry.ci_conflicts.len() + 1);
        Some(rep)
    }

    pub fn lookup_child(&self, dir: DentryId, name: &str, case: CaseSensitivity) -> Option<DentryId> {
        let units: Vec<u16> = name.encode_utf16().collect();
        self.lookup_child_utf16(dir, &units, case)
    }

    /// Translate a path to a dentry. Separators are `/`; leading
    /// separators are ignored, so the empty path names the root. One or
    /// more trailing separators require the result to be a directory.
    /// Reparse points are not treated as directories and symbolic links
    /// are not dereferenced.
    pub fn get_dentry(&self, path: &str, case: CaseSensitivity) -> Result<DentryId, LookupError> {
        let units: Vec<u16> = path.encode_utf16().collect();
        self.get_dentry_utf16(&units, case)
    }

    pub fn get_dentry_utf16(&self, path: &[u16], case: CaseSensitivity) -> Result<DentryId, LookupError> {
        let mut cur = self.root.ok_or(LookupError::NotFound)?;
        let mut rest = path;
        loop {
            if !rest.is_empty() && !self.inode_of(cur).is_directory() {
                return Err(LookupError::NotADirectory);
            }
            while rest.first() == Some(&PATH_SEPARATOR) {
                rest = &rest[1..];
            }
            if rest.is_empty() {
                return Ok(cur);
            }
            let end = rest
                .iter()
                .position(|&u| u == PATH_SEPARATOR)
                .unwrap_or(rest.len());
            cur = self
                .lookup_child_utf16(cur, &rest[..end], case)
                .ok_or(LookupError::NotFound)?;
            rest = &rest[end..];
        }
    }

    /// Like [`get_dentry`](Self::get_dentry) with the last path component
    /// stripped. The result is not necessarily a directory.
    pub fn get_parent_dentry(&self, path: &str, case: CaseSensitivity) -> Result<DentryId, LookupError> {
        let trimmed = path.trim_end_matches('/');
        let parent = match trimmed.rfind('/') {
            Some(idx) => trimmed[..idx].trim_end_matches('/'),
            None => "",
        };
        self.get_dentry(parent, case)
    }

    /// The dentry's full path from the image root, with `/` separators.
    /// The root's path is `/`.
    pub fn full_path(&self, id: DentryId) -> String {
        let mut path = String::new();
        let mut d = id;
        loop {
            let dentry = self.dentry(d);
            path.insert_str(0, &format!("/{}", dentry.name));
            let parent = dentry.parent;
            if parent == d || self.dentry(parent).parent == parent {
                break;
            }
            d = parent;
        }
        path
    }

    /// This directory's children, in case-sensitive name order.
    pub fn child_ids(&self, id: DentryId) -> Vec<DentryId> {
        self.inode_of(id).children.values().copied().collect()
    }

    /// All dentries of the subtree, parents before children, siblings in
    /// case-sensitive order. Equivalently: case-sensitive lexicographic
    /// order of full paths.
    pub fn preorder(&self, root: DentryId) -> Vec<DentryId> {
        let mut order = Vec::new();
        self.preorder_into(root, &mut order);
        order
    }

    fn preorder_into(&self, id: DentryId, order: &mut Vec<DentryId>) {
        order.push(id);
        for child in self.child_ids(id) {
            self.preorder_into(child, order);
        }
    }

    /// All dentries of the subtree, children before parents. Safe order
    /// for freeing.
    pub fn postorder(&self, root: DentryId) -> Vec<DentryId> {
        let mut order = Vec::new();
        self.postorder_into(root, &mut order);
        order
    }

    fn postorder_into(&self, id: DentryId, order: &mut Vec<DentryId>) {
        for child in self.child_ids(id) {
            self.postorder_into(child, order);
        }
        order.push(id);
    }

    /// Free one dentry, dropping its inode reference; the inode is freed
    /// with its last dentry. The dentry must be unlinked, or part of a
    /// subtree being freed wholesale.
    pub fn free_dentry(&mut self, id: DentryId) {
        let inode_id = self.dentry(id).inode;
        self.dentries[id.0 as usize] = None;
        self.free_dentries.push(id.0);

        let inode = self.inode_mut(inode_id);
        inode.nlink -= 1;
        if inode.nlink == 0 {
            self.inodes[inode_id.0 as usize] = None;
            self.free_inodes.push(inode_id.0);
        }
    }

    /// Free an entire subtree. Does not unlink `root` from its parent;
    /// callers unlink first when the subtree is attached.
    pub fn free_dentry_tree(&mut self, root: Option<DentryId>) {
        let root = match root {
            Some(root) => root,
            None => return,
        };
        for id in self.postorder(root) {
            self.free_dentry(id);
        }
        if self.root == Some(root) {
            self.root = None;
        }
    }

    /// Unlink a subtree and free all of it.
    pub fn delete_tree(&mut self, id: DentryId) {
        self.unlink(id);
        if self.root == Some(id) {
            self.root = None;
        }
        self.free_dentry_tree(Some(id));
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}
