//! Windows-specific image properties derived from an image's contents.
//!
//! Windows stores the interesting facts (architecture, version, edition,
//! languages) in well-known files under the system root, so this is
//! heuristics end to end: find the most plausible system root, then pull
//! whatever can be pulled from `kernel32.dll` and the SOFTWARE and SYSTEM
//! registry hives. Anything missing or malformed is skipped with a
//! warning; the only fatal failure is the property sink reporting
//! out-of-memory.

use std::io;

use slog::{warn, Logger};

use repr::Sha1Hash;

use crate::config::CaseSensitivity;
use crate::errors::{Error, Result};
use crate::metadata::CancelCheck;
use crate::tree::name::upcase_units;
use crate::tree::{DentryId, Name, Tree};
use crate::ImageId;

mod languages;

use languages::language_id_to_name;

/// Failure of a registry-hive query. Only `OutOfMemory` propagates out
/// of the harvester; everything else is a warning.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HiveError {
    OutOfMemory,
    NotFound,
    Invalid,
    Unsupported,
}

pub type HiveResult<T> = Result<T, HiveError>;

/// Query surface of the external registry-hive parser.
pub trait HiveReader {
    fn validate(&self, hive: &[u8]) -> HiveResult<()>;
    fn get_string(&self, hive: &[u8], key: &str, value: &str) -> HiveResult<String>;
    fn get_number(&self, hive: &[u8], key: &str, value: &str) -> HiveResult<i64>;
    fn list_subkeys(&self, hive: &[u8], key: &str) -> HiveResult<Vec<String>>;
}

/// Read access to the archive's content-addressed blob store.
pub trait BlobProvider {
    fn blob_size(&self, hash: &Sha1Hash) -> Option<u64>;
    fn read_blob(&self, hash: &Sha1Hash) -> io::Result<Vec<u8>>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PropertyError {
    OutOfMemory,
}

/// Setter for properties in the archive's XML document. Property paths
/// nest with `/` and order siblings with `NAME[k]`.
pub trait PropertySink {
    fn set(&mut self, image: ImageId, path: &str, value: &str) -> Result<(), PropertyError>;
}

/* PE binary processor architecture codes (common ones only) */
const IMAGE_FILE_MACHINE_I386: u16 = 0x014c;
const IMAGE_FILE_MACHINE_ARM: u16 = 0x01c0;
const IMAGE_FILE_MACHINE_THUMB: u16 = 0x01c2;
const IMAGE_FILE_MACHINE_ARMV7: u16 = 0x01c4;
const IMAGE_FILE_MACHINE_IA64: u16 = 0x0200;
const IMAGE_FILE_MACHINE_AMD64: u16 = 0x8664;
const IMAGE_FILE_MACHINE_ARM64: u16 = 0xaa64;

/* Windows API processor architecture codes (common ones only) */
const PROCESSOR_ARCHITECTURE_INTEL: i64 = 0;
const PROCESSOR_ARCHITECTURE_ARM: i64 = 5;
const PROCESSOR_ARCHITECTURE_IA64: i64 = 6;
const PROCESSOR_ARCHITECTURE_AMD64: i64 = 9;
const PROCESSOR_ARCHITECTURE_ARM64: i64 = 12;

/// Translate a processor architecture code as given in a PE binary to
/// the code used by the Windows API.
fn pe_arch_to_windows_arch(pe_arch: u16) -> Option<i64> {
    match pe_arch {
        IMAGE_FILE_MACHINE_I386 => Some(PROCESSOR_ARCHITECTURE_INTEL),
        IMAGE_FILE_MACHINE_ARM | IMAGE_FILE_MACHINE_ARMV7 | IMAGE_FILE_MACHINE_THUMB => {
            Some(PROCESSOR_ARCHITECTURE_ARM)
        }
        IMAGE_FILE_MACHINE_IA64 => Some(PROCESSOR_ARCHITECTURE_IA64),
        IMAGE_FILE_MACHINE_AMD64 => Some(PROCESSOR_ARCHITECTURE_AMD64),
        IMAGE_FILE_MACHINE_ARM64 => Some(PROCESSOR_ARCHITECTURE_ARM64),
        _ => None,
    }
}

/// Set Windows-specific properties for one image.
///
/// The system root is usually the toplevel directory `Windows`, but not
/// always; every toplevel directory is scored by how many of
/// `System32/kernel32.dll`, `System32/config/SOFTWARE` and
/// `System32/config/SYSTEM` it contains (compared case-insensitively),
/// and the best scorer wins, with ties going to a directory actually
/// named `Windows`. A best score of zero leaves the XML document
/// untouched.
pub fn set_windows_specific_info(
    tree: &Tree,
    image: ImageId,
    blobs: &dyn BlobProvider,
    hives: &dyn HiveReader,
    props: &mut dyn PropertySink,
    logger: &Logger,
    cancel: Option<CancelCheck<'_>>,
) -> Result<()> {
    let root = match tree.root() {
        Some(root) => root,
        None => return Ok(()),
    };

    let ci = CaseSensitivity::Insensitive;
    let mut best: Option<SystemRoot> = None;
    let mut best_score = 0;

    for candidate in tree.child_ids(root) {
        if !tree.inode_of(candidate).is_directory() {
            continue;
        }
        let system32 = match tree.lookup_child(candidate, "System32", ci) {
            Some(d) => d,
            None => continue,
        };
        let kernel32 = tree.lookup_child(system32, "kernel32.dll", ci);
        let config = tree.lookup_child(system32, "config", ci);
        let software = config.and_then(|c| tree.lookup_child(c, "SOFTWARE", ci));
        let system = config.and_then(|c| tree.lookup_child(c, "SYSTEM", ci));

        let score = kernel32.is_some() as u32 + software.is_some() as u32 + system.is_some() as u32;
        if score >= best_score && (score > best_score || is_default_systemroot(tree, candidate)) {
            best_score = score;
            best = Some(SystemRoot {
                dentry: candidate,
                kernel32,
                software,
                system,
            });
        }
    }

    let best = match best {
        Some(best) if best_score > 0 => best,
        _ => return Ok(()),
    };

    let mut ctx = Ctx {
        tree,
        image,
        blobs,
        hives,
        props,
        logger,
        oom_encountered: false,
    };
    ctx.harvest(&best, cancel)
}

struct SystemRoot {
    dentry: DentryId,
    kernel32: Option<DentryId>,
    software: Option<DentryId>,
    system: Option<DentryId>,
}

fn is_default_systemroot(tree: &Tree, candidate: DentryId) -> bool {
    tree.dentry(candidate)
        .name()
        .eq_ignore_case(Name::new("Windows").units())
}

struct Ctx<'a> {
    tree: &'a Tree,
    image: ImageId,
    blobs: &'a dyn BlobProvider,
    hives: &'a dyn HiveReader,
    props: &'a mut dyn PropertySink,
    logger: &'a Logger,
    oom_encountered: bool,
}

impl Ctx<'_> {
    fn harvest(&mut self, root: &SystemRoot, cancel: Option<CancelCheck<'_>>) -> Result<()> {
        self.set_systemroot_property(root.dentry);

        check_cancel(cancel)?;
        if let Some(contents) = self.load_file_contents(root.kernel32, "kernel32.dll") {
            self.set_info_from_kernel32(&contents);
        }

        check_cancel(cancel)?;
        if let Some(hive) = self.load_hive(root.software, "SOFTWARE") {
            self.set_info_from_software_hive(&hive);
        }

        check_cancel(cancel)?;
        if let Some(hive) = self.load_hive(root.system, "SYSTEM") {
            self.set_info_from_system_hive(&hive);
        }

        if self.oom_encountered {
            return Err(Error::property_out_of_memory());
        }
        Ok(())
    }

    fn set_string_property(&mut self, path: &str, value: &str) {
        match self.props.set(self.image, path, value) {
            Ok(()) => {}
            Err(e) => {
                self.oom_encountered |= e == PropertyError::OutOfMemory;
                warn!(
                    self.logger,
                    "Failed to set image property {:?} to value {:?}", path, value
                );
            }
        }
    }

    fn set_number_property(&mut self, path: &str, value: i64) {
        self.set_string_property(path, &value.to_string());
    }

    /// Collapse a hive query result, recording out-of-memory and logging
    /// everything else.
    fn check_hive_result<T>(&mut self, result: HiveResult<T>, key: &str, value: &str) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.oom_encountered |= e == HiveError::OutOfMemory;
                warn!(self.logger, "Registry query failed";
                    "status" => ?e, "key" => key, "value" => value);
                None
            }
        }
    }

    fn get_string(&mut self, hive: &[u8], key: &str, value: &str) -> Option<String> {
        let result = self.hives.get_string(hive, key, value);
        self.check_hive_result(result, key, value)
    }

    fn get_number(&mut self, hive: &[u8], key: &str, value: &str) -> Option<i64> {
        let result = self.hives.get_number(hive, key, value);
        self.check_hive_result(result, key, value)
    }

    fn list_subkeys(&mut self, hive: &[u8], key: &str) -> Option<Vec<String>> {
        let result = self.hives.list_subkeys(hive, key);
        self.check_hive_result(result, key, "")
    }

    /// Copy a string value from a registry hive to the XML document.
    fn copy_registry_string(&mut self, hive: &[u8], key: &str, value: &str, property: &str) {
        if let Some(string) = self.get_string(hive, key, value) {
            self.set_string_property(property, &string);
        }
    }

    fn set_systemroot_property(&mut self, systemroot: DentryId) {
        let upper = upcase_units(self.tree.dentry(systemroot).name().units());
        match Name::from_units(&upper).to_utf8() {
            Ok(name) => self.set_string_property("WINDOWS/SYSTEMROOT", &name),
            Err(e) => warn!(self.logger, "Failed to get systemroot name: {}", e),
        }
    }

    /// Load the contents of a file in the image into memory via the
    /// unnamed data stream's blob.
    fn load_file_contents(&mut self, dentry: Option<DentryId>, filename: &str) -> Option<Vec<u8>> {
        let dentry = match dentry {
            Some(d) => d,
            None => {
                warn!(self.logger, "{} does not exist", filename);
                return None;
            }
        };

        let hash = self.tree.inode_of(dentry).unnamed_data_stream_hash();
        if repr::is_zero_hash(&hash) || self.blobs.blob_size(&hash).is_none() {
            warn!(self.logger, "{} has no contents", filename);
            return None;
        }

        match self.blobs.read_blob(&hash) {
            Ok(contents) => Some(contents),
            Err(e) => {
                warn!(self.logger, "Error loading {}: {}", filename, e);
                None
            }
        }
    }

    /// Load a registry hive file and validate it before use.
    fn load_hive(&mut self, dentry: Option<DentryId>, filename: &str) -> Option<Vec<u8>> {
        let hive = self.load_file_contents(dentry, filename)?;
        let valid = self.hives.validate(&hive);
        if self.check_hive_result(valid, "", "").is_none() {
            warn!(self.logger, "{} is not a valid registry hive!", filename);
            return None;
        }
        Some(hive)
    }

    /// Gather information from kernel32.dll's PE header.
    fn set_info_from_kernel32(&mut self, contents: &[u8]) {
        let size = contents.len();
        let invalid = |ctx: &Ctx<'_>| {
            warn!(ctx.logger, "kernel32.dll is not a valid PE binary");
        };

        if size < 0x40 {
            return invalid(self);
        }
        let e_lfanew = u32::from_le_bytes([
            contents[0x3c],
            contents[0x3d],
            contents[0x3e],
            contents[0x3f],
        ]) as usize;
        if e_lfanew > size || size - e_lfanew < 6 || e_lfanew & 3 != 0 {
            return invalid(self);
        }
        let pe_hdr = &contents[e_lfanew..];
        if &pe_hdr[..4] != b"PE\0\0" {
            return invalid(self);
        }

        let pe_arch = u16::from_le_bytes([pe_hdr[4], pe_hdr[5]]);
        match pe_arch_to_windows_arch(pe_arch) {
            Some(arch) => self.set_number_property("WINDOWS/ARCH", arch),
            None => warn!(
                self.logger,
                "Architecture value {:#x} from kernel32.dll header not recognized", pe_arch
            ),
        }
    }

    /// Gather information from the SOFTWARE registry hive.
    fn set_info_from_software_hive(&mut self, hive: &[u8]) {
        let version_key = "Microsoft\\Windows NT\\CurrentVersion";

        self.copy_registry_string(hive, version_key, "EditionID", "FLAGS");
        self.copy_registry_string(hive, version_key, "ProductName", "DISPLAYNAME");
        self.copy_registry_string(hive, version_key, "ProductName", "DISPLAYDESCRIPTION");
        self.copy_registry_string(hive, version_key, "EditionID", "WINDOWS/EDITIONID");
        self.copy_registry_string(hive, version_key, "InstallationType", "WINDOWS/INSTALLATIONTYPE");
        self.copy_registry_string(hive, version_key, "ProductName", "WINDOWS/PRODUCTNAME");

        // Windows 10 froze CurrentVersion at 6.3; the real numbers moved
        // to CurrentMajorVersionNumber/CurrentMinorVersionNumber.
        let mut major_version = self
            .get_number(hive, version_key, "CurrentMajorVersionNumber")
            .unwrap_or(-1);
        let mut minor_version = self
            .get_number(hive, version_key, "CurrentMinorVersionNumber")
            .unwrap_or(-1);

        if major_version < 0 || minor_version < 0 {
            if let Some(version_string) = self.get_string(hive, version_key, "CurrentVersion") {
                match parse_major_minor(&version_string) {
                    Some((major, minor)) => {
                        major_version = major;
                        minor_version = minor;
                    }
                    None => warn!(
                        self.logger,
                        "Unrecognized CurrentVersion: {}", version_string
                    ),
                }
            }
        }

        if major_version >= 0 {
            self.set_number_property("WINDOWS/VERSION/MAJOR", major_version);
            if minor_version >= 0 {
                self.set_number_property("WINDOWS/VERSION/MINOR", minor_version);
            }
        }

        // "CurrentBuild" is obsolete junk in XP-era registries (where
        // "CurrentBuildNumber" is right), yet on later versions it is
        // "CurrentBuild" that holds the correct value. A '.' in the
        // value betrays the junk form.
        if let Some(build_string) = self.get_string(hive, version_key, "CurrentBuild") {
            let build_string = if build_string.contains('.') {
                self.get_string(hive, version_key, "CurrentBuildNumber")
            } else {
                Some(build_string)
            };
            if let Some(build_string) = build_string {
                self.set_string_property("WINDOWS/VERSION/BUILD", &build_string);
            }
        }
    }

    /// Gather information from the SYSTEM registry hive.
    fn set_info_from_system_hive(&mut self, hive: &[u8]) {
        let windows_key = "ControlSet001\\Control\\Windows";
        let uilanguages_key = "ControlSet001\\Control\\MUI\\UILanguages";
        let productoptions_key = "ControlSet001\\Control\\ProductOptions";

        if let Some(spbuild) = self.get_number(hive, windows_key, "CSDBuildNumber") {
            self.set_number_property("WINDOWS/VERSION/SPBUILD", spbuild);
        }

        if let Some(splevel) = self.get_number(hive, windows_key, "CSDVersion") {
            self.set_number_property("WINDOWS/VERSION/SPLEVEL", splevel >> 8);
        }

        self.copy_registry_string(hive, productoptions_key, "ProductType", "WINDOWS/PRODUCTTYPE");
        self.copy_registry_string(hive, productoptions_key, "ProductSuite", "WINDOWS/PRODUCTSUITE");

        self.copy_registry_string(
            hive,
            "ControlSet001\\Control\\Class\\{4D36E966-E325-11CE-BFC1-08002BE10318}\\0000",
            "MatchingDeviceId",
            "WINDOWS/HAL",
        );

        if let Some(subkeys) = self.list_subkeys(hive, uilanguages_key) {
            for (i, subkey) in subkeys.iter().enumerate() {
                let property = format!("WINDOWS/LANGUAGES/LANGUAGE[{}]", i + 1);
                self.set_string_property(&property, subkey);
            }
        }

        self.set_default_language(hive);
    }

    /// Gather the default language from the SYSTEM registry hive.
    fn set_default_language(&mut self, hive: &[u8]) {
        let string = match self.get_string(
            hive,
            "ControlSet001\\Control\\Nls\\Language",
            "InstallLanguage",
        ) {
            Some(s) => s,
            None => return,
        };

        if let Ok(language_id) = u16::from_str_radix(string.trim(), 16) {
            if let Some(language_name) = language_id_to_name(language_id) {
                self.set_string_property("WINDOWS/LANGUAGES/DEFAULT", language_name);
                return;
            }
        }
        warn!(self.logger, "Unrecognized InstallLanguage: {}", string);
    }
}

fn check_cancel(cancel: Option<CancelCheck<'_>>) -> Result<()> {
    match cancel {
        Some(cancel) if cancel() => Err(Error::interrupted()),
        _ => Ok(()),
    }
}

fn parse_major_minor(version: &str) -> Option<(i64, i64)> {
    let mut parts = version.splitn(2, '.');
    let major = parts.next()?.trim().parse().ok()?;
    let minor = parts.next()?.trim().parse().ok()?;
    Some((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Name, StreamType};
    use crate::FileAttributes;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MockBlobs {
        blobs: HashMap<Sha1Hash, Vec<u8>>,
    }

    impl BlobProvider for MockBlobs {
        fn blob_size(&self, hash: &Sha1Hash) -> Option<u64> {
            self.blobs.get(hash).map(|b| b.len() as u64)
        }

        fn read_blob(&self, hash: &Sha1Hash) -> io::Result<Vec<u8>> {
            self.blobs
                .get(hash)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such blob"))
        }
    }

    #[derive(Default)]
    struct MockHives {
        strings: HashMap<(String, String), String>,
        numbers: HashMap<(String, String), i64>,
        subkeys: HashMap<String, Vec<String>>,
    }

    impl MockHives {
        fn string(&mut self, key: &str, value: &str, data: &str) {
            self.strings
                .insert((key.to_owned(), value.to_owned()), data.to_owned());
        }

        fn number(&mut self, key: &str, value: &str, data: i64) {
            self.numbers.insert((key.to_owned(), value.to_owned()), data);
        }
    }

    impl HiveReader for MockHives {
        fn validate(&self, hive: &[u8]) -> HiveResult<()> {
            if hive.starts_with(b"regf") {
                Ok(())
            } else {
                Err(HiveError::Invalid)
            }
        }

        fn get_string(&self, _hive: &[u8], key: &str, value: &str) -> HiveResult<String> {
            self.strings
                .get(&(key.to_owned(), value.to_owned()))
                .cloned()
                .ok_or(HiveError::NotFound)
        }

        fn get_number(&self, _hive: &[u8], key: &str, value: &str) -> HiveResult<i64> {
            self.numbers
                .get(&(key.to_owned(), value.to_owned()))
                .copied()
                .ok_or(HiveError::NotFound)
        }

        fn list_subkeys(&self, _hive: &[u8], key: &str) -> HiveResult<Vec<String>> {
            self.subkeys.get(key).cloned().ok_or(HiveError::NotFound)
        }
    }

    #[derive(Default)]
    struct MockProps {
        set: HashMap<String, String>,
    }

    impl PropertySink for MockProps {
        fn set(&mut self, _image: ImageId, path: &str, value: &str) -> Result<(), PropertyError> {
            self.set.insert(path.to_owned(), value.to_owned());
            Ok(())
        }
    }

    fn add_dir(tree: &mut Tree, parent: DentryId, name: &str) -> DentryId {
        let id = tree.new_dentry_with_new_inode(Some(name), false);
        tree.inode_of_mut(id).attributes = FileAttributes::DIRECTORY;
        tree.link_child(parent, id).unwrap();
        id
    }

    fn add_file_with_blob(
        tree: &mut Tree,
        blobs: &mut MockBlobs,
        parent: DentryId,
        name: &str,
        contents: &[u8],
        hash_byte: u8,
    ) -> DentryId {
        let hash = [hash_byte; 20];
        blobs.blobs.insert(hash, contents.to_vec());
        let id = tree.new_dentry_with_new_inode(Some(name), false);
        let inode = tree.inode_of_mut(id);
        inode.attributes = FileAttributes::NORMAL;
        inode.add_stream(StreamType::Data, Name::empty(), hash);
        tree.link_child(parent, id).unwrap();
        id
    }

    fn minimal_pe(machine: u16) -> Vec<u8> {
        let mut pe = vec![0u8; 0x48];
        pe[0x3c..0x40].copy_from_slice(&0x40u32.to_le_bytes());
        pe[0x40..0x44].copy_from_slice(b"PE\0\0");
        pe[0x44..0x46].copy_from_slice(&machine.to_le_bytes());
        pe
    }

    fn harvest(tree: &Tree, blobs: &MockBlobs, hives: &MockHives) -> MockProps {
        let mut props = MockProps::default();
        set_windows_specific_info(
            tree,
            ImageId(1),
            blobs,
            hives,
            &mut props,
            &crate::default_logger(),
            None,
        )
        .unwrap();
        props
    }

    #[test]
    fn systemroot_and_arch_from_pe_header() {
        let mut tree = Tree::new();
        let root = tree.new_filler_directory();
        tree.set_root(Some(root));
        let mut blobs = MockBlobs::default();

        let windows = add_dir(&mut tree, root, "WINDOWS");
        let system32 = add_dir(&mut tree, windows, "System32");
        add_file_with_blob(
            &mut tree,
            &mut blobs,
            system32,
            "kernel32.dll",
            &minimal_pe(0x8664),
            0x01,
        );

        // Hives are absent entirely; that only warns.
        let props = harvest(&tree, &blobs, &MockHives::default());

        assert_eq!(props.set.get("WINDOWS/SYSTEMROOT").unwrap(), "WINDOWS");
        assert_eq!(props.set.get("WINDOWS/ARCH").unwrap(), "9");
    }

    #[test]
    fn no_system_root_sets_nothing() {
        let mut tree = Tree::new();
        let root = tree.new_filler_directory();
        tree.set_root(Some(root));
        add_dir(&mut tree, root, "Users");

        let props = harvest(&tree, &MockBlobs::default(), &MockHives::default());
        assert!(props.set.is_empty());
    }

    #[test]
    fn tie_prefers_directory_named_windows() {
        let mut tree = Tree::new();
        let root = tree.new_filler_directory();
        tree.set_root(Some(root));
        let mut blobs = MockBlobs::default();

        for (name, hash) in &[("AOS", 0x11u8), ("windows", 0x12)] {
            let dir = add_dir(&mut tree, root, name);
            let system32 = add_dir(&mut tree, dir, "System32");
            add_file_with_blob(
                &mut tree,
                &mut blobs,
                system32,
                "kernel32.dll",
                &minimal_pe(0x014c),
                *hash,
            );
        }

        let props = harvest(&tree, &blobs, &MockHives::default());
        assert_eq!(props.set.get("WINDOWS/SYSTEMROOT").unwrap(), "WINDOWS");
        assert_eq!(props.set.get("WINDOWS/ARCH").unwrap(), "0");
    }

    #[test]
    fn hive_properties_copied() {
        let mut tree = Tree::new();
        let root = tree.new_filler_directory();
        tree.set_root(Some(root));
        let mut blobs = MockBlobs::default();

        let windows = add_dir(&mut tree, root, "Windows");
        let system32 = add_dir(&mut tree, windows, "System32");
        let config = add_dir(&mut tree, system32, "config");
        add_file_with_blob(&mut tree, &mut blobs, config, "SOFTWARE", b"regf-soft", 0x21);
        add_file_with_blob(&mut tree, &mut blobs, config, "SYSTEM", b"regf-sys", 0x22);

        let version_key = "Microsoft\\Windows NT\\CurrentVersion";
        let mut hives = MockHives::default();
        hives.string(version_key, "EditionID", "Professional");
        hives.string(version_key, "ProductName", "Windows 10 Pro");
        hives.string(version_key, "InstallationType", "Client");
        hives.number(version_key, "CurrentMajorVersionNumber", 10);
        hives.number(version_key, "CurrentMinorVersionNumber", 0);
        hives.string(version_key, "CurrentBuild", "19045");
        hives.number("ControlSet001\\Control\\Windows", "CSDBuildNumber", 1415);
        hives.number("ControlSet001\\Control\\Windows", "CSDVersion", 0x300);
        hives.string(
            "ControlSet001\\Control\\ProductOptions",
            "ProductType",
            "WinNT",
        );
        hives.string(
            "ControlSet001\\Control\\Nls\\Language",
            "InstallLanguage",
            "0409",
        );
        hives.subkeys.insert(
            "ControlSet001\\Control\\MUI\\UILanguages".to_owned(),
            vec!["de-DE".to_owned(), "en-US".to_owned()],
        );

        let props = harvest(&tree, &blobs, &hives);

        assert_eq!(props.set.get("FLAGS").unwrap(), "Professional");
        assert_eq!(props.set.get("DISPLAYNAME").unwrap(), "Windows 10 Pro");
        assert_eq!(props.set.get("WINDOWS/EDITIONID").unwrap(), "Professional");
        assert_eq!(props.set.get("WINDOWS/INSTALLATIONTYPE").unwrap(), "Client");
        assert_eq!(props.set.get("WINDOWS/VERSION/MAJOR").unwrap(), "10");
        assert_eq!(props.set.get("WINDOWS/VERSION/MINOR").unwrap(), "0");
        assert_eq!(props.set.get("WINDOWS/VERSION/BUILD").unwrap(), "19045");
        assert_eq!(props.set.get("WINDOWS/VERSION/SPBUILD").unwrap(), "1415");
        assert_eq!(props.set.get("WINDOWS/VERSION/SPLEVEL").unwrap(), "3");
        assert_eq!(props.set.get("WINDOWS/PRODUCTTYPE").unwrap(), "WinNT");
        assert_eq!(props.set.get("WINDOWS/LANGUAGES/LANGUAGE[1]").unwrap(), "de-DE");
        assert_eq!(props.set.get("WINDOWS/LANGUAGES/LANGUAGE[2]").unwrap(), "en-US");
        assert_eq!(props.set.get("WINDOWS/LANGUAGES/DEFAULT").unwrap(), "en-US");
    }

    #[test]
    fn version_falls_back_to_current_version_string() {
        let mut tree = Tree::new();
        let root = tree.new_filler_directory();
        tree.set_root(Some(root));
        let mut blobs = MockBlobs::default();

        let windows = add_dir(&mut tree, root, "Windows");
        let system32 = add_dir(&mut tree, windows, "System32");
        let config = add_dir(&mut tree, system32, "config");
        add_file_with_blob(&mut tree, &mut blobs, config, "SOFTWARE", b"regf-soft", 0x31);

        let version_key = "Microsoft\\Windows NT\\CurrentVersion";
        let mut hives = MockHives::default();
        hives.string(version_key, "CurrentVersion", "6.3");
        hives.string(version_key, "CurrentBuild", "1.511.1 () (Obsolete data - do not use)");
        hives.string(version_key, "CurrentBuildNumber", "2600");

        let props = harvest(&tree, &blobs, &hives);
        assert_eq!(props.set.get("WINDOWS/VERSION/MAJOR").unwrap(), "6");
        assert_eq!(props.set.get("WINDOWS/VERSION/MINOR").unwrap(), "3");
        assert_eq!(props.set.get("WINDOWS/VERSION/BUILD").unwrap(), "2600");
    }

    #[test]
    fn invalid_hive_and_pe_only_warn() {
        let mut tree = Tree::new();
        let root = tree.new_filler_directory();
        tree.set_root(Some(root));
        let mut blobs = MockBlobs::default();

        let windows = add_dir(&mut tree, root, "Windows");
        let system32 = add_dir(&mut tree, windows, "System32");
        add_file_with_blob(&mut tree, &mut blobs, system32, "kernel32.dll", b"MZ", 0x41);
        let config = add_dir(&mut tree, system32, "config");
        add_file_with_blob(&mut tree, &mut blobs, config, "SOFTWARE", b"nope", 0x42);

        let props = harvest(&tree, &blobs, &MockHives::default());
        assert_eq!(props.set.get("WINDOWS/SYSTEMROOT").unwrap(), "WINDOWS");
        assert!(props.set.get("WINDOWS/ARCH").is_none());
        assert!(props.set.get("WINDOWS/VERSION/MAJOR").is_none());
    }

    #[test]
    fn out_of_memory_is_fatal() {
        struct OomProps;
        impl PropertySink for OomProps {
            fn set(&mut self, _: ImageId, _: &str, _: &str) -> Result<(), PropertyError> {
                Err(PropertyError::OutOfMemory)
            }
        }

        let mut tree = Tree::new();
        let root = tree.new_filler_directory();
        tree.set_root(Some(root));
        let mut blobs = MockBlobs::default();
        let windows = add_dir(&mut tree, root, "Windows");
        let system32 = add_dir(&mut tree, windows, "System32");
        add_file_with_blob(
            &mut tree,
            &mut blobs,
            system32,
            "kernel32.dll",
            &minimal_pe(0x8664),
            0x51,
        );

        let err = set_windows_specific_info(
            &tree,
            ImageId(1),
            &blobs,
            &MockHives::default(),
            &mut OomProps,
            &crate::default_logger(),
            None,
        )
        .unwrap_err();
        assert!(err.is_out_of_memory());
    }

    #[test]
    fn cancellation_observed_per_blob() {
        let mut tree = Tree::new();
        let root = tree.new_filler_directory();
        tree.set_root(Some(root));
        let mut blobs = MockBlobs::default();
        let windows = add_dir(&mut tree, root, "Windows");
        let system32 = add_dir(&mut tree, windows, "System32");
        add_file_with_blob(
            &mut tree,
            &mut blobs,
            system32,
            "kernel32.dll",
            &minimal_pe(0x8664),
            0x61,
        );

        let cancel = || true;
        let mut props = MockProps::default();
        let err = set_windows_specific_info(
            &tree,
            ImageId(1),
            &blobs,
            &MockHives::default(),
            &mut props,
            &crate::default_logger(),
            Some(&cancel),
        )
        .unwrap_err();
        assert!(err.is_interrupted());
    }
}
