//! File and stream names as stored in a WIM image: UTF-16LE code units,
//! compared either unit-wise or after upper-casing. No Unicode
//! normalization is performed before comparing.

use std::fmt;

use crate::errors::{EncodingError, Result};

/// The path separator accepted by lookup operations.
pub const PATH_SEPARATOR: u16 = b'/' as u16;

/// A long name, short (8.3) name, or stream name. An empty name is the
/// unnamed-stream sentinel and the root dentry's name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Name(Box<[u16]>);

impl Name {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_units(units: &[u16]) -> Self {
        Name(units.into())
    }

    pub fn new(s: &str) -> Self {
        Name(s.encode_utf16().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn units(&self) -> &[u16] {
        &self.0
    }

    /// Length in bytes when encoded on disk, excluding any NUL terminator.
    pub fn nbytes(&self) -> usize {
        self.0.len() * 2
    }

    pub fn upcased(&self) -> Vec<u16> {
        upcase_units(&self.0)
    }

    pub fn eq_ignore_case(&self, other: &[u16]) -> bool {
        self.0.len() == other.len()
            && self
                .0
                .iter()
                .zip(other.iter())
                .all(|(&a, &b)| upcase_unit(a) == upcase_unit(b))
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.0)
    }

    /// Strict conversion to a native string. Unpaired surrogates, which
    /// NTFS permits in names, fail the conversion.
    pub fn to_utf8(&self) -> Result<String> {
        String::from_utf16(&self.0).map_err(|_| EncodingError::InvalidUtf16.into())
    }

    /// True for the names "." and "..", which are never valid dentry
    /// names.
    pub fn is_dot_or_dotdot(&self) -> bool {
        let dot = b'.' as u16;
        match *self.0 {
            [d] => d == dot,
            [d1, d2] => d1 == dot && d2 == dot,
            _ => false,
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

/// Upper-case one UTF-16 code unit. Mirrors an NTFS-style upcase table:
/// only mappings that stay a single basic-multilingual-plane unit apply,
/// surrogates and multi-unit expansions are left alone.
pub fn upcase_unit(unit: u16) -> u16 {
    match char::from_u32(u32::from(unit)) {
        Some(c) => {
            let mut upper = c.to_uppercase();
            match (upper.next(), upper.next()) {
                (Some(u), None) if (u as u32) <= 0xffff => u as u16,
                _ => unit,
            }
        }
        None => unit,
    }
}

pub fn upcase_units(units: &[u16]) -> Vec<u16> {
    units.iter().map(|&u| upcase_unit(u)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_folding() {
        let a = Name::new("Kernel32.DLL");
        assert!(a.eq_ignore_case(Name::new("kernel32.dll").units()));
        assert!(!a.eq_ignore_case(Name::new("kernel33.dll").units()));
        assert_eq!(upcase_units(Name::new("aÄz").units()), Name::new("AÄZ").units());
    }

    #[test]
    fn multi_unit_uppercase_left_alone() {
        // 'ß' upper-cases to "SS"; a single-unit table cannot express
        // that, so it stays as-is.
        assert_eq!(upcase_unit('ß' as u16), 'ß' as u16);
    }

    #[test]
    fn strict_conversion_rejects_lone_surrogates() {
        assert_eq!(Name::new("plain").to_utf8().unwrap(), "plain");
        assert!(Name::from_units(&[0xd800]).to_utf8().is_err());
    }

    #[test]
    fn dot_names() {
        assert!(Name::new(".").is_dot_or_dotdot());
        assert!(Name::new("..").is_dot_or_dotdot());
        assert!(!Name::new("...").is_dot_or_dotdot());
        assert!(!Name::new(".a").is_dot_or_dotdot());
        assert!(!Name::empty().is_dot_or_dotdot());
    }
}
