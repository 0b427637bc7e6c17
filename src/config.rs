use once_cell::sync::OnceCell;

/// Case sensitivity behavior for name lookups.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CaseSensitivity {
    /// Names must match exactly.
    Sensitive,
    /// Names match if equal after upper-casing. If several names match, a
    /// case-sensitively equal one is preferred when it exists.
    Insensitive,
    /// Use the process-wide default set by [`global_init`](crate::global_init).
    PlatformDefault,
}

impl Default for CaseSensitivity {
    fn default() -> Self {
        CaseSensitivity::PlatformDefault
    }
}

/// Library-wide initialization options.
#[derive(Debug, Default, Copy, Clone)]
pub struct InitOptions {
    /// Overrides the platform default used by
    /// [`CaseSensitivity::PlatformDefault`]. `None` keeps the platform's
    /// behavior: insensitive on Windows, sensitive elsewhere.
    pub default_case: Option<CaseSensitivity>,
}

static DEFAULT_IGNORE_CASE: OnceCell<bool> = OnceCell::new();

/// Initialize process-wide library state. Only the first call has any
/// effect; the defaults it establishes are immutable afterwards.
pub fn global_init(options: InitOptions) {
    let ignore = match options.default_case {
        Some(CaseSensitivity::Sensitive) => false,
        Some(CaseSensitivity::Insensitive) => true,
        Some(CaseSensitivity::PlatformDefault) | None => cfg!(windows),
    };
    let _ = DEFAULT_IGNORE_CASE.set(ignore);
}

pub(crate) fn default_ignore_case() -> bool {
    *DEFAULT_IGNORE_CASE.get_or_init(|| cfg!(windows))
}

pub(crate) fn will_ignore_case(case: CaseSensitivity) -> bool {
    match case {
        CaseSensitivity::Sensitive => false,
        CaseSensitivity::Insensitive => true,
        CaseSensitivity::PlatformDefault => default_ignore_case(),
    }
}
