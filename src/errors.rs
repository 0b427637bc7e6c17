use snafu::{IntoError, Snafu};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub struct Error(ErrorInner);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum ErrorInner {
    #[snafu(display("Invalid metadata resource: {}", source))]
    BadMetadata { source: MetadataError },

    #[snafu(display("String encoding error: {}", source))]
    BadEncoding { source: EncodingError },

    #[snafu(display("Operation cancelled by caller"))]
    Interrupted,

    #[snafu(display("Out of memory while updating the image's XML document"))]
    PropertyOutOfMemory,
}

/// Fatal corruption found while decoding a metadata resource. Any of these
/// unwinds the partial tree; recoverable anomalies are logged and skipped
/// instead.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum MetadataError {
    #[snafu(display("Dentry at offset {} overruns the metadata resource", offset))]
    DentryOverrun { offset: u64 },

    #[snafu(display("Dentry at offset {} has bad length {}", offset, length))]
    BadDentryLength { offset: u64, length: u64 },

    #[snafu(display("Dentry at offset {} has an odd name length", offset))]
    OddNameLength { offset: u64 },

    #[snafu(display(
        "Dentry at offset {} is too short ({} bytes) for its names ({} bytes needed)",
        offset,
        length,
        needed
    ))]
    NamesOverrunDentry { offset: u64, length: u64, needed: u64 },

    #[snafu(display("Extra stream entry for dentry at offset {} is invalid", offset))]
    BadStreamEntry { offset: u64 },

    #[snafu(display(
        "Cyclic directory structure detected: children of \"{}\" coincide with children of \"{}\"",
        dir,
        ancestor
    ))]
    CyclicDirectory { dir: String, ancestor: String },

    #[snafu(display("The root of the image is not a directory"))]
    RootNotDirectory,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum EncodingError {
    #[snafu(display("Name is not valid UTF-16"))]
    InvalidUtf16,
}

/// Invalid symbol-length assignment handed to the decode-table builder.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum CodeError {
    #[snafu(display("Codeword lengths overflow the codespace"))]
    Oversubscribed,

    #[snafu(display("Codeword lengths do not fill the codespace"))]
    Incomplete,
}

/// Outcome of a failed path lookup, discriminated the way `errno` callers
/// expect.
#[derive(Debug, Snafu, Copy, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[snafu(display("No such file or directory"))]
    NotFound,

    #[snafu(display("Not a directory"))]
    NotADirectory,
}

impl From<MetadataError> for ErrorInner {
    fn from(e: MetadataError) -> Self {
        BadMetadata.into_error(e)
    }
}

impl From<MetadataError> for Error {
    fn from(e: MetadataError) -> Self {
        Self(e.into())
    }
}

impl From<EncodingError> for ErrorInner {
    fn from(e: EncodingError) -> Self {
        BadEncoding.into_error(e)
    }
}

impl From<EncodingError> for Error {
    fn from(e: EncodingError) -> Self {
        Self(e.into())
    }
}

impl Error {
    pub(crate) fn interrupted() -> Self {
        Self(ErrorInner::Interrupted)
    }

    pub(crate) fn property_out_of_memory() -> Self {
        Self(ErrorInner::PropertyOutOfMemory)
    }

    /// True if this error is the caller-requested cancellation sentinel.
    pub fn is_interrupted(&self) -> bool {
        matches!(self.0, ErrorInner::Interrupted)
    }

    /// True if this error reports a corrupt metadata resource.
    pub fn is_invalid_metadata(&self) -> bool {
        matches!(self.0, ErrorInner::BadMetadata { .. })
    }

    /// True if this error reports out-of-memory from the property sink.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self.0, ErrorInner::PropertyOutOfMemory)
    }
}
