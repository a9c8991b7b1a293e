use thiserror::Error;

/// Error kinds surfaced by the inspector, mapper, and relocator.
///
/// Matches the seven kinds a conforming implementation of the loader must
/// distinguish: malformed input, I/O failure, allocation failure, caller
/// misuse, an unavailable resolver, a relocation naming an unknown symbol,
/// and an OS-level mapping failure.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("malformed ELF file: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("out of memory")]
    OutOfMemory,

    #[error("image already loaded")]
    AlreadyLoaded,

    #[error("host library resolver unavailable")]
    ResolverUnavailable,

    #[error("missing symbol: {0}")]
    MissingSymbol(String),

    #[error("mapping failed: {0}")]
    MappingFailed(String),
}

pub type Result<T> = std::result::Result<T, LoaderError>;
