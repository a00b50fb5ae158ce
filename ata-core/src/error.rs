use thiserror::Error;

#[derive(Error, Debug)]
pub enum AtaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad magic, unknown version or a malformed header/manifest/trailer.
    #[error("Format error: {0}")]
    Format(String),

    /// A chunk tag or an encrypted entry checksum did not verify.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Corrupt data: {0}")]
    CorruptData(String),

    #[error("Weak parameter: {0}")]
    WeakParameter(String),

    #[error("Incomplete archive: {0}")]
    IncompleteArchive(String),

    #[error("archive is encrypted; passphrase required")]
    MissingPassphrase,

    #[error("invalid entry path: {0}")]
    InvalidPath(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("no such entry: {0}")]
    EntryNotFound(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("worker panicked while processing chunk {seq}")]
    WorkerPanicked { seq: u64 },

    #[error("nonce counter exhausted")]
    NonceExhausted,

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl AtaError {
    /// True for failures that are local to one entry's data (tag, checksum,
    /// codec) as opposed to archive-wide or I/O failures.
    pub fn is_integrity(&self) -> bool {
        matches!(self, AtaError::Authentication(_) | AtaError::CorruptData(_))
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, AtaError>;
