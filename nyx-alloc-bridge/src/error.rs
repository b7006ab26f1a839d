/// Error type for allocator bridge operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("native allocator could not provide {requested} bytes")]
    /// Native heap exhausted
    OutOfMemory { requested: usize },
    #[error("requested {requested} bytes exceeds limit of {limit} bytes")]
    /// Request does not fit the native size type or the configured cap
    TooLarge { requested: u64, limit: u64 },
    #[error("config: {0}")]
    /// Invalid or unreadable configuration
    Config(String),
    #[error("io: {0}")]
    /// Config file I/O
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for the one recoverable failure kind: no buffer is available.
    pub fn is_allocation_failure(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. } | Self::TooLarge { .. })
    }
}

/// Convenient Result alias for this crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;
