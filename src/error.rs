use std::{fmt::Display, io, num::NonZeroU32};

/// Error returned from operations other than individual transfers: opening
/// and claiming the device, and waiting for completions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub(crate) kind: ErrorKind,
    pub(crate) code: Option<NonZeroU32>,
    pub(crate) message: &'static str,
}

impl Error {
    /// Create an error with no OS error code attached.
    pub fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self {
            kind,
            code: None,
            message,
        }
    }

    /// Create an error carrying an OS error code (`errno` on Linux).
    pub fn new_os(kind: ErrorKind, message: &'static str, code: u32) -> Self {
        Self {
            kind,
            code: NonZeroU32::new(code),
            message,
        }
    }

    #[track_caller]
    pub(crate) fn log_error(self) -> Self {
        log::error!("{}", self);
        self
    }

    #[track_caller]
    pub(crate) fn log_debug(self) -> Self {
        log::debug!("{}", self);
        self
    }

    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the error code from the OS, if applicable.
    pub fn os_error(&self) -> Option<u32> {
        self.code.map(|c| c.get())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = self.code {
            write!(f, " (")?;
            format_os_error_code(f, code.get())?;
            write!(f, ")")?;
        }
        Ok(())
    }
}

fn format_os_error_code(f: &mut std::fmt::Formatter<'_>, code: u32) -> std::fmt::Result {
    write!(f, "{}", io::Error::from_raw_os_error(code as i32))
}

impl std::error::Error for Error {}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match err.kind {
            ErrorKind::Disconnected => io::ErrorKind::NotConnected,
            ErrorKind::Busy => io::ErrorKind::Other,
            ErrorKind::PermissionDenied => io::ErrorKind::PermissionDenied,
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::InvalidArgument => io::ErrorKind::InvalidInput,
            ErrorKind::Unsupported => io::ErrorKind::Unsupported,
            ErrorKind::Other => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// General category of error as part of an [`Error`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Device is disconnected.
    Disconnected,

    /// Device or interface is in use by another application, kernel driver, or handle.
    Busy,

    /// This user or application does not have permission to perform the requested operation.
    PermissionDenied,

    /// Requested device or interface not found.
    NotFound,

    /// The transport rejected a parameter.
    InvalidArgument,

    /// The requested operation is not supported on this platform.
    Unsupported,

    /// Uncategorized error.
    Other,
}

/// Completion status of an individual transfer that did not succeed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The transfer did not complete before its timeout elapsed.
    Timeout,

    /// Transfer was cancelled.
    Cancelled,

    /// Endpoint in a STALL condition.
    Stall,

    /// Device disconnected.
    Disconnected,

    /// Hardware issue or protocol violation.
    Fault,

    /// The request was invalid or not supported by the transport.
    InvalidArgument,

    /// Unknown or OS-specific error, with the raw OS code.
    Unknown(u32),
}

impl Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferError::Timeout => write!(f, "transfer timed out"),
            TransferError::Cancelled => write!(f, "transfer was cancelled"),
            TransferError::Stall => write!(f, "endpoint stalled"),
            TransferError::Disconnected => write!(f, "device disconnected"),
            TransferError::Fault => write!(f, "hardware fault or protocol violation"),
            TransferError::InvalidArgument => write!(f, "invalid or unsupported argument"),
            TransferError::Unknown(e) => {
                write!(f, "unknown error (")?;
                format_os_error_code(f, *e)?;
                write!(f, ")")
            }
        }
    }
}

impl std::error::Error for TransferError {}

impl From<TransferError> for io::Error {
    fn from(value: TransferError) -> Self {
        match value {
            TransferError::Timeout => io::Error::new(io::ErrorKind::TimedOut, value),
            TransferError::Cancelled => io::Error::new(io::ErrorKind::Interrupted, value),
            TransferError::Stall => io::Error::new(io::ErrorKind::ConnectionReset, value),
            TransferError::Disconnected => io::Error::new(io::ErrorKind::ConnectionAborted, value),
            TransferError::Fault => io::Error::other(value),
            TransferError::InvalidArgument => io::Error::new(io::ErrorKind::InvalidInput, value),
            TransferError::Unknown(_) => io::Error::other(value),
        }
    }
}

/// Rejected session parameters.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The chunk size (endpoint max packet size) is zero.
    ZeroChunkSize,

    /// The chunk size is larger than one transfer can carry.
    ChunkTooLarge {
        /// Requested chunk size in bytes.
        chunk_size: usize,
        /// Largest supported chunk size in bytes.
        max: usize,
    },

    /// The total transfer length is zero.
    ZeroLength,

    /// The total transfer length is not a multiple of the chunk size.
    NotMultiple {
        /// Requested total length in bytes.
        total: usize,
        /// Chunk size in bytes.
        chunk_size: usize,
    },

    /// The source buffer length does not match the configured total.
    SourceLength {
        /// Configured total length in bytes.
        expected: usize,
        /// Length of the supplied buffer.
        actual: usize,
    },

    /// An endpoint address refers to the default control endpoint.
    ControlEndpoint(u8),

    /// An endpoint address has the wrong direction bit.
    WrongDirection(u8),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ZeroChunkSize => write!(f, "chunk size must be non-zero"),
            ConfigError::ChunkTooLarge { chunk_size, max } => {
                write!(f, "chunk size {chunk_size} exceeds the maximum of {max}")
            }
            ConfigError::ZeroLength => write!(f, "total length must be non-zero"),
            ConfigError::NotMultiple { total, chunk_size } => write!(
                f,
                "total length {total} is not a multiple of the chunk size {chunk_size}"
            ),
            ConfigError::SourceLength { expected, actual } => write!(
                f,
                "source buffer is {actual} bytes but the session transfers {expected}"
            ),
            ConfigError::ControlEndpoint(addr) => {
                write!(f, "endpoint {addr:#04x} is the control endpoint, not a bulk endpoint")
            }
            ConfigError::WrongDirection(addr) => {
                write!(f, "endpoint {addr:#04x} has the wrong direction")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for io::Error {
    fn from(value: ConfigError) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_os_code() {
        let e = Error::new_os(ErrorKind::Busy, "failed to claim interface", 16);
        assert_eq!(e.kind(), ErrorKind::Busy);
        assert_eq!(e.os_error(), Some(16));
        assert!(e.to_string().starts_with("failed to claim interface ("));
    }

    #[test]
    fn display_without_code() {
        let e = Error::new(ErrorKind::NotFound, "device not found");
        assert_eq!(e.os_error(), None);
        assert_eq!(e.to_string(), "device not found");
    }

    #[test]
    fn io_error_kinds() {
        let e: io::Error = TransferError::Timeout.into();
        assert_eq!(e.kind(), io::ErrorKind::TimedOut);

        let e: io::Error = ConfigError::ZeroLength.into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidInput);

        let e: io::Error = Error::new(ErrorKind::Disconnected, "gone").into();
        assert_eq!(e.kind(), io::ErrorKind::NotConnected);
    }
}
