//! Error types for the replication log core.

use crate::types::OpTime;
use std::fmt;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification of a [`CoreError`].
///
/// The replication control loop branches on this, not on individual
/// variants: allocation and validation failures go back to the writing
/// client, apply failures go to the replay driver's halt-or-skip policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The clock or slot state could not produce an optime.
    Allocation,
    /// Malformed input to the builder, writer or a settings parser.
    Validation,
    /// A logged entry could not be applied to local state.
    Apply,
    /// A bounded wait expired behind an unfinished writer.
    VisibilityStall,
    /// The underlying store or codec failed.
    Storage,
}

/// Reason code attached to apply failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyErrorCode {
    /// The entry is missing a required field or has the wrong shape.
    InvalidEntry,
    /// A command entry was passed to the CRUD entry point, or vice versa.
    WrongEntryPoint,
    /// The target namespace does not exist and cannot be created implicitly.
    NamespaceNotFound,
    /// The target namespace already exists.
    NamespaceExists,
    /// The namespace string cannot name a collection.
    InvalidNamespace,
    /// An index specification is malformed.
    BadIndexSpec,
    /// An index with the same name or key but a different definition exists.
    IndexConflict,
    /// The update document cannot be applied.
    InvalidUpdate,
    /// The command name is not recognized.
    UnknownCommand,
}

impl fmt::Display for ApplyErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidEntry => "InvalidEntry",
            Self::WrongEntryPoint => "WrongEntryPoint",
            Self::NamespaceNotFound => "NamespaceNotFound",
            Self::NamespaceExists => "NamespaceExists",
            Self::InvalidNamespace => "InvalidNamespace",
            Self::BadIndexSpec => "BadIndexSpec",
            Self::IndexConflict => "IndexConflict",
            Self::InvalidUpdate => "InvalidUpdate",
            Self::UnknownCommand => "UnknownCommand",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in replication log operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] replog_storage::StorageError),

    /// Document codec error.
    #[error("codec error: {0}")]
    Codec(#[from] replog_codec::CodecError),

    /// The oplog store contains an unreadable frame.
    #[error("oplog corruption at offset {offset}: {message}")]
    Corruption {
        /// Byte offset of the bad frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// A frame's checksum does not match its contents.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Byte offset of the frame.
        offset: u64,
        /// Checksum stored in the frame.
        expected: u32,
        /// Checksum computed over the frame.
        actual: u32,
    },

    /// The clock or slot state could not produce an optime.
    #[error("slot allocation failed: {message}")]
    Allocation {
        /// Why no optime could be issued.
        message: String,
    },

    /// Malformed input rejected before any I/O.
    #[error("invalid oplog input: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// A read preference document could not be parsed.
    #[error("invalid read preference: {message}")]
    ReadPreference {
        /// What was wrong with the document.
        message: String,
    },

    /// A logged entry could not be applied.
    #[error("apply failed ({code}): {message}")]
    Apply {
        /// Machine-readable reason.
        code: ApplyErrorCode,
        /// Human-readable detail.
        message: String,
    },

    /// A bounded visibility wait expired.
    #[error("visibility stalled waiting for {waiting_for}: oplog visible through {visible:?}")]
    VisibilityStall {
        /// The optime the caller waited on.
        waiting_for: OpTime,
        /// The visibility point when the wait gave up.
        visible: Option<OpTime>,
    },
}

impl CoreError {
    /// Creates an allocation error.
    pub fn allocation(message: impl Into<String>) -> Self {
        Self::Allocation {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a read preference error.
    pub fn read_preference(message: impl Into<String>) -> Self {
        Self::ReadPreference {
            message: message.into(),
        }
    }

    /// Creates an apply error.
    pub fn apply(code: ApplyErrorCode, message: impl Into<String>) -> Self {
        Self::Apply {
            code,
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::Corruption {
            offset,
            message: message.into(),
        }
    }

    /// Returns the coarse category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Allocation { .. } => ErrorCategory::Allocation,
            Self::Validation { .. } | Self::ReadPreference { .. } => ErrorCategory::Validation,
            Self::Apply { .. } => ErrorCategory::Apply,
            Self::VisibilityStall { .. } => ErrorCategory::VisibilityStall,
            Self::Storage(_)
            | Self::Codec(_)
            | Self::Corruption { .. }
            | Self::ChecksumMismatch { .. } => ErrorCategory::Storage,
        }
    }

    /// Returns the apply reason code, if this is an apply failure.
    #[must_use]
    pub fn apply_code(&self) -> Option<ApplyErrorCode> {
        match self {
            Self::Apply { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        assert_eq!(
            CoreError::allocation("no clock").category(),
            ErrorCategory::Allocation
        );
        assert_eq!(
            CoreError::validation("bad").category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            CoreError::read_preference("bad mode").category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            CoreError::apply(ApplyErrorCode::UnknownCommand, "frob").category(),
            ErrorCategory::Apply
        );
        assert_eq!(
            CoreError::corruption(8, "bad magic").category(),
            ErrorCategory::Storage
        );
    }

    #[test]
    fn apply_code_and_display() {
        let err = CoreError::apply(ApplyErrorCode::NamespaceNotFound, "test.missing");
        assert_eq!(err.apply_code(), Some(ApplyErrorCode::NamespaceNotFound));
        assert_eq!(
            err.to_string(),
            "apply failed (NamespaceNotFound): test.missing"
        );
        assert_eq!(CoreError::validation("x").apply_code(), None);
    }
}
