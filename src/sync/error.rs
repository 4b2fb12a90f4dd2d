//! Synchronization related errors.

use std::fmt::Display;
use std::io;

use crate::directory::DirectoryError;
use crate::usn::Usn;

//------------ SyncError -----------------------------------------------------

/// A synchronization run aborted.
///
/// Session-level failures never commit the watermark store; the next run
/// retries from the last known-good watermark. The scheduler consults
/// [`requires_intervention()`] to tell apart failures worth retrying from
/// the one condition that is not: an observed watermark regression, where
/// blindly retrying could perpetually miss changes.
///
/// [`requires_intervention()`]: SyncError::requires_intervention()
#[derive(Debug)]
pub enum SyncError {
    /// The directory failed or rejected a request.
    Directory(DirectoryError),

    /// The zone store failed to apply an update.
    Store(io::Error),

    /// The watermark store failed.
    WatermarkStore(io::Error),

    /// An incremental scan returned a change number below the start
    /// watermark by more than the allowed skew.
    Consistency {
        /// The offending change number.
        observed: Usn,

        /// The watermark the run started from.
        start: Usn,
    },
}

impl SyncError {
    /// Returns whether an operator must act before retrying makes sense.
    pub fn requires_intervention(&self) -> bool {
        matches!(self, SyncError::Consistency { .. })
    }

    /// Returns whether the failure is transient.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Directory(err) => err.is_transient(),
            SyncError::Store(_) | SyncError::WatermarkStore(_) => true,
            SyncError::Consistency { .. } => false,
        }
    }
}

impl From<DirectoryError> for SyncError {
    fn from(err: DirectoryError) -> Self {
        SyncError::Directory(err)
    }
}

impl Display for SyncError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SyncError::Directory(err) => {
                write!(f, "Directory error: {err}")
            }
            SyncError::Store(err) => {
                write!(f, "Zone store error: {err}")
            }
            SyncError::WatermarkStore(err) => {
                write!(f, "Watermark store error: {err}")
            }
            SyncError::Consistency { observed, start } => {
                write!(
                    f,
                    "Change number {observed} regressed below start \
                     watermark {start}; the directory's change sequence \
                     may have been rolled back"
                )
            }
        }
    }
}

impl std::error::Error for SyncError {}
