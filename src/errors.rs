//! Error handling for the display list engine.
//!
//! Only conditions a caller can act on are errors. Running out of free
//! display lists is a normal outcome and is reported through `Option`
//! by [`DlManager::get`](crate::manager::DlManager::get).

use core::fmt;

use crate::dl::DlListId;

/// Result type for display list operations.
pub type DlResult<T> = Result<T, DlError>;

/// Operation that needs header mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeOp {
    /// Attaching a fragment body to a list
    AddFragment,
    /// Chaining a list behind a head list
    AddChain,
}

/// Error type for all display list operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlError {
    /// The DMA allocator could not satisfy a request of `size` bytes
    OutOfMemory { size: usize },
    /// Fragments and chains are only available in header mode
    InvalidMode(ModeOp),
    /// The header cannot describe more than `max` bodies
    TooManyBodies { max: usize },
    /// The list was allocated by another manager
    ForeignList { list: DlListId, manager: u32 },
}

impl DlError {
    /// Whether this is a DMA allocation failure.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, DlError::OutOfMemory { .. })
    }

    /// Whether the operation was refused because of the addressing mode.
    pub fn is_invalid_mode(&self) -> bool {
        matches!(self, DlError::InvalidMode(_))
    }
}

impl fmt::Display for ModeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeOp::AddFragment => write!(f, "fragments"),
            ModeOp::AddChain => write!(f, "chained lists"),
        }
    }
}

impl fmt::Display for DlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DlError::OutOfMemory { size } => {
                write!(f, "Out of DMA memory allocating {} bytes", size)
            }
            DlError::InvalidMode(op) => write!(f, "{} require header mode", op),
            DlError::TooManyBodies { max } => {
                write!(f, "Display list header holds at most {} bodies", max)
            }
            DlError::ForeignList { list, manager } => {
                write!(f, "Display list {} does not belong to manager {}", list, manager)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DlError {}

/// A refused ownership transfer.
///
/// Operations that take ownership of a body or list hand the value back
/// when they refuse it, so the DMA memory it owns is not dropped.
pub struct Rejected<T> {
    /// Why the value was refused
    pub error: DlError,
    /// The value, untouched
    pub value: T,
}

impl<T> Rejected<T> {
    pub(crate) fn new(error: DlError, value: T) -> Self {
        Self { error, value }
    }

    /// Take the value back, discarding the error.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected").field("error", &self.error).finish_non_exhaustive()
    }
}

impl<T> fmt::Display for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<T> From<Rejected<T>> for DlError {
    fn from(rejected: Rejected<T>) -> Self {
        rejected.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            DlError::OutOfMemory { size: 2128 }.to_string(),
            "Out of DMA memory allocating 2128 bytes"
        );
        assert_eq!(
            DlError::InvalidMode(ModeOp::AddChain).to_string(),
            "chained lists require header mode"
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(DlError::OutOfMemory { size: 8 }.is_out_of_memory());
        assert!(DlError::InvalidMode(ModeOp::AddFragment).is_invalid_mode());
        assert!(!DlError::TooManyBodies { max: 8 }.is_invalid_mode());
    }

    #[test]
    fn test_rejected_returns_value() {
        let rejected = Rejected::new(DlError::InvalidMode(ModeOp::AddFragment), 7u32);
        assert_eq!(rejected.error, DlError::InvalidMode(ModeOp::AddFragment));
        assert_eq!(rejected.into_inner(), 7);
    }
}
