//! Engine error type.
//!
//! Every failure the merge engine can surface is a variant of [`Error`].
//! Variants are split into two families:
//!
//! - **Recoverable**: [`Error::InvalidMove`] (the mutation simply does not
//!   apply) and [`Error::NotFound`] (a collaborator may still fetch the
//!   missing object over the network).
//! - **Fatal**: everything else. The current operation is aborted and the
//!   error must reach the caller unmodified. Inputs are never dropped or
//!   reordered to work around one of these.
//!
//! [`ErrorCode`] gives each variant a stable machine-readable code.

use crate::change::Cid;
use crate::model::{NodeId, NodeIdError, OpId, OrderError};

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// What kind of object a [`Error::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// A raw content-addressed blob.
    Blob,
    /// A permanode (object identity).
    Permanode,
    /// A signed change.
    Change,
    /// A compact local id mapping.
    LocalId,
    /// A named version.
    Version,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Blob => "blob",
            Self::Permanode => "permanode",
            Self::Change => "change",
            Self::LocalId => "local id",
            Self::Version => "version",
        };
        f.write_str(s)
    }
}

/// Errors produced by the merge engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The op tracker saw an operation that is not strictly newer than the
    /// last one it accepted. The input stream is not causally sorted.
    #[error("out of order operation: {incoming} does not follow {last}")]
    OutOfOrderOperation {
        /// Last accepted op.
        last: OpId,
        /// Rejected op.
        incoming: OpId,
    },

    /// Two ops from different changes share a lamport time and the active
    /// ordering policy refuses to break the tie.
    #[error("cannot order concurrent operations {a} and {b}")]
    ConcurrentOperations {
        /// First op.
        a: OpId,
        /// Second op.
        b: OpId,
    },

    /// An op was compared with itself.
    #[error("comparing equal operations {0}")]
    EqualOperations(OpId),

    /// Move rejected locally: cycle, self-parenting, reserved block, or a
    /// left sibling that does not live under the requested parent.
    #[error("invalid move of {block} under {parent}: {reason}")]
    InvalidMove {
        /// Block being moved.
        block: NodeId,
        /// Requested parent.
        parent: NodeId,
        /// Why the move was rejected.
        reason: String,
    },

    /// Fewer than four move datoms were found for a position node.
    #[error("incomplete move operation for position {position}: found {found} of 4 datoms")]
    IncompleteMoveGroup {
        /// Position node id.
        position: NodeId,
        /// Number of datoms present in the group.
        found: usize,
    },

    /// A move's left pointer names neither a move group nor a known block.
    #[error("position {position} points left to unknown node {left}")]
    DanglingLeftReference {
        /// Position node id.
        position: NodeId,
        /// Unresolvable left pointer.
        left: NodeId,
    },

    /// A list reference points at an element that was never integrated.
    #[error("list has no element with id {0}")]
    UnknownReference(OpId),

    /// An element handle taken from a different, longer list.
    #[error("list has {len} elements, handle {index} is not one of them")]
    UnknownElementHandle {
        /// Arena index of the handle.
        index: usize,
        /// Number of slots in the list, the start sentinel included.
        len: usize,
    },

    /// An element with this id is already present in the list.
    #[error("list already contains element {0}")]
    DuplicateElement(OpId),

    /// Signature does not verify against the declared signer.
    #[error("signature verification failed for change signed by {signer}")]
    SignatureInvalid {
        /// Declared signer.
        signer: String,
    },

    /// The signing key does not belong to the change's declared signer.
    #[error("signer mismatch: change declares {declared}, key is {actual}")]
    SignerMismatch {
        /// Signer declared in the change.
        declared: String,
        /// Public half of the supplied key.
        actual: String,
    },

    /// Attempt to sign a change that already carries a signature.
    #[error("change is already signed")]
    AlreadySigned,

    /// Attempt to verify a change that carries no signature.
    #[error("change is not signed")]
    Unsigned,

    /// Bytes could not be decoded into the expected structure.
    #[error("malformed {what}: {reason}")]
    Malformed {
        /// What was being decoded.
        what: &'static str,
        /// Decoder message.
        reason: String,
    },

    /// A collaborator could not find the requested object.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Object category.
        kind: ObjectKind,
        /// Printable identifier.
        id: String,
    },

    /// `replay` was called on a projection that already holds state.
    #[error("document must be empty to replay existing state")]
    DoubleReplay,

    /// A mutation was attempted on a read-only document.
    #[error("document has no open draft")]
    NotEditable,

    /// Publishing a draft with no surviving datoms.
    #[error("draft has no datoms to publish")]
    EmptyDraft,

    /// A change's lamport time does not exceed one of its parents'.
    #[error("change {change} has lamport time {lamport}, parent {parent} has {parent_lamport}")]
    LamportViolation {
        /// Offending change.
        change: Cid,
        /// Its lamport time.
        lamport: u64,
        /// Parent it fails to exceed.
        parent: Cid,
        /// Parent's lamport time.
        parent_lamport: u64,
    },

    /// A change belongs to a different object than the one being assembled.
    #[error("change {change} belongs to object {found}, expected {expected}")]
    ObjectMismatch {
        /// Offending change.
        change: Cid,
        /// Object the DAG is for.
        expected: Cid,
        /// Object the change declares.
        found: Cid,
    },

    /// A node id could not be built from user input.
    #[error(transparent)]
    InvalidNodeId(#[from] NodeIdError),

    /// A version token could not be parsed.
    #[error("invalid version token: {0}")]
    InvalidVersion(String),
}

impl From<OrderError> for Error {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::Concurrent { a, b } => Self::ConcurrentOperations { a, b },
            OrderError::Equal(op) => Self::EqualOperations(op),
        }
    }
}

impl Error {
    /// Shorthand for a [`Error::Malformed`] value.
    pub(crate) fn malformed(what: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Malformed {
            what,
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a [`Error::NotFound`] value.
    pub(crate) fn not_found(kind: ObjectKind, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Return the machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::OutOfOrderOperation { .. } => ErrorCode::OutOfOrderOperation,
            Self::ConcurrentOperations { .. } => ErrorCode::ConcurrentOperations,
            Self::EqualOperations(_) => ErrorCode::EqualOperations,
            Self::InvalidMove { .. } => ErrorCode::InvalidMove,
            Self::IncompleteMoveGroup { .. } => ErrorCode::IncompleteMoveGroup,
            Self::DanglingLeftReference { .. } => ErrorCode::DanglingLeftReference,
            Self::UnknownReference(_) | Self::UnknownElementHandle { .. } => ErrorCode::UnknownReference,
            Self::DuplicateElement(_) => ErrorCode::DuplicateElement,
            Self::SignatureInvalid { .. } => ErrorCode::SignatureInvalid,
            Self::SignerMismatch { .. } => ErrorCode::SignerMismatch,
            Self::AlreadySigned => ErrorCode::AlreadySigned,
            Self::Unsigned => ErrorCode::Unsigned,
            Self::Malformed { .. } => ErrorCode::Malformed,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::DoubleReplay => ErrorCode::DoubleReplay,
            Self::NotEditable => ErrorCode::NotEditable,
            Self::EmptyDraft => ErrorCode::EmptyDraft,
            Self::LamportViolation { .. } => ErrorCode::LamportViolation,
            Self::ObjectMismatch { .. } => ErrorCode::ObjectMismatch,
            Self::InvalidNodeId(_) => ErrorCode::InvalidNodeId,
            Self::InvalidVersion(_) => ErrorCode::InvalidVersion,
        }
    }

    /// Whether a caller may continue after this error.
    ///
    /// Only rejected moves and missing objects are recoverable.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidMove { .. } | Self::NotFound { .. })
    }
}

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// See [`Error::OutOfOrderOperation`].
    OutOfOrderOperation,
    /// See [`Error::ConcurrentOperations`].
    ConcurrentOperations,
    /// See [`Error::EqualOperations`].
    EqualOperations,
    /// See [`Error::InvalidMove`].
    InvalidMove,
    /// See [`Error::IncompleteMoveGroup`].
    IncompleteMoveGroup,
    /// See [`Error::DanglingLeftReference`].
    DanglingLeftReference,
    /// See [`Error::UnknownReference`].
    UnknownReference,
    /// See [`Error::DuplicateElement`].
    DuplicateElement,
    /// See [`Error::SignatureInvalid`].
    SignatureInvalid,
    /// See [`Error::SignerMismatch`].
    SignerMismatch,
    /// See [`Error::AlreadySigned`].
    AlreadySigned,
    /// See [`Error::Unsigned`].
    Unsigned,
    /// See [`Error::Malformed`].
    Malformed,
    /// See [`Error::NotFound`].
    NotFound,
    /// See [`Error::DoubleReplay`].
    DoubleReplay,
    /// See [`Error::NotEditable`].
    NotEditable,
    /// See [`Error::EmptyDraft`].
    EmptyDraft,
    /// See [`Error::LamportViolation`].
    LamportViolation,
    /// See [`Error::ObjectMismatch`].
    ObjectMismatch,
    /// See [`Error::InvalidNodeId`].
    InvalidNodeId,
    /// See [`Error::InvalidVersion`].
    InvalidVersion,
}

impl ErrorCode {
    /// Return the stable string code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::OutOfOrderOperation => "E_OUT_OF_ORDER",
            Self::ConcurrentOperations => "E_CONCURRENT_OPS",
            Self::EqualOperations => "E_EQUAL_OPS",
            Self::InvalidMove => "E_INVALID_MOVE",
            Self::IncompleteMoveGroup => "E_INCOMPLETE_MOVE",
            Self::DanglingLeftReference => "E_DANGLING_LEFT",
            Self::UnknownReference => "E_UNKNOWN_REF",
            Self::DuplicateElement => "E_DUPLICATE_ELEMENT",
            Self::SignatureInvalid => "E_SIGNATURE_INVALID",
            Self::SignerMismatch => "E_SIGNER_MISMATCH",
            Self::AlreadySigned => "E_ALREADY_SIGNED",
            Self::Unsigned => "E_UNSIGNED",
            Self::Malformed => "E_MALFORMED",
            Self::NotFound => "E_NOT_FOUND",
            Self::DoubleReplay => "E_DOUBLE_REPLAY",
            Self::NotEditable => "E_NOT_EDITABLE",
            Self::EmptyDraft => "E_EMPTY_DRAFT",
            Self::LamportViolation => "E_LAMPORT",
            Self::ObjectMismatch => "E_OBJECT_MISMATCH",
            Self::InvalidNodeId => "E_NODE_ID",
            Self::InvalidVersion => "E_VERSION",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_moves_and_lookups_are_recoverable() {
        let invalid = Error::InvalidMove {
            block: NodeId::ROOT,
            parent: NodeId::TRASH,
            reason: "reserved".into(),
        };
        assert!(invalid.is_recoverable());
        assert!(Error::not_found(ObjectKind::Change, "bafy").is_recoverable());

        assert!(!Error::DoubleReplay.is_recoverable());
        assert!(!Error::AlreadySigned.is_recoverable());
        assert!(
            !Error::IncompleteMoveGroup {
                position: NodeId::ROOT,
                found: 3
            }
            .is_recoverable()
        );
    }

    #[test]
    fn order_errors_map_to_engine_variants() {
        let op = OpId::ZERO;
        let err: Error = OrderError::Equal(op).into();
        assert_eq!(err.code(), ErrorCode::EqualOperations);

        let err: Error = OrderError::Concurrent { a: op, b: op }.into();
        assert_eq!(err.code(), ErrorCode::ConcurrentOperations);
    }

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(ErrorCode::NotFound.to_string(), "E_NOT_FOUND");
        assert_eq!(Error::DoubleReplay.code().code(), "E_DOUBLE_REPLAY");
    }

    #[test]
    fn display_includes_context() {
        let err = Error::IncompleteMoveGroup {
            position: NodeId::from_str_id("pos1").expect("valid id"),
            found: 2,
        };
        assert_eq!(
            err.to_string(),
            "incomplete move operation for position pos1: found 2 of 4 datoms"
        );
    }
}
