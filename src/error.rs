//! Error taxonomy for the decoder and the lifter.
//!
//! Errors never escape [`crate::lifter::Lifter::lift_slice`] — they are
//! captured in-band on the returned [`crate::ir::Function`] instead (see
//! `spec.md` §7). The types here exist so that the capture points have
//! something precise to store.

use core::fmt;

/// Failure to decode a single instruction out of a [`crate::cell::Slice`].
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// No declared prefix matched the bits at the cursor.
    PrefixNotFound,
    /// An operand could not be read (insufficient bits or refs).
    OperandLoad {
        /// Name of the operand declaration that failed to load.
        operand: String,
        /// Human-readable cause.
        cause: String,
    },
    /// A `subslice` operand declared a completion tag but none was found.
    CompletionTagMissing,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::PrefixNotFound => write!(f, "no instruction prefix matched"),
            DecodeError::OperandLoad { operand, cause } => {
                write!(f, "failed to load operand `{operand}`: {cause}")
            }
            DecodeError::CompletionTagMissing => {
                write!(f, "completion tag missing from subslice")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Failure while symbolically applying an instruction's stack effects.
#[derive(Debug, Clone, PartialEq)]
pub enum LiftError {
    /// The symbolic stack did not have enough entries; `depth` is the
    /// number of missing entries below the current bottom. Retryable.
    StackUnderflow {
        /// Number of missing entries.
        depth: usize,
    },
    /// A conditional-alignment guard was left unresolved at function exit,
    /// or a pop was requested that would collapse it. Not retryable.
    GuardUnresolved,
    /// A stack-input/output shape this lifter cannot handle (dynamic
    /// array lengths, nested conditionals inside arrays, an unknown
    /// branch source). Not retryable.
    UnsupportedOperand(String),
    /// The instruction spec was missing value-flow data it needed, or
    /// declared an unknown stack-entry kind. Not retryable.
    SpecInconsistent(String),
    /// More than 10 underflow retries were attempted on one instruction.
    RetryLimitExceeded,
}

impl LiftError {
    /// Whether the lifter should retry the instruction that raised this
    /// error (by synthesizing arguments) rather than abort the function.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LiftError::StackUnderflow { .. })
    }
}

impl fmt::Display for LiftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiftError::StackUnderflow { depth } => {
                write!(f, "stack underflow: missing {depth} entries")
            }
            LiftError::GuardUnresolved => write!(f, "conditional-alignment guard unresolved"),
            LiftError::UnsupportedOperand(what) => write!(f, "unsupported: {what}"),
            LiftError::SpecInconsistent(what) => write!(f, "inconsistent instruction spec: {what}"),
            LiftError::RetryLimitExceeded => {
                write!(f, "exceeded underflow retry limit for one instruction")
            }
        }
    }
}

impl std::error::Error for LiftError {}
