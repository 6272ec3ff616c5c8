//! Error types for the ZUSD stability pool.
//!
//! Errors fall into three groups: invariant guards (fatal, the operation is
//! aborted before anything is committed), precondition violations (reported
//! to the caller, state unchanged) and infrastructure failures (storage,
//! serialization, collaborators, locks).

use thiserror::Error;

/// Result type alias for stability pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the stability pool
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ═══════════════════════════════════════════════════════════════════
    // Deposit Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Amount is zero
    #[error("Amount cannot be zero")]
    ZeroAmount,

    /// Withdrawal larger than the compounded deposit (reject policy only)
    #[error("Withdrawal of {requested} exceeds compounded deposit {available}")]
    WithdrawalExceedsDeposit {
        /// Requested amount (raw units)
        requested: u128,
        /// Compounded deposit (raw units)
        available: u128,
    },

    /// Withdrawals are blocked while liquidatable lines of credit exist
    #[error("Withdrawal blocked: undercollateralized lines of credit are pending liquidation")]
    UndercollateralizedLinesPending,

    /// Depositor has no active line of credit to receive collateral gains
    #[error("Depositor {0} has no active line of credit")]
    NoActiveLineOfCredit(String),

    // ═══════════════════════════════════════════════════════════════════
    // Front End Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Front end is already registered
    #[error("Front end {0} is already registered")]
    FrontEndAlreadyRegistered(String),

    /// Tag does not name a registered front end
    #[error("Front end {0} is not registered")]
    FrontEndNotRegistered(String),

    /// A registered front end tried to deposit
    #[error("Front end {0} cannot hold a deposit")]
    FrontEndCannotDeposit(String),

    /// An account with a live deposit tried to register as a front end
    #[error("Depositor {0} cannot register as a front end")]
    DepositorCannotRegister(String),

    /// Kickback rate outside [0, 1]
    #[error("Kickback rate {0} is outside [0, 1e18]")]
    InvalidKickbackRate(u128),

    // ═══════════════════════════════════════════════════════════════════
    // Offset Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Debt to offset exceeds the pooled amount
    #[error("Debt to offset {debt} exceeds pooled amount {pooled}")]
    OffsetExceedsPool {
        /// Debt passed to offset (raw units)
        debt: u128,
        /// Total pooled amount (raw units)
        pooled: u128,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Authorization Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Not authorized to perform this action
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    // ═══════════════════════════════════════════════════════════════════
    // Validation Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Invalid input parameter
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Overflow in calculation
    #[error("Arithmetic overflow in {operation}")]
    Overflow {
        /// Operation that overflowed
        operation: String,
    },

    /// Underflow in calculation
    #[error("Arithmetic underflow in {operation}")]
    Underflow {
        /// Operation that underflowed
        operation: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Invariant Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Invariant violation detected
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    // ═══════════════════════════════════════════════════════════════════
    // Collaborator Errors
    // ═══════════════════════════════════════════════════════════════════

    /// An external collaborator (token ledger, custody, issuance) failed
    #[error("Collaborator {name} failed: {reason}")]
    Collaborator {
        /// Collaborator name
        name: String,
        /// Failure description
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Serialization Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ═══════════════════════════════════════════════════════════════════
    // Internal Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Lock acquisition failed
    #[error("Failed to acquire lock")]
    Lock,

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Returns true if the caller can fix the request and retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ZeroAmount
                | Error::WithdrawalExceedsDeposit { .. }
                | Error::UndercollateralizedLinesPending
                | Error::NoActiveLineOfCredit(_)
                | Error::OffsetExceedsPool { .. }
                | Error::InvalidKickbackRate(_)
        )
    }

    /// Returns true if this is a critical error requiring immediate attention
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Error::InvariantViolation(_)
                | Error::Internal(_)
                | Error::Overflow { .. }
                | Error::Underflow { .. }
                | Error::Collaborator { .. }
        )
    }

    /// Returns true for precondition violations (request rejected, state untouched)
    pub fn is_precondition(&self) -> bool {
        (1000..5000).contains(&self.code())
    }

    /// Returns the error code for external systems
    pub fn code(&self) -> u32 {
        match self {
            // Deposit errors: 1xxx
            Error::ZeroAmount => 1001,
            Error::WithdrawalExceedsDeposit { .. } => 1002,
            Error::UndercollateralizedLinesPending => 1003,
            Error::NoActiveLineOfCredit(_) => 1004,

            // Front end errors: 2xxx
            Error::FrontEndAlreadyRegistered(_) => 2001,
            Error::FrontEndNotRegistered(_) => 2002,
            Error::FrontEndCannotDeposit(_) => 2003,
            Error::DepositorCannotRegister(_) => 2004,
            Error::InvalidKickbackRate(_) => 2005,

            // Offset errors: 3xxx
            Error::OffsetExceedsPool { .. } => 3001,

            // Authorization errors: 4xxx
            Error::Unauthorized(_) => 4001,

            // Validation errors: 5xxx
            Error::InvalidParameter { .. } => 5001,
            Error::Overflow { .. } => 5003,
            Error::Underflow { .. } => 5004,

            // Invariant errors: 6xxx
            Error::InvariantViolation(_) => 6004,

            // Collaborator errors: 8xxx
            Error::Collaborator { .. } => 8001,

            // Serialization errors: 7xxx
            Error::Serialization(_) => 7001,
            Error::Deserialization(_) => 7002,

            // Internal errors: 9xxx
            Error::Internal(_) => 9001,
            Error::Lock => 9002,
            Error::Storage(_) => 9003,
        }
    }

    /// Shorthand for a collaborator failure
    pub fn collaborator(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Collaborator {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
