//! Error taxonomy.
//!
//! Transport and oracle failures are raised as [`LedgerError`] and
//! [`OracleError`] at the collaborator boundary and classified into
//! [`QuestError`] exactly once, through the `From` impls below.

use fhe_quest_protocol::ProtocolError;

/// EIP-1193 "user rejected request" provider code.
pub const USER_REJECTED_CODE: i64 = 4001;

/// Failures reported by the contract transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("call exception: {reason}")]
    CallException { reason: String },

    #[error("insufficient funds for value + gas")]
    InsufficientFunds,

    #[error("provider error{}: {message}", code_suffix(.code))]
    Provider { code: Option<i64>, message: String },

    #[error("could not decode contract response: {0}")]
    Decode(String),
}

fn code_suffix(code: &Option<i64>) -> String {
    code.map(|c| format!(" {c}")).unwrap_or_default()
}

impl From<ProtocolError> for LedgerError {
    fn from(err: ProtocolError) -> Self {
        LedgerError::Decode(err.to_string())
    }
}

/// Failures reported by the FHE encryption oracle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("oracle instance is not initialized")]
    NotInitialized,

    #[error("oracle call failed: {0}")]
    Call(String),

    #[error("malformed oracle response: {0}")]
    Malformed(String),
}

/// Everything an attempt, a refresh or the creator flow can fail with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuestError {
    #[error("transaction rejected by user")]
    UserRejected,

    #[error("insufficient ETH balance")]
    InsufficientFunds,

    #[error("contract call failed: {0}")]
    TransactionReverted(String),

    #[error("encryption oracle is not initialized")]
    EncryptionUnavailable,

    #[error("encryption failed: {0}")]
    EncryptionFailure(String),

    #[error("wrong network: expected chain {expected}, wallet is on {actual}")]
    NetworkMismatch { expected: u64, actual: u64 },

    #[error("a decryption is still pending; wait for the current attempt to finish")]
    AttemptAlreadyPending,

    #[error("no oracle result arrived in time; a miss was assumed without on-chain confirmation")]
    OracleTimeout,

    #[error(transparent)]
    InvalidCoordinate(#[from] ProtocolError),

    #[error("no coordinate selected")]
    NoCoordinateSelected,

    #[error("no active game")]
    GameInactive,

    #[error("treasure coordinates have not been encrypted yet")]
    MissingEncryptedCoordinates,

    #[error("no wallet session")]
    NotConnected,

    #[error("attempt cancelled")]
    Cancelled,

    /// Provider failure that is none of the classified cases above.
    #[error("ledger error: {0}")]
    Ledger(String),
}

impl From<LedgerError> for QuestError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::CallException { reason } => QuestError::TransactionReverted(reason),
            LedgerError::InsufficientFunds => QuestError::InsufficientFunds,
            LedgerError::Provider { code, message } => {
                if code == Some(USER_REJECTED_CODE)
                    || message.to_ascii_lowercase().contains("user rejected")
                {
                    QuestError::UserRejected
                } else {
                    QuestError::Ledger(message)
                }
            }
            LedgerError::Decode(message) => {
                QuestError::TransactionReverted(format!("unexpected contract response: {message}"))
            }
        }
    }
}

impl From<OracleError> for QuestError {
    fn from(err: OracleError) -> Self {
        match err {
            OracleError::NotInitialized => QuestError::EncryptionUnavailable,
            OracleError::Call(message) | OracleError::Malformed(message) => {
                QuestError::EncryptionFailure(message)
            }
        }
    }
}
