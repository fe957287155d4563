//! Errors surfaced by every store operation.

/// Failure kinds for write, read, sync and balance operations.
///
/// Only [`StoreError::PayloadTooLarge`] is recoverable: retry with a shorter
/// payload or fewer extra outputs. Everything else ends the operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not following address {0}")]
    AddressNotFollowed(String),
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("Data is too long by {excess_bytes} bytes (max payload {max_payload_len})")]
    PayloadTooLarge {
        excess_bytes: usize,
        max_payload_len: usize,
    },
    #[error("Transaction failed sanity check: {0}")]
    SanityCheckFailed(String),
    #[error("Master key decryption failed")]
    DecryptionFailed,
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Network: {0}")]
    Network(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Key derivation: {0}")]
    KeyDerivation(String),
    #[error("Decode: {0}")]
    Decode(String),
    #[error("Invalid option: {0}")]
    InvalidOption(String),
}

impl StoreError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StoreError::PayloadTooLarge { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
