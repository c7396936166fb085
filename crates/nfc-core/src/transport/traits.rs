//! Radio front-end abstraction.
//!
//! Defines the `NfcTransport` trait the worker routines drive, allowing
//! different implementations (pcsc, mock, a platform HAL).

use std::time::Duration;

use thiserror::Error;

use crate::card::{TagCandidate, TagIdentity};
use crate::card::classic::{MfClassicKey, MfClassicKeyType};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NfcError {
    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Response overruns {capacity}-byte buffer")]
    Overrun { capacity: usize },

    #[error("Authentication failed")]
    AuthFailed,

    #[error("Operation aborted")]
    Aborted,

    #[error("Operation not supported by this transport")]
    NotSupported,

    #[error("Failed to open transport: {0}")]
    OpenFailed(String),
}

/// Reply callback for one emulation session. Invoked on every
/// reader-initiated exchange; `None` means "no response" (mute).
pub trait EmulationResponder {
    fn respond(&mut self, rx: &[u8]) -> Option<Vec<u8>>;
}

impl<F: FnMut(&[u8]) -> Option<Vec<u8>>> EmulationResponder for F {
    fn respond(&mut self, rx: &[u8]) -> Option<Vec<u8>> {
        self(rx)
    }
}

/// Abstract radio front end.
///
/// This trait enables:
/// - Production implementation over PC/SC contactless readers
/// - Mock implementation for unit testing
/// - A platform radio HAL on embedded targets
///
/// All blocking calls honor a short timeout so the worker's cooperative
/// stop check runs with bounded latency.
pub trait NfcTransport: Send + Sync {
    /// One bounded activation poll. An empty vec means no tag in field;
    /// a previously activated tag is dropped first.
    fn detect(&self, timeout: Duration) -> Result<Vec<TagCandidate>, NfcError>;

    /// Exchange one frame with the activated tag.
    fn exchange(&self, tx: &[u8]) -> Result<Vec<u8>, NfcError>;

    /// Crypto1 sector authentication. This is a radio-HAL capability;
    /// it cannot be expressed over plain `exchange`. A failure destroys
    /// the card session: re-activate before the next attempt.
    fn mf_authenticate(
        &self,
        block: u8,
        key: &MfClassicKey,
        key_type: MfClassicKeyType,
    ) -> Result<(), NfcError>;

    /// Present `identity` to the field and serve one reader session
    /// through `responder`, or time out if no reader appears.
    fn listen(
        &self,
        identity: &TagIdentity,
        responder: &mut dyn EmulationResponder,
        timeout: Duration,
    ) -> Result<(), NfcError>;

    /// Drop the RF field / card session.
    fn deactivate(&self);

    /// Unblock any in-flight blocking call. Used by the worker's stop
    /// path; subsequent calls fail with `Aborted` until `deactivate`
    /// resets the latch.
    fn abort(&self);
}
