//! Event system for UI decoupling.
//!
//! Allows CLI/TUI/GUI layers to follow a worker session without tight
//! coupling to the protocol routines. Events carry no card payload beyond
//! what is listed here; the caller reads the shared `ProtocolRecord` after
//! a terminal event instead.

use crate::card::CardType;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted by a worker session, in protocol-completion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NfcEvent {
    /// A tag was activated and classified. Emitted once per presence
    /// transition, not once per poll.
    CardDetected { card_type: CardType },
    /// The tag left the field. Debounced: one event per transition.
    CardRemoved,
    /// Dictionary attack moved to the next sector.
    NewSector { sector: u8 },
    /// Key A recovered for a sector.
    FoundKeyA { sector: u8 },
    /// Key B recovered for a sector.
    FoundKeyB { sector: u8 },
    /// Dictionary progress: `current` of `total` keys trialed.
    NewDictKeyBatch { current: usize, total: usize },
    /// Raw bytes a reader sent to an emulated tag. Transient: valid only
    /// for the duration of the callback.
    ReaderRequest { data: Vec<u8> },
    /// Password a reader tried against an emulated tag. Transient.
    PasswordObserved { password: [u8; 4] },
    /// The in-memory emulated image was mutated; the caller should
    /// refresh its shadow copy.
    DataChanged,
    /// Session finished with all required data obtained.
    Success,
    /// Card present but the required data was unobtainable.
    Fail,
    /// Session ended by a caller stop request.
    Aborted,
    /// No dictionary resource could be opened.
    NoDictFound,
    /// Log message.
    Log { level: LogLevel, message: String },
}

/// Observer trait for receiving worker events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait NfcObserver: Send + Sync {
    /// Called when an event occurs, on the worker thread.
    fn on_event(&self, event: &NfcEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl NfcObserver for NullObserver {
    fn on_event(&self, _event: &NfcEvent) {
        // Do nothing
    }
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl NfcObserver for TracingObserver {
    fn on_event(&self, event: &NfcEvent) {
        match event {
            NfcEvent::CardDetected { card_type } => {
                tracing::info!(card_type = %card_type, "Card detected");
            }
            NfcEvent::CardRemoved => {
                tracing::info!("Card removed");
            }
            NfcEvent::NewSector { sector } => {
                tracing::info!(sector = sector, "Scanning sector");
            }
            NfcEvent::FoundKeyA { sector } => {
                tracing::info!(sector = sector, "Found key A");
            }
            NfcEvent::FoundKeyB { sector } => {
                tracing::info!(sector = sector, "Found key B");
            }
            NfcEvent::NewDictKeyBatch { current, total } => {
                tracing::debug!(current = current, total = total, "Dictionary progress");
            }
            NfcEvent::ReaderRequest { data } => {
                tracing::debug!(len = data.len(), "Reader request");
            }
            NfcEvent::PasswordObserved { password } => {
                tracing::info!(
                    password = %password.iter().map(|b| format!("{:02X}", b)).collect::<String>(),
                    "Reader password observed"
                );
            }
            NfcEvent::DataChanged => {
                tracing::info!("Emulated image changed");
            }
            NfcEvent::Success => {
                tracing::info!("Session complete");
            }
            NfcEvent::Fail => {
                tracing::warn!("Session failed");
            }
            NfcEvent::Aborted => {
                tracing::info!("Session aborted");
            }
            NfcEvent::NoDictFound => {
                tracing::error!("No key dictionary found");
            }
            NfcEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}
