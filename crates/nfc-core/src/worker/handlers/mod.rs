//! Session routines, one per worker state.
//!
//! This module is split into submodules by card family:
//! - `detect`: detection and generic-read dispatch
//! - `classic`: Mifare Classic dictionary key recovery
//! - `ultralight`: Ultralight/NTAG paged read
//! - `desfire`: DESFire application enumeration
//! - `emv`: EMV payment applet read
//! - `emulate`: tag-side emulation loops

mod classic;
mod desfire;
mod detect;
mod emulate;
mod emv;
mod ultralight;

use std::sync::Mutex;
use std::time::Duration;

use crate::card::{ProtocolRecord, TagCandidate, classify};
use crate::events::{LogLevel, NfcEvent, NfcObserver};
use crate::transport::{NfcError, NfcTransport};
use crate::worker::WorkerConfig;
use crate::worker::machine::WorkerState;

pub use emulate::MfUltralightEmulator;

/// Terminal outcome of one session routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineOutcome {
    /// All required data obtained.
    Success,
    /// Card seen, required data unobtainable.
    Fail,
    /// Caller requested stop.
    Aborted,
    /// No key dictionary could be opened.
    NoDictFound,
}

/// Routine context containing all session resources.
pub struct RoutineContext<'a, O: NfcObserver> {
    pub transport: &'a dyn NfcTransport,
    pub observer: &'a O,
    pub state: &'a Mutex<WorkerState>,
    pub config: &'a WorkerConfig,
    pub result: &'a Mutex<ProtocolRecord>,
    card_present: bool,
}

impl<'a, O: NfcObserver> RoutineContext<'a, O> {
    pub fn new(
        transport: &'a dyn NfcTransport,
        observer: &'a O,
        state: &'a Mutex<WorkerState>,
        config: &'a WorkerConfig,
        result: &'a Mutex<ProtocolRecord>,
    ) -> Self {
        Self {
            transport,
            observer,
            state,
            config,
            result,
            card_present: false,
        }
    }

    pub(crate) fn emit(&self, event: NfcEvent) {
        self.observer.on_event(&event);
    }

    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(NfcEvent::Log {
            level,
            message: message.into(),
        });
    }

    /// Whether the caller still wants this session.
    pub(crate) fn running(&self) -> bool {
        *self.state.lock().unwrap() != WorkerState::Stop
    }

    pub(crate) fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.config.poll_timeout_ms)
    }

    pub(crate) fn listen_timeout(&self) -> Duration {
        Duration::from_millis(self.config.listen_timeout_ms)
    }

    /// One activation poll with presence debouncing. Presence transitions
    /// emit `CardDetected`/`CardRemoved` exactly once each; only an abort
    /// surfaces as an error.
    pub(crate) fn poll(&mut self) -> Result<Option<TagCandidate>, NfcError> {
        match self.transport.detect(self.poll_timeout()) {
            Ok(candidates) => {
                if let Some(candidate) = candidates.into_iter().next() {
                    self.mark_present(&candidate);
                    Ok(Some(candidate))
                } else {
                    self.mark_absent();
                    Ok(None)
                }
            }
            Err(NfcError::Timeout { .. }) => {
                self.mark_absent();
                Ok(None)
            }
            Err(NfcError::Aborted) => Err(NfcError::Aborted),
            Err(e) => {
                self.log(LogLevel::Warn, format!("Detection error: {}", e));
                self.mark_absent();
                Ok(None)
            }
        }
    }

    fn mark_present(&mut self, candidate: &TagCandidate) {
        if !self.card_present {
            self.card_present = true;
            self.emit(NfcEvent::CardDetected {
                card_type: classify(candidate),
            });
        }
    }

    fn mark_absent(&mut self) {
        if self.card_present {
            self.card_present = false;
            self.emit(NfcEvent::CardRemoved);
        }
    }
}

/// Run the routine for one worker state to its terminal outcome.
pub fn run_routine<O: NfcObserver>(
    state: WorkerState,
    ctx: &mut RoutineContext<'_, O>,
) -> RoutineOutcome {
    match state {
        WorkerState::Detect => detect::run_detect(ctx),
        WorkerState::ReadGeneric => detect::run_read_generic(ctx),
        WorkerState::ReadClassicDictAttack => classic::run_dict_attack(ctx),
        WorkerState::ReadUltralight => ultralight::run_read(ctx),
        WorkerState::ReadDesfire => desfire::run_read(ctx),
        WorkerState::ReadEmv => emv::run_read(ctx),
        WorkerState::EmulateUid | WorkerState::EmulateClassic => emulate::run_emulate_raw(ctx),
        WorkerState::EmulateUltralight => emulate::run_emulate_ultralight(ctx),
        WorkerState::EmulateApdu => emulate::run_emulate_apdu(ctx),
        // Not startable; guarded at the worker API.
        WorkerState::Ready | WorkerState::Stop => RoutineOutcome::Aborted,
    }
}
