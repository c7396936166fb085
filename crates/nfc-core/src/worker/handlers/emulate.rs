//! Tag-side emulation loops.
//!
//! Each routine takes the identity (and, for Ultralight, the page image)
//! from the shared result record and serves reader sessions until the
//! caller stops the worker. `ReaderRequest` and `PasswordObserved` are
//! emitted from inside the listen callback and are only valid for its
//! duration.

use tracing::debug;

use super::{RoutineContext, RoutineOutcome};
use crate::card::ultralight::MfUltralightData;
use crate::card::{ProtocolRecord, TagIdentity};
use crate::events::{LogLevel, NfcEvent, NfcObserver};
use crate::protocol::constants::*;
use crate::transport::{EmulationResponder, NfcError};

/// Present a stored identity and stay mute at the command layer. Covers
/// both plain UID emulation and Classic images, whose Crypto1 exchange
/// the radio handles below the frame boundary.
pub fn run_emulate_raw<O: NfcObserver>(ctx: &mut RoutineContext<'_, O>) -> RoutineOutcome {
    let Some(identity) = stored_identity(ctx) else {
        return RoutineOutcome::Fail;
    };
    let observer = ctx.observer;
    let mut responder = |rx: &[u8]| -> Option<Vec<u8>> {
        observer.on_event(&NfcEvent::ReaderRequest { data: rx.to_vec() });
        None
    };
    serve_loop(ctx, &identity, &mut responder)
}

/// Answer ISO-DEP readers at the APDU layer with "file not found".
pub fn run_emulate_apdu<O: NfcObserver>(ctx: &mut RoutineContext<'_, O>) -> RoutineOutcome {
    let Some(identity) = stored_identity(ctx) else {
        return RoutineOutcome::Fail;
    };
    let observer = ctx.observer;
    let mut responder = |rx: &[u8]| {
        observer.on_event(&NfcEvent::ReaderRequest { data: rx.to_vec() });
        Some(vec![0x6A, 0x82])
    };
    serve_loop(ctx, &identity, &mut responder)
}

/// Serve a stored Ultralight image, including writes and password
/// authentication. Mutations are pushed back into the result record at
/// session boundaries.
pub fn run_emulate_ultralight<O: NfcObserver>(ctx: &mut RoutineContext<'_, O>) -> RoutineOutcome {
    let (identity, data) = match &*ctx.result.lock().unwrap() {
        ProtocolRecord::MifareUltralight { identity, data } => (identity.clone(), data.clone()),
        _ => {
            ctx.log(LogLevel::Error, "No Ultralight image loaded for emulation");
            return RoutineOutcome::Fail;
        }
    };
    let mut emulator = MfUltralightEmulator::new(data);
    let observer = ctx.observer;

    while ctx.running() {
        let served = {
            let mut responder = |rx: &[u8]| emulator.respond(rx, observer);
            ctx.transport
                .listen(&identity, &mut responder, ctx.listen_timeout())
        };
        match served {
            Ok(()) | Err(NfcError::Timeout { .. }) => {}
            Err(NfcError::Aborted) => return RoutineOutcome::Aborted,
            Err(NfcError::NotSupported) => {
                ctx.log(LogLevel::Error, "Transport cannot emulate");
                return RoutineOutcome::Fail;
            }
            Err(e) => ctx.log(LogLevel::Warn, format!("Listen error: {}", e)),
        }
        if emulator.take_dirty() {
            if let ProtocolRecord::MifareUltralight { data, .. } =
                &mut *ctx.result.lock().unwrap()
            {
                *data = emulator.data().clone();
            }
            ctx.emit(NfcEvent::DataChanged);
        }
    }
    RoutineOutcome::Aborted
}

fn stored_identity<O: NfcObserver>(ctx: &RoutineContext<'_, O>) -> Option<TagIdentity> {
    let identity = ctx.result.lock().unwrap().identity().cloned();
    if identity.is_none() {
        ctx.log(LogLevel::Error, "No tag image loaded for emulation");
    }
    identity
}

fn serve_loop<O: NfcObserver>(
    ctx: &RoutineContext<'_, O>,
    identity: &TagIdentity,
    responder: &mut dyn EmulationResponder,
) -> RoutineOutcome {
    debug!(uid = %identity.uid_hex(), "Emulation started");
    while ctx.running() {
        match ctx.transport.listen(identity, responder, ctx.listen_timeout()) {
            Ok(()) | Err(NfcError::Timeout { .. }) => {}
            Err(NfcError::Aborted) => return RoutineOutcome::Aborted,
            Err(NfcError::NotSupported) => {
                ctx.log(LogLevel::Error, "Transport cannot emulate");
                return RoutineOutcome::Fail;
            }
            Err(e) => ctx.log(LogLevel::Warn, format!("Listen error: {}", e)),
        }
    }
    RoutineOutcome::Aborted
}

/// Command-level Ultralight card simulator driven by reader frames.
pub struct MfUltralightEmulator {
    data: MfUltralightData,
    authenticated: bool,
    dirty: bool,
}

impl MfUltralightEmulator {
    pub fn new(data: MfUltralightData) -> Self {
        Self {
            data,
            authenticated: false,
            dirty: false,
        }
    }

    pub fn data(&self) -> &MfUltralightData {
        &self.data
    }

    /// Whether the image changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Password page for EV1/NTAG layouts: second page from the end.
    fn stored_password(&self) -> [u8; 4] {
        self.data.pages[self.data.pages.len() - 2]
    }

    /// PACK bytes live in the first half of the last page.
    fn stored_pack(&self) -> [u8; 2] {
        let page = self.data.pages[self.data.pages.len() - 1];
        [page[0], page[1]]
    }

    fn has_password(&self) -> bool {
        // Pre-EV1 chips have no PWD_AUTH and no config pages.
        self.data.card_type.supports_counters()
    }

    /// AUTH0 byte of the config page: first page the password protects.
    fn protected_from(&self) -> usize {
        if !self.has_password() {
            return self.data.pages.len();
        }
        self.data.pages[self.data.pages.len() - 4][3] as usize
    }

    fn readable(&self, page: usize) -> bool {
        self.authenticated || page < self.protected_from()
    }

    /// Handle one reader frame. `None` leaves the reader unanswered,
    /// which a real tag expresses as a NAK timeout.
    pub fn respond(&mut self, rx: &[u8], observer: &dyn NfcObserver) -> Option<Vec<u8>> {
        observer.on_event(&NfcEvent::ReaderRequest { data: rx.to_vec() });
        let total = self.data.pages.len();
        match *rx.first()? {
            MF_UL_READ if rx.len() == 2 => {
                // Four pages, wrapping around the end like the silicon.
                let start = rx[1] as usize;
                if start >= total || !self.readable(start) {
                    return None;
                }
                let mut out = Vec::with_capacity(16);
                for i in 0..MF_UL_READ_PAGES {
                    out.extend_from_slice(&self.data.pages[(start + i) % total]);
                }
                Some(out)
            }
            MF_UL_FAST_READ if rx.len() == 3 => {
                let (start, end) = (rx[1] as usize, rx[2] as usize);
                if start > end || end >= total || !self.readable(end) {
                    return None;
                }
                let mut out = Vec::with_capacity((end - start + 1) * 4);
                for page in start..=end {
                    out.extend_from_slice(&self.data.pages[page]);
                }
                Some(out)
            }
            MF_UL_WRITE if rx.len() == 6 => {
                let page = rx[1] as usize;
                if page >= total {
                    return None;
                }
                self.data.pages[page].copy_from_slice(&rx[2..6]);
                self.dirty = true;
                // ACK nibble.
                Some(vec![0x0A])
            }
            MF_UL_PWD_AUTH if rx.len() == 5 => {
                let mut password = [0u8; 4];
                password.copy_from_slice(&rx[1..5]);
                observer.on_event(&NfcEvent::PasswordObserved { password });
                if self.has_password() && password == self.stored_password() {
                    self.authenticated = true;
                    Some(self.stored_pack().to_vec())
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::super::testing::RecordingObserver;
    use super::*;
    use crate::card::ultralight::MfUltralightType;
    use crate::transport::{MockNfc, NfcTransport};
    use crate::worker::machine::WorkerState;
    use crate::worker::{NfcWorker, WorkerConfig};

    fn ntag213_image() -> MfUltralightData {
        let mut data = MfUltralightData::new(MfUltralightType::Ntag213, None);
        for (i, page) in data.pages.iter_mut().enumerate() {
            *page = [i as u8; 4];
        }
        let total = data.pages.len();
        // AUTH0 0xFF: the password protects nothing.
        data.pages[total - 4] = [0x04, 0x00, 0x00, 0xFF];
        data.pages[total - 2] = [0xCA, 0xFE, 0xBA, 0xBE];
        data.pages[total - 1] = [0x80, 0x80, 0x00, 0x00];
        data
    }

    #[test]
    fn test_emulated_write_flows_back_into_record() {
        let mock = Arc::new(MockNfc::with_ultralight(&[0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]));
        let identity = mock
            .detect(Duration::from_millis(10))
            .unwrap()
            .remove(0)
            .identity;
        mock.queue_listen_session(vec![vec![MF_UL_WRITE, 0x06, 0xDE, 0xAD, 0xBE, 0xEF]]);

        let observer = Arc::new(RecordingObserver::new());
        let transport: Arc<MockNfc> = Arc::clone(&mock);
        let mut worker = NfcWorker::with_observer(transport, WorkerConfig::default(), observer.clone());
        let result = Arc::new(Mutex::new(ProtocolRecord::MifareUltralight {
            identity,
            data: ntag213_image(),
        }));

        worker
            .start(WorkerState::EmulateUltralight, result.clone())
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        worker.stop();

        // The served session mutated the image: the record was refreshed
        // and the caller was told to re-shadow it.
        assert_eq!(observer.count(|e| matches!(e, NfcEvent::DataChanged)), 1);
        assert!(observer.count(|e| matches!(e, NfcEvent::ReaderRequest { .. })) >= 1);
        match &*result.lock().unwrap() {
            ProtocolRecord::MifareUltralight { data, .. } => {
                assert_eq!(data.pages[6], [0xDE, 0xAD, 0xBE, 0xEF]);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_read_wraps_around() {
        let observer = RecordingObserver::new();
        let mut emulator = MfUltralightEmulator::new(ntag213_image());
        let total = emulator.data().pages.len();

        let out = emulator.respond(&[MF_UL_READ, (total - 1) as u8], &observer).unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(&out[0..4], &emulator.data().pages[total - 1]);
        assert_eq!(&out[4..8], &emulator.data().pages[0]);
        assert_eq!(
            observer.count(|e| matches!(e, NfcEvent::ReaderRequest { .. })),
            1
        );
    }

    #[test]
    fn test_write_marks_dirty() {
        let observer = RecordingObserver::new();
        let mut emulator = MfUltralightEmulator::new(ntag213_image());
        assert!(!emulator.take_dirty());

        let out = emulator.respond(&[MF_UL_WRITE, 0x04, 0xDE, 0xAD, 0xBE, 0xEF], &observer);
        assert_eq!(out, Some(vec![0x0A]));
        assert_eq!(emulator.data().pages[4], [0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(emulator.take_dirty());
        assert!(!emulator.take_dirty());
    }

    #[test]
    fn test_password_observed_and_checked() {
        let observer = RecordingObserver::new();
        let mut emulator = MfUltralightEmulator::new(ntag213_image());

        // Wrong password: observed, not answered.
        let out = emulator.respond(&[MF_UL_PWD_AUTH, 0x00, 0x00, 0x00, 0x00], &observer);
        assert_eq!(out, None);
        // Right password: PACK comes back.
        let out = emulator.respond(&[MF_UL_PWD_AUTH, 0xCA, 0xFE, 0xBA, 0xBE], &observer);
        assert_eq!(out, Some(vec![0x80, 0x80]));
        assert_eq!(
            observer.count(|e| matches!(e, NfcEvent::PasswordObserved { .. })),
            2
        );
    }

    #[test]
    fn test_password_window_gates_reads() {
        let observer = RecordingObserver::new();
        let mut image = ntag213_image();
        let total = image.pages.len();
        // Protect everything from page 16 up.
        image.pages[total - 4][3] = 16;
        let mut emulator = MfUltralightEmulator::new(image);

        assert_eq!(emulator.respond(&[MF_UL_READ, 16], &observer), None);
        assert_eq!(emulator.respond(&[MF_UL_FAST_READ, 0x00, 20], &observer), None);
        assert!(emulator.respond(&[MF_UL_READ, 0x04], &observer).is_some());

        let out = emulator.respond(&[MF_UL_PWD_AUTH, 0xCA, 0xFE, 0xBA, 0xBE], &observer);
        assert_eq!(out, Some(vec![0x80, 0x80]));
        assert!(emulator.respond(&[MF_UL_READ, 16], &observer).is_some());
    }

    #[test]
    fn test_out_of_range_reads_are_mute() {
        let observer = RecordingObserver::new();
        let mut emulator = MfUltralightEmulator::new(ntag213_image());
        let total = emulator.data().pages.len() as u8;
        assert_eq!(emulator.respond(&[MF_UL_READ, total], &observer), None);
        assert_eq!(
            emulator.respond(&[MF_UL_FAST_READ, 0x05, total], &observer),
            None
        );
    }
}
