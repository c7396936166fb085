//! DESFire enumeration routine.
//!
//! Walks the free (unauthenticated) surface of a DESFire card with
//! native commands: version, free memory, key settings, applications,
//! files and their contents. Long answers arrive as chained frames with
//! status 0xAF; reassembly is bounded so a misbehaving card cannot grow
//! the buffer without limit.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info};

use super::{RoutineContext, RoutineOutcome};
use crate::card::desfire::{
    MfDesfireAppId, MfDesfireApplication, MfDesfireData, MfDesfireFile, MfDesfireFileContents,
    MfDesfireFileSettings, MfDesfireFileType, MfDesfireKeySettings, MfDesfireVersion,
    parse_application_ids, parse_free_memory,
};
use crate::card::{CardType, ProtocolRecord, TagCandidate, classify};
use crate::events::{LogLevel, NfcObserver};
use crate::protocol::constants::*;
use crate::transport::{NfcError, NfcTransport};

/// Poll for a DESFire card and enumerate it.
pub fn run_read<O: NfcObserver>(ctx: &mut RoutineContext<'_, O>) -> RoutineOutcome {
    while ctx.running() {
        let candidate = match ctx.poll() {
            Ok(Some(c)) => c,
            Ok(None) => continue,
            Err(_) => return RoutineOutcome::Aborted,
        };
        if classify(&candidate) != CardType::MifareDesfire {
            continue;
        }
        match read_activated(ctx, &candidate) {
            Ok(outcome) => return outcome,
            Err(NfcError::Aborted) => return RoutineOutcome::Aborted,
            Err(e) => {
                ctx.log(LogLevel::Warn, format!("Enumeration failed: {}", e));
                ctx.transport.deactivate();
            }
        }
    }
    RoutineOutcome::Aborted
}

/// Enumerate one activated DESFire card.
///
/// GET_VERSION is mandatory; everything downstream of it degrades
/// gracefully, so one unreadable application or file never takes the
/// rest of the walk with it.
pub(super) fn read_activated<O: NfcObserver>(
    ctx: &mut RoutineContext<'_, O>,
    candidate: &TagCandidate,
) -> Result<RoutineOutcome, NfcError> {
    let raw = read_chained(ctx.transport, &[MF_DES_GET_VERSION], MF_DES_CHAINED_CAP)?;
    let version =
        MfDesfireVersion::parse(&raw).map_err(|e| NfcError::Protocol(e.to_string()))?;
    let mut data = MfDesfireData::new(version);
    info!(
        hw = format!("{}.{}", version.hardware.major, version.hardware.minor),
        sw = format!("{}.{}", version.software.major, version.software.minor),
        "Enumerating DESFire card"
    );

    // Optional on pre-EV1 silicon.
    if let Ok(raw) = read_chained(ctx.transport, &[MF_DES_GET_FREE_MEMORY], MF_DES_CHAINED_CAP) {
        data.free_memory = parse_free_memory(&raw);
    }

    if let Some(settings) = read_key_settings(ctx.transport) {
        data.master_key_versions = read_key_versions(ctx.transport, settings.max_keys);
        data.master_key_settings = Some(settings);
    }

    let raw = read_chained(
        ctx.transport,
        &[MF_DES_GET_APPLICATION_IDS],
        MF_DES_CHAINED_CAP,
    )?;
    for id in parse_application_ids(&raw) {
        if !ctx.running() {
            return Ok(RoutineOutcome::Aborted);
        }
        match read_application(ctx, id) {
            Ok(app) => data.applications.push(app),
            Err(NfcError::Aborted) => return Err(NfcError::Aborted),
            Err(e) => {
                ctx.log(
                    LogLevel::Warn,
                    format!("Application {:02X?} skipped: {}", id, e),
                );
                data.applications.push(MfDesfireApplication::new(id));
            }
        }
    }

    info!(applications = data.applications.len(), "Enumeration complete");
    *ctx.result.lock().unwrap() = ProtocolRecord::MifareDesfire {
        identity: candidate.identity.clone(),
        data,
    };
    Ok(RoutineOutcome::Success)
}

fn read_application<O: NfcObserver>(
    ctx: &RoutineContext<'_, O>,
    id: MfDesfireAppId,
) -> Result<MfDesfireApplication, NfcError> {
    let mut tx = vec![MF_DES_SELECT_APPLICATION];
    tx.extend_from_slice(&id);
    read_chained(ctx.transport, &tx, MF_DES_CHAINED_CAP)?;
    debug!(app = ?id, "Selected application");

    let mut app = MfDesfireApplication::new(id);
    if let Some(settings) = read_key_settings(ctx.transport) {
        app.key_versions = read_key_versions(ctx.transport, settings.max_keys);
        app.key_settings = Some(settings);
    }

    let file_ids = read_chained(ctx.transport, &[MF_DES_GET_FILE_IDS], MF_DES_CHAINED_CAP)?;
    for &file_id in &file_ids {
        if !ctx.running() {
            return Err(NfcError::Aborted);
        }
        match read_file(ctx.transport, file_id) {
            Ok(file) => app.files.push(file),
            Err(NfcError::Aborted) => return Err(NfcError::Aborted),
            Err(e) => ctx.log(
                LogLevel::Warn,
                format!("File {:#04X} skipped: {}", file_id, e),
            ),
        }
    }
    Ok(app)
}

fn read_file(transport: &dyn NfcTransport, file_id: u8) -> Result<MfDesfireFile, NfcError> {
    let raw = read_chained(
        transport,
        &[MF_DES_GET_FILE_SETTINGS, file_id],
        MF_DES_CHAINED_CAP,
    )?;
    let settings =
        MfDesfireFileSettings::parse(&raw).map_err(|e| NfcError::Protocol(e.to_string()))?;

    // Content reads run into access rights on most real cards; the file
    // stays listed with empty contents when that happens.
    let contents = match settings.file_type {
        MfDesfireFileType::Standard | MfDesfireFileType::Backup => read_chained(
            transport,
            &[MF_DES_READ_DATA, file_id, 0, 0, 0, 0, 0, 0],
            MF_DES_FILE_CAP,
        )
        .ok()
        .map(MfDesfireFileContents::Data),
        MfDesfireFileType::Value => read_chained(transport, &[MF_DES_GET_VALUE, file_id], 4)
            .ok()
            .filter(|raw| raw.len() >= 4)
            .map(|raw| MfDesfireFileContents::Value(LittleEndian::read_u32(&raw))),
        MfDesfireFileType::LinearRecord | MfDesfireFileType::CyclicRecord => read_chained(
            transport,
            &[MF_DES_READ_RECORDS, file_id, 0, 0, 0, 0, 0, 0],
            MF_DES_FILE_CAP,
        )
        .ok()
        .map(MfDesfireFileContents::Records),
    };

    Ok(MfDesfireFile {
        id: file_id,
        settings,
        contents,
    })
}

fn read_key_settings(transport: &dyn NfcTransport) -> Option<MfDesfireKeySettings> {
    let raw = read_chained(transport, &[MF_DES_GET_KEY_SETTINGS], MF_DES_CHAINED_CAP).ok()?;
    MfDesfireKeySettings::parse(&raw).ok()
}

fn read_key_versions(transport: &dyn NfcTransport, max_keys: u8) -> Vec<u8> {
    let mut versions = Vec::new();
    for key in 0..max_keys {
        // One unreadable slot must not truncate the rest of the walk.
        if let Ok(raw) = read_chained(transport, &[MF_DES_GET_KEY_VERSION, key], MF_DES_CHAINED_CAP)
            && let Some(&version) = raw.first()
        {
            versions.push(version);
        }
    }
    versions
}

/// Issue a native command and reassemble the chained answer.
///
/// Every frame starts with a status byte: 0x00 terminates the chain,
/// 0xAF asks for a continuation. The reassembled payload is capped at
/// `cap` bytes; an overrun or an empty continuation frame aborts the
/// exchange before the buffer grows.
pub(super) fn read_chained(
    transport: &dyn NfcTransport,
    tx: &[u8],
    cap: usize,
) -> Result<Vec<u8>, NfcError> {
    let mut out = Vec::new();
    let mut rx = transport.exchange(tx)?;
    loop {
        let Some((&status, payload)) = rx.split_first() else {
            return Err(NfcError::Protocol("empty DESFire frame".into()));
        };
        if out.len() + payload.len() > cap {
            return Err(NfcError::Overrun { capacity: cap });
        }
        match status {
            MF_DES_STATUS_OK => {
                out.extend_from_slice(payload);
                return Ok(out);
            }
            MF_DES_STATUS_ADDITIONAL_FRAME => {
                if payload.is_empty() {
                    return Err(NfcError::Protocol("empty continuation frame".into()));
                }
                out.extend_from_slice(payload);
                rx = transport.exchange(&[MF_DES_STATUS_ADDITIONAL_FRAME])?;
            }
            other => {
                return Err(NfcError::Protocol(format!(
                    "DESFire status {:#04X}",
                    other
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::super::testing::TestHarness;
    use super::*;
    use crate::transport::MockNfc;
    use crate::worker::machine::WorkerState;

    const UID: [u8; 7] = [0x04, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06];

    #[test]
    fn test_chained_reassembly() {
        let mock = MockNfc::new();
        mock.queue_response(Ok([vec![0xAF], vec![0x11; 10]].concat()));
        mock.queue_response(Ok([vec![0xAF], vec![0x22; 10]].concat()));
        mock.queue_response(Ok([vec![0x00], vec![0x33; 5]].concat()));

        let out = read_chained(&mock, &[MF_DES_GET_VERSION], 1024).unwrap();
        assert_eq!(out.len(), 25);
        assert_eq!(out[0], 0x11);
        assert_eq!(out[24], 0x33);
        // Continuations are requested with a bare 0xAF frame.
        assert_eq!(mock.exchange_log()[1], vec![0xAF]);
    }

    #[test]
    fn test_chained_reassembly_is_bounded() {
        let mock = MockNfc::new();
        mock.set_exchange_handler(|_| Ok([vec![0xAF], vec![0x55; 300]].concat()));

        let err = read_chained(&mock, &[MF_DES_READ_DATA, 1, 0, 0, 0, 0, 0, 0], 1024).unwrap_err();
        assert_eq!(err, NfcError::Overrun { capacity: 1024 });
        // 3 frames of 300 fit under the cap; the 4th trips it.
        assert_eq!(mock.exchange_log().len(), 4);
    }

    #[test]
    fn test_empty_continuation_is_rejected() {
        let mock = MockNfc::new();
        mock.queue_response(Ok(vec![0xAF]));
        assert!(matches!(
            read_chained(&mock, &[MF_DES_GET_VERSION], 1024),
            Err(NfcError::Protocol(_))
        ));
    }

    #[test]
    fn test_error_status_is_rejected() {
        let mock = MockNfc::new();
        // 0x9D: permission denied.
        mock.queue_response(Ok(vec![0x9D]));
        assert!(matches!(
            read_chained(&mock, &[MF_DES_READ_DATA, 1, 0, 0, 0, 0, 0, 0], 1024),
            Err(NfcError::Protocol(_))
        ));
    }

    #[test]
    fn test_key_versions_skip_failed_slot() {
        let mock = MockNfc::new();
        mock.set_exchange_handler(|tx| match (tx[0], tx[1]) {
            // Slot 1 denies the read; its neighbors still report.
            (MF_DES_GET_KEY_VERSION, 0x01) => Ok(vec![0x9D]),
            (MF_DES_GET_KEY_VERSION, key) => Ok(vec![0x00, 0x10 + key]),
            other => panic!("unexpected command {:?}", other),
        });
        assert_eq!(read_key_versions(&mock, 3), vec![0x10, 0x12]);
    }

    /// Simulated card: one application with three files, the second of
    /// which reports an unknown file type.
    fn simulated_card(mock: &MockNfc) {
        let mut continuations: VecDeque<Vec<u8>> = VecDeque::new();
        mock.set_exchange_handler(move |tx| {
            if tx == [MF_DES_STATUS_ADDITIONAL_FRAME] {
                return Ok(continuations.pop_front().expect("no continuation queued"));
            }
            match tx[0] {
                MF_DES_GET_VERSION => {
                    // hw info, sw info, then uid/batch/week/year.
                    continuations
                        .push_back([vec![0xAF], vec![0x04, 0x01, 0x01, 0x12, 0x00, 0x1A, 0x05]].concat());
                    let mut tail = vec![0x00];
                    tail.extend_from_slice(&UID);
                    tail.extend_from_slice(&[0xBA, 0x14, 0x20, 0x21, 0x10]);
                    tail.extend_from_slice(&[0x04, 0x20]);
                    continuations.push_back(tail);
                    Ok([vec![0xAF], vec![0x04, 0x01, 0x01, 0x01, 0x00, 0x1A, 0x05]].concat())
                }
                MF_DES_GET_FREE_MEMORY => Ok(vec![0x00, 0x00, 0x0E, 0x00]),
                MF_DES_GET_KEY_SETTINGS => Ok(vec![0x00, 0x0F, 0x01]),
                MF_DES_GET_KEY_VERSION => Ok(vec![0x00, 0x10]),
                MF_DES_GET_APPLICATION_IDS => Ok(vec![0x00, 0x01, 0x00, 0x00]),
                MF_DES_SELECT_APPLICATION => Ok(vec![0x00]),
                MF_DES_GET_FILE_IDS => Ok(vec![0x00, 0x01, 0x02, 0x03]),
                MF_DES_GET_FILE_SETTINGS => match tx[1] {
                    0x01 => Ok(vec![0x00, 0x00, 0x00, 0xEE, 0xEE, 0x10, 0x00, 0x00]),
                    0x02 => Ok(vec![0x00, 0xFF, 0x00, 0xEE, 0xEE, 0x10, 0x00, 0x00]),
                    _ => Ok(vec![
                        0x00, 0x02, 0x00, 0xEE, 0xEE, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF,
                        0x7F, 0x00, 0x00, 0x00, 0x00, 0x00,
                    ]),
                },
                MF_DES_READ_DATA => Ok([vec![0x00], vec![0x42; 16]].concat()),
                MF_DES_GET_VALUE => Ok(vec![0x00, 0x04, 0x03, 0x02, 0x01]),
                other => panic!("unexpected command {:#04X}", other),
            }
        });
    }

    #[test]
    fn test_enumeration_with_partial_failure() {
        let mock = MockNfc::with_desfire(&UID);
        simulated_card(&mock);
        let harness = TestHarness::new(WorkerState::ReadDesfire);
        let mut ctx = harness.ctx(&mock);

        assert_eq!(run_read(&mut ctx), RoutineOutcome::Success);
        let data = match &*harness.result.lock().unwrap() {
            ProtocolRecord::MifareDesfire { data, .. } => data.clone(),
            other => panic!("unexpected record {:?}", other),
        };
        assert_eq!(data.free_memory, Some(0x0E00));
        assert_eq!(data.master_key_versions, vec![0x10]);
        assert_eq!(data.applications.len(), 1);

        // File 0x02 is skipped, its neighbors survive.
        let app = &data.applications[0];
        let ids: Vec<u8> = app.files.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![0x01, 0x03]);
        assert_eq!(
            app.files[0].contents,
            Some(MfDesfireFileContents::Data(vec![0x42; 16]))
        );
        assert_eq!(
            app.files[1].contents,
            Some(MfDesfireFileContents::Value(0x01020304))
        );
    }
}
