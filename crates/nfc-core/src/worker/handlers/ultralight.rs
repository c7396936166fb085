//! Ultralight/NTAG read routine.

use tracing::info;

use super::{RoutineContext, RoutineOutcome};
use crate::card::ultralight::{MfUltralightData, MfUltralightType, MfUltralightVersion, parse_counter};
use crate::card::{CardType, ProtocolRecord, TagCandidate, classify};
use crate::events::{LogLevel, NfcObserver};
use crate::protocol::constants::*;
use crate::transport::NfcError;

/// Poll for an Ultralight-family tag and read it.
pub fn run_read<O: NfcObserver>(ctx: &mut RoutineContext<'_, O>) -> RoutineOutcome {
    while ctx.running() {
        let candidate = match ctx.poll() {
            Ok(Some(c)) => c,
            Ok(None) => continue,
            Err(_) => return RoutineOutcome::Aborted,
        };
        if classify(&candidate) != CardType::MifareUltralight {
            continue;
        }
        match read_activated(ctx, &candidate) {
            Ok(outcome) => return outcome,
            Err(NfcError::Aborted) => return RoutineOutcome::Aborted,
            Err(e) => {
                ctx.log(LogLevel::Warn, format!("Read failed: {}", e));
                ctx.transport.deactivate();
            }
        }
    }
    RoutineOutcome::Aborted
}

/// Read one activated Ultralight tag: version, pages, counters, tearing
/// flags. Unreadable runs of pages are skipped, not fatal.
pub(super) fn read_activated<O: NfcObserver>(
    ctx: &mut RoutineContext<'_, O>,
    candidate: &TagCandidate,
) -> Result<RoutineOutcome, NfcError> {
    // Version probe. Pre-EV1 chips have no GET_VERSION and time out
    // instead of answering; fall back to the smallest profile.
    let (card_type, version) = match ctx.transport.exchange(&[MF_UL_GET_VERSION]) {
        Ok(raw) => match MfUltralightVersion::parse(&raw) {
            Some(v) => (v.card_type(), Some(v)),
            None => (MfUltralightType::Ultralight, None),
        },
        Err(NfcError::Timeout { .. }) => (MfUltralightType::Ultralight, None),
        Err(e) => return Err(e),
    };
    info!(card_type = %card_type, "Reading Ultralight tag");

    let mut data = MfUltralightData::new(card_type, version);
    let total = card_type.total_pages();

    if card_type.supports_fast_read() {
        let raw = ctx
            .transport
            .exchange(&[MF_UL_FAST_READ, 0x00, (total - 1) as u8])?;
        data.fill_pages(0, &raw);
    } else {
        let mut page = 0;
        while page < total {
            if !ctx.running() {
                return Ok(RoutineOutcome::Aborted);
            }
            match ctx.transport.exchange(&[MF_UL_READ, page as u8]) {
                Ok(raw) => {
                    data.fill_pages(page, &raw);
                }
                Err(NfcError::Aborted) => return Err(NfcError::Aborted),
                Err(_) => {
                    // Locked or missing run: leave it zeroed.
                }
            }
            page += MF_UL_READ_PAGES;
        }
    }

    if card_type.supports_counters() {
        for i in 0..MF_UL_COUNTER_COUNT {
            if !ctx.running() {
                return Ok(RoutineOutcome::Aborted);
            }
            if let Ok(raw) = ctx.transport.exchange(&[MF_UL_READ_CNT, i as u8])
                && let Some(value) = parse_counter(&raw)
            {
                data.counters[i] = value;
            }
            if let Ok(raw) = ctx.transport.exchange(&[MF_UL_CHECK_TEARING, i as u8])
                && let Some(&flag) = raw.first()
            {
                data.tearing_flags[i] = flag;
            }
        }
    }

    let outcome = if data.pages_read > 0 {
        RoutineOutcome::Success
    } else {
        RoutineOutcome::Fail
    };
    *ctx.result.lock().unwrap() = ProtocolRecord::MifareUltralight {
        identity: candidate.identity.clone(),
        data,
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::super::testing::TestHarness;
    use super::*;
    use crate::transport::MockNfc;
    use crate::worker::machine::WorkerState;

    const UID: [u8; 7] = [0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];

    fn record_data(harness: &TestHarness) -> MfUltralightData {
        match &*harness.result.lock().unwrap() {
            ProtocolRecord::MifareUltralight { data, .. } => data.clone(),
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_version_timeout_falls_back_to_plain_ultralight() {
        let mock = MockNfc::with_ultralight(&UID);
        mock.set_exchange_handler(|tx| match tx[0] {
            MF_UL_GET_VERSION => Err(NfcError::Timeout { timeout_ms: 200 }),
            MF_UL_READ => Ok(vec![tx[1]; 16]),
            other => panic!("unexpected command {:#04X}", other),
        });
        let harness = TestHarness::new(WorkerState::ReadUltralight);
        let mut ctx = harness.ctx(&mock);

        assert_eq!(run_read(&mut ctx), RoutineOutcome::Success);
        let data = record_data(&harness);
        assert_eq!(data.card_type, MfUltralightType::Ultralight);
        assert!(data.version.is_none());
        assert_eq!(data.pages_read, MF_UL_DEFAULT_PAGES);
        // Chunked reads, 4 pages at a time.
        assert_eq!(data.pages[4], [4; 4]);
    }

    #[test]
    fn test_ntag215_fast_read_with_counters() {
        let mock = MockNfc::with_ultralight(&UID);
        let version = vec![0x00, 0x04, 0x04, 0x02, 0x01, 0x00, 0x11, 0x03];
        mock.set_exchange_handler(move |tx| match tx[0] {
            MF_UL_GET_VERSION => Ok(version.clone()),
            MF_UL_FAST_READ => {
                let pages = (tx[2] - tx[1] + 1) as usize;
                Ok(vec![0xAB; pages * 4])
            }
            MF_UL_READ_CNT => Ok(vec![0x2A, 0x00, 0x00]),
            MF_UL_CHECK_TEARING => Ok(vec![0xBD]),
            other => panic!("unexpected command {:#04X}", other),
        });
        let harness = TestHarness::new(WorkerState::ReadUltralight);
        let mut ctx = harness.ctx(&mock);

        assert_eq!(run_read(&mut ctx), RoutineOutcome::Success);
        let data = record_data(&harness);
        assert_eq!(data.card_type, MfUltralightType::Ntag215);
        assert_eq!(data.pages_read, data.card_type.total_pages());
        assert_eq!(data.counters, [0x2A; 3]);
        assert_eq!(data.tearing_flags, [0xBD; 3]);
    }

    #[test]
    fn test_nothing_readable_is_fail() {
        let mock = MockNfc::with_ultralight(&UID);
        mock.set_exchange_handler(|_| Err(NfcError::Timeout { timeout_ms: 200 }));
        let harness = TestHarness::new(WorkerState::ReadUltralight);
        let mut ctx = harness.ctx(&mock);

        assert_eq!(run_read(&mut ctx), RoutineOutcome::Fail);
        assert_eq!(record_data(&harness).pages_read, 0);
    }
}
