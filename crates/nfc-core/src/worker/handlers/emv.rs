//! EMV payment applet read routine.
//!
//! Contactless transaction prologue, read-only: SELECT PPSE for the
//! application list, SELECT the first AID, GET PROCESSING OPTIONS with
//! the requested PDOL entries filled in, then READ RECORD over the AFL
//! until a PAN turns up.

use tracing::{debug, info};

use super::{RoutineContext, RoutineOutcome};
use crate::card::emv::{EmvData, build_gpo_data, parse_afl};
use crate::card::{CardType, ProtocolRecord, TagCandidate, classify};
use crate::events::{LogLevel, NfcObserver};
use crate::protocol::constants::*;
use crate::protocol::tlv::find_tag;
use crate::protocol::{ApduCommand, ApduResponse};
use crate::transport::NfcError;

/// Poll for an ISO-DEP card and read its payment applet.
pub fn run_read<O: NfcObserver>(ctx: &mut RoutineContext<'_, O>) -> RoutineOutcome {
    while ctx.running() {
        let candidate = match ctx.poll() {
            Ok(Some(c)) => c,
            Ok(None) => continue,
            Err(_) => return RoutineOutcome::Aborted,
        };
        if classify(&candidate) != CardType::EmvCapable {
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

/// Read one activated card. A card that answers but holds no payment
/// applet (or never reveals a PAN) is a `Fail`, not an error.
pub(super) fn read_activated<O: NfcObserver>(
    ctx: &mut RoutineContext<'_, O>,
    candidate: &TagCandidate,
) -> Result<RoutineOutcome, NfcError> {
    let mut data = EmvData::default();

    let rsp = transceive(
        ctx,
        &ApduCommand::new(0x00, EMV_INS_SELECT, 0x04, 0x00)
            .data(EMV_PPSE_NAME.to_vec())
            .le(0x00)
            .to_bytes(),
    )?;
    if !rsp.is_success() {
        ctx.log(
            LogLevel::Info,
            format!("PPSE rejected, SW {:#06X}", rsp.status_word()),
        );
        return Ok(finish(ctx, candidate, data));
    }
    let Some(aid) = find_tag(&rsp.data, EMV_TAG_AID) else {
        ctx.log(LogLevel::Info, "PPSE carries no application");
        return Ok(finish(ctx, candidate, data));
    };
    data.aid = aid.to_vec();
    debug!(aid = ?data.aid, "Selected payment system");

    let rsp = transceive(
        ctx,
        &ApduCommand::new(0x00, EMV_INS_SELECT, 0x04, 0x00)
            .data(data.aid.clone())
            .le(0x00)
            .to_bytes(),
    )?;
    if !rsp.is_success() {
        return Ok(finish(ctx, candidate, data));
    }
    if let Some(label) = find_tag(&rsp.data, EMV_TAG_APP_LABEL) {
        data.name = String::from_utf8_lossy(label).into_owned();
    }
    let pdol = find_tag(&rsp.data, EMV_TAG_PDOL).map(<[u8]>::to_vec);

    let rsp = transceive(
        ctx,
        &ApduCommand::new(0x80, EMV_INS_GPO, 0x00, 0x00)
            .data(build_gpo_data(pdol.as_deref()))
            .le(0x00)
            .to_bytes(),
    )?;
    if !rsp.is_success() {
        return Ok(finish(ctx, candidate, data));
    }
    data.absorb(&rsp.data);

    if data.pan.is_empty() {
        'records: for entry in parse_afl(&rsp.data) {
            for record in entry.first_record..=entry.last_record {
                if !ctx.running() {
                    return Ok(RoutineOutcome::Aborted);
                }
                let rsp = transceive(
                    ctx,
                    &ApduCommand::new(0x00, EMV_INS_READ_RECORD, record, (entry.sfi << 3) | 0x04)
                        .le(0x00)
                        .to_bytes(),
                )?;
                if rsp.is_success() {
                    data.absorb(&rsp.data);
                }
                if !data.pan.is_empty() {
                    break 'records;
                }
            }
        }
    }

    Ok(finish(ctx, candidate, data))
}

fn finish<O: NfcObserver>(
    ctx: &RoutineContext<'_, O>,
    candidate: &TagCandidate,
    data: EmvData,
) -> RoutineOutcome {
    let outcome = if data.pan.is_empty() {
        RoutineOutcome::Fail
    } else {
        info!(name = %data.name, pan = %data.pan_string(), "Payment card read");
        RoutineOutcome::Success
    };
    *ctx.result.lock().unwrap() = ProtocolRecord::Emv {
        identity: candidate.identity.clone(),
        data,
    };
    outcome
}

fn transceive<O: NfcObserver>(
    ctx: &RoutineContext<'_, O>,
    tx: &[u8],
) -> Result<ApduResponse, NfcError> {
    let raw = ctx.transport.exchange(tx)?;
    ApduResponse::parse(&raw).map_err(|e| NfcError::Protocol(e.to_string()))
}
