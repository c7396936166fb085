//! Detection and generic-read routines.

use tracing::info;

use super::{RoutineContext, RoutineOutcome, desfire, emv, ultralight};
use crate::card::{CardType, ProtocolRecord, classify};
use crate::events::{LogLevel, NfcObserver};
use crate::transport::NfcError;

/// Poll until any tag activates, record its identity and finish.
pub fn run_detect<O: NfcObserver>(ctx: &mut RoutineContext<'_, O>) -> RoutineOutcome {
    while ctx.running() {
        let candidate = match ctx.poll() {
            Ok(Some(c)) => c,
            Ok(None) => continue,
            Err(_) => return RoutineOutcome::Aborted,
        };
        let card_type = classify(&candidate);
        info!(card_type = %card_type, uid = %candidate.identity.uid_hex(), "Detected tag");
        *ctx.result.lock().unwrap() = ProtocolRecord::Generic {
            identity: candidate.identity,
        };
        return RoutineOutcome::Success;
    }
    RoutineOutcome::Aborted
}

/// Detect, then read with the protocol matching the classified card.
///
/// Classic is excluded here: key recovery is a separate, long-running
/// session that the caller starts explicitly.
pub fn run_read_generic<O: NfcObserver>(ctx: &mut RoutineContext<'_, O>) -> RoutineOutcome {
    while ctx.running() {
        let candidate = match ctx.poll() {
            Ok(Some(c)) => c,
            Ok(None) => continue,
            Err(_) => return RoutineOutcome::Aborted,
        };
        let card_type = classify(&candidate);
        let attempt = match card_type {
            CardType::MifareUltralight => ultralight::read_activated(ctx, &candidate),
            CardType::MifareDesfire => desfire::read_activated(ctx, &candidate),
            CardType::EmvCapable => emv::read_activated(ctx, &candidate),
            _ => {
                *ctx.result.lock().unwrap() = ProtocolRecord::Generic {
                    identity: candidate.identity,
                };
                return RoutineOutcome::Success;
            }
        };
        match attempt {
            Ok(outcome) => return outcome,
            Err(NfcError::Aborted) => return RoutineOutcome::Aborted,
            Err(e) => {
                // Card likely left mid-read; drop the session and re-poll.
                ctx.log(LogLevel::Warn, format!("Read failed: {}", e));
                ctx.transport.deactivate();
            }
        }
    }
    RoutineOutcome::Aborted
}
