//! Mifare Classic dictionary key recovery.
//!
//! For every sector, each dictionary key is trialed as Key A and Key B
//! against the sector trailer. A Crypto1 handshake, successful or not,
//! ends with the card expecting re-activation, so every trial starts
//! from a fresh detect. Once a sector authenticates with Key A, the
//! trailer itself may hand over Key B in the clear.

use std::io::{BufRead, Seek};

use tracing::{debug, info};

use super::{RoutineContext, RoutineOutcome};
use crate::card::classic::{
    MfClassicData, MfClassicKey, MfClassicKeyType, MfClassicType, SectorTrailer,
};
use crate::card::{CardType, ProtocolRecord, classify};
use crate::dictionary::KeyDict;
use crate::events::{LogLevel, NfcEvent, NfcObserver};
use crate::protocol::constants::{MF_CLASSIC_BLOCK_SIZE, MF_CLASSIC_READ};
use crate::transport::NfcError;

/// Keys trialed between two progress events.
const DICT_BATCH: usize = 10;

/// Open the user dictionary, falling back to the bundled one, and run the
/// attack with it.
pub fn run_dict_attack<O: NfcObserver>(ctx: &mut RoutineContext<'_, O>) -> RoutineOutcome {
    let mut dict = match KeyDict::open(&ctx.config.user_dict_path)
        .or_else(|_| KeyDict::open(&ctx.config.system_dict_path))
    {
        Ok(dict) => dict,
        Err(e) => {
            ctx.log(LogLevel::Error, format!("No dictionary available: {}", e));
            return RoutineOutcome::NoDictFound;
        }
    };
    info!(keys = dict.total_keys(), "Dictionary loaded");
    attack(ctx, &mut dict)
}

/// Run the attack with an already opened dictionary.
pub(crate) fn attack<R: BufRead + Seek, O: NfcObserver>(
    ctx: &mut RoutineContext<'_, O>,
    dict: &mut KeyDict<R>,
) -> RoutineOutcome {
    // Wait for a Classic card.
    let (card_type, identity) = loop {
        if !ctx.running() {
            return RoutineOutcome::Aborted;
        }
        match ctx.poll() {
            Ok(Some(candidate)) => {
                if let CardType::MifareClassic(card_type) = classify(&candidate) {
                    break (card_type, candidate.identity);
                }
            }
            Ok(None) => {}
            Err(_) => return RoutineOutcome::Aborted,
        }
    };
    info!(card_type = %card_type, uid = %identity.uid_hex(), "Starting dictionary attack");

    let mut data = MfClassicData::new(card_type);
    let outcome = attack_card(ctx, dict, card_type, &mut data);
    // Partial results are kept even on abort.
    *ctx.result.lock().unwrap() = ProtocolRecord::MifareClassic { identity, data };
    outcome
}

fn attack_card<R: BufRead + Seek, O: NfcObserver>(
    ctx: &mut RoutineContext<'_, O>,
    dict: &mut KeyDict<R>,
    card_type: MfClassicType,
    data: &mut MfClassicData,
) -> RoutineOutcome {
    let total_keys = dict.total_keys();

    for sector in 0..card_type.total_sectors() {
        if !ctx.running() {
            return RoutineOutcome::Aborted;
        }
        ctx.emit(NfcEvent::NewSector { sector });
        if dict.rewind().is_err() {
            ctx.log(LogLevel::Error, "Dictionary rewind failed");
            break;
        }
        let trailer_block = card_type.sector_trailer_block(sector) as u8;
        let mut keys_tried = 0usize;
        // A key pulled from the dictionary but not yet trialed survives
        // card-absent polls; activation failures must not consume keys.
        let mut pending: Option<MfClassicKey> = None;

        loop {
            if !ctx.running() {
                return RoutineOutcome::Aborted;
            }
            if data.sector_keys[sector as usize].complete() {
                break;
            }
            let key = match pending.take() {
                Some(key) => key,
                None => match dict.next_key() {
                    Some(key) => {
                        keys_tried += 1;
                        if keys_tried % DICT_BATCH == 0 {
                            ctx.emit(NfcEvent::NewDictKeyBatch {
                                current: keys_tried,
                                total: total_keys,
                            });
                        }
                        key
                    }
                    None => break,
                },
            };

            match ctx.poll() {
                Ok(Some(_)) => {}
                Ok(None) => {
                    pending = Some(key);
                    continue;
                }
                Err(_) => return RoutineOutcome::Aborted,
            }

            if data.sector_keys[sector as usize].a.is_none() {
                match ctx
                    .transport
                    .mf_authenticate(trailer_block, &key, MfClassicKeyType::A)
                {
                    Ok(()) => {
                        debug!(sector = sector, key = %key, "Key A found");
                        data.sector_keys[sector as usize].a = Some(key);
                        ctx.emit(NfcEvent::FoundKeyA { sector });
                        if data.sector_keys[sector as usize].b.is_none()
                            && let Some(key_b) = read_trailer_key_b(ctx, trailer_block)
                        {
                            data.sector_keys[sector as usize].b = Some(key_b);
                            ctx.emit(NfcEvent::FoundKeyB { sector });
                        }
                    }
                    Err(NfcError::Aborted) => return RoutineOutcome::Aborted,
                    Err(_) => {}
                }
            }

            if data.sector_keys[sector as usize].b.is_none() {
                // The A trial (or its failure) consumed the session.
                match ctx.poll() {
                    Ok(Some(_)) => {
                        match ctx
                            .transport
                            .mf_authenticate(trailer_block, &key, MfClassicKeyType::B)
                        {
                            Ok(()) => {
                                debug!(sector = sector, key = %key, "Key B found");
                                data.sector_keys[sector as usize].b = Some(key);
                                ctx.emit(NfcEvent::FoundKeyB { sector });
                            }
                            Err(NfcError::Aborted) => return RoutineOutcome::Aborted,
                            Err(_) => {}
                        }
                    }
                    Ok(None) => {}
                    Err(_) => return RoutineOutcome::Aborted,
                }
            }
        }
    }

    read_sectors(ctx, card_type, data);
    if !ctx.running() {
        return RoutineOutcome::Aborted;
    }

    info!(
        sectors_with_keys = data.sectors_with_keys(),
        blocks_read = data.blocks_read(),
        "Dictionary attack finished"
    );
    if data.sectors_with_keys() >= 1 {
        RoutineOutcome::Success
    } else {
        RoutineOutcome::Fail
    }
}

/// After a Key A authentication the trailer is readable; depending on the
/// access bits Key B sits in it unencrypted.
fn read_trailer_key_b<O: NfcObserver>(
    ctx: &RoutineContext<'_, O>,
    trailer_block: u8,
) -> Option<MfClassicKey> {
    let raw = ctx
        .transport
        .exchange(&[MF_CLASSIC_READ, trailer_block])
        .ok()?;
    if raw.len() != MF_CLASSIC_BLOCK_SIZE {
        return None;
    }
    let mut block = [0u8; MF_CLASSIC_BLOCK_SIZE];
    block.copy_from_slice(&raw);
    let trailer = SectorTrailer::parse(&block);
    trailer.key_b_readable().then_some(trailer.key_b)
}

/// Read every sector we hold a key for into the result record.
fn read_sectors<O: NfcObserver>(
    ctx: &mut RoutineContext<'_, O>,
    card_type: MfClassicType,
    data: &mut MfClassicData,
) {
    for sector in 0..card_type.total_sectors() {
        if !ctx.running() {
            return;
        }
        let Some((key, key_type)) = data.sector_keys[sector as usize].any() else {
            continue;
        };
        match ctx.poll() {
            Ok(Some(_)) => {}
            _ => continue,
        }
        let trailer_block = card_type.sector_trailer_block(sector);
        if ctx
            .transport
            .mf_authenticate(trailer_block as u8, &key, key_type)
            .is_err()
        {
            continue;
        }

        let first = card_type.first_block_of_sector(sector);
        let count = card_type.blocks_in_sector(sector) as u16;
        for block in first..first + count {
            match ctx.transport.exchange(&[MF_CLASSIC_READ, block as u8]) {
                Ok(raw) if raw.len() == MF_CLASSIC_BLOCK_SIZE => {
                    let mut contents = [0u8; MF_CLASSIC_BLOCK_SIZE];
                    contents.copy_from_slice(&raw);
                    data.set_block(block, contents);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }

        // The card never reads keys back; patch the recovered ones into
        // the trailer image.
        if data.is_block_read(trailer_block) {
            let keys = data.sector_keys[sector as usize];
            let mut trailer = data.blocks[trailer_block as usize];
            if let Some(a) = keys.a {
                trailer[0..6].copy_from_slice(&a.0);
            }
            if let Some(b) = keys.b {
                trailer[10..16].copy_from_slice(&b.0);
            }
            data.set_block(trailer_block, trailer);
        }
    }
}
