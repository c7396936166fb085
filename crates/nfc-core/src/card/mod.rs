//! Card data model: tag identity, family classification and the
//! per-protocol result record.
//!
//! Decoders for individual card families live in the submodules; this
//! module holds what is common to every session.

pub mod classic;
pub mod desfire;
pub mod emv;
pub mod ultralight;

use std::fmt;

use crate::protocol::constants::*;

use classic::{MfClassicData, MfClassicType};
use desfire::MfDesfireData;
use emv::EmvData;
use ultralight::MfUltralightData;

/// ISO14443 radio family of a detected tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NfcFamily {
    A,
    B,
    F,
    V,
}

impl fmt::Display for NfcFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NfcFamily::A => write!(f, "ISO14443-A"),
            NfcFamily::B => write!(f, "ISO14443-B"),
            NfcFamily::F => write!(f, "ISO14443-F"),
            NfcFamily::V => write!(f, "ISO14443-V"),
        }
    }
}

/// Identity of one activated tag. Produced once per successful detection
/// and immutable for the rest of that session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagIdentity {
    /// 4, 7 or 10 bytes.
    pub uid: Vec<u8>,
    /// ATQA in wire order (LSB first).
    pub atqa: [u8; 2],
    pub sak: u8,
    pub family: NfcFamily,
}

impl TagIdentity {
    pub fn uid_hex(&self) -> String {
        self.uid.iter().map(|b| format!("{:02X}", b)).collect()
    }
}

/// One candidate returned by a detection poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCandidate {
    pub identity: TagIdentity,
    /// Whether the tag negotiated the ISO-DEP protocol layer.
    pub iso_dep: bool,
}

/// Coarse card classification driving routine dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardType {
    MifareClassic(MfClassicType),
    MifareUltralight,
    MifareDesfire,
    /// ISO-DEP capable but no known Mifare pattern; worth an EMV attempt.
    EmvCapable,
    NfcB,
    NfcF,
    NfcV,
    /// NFC-A tag matching none of the known patterns.
    Unknown,
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardType::MifareClassic(t) => write!(f, "Mifare Classic {}", t),
            CardType::MifareUltralight => write!(f, "Mifare Ultralight/NTAG"),
            CardType::MifareDesfire => write!(f, "Mifare DESFire"),
            CardType::EmvCapable => write!(f, "ISO-DEP (EMV capable)"),
            CardType::NfcB => write!(f, "NFC-B"),
            CardType::NfcF => write!(f, "NFC-F"),
            CardType::NfcV => write!(f, "NFC-V"),
            CardType::Unknown => write!(f, "Unknown NFC-A"),
        }
    }
}

/// Classify one detection candidate.
///
/// Family first; within NFC-A, by the ATQA/SAK patterns of the NXP card
/// identification tables. Runs from scratch on every poll: there is no
/// cross-poll memory of a previously seen UID.
pub fn classify(candidate: &TagCandidate) -> CardType {
    let id = &candidate.identity;
    match id.family {
        NfcFamily::B => return CardType::NfcB,
        NfcFamily::F => return CardType::NfcF,
        NfcFamily::V => return CardType::NfcV,
        NfcFamily::A => {}
    }

    if id.sak == SAK_ULTRALIGHT && id.atqa == ATQA_ULTRALIGHT {
        return CardType::MifareUltralight;
    }
    match id.sak {
        SAK_MF_CLASSIC_1K => return CardType::MifareClassic(MfClassicType::K1),
        SAK_MF_CLASSIC_MINI => return CardType::MifareClassic(MfClassicType::Mini),
        SAK_MF_CLASSIC_4K => return CardType::MifareClassic(MfClassicType::K4),
        _ => {}
    }
    if id.sak == SAK_MF_DESFIRE && id.atqa == ATQA_MF_DESFIRE {
        return CardType::MifareDesfire;
    }
    if candidate.iso_dep {
        return CardType::EmvCapable;
    }
    CardType::Unknown
}

/// Per-session result record, exactly one variant active at a time.
///
/// Allocated fresh at the start of each read/attack session, mutated
/// incrementally by the worker thread, read by the caller after a
/// terminal event.
#[derive(Debug, Clone, Default)]
pub enum ProtocolRecord {
    #[default]
    None,
    Generic {
        identity: TagIdentity,
    },
    Emv {
        identity: TagIdentity,
        data: EmvData,
    },
    MifareClassic {
        identity: TagIdentity,
        data: MfClassicData,
    },
    MifareUltralight {
        identity: TagIdentity,
        data: MfUltralightData,
    },
    MifareDesfire {
        identity: TagIdentity,
        data: MfDesfireData,
    },
}

impl ProtocolRecord {
    pub fn identity(&self) -> Option<&TagIdentity> {
        match self {
            ProtocolRecord::None => None,
            ProtocolRecord::Generic { identity }
            | ProtocolRecord::Emv { identity, .. }
            | ProtocolRecord::MifareClassic { identity, .. }
            | ProtocolRecord::MifareUltralight { identity, .. }
            | ProtocolRecord::MifareDesfire { identity, .. } => Some(identity),
        }
    }

    /// Tear down any previous session content.
    pub fn clear(&mut self) {
        *self = ProtocolRecord::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(atqa: [u8; 2], sak: u8, iso_dep: bool) -> TagCandidate {
        TagCandidate {
            identity: TagIdentity {
                uid: vec![0xDE, 0xAD, 0xBE, 0xEF],
                atqa,
                sak,
                family: NfcFamily::A,
            },
            iso_dep,
        }
    }

    #[test]
    fn test_classify_ultralight() {
        let c = candidate([0x44, 0x00], 0x00, false);
        assert_eq!(classify(&c), CardType::MifareUltralight);
    }

    #[test]
    fn test_classify_classic_variants() {
        assert_eq!(
            classify(&candidate([0x04, 0x00], 0x08, false)),
            CardType::MifareClassic(MfClassicType::K1)
        );
        assert_eq!(
            classify(&candidate([0x04, 0x00], 0x09, false)),
            CardType::MifareClassic(MfClassicType::Mini)
        );
        assert_eq!(
            classify(&candidate([0x02, 0x00], 0x18, false)),
            CardType::MifareClassic(MfClassicType::K4)
        );
    }

    #[test]
    fn test_classify_desfire() {
        let c = candidate([0x44, 0x03], 0x20, true);
        assert_eq!(classify(&c), CardType::MifareDesfire);
    }

    #[test]
    fn test_classify_iso_dep_fallback_is_emv() {
        // ISO-DEP without a DESFire ATQA: bank card territory.
        let c = candidate([0x08, 0x00], 0x20, true);
        assert_eq!(classify(&c), CardType::EmvCapable);
    }

    #[test]
    fn test_classify_unknown() {
        let c = candidate([0x01, 0x0F], 0x53, false);
        assert_eq!(classify(&c), CardType::Unknown);
    }

    #[test]
    fn test_classify_family_first() {
        let mut c = candidate([0x44, 0x00], 0x00, false);
        c.identity.family = NfcFamily::B;
        assert_eq!(classify(&c), CardType::NfcB);
    }

    #[test]
    fn test_record_clear() {
        let mut record = ProtocolRecord::Generic {
            identity: candidate([0x44, 0x00], 0x00, false).identity,
        };
        assert!(record.identity().is_some());
        record.clear();
        assert!(record.identity().is_none());
    }
}
