//! Worker session states.

use std::fmt;

/// State of the worker, chosen by the caller at start and observed by the
/// routines for the cooperative stop check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    /// Idle, no session running.
    #[default]
    Ready,
    /// Detect and classify whatever enters the field.
    Detect,
    /// Detect, then read with the protocol matching the card.
    ReadGeneric,
    /// Mifare Classic dictionary key recovery.
    ReadClassicDictAttack,
    /// Ultralight/NTAG paged read.
    ReadUltralight,
    /// DESFire application enumeration.
    ReadDesfire,
    /// EMV payment applet read.
    ReadEmv,
    /// Present a stored UID to a reader.
    EmulateUid,
    /// Present a stored Classic image at the anticollision layer.
    EmulateClassic,
    /// Serve a stored Ultralight image.
    EmulateUltralight,
    /// Answer ISO-DEP readers at the APDU layer.
    EmulateApdu,
    /// Stop requested; routines exit at the next check.
    Stop,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Ready => write!(f, "READY"),
            WorkerState::Detect => write!(f, "DETECT"),
            WorkerState::ReadGeneric => write!(f, "READ_GENERIC"),
            WorkerState::ReadClassicDictAttack => write!(f, "READ_CLASSIC_DICT_ATTACK"),
            WorkerState::ReadUltralight => write!(f, "READ_ULTRALIGHT"),
            WorkerState::ReadDesfire => write!(f, "READ_DESFIRE"),
            WorkerState::ReadEmv => write!(f, "READ_EMV"),
            WorkerState::EmulateUid => write!(f, "EMULATE_UID"),
            WorkerState::EmulateClassic => write!(f, "EMULATE_CLASSIC"),
            WorkerState::EmulateUltralight => write!(f, "EMULATE_ULTRALIGHT"),
            WorkerState::EmulateApdu => write!(f, "EMULATE_APDU"),
            WorkerState::Stop => write!(f, "STOP"),
        }
    }
}

impl WorkerState {
    /// Check if this is a read/attack session state.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            WorkerState::Detect
                | WorkerState::ReadGeneric
                | WorkerState::ReadClassicDictAttack
                | WorkerState::ReadUltralight
                | WorkerState::ReadDesfire
                | WorkerState::ReadEmv
        )
    }

    /// Check if this is an emulation session state.
    pub fn is_emulation(&self) -> bool {
        matches!(
            self,
            WorkerState::EmulateUid
                | WorkerState::EmulateClassic
                | WorkerState::EmulateUltralight
                | WorkerState::EmulateApdu
        )
    }
}
