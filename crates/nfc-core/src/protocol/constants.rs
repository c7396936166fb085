//! Protocol constants for the supported card families.
//!
//! ATQA/SAK classification patterns follow the NXP card identification
//! tables (AN10833/AN10834); command bytes follow the respective
//! datasheets and EMV Book 1.

// ============================================================================
// ISO14443-A classification patterns (ATQA in wire order, LSB first)
// ============================================================================

pub const ATQA_ULTRALIGHT: [u8; 2] = [0x44, 0x00];
pub const ATQA_MF_DESFIRE: [u8; 2] = [0x44, 0x03];

pub const SAK_ULTRALIGHT: u8 = 0x00;
pub const SAK_MF_CLASSIC_1K: u8 = 0x08;
pub const SAK_MF_CLASSIC_MINI: u8 = 0x09;
pub const SAK_MF_CLASSIC_4K: u8 = 0x18;
pub const SAK_MF_DESFIRE: u8 = 0x20;

/// SAK bit signalling ISO-DEP (ISO14443-4) capability.
pub const SAK_ISO_DEP_BIT: u8 = 0x20;

// ============================================================================
// Mifare Ultralight / NTAG commands
// ============================================================================

pub const MF_UL_GET_VERSION: u8 = 0x60;
pub const MF_UL_READ: u8 = 0x30;
pub const MF_UL_FAST_READ: u8 = 0x3A;
pub const MF_UL_READ_CNT: u8 = 0x39;
pub const MF_UL_CHECK_TEARING: u8 = 0x3E;
pub const MF_UL_PWD_AUTH: u8 = 0x1B;
pub const MF_UL_WRITE: u8 = 0xA2;

/// Pages returned by one plain READ (16 bytes).
pub const MF_UL_READ_PAGES: usize = 4;
/// Tearing flag value reported when the check is unsupported.
pub const MF_UL_DEFAULT_TEARING: u8 = 0xBD;
/// Page count assumed for pre-EV1 chips that do not answer GET_VERSION.
pub const MF_UL_DEFAULT_PAGES: usize = 16;
/// Counter slots on EV1/NTAG chips.
pub const MF_UL_COUNTER_COUNT: usize = 3;

// ============================================================================
// Mifare Classic
// ============================================================================

pub const MF_CLASSIC_READ: u8 = 0x30;
pub const MF_CLASSIC_BLOCK_SIZE: usize = 16;
pub const MF_CLASSIC_KEY_SIZE: usize = 6;

// ============================================================================
// Mifare DESFire native commands
// ============================================================================

pub const MF_DES_GET_VERSION: u8 = 0x60;
pub const MF_DES_GET_FREE_MEMORY: u8 = 0x6E;
pub const MF_DES_GET_KEY_SETTINGS: u8 = 0x45;
pub const MF_DES_GET_KEY_VERSION: u8 = 0x64;
pub const MF_DES_GET_APPLICATION_IDS: u8 = 0x6A;
pub const MF_DES_SELECT_APPLICATION: u8 = 0x5A;
pub const MF_DES_GET_FILE_IDS: u8 = 0x6F;
pub const MF_DES_GET_FILE_SETTINGS: u8 = 0xF5;
pub const MF_DES_READ_DATA: u8 = 0xBD;
pub const MF_DES_GET_VALUE: u8 = 0x6C;
pub const MF_DES_READ_RECORDS: u8 = 0xBB;

/// First response byte: operation completed.
pub const MF_DES_STATUS_OK: u8 = 0x00;
/// First response byte: additional continuation frame follows.
pub const MF_DES_STATUS_ADDITIONAL_FRAME: u8 = 0xAF;

/// Reassembly bound for chained responses (version, app/file lists).
pub const MF_DES_CHAINED_CAP: usize = 1024;
/// Reassembly bound for file contents.
pub const MF_DES_FILE_CAP: usize = 8192;

// ============================================================================
// EMV
// ============================================================================

/// Contactless PPSE discovery name.
pub const EMV_PPSE_NAME: &[u8] = b"2PAY.SYS.DDF01";

pub const EMV_INS_SELECT: u8 = 0xA4;
pub const EMV_INS_GPO: u8 = 0xA8;
pub const EMV_INS_READ_RECORD: u8 = 0xB2;

// BER-TLV tag numbers used by the read flow.
pub const EMV_TAG_AID: u32 = 0x4F;
pub const EMV_TAG_APP_LABEL: u32 = 0x50;
pub const EMV_TAG_TRACK2: u32 = 0x57;
pub const EMV_TAG_PAN: u32 = 0x5A;
pub const EMV_TAG_EXPIRY: u32 = 0x5F24;
pub const EMV_TAG_COUNTRY: u32 = 0x5F28;
pub const EMV_TAG_PDOL: u32 = 0x9F38;
pub const EMV_TAG_CURRENCY: u32 = 0x9F42;
pub const EMV_TAG_AFL: u32 = 0x94;
pub const EMV_TAG_RSP_TEMPLATE_1: u32 = 0x80;
pub const EMV_TAG_RSP_TEMPLATE_2: u32 = 0x77;

// PDOL entries the terminal fills with fixed values; anything else
// (amounts included) is zero-filled to the requested length.
pub const EMV_TAG_TTQ: u32 = 0x9F66;
pub const EMV_TAG_TERMINAL_COUNTRY: u32 = 0x9F1A;
pub const EMV_TAG_TERMINAL_CURRENCY: u32 = 0x5F2A;
pub const EMV_TAG_DATE: u32 = 0x9A;
pub const EMV_TAG_UNPREDICTABLE_NUMBER: u32 = 0x9F37;

// ============================================================================
// Dictionary resources
// ============================================================================

/// Well-known path of the user-managed key dictionary.
pub const USER_DICT_PATH: &str = "assets/mf_classic_dict_user.nfc";
/// Well-known path of the shipped system dictionary.
pub const SYSTEM_DICT_PATH: &str = "assets/mf_classic_dict.nfc";

/// Hex characters per 48-bit dictionary key line.
pub const DICT_KEY_LINE_LEN: usize = 12;
