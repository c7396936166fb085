//! Mifare DESFire data model and decoders.
//!
//! Pure transformations from (reassembled) native-command responses to
//! typed records. The command walk itself lives in the worker routine.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DesfireDecodeError {
    #[error("Response too small: expected {expected}, got {actual}")]
    TooSmall { expected: usize, actual: usize },
    #[error("Unknown file type 0x{0:02X}")]
    UnknownFileType(u8),
}

/// One 7-byte hardware/software version block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MfDesfireVersionInfo {
    pub vendor_id: u8,
    pub card_type: u8,
    pub card_subtype: u8,
    pub major: u8,
    pub minor: u8,
    pub storage_size: u8,
    pub protocol: u8,
}

impl MfDesfireVersionInfo {
    fn parse(raw: &[u8]) -> Self {
        Self {
            vendor_id: raw[0],
            card_type: raw[1],
            card_subtype: raw[2],
            major: raw[3],
            minor: raw[4],
            storage_size: raw[5],
            protocol: raw[6],
        }
    }
}

/// Decoded 28-byte GET_VERSION response (three chained frames).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MfDesfireVersion {
    pub hardware: MfDesfireVersionInfo,
    pub software: MfDesfireVersionInfo,
    pub uid: [u8; 7],
    pub batch: [u8; 5],
    pub production_week: u8,
    pub production_year: u8,
}

impl MfDesfireVersion {
    pub const SIZE: usize = 28;

    pub fn parse(raw: &[u8]) -> Result<Self, DesfireDecodeError> {
        if raw.len() < Self::SIZE {
            return Err(DesfireDecodeError::TooSmall {
                expected: Self::SIZE,
                actual: raw.len(),
            });
        }
        let mut uid = [0u8; 7];
        let mut batch = [0u8; 5];
        uid.copy_from_slice(&raw[14..21]);
        batch.copy_from_slice(&raw[21..26]);
        Ok(Self {
            hardware: MfDesfireVersionInfo::parse(&raw[0..7]),
            software: MfDesfireVersionInfo::parse(&raw[7..14]),
            uid,
            batch,
            production_week: raw[26],
            production_year: raw[27],
        })
    }
}

/// 24-bit little-endian free memory value.
pub fn parse_free_memory(raw: &[u8]) -> Option<u32> {
    if raw.len() < 3 {
        return None;
    }
    Some(LittleEndian::read_u24(raw))
}

/// Decoded GET_KEY_SETTINGS response (2 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MfDesfireKeySettings {
    pub change_key_id: u8,
    pub config_changeable: bool,
    pub free_create_delete: bool,
    pub free_directory_list: bool,
    pub master_key_changeable: bool,
    pub flags: u8,
    pub max_keys: u8,
}

impl MfDesfireKeySettings {
    pub fn parse(raw: &[u8]) -> Result<Self, DesfireDecodeError> {
        if raw.len() < 2 {
            return Err(DesfireDecodeError::TooSmall {
                expected: 2,
                actual: raw.len(),
            });
        }
        let settings = raw[0];
        Ok(Self {
            change_key_id: settings >> 4,
            config_changeable: settings & 0x08 != 0,
            free_create_delete: settings & 0x04 != 0,
            free_directory_list: settings & 0x02 != 0,
            master_key_changeable: settings & 0x01 != 0,
            flags: raw[1] >> 4,
            max_keys: raw[1] & 0x0F,
        })
    }
}

/// Declared type of a DESFire file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfDesfireFileType {
    Standard,
    Backup,
    Value,
    LinearRecord,
    CyclicRecord,
}

impl MfDesfireFileType {
    pub fn from_byte(b: u8) -> Result<Self, DesfireDecodeError> {
        match b {
            0x00 => Ok(Self::Standard),
            0x01 => Ok(Self::Backup),
            0x02 => Ok(Self::Value),
            0x03 => Ok(Self::LinearRecord),
            0x04 => Ok(Self::CyclicRecord),
            other => Err(DesfireDecodeError::UnknownFileType(other)),
        }
    }

    /// Record-type files are read with READ_RECORDS, value files with
    /// GET_VALUE, everything else with READ_DATA.
    pub fn is_record(&self) -> bool {
        matches!(self, Self::LinearRecord | Self::CyclicRecord)
    }
}

impl fmt::Display for MfDesfireFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Backup => write!(f, "backup"),
            Self::Value => write!(f, "value"),
            Self::LinearRecord => write!(f, "linear record"),
            Self::CyclicRecord => write!(f, "cyclic record"),
        }
    }
}

/// Type-dependent tail of a GET_FILE_SETTINGS response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfDesfireFileParams {
    Data {
        size: u32,
    },
    Value {
        lower_limit: u32,
        upper_limit: u32,
        limited_credit_value: u32,
        limited_credit_enabled: bool,
    },
    Record {
        record_size: u32,
        max_records: u32,
        current_records: u32,
    },
}

/// Decoded GET_FILE_SETTINGS response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MfDesfireFileSettings {
    pub file_type: MfDesfireFileType,
    pub comm: u8,
    pub access_rights: u16,
    pub params: MfDesfireFileParams,
}

impl MfDesfireFileSettings {
    pub fn parse(raw: &[u8]) -> Result<Self, DesfireDecodeError> {
        if raw.len() < 4 {
            return Err(DesfireDecodeError::TooSmall {
                expected: 4,
                actual: raw.len(),
            });
        }
        let file_type = MfDesfireFileType::from_byte(raw[0])?;
        let comm = raw[1];
        let access_rights = LittleEndian::read_u16(&raw[2..4]);
        let tail = &raw[4..];
        let params = match file_type {
            MfDesfireFileType::Standard | MfDesfireFileType::Backup => {
                if tail.len() < 3 {
                    return Err(DesfireDecodeError::TooSmall {
                        expected: 7,
                        actual: raw.len(),
                    });
                }
                MfDesfireFileParams::Data {
                    size: LittleEndian::read_u24(tail),
                }
            }
            MfDesfireFileType::Value => {
                if tail.len() < 13 {
                    return Err(DesfireDecodeError::TooSmall {
                        expected: 17,
                        actual: raw.len(),
                    });
                }
                MfDesfireFileParams::Value {
                    lower_limit: LittleEndian::read_u32(&tail[0..4]),
                    upper_limit: LittleEndian::read_u32(&tail[4..8]),
                    limited_credit_value: LittleEndian::read_u32(&tail[8..12]),
                    limited_credit_enabled: tail[12] & 0x01 != 0,
                }
            }
            MfDesfireFileType::LinearRecord | MfDesfireFileType::CyclicRecord => {
                if tail.len() < 9 {
                    return Err(DesfireDecodeError::TooSmall {
                        expected: 13,
                        actual: raw.len(),
                    });
                }
                MfDesfireFileParams::Record {
                    record_size: LittleEndian::read_u24(&tail[0..3]),
                    max_records: LittleEndian::read_u24(&tail[3..6]),
                    current_records: LittleEndian::read_u24(&tail[6..9]),
                }
            }
        };
        Ok(Self {
            file_type,
            comm,
            access_rights,
            params,
        })
    }
}

/// Contents read from one file, by declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MfDesfireFileContents {
    Data(Vec<u8>),
    Value(u32),
    Records(Vec<u8>),
}

/// One enumerated file.
#[derive(Debug, Clone)]
pub struct MfDesfireFile {
    pub id: u8,
    pub settings: MfDesfireFileSettings,
    /// Absent when the content read failed; the file stays listed.
    pub contents: Option<MfDesfireFileContents>,
}

/// Application id in wire order (LSB first).
pub type MfDesfireAppId = [u8; 3];

/// Split a chained GET_APPLICATION_IDS payload into 3-byte ids.
pub fn parse_application_ids(raw: &[u8]) -> Vec<MfDesfireAppId> {
    raw.chunks_exact(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect()
}

/// One enumerated application. Files are owned by the application and
/// torn down with it.
#[derive(Debug, Clone)]
pub struct MfDesfireApplication {
    pub id: MfDesfireAppId,
    pub key_settings: Option<MfDesfireKeySettings>,
    pub key_versions: Vec<u8>,
    pub files: Vec<MfDesfireFile>,
}

impl MfDesfireApplication {
    pub fn new(id: MfDesfireAppId) -> Self {
        Self {
            id,
            key_settings: None,
            key_versions: Vec::new(),
            files: Vec::new(),
        }
    }
}

/// Result record of a DESFire enumeration session.
#[derive(Debug, Clone)]
pub struct MfDesfireData {
    pub version: MfDesfireVersion,
    /// Pre-EV1 cards legitimately lack the command; absence is not an
    /// error.
    pub free_memory: Option<u32>,
    pub master_key_settings: Option<MfDesfireKeySettings>,
    pub master_key_versions: Vec<u8>,
    pub applications: Vec<MfDesfireApplication>,
}

impl MfDesfireData {
    pub fn new(version: MfDesfireVersion) -> Self {
        Self {
            version,
            free_memory: None,
            master_key_settings: None,
            master_key_versions: Vec::new(),
            applications: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version_bytes() -> Vec<u8> {
        let mut raw = vec![
            0x04, 0x01, 0x01, 0x01, 0x00, 0x1A, 0x05, // hardware
            0x04, 0x01, 0x01, 0x01, 0x04, 0x1A, 0x05, // software
        ];
        raw.extend_from_slice(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]); // uid
        raw.extend_from_slice(&[0xBA, 0x3E, 0x66, 0x77, 0x88]); // batch
        raw.extend_from_slice(&[0x04, 0x19]); // week 4, year 2019
        raw
    }

    #[test]
    fn test_version_parse() {
        let version = MfDesfireVersion::parse(&version_bytes()).unwrap();
        assert_eq!(version.hardware.storage_size, 0x1A);
        assert_eq!(version.software.major, 0x01);
        assert_eq!(version.uid, [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]);
        assert_eq!(version.production_year, 0x19);
    }

    #[test]
    fn test_version_too_small() {
        assert!(matches!(
            MfDesfireVersion::parse(&version_bytes()[..20]),
            Err(DesfireDecodeError::TooSmall { .. })
        ));
    }

    #[test]
    fn test_free_memory() {
        assert_eq!(parse_free_memory(&[0x00, 0x10, 0x00]), Some(0x1000));
        assert_eq!(parse_free_memory(&[0x00]), None);
    }

    #[test]
    fn test_key_settings() {
        let settings = MfDesfireKeySettings::parse(&[0x0F, 0x82]).unwrap();
        assert_eq!(settings.change_key_id, 0);
        assert!(settings.config_changeable);
        assert!(settings.free_create_delete);
        assert!(settings.free_directory_list);
        assert!(settings.master_key_changeable);
        assert_eq!(settings.flags, 0x8);
        assert_eq!(settings.max_keys, 2);
    }

    #[test]
    fn test_file_settings_data() {
        let settings =
            MfDesfireFileSettings::parse(&[0x00, 0x00, 0xEE, 0xEE, 0x20, 0x00, 0x00]).unwrap();
        assert_eq!(settings.file_type, MfDesfireFileType::Standard);
        assert_eq!(settings.access_rights, 0xEEEE);
        assert_eq!(settings.params, MfDesfireFileParams::Data { size: 0x20 });
    }

    #[test]
    fn test_file_settings_value() {
        let mut raw = vec![0x02, 0x00, 0x00, 0x11];
        raw.extend_from_slice(&0u32.to_le_bytes());
        raw.extend_from_slice(&1000u32.to_le_bytes());
        raw.extend_from_slice(&0u32.to_le_bytes());
        raw.push(0x00);
        let settings = MfDesfireFileSettings::parse(&raw).unwrap();
        assert_eq!(settings.file_type, MfDesfireFileType::Value);
        assert_eq!(
            settings.params,
            MfDesfireFileParams::Value {
                lower_limit: 0,
                upper_limit: 1000,
                limited_credit_value: 0,
                limited_credit_enabled: false,
            }
        );
    }

    #[test]
    fn test_file_settings_record() {
        let raw = [
            0x04, 0x00, 0x00, 0x11, 0x10, 0x00, 0x00, 0x05, 0x00, 0x00, 0x02, 0x00, 0x00,
        ];
        let settings = MfDesfireFileSettings::parse(&raw).unwrap();
        assert!(settings.file_type.is_record());
        assert_eq!(
            settings.params,
            MfDesfireFileParams::Record {
                record_size: 0x10,
                max_records: 5,
                current_records: 2,
            }
        );
    }

    #[test]
    fn test_file_settings_unknown_type() {
        assert!(matches!(
            MfDesfireFileSettings::parse(&[0x09, 0x00, 0x00, 0x11]),
            Err(DesfireDecodeError::UnknownFileType(0x09))
        ));
    }

    #[test]
    fn test_application_ids() {
        let ids = parse_application_ids(&[0x01, 0x00, 0x00, 0x56, 0x34, 0x12]);
        assert_eq!(ids, vec![[0x01, 0x00, 0x00], [0x56, 0x34, 0x12]]);
    }
}
