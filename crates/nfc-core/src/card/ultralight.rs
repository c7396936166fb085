//! Mifare Ultralight / NTAG data model and decoders.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::protocol::constants::{
    MF_UL_COUNTER_COUNT, MF_UL_DEFAULT_PAGES, MF_UL_DEFAULT_TEARING,
};

/// Ultralight-family subtype, derived from the GET_VERSION response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfUltralightType {
    /// Pre-EV1 Ultralight (no GET_VERSION support).
    Ultralight,
    UlEv1_11,
    UlEv1_21,
    Ntag213,
    Ntag215,
    Ntag216,
}

impl fmt::Display for MfUltralightType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MfUltralightType::Ultralight => write!(f, "Ultralight"),
            MfUltralightType::UlEv1_11 => write!(f, "Ultralight EV1 MF0UL11"),
            MfUltralightType::UlEv1_21 => write!(f, "Ultralight EV1 MF0UL21"),
            MfUltralightType::Ntag213 => write!(f, "NTAG213"),
            MfUltralightType::Ntag215 => write!(f, "NTAG215"),
            MfUltralightType::Ntag216 => write!(f, "NTAG216"),
        }
    }
}

impl MfUltralightType {
    pub fn total_pages(&self) -> usize {
        match self {
            MfUltralightType::Ultralight => MF_UL_DEFAULT_PAGES,
            MfUltralightType::UlEv1_11 => 20,
            MfUltralightType::UlEv1_21 => 41,
            MfUltralightType::Ntag213 => 45,
            MfUltralightType::Ntag215 => 135,
            MfUltralightType::Ntag216 => 231,
        }
    }

    /// Pre-EV1 chips only support the plain 4-page READ.
    pub fn supports_fast_read(&self) -> bool {
        !matches!(self, MfUltralightType::Ultralight)
    }

    pub fn supports_counters(&self) -> bool {
        !matches!(self, MfUltralightType::Ultralight)
    }
}

/// Decoded 8-byte GET_VERSION response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MfUltralightVersion {
    pub vendor_id: u8,
    pub prod_type: u8,
    pub prod_subtype: u8,
    pub major: u8,
    pub minor: u8,
    pub storage_size: u8,
    pub protocol_type: u8,
}

impl MfUltralightVersion {
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() != 8 {
            return None;
        }
        Some(Self {
            vendor_id: raw[1],
            prod_type: raw[2],
            prod_subtype: raw[3],
            major: raw[4],
            minor: raw[5],
            storage_size: raw[6],
            protocol_type: raw[7],
        })
    }

    /// Map (product type, storage size) to a chip subtype.
    pub fn card_type(&self) -> MfUltralightType {
        match (self.prod_type, self.storage_size) {
            (0x03, 0x0B) => MfUltralightType::UlEv1_11,
            (0x03, 0x0E) => MfUltralightType::UlEv1_21,
            (0x04, 0x0F) => MfUltralightType::Ntag213,
            (0x04, 0x11) => MfUltralightType::Ntag215,
            (0x04, 0x13) => MfUltralightType::Ntag216,
            _ => MfUltralightType::Ultralight,
        }
    }
}

/// 24-bit little-endian counter value from a READ_CNT response.
pub fn parse_counter(raw: &[u8]) -> Option<u32> {
    if raw.len() < 3 {
        return None;
    }
    Some(LittleEndian::read_u24(raw))
}

/// One 4-byte page.
pub type MfUltralightPage = [u8; 4];

/// Result record of an Ultralight read session.
#[derive(Debug, Clone)]
pub struct MfUltralightData {
    pub card_type: MfUltralightType,
    /// Absent on pre-EV1 chips that time out on GET_VERSION.
    pub version: Option<MfUltralightVersion>,
    pub pages: Vec<MfUltralightPage>,
    /// Number of pages successfully read; never exceeds the subtype's
    /// page count.
    pub pages_read: usize,
    pub counters: [u32; MF_UL_COUNTER_COUNT],
    pub tearing_flags: [u8; MF_UL_COUNTER_COUNT],
}

impl MfUltralightData {
    pub fn new(card_type: MfUltralightType, version: Option<MfUltralightVersion>) -> Self {
        Self {
            card_type,
            version,
            pages: vec![[0u8; 4]; card_type.total_pages()],
            pages_read: 0,
            counters: [0; MF_UL_COUNTER_COUNT],
            tearing_flags: [MF_UL_DEFAULT_TEARING; MF_UL_COUNTER_COUNT],
        }
    }

    /// Store a run of pages from a READ/FAST_READ response, clamped to the
    /// page count. Returns how many pages were stored.
    pub fn fill_pages(&mut self, start: usize, raw: &[u8]) -> usize {
        let mut stored = 0;
        for (i, chunk) in raw.chunks_exact(4).enumerate() {
            let page = start + i;
            if page >= self.pages.len() {
                break;
            }
            self.pages[page].copy_from_slice(chunk);
            stored += 1;
        }
        self.pages_read = (self.pages_read + stored).min(self.pages.len());
        stored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse_ntag215() {
        let raw = [0x00, 0x04, 0x04, 0x02, 0x01, 0x00, 0x11, 0x03];
        let version = MfUltralightVersion::parse(&raw).unwrap();
        assert_eq!(version.vendor_id, 0x04);
        assert_eq!(version.card_type(), MfUltralightType::Ntag215);
        assert_eq!(version.card_type().total_pages(), 135);
    }

    #[test]
    fn test_version_parse_ul11() {
        let raw = [0x00, 0x04, 0x03, 0x01, 0x01, 0x00, 0x0B, 0x03];
        let version = MfUltralightVersion::parse(&raw).unwrap();
        assert_eq!(version.card_type(), MfUltralightType::UlEv1_11);
    }

    #[test]
    fn test_version_parse_wrong_length() {
        assert!(MfUltralightVersion::parse(&[0x00; 7]).is_none());
        assert!(MfUltralightVersion::parse(&[0x00; 9]).is_none());
    }

    #[test]
    fn test_unknown_version_maps_to_plain_ultralight() {
        let raw = [0x00, 0x04, 0x99, 0x01, 0x01, 0x00, 0x55, 0x03];
        let version = MfUltralightVersion::parse(&raw).unwrap();
        assert_eq!(version.card_type(), MfUltralightType::Ultralight);
    }

    #[test]
    fn test_parse_counter() {
        assert_eq!(parse_counter(&[0x2A, 0x01, 0x00]), Some(0x12A));
        assert_eq!(parse_counter(&[0x2A]), None);
    }

    #[test]
    fn test_fill_pages_clamps_to_extent() {
        let mut data = MfUltralightData::new(MfUltralightType::Ultralight, None);
        // One 16-byte READ at page 14 wraps past the 16-page end.
        let stored = data.fill_pages(14, &[0xAA; 16]);
        assert_eq!(stored, 2);
        assert_eq!(data.pages_read, 2);
        assert_eq!(data.pages[15], [0xAA; 4]);
    }
}
