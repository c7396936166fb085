//! Mifare Classic data model: geometry, keys, sector trailers.

use std::fmt;

use crate::protocol::constants::{MF_CLASSIC_BLOCK_SIZE, MF_CLASSIC_KEY_SIZE};

/// Classic chip subtype. Determines sector/block geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfClassicType {
    /// Mifare Mini: 5 sectors of 4 blocks.
    Mini,
    /// Mifare Classic 1K: 16 sectors of 4 blocks.
    K1,
    /// Mifare Classic 4K: 32 sectors of 4 blocks, then 8 sectors of 16.
    K4,
}

impl fmt::Display for MfClassicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MfClassicType::Mini => write!(f, "Mini"),
            MfClassicType::K1 => write!(f, "1K"),
            MfClassicType::K4 => write!(f, "4K"),
        }
    }
}

impl MfClassicType {
    pub fn total_sectors(&self) -> u8 {
        match self {
            MfClassicType::Mini => 5,
            MfClassicType::K1 => 16,
            MfClassicType::K4 => 40,
        }
    }

    pub fn total_blocks(&self) -> u16 {
        match self {
            MfClassicType::Mini => 20,
            MfClassicType::K1 => 64,
            MfClassicType::K4 => 256,
        }
    }

    /// Blocks in `sector`. Panics on a sector index beyond this chip's
    /// geometry: that is a caller programming error, not a runtime
    /// condition.
    pub fn blocks_in_sector(&self, sector: u8) -> u8 {
        assert!(
            sector < self.total_sectors(),
            "sector {} out of range for Mifare Classic {}",
            sector,
            self
        );
        if sector < 32 { 4 } else { 16 }
    }

    /// Absolute block number of the first block of `sector`.
    pub fn first_block_of_sector(&self, sector: u8) -> u16 {
        assert!(
            sector < self.total_sectors(),
            "sector {} out of range for Mifare Classic {}",
            sector,
            self
        );
        if sector < 32 {
            sector as u16 * 4
        } else {
            128 + (sector as u16 - 32) * 16
        }
    }

    /// Absolute block number of the sector trailer of `sector`.
    pub fn sector_trailer_block(&self, sector: u8) -> u16 {
        self.first_block_of_sector(sector) + self.blocks_in_sector(sector) as u16 - 1
    }
}

/// 48-bit Crypto1 key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MfClassicKey(pub [u8; MF_CLASSIC_KEY_SIZE]);

impl MfClassicKey {
    pub fn from_u64(value: u64) -> Self {
        let bytes = value.to_be_bytes();
        let mut key = [0u8; MF_CLASSIC_KEY_SIZE];
        key.copy_from_slice(&bytes[2..]);
        Self(key)
    }

    pub fn to_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes[2..].copy_from_slice(&self.0);
        u64::from_be_bytes(bytes)
    }
}

impl fmt::Display for MfClassicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

/// Which key slot an authentication targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MfClassicKeyType {
    A,
    B,
}

/// One 16-byte block.
pub type MfClassicBlock = [u8; MF_CLASSIC_BLOCK_SIZE];

/// Decoded sector trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorTrailer {
    pub key_a: MfClassicKey,
    pub access_bits: [u8; 4],
    pub key_b: MfClassicKey,
}

impl SectorTrailer {
    pub fn parse(block: &MfClassicBlock) -> Self {
        let mut key_a = [0u8; 6];
        let mut key_b = [0u8; 6];
        let mut access_bits = [0u8; 4];
        key_a.copy_from_slice(&block[0..6]);
        access_bits.copy_from_slice(&block[6..10]);
        key_b.copy_from_slice(&block[10..16]);
        Self {
            key_a: MfClassicKey(key_a),
            access_bits,
            key_b: MfClassicKey(key_b),
        }
    }

    /// Access condition bits (C1, C2, C3) for block index 0..=3 within the
    /// sector, taken from the non-inverted nibbles.
    fn condition(&self, block_index: u8) -> u8 {
        let c1 = (self.access_bits[1] >> 4 >> block_index) & 1;
        let c2 = (self.access_bits[2] >> block_index) & 1;
        let c3 = (self.access_bits[2] >> 4 >> block_index) & 1;
        (c1 << 2) | (c2 << 1) | c3
    }

    /// Whether Key B can be read from the trailer after a Key A
    /// authentication. Holds for trailer conditions 000, 001 and 010.
    pub fn key_b_readable(&self) -> bool {
        matches!(self.condition(3), 0b000 | 0b001 | 0b010)
    }
}

/// Recovered key pair for one sector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectorKeys {
    pub a: Option<MfClassicKey>,
    pub b: Option<MfClassicKey>,
}

impl SectorKeys {
    pub fn complete(&self) -> bool {
        self.a.is_some() && self.b.is_some()
    }

    pub fn any(&self) -> Option<(MfClassicKey, MfClassicKeyType)> {
        if let Some(key) = self.a {
            Some((key, MfClassicKeyType::A))
        } else {
            self.b.map(|key| (key, MfClassicKeyType::B))
        }
    }
}

/// Result record of a Classic read/attack session.
#[derive(Debug, Clone)]
pub struct MfClassicData {
    pub card_type: MfClassicType,
    pub blocks: Vec<MfClassicBlock>,
    /// One bit per block, set only after a validated read.
    read_bitmap: [u64; 4],
    pub sector_keys: Vec<SectorKeys>,
}

impl MfClassicData {
    pub fn new(card_type: MfClassicType) -> Self {
        Self {
            card_type,
            blocks: vec![[0u8; MF_CLASSIC_BLOCK_SIZE]; card_type.total_blocks() as usize],
            read_bitmap: [0; 4],
            sector_keys: vec![SectorKeys::default(); card_type.total_sectors() as usize],
        }
    }

    pub fn set_block(&mut self, block: u16, data: MfClassicBlock) {
        self.blocks[block as usize] = data;
        self.read_bitmap[block as usize / 64] |= 1u64 << (block % 64);
    }

    pub fn is_block_read(&self, block: u16) -> bool {
        self.read_bitmap[block as usize / 64] & (1u64 << (block % 64)) != 0
    }

    pub fn blocks_read(&self) -> u32 {
        self.read_bitmap.iter().map(|w| w.count_ones()).sum()
    }

    /// Sectors with at least one block read.
    pub fn sectors_read(&self) -> u8 {
        (0..self.card_type.total_sectors())
            .filter(|&s| {
                let first = self.card_type.first_block_of_sector(s);
                let count = self.card_type.blocks_in_sector(s) as u16;
                (first..first + count).any(|b| self.is_block_read(b))
            })
            .count() as u8
    }

    /// Sectors with at least one recovered key.
    pub fn sectors_with_keys(&self) -> u8 {
        self.sector_keys.iter().filter(|k| k.any().is_some()).count() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_1k() {
        let t = MfClassicType::K1;
        assert_eq!(t.total_sectors(), 16);
        assert_eq!(t.total_blocks(), 64);
        assert_eq!(t.blocks_in_sector(0), 4);
        assert_eq!(t.first_block_of_sector(2), 8);
        assert_eq!(t.sector_trailer_block(0), 3);
        assert_eq!(t.sector_trailer_block(15), 63);
    }

    #[test]
    fn test_geometry_4k_large_sectors() {
        let t = MfClassicType::K4;
        assert_eq!(t.blocks_in_sector(31), 4);
        assert_eq!(t.blocks_in_sector(32), 16);
        assert_eq!(t.first_block_of_sector(32), 128);
        assert_eq!(t.sector_trailer_block(32), 143);
        assert_eq!(t.sector_trailer_block(39), 255);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_geometry_contract_violation_panics() {
        MfClassicType::K1.sector_trailer_block(16);
    }

    #[test]
    fn test_key_roundtrip() {
        let key = MfClassicKey::from_u64(0xA0A1A2A3A4A5);
        assert_eq!(key.0, [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]);
        assert_eq!(key.to_u64(), 0xA0A1A2A3A4A5);
        assert_eq!(key.to_string(), "A0A1A2A3A4A5");
    }

    #[test]
    fn test_trailer_parse() {
        let mut block = [0u8; 16];
        block[0..6].copy_from_slice(&[0xFF; 6]);
        // Transport configuration access bits: FF 07 80 69
        block[6..10].copy_from_slice(&[0xFF, 0x07, 0x80, 0x69]);
        block[10..16].copy_from_slice(&[0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]);
        let trailer = SectorTrailer::parse(&block);
        assert_eq!(trailer.key_a, MfClassicKey([0xFF; 6]));
        assert_eq!(trailer.key_b, MfClassicKey([0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]));
        // Transport condition for the trailer is 001: key B readable.
        assert!(trailer.key_b_readable());
    }

    #[test]
    fn test_trailer_key_b_hidden() {
        let mut block = [0u8; 16];
        // Condition 111 for the trailer: key B never readable.
        block[6..10].copy_from_slice(&[0x0F, 0x87, 0x8F, 0x00]);
        let trailer = SectorTrailer::parse(&block);
        assert!(!trailer.key_b_readable());
    }

    #[test]
    fn test_read_bitmap() {
        let mut data = MfClassicData::new(MfClassicType::K1);
        assert_eq!(data.blocks_read(), 0);
        data.set_block(0, [1u8; 16]);
        data.set_block(63, [2u8; 16]);
        assert!(data.is_block_read(0));
        assert!(!data.is_block_read(1));
        assert!(data.is_block_read(63));
        assert_eq!(data.blocks_read(), 2);
        assert_eq!(data.sectors_read(), 2);
    }
}
