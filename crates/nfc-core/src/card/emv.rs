//! EMV data model and response decoding.
//!
//! Pure transformations from SELECT/GPO/READ RECORD response bytes to the
//! typed record; the command sequencing lives in the worker routine.

use byteorder::{BigEndian, ByteOrder};

use crate::protocol::constants::*;
use crate::protocol::tlv::{find_tag, parse_dol};

/// Fixed terminal parameters used to satisfy PDOL requests.
const TERMINAL_TTQ: [u8; 4] = [0x27, 0x00, 0x00, 0x00];
const TERMINAL_COUNTRY: [u8; 2] = [0x08, 0x40];
const TERMINAL_CURRENCY: [u8; 2] = [0x08, 0x40];
const TERMINAL_DATE: [u8; 3] = [0x25, 0x01, 0x01];
const TERMINAL_UN: [u8; 4] = [0x12, 0x34, 0x56, 0x78];

/// Result record of an EMV read session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmvData {
    pub name: String,
    pub aid: Vec<u8>,
    /// PAN digits (unpacked from BCD).
    pub pan: Vec<u8>,
    pub exp_month: u8,
    pub exp_year: u8,
    /// Raw BCD-coded ISO4217 value, e.g. 0x0978 for EUR.
    pub currency_code: u16,
    /// Raw BCD-coded ISO3166 value.
    pub country_code: u16,
}

impl EmvData {
    pub fn pan_string(&self) -> String {
        self.pan.iter().map(|d| (b'0' + d) as char).collect()
    }

    /// Pull PAN/expiry/currency/country out of a GPO or record response.
    /// Fields already present are kept; only missing ones are filled.
    pub fn absorb(&mut self, response: &[u8]) {
        let body = find_tag(response, EMV_TAG_RSP_TEMPLATE_2).unwrap_or(response);

        if self.pan.is_empty()
            && let Some(pan) = find_tag(body, EMV_TAG_PAN)
        {
            self.pan = unpack_bcd(pan);
        }
        if let Some(track2) = find_tag(body, EMV_TAG_TRACK2) {
            let (pan, expiry) = parse_track2(track2);
            if self.pan.is_empty() {
                self.pan = pan;
            }
            if self.exp_year == 0
                && let Some((year, month)) = expiry
            {
                self.exp_year = year;
                self.exp_month = month;
            }
        }
        if self.exp_year == 0
            && let Some(expiry) = find_tag(body, EMV_TAG_EXPIRY)
            && expiry.len() >= 2
        {
            self.exp_year = expiry[0];
            self.exp_month = expiry[1];
        }
        if self.currency_code == 0
            && let Some(currency) = find_tag(body, EMV_TAG_CURRENCY)
            && currency.len() >= 2
        {
            self.currency_code = BigEndian::read_u16(currency);
        }
        if self.country_code == 0
            && let Some(country) = find_tag(body, EMV_TAG_COUNTRY)
            && country.len() >= 2
        {
            self.country_code = BigEndian::read_u16(country);
        }
    }
}

/// Unpack BCD digits, dropping the 0xF filler nibble.
fn unpack_bcd(raw: &[u8]) -> Vec<u8> {
    let mut digits = Vec::with_capacity(raw.len() * 2);
    for &b in raw {
        for nibble in [b >> 4, b & 0x0F] {
            if nibble <= 9 {
                digits.push(nibble);
            }
        }
    }
    digits
}

/// Split a track-2 equivalent value into PAN digits and (year, month).
/// The 0xD nibble separates PAN from the YYMM expiry.
fn parse_track2(raw: &[u8]) -> (Vec<u8>, Option<(u8, u8)>) {
    let mut nibbles = Vec::with_capacity(raw.len() * 2);
    for &b in raw {
        nibbles.push(b >> 4);
        nibbles.push(b & 0x0F);
    }
    let Some(sep) = nibbles.iter().position(|&n| n == 0xD) else {
        return (nibbles.into_iter().filter(|&n| n <= 9).collect(), None);
    };
    let pan = nibbles[..sep].to_vec();
    let expiry = if nibbles.len() >= sep + 5 {
        let year = nibbles[sep + 1] * 10 + nibbles[sep + 2];
        let month = nibbles[sep + 3] * 10 + nibbles[sep + 4];
        Some((year, month))
    } else {
        None
    };
    (pan, expiry)
}

/// Build the GPO data field: the requested PDOL entries filled with fixed
/// terminal parameters, wrapped in the command template (tag 0x83).
pub fn build_gpo_data(pdol: Option<&[u8]>) -> Vec<u8> {
    let mut filled = Vec::new();
    if let Some(pdol) = pdol {
        for (tag, len) in parse_dol(pdol) {
            let value: &[u8] = match tag {
                EMV_TAG_TTQ => &TERMINAL_TTQ,
                EMV_TAG_TERMINAL_COUNTRY => &TERMINAL_COUNTRY,
                EMV_TAG_TERMINAL_CURRENCY => &TERMINAL_CURRENCY,
                EMV_TAG_DATE => &TERMINAL_DATE,
                EMV_TAG_UNPREDICTABLE_NUMBER => &TERMINAL_UN,
                // Amount and anything unknown: zeros of the requested size.
                _ => &[],
            };
            for i in 0..len {
                filled.push(value.get(i).copied().unwrap_or(0));
            }
        }
    }
    let mut data = vec![0x83, filled.len() as u8];
    data.extend_from_slice(&filled);
    data
}

/// One Application File Locator entry: a file and a record range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AflEntry {
    pub sfi: u8,
    pub first_record: u8,
    pub last_record: u8,
}

/// Extract AFL entries from a GPO response (format 2 tag 0x94, or format 1
/// tag 0x80 with the two AIP bytes skipped).
pub fn parse_afl(gpo_response: &[u8]) -> Vec<AflEntry> {
    let body = find_tag(gpo_response, EMV_TAG_RSP_TEMPLATE_2).unwrap_or(gpo_response);
    let afl: &[u8] = if let Some(afl) = find_tag(body, EMV_TAG_AFL) {
        afl
    } else if let Some(template) = find_tag(gpo_response, EMV_TAG_RSP_TEMPLATE_1) {
        if template.len() < 2 {
            return Vec::new();
        }
        &template[2..]
    } else {
        return Vec::new();
    };

    afl.chunks_exact(4)
        .map(|entry| AflEntry {
            sfi: entry[0] >> 3,
            first_record: entry[1],
            last_record: entry[2],
        })
        .collect()
}
