//! Minimal BER-TLV traversal for EMV responses.
//!
//! Tags are written as their big-endian byte value (`0x9F38` is the two
//! bytes `9F 38`). Only what the read flow needs: top-level iteration,
//! recursion into constructed tags, and DOL entry parsing.

/// Parse one tag starting at `pos`. Returns (tag, constructed, next pos).
fn parse_tag(data: &[u8], pos: usize) -> Option<(u32, bool, usize)> {
    let first = *data.get(pos)?;
    let constructed = first & 0x20 != 0;
    let mut tag = first as u32;
    let mut pos = pos + 1;
    if first & 0x1F == 0x1F {
        // Multi-byte tag: continue while bit 8 is set.
        loop {
            let b = *data.get(pos)?;
            tag = (tag << 8) | b as u32;
            pos += 1;
            if b & 0x80 == 0 {
                break;
            }
        }
    }
    Some((tag, constructed, pos))
}

/// Parse one length field starting at `pos`. Returns (length, next pos).
fn parse_len(data: &[u8], pos: usize) -> Option<(usize, usize)> {
    let first = *data.get(pos)?;
    if first & 0x80 == 0 {
        return Some((first as usize, pos + 1));
    }
    let num_bytes = (first & 0x7F) as usize;
    if num_bytes == 0 || num_bytes > 4 {
        return None;
    }
    let mut len = 0usize;
    for i in 0..num_bytes {
        len = (len << 8) | *data.get(pos + 1 + i)? as usize;
    }
    Some((len, pos + 1 + num_bytes))
}

/// Find the value of `tag` in `data`, recursing into constructed TLVs.
pub fn find_tag(data: &[u8], tag: u32) -> Option<&[u8]> {
    let mut pos = 0;
    while pos < data.len() {
        // Skip inter-TLV padding.
        if data[pos] == 0x00 || data[pos] == 0xFF {
            pos += 1;
            continue;
        }
        let (cur, constructed, after_tag) = parse_tag(data, pos)?;
        let (len, value_pos) = parse_len(data, after_tag)?;
        let value = data.get(value_pos..value_pos + len)?;
        if cur == tag {
            return Some(value);
        }
        if constructed
            && let Some(found) = find_tag(value, tag)
        {
            return Some(found);
        }
        pos = value_pos + len;
    }
    None
}

/// Parse a Data Object List: a sequence of (tag, expected length) entries
/// with no values, as carried by PDOL (tag 9F38).
pub fn parse_dol(data: &[u8]) -> Vec<(u32, usize)> {
    let mut entries = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let Some((tag, _, after_tag)) = parse_tag(data, pos) else {
            break;
        };
        let Some(&len) = data.get(after_tag) else {
            break;
        };
        entries.push((tag, len as usize));
        pos = after_tag + 1;
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_flat_tag() {
        let data = [0x5A, 0x03, 0x11, 0x22, 0x33, 0x5F, 0x24, 0x01, 0x99];
        assert_eq!(find_tag(&data, 0x5A), Some(&[0x11, 0x22, 0x33][..]));
        assert_eq!(find_tag(&data, 0x5F24), Some(&[0x99][..]));
        assert_eq!(find_tag(&data, 0x57), None);
    }

    #[test]
    fn test_find_nested_tag() {
        // 6F (constructed) > A5 (constructed) > 50 "AB"
        let data = [0x6F, 0x06, 0xA5, 0x04, 0x50, 0x02, 0x41, 0x42];
        assert_eq!(find_tag(&data, 0x50), Some(&b"AB"[..]));
    }

    #[test]
    fn test_long_form_length() {
        let mut data = vec![0x5A, 0x81, 0x80];
        data.extend(std::iter::repeat_n(0xAB, 0x80));
        let value = find_tag(&data, 0x5A).unwrap();
        assert_eq!(value.len(), 0x80);
    }

    #[test]
    fn test_truncated_value_is_none() {
        let data = [0x5A, 0x05, 0x11, 0x22];
        assert_eq!(find_tag(&data, 0x5A), None);
    }

    #[test]
    fn test_parse_dol() {
        // 9F66 len 4, 9A len 3, 9F37 len 4
        let data = [0x9F, 0x66, 0x04, 0x9A, 0x03, 0x9F, 0x37, 0x04];
        assert_eq!(
            parse_dol(&data),
            vec![(0x9F66, 4), (0x9A, 3), (0x9F37, 4)]
        );
    }
}
