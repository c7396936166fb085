//! ISO7816-4 APDU command building and response splitting.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApduError {
    #[error("Response too short for a status word: {len} bytes")]
    TooShort { len: usize },
}

/// APDU response split into payload and status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub data: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

impl ApduResponse {
    pub fn parse(raw: &[u8]) -> Result<Self, ApduError> {
        if raw.len() < 2 {
            return Err(ApduError::TooShort { len: raw.len() });
        }
        Ok(Self {
            data: raw[..raw.len() - 2].to_vec(),
            sw1: raw[raw.len() - 2],
            sw2: raw[raw.len() - 1],
        })
    }

    /// 0x9000 means success.
    pub fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    pub fn status_word(&self) -> u16 {
        ((self.sw1 as u16) << 8) | self.sw2 as u16
    }
}

/// Case-2/3/4 short APDU builder.
#[derive(Debug, Clone)]
pub struct ApduCommand {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
    le: Option<u8>,
}

impl ApduCommand {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![self.cla, self.ins, self.p1, self.p2];
        if !self.data.is_empty() {
            out.push(self.data.len() as u8);
            out.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            out.push(le);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_with_data_and_le() {
        let apdu = ApduCommand::new(0x00, 0xA4, 0x04, 0x00)
            .data(b"2PAY.SYS.DDF01".to_vec())
            .le(0x00);
        let bytes = apdu.to_bytes();
        assert_eq!(&bytes[..4], &[0x00, 0xA4, 0x04, 0x00]);
        assert_eq!(bytes[4], 14);
        assert_eq!(&bytes[5..19], b"2PAY.SYS.DDF01");
        assert_eq!(bytes[19], 0x00);
    }

    #[test]
    fn test_case2_command_has_no_lc() {
        let bytes = ApduCommand::new(0x00, 0xB2, 0x01, 0x0C).le(0x00).to_bytes();
        assert_eq!(bytes, vec![0x00, 0xB2, 0x01, 0x0C, 0x00]);
    }

    #[test]
    fn test_response_split() {
        let rsp = ApduResponse::parse(&[0x6F, 0x02, 0xAA, 0xBB, 0x90, 0x00]).unwrap();
        assert!(rsp.is_success());
        assert_eq!(rsp.data, vec![0x6F, 0x02, 0xAA, 0xBB]);
        assert_eq!(rsp.status_word(), 0x9000);
    }

    #[test]
    fn test_response_too_short() {
        assert_eq!(
            ApduResponse::parse(&[0x90]),
            Err(ApduError::TooShort { len: 1 })
        );
    }
}
