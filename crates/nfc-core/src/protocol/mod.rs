//! Wire-level helpers shared by the protocol routines.
//!
//! - `constants`: classification patterns, command bytes, tag numbers
//! - `apdu`: ISO7816 command building and response splitting
//! - `tlv`: minimal BER-TLV traversal for EMV responses

pub mod apdu;
pub mod constants;
pub mod tlv;

pub use apdu::{ApduCommand, ApduError, ApduResponse};
