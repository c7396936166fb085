//! Exchange-transport layer abstraction.
//!
//! Defines the `NfcTransport` trait for the radio front end, allowing
//! different implementations (pcsc, mock, a platform HAL).

mod mock;
mod pcsc;
mod traits;

pub use mock::MockNfc;
pub use self::pcsc::PcscTransport;
pub use traits::{EmulationResponder, NfcError, NfcTransport};
