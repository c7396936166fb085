//! PC/SC based transport for desktop contactless readers.
//!
//! Covers the ISO-DEP card families (EMV, DESFire). PC/SC exposes neither
//! raw Crypto1 authentication nor target-mode emulation, so those report
//! `NotSupported`.

use std::ffi::CString;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use pcsc::{Card, Context, Disposition, Protocols, Scope, ShareMode};
use tracing::{debug, info};

use super::traits::{EmulationResponder, NfcError, NfcTransport};
use crate::card::classic::{MfClassicKey, MfClassicKeyType};
use crate::card::{NfcFamily, TagCandidate, TagIdentity};
use crate::protocol::constants::SAK_ISO_DEP_BIT;

/// PC/SC pseudo-APDU asking the reader for the card UID.
const GET_UID: [u8; 5] = [0xFF, 0xCA, 0x00, 0x00, 0x00];

struct PcscState {
    context: Context,
    card: Option<Card>,
}

/// PC/SC transport bound to one reader.
pub struct PcscTransport {
    reader: CString,
    state: Mutex<PcscState>,
    aborted: AtomicBool,
}

impl PcscTransport {
    /// Open the first available PC/SC reader.
    pub fn open() -> Result<Self, NfcError> {
        let context = Context::establish(Scope::User)
            .map_err(|e| NfcError::OpenFailed(e.to_string()))?;

        let mut readers_buf = [0u8; 2048];
        let reader = context
            .list_readers(&mut readers_buf)
            .map_err(|e| NfcError::OpenFailed(e.to_string()))?
            .next()
            .ok_or_else(|| NfcError::OpenFailed("no PC/SC reader attached".into()))?
            .to_owned();

        info!(reader = %reader.to_string_lossy(), "Opened PC/SC reader");
        Ok(Self {
            reader,
            state: Mutex::new(PcscState {
                context,
                card: None,
            }),
            aborted: AtomicBool::new(false),
        })
    }

    fn check_aborted(&self) -> Result<(), NfcError> {
        if self.aborted.load(Ordering::SeqCst) {
            Err(NfcError::Aborted)
        } else {
            Ok(())
        }
    }

    fn read_uid(card: &Card) -> Result<Vec<u8>, NfcError> {
        let mut rbuf = [0u8; pcsc::MAX_BUFFER_SIZE];
        let rsp = card
            .transmit(&GET_UID, &mut rbuf)
            .map_err(|e| NfcError::Protocol(e.to_string()))?;
        if rsp.len() < 2 || rsp[rsp.len() - 2] != 0x90 {
            return Err(NfcError::Protocol("reader rejected GET DATA (UID)".into()));
        }
        Ok(rsp[..rsp.len() - 2].to_vec())
    }
}

impl NfcTransport for PcscTransport {
    fn detect(&self, _timeout: Duration) -> Result<Vec<TagCandidate>, NfcError> {
        self.check_aborted()?;
        let mut state = self.state.lock().unwrap();
        if let Some(card) = state.card.take() {
            let _ = card.disconnect(Disposition::ResetCard);
        }

        let card = match state
            .context
            .connect(&self.reader, ShareMode::Shared, Protocols::ANY)
        {
            Ok(card) => card,
            Err(pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard) => return Ok(Vec::new()),
            Err(e) => return Err(NfcError::Protocol(e.to_string())),
        };

        let uid = Self::read_uid(&card)?;
        debug!(uid_len = uid.len(), "Activated card over PC/SC");
        state.card = Some(card);

        // PC/SC abstracts the anticollision away: ATQA is not observable
        // here, and any card we can connect to speaks ISO-DEP.
        Ok(vec![TagCandidate {
            identity: TagIdentity {
                uid,
                atqa: [0x00, 0x00],
                sak: SAK_ISO_DEP_BIT,
                family: NfcFamily::A,
            },
            iso_dep: true,
        }])
    }

    fn exchange(&self, tx: &[u8]) -> Result<Vec<u8>, NfcError> {
        self.check_aborted()?;
        let state = self.state.lock().unwrap();
        let card = state
            .card
            .as_ref()
            .ok_or_else(|| NfcError::Protocol("no activated card".into()))?;
        let mut rbuf = [0u8; pcsc::MAX_BUFFER_SIZE];
        let rsp = card
            .transmit(tx, &mut rbuf)
            .map_err(|e| NfcError::Protocol(e.to_string()))?;
        Ok(rsp.to_vec())
    }

    fn mf_authenticate(
        &self,
        _block: u8,
        _key: &MfClassicKey,
        _key_type: MfClassicKeyType,
    ) -> Result<(), NfcError> {
        Err(NfcError::NotSupported)
    }

    fn listen(
        &self,
        _identity: &TagIdentity,
        _responder: &mut dyn EmulationResponder,
        _timeout: Duration,
    ) -> Result<(), NfcError> {
        Err(NfcError::NotSupported)
    }

    fn deactivate(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(card) = state.card.take() {
            let _ = card.disconnect(Disposition::ResetCard);
        }
        self.aborted.store(false, Ordering::SeqCst);
    }

    fn abort(&self) {
        // transmit() calls are short-lived; flag-checking at the next
        // call boundary keeps stop latency bounded.
        self.aborted.store(true, Ordering::SeqCst);
    }
}
