//! Mock radio front end for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::traits::{EmulationResponder, NfcError, NfcTransport};
use crate::card::classic::{MfClassicBlock, MfClassicKey, MfClassicKeyType};
use crate::card::{NfcFamily, TagCandidate, TagIdentity};
use crate::protocol::constants::*;

type ExchangeHandler = Box<dyn FnMut(&[u8]) -> Result<Vec<u8>, NfcError> + Send>;

/// Mock transport for unit testing worker routines.
///
/// Detection presence, exchange responses and Classic sector keys are all
/// scriptable; a handler closure can stand in for a whole simulated card
/// when a response queue is too rigid.
pub struct MockNfc {
    candidate: Mutex<Option<TagCandidate>>,
    /// Scripted detect outcomes; when exhausted, the candidate (if any)
    /// stays present.
    presence_script: Mutex<VecDeque<bool>>,
    responses: Mutex<VecDeque<Result<Vec<u8>, NfcError>>>,
    handler: Mutex<Option<ExchangeHandler>>,
    exchange_log: Mutex<Vec<Vec<u8>>>,
    /// Simulated Classic card: (sector, slot) -> key, block -> contents.
    classic_keys: Mutex<HashMap<(u8, MfClassicKeyType), MfClassicKey>>,
    classic_blocks: Mutex<HashMap<u8, MfClassicBlock>>,
    authenticated_sector: Mutex<Option<u8>>,
    auth_attempts: AtomicUsize,
    listen_sessions: Mutex<VecDeque<Vec<Vec<u8>>>>,
    listen_log: Mutex<Vec<(Vec<u8>, Option<Vec<u8>>)>>,
    aborted: AtomicBool,
}

impl MockNfc {
    pub fn new() -> Self {
        Self {
            candidate: Mutex::new(None),
            presence_script: Mutex::new(VecDeque::new()),
            responses: Mutex::new(VecDeque::new()),
            handler: Mutex::new(None),
            exchange_log: Mutex::new(Vec::new()),
            classic_keys: Mutex::new(HashMap::new()),
            classic_blocks: Mutex::new(HashMap::new()),
            authenticated_sector: Mutex::new(None),
            auth_attempts: AtomicUsize::new(0),
            listen_sessions: Mutex::new(VecDeque::new()),
            listen_log: Mutex::new(Vec::new()),
            aborted: AtomicBool::new(false),
        }
    }

    /// Mock presenting a Mifare Classic 1K.
    pub fn with_classic_1k(uid: &[u8]) -> Self {
        let mock = Self::new();
        mock.set_candidate(TagCandidate {
            identity: TagIdentity {
                uid: uid.to_vec(),
                atqa: [0x04, 0x00],
                sak: SAK_MF_CLASSIC_1K,
                family: NfcFamily::A,
            },
            iso_dep: false,
        });
        mock
    }

    /// Mock presenting an Ultralight-family tag.
    pub fn with_ultralight(uid: &[u8]) -> Self {
        let mock = Self::new();
        mock.set_candidate(TagCandidate {
            identity: TagIdentity {
                uid: uid.to_vec(),
                atqa: ATQA_ULTRALIGHT,
                sak: SAK_ULTRALIGHT,
                family: NfcFamily::A,
            },
            iso_dep: false,
        });
        mock
    }

    /// Mock presenting an ISO-DEP card (EMV-capable).
    pub fn with_iso_dep(uid: &[u8]) -> Self {
        let mock = Self::new();
        mock.set_candidate(TagCandidate {
            identity: TagIdentity {
                uid: uid.to_vec(),
                atqa: [0x08, 0x00],
                sak: 0x20,
                family: NfcFamily::A,
            },
            iso_dep: true,
        });
        mock
    }

    /// Mock presenting a DESFire card.
    pub fn with_desfire(uid: &[u8]) -> Self {
        let mock = Self::new();
        mock.set_candidate(TagCandidate {
            identity: TagIdentity {
                uid: uid.to_vec(),
                atqa: ATQA_MF_DESFIRE,
                sak: SAK_MF_DESFIRE,
                family: NfcFamily::A,
            },
            iso_dep: true,
        });
        mock
    }

    pub fn set_candidate(&self, candidate: TagCandidate) {
        *self.candidate.lock().unwrap() = Some(candidate);
    }

    /// Script the next detect outcomes (true = tag present).
    pub fn script_presence(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.presence_script.lock().unwrap().extend(outcomes);
    }

    /// Queue one exchange response.
    pub fn queue_response(&self, response: Result<Vec<u8>, NfcError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Install a closure serving every exchange (takes precedence over
    /// the response queue).
    pub fn set_exchange_handler(
        &self,
        handler: impl FnMut(&[u8]) -> Result<Vec<u8>, NfcError> + Send + 'static,
    ) {
        *self.handler.lock().unwrap() = Some(Box::new(handler));
    }

    pub fn set_classic_key(&self, sector: u8, key_type: MfClassicKeyType, key: MfClassicKey) {
        self.classic_keys
            .lock()
            .unwrap()
            .insert((sector, key_type), key);
    }

    pub fn set_classic_block(&self, block: u8, data: MfClassicBlock) {
        self.classic_blocks.lock().unwrap().insert(block, data);
    }

    /// Queue one emulation session: the frames a reader will send.
    pub fn queue_listen_session(&self, frames: Vec<Vec<u8>>) {
        self.listen_sessions.lock().unwrap().push_back(frames);
    }

    pub fn exchange_log(&self) -> Vec<Vec<u8>> {
        self.exchange_log.lock().unwrap().clone()
    }

    pub fn listen_log(&self) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
        self.listen_log.lock().unwrap().clone()
    }

    pub fn auth_attempts(&self) -> usize {
        self.auth_attempts.load(Ordering::SeqCst)
    }

    fn sector_of_block(block: u8) -> u8 {
        if block < 128 { block / 4 } else { 32 + (block - 128) / 16 }
    }

    fn check_aborted(&self) -> Result<(), NfcError> {
        if self.aborted.load(Ordering::SeqCst) {
            Err(NfcError::Aborted)
        } else {
            Ok(())
        }
    }
}

impl Default for MockNfc {
    fn default() -> Self {
        Self::new()
    }
}

impl NfcTransport for MockNfc {
    fn detect(&self, _timeout: Duration) -> Result<Vec<TagCandidate>, NfcError> {
        self.check_aborted()?;
        // Re-activation destroys any authentication state.
        *self.authenticated_sector.lock().unwrap() = None;
        let present = self
            .presence_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(true);
        if !present {
            return Ok(Vec::new());
        }
        Ok(self.candidate.lock().unwrap().iter().cloned().collect())
    }

    fn exchange(&self, tx: &[u8]) -> Result<Vec<u8>, NfcError> {
        self.check_aborted()?;
        self.exchange_log.lock().unwrap().push(tx.to_vec());

        // Authenticated Classic block read served from the block map.
        if let Some(sector) = *self.authenticated_sector.lock().unwrap()
            && tx.len() == 2
            && tx[0] == MF_CLASSIC_READ
        {
            let block = tx[1];
            if Self::sector_of_block(block) != sector {
                return Err(NfcError::AuthFailed);
            }
            let blocks = self.classic_blocks.lock().unwrap();
            return Ok(blocks.get(&block).copied().unwrap_or([0u8; 16]).to_vec());
        }

        if let Some(handler) = self.handler.lock().unwrap().as_mut() {
            return handler(tx);
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(NfcError::Timeout { timeout_ms: 100 }))
    }

    fn mf_authenticate(
        &self,
        block: u8,
        key: &MfClassicKey,
        key_type: MfClassicKeyType,
    ) -> Result<(), NfcError> {
        self.check_aborted()?;
        self.auth_attempts.fetch_add(1, Ordering::SeqCst);
        let sector = Self::sector_of_block(block);
        let known = self
            .classic_keys
            .lock()
            .unwrap()
            .get(&(sector, key_type))
            .copied();
        let mut authed = self.authenticated_sector.lock().unwrap();
        if known == Some(*key) {
            *authed = Some(sector);
            Ok(())
        } else {
            // A failed Crypto1 handshake kills the session.
            *authed = None;
            Err(NfcError::AuthFailed)
        }
    }

    fn listen(
        &self,
        _identity: &TagIdentity,
        responder: &mut dyn EmulationResponder,
        timeout: Duration,
    ) -> Result<(), NfcError> {
        self.check_aborted()?;
        let Some(frames) = self.listen_sessions.lock().unwrap().pop_front() else {
            return Err(NfcError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        };
        for frame in frames {
            let reply = responder.respond(&frame);
            self.listen_log.lock().unwrap().push((frame, reply));
        }
        Ok(())
    }

    fn deactivate(&self) {
        *self.authenticated_sector.lock().unwrap() = None;
        self.aborted.store(false, Ordering::SeqCst);
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}
