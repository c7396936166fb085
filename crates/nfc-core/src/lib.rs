//! nfc-core: card protocol worker engine for contactless tags.
//!
//! Detects and classifies ISO14443 tags, reads the common card families
//! and emulates stored tag images, all from one background worker thread
//! driving an abstract radio transport.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: command constants, APDU building, BER-TLV parsing
//! - **Transport**: radio abstraction (pcsc, mock)
//! - **Card**: per-family data models and wire decoders
//! - **Dictionary**: key dictionary source for Classic recovery
//! - **Worker**: session state machine, routines and the worker thread
//! - **Events**: observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use std::sync::{Arc, Mutex};
//! use nfc_core::{NfcWorker, PcscTransport, ProtocolRecord, WorkerConfig, WorkerState};
//!
//! let transport = Arc::new(PcscTransport::open().expect("no reader"));
//! let mut worker = NfcWorker::new(transport, WorkerConfig::default());
//!
//! let result = Arc::new(Mutex::new(ProtocolRecord::default()));
//! worker.start(WorkerState::ReadGeneric, result.clone()).expect("start failed");
//! worker.wait();
//! println!("{:?}", result.lock().unwrap().identity());
//! ```

pub mod card;
pub mod dictionary;
pub mod events;
pub mod protocol;
pub mod transport;
pub mod worker;

// Re-exports for convenience
pub use card::{CardType, ProtocolRecord, TagCandidate, TagIdentity, classify};
pub use dictionary::{DictError, KeyDict};
pub use events::{LogLevel, NfcEvent, NfcObserver, NullObserver, TracingObserver};
pub use transport::{MockNfc, NfcError, NfcTransport, PcscTransport};
pub use worker::machine::WorkerState;
pub use worker::{NfcWorker, NoopPowerLock, PowerLock, WorkerConfig};
