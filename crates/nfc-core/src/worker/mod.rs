//! Background worker - one session at a time on one thread.
//!
//! The caller picks a [`machine::WorkerState`], hands over a shared
//! result record and observes progress through events. `stop` is
//! cooperative: it aborts the transport, flips the state and joins, so
//! no observer callback runs after it returns.

pub mod handlers;
pub mod machine;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::card::ProtocolRecord;
use crate::events::{NfcEvent, NfcObserver, TracingObserver};
use crate::protocol::constants::{SYSTEM_DICT_PATH, USER_DICT_PATH};
use crate::transport::NfcTransport;
use handlers::{RoutineContext, RoutineOutcome, run_routine};
use machine::WorkerState;

/// Configuration for worker sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// User key dictionary, tried first.
    pub user_dict_path: String,
    /// Bundled fallback dictionary.
    pub system_dict_path: String,
    /// Detection poll timeout in milliseconds.
    pub poll_timeout_ms: u64,
    /// Emulation listen timeout in milliseconds.
    pub listen_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            user_dict_path: USER_DICT_PATH.to_string(),
            system_dict_path: SYSTEM_DICT_PATH.to_string(),
            poll_timeout_ms: 100,
            listen_timeout_ms: 500,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: WorkerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Keeps the platform awake while a session runs.
pub trait PowerLock: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

/// Power lock for hosts without suspend concerns.
pub struct NoopPowerLock;

impl PowerLock for NoopPowerLock {
    fn acquire(&self) {}
    fn release(&self) {}
}

/// Card protocol worker: owns the background thread and its shared state.
pub struct NfcWorker<O: NfcObserver> {
    transport: Arc<dyn NfcTransport>,
    observer: Arc<O>,
    config: WorkerConfig,
    power: Arc<dyn PowerLock>,
    state: Arc<Mutex<WorkerState>>,
    handle: Option<JoinHandle<()>>,
}

impl NfcWorker<TracingObserver> {
    /// Create a worker with the default tracing observer.
    pub fn new(transport: Arc<dyn NfcTransport>, config: WorkerConfig) -> Self {
        Self::with_observer(transport, config, Arc::new(TracingObserver))
    }
}

impl<O: NfcObserver + 'static> NfcWorker<O> {
    /// Create a worker with a custom observer.
    pub fn with_observer(
        transport: Arc<dyn NfcTransport>,
        config: WorkerConfig,
        observer: Arc<O>,
    ) -> Self {
        Self {
            transport,
            observer,
            config,
            power: Arc::new(NoopPowerLock),
            state: Arc::new(Mutex::new(WorkerState::Ready)),
            handle: None,
        }
    }

    /// Replace the no-op power lock with a platform one.
    pub fn set_power_lock(&mut self, power: Arc<dyn PowerLock>) {
        self.power = power;
    }

    /// Launch one session. Exactly one session runs at a time; a second
    /// start without an intervening `stop` or `wait` is an error, not a
    /// silent restart.
    pub fn start(
        &mut self,
        state: WorkerState,
        result: Arc<Mutex<ProtocolRecord>>,
    ) -> Result<()> {
        if self.handle.is_some() {
            return Err(anyhow!("worker already running (state {})", self.state()));
        }
        if !state.is_read() && !state.is_emulation() {
            return Err(anyhow!("{} is not a startable state", state));
        }
        info!(state = %state, "Starting worker session");
        *self.state.lock().unwrap() = state;
        // Read sessions build a fresh record; emulation consumes the one
        // already loaded by the caller.
        if state.is_read() {
            result.lock().unwrap().clear();
        }

        let transport = Arc::clone(&self.transport);
        let observer = Arc::clone(&self.observer);
        let shared_state = Arc::clone(&self.state);
        let power = Arc::clone(&self.power);
        let config = self.config.clone();
        let handle = thread::Builder::new()
            .name("nfc-worker".into())
            .spawn(move || {
                power.acquire();
                let outcome = {
                    let mut ctx = RoutineContext::new(
                        transport.as_ref(),
                        observer.as_ref(),
                        &shared_state,
                        &config,
                        &result,
                    );
                    run_routine(state, &mut ctx)
                };
                observer.on_event(&match outcome {
                    RoutineOutcome::Success => NfcEvent::Success,
                    RoutineOutcome::Fail => NfcEvent::Fail,
                    RoutineOutcome::Aborted => NfcEvent::Aborted,
                    RoutineOutcome::NoDictFound => NfcEvent::NoDictFound,
                });
                transport.deactivate();
                power.release();
                let mut current = shared_state.lock().unwrap();
                if *current != WorkerState::Stop {
                    *current = WorkerState::Ready;
                }
            })?;
        self.handle = Some(handle);
        Ok(())
    }
}

impl<O: NfcObserver> NfcWorker<O> {
    /// Current session state.
    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap()
    }

    /// Whether a session has been started and not yet joined.
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Request stop and join the session thread. After return no
    /// observer callback will fire and the worker accepts a new start.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        info!("Stopping worker session");
        *self.state.lock().unwrap() = WorkerState::Stop;
        self.transport.abort();
        let _ = handle.join();
        // The routine may have finished before the abort, leaving nobody
        // to clear the latch; reset the transport so the next session
        // starts clean.
        self.transport.deactivate();
        *self.state.lock().unwrap() = WorkerState::Ready;
    }

    /// Join a session that is expected to finish on its own.
    pub fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl<O: NfcObserver> Drop for NfcWorker<O> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::handlers::testing::RecordingObserver;
    use super::*;
    use crate::transport::MockNfc;

    fn worker_with(
        mock: &Arc<MockNfc>,
    ) -> (NfcWorker<RecordingObserver>, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::new());
        let transport: Arc<MockNfc> = Arc::clone(mock);
        let worker = NfcWorker::with_observer(transport, WorkerConfig::default(), observer.clone());
        (worker, observer)
    }

    #[test]
    fn test_detect_session_to_completion() {
        let mock = Arc::new(MockNfc::with_ultralight(&[0x04, 0x99, 0x88, 0x77, 0x66, 0x55, 0x44]));
        let (mut worker, observer) = worker_with(&mock);
        let result = Arc::new(Mutex::new(ProtocolRecord::default()));

        worker.start(WorkerState::Detect, result.clone()).unwrap();
        worker.wait();

        assert_eq!(worker.state(), WorkerState::Ready);
        assert!(!worker.is_running());
        assert!(result.lock().unwrap().identity().is_some());
        let events = observer.events();
        assert!(matches!(events.last(), Some(NfcEvent::Success)));
        assert_eq!(
            observer.count(|e| matches!(e, NfcEvent::CardDetected { .. })),
            1
        );
    }

    #[test]
    fn test_second_start_is_rejected() {
        // No card: the detect routine polls until stopped.
        let mock = Arc::new(MockNfc::new());
        let (mut worker, _observer) = worker_with(&mock);
        let result = Arc::new(Mutex::new(ProtocolRecord::default()));

        worker.start(WorkerState::Detect, result.clone()).unwrap();
        assert!(worker.start(WorkerState::Detect, result.clone()).is_err());
        worker.stop();
        assert_eq!(worker.state(), WorkerState::Ready);

        // Joined and reset: a new session is accepted again.
        worker.start(WorkerState::Detect, result).unwrap();
        worker.stop();
    }

    #[test]
    fn test_stop_after_completion_does_not_poison_next_session() {
        let mock = Arc::new(MockNfc::with_ultralight(&[0x04, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]));
        let (mut worker, observer) = worker_with(&mock);
        let result = Arc::new(Mutex::new(ProtocolRecord::default()));

        worker.start(WorkerState::Detect, result.clone()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        // Session already finished on its own; stop() joins the dead
        // thread and must not leave the transport abort latch set.
        worker.stop();

        worker.start(WorkerState::Detect, result).unwrap();
        worker.wait();
        assert_eq!(observer.count(|e| matches!(e, NfcEvent::Success)), 2);
        assert_eq!(observer.count(|e| matches!(e, NfcEvent::Aborted)), 0);
    }

    #[test]
    fn test_ready_and_stop_are_not_startable() {
        let mock = Arc::new(MockNfc::new());
        let (mut worker, _observer) = worker_with(&mock);
        let result = Arc::new(Mutex::new(ProtocolRecord::default()));
        assert!(worker.start(WorkerState::Ready, result.clone()).is_err());
        assert!(worker.start(WorkerState::Stop, result).is_err());
    }

    #[test]
    fn test_stop_emits_aborted_and_silences_observer() {
        let mock = Arc::new(MockNfc::new());
        let (mut worker, observer) = worker_with(&mock);
        let result = Arc::new(Mutex::new(ProtocolRecord::default()));

        worker.start(WorkerState::Detect, result).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        worker.stop();

        let events = observer.events();
        assert!(matches!(events.last(), Some(NfcEvent::Aborted)));
        // Nothing fires after stop returns.
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(observer.events().len(), events.len());
    }

    #[test]
    fn test_read_session_clears_stale_record() {
        let mock = Arc::new(MockNfc::new());
        let (mut worker, _observer) = worker_with(&mock);
        let result = Arc::new(Mutex::new(ProtocolRecord::Generic {
            identity: crate::card::TagIdentity {
                uid: vec![1, 2, 3, 4],
                atqa: [0x44, 0x00],
                sak: 0x00,
                family: crate::card::NfcFamily::A,
            },
        }));

        worker.start(WorkerState::Detect, result.clone()).unwrap();
        worker.stop();
        assert!(result.lock().unwrap().identity().is_none());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = WorkerConfig {
            poll_timeout_ms: 250,
            ..WorkerConfig::default()
        };
        let path = std::env::temp_dir().join("nfc-worker-config-test.toml");
        config.save_to_file(&path).unwrap();
        let loaded = WorkerConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.poll_timeout_ms, 250);
        assert_eq!(loaded.user_dict_path, config.user_dict_path);
    }
}
