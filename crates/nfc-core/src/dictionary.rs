//! Key dictionary source for the Classic recovery engine.
//!
//! A dictionary is a line-oriented text resource: a line is a valid key
//! iff it is exactly 12 hex characters and does not start with `#`.
//! Malformed or short lines are skipped, not errors. The source is
//! forward-only but rewindable, and rewinding always reproduces the same
//! key sequence.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::card::classic::MfClassicKey;
use crate::protocol::constants::{DICT_KEY_LINE_LEN, SYSTEM_DICT_PATH, USER_DICT_PATH};

#[derive(Error, Debug)]
pub enum DictError {
    #[error("Failed to open dictionary {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rewindable producer of 48-bit candidate keys.
pub struct KeyDict<R> {
    reader: R,
    total_keys: usize,
}

impl KeyDict<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DictError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| DictError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let dict = Self::from_reader(BufReader::new(file))?;
        debug!(path = %path.display(), keys = dict.total_keys, "Opened dictionary");
        Ok(dict)
    }

    /// Open the user dictionary at its well-known path.
    pub fn open_user() -> Result<Self, DictError> {
        Self::open(USER_DICT_PATH)
    }

    /// Open the bundled system dictionary.
    pub fn open_system() -> Result<Self, DictError> {
        Self::open(SYSTEM_DICT_PATH)
    }
}

impl<R: BufRead + Seek> KeyDict<R> {
    /// Wrap any rewindable line source. Counts the valid keys once, then
    /// rewinds to the start.
    pub fn from_reader(reader: R) -> Result<Self, DictError> {
        let mut dict = Self {
            reader,
            total_keys: 0,
        };
        let mut count = 0;
        while dict.next_key().is_some() {
            count += 1;
        }
        dict.total_keys = count;
        dict.rewind()?;
        Ok(dict)
    }

    /// Number of valid keys in the resource.
    pub fn total_keys(&self) -> usize {
        self.total_keys
    }

    /// Next valid key, skipping malformed lines. `None` at end of input.
    pub fn next_key(&mut self) -> Option<MfClassicKey> {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
            if let Some(key) = parse_key_line(line.trim()) {
                return Some(key);
            }
        }
    }

    /// Seek back to the start of the resource.
    pub fn rewind(&mut self) -> Result<(), DictError> {
        self.reader.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}

fn parse_key_line(line: &str) -> Option<MfClassicKey> {
    if line.len() != DICT_KEY_LINE_LEN || line.starts_with('#') {
        return None;
    }
    u64::from_str_radix(line, 16).ok().map(MfClassicKey::from_u64)
}
