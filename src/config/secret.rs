// Shared recording password

use std::fmt;
use std::path::Path;

use super::error::{ConfigError, ConfigResult};

/// Password gating the record controls, read once at startup
#[derive(Clone)]
pub struct SharedSecret {
    value: String,
}

impl SharedSecret {
    /// Read the password file, trimming surrounding whitespace
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Secret {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let secret = Self::new(&content);
        if secret.value.is_empty() {
            log::warn!("Password file {} is empty", path.display());
        }
        Ok(secret)
    }

    pub fn new(value: &str) -> Self {
        Self {
            value: value.trim().to_string(),
        }
    }

    /// Compare a submitted password, trimmed, without early exit on mismatch
    pub fn matches(&self, candidate: &str) -> bool {
        let a = self.value.as_bytes();
        let b = candidate.trim().as_bytes();
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(***)")
    }
}
