//! Persistent session secret
//!
//! The secret is generated once, written to disk and reused on every
//! later start so sessions survive restarts.

use std::path::Path;

use rand::RngCore;
use thiserror::Error;

use crate::SECRET_KEY_LENGTH;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Failed to access secret file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Secret file {path} holds {len} bytes, expected {expected}")]
    WrongLength {
        path: String,
        len: usize,
        expected: usize,
    },
}

/// Generate a fresh random secret
pub fn generate_secret() -> Vec<u8> {
    let mut secret = vec![0u8; SECRET_KEY_LENGTH];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

/// Read the secret at `path`, creating it first if it does not exist
pub fn load_or_generate(path: &Path) -> Result<Vec<u8>, SecretError> {
    if path.is_file() {
        tracing::info!("Reading session secret file {}", path.display());
        let secret = std::fs::read(path)?;
        if secret.len() != SECRET_KEY_LENGTH {
            return Err(SecretError::WrongLength {
                path: path.display().to_string(),
                len: secret.len(),
                expected: SECRET_KEY_LENGTH,
            });
        }
        return Ok(secret);
    }

    let secret = generate_secret();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!("Writing session secret file {}", path.display());
    std::fs::write(path, &secret)?;
    Ok(secret)
}
