use std::sync::Mutex;

use rand::RngCore;
use relaysync_core::{PrekeyIndexRange, SyncError, SyncResult};

use super::signaling::SignalingKeys;
use crate::config::SyncConfig;
use crate::context::lock;

/// Source of key material. Opaque to the sync layer: it only moves the bytes
/// into request payloads.
pub trait KeyProvider: Send + Sync {
    /// One serialized pre-key per id of `range`, in id order.
    fn generate_prekeys(&self, range: PrekeyIndexRange) -> SyncResult<Vec<Vec<u8>>>;

    /// The non-rotating fallback key. Repeated calls return the same key.
    fn last_resort_prekey(&self) -> SyncResult<Vec<u8>>;

    fn generate_signaling_keys(&self) -> SyncResult<SignalingKeys>;
}

/// Provider filling keys from the thread-local RNG.
///
/// Stands in for a real session library in dev builds and tests; it produces
/// random bytes of the right length, not usable key pairs.
#[derive(Debug)]
pub struct RandomKeyProvider {
    key_length: usize,
    last_resort: Mutex<Option<Vec<u8>>>,
}

impl RandomKeyProvider {
    pub fn new(key_length: usize) -> Self {
        Self {
            key_length,
            last_resort: Mutex::new(None),
        }
    }

    /// Keys of `signaling_key_length` bytes.
    pub fn for_config(config: &SyncConfig) -> Self {
        Self::new(config.signaling_key_length)
    }

    fn random_key(&self) -> SyncResult<Vec<u8>> {
        if self.key_length == 0 {
            return Err(SyncError::key_generation("key length must be positive"));
        }
        let mut key = vec![0u8; self.key_length];
        rand::rng().fill_bytes(&mut key);
        Ok(key)
    }
}

impl Default for RandomKeyProvider {
    fn default() -> Self {
        Self::new(32)
    }
}

impl KeyProvider for RandomKeyProvider {
    fn generate_prekeys(&self, range: PrekeyIndexRange) -> SyncResult<Vec<Vec<u8>>> {
        range.ids().map(|_| self.random_key()).collect()
    }

    fn last_resort_prekey(&self) -> SyncResult<Vec<u8>> {
        let mut cached = lock(&self.last_resort);
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }
        let key = self.random_key()?;
        *cached = Some(key.clone());
        Ok(key)
    }

    fn generate_signaling_keys(&self) -> SyncResult<SignalingKeys> {
        let verification_key = self.random_key()?;
        let mut decryption_key = self.random_key()?;
        while decryption_key == verification_key {
            decryption_key = self.random_key()?;
        }
        Ok(SignalingKeys::new(verification_key, decryption_key))
    }
}
