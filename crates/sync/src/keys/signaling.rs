use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use relaysync_core::{SyncError, SyncResult};

use super::provider::KeyProvider;
use crate::metadata::PersistentMetadataStore;

/// Metadata account holding the verification key.
pub const VERIFICATION_KEY_ACCOUNT: &str = "APSVerificationKey";
/// Metadata account holding the decryption key.
pub const DECRYPTION_KEY_ACCOUNT: &str = "APSDecryptionKey";

/// Keys authenticating and decrypting device-push payloads.
#[derive(Clone, PartialEq, Eq)]
pub struct SignalingKeys {
    pub verification_key: Vec<u8>,
    pub decryption_key: Vec<u8>,
}

impl SignalingKeys {
    pub fn new(verification_key: Vec<u8>, decryption_key: Vec<u8>) -> Self {
        Self {
            verification_key,
            decryption_key,
        }
    }
}

impl core::fmt::Debug for SignalingKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SignalingKeys")
            .field("verification_key", &"<redacted>")
            .field("decryption_key", &"<redacted>")
            .finish()
    }
}

/// One signaling key pair per installation, persisted as base64.
#[derive(Clone)]
pub struct SignalingKeyStore {
    store: Arc<dyn PersistentMetadataStore>,
}

impl SignalingKeyStore {
    pub fn new(store: Arc<dyn PersistentMetadataStore>) -> Self {
        Self { store }
    }

    /// The stored pair, if both halves are present.
    pub fn load(&self) -> SyncResult<Option<SignalingKeys>> {
        let verification = self.store.get_string(VERIFICATION_KEY_ACCOUNT)?;
        let decryption = self.store.get_string(DECRYPTION_KEY_ACCOUNT)?;
        let (Some(verification), Some(decryption)) = (verification, decryption) else {
            return Ok(None);
        };
        Ok(Some(SignalingKeys::new(
            decode(VERIFICATION_KEY_ACCOUNT, &verification)?,
            decode(DECRYPTION_KEY_ACCOUNT, &decryption)?,
        )))
    }

    pub fn keys_stored(&self) -> SyncResult<bool> {
        Ok(self.load()?.is_some())
    }

    pub fn save(&self, keys: &SignalingKeys) -> SyncResult<()> {
        self.store
            .set_string(VERIFICATION_KEY_ACCOUNT, &STANDARD.encode(&keys.verification_key))?;
        self.store
            .set_string(DECRYPTION_KEY_ACCOUNT, &STANDARD.encode(&keys.decryption_key))
    }

    pub fn clear(&self) -> SyncResult<()> {
        self.store.set(VERIFICATION_KEY_ACCOUNT, None)?;
        self.store.set(DECRYPTION_KEY_ACCOUNT, None)
    }

    /// Return the stored pair, generating and persisting one on first use.
    pub fn load_or_create(&self, provider: &dyn KeyProvider) -> SyncResult<SignalingKeys> {
        if let Some(keys) = self.load()? {
            return Ok(keys);
        }

        let keys = provider.generate_signaling_keys()?;
        if keys.verification_key == keys.decryption_key {
            return Err(SyncError::key_generation(
                "signaling verification and decryption keys are identical",
            ));
        }
        self.save(&keys)?;
        tracing::info!("generated device-push signaling keys");
        Ok(keys)
    }
}

fn decode(account: &str, encoded: &str) -> SyncResult<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| SyncError::storage(format!("{account} is not valid base64: {e}")))
}
