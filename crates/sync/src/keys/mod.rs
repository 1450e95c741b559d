//! Cryptographic identity of this client: pre-key batches, the last-resort
//! key and the device-push signaling keys.

mod lifecycle;
mod provider;
mod signaling;

pub use lifecycle::{Credentials, KeyLifecycleManager, PREKEY_RANGE_KEY_PREFIX, UserClient};
pub use provider::{KeyProvider, RandomKeyProvider};
pub use signaling::{
    DECRYPTION_KEY_ACCOUNT, SignalingKeyStore, SignalingKeys, VERIFICATION_KEY_ACCOUNT,
};
