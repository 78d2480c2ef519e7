//! Credential protection utilities.
//!
//! # Module Structure
//! - `credentials`: Secure credential container with automatic memory zeroing
//! - `secrets`: Decryption hook applied by connection stores

mod credentials;
mod secrets;

pub use credentials::Credentials;
pub use secrets::{ENCRYPTED_PREFIX, PlaintextSecrets, SecretDecryptor};
