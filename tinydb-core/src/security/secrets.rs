//! Secret decryption hook for stored connection descriptions.
//!
//! Connection stores may keep passwords encrypted at rest. Before a
//! description reaches the session registry its secrets are run through a
//! [`SecretDecryptor`], so drivers only ever see plaintext credentials held
//! in zeroizing memory.

use crate::Result;
use zeroize::Zeroizing;

/// Turns a stored secret field into its plaintext value.
pub trait SecretDecryptor: Send + Sync {
    /// Decrypts the value of the named field.
    ///
    /// # Errors
    /// Returns an error if the stored value cannot be decrypted
    fn decrypt(&self, field: &str, stored: &str) -> Result<Zeroizing<String>>;
}

/// Decryptor for stores that keep secrets in plaintext.
///
/// Values carrying the `crypt:` marker are rejected rather than handed to a
/// driver as if they were the real password.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextSecrets;

/// Prefix marking an encrypted stored value
pub const ENCRYPTED_PREFIX: &str = "crypt:";

impl SecretDecryptor for PlaintextSecrets {
    fn decrypt(&self, field: &str, stored: &str) -> Result<Zeroizing<String>> {
        if stored.starts_with(ENCRYPTED_PREFIX) {
            return Err(crate::error::TinyDbError::configuration(format!(
                "field '{}' is encrypted but no decryptor is configured",
                field
            )));
        }
        Ok(Zeroizing::new(stored.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plaintext_passthrough() {
        let value = PlaintextSecrets.decrypt("password", "secret").unwrap();
        assert_eq!(value.as_str(), "secret");
    }

    #[test]
    fn test_plaintext_rejects_encrypted_values() {
        let result = PlaintextSecrets.decrypt("password", "crypt:abcdef");
        assert!(result.is_err());
        assert!(!result.unwrap_err().to_string().contains("abcdef"));
    }
}
