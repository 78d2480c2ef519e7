//! Secure credential container with automatic memory zeroing.
//!
//! # Security
//! - Credentials are stored in `Zeroizing<T>` containers
//! - Memory is automatically cleared when credentials go out of scope
//! - Passwords are never exposed in debug output or logs

use zeroize::{Zeroize, Zeroizing};

/// Decrypted database credentials that zero their memory on drop.
///
/// # Example
///
/// ```rust
/// use tinydb_core::security::Credentials;
///
/// let creds = Credentials::new("admin".to_string(), Some("secret".to_string()));
/// assert_eq!(creds.username(), "admin");
/// assert!(creds.has_password());
/// assert!(!format!("{:?}", creds).contains("secret"));
/// ```
#[derive(Clone, Default, Zeroize)]
#[zeroize(drop)]
pub struct Credentials {
    username: Zeroizing<String>,
    password: Zeroizing<Option<String>>,
}

impl Credentials {
    /// Creates new credentials with automatic memory zeroing.
    pub fn new(username: String, password: Option<String>) -> Self {
        Self {
            username: Zeroizing::new(username),
            password: Zeroizing::new(password),
        }
    }

    /// Gets the username
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Gets the decrypted password, if any.
    ///
    /// Only drivers should call this, to hand the secret to the protocol
    /// client.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Checks if a username is present
    pub fn has_username(&self) -> bool {
        !self.username.is_empty()
    }

    /// Checks if password is present without exposing it.
    pub fn has_password(&self) -> bool {
        self.password.as_ref().is_some_and(|p| !p.is_empty())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username())
            .field("password", &if self.has_password() { "****" } else { "" })
            .finish()
    }
}
