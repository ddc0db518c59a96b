use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "poolwatch";

/// OS-keychain storage for the login password.
///
/// This is a convenience copy used to pre-fill the interactive login prompt;
/// the session itself never persists a password.
pub struct CredentialStore;

impl CredentialStore {
    /// Store the password for a username in the OS keychain
    pub fn store(username: &str, password: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, username)
            .context("Failed to create keyring entry")?;
        entry
            .set_password(password)
            .context("Failed to store password in keychain")?;
        Ok(())
    }

    /// Retrieve the password for a username from the OS keychain
    pub fn get_password(username: &str) -> Result<String> {
        let entry = Entry::new(SERVICE_NAME, username)
            .context("Failed to create keyring entry")?;
        entry
            .get_password()
            .context("Failed to retrieve password from keychain")
    }

    /// Check if a password is stored for a username
    pub fn has_credentials(username: &str) -> bool {
        if let Ok(entry) = Entry::new(SERVICE_NAME, username) {
            entry.get_password().is_ok()
        } else {
            false
        }
    }
}
