//! Secrets kept in the OS keyring rather than the config file.

use crate::error::CoreError;
use crate::remote::RemoteCredentials;

const SERVICE: &str = "jobdesk";

/// Project API key for the hosted store.
pub const REMOTE_API_KEY: &str = "remote_api_key";
/// Signed-in user's access token for the hosted store.
pub const REMOTE_ACCESS_TOKEN: &str = "remote_access_token";
/// OAuth access token for the calendar provider.
pub const CALENDAR_ACCESS_TOKEN: &str = "calendar_access_token";

/// Every key this crate stores, for listing and sign-out.
pub const ALL_KEYS: [&str; 3] = [REMOTE_API_KEY, REMOTE_ACCESS_TOKEN, CALENDAR_ACCESS_TOKEN];

pub fn get(key: &str) -> Result<Option<String>, CoreError> {
    let entry = keyring::Entry::new(SERVICE, key)?;
    match entry.get_password() {
        Ok(secret) => Ok(Some(secret)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn set(key: &str, value: &str) -> Result<(), CoreError> {
    let entry = keyring::Entry::new(SERVICE, key)?;
    entry.set_password(value)?;
    Ok(())
}

/// Remove `key`; a key that was never stored is not an error.
pub fn delete(key: &str) -> Result<(), CoreError> {
    let entry = keyring::Entry::new(SERVICE, key)?;
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Hosted store credentials as currently stored.
pub fn remote_credentials() -> Result<RemoteCredentials, CoreError> {
    Ok(RemoteCredentials {
        api_key: get(REMOTE_API_KEY)?,
        access_token: get(REMOTE_ACCESS_TOKEN)?,
    })
}
