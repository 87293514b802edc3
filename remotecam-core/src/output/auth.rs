//! Password and stream token handling
//!
//! The password is stored as `salt:hex(sha256(salt || password))`. A
//! successful login mints one opaque access token; at most one token is
//! valid at a time and it only gates the stream endpoint.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ServerSettings, StateFile};
use crate::error::{RemoteCamError, Result};

/// Password used until the user sets one
pub const DEFAULT_PASSWORD: &str = "password";

fn digest_hex(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Salted password hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHash {
    salt: String,
    hash: String,
}

impl PasswordHash {
    /// Hash `password` with a fresh random salt
    pub fn new(password: &str) -> Self {
        Self::with_salt(Uuid::new_v4().to_string(), password)
    }

    /// Hash `password` with a given salt
    pub fn with_salt(salt: impl Into<String>, password: &str) -> Self {
        let salt = salt.into();
        let hash = digest_hex(&salt, password);
        Self { salt, hash }
    }

    /// Parse a stored `salt:hash` pair
    pub fn parse(stored: &str) -> Result<Self> {
        let (salt, hash) = stored
            .split_once(':')
            .ok_or_else(|| RemoteCamError::auth("Stored password hash is malformed"))?;
        if hash.is_empty() {
            return Err(RemoteCamError::auth("Stored password hash is empty"));
        }
        Ok(Self {
            salt: salt.to_string(),
            hash: hash.to_string(),
        })
    }

    /// Check a candidate password
    pub fn verify(&self, password: &str) -> bool {
        constant_time_eq(digest_hex(&self.salt, password).as_bytes(), self.hash.as_bytes())
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }
}

impl std::fmt::Display for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.salt, self.hash)
    }
}

/// Where the password hash lives
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    /// State file path; `None` keeps credentials in memory only
    path: Option<PathBuf>,
}

impl CredentialStore {
    /// Store backed by a state file
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Store that never touches disk
    pub fn in_memory() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// Load the stored hash
    ///
    /// A missing hash is created from a legacy plaintext password if one is
    /// present, otherwise from [`DEFAULT_PASSWORD`], and written back.
    pub fn load(&self) -> Result<PasswordHash> {
        let Some(path) = &self.path else {
            return Ok(PasswordHash::new(DEFAULT_PASSWORD));
        };

        let mut state = StateFile::load_from(path)?;
        if let (Some(stored), true) = (&state.password_hash, state.is_hashed) {
            return PasswordHash::parse(stored)
                .map_err(|e| e.with_context(format!("Invalid credentials in {:?}", path)));
        }

        let legacy = state.password.take();
        let hash = PasswordHash::new(legacy.as_deref().unwrap_or(DEFAULT_PASSWORD));
        state.password_hash = Some(hash.to_string());
        state.is_hashed = true;
        state.save_to(path)?;

        if legacy.is_some() {
            info!("Migrated plaintext password to salted hash");
        } else {
            warn!("No password set, using the default password");
        }
        Ok(hash)
    }

    /// Persist a new hash, dropping any legacy plaintext
    pub fn store(&self, hash: &PasswordHash) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut state = StateFile::load_from(path)?;
        state.password_hash = Some(hash.to_string());
        state.is_hashed = true;
        state.password = None;
        state.save_to(path)
    }
}

/// How issued tokens may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    /// Lifetime of a token, unlimited if `None`
    pub ttl: Option<Duration>,
    /// Consume the token when a stream is opened with it
    pub single_use: bool,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            ttl: None,
            single_use: true,
        }
    }
}

impl TokenPolicy {
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            ttl: settings.token_ttl(),
            single_use: settings.single_use_tokens,
        }
    }
}

#[derive(Debug)]
struct IssuedToken {
    value: String,
    issued: Instant,
}

#[derive(Debug)]
struct AuthState {
    hash: PasswordHash,
    token: Option<IssuedToken>,
}

/// Password verification and the single active access token
#[derive(Debug)]
pub struct AccessControl {
    store: CredentialStore,
    policy: TokenPolicy,
    state: Mutex<AuthState>,
}

impl AccessControl {
    /// Load credentials from `store`
    pub fn new(store: CredentialStore, policy: TokenPolicy) -> Result<Self> {
        let hash = store.load()?;
        Ok(Self {
            store,
            policy,
            state: Mutex::new(AuthState { hash, token: None }),
        })
    }

    /// In-memory access control with a known password
    pub fn with_password(password: &str, policy: TokenPolicy) -> Self {
        Self {
            store: CredentialStore::in_memory(),
            policy,
            state: Mutex::new(AuthState {
                hash: PasswordHash::new(password),
                token: None,
            }),
        }
    }

    pub fn policy(&self) -> TokenPolicy {
        self.policy
    }

    /// Verify a password and mint a new token
    ///
    /// Any previous token is invalidated whether or not the attempt succeeds.
    pub fn login(&self, password: &str) -> Option<String> {
        let mut state = self.state.lock();
        if state.hash.verify(password) {
            let value = Uuid::new_v4().simple().to_string();
            state.token = Some(IssuedToken {
                value: value.clone(),
                issued: Instant::now(),
            });
            info!("Login succeeded, stream token issued");
            Some(value)
        } else {
            state.token = None;
            warn!("Login failed");
            None
        }
    }

    fn matches(&self, issued: &IssuedToken, token: &str) -> bool {
        if let Some(ttl) = self.policy.ttl {
            if issued.issued.elapsed() > ttl {
                return false;
            }
        }
        constant_time_eq(issued.value.as_bytes(), token.as_bytes())
    }

    /// Whether `token` is the current token, without using it up
    pub fn validate(&self, token: &str) -> bool {
        let state = self.state.lock();
        state
            .token
            .as_ref()
            .is_some_and(|issued| self.matches(issued, token))
    }

    /// Accept `token` for opening a stream
    ///
    /// With single-use tokens a successful redeem consumes the token.
    pub fn redeem(&self, token: &str) -> bool {
        let mut state = self.state.lock();
        let accepted = state
            .token
            .as_ref()
            .is_some_and(|issued| self.matches(issued, token));
        if accepted && self.policy.single_use {
            state.token = None;
            debug!("Stream token consumed");
        }
        accepted
    }

    /// Replace the password and invalidate the current token
    pub fn change_password(&self, new_password: &str) -> Result<()> {
        if new_password.trim().is_empty() {
            return Err(RemoteCamError::auth("Password must not be blank"));
        }
        let hash = PasswordHash::new(new_password);
        self.store.store(&hash)?;

        let mut state = self.state.lock();
        state.hash = hash;
        state.token = None;
        info!("Password changed, stream token invalidated");
        Ok(())
    }

    /// Drop the current token
    pub fn invalidate(&self) {
        self.state.lock().token = None;
    }

    /// Whether a token is outstanding
    pub fn has_token(&self) -> bool {
        self.state.lock().token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn reusable() -> TokenPolicy {
        TokenPolicy {
            ttl: None,
            single_use: false,
        }
    }

    #[test]
    fn test_hash_format() {
        let hash = PasswordHash::with_salt("abc", "pw");
        let stored = hash.to_string();
        let (salt, hex) = stored.split_once(':').unwrap();
        assert_eq!(salt, "abc");
        assert_eq!(hex.len(), 64);
        assert_eq!(hex, digest_hex("abc", "pw"));
        assert_eq!(PasswordHash::parse(&stored).unwrap(), hash);
        assert!(PasswordHash::parse("nocolon").is_err());
    }

    #[test]
    fn test_salts_differ() {
        let a = PasswordHash::new("pw");
        let b = PasswordHash::new("pw");
        assert_ne!(a.salt(), b.salt());
        assert!(a.verify("pw") && b.verify("pw"));
        assert!(!a.verify("PW"));
    }

    #[test]
    fn test_single_use_token() {
        let access = AccessControl::with_password("secret", TokenPolicy::default());
        let token = access.login("secret").unwrap();
        assert!(access.validate(&token));
        assert!(access.redeem(&token));
        assert!(!access.redeem(&token));
    }

    #[test]
    fn test_failed_login_invalidates_token() {
        let access = AccessControl::with_password("secret", reusable());
        let token = access.login("secret").unwrap();
        assert!(access.login("wrong").is_none());
        assert!(!access.redeem(&token));
    }

    #[test]
    fn test_new_login_replaces_token() {
        let access = AccessControl::with_password("secret", reusable());
        let first = access.login("secret").unwrap();
        let second = access.login("secret").unwrap();
        assert_ne!(first, second);
        assert!(!access.validate(&first));
        assert!(access.redeem(&second));
        assert!(access.redeem(&second));
    }

    #[test]
    fn test_token_ttl() {
        let access = AccessControl::with_password("secret", TokenPolicy {
            ttl: Some(Duration::ZERO),
            single_use: false,
        });
        let token = access.login("secret").unwrap();
        std::thread::sleep(Duration::from_millis(2));
        assert!(!access.redeem(&token));
    }

    #[test]
    fn test_change_password() {
        let access = AccessControl::with_password("secret", reusable());
        let token = access.login("secret").unwrap();

        assert!(access.change_password("   ").is_err());
        assert!(access.validate(&token));

        access.change_password("newpass").unwrap();
        assert!(!access.validate(&token));
        assert!(access.login("secret").is_none());
        assert!(access.login("newpass").is_some());
    }

    #[test]
    fn test_store_migrates_legacy_plaintext() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.toml");
        std::fs::write(&path, "password = \"hunter2\"\n").unwrap();

        let store = CredentialStore::file(&path);
        let hash = store.load().unwrap();
        assert!(hash.verify("hunter2"));

        let state = StateFile::load_from(&path).unwrap();
        assert!(state.password.is_none());
        assert!(state.is_hashed);
        assert_eq!(store.load().unwrap(), hash);
    }

    #[test]
    fn test_store_defaults_and_persists_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.toml");

        let access = AccessControl::new(CredentialStore::file(&path), reusable()).unwrap();
        assert!(access.login(DEFAULT_PASSWORD).is_some());
        access.change_password("fresh").unwrap();

        let reloaded = AccessControl::new(CredentialStore::file(&path), reusable()).unwrap();
        assert!(reloaded.login("fresh").is_some());
    }

    #[test]
    fn test_malformed_hash_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.toml");
        std::fs::write(&path, "password_hash = \"garbage\"\nis_hashed = true\n").unwrap();
        assert!(CredentialStore::file(&path).load().is_err());
    }
}
